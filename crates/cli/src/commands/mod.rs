pub mod chat;
pub mod config_cmd;
pub mod run;
pub mod setup;
