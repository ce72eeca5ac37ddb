//! Model provider implementations for forgeloop.
//!
//! All providers implement `forgeloop_core::Provider`. The router turns the
//! configured provider list into a fallback chain.

pub mod anthropic;
pub mod fallback;
mod http;
pub mod openai_compat;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use fallback::FallbackProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{build_from_config, build_provider};
