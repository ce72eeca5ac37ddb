//! Conversation memory for the agent loop.
//!
//! [`ContextManager`] owns the message history, the files currently in
//! view and the modification log, and keeps them inside an approximate
//! token budget:
//!
//! | Stage | When | Effect |
//! |-------|------|--------|
//! | Compression | after every tool round | old file reads → head/tail preview; unmodified files → outline |
//! | Tier 1 | over budget | unmodified files outside the keep set → outline |
//! | Tier 2 | still over, > 20 messages | importance-scored message pruning |
//! | Tier 3 | still over | truncate long tool output, then collapse history |

pub mod compression;
pub mod manager;
pub mod pruning;
pub mod token;

pub use manager::{ContextManager, FileSummary, Modification, RecentToolOutput};
pub use pruning::{PruneReport, PruneTier};
