//! Shared types for the streams relayer.
//!
//! Every crate in the workspace speaks in terms of these types: feeds and
//! their reports, chain-agnostic transactions and receipts, pipeline events
//! and the configuration schema helpers used to validate implementation
//! blocks.

pub mod account;
pub mod delivery;
pub mod events;
pub mod feed;
pub mod report;
pub mod validation;

pub use account::*;
pub use delivery::*;
pub use events::*;
pub use feed::*;
pub use report::*;
pub use validation::*;
