//! Shared wire protocol and domain models for the bookline realtime feed.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
