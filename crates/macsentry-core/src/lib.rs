//! macsentry-core: Shared types and error handling for macsentry.
//!
//! This crate provides the foundational types used by the watch daemon:
//! - `MacAddress`, the canonical hardware identifier
//! - `Phase`, the two states of the alarm engine
//! - `AlarmEvent`, the payload handed to alarm sinks
//! - Common error types

pub mod error;
pub mod events;
pub mod types;

pub use error::CoreError;
pub use events::AlarmEvent;
pub use types::{MacAddress, Phase};
