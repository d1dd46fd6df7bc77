//! # avsync common library
//!
//! Shared code for the avsync crates:
//! - Error type
//! - Configuration loading and resolution
//! - Player event types and the broadcast event bus
//! - Monotonic time sources and unit conversions

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use time::{ManualClock, MonotonicClock, SystemClock};
