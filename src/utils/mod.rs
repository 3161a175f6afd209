//!
//! Utility module for the confidential-payment client.
//!
//! Re-exports time sources and the small arithmetic/formatting helpers used throughout the codebase.
/// Time sources for epoch arithmetic and deferral sleeps
pub mod clock;
/// Utility functions for sizing and display
pub mod index;

pub use clock::{Clock, ManualClock, SystemClock};
pub use index::{format_wait, is_valid_set_size, power_of_two_bounds};
