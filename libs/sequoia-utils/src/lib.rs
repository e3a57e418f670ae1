#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![forbid(unsafe_code)]

//! Small building blocks shared by the Sequoia SDK crates.

pub mod clock;
pub mod humantime_serde;
mod secret_string;

pub use clock::{Clock, ManualClock, TokioClock};
pub use secret_string::SecretString;
