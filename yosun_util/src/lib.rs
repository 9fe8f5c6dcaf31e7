#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Deserialization helpers for [`Duration`](std::time::Duration) fields.
#[cfg(feature = "duration")]
pub mod duration;

/// Implements an opinionated version of the exponential backoff, and a bounded
/// retry policy on top of it.
#[cfg(feature = "backoff")]
mod backoff {
    pub mod config;
    pub mod retry;
    pub mod wrapper;
}
#[cfg(feature = "backoff")]
pub use self::backoff::{
    config::BackoffConfig,
    retry::{Exhausted, RetryPolicy},
    wrapper::{Backoff, BackoffBuilder},
};
