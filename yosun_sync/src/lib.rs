#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

mod latch;
pub use self::latch::{Gate, Latch};

mod pulse;
pub use self::pulse::{Beat, Pulse};
