#![allow(dead_code)]

pub mod client;
pub mod handle;
pub mod names;
pub mod recorder;
