//! Build-time helpers shared by the sensor node crates.

#![no_std]

#[doc(hidden)]
pub mod env;
