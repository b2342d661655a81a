//! Utility modules for the vUSD protocol.
//!
//! This module contains shared utilities used across the protocol:
//! - Fixed-point (wad) arithmetic
//! - Protocol constants

pub mod constants;
pub mod math;

pub use constants::*;
pub use math::*;
