//! Liquidation module for the vUSD protocol.
//!
//! This module handles liquidations and the stability pool:
//! - Liquidation engine for undercollateralized positions
//! - Stability pool for absorbing liquidations
//! - Redistribution of debt the pool cannot cover

pub mod engine;
pub mod stability_pool;

pub use engine::*;
pub use stability_pool::*;
