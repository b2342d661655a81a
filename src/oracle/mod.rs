//! Oracle module for price feeds.
//!
//! Prices enter the protocol through the [`PriceOracle`] trait; the engine
//! never assumes a particular feed implementation.

pub mod price_feed;

pub use price_feed::*;
