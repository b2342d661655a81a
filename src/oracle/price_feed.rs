//! Price feed abstraction and an in-memory implementation.
//!
//! Every coordinator entry point that needs a price takes a `&dyn
//! PriceOracle`. The protocol treats a feed as a black box that either
//! returns a usable quote or is stale; staleness handling stays on the
//! caller's side of the trait.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::token::CollateralId;
use crate::error::{Error, Result};

/// A price observation for one collateral asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Price of one whole collateral unit in debt units (wad)
    pub price: u128,
    /// Whether the feed considers this quote current
    pub fresh: bool,
}

/// Source of collateral prices
pub trait PriceOracle {
    /// Quote the price of an asset
    ///
    /// Implementations return [`Error::StaleOrUnavailablePrice`] when no
    /// usable quote exists; a quote with `fresh: false` is a degraded answer
    /// the caller may still reject.
    fn quote(&self, asset: CollateralId) -> Result<PriceQuote>;
}

/// Feed backed by a map of posted prices
///
/// Used by tests and by deployments where an external process pushes prices
/// into the protocol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryPriceFeed {
    quotes: HashMap<CollateralId, PriceQuote>,
}

impl MemoryPriceFeed {
    /// Create an empty feed
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a fresh price for an asset
    pub fn set_price(&mut self, asset: CollateralId, price: u128) {
        self.quotes.insert(asset, PriceQuote { price, fresh: true });
    }

    /// Mark an asset's quote as stale without discarding it
    pub fn mark_stale(&mut self, asset: CollateralId) {
        if let Some(quote) = self.quotes.get_mut(&asset) {
            quote.fresh = false;
        }
    }
}

impl PriceOracle for MemoryPriceFeed {
    fn quote(&self, asset: CollateralId) -> Result<PriceQuote> {
        self.quotes
            .get(&asset)
            .copied()
            .ok_or(Error::StaleOrUnavailablePrice(asset.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::WAD;

    #[test]
    fn test_set_and_quote() {
        let mut feed = MemoryPriceFeed::new();
        feed.set_price(CollateralId(0), 2_000 * WAD);

        let quote = feed.quote(CollateralId(0)).unwrap();
        assert_eq!(quote.price, 2_000 * WAD);
        assert!(quote.fresh);
    }

    #[test]
    fn test_missing_asset_unavailable() {
        let feed = MemoryPriceFeed::new();
        assert!(matches!(
            feed.quote(CollateralId(9)),
            Err(Error::StaleOrUnavailablePrice(9))
        ));
    }

    #[test]
    fn test_mark_stale_keeps_last_price() {
        let mut feed = MemoryPriceFeed::new();
        feed.set_price(CollateralId(0), 2_000 * WAD);
        feed.mark_stale(CollateralId(0));

        let quote = feed.quote(CollateralId(0)).unwrap();
        assert_eq!(quote.price, 2_000 * WAD);
        assert!(!quote.fresh);
    }
}
