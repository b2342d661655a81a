//! # vUSD Protocol
//!
//! A multi-collateral stablecoin engine: borrowers open collateralized debt
//! positions, interest compounds continuously, and undercollateralized
//! positions are liquidated against a shared stability pool with the
//! remainder redistributed to surviving borrowers.
//!
//! ## Architecture
//!
//! - **Core**: amounts and account ledgers, risk parameters, positions and
//!   the per-market position ledger
//! - **Liquidation**: liquidation engine and the scalable stability pool
//! - **Protocol**: the multi-collateral coordinator and its event log
//! - **Oracle**: the price feed interface
//! - **Psm**: peg stability swap module
//!
//! ## Example
//!
//! ```rust,ignore
//! use vusd::prelude::*;
//!
//! let mut system = System::new();
//! let asset = system.register_collateral("wrapped-btc");
//! system.deploy_market(asset, RiskParams::default(), now)?;
//!
//! let id = system.open_position(&feed, asset, owner, collateral, principal, now)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    unused_lifetimes,
    unused_qualifications
)]

pub mod core;
pub mod error;
pub mod liquidation;
pub mod oracle;
pub mod protocol;
pub mod psm;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{
        config::RiskParams,
        ledger::PositionLedger,
        position::{Position, PositionStatus},
        token::{Address, CollAmount, CollateralId, DebtAmount, PositionId},
    };
    pub use crate::error::{Error, Result};
    pub use crate::liquidation::{
        engine::{
            BatchOutcome, BatchReport, LiquidationEngine, LiquidationOutcome, LiquidationRecord,
            SkipReason,
        },
        stability_pool::StabilityPool,
    };
    pub use crate::oracle::price_feed::{MemoryPriceFeed, PriceOracle, PriceQuote};
    pub use crate::protocol::{
        events::{EventLog, ProtocolEvent},
        system::{CollChange, DebtChange, Market, Registry, System},
    };
    pub use crate::psm::Psm;
    pub use crate::utils::constants::WAD;
}

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol name
pub const PROTOCOL_NAME: &str = "vUSD";
