//! Protocol module - the multi-collateral coordinator.
//!
//! This module binds the position ledger, liquidation engine, and stability
//! pool together per collateral asset, and owns the token ledgers and event
//! log they act on.

pub mod events;
pub mod system;

pub use events::*;
pub use system::*;
