//! Core modules for the vUSD protocol.
//!
//! This module contains the fundamental building blocks:
//! - Per-collateral risk parameters
//! - Debt and collateral token ledgers
//! - Position records and interest accrual
//! - The position ledger with redistribution accounting

pub mod config;
pub mod ledger;
pub mod position;
pub mod token;

pub use config::*;
pub use ledger::*;
pub use position::*;
pub use token::*;
