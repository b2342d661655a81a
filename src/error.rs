//! Error types for the vUSD protocol.
//!
//! This module defines all error types used throughout the protocol,
//! providing clear and actionable error messages.

use thiserror::Error;

/// Result type alias for vUSD operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the vUSD protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ═══════════════════════════════════════════════════════════════════
    // Position Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Position not found in the ledger
    #[error("position not found: {0}")]
    PositionNotFound(u64),

    /// Position is not active (closed or liquidated)
    #[error("position {0} is not active")]
    PositionNotActive(u64),

    /// Net debt below the protocol minimum
    #[error("net debt {amount} below minimum {minimum}")]
    InsufficientDebt {
        /// Resulting principal debt (wad)
        amount: u128,
        /// Protocol minimum net debt (wad)
        minimum: u128,
    },

    /// Repayment exceeds what the position owes
    #[error("repayment {amount} exceeds outstanding debt {owed}")]
    ExcessRepayment {
        /// Attempted repayment (wad)
        amount: u128,
        /// Outstanding interest + principal (wad)
        owed: u128,
    },

    /// Collateral withdrawal exceeds the position's balance
    #[error("insufficient collateral: requested {requested}, available {available}")]
    InsufficientCollateral {
        /// Requested collateral amount (wad)
        requested: u128,
        /// Available collateral amount (wad)
        available: u128,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Ratio Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Collateral ratio below the threshold the operation requires
    #[error("collateral ratio {current} below required {required}")]
    InsufficientCollateralRatio {
        /// Current ratio (wad, 1e18 = 100%)
        current: u128,
        /// Required ratio (wad)
        required: u128,
    },

    /// Adjustment would leave the position below the minimum collateral ratio
    #[error("collateral ratio {current} below minimum {minimum}")]
    BelowMinimumCollateralRatio {
        /// Resulting ratio (wad)
        current: u128,
        /// Minimum collateral ratio (wad)
        minimum: u128,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Liquidation Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Remaining debt cannot be redistributed (no other active stakes)
    #[error("no active stakes to redistribute against")]
    NoActiveStakes,

    /// Position is above the minimum collateral ratio and cannot be liquidated
    #[error("position is healthy: icr {icr} >= mcr {mcr}")]
    NotLiquidatable {
        /// Current individual collateral ratio (wad)
        icr: u128,
        /// Minimum collateral ratio (wad)
        mcr: u128,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Stability Pool Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Account has no deposit in the stability pool
    #[error("no stability pool deposit for account {0}")]
    NoDeposit(String),

    /// Operation requires a non-empty stability pool
    #[error("stability pool is empty")]
    EmptyPool,

    // ═══════════════════════════════════════════════════════════════════
    // Market Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Not authorized to perform this action
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// Collateral asset is not registered
    #[error("unknown collateral asset: {0}")]
    UnknownCollateral(u32),

    /// A market already exists for this collateral asset
    #[error("market already deployed for collateral {0}")]
    MarketExists(u32),

    /// Market has been shut down (TCR fell below SCR)
    #[error("market {0} is shut down for new borrowing")]
    MarketShutdown(u32),

    /// Market debt ceiling reached
    #[error("market debt ceiling reached: current {current}, max {max}")]
    DebtCeilingReached {
        /// Current market debt (wad)
        current: u128,
        /// Maximum allowed debt (wad)
        max: u128,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Token and Validation Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Account balance too low for the transfer or burn
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Required amount (wad)
        required: u128,
        /// Available amount (wad)
        available: u128,
    },

    /// Amount is zero
    #[error("amount cannot be zero")]
    ZeroAmount,

    /// Invalid input parameter
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Overflow in calculation
    #[error("arithmetic overflow in {operation}")]
    Overflow {
        /// Operation that overflowed
        operation: String,
    },

    /// Underflow in calculation
    #[error("arithmetic underflow in {operation}")]
    Underflow {
        /// Operation that underflowed
        operation: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Oracle Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Price is stale or unavailable for the asset
    #[error("stale or unavailable price for collateral {0}")]
    StaleOrUnavailablePrice(u32),

    // ═══════════════════════════════════════════════════════════════════
    // PSM Errors
    // ═══════════════════════════════════════════════════════════════════

    /// PSM supply cap reached
    #[error("supply cap reached: current {current}, cap {cap}")]
    SupplyCapReached {
        /// Debt that would be outstanding (wad)
        current: u128,
        /// Supply cap (wad)
        cap: u128,
    },

    /// PSM is paused
    #[error("module is paused")]
    Paused,

    // ═══════════════════════════════════════════════════════════════════
    // Serialization and Internal Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Invariant violation detected
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl Error {
    /// Returns true if this error is recoverable by the caller
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::InsufficientDebt { .. }
                | Error::ExcessRepayment { .. }
                | Error::InsufficientCollateral { .. }
                | Error::InsufficientCollateralRatio { .. }
                | Error::BelowMinimumCollateralRatio { .. }
                | Error::NotLiquidatable { .. }
                | Error::InsufficientBalance { .. }
                | Error::StaleOrUnavailablePrice(_)
                | Error::SupplyCapReached { .. }
        )
    }

    /// Returns true if this is a critical error requiring immediate attention
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Error::InvariantViolation(_) | Error::Overflow { .. } | Error::Underflow { .. }
        )
    }

    /// Returns the error code for external systems
    pub fn code(&self) -> u32 {
        match self {
            // Position errors: 1xxx
            Error::PositionNotFound(_) => 1001,
            Error::PositionNotActive(_) => 1002,
            Error::InsufficientDebt { .. } => 1003,
            Error::ExcessRepayment { .. } => 1004,
            Error::InsufficientCollateral { .. } => 1005,

            // Ratio errors: 2xxx
            Error::InsufficientCollateralRatio { .. } => 2001,
            Error::BelowMinimumCollateralRatio { .. } => 2002,

            // Liquidation errors: 3xxx
            Error::NoActiveStakes => 3001,
            Error::NotLiquidatable { .. } => 3002,

            // Stability pool errors: 4xxx
            Error::NoDeposit(_) => 4001,
            Error::EmptyPool => 4002,

            // Market errors: 5xxx
            Error::Unauthorized(_) => 5001,
            Error::UnknownCollateral(_) => 5002,
            Error::MarketExists(_) => 5003,
            Error::MarketShutdown(_) => 5004,
            Error::DebtCeilingReached { .. } => 5005,

            // Token and validation errors: 6xxx
            Error::InsufficientBalance { .. } => 6001,
            Error::ZeroAmount => 6002,
            Error::InvalidParameter { .. } => 6003,
            Error::Overflow { .. } => 6004,
            Error::Underflow { .. } => 6005,

            // Oracle errors: 7xxx
            Error::StaleOrUnavailablePrice(_) => 7001,

            // PSM errors: 8xxx
            Error::SupplyCapReached { .. } => 8001,
            Error::Paused => 8002,

            // Serialization and internal errors: 9xxx
            Error::Serialization(_) => 9001,
            Error::Deserialization(_) => 9002,
            Error::InvariantViolation(_) => 9003,
        }
    }
}
