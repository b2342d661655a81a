//! Protocol constants and magic numbers.
//!
//! All protocol-wide constants are defined here for easy auditing and modification.
//! Token quantities, prices, and ratios are wads: u128 values scaled by 1e18.

// ═══════════════════════════════════════════════════════════════════════════════
// FIXED-POINT SCALE
// ═══════════════════════════════════════════════════════════════════════════════

/// Wad scale: 1e18 represents 1.0
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// Half a wad, for round-to-nearest conversions
pub const HALF_WAD: u128 = WAD / 2;

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed debt gas compensation per position - 200 vUSD
///
/// Minted to the shared gas pool at open, refunded at close, and paid to the
/// caller that triggers a liquidation.
pub const GAS_COMPENSATION: u128 = 200 * WAD;

/// Minimum net debt per position - 2,000 vUSD
///
/// Net debt is principal plus the gas compensation reserve, so the smallest
/// principal a position can carry is 1,800 vUSD.
pub const MIN_NET_DEBT: u128 = 2_000 * WAD;

// ═══════════════════════════════════════════════════════════════════════════════
// RISK PARAMETER DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Default annual interest rate - 10% (continuous compounding)
pub const DEFAULT_INTEREST_RATE: u128 = WAD / 10;

/// Default market debt ceiling - 20 billion vUSD
pub const DEFAULT_MAX_DEBT: u128 = 20_000_000_000 * WAD;

/// Default share of accrued interest streamed to the stability pool - 80%
pub const DEFAULT_SP_YIELD_PCT: u128 = 8 * WAD / 10;

/// Default cap on the collateral gas compensation - 0.1 collateral units
pub const DEFAULT_MAX_COLL_GAS_COMP: u128 = WAD / 10;

/// Collateral gas compensation percentage - 0.5% of position collateral
pub const COLL_GAS_COMP_PCT: u128 = 5 * WAD / 1_000;

/// Default liquidation penalty on the stability pool tranche - 5%
pub const DEFAULT_PENALTY_SP: u128 = 5 * WAD / 100;

/// Default liquidation penalty on the redistribution tranche - 5%
pub const DEFAULT_PENALTY_REDISTRIBUTION: u128 = 5 * WAD / 100;

/// Minimum Collateral Ratio (MCR) - 110%
///
/// Below this ratio a position can be liquidated.
pub const DEFAULT_MCR: u128 = 11 * WAD / 10;

/// Shutdown Collateral Ratio (SCR) - 130%
///
/// When a market's TCR falls below this, new borrowing is frozen.
pub const DEFAULT_SCR: u128 = 13 * WAD / 10;

/// Critical Collateral Ratio (CCR) - 150%
///
/// New positions must open at or above this ratio, and debt increases are
/// blocked while the market TCR sits below it.
pub const DEFAULT_CCR: u128 = 15 * WAD / 10;

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Scale factor for the stability pool product
///
/// When the running product P would fall below this threshold it is multiplied
/// back up by the same factor and the scale counter increments.
pub const SP_SCALE_FACTOR: u128 = 1_000_000_000;

// ═══════════════════════════════════════════════════════════════════════════════
// PEG STABILITY MODULE CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Default fee on swaps into the debt token - 1%
pub const DEFAULT_PSM_FEE_IN: u128 = WAD / 100;

/// Default fee on swaps out of the debt token - 2%
pub const DEFAULT_PSM_FEE_OUT: u128 = 2 * WAD / 100;

/// Default peg stability module supply cap - 10 million vUSD
pub const DEFAULT_PSM_SUPPLY_CAP: u128 = 10_000_000 * WAD;

// ═══════════════════════════════════════════════════════════════════════════════
// TIME CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Seconds per year (365 days), the unit of annual interest rates
pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 3600;

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT LOG CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Maximum events kept in the in-memory event log
pub const MAX_EVENTS: usize = 1000;
