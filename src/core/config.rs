//! Per-collateral risk parameters.
//!
//! Each deployed market carries its own [`RiskParams`]. The defaults mirror
//! the standard deployment configuration; every field can be overridden per
//! market before deployment.

use serde::{Deserialize, Serialize};

use crate::core::token::{CollAmount, DebtAmount};
use crate::error::{Error, Result};
use crate::utils::constants::*;

/// Risk parameters for one collateral market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskParams {
    /// Annual interest rate on principal debt (wad, continuous compounding)
    pub interest_rate: u128,
    /// Ceiling on total market debt
    pub max_debt: DebtAmount,
    /// Share of accrued interest streamed to the stability pool as yield (wad)
    pub sp_yield_pct: u128,
    /// Cap on the collateral gas compensation paid to liquidation callers
    pub max_coll_gas_comp: CollAmount,
    /// Collateral gas compensation as a fraction of position collateral (wad)
    pub coll_gas_comp_pct: u128,
    /// Liquidation penalty on the stability pool tranche (wad)
    pub liquidation_penalty_sp: u128,
    /// Liquidation penalty on the redistribution tranche (wad)
    pub liquidation_penalty_redistribution: u128,
    /// Minimum collateral ratio: below this a position is liquidatable (wad)
    pub mcr: u128,
    /// Shutdown collateral ratio: below this TCR the market freezes (wad)
    pub scr: u128,
    /// Critical collateral ratio: opening threshold and TCR gate (wad)
    pub ccr: u128,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            interest_rate: DEFAULT_INTEREST_RATE,
            max_debt: DebtAmount::from_wad(DEFAULT_MAX_DEBT),
            sp_yield_pct: DEFAULT_SP_YIELD_PCT,
            max_coll_gas_comp: CollAmount::from_wad(DEFAULT_MAX_COLL_GAS_COMP),
            coll_gas_comp_pct: COLL_GAS_COMP_PCT,
            liquidation_penalty_sp: DEFAULT_PENALTY_SP,
            liquidation_penalty_redistribution: DEFAULT_PENALTY_REDISTRIBUTION,
            mcr: DEFAULT_MCR,
            scr: DEFAULT_SCR,
            ccr: DEFAULT_CCR,
        }
    }
}

impl RiskParams {
    /// Validate parameter consistency
    pub fn validate(&self) -> Result<()> {
        if self.mcr <= WAD {
            return Err(Error::InvalidParameter {
                name: "mcr".into(),
                reason: "must exceed 100%".into(),
            });
        }
        if !(self.mcr < self.scr && self.scr < self.ccr) {
            return Err(Error::InvalidParameter {
                name: "ratios".into(),
                reason: "must satisfy mcr < scr < ccr".into(),
            });
        }
        if self.sp_yield_pct > WAD {
            return Err(Error::InvalidParameter {
                name: "sp_yield_pct".into(),
                reason: "must not exceed 100%".into(),
            });
        }
        if self.coll_gas_comp_pct >= WAD {
            return Err(Error::InvalidParameter {
                name: "coll_gas_comp_pct".into(),
                reason: "must be below 100%".into(),
            });
        }
        if self.liquidation_penalty_sp >= WAD || self.liquidation_penalty_redistribution >= WAD {
            return Err(Error::InvalidParameter {
                name: "liquidation_penalty".into(),
                reason: "must be below 100%".into(),
            });
        }
        if self.max_debt.is_zero() {
            return Err(Error::InvalidParameter {
                name: "max_debt".into(),
                reason: "must be non-zero".into(),
            });
        }
        Ok(())
    }
}
