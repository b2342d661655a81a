//! Peg stability module.
//!
//! Swaps an external peg asset one-to-one against the debt token, minus a
//! fee on each side. The peg asset itself is custody outside the protocol;
//! this module only tracks how much debt it has issued (`active_debt`)
//! against the cap and moves debt token balances.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::token::{Address, DebtAmount, DebtLedger};
use crate::error::{Error, Result};
use crate::utils::constants::{
    DEFAULT_PSM_FEE_IN, DEFAULT_PSM_FEE_OUT, DEFAULT_PSM_SUPPLY_CAP, WAD,
};
use crate::utils::math::wad_mul;

/// Quote for a swap into the debt token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyEstimate {
    /// Debt tokens the buyer receives
    pub debt_out: DebtAmount,
    /// Fee withheld, in debt tokens
    pub fee: DebtAmount,
}

/// A peg stability module instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Psm {
    fee_in: u128,
    fee_out: u128,
    supply_cap: DebtAmount,
    active_debt: DebtAmount,
    paused: bool,
}

impl Default for Psm {
    fn default() -> Self {
        Self::new(DebtAmount::from_wad(DEFAULT_PSM_SUPPLY_CAP))
    }
}

impl Psm {
    /// Create a module with default fees and the given supply cap
    pub fn new(supply_cap: DebtAmount) -> Self {
        Self {
            fee_in: DEFAULT_PSM_FEE_IN,
            fee_out: DEFAULT_PSM_FEE_OUT,
            supply_cap,
            active_debt: DebtAmount::ZERO,
            paused: false,
        }
    }

    /// Fee on swaps into the debt token (wad)
    pub fn fee_in(&self) -> u128 {
        self.fee_in
    }

    /// Fee on swaps out of the debt token (wad)
    pub fn fee_out(&self) -> u128 {
        self.fee_out
    }

    /// Supply cap on debt issued through this module
    pub fn supply_cap(&self) -> DebtAmount {
        self.supply_cap
    }

    /// Debt currently issued through this module
    pub fn total_active_debt(&self) -> DebtAmount {
        self.active_debt
    }

    /// Check if swaps are paused
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Quote a swap of `peg_amount` into the debt token
    pub fn estimate_buy(&self, peg_amount: DebtAmount) -> Result<BuyEstimate> {
        let fee = DebtAmount::from_wad(wad_mul(peg_amount.wad(), self.fee_in)?);
        Ok(BuyEstimate {
            debt_out: peg_amount.saturating_sub(fee),
            fee,
        })
    }

    /// Swap peg asset for debt tokens
    ///
    /// The full peg amount counts against the cap; the fee portion is minted
    /// to the fee collector. Returns the amount the buyer received.
    pub fn buy(
        &mut self,
        debt: &mut DebtLedger,
        buyer: Address,
        peg_amount: DebtAmount,
    ) -> Result<DebtAmount> {
        if self.paused {
            return Err(Error::Paused);
        }
        if peg_amount.is_zero() {
            return Err(Error::ZeroAmount);
        }

        let issued = self.active_debt.saturating_add(peg_amount);
        if issued > self.supply_cap {
            return Err(Error::SupplyCapReached {
                current: issued.wad(),
                cap: self.supply_cap.wad(),
            });
        }

        let estimate = self.estimate_buy(peg_amount)?;
        debt.mint(buyer, estimate.debt_out)?;
        if !estimate.fee.is_zero() {
            debt.mint(Address::FEE_COLLECTOR, estimate.fee)?;
        }
        self.active_debt = issued;

        info!(buyer = %buyer, amount = %peg_amount, out = %estimate.debt_out, "psm buy");
        Ok(estimate.debt_out)
    }

    /// Swap debt tokens back into the peg asset
    ///
    /// Burns the full amount from the seller and returns the peg asset due
    /// after the exit fee; settling the peg side is the caller's concern.
    pub fn sell(
        &mut self,
        debt: &mut DebtLedger,
        seller: Address,
        amount: DebtAmount,
    ) -> Result<DebtAmount> {
        if self.paused {
            return Err(Error::Paused);
        }
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        if amount > self.active_debt {
            return Err(Error::InsufficientBalance {
                required: amount.wad(),
                available: self.active_debt.wad(),
            });
        }

        debt.burn(seller, amount)?;
        self.active_debt = self.active_debt.saturating_sub(amount);

        let fee = DebtAmount::from_wad(wad_mul(amount.wad(), self.fee_out)?);
        let peg_out = amount.saturating_sub(fee);

        info!(seller = %seller, amount = %amount, out = %peg_out, "psm sell");
        Ok(peg_out)
    }

    /// Update the entry fee
    pub fn set_fee_in(&mut self, fee: u128) -> Result<()> {
        if fee >= WAD {
            return Err(Error::InvalidParameter {
                name: "fee_in".into(),
                reason: "must be below 100%".into(),
            });
        }
        self.fee_in = fee;
        Ok(())
    }

    /// Update the exit fee
    pub fn set_fee_out(&mut self, fee: u128) -> Result<()> {
        if fee >= WAD {
            return Err(Error::InvalidParameter {
                name: "fee_out".into(),
                reason: "must be below 100%".into(),
            });
        }
        self.fee_out = fee;
        Ok(())
    }

    /// Update the supply cap
    ///
    /// Lowering the cap below the issued amount blocks further buys but does
    /// not unwind open debt.
    pub fn set_supply_cap(&mut self, cap: DebtAmount) {
        self.supply_cap = cap;
    }

    /// Pause swaps
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume swaps
    pub fn unpause(&mut self) {
        self.paused = false;
    }
}
