//! Position records and interest accrual.
//!
//! A position holds collateral against principal debt plus continuously
//! compounding interest. The record also carries the redistribution snapshot
//! and stake used by the ledger's pending-reward accounting; those fields are
//! only ever touched through [`crate::core::ledger::PositionLedger`].

use serde::{Deserialize, Serialize};

use crate::core::token::{Address, CollAmount, DebtAmount, PositionId};
use crate::error::{Error, Result};
use crate::utils::constants::{GAS_COMPENSATION, WAD};
use crate::utils::math::{interest_factor, mul_div, safe_add};

// ═══════════════════════════════════════════════════════════════════════════════
// STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    /// Position is active and accruing interest
    Active,
    /// Position was closed by its owner
    Closed,
    /// Position was liquidated
    Liquidated,
}

impl PositionStatus {
    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, PositionStatus::Closed | PositionStatus::Liquidated)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION
// ═══════════════════════════════════════════════════════════════════════════════

/// A collateralized debt position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Position identifier (unique within a market)
    pub id: PositionId,
    /// Owner account
    pub owner: Address,
    /// Collateral backing the position (settled, excludes pending rewards)
    pub collateral: CollAmount,
    /// Principal debt, excluding the gas compensation reserve
    pub principal: DebtAmount,
    /// Interest accrued and not yet repaid
    pub interest: DebtAmount,
    /// Annual interest rate fixed at open (wad)
    pub interest_rate: u128,
    /// Timestamp of the last interest accrual (unix seconds)
    pub last_accrual: u64,
    /// Redistribution stake (wad)
    pub stake: u128,
    /// Collateral-per-stake accumulator at the last settlement (wad)
    pub coll_snapshot: u128,
    /// Debt-per-stake accumulator at the last settlement (wad)
    pub debt_snapshot: u128,
    /// Lifecycle status
    pub status: PositionStatus,
    /// Timestamp the position was opened (unix seconds)
    pub opened_at: u64,
}

impl Position {
    /// Create a new active position
    pub fn new(
        id: PositionId,
        owner: Address,
        collateral: CollAmount,
        principal: DebtAmount,
        interest_rate: u128,
        now: u64,
    ) -> Self {
        Self {
            id,
            owner,
            collateral,
            principal,
            interest: DebtAmount::ZERO,
            interest_rate,
            last_accrual: now,
            stake: 0,
            coll_snapshot: 0,
            debt_snapshot: 0,
            status: PositionStatus::Active,
            opened_at: now,
        }
    }

    /// Check if the position is active
    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }

    /// Total outstanding debt: principal plus accrued interest
    pub fn total_debt(&self) -> DebtAmount {
        self.principal.saturating_add(self.interest)
    }

    /// Individual collateral ratio at the given price (wad)
    ///
    /// The gas compensation reserve counts toward the denominator even though
    /// it is not part of the principal. A position with no debt has an
    /// effectively infinite ratio.
    pub fn icr(&self, price: u128) -> Result<u128> {
        let denominator = safe_add(self.total_debt().wad(), GAS_COMPENSATION)?;
        mul_div(self.collateral.wad(), price, denominator)
    }

    /// Accrue interest up to `now`, compounding on principal plus interest
    ///
    /// Returns the newly accrued amount. A timestamp at or before the last
    /// accrual leaves the position unchanged.
    pub fn accrue(&mut self, now: u64) -> Result<DebtAmount> {
        if now <= self.last_accrual {
            return Ok(DebtAmount::ZERO);
        }
        let dt = now - self.last_accrual;
        self.last_accrual = now;

        let owed = self.total_debt();
        if owed.is_zero() {
            return Ok(DebtAmount::ZERO);
        }

        let factor = interest_factor(self.interest_rate, dt)?;
        let accrued = DebtAmount::from_wad(mul_div(owed.wad(), factor, WAD)?);
        self.interest = self.interest.checked_add(accrued).ok_or(Error::Overflow {
            operation: "interest accrual".into(),
        })?;
        Ok(accrued)
    }

    /// Apply a repayment, interest first
    ///
    /// Returns (interest paid, principal paid). Fails when the amount exceeds
    /// what the position owes. Callers enforce the minimum net debt floor.
    pub fn apply_repayment(&mut self, amount: DebtAmount) -> Result<(DebtAmount, DebtAmount)> {
        let owed = self.total_debt();
        if amount > owed {
            return Err(Error::ExcessRepayment {
                amount: amount.wad(),
                owed: owed.wad(),
            });
        }

        let interest_paid = amount.min(self.interest);
        let principal_paid = amount.saturating_sub(interest_paid);

        self.interest = self.interest.saturating_sub(interest_paid);
        self.principal = self.principal.saturating_sub(principal_paid);

        Ok((interest_paid, principal_paid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::SECONDS_PER_YEAR;

    fn position(coll_whole: u64, principal_whole: u64, rate: u128) -> Position {
        Position::new(
            PositionId(1),
            Address::new(7),
            CollAmount::from_whole(coll_whole),
            DebtAmount::from_whole(principal_whole),
            rate,
            0,
        )
    }

    #[test]
    fn test_icr_includes_gas_compensation() {
        // 1 collateral at 100,000 against 1,800 debt + 200 gas comp: ICR = 50
        let pos = position(1, 1800, WAD / 10);
        let icr = pos.icr(100_000 * WAD).unwrap();
        assert_eq!(icr, 50 * WAD);
    }

    #[test]
    fn test_accrue_one_year() {
        let mut pos = position(1, 4800, WAD / 4);
        let accrued = pos.accrue(SECONDS_PER_YEAR).unwrap();

        // 4800 * (e^0.25 - 1) = 1363.32...
        let expected = mul_div(
            DebtAmount::from_whole(4800).wad(),
            interest_factor(WAD / 4, SECONDS_PER_YEAR).unwrap(),
            WAD,
        )
        .unwrap();
        assert_eq!(accrued.wad(), expected);
        assert!(accrued > DebtAmount::from_whole(1363));
        assert!(accrued < DebtAmount::from_whole(1364));
    }

    #[test]
    fn test_accrue_is_idempotent_at_same_timestamp() {
        let mut pos = position(1, 4800, WAD / 4);
        pos.accrue(1000).unwrap();
        let again = pos.accrue(1000).unwrap();
        assert!(again.is_zero());
    }

    #[test]
    fn test_accrue_compounds_on_interest() {
        let mut once = position(1, 4800, WAD / 4);
        once.accrue(SECONDS_PER_YEAR).unwrap();

        let mut twice = position(1, 4800, WAD / 4);
        twice.accrue(SECONDS_PER_YEAR / 2).unwrap();
        twice.accrue(SECONDS_PER_YEAR).unwrap();

        // Splitting the interval compounds through the midpoint; the results
        // agree up to fixed-point rounding.
        let diff = once.interest.wad().abs_diff(twice.interest.wad());
        assert!(diff < 1_000_000, "diff = {}", diff);
    }

    #[test]
    fn test_repayment_interest_first() {
        let mut pos = position(1, 4800, WAD / 4);
        pos.accrue(SECONDS_PER_YEAR).unwrap();
        let interest_before = pos.interest;

        let (interest_paid, principal_paid) =
            pos.apply_repayment(DebtAmount::from_whole(500)).unwrap();
        assert_eq!(interest_paid, DebtAmount::from_whole(500));
        assert!(principal_paid.is_zero());
        assert_eq!(pos.interest, interest_before.saturating_sub(DebtAmount::from_whole(500)));
        assert_eq!(pos.principal, DebtAmount::from_whole(4800));
    }

    #[test]
    fn test_repayment_spills_into_principal() {
        let mut pos = position(1, 4800, WAD / 4);
        pos.accrue(SECONDS_PER_YEAR).unwrap();
        let interest = pos.interest;

        let amount = interest.saturating_add(DebtAmount::from_whole(800));
        let (interest_paid, principal_paid) = pos.apply_repayment(amount).unwrap();
        assert_eq!(interest_paid, interest);
        assert_eq!(principal_paid, DebtAmount::from_whole(800));
        assert!(pos.interest.is_zero());
        assert_eq!(pos.principal, DebtAmount::from_whole(4000));
    }

    #[test]
    fn test_excess_repayment_rejected() {
        let mut pos = position(1, 4800, WAD / 4);
        let result = pos.apply_repayment(DebtAmount::from_whole(5000));
        assert!(matches!(result, Err(Error::ExcessRepayment { .. })));
    }

    #[test]
    fn test_terminal_status() {
        assert!(!PositionStatus::Active.is_terminal());
        assert!(PositionStatus::Closed.is_terminal());
        assert!(PositionStatus::Liquidated.is_terminal());
    }
}
