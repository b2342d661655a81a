//! Liquidation engine.
//!
//! Liquidates positions whose individual collateral ratio has fallen below
//! the market's minimum. Each liquidation pays the caller two carve-outs,
//! offsets as much debt as the stability pool can absorb, redistributes the
//! remainder to surviving positions, and parks any leftover collateral as a
//! surplus the owner can claim.
//!
//! Batches run entry by entry in caller order. Every absorption moves the
//! pool's accumulators, so the same set of positions can produce different
//! splits under a different ordering.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::core::config::RiskParams;
use crate::core::ledger::PositionLedger;
use crate::core::token::{
    Address, CollAmount, CollateralId, DebtAmount, DebtLedger, CollateralLedger, PositionId,
};
use crate::error::{Error, Result};
use crate::liquidation::stability_pool::{stream_interest, StabilityPool};
use crate::utils::constants::{GAS_COMPENSATION, WAD};
use crate::utils::math::{mul_div, safe_add, wad_mul};

/// Records retained before the oldest are pruned
const MAX_RECORDS: usize = 256;

// ═══════════════════════════════════════════════════════════════════════════════
// CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Mutable view of one market's state for the duration of a liquidation
///
/// The coordinator assembles this from the market, the shared debt ledger and
/// the shared stability pool; the engine never holds state between calls
/// beyond its own records.
pub struct LiquidationContext<'a> {
    /// Risk parameters of the market under liquidation
    pub params: &'a RiskParams,
    /// Collateral asset of the market
    pub asset: CollateralId,
    /// Position ledger of the market
    pub ledger: &'a mut PositionLedger,
    /// Collateral balances of the market
    pub collateral: &'a mut CollateralLedger,
    /// Claimable collateral surplus per owner
    pub surplus: &'a mut HashMap<Address, CollAmount>,
    /// Shared debt token ledger
    pub debt: &'a mut DebtLedger,
    /// Shared stability pool
    pub pool: &'a mut StabilityPool,
    /// Collateral price (wad)
    pub price: u128,
    /// Caller receiving the gas compensations
    pub caller: Address,
    /// Current timestamp (unix seconds)
    pub now: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTCOMES
// ═══════════════════════════════════════════════════════════════════════════════

/// Accounting of a single completed liquidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationRecord {
    /// Liquidated position
    pub position: PositionId,
    /// Owner of the liquidated position
    pub owner: Address,
    /// Collateral asset
    pub asset: CollateralId,
    /// Debt cleared, gas compensation reserve excluded
    pub debt_cleared: DebtAmount,
    /// Collateral seized, caller carve-out excluded
    pub coll_seized: CollAmount,
    /// Debt offset against the stability pool
    pub debt_offset: DebtAmount,
    /// Collateral awarded to the stability pool
    pub coll_to_pool: CollAmount,
    /// Debt redistributed to surviving positions
    pub debt_redistributed: DebtAmount,
    /// Collateral redistributed to surviving positions
    pub coll_redistributed: CollAmount,
    /// Collateral carve-out paid to the caller
    pub coll_gas_comp: CollAmount,
    /// Collateral surplus claimable by the owner
    pub surplus: CollAmount,
    /// Timestamp of the liquidation
    pub timestamp: u64,
}

/// Why a batch entry was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No position with this id
    NotFound,
    /// Position already closed or liquidated
    NotActive,
    /// Position is above the minimum collateral ratio
    Healthy {
        /// Individual collateral ratio at the batch price (wad)
        icr: u128,
    },
}

/// Outcome of a single liquidation attempt
///
/// Missing, already-closed and healthy targets are reported as skips rather
/// than errors, so retrying a liquidation is a no-op.
#[derive(Debug, Clone)]
pub enum LiquidationOutcome {
    /// The position was liquidated
    Liquidated(LiquidationRecord),
    /// Nothing happened; no state was touched
    Skipped(SkipReason),
}

/// Result of one batch entry
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    /// Entry was liquidated
    Liquidated(LiquidationRecord),
    /// Entry was skipped
    Skipped(SkipReason),
    /// Entry failed with an unexpected error
    Failed(Error),
}

/// Summary of a batch liquidation
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Per-entry outcomes, in submission order
    pub outcomes: Vec<(PositionId, BatchOutcome)>,
    /// Total debt cleared across liquidated entries
    pub total_debt: DebtAmount,
    /// Total collateral seized across liquidated entries
    pub total_coll: CollAmount,
}

impl BatchReport {
    /// Number of entries actually liquidated
    pub fn liquidated_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, BatchOutcome::Liquidated(_)))
            .count()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Liquidation engine shared by every market
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiquidationEngine {
    records: Vec<LiquidationRecord>,
    total_liquidations: u64,
    total_debt_liquidated: DebtAmount,
    total_coll_liquidated: CollAmount,
}

impl LiquidationEngine {
    /// Create an engine with empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Recent liquidation records, oldest first
    pub fn records(&self) -> &[LiquidationRecord] {
        &self.records
    }

    /// Lifetime number of liquidations
    pub fn total_liquidations(&self) -> u64 {
        self.total_liquidations
    }

    /// Lifetime debt cleared by liquidations
    pub fn total_debt_liquidated(&self) -> DebtAmount {
        self.total_debt_liquidated
    }

    /// Attempt to liquidate a single position
    ///
    /// Targets that are missing, already closed or above the minimum
    /// collateral ratio come back as [`LiquidationOutcome::Skipped`].
    pub fn liquidate(
        &mut self,
        ctx: &mut LiquidationContext<'_>,
        id: PositionId,
    ) -> Result<LiquidationOutcome> {
        match self.liquidate_inner(ctx, id) {
            Ok(record) => Ok(LiquidationOutcome::Liquidated(record)),
            Err(Error::PositionNotFound(_)) => {
                debug!(position = id.0, "liquidation target not found");
                Ok(LiquidationOutcome::Skipped(SkipReason::NotFound))
            }
            Err(Error::PositionNotActive(_)) => {
                debug!(position = id.0, "liquidation target not active");
                Ok(LiquidationOutcome::Skipped(SkipReason::NotActive))
            }
            Err(Error::NotLiquidatable { icr, .. }) => {
                debug!(position = id.0, icr, "liquidation target healthy");
                Ok(LiquidationOutcome::Skipped(SkipReason::Healthy { icr }))
            }
            Err(e) => Err(e),
        }
    }

    fn liquidate_inner(
        &mut self,
        ctx: &mut LiquidationContext<'_>,
        id: PositionId,
    ) -> Result<LiquidationRecord> {
        // Fold pending redistribution rewards and accrued interest into the
        // position before measuring it.
        let report = ctx.ledger.settle(id, ctx.now)?;
        stream_interest(
            ctx.pool,
            ctx.debt,
            ctx.params.sp_yield_pct,
            report.interest_accrued,
        )?;

        let pos = ctx.ledger.get(id)?;
        let icr = pos.icr(ctx.price)?;
        if icr >= ctx.params.mcr {
            return Err(Error::NotLiquidatable {
                icr,
                mcr: ctx.params.mcr,
            });
        }

        let coll = pos.collateral;
        let owner = pos.owner;
        let debt_total = pos.total_debt();

        let coll_gas_comp = CollAmount::from_wad(wad_mul(coll.wad(), ctx.params.coll_gas_comp_pct)?)
            .min(ctx.params.max_coll_gas_comp)
            .min(coll);
        let coll_remaining = coll.saturating_sub(coll_gas_comp);

        let debt_offset = debt_total.min(ctx.pool.total_deposits());
        let debt_redistributed = debt_total.saturating_sub(debt_offset);

        // Redistribution needs at least one surviving stake.
        if !debt_redistributed.is_zero() && ctx.ledger.active_count() <= 1 {
            return Err(Error::NoActiveStakes);
        }

        // Pool tranche: debt value plus penalty, capped at the tranche's
        // proportional share of the seized collateral.
        let coll_to_pool = if debt_offset.is_zero() {
            CollAmount::ZERO
        } else {
            let priced = mul_div(
                debt_offset.wad(),
                safe_add(WAD, ctx.params.liquidation_penalty_sp)?,
                ctx.price,
            )?;
            let share = mul_div(coll_remaining.wad(), debt_offset.wad(), debt_total.wad())?;
            CollAmount::from_wad(priced.min(share))
        };
        let coll_after_offset = coll_remaining.saturating_sub(coll_to_pool);

        let coll_redistributed = if debt_redistributed.is_zero() {
            CollAmount::ZERO
        } else {
            let priced = mul_div(
                debt_redistributed.wad(),
                safe_add(WAD, ctx.params.liquidation_penalty_redistribution)?,
                ctx.price,
            )?;
            CollAmount::from_wad(priced).min(coll_after_offset)
        };
        let surplus = coll_after_offset.saturating_sub(coll_redistributed);

        // All checks passed: mutate. Remove the position first so the
        // redistribution cannot land back on it.
        let removed = ctx.ledger.liquidate(id)?;
        if !debt_redistributed.is_zero() {
            ctx.ledger.redistribute(debt_redistributed, coll_redistributed)?;
        }
        ctx.ledger.update_liquidation_snapshots();

        if !debt_offset.is_zero() {
            ctx.pool.absorb(debt_offset, ctx.asset, coll_to_pool)?;
            ctx.debt.burn(Address::STABILITY_POOL, debt_offset)?;
            ctx.collateral
                .transfer(Address::VAULT, Address::STABILITY_POOL, coll_to_pool)?;
        }

        // Caller carve-outs: the debt reserve funded at open and a slice of
        // the collateral.
        ctx.debt.transfer(
            Address::GAS_POOL,
            ctx.caller,
            DebtAmount::from_wad(GAS_COMPENSATION),
        )?;
        if !coll_gas_comp.is_zero() {
            ctx.collateral
                .transfer(Address::VAULT, ctx.caller, coll_gas_comp)?;
        }

        if !surplus.is_zero() {
            ctx.collateral
                .transfer(Address::VAULT, Address::SURPLUS_POOL, surplus)?;
            let entry = ctx.surplus.entry(owner).or_insert(CollAmount::ZERO);
            *entry = entry.saturating_add(surplus);
        }

        let record = LiquidationRecord {
            position: id,
            owner: removed.owner,
            asset: ctx.asset,
            debt_cleared: debt_total,
            coll_seized: coll_remaining,
            debt_offset,
            coll_to_pool,
            debt_redistributed,
            coll_redistributed,
            coll_gas_comp,
            surplus,
            timestamp: ctx.now,
        };

        info!(
            position = id.0,
            icr,
            debt = %debt_total,
            offset = %debt_offset,
            redistributed = %debt_redistributed,
            "position liquidated"
        );

        self.total_liquidations += 1;
        self.total_debt_liquidated = self.total_debt_liquidated.saturating_add(debt_total);
        self.total_coll_liquidated = self.total_coll_liquidated.saturating_add(coll_remaining);
        self.records.push(record.clone());
        if self.records.len() > MAX_RECORDS {
            let excess = self.records.len() - MAX_RECORDS;
            self.records.drain(..excess);
        }

        Ok(record)
    }

    /// Liquidate a batch of positions in submission order
    ///
    /// Unhealthy, missing or already-closed entries are skipped, not failed;
    /// one bad id does not poison the batch. Each completed entry changes
    /// pool and ledger state seen by the entries after it.
    pub fn batch_liquidate(
        &mut self,
        ctx: &mut LiquidationContext<'_>,
        ids: &[PositionId],
    ) -> BatchReport {
        let mut outcomes = Vec::with_capacity(ids.len());
        let mut total_debt = DebtAmount::ZERO;
        let mut total_coll = CollAmount::ZERO;

        for &id in ids {
            let outcome = match self.liquidate(ctx, id) {
                Ok(LiquidationOutcome::Liquidated(record)) => {
                    total_debt = total_debt.saturating_add(record.debt_cleared);
                    total_coll = total_coll.saturating_add(record.coll_seized);
                    BatchOutcome::Liquidated(record)
                }
                Ok(LiquidationOutcome::Skipped(reason)) => BatchOutcome::Skipped(reason),
                Err(e) => {
                    warn!(position = id.0, error = %e, "batch entry failed");
                    BatchOutcome::Failed(e)
                }
            };
            outcomes.push((id, outcome));
        }

        BatchReport {
            outcomes,
            total_debt,
            total_coll,
        }
    }
}
