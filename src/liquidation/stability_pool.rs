//! Stability pool with O(1) loss and gain accounting.
//!
//! Deposits absorb liquidated debt pro rata. Instead of iterating depositors,
//! the pool keeps a running product `P` of loss factors and, per collateral
//! asset, a running sum `S` of gains per unit deposit. A depositor's snapshot
//! of these values at deposit time is enough to recover their compounded
//! deposit and accumulated gains at any later point.
//!
//! Two counters guard fixed-point precision:
//! - `scale` increments when `P` would fall below 1e9; `P` is multiplied back
//!   up by 1e9 and gain queries splice across one scale boundary.
//! - `epoch` increments when a liquidation wipes the pool to zero; sums from
//!   older epochs stay frozen and deposits from them compound to nothing.
//!
//! A parallel sum `B` tracks protocol yield (the stability pool's share of
//! borrower interest), which accrues to deposits without consuming them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::token::{Address, CollAmount, CollateralId, DebtAmount, DebtLedger};
use crate::error::{Error, Result};
use crate::utils::constants::{SP_SCALE_FACTOR, WAD};
use crate::utils::math::{mul_div, mul_div_up, safe_add, wad_mul};

// ═══════════════════════════════════════════════════════════════════════════════
// DEPOSITOR SNAPSHOT
// ═══════════════════════════════════════════════════════════════════════════════

/// Snapshot of pool accumulators at the time of a deposit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Product factor at deposit time
    pub p: u128,
    /// Epoch at deposit time
    pub epoch: u64,
    /// Scale at deposit time
    pub scale: u64,
    /// Per-asset gain sums at deposit time, under (epoch, scale)
    pub coll_sums: HashMap<CollateralId, u128>,
    /// Yield sum at deposit time, under (epoch, scale)
    pub yield_sum: u128,
}

/// A single deposit in the stability pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolDeposit {
    /// Deposit amount when the snapshot was taken
    pub initial: DebtAmount,
    /// Accumulator snapshot
    pub snapshot: PoolSnapshot,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL
// ═══════════════════════════════════════════════════════════════════════════════

type EpochScale = (u64, u64);

/// The stability pool, shared by every collateral market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityPool {
    /// Deposits remaining after absorbed liquidations
    total_deposits: DebtAmount,
    /// Running product of loss factors (wad)
    p: u128,
    /// Current epoch
    epoch: u64,
    /// Current scale
    scale: u64,
    /// Per (epoch, scale) and per asset: gains per unit deposit, times P
    coll_sums: HashMap<EpochScale, HashMap<CollateralId, u128>>,
    /// Per (epoch, scale): yield per unit deposit, times P
    yield_sums: HashMap<EpochScale, u128>,
    /// Deposits by account
    deposits: HashMap<Address, PoolDeposit>,
    /// Realized but unclaimed collateral gains by account
    stashed_coll: HashMap<Address, HashMap<CollateralId, CollAmount>>,
    /// Realized but unclaimed yield by account
    stashed_yield: HashMap<Address, DebtAmount>,
    /// Collateral received from liquidations and not yet claimed, per asset
    coll_outstanding: HashMap<CollateralId, CollAmount>,
    /// Yield accrued and not yet claimed
    yield_outstanding: DebtAmount,
    /// Cumulative debt absorbed
    total_debt_absorbed: DebtAmount,
    /// Number of liquidations absorbed
    total_liquidations: u64,
}

impl Default for StabilityPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StabilityPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            total_deposits: DebtAmount::ZERO,
            p: WAD,
            epoch: 0,
            scale: 0,
            coll_sums: HashMap::new(),
            yield_sums: HashMap::new(),
            deposits: HashMap::new(),
            stashed_coll: HashMap::new(),
            stashed_yield: HashMap::new(),
            coll_outstanding: HashMap::new(),
            yield_outstanding: DebtAmount::ZERO,
            total_debt_absorbed: DebtAmount::ZERO,
            total_liquidations: 0,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DEPOSITS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Add to the caller's deposit
    ///
    /// Gains accumulated so far are realized into the claimable stash and the
    /// snapshot refreshes to the current accumulators.
    pub fn provide(&mut self, owner: Address, amount: DebtAmount) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }

        let compounded = self.realize(owner)?;
        let deposit = PoolDeposit {
            initial: compounded.saturating_add(amount),
            snapshot: self.current_snapshot(),
        };
        self.deposits.insert(owner, deposit);
        self.total_deposits = self.total_deposits.saturating_add(amount);
        Ok(())
    }

    /// Withdraw from the caller's compounded deposit
    ///
    /// Fails with `InsufficientBalance` when the amount exceeds what the
    /// deposit has compounded to.
    pub fn withdraw(&mut self, owner: Address, amount: DebtAmount) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        let deposit = self
            .deposits
            .get(&owner)
            .ok_or_else(|| Error::NoDeposit(owner.to_string()))?;
        let compounded = self.compounded(deposit)?;
        if amount > compounded {
            return Err(Error::InsufficientBalance {
                required: amount.wad(),
                available: compounded.wad(),
            });
        }

        let compounded = self.realize(owner)?;
        let remaining = compounded.saturating_sub(amount);

        if remaining.is_zero() {
            self.deposits.remove(&owner);
        } else {
            self.deposits.insert(
                owner,
                PoolDeposit {
                    initial: remaining,
                    snapshot: self.current_snapshot(),
                },
            );
        }
        self.total_deposits = self.total_deposits.saturating_sub(amount);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDATION ABSORPTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Absorb liquidated debt against the pool, crediting collateral gains
    ///
    /// The caller guarantees `debt` does not exceed the pool's deposits; the
    /// liquidation engine clamps it.
    pub fn absorb(&mut self, debt: DebtAmount, asset: CollateralId, coll: CollAmount) -> Result<()> {
        if self.total_deposits.is_zero() {
            return Err(Error::EmptyPool);
        }
        if debt.is_zero() || debt > self.total_deposits {
            return Err(Error::InvalidParameter {
                name: "debt".into(),
                reason: "absorbed debt must be non-zero and within pool deposits".into(),
            });
        }

        let total = self.total_deposits.wad();

        // Gains are recorded per unit deposit, scaled by the current P so a
        // later query can divide by the depositor's P snapshot.
        if !coll.is_zero() {
            let gain_per_unit = mul_div(coll.wad(), WAD, total)?;
            let marginal = gain_per_unit.checked_mul(self.p).ok_or(Error::Overflow {
                operation: "collateral gain sum".into(),
            })?;
            let sums = self.coll_sums.entry((self.epoch, self.scale)).or_default();
            let entry = sums.entry(asset).or_insert(0);
            *entry = safe_add(*entry, marginal)?;
        }

        // Loss per unit rounds up so the product factor never overstates what
        // remains.
        let loss_per_unit = mul_div_up(debt.wad(), WAD, total)?.min(WAD);
        let product_factor = WAD - loss_per_unit;

        if product_factor == 0 {
            // Total wipeout: open a fresh epoch
            self.epoch += 1;
            self.scale = 0;
            self.p = WAD;
        } else {
            let new_p = mul_div(self.p, product_factor, WAD)?;
            if new_p < SP_SCALE_FACTOR {
                self.p = mul_div(self.p, product_factor, WAD / SP_SCALE_FACTOR)?;
                self.scale += 1;
            } else {
                self.p = new_p;
            }
        }

        self.total_deposits = self.total_deposits.saturating_sub(debt);
        let outstanding = self.coll_outstanding.entry(asset).or_insert(CollAmount::ZERO);
        *outstanding = outstanding.saturating_add(coll);
        self.total_debt_absorbed = self.total_debt_absorbed.saturating_add(debt);
        self.total_liquidations += 1;
        Ok(())
    }

    /// Accrue protocol yield to current deposits
    ///
    /// Yield uses the same per-unit sum machinery as collateral gains but
    /// does not consume deposits. Fails on an empty pool; the coordinator
    /// routes yield to the fee collector in that case.
    pub fn accrue_yield(&mut self, amount: DebtAmount) -> Result<()> {
        if self.total_deposits.is_zero() {
            return Err(Error::EmptyPool);
        }
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }

        let per_unit = mul_div(amount.wad(), WAD, self.total_deposits.wad())?;
        let marginal = per_unit.checked_mul(self.p).ok_or(Error::Overflow {
            operation: "yield sum".into(),
        })?;
        let sum = self.yield_sums.entry((self.epoch, self.scale)).or_insert(0);
        *sum = safe_add(*sum, marginal)?;
        self.yield_outstanding = self.yield_outstanding.saturating_add(amount);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CLAIMS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Realize and take all collateral gains for an account
    ///
    /// Returns the per-asset amounts released; the coordinator moves the
    /// matching balances out of the pool's account.
    pub fn claim_collateral_gains(&mut self, owner: Address) -> Result<Vec<(CollateralId, CollAmount)>> {
        if self.deposits.contains_key(&owner) {
            let compounded = self.realize(owner)?;
            self.deposits.insert(
                owner,
                PoolDeposit {
                    initial: compounded,
                    snapshot: self.current_snapshot(),
                },
            );
        }

        let stash = self.stashed_coll.remove(&owner).unwrap_or_default();
        let mut claimed: Vec<(CollateralId, CollAmount)> = stash
            .into_iter()
            .filter(|(_, amount)| !amount.is_zero())
            .collect();
        claimed.sort_by_key(|(asset, _)| *asset);

        for (asset, amount) in &claimed {
            let outstanding = self.coll_outstanding.entry(*asset).or_insert(CollAmount::ZERO);
            *outstanding = outstanding.saturating_sub(*amount);
        }
        Ok(claimed)
    }

    /// Realize and take all yield gains for an account
    pub fn claim_yield(&mut self, owner: Address) -> Result<DebtAmount> {
        if self.deposits.contains_key(&owner) {
            let compounded = self.realize(owner)?;
            self.deposits.insert(
                owner,
                PoolDeposit {
                    initial: compounded,
                    snapshot: self.current_snapshot(),
                },
            );
        }

        let claimed = self.stashed_yield.remove(&owner).unwrap_or(DebtAmount::ZERO);
        self.yield_outstanding = self.yield_outstanding.saturating_sub(claimed);
        Ok(claimed)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deposits remaining in the pool
    pub fn total_deposits(&self) -> DebtAmount {
        self.total_deposits
    }

    /// Check if the pool has no deposits
    pub fn is_empty(&self) -> bool {
        self.total_deposits.is_zero()
    }

    /// Current product factor (wad)
    pub fn product(&self) -> u128 {
        self.p
    }

    /// Current epoch
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Current scale
    pub fn scale(&self) -> u64 {
        self.scale
    }

    /// Yield accrued and not yet claimed
    pub fn yield_outstanding(&self) -> DebtAmount {
        self.yield_outstanding
    }

    /// Collateral received from liquidations and not yet claimed
    pub fn collateral_outstanding(&self, asset: CollateralId) -> CollAmount {
        self.coll_outstanding
            .get(&asset)
            .copied()
            .unwrap_or(CollAmount::ZERO)
    }

    /// Number of depositors
    pub fn depositor_count(&self) -> usize {
        self.deposits.len()
    }

    /// Cumulative debt absorbed across liquidations
    pub fn total_debt_absorbed(&self) -> DebtAmount {
        self.total_debt_absorbed
    }

    /// What an account's deposit has compounded to
    pub fn compounded_deposit(&self, owner: &Address) -> Result<DebtAmount> {
        match self.deposits.get(owner) {
            Some(deposit) => self.compounded(deposit),
            None => Ok(DebtAmount::ZERO),
        }
    }

    /// An account's claimable collateral gain for one asset
    pub fn collateral_gain(&self, owner: &Address, asset: CollateralId) -> Result<CollAmount> {
        let current = match self.deposits.get(owner) {
            Some(deposit) => self.accumulated_coll_gain(deposit, asset)?,
            None => CollAmount::ZERO,
        };
        let stashed = self
            .stashed_coll
            .get(owner)
            .and_then(|m| m.get(&asset))
            .copied()
            .unwrap_or(CollAmount::ZERO);
        Ok(current.saturating_add(stashed))
    }

    /// An account's claimable yield gain
    pub fn yield_gain(&self, owner: &Address) -> Result<DebtAmount> {
        let current = match self.deposits.get(owner) {
            Some(deposit) => self.accumulated_yield_gain(deposit)?,
            None => DebtAmount::ZERO,
        };
        let stashed = self.stashed_yield.get(owner).copied().unwrap_or(DebtAmount::ZERO);
        Ok(current.saturating_add(stashed))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL
    // ═══════════════════════════════════════════════════════════════════════════

    fn current_snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            p: self.p,
            epoch: self.epoch,
            scale: self.scale,
            coll_sums: self
                .coll_sums
                .get(&(self.epoch, self.scale))
                .cloned()
                .unwrap_or_default(),
            yield_sum: self
                .yield_sums
                .get(&(self.epoch, self.scale))
                .copied()
                .unwrap_or(0),
        }
    }

    /// Move an account's accumulated gains into its stash
    ///
    /// Returns the compounded deposit; the caller decides what to do with it.
    fn realize(&mut self, owner: Address) -> Result<DebtAmount> {
        let deposit = match self.deposits.get(&owner) {
            Some(deposit) => deposit.clone(),
            None => return Ok(DebtAmount::ZERO),
        };

        let assets: Vec<CollateralId> = self.snapshot_assets(&deposit.snapshot);
        for asset in assets {
            let gain = self.accumulated_coll_gain(&deposit, asset)?;
            if !gain.is_zero() {
                let stash = self.stashed_coll.entry(owner).or_default();
                let entry = stash.entry(asset).or_insert(CollAmount::ZERO);
                *entry = entry.saturating_add(gain);
            }
        }

        let yield_gain = self.accumulated_yield_gain(&deposit)?;
        if !yield_gain.is_zero() {
            let entry = self.stashed_yield.entry(owner).or_insert(DebtAmount::ZERO);
            *entry = entry.saturating_add(yield_gain);
        }

        self.compounded(&deposit)
    }

    /// Assets with a gain sum in the deposit's (epoch, scale) or the next scale
    fn snapshot_assets(&self, snapshot: &PoolSnapshot) -> Vec<CollateralId> {
        let mut assets: Vec<CollateralId> = Vec::new();
        for key in [
            (snapshot.epoch, snapshot.scale),
            (snapshot.epoch, snapshot.scale + 1),
        ] {
            if let Some(sums) = self.coll_sums.get(&key) {
                for asset in sums.keys() {
                    if !assets.contains(asset) {
                        assets.push(*asset);
                    }
                }
            }
        }
        assets
    }

    fn compounded(&self, deposit: &PoolDeposit) -> Result<DebtAmount> {
        let snap = &deposit.snapshot;
        if snap.epoch < self.epoch {
            return Ok(DebtAmount::ZERO);
        }
        let scale_diff = self.scale - snap.scale;
        let value = match scale_diff {
            0 => mul_div(deposit.initial.wad(), self.p, snap.p)?,
            1 => mul_div(deposit.initial.wad(), self.p, snap.p)? / SP_SCALE_FACTOR,
            _ => 0,
        };
        Ok(DebtAmount::from_wad(value))
    }

    fn accumulated_coll_gain(&self, deposit: &PoolDeposit, asset: CollateralId) -> Result<CollAmount> {
        let snap = &deposit.snapshot;
        let key = (snap.epoch, snap.scale);
        let next_key = (snap.epoch, snap.scale + 1);

        let current = self
            .coll_sums
            .get(&key)
            .and_then(|m| m.get(&asset))
            .copied()
            .unwrap_or(0);
        let snapshot_sum = snap.coll_sums.get(&asset).copied().unwrap_or(0);
        let first_portion = current.saturating_sub(snapshot_sum);
        let second_portion = self
            .coll_sums
            .get(&next_key)
            .and_then(|m| m.get(&asset))
            .copied()
            .unwrap_or(0)
            / SP_SCALE_FACTOR;

        let portions = safe_add(first_portion, second_portion)?;
        if portions == 0 {
            return Ok(CollAmount::ZERO);
        }
        let gain = mul_div(deposit.initial.wad(), portions, snap.p)? / WAD;
        Ok(CollAmount::from_wad(gain))
    }

    fn accumulated_yield_gain(&self, deposit: &PoolDeposit) -> Result<DebtAmount> {
        let snap = &deposit.snapshot;
        let current = self.yield_sums.get(&(snap.epoch, snap.scale)).copied().unwrap_or(0);
        let first_portion = current.saturating_sub(snap.yield_sum);
        let second_portion = self
            .yield_sums
            .get(&(snap.epoch, snap.scale + 1))
            .copied()
            .unwrap_or(0)
            / SP_SCALE_FACTOR;

        let portions = safe_add(first_portion, second_portion)?;
        if portions == 0 {
            return Ok(DebtAmount::ZERO);
        }
        let gain = mul_div(deposit.initial.wad(), portions, snap.p)? / WAD;
        Ok(DebtAmount::from_wad(gain))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTEREST STREAMING
// ═══════════════════════════════════════════════════════════════════════════════

/// Route newly accrued interest to the pool and the fee collector
///
/// The pool's share (`sp_yield_pct`) is minted to its account and accrued as
/// yield; the remainder, or everything while the pool is empty, is minted to
/// the fee collector. Returns the amount the pool received.
pub fn stream_interest(
    pool: &mut StabilityPool,
    debt: &mut DebtLedger,
    sp_yield_pct: u128,
    accrued: DebtAmount,
) -> Result<DebtAmount> {
    if accrued.is_zero() {
        return Ok(DebtAmount::ZERO);
    }

    let to_pool = if pool.is_empty() {
        DebtAmount::ZERO
    } else {
        DebtAmount::from_wad(wad_mul(accrued.wad(), sp_yield_pct)?)
    };
    let to_fee = accrued.saturating_sub(to_pool);

    if !to_pool.is_zero() {
        debt.mint(Address::STABILITY_POOL, to_pool)?;
        pool.accrue_yield(to_pool)?;
    }
    if !to_fee.is_zero() {
        debt.mint(Address::FEE_COLLECTOR, to_fee)?;
    }
    Ok(to_pool)
}
