//! Multi-collateral coordinator.
//!
//! [`System`] binds one [`Market`] per registered collateral asset to the
//! shared debt ledger, stability pool and liquidation engine. All state
//! changes enter through it: it settles positions before acting on them,
//! streams accrued interest to the pool, enforces the ratio gates, moves
//! token balances, and appends events.
//!
//! Time and prices come in from the caller on every entry point; the system
//! never reads a clock or a feed on its own.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::core::config::RiskParams;
use crate::core::ledger::PositionLedger;
use crate::core::position::Position;
use crate::core::token::{
    Address, CollAmount, CollateralId, CollateralLedger, DebtAmount, DebtLedger, PositionId,
};
use crate::error::{Error, Result};
use crate::liquidation::engine::{
    BatchOutcome, BatchReport, LiquidationContext, LiquidationEngine, LiquidationOutcome,
    LiquidationRecord,
};
use crate::liquidation::stability_pool::{stream_interest, StabilityPool};
use crate::oracle::price_feed::PriceOracle;
use crate::protocol::events::{
    DebtRepaidEvent, EventLog, GainsClaimedEvent, MarketDeployedEvent, MarketShutdownEvent,
    PositionEvent, PositionLiquidatedEvent, ProtocolEvent, StabilityPoolEvent,
    SurplusClaimedEvent, YieldAccruedEvent,
};
use crate::psm::Psm;
use crate::utils::constants::{GAS_COMPENSATION, MIN_NET_DEBT, WAD};
use crate::utils::math::{mul_div, safe_add};

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// Registry of authorized collateral assets
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    assets: HashMap<CollateralId, String>,
    next_id: u32,
}

impl Registry {
    /// Register a collateral asset under a human-readable label
    pub fn register(&mut self, label: impl Into<String>) -> CollateralId {
        let id = CollateralId(self.next_id);
        self.next_id += 1;
        self.assets.insert(id, label.into());
        id
    }

    /// Check whether an asset is registered
    pub fn is_registered(&self, asset: CollateralId) -> bool {
        self.assets.contains_key(&asset)
    }

    /// Label of a registered asset
    pub fn label(&self, asset: CollateralId) -> Option<&str> {
        self.assets.get(&asset).map(String::as_str)
    }

    /// All registered assets, in id order
    pub fn assets(&self) -> Vec<CollateralId> {
        let mut ids: Vec<CollateralId> = self.assets.keys().copied().collect();
        ids.sort();
        ids
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MARKET
// ═══════════════════════════════════════════════════════════════════════════════

/// One collateral market: a position ledger plus its risk parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    asset: CollateralId,
    params: RiskParams,
    ledger: PositionLedger,
    collateral: CollateralLedger,
    surplus: HashMap<Address, CollAmount>,
    shutdown: bool,
}

impl Market {
    fn new(asset: CollateralId, params: RiskParams) -> Self {
        Self {
            asset,
            params,
            ledger: PositionLedger::new(),
            collateral: CollateralLedger::new(asset),
            surplus: HashMap::new(),
            shutdown: false,
        }
    }

    /// Risk parameters of this market
    pub fn params(&self) -> &RiskParams {
        &self.params
    }

    /// Position ledger of this market
    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    /// Collateral balances of this market
    pub fn collateral(&self) -> &CollateralLedger {
        &self.collateral
    }

    /// Whether new borrowing is frozen
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Claimable liquidation surplus of an owner
    pub fn surplus_of(&self, owner: &Address) -> CollAmount {
        self.surplus.get(owner).copied().unwrap_or(CollAmount::ZERO)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADJUSTMENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Collateral side of a position adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollChange {
    /// Leave collateral unchanged
    None,
    /// Add collateral
    Add(CollAmount),
    /// Withdraw collateral
    Withdraw(CollAmount),
}

/// Debt side of a position adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebtChange {
    /// Leave debt unchanged
    None,
    /// Borrow more against the position
    Borrow(DebtAmount),
    /// Repay debt, interest first
    Repay(DebtAmount),
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYSTEM
// ═══════════════════════════════════════════════════════════════════════════════

/// The protocol state machine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct System {
    registry: Registry,
    markets: HashMap<CollateralId, Market>,
    debt: DebtLedger,
    pool: StabilityPool,
    engine: LiquidationEngine,
    psms: HashMap<u64, Psm>,
    next_psm_id: u64,
    events: EventLog,
}

impl System {
    /// Create an empty system
    pub fn new() -> Self {
        Self::default()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DEPLOYMENT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Register a collateral asset
    pub fn register_collateral(&mut self, label: impl Into<String>) -> CollateralId {
        self.registry.register(label)
    }

    /// Deploy a market for a registered asset
    pub fn deploy_market(
        &mut self,
        asset: CollateralId,
        params: RiskParams,
        now: u64,
    ) -> Result<()> {
        if !self.registry.is_registered(asset) {
            return Err(Error::UnknownCollateral(asset.0));
        }
        if self.markets.contains_key(&asset) {
            return Err(Error::MarketExists(asset.0));
        }
        params.validate()?;

        self.markets.insert(asset, Market::new(asset, params));
        self.events
            .push(ProtocolEvent::MarketDeployed(MarketDeployedEvent {
                asset,
                timestamp: now,
            }));
        info!(asset = asset.0, "market deployed");
        Ok(())
    }

    /// Deploy a peg stability module, returning its id
    pub fn deploy_psm(&mut self, supply_cap: DebtAmount) -> u64 {
        let id = self.next_psm_id;
        self.next_psm_id += 1;
        self.psms.insert(id, Psm::new(supply_cap));
        id
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // POSITION OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Open a position
    ///
    /// The owner posts `collateral` and receives `principal` debt tokens; the
    /// gas compensation reserve is minted to the gas pool on top. Opening
    /// requires ICR at or above the CCR regardless of market conditions.
    pub fn open_position(
        &mut self,
        oracle: &dyn PriceOracle,
        asset: CollateralId,
        owner: Address,
        collateral: CollAmount,
        principal: DebtAmount,
        now: u64,
    ) -> Result<PositionId> {
        let price = fresh_price(oracle, asset)?;
        let market = self.markets.get_mut(&asset).ok_or(Error::UnknownCollateral(asset.0))?;
        if market.shutdown {
            return Err(Error::MarketShutdown(asset.0));
        }

        let new_total = market.ledger.total_debt().saturating_add(principal);
        if new_total > market.params.max_debt {
            return Err(Error::DebtCeilingReached {
                current: new_total.wad(),
                max: market.params.max_debt.wad(),
            });
        }

        let icr = icr_of(collateral, principal, price)?;
        if icr < market.params.ccr {
            return Err(Error::InsufficientCollateralRatio {
                current: icr,
                required: market.params.ccr,
            });
        }

        let id = market
            .ledger
            .open(owner, collateral, principal, market.params.interest_rate, now)?;
        market.collateral.credit(Address::VAULT, collateral)?;
        self.debt.mint(owner, principal)?;
        self.debt
            .mint(Address::GAS_POOL, DebtAmount::from_wad(GAS_COMPENSATION))?;

        let pos = market.ledger.get(id)?;
        self.events.push(ProtocolEvent::PositionOpened(PositionEvent {
            asset,
            position: id,
            owner,
            collateral: pos.collateral,
            principal: pos.principal,
            interest: pos.interest,
            timestamp: now,
        }));
        self.check_shutdown(asset, price, now)?;
        Ok(id)
    }

    /// Adjust a position's collateral and debt
    ///
    /// Withdrawing collateral or borrowing requires the owner. The resulting
    /// ICR must clear the MCR, except for adjustments that strictly improve
    /// the ratio without withdrawing or borrowing. While the market TCR is
    /// below the CCR, debt increases are blocked and any other adjustment
    /// must not decrease the position's ICR. All checks run against the
    /// prospective post-state; a rejected adjustment changes nothing.
    pub fn adjust_position(
        &mut self,
        oracle: &dyn PriceOracle,
        asset: CollateralId,
        id: PositionId,
        caller: Address,
        coll_change: CollChange,
        debt_change: DebtChange,
        now: u64,
    ) -> Result<()> {
        if coll_change == CollChange::None && debt_change == DebtChange::None {
            return Err(Error::ZeroAmount);
        }
        if matches!(coll_change, CollChange::Add(a) | CollChange::Withdraw(a) if a.is_zero())
            || matches!(debt_change, DebtChange::Borrow(a) | DebtChange::Repay(a) if a.is_zero())
        {
            return Err(Error::ZeroAmount);
        }
        let price = fresh_price(oracle, asset)?;
        self.settle_and_stream(asset, id, now)?;

        let market = self.markets.get_mut(&asset).ok_or(Error::UnknownCollateral(asset.0))?;
        let pos = market.ledger.get(id)?;
        let owner = pos.owner;
        let coll_before = pos.collateral;
        let principal_before = pos.principal;
        let interest_before = pos.interest;
        let icr_before = pos.icr(price)?;
        let tcr_before = market.ledger.tcr(price)?;

        let owner_only = matches!(coll_change, CollChange::Withdraw(_))
            || matches!(debt_change, DebtChange::Borrow(_));
        if owner_only && caller != owner {
            return Err(Error::Unauthorized(caller.to_string()));
        }

        // Validate everything against the prospective post-state; no ledger
        // or balance mutation happens until every check has passed.
        let new_coll = match coll_change {
            CollChange::None => coll_before,
            CollChange::Add(amount) => coll_before.saturating_add(amount),
            CollChange::Withdraw(amount) => {
                if amount > coll_before {
                    return Err(Error::InsufficientCollateral {
                        requested: amount.wad(),
                        available: coll_before.wad(),
                    });
                }
                coll_before.saturating_sub(amount)
            }
        };

        let (new_principal, new_interest) = match debt_change {
            DebtChange::None => (principal_before, interest_before),
            DebtChange::Borrow(amount) => {
                if market.shutdown {
                    return Err(Error::MarketShutdown(asset.0));
                }
                if tcr_before < market.params.ccr {
                    return Err(Error::InsufficientCollateralRatio {
                        current: tcr_before,
                        required: market.params.ccr,
                    });
                }
                let new_total = market.ledger.total_debt().saturating_add(amount);
                if new_total > market.params.max_debt {
                    return Err(Error::DebtCeilingReached {
                        current: new_total.wad(),
                        max: market.params.max_debt.wad(),
                    });
                }
                (principal_before.saturating_add(amount), interest_before)
            }
            DebtChange::Repay(amount) => {
                let owed = interest_before.saturating_add(principal_before);
                if amount > owed {
                    return Err(Error::ExcessRepayment {
                        amount: amount.wad(),
                        owed: owed.wad(),
                    });
                }
                let balance = self.debt.balance_of(&caller);
                if balance < amount {
                    return Err(Error::InsufficientBalance {
                        required: amount.wad(),
                        available: balance.wad(),
                    });
                }
                let interest_paid = amount.min(interest_before);
                let principal_part = amount.saturating_sub(interest_paid);
                let remaining = principal_before.saturating_sub(principal_part);
                let remaining_net = remaining.wad().saturating_add(GAS_COMPENSATION);
                if !principal_part.is_zero() && remaining_net < MIN_NET_DEBT {
                    return Err(Error::InsufficientDebt {
                        amount: remaining_net,
                        minimum: MIN_NET_DEBT,
                    });
                }
                (remaining, interest_before.saturating_sub(interest_paid))
            }
        };

        let icr_after = icr_of(new_coll, new_principal.saturating_add(new_interest), price)?;
        // An adjustment that strictly improves the ratio without pulling
        // collateral or minting debt passes even below the minimum, so an
        // underwater position can be topped up or paid down.
        let improves = icr_after > icr_before
            && !matches!(coll_change, CollChange::Withdraw(_))
            && !matches!(debt_change, DebtChange::Borrow(_));
        if icr_after < market.params.mcr && !improves {
            return Err(Error::BelowMinimumCollateralRatio {
                current: icr_after,
                minimum: market.params.mcr,
            });
        }
        if tcr_before < market.params.ccr && icr_after < icr_before {
            return Err(Error::InsufficientCollateralRatio {
                current: icr_after,
                required: icr_before,
            });
        }

        match coll_change {
            CollChange::None => {}
            CollChange::Add(amount) => {
                market.ledger.add_collateral(id, amount)?;
                market.collateral.credit(Address::VAULT, amount)?;
            }
            CollChange::Withdraw(amount) => {
                market.ledger.withdraw_collateral(id, amount)?;
                market.collateral.transfer(Address::VAULT, owner, amount)?;
            }
        }

        match debt_change {
            DebtChange::None => {}
            DebtChange::Borrow(amount) => {
                market.ledger.borrow(id, amount)?;
                self.debt.mint(owner, amount)?;
            }
            DebtChange::Repay(amount) => {
                let (interest_paid, principal_paid) = market.ledger.repay(id, amount)?;
                self.debt
                    .burn(caller, interest_paid.saturating_add(principal_paid))?;
                self.events.push(ProtocolEvent::DebtRepaid(DebtRepaidEvent {
                    asset,
                    position: id,
                    payer: caller,
                    interest_paid,
                    principal_paid,
                    timestamp: now,
                }));
            }
        }

        let market = self.markets.get(&asset).ok_or(Error::UnknownCollateral(asset.0))?;
        let pos = market.ledger.get(id)?;
        self.events.push(ProtocolEvent::PositionAdjusted(PositionEvent {
            asset,
            position: id,
            owner,
            collateral: pos.collateral,
            principal: pos.principal,
            interest: pos.interest,
            timestamp: now,
        }));
        self.check_shutdown(asset, price, now)?;
        Ok(())
    }

    /// Repay debt on a position, interest first
    ///
    /// Permissionless: any account may pay down any position. The repayment
    /// may not leave the position's net debt below the minimum; full payoff
    /// goes through [`System::close_position`].
    pub fn repay(
        &mut self,
        asset: CollateralId,
        id: PositionId,
        payer: Address,
        amount: DebtAmount,
        now: u64,
    ) -> Result<()> {
        self.settle_and_stream(asset, id, now)?;

        let balance = self.debt.balance_of(&payer);
        if balance < amount {
            return Err(Error::InsufficientBalance {
                required: amount.wad(),
                available: balance.wad(),
            });
        }

        let market = self.markets.get_mut(&asset).ok_or(Error::UnknownCollateral(asset.0))?;
        let (interest_paid, principal_paid) = market.ledger.repay(id, amount)?;
        self.debt
            .burn(payer, interest_paid.saturating_add(principal_paid))?;

        self.events.push(ProtocolEvent::DebtRepaid(DebtRepaidEvent {
            asset,
            position: id,
            payer,
            interest_paid,
            principal_paid,
            timestamp: now,
        }));
        Ok(())
    }

    /// Close a position
    ///
    /// The owner burns the full outstanding debt; the gas compensation
    /// reserve is burned out of the gas pool and the collateral is released
    /// to `recipient`.
    pub fn close_position(
        &mut self,
        asset: CollateralId,
        id: PositionId,
        caller: Address,
        recipient: Address,
        now: u64,
    ) -> Result<()> {
        self.settle_and_stream(asset, id, now)?;

        let market = self.markets.get_mut(&asset).ok_or(Error::UnknownCollateral(asset.0))?;
        let pos = market.ledger.get(id)?;
        let owner = pos.owner;
        let owed = pos.total_debt();
        if caller != owner {
            return Err(Error::Unauthorized(caller.to_string()));
        }

        // Burn the repayment before touching the position: a caller who
        // cannot cover the debt leaves the position and the reserve intact.
        self.debt.burn(caller, owed)?;
        self.debt
            .burn(Address::GAS_POOL, DebtAmount::from_wad(GAS_COMPENSATION))?;
        let removed = market.ledger.close(id)?;
        market
            .collateral
            .transfer(Address::VAULT, recipient, removed.collateral)?;

        self.events.push(ProtocolEvent::PositionClosed(PositionEvent {
            asset,
            position: id,
            owner,
            collateral: CollAmount::ZERO,
            principal: DebtAmount::ZERO,
            interest: DebtAmount::ZERO,
            timestamp: now,
        }));
        Ok(())
    }

    /// Claim liquidation surplus collateral
    pub fn claim_surplus(
        &mut self,
        asset: CollateralId,
        owner: Address,
        now: u64,
    ) -> Result<CollAmount> {
        let market = self.markets.get_mut(&asset).ok_or(Error::UnknownCollateral(asset.0))?;
        let amount = market.surplus.remove(&owner).unwrap_or(CollAmount::ZERO);
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        market
            .collateral
            .transfer(Address::SURPLUS_POOL, owner, amount)?;

        self.events.push(ProtocolEvent::SurplusClaimed(SurplusClaimedEvent {
            asset,
            owner,
            amount,
            timestamp: now,
        }));
        Ok(amount)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Liquidate a single position
    ///
    /// A target that is missing, already closed or above the minimum
    /// collateral ratio comes back as [`LiquidationOutcome::Skipped`] with
    /// nothing changed; retrying a finished liquidation is a no-op.
    pub fn liquidate(
        &mut self,
        oracle: &dyn PriceOracle,
        asset: CollateralId,
        id: PositionId,
        caller: Address,
        now: u64,
    ) -> Result<LiquidationOutcome> {
        let price = fresh_price(oracle, asset)?;
        let market = self.markets.get_mut(&asset).ok_or(Error::UnknownCollateral(asset.0))?;

        let mut ctx = LiquidationContext {
            params: &market.params,
            asset,
            ledger: &mut market.ledger,
            collateral: &mut market.collateral,
            surplus: &mut market.surplus,
            debt: &mut self.debt,
            pool: &mut self.pool,
            price,
            caller,
            now,
        };
        let outcome = self.engine.liquidate(&mut ctx, id)?;

        if let LiquidationOutcome::Liquidated(record) = &outcome {
            let record = record.clone();
            self.push_liquidation_event(asset, &record, now);
        }
        self.check_shutdown(asset, price, now)?;
        Ok(outcome)
    }

    /// Liquidate a batch of positions in submission order
    pub fn batch_liquidate(
        &mut self,
        oracle: &dyn PriceOracle,
        asset: CollateralId,
        ids: &[PositionId],
        caller: Address,
        now: u64,
    ) -> Result<BatchReport> {
        let price = fresh_price(oracle, asset)?;
        let market = self.markets.get_mut(&asset).ok_or(Error::UnknownCollateral(asset.0))?;

        let mut ctx = LiquidationContext {
            params: &market.params,
            asset,
            ledger: &mut market.ledger,
            collateral: &mut market.collateral,
            surplus: &mut market.surplus,
            debt: &mut self.debt,
            pool: &mut self.pool,
            price,
            caller,
            now,
        };
        let report = self.engine.batch_liquidate(&mut ctx, ids);

        for (_, outcome) in &report.outcomes {
            if let BatchOutcome::Liquidated(record) = outcome {
                let record = record.clone();
                self.push_liquidation_event(asset, &record, now);
            }
        }
        self.check_shutdown(asset, price, now)?;
        Ok(report)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STABILITY POOL OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deposit debt tokens into the stability pool
    pub fn provide_to_pool(&mut self, owner: Address, amount: DebtAmount, now: u64) -> Result<()> {
        self.debt.transfer(owner, Address::STABILITY_POOL, amount)?;
        self.pool.provide(owner, amount)?;

        let deposit_after = self.pool.compounded_deposit(&owner)?;
        self.events.push(ProtocolEvent::StabilityDeposit(StabilityPoolEvent {
            depositor: owner,
            amount,
            deposit_after,
            pool_product: self.pool.product(),
            pool_epoch: self.pool.epoch(),
            pool_scale: self.pool.scale(),
            timestamp: now,
        }));
        Ok(())
    }

    /// Withdraw from the stability pool
    ///
    /// Fails with `InsufficientBalance` when `amount` exceeds the caller's
    /// compounded deposit.
    pub fn withdraw_from_pool(
        &mut self,
        owner: Address,
        amount: DebtAmount,
        now: u64,
    ) -> Result<()> {
        self.pool.withdraw(owner, amount)?;
        self.debt.transfer(Address::STABILITY_POOL, owner, amount)?;

        let deposit_after = self.pool.compounded_deposit(&owner)?;
        self.events.push(ProtocolEvent::StabilityWithdraw(StabilityPoolEvent {
            depositor: owner,
            amount,
            deposit_after,
            pool_product: self.pool.product(),
            pool_epoch: self.pool.epoch(),
            pool_scale: self.pool.scale(),
            timestamp: now,
        }));
        Ok(())
    }

    /// Claim all collateral and yield gains from the stability pool
    pub fn claim_pool_gains(
        &mut self,
        owner: Address,
        now: u64,
    ) -> Result<(Vec<(CollateralId, CollAmount)>, DebtAmount)> {
        let collateral = self.pool.claim_collateral_gains(owner)?;
        for (asset, amount) in &collateral {
            let market = self
                .markets
                .get_mut(asset)
                .ok_or(Error::UnknownCollateral(asset.0))?;
            market
                .collateral
                .transfer(Address::STABILITY_POOL, owner, *amount)?;
        }

        let yield_amount = self.pool.claim_yield(owner)?;
        if !yield_amount.is_zero() {
            self.debt
                .transfer(Address::STABILITY_POOL, owner, yield_amount)?;
        }

        if !collateral.is_empty() || !yield_amount.is_zero() {
            self.events.push(ProtocolEvent::GainsClaimed(GainsClaimedEvent {
                depositor: owner,
                collateral: collateral.clone(),
                yield_amount,
                timestamp: now,
            }));
        }
        Ok((collateral, yield_amount))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PSM OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Swap peg asset into debt tokens through a deployed module
    pub fn psm_buy(&mut self, psm_id: u64, buyer: Address, peg_amount: DebtAmount) -> Result<DebtAmount> {
        let psm = self
            .psms
            .get_mut(&psm_id)
            .ok_or(Error::InvalidParameter {
                name: "psm_id".into(),
                reason: "no such module".into(),
            })?;
        psm.buy(&mut self.debt, buyer, peg_amount)
    }

    /// Swap debt tokens back into the peg asset through a deployed module
    pub fn psm_sell(&mut self, psm_id: u64, seller: Address, amount: DebtAmount) -> Result<DebtAmount> {
        let psm = self
            .psms
            .get_mut(&psm_id)
            .ok_or(Error::InvalidParameter {
                name: "psm_id".into(),
                reason: "no such module".into(),
            })?;
        psm.sell(&mut self.debt, seller, amount)
    }

    /// A deployed peg stability module
    pub fn psm(&self, psm_id: u64) -> Option<&Psm> {
        self.psms.get(&psm_id)
    }

    /// Mutable access to a deployed module, for fee and cap administration
    pub fn psm_mut(&mut self, psm_id: u64) -> Option<&mut Psm> {
        self.psms.get_mut(&psm_id)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// A deployed market
    pub fn market(&self, asset: CollateralId) -> Result<&Market> {
        self.markets.get(&asset).ok_or(Error::UnknownCollateral(asset.0))
    }

    /// A position in a market
    pub fn position(&self, asset: CollateralId, id: PositionId) -> Result<&Position> {
        self.market(asset)?.ledger.get(id)
    }

    /// Total collateral ratio of a market at the oracle price
    pub fn tcr(&self, oracle: &dyn PriceOracle, asset: CollateralId) -> Result<u128> {
        let price = fresh_price(oracle, asset)?;
        self.market(asset)?.ledger.tcr(price)
    }

    /// The shared debt token ledger
    pub fn debt(&self) -> &DebtLedger {
        &self.debt
    }

    /// The shared stability pool
    pub fn pool(&self) -> &StabilityPool {
        &self.pool
    }

    /// The liquidation engine and its history
    pub fn engine(&self) -> &LiquidationEngine {
        &self.engine
    }

    /// The event log
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// The collateral registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SERIALIZATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Serialize the full system state
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Restore a system from serialized state
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INVARIANTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Recompute the conservation invariants from scratch
    ///
    /// Intended for tests and tooling after a scripted sequence; returns the
    /// first violation found.
    pub fn check_invariants(&self) -> Result<()> {
        if !self.debt.verify_supply_invariant() {
            return Err(Error::InvariantViolation(
                "debt balances do not sum to supply".into(),
            ));
        }

        let mut gas_total = DebtAmount::ZERO;
        for market in self.markets.values() {
            gas_total = gas_total.saturating_add(market.ledger.gas_comp_total());
        }
        if self.debt.balance_of(&Address::GAS_POOL) != gas_total {
            return Err(Error::InvariantViolation(format!(
                "gas pool balance {} != reserve total {}",
                self.debt.balance_of(&Address::GAS_POOL),
                gas_total
            )));
        }

        let pool_backing = self
            .pool
            .total_deposits()
            .saturating_add(self.pool.yield_outstanding());
        if self.debt.balance_of(&Address::STABILITY_POOL) != pool_backing {
            return Err(Error::InvariantViolation(format!(
                "stability pool balance {} != deposits plus yield {}",
                self.debt.balance_of(&Address::STABILITY_POOL),
                pool_backing
            )));
        }

        for (asset, market) in &self.markets {
            if !market.collateral.verify_flow_invariant() {
                return Err(Error::InvariantViolation(format!(
                    "market {} collateral flows do not net to balances",
                    asset.0
                )));
            }

            if market.collateral.balance_of(&Address::VAULT) != market.ledger.total_collateral() {
                return Err(Error::InvariantViolation(format!(
                    "market {} vault balance {} != ledger collateral {}",
                    asset.0,
                    market.collateral.balance_of(&Address::VAULT),
                    market.ledger.total_collateral()
                )));
            }

            if market.collateral.balance_of(&Address::STABILITY_POOL)
                != self.pool.collateral_outstanding(*asset)
            {
                return Err(Error::InvariantViolation(format!(
                    "market {} pool collateral mismatch",
                    asset.0
                )));
            }

            // Per-position sums may trail the running totals by flooring
            // dust, never exceed them.
            let (coll, debt) = market.ledger.recompute_totals()?;
            let coll_drift = market.ledger.total_collateral().wad().saturating_sub(coll.wad());
            let debt_drift = market.ledger.total_debt().wad().saturating_sub(debt.wad());
            if coll.wad() > market.ledger.total_collateral().wad()
                || debt.wad() > market.ledger.total_debt().wad()
                || coll_drift >= WAD
                || debt_drift >= WAD
            {
                return Err(Error::InvariantViolation(format!(
                    "market {} totals drift: coll {} debt {}",
                    asset.0, coll_drift, debt_drift
                )));
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL
    // ═══════════════════════════════════════════════════════════════════════════

    /// Settle a position and route the interest it accrued
    fn settle_and_stream(&mut self, asset: CollateralId, id: PositionId, now: u64) -> Result<()> {
        let market = self.markets.get_mut(&asset).ok_or(Error::UnknownCollateral(asset.0))?;
        let report = market.ledger.settle(id, now)?;
        let sp_yield_pct = market.params.sp_yield_pct;

        let streamed = stream_interest(
            &mut self.pool,
            &mut self.debt,
            sp_yield_pct,
            report.interest_accrued,
        )?;
        if !streamed.is_zero() {
            self.events.push(ProtocolEvent::YieldAccrued(YieldAccruedEvent {
                asset,
                amount: streamed,
                timestamp: now,
            }));
        }
        Ok(())
    }

    fn push_liquidation_event(&mut self, asset: CollateralId, record: &LiquidationRecord, now: u64) {
        let market = match self.markets.get(&asset) {
            Some(market) => market,
            None => return,
        };
        self.events
            .push(ProtocolEvent::PositionLiquidated(PositionLiquidatedEvent {
                asset,
                position: record.position,
                owner: record.owner,
                debt: record.debt_cleared,
                collateral: record.coll_seized,
                debt_offset: record.debt_offset,
                debt_redistributed: record.debt_redistributed,
                pool_product: self.pool.product(),
                pool_epoch: self.pool.epoch(),
                pool_scale: self.pool.scale(),
                coll_per_stake: market.ledger.coll_per_stake(),
                debt_per_stake: market.ledger.debt_per_stake(),
                timestamp: now,
            }));
    }

    /// Latch the shutdown flag when the TCR falls below the SCR
    fn check_shutdown(&mut self, asset: CollateralId, price: u128, now: u64) -> Result<()> {
        let market = self.markets.get_mut(&asset).ok_or(Error::UnknownCollateral(asset.0))?;
        if market.shutdown {
            return Ok(());
        }
        let tcr = market.ledger.tcr(price)?;
        if tcr < market.params.scr {
            market.shutdown = true;
            warn!(asset = asset.0, tcr, "market shut down for new borrowing");
            self.events.push(ProtocolEvent::MarketShutdown(MarketShutdownEvent {
                asset,
                tcr,
                timestamp: now,
            }));
        }
        Ok(())
    }
}

/// Individual collateral ratio of a prospective position
fn icr_of(collateral: CollAmount, principal: DebtAmount, price: u128) -> Result<u128> {
    let denominator = safe_add(principal.wad(), GAS_COMPENSATION)?;
    mul_div(collateral.wad(), price, denominator)
}

/// Require a fresh oracle quote
fn fresh_price(oracle: &dyn PriceOracle, asset: CollateralId) -> Result<u128> {
    let quote = oracle.quote(asset)?;
    if !quote.fresh {
        return Err(Error::StaleOrUnavailablePrice(asset.0));
    }
    Ok(quote.price)
}
