//! Protocol events for state change notifications.
//!
//! Every coordinator entry point that changes state appends an event.
//! Liquidation and stability pool events carry the accumulator values in
//! force when they fired, so an indexer can reconstruct depositor and
//! position balances without replaying the math.

use serde::{Deserialize, Serialize};

use crate::core::token::{Address, CollAmount, CollateralId, DebtAmount, PositionId};
use crate::utils::constants::MAX_EVENTS;

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// All protocol event types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProtocolEvent {
    // Market events
    /// A new collateral market was deployed
    MarketDeployed(MarketDeployedEvent),
    /// A market's total collateral ratio fell below the shutdown threshold
    MarketShutdown(MarketShutdownEvent),

    // Position events
    /// Position was opened
    PositionOpened(PositionEvent),
    /// Position collateral or debt was adjusted
    PositionAdjusted(PositionEvent),
    /// Debt was repaid against a position
    DebtRepaid(DebtRepaidEvent),
    /// Position was closed by its owner
    PositionClosed(PositionEvent),
    /// Position was liquidated
    PositionLiquidated(PositionLiquidatedEvent),
    /// Collateral surplus was claimed after a liquidation
    SurplusClaimed(SurplusClaimedEvent),

    // Stability pool events
    /// Deposit into the stability pool
    StabilityDeposit(StabilityPoolEvent),
    /// Withdrawal from the stability pool
    StabilityWithdraw(StabilityPoolEvent),
    /// Collateral and yield gains claimed
    GainsClaimed(GainsClaimedEvent),
    /// Interest yield streamed to the pool
    YieldAccrued(YieldAccruedEvent),
}

impl ProtocolEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MarketDeployed(_) => "MarketDeployed",
            Self::MarketShutdown(_) => "MarketShutdown",
            Self::PositionOpened(_) => "PositionOpened",
            Self::PositionAdjusted(_) => "PositionAdjusted",
            Self::DebtRepaid(_) => "DebtRepaid",
            Self::PositionClosed(_) => "PositionClosed",
            Self::PositionLiquidated(_) => "PositionLiquidated",
            Self::SurplusClaimed(_) => "SurplusClaimed",
            Self::StabilityDeposit(_) => "StabilityDeposit",
            Self::StabilityWithdraw(_) => "StabilityWithdraw",
            Self::GainsClaimed(_) => "GainsClaimed",
            Self::YieldAccrued(_) => "YieldAccrued",
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::MarketDeployed(e) => e.timestamp,
            Self::MarketShutdown(e) => e.timestamp,
            Self::PositionOpened(e) => e.timestamp,
            Self::PositionAdjusted(e) => e.timestamp,
            Self::DebtRepaid(e) => e.timestamp,
            Self::PositionClosed(e) => e.timestamp,
            Self::PositionLiquidated(e) => e.timestamp,
            Self::SurplusClaimed(e) => e.timestamp,
            Self::StabilityDeposit(e) => e.timestamp,
            Self::StabilityWithdraw(e) => e.timestamp,
            Self::GainsClaimed(e) => e.timestamp,
            Self::YieldAccrued(e) => e.timestamp,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT PAYLOADS
// ═══════════════════════════════════════════════════════════════════════════════

/// Market deployment details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDeployedEvent {
    /// Collateral asset of the new market
    pub asset: CollateralId,
    /// Timestamp
    pub timestamp: u64,
}

/// Market shutdown details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketShutdownEvent {
    /// Collateral asset of the market
    pub asset: CollateralId,
    /// Total collateral ratio that tripped the latch (wad)
    pub tcr: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Snapshot of a position after a lifecycle change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionEvent {
    /// Collateral asset
    pub asset: CollateralId,
    /// Position id
    pub position: PositionId,
    /// Owner account
    pub owner: Address,
    /// Collateral after the change
    pub collateral: CollAmount,
    /// Principal after the change
    pub principal: DebtAmount,
    /// Accrued interest after the change
    pub interest: DebtAmount,
    /// Timestamp
    pub timestamp: u64,
}

/// Repayment breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebtRepaidEvent {
    /// Collateral asset
    pub asset: CollateralId,
    /// Position id
    pub position: PositionId,
    /// Account that paid
    pub payer: Address,
    /// Portion applied to accrued interest
    pub interest_paid: DebtAmount,
    /// Portion applied to principal
    pub principal_paid: DebtAmount,
    /// Timestamp
    pub timestamp: u64,
}

/// Liquidation details with the accumulators in force afterwards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLiquidatedEvent {
    /// Collateral asset
    pub asset: CollateralId,
    /// Liquidated position
    pub position: PositionId,
    /// Owner of the liquidated position
    pub owner: Address,
    /// Debt cleared
    pub debt: DebtAmount,
    /// Collateral seized
    pub collateral: CollAmount,
    /// Debt offset against the stability pool
    pub debt_offset: DebtAmount,
    /// Debt redistributed to surviving positions
    pub debt_redistributed: DebtAmount,
    /// Pool product after absorption (wad)
    pub pool_product: u128,
    /// Pool epoch after absorption
    pub pool_epoch: u64,
    /// Pool scale after absorption
    pub pool_scale: u64,
    /// Collateral-per-stake accumulator after redistribution (wad)
    pub coll_per_stake: u128,
    /// Debt-per-stake accumulator after redistribution (wad)
    pub debt_per_stake: u128,
    /// Timestamp
    pub timestamp: u64,
}

/// Surplus collateral claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurplusClaimedEvent {
    /// Collateral asset
    pub asset: CollateralId,
    /// Claiming owner
    pub owner: Address,
    /// Amount claimed
    pub amount: CollAmount,
    /// Timestamp
    pub timestamp: u64,
}

/// Stability pool deposit or withdrawal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityPoolEvent {
    /// Depositor account
    pub depositor: Address,
    /// Amount moved
    pub amount: DebtAmount,
    /// Deposit after the change
    pub deposit_after: DebtAmount,
    /// Pool product at the change (wad)
    pub pool_product: u128,
    /// Pool epoch at the change
    pub pool_epoch: u64,
    /// Pool scale at the change
    pub pool_scale: u64,
    /// Timestamp
    pub timestamp: u64,
}

/// Stability pool gains claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GainsClaimedEvent {
    /// Claiming depositor
    pub depositor: Address,
    /// Collateral claimed per asset
    pub collateral: Vec<(CollateralId, CollAmount)>,
    /// Yield claimed
    pub yield_amount: DebtAmount,
    /// Timestamp
    pub timestamp: u64,
}

/// Interest yield streamed to the pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YieldAccruedEvent {
    /// Collateral asset whose borrowers paid the interest
    pub asset: CollateralId,
    /// Amount streamed to the pool
    pub amount: DebtAmount,
    /// Timestamp
    pub timestamp: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT LOG
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory event log with bounded history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<ProtocolEvent>,
}

impl EventLog {
    /// Create a new empty event log
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Add an event to the log, pruning the oldest past capacity
    pub fn push(&mut self, event: ProtocolEvent) {
        self.events.push(event);
        if self.events.len() > MAX_EVENTS {
            let excess = self.events.len() - MAX_EVENTS;
            self.events.drain(..excess);
        }
    }

    /// Get all retained events, oldest first
    pub fn events(&self) -> &[ProtocolEvent] {
        &self.events
    }

    /// Get events of a specific type
    pub fn filter_by_type(&self, event_type: &str) -> Vec<&ProtocolEvent> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Get the number of retained events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Clear all events
    pub fn clear(&mut self) {
        self.events.clear();
    }
}
