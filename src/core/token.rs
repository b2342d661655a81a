//! Token ledgers and strongly-typed amounts.
//!
//! This module implements the vUSD debt token and per-asset collateral
//! accounting:
//! - Token minting and burning with monotone counters
//! - Balance tracking
//! - Transfer operations
//!
//! Every protocol operation debits and credits these ledgers atomically, so
//! the conservation checks in the coordinator can recompute supply and
//! balances at any point.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::utils::constants::WAD;

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTIFIERS
// ═══════════════════════════════════════════════════════════════════════════════

/// An account in the system (user or protocol-internal pool)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(u64);

impl Address {
    /// Shared pool holding the fixed debt gas compensation of open positions
    pub const GAS_POOL: Address = Address(u64::MAX);

    /// Collector of the interest share not streamed to the stability pool
    pub const FEE_COLLECTOR: Address = Address(u64::MAX - 1);

    /// The stability pool's own account (deposits plus unclaimed yield)
    pub const STABILITY_POOL: Address = Address(u64::MAX - 2);

    /// Per-market vault holding active position collateral
    pub const VAULT: Address = Address(u64::MAX - 3);

    /// Per-market pool holding claimable liquidation surplus
    pub const SURPLUS_POOL: Address = Address(u64::MAX - 4);

    /// Create a user address
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw identifier
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Address::GAS_POOL => write!(f, "gas-pool"),
            Address::FEE_COLLECTOR => write!(f, "fee-collector"),
            Address::STABILITY_POOL => write!(f, "stability-pool"),
            Address::VAULT => write!(f, "vault"),
            Address::SURPLUS_POOL => write!(f, "surplus-pool"),
            Address(id) => write!(f, "addr-{}", id),
        }
    }
}

/// Identifier of a registered collateral asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollateralId(pub u32);

impl std::fmt::Display for CollateralId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "coll-{}", self.0)
    }
}

/// Identifier of a position within a market
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionId(pub u64);

impl std::fmt::Display for PositionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pos-{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AMOUNTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Strongly-typed vUSD amount in wads (prevents mixing debt and collateral)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct DebtAmount(u128);

/// Strongly-typed collateral amount in wads
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct CollAmount(u128);

macro_rules! amount_impl {
    ($name:ident) => {
        impl $name {
            /// Zero amount
            pub const ZERO: Self = Self(0);

            /// Create from a raw wad value
            pub const fn from_wad(wad: u128) -> Self {
                Self(wad)
            }

            /// Create from whole token units (scales up by 1e18)
            pub const fn from_whole(units: u64) -> Self {
                Self(units as u128 * WAD)
            }

            /// Raw wad value
            pub fn wad(&self) -> u128 {
                self.0
            }

            /// Check if zero
            pub fn is_zero(&self) -> bool {
                self.0 == 0
            }

            /// Saturating addition
            pub fn saturating_add(self, other: Self) -> Self {
                Self(self.0.saturating_add(other.0))
            }

            /// Saturating subtraction
            pub fn saturating_sub(self, other: Self) -> Self {
                Self(self.0.saturating_sub(other.0))
            }

            /// Checked addition
            pub fn checked_add(self, other: Self) -> Option<Self> {
                self.0.checked_add(other.0).map(Self)
            }

            /// Checked subtraction
            pub fn checked_sub(self, other: Self) -> Option<Self> {
                self.0.checked_sub(other.0).map(Self)
            }

            /// Minimum of two amounts
            pub fn min(self, other: Self) -> Self {
                Self(self.0.min(other.0))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let whole = self.0 / WAD;
                let frac = self.0 % WAD;
                write!(f, "{}.{:018}", whole, frac)
            }
        }
    };
}

amount_impl!(DebtAmount);
amount_impl!(CollAmount);

// ═══════════════════════════════════════════════════════════════════════════════
// DEBT LEDGER
// ═══════════════════════════════════════════════════════════════════════════════

/// The vUSD debt token ledger
///
/// Tracks balances plus monotone minted/burned counters. The counters never
/// decrease, so `minted - burned == total_supply` holds across any sequence
/// of operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebtLedger {
    balances: HashMap<Address, DebtAmount>,
    total_supply: DebtAmount,
    minted: DebtAmount,
    burned: DebtAmount,
}

impl DebtLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Get total supply
    pub fn total_supply(&self) -> DebtAmount {
        self.total_supply
    }

    /// Cumulative amount ever minted
    pub fn total_minted(&self) -> DebtAmount {
        self.minted
    }

    /// Cumulative amount ever burned
    pub fn total_burned(&self) -> DebtAmount {
        self.burned
    }

    /// Get balance of an account
    pub fn balance_of(&self, owner: &Address) -> DebtAmount {
        self.balances.get(owner).copied().unwrap_or(DebtAmount::ZERO)
    }

    /// Mint new tokens to an account
    pub fn mint(&mut self, to: Address, amount: DebtAmount) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }

        let new_supply = self.total_supply.checked_add(amount).ok_or(Error::Overflow {
            operation: "mint total supply".into(),
        })?;
        let new_balance = self.balance_of(&to).checked_add(amount).ok_or(Error::Overflow {
            operation: "mint balance".into(),
        })?;

        self.balances.insert(to, new_balance);
        self.total_supply = new_supply;
        self.minted = self.minted.saturating_add(amount);

        Ok(())
    }

    /// Burn tokens from an account
    pub fn burn(&mut self, from: Address, amount: DebtAmount) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }

        let balance = self.balance_of(&from);
        if balance < amount {
            return Err(Error::InsufficientBalance {
                required: amount.wad(),
                available: balance.wad(),
            });
        }

        let new_balance = balance.saturating_sub(amount);
        if new_balance.is_zero() {
            self.balances.remove(&from);
        } else {
            self.balances.insert(from, new_balance);
        }

        self.total_supply = self.total_supply.saturating_sub(amount);
        self.burned = self.burned.saturating_add(amount);

        Ok(())
    }

    /// Transfer tokens between accounts
    pub fn transfer(&mut self, from: Address, to: Address, amount: DebtAmount) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        if from == to {
            return Ok(());
        }

        let from_balance = self.balance_of(&from);
        if from_balance < amount {
            return Err(Error::InsufficientBalance {
                required: amount.wad(),
                available: from_balance.wad(),
            });
        }

        let new_from = from_balance.saturating_sub(amount);
        if new_from.is_zero() {
            self.balances.remove(&from);
        } else {
            self.balances.insert(from, new_from);
        }

        let new_to = self.balance_of(&to).checked_add(amount).ok_or(Error::Overflow {
            operation: "transfer balance".into(),
        })?;
        self.balances.insert(to, new_to);

        Ok(())
    }

    /// Number of accounts with a non-zero balance
    pub fn holder_count(&self) -> usize {
        self.balances.len()
    }

    /// Verify supply invariants: balances sum to supply, counters net to supply
    pub fn verify_supply_invariant(&self) -> bool {
        let sum: u128 = self.balances.values().map(|b| b.wad()).sum();
        sum == self.total_supply.wad()
            && self.minted.wad() - self.burned.wad() == self.total_supply.wad()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERAL LEDGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Balance ledger for one collateral asset
///
/// Collateral never enters or leaves except through `credit` / `debit`, which
/// stand in for external token transfers; everything else is an internal move
/// between accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralLedger {
    asset: CollateralId,
    balances: HashMap<Address, CollAmount>,
    credited: CollAmount,
    debited: CollAmount,
}

impl CollateralLedger {
    /// Create an empty ledger for an asset
    pub fn new(asset: CollateralId) -> Self {
        Self {
            asset,
            balances: HashMap::new(),
            credited: CollAmount::ZERO,
            debited: CollAmount::ZERO,
        }
    }

    /// The asset this ledger tracks
    pub fn asset(&self) -> CollateralId {
        self.asset
    }

    /// Get balance of an account
    pub fn balance_of(&self, owner: &Address) -> CollAmount {
        self.balances.get(owner).copied().unwrap_or(CollAmount::ZERO)
    }

    /// Cumulative collateral received from outside the system
    pub fn total_credited(&self) -> CollAmount {
        self.credited
    }

    /// Cumulative collateral sent out of the system
    pub fn total_debited(&self) -> CollAmount {
        self.debited
    }

    /// Receive collateral from outside the system
    pub fn credit(&mut self, to: Address, amount: CollAmount) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        let new_balance = self.balance_of(&to).checked_add(amount).ok_or(Error::Overflow {
            operation: "credit balance".into(),
        })?;
        self.balances.insert(to, new_balance);
        self.credited = self.credited.saturating_add(amount);
        Ok(())
    }

    /// Send collateral out of the system
    pub fn debit(&mut self, from: Address, amount: CollAmount) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        let balance = self.balance_of(&from);
        if balance < amount {
            return Err(Error::InsufficientBalance {
                required: amount.wad(),
                available: balance.wad(),
            });
        }
        let new_balance = balance.saturating_sub(amount);
        if new_balance.is_zero() {
            self.balances.remove(&from);
        } else {
            self.balances.insert(from, new_balance);
        }
        self.debited = self.debited.saturating_add(amount);
        Ok(())
    }

    /// Transfer collateral between accounts
    pub fn transfer(&mut self, from: Address, to: Address, amount: CollAmount) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        if from == to {
            return Ok(());
        }

        let from_balance = self.balance_of(&from);
        if from_balance < amount {
            return Err(Error::InsufficientBalance {
                required: amount.wad(),
                available: from_balance.wad(),
            });
        }

        let new_from = from_balance.saturating_sub(amount);
        if new_from.is_zero() {
            self.balances.remove(&from);
        } else {
            self.balances.insert(from, new_from);
        }

        let new_to = self.balance_of(&to).checked_add(amount).ok_or(Error::Overflow {
            operation: "transfer balance".into(),
        })?;
        self.balances.insert(to, new_to);

        Ok(())
    }

    /// Verify that external flows net to the balances held
    pub fn verify_flow_invariant(&self) -> bool {
        let sum: u128 = self.balances.values().map(|b| b.wad()).sum();
        self.credited.wad() - self.debited.wad() == sum
    }
}
