//! Integration tests for the vUSD protocol.
//!
//! These drive full operation sequences through the coordinator and verify
//! the conservation invariants, the liquidation waterfall, and the interest
//! settlement order end to end.

use proptest::prelude::*;

use vusd::core::config::RiskParams;
use vusd::core::token::{Address, CollAmount, CollateralId, DebtAmount, PositionId};
use vusd::error::Error;
use vusd::liquidation::engine::{LiquidationOutcome, LiquidationRecord, SkipReason};
use vusd::oracle::price_feed::MemoryPriceFeed;
use vusd::protocol::system::{CollChange, DebtChange, System};
use vusd::utils::constants::{SECONDS_PER_YEAR, WAD};
use vusd::utils::math::{interest_factor, mul_div};

// ═══════════════════════════════════════════════════════════════════════════════
// TEST HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

const PRICE_NORMAL: u128 = 100_000 * WAD;
const PRICE_CRASH: u128 = 2_300 * WAD;

fn keeper() -> Address {
    Address::new(999)
}

fn setup() -> (System, MemoryPriceFeed, CollateralId) {
    let mut system = System::new();
    let asset = system.register_collateral("wrapped-btc");
    system.deploy_market(asset, RiskParams::default(), 0).unwrap();

    let mut feed = MemoryPriceFeed::new();
    feed.set_price(asset, PRICE_NORMAL);
    (system, feed, asset)
}

fn open(
    system: &mut System,
    feed: &MemoryPriceFeed,
    asset: CollateralId,
    owner: u64,
    coll_whole: u64,
    principal_whole: u64,
    now: u64,
) -> PositionId {
    system
        .open_position(
            feed,
            asset,
            Address::new(owner),
            CollAmount::from_whole(coll_whole),
            DebtAmount::from_whole(principal_whole),
            now,
        )
        .unwrap()
}

fn liquidate_record(
    system: &mut System,
    feed: &MemoryPriceFeed,
    asset: CollateralId,
    id: PositionId,
    now: u64,
) -> LiquidationRecord {
    match system.liquidate(feed, asset, id, keeper(), now).unwrap() {
        LiquidationOutcome::Liquidated(record) => record,
        outcome => panic!("expected a liquidation, got {:?}", outcome),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSERVATION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_conservation_through_scripted_sequence() {
    let (mut system, mut feed, asset) = setup();

    let a = open(&mut system, &feed, asset, 1, 1, 2000, 0);
    let b = open(&mut system, &feed, asset, 2, 5, 4000, 0);
    open(&mut system, &feed, asset, 3, 100, 3000, 0);
    system.check_invariants().unwrap();

    // Pool deposits from two borrowers
    system
        .provide_to_pool(Address::new(2), DebtAmount::from_whole(3000), 10)
        .unwrap();
    system
        .provide_to_pool(Address::new(3), DebtAmount::from_whole(1000), 10)
        .unwrap();
    system.check_invariants().unwrap();

    // Adjustments with interest accruing in between
    system
        .adjust_position(
            &feed,
            asset,
            b,
            Address::new(2),
            CollChange::Add(CollAmount::from_whole(1)),
            DebtChange::Borrow(DebtAmount::from_whole(500)),
            SECONDS_PER_YEAR / 12,
        )
        .unwrap();
    system.check_invariants().unwrap();

    // Crash and liquidate the thin position against the pool
    feed.set_price(asset, PRICE_CRASH);
    liquidate_record(&mut system, &feed, asset, a, SECONDS_PER_YEAR / 6);
    system.check_invariants().unwrap();

    // Recovery: withdraw from the pool, claim gains, repay
    feed.set_price(asset, PRICE_NORMAL);
    system
        .withdraw_from_pool(Address::new(2), DebtAmount::from_whole(200), SECONDS_PER_YEAR / 6)
        .unwrap();
    system
        .claim_pool_gains(Address::new(3), SECONDS_PER_YEAR / 6)
        .unwrap();
    system
        .repay(
            asset,
            b,
            Address::new(2),
            DebtAmount::from_whole(100),
            SECONDS_PER_YEAR / 4,
        )
        .unwrap();
    system.check_invariants().unwrap();
}

#[test]
fn test_conservation_across_two_markets() {
    let (mut system, mut feed, btc) = setup();
    let eth = system.register_collateral("wrapped-eth");
    system.deploy_market(eth, RiskParams::default(), 0).unwrap();
    feed.set_price(eth, 5_000 * WAD);

    open(&mut system, &feed, btc, 1, 1, 2000, 0);
    let e = system
        .open_position(
            &feed,
            eth,
            Address::new(2),
            CollAmount::from_whole(10),
            DebtAmount::from_whole(3000),
            0,
        )
        .unwrap();
    // A survivor absorbs the redistributed remainder of the shortfall
    system
        .open_position(
            &feed,
            eth,
            Address::new(3),
            CollAmount::from_whole(100),
            DebtAmount::from_whole(2000),
            0,
        )
        .unwrap();
    system
        .provide_to_pool(Address::new(2), DebtAmount::from_whole(2500), 0)
        .unwrap();

    // Crash only the eth market; the pool gains are recorded per asset
    feed.set_price(eth, 330 * WAD);
    liquidate_record(&mut system, &feed, eth, e, 100);
    system.check_invariants().unwrap();

    let gain = system
        .pool()
        .collateral_gain(&Address::new(2), eth)
        .unwrap();
    assert!(!gain.is_zero());
    assert!(system
        .pool()
        .collateral_gain(&Address::new(2), btc)
        .unwrap()
        .is_zero());

    let (claimed, _) = system.claim_pool_gains(Address::new(2), 200).unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].0, eth);
    system.check_invariants().unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION BEHAVIOR
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_reliquidation_is_inert() {
    let (mut system, mut feed, asset) = setup();
    let victim = open(&mut system, &feed, asset, 1, 1, 2000, 0);
    open(&mut system, &feed, asset, 2, 100, 3000, 0);
    system
        .provide_to_pool(Address::new(2), DebtAmount::from_whole(3000), 0)
        .unwrap();

    feed.set_price(asset, PRICE_CRASH);
    liquidate_record(&mut system, &feed, asset, victim, 10);

    let deposits_after = system.pool().total_deposits();
    let keeper_coll = system
        .market(asset)
        .unwrap()
        .collateral()
        .balance_of(&keeper());

    // Second call on the same id is a skip, not an error, and changes
    // nothing
    let outcome = system.liquidate(&feed, asset, victim, keeper(), 11).unwrap();
    assert!(matches!(
        outcome,
        LiquidationOutcome::Skipped(SkipReason::NotActive)
    ));
    assert_eq!(system.pool().total_deposits(), deposits_after);
    assert_eq!(
        system
            .market(asset)
            .unwrap()
            .collateral()
            .balance_of(&keeper()),
        keeper_coll
    );
    system.check_invariants().unwrap();
}

#[test]
fn test_batch_order_sensitivity() {
    // A's redistribution pushes B under the minimum ratio. Processing A
    // first takes B down in the same batch; processing B first skips it.
    let build = || {
        let (mut system, mut feed, asset) = setup();
        let a = open(&mut system, &feed, asset, 1, 1, 2000, 0);
        // B opens barely above MCR at the crash price: 1.06 * 2300 / 2200
        let b = system
            .open_position(
                &feed,
                asset,
                Address::new(2),
                CollAmount::from_wad(106 * WAD / 100),
                DebtAmount::from_whole(2000),
                0,
            )
            .unwrap();
        open(&mut system, &feed, asset, 3, 3, 2000, 0);
        feed.set_price(asset, PRICE_CRASH);
        (system, feed, asset, a, b)
    };

    let (mut fwd, feed, asset, a, b) = build();
    let report = fwd.batch_liquidate(&feed, asset, &[a, b], keeper(), 10).unwrap();
    assert_eq!(report.liquidated_count(), 2);
    fwd.check_invariants().unwrap();

    let (mut rev, feed, asset, a, b) = build();
    let report = rev.batch_liquidate(&feed, asset, &[b, a], keeper(), 10).unwrap();
    assert_eq!(report.liquidated_count(), 1);
    assert!(rev.position(asset, b).unwrap().is_active());
    rev.check_invariants().unwrap();
}

#[test]
fn test_pool_wipeout_epoch_isolation() {
    let (mut system, mut feed, asset) = setup();
    let victim = open(&mut system, &feed, asset, 1, 1, 2000, 0);
    open(&mut system, &feed, asset, 2, 100, 4000, 0);
    open(&mut system, &feed, asset, 3, 100, 4000, 0);

    // Deposits exactly match the victim's debt: full wipeout
    system
        .provide_to_pool(Address::new(2), DebtAmount::from_whole(2000), 0)
        .unwrap();

    feed.set_price(asset, PRICE_CRASH);
    liquidate_record(&mut system, &feed, asset, victim, 0);
    feed.set_price(asset, PRICE_NORMAL);

    assert_eq!(system.pool().epoch(), 1);
    assert!(system
        .pool()
        .compounded_deposit(&Address::new(2))
        .unwrap()
        .is_zero());
    // The wiped depositor keeps the collateral gain
    assert!(!system
        .pool()
        .collateral_gain(&Address::new(2), asset)
        .unwrap()
        .is_zero());

    // A depositor arriving after the wipeout starts clean
    system
        .provide_to_pool(Address::new(3), DebtAmount::from_whole(1000), 10)
        .unwrap();
    assert_eq!(
        system.pool().compounded_deposit(&Address::new(3)).unwrap(),
        DebtAmount::from_whole(1000)
    );
    assert!(system
        .pool()
        .collateral_gain(&Address::new(3), asset)
        .unwrap()
        .is_zero());
    system.check_invariants().unwrap();
}

#[test]
fn test_compounded_deposit_monotone_under_liquidations() {
    let (mut system, mut feed, asset) = setup();
    open(&mut system, &feed, asset, 10, 1000, 50_000, 0);
    system
        .provide_to_pool(Address::new(10), DebtAmount::from_whole(50_000), 0)
        .unwrap();

    let victims: Vec<PositionId> = (0..5)
        .map(|i| open(&mut system, &feed, asset, 20 + i, 1, 2000, 0))
        .collect();

    feed.set_price(asset, PRICE_CRASH);
    let mut last = system
        .pool()
        .compounded_deposit(&Address::new(10))
        .unwrap();
    for victim in victims {
        liquidate_record(&mut system, &feed, asset, victim, 0);
        let current = system
            .pool()
            .compounded_deposit(&Address::new(10))
            .unwrap();
        assert!(current <= last);
        last = current;
    }
    system.check_invariants().unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTEREST SETTLEMENT
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_interest_cleared_before_principal() {
    let mut system = System::new();
    let mut params = RiskParams::default();
    params.interest_rate = WAD / 4;
    let hi = system.register_collateral("high-rate");
    system.deploy_market(hi, params, 0).unwrap();
    let mut feed_hi = MemoryPriceFeed::new();
    feed_hi.set_price(hi, PRICE_NORMAL);

    let id = system
        .open_position(
            &feed_hi,
            hi,
            Address::new(1),
            CollAmount::from_whole(1),
            DebtAmount::from_whole(4800),
            0,
        )
        .unwrap();

    // Top up through the swap module so the borrower can cover the interest
    let psm = system.deploy_psm(DebtAmount::from_whole(100_000));
    system
        .psm_buy(psm, Address::new(1), DebtAmount::from_whole(2000))
        .unwrap();

    // One year at 25% continuous on 4,800: interest = 4800 * (e^0.25 - 1),
    // about 1363.32
    let now = SECONDS_PER_YEAR;
    let accrued = DebtAmount::from_wad(
        mul_div(
            DebtAmount::from_whole(4800).wad(),
            interest_factor(WAD / 4, SECONDS_PER_YEAR).unwrap(),
            WAD,
        )
        .unwrap(),
    );
    assert!(accrued > DebtAmount::from_whole(1363));
    assert!(accrued < DebtAmount::from_whole(1364));

    system
        .repay(hi, id, Address::new(1), DebtAmount::from_whole(500), now)
        .unwrap();
    let pos = system.position(hi, id).unwrap();
    assert_eq!(pos.principal, DebtAmount::from_whole(4800));
    assert_eq!(pos.interest, accrued.saturating_sub(DebtAmount::from_whole(500)));

    // The next payment clears the interest to exactly zero and bites into
    // principal for the rest
    system
        .repay(hi, id, Address::new(1), DebtAmount::from_whole(1000), now)
        .unwrap();
    let pos = system.position(hi, id).unwrap();
    assert!(pos.interest.is_zero());
    let expected_principal = DebtAmount::from_whole(3300).saturating_add(accrued);
    assert_eq!(pos.principal, expected_principal);

    // Paying down to exactly the net debt floor succeeds; one more wei is
    // rejected
    let to_floor = expected_principal.saturating_sub(DebtAmount::from_whole(1800));
    system.repay(hi, id, Address::new(1), to_floor, now).unwrap();
    assert_eq!(
        system.position(hi, id).unwrap().principal,
        DebtAmount::from_whole(1800)
    );
    let result = system.repay(hi, id, Address::new(1), DebtAmount::from_wad(1), now);
    assert!(matches!(result, Err(Error::InsufficientDebt { .. })));

    system.check_invariants().unwrap();
}

#[test]
fn test_interest_streams_to_pool_and_fees() {
    let (mut system, feed, asset) = setup();
    let id = open(&mut system, &feed, asset, 1, 1, 2000, 0);
    open(&mut system, &feed, asset, 2, 10, 5000, 0);
    system
        .provide_to_pool(Address::new(2), DebtAmount::from_whole(4000), 0)
        .unwrap();

    // Settle a year of interest via a tiny adjustment
    system
        .adjust_position(
            &feed,
            asset,
            id,
            Address::new(1),
            CollChange::Add(CollAmount::from_wad(WAD / 1000)),
            DebtChange::None,
            SECONDS_PER_YEAR,
        )
        .unwrap();

    // 80% of the accrued interest lands on the pool as yield
    let yield_gain = system.pool().yield_gain(&Address::new(2)).unwrap();
    let fees = system.debt().balance_of(&Address::FEE_COLLECTOR);
    assert!(!yield_gain.is_zero());
    assert!(!fees.is_zero());
    // 80 / 20 split, up to fixed-point dust
    assert!(yield_gain.wad().abs_diff(4 * fees.wad()) < 1_000_000);
    system.check_invariants().unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// SURPLUS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_surplus_claim_roundtrip() {
    let (mut system, mut feed, asset) = setup();
    let victim = open(&mut system, &feed, asset, 1, 2, 2000, 0);
    open(&mut system, &feed, asset, 2, 100, 4000, 0);
    system
        .provide_to_pool(Address::new(2), DebtAmount::from_whole(4000), 0)
        .unwrap();

    // ICR = 2 * 1200 / 2200 just under the minimum, deep pool: surplus left
    feed.set_price(asset, 1_200 * WAD);
    let record = liquidate_record(&mut system, &feed, asset, victim, 0);
    assert!(!record.surplus.is_zero());

    let claimed = system.claim_surplus(asset, Address::new(1), 1).unwrap();
    assert_eq!(claimed, record.surplus);
    assert_eq!(
        system
            .market(asset)
            .unwrap()
            .collateral()
            .balance_of(&Address::new(1)),
        claimed
    );

    // Nothing left to claim
    let again = system.claim_surplus(asset, Address::new(1), 2);
    assert!(matches!(again, Err(Error::ZeroAmount)));
    system.check_invariants().unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// RANDOMIZED SCHEDULES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum Op {
    Open { actor: u64, coll: u64, principal: u64 },
    Provide { actor: u64, amount: u64 },
    Withdraw { actor: u64, amount: u64 },
    Repay { actor: u64, position: usize, amount: u64 },
    AddColl { position: usize, amount: u64 },
    Crash { position: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..4, 1u64..5, 2000u64..6000)
            .prop_map(|(actor, coll, principal)| Op::Open { actor, coll, principal }),
        (1u64..4, 100u64..2000).prop_map(|(actor, amount)| Op::Provide { actor, amount }),
        (1u64..4, 100u64..2000).prop_map(|(actor, amount)| Op::Withdraw { actor, amount }),
        (1u64..4, 0usize..8, 50u64..500)
            .prop_map(|(actor, position, amount)| Op::Repay { actor, position, amount }),
        (0usize..8, 1u64..3).prop_map(|(position, amount)| Op::AddColl { position, amount }),
        (0usize..8).prop_map(|position| Op::Crash { position }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The conservation invariants hold after every operation of a random
    /// schedule, whether the individual operations succeed or fail.
    #[test]
    fn prop_invariants_hold_under_random_schedule(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (mut system, mut feed, asset) = setup();
        let mut positions: Vec<PositionId> = Vec::new();
        let mut now = 0u64;

        for op in ops {
            now += 3600;
            match op {
                Op::Open { actor, coll, principal } => {
                    if let Ok(id) = system.open_position(
                        &feed,
                        asset,
                        Address::new(actor),
                        CollAmount::from_whole(coll),
                        DebtAmount::from_whole(principal),
                        now,
                    ) {
                        positions.push(id);
                    }
                }
                Op::Provide { actor, amount } => {
                    let _ = system.provide_to_pool(
                        Address::new(actor),
                        DebtAmount::from_whole(amount),
                        now,
                    );
                }
                Op::Withdraw { actor, amount } => {
                    let _ = system.withdraw_from_pool(
                        Address::new(actor),
                        DebtAmount::from_whole(amount),
                        now,
                    );
                }
                Op::Repay { actor, position, amount } => {
                    if let Some(&id) = positions.get(position) {
                        let _ = system.repay(
                            asset,
                            id,
                            Address::new(actor),
                            DebtAmount::from_whole(amount),
                            now,
                        );
                    }
                }
                Op::AddColl { position, amount } => {
                    if let Some(&id) = positions.get(position) {
                        let owner = system.position(asset, id).map(|p| p.owner);
                        if let Ok(owner) = owner {
                            let _ = system.adjust_position(
                                &feed,
                                asset,
                                id,
                                owner,
                                CollChange::Add(CollAmount::from_whole(amount)),
                                DebtChange::None,
                                now,
                            );
                        }
                    }
                }
                Op::Crash { position } => {
                    if let Some(&id) = positions.get(position) {
                        feed.set_price(asset, PRICE_CRASH);
                        let _ = system.liquidate(&feed, asset, id, keeper(), now);
                        feed.set_price(asset, PRICE_NORMAL);
                    }
                }
            }
            system.check_invariants().unwrap();
        }
    }
}
