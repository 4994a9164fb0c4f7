//! Thread-safety of the shared components.
//!
//! The risk engine and executor are shared behind `Arc` by the runner, fill
//! handlers and equity pollers. These tests hammer them from several threads
//! and check that the safety invariants still hold afterwards.

use futures_engine::{
    ExecutionConfig, InstrumentTable, ManualClock, MarketEvent, OrderIntent, Price, Quote,
    RiskConfig, RiskEngine, RiskError, SequentialIdGenerator, Side, Signal, SimulatedExecutor,
    Timestamp, ATR,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use tokio_util::sync::CancellationToken;

fn engine() -> Arc<RiskEngine> {
    Arc::new(RiskEngine::new(
        RiskConfig::default(),
        InstrumentTable::cme_defaults(),
        Quote::new(dec!(100000)),
        Arc::new(ManualClock::new(Timestamp::from_millis(0))),
        Arc::new(SequentialIdGenerator::new("C")),
    ))
}

fn bar() -> MarketEvent {
    MarketEvent::bar("MES", Timestamp::from_millis(0), dec!(5000), dec!(5001), dec!(4999), dec!(5000))
        .unwrap()
        .with_indicator(ATR, dec!(2))
}

#[test]
fn no_approval_after_trip_under_contention() {
    let risk = engine();
    let cancel = CancellationToken::new();
    let barrier = Arc::new(Barrier::new(9));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let risk = risk.clone();
        let cancel = cancel.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            let signal = Signal::new("MES", Side::Long, Timestamp::from_millis(0));
            let mut approved_after_halt = 0;
            for _ in 0..200 {
                let halted_before = risk.is_safe_mode();
                let outcome = risk.validate_and_size(&cancel, &signal, &bar());
                if halted_before && outcome.is_ok() {
                    approved_after_halt += 1;
                }
            }
            approved_after_halt
        }));
    }

    barrier.wait();
    // walk equity down through the 10% threshold while signals race
    for step in 0..=20 {
        let equity = dec!(100000) - Decimal::from(step) * dec!(1000);
        risk.update_equity(&cancel, Quote::new(equity)).unwrap();
    }

    let violations: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(violations, 0);
    assert!(risk.is_safe_mode());

    let after = risk.validate_and_size(
        &cancel,
        &Signal::new("MES", Side::Long, Timestamp::from_millis(0)),
        &bar(),
    );
    assert!(matches!(after, Err(RiskError::KillSwitchActive { .. })));
}

#[test]
fn ids_unique_across_threads() {
    let risk = engine();
    let cancel = CancellationToken::new();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let risk = risk.clone();
            let cancel = cancel.clone();
            thread::spawn(move || {
                let signal = Signal::new("MES", Side::Short, Timestamp::from_millis(0));
                (0..250)
                    .map(|_| risk.validate_and_size(&cancel, &signal, &bar()).unwrap().client_order_id)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id));
        }
    }
    assert_eq!(seen.len(), 1_000);
}

#[test]
fn snapshots_are_consistent() {
    let risk = engine();
    let cancel = CancellationToken::new();

    let writer = {
        let risk = risk.clone();
        let cancel = cancel.clone();
        thread::spawn(move || {
            for i in 0..2_000i64 {
                let equity = dec!(100000) + Decimal::from(i % 500) * dec!(3);
                risk.update_equity(&cancel, Quote::new(equity)).unwrap();
            }
        })
    };

    for _ in 0..2_000 {
        let snap = risk.snapshot();
        assert!(snap.high_water_mark >= snap.equity);
        let expected = if snap.high_water_mark.is_positive() {
            (snap.high_water_mark.value() - snap.equity.value()) / snap.high_water_mark.value()
        } else {
            Decimal::ZERO
        };
        assert_eq!(snap.drawdown, expected);
    }
    writer.join().unwrap();
}

#[test]
fn concurrent_orders_same_id_fill_once() {
    let exec = Arc::new(SimulatedExecutor::new(
        ExecutionConfig::default(),
        InstrumentTable::cme_defaults(),
    ));
    let cancel = CancellationToken::new();
    exec.update_market(&cancel, &bar()).unwrap();

    let intent = OrderIntent {
        client_order_id: "SAME".to_string(),
        symbol: "MES".to_string(),
        side: Side::Long,
        contracts: 1,
        entry_price: Price::new_unchecked(dec!(5000)),
        stop_loss: Price::new_unchecked(dec!(4990)),
        take_profit: Price::new_unchecked(dec!(5020)),
        risk_amount: Quote::new(dec!(50)),
        created_at: Timestamp::from_millis(0),
        expires_at: Timestamp::from_millis(60_000),
        signal_reason: String::new(),
    };

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let exec = exec.clone();
            let cancel = cancel.clone();
            let intent = intent.clone();
            thread::spawn(move || exec.place_order(&cancel, &intent).is_ok())
        })
        .collect();
    let filled = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();

    assert_eq!(filled, 1);
    assert_eq!(exec.position("MES").map(|p| p.contracts), Some(1));
}

#[test]
fn cancellation_is_not_a_policy_rejection() {
    let risk = engine();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = risk
        .validate_and_size(&cancel, &Signal::new("MES", Side::Long, Timestamp::from_millis(0)), &bar())
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(!err.is_policy());
    assert!(!risk.is_safe_mode());
}
