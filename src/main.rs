//! Futures engine simulation.
//!
//! Walks the engine through a backtest, a kill switch trip, bracket exits and
//! a save/recover cycle. Set `RUST_LOG=debug` to see every decision.

use futures_engine::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

type DemoResult = Result<(), Box<dyn Error>>;

fn main() -> DemoResult {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    println!("Futures Engine Simulation");
    println!("Risk-first sizing, simulated fills, deterministic replay\n");

    scenario_1_random_walk_backtest()?;
    scenario_2_kill_switch()?;
    scenario_3_bracket_exits()?;
    scenario_4_save_and_recover()?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn build_runner(
    config: &TradingConfig,
    feed: Box<dyn MarketFeed>,
    strategy: Box<dyn Strategy>,
) -> (Runner, Arc<SimulatedExecutor>) {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(0)));
    let risk = Arc::new(RiskEngine::new(
        config.risk.clone(),
        config.instruments.clone(),
        config.runner.initial_equity,
        clock.clone(),
        Arc::new(SequentialIdGenerator::new("SIM")),
    ));
    let executor = Arc::new(SimulatedExecutor::new(
        config.execution.clone(),
        config.instruments.clone(),
    ));
    let runner = Runner::new(config.runner.clone(), feed, strategy, risk, executor.clone())
        .with_replay_clock(clock);
    (runner, executor)
}

fn print_report(result: &BacktestResult) {
    println!("  Strategy: {} on {}", result.strategy, result.feed);
    println!("  Bars processed: {}", result.bars_processed);
    println!("  Signals: {} ({} rejected)", result.signals, result.rejected_signals);
    println!("  Equity: ${} -> ${}", result.start_equity, result.end_equity);
    println!("  Total return: {}%", (result.total_return * dec!(100)).round_dp(2));
    println!("  Max drawdown: {}%", (result.max_drawdown * dec!(100)).round_dp(2));
    println!(
        "  Trades: {} ({} won, {} lost), win rate {}%",
        result.total_trades,
        result.winning_trades,
        result.losing_trades,
        (result.win_rate * dec!(100)).round_dp(1)
    );
    println!("  Profit factor: {}", result.profit_factor.round_dp(2));
    println!("  Sharpe: {}, Sortino: {}", result.metrics.sharpe.round_dp(2), result.metrics.sortino.round_dp(2));
    println!("  Commission paid: ${}", result.metrics.total_commission);
    println!("  Kill switch active: {}\n", result.kill_switch_active);
}

/// MA crossover over 2,000 seeded random-walk MES bars.
fn scenario_1_random_walk_backtest() -> DemoResult {
    println!("Scenario 1: Random Walk Backtest\n");

    let config = TradingConfig::default();
    config.validate()?;

    let feed = RandomWalkFeed::new(RandomWalkConfig {
        bars: Some(2_000),
        seed: 7,
        ..RandomWalkConfig::default()
    });
    let strategy = MaCrossStrategy::new(10, 30).with_cooldown(5);
    let (mut runner, _) = build_runner(&config, Box::new(feed), Box::new(strategy));

    let mut last_report = 0;
    runner = runner.with_progress(Box::new(move |p: &Progress| {
        if p.bars - last_report >= 500 {
            last_report = p.bars;
            println!("  ... bar {} equity ${} trades {}", p.bars, p.equity, p.trades);
        }
    }));

    let cancel = CancellationToken::new();
    let first = runner.run(&cancel)?;
    print_report(&first);

    runner.reset();
    let second = runner.run(&cancel)?;
    println!("  Replay after reset identical: {}\n", first == second);
    Ok(())
}

/// Drawdown at the limit halts new orders until an operator clears it.
fn scenario_2_kill_switch() -> DemoResult {
    println!("Scenario 2: Kill Switch\n");

    let config = TradingConfig::default();
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
    let risk = RiskEngine::new(
        config.risk.clone(),
        config.instruments.clone(),
        Quote::new(dec!(10000)),
        clock,
        Arc::new(SequentialIdGenerator::new("KS")),
    );
    let cancel = CancellationToken::new();

    let bar = MarketEvent::bar("MES", Timestamp::from_millis(1_000), dec!(5000), dec!(5002), dec!(4998), dec!(5000))
        .ok_or("invalid bar")?
        .with_indicator(ATR, dec!(2));
    let signal = Signal::new("MES", Side::Long, Timestamp::from_millis(1_000)).with_reason("demo");

    let intent = risk.validate_and_size(&cancel, &signal, &bar)?;
    println!(
        "  Equity $10,000: approved {} contracts, stop {} target {}",
        intent.contracts, intent.stop_loss, intent.take_profit
    );

    for equity in [dec!(11000), dec!(10500), dec!(9900)] {
        let snap = risk.update_equity(&cancel, Quote::new(equity))?;
        println!(
            "  Equity ${}: peak ${} drawdown {}% safe mode {}",
            snap.equity,
            snap.high_water_mark,
            (snap.drawdown * dec!(100)).round_dp(2),
            risk.is_safe_mode()
        );
    }

    match risk.validate_and_size(&cancel, &signal, &bar) {
        Err(e) => println!("  Signal after trip: {e}"),
        Ok(_) => println!("  Signal after trip unexpectedly approved"),
    }

    risk.update_equity(&cancel, Quote::new(dec!(12000)))?;
    println!("  Equity recovers to $12,000, still halted: {}", risk.is_safe_mode());

    risk.rebase_high_water_mark();
    risk.exit_safe_mode();
    let intent = risk.validate_and_size(&cancel, &signal, &bar)?;
    println!("  After operator reset: approved {} contracts\n", intent.contracts);
    Ok(())
}

/// Stop loss and take profit resting on a simulated position.
fn scenario_3_bracket_exits() -> DemoResult {
    println!("Scenario 3: Bracket Exits\n");

    let config = TradingConfig::default();
    let executor = SimulatedExecutor::new(config.execution.clone(), config.instruments.clone());
    executor.on_fill(Arc::new(|r: &OrderResult| {
        println!(
            "  fill {} {:?} {} x{} @ {}",
            r.client_order_id,
            r.source,
            r.side,
            r.filled_contracts,
            r.average_price.map(|p| p.to_string()).unwrap_or_default()
        );
    }));
    let cancel = CancellationToken::new();

    let bar = |ts: i64, o: Decimal, h: Decimal, l: Decimal, c: Decimal| {
        MarketEvent::bar("MES", Timestamp::from_millis(ts), o, h, l, c).ok_or("invalid bar")
    };

    executor.update_market(&cancel, &bar(0, dec!(5000), dec!(5001), dec!(4999), dec!(5000))?)?;
    let intent = OrderIntent {
        client_order_id: "DEMO-1".to_string(),
        symbol: "MES".to_string(),
        side: Side::Long,
        contracts: 2,
        entry_price: Price::new_unchecked(dec!(5000)),
        stop_loss: Price::new_unchecked(dec!(4990)),
        take_profit: Price::new_unchecked(dec!(5020)),
        risk_amount: Quote::new(dec!(100)),
        created_at: Timestamp::from_millis(0),
        expires_at: Timestamp::from_millis(60_000),
        signal_reason: "demo".to_string(),
    };
    executor.place_order(&cancel, &intent)?;
    println!("  Long 2 MES, stop 4990 target 5020");

    executor.update_market(&cancel, &bar(60_000, dec!(5000), dec!(5012), dec!(4998), dec!(5010))?)?;
    if let Some(pos) = executor.position("MES") {
        println!("  Marked at 5010: unrealized ${}", pos.unrealized_pnl);
    }

    executor.update_market(&cancel, &bar(120_000, dec!(5010), dec!(5025), dec!(5008), dec!(5022))?)?;
    for trade in executor.trades() {
        println!(
            "  Closed by {:?}: gross ${} commission ${} net ${}",
            trade.exit_reason, trade.gross_pnl, trade.commission, trade.net_pnl
        );
    }
    println!("  Open positions: {}\n", executor.positions().len());
    Ok(())
}

/// Persist to a JSON directory, then bring a fresh runner back from it.
fn scenario_4_save_and_recover() -> DemoResult {
    println!("Scenario 4: Save and Recover\n");

    let dir = std::env::temp_dir().join(format!("futures-sim-{}", std::process::id()));
    let store = JsonFileStore::open(&dir)?;
    let config = TradingConfig::conservative();
    config.validate()?;

    let walk = RandomWalkConfig {
        bars: Some(300),
        seed: 11,
        ..RandomWalkConfig::default()
    };
    let cancel = CancellationToken::new();

    let (mut runner, _) = build_runner(
        &config,
        Box::new(RandomWalkFeed::new(walk.clone())),
        Box::new(MaCrossStrategy::new(5, 20)),
    );
    let result = runner.run(&cancel)?;
    runner.shutdown(Some(&store))?;
    println!("  Session 1 ended at ${} with {} trades", result.end_equity, result.total_trades);
    println!("  State written to {}", dir.display());

    let (mut restarted, executor) = build_runner(
        &config,
        Box::new(RandomWalkFeed::new(walk)),
        Box::new(MaCrossStrategy::new(5, 20)),
    );
    let recovered = restarted.recover(&cancel, &store)?;
    println!(
        "  Session 2 recovered: {} equity ${} open positions {}",
        recovered,
        restarted.equity(),
        executor.positions().len()
    );
    println!("  Equity snapshots on disk: {}", store.load_snapshots()?.len());

    store.close()?;
    if let Err(e) = std::fs::remove_dir_all(&dir) {
        tracing::warn!(error = %e, "could not remove demo state directory");
    }
    println!();
    Ok(())
}
