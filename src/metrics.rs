//! Performance metrics: pure functions over a trade list and an equity curve.
//!
//! Nothing here reads runner or engine state, so the same functions score a
//! live curve, a backtest, or history loaded from a store. Everything stays in
//! `Decimal`; square roots and powers come from `MathematicalOps` and fall
//! back to zero when undefined.

use crate::position::Trade;
use crate::types::Quote;
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};

/// Bars per year used to annualize per-bar statistics.
pub const PERIODS_PER_YEAR: u32 = 252;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: Decimal,
    pub annualized_return: Decimal,
    /// Positive fraction, 0.15 = 15% below peak.
    pub max_drawdown: Decimal,
    pub sharpe: Decimal,
    pub sortino: Decimal,
    pub calmar: Decimal,
    pub trade_count: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: Decimal,
    pub profit_factor: Decimal,
    pub expectancy: Quote,
    pub net_profit: Quote,
    pub avg_win: Quote,
    pub avg_loss: Quote,
    pub largest_win: Quote,
    pub largest_loss: Quote,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub total_commission: Quote,
}

impl PerformanceMetrics {
    pub fn compute(equity_curve: &[Decimal], trades: &[Trade]) -> Self {
        let winning_trades = trades.iter().filter(|t| t.is_winner()).count();
        Self {
            total_return: total_return(equity_curve),
            annualized_return: annualized_return(equity_curve),
            max_drawdown: max_drawdown(equity_curve),
            sharpe: sharpe_ratio(equity_curve),
            sortino: sortino_ratio(equity_curve),
            calmar: calmar_ratio(equity_curve),
            trade_count: trades.len(),
            winning_trades,
            losing_trades: trades.len() - winning_trades,
            win_rate: win_rate(trades),
            profit_factor: profit_factor(trades),
            expectancy: expectancy(trades),
            net_profit: trades.iter().map(|t| t.net_pnl).sum(),
            avg_win: avg_win(trades),
            avg_loss: avg_loss(trades),
            largest_win: largest_win(trades),
            largest_loss: largest_loss(trades),
            max_consecutive_wins: max_consecutive_wins(trades),
            max_consecutive_losses: max_consecutive_losses(trades),
            total_commission: trades.iter().map(|t| t.commission).sum(),
        }
    }
}

/// (final - initial) / initial.
pub fn total_return(equity_curve: &[Decimal]) -> Decimal {
    match (equity_curve.first(), equity_curve.last()) {
        (Some(first), Some(last)) if *first > Decimal::ZERO => (*last - *first) / *first,
        _ => Decimal::ZERO,
    }
}

/// Compounded growth per year, treating each point as one bar.
pub fn annualized_return(equity_curve: &[Decimal]) -> Decimal {
    let periods = equity_curve.len().saturating_sub(1);
    let (Some(first), Some(last)) = (equity_curve.first(), equity_curve.last()) else {
        return Decimal::ZERO;
    };
    if periods == 0 || *first <= Decimal::ZERO || *last <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let years = Decimal::from(periods as u64) / Decimal::from(PERIODS_PER_YEAR);
    (*last / *first)
        .checked_powd(Decimal::ONE / years)
        .map(|growth| growth - Decimal::ONE)
        .unwrap_or(Decimal::ZERO)
}

/// Largest peak-to-trough drop as a positive fraction, from a fresh scan.
pub fn max_drawdown(equity_curve: &[Decimal]) -> Decimal {
    let Some(first) = equity_curve.first() else {
        return Decimal::ZERO;
    };
    let mut peak = *first;
    let mut max_dd = Decimal::ZERO;
    for &eq in equity_curve {
        if eq > peak {
            peak = eq;
        }
        if peak > Decimal::ZERO {
            let dd = (peak - eq) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// Annualized mean / std of per-bar returns. Zero with fewer than two
/// returns or no variance.
pub fn sharpe_ratio(equity_curve: &[Decimal]) -> Decimal {
    let returns = bar_returns(equity_curve);
    if returns.len() < 2 {
        return Decimal::ZERO;
    }
    let std = std_dev(&returns);
    if std.is_zero() {
        return Decimal::ZERO;
    }
    mean(&returns) / std * annualizer()
}

/// Like Sharpe but only downside deviation in the denominator.
pub fn sortino_ratio(equity_curve: &[Decimal]) -> Decimal {
    let returns = bar_returns(equity_curve);
    if returns.len() < 2 {
        return Decimal::ZERO;
    }
    let downside_sq: Decimal = returns
        .iter()
        .filter(|r| **r < Decimal::ZERO)
        .map(|r| *r * *r)
        .sum();
    if downside_sq.is_zero() {
        return Decimal::ZERO;
    }
    let downside = (downside_sq / Decimal::from(returns.len() as u64))
        .sqrt()
        .unwrap_or(Decimal::ZERO);
    if downside.is_zero() {
        return Decimal::ZERO;
    }
    mean(&returns) / downside * annualizer()
}

/// Annualized return / max drawdown. Zero without a drawdown or a gain.
pub fn calmar_ratio(equity_curve: &[Decimal]) -> Decimal {
    let dd = max_drawdown(equity_curve);
    let ann = annualized_return(equity_curve);
    if dd.is_zero() || ann <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    ann / dd
}

pub fn win_rate(trades: &[Trade]) -> Decimal {
    if trades.is_empty() {
        return Decimal::ZERO;
    }
    let winners = trades.iter().filter(|t| t.is_winner()).count();
    Decimal::from(winners as u64) / Decimal::from(trades.len() as u64)
}

/// Gross profit / gross loss on net pnl. Zero when nothing was lost.
pub fn profit_factor(trades: &[Trade]) -> Decimal {
    let gross_profit: Decimal = trades
        .iter()
        .filter(|t| t.net_pnl.is_positive())
        .map(|t| t.net_pnl.value())
        .sum();
    let gross_loss: Decimal = trades
        .iter()
        .filter(|t| t.net_pnl.is_negative())
        .map(|t| t.net_pnl.value().abs())
        .sum();
    if gross_loss.is_zero() {
        return Decimal::ZERO;
    }
    gross_profit / gross_loss
}

/// winRate * avgWin + (1 - winRate) * avgLoss, avgLoss negative.
pub fn expectancy(trades: &[Trade]) -> Quote {
    let wr = win_rate(trades);
    Quote::new(wr * avg_win(trades).value() + (Decimal::ONE - wr) * avg_loss(trades).value())
}

pub fn avg_win(trades: &[Trade]) -> Quote {
    average(trades.iter().filter(|t| t.is_winner()).map(|t| t.net_pnl.value()))
}

/// Mean net pnl of non-winning trades (scratches included). Signed.
pub fn avg_loss(trades: &[Trade]) -> Quote {
    average(trades.iter().filter(|t| !t.is_winner()).map(|t| t.net_pnl.value()))
}

pub fn largest_win(trades: &[Trade]) -> Quote {
    trades
        .iter()
        .map(|t| t.net_pnl)
        .filter(Quote::is_positive)
        .max()
        .unwrap_or_else(Quote::zero)
}

pub fn largest_loss(trades: &[Trade]) -> Quote {
    trades
        .iter()
        .map(|t| t.net_pnl)
        .filter(Quote::is_negative)
        .min()
        .unwrap_or_else(Quote::zero)
}

pub fn max_consecutive_wins(trades: &[Trade]) -> usize {
    max_consecutive(trades, true)
}

pub fn max_consecutive_losses(trades: &[Trade]) -> usize {
    max_consecutive(trades, false)
}

// ---- helpers ----

/// Simple returns between consecutive points. Non-positive bases count as zero.
pub fn bar_returns(equity_curve: &[Decimal]) -> Vec<Decimal> {
    equity_curve
        .windows(2)
        .map(|w| {
            if w[0] > Decimal::ZERO {
                (w[1] - w[0]) / w[0]
            } else {
                Decimal::ZERO
            }
        })
        .collect()
}

fn annualizer() -> Decimal {
    Decimal::from(PERIODS_PER_YEAR).sqrt().unwrap_or(Decimal::ZERO)
}

fn average(values: impl Iterator<Item = Decimal>) -> Quote {
    let (sum, n) = values.fold((Decimal::ZERO, 0u64), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        return Quote::zero();
    }
    Quote::new(sum / Decimal::from(n))
}

fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.iter().copied().sum::<Decimal>() / Decimal::from(values.len() as u64)
}

// sample standard deviation
fn std_dev(values: &[Decimal]) -> Decimal {
    if values.len() < 2 {
        return Decimal::ZERO;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (*v - m) * (*v - m)).sum::<Decimal>()
        / Decimal::from((values.len() - 1) as u64);
    variance.sqrt().unwrap_or(Decimal::ZERO)
}

fn max_consecutive(trades: &[Trade], winners: bool) -> usize {
    let mut max_streak = 0;
    let mut current = 0;
    for trade in trades {
        if trade.is_winner() == winners {
            current += 1;
            max_streak = max_streak.max(current);
        } else {
            current = 0;
        }
    }
    max_streak
}
