use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{info, warn};

use crate::indicators;
use crate::portfolio::Side;

/// Performance summary over the tracked trades and equity curve
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Fractional return of the latest equity against the starting capital
    pub total_return: f64,
    /// Fraction of closing trades with positive P&L
    pub win_rate: f64,
    pub total_pnl: f64,
    pub sharpe_ratio: f64,
    /// Largest peak-to-trough equity decline, as a fraction
    pub max_drawdown: f64,
    pub total_trades: u64,
    pub avg_profit_per_trade: f64,
}

/// Executed trade kept for performance tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub token: String,
    pub side: Side,
    pub amount: f64,
    pub price: f64,
    pub pnl: f64,
}

pub struct PerformanceTracker {
    initial_capital: f64,
    trade_history: VecDeque<TradeRecord>,
    max_history_size: usize,
    equity_curve: Vec<f64>,
    peak_equity: f64,
    max_drawdown: f64,
    risk_free_rate: f64,
}

impl PerformanceTracker {
    pub fn new(initial_capital: f64, max_history_size: usize, risk_free_rate: f64) -> Self {
        Self {
            initial_capital,
            trade_history: VecDeque::new(),
            max_history_size,
            equity_curve: vec![initial_capital],
            peak_equity: initial_capital,
            max_drawdown: 0.0,
            risk_free_rate,
        }
    }

    pub fn record_trade(&mut self, trade: TradeRecord) {
        info!(
            token = %trade.token,
            side = ?trade.side,
            pnl = trade.pnl,
            "recording trade for performance"
        );

        self.trade_history.push_back(trade);
        if self.trade_history.len() > self.max_history_size {
            self.trade_history.pop_front();
        }
    }

    /// Append a portfolio valuation and update drawdown tracking
    pub fn record_equity(&mut self, value: f64) {
        if !value.is_finite() {
            warn!(value, "ignoring non-finite equity value");
            return;
        }
        self.equity_curve.push(value);
        if value > self.peak_equity {
            self.peak_equity = value;
        } else if self.peak_equity > 0.0 {
            let drawdown = (self.peak_equity - value) / self.peak_equity;
            self.max_drawdown = self.max_drawdown.max(drawdown);
        }
    }

    fn closed_trades(&self) -> impl Iterator<Item = &TradeRecord> {
        self.trade_history.iter().filter(|t| t.side == Side::Sell)
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        let total_pnl: f64 = self.trade_history.iter().map(|t| t.pnl).sum();
        let closed = self.closed_trades().count();
        let wins = self.closed_trades().filter(|t| t.pnl > 0.0).count();
        let total_trades = self.trade_history.len() as u64;

        let returns = indicators::pct_change(&self.equity_curve);
        let latest = self.equity_curve.last().copied().unwrap_or(self.initial_capital);

        PerformanceMetrics {
            total_return: if self.initial_capital > 0.0 {
                (latest - self.initial_capital) / self.initial_capital
            } else {
                0.0
            },
            win_rate: if closed > 0 {
                wins as f64 / closed as f64
            } else {
                0.0
            },
            total_pnl,
            sharpe_ratio: indicators::sharpe_ratio(&returns, self.risk_free_rate),
            max_drawdown: self.max_drawdown,
            total_trades,
            avg_profit_per_trade: if total_trades > 0 {
                total_pnl / total_trades as f64
            } else {
                0.0
            },
        }
    }

    pub fn trade_history(&self) -> Vec<TradeRecord> {
        self.trade_history.iter().cloned().collect()
    }

    pub fn equity_curve(&self) -> &[f64] {
        &self.equity_curve
    }

    pub fn trade_count(&self) -> usize {
        self.trade_history.len()
    }

    pub fn reset(&mut self) {
        warn!("resetting performance tracker");
        self.trade_history.clear();
        self.equity_curve = vec![self.initial_capital];
        self.peak_equity = self.initial_capital;
        self.max_drawdown = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(side: Side, pnl: f64) -> TradeRecord {
        TradeRecord {
            timestamp: Utc::now(),
            token: "SOL".to_string(),
            side,
            amount: 1.0,
            price: 90.0,
            pnl,
        }
    }

    #[test]
    fn test_empty_tracker() {
        let tracker = PerformanceTracker::new(1000.0, 10, 0.0);
        let m = tracker.metrics();
        assert_eq!(m.total_trades, 0);
        assert_eq!(m.win_rate, 0.0);
        assert_eq!(m.total_return, 0.0);
        assert_eq!(m.avg_profit_per_trade, 0.0);
        assert_eq!(tracker.equity_curve(), &[1000.0]);
    }

    #[test]
    fn test_win_rate_counts_closing_trades() {
        let mut tracker = PerformanceTracker::new(1000.0, 10, 0.0);
        tracker.record_trade(trade(Side::Buy, 0.0));
        tracker.record_trade(trade(Side::Sell, 20.0));
        tracker.record_trade(trade(Side::Buy, 0.0));
        tracker.record_trade(trade(Side::Sell, -10.0));

        let m = tracker.metrics();
        assert_eq!(m.total_trades, 4);
        assert_eq!(m.win_rate, 0.5);
        assert_eq!(m.total_pnl, 10.0);
        assert_eq!(m.avg_profit_per_trade, 2.5);
    }

    #[test]
    fn test_history_bounded() {
        let mut tracker = PerformanceTracker::new(1000.0, 3, 0.0);
        for i in 0..5 {
            tracker.record_trade(trade(Side::Sell, i as f64));
        }
        assert_eq!(tracker.trade_count(), 3);
        assert_eq!(tracker.trade_history()[0].pnl, 2.0);
    }

    #[test]
    fn test_equity_drawdown_and_return() {
        let mut tracker = PerformanceTracker::new(1000.0, 10, 0.0);
        tracker.record_equity(1200.0);
        tracker.record_equity(900.0);
        tracker.record_equity(1100.0);

        let m = tracker.metrics();
        assert!((m.max_drawdown - 0.25).abs() < 1e-12);
        assert!((m.total_return - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_ignores_non_finite_equity() {
        let mut tracker = PerformanceTracker::new(1000.0, 10, 0.0);
        tracker.record_equity(f64::NAN);
        assert_eq!(tracker.equity_curve().len(), 1);
    }

    #[test]
    fn test_reset() {
        let mut tracker = PerformanceTracker::new(1000.0, 10, 0.0);
        tracker.record_trade(trade(Side::Sell, 5.0));
        tracker.record_equity(500.0);
        tracker.reset();
        assert_eq!(tracker.trade_count(), 0);
        assert_eq!(tracker.metrics().max_drawdown, 0.0);
        assert_eq!(tracker.equity_curve(), &[1000.0]);
    }
}
