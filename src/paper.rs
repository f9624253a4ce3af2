//! Dry-run execution: fills orders against the local portfolio only.
//!
//! Fills take the quoted price worsened by the configured slippage, pay the
//! configured fee, and are appended to a JSONL journal for later review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::portfolio::{Order, Portfolio, Side};

/// Fills kept in memory; the journal holds the full record
const MAX_FILLS: usize = 1000;

/// A paper trade fill record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperFill {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub token: String,
    pub side: Side,
    pub amount: f64,
    /// Price after slippage
    pub price: f64,
    pub reference_price: f64,
    pub value: f64,
    pub fee: f64,
    pub realized_pnl: f64,
    pub reason: String,
}

pub struct PaperExecutor {
    journal_path: Option<PathBuf>,
    slippage_bps: u16,
    fee_bps: u16,
    fills: VecDeque<PaperFill>,
    fill_count: usize,
    total_fees: f64,
}

impl PaperExecutor {
    pub fn new(journal_path: Option<PathBuf>, slippage_bps: u16, fee_bps: u16) -> Self {
        Self {
            journal_path,
            slippage_bps,
            fee_bps,
            fills: VecDeque::new(),
            fill_count: 0,
            total_fees: 0.0,
        }
    }

    /// Fill `order` at `price` against `portfolio`
    pub fn execute(&mut self, portfolio: &mut Portfolio, order: &Order, price: f64) -> Result<PaperFill> {
        if !(price > 0.0) {
            return Err(Error::validation("price", format!("no usable price for {}", order.token)));
        }
        let slippage = f64::from(self.slippage_bps) / 10_000.0;
        let fee_rate = f64::from(self.fee_bps) / 10_000.0;

        let fill = match order.side {
            Side::Buy => {
                let fill_price = price * (1.0 + slippage);
                let budget = order.size_usd.min(portfolio.cash());
                let amount = budget / (fill_price * (1.0 + fee_rate));
                portfolio.buy(&order.token, amount, fill_price, amount * fill_price * fee_rate)?
            }
            Side::Sell => {
                let fill_price = price * (1.0 - slippage);
                let amount = (order.size_usd / fill_price).min(portfolio.position(&order.token));
                if amount <= 0.0 {
                    return Err(Error::InsufficientFunds {
                        needed: order.size_usd / fill_price,
                        available: 0.0,
                    });
                }
                portfolio.sell(&order.token, amount, fill_price, amount * fill_price * fee_rate)?
            }
        };

        let paper = PaperFill {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            token: fill.token,
            side: fill.side,
            amount: fill.amount,
            price: fill.price,
            reference_price: price,
            value: fill.value,
            fee: fill.fee,
            realized_pnl: fill.realized_pnl,
            reason: order.reason.clone(),
        };

        info!(
            token = %paper.token,
            side = ?paper.side,
            amount = paper.amount,
            price = paper.price,
            fee = paper.fee,
            pnl = paper.realized_pnl,
            "[PAPER] order filled"
        );

        self.log_fill(&paper);
        self.fill_count += 1;
        self.total_fees += paper.fee;
        self.fills.push_back(paper.clone());
        while self.fills.len() > MAX_FILLS {
            self.fills.pop_front();
        }
        Ok(paper)
    }

    /// Most recent fills, oldest first
    pub fn fills(&self) -> &VecDeque<PaperFill> {
        &self.fills
    }

    /// All fills since start, including ones no longer held in memory
    pub fn fill_count(&self) -> usize {
        self.fill_count
    }

    pub fn total_fees(&self) -> f64 {
        self.total_fees
    }

    fn log_fill(&self, fill: &PaperFill) {
        let Some(path) = &self.journal_path else {
            return;
        };
        let line = match serde_json::to_string(fill) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to serialize paper fill");
                return;
            }
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{}", line));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to append paper fill");
        }
    }
}

/// Read a fill journal back
pub fn load_journal(path: &std::path::Path) -> Result<Vec<PaperFill>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(Error::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(token: &str, side: Side, size_usd: f64) -> Order {
        Order {
            token: token.to_string(),
            side,
            size_usd,
            confidence: 0.8,
            reason: "test".to_string(),
        }
    }

    #[test]
    fn test_buy_without_slippage() {
        let mut portfolio = Portfolio::new(1000.0);
        let mut paper = PaperExecutor::new(None, 0, 0);
        let fill = paper.execute(&mut portfolio, &order("SOL", Side::Buy, 180.0), 90.0).unwrap();
        assert_eq!(fill.amount, 2.0);
        assert_eq!(fill.price, 90.0);
        assert_eq!(portfolio.cash(), 820.0);
        assert_eq!(paper.fill_count(), 1);
    }

    #[test]
    fn test_slippage_worsens_price() {
        let mut portfolio = Portfolio::new(1000.0);
        let mut paper = PaperExecutor::new(None, 100, 0);
        let buy = paper.execute(&mut portfolio, &order("SOL", Side::Buy, 101.0), 100.0).unwrap();
        assert!((buy.price - 101.0).abs() < 1e-9);
        assert!((buy.amount - 1.0).abs() < 1e-9);

        let sell = paper.execute(&mut portfolio, &order("SOL", Side::Sell, 99.0), 100.0).unwrap();
        assert!((sell.price - 99.0).abs() < 1e-9);
        assert!(sell.realized_pnl < 0.0);
    }

    #[test]
    fn test_buy_capped_by_cash_with_fee() {
        let mut portfolio = Portfolio::new(100.0);
        let mut paper = PaperExecutor::new(None, 0, 100);
        let fill = paper.execute(&mut portfolio, &order("JUP", Side::Buy, 500.0), 1.0).unwrap();
        assert!(portfolio.cash() >= 0.0);
        assert!(portfolio.cash() < 1e-6);
        assert!((fill.fee - fill.value * 0.01).abs() < 1e-9);
        assert!(paper.total_fees() > 0.0);
    }

    #[test]
    fn test_sell_capped_by_holding() {
        let mut portfolio = Portfolio::new(1000.0);
        let mut paper = PaperExecutor::new(None, 0, 0);
        paper.execute(&mut portfolio, &order("JUP", Side::Buy, 10.0), 1.0).unwrap();
        let fill = paper.execute(&mut portfolio, &order("JUP", Side::Sell, 50.0), 1.0).unwrap();
        assert_eq!(fill.amount, 10.0);
        assert_eq!(portfolio.position("JUP"), 0.0);
    }

    #[test]
    fn test_sell_without_holding() {
        let mut portfolio = Portfolio::new(1000.0);
        let mut paper = PaperExecutor::new(None, 0, 0);
        let result = paper.execute(&mut portfolio, &order("SOL", Side::Sell, 50.0), 90.0);
        assert!(matches!(result, Err(Error::InsufficientFunds { .. })));
        assert_eq!(paper.fill_count(), 0);
    }

    #[test]
    fn test_fill_history_is_bounded() {
        let mut portfolio = Portfolio::new(1_000_000.0);
        let mut paper = PaperExecutor::new(None, 0, 10);
        for _ in 0..MAX_FILLS + 5 {
            paper.execute(&mut portfolio, &order("JUP", Side::Buy, 10.0), 1.0).unwrap();
        }
        assert_eq!(paper.fills().len(), MAX_FILLS);
        assert_eq!(paper.fill_count(), MAX_FILLS + 5);
        let retained_fees: f64 = paper.fills().iter().map(|f| f.fee).sum();
        assert!(paper.total_fees() > retained_fees);
    }

    #[test]
    fn test_rejects_zero_price() {
        let mut portfolio = Portfolio::new(1000.0);
        let mut paper = PaperExecutor::new(None, 0, 0);
        assert!(paper.execute(&mut portfolio, &order("SOL", Side::Buy, 50.0), 0.0).is_err());
    }

    #[test]
    fn test_journal_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fills.jsonl");
        let mut portfolio = Portfolio::new(1000.0);
        let mut paper = PaperExecutor::new(Some(path.clone()), 0, 0);
        paper.execute(&mut portfolio, &order("SOL", Side::Buy, 90.0), 90.0).unwrap();
        paper.execute(&mut portfolio, &order("SOL", Side::Sell, 45.0), 90.0).unwrap();

        let fills = load_journal(&path).unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].side, Side::Buy);
        assert_eq!(fills[1].amount, 0.5);
        assert_eq!(fills[1].reason, "test");
    }
}
