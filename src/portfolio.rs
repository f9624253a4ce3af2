//! Spot portfolio: USDC cash plus token holdings at average cost.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use crate::error::{Error, Result};

const DUST: f64 = 1e-12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub amount: f64,
    pub avg_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

/// Trade the agent intends to make, sized in USDC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub token: String,
    pub side: Side,
    pub size_usd: f64,
    pub confidence: f64,
    pub reason: String,
}

/// Applied portfolio change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub token: String,
    pub side: Side,
    pub amount: f64,
    pub price: f64,
    /// Cash moved, before fees
    pub value: f64,
    pub fee: f64,
    pub realized_pnl: f64,
}

/// Point-in-time valuation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub timestamp: DateTime<Utc>,
    pub cash: f64,
    pub holdings: BTreeMap<String, Holding>,
    pub total_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    cash: f64,
    initial_cash: f64,
    holdings: BTreeMap<String, Holding>,
    total_value: f64,
    realized_pnl: f64,
}

impl Portfolio {
    pub fn new(initial_cash: f64) -> Self {
        Self {
            cash: initial_cash,
            initial_cash,
            holdings: BTreeMap::new(),
            total_value: initial_cash,
            realized_pnl: 0.0,
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn initial_cash(&self) -> f64 {
        self.initial_cash
    }

    /// Value from the last mark-to-market
    pub fn total_value(&self) -> f64 {
        self.total_value
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn holdings(&self) -> &BTreeMap<String, Holding> {
        &self.holdings
    }

    pub fn position(&self, token: &str) -> f64 {
        self.holdings.get(token).map_or(0.0, |h| h.amount)
    }

    pub fn open_positions(&self) -> usize {
        self.holdings.len()
    }

    /// Spend `amount * price + fee` cash on `amount` tokens
    pub fn buy(&mut self, token: &str, amount: f64, price: f64, fee: f64) -> Result<Fill> {
        validate_trade(amount, price)?;
        let value = amount * price;
        let cost = value + fee;
        if cost > self.cash + DUST {
            return Err(Error::InsufficientFunds {
                needed: cost,
                available: self.cash,
            });
        }

        self.cash = (self.cash - cost).max(0.0);
        let holding = self.holdings.entry(token.to_string()).or_default();
        let new_amount = holding.amount + amount;
        holding.avg_price = (holding.avg_price * holding.amount + value) / new_amount;
        holding.amount = new_amount;

        info!(token = %token, amount, price, cash = self.cash, "position increased");
        Ok(Fill {
            token: token.to_string(),
            side: Side::Buy,
            amount,
            price,
            value,
            fee,
            realized_pnl: -fee,
        })
    }

    /// Sell `amount` tokens, crediting proceeds minus `fee`
    pub fn sell(&mut self, token: &str, amount: f64, price: f64, fee: f64) -> Result<Fill> {
        validate_trade(amount, price)?;
        let holding = self.holdings.get_mut(token).ok_or_else(|| Error::InsufficientFunds {
            needed: amount,
            available: 0.0,
        })?;
        if amount > holding.amount + DUST {
            return Err(Error::InsufficientFunds {
                needed: amount,
                available: holding.amount,
            });
        }

        let amount = amount.min(holding.amount);
        let value = amount * price;
        let pnl = (price - holding.avg_price) * amount - fee;
        holding.amount -= amount;
        if holding.amount <= DUST {
            self.holdings.remove(token);
        }
        self.cash += value - fee;
        self.realized_pnl += pnl;

        info!(token = %token, amount, price, pnl, cash = self.cash, "position reduced");
        Ok(Fill {
            token: token.to_string(),
            side: Side::Sell,
            amount,
            price,
            value,
            fee,
            realized_pnl: pnl,
        })
    }

    /// Recompute total value; holdings without a price are valued at zero
    pub fn mark_to_market(&mut self, prices: &HashMap<String, f64>) -> f64 {
        let holdings_value: f64 = self
            .holdings
            .iter()
            .map(|(token, h)| h.amount * prices.get(token).copied().unwrap_or(0.0))
            .sum();
        self.total_value = self.cash + holdings_value;
        self.total_value
    }

    pub fn snapshot(&self, timestamp: DateTime<Utc>) -> PortfolioState {
        PortfolioState {
            timestamp,
            cash: self.cash,
            holdings: self.holdings.clone(),
            total_value: self.total_value,
        }
    }

    /// Fractional return against the starting cash
    pub fn total_return(&self) -> f64 {
        if self.initial_cash <= 0.0 {
            return 0.0;
        }
        (self.total_value - self.initial_cash) / self.initial_cash
    }
}

fn validate_trade(amount: f64, price: f64) -> Result<()> {
    if !(amount > 0.0) || !amount.is_finite() {
        return Err(Error::validation("amount", format!("{} must be positive", amount)));
    }
    if !(price > 0.0) || !price.is_finite() {
        return Err(Error::validation("price", format!("{} must be positive", price)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries.iter().map(|(t, p)| (t.to_string(), *p)).collect()
    }

    #[test]
    fn test_new_portfolio() {
        let p = Portfolio::new(1000.0);
        assert_eq!(p.cash(), 1000.0);
        assert_eq!(p.total_value(), 1000.0);
        assert_eq!(p.open_positions(), 0);
    }

    #[test]
    fn test_buy_updates_average_price() {
        let mut p = Portfolio::new(1000.0);
        p.buy("SOL", 2.0, 100.0, 0.0).unwrap();
        p.buy("SOL", 2.0, 80.0, 0.0).unwrap();
        let h = p.holdings()["SOL"];
        assert_eq!(h.amount, 4.0);
        assert_eq!(h.avg_price, 90.0);
        assert_eq!(p.cash(), 640.0);
    }

    #[test]
    fn test_buy_insufficient_cash() {
        let mut p = Portfolio::new(100.0);
        let err = p.buy("SOL", 2.0, 90.0, 0.0).unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { .. }));
        assert_eq!(p.cash(), 100.0);
        assert_eq!(p.position("SOL"), 0.0);
    }

    #[test]
    fn test_sell_realizes_pnl() {
        let mut p = Portfolio::new(1000.0);
        p.buy("JUP", 100.0, 1.0, 0.0).unwrap();
        let fill = p.sell("JUP", 50.0, 1.5, 0.0).unwrap();
        assert_eq!(fill.realized_pnl, 25.0);
        assert_eq!(p.position("JUP"), 50.0);
        assert_eq!(p.cash(), 975.0);
        assert_eq!(p.realized_pnl(), 25.0);
    }

    #[test]
    fn test_sell_full_position_removes_holding() {
        let mut p = Portfolio::new(1000.0);
        p.buy("BONK", 1_000_000.0, 0.00001, 0.0).unwrap();
        p.sell("BONK", 1_000_000.0, 0.00002, 0.0).unwrap();
        assert_eq!(p.open_positions(), 0);
    }

    #[test]
    fn test_sell_more_than_held() {
        let mut p = Portfolio::new(1000.0);
        assert!(p.sell("SOL", 1.0, 90.0, 0.0).is_err());
        p.buy("SOL", 1.0, 90.0, 0.0).unwrap();
        assert!(p.sell("SOL", 1.5, 90.0, 0.0).is_err());
        assert_eq!(p.position("SOL"), 1.0);
    }

    #[test]
    fn test_rejects_non_positive() {
        let mut p = Portfolio::new(1000.0);
        assert!(p.buy("SOL", 0.0, 90.0, 0.0).is_err());
        assert!(p.buy("SOL", 1.0, 0.0, 0.0).is_err());
        assert!(p.buy("SOL", f64::NAN, 90.0, 0.0).is_err());
    }

    #[test]
    fn test_fees_reduce_cash() {
        let mut p = Portfolio::new(1000.0);
        let fill = p.buy("SOL", 1.0, 100.0, 1.0).unwrap();
        assert_eq!(fill.fee, 1.0);
        assert_eq!(p.cash(), 899.0);
    }

    #[test]
    fn test_mark_to_market() {
        let mut p = Portfolio::new(1000.0);
        p.buy("SOL", 5.0, 100.0, 0.0).unwrap();
        let value = p.mark_to_market(&prices(&[("SOL", 120.0)]));
        assert_eq!(value, 1100.0);
        assert!((p.total_return() - 0.1).abs() < 1e-12);

        // Missing price values the holding at zero
        assert_eq!(p.mark_to_market(&HashMap::new()), 500.0);
    }

    #[test]
    fn test_snapshot() {
        let mut p = Portfolio::new(500.0);
        p.buy("JUP", 10.0, 1.0, 0.0).unwrap();
        p.mark_to_market(&prices(&[("JUP", 1.0)]));
        let snap = p.snapshot(Utc::now());
        assert_eq!(snap.cash, 490.0);
        assert_eq!(snap.total_value, 500.0);
        assert_eq!(snap.holdings.len(), 1);
    }
}
