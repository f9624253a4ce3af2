use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

/// Bounded per-token price history, oldest first
#[derive(Debug, Clone)]
pub struct PriceHistory {
    capacity: usize,
    series: HashMap<String, VecDeque<PricePoint>>,
}

impl PriceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: HashMap::new(),
        }
    }

    /// Append a price; non-positive or non-finite prices are ignored
    pub fn record(&mut self, token: &str, timestamp: DateTime<Utc>, price: f64) {
        if !price.is_finite() || price <= 0.0 {
            return;
        }
        let series = self.series.entry(token.to_uppercase()).or_default();
        series.push_back(PricePoint { timestamp, price });
        while series.len() > self.capacity {
            series.pop_front();
        }
    }

    pub fn prices(&self, token: &str) -> Vec<f64> {
        self.series
            .get(&token.to_uppercase())
            .map(|s| s.iter().map(|p| p.price).collect())
            .unwrap_or_default()
    }

    pub fn points(&self, token: &str) -> Vec<PricePoint> {
        self.series
            .get(&token.to_uppercase())
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, token: &str) -> Option<PricePoint> {
        self.series.get(&token.to_uppercase())?.back().copied()
    }

    pub fn len(&self, token: &str) -> usize {
        self.series.get(&token.to_uppercase()).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(VecDeque::is_empty)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_record_and_read() {
        let mut history = PriceHistory::new(10);
        let t0 = Utc::now();
        history.record("sol", t0, 90.0);
        history.record("SOL", t0 + Duration::hours(1), 91.0);

        assert_eq!(history.prices("SOL"), vec![90.0, 91.0]);
        assert_eq!(history.len("Sol"), 2);
        assert_eq!(history.latest("SOL").unwrap().price, 91.0);
        assert!(history.prices("JUP").is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut history = PriceHistory::new(3);
        let t0 = Utc::now();
        for i in 0..5 {
            history.record("JUP", t0 + Duration::minutes(i), 1.0 + i as f64);
        }
        assert_eq!(history.prices("JUP"), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_rejects_invalid_prices() {
        let mut history = PriceHistory::new(3);
        history.record("BONK", Utc::now(), 0.0);
        history.record("BONK", Utc::now(), f64::NAN);
        history.record("BONK", Utc::now(), -1.0);
        assert!(history.is_empty());
    }
}
