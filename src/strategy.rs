use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::analyzer::{TradeAction, TradingSignal};
use crate::error::{Error, Result};

/// Trading signal from strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Signal {
    Buy {
        token: String,
        price: f64,
        confidence: f64,
        reason: String,
    },
    Sell {
        token: String,
        price: f64,
        confidence: f64,
        reason: String,
    },
    Hold,
}

impl Signal {
    pub fn token(&self) -> Option<&str> {
        match self {
            Signal::Buy { token, .. } | Signal::Sell { token, .. } => Some(token),
            Signal::Hold => None,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Signal::Buy { confidence, .. } | Signal::Sell { confidence, .. } => *confidence,
            Signal::Hold => 0.0,
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Signal::Buy { .. })
    }
}

/// Per-token view handed to strategies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub price: f64,
    /// Percent
    pub price_change_24h: f64,
    pub liquidity: f64,
    pub analysis: Option<TradingSignal>,
}

/// Market data snapshot for strategy evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Ordered by symbol so evaluation is deterministic
    pub tokens: BTreeMap<String, TokenSnapshot>,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            tokens: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn insert(&mut self, token: impl Into<String>, snapshot: TokenSnapshot) {
        self.tokens.insert(token.into(), snapshot);
    }
}

/// Base trait for all trading strategies
pub trait Strategy: Send + Sync {
    /// Evaluate a snapshot and emit signals
    fn evaluate(&mut self, data: &MarketSnapshot) -> Vec<Signal>;

    fn get_params(&self) -> serde_json::Value;

    fn update_params(&mut self, params: serde_json::Value) -> Result<()>;

    fn name(&self) -> &str;

    fn reset(&mut self);
}

/// Follows the analyzer's composite signal once it is confident enough
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalStrategy {
    pub min_confidence: f64,
}

impl SignalStrategy {
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }
}

impl Strategy for SignalStrategy {
    fn evaluate(&mut self, data: &MarketSnapshot) -> Vec<Signal> {
        let mut signals = Vec::new();
        for (token, snap) in &data.tokens {
            let Some(analysis) = snap.analysis else {
                continue;
            };
            if analysis.confidence < self.min_confidence || snap.price <= 0.0 {
                continue;
            }
            let reason = format!(
                "composite signal strength {:.2} (risk {:.2}, liquidity {:.2})",
                analysis.signal_strength, analysis.risk_score, analysis.liquidity_score
            );
            match analysis.action {
                TradeAction::Buy => signals.push(Signal::Buy {
                    token: token.clone(),
                    price: snap.price,
                    confidence: analysis.confidence.min(1.0),
                    reason,
                }),
                TradeAction::Sell => signals.push(Signal::Sell {
                    token: token.clone(),
                    price: snap.price,
                    confidence: analysis.confidence.min(1.0),
                    reason,
                }),
                TradeAction::Hold => {}
            }
        }
        signals
    }

    fn get_params(&self) -> serde_json::Value {
        serde_json::json!({ "min_confidence": self.min_confidence })
    }

    fn update_params(&mut self, params: serde_json::Value) -> Result<()> {
        if let Some(v) = params.get("min_confidence").and_then(|v| v.as_f64()) {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::validation("min_confidence", "must be between 0 and 1"));
            }
            self.min_confidence = v;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "SignalStrategy"
    }

    fn reset(&mut self) {}
}

/// Fades large 24h moves: sells into rallies, buys into drops
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumReversal {
    /// Percent move that triggers a signal
    pub threshold_pct: f64,
    pub confidence: f64,
}

impl MomentumReversal {
    pub fn new(threshold_pct: f64) -> Self {
        Self {
            threshold_pct,
            confidence: 0.6,
        }
    }
}

impl Default for MomentumReversal {
    fn default() -> Self {
        Self::new(5.0)
    }
}

impl Strategy for MomentumReversal {
    fn evaluate(&mut self, data: &MarketSnapshot) -> Vec<Signal> {
        let mut signals = Vec::new();
        for (token, snap) in &data.tokens {
            if snap.price <= 0.0 {
                continue;
            }
            let change = snap.price_change_24h;
            if change > self.threshold_pct {
                info!(token = %token, change, "momentum reversal sell signal");
                signals.push(Signal::Sell {
                    token: token.clone(),
                    price: snap.price,
                    confidence: self.confidence,
                    reason: format!("up {:.2}% in 24h, taking profit", change),
                });
            } else if change < -self.threshold_pct {
                info!(token = %token, change, "momentum reversal buy signal");
                signals.push(Signal::Buy {
                    token: token.clone(),
                    price: snap.price,
                    confidence: self.confidence,
                    reason: format!("down {:.2}% in 24h, buying the dip", change.abs()),
                });
            }
        }
        signals
    }

    fn get_params(&self) -> serde_json::Value {
        serde_json::json!({
            "threshold_pct": self.threshold_pct,
            "confidence": self.confidence
        })
    }

    fn update_params(&mut self, params: serde_json::Value) -> Result<()> {
        if let Some(v) = params.get("threshold_pct").and_then(|v| v.as_f64()) {
            if v <= 0.0 {
                return Err(Error::validation("threshold_pct", "must be positive"));
            }
            self.threshold_pct = v;
        }
        if let Some(v) = params.get("confidence").and_then(|v| v.as_f64()) {
            self.confidence = v.clamp(0.0, 1.0);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "MomentumReversal"
    }

    fn reset(&mut self) {}
}

pub struct StrategyEngine {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyEngine {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Signal-following plus momentum reversal
    pub fn with_defaults(min_confidence: f64) -> Self {
        let mut engine = Self::new();
        engine.add_strategy(Box::new(SignalStrategy::new(min_confidence)));
        engine.add_strategy(Box::new(MomentumReversal::default()));
        engine
    }

    pub fn add_strategy(&mut self, strategy: Box<dyn Strategy>) {
        self.strategies.push(strategy);
    }

    /// Evaluate every strategy, keeping the most confident signal per token
    pub fn evaluate_all(&mut self, data: &MarketSnapshot) -> Vec<Signal> {
        let mut best: BTreeMap<String, Signal> = BTreeMap::new();
        for strategy in &mut self.strategies {
            for signal in strategy.evaluate(data) {
                let Some(token) = signal.token().map(str::to_string) else {
                    continue;
                };
                let replace = best
                    .get(&token)
                    .map_or(true, |current| signal.confidence() > current.confidence());
                if replace {
                    best.insert(token, signal);
                }
            }
        }
        best.into_values().collect()
    }

    pub fn get_all_params(&self) -> Vec<serde_json::Value> {
        self.strategies
            .iter()
            .map(|s| serde_json::json!({ "name": s.name(), "params": s.get_params() }))
            .collect()
    }

    pub fn update_strategy_params(&mut self, name: &str, params: serde_json::Value) -> Result<()> {
        for strategy in &mut self.strategies {
            if strategy.name() == name {
                return strategy.update_params(params);
            }
        }
        Err(Error::Config(format!("strategy not found: {}", name)))
    }

    pub fn reset_all(&mut self) {
        for strategy in &mut self.strategies {
            strategy.reset();
        }
    }

    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }
}

impl Default for StrategyEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, f64, f64, Option<TradingSignal>)]) -> MarketSnapshot {
        let mut snap = MarketSnapshot::new(Utc::now());
        for (token, price, change, analysis) in entries {
            snap.insert(
                *token,
                TokenSnapshot {
                    price: *price,
                    price_change_24h: *change,
                    liquidity: 1_000_000.0,
                    analysis: *analysis,
                },
            );
        }
        snap
    }

    fn signal(action: TradeAction, confidence: f64) -> TradingSignal {
        TradingSignal {
            action,
            confidence,
            signal_strength: confidence,
            ..TradingSignal::default()
        }
    }

    #[test]
    fn test_momentum_reversal_signals() {
        let mut strategy = MomentumReversal::default();
        let data = snapshot(&[
            ("BONK", 0.00001, -7.5, None),
            ("JUP", 1.2, 2.0, None),
            ("SOL", 95.0, 6.0, None),
        ]);
        let signals = strategy.evaluate(&data);
        assert_eq!(signals.len(), 2);
        assert!(matches!(&signals[0], Signal::Buy { token, .. } if token == "BONK"));
        assert!(matches!(&signals[1], Signal::Sell { token, .. } if token == "SOL"));
        assert_eq!(signals[0].confidence(), 0.6);
    }

    #[test]
    fn test_momentum_reversal_threshold_exclusive() {
        let mut strategy = MomentumReversal::default();
        let signals = strategy.evaluate(&snapshot(&[("SOL", 90.0, 5.0, None)]));
        assert!(signals.is_empty());
    }

    #[test]
    fn test_signal_strategy_respects_confidence() {
        let mut strategy = SignalStrategy::new(0.5);
        let data = snapshot(&[
            ("JUP", 1.2, 0.0, Some(signal(TradeAction::Buy, 0.4))),
            ("SOL", 90.0, 0.0, Some(signal(TradeAction::Buy, 0.6))),
            ("BONK", 0.00001, 0.0, Some(signal(TradeAction::Hold, 0.9))),
        ]);
        let signals = strategy.evaluate(&data);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].token(), Some("SOL"));
        assert!(signals[0].is_buy());
    }

    #[test]
    fn test_signal_strategy_sell() {
        let mut strategy = SignalStrategy::new(0.5);
        let signals = strategy.evaluate(&snapshot(&[("SOL", 90.0, 0.0, Some(signal(TradeAction::Sell, 0.7)))]));
        assert!(matches!(&signals[0], Signal::Sell { confidence, .. } if *confidence == 0.7));
    }

    #[test]
    fn test_update_params() {
        let mut strategy = MomentumReversal::default();
        strategy
            .update_params(serde_json::json!({"threshold_pct": 3.0, "confidence": 0.8}))
            .unwrap();
        assert_eq!(strategy.threshold_pct, 3.0);
        assert_eq!(strategy.confidence, 0.8);
        assert!(strategy
            .update_params(serde_json::json!({"threshold_pct": -1.0}))
            .is_err());

        let mut signal_strategy = SignalStrategy::new(0.7);
        assert!(signal_strategy
            .update_params(serde_json::json!({"min_confidence": 1.5}))
            .is_err());
    }

    #[test]
    fn test_engine_keeps_most_confident() {
        let mut engine = StrategyEngine::with_defaults(0.5);
        assert_eq!(engine.strategy_count(), 2);

        // Analyzer says sell with 0.8, momentum says buy with 0.6
        let data = snapshot(&[("SOL", 80.0, -8.0, Some(signal(TradeAction::Sell, 0.8)))]);
        let signals = engine.evaluate_all(&data);
        assert_eq!(signals.len(), 1);
        assert!(matches!(&signals[0], Signal::Sell { confidence, .. } if *confidence == 0.8));
    }

    #[test]
    fn test_engine_params() {
        let mut engine = StrategyEngine::with_defaults(0.7);
        let params = engine.get_all_params();
        assert_eq!(params[1]["name"], "MomentumReversal");

        engine
            .update_strategy_params("MomentumReversal", serde_json::json!({"threshold_pct": 10.0}))
            .unwrap();
        assert_eq!(engine.get_all_params()[1]["params"]["threshold_pct"], 10.0);
        assert!(engine
            .update_strategy_params("Nope", serde_json::json!({}))
            .is_err());
        engine.reset_all();
    }
}
