//! Agent memory: a short-term buffer, an importance-filtered long-term store,
//! relevance-ranked recall and periodic consolidation of the short-term buffer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::{debug, info};

use crate::config::MemoryConfig;

pub const SHORT_TERM_CAPACITY: usize = 100;
const MARKET_CONDITION_KEYS: [&str; 4] = ["trend", "volatility", "volume", "sentiment"];
const DAY_SECS: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Trade,
    Analysis,
    Decision,
    Experience,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MemoryKind,
    pub data: Map<String, Value>,
    pub metadata: Map<String, Value>,
    pub importance: f64,
}

impl MemoryEntry {
    pub fn token(&self) -> Option<&str> {
        self.data.get("token").and_then(Value::as_str)
    }

    fn number(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(Value::as_f64)
    }
}

/// What the caller is about to do, used to rank memories
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecallContext {
    pub token: Option<String>,
    pub kind: Option<MemoryKind>,
    pub market_conditions: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub total_trades: u64,
    pub win_rate: f64,
    pub avg_profit: f64,
}

pub struct MemorySystem {
    config: MemoryConfig,
    short_term: VecDeque<MemoryEntry>,
    long_term: VecDeque<MemoryEntry>,
    metrics: MemoryMetrics,
}

impl MemorySystem {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            short_term: VecDeque::with_capacity(SHORT_TERM_CAPACITY),
            long_term: VecDeque::new(),
            metrics: MemoryMetrics::default(),
        }
    }

    /// Store a memory; returns its id
    pub fn add(&mut self, kind: MemoryKind, data: Value, metadata: Value) -> String {
        let entry = MemoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            importance: 0.0,
            data: into_map(data),
            metadata: into_map(metadata),
        };
        self.insert(entry)
    }

    fn insert(&mut self, mut entry: MemoryEntry) -> String {
        entry.importance = importance(&entry);
        let id = entry.id.clone();

        if entry.kind == MemoryKind::Trade {
            if let Some(profit) = entry.number("profit") {
                self.update_metrics(profit);
            }
        }

        if entry.importance >= self.config.importance_threshold {
            self.long_term.push_back(entry.clone());
            while self.long_term.len() > self.config.max_size {
                self.long_term.pop_front();
            }
        }

        debug!(kind = ?entry.kind, importance = entry.importance, "memory stored");
        self.short_term.push_back(entry);
        while self.short_term.len() > SHORT_TERM_CAPACITY {
            self.short_term.pop_front();
        }

        if self.config.consolidation_interval > 0
            && self.short_term.len() >= self.config.consolidation_interval
        {
            self.consolidate();
        }
        id
    }

    /// Highest-relevance memories for `context`, optionally restricted to `kinds`
    pub fn get_relevant_memories(
        &self,
        context: &RecallContext,
        limit: usize,
        kinds: Option<&[MemoryKind]>,
    ) -> Vec<MemoryEntry> {
        let now = Utc::now();
        let mut scored: Vec<(f64, &MemoryEntry)> = self
            .long_term
            .iter()
            .chain(self.short_term.iter())
            .filter(|m| kinds.map_or(true, |k| k.contains(&m.kind)))
            .map(|m| (relevance(m, context, now), m))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut seen = HashSet::new();
        scored
            .into_iter()
            .filter(|(_, m)| seen.insert(m.id.clone()))
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Most recent short-term memories, newest first
    pub fn get_recent_memories(&self, limit: usize) -> Vec<MemoryEntry> {
        self.short_term.iter().rev().take(limit).cloned().collect()
    }

    pub fn performance_metrics(&self) -> MemoryMetrics {
        self.metrics
    }

    pub fn short_term_len(&self) -> usize {
        self.short_term.len()
    }

    pub fn long_term_len(&self) -> usize {
        self.long_term.len()
    }

    /// Merge short-term memories sharing kind and token; lone entries are dropped
    pub fn consolidate(&mut self) {
        let mut groups: BTreeMap<(MemoryKind, String), Vec<MemoryEntry>> = BTreeMap::new();
        for entry in self.short_term.drain(..) {
            let key = (entry.kind, entry.token().unwrap_or_default().to_string());
            groups.entry(key).or_default().push(entry);
        }

        let before: usize = groups.values().map(Vec::len).sum();
        self.short_term = groups
            .into_values()
            .filter(|g| g.len() > 1)
            .filter_map(merge_group)
            .collect();

        info!(
            before,
            after = self.short_term.len(),
            "short-term memory consolidated"
        );
    }

    fn update_metrics(&mut self, profit: f64) {
        let m = &mut self.metrics;
        m.total_trades += 1;
        let n = m.total_trades as f64;
        let win = if profit > 0.0 { 1.0 } else { 0.0 };
        m.win_rate = (m.win_rate * (n - 1.0) + win) / n;
        m.avg_profit = (m.avg_profit * (n - 1.0) + profit) / n;
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// Base 0.5, raised by trade size and profit, errors, or analysis confidence and risk
pub fn importance(entry: &MemoryEntry) -> f64 {
    let mut score = 0.5;
    match entry.kind {
        MemoryKind::Trade => {
            let size = entry.number("size").unwrap_or(0.0).abs();
            let profit = entry.number("profit").unwrap_or(0.0).abs();
            score += (size / 10_000.0).min(0.3);
            score += (profit / 1_000.0).min(0.2);
        }
        MemoryKind::Error => score += 0.3,
        MemoryKind::Analysis => {
            score += 0.2 * entry.number("confidence").unwrap_or(0.0);
            score += 0.2 * entry.number("risk_score").unwrap_or(0.0);
        }
        _ => {}
    }
    score.min(1.0)
}

/// Recency (24h linear decay), token and kind match, and market-condition overlap
pub fn relevance(entry: &MemoryEntry, context: &RecallContext, now: DateTime<Utc>) -> f64 {
    let age = (now - entry.timestamp).num_milliseconds() as f64 / 1000.0;
    let mut score = 0.3 * (1.0 - age.max(0.0) / DAY_SECS).max(0.0);

    if let (Some(token), Some(wanted)) = (entry.token(), context.token.as_deref()) {
        if token.eq_ignore_ascii_case(wanted) {
            score += 0.3;
        }
    }
    if context.kind == Some(entry.kind) {
        score += 0.2;
    }

    if let Some(Value::Object(conditions)) = entry.data.get("market_conditions") {
        score += 0.2 * condition_similarity(conditions, &context.market_conditions);
    }
    score.min(1.0)
}

fn condition_similarity(a: &Map<String, Value>, b: &Map<String, Value>) -> f64 {
    let matches = MARKET_CONDITION_KEYS
        .iter()
        .filter(|k| matches!((a.get(**k), b.get(**k)), (Some(x), Some(y)) if x == y))
        .count();
    matches as f64 / MARKET_CONDITION_KEYS.len() as f64
}

/// Average numeric fields, keep the latest value of everything else
fn merge_group(group: Vec<MemoryEntry>) -> Option<MemoryEntry> {
    let last = group.last()?.clone();
    let mut data = Map::new();
    let keys: Vec<String> = group
        .iter()
        .flat_map(|e| e.data.keys().cloned())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    for key in keys {
        let values: Vec<&Value> = group.iter().filter_map(|e| e.data.get(&key)).collect();
        let numeric: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
        let merged = if !numeric.is_empty() && numeric.len() == values.len() {
            serde_json::Number::from_f64(numeric.iter().sum::<f64>() / numeric.len() as f64)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        } else {
            values.last().map(|v| (*v).clone()).unwrap_or(Value::Null)
        };
        data.insert(key, merged);
    }
    data.insert("merged_count".to_string(), Value::from(group.len() as u64));

    Some(MemoryEntry {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: last.timestamp,
        kind: last.kind,
        data,
        metadata: last.metadata,
        importance: group.iter().map(|e| e.importance).fold(0.0, f64::max),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn memory(interval: usize) -> MemorySystem {
        MemorySystem::new(MemoryConfig {
            max_size: 5,
            importance_threshold: 0.5,
            consolidation_interval: interval,
        })
    }

    fn entry(kind: MemoryKind, data: Value) -> MemoryEntry {
        MemoryEntry {
            id: "x".to_string(),
            timestamp: Utc::now(),
            kind,
            data: into_map(data),
            metadata: Map::new(),
            importance: 0.0,
        }
    }

    #[test]
    fn test_importance_trade() {
        let e = entry(MemoryKind::Trade, json!({"size": 5000.0, "profit": -100.0}));
        assert!((importance(&e) - 0.5 - 0.3 - 0.1).abs() < 1e-12);

        let big = entry(MemoryKind::Trade, json!({"size": 1e6, "profit": 1e6}));
        assert_eq!(importance(&big), 1.0);
    }

    #[test]
    fn test_importance_other_kinds() {
        assert_eq!(importance(&entry(MemoryKind::Error, json!({}))), 0.8);
        let analysis = entry(MemoryKind::Analysis, json!({"confidence": 0.5, "risk_score": 0.5}));
        assert!((importance(&analysis) - 0.7).abs() < 1e-12);
        assert_eq!(importance(&entry(MemoryKind::Decision, json!({}))), 0.5);
    }

    #[test]
    fn test_long_term_threshold() {
        let mut mem = MemorySystem::new(MemoryConfig {
            max_size: 10,
            importance_threshold: 0.6,
            consolidation_interval: 0,
        });
        mem.add(MemoryKind::Decision, json!({"token": "SOL"}), json!({}));
        mem.add(MemoryKind::Error, json!({"message": "boom"}), json!({}));
        assert_eq!(mem.short_term_len(), 2);
        assert_eq!(mem.long_term_len(), 1);
    }

    #[test]
    fn test_bounded_stores() {
        let mut mem = memory(0);
        for i in 0..150 {
            mem.add(MemoryKind::Error, json!({"i": i}), json!({}));
        }
        assert_eq!(mem.short_term_len(), SHORT_TERM_CAPACITY);
        assert_eq!(mem.long_term_len(), 5);
        assert_eq!(mem.get_recent_memories(1)[0].data["i"], 149);
    }

    #[test]
    fn test_trade_metrics() {
        let mut mem = memory(0);
        mem.add(MemoryKind::Trade, json!({"token": "SOL", "profit": 10.0}), json!({}));
        mem.add(MemoryKind::Trade, json!({"token": "SOL", "profit": -4.0}), json!({}));
        mem.add(MemoryKind::Trade, json!({"token": "SOL"}), json!({}));
        let m = mem.performance_metrics();
        assert_eq!(m.total_trades, 2);
        assert_eq!(m.win_rate, 0.5);
        assert_eq!(m.avg_profit, 3.0);
    }

    #[test]
    fn test_relevance_scoring() {
        let now = Utc::now();
        let mut e = entry(
            MemoryKind::Trade,
            json!({"token": "SOL", "market_conditions": {"trend": "up", "volatility": "high", "volume": "low"}}),
        );
        e.timestamp = now;

        let mut context = RecallContext {
            token: Some("sol".to_string()),
            kind: Some(MemoryKind::Trade),
            market_conditions: into_map(json!({"trend": "up", "volatility": "low"})),
        };
        // 0.3 recency + 0.3 token + 0.2 kind + 0.2 * 1/4
        assert!((relevance(&e, &context, now) - 0.85).abs() < 1e-9);

        context.token = Some("JUP".to_string());
        e.timestamp = now - chrono::Duration::hours(12);
        assert!((relevance(&e, &context, now) - 0.4).abs() < 1e-9);

        e.timestamp = now - chrono::Duration::days(3);
        context.kind = None;
        assert!((relevance(&e, &context, now) - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_get_relevant_memories_dedup_and_filter() {
        let mut mem = memory(0);
        mem.add(MemoryKind::Error, json!({"token": "SOL"}), json!({}));
        mem.add(MemoryKind::Decision, json!({"token": "JUP"}), json!({}));
        mem.add(MemoryKind::Trade, json!({"token": "SOL", "size": 100.0}), json!({}));

        let context = RecallContext {
            token: Some("SOL".to_string()),
            ..RecallContext::default()
        };
        let all = mem.get_relevant_memories(&context, 10, None);
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].token(), Some("JUP"));

        let trades = mem.get_relevant_memories(&context, 10, Some(&[MemoryKind::Trade]));
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].kind, MemoryKind::Trade);

        assert_eq!(mem.get_relevant_memories(&context, 1, None).len(), 1);
    }

    #[test]
    fn test_consolidation_merges_groups() {
        let mut mem = memory(0);
        mem.add(MemoryKind::Trade, json!({"token": "SOL", "price": 90.0, "side": "buy"}), json!({}));
        mem.add(MemoryKind::Trade, json!({"token": "SOL", "price": 100.0, "side": "sell"}), json!({}));
        mem.add(MemoryKind::Analysis, json!({"token": "JUP"}), json!({}));
        mem.consolidate();

        assert_eq!(mem.short_term_len(), 1);
        let merged = &mem.get_recent_memories(1)[0];
        assert_eq!(merged.data["price"], 95.0);
        assert_eq!(merged.data["side"], "sell");
        assert_eq!(merged.data["merged_count"], 2);
    }

    #[test]
    fn test_auto_consolidation() {
        let mut mem = memory(4);
        for _ in 0..4 {
            mem.add(MemoryKind::Decision, json!({"token": "BONK", "confidence": 0.5}), json!({}));
        }
        assert_eq!(mem.short_term_len(), 1);
    }
}
