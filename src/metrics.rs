use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Runtime counters for the trading agent
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentMetrics {
    pub uptime_sec: u64,
    pub cycles: u64,
    pub trades_executed: u64,
    pub trades_failed: u64,
    pub llm_requests: u64,
    pub llm_failures: u64,
    pub memory_bytes: u64,
    pub custom: HashMap<String, f64>,
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update resident memory from the process status
    pub fn update_memory(&mut self) {
        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
                let rss_kb = status
                    .lines()
                    .find(|line| line.starts_with("VmRSS:"))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok());
                if let Some(kb) = rss_kb {
                    self.memory_bytes = kb * 1024;
                }
            }
        }
    }

    pub fn record_cycle(&mut self) {
        self.cycles += 1;
    }

    pub fn record_trade(&mut self, success: bool) {
        if success {
            self.trades_executed += 1;
        } else {
            self.trades_failed += 1;
        }
    }

    pub fn record_llm(&mut self, success: bool) {
        self.llm_requests += 1;
        if !success {
            self.llm_failures += 1;
        }
    }

    pub fn set_custom(&mut self, key: impl Into<String>, value: f64) {
        self.custom.insert(key.into(), value);
    }

    /// Trade success rate as a percentage; 100 before any trade
    pub fn success_rate(&self) -> f64 {
        let total = self.trades_executed + self.trades_failed;
        if total == 0 {
            return 100.0;
        }
        (self.trades_executed as f64 / total as f64) * 100.0
    }

    pub fn increment_uptime(&mut self, seconds: u64) {
        self.uptime_sec += seconds;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = AgentMetrics::new();
        assert_eq!(metrics.cycles, 0);
        assert_eq!(metrics.trades_executed, 0);
        assert_eq!(metrics.llm_requests, 0);
        assert!(metrics.custom.is_empty());
    }

    #[test]
    fn test_record_trades() {
        let mut metrics = AgentMetrics::new();
        metrics.record_trade(true);
        metrics.record_trade(true);
        metrics.record_trade(false);
        metrics.record_trade(true);
        assert_eq!(metrics.trades_executed, 3);
        assert_eq!(metrics.trades_failed, 1);
        assert_eq!(metrics.success_rate(), 75.0);
    }

    #[test]
    fn test_success_rate_without_trades() {
        assert_eq!(AgentMetrics::new().success_rate(), 100.0);
    }

    #[test]
    fn test_record_llm() {
        let mut metrics = AgentMetrics::new();
        metrics.record_llm(true);
        metrics.record_llm(false);
        assert_eq!(metrics.llm_requests, 2);
        assert_eq!(metrics.llm_failures, 1);
    }

    #[test]
    fn test_cycles_and_uptime() {
        let mut metrics = AgentMetrics::new();
        metrics.record_cycle();
        metrics.record_cycle();
        metrics.increment_uptime(300);
        metrics.increment_uptime(300);
        assert_eq!(metrics.cycles, 2);
        assert_eq!(metrics.uptime_sec, 600);
    }

    #[test]
    fn test_custom_overwrite() {
        let mut metrics = AgentMetrics::new();
        metrics.set_custom("portfolio_value", 1000.0);
        metrics.set_custom("portfolio_value", 1010.0);
        assert_eq!(metrics.custom.len(), 1);
        assert_eq!(metrics.custom.get("portfolio_value"), Some(&1010.0));
    }

    #[test]
    fn test_update_memory_does_not_panic() {
        let mut metrics = AgentMetrics::new();
        metrics.update_memory();
    }

    #[test]
    fn test_serialization() {
        let mut metrics = AgentMetrics::new();
        metrics.record_trade(true);
        metrics.set_custom("total_value", 123.45);
        let json = serde_json::to_string(&metrics).unwrap();
        let back: AgentMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(back.trades_executed, 1);
        assert_eq!(back.custom.get("total_value"), Some(&123.45));
    }
}
