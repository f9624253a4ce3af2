use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Error, Result};
use crate::tokens::SUPPORTED_PAIRS;

/// Agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub dex: DexConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub paper: PaperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_chain_id")]
    pub chain_id: String,
    #[serde(default = "default_chain_name")]
    pub name: String,
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_native_token")]
    pub native_token: String,
    #[serde(default = "default_explorer_url")]
    pub explorer_url: String,
}

/// OpenAI-compatible chat endpoint (GaiaNet node by default)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexConfig {
    #[serde(default = "default_jupiter_url")]
    pub api_url: String,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u16,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Serve fixed reference prices instead of live quotes
    #[serde(default = "default_true")]
    pub simulated: bool,
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,
    #[serde(default = "default_risk_tolerance")]
    pub risk_tolerance: f64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Maximum accepted price impact as a fraction (0.01 = 1%)
    #[serde(default = "default_slippage_tolerance")]
    pub slippage_tolerance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_position_size")]
    pub max_position_size_usd: f64,
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss_usd: f64,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_after_losses_secs: u64,
    #[serde(default = "default_consecutive_loss_limit")]
    pub consecutive_loss_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_pairs")]
    pub pairs: Vec<String>,
    #[serde(default = "default_capital")]
    pub capital: f64,
    /// Fraction of capital committed per buy signal
    #[serde(default = "default_risk_factor")]
    pub risk_factor: f64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default)]
    pub show_reasoning: bool,
    #[serde(default = "default_lookback")]
    pub lookback_period: usize,
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Solana CLI keypair file (JSON array of 64 bytes)
    #[serde(default)]
    pub keypair_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_max_size")]
    pub max_size: usize,
    #[serde(default = "default_importance_threshold")]
    pub importance_threshold: f64,
    #[serde(default = "default_consolidation_interval")]
    pub consolidation_interval: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,
    #[serde(default)]
    pub fee_bps: u16,
}

fn default_chain_id() -> String {
    "solana".to_string()
}

fn default_chain_name() -> String {
    "Solana".to_string()
}

fn default_rpc_url() -> String {
    "https://api.mainnet-beta.solana.com".to_string()
}

fn default_native_token() -> String {
    "SOL".to_string()
}

fn default_explorer_url() -> String {
    "https://solscan.io".to_string()
}

fn default_llm_base_url() -> String {
    "https://0xe7d21e1bd35163c0bcdc6d5ea8c23f3c277f2d17.us.gaianet.network/v1".to_string()
}

fn default_llm_model() -> String {
    "Meta-Llama-3-8B-Instruct-Q5_K_M".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    500
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_jupiter_url() -> String {
    "https://quote-api.jup.ag/v6".to_string()
}

fn default_slippage_bps() -> u16 {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_requests_per_window() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_position_size() -> f64 {
    10_000.0
}

fn default_risk_tolerance() -> f64 {
    0.7
}

fn default_min_confidence() -> f64 {
    0.7
}

fn default_slippage_tolerance() -> f64 {
    0.01
}

fn default_max_daily_loss() -> f64 {
    500.0
}

fn default_max_open_positions() -> usize {
    3
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_consecutive_loss_limit() -> u32 {
    3
}

fn default_pairs() -> Vec<String> {
    SUPPORTED_PAIRS.iter().map(|p| p.to_string()).collect()
}

fn default_capital() -> f64 {
    1000.0
}

fn default_risk_factor() -> f64 {
    0.5
}

fn default_interval_secs() -> u64 {
    300
}

fn default_lookback() -> usize {
    100
}

fn default_risk_free_rate() -> f64 {
    0.03
}

fn default_memory_max_size() -> usize {
    1000
}

fn default_importance_threshold() -> f64 {
    0.5
}

fn default_consolidation_interval() -> usize {
    100
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("paper_trades.jsonl")
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            name: default_chain_name(),
            rpc_url: default_rpc_url(),
            native_token: default_native_token(),
            explorer_url: default_explorer_url(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for DexConfig {
    fn default() -> Self {
        Self {
            api_url: default_jupiter_url(),
            slippage_bps: default_slippage_bps(),
            max_retries: default_max_retries(),
            simulated: true,
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            max_position_size: default_max_position_size(),
            risk_tolerance: default_risk_tolerance(),
            min_confidence: default_min_confidence(),
            slippage_tolerance: default_slippage_tolerance(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size_usd: default_max_position_size(),
            max_daily_loss_usd: default_max_daily_loss(),
            max_open_positions: default_max_open_positions(),
            cooldown_after_losses_secs: default_cooldown_secs(),
            consecutive_loss_limit: default_consecutive_loss_limit(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            pairs: default_pairs(),
            capital: default_capital(),
            risk_factor: default_risk_factor(),
            interval_secs: default_interval_secs(),
            dry_run: true,
            show_reasoning: false,
            lookback_period: default_lookback(),
            risk_free_rate: default_risk_free_rate(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_size: default_memory_max_size(),
            importance_threshold: default_importance_threshold(),
            consolidation_interval: default_consolidation_interval(),
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            journal_path: default_journal_path(),
            fee_bps: 0,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        info!(
            path = %path.as_ref().display(),
            pairs = ?config.agent.pairs,
            simulated = config.dex.simulated,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = non_empty("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(key) = non_empty("LLM_API_KEY")
            .or_else(|| non_empty("GAIANET_API_KEY"))
            .or_else(|| non_empty("OPENAI_API_KEY"))
        {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = non_empty("RPC_URL") {
            self.chain.rpc_url = url;
        }
        if let Some(url) = non_empty("JUPITER_API_URL") {
            self.dex.api_url = url;
        }
        if let Some(path) = non_empty("SOLANA_KEYPAIR_PATH") {
            self.wallet.keypair_path = Some(PathBuf::from(path));
        }
    }

    /// Check the run parameters before the agent starts trading
    pub fn validate(&self) -> Result<()> {
        let agent = &self.agent;
        if !(agent.capital > 0.0) {
            return Err(Error::validation("capital", "must be positive"));
        }
        if !(0.0..=1.0).contains(&agent.risk_factor) {
            return Err(Error::validation("risk", "must be between 0 and 1"));
        }
        if agent.interval_secs < 10 {
            return Err(Error::validation("interval", "must be at least 10 seconds"));
        }
        if agent.pairs.is_empty() {
            return Err(Error::validation("pairs", "at least one pair is required"));
        }
        let invalid: Vec<&str> = agent
            .pairs
            .iter()
            .map(String::as_str)
            .filter(|p| !SUPPORTED_PAIRS.iter().any(|s| s.eq_ignore_ascii_case(p)))
            .collect();
        if !invalid.is_empty() {
            return Err(Error::validation(
                "pairs",
                format!(
                    "unsupported {}; supported pairs are {}",
                    invalid.join(", "),
                    SUPPORTED_PAIRS.join(", ")
                ),
            ));
        }
        if !(self.trading.slippage_tolerance > 0.0 && self.trading.slippage_tolerance < 1.0) {
            return Err(Error::validation("slippage_tolerance", "must be in (0, 1)"));
        }
        if !(0.0..=1.0).contains(&self.trading.min_confidence) {
            return Err(Error::validation("min_confidence", "must be between 0 and 1"));
        }
        Ok(())
    }

    /// Trading pairs normalised to upper-case symbols
    pub fn pairs(&self) -> Vec<String> {
        self.agent.pairs.iter().map(|p| p.to_uppercase()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.chain.chain_id, "solana");
        assert_eq!(config.chain.rpc_url, "https://api.mainnet-beta.solana.com");
        assert_eq!(config.dex.api_url, "https://quote-api.jup.ag/v6");
        assert_eq!(config.dex.slippage_bps, 50);
        assert_eq!(config.trading.min_confidence, 0.7);
        assert_eq!(config.agent.interval_secs, 300);
        assert_eq!(config.agent.pairs, vec!["SOL", "BONK", "JUP"]);
        assert_eq!(config.memory.max_size, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[agent]
pairs = ["SOL"]
capital = 2500.0
interval_secs = 60

[dex]
simulated = false
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.agent.pairs, vec!["SOL"]);
        assert_eq!(config.agent.capital, 2500.0);
        assert_eq!(config.agent.risk_factor, 0.5);
        assert!(!config.dex.simulated);
        assert_eq!(config.dex.max_retries, 3);
        assert_eq!(config.llm.model, "Meta-Llama-3-8B-Instruct-Q5_K_M");
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file("/nonexistent/solhedge.toml");
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LLM_BASE_URL", "http://localhost:8080/v1"),
            ("OPENAI_API_KEY", "sk-openai"),
            ("RPC_URL", "http://localhost:8899"),
            ("SOLANA_KEYPAIR_PATH", "/tmp/id.json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.llm.base_url, "http://localhost:8080/v1");
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(config.chain.rpc_url, "http://localhost:8899");
        assert_eq!(
            config.wallet.keypair_path,
            Some(PathBuf::from("/tmp/id.json"))
        );
    }

    #[test]
    fn test_llm_key_precedence() {
        let vars: HashMap<&str, &str> = [("LLM_API_KEY", "primary"), ("OPENAI_API_KEY", "fallback")]
            .into_iter()
            .collect();
        let mut config = Config::default();
        config.apply_env_from(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.llm.api_key.as_deref(), Some("primary"));
    }

    #[test]
    fn test_empty_env_ignored() {
        let mut config = Config::default();
        config.apply_env_from(|_| Some("  ".to_string()));
        assert_eq!(config.chain.rpc_url, default_rpc_url());
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn test_validate_capital() {
        let mut config = Config::default();
        config.agent.capital = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("capital"));
    }

    #[test]
    fn test_validate_risk() {
        let mut config = Config::default();
        config.agent.risk_factor = 1.5;
        assert!(config.validate().is_err());
        config.agent.risk_factor = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_interval() {
        let mut config = Config::default();
        config.agent.interval_secs = 9;
        assert!(config.validate().is_err());
        config.agent.interval_secs = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_pairs() {
        let mut config = Config::default();
        config.agent.pairs = vec!["SOL".to_string(), "DOGE".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("DOGE"));

        config.agent.pairs = vec!["sol".to_string(), "jup".to_string()];
        assert!(config.validate().is_ok());
        assert_eq!(config.pairs(), vec!["SOL", "JUP"]);
    }
}
