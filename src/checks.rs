//! Pre-flight environment checks for the `check` command.

use serde::Serialize;
use tracing::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::jupiter::{JupiterClient, QuoteRequest, SwapMode};
use crate::llm::ChatClient;
use crate::rpc::SolanaRpc;
use crate::tokens;

pub const REQUIRED_ENV_VARS: [&str; 3] = ["OPENAI_API_KEY", "HELIUS_API_KEY", "GAIANET_API_KEY"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn from_result(name: &str, result: Result<String>) -> Self {
        let (passed, detail) = match result {
            Ok(detail) => (true, detail),
            Err(e) => (false, e.to_string()),
        };
        let check = Self {
            name: name.to_string(),
            passed,
            detail,
        };
        check.log();
        check
    }

    fn log(&self) {
        if self.passed {
            info!(detail = %self.detail, "✅ {}", self.name);
        } else {
            error!(detail = %self.detail, "❌ {}", self.name);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub results: Vec<CheckResult>,
}

impl CheckReport {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    /// 0 when every check passed, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.all_passed() {
            0
        } else {
            1
        }
    }
}

/// Every required variable must be present and non-empty
pub fn check_env_vars<F>(lookup: F) -> CheckResult
where
    F: Fn(&str) -> Option<String>,
{
    let missing: Vec<&str> = REQUIRED_ENV_VARS
        .iter()
        .copied()
        .filter(|var| lookup(*var).map_or(true, |v| v.trim().is_empty()))
        .collect();

    let check = if missing.is_empty() {
        CheckResult {
            name: "Environment variables".to_string(),
            passed: true,
            detail: "all required variables set".to_string(),
        }
    } else {
        CheckResult {
            name: "Environment variables".to_string(),
            passed: false,
            detail: format!("missing environment variables: {}", missing.join(", ")),
        }
    };
    check.log();
    check
}

/// Quote 1 SOL into USDC
pub async fn check_jupiter(client: &JupiterClient) -> CheckResult {
    let result: Result<String> = async {
        let sol = tokens::resolve_mint("SOL");
        let request = QuoteRequest {
            amount: tokens::to_base_units(1.0, tokens::decimals(&sol)).unwrap_or(1_000_000_000),
            input_mint: sol,
            output_mint: tokens::resolve_mint(tokens::QUOTE_TOKEN),
            slippage_bps: client.config().slippage_bps,
            swap_mode: SwapMode::ExactIn,
        };
        let quote = client.get_quote(&request).await?;
        let out = tokens::from_base_units(quote.out_amount_raw()?, tokens::decimals(tokens::QUOTE_TOKEN));
        Ok(format!("1 SOL quotes at {:.4} USDC", out))
    }
    .await;
    CheckResult::from_result("Jupiter API connection", result)
}

pub async fn check_llm(client: &ChatClient) -> CheckResult {
    let result = client
        .ping()
        .await
        .map(|_| format!("{} reachable", client.model()));
    CheckResult::from_result("LLM API connection", result)
}

pub async fn check_rpc(rpc: &SolanaRpc) -> CheckResult {
    let result = rpc.get_health().await.map(|_| format!("{} healthy", rpc.url()));
    CheckResult::from_result("Solana RPC health", result)
}

/// Run every check against the configured endpoints
pub async fn run_checks(config: &Config) -> CheckReport {
    info!("running environment checks");
    let mut results = vec![check_env_vars(|k| std::env::var(k).ok())];

    match JupiterClient::new(config.dex.clone()) {
        Ok(client) => results.push(check_jupiter(&client).await),
        Err(e) => results.push(CheckResult::from_result("Jupiter API connection", Err(e))),
    }
    match ChatClient::new(&config.llm) {
        Ok(client) => results.push(check_llm(&client).await),
        Err(e) => results.push(CheckResult::from_result("LLM API connection", Err(e))),
    }
    match SolanaRpc::new(&config.chain.rpc_url) {
        Ok(rpc) => results.push(check_rpc(&rpc).await),
        Err(e) => results.push(CheckResult::from_result("Solana RPC health", Err(e))),
    }

    let report = CheckReport { results };
    if report.all_passed() {
        info!("✅ all checks passed, the agent is ready to run");
    } else {
        error!("❌ some checks failed, fix the issues above");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DexConfig, LlmConfig};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_env_vars_all_present() {
        let env: HashMap<&str, &str> = REQUIRED_ENV_VARS.iter().map(|k| (*k, "set")).collect();
        let check = check_env_vars(|k| env.get(k).map(|v| v.to_string()));
        assert!(check.passed);
    }

    #[test]
    fn test_env_vars_missing_and_empty() {
        let env: HashMap<&str, &str> = [("OPENAI_API_KEY", "sk"), ("HELIUS_API_KEY", " ")].into_iter().collect();
        let check = check_env_vars(|k| env.get(k).map(|v| v.to_string()));
        assert!(!check.passed);
        assert!(check.detail.contains("HELIUS_API_KEY"));
        assert!(check.detail.contains("GAIANET_API_KEY"));
        assert!(!check.detail.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_report_exit_code() {
        let ok = CheckResult {
            name: "a".to_string(),
            passed: true,
            detail: String::new(),
        };
        let mut report = CheckReport {
            results: vec![ok.clone()],
        };
        assert_eq!(report.exit_code(), 0);
        report.results.push(CheckResult { passed: false, ..ok });
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_jupiter_check_quotes_one_sol() {
        let server = MockServer::start();
        let quote = server.mock(|when, then| {
            when.method(GET)
                .path("/quote")
                .query_param("inputMint", "So11111111111111111111111111111111111111112")
                .query_param("amount", "1000000000");
            then.status(200).json_body(json!({
                "inputMint": "So11111111111111111111111111111111111111112",
                "outputMint": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
                "inAmount": "1000000000",
                "outAmount": "90000000",
                "otherAmountThreshold": "89550000",
                "swapMode": "ExactIn",
                "slippageBps": 50,
                "priceImpactPct": "0.001",
                "routePlan": []
            }));
        });

        let client = JupiterClient::new(DexConfig {
            api_url: server.base_url(),
            ..DexConfig::default()
        })
        .unwrap();
        let check = check_jupiter(&client).await;
        quote.assert();
        assert!(check.passed, "{}", check.detail);
        assert!(check.detail.contains("90.0000"));
    }

    #[tokio::test]
    async fn test_llm_and_rpc_failures() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/models");
            then.status(500);
        });
        server.mock(|when, then| {
            when.method(POST).path("/rpc");
            then.status(200).json_body(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32005, "message": "Node is behind"}
            }));
        });

        let llm = ChatClient::new(&LlmConfig {
            base_url: server.url("/v1"),
            ..LlmConfig::default()
        })
        .unwrap();
        assert!(!check_llm(&llm).await.passed);

        let rpc = SolanaRpc::new(&server.url("/rpc")).unwrap();
        let check = check_rpc(&rpc).await;
        assert!(!check.passed);
        assert!(check.detail.contains("Node is behind"));
    }
}
