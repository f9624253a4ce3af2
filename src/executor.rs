//! Live swap execution through Jupiter and Solana RPC.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::jupiter::{JupiterClient, QuoteRequest, SwapMode};
use crate::rpc::SolanaRpc;
use crate::tokens::{self, QUOTE_TOKEN};
use crate::wallet::Keypair;

/// Base fee per signature
const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub success: bool,
    pub tx_signature: Option<String>,
    pub input_amount: f64,
    pub output_amount: f64,
    /// USDC per token for the non-USDC leg
    pub executed_price: Option<f64>,
    pub price_impact: f64,
    pub error: Option<String>,
}

impl TradeResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxState {
    Confirmed,
    Processed,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub status: TxState,
    pub confirmations: Option<u64>,
    pub slot: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwapSimulation {
    pub success: bool,
    pub input_amount: f64,
    pub output_amount: f64,
    pub price_impact: f64,
    /// Worst-case output after slippage
    pub minimum_output: f64,
    /// SOL
    pub network_fee: f64,
    /// In output-token units
    pub platform_fee: f64,
    pub error: Option<String>,
}

pub struct JupiterExecutor {
    client: JupiterClient,
    rpc: SolanaRpc,
    keypair: Keypair,
    max_retries: u32,
    retry_base: Duration,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

impl JupiterExecutor {
    pub fn new(client: JupiterClient, rpc: SolanaRpc, keypair: Keypair) -> Self {
        let max_retries = client.config().max_retries.max(1);
        Self {
            client,
            rpc,
            keypair,
            max_retries,
            retry_base: Duration::from_secs(1),
            confirm_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
        }
    }

    /// Override retry and confirmation timing
    pub fn with_timing(mut self, retry_base: Duration, confirm_timeout: Duration, poll_interval: Duration) -> Self {
        self.retry_base = retry_base;
        self.confirm_timeout = confirm_timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn wallet_pubkey(&self) -> String {
        self.keypair.pubkey()
    }

    /// Swap `ui_amount` of `input` into `output`, retrying with exponential backoff.
    /// With `exact_out`, `ui_amount` is the desired output.
    pub async fn execute_trade(&self, input: &str, output: &str, ui_amount: f64, exact_out: bool) -> TradeResult {
        if !(ui_amount > 0.0) {
            return TradeResult::failed(format!("invalid amount {}", ui_amount));
        }

        let mut last_error = String::new();
        for attempt in 0..self.max_retries {
            match self.try_execute(input, output, ui_amount, exact_out).await {
                Ok(result) => return result,
                Err(e) => {
                    warn!(attempt = attempt + 1, max = self.max_retries, error = %e, "swap attempt failed");
                    last_error = e.to_string();
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(self.retry_base * 2u32.pow(attempt)).await;
                    }
                }
            }
        }

        error!(input = %input, output = %output, error = %last_error, "swap failed after retries");
        TradeResult::failed(last_error)
    }

    async fn try_execute(&self, input: &str, output: &str, ui_amount: f64, exact_out: bool) -> Result<TradeResult> {
        let prepared = self
            .client
            .prepare_swap(input, output, ui_amount, &self.keypair.pubkey(), exact_out)
            .await?;
        let signed = self
            .keypair
            .sign_transaction(&prepared.transaction.swap_transaction)?;
        let signature = self.rpc.send_transaction(&signed.base64).await?;

        let status = self.wait_for_confirmation(&signature).await;
        match status.status {
            TxState::Confirmed => {}
            TxState::Failed => {
                return Err(Error::Swap(format!(
                    "transaction {} failed: {}",
                    signature,
                    status.error.unwrap_or_default()
                )));
            }
            // Sent but unconfirmed: never resend
            TxState::Processed | TxState::Unknown => {
                warn!(signature = %signature, status = ?status.status, "swap not confirmed before timeout");
                return Ok(TradeResult {
                    success: false,
                    error: Some(format!(
                        "unconfirmed: transaction {} not confirmed within {}s",
                        signature,
                        self.confirm_timeout.as_secs_f64()
                    )),
                    tx_signature: Some(signature),
                    price_impact: prepared.price_impact,
                    ..TradeResult::default()
                });
            }
        }

        let executed_price = executed_price(input, prepared.input_amount, prepared.output_amount);
        info!(
            signature = %signature,
            input = %input,
            output = %output,
            input_amount = prepared.input_amount,
            output_amount = prepared.output_amount,
            status = ?status.status,
            "swap executed"
        );

        Ok(TradeResult {
            success: true,
            tx_signature: Some(signature),
            input_amount: prepared.input_amount,
            output_amount: prepared.output_amount,
            executed_price,
            price_impact: prepared.price_impact,
            error: None,
        })
    }

    /// Poll until the transaction confirms, fails, or the timeout elapses
    pub async fn wait_for_confirmation(&self, signature: &str) -> TransactionStatus {
        let started = Instant::now();
        loop {
            let status = self.check_transaction_status(signature).await;
            match status.status {
                TxState::Confirmed | TxState::Failed => return status,
                _ if started.elapsed() >= self.confirm_timeout => return status,
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    pub async fn check_transaction_status(&self, signature: &str) -> TransactionStatus {
        match self.rpc.get_signature_status(signature).await {
            Ok(Some(status)) => {
                let state = if status.err.is_some() {
                    TxState::Failed
                } else {
                    match status.confirmation_status.as_deref() {
                        Some("confirmed") | Some("finalized") => TxState::Confirmed,
                        Some("processed") => TxState::Processed,
                        _ => TxState::Unknown,
                    }
                };
                TransactionStatus {
                    status: state,
                    confirmations: status.confirmations,
                    slot: Some(status.slot),
                    error: status.err.map(|e| e.to_string()),
                }
            }
            Ok(None) => TransactionStatus {
                status: TxState::Unknown,
                confirmations: None,
                slot: None,
                error: None,
            },
            Err(e) => {
                warn!(signature = %signature, error = %e, "status check failed");
                TransactionStatus {
                    status: TxState::Unknown,
                    confirmations: None,
                    slot: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Quote a swap without building or sending a transaction
    pub async fn simulate_swap(&self, input: &str, output: &str, ui_amount: f64) -> SwapSimulation {
        match self.try_simulate(input, output, ui_amount).await {
            Ok(sim) => sim,
            Err(e) => {
                error!(input = %input, output = %output, error = %e, "swap simulation failed");
                SwapSimulation {
                    success: false,
                    error: Some(e.to_string()),
                    ..SwapSimulation::default()
                }
            }
        }
    }

    async fn try_simulate(&self, input: &str, output: &str, ui_amount: f64) -> Result<SwapSimulation> {
        let input_mint = tokens::resolve_mint(input);
        let output_mint = tokens::resolve_mint(output);
        let in_decimals = tokens::decimals(&input_mint);
        let out_decimals = tokens::decimals(&output_mint);
        let amount = tokens::to_base_units(ui_amount, in_decimals)
            .filter(|a| *a > 0)
            .ok_or_else(|| Error::validation("amount", format!("{} is not a tradable amount", ui_amount)))?;

        let quote = self
            .client
            .get_quote(&QuoteRequest {
                input_mint,
                output_mint,
                amount,
                slippage_bps: self.client.config().slippage_bps,
                swap_mode: SwapMode::ExactIn,
            })
            .await?;

        Ok(SwapSimulation {
            success: true,
            input_amount: tokens::from_base_units(quote.in_amount_raw()?, in_decimals),
            output_amount: tokens::from_base_units(quote.out_amount_raw()?, out_decimals),
            price_impact: quote.price_impact(),
            minimum_output: tokens::from_base_units(quote.threshold_raw()?, out_decimals),
            network_fee: tokens::from_base_units(LAMPORTS_PER_SIGNATURE, tokens::decimals("SOL")),
            platform_fee: tokens::from_base_units(quote.platform_fee_raw(), out_decimals),
            error: None,
        })
    }

    /// Both amounts positive and the minimum not above the input
    pub fn validate_amounts(amount_in: f64, min_amount: f64) -> bool {
        amount_in > 0.0 && min_amount > 0.0 && min_amount <= amount_in
    }
}

/// USDC paid or received per unit of the traded token
fn executed_price(input: &str, input_amount: f64, output_amount: f64) -> Option<f64> {
    let input_is_quote = tokens::resolve_mint(input) == tokens::resolve_mint(QUOTE_TOKEN);
    let (usdc, token) = if input_is_quote {
        (input_amount, output_amount)
    } else {
        (output_amount, input_amount)
    };
    (token > 0.0).then(|| usdc / token)
}
