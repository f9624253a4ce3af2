//! Jupiter v6 aggregator client: quotes, swap transactions, prices and depth.
//!
//! With `simulated = true` the price, volume, liquidity and depth calls are
//! answered from the reference table in [`crate::tokens`] and never touch the
//! network. Quote and swap calls always go to the configured API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::DexConfig;
use crate::error::{Error, Result};
use crate::ratelimit::RateLimiter;
use crate::tokens::{self, QUOTE_TOKEN};

/// Order sizes (in quote-token units) quoted when measuring depth
pub const DEPTH_SIZES: [f64; 4] = [1_000.0, 10_000.0, 100_000.0, 1_000_000.0];

const HTTP_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapMode {
    ExactIn,
    ExactOut,
}

impl SwapMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapMode::ExactIn => "ExactIn",
            SwapMode::ExactOut => "ExactOut",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    /// Raw base units of the input (ExactIn) or output (ExactOut) token
    pub amount: u64,
    pub slippage_bps: u16,
    pub swap_mode: SwapMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformFee {
    pub amount: String,
    pub fee_bps: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapInfo {
    #[serde(default)]
    pub amm_key: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub input_mint: String,
    #[serde(default)]
    pub output_mint: String,
    #[serde(default)]
    pub in_amount: String,
    #[serde(default)]
    pub out_amount: String,
    #[serde(default)]
    pub fee_amount: String,
    #[serde(default)]
    pub fee_mint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlanStep {
    pub swap_info: SwapInfo,
    #[serde(default)]
    pub percent: u32,
}

/// Quote returned by `/quote`. `raw` is passed back verbatim to `/swap`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub input_mint: String,
    pub in_amount: String,
    pub output_mint: String,
    pub out_amount: String,
    pub other_amount_threshold: String,
    pub swap_mode: String,
    #[serde(default)]
    pub slippage_bps: u16,
    #[serde(default)]
    pub platform_fee: Option<PlatformFee>,
    #[serde(default)]
    pub price_impact_pct: String,
    #[serde(default)]
    pub route_plan: Vec<RoutePlanStep>,
    #[serde(skip)]
    pub raw: Value,
}

impl Quote {
    pub fn from_value(raw: Value) -> Result<Self> {
        let mut quote: Quote = serde_json::from_value(raw.clone())
            .map_err(|e| Error::Quote(format!("malformed quote: {}", e)))?;
        quote.raw = raw;
        Ok(quote)
    }

    pub fn in_amount_raw(&self) -> Result<u64> {
        parse_amount("inAmount", &self.in_amount)
    }

    pub fn out_amount_raw(&self) -> Result<u64> {
        parse_amount("outAmount", &self.out_amount)
    }

    pub fn threshold_raw(&self) -> Result<u64> {
        parse_amount("otherAmountThreshold", &self.other_amount_threshold)
    }

    /// Price impact as reported by Jupiter (percent)
    pub fn price_impact_pct(&self) -> f64 {
        self.price_impact_pct.parse().unwrap_or(0.0)
    }

    /// Price impact as a fraction
    pub fn price_impact(&self) -> f64 {
        self.price_impact_pct() / 100.0
    }

    pub fn platform_fee_raw(&self) -> u64 {
        self.platform_fee
            .as_ref()
            .and_then(|f| f.amount.parse().ok())
            .unwrap_or(0)
    }

    pub fn route_labels(&self) -> Vec<String> {
        self.route_plan
            .iter()
            .map(|s| s.swap_info.label.clone())
            .collect()
    }
}

fn parse_amount(field: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::Quote(format!("invalid {}: {:?}", field, value)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapTransaction {
    /// Base64 unsigned versioned transaction
    pub swap_transaction: String,
    #[serde(default)]
    pub last_valid_block_height: u64,
    #[serde(default)]
    pub prioritization_fee_lamports: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicSlippage {
    pub min_bps: u16,
    pub max_bps: u16,
}

impl DynamicSlippage {
    /// Range from half the requested slippage (at least 10 bps) up to the request
    pub fn for_slippage(slippage_bps: u16) -> Self {
        Self {
            min_bps: (slippage_bps / 2).max(10),
            max_bps: slippage_bps,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SwapOptions {
    pub dynamic_slippage: Option<DynamicSlippage>,
}

/// Quote plus unsigned transaction, ready for signing
#[derive(Debug, Clone)]
pub struct PreparedSwap {
    pub quote: Quote,
    pub transaction: SwapTransaction,
    pub input_amount: f64,
    pub output_amount: f64,
    pub price_impact: f64,
    /// Configured slippage as a fraction
    pub slippage: f64,
}

/// One quoted order size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub size: f64,
    /// Effective quote-token price per token at this size
    pub price: f64,
    /// Fractional price impact
    pub price_impact: f64,
    pub in_amount: u64,
    pub out_amount: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenMetrics {
    pub price: f64,
    pub volume_24h: f64,
    pub liquidity: f64,
    pub holders: u64,
    pub transactions_24h: u64,
    pub error: Option<String>,
}

/// Market data source used by the analyzer and agent
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Price of `token` in USDC
    async fn price(&self, token: &str) -> Result<f64>;

    /// Depth levels, smallest size first
    async fn market_depth(&self, token: &str) -> Result<Vec<DepthLevel>>;

    /// Aggregate metrics; failures are reported in `TokenMetrics::error`
    async fn token_metrics(&self, token: &str) -> TokenMetrics;
}

#[derive(Debug, Clone)]
pub struct JupiterClient {
    config: DexConfig,
    client: Client,
    rate_limiter: RateLimiter,
}

impl JupiterClient {
    pub fn new(config: DexConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let rate_limiter = RateLimiter::new(
            config.requests_per_window,
            Duration::from_secs(config.window_secs),
        );
        Ok(Self {
            config,
            client,
            rate_limiter,
        })
    }

    pub fn config(&self) -> &DexConfig {
        &self.config
    }

    pub fn is_simulated(&self) -> bool {
        self.config.simulated
    }

    /// GET `/quote`
    pub async fn get_quote(&self, req: &QuoteRequest) -> Result<Quote> {
        let url = format!("{}/quote", self.config.api_url);
        let params = [
            ("inputMint", req.input_mint.clone()),
            ("outputMint", req.output_mint.clone()),
            ("amount", req.amount.to_string()),
            ("slippageBps", req.slippage_bps.to_string()),
            ("swapMode", req.swap_mode.as_str().to_string()),
        ];

        debug!(
            input = %req.input_mint,
            output = %req.output_mint,
            amount = req.amount,
            mode = req.swap_mode.as_str(),
            "requesting quote"
        );

        let body = self
            .send_with_retry(|| self.client.get(&url).query(&params))
            .await?;
        Quote::from_value(body)
    }

    /// POST `/swap`
    pub async fn get_swap_transaction(
        &self,
        quote: &Quote,
        user_public_key: &str,
        options: &SwapOptions,
    ) -> Result<SwapTransaction> {
        let url = format!("{}/swap", self.config.api_url);
        let mut payload = serde_json::json!({
            "quoteResponse": quote.raw,
            "userPublicKey": user_public_key,
            "wrapAndUnwrapSol": true,
            "useSharedAccounts": true,
            "dynamicComputeUnitLimit": true,
            "skipUserAccountsRpcCalls": true,
            "prioritizationFeeLamports": "auto",
        });
        if let Some(slippage) = options.dynamic_slippage {
            payload["dynamicSlippage"] = serde_json::to_value(slippage)?;
        }

        let body = self
            .send_with_retry(|| self.client.post(&url).json(&payload))
            .await?;
        let tx: SwapTransaction = serde_json::from_value(body)
            .map_err(|e| Error::Swap(format!("malformed swap response: {}", e)))?;
        if tx.swap_transaction.is_empty() {
            return Err(Error::Swap("empty swapTransaction".to_string()));
        }
        Ok(tx)
    }

    /// POST `/swap-instructions`, returned as raw JSON
    pub async fn get_swap_instructions(&self, quote: &Quote, user_public_key: &str) -> Result<Value> {
        let url = format!("{}/swap-instructions", self.config.api_url);
        let payload = serde_json::json!({
            "quoteResponse": quote.raw,
            "userPublicKey": user_public_key,
            "wrapAndUnwrapSol": true,
            "computeUnitPriceMicroLamports": "auto",
            "dynamicComputeUnitLimit": true,
        });
        self.send_with_retry(|| self.client.post(&url).json(&payload))
            .await
    }

    /// Quote and build an unsigned swap between two tokens.
    ///
    /// `ui_amount` is denominated in the input token, or in the output token
    /// when `exact_out` is set.
    pub async fn prepare_swap(
        &self,
        input: &str,
        output: &str,
        ui_amount: f64,
        user_public_key: &str,
        exact_out: bool,
    ) -> Result<PreparedSwap> {
        let input_mint = tokens::resolve_mint(input);
        let output_mint = tokens::resolve_mint(output);
        let (swap_mode, amount_token) = if exact_out {
            (SwapMode::ExactOut, &output_mint)
        } else {
            (SwapMode::ExactIn, &input_mint)
        };
        let amount = tokens::to_base_units(ui_amount, tokens::decimals(amount_token))
            .filter(|a| *a > 0)
            .ok_or_else(|| Error::validation("amount", format!("{} is not a tradable amount", ui_amount)))?;

        let request = QuoteRequest {
            input_mint: input_mint.clone(),
            output_mint: output_mint.clone(),
            amount,
            slippage_bps: self.config.slippage_bps,
            swap_mode,
        };
        let quote = self.get_quote(&request).await?;

        let options = SwapOptions {
            dynamic_slippage: Some(DynamicSlippage::for_slippage(self.config.slippage_bps)),
        };
        let transaction = self
            .get_swap_transaction(&quote, user_public_key, &options)
            .await?;

        let input_amount = tokens::from_base_units(quote.in_amount_raw()?, tokens::decimals(&input_mint));
        let output_amount = tokens::from_base_units(quote.out_amount_raw()?, tokens::decimals(&output_mint));

        info!(
            input = %input,
            output = %output,
            input_amount,
            output_amount,
            price_impact = quote.price_impact(),
            route = ?quote.route_labels(),
            "swap prepared"
        );

        Ok(PreparedSwap {
            price_impact: quote.price_impact(),
            quote,
            transaction,
            input_amount,
            output_amount,
            slippage: f64::from(self.config.slippage_bps) / 10_000.0,
        })
    }

    /// Price of `token` in `quote_token`; `None` when no quote could be obtained
    pub async fn get_price(&self, token: &str, quote_token: &str) -> Option<f64> {
        match self.fetch_price(token, quote_token).await {
            Ok(price) => Some(price),
            Err(e) => {
                error!(token = %token, error = %e, "failed to get price");
                None
            }
        }
    }

    /// Prices for several tokens in USDC, skipping any that fail
    pub async fn get_prices(&self, symbols: &[String]) -> Vec<(String, f64)> {
        let mut prices = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            if let Some(price) = self.get_price(symbol, QUOTE_TOKEN).await {
                prices.push((symbol.clone(), price));
            }
        }
        prices
    }

    /// 24h volume; only known in simulated mode
    pub fn get_token_volume(&self, token: &str) -> f64 {
        if self.config.simulated {
            tokens::reference_market(token).volume_24h
        } else {
            0.0
        }
    }

    /// Pool liquidity; only known in simulated mode
    pub fn get_token_liquidity(&self, token: &str) -> f64 {
        if self.config.simulated {
            tokens::reference_market(token).liquidity
        } else {
            0.0
        }
    }

    /// Measure depth by quoting increasing sizes of `quote_token` into `token`.
    /// Sizes whose quote fails or is malformed are skipped.
    pub async fn get_market_depth(&self, token: &str, quote_token: &str) -> Result<Vec<DepthLevel>> {
        if self.config.simulated {
            return Ok(simulated_depth(token));
        }

        let token_mint = tokens::resolve_mint(token);
        let quote_mint = tokens::resolve_mint(quote_token);
        let token_decimals = tokens::decimals(&token_mint);
        let quote_decimals = tokens::decimals(&quote_mint);

        let mut levels = Vec::with_capacity(DEPTH_SIZES.len());
        for size in DEPTH_SIZES {
            let Some(amount) = tokens::to_base_units(size, quote_decimals) else {
                continue;
            };
            let request = QuoteRequest {
                input_mint: quote_mint.clone(),
                output_mint: token_mint.clone(),
                amount,
                slippage_bps: self.config.slippage_bps,
                swap_mode: SwapMode::ExactIn,
            };
            let level = self.get_quote(&request).await.and_then(|quote| {
                let in_amount = quote.in_amount_raw()?;
                let out_amount = quote.out_amount_raw()?;
                Ok(DepthLevel {
                    size,
                    price: effective_price(in_amount, quote_decimals, out_amount, token_decimals),
                    price_impact: quote.price_impact(),
                    in_amount,
                    out_amount,
                })
            });
            match level {
                Ok(level) => levels.push(level),
                Err(e) => warn!(token = %token, size, error = %e, "depth quote failed, skipping size"),
            }
        }
        Ok(levels)
    }

    /// Price, volume and liquidity in one call; never fails
    pub async fn get_token_metrics(&self, token: &str) -> TokenMetrics {
        match self.fetch_token_metrics(token).await {
            Ok(metrics) => metrics,
            Err(e) => {
                error!(token = %token, error = %e, "failed to get token metrics");
                TokenMetrics {
                    error: Some(e.to_string()),
                    ..TokenMetrics::default()
                }
            }
        }
    }

    async fn fetch_token_metrics(&self, token: &str) -> Result<TokenMetrics> {
        let price = self.fetch_price(token, QUOTE_TOKEN).await?;

        if self.config.simulated {
            let reference = tokens::reference_market(token);
            return Ok(TokenMetrics {
                price,
                volume_24h: reference.volume_24h,
                liquidity: reference.liquidity,
                ..TokenMetrics::default()
            });
        }

        let depth = self.get_market_depth(token, QUOTE_TOKEN).await?;
        let liquidity = depth
            .iter()
            .map(|l| tokens::from_base_units(l.in_amount, tokens::decimals(QUOTE_TOKEN)))
            .fold(0.0, f64::max);

        Ok(TokenMetrics {
            price,
            volume_24h: liquidity * 0.3,
            liquidity,
            ..TokenMetrics::default()
        })
    }

    async fn fetch_price(&self, token: &str, quote_token: &str) -> Result<f64> {
        if self.config.simulated {
            return Ok(tokens::reference_market(token).price);
        }

        let token_mint = tokens::resolve_mint(token);
        let quote_mint = tokens::resolve_mint(quote_token);
        if token_mint == quote_mint {
            return Ok(1.0);
        }
        let quote_decimals = tokens::decimals(&quote_mint);
        let token_decimals = tokens::decimals(&token_mint);

        // Spend one whole quote token and see how much of `token` it buys
        let request = QuoteRequest {
            input_mint: quote_mint,
            output_mint: token_mint,
            amount: 10u64.pow(quote_decimals),
            slippage_bps: self.config.slippage_bps,
            swap_mode: SwapMode::ExactIn,
        };
        let quote = self.get_quote(&request).await?;
        let price = effective_price(
            quote.in_amount_raw()?,
            quote_decimals,
            quote.out_amount_raw()?,
            token_decimals,
        );
        if price <= 0.0 {
            return Err(Error::Quote(format!("zero output quoting {}", token)));
        }
        Ok(price)
    }

    /// Send a request, backing off on 429 and transport errors
    async fn send_with_retry<F>(&self, build: F) -> Result<Value>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            self.rate_limiter.acquire().await;
            let backoff = Duration::from_millis(500 * 2u64.pow(attempt));
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS && attempt + 1 < HTTP_RETRIES {
                        warn!(attempt, "jupiter rate limited, backing off");
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                        continue;
                    }
                    let text = response.text().await?;
                    if !status.is_success() {
                        return Err(Error::Api {
                            service: "jupiter".to_string(),
                            status: status.as_u16(),
                            body: text,
                        });
                    }
                    return Ok(serde_json::from_str(&text)?);
                }
                Err(e) if attempt + 1 < HTTP_RETRIES && (e.is_timeout() || e.is_connect()) => {
                    warn!(attempt, error = %e, "jupiter request failed, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl PriceFeed for JupiterClient {
    async fn price(&self, token: &str) -> Result<f64> {
        self.fetch_price(token, QUOTE_TOKEN).await
    }

    async fn market_depth(&self, token: &str) -> Result<Vec<DepthLevel>> {
        self.get_market_depth(token, QUOTE_TOKEN).await
    }

    async fn token_metrics(&self, token: &str) -> TokenMetrics {
        self.get_token_metrics(token).await
    }
}

/// Quote-token units paid per whole output token
fn effective_price(in_amount: u64, in_decimals: u32, out_amount: u64, out_decimals: u32) -> f64 {
    let out = tokens::from_base_units(out_amount, out_decimals);
    if out <= 0.0 {
        return 0.0;
    }
    tokens::from_base_units(in_amount, in_decimals) / out
}

fn simulated_depth(token: &str) -> Vec<DepthLevel> {
    let reference = tokens::reference_market(token);
    if reference.price <= 0.0 || reference.liquidity <= 0.0 {
        return Vec::new();
    }
    let token_decimals = tokens::decimals(token);
    let quote_decimals = tokens::decimals(QUOTE_TOKEN);
    DEPTH_SIZES
        .iter()
        .map(|&size| {
            let price_impact = (size / reference.liquidity).min(1.0);
            let price = reference.price * (1.0 + price_impact);
            DepthLevel {
                size,
                price,
                price_impact,
                in_amount: tokens::to_base_units(size, quote_decimals).unwrap_or(0),
                out_amount: tokens::to_base_units(size / price, token_decimals).unwrap_or(0),
            }
        })
        .collect()
}
