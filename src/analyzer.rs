//! Market analysis: indicators, risk metrics, liquidity and trade signals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::history::PriceHistory;
use crate::indicators;
use crate::jupiter::{DepthLevel, PriceFeed, TokenMetrics};

const RSI_PERIOD: usize = 14;
const BOLLINGER_WINDOW: usize = 20;
const MOMENTUM_PERIOD: usize = 14;
const VOLATILITY_WINDOW: usize = 20;
/// Samples covering one day at hourly resolution
const DAY_LOOKBACK: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    pub rsi: f64,
    /// MACD histogram
    pub macd: f64,
    pub bollinger_position: f64,
    pub momentum: f64,
    pub volatility: f64,
}

impl Default for TechnicalIndicators {
    fn default() -> Self {
        Self {
            rsi: 50.0,
            macd: 0.0,
            bollinger_position: 0.5,
            momentum: 0.0,
            volatility: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub value_at_risk: f64,
    pub sharpe_ratio: f64,
    /// Annualised
    pub volatility: f64,
    pub max_drawdown: f64,
    pub liquidity_risk: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LiquidityMetrics {
    /// Largest quoted size whose price impact stays within 2%
    pub depth_2_percent: f64,
    /// Price impact of the smallest quoted size
    pub slippage_impact: f64,
    pub maker_volume: f64,
    pub taker_volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub action: TradeAction,
    pub confidence: f64,
    pub signal_strength: f64,
    pub risk_score: f64,
    pub liquidity_score: f64,
}

impl Default for TradingSignal {
    fn default() -> Self {
        Self {
            action: TradeAction::Hold,
            confidence: 0.0,
            signal_strength: 0.0,
            risk_score: 0.0,
            liquidity_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketAnalysis {
    pub token: String,
    pub price: f64,
    pub volume_24h: f64,
    pub price_change_24h: f64,
    pub technical: TechnicalIndicators,
    pub risk: RiskMetrics,
    pub signals: TradingSignal,
    pub liquidity: LiquidityMetrics,
    pub timestamp: DateTime<Utc>,
}

/// Lightweight per-token summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenScan {
    pub token: String,
    pub current_price: f64,
    pub sma_20: Option<f64>,
    pub price_change_24h: f64,
    pub rsi: f64,
    pub volatility: f64,
    pub liquidity_ratio: f64,
    pub error: Option<String>,
}

pub struct MarketAnalyzer {
    feed: Arc<dyn PriceFeed>,
    lookback_period: usize,
    risk_free_rate: f64,
}

impl MarketAnalyzer {
    pub fn new(feed: Arc<dyn PriceFeed>, lookback_period: usize, risk_free_rate: f64) -> Self {
        Self {
            feed,
            lookback_period: lookback_period.max(2),
            risk_free_rate,
        }
    }

    pub fn lookback_period(&self) -> usize {
        self.lookback_period
    }

    /// Full analysis of one token from live metrics plus recorded history
    pub async fn analyze_token(&self, token: &str, history: &PriceHistory) -> Result<MarketAnalysis> {
        let metrics = self.feed.token_metrics(token).await;
        if let Some(err) = &metrics.error {
            error!(token = %token, error = %err, "cannot analyze token");
            return Err(Error::Quote(format!("{}: {}", token, err)));
        }

        let prices = self.window(token, history, metrics.price);
        let liquidity = self.liquidity_metrics(token).await;
        let technical = self.technical_indicators(&prices);
        let risk = self.risk_metrics(&prices, &metrics);
        let signals = self.generate_trading_signals(&technical, &risk, &liquidity);

        debug!(
            token = %token,
            rsi = technical.rsi,
            macd = technical.macd,
            action = ?signals.action,
            confidence = signals.confidence,
            "token analyzed"
        );

        Ok(MarketAnalysis {
            token: token.to_string(),
            price: metrics.price,
            volume_24h: metrics.volume_24h,
            price_change_24h: indicators::price_change_pct(&prices, DAY_LOOKBACK),
            technical,
            risk,
            signals,
            liquidity,
            timestamp: Utc::now(),
        })
    }

    /// Recorded prices within the lookback, falling back to the current price
    fn window(&self, token: &str, history: &PriceHistory, current: f64) -> Vec<f64> {
        let mut prices = history.prices(token);
        if prices.len() > self.lookback_period {
            prices.drain(..prices.len() - self.lookback_period);
        }
        if prices.is_empty() && current > 0.0 {
            prices.push(current);
        }
        prices
    }

    pub fn technical_indicators(&self, prices: &[f64]) -> TechnicalIndicators {
        TechnicalIndicators {
            rsi: indicators::rsi(prices, RSI_PERIOD),
            macd: indicators::macd(prices, 12, 26, 9)
                .map(|m| m.histogram)
                .unwrap_or(0.0),
            bollinger_position: indicators::bollinger_position(prices, BOLLINGER_WINDOW, 2.0),
            momentum: indicators::momentum(prices, MOMENTUM_PERIOD),
            volatility: indicators::volatility(prices, VOLATILITY_WINDOW),
        }
    }

    pub fn risk_metrics(&self, prices: &[f64], metrics: &TokenMetrics) -> RiskMetrics {
        let returns = indicators::pct_change(prices);
        RiskMetrics {
            value_at_risk: indicators::value_at_risk(&returns, 0.95),
            sharpe_ratio: indicators::sharpe_ratio(&returns, self.risk_free_rate),
            volatility: indicators::annualized_volatility(&returns),
            max_drawdown: indicators::max_drawdown(prices),
            liquidity_risk: liquidity_risk(metrics),
        }
    }

    pub async fn liquidity_metrics(&self, token: &str) -> LiquidityMetrics {
        match self.feed.market_depth(token).await {
            Ok(depth) => liquidity_from_depth(&depth),
            Err(e) => {
                warn!(token = %token, error = %e, "depth unavailable, using empty liquidity metrics");
                LiquidityMetrics::default()
            }
        }
    }

    /// Score RSI, MACD, tail risk and depth into a single action
    pub fn generate_trading_signals(
        &self,
        technical: &TechnicalIndicators,
        risk: &RiskMetrics,
        liquidity: &LiquidityMetrics,
    ) -> TradingSignal {
        let mut strength = 0.0;

        if technical.rsi < 30.0 {
            strength += 0.4;
        } else if technical.rsi > 70.0 {
            strength -= 0.4;
        }

        if technical.macd > 0.0 {
            strength += 0.2;
        } else {
            strength -= 0.2;
        }

        let risk_score = 0.3 * (1.0 - (risk.value_at_risk / 0.1).min(1.0));
        let liquidity_score = 0.3 * (liquidity.depth_2_percent / 100_000.0).min(1.0);
        strength += risk_score + liquidity_score;

        let action = if strength > 0.3 {
            TradeAction::Buy
        } else if strength < -0.3 {
            TradeAction::Sell
        } else {
            TradeAction::Hold
        };

        TradingSignal {
            action,
            confidence: strength.abs(),
            signal_strength: strength,
            risk_score,
            liquidity_score,
        }
    }

    /// Quick scan; failures are reported in `TokenScan::error`
    pub async fn scan_token(&self, token: &str, history: &PriceHistory) -> TokenScan {
        let metrics = self.feed.token_metrics(token).await;
        if let Some(err) = metrics.error {
            return TokenScan {
                token: token.to_string(),
                rsi: 50.0,
                error: Some(err),
                ..TokenScan::default()
            };
        }

        let prices = self.window(token, history, metrics.price);
        TokenScan {
            token: token.to_string(),
            current_price: prices.last().copied().unwrap_or(metrics.price),
            sma_20: indicators::sma(&prices, 20),
            price_change_24h: indicators::price_change_pct(&prices, DAY_LOOKBACK),
            rsi: indicators::rsi(&prices, RSI_PERIOD),
            volatility: indicators::rolling_std(&prices, 20).unwrap_or(0.0),
            liquidity_ratio: if metrics.volume_24h > 0.0 {
                metrics.liquidity / metrics.volume_24h
            } else {
                0.0
            },
            error: None,
        }
    }
}

/// Liquidity relative to volume, capped at 1; no volume is treated as maximum risk
pub fn liquidity_risk(metrics: &TokenMetrics) -> f64 {
    if metrics.volume_24h > 0.0 {
        (metrics.liquidity / metrics.volume_24h).min(1.0)
    } else {
        1.0
    }
}

pub fn liquidity_from_depth(depth: &[DepthLevel]) -> LiquidityMetrics {
    let depth_2_percent = depth
        .iter()
        .filter(|l| l.price_impact <= 0.02)
        .map(|l| l.size)
        .fold(0.0, f64::max);
    LiquidityMetrics {
        depth_2_percent,
        slippage_impact: depth.first().map_or(0.0, |l| l.price_impact),
        maker_volume: 0.0,
        taker_volume: 0.0,
    }
}
