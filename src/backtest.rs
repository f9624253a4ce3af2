//! Historical replay of the strategy engine over hourly price data.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::analyzer::{LiquidityMetrics, MarketAnalyzer};
use crate::error::{Error, Result};
use crate::history::PriceHistory;
use crate::indicators;
use crate::jupiter::TokenMetrics;
use crate::portfolio::{Portfolio, PortfolioState, Side};
use crate::strategy::{MarketSnapshot, Signal, StrategyEngine, TokenSnapshot};
use crate::tokens;

const DAY_SAMPLES: usize = 24;

#[derive(Debug, Deserialize)]
struct PriceRow {
    timestamp: String,
    token: String,
    price: f64,
}

/// Per-token price observations keyed by time
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    series: BTreeMap<String, BTreeMap<DateTime<Utc>, f64>>,
}

impl PriceSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `timestamp,token,price` rows; timestamps are RFC 3339 or unix seconds
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut series = Self::new();
        for row in rdr.deserialize::<PriceRow>() {
            let row = row?;
            let timestamp = parse_timestamp(&row.timestamp)?;
            if !(row.price > 0.0) {
                return Err(Error::validation("price", format!("{} at {} must be positive", row.price, row.timestamp)));
            }
            series.insert(&row.token, timestamp, row.price);
        }
        Ok(series)
    }

    pub fn insert(&mut self, token: &str, timestamp: DateTime<Utc>, price: f64) {
        self.series
            .entry(token.to_uppercase())
            .or_default()
            .insert(timestamp, price);
    }

    /// Last observed price at or before `at`
    pub fn price_at(&self, token: &str, at: DateTime<Utc>) -> Option<f64> {
        self.series
            .get(&token.to_uppercase())?
            .range(..=at)
            .next_back()
            .map(|(_, p)| *p)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.series.keys().cloned().collect()
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.series.values().filter_map(|s| s.keys().next().copied()).min()
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.series.values().filter_map(|s| s.keys().next_back().copied()).max()
    }

    pub fn len(&self) -> usize {
        self.series.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .ok_or_else(|| Error::validation("timestamp", format!("unrecognised timestamp {:?}", raw)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestSettings {
    pub pairs: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_capital: f64,
    /// Fraction of cash committed per buy
    pub risk_factor: f64,
    pub risk_free_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeExecution {
    pub timestamp: DateTime<Utc>,
    pub token: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub realized_pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub total_return: f64,
    pub final_value: f64,
    pub trades: usize,
    /// Largest peak-to-trough decline of portfolio value, as a positive fraction
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    /// Fraction of sells closed at a profit
    pub win_rate: f64,
}

pub struct Backtester {
    settings: BacktestSettings,
    series: PriceSeries,
    engine: StrategyEngine,
    analyzer: MarketAnalyzer,
    portfolio: Portfolio,
    history: PriceHistory,
    portfolio_history: Vec<PortfolioState>,
    trades: Vec<TradeExecution>,
}

impl Backtester {
    pub fn new(
        settings: BacktestSettings,
        series: PriceSeries,
        engine: StrategyEngine,
        analyzer: MarketAnalyzer,
    ) -> Self {
        Self {
            portfolio: Portfolio::new(settings.initial_capital),
            history: PriceHistory::new(analyzer.lookback_period()),
            settings,
            series,
            engine,
            analyzer,
            portfolio_history: Vec::new(),
            trades: Vec::new(),
        }
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn portfolio_history(&self) -> &[PortfolioState] {
        &self.portfolio_history
    }

    pub fn trades(&self) -> &[TradeExecution] {
        &self.trades
    }

    /// Fill at `price` without slippage or fees; buys need the cash, sells the holding
    pub fn execute_trade(
        &mut self,
        token: &str,
        side: Side,
        quantity: f64,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Option<TradeExecution> {
        if !(quantity > 0.0) || !(price > 0.0) {
            return None;
        }
        let fill = match side {
            Side::Buy if quantity * price <= self.portfolio.cash() => {
                self.portfolio.buy(token, quantity, price, 0.0).ok()?
            }
            Side::Sell if quantity <= self.portfolio.position(token) => {
                self.portfolio.sell(token, quantity, price, 0.0).ok()?
            }
            _ => return None,
        };
        Some(TradeExecution {
            timestamp,
            token: fill.token,
            side: fill.side,
            quantity: fill.amount,
            price: fill.price,
            realized_pnl: fill.realized_pnl,
        })
    }

    /// Step hourly from start to end inclusive
    pub async fn run(&mut self) -> Result<()> {
        let BacktestSettings { start, end, .. } = self.settings;
        if end < start {
            return Err(Error::validation("end", "backtest end precedes start"));
        }

        let mut liquidity: HashMap<String, LiquidityMetrics> = HashMap::new();
        for token in &self.settings.pairs {
            liquidity.insert(token.clone(), self.analyzer.liquidity_metrics(token).await);
        }

        let steps = (end - start).num_hours();
        info!(
            pairs = ?self.settings.pairs,
            %start,
            %end,
            steps = steps + 1,
            capital = self.settings.initial_capital,
            "starting backtest"
        );

        for step in 0..=steps {
            let now = start + Duration::hours(step);
            let snapshot = self.snapshot(now, &liquidity);

            for signal in self.engine.evaluate_all(&snapshot) {
                let (token, side) = match &signal {
                    Signal::Buy { token, .. } => (token.clone(), Side::Buy),
                    Signal::Sell { token, .. } => (token.clone(), Side::Sell),
                    Signal::Hold => continue,
                };
                let Some(price) = snapshot.tokens.get(&token).map(|s| s.price) else {
                    continue;
                };
                let quantity = match side {
                    Side::Buy => self.settings.risk_factor * self.portfolio.cash() / price,
                    Side::Sell => self.portfolio.position(&token),
                };
                if let Some(trade) = self.execute_trade(&token, side, quantity, price, now) {
                    debug!(token = %trade.token, side = ?trade.side, quantity = trade.quantity, price = trade.price, "backtest trade");
                    self.trades.push(trade);
                }
            }

            let prices: HashMap<String, f64> = snapshot
                .tokens
                .iter()
                .map(|(t, s)| (t.clone(), s.price))
                .collect();
            let value = self.portfolio.mark_to_market(&prices);
            self.portfolio_history.push(self.portfolio.snapshot(now));
            debug!(time = %now, value, "backtest step");
        }

        info!(
            trades = self.trades.len(),
            final_value = self.portfolio.total_value(),
            "backtest complete"
        );
        Ok(())
    }

    fn snapshot(&mut self, now: DateTime<Utc>, liquidity: &HashMap<String, LiquidityMetrics>) -> MarketSnapshot {
        let mut snapshot = MarketSnapshot::new(now);
        for token in &self.settings.pairs {
            let Some(price) = self.series.price_at(token, now) else {
                continue;
            };
            self.history.record(token, now, price);
            let prices = self.history.prices(token);

            let reference = tokens::reference_market(token);
            let metrics = TokenMetrics {
                price,
                volume_24h: reference.volume_24h,
                liquidity: reference.liquidity,
                ..TokenMetrics::default()
            };
            let technical = self.analyzer.technical_indicators(&prices);
            let risk = self.analyzer.risk_metrics(&prices, &metrics);
            let depth = liquidity.get(token).copied().unwrap_or_default();
            let signal = self.analyzer.generate_trading_signals(&technical, &risk, &depth);

            snapshot.insert(
                token.clone(),
                TokenSnapshot {
                    price,
                    price_change_24h: indicators::price_change_pct(&prices, DAY_SAMPLES),
                    liquidity: reference.liquidity,
                    analysis: Some(signal),
                },
            );
        }
        snapshot
    }

    /// `None` until the backtest has produced at least one step
    pub fn analyze_performance(&self) -> Option<BacktestReport> {
        let last = self.portfolio_history.last()?;
        let values: Vec<f64> = self.portfolio_history.iter().map(|s| s.total_value).collect();
        let initial = self.settings.initial_capital;

        let sells: Vec<&TradeExecution> = self.trades.iter().filter(|t| t.side == Side::Sell).collect();
        let wins = sells.iter().filter(|t| t.realized_pnl > 0.0).count();

        let report = BacktestReport {
            total_return: if initial > 0.0 {
                (last.total_value - initial) / initial
            } else {
                0.0
            },
            final_value: last.total_value,
            trades: self.trades.len(),
            max_drawdown: indicators::max_drawdown(&values).abs(),
            sharpe_ratio: indicators::sharpe_ratio(&indicators::pct_change(&values), self.settings.risk_free_rate),
            win_rate: if sells.is_empty() {
                0.0
            } else {
                wins as f64 / sells.len() as f64
            },
        };
        info!(
            total_return = report.total_return,
            final_value = report.final_value,
            trades = report.trades,
            max_drawdown = report.max_drawdown,
            "backtest performance"
        );
        Some(report)
    }
}
