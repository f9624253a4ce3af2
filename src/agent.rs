//! The hedge fund agent: gathers market data, reasons with the LLM, sizes
//! trades, gates them through risk limits and fills them on paper or on chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::analyzer::MarketAnalyzer;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::{JupiterExecutor, TradeResult};
use crate::history::PriceHistory;
use crate::indicators;
use crate::jupiter::PriceFeed;
use crate::llm::{extract_json, ChatMessage, LanguageModel};
use crate::memory::{MemoryKind, MemorySystem, RecallContext};
use crate::metrics::AgentMetrics;
use crate::paper::PaperExecutor;
use crate::performance::{PerformanceTracker, TradeRecord};
use crate::portfolio::{Fill, Order, Portfolio, Side};
use crate::risk::RiskManager;
use crate::strategy::{MarketSnapshot, Signal, StrategyEngine, TokenSnapshot};
use crate::tokens::QUOTE_TOKEN;

const SYSTEM_PROMPT: &str = "You are an expert crypto trading AI assistant. \
Analyze market data and provide clear, actionable insights focused on:\n\
- Technical analysis\n\
- Risk assessment\n\
- Market sentiment\n\
- Trading opportunities";
const THINK_MAX_TOKENS: u32 = 500;
const THINK_TEMPERATURE: f64 = 0.7;
const MAX_OBJECTIVES: usize = 5;
const MAX_POSITION_FRACTION: f64 = 0.2;
const MAX_LIQUIDITY_FRACTION: f64 = 0.1;
const RULE_POSITION_FRACTION: f64 = 0.01;
const RULE_MOVE_PCT: f64 = 5.0;
const RULE_CONFIDENCE: f64 = 0.6;
const DEFAULT_DECISION_CONFIDENCE: f64 = 0.5;
const DAY_SAMPLES: usize = 24;
const PERFORMANCE_HISTORY: usize = 1000;
const HIGH_VOLATILITY: f64 = 0.05;
const VOLATILITY_WINDOW: usize = 20;

/// Outcome of one LLM reasoning step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    pub thought: Option<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Thought {
    pub fn text(&self) -> &str {
        self.thought.as_deref().unwrap_or_default()
    }
}

/// Per-token market data gathered for a report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub price: f64,
    pub volume_24h: f64,
    pub liquidity: f64,
    pub holders: u64,
    pub transactions_24h: u64,
    /// Percent, from recorded history
    pub price_change_24h: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketReport {
    pub market_data: BTreeMap<String, MarketData>,
    pub analysis: String,
    pub trades: Vec<Order>,
    pub timestamp: DateTime<Utc>,
}

/// Decision parsed from the model's JSON answer
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct TradeDecision {
    #[serde(default)]
    action: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: String,
}

/// Summary of one trading cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub analysis: String,
    pub signals: Vec<Signal>,
    pub orders: Vec<Order>,
    pub results: BTreeMap<String, TradeResult>,
    pub total_value: f64,
}

pub struct HedgeFundAgent {
    config: Config,
    pairs: Vec<String>,
    feed: Arc<dyn PriceFeed>,
    llm: Arc<dyn LanguageModel>,
    executor: Option<JupiterExecutor>,
    portfolio: Portfolio,
    history: PriceHistory,
    analyzer: MarketAnalyzer,
    strategies: StrategyEngine,
    risk: RiskManager,
    memory: MemorySystem,
    performance: PerformanceTracker,
    metrics: AgentMetrics,
    paper: PaperExecutor,
    objectives: Vec<String>,
    last_thought: Option<Thought>,
}

impl HedgeFundAgent {
    /// Build an agent; live trading (`dry_run = false`) requires an executor
    pub fn new(
        config: Config,
        feed: Arc<dyn PriceFeed>,
        llm: Arc<dyn LanguageModel>,
        executor: Option<JupiterExecutor>,
    ) -> Result<Self> {
        config.validate()?;
        if !config.agent.dry_run && executor.is_none() {
            return Err(Error::Config(
                "live trading requires a wallet keypair; set wallet.keypair_path or use dry run".to_string(),
            ));
        }

        let journal = Some(config.paper.journal_path.clone()).filter(|p| !p.as_os_str().is_empty());
        let capital = config.agent.capital;
        let agent = Self {
            pairs: config.pairs(),
            analyzer: MarketAnalyzer::new(
                feed.clone(),
                config.agent.lookback_period,
                config.agent.risk_free_rate,
            ),
            history: PriceHistory::new(config.agent.lookback_period.max(DAY_SAMPLES + 1)),
            strategies: StrategyEngine::with_defaults(config.trading.min_confidence),
            risk: RiskManager::new(config.risk.clone(), &config.trading),
            memory: MemorySystem::new(config.memory.clone()),
            performance: PerformanceTracker::new(capital, PERFORMANCE_HISTORY, config.agent.risk_free_rate),
            paper: PaperExecutor::new(journal, config.dex.slippage_bps, config.paper.fee_bps),
            portfolio: Portfolio::new(capital),
            metrics: AgentMetrics::new(),
            objectives: Vec::new(),
            last_thought: None,
            feed,
            llm,
            executor,
            config,
        };
        Ok(agent)
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn history(&self) -> &PriceHistory {
        &self.history
    }

    pub fn memory(&self) -> &MemorySystem {
        &self.memory
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    pub fn performance(&self) -> &PerformanceTracker {
        &self.performance
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn risk_mut(&mut self) -> &mut RiskManager {
        &mut self.risk
    }

    pub fn strategies_mut(&mut self) -> &mut StrategyEngine {
        &mut self.strategies
    }

    pub fn paper(&self) -> &PaperExecutor {
        &self.paper
    }

    pub fn objectives(&self) -> &[String] {
        &self.objectives
    }

    pub fn last_thought(&self) -> Option<&Thought> {
        self.last_thought.as_ref()
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.agent.dry_run || self.executor.is_none()
    }

    /// Ask the model about `context`; failures are returned inside the thought
    pub async fn think(&mut self, context: Value) -> Thought {
        let rendered = serde_json::to_string_pretty(&context).unwrap_or_else(|_| context.to_string());
        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Analyze the following market context and provide insights:\n{}",
                rendered
            )),
        ];

        let thought = match self.llm.complete(messages, THINK_MAX_TOKENS, THINK_TEMPERATURE).await {
            Ok(response) => {
                self.metrics.record_llm(true);
                debug!(model = %response.model, tokens = response.completion_tokens, "thought received");
                Thought {
                    thought: Some(response.content),
                    error: None,
                    timestamp: Utc::now(),
                }
            }
            Err(e) => {
                self.metrics.record_llm(false);
                error!(error = %e, "error in thinking process");
                Thought {
                    thought: None,
                    error: Some(e.to_string()),
                    timestamp: Utc::now(),
                }
            }
        };
        self.last_thought = Some(thought.clone());
        thought
    }

    /// Remember an experience and fold any objective updates into the agent
    pub async fn learn(&mut self, experience: Value) {
        self.memory.add(MemoryKind::Experience, experience.clone(), json!({}));
        let thought = self
            .think(json!({ "type": "learning", "experience": experience }))
            .await;

        let updates: Vec<String> = extract_json(thought.text())
            .and_then(|v| v.get("update_objectives").cloned())
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        if !updates.is_empty() {
            self.update_objectives(updates);
        }
    }

    fn update_objectives(&mut self, updates: Vec<String>) {
        for objective in updates {
            if !self.objectives.contains(&objective) {
                self.objectives.push(objective);
            }
        }
        self.objectives.truncate(MAX_OBJECTIVES);
        info!(objectives = ?self.objectives, "objectives updated");
    }

    /// Gather metrics for `tokens`, reason about them and propose rule-based trades
    pub async fn analyze_market(&mut self, tokens: &[String]) -> MarketReport {
        let mut market_data = BTreeMap::new();
        for token in tokens {
            let metrics = self.feed.token_metrics(token).await;
            let data = match metrics.error {
                Some(err) => {
                    error!(token = %token, error = %err, "error getting metrics");
                    MarketData {
                        error: Some(format!("using default data due to API error: {}", err)),
                        ..MarketData::default()
                    }
                }
                None => MarketData {
                    price: metrics.price,
                    volume_24h: metrics.volume_24h,
                    liquidity: metrics.liquidity,
                    holders: metrics.holders,
                    transactions_24h: metrics.transactions_24h,
                    price_change_24h: indicators::price_change_pct(&self.history.prices(token), DAY_SAMPLES),
                    error: None,
                },
            };
            market_data.insert(token.clone(), data);
        }

        let timestamp = Utc::now();
        let thought = self
            .think(json!({
                "type": "market_analysis",
                "data": market_data,
                "portfolio": self.portfolio.snapshot(timestamp),
                "timestamp": timestamp,
            }))
            .await;

        let mut report = MarketReport {
            market_data,
            analysis: thought.text().to_string(),
            trades: Vec::new(),
            timestamp,
        };
        report.trades = self.generate_trades_from_analysis(&report);
        report
    }

    /// Fade 24h moves beyond 5% with a 1% position
    pub fn generate_trades_from_analysis(&self, report: &MarketReport) -> Vec<Order> {
        let position_size = self.portfolio.total_value() * RULE_POSITION_FRACTION;
        let mut trades = Vec::new();

        for (token, data) in &report.market_data {
            if data.error.is_some() || data.price <= 0.0 {
                continue;
            }
            let change = data.price_change_24h;
            let side = if change > RULE_MOVE_PCT {
                Side::Sell
            } else if change < -RULE_MOVE_PCT {
                Side::Buy
            } else {
                continue;
            };
            trades.push(Order {
                token: token.clone(),
                side,
                size_usd: position_size,
                confidence: RULE_CONFIDENCE,
                reason: format!("price {} {:.2}% in 24h", if change > 0.0 { "up" } else { "down" }, change.abs()),
            });
        }
        trades
    }

    /// Ask the model for a buy/sell/hold decision on each configured pair
    pub async fn generate_trades(&mut self, report: &MarketReport) -> Vec<Order> {
        let mut trades = Vec::new();
        for token in self.pairs.clone() {
            let Some(data) = report.market_data.get(&token).filter(|d| d.error.is_none()) else {
                continue;
            };

            let recalled: Vec<Value> = self
                .memory
                .get_relevant_memories(
                    &RecallContext {
                        token: Some(token.clone()),
                        kind: Some(MemoryKind::Trade),
                        market_conditions: self.current_conditions(&token, data.price_change_24h),
                    },
                    3,
                    None,
                )
                .into_iter()
                .map(|m| json!({ "kind": m.kind, "data": m.data }))
                .collect();

            let thought = self
                .think(json!({
                    "type": "trade_decision",
                    "token": token,
                    "data": data,
                    "analysis": report.analysis,
                    "portfolio": self.portfolio.snapshot(Utc::now()),
                    "memories": recalled,
                    "respond_with": "JSON object {\"action\": \"buy|sell|hold\", \"confidence\": 0..1, \"reasoning\": \"...\"}",
                }))
                .await;

            let Some(decision) = extract_json(thought.text())
                .and_then(|v| serde_json::from_value::<TradeDecision>(v).ok())
            else {
                debug!(token = %token, "no structured decision from model");
                continue;
            };

            let side = match decision.action.to_lowercase().as_str() {
                "buy" => Side::Buy,
                "sell" => Side::Sell,
                _ => continue,
            };
            let confidence = decision
                .confidence
                .unwrap_or(DEFAULT_DECISION_CONFIDENCE)
                .clamp(0.0, 1.0);
            trades.push(Order {
                size_usd: self.calculate_trade_size(confidence, data),
                token,
                side,
                confidence,
                reason: decision.reasoning,
            });
        }
        trades
    }

    /// 20% of portfolio value scaled by confidence, capped by liquidity and cash
    pub fn calculate_trade_size(&self, confidence: f64, data: &MarketData) -> f64 {
        let mut size = self.portfolio.total_value() * MAX_POSITION_FRACTION * confidence;
        if data.liquidity > 0.0 {
            size = size.min(data.liquidity * MAX_LIQUIDITY_FRACTION);
        }
        size.min(self.portfolio.cash()).max(0.0)
    }

    /// Risk-gate and fill each order; results are keyed by token
    pub async fn execute_trades(&mut self, trades: &[Order]) -> BTreeMap<String, TradeResult> {
        let mut results = BTreeMap::new();
        for order in trades {
            let result = self.execute_order(order).await;
            results.insert(order.token.clone(), result);
        }
        self.calculate_total_value().await;
        self.performance.record_equity(self.portfolio.total_value());
        results
    }

    async fn execute_order(&mut self, order: &Order) -> TradeResult {
        if !(order.size_usd > 0.0) {
            return TradeResult::failed(format!("order size {:.2} is not tradable", order.size_usd));
        }

        let price = match self.feed.price(&order.token).await {
            Ok(price) if price > 0.0 => price,
            Ok(price) => return TradeResult::failed(format!("invalid price {} for {}", price, order.token)),
            Err(e) => return TradeResult::failed(format!("no price for {}: {}", order.token, e)),
        };

        let is_new = order.side == Side::Buy && self.portfolio.position(&order.token) <= 0.0;
        self.risk.set_open_positions(self.portfolio.open_positions());
        let decision = self.risk.check_order(order.size_usd, is_new);
        if let Some(reason) = decision.reason() {
            info!(token = %order.token, side = ?order.side, reason = %reason, "trade rejected by risk manager");
            return TradeResult::failed(format!("rejected by risk manager: {}", reason));
        }

        let (result, fill) = if self.is_dry_run() {
            self.fill_on_paper(order, price)
        } else {
            self.fill_on_chain(order, price).await
        };

        match fill {
            Some(fill) => self.record_fill(order, &fill),
            None => {
                self.metrics.record_trade(false);
                self.memory.add(
                    MemoryKind::Error,
                    json!({
                        "token": order.token,
                        "side": order.side,
                        "error": result.error,
                    }),
                    json!({}),
                );
            }
        }
        result
    }

    fn fill_on_paper(&mut self, order: &Order, price: f64) -> (TradeResult, Option<Fill>) {
        match self.paper.execute(&mut self.portfolio, order, price) {
            Ok(fill) => {
                let (input_amount, output_amount) = match fill.side {
                    Side::Buy => (fill.value + fill.fee, fill.amount),
                    Side::Sell => (fill.amount, fill.value - fill.fee),
                };
                let result = TradeResult {
                    success: true,
                    tx_signature: None,
                    input_amount,
                    output_amount,
                    executed_price: Some(fill.price),
                    price_impact: 0.0,
                    error: None,
                };
                let fill = Fill {
                    token: fill.token,
                    side: fill.side,
                    amount: fill.amount,
                    price: fill.price,
                    value: fill.value,
                    fee: fill.fee,
                    realized_pnl: fill.realized_pnl,
                };
                (result, Some(fill))
            }
            Err(e) => {
                warn!(token = %order.token, error = %e, "paper fill failed");
                (TradeResult::failed(e.to_string()), None)
            }
        }
    }

    async fn fill_on_chain(&mut self, order: &Order, price: f64) -> (TradeResult, Option<Fill>) {
        let Some(executor) = self.executor.as_ref() else {
            return (TradeResult::failed("no executor configured"), None);
        };

        // Both sides swap an exact input: USDC for buys, token units for sells
        let (input, output, amount) = match order.side {
            Side::Buy => (QUOTE_TOKEN.to_string(), order.token.clone(), order.size_usd),
            Side::Sell => {
                let held = self.portfolio.position(&order.token);
                if held <= 0.0 {
                    return (TradeResult::failed(format!("no {} position to sell", order.token)), None);
                }
                (order.token.clone(), QUOTE_TOKEN.to_string(), (order.size_usd / price).min(held))
            }
        };

        let simulation = executor.simulate_swap(&input, &output, amount).await;
        if !simulation.success {
            return (
                TradeResult::failed(simulation.error.unwrap_or_else(|| "simulation failed".to_string())),
                None,
            );
        }
        let slippage = self.risk.check_slippage(simulation.price_impact);
        if let Some(reason) = slippage.reason() {
            return (TradeResult::failed(format!("rejected by risk manager: {}", reason)), None);
        }

        let result = executor
            .execute_trade(&input, &output, amount, false)
            .await;
        if !result.success {
            return (result, None);
        }

        let applied = match order.side {
            Side::Buy if result.output_amount > 0.0 => self.portfolio.buy(
                &order.token,
                result.output_amount,
                result.input_amount / result.output_amount,
                0.0,
            ),
            Side::Sell if result.input_amount > 0.0 => {
                let amount = result.input_amount.min(self.portfolio.position(&order.token));
                self.portfolio
                    .sell(&order.token, amount, result.output_amount / result.input_amount, 0.0)
            }
            _ => Err(Error::Swap("swap reported empty amounts".to_string())),
        };

        match applied {
            Ok(fill) => (result, Some(fill)),
            Err(e) => {
                error!(token = %order.token, error = %e, "swap landed but portfolio update failed");
                (result, None)
            }
        }
    }

    fn record_fill(&mut self, order: &Order, fill: &Fill) {
        if fill.side == Side::Sell {
            self.risk.record_trade(fill.realized_pnl);
        }
        self.metrics.record_trade(true);

        let mut data = json!({
            "token": fill.token,
            "side": fill.side,
            "size": order.size_usd,
            "amount": fill.amount,
            "price": fill.price,
            "confidence": order.confidence,
            "reason": order.reason,
        });
        if fill.side == Side::Sell {
            data["profit"] = json!(fill.realized_pnl);
        }
        let change = indicators::price_change_pct(&self.history.prices(&fill.token), DAY_SAMPLES);
        data["market_conditions"] = Value::Object(self.current_conditions(&fill.token, change));
        self.memory.add(MemoryKind::Trade, data, json!({}));

        self.performance.record_trade(TradeRecord {
            timestamp: Utc::now(),
            token: fill.token.clone(),
            side: fill.side,
            amount: fill.amount,
            price: fill.price,
            pnl: fill.realized_pnl,
        });
    }

    /// Cash plus holdings at current prices; unpriced holdings count as zero
    pub async fn calculate_total_value(&mut self) -> f64 {
        let mut prices = HashMap::new();
        let tokens: Vec<String> = self.portfolio.holdings().keys().cloned().collect();
        for token in tokens {
            match self.feed.price(&token).await {
                Ok(price) => {
                    prices.insert(token, price);
                }
                Err(e) => error!(token = %token, error = %e, "error getting price"),
            }
        }
        self.portfolio.mark_to_market(&prices)
    }

    /// One pass: record prices, analyze, decide, trade
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        self.metrics.record_cycle();
        let now = Utc::now();
        let pairs = self.pairs.clone();

        let mut recorded = 0;
        for token in &pairs {
            match self.feed.price(token).await {
                Ok(price) if price > 0.0 => {
                    self.history.record(token, now, price);
                    recorded += 1;
                }
                Ok(price) => warn!(token = %token, price, "ignoring non-positive price"),
                Err(e) => warn!(token = %token, error = %e, "price unavailable"),
            }
        }
        if recorded == 0 {
            return Err(Error::Quote("no prices available for any pair".to_string()));
        }

        let report = self.analyze_market(&pairs).await;
        if self.config.agent.show_reasoning && !report.analysis.is_empty() {
            info!(reasoning = %report.analysis, "market reasoning");
        }

        let mut snapshot = MarketSnapshot::new(now);
        for token in &pairs {
            let Some(data) = report.market_data.get(token).filter(|d| d.error.is_none()) else {
                continue;
            };
            let analysis = match self.analyzer.analyze_token(token, &self.history).await {
                Ok(analysis) => {
                    self.remember_analysis(token, &analysis);
                    Some(analysis.signals)
                }
                Err(e) => {
                    warn!(token = %token, error = %e, "analysis failed");
                    None
                }
            };
            snapshot.insert(
                token.clone(),
                TokenSnapshot {
                    price: data.price,
                    price_change_24h: data.price_change_24h,
                    liquidity: data.liquidity,
                    analysis,
                },
            );
        }

        let signals = self.strategies.evaluate_all(&snapshot);
        let mut orders = self.orders_from_signals(&signals, &report);
        let decisions = self.generate_trades(&report).await;
        self.merge_orders(&mut orders, decisions);
        self.merge_orders(&mut orders, report.trades.clone());

        if self.config.agent.show_reasoning {
            for order in &orders {
                info!(token = %order.token, side = ?order.side, size = order.size_usd, reason = %order.reason, "trade idea");
            }
        }

        let results = self.execute_trades(&orders).await;
        self.metrics.update_memory();
        self.metrics.set_custom("total_value", self.portfolio.total_value());
        self.metrics.set_custom("cash", self.portfolio.cash());

        info!(
            cycle = self.metrics.cycles,
            signals = signals.len(),
            orders = orders.len(),
            total_value = self.portfolio.total_value(),
            "cycle complete"
        );

        Ok(CycleReport {
            timestamp: now,
            analysis: report.analysis,
            signals,
            orders,
            results,
            total_value: self.portfolio.total_value(),
        })
    }

    fn orders_from_signals(&self, signals: &[Signal], report: &MarketReport) -> Vec<Order> {
        let mut orders = Vec::new();
        for signal in signals {
            let (token, side, confidence, reason) = match signal {
                Signal::Buy { token, confidence, reason, .. } => (token, Side::Buy, *confidence, reason),
                Signal::Sell { token, confidence, reason, .. } => (token, Side::Sell, *confidence, reason),
                Signal::Hold => continue,
            };
            let data = report.market_data.get(token).cloned().unwrap_or_default();
            let size_usd = match side {
                Side::Buy => self.calculate_trade_size(confidence, &data),
                Side::Sell => self.portfolio.position(token) * data.price,
            };
            if size_usd > 0.0 {
                orders.push(Order {
                    token: token.clone(),
                    side,
                    size_usd,
                    confidence,
                    reason: reason.clone(),
                });
            }
        }
        orders
    }

    /// Add orders for tokens that have none yet; sells need a holding
    fn merge_orders(&self, orders: &mut Vec<Order>, extra: Vec<Order>) {
        for order in extra {
            if orders.iter().any(|o| o.token == order.token) {
                continue;
            }
            if order.side == Side::Sell && self.portfolio.position(&order.token) <= 0.0 {
                continue;
            }
            if order.size_usd > 0.0 {
                orders.push(order);
            }
        }
    }

    fn remember_analysis(&mut self, token: &str, analysis: &crate::analyzer::MarketAnalysis) {
        let conditions = market_conditions(analysis.price_change_24h, analysis.technical.volatility);
        self.memory.add(
            MemoryKind::Analysis,
            json!({
                "token": token,
                "action": analysis.signals.action,
                "confidence": analysis.signals.confidence,
                "risk_score": analysis.signals.risk_score,
                "price": analysis.price,
                "market_conditions": conditions,
            }),
            json!({}),
        );
    }

    fn current_conditions(&self, token: &str, change_24h: f64) -> Map<String, Value> {
        let volatility = indicators::volatility(&self.history.prices(token), VOLATILITY_WINDOW);
        market_conditions(change_24h, volatility)
    }

    /// Run cycles every `interval_secs` until Ctrl-C
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await
    }

    /// Run cycles every `interval_secs` until `shutdown` resolves
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let interval_secs = self.config.agent.interval_secs;
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));

        info!(
            pairs = ?self.pairs,
            capital = self.config.agent.capital,
            risk_factor = self.config.agent.risk_factor,
            dry_run = self.is_dry_run(),
            interval_secs,
            "trading agent started"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping agent");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "trading cycle failed");
                    }
                    self.metrics.increment_uptime(interval_secs);
                }
            }
        }

        let summary = self.performance.metrics();
        info!(
            total_return = summary.total_return,
            trades = summary.total_trades,
            win_rate = summary.win_rate,
            max_drawdown = summary.max_drawdown,
            "agent stopped"
        );
        Ok(())
    }
}

/// Coarse trend and volatility labels stored with memories and used for recall
fn market_conditions(change_24h: f64, volatility: f64) -> Map<String, Value> {
    let mut conditions = Map::new();
    conditions.insert("trend".to_string(), json!(if change_24h >= 0.0 { "up" } else { "down" }));
    conditions.insert(
        "volatility".to_string(),
        json!(if volatility > HIGH_VOLATILITY { "high" } else { "low" }),
    );
    conditions
}
