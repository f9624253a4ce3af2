//! Risk gate for every trade the agent proposes.
//!
//! Enforces position size, open position count, a UTC daily loss limit, a
//! cooldown after consecutive losses, a price impact ceiling and a manual
//! emergency stop. Confidence filtering belongs to the strategies.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::{RiskConfig, TradingConfig};

/// Oldest events are dropped past this
const MAX_EVENTS: usize = 1000;

/// Risk check result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskDecision {
    Allowed,
    Rejected(String),
}

impl RiskDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskDecision::Allowed)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            RiskDecision::Allowed => None,
            RiskDecision::Rejected(reason) => Some(reason),
        }
    }
}

/// Event logged by the risk manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    pub timestamp: i64,
    pub event_type: String,
    pub details: String,
}

pub struct RiskManager {
    config: RiskConfig,
    slippage_tolerance: f64,
    /// Realized P&L for the current UTC day
    daily_pnl: f64,
    daily_date: NaiveDate,
    open_position_count: usize,
    consecutive_losses: u32,
    cooldown_until: Option<Instant>,
    emergency_stop: bool,
    events: VecDeque<RiskEvent>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, trading: &TradingConfig) -> Self {
        Self {
            config,
            slippage_tolerance: trading.slippage_tolerance,
            daily_pnl: 0.0,
            daily_date: Utc::now().date_naive(),
            open_position_count: 0,
            consecutive_losses: 0,
            cooldown_until: None,
            emergency_stop: false,
            events: VecDeque::new(),
        }
    }

    /// Check if a new order is allowed
    pub fn check_order(&mut self, position_size_usd: f64, is_new_position: bool) -> RiskDecision {
        self.maybe_reset_daily();

        if self.emergency_stop {
            return self.reject("emergency stop is active".to_string());
        }

        if let Some(until) = self.cooldown_until {
            let now = Instant::now();
            if now < until {
                let remaining = until.duration_since(now);
                return self.reject(format!(
                    "in cooldown after {} consecutive losses ({:.0}s remaining)",
                    self.consecutive_losses,
                    remaining.as_secs_f64()
                ));
            }
            self.cooldown_until = None;
            self.consecutive_losses = 0;
            self.log_event("cooldown_expired", "cooldown period ended");
        }

        if position_size_usd > self.config.max_position_size_usd {
            return self.reject(format!(
                "position size ${:.2} exceeds max ${:.2}",
                position_size_usd, self.config.max_position_size_usd
            ));
        }

        if is_new_position && self.open_position_count >= self.config.max_open_positions {
            return self.reject(format!(
                "max open positions ({}) reached",
                self.config.max_open_positions
            ));
        }

        if self.daily_pnl < -self.config.max_daily_loss_usd {
            return self.reject(format!(
                "daily loss ${:.2} exceeds limit ${:.2}",
                self.daily_pnl.abs(),
                self.config.max_daily_loss_usd
            ));
        }

        RiskDecision::Allowed
    }

    /// `price_impact` is a fraction (0.01 = 1%)
    pub fn check_slippage(&mut self, price_impact: f64) -> RiskDecision {
        if price_impact > self.slippage_tolerance {
            return self.reject(format!(
                "price impact {:.2}% exceeds tolerance {:.2}%",
                price_impact * 100.0,
                self.slippage_tolerance * 100.0
            ));
        }
        RiskDecision::Allowed
    }

    /// Record a realized trade result
    pub fn record_trade(&mut self, pnl: f64) {
        self.maybe_reset_daily();
        self.daily_pnl += pnl;

        if pnl < 0.0 {
            self.consecutive_losses += 1;
            info!(
                consecutive_losses = self.consecutive_losses,
                daily_pnl = self.daily_pnl,
                "loss recorded"
            );

            if self.consecutive_losses >= self.config.consecutive_loss_limit {
                let cooldown = Duration::from_secs(self.config.cooldown_after_losses_secs);
                self.cooldown_until = Some(Instant::now() + cooldown);
                let msg = format!(
                    "entering cooldown for {}s after {} consecutive losses",
                    self.config.cooldown_after_losses_secs, self.consecutive_losses
                );
                warn!("{}", msg);
                self.log_event("cooldown_started", &msg);
            }
        } else {
            self.consecutive_losses = 0;
        }

        if self.daily_pnl < -self.config.max_daily_loss_usd {
            let msg = format!(
                "daily loss limit breached: ${:.2} (limit: ${:.2})",
                self.daily_pnl.abs(),
                self.config.max_daily_loss_usd
            );
            warn!("{}", msg);
            self.log_event("daily_loss_limit_breached", &msg);
        }
    }

    pub fn set_open_positions(&mut self, count: usize) {
        self.open_position_count = count;
    }

    pub fn emergency_stop(&mut self) {
        self.emergency_stop = true;
        warn!("EMERGENCY STOP activated");
        self.log_event("emergency_stop", "emergency stop activated");
    }

    pub fn clear_emergency_stop(&mut self) {
        self.emergency_stop = false;
        info!("emergency stop cleared");
        self.log_event("emergency_stop_cleared", "emergency stop deactivated");
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency_stop
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    /// Most recent events, oldest first
    pub fn events(&self) -> &VecDeque<RiskEvent> {
        &self.events
    }

    pub fn status(&self) -> RiskStatus {
        RiskStatus {
            daily_pnl: self.daily_pnl,
            open_positions: self.open_position_count,
            consecutive_losses: self.consecutive_losses,
            in_cooldown: self.cooldown_until.is_some_and(|u| Instant::now() < u),
            emergency_stop: self.emergency_stop,
            daily_loss_limit: self.config.max_daily_loss_usd,
            max_position_size: self.config.max_position_size_usd,
            max_open_positions: self.config.max_open_positions,
        }
    }

    fn reject(&mut self, reason: String) -> RiskDecision {
        self.log_event("order_rejected", &reason);
        RiskDecision::Rejected(reason)
    }

    fn maybe_reset_daily(&mut self) {
        let today = Utc::now().date_naive();
        if today != self.daily_date {
            info!(
                old_date = %self.daily_date,
                new_date = %today,
                final_daily_pnl = self.daily_pnl,
                "daily risk counters reset"
            );
            self.daily_pnl = 0.0;
            self.daily_date = today;
        }
    }

    fn log_event(&mut self, event_type: &str, details: &str) {
        self.events.push_back(RiskEvent {
            timestamp: Utc::now().timestamp(),
            event_type: event_type.to_string(),
            details: details.to_string(),
        });
        while self.events.len() > MAX_EVENTS {
            self.events.pop_front();
        }
    }
}

/// Risk status summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskStatus {
    pub daily_pnl: f64,
    pub open_positions: usize,
    pub consecutive_losses: u32,
    pub in_cooldown: bool,
    pub emergency_stop: bool,
    pub daily_loss_limit: f64,
    pub max_position_size: f64,
    pub max_open_positions: usize,
}
