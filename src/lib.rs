pub mod agent;
pub mod analyzer;
pub mod backtest;
pub mod checks;
pub mod config;
pub mod error;
pub mod executor;
pub mod history;
pub mod indicators;
pub mod jupiter;
pub mod llm;
pub mod memory;
pub mod metrics;
pub mod paper;
pub mod performance;
pub mod portfolio;
pub mod ratelimit;
pub mod risk;
pub mod rpc;
pub mod strategy;
pub mod tokens;
pub mod wallet;
