use chrono::Duration as ChronoDuration;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use solhedge::agent::HedgeFundAgent;
use solhedge::analyzer::MarketAnalyzer;
use solhedge::backtest::{BacktestSettings, Backtester, PriceSeries};
use solhedge::checks;
use solhedge::config::Config;
use solhedge::error::{Error, Result};
use solhedge::executor::JupiterExecutor;
use solhedge::history::PriceHistory;
use solhedge::jupiter::{JupiterClient, PriceFeed, QuoteRequest, SwapMode};
use solhedge::llm::ChatClient;
use solhedge::rpc::SolanaRpc;
use solhedge::strategy::StrategyEngine;
use solhedge::tokens;
use solhedge::wallet::Keypair;

/// Solana hedge fund agent - Jupiter quotes, LLM reasoning, risk-gated trades
#[derive(Parser, Debug)]
#[command(name = "solhedge", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the trading loop until Ctrl-C
    Run {
        /// Pairs to trade against USDC (SOL, BONK, JUP)
        #[arg(long, num_args = 1..)]
        pairs: Vec<String>,

        /// Starting capital in USDC
        #[arg(long)]
        capital: Option<f64>,

        /// Risk factor between 0 and 1
        #[arg(long)]
        risk: Option<f64>,

        /// Seconds between cycles
        #[arg(long)]
        interval: Option<u64>,

        /// Simulate fills instead of swapping on chain
        #[arg(long, conflicts_with = "live")]
        dry_run: bool,

        /// Sign and send swaps with the configured keypair
        #[arg(long)]
        live: bool,

        /// Log the model's reasoning each cycle
        #[arg(long)]
        show_reasoning: bool,
    },
    /// Analyze one token and print the result as JSON
    Analyze {
        token: String,

        /// Price samples to collect before analyzing
        #[arg(long, default_value_t = 1)]
        samples: usize,
    },
    /// Print a Jupiter quote
    Quote {
        input: String,
        output: String,
        /// Input amount, or output amount with --exact-out
        amount: f64,

        #[arg(long)]
        exact_out: bool,
    },
    /// Replay historical prices through the strategies
    Backtest {
        /// CSV with timestamp,token,price rows
        #[arg(long)]
        prices: PathBuf,

        #[arg(long, num_args = 1..)]
        pairs: Vec<String>,

        #[arg(long)]
        capital: Option<f64>,

        /// Days to replay, ending at the last price
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
    /// Verify environment variables and API connectivity
    Check,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env();
    Ok(config)
}

fn build_executor(config: &Config, client: &JupiterClient) -> Result<JupiterExecutor> {
    let path = config
        .wallet
        .keypair_path
        .as_ref()
        .ok_or_else(|| Error::Config("live trading requires wallet.keypair_path or SOLANA_KEYPAIR_PATH".to_string()))?;
    let keypair = Keypair::from_file(path)?;
    let rpc = SolanaRpc::new(&config.chain.rpc_url)?;
    info!(wallet = %keypair.pubkey(), rpc = %rpc.url(), "live execution enabled");
    Ok(JupiterExecutor::new(client.clone(), rpc, keypair))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("failed to load .env: {}", e);
        }
    }

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();

    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Run {
            pairs,
            capital,
            risk,
            interval,
            dry_run,
            live,
            show_reasoning,
        } => {
            if !pairs.is_empty() {
                config.agent.pairs = pairs;
            }
            if let Some(capital) = capital {
                config.agent.capital = capital;
            }
            if let Some(risk) = risk {
                config.agent.risk_factor = risk;
            }
            if let Some(interval) = interval {
                config.agent.interval_secs = interval;
            }
            if dry_run {
                config.agent.dry_run = true;
            }
            if live {
                config.agent.dry_run = false;
            }
            config.agent.show_reasoning |= show_reasoning;
            config.validate()?;

            let client = JupiterClient::new(config.dex.clone())?;
            let executor = if config.agent.dry_run {
                None
            } else {
                Some(build_executor(&config, &client)?)
            };
            let llm = ChatClient::new(&config.llm)?;

            info!(
                pairs = ?config.pairs(),
                capital = config.agent.capital,
                risk_factor = config.agent.risk_factor,
                dry_run = config.agent.dry_run,
                interval_secs = config.agent.interval_secs,
                model = %llm.model(),
                "solhedge starting"
            );

            let mut agent = HedgeFundAgent::new(config, Arc::new(client), Arc::new(llm), executor)?;
            agent.run().await?;
        }
        Command::Analyze { token, samples } => {
            let client = Arc::new(JupiterClient::new(config.dex.clone())?);
            let analyzer = MarketAnalyzer::new(
                client.clone(),
                config.agent.lookback_period,
                config.agent.risk_free_rate,
            );
            let mut history = PriceHistory::new(config.agent.lookback_period);
            for i in 0..samples.max(1) {
                if i > 0 {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                match client.price(&token).await {
                    Ok(price) => history.record(&token, chrono::Utc::now(), price),
                    Err(e) => warn!(token = %token, error = %e, "price sample failed"),
                }
            }
            let analysis = analyzer.analyze_token(&token, &history).await?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Command::Quote {
            input,
            output,
            amount,
            exact_out,
        } => {
            let client = JupiterClient::new(config.dex.clone())?;
            let input_mint = tokens::resolve_mint(&input);
            let output_mint = tokens::resolve_mint(&output);
            let (swap_mode, amount_mint) = if exact_out {
                (SwapMode::ExactOut, &output_mint)
            } else {
                (SwapMode::ExactIn, &input_mint)
            };
            let raw_amount = tokens::to_base_units(amount, tokens::decimals(amount_mint))
                .ok_or_else(|| Error::validation("amount", format!("{} is not a tradable amount", amount)))?;
            let quote = client
                .get_quote(&QuoteRequest {
                    input_mint: input_mint.clone(),
                    output_mint: output_mint.clone(),
                    amount: raw_amount,
                    slippage_bps: config.dex.slippage_bps,
                    swap_mode,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&quote.raw)?);
        }
        Command::Backtest {
            prices,
            pairs,
            capital,
            days,
        } => {
            if !pairs.is_empty() {
                config.agent.pairs = pairs;
            }
            if let Some(capital) = capital {
                config.agent.capital = capital;
            }
            config.validate()?;

            let series = PriceSeries::from_csv_path(&prices)?;
            let (Some(first), Some(last)) = (series.start(), series.end()) else {
                return Err(Error::validation("prices", "price file contains no rows").into());
            };
            let start = (last - ChronoDuration::days(days.max(1))).max(first);

            let feed = Arc::new(JupiterClient::new(config.dex.clone())?);
            let analyzer = MarketAnalyzer::new(feed, config.agent.lookback_period, config.agent.risk_free_rate);
            let settings = BacktestSettings {
                pairs: config.pairs(),
                start,
                end: last,
                initial_capital: config.agent.capital,
                risk_factor: config.agent.risk_factor,
                risk_free_rate: config.agent.risk_free_rate,
            };
            let mut backtester = Backtester::new(
                settings,
                series,
                StrategyEngine::with_defaults(config.trading.min_confidence),
                analyzer,
            );
            backtester.run().await?;
            match backtester.analyze_performance() {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => println!("backtest did not produce performance data"),
            }
        }
        Command::Check => {
            let report = checks::run_checks(&config).await;
            std::process::exit(report.exit_code());
        }
    }

    Ok(())
}
