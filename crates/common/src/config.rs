use anyhow::Result;
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub general: General,
    pub database: Database,
    pub ledger: Ledger,
    pub evm: Option<Evm>,
    pub gateway: Gateway,
    pub discovery: Discovery,
    pub epoch: Epoch,
    pub rounds: Rounds,
    pub classify: Classify,
    pub scoring: Scoring,
    pub price: Price,
    pub export: Export,
    pub observability: Observability,
}

#[derive(Debug, Deserialize)]
pub struct General {
    pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Database {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct Ledger {
    pub chain: String,
    pub rpc_url: String,
    pub timeout_secs: u64,
    pub rate_limit_delay_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

/// Optional EVM transport for log-range discovery on chains where the token
/// lives behind an ERC-20 contract.
#[derive(Debug, Deserialize, Clone)]
pub struct Evm {
    pub chain: String,
    pub rpc_url: String,
    pub avg_block_time_secs: f64,
    pub lookback_blocks: u64,
}

#[derive(Debug, Deserialize)]
pub struct Gateway {
    pub max_span: u64,
    pub min_span: u64,
    pub backoff_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct Discovery {
    pub holder_top_n: usize,
    pub early_base_multiplier: usize,
    pub early_out_top_n: usize,
    pub early_window_hours: f64,
    pub max_signatures_per_account: usize,
}

#[derive(Debug, Deserialize)]
pub struct Epoch {
    pub token_sample: usize,
    pub top_holder_accounts: usize,
    pub holder_sample: usize,
    pub signatures_per_account: usize,
}

#[derive(Debug, Deserialize)]
pub struct Rounds {
    pub timeout_secs: i64,
    pub max_transactions: usize,
}

#[derive(Debug, Deserialize)]
pub struct Classify {
    pub batch_limit: usize,
    pub insider_top_n: usize,
    pub progress_tick: usize,
}

#[derive(Debug, Deserialize)]
pub struct Scoring {
    pub min_rounds: u32,
    pub min_win_rate: f64,
    pub min_avg_pnl: f64,
    pub max_drawdown: Option<f64>,
    pub min_balance: Option<f64>,
    pub max_balance: Option<f64>,
    pub sort_by: String,
    pub top_k: usize,
    pub progress_tick: usize,
}

#[derive(Debug, Deserialize)]
pub struct Price {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Export {
    pub dir: String,
}

#[derive(Debug, Deserialize)]
pub struct Observability {
    /// 0 disables the Prometheus listener.
    pub prometheus_port: u16,
}

impl Config {
    pub fn load() -> Result<Self> {
        let content = std::fs::read_to_string("config/default.toml")?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_toml_str(s)
    }
}
