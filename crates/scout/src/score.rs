//! Performance metrics over reconstructed rounds, and the ranking that turns
//! scored addresses into a follow list.

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use common::db::ScoreRecord;
use common::types::ListStatus;

use crate::gateway::{replay_address_events, ReplayConfig};
use crate::progress::Meter;
use crate::rounds::{price_rounds, reconstruct, PricedRound};
use crate::source::{BalanceProbe, SignatureReplay};

/// Aggregate realized performance of one address on one token.
///
/// PnL fields are in USD when the rounds were priced, otherwise in decimal
/// token units; the caller picks one basis per batch.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Metrics {
    pub round_count: u32,
    pub win_count: u32,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub median_hold_seconds: i64,
    pub max_drawdown: f64,
}

/// Aggregate `rounds` (chronological). An empty slice yields the all-zero
/// metrics value, never an error.
pub fn aggregate(rounds: &[PricedRound]) -> Metrics {
    let n = rounds.len();
    if n == 0 {
        return Metrics::default();
    }

    let pnls: Vec<f64> = rounds
        .iter()
        .map(|r| r.pnl_usd.unwrap_or(r.pnl_token))
        .collect();
    let win_count = pnls.iter().filter(|p| **p > 0.0).count() as u32;
    let total_pnl: f64 = pnls.iter().sum();

    let mut holds: Vec<i64> = rounds.iter().map(|r| r.round.hold_seconds).collect();
    holds.sort_unstable();
    let mid = holds.len() / 2;
    let median_hold_seconds = if holds.len() % 2 == 1 {
        holds[mid]
    } else {
        (holds[mid - 1] + holds[mid]) / 2
    };

    // Max drawdown over the cumulative-PnL walk: running peak, drawdown is
    // cumulative minus peak (≤ 0), keep the most negative.
    let mut cumulative = 0.0;
    let mut peak = 0.0_f64;
    let mut max_drawdown = 0.0_f64;
    for pnl in &pnls {
        cumulative += pnl;
        peak = peak.max(cumulative);
        max_drawdown = max_drawdown.min(cumulative - peak);
    }

    Metrics {
        round_count: n as u32,
        win_count,
        win_rate: f64::from(win_count) / n as f64,
        total_pnl,
        avg_pnl: total_pnl / n as f64,
        median_hold_seconds,
        max_drawdown,
    }
}

/// One scored address.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRow {
    pub addr: String,
    pub status: ListStatus,
    pub balance: Option<f64>,
    pub metrics: Metrics,
}

impl ScoreRow {
    pub fn to_record(&self, chain: &str, token: &str) -> ScoreRecord {
        ScoreRecord {
            addr: self.addr.clone(),
            chain: chain.to_string(),
            token_address: token.to_string(),
            list_status: self.status.as_str().to_string(),
            balance: self.balance,
            round_count: self.metrics.round_count,
            win_count: self.metrics.win_count,
            win_rate: self.metrics.win_rate,
            total_pnl: self.metrics.total_pnl,
            avg_pnl: self.metrics.avg_pnl,
            median_hold_seconds: self.metrics.median_hold_seconds,
            max_drawdown: self.metrics.max_drawdown,
        }
    }

    pub fn from_record(rec: &ScoreRecord) -> Self {
        Self {
            addr: rec.addr.clone(),
            status: ListStatus::parse(&rec.list_status).unwrap_or(ListStatus::Watch),
            balance: rec.balance,
            metrics: Metrics {
                round_count: rec.round_count,
                win_count: rec.win_count,
                win_rate: rec.win_rate,
                total_pnl: rec.total_pnl,
                avg_pnl: rec.avg_pnl,
                median_hold_seconds: rec.median_hold_seconds,
                max_drawdown: rec.max_drawdown,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoreConfig {
    pub replay: ReplayConfig,
    pub timeout_secs: i64,
    pub progress_tick: usize,
}

/// Score a batch of same-status addresses: replay → rounds → metrics, with
/// an optional native-balance probe. Per-address failures yield an all-zero
/// row rather than aborting the batch; cancellation returns the rows scored
/// so far.
#[allow(clippy::too_many_arguments)]
pub async fn score_addresses<S>(
    source: &S,
    addrs: &[String],
    status: ListStatus,
    mint: &str,
    t0: Option<i64>,
    decimals: u8,
    price_usd: Option<f64>,
    with_balance: bool,
    cfg: &ScoreConfig,
    cancel: &CancellationToken,
) -> Vec<ScoreRow>
where
    S: SignatureReplay + BalanceProbe + Sync,
{
    let mut rows = Vec::new();
    let mut meter = Meter::new("score", addrs.len(), cfg.progress_tick);
    for addr in addrs {
        if cancel.is_cancelled() {
            tracing::info!("scoring cancelled, returning partial results");
            break;
        }
        let mut ok = true;

        let balance = if with_balance {
            match source.native_balance(addr).await {
                Ok(balance) => Some(balance),
                Err(e) => {
                    tracing::debug!(addr, error = %e, "balance probe failed");
                    ok = false;
                    None
                }
            }
        } else {
            None
        };

        let events = replay_address_events(source, addr, mint, None, &cfg.replay, cancel).await;
        let rounds = reconstruct(&events, cfg.timeout_secs, t0);
        let priced = price_rounds(rounds, decimals, price_usd);
        let metrics = aggregate(&priced);
        metrics::counter!("scout_addresses_scored_total").increment(1);

        rows.push(ScoreRow {
            addr: addr.clone(),
            status,
            balance,
            metrics,
        });
        meter.step(ok);
    }
    rows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    WinRate,
    Balance,
    TotalPnl,
}

impl SortKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "win_rate" => Some(Self::WinRate),
            "balance" => Some(Self::Balance),
            "pnl" => Some(Self::TotalPnl),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectFilter {
    pub min_rounds: u32,
    pub min_win_rate: f64,
    pub min_avg_pnl: f64,
    /// Threshold on the (negative) max drawdown; rows below it are dropped.
    pub max_drawdown: Option<f64>,
    /// Balance bounds apply only to rows that carry a balance.
    pub min_balance: Option<f64>,
    pub max_balance: Option<f64>,
    pub sort_by: SortKey,
}

impl SelectFilter {
    pub fn from_config(cfg: &common::config::Scoring) -> Result<Self> {
        let sort_by = SortKey::parse(&cfg.sort_by)
            .ok_or_else(|| anyhow::anyhow!("unknown sort key: {}", cfg.sort_by))?;
        Ok(Self {
            min_rounds: cfg.min_rounds,
            min_win_rate: cfg.min_win_rate,
            min_avg_pnl: cfg.min_avg_pnl,
            max_drawdown: cfg.max_drawdown,
            min_balance: cfg.min_balance,
            max_balance: cfg.max_balance,
            sort_by,
        })
    }
}

fn primary_key(row: &ScoreRow, key: SortKey) -> f64 {
    match key {
        SortKey::WinRate => row.metrics.win_rate,
        SortKey::Balance => row.balance.unwrap_or(0.0),
        SortKey::TotalPnl => row.metrics.total_pnl,
    }
}

/// Filter scored rows and rank them: configurable primary key, then the
/// fixed tie-break chain (win_rate, round_count, avg_pnl, balance), all
/// descending.
pub fn filter_and_rank(mut rows: Vec<ScoreRow>, filter: &SelectFilter) -> Vec<ScoreRow> {
    rows.retain(|row| {
        let m = &row.metrics;
        if m.round_count < filter.min_rounds {
            return false;
        }
        if m.win_rate < filter.min_win_rate {
            return false;
        }
        if m.avg_pnl < filter.min_avg_pnl {
            return false;
        }
        if let Some(threshold) = filter.max_drawdown {
            // More negative drawdown = worse.
            if m.max_drawdown < threshold {
                return false;
            }
        }
        if let Some(balance) = row.balance {
            if let Some(min) = filter.min_balance {
                if balance < min {
                    return false;
                }
            }
            if let Some(max) = filter.max_balance {
                if balance > max {
                    return false;
                }
            }
        }
        true
    });

    rows.sort_by(|a, b| {
        let ka = [
            primary_key(a, filter.sort_by),
            a.metrics.win_rate,
            f64::from(a.metrics.round_count),
            a.metrics.avg_pnl,
            a.balance.unwrap_or(0.0),
        ];
        let kb = [
            primary_key(b, filter.sort_by),
            b.metrics.win_rate,
            f64::from(b.metrics.round_count),
            b.metrics.avg_pnl,
            b.balance.unwrap_or(0.0),
        ];
        kb.iter()
            .zip(ka.iter())
            .map(|(x, y)| x.total_cmp(y))
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rows
}
