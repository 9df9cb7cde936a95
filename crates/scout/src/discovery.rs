//! Candidate discovery: which addresses are worth classifying at all.
//!
//! Two Solana-side sources (current-holder snapshot, early-buyer replay) and
//! an EVM-side harvest from chunked Transfer-log scans. Discovery only
//! returns address lists; persisting them as candidates is the caller's job.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use common::types::LogEntry;

use crate::gateway::{
    replay_address_events, scan_transfer_logs, GatewayConfig, ReplayConfig,
};
use crate::source::{EventScan, HolderProbe, SignatureReplay};

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub holder_top_n: usize,
    pub early_base_multiplier: usize,
    pub early_out_top_n: usize,
    pub early_window_hours: f64,
    pub max_signatures_per_account: usize,
}

impl DiscoveryConfig {
    pub fn from_config(cfg: &common::config::Discovery) -> Self {
        Self {
            holder_top_n: cfg.holder_top_n,
            early_base_multiplier: cfg.early_base_multiplier.max(1),
            early_out_top_n: cfg.early_out_top_n,
            early_window_hours: cfg.early_window_hours,
            max_signatures_per_account: cfg.max_signatures_per_account,
        }
    }
}

/// Current holders of `mint`: owners of token accounts with a positive
/// balance, de-duplicated in first-seen order, capped at `top_n`. A failed
/// enumeration degrades to an empty list.
pub async fn holder_snapshot<S: HolderProbe>(source: &S, mint: &str, top_n: usize) -> Vec<String> {
    let accounts = match source.token_accounts_by_mint(mint).await {
        Ok(accounts) => accounts,
        Err(e) => {
            tracing::warn!(mint, error = %e, "holder snapshot failed");
            return Vec::new();
        }
    };
    let mut owners = Vec::new();
    for account in accounts {
        if account.amount == 0 {
            continue;
        }
        if !owners.contains(&account.owner) {
            owners.push(account.owner);
        }
        if owners.len() >= top_n {
            break;
        }
    }
    owners
}

/// An address that bought early and kept a positive net position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarlyHit {
    pub owner: String,
    pub first_buy_ts: i64,
    pub net_raw: i128,
}

/// Early-buyer replay over a widened holder base.
///
/// With a known T0 the replay is windowed to `[t0, t0 + window]` using
/// signature block times; without one it falls back to recent history.
/// Hits are holders whose replayed stream shows a buy and a positive net,
/// ordered by their first buy.
pub async fn early_buyers<S>(
    source: &S,
    mint: &str,
    t0: Option<i64>,
    cfg: &DiscoveryConfig,
    cancel: &CancellationToken,
) -> Vec<EarlyHit>
where
    S: HolderProbe + SignatureReplay + Sync,
{
    let base = holder_snapshot(
        source,
        mint,
        cfg.holder_top_n * cfg.early_base_multiplier,
    )
    .await;
    tracing::info!(mint, base = base.len(), "early buyer replay start");

    let window = t0.map(|t0| (t0, t0 + (cfg.early_window_hours * 3600.0) as i64));
    let replay_cfg = ReplayConfig {
        max_signatures_per_account: cfg.max_signatures_per_account,
        max_transactions: cfg.max_signatures_per_account,
    };

    let mut hits = Vec::new();
    for owner in base {
        if cancel.is_cancelled() {
            tracing::info!("early buyer replay cancelled");
            break;
        }
        let events =
            replay_address_events(source, &owner, mint, window, &replay_cfg, cancel).await;
        let net: i128 = events.iter().map(|e| e.delta_raw).sum();
        let first_buy_ts = events.iter().find(|e| e.delta_raw > 0).map(|e| e.timestamp);
        if let Some(first_buy_ts) = first_buy_ts {
            if net > 0 {
                tracing::debug!(owner, first_buy_ts, net, "early hit");
                hits.push(EarlyHit {
                    owner,
                    first_buy_ts,
                    net_raw: net,
                });
            }
        }
    }

    hits.sort_by_key(|h| h.first_buy_ts);
    hits.truncate(cfg.early_out_top_n);
    tracing::info!(hits = hits.len(), "early buyer replay done");
    hits
}

/// Addresses touching recent Transfer logs of an EVM token, harvested from a
/// chunked range scan over `[tip - lookback, tip]`.
pub async fn evm_recent_holders<S: EventScan + Sync>(
    source: &S,
    token: &str,
    tip: u64,
    lookback_blocks: u64,
    top_n: usize,
    cfg: &GatewayConfig,
    cancel: &CancellationToken,
) -> Vec<String> {
    let from_block = tip.saturating_sub(lookback_blocks);
    let (logs, stats) = scan_transfer_logs(source, token, from_block, tip, cfg, cancel).await;
    tracing::info!(?stats, logs = logs.len(), "evm holder harvest scan done");

    let mut addrs = Vec::new();
    for log in &logs {
        // topics[1] = from, topics[2] = to
        for topic in log.topics.iter().skip(1).take(2) {
            if let Some(addr) = LogEntry::topic_address(topic) {
                if !addrs.contains(&addr) {
                    addrs.push(addr);
                    if addrs.len() >= top_n {
                        return addrs;
                    }
                }
            }
        }
    }
    addrs
}

/// Earliest block carrying a Transfer log of `token` within the range, or
/// `None` when the range shows none (or the scan was cancelled).
pub async fn evm_first_transfer_block<S: EventScan + Sync>(
    source: &S,
    token: &str,
    from_block: u64,
    to_block: u64,
    cfg: &GatewayConfig,
    cancel: &CancellationToken,
) -> Option<u64> {
    let mut cursor = from_block;
    while cursor <= to_block {
        if cancel.is_cancelled() {
            return None;
        }
        let end = cursor.saturating_add(cfg.max_span - 1).min(to_block);
        let (logs, _) = scan_transfer_logs(source, token, cursor, end, cfg, cancel).await;
        if let Some(first) = logs.iter().filter_map(LogEntry::block_number_u64).min() {
            return Some(first);
        }
        cursor = end.checked_add(1)?;
    }
    None
}

/// First-time receivers within a block window after the token's first
/// observed Transfer, ordered by when they first received. The EVM
/// equivalent of the early-buyer replay: receiver topics are filtered
/// provider-side, so no per-owner replay is needed.
#[allow(clippy::too_many_arguments)]
pub async fn evm_early_receivers<S: EventScan + Sync>(
    source: &S,
    token: &str,
    tip: u64,
    lookback_blocks: u64,
    window_blocks: u64,
    top_n: usize,
    cfg: &GatewayConfig,
    cancel: &CancellationToken,
) -> Vec<String> {
    let from_block = tip.saturating_sub(lookback_blocks);
    let Some(first_block) =
        evm_first_transfer_block(source, token, from_block, tip, cfg, cancel).await
    else {
        tracing::info!(token, "no transfer logs in lookback window");
        return Vec::new();
    };
    let hi = tip.min(first_block.saturating_add(window_blocks));
    let (logs, _) = scan_transfer_logs(source, token, first_block, hi, cfg, cancel).await;

    let mut first_seen: HashMap<String, u64> = HashMap::new();
    for log in &logs {
        let Some(block) = log.block_number_u64() else {
            continue;
        };
        let Some(receiver) = log.topics.get(2).and_then(|t| LogEntry::topic_address(t)) else {
            continue;
        };
        first_seen
            .entry(receiver)
            .and_modify(|b| *b = (*b).min(block))
            .or_insert(block);
    }

    let mut receivers: Vec<(String, u64)> = first_seen.into_iter().collect();
    receivers.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    receivers.truncate(top_n);
    receivers.into_iter().map(|(addr, _)| addr).collect()
}
