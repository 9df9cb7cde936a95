//! Event Gateway: turns an unbounded transaction history into a bounded,
//! ordered stream of balance-delta events.
//!
//! Two transports feed the same event shape. The range scan walks a block
//! interval in adaptively sized chunks, shrinking on provider rejections and
//! re-growing on success. The address replay resolves an owner's token
//! accounts, collects their signatures, and extracts per-transaction balance
//! deltas from pre/post snapshots.

use std::collections::HashSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::types::{LogEntry, TransactionMeta};

use crate::source::{EventScan, SignatureReplay};

/// Signed change of an owner's token holding at one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferEvent {
    pub timestamp: i64,
    pub delta_raw: i128,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_span: u64,
    pub min_span: u64,
    pub backoff: Duration,
}

impl GatewayConfig {
    pub fn from_config(cfg: &common::config::Gateway) -> Self {
        Self {
            max_span: cfg.max_span.max(1),
            min_span: cfg.min_span.clamp(1, cfg.max_span.max(1)),
            backoff: Duration::from_millis(cfg.backoff_ms),
        }
    }
}

/// Per-outcome chunk counts for one scan. Reported to the caller so a run
/// can surface how much of the range was actually observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub chunks_ok: u64,
    pub shrinks: u64,
    pub chunks_skipped: u64,
}

/// Adaptive chunked scan of `[from_block, to_block]` for transfer logs.
///
/// Chunk failures are absorbed: an oversized-range rejection or timeout
/// halves the span and retries the same sub-range; once the span sits at the
/// floor the sub-range is skipped so the scan always makes forward progress.
/// Successful chunks re-grow the span toward the ceiling. Never fails: a
/// scan where every chunk errors returns an empty result.
pub async fn scan_transfer_logs<S: EventScan + Sync>(
    source: &S,
    token: &str,
    from_block: u64,
    to_block: u64,
    cfg: &GatewayConfig,
    cancel: &CancellationToken,
) -> (Vec<LogEntry>, ScanStats) {
    let mut out = Vec::new();
    let mut stats = ScanStats::default();
    if to_block < from_block {
        return (out, stats);
    }

    let mut span = cfg.max_span;
    let mut cursor = from_block;

    while cursor <= to_block {
        if cancel.is_cancelled() {
            tracing::info!(cursor, "scan cancelled");
            break;
        }
        let end = cursor.saturating_add(span - 1).min(to_block);
        match source.transfer_logs(token, cursor, end).await {
            Ok(logs) => {
                out.extend(logs);
                stats.chunks_ok += 1;
                metrics::counter!("scout_gateway_chunks_total", "outcome" => "ok").increment(1);
                cursor = match end.checked_add(1) {
                    Some(next) => next,
                    None => break,
                };
                if span < cfg.max_span {
                    span = (span * 2).min(cfg.max_span);
                }
            }
            Err(e) if e.is_oversized_range() || matches!(e, common::ledger::RpcError::Timeout) => {
                if span > cfg.min_span {
                    span = (span / 2).max(cfg.min_span);
                    stats.shrinks += 1;
                    metrics::counter!("scout_gateway_chunks_total", "outcome" => "shrink")
                        .increment(1);
                    tracing::debug!(cursor, end, span, error = %e, "chunk rejected, shrinking span");
                } else {
                    // Span is at the floor: give this sub-range up. A gap is
                    // preferable to a livelock.
                    stats.chunks_skipped += 1;
                    metrics::counter!("scout_gateway_chunks_total", "outcome" => "skip")
                        .increment(1);
                    tracing::warn!(cursor, end, error = %e, "chunk skipped at minimum span");
                    cursor = match end.checked_add(1) {
                        Some(next) => next,
                        None => break,
                    };
                }
                tokio::time::sleep(cfg.backoff).await;
            }
            Err(e) => {
                // Non-range failure: tolerate the gap and move on.
                stats.chunks_skipped += 1;
                metrics::counter!("scout_gateway_chunks_total", "outcome" => "skip").increment(1);
                tracing::warn!(cursor, end, error = %e, "chunk failed, skipping");
                cursor = match end.checked_add(1) {
                    Some(next) => next,
                    None => break,
                };
                tokio::time::sleep(cfg.backoff).await;
            }
        }
    }

    (out, stats)
}

/// Owner's holding delta for `mint` in one transaction, from pre/post token
/// balance snapshots. Balances are summed over all of the owner's token
/// accounts appearing in the snapshots.
pub fn owner_delta_for_mint(meta: &TransactionMeta, owner: &str, mint: &str) -> i128 {
    fn sum_for(balances: &[common::types::TokenBalance], owner: &str, mint: &str) -> i128 {
        balances
            .iter()
            .filter(|b| b.owner.as_deref() == Some(owner) && b.mint == mint)
            .filter_map(|b| b.ui_token_amount.amount.parse::<i128>().ok())
            .sum()
    }
    let pre = sum_for(&meta.pre_token_balances, owner, mint);
    let post = sum_for(&meta.post_token_balances, owner, mint);
    post - pre
}

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub max_signatures_per_account: usize,
    pub max_transactions: usize,
}

/// Replay an owner's history on `mint` into an ordered event stream.
///
/// When `window` is set, signatures are pre-filtered by their block time to
/// `[start, end]` before any transaction is fetched; entries without a block
/// time are dropped in that mode. Individual fetch failures are absorbed; a
/// replay where nothing could be fetched returns an empty stream.
pub async fn replay_address_events<S: SignatureReplay + Sync>(
    source: &S,
    owner: &str,
    mint: &str,
    window: Option<(i64, i64)>,
    cfg: &ReplayConfig,
    cancel: &CancellationToken,
) -> Vec<TransferEvent> {
    let accounts = match source.token_accounts(owner, mint).await {
        Ok(accounts) => accounts,
        Err(e) => {
            tracing::warn!(owner, error = %e, "token account lookup failed");
            return Vec::new();
        }
    };
    if accounts.is_empty() {
        return Vec::new();
    }

    // Merge signatures across the owner's accounts, de-duplicated in
    // first-seen order.
    let mut seen: HashSet<String> = HashSet::new();
    let mut sigs: Vec<(Option<i64>, String)> = Vec::new();
    for account in &accounts {
        let batch = match source
            .signatures(&account.pubkey, cfg.max_signatures_per_account)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(account = %account.pubkey, error = %e, "signature fetch failed");
                continue;
            }
        };
        for info in batch {
            if let Some((start, end)) = window {
                match info.block_time {
                    Some(bt) if bt >= start && bt <= end => {}
                    _ => continue,
                }
            }
            if seen.insert(info.signature.clone()) {
                sigs.push((info.block_time, info.signature));
            }
        }
    }
    sigs.truncate(cfg.max_transactions);

    let mut events = Vec::new();
    for (block_time, signature) in sigs {
        if cancel.is_cancelled() {
            tracing::info!(owner, "replay cancelled");
            break;
        }
        let tx = match source.transaction(&signature).await {
            Ok(Some(tx)) => tx,
            Ok(None) => continue,
            Err(e) => {
                tracing::debug!(signature, error = %e, "transaction fetch failed");
                continue;
            }
        };
        let Some(ts) = tx.block_time.or(block_time) else {
            continue;
        };
        let delta = tx
            .meta
            .as_ref()
            .map(|m| owner_delta_for_mint(m, owner, mint))
            .unwrap_or(0);
        events.push(TransferEvent {
            timestamp: ts,
            delta_raw: delta,
        });
    }

    // Ascending by time; equal timestamps keep provider order (stable sort).
    events.sort_by_key(|e| e.timestamp);
    events
}
