//! CSV/TXT artifacts under the export directory, timestamped per run.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::rounds::PricedRound;
use crate::score::ScoreRow;

fn token_tag(token: &str) -> &str {
    token.get(..6).unwrap_or(token)
}

fn timestamped(dir: &Path, prefix: &str, token: &str, ext: &str) -> PathBuf {
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("{prefix}_{}_{ts}.{ext}", token_tag(token)))
}

fn opt_field<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

/// Per-round export. A round without a USD valuation leaves the field
/// empty; an absent price must stay distinguishable from zero PnL.
pub fn export_rounds_csv(
    dir: &Path,
    token: &str,
    rows: &[(String, PricedRound)],
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = timestamped(dir, "rounds", token, "csv");

    let mut out = String::from(
        "addr,entry_ts,exit_ts,hold_seconds,bucket,closed_reason,buy_token,sell_token,pnl_token,pnl_usd\n",
    );
    for (addr, priced) in rows {
        let r = &priced.round;
        writeln!(
            out,
            "{addr},{},{},{},{},{},{},{},{},{}",
            r.entry_ts,
            opt_field(r.exit_ts),
            r.hold_seconds,
            r.time_bucket.as_str(),
            r.closed_reason.as_str(),
            priced.buy_token,
            priced.sell_token,
            priced.pnl_token,
            opt_field(priced.pnl_usd),
        )?;
    }
    std::fs::write(&path, out)?;
    tracing::info!(path = %path.display(), rows = rows.len(), "rounds exported");
    Ok(path)
}

pub fn export_scores_csv(
    dir: &Path,
    label: &str,
    token: &str,
    rows: &[ScoreRow],
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = timestamped(dir, label, token, "csv");

    let mut out = String::from(
        "addr,balance,rounds,wins,win_rate,total_pnl,avg_pnl,median_hold_seconds,max_drawdown\n",
    );
    for row in rows {
        let m = &row.metrics;
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{}",
            row.addr,
            opt_field(row.balance),
            m.round_count,
            m.win_count,
            m.win_rate,
            m.total_pnl,
            m.avg_pnl,
            m.median_hold_seconds,
            m.max_drawdown,
        )?;
    }
    std::fs::write(&path, out)?;
    tracing::info!(path = %path.display(), rows = rows.len(), "scores exported");
    Ok(path)
}

/// Top-K address list, one per line, in rank order.
pub fn export_addresses_txt(
    dir: &Path,
    label: &str,
    token: &str,
    rows: &[ScoreRow],
    top_k: usize,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = timestamped(dir, label, token, "txt");

    let mut out = String::new();
    for row in rows.iter().take(top_k) {
        out.push_str(&row.addr);
        out.push('\n');
    }
    std::fs::write(&path, out)?;
    tracing::info!(path = %path.display(), "address list exported");
    Ok(path)
}

/// Plain status export (e.g. every WHITE address), newest first as queried.
pub fn export_status_txt(
    dir: &Path,
    status: &str,
    addrs: &[String],
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{}_{ts}.txt", status.to_lowercase()));

    let mut out = String::new();
    for addr in addrs {
        out.push_str(addr);
        out.push('\n');
    }
    std::fs::write(&path, out)?;
    Ok(path)
}
