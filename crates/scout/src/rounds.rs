//! Round reconstruction: an ordered per-address event stream becomes a
//! sequence of open→close position cycles.
//!
//! The position is tracked per round, starting at zero when a round opens;
//! sells arriving with no open round are ignored. A round closes when the
//! position is drained to ≤ 0, when a zero-delta observation arrives past
//! the timeout, or at end of stream.

use crate::epoch::TimeBucket;
use crate::gateway::TransferEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedReason {
    Drained,
    /// Force-closed after `timeout_seconds` with a position still held.
    /// Realized PnL is the negated net position; no fair-value pricing.
    Timeout,
    EndOfStreamOpen,
}

impl ClosedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drained => "drained",
            Self::Timeout => "timeout",
            Self::EndOfStreamOpen => "end_of_stream_open",
        }
    }
}

/// One trading round in raw token units. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    pub entry_ts: i64,
    pub exit_ts: Option<i64>,
    pub hold_seconds: i64,
    pub buy_raw: i128,
    pub sell_raw: i128,
    pub net_raw: i128,
    pub realized_pnl_raw: i128,
    pub time_bucket: TimeBucket,
    pub closed_reason: ClosedReason,
}

struct Accum {
    entry_ts: i64,
    buy: i128,
    sell: i128,
    net: i128,
}

impl Accum {
    fn close(self, exit_ts: i64, pnl: i128, reason: ClosedReason, t0: Option<i64>) -> Round {
        Round {
            entry_ts: self.entry_ts,
            exit_ts: Some(exit_ts),
            hold_seconds: exit_ts - self.entry_ts,
            buy_raw: self.buy,
            sell_raw: self.sell,
            net_raw: self.net,
            realized_pnl_raw: pnl,
            time_bucket: TimeBucket::from_entry(self.entry_ts, t0),
            closed_reason: reason,
        }
    }
}

/// Replay `events` (ascending by timestamp, provider order preserved on ties)
/// into rounds. At most one round is open at any cut-off.
pub fn reconstruct(events: &[TransferEvent], timeout_seconds: i64, t0: Option<i64>) -> Vec<Round> {
    let mut rounds = Vec::new();
    let mut open: Option<Accum> = None;
    let mut position: i128 = 0;

    for event in events {
        let delta = event.delta_raw;
        if delta == 0 {
            // An observation without a balance change still advances the
            // clock: past the timeout a held position is force-closed.
            let timed_out = matches!(
                &open,
                Some(acc) if position > 0 && event.timestamp - acc.entry_ts >= timeout_seconds
            );
            if timed_out {
                if let Some(acc) = open.take() {
                    let pnl = -acc.net;
                    rounds.push(acc.close(event.timestamp, pnl, ClosedReason::Timeout, t0));
                    position = 0;
                }
            }
            continue;
        }

        if delta > 0 {
            let acc = open.get_or_insert_with(|| Accum {
                entry_ts: event.timestamp,
                buy: 0,
                sell: 0,
                net: 0,
            });
            acc.buy += delta;
            acc.net += delta;
            position += delta;
        } else if let Some(mut acc) = open.take() {
            acc.sell += -delta;
            acc.net += delta;
            position += delta;
            if position <= 0 {
                let pnl = acc.sell - acc.buy;
                rounds.push(acc.close(event.timestamp, pnl, ClosedReason::Drained, t0));
                position = 0;
            } else {
                open = Some(acc);
            }
        }
        // Sells with no open round carry no position to drain and are ignored.
    }

    if let Some(acc) = open {
        if position > 0 {
            let exit_ts = events.last().map_or(acc.entry_ts, |e| e.timestamp);
            let pnl = -acc.net;
            rounds.push(acc.close(exit_ts, pnl, ClosedReason::EndOfStreamOpen, t0));
        }
    }

    rounds
}

/// Round with raw units scaled to decimal token units and optionally valued
/// in USD. A missing price leaves `pnl_usd` absent, never zero.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedRound {
    pub round: Round,
    pub buy_token: f64,
    pub sell_token: f64,
    pub pnl_token: f64,
    pub pnl_usd: Option<f64>,
}

pub fn price_rounds(rounds: Vec<Round>, decimals: u8, price_usd: Option<f64>) -> Vec<PricedRound> {
    let scale = 10f64.powi(i32::from(decimals));
    rounds
        .into_iter()
        .map(|round| {
            let pnl_token = round.realized_pnl_raw as f64 / scale;
            PricedRound {
                buy_token: round.buy_raw as f64 / scale,
                sell_token: round.sell_raw as f64 / scale,
                pnl_token,
                pnl_usd: price_usd.map(|px| pnl_token * px),
                round,
            }
        })
        .collect()
}
