//! Address classification: CANDIDATE → WATCH → {WHITE, BLACK}.
//!
//! The soft filter is a structural, zero-network pass that eliminates known
//! program/system addresses before any per-address probing. The hard verify
//! probes each surviving address's identity and applies the insider gate.
//! WATCH is always retryable; WHITE and BLACK are terminal for a run.

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use common::db::Database;
use common::ledger::{SYSTEM_PROGRAM, TOKEN_PROGRAM};
use common::types::ListStatus;

use crate::progress::Meter;
use crate::source::{HolderProbe, IdentityProbe};

pub const REASON_KNOWN_PROGRAM: &str = "known_program_or_system";
pub const REASON_PENDING_VERIFY: &str = "pending_verify";
pub const REASON_NO_ACCOUNT_INFO: &str = "no_account_info";
pub const REASON_INSIDER: &str = "insider_like_largest";
pub const REASON_EOA_NOT_INSIDER: &str = "eoalike_not_insider";
pub const REASON_RPC_ERROR: &str = "rpc_error_retry";

#[derive(Debug, Clone)]
pub struct ClassifyConfig {
    pub batch_limit: usize,
    pub insider_top_n: usize,
    pub progress_tick: usize,
}

impl ClassifyConfig {
    pub fn from_config(cfg: &common::config::Classify) -> Self {
        Self {
            batch_limit: cfg.batch_limit,
            insider_top_n: cfg.insider_top_n,
            progress_tick: cfg.progress_tick,
        }
    }
}

/// Per-outcome counts for one classification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounts {
    pub white: u64,
    pub watch: u64,
    pub black: u64,
}

/// Structural check against the known program/system identifier set.
pub fn is_program_like(addr: &str) -> bool {
    addr == SYSTEM_PROGRAM || addr == TOKEN_PROGRAM
}

fn record_outcome(stage: &'static str, status: ListStatus) {
    metrics::counter!(
        "scout_classified_total",
        "stage" => stage,
        "status" => status.as_str()
    )
    .increment(1);
}

/// Soft filter: known program/system roles go straight to BLACK, everything
/// else queues for hard verification. No network calls.
pub fn soft_filter(
    db: &Database,
    cfg: &ClassifyConfig,
    cancel: &CancellationToken,
) -> Result<StageCounts> {
    let pending = db.fetch_pending(cfg.batch_limit)?;
    tracing::info!(candidates = pending.len(), "soft filter start");

    let mut counts = StageCounts::default();
    let mut meter = Meter::new("soft", pending.len(), cfg.progress_tick);
    for row in pending {
        if cancel.is_cancelled() {
            tracing::info!("soft filter cancelled");
            break;
        }
        if is_program_like(&row.addr) {
            db.set_status(&row.addr, &row.chain, ListStatus::Black, REASON_KNOWN_PROGRAM)?;
            record_outcome("soft", ListStatus::Black);
            counts.black += 1;
        } else {
            db.set_status(&row.addr, &row.chain, ListStatus::Watch, REASON_PENDING_VERIFY)?;
            record_outcome("soft", ListStatus::Watch);
            counts.watch += 1;
        }
        meter.step(true);
    }

    tracing::info!(
        watch = counts.watch,
        black = counts.black,
        "soft filter done"
    );
    Ok(counts)
}

/// True when `owner` shows up among the token's `top_n` largest current
/// holders. A failing probe resolves to `false`: classification errors here
/// must favor keeping an address, not discarding it.
pub async fn is_insider_like<S: HolderProbe>(
    source: &S,
    owner: &str,
    mint: &str,
    top_n: usize,
) -> bool {
    match source.largest_holders(mint, top_n).await {
        Ok(tops) => tops.iter().any(|a| a.address == owner),
        Err(e) => {
            tracing::debug!(owner, error = %e, "insider probe failed, failing open");
            false
        }
    }
}

/// Hard verification of WATCH/CANDIDATE addresses via the identity probe.
///
/// Plain externally-owned accounts (non-executable, owned by the system
/// program) pass through the insider gate; every other identity is BLACK.
/// Unknown identity and probe errors stay WATCH for a later pass.
pub async fn hard_verify<S>(
    db: &Database,
    source: &S,
    cfg: &ClassifyConfig,
    cancel: &CancellationToken,
) -> Result<StageCounts>
where
    S: IdentityProbe + HolderProbe + Sync,
{
    let rows = db.fetch_pending(cfg.batch_limit)?;
    tracing::info!(rows = rows.len(), "hard verify start");

    let mut counts = StageCounts::default();
    let mut meter = Meter::new("hard", rows.len(), cfg.progress_tick);
    for row in rows {
        if cancel.is_cancelled() {
            tracing::info!("hard verify cancelled");
            break;
        }
        let mut ok = true;
        let (status, reason) = match source.account_identity(&row.addr).await {
            Ok(None) => (ListStatus::Watch, REASON_NO_ACCOUNT_INFO.to_string()),
            Ok(Some(identity)) => {
                if !identity.executable && identity.owner == SYSTEM_PROGRAM {
                    if is_insider_like(source, &row.addr, &row.token_address, cfg.insider_top_n)
                        .await
                    {
                        (ListStatus::Black, REASON_INSIDER.to_string())
                    } else {
                        (ListStatus::White, REASON_EOA_NOT_INSIDER.to_string())
                    }
                } else {
                    (
                        ListStatus::Black,
                        format!("non_system_owner:{}", identity.owner),
                    )
                }
            }
            Err(e) => {
                tracing::debug!(addr = %row.addr, error = %e, "identity probe failed");
                ok = false;
                (ListStatus::Watch, REASON_RPC_ERROR.to_string())
            }
        };

        db.set_status(&row.addr, &row.chain, status, &reason)?;
        record_outcome("hard", status);
        match status {
            ListStatus::White => counts.white += 1,
            ListStatus::Watch => counts.watch += 1,
            ListStatus::Black => counts.black += 1,
            ListStatus::Candidate => {}
        }
        meter.step(ok);
    }

    tracing::info!(
        white = counts.white,
        watch = counts.watch,
        black = counts.black,
        "hard verify done"
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ledger::RpcError;
    use common::types::{AccountIdentity, DiscoverySource, LargestAccount, TokenAccount};
    use std::collections::HashMap;

    fn mem_db() -> Database {
        let db = Database::open(":memory:").unwrap();
        db.run_migrations().unwrap();
        db
    }

    fn cfg() -> ClassifyConfig {
        ClassifyConfig {
            batch_limit: 100,
            insider_top_n: 20,
            progress_tick: 25,
        }
    }

    fn seed(db: &Database, addrs: &[&str]) {
        let addrs: Vec<String> = addrs.iter().map(|s| s.to_string()).collect();
        db.add_candidates("sol", "mintX", &addrs, DiscoverySource::HolderSnapshot)
            .unwrap();
    }

    #[test]
    fn test_soft_filter_blacklists_programs_and_queues_rest() {
        let db = mem_db();
        seed(&db, &[SYSTEM_PROGRAM, TOKEN_PROGRAM, "wallet1", "wallet2"]);

        let counts = soft_filter(&db, &cfg(), &CancellationToken::new()).unwrap();
        assert_eq!(counts.black, 2);
        assert_eq!(counts.watch, 2);
        assert_eq!(counts.white, 0);

        let (status, reason) = db.get_status(SYSTEM_PROGRAM, "sol").unwrap().unwrap();
        assert_eq!(status, ListStatus::Black);
        assert_eq!(reason, REASON_KNOWN_PROGRAM);

        let (status, reason) = db.get_status("wallet1", "sol").unwrap().unwrap();
        assert_eq!(status, ListStatus::Watch);
        assert_eq!(reason, REASON_PENDING_VERIFY);
    }

    #[test]
    fn test_soft_filter_is_idempotent() {
        let db = mem_db();
        seed(&db, &["wallet1", "wallet2", TOKEN_PROGRAM]);

        soft_filter(&db, &cfg(), &CancellationToken::new()).unwrap();
        let first: Vec<_> = ["wallet1", "wallet2", TOKEN_PROGRAM]
            .iter()
            .map(|a| db.get_status(a, "sol").unwrap())
            .collect();

        // Second run over the untouched store reproduces the assignments.
        // (BLACK rows fall out of the pending set, WATCH rows re-assign the
        // same status.)
        let counts = soft_filter(&db, &cfg(), &CancellationToken::new()).unwrap();
        assert_eq!(counts.black, 0);
        let second: Vec<_> = ["wallet1", "wallet2", TOKEN_PROGRAM]
            .iter()
            .map(|a| db.get_status(a, "sol").unwrap())
            .collect();
        assert_eq!(first, second);
    }

    struct FakeProbe {
        identities: HashMap<String, Result<Option<AccountIdentity>, RpcError>>,
        tops: Result<Vec<String>, ()>,
    }

    impl FakeProbe {
        fn clone_identity(
            &self,
            addr: &str,
        ) -> Result<Option<AccountIdentity>, RpcError> {
            match self.identities.get(addr) {
                Some(Ok(id)) => Ok(id.clone()),
                Some(Err(_)) => Err(RpcError::Timeout),
                None => Ok(None),
            }
        }
    }

    impl IdentityProbe for FakeProbe {
        async fn account_identity(
            &self,
            address: &str,
        ) -> Result<Option<AccountIdentity>, RpcError> {
            self.clone_identity(address)
        }
    }

    impl HolderProbe for FakeProbe {
        async fn largest_holders(
            &self,
            _mint: &str,
            n: usize,
        ) -> Result<Vec<LargestAccount>, RpcError> {
            match &self.tops {
                Ok(tops) => Ok(tops
                    .iter()
                    .take(n)
                    .map(|a| LargestAccount {
                        address: a.clone(),
                        amount: "1".to_string(),
                    })
                    .collect()),
                Err(()) => Err(RpcError::Timeout),
            }
        }

        async fn token_accounts_by_mint(
            &self,
            _mint: &str,
        ) -> Result<Vec<TokenAccount>, RpcError> {
            Ok(Vec::new())
        }
    }

    fn eoa() -> AccountIdentity {
        AccountIdentity {
            executable: false,
            owner: SYSTEM_PROGRAM.to_string(),
        }
    }

    #[tokio::test]
    async fn test_hard_verify_outcomes() {
        let db = mem_db();
        seed(
            &db,
            &["plain", "insider", "program", "missing", "flaky"],
        );

        let identities: HashMap<String, Result<Option<AccountIdentity>, RpcError>> = [
            ("plain".to_string(), Ok(Some(eoa()))),
            ("insider".to_string(), Ok(Some(eoa()))),
            (
                "program".to_string(),
                Ok(Some(AccountIdentity {
                    executable: true,
                    owner: "BPFLoaderUpgradeab1e11111111111111111111111".to_string(),
                })),
            ),
            ("missing".to_string(), Ok(None)),
            ("flaky".to_string(), Err(RpcError::Timeout)),
        ]
        .into_iter()
        .collect();
        let source = FakeProbe {
            identities,
            tops: Ok(vec!["insider".to_string()]),
        };

        let counts = hard_verify(&db, &source, &cfg(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(counts.white, 1);
        assert_eq!(counts.black, 2);
        assert_eq!(counts.watch, 2);

        let (status, reason) = db.get_status("plain", "sol").unwrap().unwrap();
        assert_eq!((status, reason.as_str()), (ListStatus::White, REASON_EOA_NOT_INSIDER));

        let (status, reason) = db.get_status("insider", "sol").unwrap().unwrap();
        assert_eq!((status, reason.as_str()), (ListStatus::Black, REASON_INSIDER));

        let (status, reason) = db.get_status("program", "sol").unwrap().unwrap();
        assert_eq!(status, ListStatus::Black);
        assert!(reason.starts_with("non_system_owner:"));

        let (status, reason) = db.get_status("missing", "sol").unwrap().unwrap();
        assert_eq!((status, reason.as_str()), (ListStatus::Watch, REASON_NO_ACCOUNT_INFO));

        let (status, reason) = db.get_status("flaky", "sol").unwrap().unwrap();
        assert_eq!((status, reason.as_str()), (ListStatus::Watch, REASON_RPC_ERROR));
    }

    #[tokio::test]
    async fn test_insider_probe_failure_fails_open() {
        // Intentional policy: a failed largest-holders probe must not turn
        // into a BLACK verdict, even though that can let an insider through.
        let source = FakeProbe {
            identities: HashMap::new(),
            tops: Err(()),
        };
        assert!(!is_insider_like(&source, "anyone", "mintX", 20).await);
    }

    #[tokio::test]
    async fn test_eoa_not_in_top_holders_goes_white() {
        let db = mem_db();
        seed(&db, &["clean_wallet"]);
        let source = FakeProbe {
            identities: [("clean_wallet".to_string(), Ok(Some(eoa())))]
                .into_iter()
                .collect(),
            tops: Ok((0..20).map(|i| format!("whale{i}")).collect()),
        };

        hard_verify(&db, &source, &cfg(), &CancellationToken::new())
            .await
            .unwrap();
        let (status, reason) = db.get_status("clean_wallet", "sol").unwrap().unwrap();
        assert_eq!(status, ListStatus::White);
        assert_eq!(reason, REASON_EOA_NOT_INSIDER);
    }
}
