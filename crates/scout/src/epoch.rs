//! Listing-epoch (T0) estimation.
//!
//! T0 is the minimum timestamp over three evidence classes: the token's own
//! earliest observable transactions, the earliest transactions of its largest
//! current holders, and a random subsample of current holders. Each class is
//! independently fault-tolerant: a failing class contributes nothing. The
//! estimate is a heuristic lower bound: sampling only addresses that still
//! hold the token biases it downward, which is accepted.

use rand::seq::SliceRandom;

use crate::source::{HolderProbe, SignatureReplay};

#[derive(Debug, Clone)]
pub struct EpochConfig {
    pub token_sample: usize,
    pub top_holder_accounts: usize,
    pub holder_sample: usize,
    pub signatures_per_account: usize,
}

impl EpochConfig {
    pub fn from_config(cfg: &common::config::Epoch) -> Self {
        Self {
            token_sample: cfg.token_sample,
            top_holder_accounts: cfg.top_holder_accounts,
            holder_sample: cfg.holder_sample,
            signatures_per_account: cfg.signatures_per_account,
        }
    }
}

/// Coarse offset of a round's entry from the token's listing epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBucket {
    Unknown,
    PreListing,
    UpTo2h,
    UpTo24h,
    UpTo72h,
    Beyond,
}

impl TimeBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::PreListing => "prelaunch",
            Self::UpTo2h => "0-2h",
            Self::UpTo24h => "2-24h",
            Self::UpTo72h => "24-72h",
            Self::Beyond => ">72h",
        }
    }

    /// Missing T0 disables bucketing, nothing else.
    pub fn from_entry(entry_ts: i64, t0: Option<i64>) -> Self {
        let Some(t0) = t0 else {
            return Self::Unknown;
        };
        let dt = entry_ts - t0;
        if dt < 0 {
            return Self::PreListing;
        }
        let hours = dt as f64 / 3600.0;
        if hours <= 2.0 {
            Self::UpTo2h
        } else if hours <= 24.0 {
            Self::UpTo24h
        } else if hours <= 72.0 {
            Self::UpTo72h
        } else {
            Self::Beyond
        }
    }
}

async fn token_evidence<S: SignatureReplay>(source: &S, mint: &str, sample: usize) -> Vec<i64> {
    match source.signatures(mint, sample).await {
        Ok(sigs) => sigs.into_iter().filter_map(|s| s.block_time).collect(),
        Err(e) => {
            tracing::debug!(mint, error = %e, "token evidence unavailable");
            Vec::new()
        }
    }
}

async fn top_holder_evidence<S: SignatureReplay + HolderProbe>(
    source: &S,
    mint: &str,
    cfg: &EpochConfig,
) -> Vec<i64> {
    let holders = match source.largest_holders(mint, cfg.top_holder_accounts).await {
        Ok(holders) => holders,
        Err(e) => {
            tracing::debug!(mint, error = %e, "largest holder evidence unavailable");
            return Vec::new();
        }
    };
    let mut times = Vec::new();
    for holder in holders {
        match source
            .signatures(&holder.address, cfg.signatures_per_account)
            .await
        {
            Ok(sigs) => times.extend(sigs.into_iter().filter_map(|s| s.block_time)),
            Err(e) => {
                tracing::debug!(account = %holder.address, error = %e, "holder signatures unavailable");
            }
        }
    }
    times
}

async fn sampled_holder_evidence<S: SignatureReplay + HolderProbe>(
    source: &S,
    mint: &str,
    cfg: &EpochConfig,
) -> Vec<i64> {
    let accounts = match source.token_accounts_by_mint(mint).await {
        Ok(accounts) => accounts,
        Err(e) => {
            tracing::debug!(mint, error = %e, "holder sample evidence unavailable");
            return Vec::new();
        }
    };
    let mut owners: Vec<String> = Vec::new();
    for account in accounts {
        if !owners.contains(&account.owner) {
            owners.push(account.owner);
        }
    }
    let sampled: Vec<String> = owners
        .choose_multiple(&mut rand::thread_rng(), cfg.holder_sample)
        .cloned()
        .collect();

    let mut times = Vec::new();
    for owner in sampled {
        let token_accounts = match source.token_accounts(&owner, mint).await {
            Ok(accounts) => accounts,
            Err(_) => continue,
        };
        for account in token_accounts {
            match source
                .signatures(&account.pubkey, cfg.signatures_per_account)
                .await
            {
                Ok(sigs) => times.extend(sigs.into_iter().filter_map(|s| s.block_time)),
                Err(_) => continue,
            }
        }
    }
    times
}

/// Estimate the token's listing epoch. `None` when no evidence at all could
/// be gathered.
pub async fn estimate_t0<S>(source: &S, mint: &str, cfg: &EpochConfig) -> Option<i64>
where
    S: SignatureReplay + HolderProbe + Sync,
{
    let mut candidates = token_evidence(source, mint, cfg.token_sample).await;
    candidates.extend(top_holder_evidence(source, mint, cfg).await);
    candidates.extend(sampled_holder_evidence(source, mint, cfg).await);

    let t0 = candidates.into_iter().min();
    match t0 {
        Some(t0) => tracing::info!(mint, t0, "listing epoch estimated"),
        None => tracing::info!(mint, "no listing epoch evidence"),
    }
    t0
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ledger::RpcError;
    use common::types::{ConfirmedTransaction, LargestAccount, SignatureInfo, TokenAccount};

    #[test]
    fn test_time_bucket_boundaries() {
        let t0 = Some(1_000);
        assert_eq!(TimeBucket::from_entry(999, t0), TimeBucket::PreListing);
        assert_eq!(TimeBucket::from_entry(1_000, t0), TimeBucket::UpTo2h);
        assert_eq!(TimeBucket::from_entry(1_000 + 7_200, t0), TimeBucket::UpTo2h);
        assert_eq!(
            TimeBucket::from_entry(1_000 + 7_201, t0),
            TimeBucket::UpTo24h
        );
        assert_eq!(
            TimeBucket::from_entry(1_000 + 86_400, t0),
            TimeBucket::UpTo24h
        );
        assert_eq!(
            TimeBucket::from_entry(1_000 + 259_200, t0),
            TimeBucket::UpTo72h
        );
        assert_eq!(
            TimeBucket::from_entry(1_000 + 259_201, t0),
            TimeBucket::Beyond
        );
        assert_eq!(TimeBucket::from_entry(1_000, None), TimeBucket::Unknown);
    }

    /// Fake with independently failable evidence classes.
    struct FakeEvidence {
        token_times: Result<Vec<i64>, ()>,
        holder_times: Result<Vec<i64>, ()>,
        sample_times: Result<Vec<i64>, ()>,
    }

    fn sigs_from(times: &[i64]) -> Vec<SignatureInfo> {
        times
            .iter()
            .enumerate()
            .map(|(i, t)| {
                serde_json::from_value(serde_json::json!({
                    "signature": format!("sig{i}_{t}"), "blockTime": t, "slot": 1
                }))
                .unwrap()
            })
            .collect()
    }

    impl SignatureReplay for FakeEvidence {
        async fn signatures(
            &self,
            address: &str,
            _limit: usize,
        ) -> Result<Vec<SignatureInfo>, RpcError> {
            let times = match address {
                "mint" => &self.token_times,
                "top_account" => &self.holder_times,
                "sampled_account" => &self.sample_times,
                _ => return Ok(Vec::new()),
            };
            match times {
                Ok(t) => Ok(sigs_from(t)),
                Err(()) => Err(RpcError::Timeout),
            }
        }

        async fn transaction(
            &self,
            _signature: &str,
        ) -> Result<Option<ConfirmedTransaction>, RpcError> {
            Ok(None)
        }

        async fn token_accounts(
            &self,
            owner: &str,
            mint: &str,
        ) -> Result<Vec<TokenAccount>, RpcError> {
            Ok(vec![TokenAccount {
                pubkey: "sampled_account".to_string(),
                owner: owner.to_string(),
                mint: mint.to_string(),
                amount: 1,
            }])
        }
    }

    impl HolderProbe for FakeEvidence {
        async fn largest_holders(
            &self,
            _mint: &str,
            _n: usize,
        ) -> Result<Vec<LargestAccount>, RpcError> {
            if self.holder_times.is_err() {
                return Err(RpcError::Timeout);
            }
            Ok(vec![LargestAccount {
                address: "top_account".to_string(),
                amount: "1000".to_string(),
            }])
        }

        async fn token_accounts_by_mint(&self, mint: &str) -> Result<Vec<TokenAccount>, RpcError> {
            if self.sample_times.is_err() {
                return Err(RpcError::Timeout);
            }
            Ok(vec![TokenAccount {
                pubkey: "sampled_account".to_string(),
                owner: "holder1".to_string(),
                mint: mint.to_string(),
                amount: 5,
            }])
        }
    }

    fn cfg() -> EpochConfig {
        EpochConfig {
            token_sample: 20,
            top_holder_accounts: 10,
            holder_sample: 15,
            signatures_per_account: 10,
        }
    }

    #[tokio::test]
    async fn test_estimate_takes_minimum_across_classes() {
        let source = FakeEvidence {
            token_times: Ok(vec![500, 400]),
            holder_times: Ok(vec![300]),
            sample_times: Ok(vec![350, 600]),
        };
        assert_eq!(estimate_t0(&source, "mint", &cfg()).await, Some(300));
    }

    #[tokio::test]
    async fn test_failing_class_contributes_nothing() {
        let source = FakeEvidence {
            token_times: Err(()),
            holder_times: Err(()),
            sample_times: Ok(vec![700]),
        };
        assert_eq!(estimate_t0(&source, "mint", &cfg()).await, Some(700));
    }

    #[tokio::test]
    async fn test_no_evidence_yields_none() {
        let source = FakeEvidence {
            token_times: Err(()),
            holder_times: Err(()),
            sample_times: Err(()),
        };
        assert_eq!(estimate_t0(&source, "mint", &cfg()).await, None);
    }
}
