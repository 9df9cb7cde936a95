//! Fetch seams between the engine and the ledger data source.
//!
//! Each engine component is generic over the narrow trait it needs, so tests
//! drive them with scripted fakes and production wires them to the JSON-RPC
//! clients. The impls here add per-endpoint metrics on top of the raw calls.

use std::future::Future;
use std::time::Instant;

use common::ledger::{EvmClient, RpcError, SolanaClient};
use common::types::{
    AccountIdentity, ConfirmedTransaction, LargestAccount, LogEntry, SignatureInfo, TokenAccount,
};

/// EVM-style range query for transfer logs of a token contract.
pub trait EventScan {
    fn transfer_logs(
        &self,
        token: &str,
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = Result<Vec<LogEntry>, RpcError>> + Send;
}

/// Per-address history replay: signatures of an account, full transactions,
/// and the owner's token accounts for a mint.
pub trait SignatureReplay {
    fn signatures(
        &self,
        address: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<SignatureInfo>, RpcError>> + Send;

    fn transaction(
        &self,
        signature: &str,
    ) -> impl Future<Output = Result<Option<ConfirmedTransaction>, RpcError>> + Send;

    fn token_accounts(
        &self,
        owner: &str,
        mint: &str,
    ) -> impl Future<Output = Result<Vec<TokenAccount>, RpcError>> + Send;
}

/// Point query for an account's executability and owning program.
/// `Ok(None)` means the account provably does not exist; `Err` means the
/// probe failed and nothing is known.
pub trait IdentityProbe {
    fn account_identity(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<Option<AccountIdentity>, RpcError>> + Send;
}

/// Holder-set queries feeding the insider heuristic and discovery.
pub trait HolderProbe {
    fn largest_holders(
        &self,
        mint: &str,
        n: usize,
    ) -> impl Future<Output = Result<Vec<LargestAccount>, RpcError>> + Send;

    fn token_accounts_by_mint(
        &self,
        mint: &str,
    ) -> impl Future<Output = Result<Vec<TokenAccount>, RpcError>> + Send;
}

pub trait SupplyProbe {
    fn token_decimals(&self, mint: &str) -> impl Future<Output = Result<u8, RpcError>> + Send;
}

/// Native-unit balance of an address (SOL, BNB, ...).
pub trait BalanceProbe {
    fn native_balance(&self, address: &str)
        -> impl Future<Output = Result<f64, RpcError>> + Send;
}

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

async fn instrument<T, F>(endpoint: &'static str, fut: F) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    let start = Instant::now();
    let res = fut.await;
    let ms = start.elapsed().as_secs_f64() * 1000.0;
    metrics::histogram!("scout_rpc_latency_ms", "endpoint" => endpoint).record(ms);
    match &res {
        Ok(_) => {
            metrics::counter!("scout_rpc_requests_total", "endpoint" => endpoint, "status" => "ok")
                .increment(1);
        }
        Err(e) => {
            metrics::counter!("scout_rpc_requests_total", "endpoint" => endpoint, "status" => "error")
                .increment(1);
            metrics::counter!("scout_rpc_errors_total", "endpoint" => endpoint, "kind" => e.kind())
                .increment(1);
        }
    }
    res
}

impl SignatureReplay for SolanaClient {
    async fn signatures(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, RpcError> {
        instrument("signatures", self.get_signatures(address, limit)).await
    }

    async fn transaction(
        &self,
        signature: &str,
    ) -> Result<Option<ConfirmedTransaction>, RpcError> {
        instrument("transaction", self.get_transaction(signature)).await
    }

    async fn token_accounts(
        &self,
        owner: &str,
        mint: &str,
    ) -> Result<Vec<TokenAccount>, RpcError> {
        instrument(
            "token_accounts_by_owner",
            self.get_token_accounts_by_owner(owner, mint),
        )
        .await
    }
}

impl IdentityProbe for SolanaClient {
    async fn account_identity(&self, address: &str) -> Result<Option<AccountIdentity>, RpcError> {
        instrument("account_identity", self.get_account_identity(address)).await
    }
}

impl HolderProbe for SolanaClient {
    async fn largest_holders(&self, mint: &str, n: usize) -> Result<Vec<LargestAccount>, RpcError> {
        instrument("largest_holders", self.get_largest_holders(mint, n)).await
    }

    async fn token_accounts_by_mint(&self, mint: &str) -> Result<Vec<TokenAccount>, RpcError> {
        instrument(
            "token_accounts_by_mint",
            self.get_token_accounts_by_mint(mint),
        )
        .await
    }
}

impl SupplyProbe for SolanaClient {
    async fn token_decimals(&self, mint: &str) -> Result<u8, RpcError> {
        let supply = instrument("token_supply", self.get_token_supply(mint)).await?;
        Ok(supply.decimals)
    }
}

impl BalanceProbe for SolanaClient {
    async fn native_balance(&self, address: &str) -> Result<f64, RpcError> {
        let lamports = instrument("balance", self.get_balance(address)).await?;
        Ok(lamports as f64 / LAMPORTS_PER_SOL)
    }
}

impl EventScan for EvmClient {
    async fn transfer_logs(
        &self,
        token: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>, RpcError> {
        instrument(
            "transfer_logs",
            EvmClient::transfer_logs(self, token, from_block, to_block),
        )
        .await
    }
}

impl BalanceProbe for EvmClient {
    async fn native_balance(&self, address: &str) -> Result<f64, RpcError> {
        instrument("evm_balance", EvmClient::native_balance(self, address)).await
    }
}
