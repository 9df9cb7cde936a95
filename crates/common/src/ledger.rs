//! JSON-RPC clients for the ledger data source.
//!
//! Two transports speak to the same semantic event space: `SolanaClient`
//! (signature replay, account probes, holder enumeration) and `EvmClient`
//! (Transfer-log range queries). Both classify provider failures into the
//! typed [`RpcError`] taxonomy so callers can tell "retry later" from
//! "shrink the range" from "no evidence".

use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

use crate::types::{
    AccountIdentity, ConfirmedTransaction, LargestAccount, LogEntry, SignatureInfo, TokenAccount,
    TokenSupply,
};

pub const SYSTEM_PROGRAM: &str = "11111111111111111111111111111111";
pub const TOKEN_PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

/// keccak256("Transfer(address,address,uint256)")
pub const EVM_TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("provider rejected range query: {message}")]
    OversizedRange { message: String },

    #[error("provider error {code}: {message}")]
    Provider { code: i64, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for RpcError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(e)
        }
    }
}

impl RpcError {
    pub fn is_oversized_range(&self) -> bool {
        matches!(self, Self::OversizedRange { .. })
    }

    /// Worth retrying with backoff. Oversized-range rejections are not;
    /// the caller has to shrink the query instead.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Provider { code, .. } => *code == 429,
            Self::OversizedRange { .. } | Self::Malformed(_) => false,
        }
    }

    /// Stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout => "timeout",
            Self::OversizedRange { .. } => "oversized_range",
            Self::Provider { .. } => "provider",
            Self::Malformed(_) => "malformed",
        }
    }
}

/// Map a JSON-RPC error object onto the taxonomy. Providers are inconsistent
/// about how they reject wide range queries, so this matches both the common
/// error codes and message fragments.
fn classify_provider_error(code: i64, message: &str) -> RpcError {
    let msg = message.to_ascii_lowercase();
    let range_fragments = [
        "block range",
        "range too",
        "range is too",
        "too many results",
        "query returned more than",
        "limit exceeded",
        "response size exceeded",
    ];
    if code == -32005 || range_fragments.iter().any(|f| msg.contains(f)) {
        RpcError::OversizedRange {
            message: message.to_string(),
        }
    } else {
        RpcError::Provider {
            code,
            message: message.to_string(),
        }
    }
}

/// Unwrap a JSON-RPC envelope into its `result`, classifying `error` objects.
fn decode_envelope(body: Value) -> Result<Value, RpcError> {
    if let Some(err) = body.get("error") {
        let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        return Err(classify_provider_error(code, &message));
    }
    match body.get("result") {
        Some(result) => Ok(result.clone()),
        None => Err(RpcError::Malformed("missing result field".to_string())),
    }
}

/// Cooperative throttle shared by every caller of one transport. Enforces a
/// minimum gap between request starts even when callers run concurrently.
struct RateLimiter {
    next_at: tokio::sync::Mutex<tokio::time::Instant>,
    delay: Duration,
}

impl RateLimiter {
    fn new(delay: Duration) -> Self {
        Self {
            next_at: tokio::sync::Mutex::new(tokio::time::Instant::now()),
            delay,
        }
    }

    async fn acquire(&self) {
        if self.delay.is_zero() {
            return;
        }
        let wait = {
            let mut next_at = self.next_at.lock().await;
            let now = tokio::time::Instant::now();
            let start = (*next_at).max(now);
            *next_at = start + self.delay;
            start.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Settings shared by both transports.
#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub timeout: Duration,
    pub rate_limit_delay: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            rate_limit_delay: Duration::from_millis(50),
            max_retries: 3,
            backoff_base: Duration::from_millis(300),
        }
    }
}

struct RpcTransport {
    http: reqwest::Client,
    url: String,
    limiter: RateLimiter,
    max_retries: u32,
    backoff_base: Duration,
}

impl RpcTransport {
    fn new(url: &str, settings: &RpcSettings) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::new(settings.rate_limit_delay),
            max_retries: settings.max_retries,
            backoff_base: settings.backoff_base,
        })
    }

    async fn call_once(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.limiter.acquire().await;
        let payload = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
        let resp = self.http.post(&self.url).json(&payload).send().await?;
        let status = resp.status();
        if !status.is_success() {
            // Oversized range queries commonly come back as plain HTTP 400/413.
            let body = resp.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                400 | 413 | 414 => RpcError::OversizedRange {
                    message: format!("http {status}: {body}"),
                },
                429 => RpcError::Provider {
                    code: 429,
                    message: body,
                },
                code => RpcError::Provider {
                    code: i64::from(code),
                    message: body,
                },
            });
        }
        let body: Value = resp.json().await?;
        decode_envelope(body)
    }

    /// One RPC call with bounded retry on transient failures. Oversized-range
    /// rejections return immediately so the caller can shrink its query.
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let mut attempt = 0_u32;
        loop {
            match self.call_once(method, params.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let backoff = self.backoff_base * 2_u32.saturating_pow(attempt);
                    tracing::debug!(method, attempt, error = %e, "rpc retry");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

pub struct SolanaClient {
    transport: RpcTransport,
}

impl SolanaClient {
    pub fn new(rpc_url: &str) -> Result<Self, RpcError> {
        Self::with_settings(rpc_url, &RpcSettings::default())
    }

    pub fn with_settings(rpc_url: &str, settings: &RpcSettings) -> Result<Self, RpcError> {
        Ok(Self {
            transport: RpcTransport::new(rpc_url, settings)?,
        })
    }

    pub async fn get_signatures(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, RpcError> {
        let result = self
            .transport
            .call(
                "getSignaturesForAddress",
                json!([address, {"limit": limit}]),
            )
            .await?;
        if result.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(result).map_err(|e| RpcError::Malformed(e.to_string()))
    }

    pub async fn get_transaction(
        &self,
        signature: &str,
    ) -> Result<Option<ConfirmedTransaction>, RpcError> {
        let result = self
            .transport
            .call(
                "getTransaction",
                json!([signature, {"encoding": "json", "maxSupportedTransactionVersion": 0}]),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .map_err(|e| RpcError::Malformed(e.to_string()))
    }

    pub async fn get_block_time(&self, slot: u64) -> Result<Option<i64>, RpcError> {
        let result = self.transport.call("getBlockTime", json!([slot])).await?;
        Ok(result.as_i64())
    }

    /// `None` means the account does not exist at this commitment, which is
    /// different from a failed probe (an `Err`).
    pub async fn get_account_identity(
        &self,
        pubkey: &str,
    ) -> Result<Option<AccountIdentity>, RpcError> {
        let result = self
            .transport
            .call(
                "getAccountInfo",
                json!([pubkey, {"encoding": "jsonParsed"}]),
            )
            .await?;
        let value = &result["value"];
        if value.is_null() {
            return Ok(None);
        }
        let executable = value["executable"].as_bool().unwrap_or(false);
        let owner = value["owner"].as_str().unwrap_or_default().to_string();
        Ok(Some(AccountIdentity { executable, owner }))
    }

    pub async fn get_largest_holders(
        &self,
        mint: &str,
        n: usize,
    ) -> Result<Vec<LargestAccount>, RpcError> {
        let result = self
            .transport
            .call("getTokenLargestAccounts", json!([mint]))
            .await?;
        let mut accounts: Vec<LargestAccount> =
            serde_json::from_value(result["value"].clone()).unwrap_or_default();
        accounts.truncate(n);
        Ok(accounts)
    }

    pub async fn get_token_supply(&self, mint: &str) -> Result<TokenSupply, RpcError> {
        let result = self
            .transport
            .call("getTokenSupply", json!([mint]))
            .await?;
        let decimals = result["value"]["decimals"]
            .as_u64()
            .ok_or_else(|| RpcError::Malformed("token supply without decimals".to_string()))?;
        let decimals = u8::try_from(decimals)
            .map_err(|_| RpcError::Malformed(format!("implausible decimals {decimals}")))?;
        Ok(TokenSupply { decimals })
    }

    pub async fn get_token_accounts_by_owner(
        &self,
        owner: &str,
        mint: &str,
    ) -> Result<Vec<TokenAccount>, RpcError> {
        let result = self
            .transport
            .call(
                "getTokenAccountsByOwner",
                json!([owner, {"mint": mint}, {"encoding": "jsonParsed"}]),
            )
            .await?;
        Ok(parse_token_accounts(&result["value"]))
    }

    /// All token accounts of a mint via getProgramAccounts (fixed 165-byte
    /// account size, mint at offset 0).
    pub async fn get_token_accounts_by_mint(
        &self,
        mint: &str,
    ) -> Result<Vec<TokenAccount>, RpcError> {
        let result = self
            .transport
            .call(
                "getProgramAccounts",
                json!([
                    TOKEN_PROGRAM,
                    {
                        "encoding": "jsonParsed",
                        "filters": [
                            {"dataSize": 165},
                            {"memcmp": {"offset": 0, "bytes": mint}}
                        ]
                    }
                ]),
            )
            .await?;
        Ok(parse_token_accounts(&result))
    }

    /// Native balance in lamports.
    pub async fn get_balance(&self, pubkey: &str) -> Result<u64, RpcError> {
        let result = self
            .transport
            .call("getBalance", json!([pubkey, {"commitment": "confirmed"}]))
            .await?;
        result["value"]
            .as_u64()
            .or_else(|| result.as_u64())
            .ok_or_else(|| RpcError::Malformed("balance without value".to_string()))
    }
}

/// Parse jsonParsed token-account entries, skipping base64-encoded ones.
fn parse_token_accounts(value: &Value) -> Vec<TokenAccount> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let pubkey = entry["pubkey"].as_str()?;
            let info = &entry["account"]["data"]["parsed"]["info"];
            if info.is_null() {
                return None;
            }
            Some(TokenAccount {
                pubkey: pubkey.to_string(),
                owner: info["owner"].as_str()?.to_string(),
                mint: info["mint"].as_str()?.to_string(),
                amount: info["tokenAmount"]["amount"]
                    .as_str()
                    .and_then(|a| a.parse().ok())
                    .unwrap_or(0),
            })
        })
        .collect()
}

pub struct EvmClient {
    transport: RpcTransport,
}

impl EvmClient {
    pub fn new(rpc_url: &str) -> Result<Self, RpcError> {
        Self::with_settings(rpc_url, &RpcSettings::default())
    }

    pub fn with_settings(rpc_url: &str, settings: &RpcSettings) -> Result<Self, RpcError> {
        Ok(Self {
            transport: RpcTransport::new(rpc_url, settings)?,
        })
    }

    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let result = self.transport.call("eth_blockNumber", json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| RpcError::Malformed("block number is not a string".to_string()))?;
        u64::from_str_radix(hex.trim_start_matches("0x"), 16)
            .map_err(|e| RpcError::Malformed(format!("bad block number {hex}: {e}")))
    }

    /// One unchunked eth_getLogs for Transfer events of `token`. Wide ranges
    /// get rejected by providers; the gateway wraps this with the adaptive
    /// span logic.
    pub async fn transfer_logs(
        &self,
        token: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>, RpcError> {
        let result = self
            .transport
            .call(
                "eth_getLogs",
                json!([{
                    "fromBlock": format!("0x{from_block:x}"),
                    "toBlock": format!("0x{to_block:x}"),
                    "address": token,
                    "topics": [EVM_TRANSFER_TOPIC]
                }]),
            )
            .await?;
        serde_json::from_value(result).map_err(|e| RpcError::Malformed(e.to_string()))
    }

    /// Native balance in whole coins (wei / 1e18).
    pub async fn native_balance(&self, address: &str) -> Result<f64, RpcError> {
        let result = self
            .transport
            .call("eth_getBalance", json!([address, "latest"]))
            .await?;
        let hex = result
            .as_str()
            .ok_or_else(|| RpcError::Malformed("balance is not a string".to_string()))?;
        let wei = u128::from_str_radix(hex.trim_start_matches("0x"), 16)
            .map_err(|e| RpcError::Malformed(format!("bad balance {hex}: {e}")))?;
        Ok(wei as f64 / 1e18)
    }
}
