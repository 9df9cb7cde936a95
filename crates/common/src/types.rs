use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverySource {
    HolderSnapshot,
    EarlyBuyerReplay,
    Manual,
}

impl DiscoverySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HolderSnapshot => "HOLDER_SNAPSHOT",
            Self::EarlyBuyerReplay => "EARLY_BUYER_REPLAY",
            Self::Manual => "MANUAL",
        }
    }
}

/// Classification status of an address. One mutable row per (address, chain);
/// later writes overwrite earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStatus {
    Candidate,
    Watch,
    White,
    Black,
}

impl ListStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Candidate => "CANDIDATE",
            Self::Watch => "WATCH",
            Self::White => "WHITE",
            Self::Black => "BLACK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CANDIDATE" => Some(Self::Candidate),
            "WATCH" => Some(Self::Watch),
            "WHITE" => Some(Self::White),
            "BLACK" => Some(Self::Black),
            _ => None,
        }
    }
}

/// On-chain identity of an account as reported by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountIdentity {
    pub executable: bool,
    pub owner: String,
}

/// Entry from getSignaturesForAddress.
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureInfo {
    pub signature: String,
    #[serde(rename = "blockTime")]
    pub block_time: Option<i64>,
    pub slot: u64,
    #[serde(default)]
    pub err: Option<serde_json::Value>,
}

/// Token balance snapshot inside transaction meta (pre/postTokenBalances).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenBalance {
    pub owner: Option<String>,
    pub mint: String,
    #[serde(rename = "uiTokenAmount")]
    pub ui_token_amount: UiTokenAmount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UiTokenAmount {
    pub amount: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TransactionMeta {
    #[serde(rename = "preTokenBalances", default)]
    pub pre_token_balances: Vec<TokenBalance>,
    #[serde(rename = "postTokenBalances", default)]
    pub post_token_balances: Vec<TokenBalance>,
}

/// Confirmed transaction, reduced to the fields the replay needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmedTransaction {
    pub slot: u64,
    #[serde(rename = "blockTime")]
    pub block_time: Option<i64>,
    #[serde(default)]
    pub meta: Option<TransactionMeta>,
}

/// Entry from getTokenLargestAccounts. `address` is a token account, not an
/// owner wallet.
#[derive(Debug, Clone, Deserialize)]
pub struct LargestAccount {
    pub address: String,
    pub amount: String,
}

/// Token account with parsed owner/amount, from getTokenAccountsByOwner or
/// getProgramAccounts with jsonParsed encoding.
#[derive(Debug, Clone)]
pub struct TokenAccount {
    pub pubkey: String,
    pub owner: String,
    pub mint: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct TokenSupply {
    pub decimals: u8,
}

/// EVM transfer log, reduced to what discovery and T0 estimation use.
#[derive(Debug, Clone, Deserialize)]
pub struct LogEntry {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
}

impl LogEntry {
    /// Block number parsed from the 0x-prefixed hex the provider returns.
    pub fn block_number_u64(&self) -> Option<u64> {
        u64::from_str_radix(self.block_number.trim_start_matches("0x"), 16).ok()
    }

    /// Decode a 32-byte topic into a 20-byte 0x address.
    pub fn topic_address(topic: &str) -> Option<String> {
        if topic.len() == 66 && topic.starts_with("0x") {
            Some(format!("0x{}", &topic[26..]))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_status_round_trip() {
        for s in [
            ListStatus::Candidate,
            ListStatus::Watch,
            ListStatus::White,
            ListStatus::Black,
        ] {
            assert_eq!(ListStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(ListStatus::parse("GREY"), None);
    }

    #[test]
    fn test_discovery_source_display() {
        assert_eq!(DiscoverySource::HolderSnapshot.as_str(), "HOLDER_SNAPSHOT");
        assert_eq!(
            DiscoverySource::EarlyBuyerReplay.as_str(),
            "EARLY_BUYER_REPLAY"
        );
        assert_eq!(DiscoverySource::Manual.as_str(), "MANUAL");
    }

    #[test]
    fn test_parse_signature_infos() {
        let json = r#"[{"signature":"5Kd","blockTime":1700000000,"slot":42,"err":null},
                       {"signature":"9Xy","blockTime":null,"slot":43}]"#;
        let sigs: Vec<SignatureInfo> = serde_json::from_str(json).unwrap();
        assert_eq!(sigs.len(), 2);
        assert_eq!(sigs[0].block_time, Some(1_700_000_000));
        assert!(sigs[1].block_time.is_none());
    }

    #[test]
    fn test_parse_transaction_meta_balances() {
        let json = r#"{
            "slot": 99,
            "blockTime": 1700000100,
            "meta": {
                "preTokenBalances": [
                    {"owner":"walletA","mint":"mintX","uiTokenAmount":{"amount":"100","decimals":6}}
                ],
                "postTokenBalances": [
                    {"owner":"walletA","mint":"mintX","uiTokenAmount":{"amount":"150","decimals":6}}
                ]
            }
        }"#;
        let tx: ConfirmedTransaction = serde_json::from_str(json).unwrap();
        let meta = tx.meta.unwrap();
        assert_eq!(meta.pre_token_balances[0].ui_token_amount.amount, "100");
        assert_eq!(meta.post_token_balances[0].ui_token_amount.amount, "150");
    }

    #[test]
    fn test_log_entry_decoding() {
        let log = LogEntry {
            address: "0xtoken".to_string(),
            topics: vec![
                "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef".to_string(),
            ],
            block_number: "0x1a".to_string(),
        };
        assert_eq!(log.block_number_u64(), Some(26));

        let topic = format!("0x{}{}", "0".repeat(24), "ab".repeat(20));
        assert_eq!(
            LogEntry::topic_address(&topic).unwrap(),
            format!("0x{}", "ab".repeat(20))
        );
        assert_eq!(LogEntry::topic_address("0xshort"), None);
    }
}
