//! Optional USD price lookup.
//!
//! Absence of a configured source, and every failure mode, resolves to
//! `None`; "price unknown" must flow through as missing fiat fields, never
//! as a zero price.

use std::time::Duration;

use serde_json::Value;

pub struct PriceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl PriceClient {
    /// Returns `None` when no base URL is configured; callers then skip
    /// fiat conversion entirely.
    pub fn from_config(base_url: Option<&str>, api_key: Option<&str>) -> Option<Self> {
        let base_url = base_url?.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return None;
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(8))
            .build()
            .ok()?;
        Some(Self {
            http,
            base_url,
            api_key: api_key.map(str::to_string),
        })
    }

    pub async fn get_price_usd(&self, token: &str) -> Option<f64> {
        let url = format!(
            "{}/public/price?address={token}&chain=solana",
            self.base_url
        );
        let mut req = self.http.get(&url);
        if let Some(key) = &self.api_key {
            req = req.header("X-API-KEY", key);
        }
        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "price lookup failed");
                return None;
            }
        };
        if !resp.status().is_success() {
            tracing::debug!(status = %resp.status(), "price lookup rejected");
            return None;
        }
        let body: Value = resp.json().await.ok()?;
        extract_price(&body)
    }
}

/// Providers disagree on response shape; probe the common spellings.
fn extract_price(body: &Value) -> Option<f64> {
    for key in ["price", "value", "data"] {
        let Some(v) = body.get(key) else { continue };
        if let Some(p) = v.as_f64() {
            return Some(p);
        }
        if v.is_object() {
            for inner in ["price", "value", "usd"] {
                if let Some(p) = v.get(inner).and_then(Value::as_f64) {
                    return Some(p);
                }
            }
        }
        if let Some(p) = v.as_str().and_then(|s| s.parse().ok()) {
            return Some(p);
        }
    }
    None
}
