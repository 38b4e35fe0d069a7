//! HTTP ledger client
//!
//! Posts batches to a ledger gateway, the service that owns the signing key and
//! transaction sequencing, and classifies its reply.

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE},
    Client, StatusCode,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{LedgerClient, LedgerOutcome, PriceEntry};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::types::{AssetType, ContractRef};

/// Markers a gateway or the network uses for an underfunded signer
const INSUFFICIENT_BALANCE_MARKERS: [&str; 3] = [
    "txinsufficient_balance",
    "insufficient_balance",
    "insufficient balance",
];

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    function: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    signer: Option<&'a str>,
    entries: Vec<WireEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct WireEntry<'a> {
    source: u32,
    asset_type: AssetType,
    asset: &'a str,
    price: String,
    price_scaled: String,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct GatewayReply {
    status: String,
    #[serde(default)]
    tx_hash: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Ledger client backed by a JSON gateway
pub struct HttpLedgerClient {
    client: Client,
    endpoint: String,
    signer: Option<String>,
}

impl HttpLedgerClient {
    pub fn new(
        endpoint: &str,
        timeout: Duration,
        signer: Option<String>,
    ) -> Result<Self, LedgerError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| LedgerError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            signer,
        })
    }

    pub fn from_config(config: &LedgerConfig) -> Result<Self, LedgerError> {
        Self::new(
            &config.endpoint,
            Duration::from_secs(config.timeout_secs),
            config.signer.clone(),
        )
    }

    fn submit_url(&self, contract: &ContractRef) -> String {
        format!("{}/contracts/{}/prices", self.endpoint, contract)
    }

    fn build_request<'a>(
        &'a self,
        entries: &'a [PriceEntry],
    ) -> Result<SubmitRequest<'a>, LedgerError> {
        let entries = entries
            .iter()
            .map(|entry| -> Result<WireEntry<'a>, LedgerError> {
                Ok(WireEntry {
                    source: entry.source,
                    asset_type: entry.asset_type,
                    asset: entry.asset.as_str(),
                    price: entry.price.normalize().to_string(),
                    price_scaled: entry.scaled_price()?.to_string(),
                    timestamp: entry.timestamp,
                })
            })
            .collect::<Result<Vec<_>, LedgerError>>()?;

        Ok(SubmitRequest {
            function: "add_prices",
            signer: self.signer.as_deref(),
            entries,
        })
    }
}

/// Map a gateway reply onto the three outcomes the feeder distinguishes.
///
/// A parseable 2xx reply is classified by its `status` field alone. Text markers
/// are only consulted for error replies and bodies that are not gateway JSON.
pub(crate) fn classify_reply(status: StatusCode, body: &str) -> LedgerOutcome {
    if status.is_success() {
        if let Ok(reply) = serde_json::from_str::<GatewayReply>(body) {
            return match reply.status.as_str() {
                "success" => LedgerOutcome::success(body),
                "insufficient_balance" => LedgerOutcome::insufficient_balance(body),
                _ => {
                    debug!(
                        status = %reply.status,
                        error = ?reply.error,
                        tx_hash = ?reply.tx_hash,
                        "Gateway reported failure"
                    );
                    LedgerOutcome::failure(body)
                }
            };
        }
    }

    if mentions_insufficient_balance(body) {
        return LedgerOutcome::insufficient_balance(body);
    }

    if !status.is_success() {
        return LedgerOutcome::failure(format!("HTTP {}: {}", status.as_u16(), body));
    }
    LedgerOutcome::failure(format!("unparseable gateway reply: {}", body))
}

fn mentions_insufficient_balance(body: &str) -> bool {
    let lowered = body.to_ascii_lowercase();
    INSUFFICIENT_BALANCE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    fn name(&self) -> &'static str {
        "http-gateway"
    }

    async fn submit_price_batch(
        &self,
        contract: &ContractRef,
        entries: &[PriceEntry],
    ) -> Result<LedgerOutcome, LedgerError> {
        let request = self.build_request(entries)?;
        let url = self.submit_url(contract);
        debug!(url = %url, entries = entries.len(), "Submitting price batch");

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        Ok(classify_reply(status, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OutcomeKind;
    use rust_decimal_macros::dec;

    fn client() -> HttpLedgerClient {
        HttpLedgerClient::new(
            "http://gateway.local/",
            Duration::from_secs(5),
            Some("GSIGNER".to_string()),
        )
        .unwrap()
    }

    #[test]
    fn success_reply() {
        let outcome = classify_reply(StatusCode::OK, r#"{"status":"success","tx_hash":"ab12"}"#);
        assert_eq!(outcome.kind, OutcomeKind::Success);
        assert!(outcome.raw_response.contains("ab12"));
    }

    #[test]
    fn insufficient_balance_status() {
        let outcome = classify_reply(
            StatusCode::OK,
            r#"{"status":"insufficient_balance","error":"fee source underfunded"}"#,
        );
        assert_eq!(outcome.kind, OutcomeKind::InsufficientBalance);
    }

    #[test]
    fn success_status_wins_over_marker_text() {
        let outcome = classify_reply(
            StatusCode::OK,
            r#"{"status":"success","tx_hash":"ab","note":"fee account nearing insufficient balance"}"#,
        );
        assert_eq!(outcome.kind, OutcomeKind::Success);
    }

    #[test]
    fn failed_status_with_marker_text_is_a_failure() {
        let outcome = classify_reply(
            StatusCode::OK,
            r#"{"status":"failed","error":"retry later, not an insufficient balance"}"#,
        );
        assert_eq!(outcome.kind, OutcomeKind::Failure);
    }

    #[test]
    fn insufficient_balance_in_error_body() {
        let outcome = classify_reply(
            StatusCode::BAD_REQUEST,
            "transaction failed: txINSUFFICIENT_BALANCE",
        );
        assert_eq!(outcome.kind, OutcomeKind::InsufficientBalance);
    }

    #[test]
    fn http_error_is_failure() {
        let outcome = classify_reply(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(outcome.kind, OutcomeKind::Failure);
        assert!(outcome.raw_response.starts_with("HTTP 502"));
    }

    #[test]
    fn failed_status_and_garbage_are_failures() {
        let failed = classify_reply(
            StatusCode::OK,
            r#"{"status":"failed","error":"simulation rejected"}"#,
        );
        assert_eq!(failed.kind, OutcomeKind::Failure);

        let garbage = classify_reply(StatusCode::OK, "<html>");
        assert_eq!(garbage.kind, OutcomeKind::Failure);
        assert!(garbage.raw_response.contains("<html>"));
    }

    #[test]
    fn request_carries_scaled_prices() {
        let client = client();
        let entries = vec![PriceEntry {
            source: 1,
            asset_type: AssetType::Other,
            asset: "USD".to_string(),
            price: dec!(0.1300),
            timestamp: 1_700_000_400,
        }];
        let request = client.build_request(&entries).unwrap();
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["function"], "add_prices");
        assert_eq!(json["signer"], "GSIGNER");
        assert_eq!(json["entries"][0]["price"], "0.13");
        assert_eq!(json["entries"][0]["price_scaled"], "130000000000000000");
        assert_eq!(json["entries"][0]["asset_type"], "other");
    }

    #[test]
    fn request_rejects_unscalable_price() {
        let client = client();
        let entries = vec![PriceEntry {
            source: 0,
            asset_type: AssetType::Other,
            asset: "USD".to_string(),
            price: dec!(0.0000000000000000001),
            timestamp: 0,
        }];
        assert!(matches!(
            client.build_request(&entries),
            Err(LedgerError::InvalidEntry(_))
        ));
    }

    #[test]
    fn submit_url_trims_trailing_slash() {
        let client = client();
        assert_eq!(
            client.submit_url(&ContractRef::new("CABC")),
            "http://gateway.local/contracts/CABC/prices"
        );
    }
}
