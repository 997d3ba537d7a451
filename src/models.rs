use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::params::QueryParams;

/// One token-transfer event, as written to the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub event_index: u32,
    pub block_timestamp: i64,
    pub block_number: u64,
    pub contract_address: String,
    pub event_name: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: String,
}

/// Dedup identity of a record. A single transaction can emit several transfers,
/// so the event index is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub transaction_id: String,
    pub event_index: u32,
}

impl TransactionRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            transaction_id: self.transaction_id.clone(),
            event_index: self.event_index,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: Option<bool>,
    pub data: Option<Vec<Value>>,
    pub meta: Option<Meta>,
    pub error: Option<String>,
    #[serde(rename = "statusCode")]
    pub status_code: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
    pub at: Option<i64>,
    pub fingerprint: Option<String>,
    pub links: Option<Links>,
    pub page_size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Links {
    pub next: Option<String>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.success == Some(true)
    }

    pub fn next_link(&self) -> Option<&str> {
        self.meta
            .as_ref()
            .and_then(|meta| meta.links.as_ref())
            .and_then(|links| links.next.as_deref())
    }

    pub fn events(&self) -> &[Value] {
        self.data.as_deref().unwrap_or(&[])
    }
}

/// The two ways a page is requested: a fresh query against the events endpoint, or
/// a server-supplied next link that already encodes everything.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Query { endpoint: Url, params: QueryParams },
    Follow(Url),
}

impl Request {
    pub fn url(&self) -> &Url {
        match self {
            Request::Query { endpoint, .. } => endpoint,
            Request::Follow(url) => url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_envelope_with_next_link() {
        let response: ApiResponse = serde_json::from_value(json!({
            "success": true,
            "data": [{"transaction_id": "a"}],
            "meta": {
                "at": 1,
                "fingerprint": "fp",
                "links": {"next": "https://api.trongrid.io/v1/next?fingerprint=fp"},
                "page_size": 1
            }
        }))
        .unwrap();

        assert!(response.is_success());
        assert_eq!(response.events().len(), 1);
        assert_eq!(
            response.next_link(),
            Some("https://api.trongrid.io/v1/next?fingerprint=fp")
        );
    }

    #[test]
    fn error_envelope_has_no_next_and_no_events() {
        let response: ApiResponse = serde_json::from_value(json!({
            "success": false,
            "error": "Invalid fingerprint",
            "statusCode": 400
        }))
        .unwrap();

        assert!(!response.is_success());
        assert!(response.next_link().is_none());
        assert!(response.events().is_empty());
        assert_eq!(response.status_code, Some(400));
    }

    #[test]
    fn missing_success_flag_is_not_success() {
        let response: ApiResponse = serde_json::from_value(json!({"data": []})).unwrap();
        assert_eq!(response.success, None);
        assert!(!response.is_success());
    }
}
