use ethers_core::types::U256;
use serde_json::Value;
use tracing::warn;

use crate::error::RecordError;
use crate::models::{ApiResponse, TransactionRecord};

#[derive(Debug, Default)]
pub struct PageRecords {
    pub records: Vec<TransactionRecord>,
    pub malformed: usize,
}

pub fn extract_records(response: &ApiResponse) -> Vec<TransactionRecord> {
    extract(response).records
}

/// Converts every event on the page, keeping input order. A malformed event is
/// logged and skipped so the rest of the page survives.
pub fn extract(response: &ApiResponse) -> PageRecords {
    let mut page = PageRecords::default();

    for (position, raw) in response.events().iter().enumerate() {
        match parse_event(raw) {
            Ok(record) => page.records.push(record),
            Err(e) => {
                page.malformed += 1;
                let id = raw
                    .get("transaction_id")
                    .and_then(Value::as_str)
                    .unwrap_or("<no transaction_id>");
                warn!("dropping malformed event #{} ({}): {}", position, id, e);
            }
        }
    }

    page
}

pub fn parse_event(raw: &Value) -> Result<TransactionRecord, RecordError> {
    let result = raw
        .get("result")
        .filter(|v| v.is_object())
        .ok_or(RecordError::MissingField("result"))?;

    let block_timestamp = required_i64(raw, "block_timestamp")?;
    if block_timestamp < 0 {
        return Err(RecordError::InvalidField {
            field: "block_timestamp",
            value: block_timestamp.to_string(),
        });
    }

    let event_index = match raw.get("event_index") {
        None | Some(Value::Null) => 0,
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| RecordError::InvalidField {
                field: "event_index",
                value: v.to_string(),
            })?,
    };

    Ok(TransactionRecord {
        transaction_id: required_str(raw, "transaction_id")?,
        event_index,
        block_timestamp,
        block_number: required_u64(raw, "block_number")?,
        contract_address: required_str(raw, "contract_address")?,
        event_name: raw
            .get("event_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        from_address: required_str(result, "from")?,
        to_address: required_str(result, "to")?,
        amount: parse_amount(result.get("value"))?,
    })
}

fn required_str(obj: &Value, field: &'static str) -> Result<String, RecordError> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Null) | None => Err(RecordError::MissingField(field)),
        Some(other) => Err(RecordError::InvalidField {
            field,
            value: other.to_string(),
        }),
    }
}

fn required_i64(obj: &Value, field: &'static str) -> Result<i64, RecordError> {
    let value = obj.get(field).ok_or(RecordError::MissingField(field))?;
    value.as_i64().ok_or_else(|| RecordError::InvalidField {
        field,
        value: value.to_string(),
    })
}

fn required_u64(obj: &Value, field: &'static str) -> Result<u64, RecordError> {
    let value = obj.get(field).ok_or(RecordError::MissingField(field))?;
    value.as_u64().ok_or_else(|| RecordError::InvalidField {
        field,
        value: value.to_string(),
    })
}

// Amounts are uint256 on chain; TronGrid sends them as decimal strings, occasionally as numbers.
fn parse_amount(value: Option<&Value>) -> Result<String, RecordError> {
    let raw = match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) if n.is_u64() => n.to_string(),
        Some(Value::Null) | None => return Err(RecordError::MissingField("value")),
        Some(other) => {
            return Err(RecordError::InvalidField {
                field: "value",
                value: other.to_string(),
            })
        }
    };

    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RecordError::InvalidField {
            field: "value",
            value: raw,
        });
    }

    U256::from_dec_str(&raw)
        .map(|amount| amount.to_string())
        .map_err(|_| RecordError::InvalidField {
            field: "value",
            value: raw,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn raw_event(id: &str, ts: i64) -> Value {
        json!({
            "block_number": 51_234_567u64,
            "block_timestamp": ts,
            "caller_contract_address": "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t",
            "contract_address": "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t",
            "event_index": 1,
            "event_name": "Transfer",
            "result": {
                "0": "0x9f2d47b8ab4b2a5c3c6e7f1b3a10e2a7c1d5e6f0",
                "1": "0x1a2b3c4d5e6f708192a3b4c5d6e7f8091a2b3c4d",
                "2": "1500000",
                "from": "0x9f2d47b8ab4b2a5c3c6e7f1b3a10e2a7c1d5e6f0",
                "to": "0x1a2b3c4d5e6f708192a3b4c5d6e7f8091a2b3c4d",
                "value": "1500000"
            },
            "transaction_id": id
        })
    }

    #[test]
    fn parses_transfer_event() {
        let record = parse_event(&raw_event("abc", 1_688_000_000_000)).unwrap();
        assert_eq!(record.transaction_id, "abc");
        assert_eq!(record.event_index, 1);
        assert_eq!(record.block_timestamp, 1_688_000_000_000);
        assert_eq!(record.block_number, 51_234_567);
        assert_eq!(record.event_name, "Transfer");
        assert_eq!(record.amount, "1500000");
        assert_eq!(record.from_address, "0x9f2d47b8ab4b2a5c3c6e7f1b3a10e2a7c1d5e6f0");
    }

    #[test]
    fn keeps_amounts_beyond_u64() {
        let mut raw = raw_event("big", 1);
        raw["result"]["value"] = json!("115792089237316195423570985008687907853269984665640564039457584007913129639935");
        let record = parse_event(&raw).unwrap();
        assert_eq!(
            record.amount,
            "115792089237316195423570985008687907853269984665640564039457584007913129639935"
        );
    }

    #[test]
    fn reports_missing_and_invalid_fields() {
        let mut raw = raw_event("x", 1);
        raw.as_object_mut().unwrap().remove("transaction_id");
        assert_eq!(
            parse_event(&raw).unwrap_err(),
            RecordError::MissingField("transaction_id")
        );

        let mut raw = raw_event("x", 1);
        raw["result"]["value"] = json!("-5");
        assert!(matches!(
            parse_event(&raw).unwrap_err(),
            RecordError::InvalidField { field: "value", .. }
        ));

        let mut raw = raw_event("x", 1);
        raw["block_timestamp"] = json!(-1);
        assert!(matches!(
            parse_event(&raw).unwrap_err(),
            RecordError::InvalidField { field: "block_timestamp", .. }
        ));
    }

    #[test]
    fn missing_event_index_defaults_to_zero() {
        let mut raw = raw_event("x", 1);
        raw.as_object_mut().unwrap().remove("event_index");
        assert_eq!(parse_event(&raw).unwrap().event_index, 0);
    }

    #[test]
    fn malformed_event_does_not_lose_the_page() {
        let mut events: Vec<Value> = (0..10)
            .map(|i| raw_event(&format!("tx{}", i), 1_000 - i))
            .collect();
        events[4]["result"].as_object_mut().unwrap().remove("to");

        let response = ApiResponse {
            success: Some(true),
            data: Some(events),
            ..ApiResponse::default()
        };
        let page = extract(&response);

        assert_eq!(page.records.len(), 9);
        assert_eq!(page.malformed, 1);
        assert!(page.records.iter().all(|r| r.transaction_id != "tx4"));
        assert_eq!(page.records[4].transaction_id, "tx5");
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn malformed_event_logs_exactly_one_warning() {
        let mut events: Vec<Value> = (0..10)
            .map(|i| raw_event(&format!("tx{}", i), 1_000 - i))
            .collect();
        events[7]["result"]["value"] = json!("not-a-number");
        let response = ApiResponse {
            success: Some(true),
            data: Some(events),
            ..ApiResponse::default()
        };

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .finish();
        let page = tracing::subscriber::with_default(subscriber, || extract(&response));

        assert_eq!(page.records.len(), 9);
        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let warnings: Vec<&str> = output
            .lines()
            .filter(|line| line.contains("dropping malformed event"))
            .collect();
        assert_eq!(warnings.len(), 1, "captured logs: {}", output);
        assert!(warnings[0].contains("WARN"));
        assert!(warnings[0].contains("#7 (tx7)"));
    }

    #[test]
    fn absent_data_yields_nothing() {
        assert!(extract_records(&ApiResponse::default()).is_empty());
    }
}
