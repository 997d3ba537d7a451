use chrono::{DateTime, Duration, Utc};

use crate::error::ExtractorError;

/// 2018-06-25T00:00:00Z, the default lower bound for an extraction.
pub const TRON_LAUNCH_MS: i64 = 1_529_884_800_000;
pub const MAX_PAGE_LIMIT: u32 = 200;
pub const ORDER_BY_BLOCK_TIMESTAMP_DESC: &str = "block_timestamp,desc";

pub fn datetime_to_ms(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub fn ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// Renders a millisecond timestamp for logs, falling back to the raw number.
pub fn display_ms(ms: i64) -> String {
    ms_to_datetime(ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

/// Pagination window sent to the events endpoint. Both timestamp bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParams {
    pub min_timestamp_ms: i64,
    pub max_timestamp_ms: i64,
    pub limit: u32,
    pub only_confirmed: bool,
    pub event_name: Option<String>,
    pub order_by: &'static str,
}

impl QueryParams {
    pub fn build(
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: u32,
        event_name: Option<String>,
    ) -> Result<Self, ExtractorError> {
        let min_timestamp_ms = since.as_ref().map(datetime_to_ms).unwrap_or(TRON_LAUNCH_MS);
        let max_timestamp_ms = datetime_to_ms(&until.unwrap_or_else(|| Utc::now() + Duration::seconds(1)));
        Self::from_window(min_timestamp_ms, max_timestamp_ms, limit, event_name)
    }

    pub fn from_window(
        min_timestamp_ms: i64,
        max_timestamp_ms: i64,
        limit: u32,
        event_name: Option<String>,
    ) -> Result<Self, ExtractorError> {
        if min_timestamp_ms < 0 || min_timestamp_ms > max_timestamp_ms {
            return Err(ExtractorError::InvalidWindow {
                min_timestamp_ms,
                max_timestamp_ms,
            });
        }

        Ok(Self {
            min_timestamp_ms,
            max_timestamp_ms,
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
            only_confirmed: true,
            event_name,
            order_by: ORDER_BY_BLOCK_TIMESTAMP_DESC,
        })
    }

    /// The last `duration_ms` of this window, never reaching below its lower bound.
    pub fn narrowed(&self, duration_ms: i64) -> Self {
        let min_timestamp_ms = self
            .max_timestamp_ms
            .saturating_sub(duration_ms)
            .max(self.min_timestamp_ms);

        Self {
            min_timestamp_ms,
            ..self.clone()
        }
    }

    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("only_confirmed", self.only_confirmed.to_string()),
            ("limit", self.limit.to_string()),
            ("min_timestamp", self.min_timestamp_ms.to_string()),
            ("max_timestamp", self.max_timestamp_ms.to_string()),
            ("order_by", self.order_by.to_string()),
        ];
        if let Some(event_name) = &self.event_name {
            query.push(("event_name", event_name.clone()));
        }
        query
    }

    pub fn describe(&self) -> String {
        format!(
            "{} to {}",
            display_ms(self.min_timestamp_ms),
            display_ms(self.max_timestamp_ms)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn build_uses_launch_time_and_now_by_default() {
        let before = Utc::now().timestamp_millis();
        let params = QueryParams::build(None, None, 200, Some("Transfer".into())).unwrap();
        assert_eq!(params.min_timestamp_ms, TRON_LAUNCH_MS);
        assert!(params.max_timestamp_ms >= before + 1_000);
        assert!(params.only_confirmed);
    }

    #[test]
    fn build_converts_datetimes_and_caps_limit() {
        let since = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2023, 1, 1, 0, 5, 0).unwrap();
        let params = QueryParams::build(Some(since), Some(until), 1_000, None).unwrap();
        assert_eq!(params.min_timestamp_ms, 1_672_531_200_000);
        assert_eq!(params.max_timestamp_ms, 1_672_531_500_000);
        assert_eq!(params.limit, MAX_PAGE_LIMIT);
    }

    #[test]
    fn inverted_window_is_rejected() {
        let err = QueryParams::from_window(10, 5, 200, None).unwrap_err();
        assert!(matches!(err, ExtractorError::InvalidWindow { .. }));
    }

    #[test]
    fn narrowed_window_is_clamped_to_lower_bound() {
        let params = QueryParams::from_window(1_000, 100_000, 200, None).unwrap();
        let rescue = params.narrowed(20_000);
        assert_eq!(rescue.min_timestamp_ms, 80_000);
        assert_eq!(rescue.max_timestamp_ms, 100_000);

        let tight = QueryParams::from_window(95_000, 100_000, 200, None).unwrap();
        assert_eq!(tight.narrowed(20_000).min_timestamp_ms, 95_000);
    }

    #[test]
    fn query_includes_event_filter() {
        let params = QueryParams::from_window(1, 2, 50, Some("Transfer".into())).unwrap();
        let query = params.to_query();
        assert!(query.contains(&("only_confirmed", "true".to_string())));
        assert!(query.contains(&("limit", "50".to_string())));
        assert!(query.contains(&("min_timestamp", "1".to_string())));
        assert!(query.contains(&("max_timestamp", "2".to_string())));
        assert!(query.contains(&("order_by", "block_timestamp,desc".to_string())));
        assert!(query.contains(&("event_name", "Transfer".to_string())));
    }

    #[test]
    fn launch_constant_matches_date() {
        let launch = Utc.with_ymd_and_hms(2018, 6, 25, 0, 0, 0).unwrap();
        assert_eq!(datetime_to_ms(&launch), TRON_LAUNCH_MS);
        assert_eq!(ms_to_datetime(TRON_LAUNCH_MS), Some(launch));
    }
}
