use thiserror::Error;

/// Conditions that stop an extraction run. Transport failures never show up here;
/// the fetcher retries them forever.
#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("invalid time window: min_timestamp {min_timestamp_ms} > max_timestamp {max_timestamp_ms}")]
    InvalidWindow {
        min_timestamp_ms: i64,
        max_timestamp_ms: i64,
    },

    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid API key header value")]
    InvalidApiKey,

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("failed to resume from previous output: {0:#}")]
    Resume(#[source] anyhow::Error),

    #[error("failed to write records: {0:#}")]
    Sink(#[source] anyhow::Error),

    #[error("rescue request for {min_timestamp_ms}..={max_timestamp_ms} failed: {}", .error.as_deref().unwrap_or("no error message"))]
    RescueFailed {
        min_timestamp_ms: i64,
        max_timestamp_ms: i64,
        error: Option<String>,
    },

    #[error("rescue response for {min_timestamp_ms}..={max_timestamp_ms} is malformed: {detail}")]
    MalformedRescueResponse {
        min_timestamp_ms: i64,
        max_timestamp_ms: i64,
        detail: String,
    },

    #[error("rescue pagination made no progress before next link '{next}'")]
    RescueStalled { next: String },
}

/// Why a single raw event could not be turned into a record.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("invalid value for '{field}': {value}")]
    InvalidField { field: &'static str, value: String },
}
