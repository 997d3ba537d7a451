use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::params::MAX_PAGE_LIMIT;
use crate::retry::RetryPolicy;

pub const RESCUE_WINDOW_DURATION_MS: i64 = 20_000;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Shasta,
    Nile,
}

impl Network {
    pub fn base_url(self) -> Url {
        let raw = match self {
            Network::Mainnet => "https://api.trongrid.io/v1/",
            Network::Shasta => "https://api.shasta.trongrid.io/v1/",
            Network::Nile => "https://nile.trongrid.io/v1/",
        };
        Url::parse(raw).expect("static TronGrid URL is valid")
    }
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mainnet" | "" => Ok(Network::Mainnet),
            "shasta" => Ok(Network::Shasta),
            "nile" => Ok(Network::Nile),
            other => Err(ConfigError::UnknownNetwork(other.to_string())),
        }
    }
}

/// Everything an extraction run needs besides the per-run request. Built once and
/// handed by reference to the client and the engine.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub base_url: Url,
    pub api_key: Option<String>,
    pub output_dir: PathBuf,
    pub page_limit: u32,
    pub rescue_window_ms: i64,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("unknown TRONGRID_NETWORK '{0}' (expected mainnet, shasta or nile)")]
    UnknownNetwork(String),
    #[error("invalid TRONGRID_BASE_URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
}

impl ExtractionConfig {
    pub fn for_network(network: Network) -> Self {
        Self::with_base_url(network.base_url())
    }

    pub fn with_base_url(base_url: Url) -> Self {
        Self {
            base_url: ensure_trailing_slash(base_url),
            api_key: None,
            output_dir: PathBuf::from("."),
            page_limit: MAX_PAGE_LIMIT,
            rescue_window_ms: RESCUE_WINDOW_DURATION_MS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let network: Network = lookup("TRONGRID_NETWORK")
            .unwrap_or_default()
            .parse()?;

        let mut config = match lookup("TRONGRID_BASE_URL") {
            Some(raw) => Self::with_base_url(Url::parse(raw.trim())?),
            None => Self::for_network(network),
        };

        config.api_key = lookup("TRONGRID_API_KEY")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        if let Some(dir) = lookup("TRONGRID_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("TRONGRID_PAGE_LIMIT") {
            let limit = parse_positive("TRONGRID_PAGE_LIMIT", &raw)?;
            config.page_limit = limit.min(u64::from(MAX_PAGE_LIMIT)) as u32;
        }
        if let Some(raw) = lookup("TRONGRID_RESCUE_WINDOW_MS") {
            config.rescue_window_ms = parse_positive("TRONGRID_RESCUE_WINDOW_MS", &raw)? as i64;
        }
        if let Some(raw) = lookup("TRONGRID_TIMEOUT_SECS") {
            config.request_timeout =
                Duration::from_secs(parse_positive("TRONGRID_TIMEOUT_SECS", &raw)?);
        }

        Ok(config)
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 && value <= i64::MAX as u64 => Ok(value),
        _ => Err(ConfigError::InvalidNumber {
            var,
            value: raw.to_string(),
        }),
    }
}

// Url::join drops the last path segment unless the base ends with '/'.
fn ensure_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
