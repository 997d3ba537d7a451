use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use tracing::{debug, info};
use url::Url;

use crate::config::ExtractionConfig;
use crate::error::ExtractorError;
use crate::models::{ApiResponse, Request};
use crate::retry::{retry_forever, RetryPolicy};

const API_KEY_HEADER: &str = "tron-pro-api-key";

#[derive(thiserror::Error, Debug)]
enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server answered {0}")]
    Status(StatusCode),
}

#[derive(Clone)]
pub struct TronGridClient {
    http: reqwest::Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl TronGridClient {
    pub fn new(config: &ExtractionConfig) -> Result<Self, ExtractorError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key).map_err(|_| ExtractorError::InvalidApiKey)?;
            headers.insert(API_KEY_HEADER, value);
        }

        let http = reqwest::Client::builder()
            .no_proxy()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(ExtractorError::HttpClient)?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            retry: config.retry.clone(),
        })
    }

    pub fn contract_events_url(&self, contract_address: &str) -> Result<Url, ExtractorError> {
        Ok(self
            .base_url
            .join(&format!("contracts/{}/events", contract_address))?)
    }

    /// Fetches one page. Transport failures, 5xx/429 answers and non-JSON bodies are
    /// retried without limit; any JSON envelope is returned as-is, `success: false`
    /// included.
    pub async fn get_response(&self, request: &Request) -> ApiResponse {
        match request {
            Request::Query { endpoint, params } => {
                info!("Requesting records from {}.", params.describe());
                debug!("URL: {}\nParams: {:?}", endpoint, params);
            }
            Request::Follow(url) => debug!("Retrieving next URL '{}'...", url),
        }

        let response = retry_forever(
            || self.send(request),
            &self.retry,
            request.url().as_str(),
        )
        .await;

        debug!("Response: {:?}", response);
        response
    }

    async fn send(&self, request: &Request) -> Result<ApiResponse, FetchError> {
        let builder = match request {
            Request::Query { endpoint, params } => {
                self.http.get(endpoint.clone()).query(&params.to_query())
            }
            Request::Follow(url) => self.http.get(url.clone()),
        };

        let response = builder.send().await?;
        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::Status(status));
        }

        Ok(response.json::<ApiResponse>().await?)
    }
}
