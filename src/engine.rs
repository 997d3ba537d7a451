//! Pagination engine for the contract events endpoint.
//!
//! TronGrid's next links stop working after a few pages when the requested window is
//! wide, and sometimes keep answering with the same stale page. The engine works around
//! both by dropping into a much narrower window ("rescue"), draining it, and then
//! restarting the outer query just below the rescued slice.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use url::Url;

use crate::client::TronGridClient;
use crate::config::ExtractionConfig;
use crate::error::ExtractorError;
use crate::extract;
use crate::models::{ApiResponse, Request};
use crate::params::{display_ms, QueryParams};
use crate::progress::ProgressTracker;
use crate::storage::{output_csv_path, CsvSink, RecordSink};

/// What to extract. `since` defaults to the Tron launch, `until` to one second from now.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub contract_address: String,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub event_name: Option<String>,
    pub resume_csv: Option<PathBuf>,
}

impl ExtractionRequest {
    pub fn new(contract_address: impl Into<String>) -> Self {
        Self {
            contract_address: contract_address.into(),
            since: None,
            until: None,
            event_name: Some("Transfer".to_string()),
            resume_csv: None,
        }
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn event_name(mut self, event_name: Option<String>) -> Self {
        self.event_name = event_name;
        self
    }

    pub fn resume_from(mut self, csv: impl Into<PathBuf>) -> Self {
        self.resume_csv = Some(csv.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pages_fetched: usize,
    pub records_written: usize,
    pub batches_written: usize,
    pub duplicates_dropped: usize,
    pub malformed_records: usize,
    pub rescues: usize,
    pub broken_links: usize,
    pub stalled_pages: usize,
    pub earliest_block_timestamp_seen: Option<i64>,
}

#[derive(Debug)]
pub struct Extracted {
    pub output_path: PathBuf,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, PartialEq)]
pub enum State {
    FetchingInitial,
    FollowingNext { next: Url },
    Rescuing(Rescue),
    Done,
}

/// A narrowed window being drained. `next` is `None` until its first page arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct Rescue {
    pub window: QueryParams,
    pub next: Option<Url>,
}

/// Extracts events for one contract into a CSV under `config.output_dir`, or appends
/// to `request.resume_csv` when resuming.
pub async fn events_for_token(
    config: &ExtractionConfig,
    request: &ExtractionRequest,
) -> Result<Extracted, ExtractorError> {
    let client = TronGridClient::new(config)?;
    let endpoint = client.contract_events_url(&request.contract_address)?;
    let mut params = QueryParams::build(
        request.since,
        request.until,
        config.page_limit,
        request.event_name.clone(),
    )?;

    info!(
        "Retrieving {} events from {} from '{}'",
        request.event_name.as_deref().unwrap_or("all"),
        params.describe(),
        endpoint
    );

    let (tracker, output_path) = match &request.resume_csv {
        Some(csv) => {
            let tracker = ProgressTracker::resume_from_csv(csv).map_err(ExtractorError::Resume)?;
            if let Some(earliest) = tracker.earliest_block_timestamp_seen() {
                params = QueryParams::from_window(
                    params.min_timestamp_ms,
                    earliest,
                    params.limit,
                    params.event_name.clone(),
                )?;
                info!("Resuming '{}' from {}...", csv.display(), display_ms(earliest));
            }
            (tracker, csv.clone())
        }
        None => (
            ProgressTracker::new(),
            output_csv_path(&config.output_dir, &request.contract_address),
        ),
    };

    let sink = CsvSink::open(&output_path).map_err(ExtractorError::Sink)?;
    let mut extractor = Extractor::new(&client, endpoint, params, tracker, sink)
        .with_rescue_window(config.rescue_window_ms);
    let summary = extractor.run().await?;

    info!(
        "Extraction complete: {} records in {} batches written to '{}'",
        summary.records_written,
        summary.batches_written,
        output_path.display()
    );
    Ok(Extracted {
        output_path,
        summary,
    })
}

pub struct Extractor<'a, S> {
    client: &'a TronGridClient,
    endpoint: Url,
    params: QueryParams,
    tracker: ProgressTracker,
    sink: S,
    rescue_window_ms: i64,
    summary: RunSummary,
}

impl<'a, S: RecordSink> Extractor<'a, S> {
    pub fn new(
        client: &'a TronGridClient,
        endpoint: Url,
        params: QueryParams,
        tracker: ProgressTracker,
        sink: S,
    ) -> Self {
        Self {
            client,
            endpoint,
            params,
            tracker,
            sink,
            rescue_window_ms: crate::config::RESCUE_WINDOW_DURATION_MS,
            summary: RunSummary::default(),
        }
    }

    pub fn with_rescue_window(mut self, rescue_window_ms: i64) -> Self {
        self.rescue_window_ms = rescue_window_ms.max(1);
        self
    }

    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Drives the state machine until the window is drained. Only a broken rescue
    /// (or a failing sink) ends the run early.
    pub async fn run(&mut self) -> Result<RunSummary, ExtractorError> {
        let mut state = State::FetchingInitial;

        while state != State::Done {
            state = self.step(state).await?;
        }

        self.summary.earliest_block_timestamp_seen = self.tracker.earliest_block_timestamp_seen();
        debug!("Final params: {:?}", self.params);
        Ok(self.summary.clone())
    }

    pub async fn step(&mut self, state: State) -> Result<State, ExtractorError> {
        match state {
            State::FetchingInitial => {
                let request = Request::Query {
                    endpoint: self.endpoint.clone(),
                    params: self.params.clone(),
                };
                let response = self.fetch(&request).await;
                self.after_outer_page(response).await
            }
            State::FollowingNext { next } => {
                let response = self.fetch(&Request::Follow(next)).await;
                self.after_outer_page(response).await
            }
            State::Rescuing(rescue) => self.rescue_step(rescue).await,
            State::Done => Ok(State::Done),
        }
    }

    async fn fetch(&mut self, request: &Request) -> ApiResponse {
        self.summary.pages_fetched += 1;
        self.client.get_response(request).await
    }

    async fn after_outer_page(&mut self, response: ApiResponse) -> Result<State, ExtractorError> {
        if !response.is_success() {
            self.summary.broken_links += 1;
            warn!(
                "Failed to retrieve page for {} (success={:?}, error={:?}); entering rescue",
                self.params.describe(),
                response.success,
                response.error
            );
            warn!("Response: {:?}", response);
            return Ok(self.begin_rescue());
        }

        let fresh = self.ingest(&response).await?;

        let Some(raw_next) = response.next_link() else {
            info!("No next link; paging complete for {}.", self.params.describe());
            return Ok(State::Done);
        };

        if fresh == 0 {
            self.summary.stalled_pages += 1;
            warn!(
                "0 new txns found. We seem to be stuck at {}.",
                display_ms(self.params.max_timestamp_ms)
            );
            warn!("Last request params: {:?}\nResponse: {:?}", self.params, response);
            return Ok(self.begin_rescue());
        }

        match Url::parse(raw_next) {
            Ok(next) => Ok(State::FollowingNext { next }),
            Err(e) => {
                self.summary.broken_links += 1;
                warn!("Unparseable next link '{}': {}; entering rescue", raw_next, e);
                Ok(self.begin_rescue())
            }
        }
    }

    fn begin_rescue(&mut self) -> State {
        // Resume below what has already been seen rather than re-walking it.
        if let Some(watermark) = self.tracker.earliest_block_timestamp_seen() {
            if watermark >= self.params.min_timestamp_ms && watermark < self.params.max_timestamp_ms {
                info!("Setting max_timestamp to watermark {}", display_ms(watermark));
                self.params.max_timestamp_ms = watermark;
            }
        }

        let window = self.params.narrowed(self.rescue_window_ms);
        self.summary.rescues += 1;
        warn!(
            "Attempting rescue by requesting {} ({} ms window)...",
            window.describe(),
            self.rescue_window_ms
        );
        State::Rescuing(Rescue { window, next: None })
    }

    async fn rescue_step(&mut self, rescue: Rescue) -> Result<State, ExtractorError> {
        let request = match &rescue.next {
            None => Request::Query {
                endpoint: self.endpoint.clone(),
                params: rescue.window.clone(),
            },
            Some(next) => Request::Follow(next.clone()),
        };
        let response = self.fetch(&request).await;

        match response.success {
            Some(true) => {}
            Some(false) => {
                warn!("Rescue failed. Final response: {:?}", response);
                return Err(ExtractorError::RescueFailed {
                    min_timestamp_ms: rescue.window.min_timestamp_ms,
                    max_timestamp_ms: rescue.window.max_timestamp_ms,
                    error: response.error,
                });
            }
            None => {
                return Err(ExtractorError::MalformedRescueResponse {
                    min_timestamp_ms: rescue.window.min_timestamp_ms,
                    max_timestamp_ms: rescue.window.max_timestamp_ms,
                    detail: "missing 'success' flag".to_string(),
                });
            }
        }

        let fresh = self.ingest(&response).await?;
        info!("Rescued {} more records", fresh);

        match response.next_link() {
            Some(raw_next) => {
                let next = Url::parse(raw_next).map_err(|e| ExtractorError::MalformedRescueResponse {
                    min_timestamp_ms: rescue.window.min_timestamp_ms,
                    max_timestamp_ms: rescue.window.max_timestamp_ms,
                    detail: format!("unparseable next link '{}': {}", raw_next, e),
                })?;
                // A rescue page must make progress; there is no rescue of a rescue.
                if fresh == 0 || rescue.next.as_ref() == Some(&next) {
                    warn!("Rescue is not making progress. Final response: {:?}", response);
                    return Err(ExtractorError::RescueStalled {
                        next: next.to_string(),
                    });
                }
                Ok(State::Rescuing(Rescue {
                    window: rescue.window,
                    next: Some(next),
                }))
            }
            None => Ok(self.finish_rescue(&rescue.window)),
        }
    }

    fn finish_rescue(&mut self, window: &QueryParams) -> State {
        let resume_max = window.min_timestamp_ms - 1;
        if resume_max < self.params.min_timestamp_ms {
            info!(
                "Rescue reached the start of the window ({}); nothing left to fetch.",
                display_ms(self.params.min_timestamp_ms)
            );
            return State::Done;
        }

        self.params.max_timestamp_ms = resume_max;
        info!("Rescue complete; resuming outer window {}", self.params.describe());
        State::FetchingInitial
    }

    /// Extracts, dedups and writes one page. Returns how many new records were written.
    async fn ingest(&mut self, response: &ApiResponse) -> Result<usize, ExtractorError> {
        let page = extract::extract(response);
        self.summary.malformed_records += page.malformed;

        let retrieved = page.records.len();
        let fresh = self.tracker.remove_already_processed(page.records);
        self.summary.duplicates_dropped += retrieved - fresh.len();

        if !fresh.is_empty() {
            self.sink
                .write_batch(&fresh)
                .await
                .map_err(ExtractorError::Sink)?;
            self.summary.batches_written += 1;
            self.summary.records_written += fresh.len();
        }

        debug!(
            "Page had {} records, {} new, {} seen so far",
            retrieved,
            fresh.len(),
            self.tracker.seen_count()
        );
        Ok(fresh.len())
    }
}
