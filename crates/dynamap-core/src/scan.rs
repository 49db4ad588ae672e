//! Segment-parallel scans.
//!
//! A [`ParallelScanTask`] owns one scan request per segment and a private
//! worker pool. Each call to [`ParallelScanTask::next_batch`] fetches the
//! next page of every live segment concurrently and returns once all of them
//! have reported. Segment states only change on the coordinator side, after
//! a worker reports, so a round never sees state from a later one.
//!
//! ```text
//! Waiting ──► Scanning ──► HasNextPage ──► Scanning ──► ...
//!                    │                           │
//!                    ├──► Completed              ├──► Completed
//!                    └──► Failed                 └──► Failed
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use dynamap_model::input::ScanInput;
use dynamap_model::output::ScanOutput;
use dynamap_model::{DynamoDBError, Item};
use tokio::task::{Id, JoinSet};
use tracing::{debug, warn};

use crate::client::DynamoDBClient;
use crate::error::{MapperError, MapperResult};

/// Progress of one scan segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentScanState {
    /// Not started.
    Waiting,
    /// A page fetch is in flight.
    Scanning,
    /// The last page had a continuation key.
    HasNextPage,
    /// The segment is exhausted.
    Completed,
    /// The last page fetch failed.
    Failed,
}

impl SegmentScanState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

type SegmentResult = (usize, Result<ScanOutput, DynamoDBError>);

/// The failure that ended a scan, kept so later rounds report it again.
#[derive(Debug, Clone)]
enum ScanFailure {
    Segment(DynamoDBError),
    Worker(String),
}

impl ScanFailure {
    fn to_error(&self) -> MapperError {
        match self {
            Self::Segment(err) => MapperError::from(err.clone()),
            Self::Worker(message) => MapperError::Internal(anyhow::anyhow!("{message}")),
        }
    }
}

/// Scans all segments of a table in rounds.
pub struct ParallelScanTask {
    client: Arc<dyn DynamoDBClient>,
    requests: Vec<ScanInput>,
    states: Vec<SegmentScanState>,
    last_keys: Vec<Item>,
    pool: Option<JoinSet<SegmentResult>>,
    failure: Option<ScanFailure>,
    shutdowns: u32,
}

impl std::fmt::Debug for ParallelScanTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelScanTask")
            .field("segments", &self.requests.len())
            .field("states", &self.states)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

impl ParallelScanTask {
    /// Creates a task for one request per segment.
    pub fn new(client: Arc<dyn DynamoDBClient>, requests: Vec<ScanInput>) -> MapperResult<Self> {
        if requests.is_empty() {
            return Err(MapperError::InvalidRequest(
                "parallel scan needs at least one segment".to_owned(),
            ));
        }
        let segments = requests.len();
        Ok(Self {
            client,
            requests,
            states: vec![SegmentScanState::Waiting; segments],
            last_keys: vec![Item::new(); segments],
            pool: Some(JoinSet::new()),
            failure: None,
            shutdowns: 0,
        })
    }

    /// Number of segments.
    #[must_use]
    pub fn total_segments(&self) -> usize {
        self.requests.len()
    }

    /// Current state of every segment.
    #[must_use]
    pub fn states(&self) -> &[SegmentScanState] {
        &self.states
    }

    /// Fetches the next page of every segment that has one.
    ///
    /// Returns the pages fetched in this round, in segment order. The first
    /// segment failure is returned as is; the task is unusable afterwards and
    /// later calls return the same failure again.
    pub async fn next_batch(&mut self) -> MapperResult<Vec<ScanOutput>> {
        if let Some(failure) = &self.failure {
            return Err(failure.to_error());
        }
        if let Some(segment) = self.states.iter().position(|s| *s == SegmentScanState::Scanning) {
            return Err(MapperError::Internal(anyhow::anyhow!(
                "segment {segment} is still scanning at the start of a new round"
            )));
        }
        let Some(mut pool) = self.pool.take() else {
            return Ok(Vec::new());
        };

        let mut in_flight: HashMap<Id, (usize, SegmentScanState)> = HashMap::new();
        for (segment, state) in self.states.iter_mut().enumerate() {
            if state.is_terminal() {
                continue;
            }
            let mut request = self.requests[segment].clone();
            request.exclusive_start_key = if *state == SegmentScanState::HasNextPage {
                self.last_keys[segment].clone()
            } else {
                Item::new()
            };
            let client = Arc::clone(&self.client);
            let handle = pool.spawn(async move { (segment, client.scan(request).await) });
            in_flight.insert(handle.id(), (segment, *state));
            *state = SegmentScanState::Scanning;
        }
        debug!(segments = in_flight.len(), "starting parallel scan round");

        let mut pages: Vec<Option<ScanOutput>> = vec![None; self.requests.len()];
        let mut failure: Option<ScanFailure> = None;
        while let Some(joined) = pool.join_next_with_id().await {
            match joined {
                Ok((_, (segment, Ok(output)))) => {
                    self.states[segment] = if output.last_evaluated_key.is_empty() {
                        SegmentScanState::Completed
                    } else {
                        SegmentScanState::HasNextPage
                    };
                    self.last_keys[segment].clone_from(&output.last_evaluated_key);
                    debug!(segment, count = output.count, state = ?self.states[segment], "segment page fetched");
                    pages[segment] = Some(output);
                }
                Ok((_, (segment, Err(err)))) => {
                    warn!(segment, %err, "scan segment failed, aborting parallel scan");
                    self.states[segment] = SegmentScanState::Failed;
                    pool.abort_all();
                    failure.get_or_insert(ScanFailure::Segment(err));
                }
                Err(err) if err.is_cancelled() => {
                    if let Some((segment, previous)) = in_flight.get(&err.id()) {
                        self.states[*segment] = *previous;
                    }
                }
                Err(err) => {
                    let segment = in_flight.get(&err.id()).map(|(s, _)| *s);
                    warn!(?segment, %err, "scan worker panicked, aborting parallel scan");
                    if let Some(segment) = segment {
                        self.states[segment] = SegmentScanState::Failed;
                    }
                    pool.abort_all();
                    failure.get_or_insert(ScanFailure::Worker(format!(
                        "scan worker for segment {segment:?} failed: {err}"
                    )));
                }
            }
        }

        if let Some(failure) = failure {
            let err = failure.to_error();
            self.failure = Some(failure);
            self.shutdown(pool);
            return Err(err);
        }
        if self.states.iter().all(|s| *s == SegmentScanState::Completed) {
            self.shutdown(pool);
        } else {
            self.pool = Some(pool);
        }
        Ok(pages.into_iter().flatten().collect())
    }

    /// Returns `true` once every segment is exhausted, shutting the worker
    /// pool down if it is still up.
    pub fn is_finished(&mut self) -> bool {
        let finished = self.states.iter().all(|s| *s == SegmentScanState::Completed);
        if finished {
            if let Some(pool) = self.pool.take() {
                self.shutdown(pool);
            }
        }
        finished
    }

    /// Times the worker pool has been shut down. Never more than one.
    #[must_use]
    pub fn shutdown_count(&self) -> u32 {
        self.shutdowns
    }

    fn shutdown(&mut self, mut pool: JoinSet<SegmentResult>) {
        pool.abort_all();
        self.shutdowns += 1;
        debug!(segments = self.requests.len(), "parallel scan worker pool shut down");
    }
}
