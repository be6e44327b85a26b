/// Testing oriented utilities.
use std::collections::VecDeque;

use crate::models::backend::{BackendState, QueryResult, SearchBackend, SearchMatch};
use crate::models::error::BackendError;

/// One entry of a [`ScriptedBackend`]'s queue: the query text plus a
/// snapshot of the request state it was enqueued under, so tests can
/// assert exactly what a facet applied before queuing.
#[derive(Debug, Clone)]
pub struct QueuedQuery {
    pub query: String,
    pub index: String,
    pub comment: String,
    pub state: BackendState,
}

/// A [`SearchBackend`] replaying canned result batches.
///
/// Every `add_query` records the query with the state it saw; every
/// `run_queries` pops the next scripted batch (or fabricates empty
/// results, one per queued query) and moves the queue into `history`.
///
/// Example:
/// ```
/// use fsphinx::prelude::*;
/// use fsphinx::testing::ScriptedBackend;
///
/// let mut backend = ScriptedBackend::new();
/// backend.add_query("(@genres drama)", "movies", "");
/// let results = backend.run_queries().unwrap();
/// assert_eq!(results.len(), 1);
/// assert_eq!(backend.history.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    state: BackendState,
    responses: VecDeque<Vec<QueryResult>>,
    last_batch_len: usize,
    /// Queries queued since the last run.
    pub queued: Vec<QueuedQuery>,
    /// Queries of every completed run, in order.
    pub history: Vec<QueuedQuery>,
    /// Completed `run_queries` round-trips.
    pub run_count: usize,
    /// When set, the next `run_queries` fails with a connection error.
    pub fail_next: bool,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a batch to be returned by the next `run_queries`.
    pub fn push_response(&mut self, batch: Vec<QueryResult>) {
        self.responses.push_back(batch);
    }

    /// The recorded state of the i-th query of the last completed run.
    pub fn ran(&self, slot: usize) -> &QueuedQuery {
        let start = self.history.len() - self.last_batch_len;
        &self.history[start + slot]
    }
}

impl SearchBackend for ScriptedBackend {
    fn state(&self) -> &BackendState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut BackendState {
        &mut self.state
    }

    fn add_query(&mut self, query: &str, index: &str, comment: &str) -> usize {
        self.queued.push(QueuedQuery {
            query: query.to_string(),
            index: index.to_string(),
            comment: comment.to_string(),
            state: self.state.clone(),
        });
        self.queued.len() - 1
    }

    fn run_queries(&mut self) -> Result<Vec<QueryResult>, BackendError> {
        if self.fail_next {
            self.fail_next = false;
            self.queued.clear();
            return Err(BackendError::Connect("scripted failure".to_string()));
        }
        let batch = self
            .responses
            .pop_front()
            .unwrap_or_else(|| vec![QueryResult::default(); self.queued.len()]);
        self.last_batch_len = self.queued.len();
        self.history.append(&mut self.queued);
        self.run_count += 1;
        Ok(batch)
    }
}

/// A grouped match the way searchd returns one: a document standing for
/// its group, with the synthetic grouping attributes attached.
pub fn grouped_match(doc_id: u64, group: i64, count: i64) -> SearchMatch {
    SearchMatch::new(doc_id)
        .with_attr("@groupby", group)
        .with_attr("@count", count)
}

/// A result carrying `matches` with bookkeeping filled in.
pub fn result_with(matches: Vec<SearchMatch>, total_found: u64, time: f64) -> QueryResult {
    QueryResult {
        time,
        total_found,
        error: None,
        warning: None,
        matches,
    }
}
