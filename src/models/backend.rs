//! The abstract searchd client this middleware drives.
//!
//! A [`SearchBackend`] carries the mutable request state of the classic
//! Sphinx API (limits, select list, group-by, sort, filters) plus a batch
//! queue. Facet preparation mutates that state around every enqueued
//! sub-query, so the whole of it is snapshot/restorable by value.

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::models::error::BackendError;

/// Match-mode codes of the reference searchd API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum MatchMode {
    All = 0,
    Any = 1,
    Phrase = 2,
    Boolean = 3,
    Extended = 4,
    FullScan = 5,
    #[default]
    Extended2 = 6,
}

/// Grouping-function codes of the reference searchd API. Plain
/// attribute grouping is code 4 and the default everywhere here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum GroupFunc {
    Day = 0,
    Week = 1,
    Month = 2,
    Year = 3,
    #[default]
    Attr = 4,
    AttrPair = 5,
}

impl GroupFunc {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Sort-mode codes of the reference searchd API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SortMode {
    #[default]
    Relevance = 0,
    AttrDesc = 1,
    AttrAsc = 2,
    TimeSegments = 3,
    Extended = 4,
    Expr = 5,
}

/// Direction of an ordering, rendered lowercase inside extended sort
/// clauses ("@count desc").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// One attribute value attached to a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Attr {
    Int(i64),
    Float(f64),
    Str(String),
    /// Multi-value integer attribute.
    IntList(Vec<i64>),
}

impl Attr {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attr::Int(v) => Some(*v),
            Attr::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attr::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            Attr::Int(v) => Some(*v as f64),
            Attr::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Ordering used when sorting facet rows: numeric kinds compare
    /// numerically, strings lexicographically, anything else by its
    /// rendered form.
    pub fn cmp_values(&self, other: &Attr) -> Ordering {
        match (self.as_float(), other.as_float()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => match (self, other) {
                (Attr::Str(a), Attr::Str(b)) => a.cmp(b),
                _ => self.to_string().cmp(&other.to_string()),
            },
        }
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attr::Int(v) => write!(f, "{v}"),
            Attr::Float(v) => write!(f, "{v}"),
            Attr::Str(s) => write!(f, "{s}"),
            Attr::IntList(vs) => write!(f, "{}", vs.iter().join(",")),
        }
    }
}

impl From<i64> for Attr {
    fn from(v: i64) -> Self {
        Attr::Int(v)
    }
}

impl From<f64> for Attr {
    fn from(v: f64) -> Self {
        Attr::Float(v)
    }
}

impl From<&str> for Attr {
    fn from(v: &str) -> Self {
        Attr::Str(v.to_string())
    }
}

impl From<String> for Attr {
    fn from(v: String) -> Self {
        Attr::Str(v)
    }
}

/// One document returned by the backend, with its attribute map. Grouped
/// sub-queries carry the synthetic `@groupby` / `@count` / `@groupfunc`
/// attributes in here as well.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub id: u64,
    pub weight: i32,
    #[serde(default)]
    pub attrs: IndexMap<String, Attr>,
}

impl SearchMatch {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<Attr>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.get(name)
    }

    /// The group key of a grouped match, when present and integral.
    pub fn group_id(&self) -> Option<i64> {
        self.attr("@groupby").and_then(Attr::as_int)
    }
}

/// Result of one sub-query in a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub time: f64,
    pub total_found: u64,
    pub error: Option<String>,
    pub warning: Option<String>,
    pub matches: Vec<SearchMatch>,
}

impl QueryResult {
    /// Error string when the backend flagged this slot, ignoring empty
    /// strings some server versions emit.
    pub fn error_str(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }
}

/// A single attribute filter (inclusion list over integer values).
#[derive(Debug, Clone, PartialEq)]
pub struct AttrFilter {
    pub attr: String,
    pub values: Vec<i64>,
    pub exclude: bool,
}

/// Group-by settings as one unit, so save/restore moves them together.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    pub attr: String,
    pub func: GroupFunc,
    pub sort: String,
    pub distinct: Option<String>,
}

/// The full mutable request state of a backend connection. Every setting
/// a facet sub-operation touches lives here, so `snapshot`/`restore`
/// round-trips the lot by value.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendState {
    pub offset: u32,
    pub limit: u32,
    pub max_matches: u32,
    pub cutoff: u32,
    pub select: String,
    pub group: Option<GroupBy>,
    pub match_mode: MatchMode,
    pub sort_mode: SortMode,
    pub sort_by: String,
    pub filters: Vec<AttrFilter>,
    pub array_result: bool,
}

impl Default for BackendState {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 20,
            max_matches: 1000,
            cutoff: 0,
            select: "*".to_string(),
            group: None,
            match_mode: MatchMode::default(),
            sort_mode: SortMode::default(),
            sort_by: String::new(),
            filters: Vec::new(),
            array_result: false,
        }
    }
}

/// Abstract Sphinx-compatible client.
///
/// Implementors hold a [`BackendState`] and translate it plus the queued
/// queries into whatever wire protocol they speak when `run_queries` is
/// called. All the setters are provided; only the state accessors and the
/// batch operations are required.
pub trait SearchBackend {
    fn state(&self) -> &BackendState;
    fn state_mut(&mut self) -> &mut BackendState;

    /// Append a query to the batch under the current state. Returns the
    /// slot index its result will occupy.
    fn add_query(&mut self, query: &str, index: &str, comment: &str) -> usize;

    /// Execute the queued batch in one round-trip and drain the queue.
    fn run_queries(&mut self) -> Result<Vec<QueryResult>, BackendError>;

    fn set_limits(&mut self, offset: u32, limit: u32, max_matches: u32, cutoff: u32) {
        let state = self.state_mut();
        state.offset = offset;
        state.limit = limit;
        state.max_matches = max_matches;
        state.cutoff = cutoff;
    }

    fn set_select(&mut self, select: &str) {
        self.state_mut().select = select.to_string();
    }

    fn set_group_by(&mut self, attr: &str, func: GroupFunc, group_sort: &str) {
        let distinct = self.state().group.as_ref().and_then(|g| g.distinct.clone());
        self.state_mut().group = Some(GroupBy {
            attr: attr.to_string(),
            func,
            sort: group_sort.to_string(),
            distinct,
        });
    }

    fn set_group_distinct(&mut self, attr: &str) {
        if let Some(group) = self.state_mut().group.as_mut() {
            group.distinct = Some(attr.to_string());
        }
    }

    fn reset_group_by(&mut self) {
        self.state_mut().group = None;
    }

    fn set_match_mode(&mut self, mode: MatchMode) {
        self.state_mut().match_mode = mode;
    }

    fn set_sort_mode(&mut self, mode: SortMode, sort_by: &str) {
        let state = self.state_mut();
        state.sort_mode = mode;
        state.sort_by = sort_by.to_string();
    }

    fn set_filter(&mut self, attr: &str, values: Vec<i64>, exclude: bool) {
        self.state_mut().filters.push(AttrFilter {
            attr: attr.to_string(),
            values,
            exclude,
        });
    }

    fn reset_filters(&mut self) {
        self.state_mut().filters.clear();
    }

    fn set_array_result(&mut self, on: bool) {
        self.state_mut().array_result = on;
    }

    fn snapshot(&self) -> BackendState {
        self.state().clone()
    }

    fn restore(&mut self, snapshot: BackendState) {
        *self.state_mut() = snapshot;
    }
}
