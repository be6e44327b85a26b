use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

// "foo-bar" is indexed as two words, so the textual emission must not
// carry the hyphen through.
static INTRA_WORD_HYPHEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w)-(\w)").expect("hyphen pattern compiles"));

/// Whether a term is sent to the backend or merely kept in the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TermStatus {
    #[default]
    Active,
    Inactive,
}

impl TermStatus {
    pub fn is_active(self) -> bool {
        self == TermStatus::Active
    }

    fn marker(self) -> &'static str {
        match self {
            TermStatus::Active => "",
            TermStatus::Inactive => "-",
        }
    }
}

/// One field-qualified refinement clause of a user query.
///
/// The identity of a term is its [`hash`](QueryTerm::hash): the MD5 of
/// the user field plus the lowercased raw term. Status and the display
/// form (`user_term`) never change that identity, so toggling a term or
/// resolving its id to a human-readable name leaves it the same
/// refinement.
#[derive(Debug, Clone)]
pub struct QueryTerm {
    status: TermStatus,
    user_field: String,
    sphinx_field: String,
    attribute: String,
    term: String,
    user_term: String,
}

impl QueryTerm {
    /// Build a term with identity field mapping; the attribute defaults
    /// to `<field>_attr`. Returns `None` when field or term is blank.
    pub fn new(status: TermStatus, field: &str, term: &str) -> Option<Self> {
        Self::resolved(status, field, term, None, None)
    }

    pub(crate) fn resolved(
        status: TermStatus,
        field: &str,
        term: &str,
        sphinx_field: Option<String>,
        attribute: Option<String>,
    ) -> Option<Self> {
        let user_field = field.trim().to_lowercase();
        if user_field.is_empty() {
            return None;
        }
        let term = term.trim();
        if term.is_empty() {
            return None;
        }
        Some(Self {
            status,
            sphinx_field: sphinx_field.unwrap_or_else(|| user_field.clone()),
            attribute: attribute.unwrap_or_else(|| format!("{user_field}_attr")),
            user_field,
            term: term.to_string(),
            user_term: term.to_string(),
        })
    }

    pub fn status(&self) -> TermStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub(crate) fn set_status(&mut self, status: TermStatus) {
        self.status = status;
    }

    pub(crate) fn flip(&mut self) {
        self.status = match self.status {
            TermStatus::Active => TermStatus::Inactive,
            TermStatus::Inactive => TermStatus::Active,
        };
    }

    pub fn user_field(&self) -> &str {
        &self.user_field
    }

    pub fn sphinx_field(&self) -> &str {
        &self.sphinx_field
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// The raw term as parsed. Stable for the lifetime of the term.
    pub fn term(&self) -> &str {
        &self.term
    }

    /// The display form, initially the raw term, later possibly a
    /// resolved human-readable name.
    pub fn user_term(&self) -> &str {
        &self.user_term
    }

    pub(crate) fn set_user_term(&mut self, display: &str) {
        self.user_term = display.to_string();
    }

    pub fn is_numeric(&self) -> bool {
        self.numeric_value().is_some()
    }

    /// Integer value of a numeric term, for attribute filtering.
    pub fn numeric_value(&self) -> Option<i64> {
        self.term.parse::<i64>().ok()
    }

    /// Hex MD5 over the user field and the lowercased raw term.
    pub fn hash(&self) -> String {
        let digest = md5::compute(format!("{}{}", self.user_field, self.term.to_lowercase()));
        format!("{digest:x}")
    }

    /// The backend emission `(@field value)`, or `None` when the term is
    /// inactive or excluded as numeric. Intra-word hyphens become spaces,
    /// double quotes are stripped, and multi-word values are re-quoted.
    pub fn to_sphinx(&self, exclude_numeric: bool) -> Option<String> {
        if !self.is_active() {
            return None;
        }
        if exclude_numeric && self.is_numeric() {
            return None;
        }
        let mut value = INTRA_WORD_HYPHEN
            .replace_all(&self.term, "${1} ${2}")
            .into_owned();
        value.retain(|c| c != '"');
        if value.contains(char::is_whitespace) {
            value = format!("\"{value}\"");
        }
        Some(format!("(@{} {})", self.sphinx_field, value))
    }

    /// Lowercased, trimmed emission used for canonical query forms.
    pub fn to_canonical(&self) -> Option<String> {
        self.to_sphinx(false).map(|s| s.trim().to_lowercase())
    }

    fn sort_key(&self) -> (&str, String) {
        (&self.user_field, self.term.to_lowercase())
    }
}

/// The user-facing rendering, status marker included.
impl fmt::Display for QueryTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(@{}{} {})",
            self.status.marker(),
            self.user_field,
            self.user_term
        )
    }
}

impl PartialEq for QueryTerm {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for QueryTerm {}

impl PartialOrd for QueryTerm {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Terms order by user field, then by lowercased raw term.
impl Ord for QueryTerm {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}
