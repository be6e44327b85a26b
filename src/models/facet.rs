//! Per-attribute refinement computation.
//!
//! A [`Facet`] turns the current query into one grouped sub-query and
//! shapes the grouped matches into refinement options: a display term, a
//! document count, an optional custom aggregate, and whether the option
//! is already selected in the query.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::backend::{Attr, GroupFunc, QueryResult, SearchBackend, SearchMatch, SortOrder};
use crate::models::error::Error;
use crate::models::query::MultiFieldQuery;
use crate::models::terms::{split_packed_terms, GroupIdFn, SourceConfig, TermMap, TermSource};

/// One refinement option: a row of a facet's computed result.
///
/// Core attributes are typed; any further `@`-prefixed attribute the
/// select list produced is kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetValue {
    pub group_by: Attr,
    pub count: u64,
    pub term: String,
    pub group_func: Attr,
    pub selected: bool,
    #[serde(default)]
    pub extra: IndexMap<String, Attr>,
}

impl FacetValue {
    /// Row attribute by its `@`-name, for ordering and host shaping.
    pub fn get(&self, key: &str) -> Option<Attr> {
        match key {
            "@groupby" => Some(self.group_by.clone()),
            "@count" => Some(Attr::Int(self.count as i64)),
            "@term" => Some(Attr::Str(self.term.clone())),
            "@groupfunc" => Some(self.group_func.clone()),
            "@selected" => Some(Attr::Str(
                if self.selected { "True" } else { "False" }.to_string(),
            )),
            _ => self.extra.get(key).cloned(),
        }
    }
}

/// The computed result of one facet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacetResult {
    pub time: f64,
    pub total_found: u64,
    pub error: Option<String>,
    pub warning: Option<String>,
    pub matches: Vec<FacetValue>,
}

/// A single-attribute grouping configuration plus its computed result.
#[derive(Debug, Clone)]
pub struct Facet {
    name: String,
    attribute: String,
    func: GroupFunc,
    group_sort: String,
    select: String,
    sph_field: String,
    default_index: Option<String>,
    max_num_values: usize,
    max_matches: u32,
    cutoff: u32,
    augment: bool,
    order_key: String,
    order: SortOrder,
    source: Option<SourceConfig>,
    results: FacetResult,
}

impl Facet {
    /// A facet over attribute `<name>_attr`, grouped by attribute,
    /// ordered by descending count, returning up to 15 options.
    ///
    /// Panics when `name` is blank; a facet without a name cannot be
    /// addressed in any response.
    pub fn new(name: &str) -> Self {
        let name = name.trim();
        assert!(!name.is_empty(), "facet name must not be empty");
        Self {
            name: name.to_string(),
            attribute: format!("{name}_attr"),
            func: GroupFunc::Attr,
            group_sort: "@count desc".to_string(),
            select: "@groupby, @count".to_string(),
            sph_field: name.to_string(),
            default_index: None,
            max_num_values: 15,
            max_matches: 1000,
            cutoff: 0,
            augment: true,
            order_key: "@count".to_string(),
            order: SortOrder::Desc,
            source: None,
            results: FacetResult::default(),
        }
    }

    pub fn with_attribute(mut self, attribute: &str) -> Self {
        self.attribute = attribute.to_string();
        self
    }

    pub fn with_sph_field(mut self, field: &str) -> Self {
        self.sph_field = field.to_string();
        self
    }

    pub fn with_default_index(mut self, index: &str) -> Self {
        self.default_index = Some(index.to_string());
        self
    }

    pub fn with_max_num_values(mut self, n: usize) -> Self {
        self.max_num_values = n;
        self
    }

    pub fn with_max_matches(mut self, n: u32) -> Self {
        self.max_matches = n;
        self
    }

    pub fn with_cutoff(mut self, n: u32) -> Self {
        self.cutoff = n;
        self
    }

    /// Augmentation grows the requested row count by the number of terms
    /// already refining this facet's field, so selected options never
    /// crowd out fresh suggestions. On by default.
    pub fn with_augment(mut self, on: bool) -> Self {
        self.augment = on;
        self
    }

    pub fn with_group_sort(mut self, group_sort: &str) -> Self {
        self.group_sort = group_sort.to_string();
        self
    }

    /// Use a custom aggregate expression as `@groupfunc`. Rebuilds the
    /// select list around it, keeping any attached source attribute.
    pub fn set_group_func(&mut self, expr: &str) {
        self.select = format!("@groupby, @count, {expr} as @groupfunc");
        if let Some(source) = &self.source {
            self.select.push_str(&format!(", {}", source.name));
        }
    }

    /// Order computed rows by a row attribute. Any key the backend can
    /// compute also becomes the group-sort expression; `@term` only
    /// exists after term resolution, so it orders locally only.
    pub fn order_by(&mut self, key: &str, order: SortOrder) {
        self.order_key = key.to_string();
        self.order = order;
        if key != "@term" {
            self.group_sort = format!("{key} {order}");
        }
    }

    /// Attach a term source. An embedded source's attribute is added to
    /// the select list so grouped matches carry it.
    pub fn attach_source(&mut self, source: SourceConfig) {
        if source.id_attr.is_empty() {
            self.select.push_str(&format!(", {}", source.name));
        }
        self.source = Some(source);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn func(&self) -> GroupFunc {
        self.func
    }

    pub fn group_sort(&self) -> &str {
        &self.group_sort
    }

    pub fn select(&self) -> &str {
        &self.select
    }

    pub fn sph_field(&self) -> &str {
        &self.sph_field
    }

    pub fn default_index(&self) -> Option<&str> {
        self.default_index.as_deref()
    }

    pub fn max_num_values(&self) -> usize {
        self.max_num_values
    }

    pub fn max_matches(&self) -> u32 {
        self.max_matches
    }

    pub fn cutoff(&self) -> u32 {
        self.cutoff
    }

    pub fn source(&self) -> Option<&SourceConfig> {
        self.source.as_ref()
    }

    pub fn results(&self) -> &FacetResult {
        &self.results
    }

    pub fn time(&self) -> f64 {
        self.results.time
    }

    pub(crate) fn set_results(&mut self, results: FacetResult) {
        self.results = results;
    }

    pub fn reset(&mut self) {
        self.results = FacetResult::default();
    }

    /// Enqueue this facet's grouped variant of `query` on the backend.
    ///
    /// The backend state is snapshot before the limits, select list and
    /// group-by are applied, and restored right after the sub-query is
    /// queued, so neither the main query nor the next facet sees any of
    /// it. Returns the batch slot of the sub-query.
    pub fn prepare(
        &self,
        query: &MultiFieldQuery,
        backend: &mut dyn SearchBackend,
        exclude_numeric: bool,
        default_index: &str,
    ) -> usize {
        let augmented = if self.augment {
            query.count_field(&self.sph_field)
        } else {
            0
        };
        let limit = (self.max_num_values + augmented) as u32;

        let snapshot = backend.snapshot();
        backend.set_limits(0, limit, self.max_matches, self.cutoff);
        backend.set_select(&self.select);
        backend.set_group_by(&self.attribute, self.func, &self.group_sort);
        let index = self.default_index.as_deref().unwrap_or(default_index);
        let slot = backend.add_query(&query.to_sphinx(exclude_numeric), index, &self.name);
        backend.restore(snapshot);

        debug!(facet = %self.name, slot, limit, "queued facet sub-query");
        slot
    }

    /// Shape a raw grouped result into refinement rows and back-fill
    /// display terms onto the query.
    ///
    /// `external` overrides the embedded-attribute resolution for facets
    /// whose source lives in a lookup index.
    pub fn set_values(
        &mut self,
        query: &mut MultiFieldQuery,
        raw: &QueryResult,
        external: Option<&mut dyn TermSource>,
    ) -> Result<(), Error> {
        self.results.time = raw.time;
        self.results.total_found = raw.total_found;
        self.results.error = raw.error.clone();
        self.results.warning = raw.warning.clone();
        self.results.matches.clear();

        let group_id: &dyn Fn(&SearchMatch) -> Option<i64> = &SearchMatch::group_id;
        let terms = match self.source.clone() {
            Some(cfg) => match external {
                Some(source) => source.fetch_terms(&raw.matches, &cfg, group_id)?,
                None => self.fetch_terms(&raw.matches, &cfg, group_id)?,
            },
            None => TermMap::new(),
        };

        for m in &raw.matches {
            let row = self.shape_row(query, m, &terms);
            self.results.matches.push(row);
        }
        self.propagate_terms(query, &terms);
        Ok(())
    }

    fn shape_row(&self, query: &MultiFieldQuery, m: &SearchMatch, terms: &TermMap) -> FacetValue {
        let group_by = m.attr("@groupby").cloned().unwrap_or(Attr::Int(0));
        let count = m
            .attr("@count")
            .and_then(Attr::as_int)
            .unwrap_or_default()
            .max(0) as u64;
        let term = m
            .group_id()
            .and_then(|id| terms.get(&id).cloned())
            .unwrap_or_else(|| group_by.to_string());
        let group_func = m
            .attr("@groupfunc")
            .cloned()
            .unwrap_or(Attr::Int(count as i64));
        let selected = self.is_selected(query, &term, &group_by);
        let extra = m
            .attrs
            .iter()
            .filter(|(k, _)| {
                k.starts_with('@') && !matches!(k.as_str(), "@groupby" | "@count" | "@groupfunc")
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        FacetValue {
            group_by,
            count,
            term,
            group_func,
            selected,
            extra,
        }
    }

    // A row is selected when the active query refines this facet's field
    // with it, under any of the spellings the row can appear as: the
    // resolved term, the raw group key, or the display form. The match
    // is case-insensitive.
    fn is_selected(&self, query: &MultiFieldQuery, term: &str, group_by: &Attr) -> bool {
        let field = self.sph_field.to_lowercase();
        let term = term.to_lowercase();
        let key = group_by.to_string();
        query.iter().filter(|t| t.is_active()).any(|t| {
            (t.user_field() == field || t.sphinx_field().to_lowercase() == field)
                && (t.term().to_lowercase() == term
                    || t.term() == key
                    || t.user_term().to_lowercase() == term)
        })
    }

    // Queries arrive with raw ids when links carry them; re-render those
    // terms with the name the source resolved.
    fn propagate_terms(&self, query: &mut MultiFieldQuery, terms: &TermMap) {
        if terms.is_empty() {
            return;
        }
        let field = self.sph_field.to_lowercase();
        for t in query.iter_mut() {
            if t.user_field() != field && t.sphinx_field().to_lowercase() != field {
                continue;
            }
            if let Some(display) = t.term().parse::<i64>().ok().and_then(|id| terms.get(&id)) {
                let display = display.clone();
                t.set_user_term(&display);
            }
        }
    }

    /// Stable sort of the computed rows by the configured key; ties keep
    /// their backend order.
    pub fn order_values(&mut self) {
        let key = self.order_key.clone();
        let order = self.order;
        self.results.matches.sort_by(|a, b| {
            let ordering = match (a.get(&key), b.get(&key)) {
                (Some(a), Some(b)) => a.cmp_values(&b),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            };
            match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
    }
}

/// The embedded-attribute term source: ids and names ride along inside
/// one packed attribute of the grouped matches, no extra query needed.
impl TermSource for Facet {
    fn fetch_terms(
        &mut self,
        matches: &[SearchMatch],
        cfg: &SourceConfig,
        _id_of: GroupIdFn<'_>,
    ) -> Result<TermMap, Error> {
        Ok(split_packed_terms(matches, cfg))
    }
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} options)", self.name, self.results.matches.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    #[should_panic(expected = "facet name must not be empty")]
    fn test_blank_name_is_fatal() {
        let _ = Facet::new("  ");
    }

    #[test]
    fn test_defaults() {
        let facet = Facet::new("genre");
        assert_eq!(facet.attribute(), "genre_attr");
        assert_eq!(facet.func().code(), 4);
        assert_eq!(facet.group_sort(), "@count desc");
        assert_eq!(facet.select(), "@groupby, @count");
        assert_eq!(facet.sph_field(), "genre");
        assert_eq!(facet.max_num_values(), 15);
        assert_eq!(facet.max_matches(), 1000);
        assert_eq!(facet.cutoff(), 0);
    }

    #[test]
    fn test_group_func_and_source_compose_in_any_order() {
        let mut a = Facet::new("actor");
        a.attach_source(SourceConfig::embedded("actor_terms_attr"));
        a.set_group_func("sum(votes_attr)");

        let mut b = Facet::new("actor");
        b.set_group_func("sum(votes_attr)");
        b.attach_source(SourceConfig::embedded("actor_terms_attr"));

        let expected = "@groupby, @count, sum(votes_attr) as @groupfunc, actor_terms_attr";
        assert_eq!(a.select(), expected);
        assert_eq!(b.select(), expected);
    }

    #[test]
    fn test_order_by_term_keeps_group_sort() {
        let mut facet = Facet::new("genre");
        facet.order_by("@term", SortOrder::Asc);
        assert_eq!(facet.group_sort(), "@count desc");

        facet.order_by("@groupby", SortOrder::Asc);
        assert_eq!(facet.group_sort(), "@groupby asc");
    }
}
