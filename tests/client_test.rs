use std::collections::HashMap;

use fsphinx::models::backend::{BackendState, MatchMode};
use fsphinx::models::group::CACHE_HIT_TIME;
use fsphinx::prelude::*;
use fsphinx::testing::{grouped_match, result_with, ScriptedBackend};

fn movie_config() -> ClientConfig {
    ClientConfig {
        index: "movies".to_string(),
        field_map: HashMap::from([
            ("actor".to_string(), "actors".to_string()),
            ("genre".to_string(), "genres".to_string()),
        ]),
        ..Default::default()
    }
}

fn movie_client(backend: ScriptedBackend, config: ClientConfig) -> FacetedClient<ScriptedBackend> {
    FacetedClient::new(backend, config)
        .unwrap()
        .with_facets(vec![Facet::new("actor"), Facet::new("year")])
}

fn main_result() -> QueryResult {
    result_with(
        vec![
            SearchMatch::new(101).with_attr("year_attr", 1974i64),
            SearchMatch::new(102).with_attr("year_attr", 1999i64),
        ],
        2,
        0.01,
    )
}

fn full_batch() -> Vec<QueryResult> {
    vec![
        main_result(),
        result_with(vec![grouped_match(1, 10, 4)], 4, 0.002),
        result_with(vec![grouped_match(2, 1974, 2)], 2, 0.003),
    ]
}

#[test]
fn test_query_batches_main_plus_facets() {
    let mut backend = ScriptedBackend::new();
    backend.push_response(full_batch());
    let mut client = movie_client(backend, movie_config());

    let results = client.query("@genre drama @actor harrison ford").unwrap();

    assert_eq!(results.total_found, 2);
    assert_eq!(results.matches.len(), 2);
    assert_eq!(results.time, 0.01);
    assert_eq!(results.facets.len(), 2);
    assert_eq!(results.facets["actor"].matches.len(), 1);
    assert_eq!(results.facets["year"].matches[0].term, "1974");

    // Main query plus one grouped sub-query per facet, one round-trip.
    let backend = client.backend();
    assert_eq!(backend.run_count, 1);
    assert_eq!(backend.history.len(), 3);
    assert_eq!(backend.history[0].comment, "main");
    assert_eq!(backend.history[0].index, "movies");
    assert_eq!(
        backend.history[0].query,
        "(@genres drama) (@actors \"harrison ford\")"
    );
    assert_eq!(backend.history[1].comment, "actor");
    assert_eq!(backend.history[2].comment, "year");
    // The grouped slots queue under grouped state, the main one does not.
    assert!(backend.history[0].state.group.is_none());
    assert!(backend.history[1].state.group.is_some());
    // And the client put the connection back as it found it.
    assert_eq!(backend.state(), &BackendState::default());
}

#[test]
fn test_zero_hit_main_resets_facets() {
    let mut backend = ScriptedBackend::new();
    backend.push_response(vec![
        result_with(vec![], 0, 0.001),
        result_with(vec![grouped_match(1, 10, 4)], 4, 0.002),
        result_with(vec![grouped_match(2, 1974, 2)], 2, 0.003),
    ]);
    let mut client = movie_client(backend, movie_config());

    let results = client.query("@genre nosuchgenre").unwrap();
    assert_eq!(results.total_found, 0);
    assert!(results.facets["actor"].matches.is_empty());
    assert!(results.facets["year"].matches.is_empty());
    assert_eq!(client.group().time(), 0.0);
}

#[test]
fn test_filtering_turns_numeric_terms_into_filters() {
    let mut backend = ScriptedBackend::new();
    backend.push_response(full_batch());
    let config = ClientConfig {
        filtering: true,
        ..movie_config()
    };
    let mut client = movie_client(backend, config);

    client.query("@year 1974 @genre drama").unwrap();

    let backend = client.backend();
    let main = &backend.history[0];
    // The numeric refinement left the query text and became a filter.
    assert_eq!(main.query, "(@genres drama)");
    assert_eq!(main.state.filters.len(), 1);
    assert_eq!(main.state.filters[0].attr, "year_attr");
    assert_eq!(main.state.filters[0].values, vec![1974]);
    // Facet sub-queries run under the same filter.
    assert_eq!(backend.history[1].state.filters.len(), 1);
    // Nothing lingers on the connection afterwards.
    assert!(backend.state().filters.is_empty());
}

#[test]
fn test_empty_query_still_runs() {
    let mut backend = ScriptedBackend::new();
    backend.push_response(vec![result_with(vec![], 0, 0.0)]);
    let mut client = FacetedClient::new(backend, movie_config()).unwrap();

    let results = client.query("").unwrap();
    assert_eq!(results.total_found, 0);
    assert!(results.facets.is_empty());
    // With ALLOW_EMPTY off, the emitted query is a bare space.
    assert_eq!(client.backend().history[0].query, " ");
}

#[test]
fn test_cached_facets_skip_their_sub_queries() {
    let mut backend = ScriptedBackend::new();
    backend.push_response(full_batch());
    // After the facet slots are cached, only the main query runs.
    backend.push_response(vec![main_result()]);
    let group = FacetGroup::new(vec![Facet::new("actor"), Facet::new("year")])
        .with_cache(FacetGroupCache::new(Box::new(MemoryStore::new())));
    let mut client = FacetedClient::new(backend, movie_config())
        .unwrap()
        .with_group(group);

    let first = client.query("@genre drama").unwrap();
    assert_eq!(client.backend().history.len(), 3);

    let second = client.query("@genre drama").unwrap();
    assert_eq!(client.backend().history.len(), 4);
    assert_eq!(client.backend().history[3].comment, "main");
    assert_eq!(client.group().time(), CACHE_HIT_TIME);
    assert_eq!(second.facets, first.facets);
}

#[test]
fn test_zero_hit_main_resets_cached_facets() {
    let mut backend = ScriptedBackend::new();
    backend.push_response(full_batch());
    // Same canonical query later: facets come from cache, but the main
    // query finds nothing any more.
    backend.push_response(vec![result_with(vec![], 0, 0.001)]);
    let group = FacetGroup::new(vec![Facet::new("actor"), Facet::new("year")])
        .with_cache(FacetGroupCache::new(Box::new(MemoryStore::new())));
    let mut client = FacetedClient::new(backend, movie_config())
        .unwrap()
        .with_group(group);

    let first = client.query("@genre drama").unwrap();
    assert!(!first.facets["actor"].matches.is_empty());

    let second = client.query("@genre drama").unwrap();
    assert_eq!(second.total_found, 0);
    // No refinement options survive onto an empty result set, cached or
    // not, and the facet time is zeroed with them.
    assert!(second.facets["actor"].matches.is_empty());
    assert!(second.facets["year"].matches.is_empty());
    assert_eq!(client.group().time(), 0.0);
}

#[test]
fn test_miss_writes_are_evicted_by_ordinary_clear() {
    let mut backend = ScriptedBackend::new();
    backend.push_response(full_batch());
    backend.push_response(full_batch());
    let group = FacetGroup::new(vec![Facet::new("actor"), Facet::new("year")])
        .with_cache(FacetGroupCache::new(Box::new(MemoryStore::new())));
    let mut client = FacetedClient::new(backend, movie_config())
        .unwrap()
        .with_group(group);

    client.query("@genre drama").unwrap();
    // An ordinary (non-sticky) clear evicts what the miss wrote.
    client.group_mut().cache_mut().unwrap().clear(false).unwrap();

    client.query("@genre drama").unwrap();
    // Miss again: the full batch ran a second time.
    assert_eq!(client.backend().run_count, 2);
    assert_eq!(client.backend().history.len(), 6);
}

#[test]
fn test_backend_error_bubbles_and_restores() {
    let mut backend = ScriptedBackend::new();
    backend.fail_next = true;
    let mut client = movie_client(backend, movie_config());

    let err = client.query("@genre drama").unwrap_err();
    assert!(matches!(err, Error::Backend(BackendError::Connect(_))));
    assert_eq!(client.backend().state(), &BackendState::default());
}

#[test]
fn test_main_error_is_surfaced_not_swallowed() {
    let mut backend = ScriptedBackend::new();
    backend.push_response(vec![QueryResult {
        error: Some("index movies: parse error".to_string()),
        ..Default::default()
    }]);
    let mut client = FacetedClient::new(backend, movie_config()).unwrap();

    let results = client.query("@genre drama").unwrap();
    assert_eq!(results.error.as_deref(), Some("index movies: parse error"));
}

#[test]
fn test_lookup_term_source_round_trip() {
    let mut backend = ScriptedBackend::new();
    // Batch 1: main + the actor facet. Batch 2: the term lookup.
    backend.push_response(vec![
        main_result(),
        result_with(vec![grouped_match(1, 7, 4), grouped_match(2, 9, 1)], 5, 0.002),
    ]);
    backend.push_response(vec![result_with(
        vec![
            SearchMatch::new(7)
                .with_attr("actor_id_attr", 7i64)
                .with_attr("actor_name_attr", "Gene Hackman"),
            SearchMatch::new(9)
                .with_attr("actor_id_attr", 9i64)
                .with_attr("actor_name_attr", "Faye Dunaway"),
        ],
        2,
        0.001,
    )]);

    let mut facet = Facet::new("actor");
    facet.attach_source(SourceConfig::lookup("actor_terms", "actor_id_attr", "actor_name_attr"));
    let group = FacetGroup::new(vec![facet]).with_term_lookup(true);
    let mut client = FacetedClient::new(backend, movie_config())
        .unwrap()
        .with_group(group);

    let results = client.query("@genre drama").unwrap();

    let rows = &results.facets["actor"].matches;
    assert_eq!(rows[0].term, "Gene Hackman");
    assert_eq!(rows[1].term, "Faye Dunaway");

    let backend = client.backend();
    assert_eq!(backend.run_count, 2);
    let lookup = backend.history.last().unwrap();
    assert_eq!(lookup.index, "actor_terms");
    assert_eq!(lookup.state.match_mode, MatchMode::FullScan);
    assert_eq!(lookup.state.filters.len(), 1);
    assert_eq!(lookup.state.filters[0].attr, "actor_id_attr");
    assert_eq!(lookup.state.filters[0].values, vec![7, 9]);
    assert!(lookup.state.group.is_none());
    // The lookup restored everything before the client's own restore.
    assert_eq!(backend.state(), &BackendState::default());
}
