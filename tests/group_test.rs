use fsphinx::models::group::CACHE_HIT_TIME;
use fsphinx::prelude::*;
use fsphinx::testing::{grouped_match, result_with, ScriptedBackend};

fn two_facet_group() -> FacetGroup {
    FacetGroup::new(vec![Facet::new("actor"), Facet::new("year")]).with_default_index("movies")
}

fn scripted_batch() -> Vec<QueryResult> {
    vec![
        result_with(vec![grouped_match(1, 10, 4), grouped_match(2, 11, 2)], 6, 0.002),
        result_with(vec![grouped_match(3, 1974, 3)], 3, 0.003),
    ]
}

#[test]
fn test_compute_issues_one_round_trip() {
    let mut backend = ScriptedBackend::new();
    backend.push_response(scripted_batch());
    let mut group = two_facet_group();
    let mut query = QueryParser::new().parse("drama");

    group.compute(&mut query, &mut backend, None).unwrap();

    // One grouped sub-query per facet, one round-trip for the lot.
    assert_eq!(backend.history.len(), 2);
    assert_eq!(backend.run_count, 1);
    assert_eq!(backend.history[0].comment, "actor");
    assert_eq!(backend.history[1].comment, "year");

    let results = group.results_by_name();
    assert_eq!(results["actor"].matches.len(), 2);
    assert_eq!(results["year"].matches.len(), 1);
    assert!((group.time() - 0.005).abs() < 1e-9);
}

#[test]
fn test_compute_slots_map_by_position() {
    let mut backend = ScriptedBackend::new();
    backend.push_response(scripted_batch());
    let mut group = two_facet_group();
    let mut query = QueryParser::new().parse("drama");
    group.compute(&mut query, &mut backend, None).unwrap();

    let results = group.results_by_name();
    assert_eq!(results["actor"].total_found, 6);
    assert_eq!(results["year"].total_found, 3);
}

#[test]
fn test_cache_miss_then_hit() {
    let mut backend = ScriptedBackend::new();
    backend.push_response(scripted_batch());
    let cache = FacetGroupCache::new(Box::new(MemoryStore::new()));
    let mut group = two_facet_group().with_cache(cache);
    let mut query = QueryParser::new().parse("drama");

    group.compute(&mut query, &mut backend, None).unwrap();
    assert_eq!(backend.run_count, 1);
    let computed = group.results_by_name();

    // Second run: served from cache, backend untouched.
    group.reset();
    let mut query = QueryParser::new().parse("drama");
    group.compute(&mut query, &mut backend, None).unwrap();
    assert_eq!(backend.run_count, 1);
    assert_eq!(group.time(), CACHE_HIT_TIME);
    assert_eq!(group.results_by_name(), computed);
}

#[test]
fn test_caching_opt_out_per_call() {
    let mut backend = ScriptedBackend::new();
    backend.push_response(scripted_batch());
    backend.push_response(scripted_batch());
    let cache = FacetGroupCache::new(Box::new(MemoryStore::new()));
    let mut group = two_facet_group().with_cache(cache);
    let mut query = QueryParser::new().parse("drama");

    group.compute(&mut query, &mut backend, Some(false)).unwrap();
    group.compute(&mut query, &mut backend, Some(false)).unwrap();
    // Nothing was written, nothing was read: both runs hit the backend.
    assert_eq!(backend.run_count, 2);
    assert_ne!(group.time(), CACHE_HIT_TIME);
}

#[test]
fn test_preload_survives_ordinary_clear() {
    let mut backend = ScriptedBackend::new();
    backend.push_response(scripted_batch());
    let cache = FacetGroupCache::new(Box::new(MemoryStore::new()));
    let mut group = two_facet_group().with_cache(cache);
    let mut query = QueryParser::new().parse("drama");

    group.preload(&mut query, &mut backend).unwrap();
    group.cache_mut().unwrap().clear(false).unwrap();

    group.reset();
    group.compute(&mut query, &mut backend, None).unwrap();
    assert_eq!(group.time(), CACHE_HIT_TIME);
    assert_eq!(backend.run_count, 1);

    // A sticky-inclusive clear finally evicts it.
    group.cache_mut().unwrap().clear(true).unwrap();
    backend.push_response(scripted_batch());
    group.reset();
    group.compute(&mut query, &mut backend, None).unwrap();
    assert_eq!(backend.run_count, 2);
}

#[test]
fn test_miss_write_is_not_sticky() {
    let mut backend = ScriptedBackend::new();
    backend.push_response(scripted_batch());
    backend.push_response(scripted_batch());
    let cache = FacetGroupCache::new(Box::new(MemoryStore::new()));
    let mut group = two_facet_group().with_cache(cache);
    let mut query = QueryParser::new().parse("drama");

    group.compute(&mut query, &mut backend, None).unwrap();
    group.cache_mut().unwrap().clear(false).unwrap();

    // The miss wrote a normal entry, so the ordinary clear evicted it.
    group.reset();
    group.compute(&mut query, &mut backend, None).unwrap();
    assert_eq!(backend.run_count, 2);
    assert_ne!(group.time(), CACHE_HIT_TIME);
}

#[test]
fn test_reset_zeroes_everything() {
    let mut backend = ScriptedBackend::new();
    backend.push_response(scripted_batch());
    let mut group = two_facet_group();
    let mut query = QueryParser::new().parse("drama");
    group.compute(&mut query, &mut backend, None).unwrap();

    group.reset();
    assert_eq!(group.time(), 0.0);
    for facet in &group {
        assert!(facet.results().matches.is_empty());
    }
}

#[test]
fn test_backend_failure_propagates() {
    let mut backend = ScriptedBackend::new();
    backend.fail_next = true;
    let mut group = two_facet_group();
    let mut query = QueryParser::new().parse("drama");
    let err = group.compute(&mut query, &mut backend, None).unwrap_err();
    assert!(matches!(err, Error::Backend(BackendError::Connect(_))));
}
