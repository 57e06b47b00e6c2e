mod util;

use std::sync::Arc;
use std::time::Duration;

use space_search::config::ReindexPolicy;
use space_search::context::RequestContext;
use space_search::error::SearchError;
use space_search::model::{Match, SearchRequest, SearchResponse};
use space_search::search::ResultCache;
use space_search::service::{FailedSpace, SearchService, StatusCode};
use space_search::storage::{MemoryStorage, Storage};
use util::{RecordingEngine, file, memory_engine, memory_storage, token_manager};

fn canned() -> SearchResponse {
    SearchResponse {
        matches: vec![Match {
            score: 1.5,
            space_id: "alice".into(),
            item_id: "42".into(),
            path: "/a.txt".into(),
            name: "a.txt".into(),
            mime_type: "text/plain".into(),
            size: 5,
            mtime: 100,
            tags: vec![],
            trashed: false,
        }],
        total_matches: 1,
        next_page_token: String::new(),
    }
}

fn service_with(engine: Arc<RecordingEngine>, ttl: Duration) -> SearchService {
    SearchService::new(
        engine,
        Arc::new(token_manager(true)),
        memory_storage(),
        ResultCache::new(ttl, 64),
    )
}

#[test]
fn identical_searches_within_ttl_hit_the_cache() {
    let engine = RecordingEngine::new();
    engine.respond_with(canned());
    let service = service_with(engine.clone(), Duration::from_millis(300));
    let token = token_manager(true).mint("alice", "Alice").unwrap();
    let ctx = RequestContext::background();
    let request = SearchRequest::new("hello", 10);

    let first = service.search(&ctx, &request, &token).unwrap();
    let second = service.search(&ctx, &request, &token).unwrap();
    assert_eq!(engine.count("search"), 1);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );

    std::thread::sleep(Duration::from_millis(400));
    service.search(&ctx, &request, &token).unwrap();
    assert_eq!(engine.count("search"), 2, "expired entry goes back to the engine");
}

#[test]
fn different_pages_and_actors_do_not_share_cache_entries() {
    let engine = RecordingEngine::new();
    let service = service_with(engine.clone(), Duration::from_secs(60));
    let tokens = token_manager(true);
    let ctx = RequestContext::background();
    let request = SearchRequest::new("hello", 10);

    service
        .search(&ctx, &request, &tokens.mint("alice", "").unwrap())
        .unwrap();
    service
        .search(&ctx, &request, &tokens.mint("bob", "").unwrap())
        .unwrap();
    let mut next = request.clone();
    next.page_token = "page-2".into();
    service
        .search(&ctx, &next, &tokens.mint("alice", "").unwrap())
        .unwrap();
    assert_eq!(engine.count("search"), 3);
}

#[test]
fn bad_tokens_are_rejected_without_engine_calls() {
    let engine = RecordingEngine::new();
    let service = service_with(engine.clone(), Duration::from_secs(1));
    let ctx = RequestContext::background();
    let request = SearchRequest::new("hello", 10);
    let expired = token_manager(true)
        .mint_with_expiry("alice", "", chrono::Utc::now().timestamp() - 10)
        .unwrap();

    for token in ["", "garbage", "abc.def", expired.as_str()] {
        let err = service.search(&ctx, &request, token).unwrap_err();
        assert_eq!(err.code, StatusCode::Unauthenticated, "token {token:?}");
    }
    assert!(engine.calls().is_empty());
}

#[test]
fn engine_errors_map_to_status_codes() {
    let engine = RecordingEngine::new();
    engine.fail_search_with(|| SearchError::BadQuery("unbalanced quote".into()));
    let service = service_with(engine.clone(), Duration::from_secs(1));
    let token = token_manager(true).mint("alice", "").unwrap();
    let ctx = RequestContext::background();

    let err = service
        .search(&ctx, &SearchRequest::new("\"oops", 10), &token)
        .unwrap_err();
    assert_eq!(err.code, StatusCode::BadRequest);
    assert!(err.message.contains("unbalanced quote"));

    engine.fail_search_with(|| SearchError::EngineUnavailable("down".into()));
    let err = service
        .search(&ctx, &SearchRequest::new("other", 10), &token)
        .unwrap_err();
    assert_eq!(err.code, StatusCode::Internal);
}

#[test]
fn failed_searches_are_not_cached() {
    let engine = RecordingEngine::new();
    engine.fail("search");
    let service = service_with(engine.clone(), Duration::from_secs(60));
    let token = token_manager(true).mint("alice", "").unwrap();
    let ctx = RequestContext::background();
    let request = SearchRequest::new("hello", 10);
    assert!(service.search(&ctx, &request, &token).is_err());
    assert!(service.search(&ctx, &request, &token).is_err());
    assert_eq!(engine.count("search"), 2);
}

fn two_spaces_second_broken() -> Arc<MemoryStorage> {
    let storage = memory_storage();
    storage.add_space("a-space", &[]);
    storage.put(file("a-space", "1", "/one.txt", 10), "first space");
    storage.add_space("b-space", &[]);
    storage.put(file("b-space", "2", "/two.txt", 10), "second space");
    storage.set_broken("b-space", true);
    storage
}

fn reindex_service(storage: Arc<MemoryStorage>, policy: ReindexPolicy) -> SearchService {
    let engine = memory_engine(storage.clone());
    SearchService::new(
        engine,
        Arc::new(token_manager(true)),
        storage,
        ResultCache::new(Duration::from_secs(1), 16),
    )
    .with_policy(policy)
}

#[test]
fn full_reindex_continues_past_failed_space() {
    let storage = two_spaces_second_broken();
    let service = reindex_service(storage, ReindexPolicy::Continue);
    let report = service
        .index_space(&RequestContext::background(), None)
        .unwrap();
    assert_eq!(report.indexed, vec!["a-space".to_string()]);
    assert_eq!(report.failed.len(), 1);
    let FailedSpace { space_id, error } = &report.failed[0];
    assert_eq!(space_id, "b-space");
    assert!(error.contains("unavailable"), "{error}");
    assert!(!report.is_complete());
}

#[test]
fn full_reindex_can_abort_on_first_failure() {
    let storage = two_spaces_second_broken();
    let service = reindex_service(storage, ReindexPolicy::AbortOnFirst);
    let err = service
        .index_space(&RequestContext::background(), Some(""))
        .unwrap_err();
    assert_eq!(err.code, StatusCode::Internal);
    assert!(err.message.contains("b-space"), "{}", err.message);
}

#[test]
fn full_reindex_indexes_every_space_for_search() {
    let storage = memory_storage();
    storage.add_space("alice", &[]);
    storage.put(file("alice", "1", "/notes.txt", 10), "quarterly report");
    storage.add_space("team", &["alice"]);
    storage.put(file("team", "2", "/plan.txt", 10), "quarterly plan");
    let service = reindex_service(storage, ReindexPolicy::Continue);
    let ctx = RequestContext::background();

    let report = service.index_space(&ctx, None).unwrap();
    assert_eq!(report.indexed, vec!["alice".to_string(), "team".to_string()]);

    let token = token_manager(true).mint("alice", "").unwrap();
    let response = service
        .search(&ctx, &SearchRequest::new("quarterly", 10), &token)
        .unwrap();
    assert_eq!(response.total_matches, 2);
}

#[test]
fn single_space_reindex_touches_only_that_space() {
    let engine = RecordingEngine::new();
    let storage = memory_storage();
    storage.add_space("a", &[]);
    storage.add_space("b", &[]);
    let service = SearchService::new(
        engine.clone(),
        Arc::new(token_manager(true)),
        storage,
        ResultCache::new(Duration::from_secs(1), 16),
    );
    let report = service
        .index_space(&RequestContext::background(), Some("b"))
        .unwrap();
    assert_eq!(report.indexed, vec!["b".to_string()]);
    assert_eq!(engine.calls(), vec!["index_space b"]);
}

#[test]
fn enumeration_failure_is_internal_and_indexes_nothing() {
    let engine = RecordingEngine::new();
    let storage = memory_storage();
    storage.add_space("a", &[]);
    storage.set_listing_fails(true);
    let service = SearchService::new(
        engine.clone(),
        Arc::new(token_manager(true)),
        storage.clone(),
        ResultCache::new(Duration::from_secs(1), 16),
    );
    let ctx = RequestContext::background();
    let err = service.index_space(&ctx, None).unwrap_err();
    assert_eq!(err.code, StatusCode::Internal);
    assert!(err.message.contains("enumeration"), "{}", err.message);
    assert!(engine.calls().is_empty());

    storage.set_listing_fails(false);
    let without_account = SearchService::new(
        engine.clone(),
        Arc::new(token_manager(false)),
        storage as Arc<dyn Storage>,
        ResultCache::new(Duration::from_secs(1), 16),
    );
    let err = without_account.index_space(&ctx, None).unwrap_err();
    assert_eq!(err.code, StatusCode::Internal);
    assert!(engine.calls().is_empty());
}
