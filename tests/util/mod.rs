use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::sync::Arc;

use parking_lot::Mutex;
use space_search::config::{ServiceAccountConfig, TokenManagerConfig};
use space_search::content::Extractor;
use space_search::context::RequestContext;
use space_search::error::{SearchError, SearchResult};
use space_search::identity::JwtTokenManager;
use space_search::model::{Actor, IndexDocument, ResourceMetadata, SearchRequest, SearchResponse};
use space_search::search::engine::{Engine, IndexEngine, IndexStats};
use space_search::search::tantivy::TantivyBackend;
use space_search::storage::{MemoryStorage, Storage};

#[allow(dead_code)]
pub const SECRET: &str = "test-secret";

/// Engine double recording every call as `"<op> <space>/<item>"`.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<String>>,
    documents: Mutex<HashMap<(String, String), IndexDocument>>,
    /// Operation names that fail with `EngineUnavailable`.
    failing: Mutex<HashSet<&'static str>>,
    search_error: Mutex<Option<fn() -> SearchError>>,
    search_response: Mutex<SearchResponse>,
}

#[allow(dead_code)]
impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.lock().insert(op);
    }

    pub fn fail_search_with(&self, make: fn() -> SearchError) {
        *self.search_error.lock() = Some(make);
    }

    pub fn respond_with(&self, response: SearchResponse) {
        *self.search_response.lock() = response;
    }

    pub fn insert(&self, doc: IndexDocument) {
        self.documents
            .lock()
            .insert((doc.space_id.clone(), doc.item_id.clone()), doc);
    }

    fn record(&self, op: &'static str, target: String) -> SearchResult<()> {
        self.calls.lock().push(format!("{op} {target}"));
        if self.failing.lock().contains(op) {
            return Err(SearchError::EngineUnavailable(format!("{op} failed")));
        }
        Ok(())
    }
}

impl Engine for RecordingEngine {
    fn index_space(&self, _ctx: &RequestContext, space_id: &str) -> SearchResult<IndexStats> {
        self.record("index_space", space_id.to_string())?;
        Ok(IndexStats::default())
    }

    fn upsert_item(&self, _ctx: &RequestContext, doc: IndexDocument) -> SearchResult<()> {
        self.record("upsert_item", format!("{}/{}", doc.space_id, doc.item_id))?;
        self.insert(doc);
        Ok(())
    }

    fn document(
        &self,
        _ctx: &RequestContext,
        space_id: &str,
        item_id: &str,
    ) -> SearchResult<Option<IndexDocument>> {
        Ok(self
            .documents
            .lock()
            .get(&(space_id.to_string(), item_id.to_string()))
            .cloned())
    }

    fn move_item(
        &self,
        _ctx: &RequestContext,
        space_id: &str,
        item_id: &str,
        new_path: &str,
    ) -> SearchResult<()> {
        self.record("move_item", format!("{space_id}/{item_id} -> {new_path}"))
    }

    fn trash_item(&self, _ctx: &RequestContext, space_id: &str, item_id: &str) -> SearchResult<()> {
        self.record("trash_item", format!("{space_id}/{item_id}"))
    }

    fn restore_item(
        &self,
        _ctx: &RequestContext,
        space_id: &str,
        item_id: &str,
    ) -> SearchResult<()> {
        self.record("restore_item", format!("{space_id}/{item_id}"))
    }

    fn search(
        &self,
        _ctx: &RequestContext,
        request: &SearchRequest,
        actor: &Actor,
    ) -> SearchResult<SearchResponse> {
        self.record("search", format!("{} as {}", request.query, actor.id))?;
        if let Some(make) = *self.search_error.lock() {
            return Err(make());
        }
        Ok(self.search_response.lock().clone())
    }
}

/// Extractor returning stored bytes as UTF-8 text.
#[allow(dead_code)]
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn try_extract(
        &self,
        _ctx: &RequestContext,
        resource: &ResourceMetadata,
        storage: &dyn Storage,
    ) -> SearchResult<String> {
        if resource.is_dir {
            return Ok(String::new());
        }
        let mut text = String::new();
        storage.open(resource)?.read_to_string(&mut text)?;
        Ok(text)
    }
}

#[allow(dead_code)]
pub fn file(space: &str, item: &str, path: &str, mtime: i64) -> ResourceMetadata {
    ResourceMetadata {
        space_id: space.into(),
        item_id: item.into(),
        path: path.into(),
        name: path.rsplit('/').next().unwrap_or_default().into(),
        mime_type: "text/plain".into(),
        size: 16,
        mtime,
        ..ResourceMetadata::default()
    }
}

/// Real engine over an in-RAM index and the given storage.
#[allow(dead_code)]
pub fn memory_engine(storage: Arc<dyn Storage>) -> Arc<IndexEngine> {
    Arc::new(IndexEngine::new(
        Arc::new(TantivyBackend::in_ram().expect("in-ram index")),
        storage,
        Arc::new(PlainTextExtractor),
    ))
}

#[allow(dead_code)]
pub fn memory_storage() -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::new())
}

#[allow(dead_code)]
pub fn token_manager(service_account: bool) -> JwtTokenManager {
    let account = if service_account {
        ServiceAccountConfig {
            id: "indexer".into(),
            secret: "s3cret".into(),
        }
    } else {
        ServiceAccountConfig::default()
    };
    JwtTokenManager::new(
        &TokenManagerConfig {
            secret: SECRET.into(),
            token_ttl_secs: 3600,
        },
        account,
    )
    .expect("token manager")
}

#[allow(dead_code)]
pub fn alice() -> Actor {
    Actor {
        id: "alice".into(),
        username: "alice".into(),
        ..Actor::default()
    }
}

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
