//! OpenSearch-compatible cluster backend over its REST API.
//!
//! Documents live in a single index keyed by `space_id!item_id`. Writes use
//! `refresh=true` so they are searchable on return, matching the embedded
//! backend. Requests rotate over the configured addresses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};

use super::backend::{BackendHits, BackendQuery, DocumentPatch, IndexBackend};
use crate::config::RemoteEngineConfig;
use crate::context::RequestContext;
use crate::error::{SearchError, SearchResult};
use crate::model::IndexDocument;
use crate::model::types::{document_id, file_name, normalize_path, path_ancestors};

pub struct RemoteBackend {
    client: Client,
    addresses: Vec<String>,
    next: AtomicUsize,
    index: String,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SearchReply {
    hits: HitsReply,
}

#[derive(Debug, Deserialize)]
struct HitsReply {
    total: TotalReply,
    #[serde(default)]
    hits: Vec<HitReply>,
}

#[derive(Debug, Deserialize)]
struct TotalReply {
    value: u64,
}

#[derive(Debug, Deserialize)]
struct HitReply {
    #[serde(default, rename = "_score")]
    score: Option<f32>,
    #[serde(rename = "_source")]
    source: IndexDocument,
}

#[derive(Debug, Deserialize)]
struct GetReply {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<IndexDocument>,
}

#[derive(Debug, Deserialize)]
struct CountReply {
    count: u64,
}

impl RemoteBackend {
    pub fn new(cfg: &RemoteEngineConfig) -> SearchResult<Self> {
        if cfg.addresses.is_empty() {
            return Err(SearchError::Internal(
                "remote engine needs at least one address".into(),
            ));
        }
        let timeout = Duration::from_secs(cfg.timeout_secs.max(1));

        let mut headers = HeaderMap::new();
        for (name, value) in &cfg.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SearchError::Internal(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SearchError::Internal(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .connect_timeout(timeout)
            .default_headers(headers)
            .danger_accept_invalid_certs(cfg.insecure)
            .user_agent(concat!("space-search/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SearchError::Internal(format!("building cluster client: {e}")))?;

        Ok(Self {
            client,
            addresses: cfg
                .addresses
                .iter()
                .map(|a| a.trim_end_matches('/').to_string())
                .collect(),
            next: AtomicUsize::new(0),
            index: cfg.index.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            timeout,
        })
    }

    /// Ensures the index exists, creating it with the document mapping.
    pub fn connect(&self, ctx: &RequestContext) -> SearchResult<()> {
        let response = self.send(ctx, self.client.head(self.url("")))?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                tracing::info!(index = %self.index, "creating cluster index");
                let response =
                    self.send(ctx, self.client.put(self.url("")).json(&index_mapping()))?;
                expect_success(response).map(|_| ())
            }
            status => Err(classify(status, "")),
        }
    }

    fn base(&self) -> &str {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.addresses.len();
        &self.addresses[i]
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}{}", self.base(), self.index, path)
    }

    fn doc_url(&self, action: &str, space_id: &str, item_id: &str) -> String {
        let id = document_id(space_id, item_id);
        self.url(&format!("/{action}/{}", urlencoding::encode(&id)))
    }

    fn send(&self, ctx: &RequestContext, request: RequestBuilder) -> SearchResult<Response> {
        ctx.check()?;
        let request = match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        };
        request
            .timeout(ctx.clamp_timeout(self.timeout))
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Cancelled(format!("cluster request timed out: {e}"))
                } else {
                    SearchError::EngineUnavailable(format!("cluster unreachable: {e}"))
                }
            })
    }
}

fn expect_success(response: Response) -> SearchResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(classify(status, &body))
}

fn read_json<T: for<'de> Deserialize<'de>>(response: Response) -> SearchResult<T> {
    response
        .json()
        .map_err(|e| SearchError::EngineUnavailable(format!("unreadable cluster reply: {e}")))
}

/// Maps a cluster error status onto the error taxonomy.
fn classify(status: StatusCode, body: &str) -> SearchError {
    let reason = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/root_cause/0/reason")
                .or_else(|| v.pointer("/error/reason"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| status.to_string());
    match status {
        StatusCode::BAD_REQUEST => SearchError::BadQuery(reason),
        StatusCode::NOT_FOUND => SearchError::ItemNotFound(reason),
        s if s.is_server_error() => SearchError::EngineUnavailable(reason),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            SearchError::EngineUnavailable(reason)
        }
        _ => SearchError::Internal(reason),
    }
}

fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "id": { "type": "keyword" },
                "space_id": { "type": "keyword" },
                "item_id": { "type": "keyword" },
                "path": { "type": "keyword" },
                "path_ancestors": { "type": "keyword" },
                "name": { "type": "text" },
                "content": { "type": "text" },
                "tags": { "type": "text" },
                "mime_type": { "type": "keyword" },
                "size": { "type": "long" },
                "mtime": { "type": "long" },
                "trashed": { "type": "boolean" },
                "degraded": { "type": "boolean", "index": false }
            }
        }
    })
}

fn document_source(doc: &IndexDocument) -> Value {
    json!({
        "id": doc.id(),
        "space_id": doc.space_id,
        "item_id": doc.item_id,
        "path": doc.path,
        "path_ancestors": doc.path_ancestors(),
        "name": doc.name,
        "content": doc.content,
        "tags": doc.tags,
        "mime_type": doc.mime_type,
        "size": doc.size,
        "mtime": doc.mtime,
        "trashed": doc.trashed,
        "degraded": doc.degraded,
    })
}

/// NDJSON body for the `_bulk` endpoint.
fn bulk_body(index: &str, docs: &[IndexDocument]) -> String {
    let mut body = String::new();
    for doc in docs {
        body.push_str(&json!({ "index": { "_index": index, "_id": doc.id() } }).to_string());
        body.push('\n');
        body.push_str(&document_source(doc).to_string());
        body.push('\n');
    }
    body
}

fn patch_body(patch: &DocumentPatch) -> Value {
    match patch {
        DocumentPatch::Relocate(path) => {
            let path = normalize_path(path);
            json!({ "doc": {
                "name": file_name(&path),
                "path_ancestors": path_ancestors(&path),
                "path": path,
            }})
        }
        DocumentPatch::Trashed(flag) => json!({ "doc": { "trashed": flag } }),
    }
}

fn search_body(query: &BackendQuery) -> Value {
    let must = if query.query.is_empty() {
        json!({ "match_all": {} })
    } else {
        json!({ "query_string": {
            "query": query.query,
            "fields": ["name", "content", "tags"],
            "default_operator": "AND",
        }})
    };
    let mut filter = vec![json!({ "terms": { "space_id": query.spaces } })];
    if let Some(scope) = &query.path_scope {
        filter.push(json!({ "term": { "path_ancestors": scope } }));
    }
    if !query.include_trashed {
        filter.push(json!({ "term": { "trashed": false } }));
    }
    json!({
        "query": { "bool": { "must": [must], "filter": filter } },
        "sort": [{ "_score": "desc" }, { "id": "asc" }],
        "from": query.offset,
        "size": query.limit,
        "track_total_hits": true,
        "_source": { "excludes": ["content"] },
    })
}

impl IndexBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn upsert(&self, ctx: &RequestContext, docs: &[IndexDocument]) -> SearchResult<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let request = self
            .client
            .post(format!("{}/_bulk?refresh=true", self.base()))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(bulk_body(&self.index, docs));
        let reply: Value = read_json(expect_success(self.send(ctx, request)?)?)?;
        if reply.get("errors").and_then(Value::as_bool).unwrap_or(false) {
            let reason = reply
                .pointer("/items/0/index/error/reason")
                .and_then(Value::as_str)
                .unwrap_or("bulk request reported errors");
            return Err(SearchError::EngineUnavailable(reason.to_string()));
        }
        tracing::debug!(count = docs.len(), index = %self.index, "bulk upsert");
        Ok(())
    }

    fn get(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        item_id: &str,
    ) -> SearchResult<Option<IndexDocument>> {
        let response = self.send(
            ctx,
            self.client.get(self.doc_url("_doc", space_id, item_id)),
        )?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let reply: GetReply = read_json(expect_success(response)?)?;
        Ok(reply.source.filter(|_| reply.found))
    }

    fn patch(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        item_id: &str,
        patch: &DocumentPatch,
    ) -> SearchResult<bool> {
        let url = format!("{}?refresh=true", self.doc_url("_update", space_id, item_id));
        let response = self.send(ctx, self.client.post(url).json(&patch_body(patch)))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        expect_success(response)?;
        Ok(true)
    }

    fn search(&self, ctx: &RequestContext, query: &BackendQuery) -> SearchResult<BackendHits> {
        let request = self
            .client
            .post(self.url("/_search"))
            .json(&search_body(query));
        let reply: SearchReply = read_json(expect_success(self.send(ctx, request)?)?)?;
        Ok(BackendHits {
            total: reply.hits.total.value,
            hits: reply
                .hits
                .hits
                .into_iter()
                .map(|h| (h.source, h.score.unwrap_or_default()))
                .collect(),
        })
    }

    fn doc_count(&self, ctx: &RequestContext) -> SearchResult<u64> {
        let response = self.send(ctx, self.client.get(self.url("/_count")))?;
        let reply: CountReply = read_json(expect_success(response)?)?;
        Ok(reply.count)
    }
}
