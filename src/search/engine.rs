//! The engine contract used by the query service and the reindexer.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use super::backend::{BackendQuery, DocumentPatch, IndexBackend};
use super::query::{
    MAX_RESULT_WINDOW, decode_page_token, effective_page_size, encode_page_token, fingerprint,
    path_scope,
};
use crate::content::Extractor;
use crate::context::RequestContext;
use crate::error::{SearchError, SearchResult};
use crate::model::{Actor, IndexDocument, Match, ResourceMetadata, SearchRequest, SearchResponse};
use crate::storage::Storage;

/// Documents written per backend commit during a space rebuild.
const INDEX_BATCH_SIZE: usize = 64;

/// Outcome of one space rebuild.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct IndexStats {
    pub scanned: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub degraded: usize,
    pub elapsed_ms: u64,
}

/// Full-text index over storage spaces.
///
/// Shared by request handlers and the reindexer, so every method must be
/// callable concurrently. Point mutations of unknown items log and succeed:
/// they can race with rebuilds and the following rebuild settles the state.
pub trait Engine: Send + Sync {
    /// Re-derives every document of `space_id` from storage.
    fn index_space(&self, ctx: &RequestContext, space_id: &str) -> SearchResult<IndexStats>;

    /// Insert-or-replace keyed on `(space_id, item_id)`.
    fn upsert_item(&self, ctx: &RequestContext, doc: IndexDocument) -> SearchResult<()>;

    fn document(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        item_id: &str,
    ) -> SearchResult<Option<IndexDocument>>;

    fn move_item(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        item_id: &str,
        new_path: &str,
    ) -> SearchResult<()>;

    fn trash_item(&self, ctx: &RequestContext, space_id: &str, item_id: &str) -> SearchResult<()>;

    fn restore_item(&self, ctx: &RequestContext, space_id: &str, item_id: &str)
    -> SearchResult<()>;

    fn search(
        &self,
        ctx: &RequestContext,
        request: &SearchRequest,
        actor: &Actor,
    ) -> SearchResult<SearchResponse>;
}

pub struct IndexEngine {
    backend: Arc<dyn IndexBackend>,
    storage: Arc<dyn Storage>,
    extractor: Arc<dyn Extractor>,
}

impl IndexEngine {
    pub fn new(
        backend: Arc<dyn IndexBackend>,
        storage: Arc<dyn Storage>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            backend,
            storage,
            extractor,
        }
    }

    pub fn backend(&self) -> &Arc<dyn IndexBackend> {
        &self.backend
    }

    fn patch_or_warn(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        item_id: &str,
        patch: DocumentPatch,
        op: &'static str,
    ) -> SearchResult<()> {
        if !self.backend.patch(ctx, space_id, item_id, &patch)? {
            tracing::warn!(op, space_id, item_id, "item not in index, skipping");
        }
        Ok(())
    }

    /// Builds the document for one listed resource, reusing indexed content
    /// when the file itself is unchanged and its extraction succeeded.
    fn prepare(
        &self,
        ctx: &RequestContext,
        resource: ResourceMetadata,
        stats: &mut IndexStats,
    ) -> SearchResult<Option<IndexDocument>> {
        let existing = self
            .backend
            .get(ctx, &resource.space_id, &resource.item_id)?;
        let (content, degraded) = match existing {
            Some(doc) if up_to_date(&doc, &resource) => {
                stats.skipped += 1;
                return Ok(None);
            }
            Some(doc) if reusable(&doc, &resource) => (doc.content, false),
            _ if resource.is_dir => (String::new(), false),
            _ => {
                let extraction = self.extractor.extract(ctx, &resource, self.storage.as_ref());
                if extraction.degraded.is_some() {
                    stats.degraded += 1;
                }
                (extraction.content, extraction.degraded.is_some())
            }
        };
        let mut doc = resource.into_document(content);
        doc.degraded = degraded;
        Ok(Some(doc))
    }
}

fn reusable(doc: &IndexDocument, resource: &ResourceMetadata) -> bool {
    !doc.degraded && !resource.is_dir && doc.mtime == resource.mtime && doc.size == resource.size
}

fn up_to_date(doc: &IndexDocument, resource: &ResourceMetadata) -> bool {
    !doc.trashed
        && !doc.degraded
        && doc.mtime == resource.mtime
        && doc.path == crate::model::types::normalize_path(&resource.path)
        && doc.tags == resource.tags
        && doc.size == resource.size
}

impl Engine for IndexEngine {
    fn index_space(&self, ctx: &RequestContext, space_id: &str) -> SearchResult<IndexStats> {
        ctx.check()?;
        let started = Instant::now();
        let resources = self.storage.walk_space(space_id)?;
        let mut stats = IndexStats {
            scanned: resources.len(),
            ..IndexStats::default()
        };
        let mut batch = Vec::with_capacity(INDEX_BATCH_SIZE);
        for resource in resources {
            ctx.check()?;
            if let Some(doc) = self.prepare(ctx, resource, &mut stats)? {
                batch.push(doc);
            }
            if batch.len() >= INDEX_BATCH_SIZE {
                self.backend.upsert(ctx, &batch)?;
                stats.indexed += batch.len();
                batch.clear();
            }
        }
        self.backend.upsert(ctx, &batch)?;
        stats.indexed += batch.len();
        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            backend = self.backend.name(),
            space_id,
            scanned = stats.scanned,
            indexed = stats.indexed,
            skipped = stats.skipped,
            degraded = stats.degraded,
            elapsed_ms = stats.elapsed_ms,
            "index_space_done"
        );
        Ok(stats)
    }

    fn upsert_item(&self, ctx: &RequestContext, doc: IndexDocument) -> SearchResult<()> {
        tracing::debug!(space_id = %doc.space_id, item_id = %doc.item_id, "upsert_item");
        self.backend.upsert(ctx, std::slice::from_ref(&doc))
    }

    fn document(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        item_id: &str,
    ) -> SearchResult<Option<IndexDocument>> {
        self.backend.get(ctx, space_id, item_id)
    }

    fn move_item(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        item_id: &str,
        new_path: &str,
    ) -> SearchResult<()> {
        self.patch_or_warn(
            ctx,
            space_id,
            item_id,
            DocumentPatch::Relocate(new_path.to_string()),
            "move_item",
        )
    }

    fn trash_item(&self, ctx: &RequestContext, space_id: &str, item_id: &str) -> SearchResult<()> {
        self.patch_or_warn(ctx, space_id, item_id, DocumentPatch::Trashed(true), "trash_item")
    }

    fn restore_item(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        item_id: &str,
    ) -> SearchResult<()> {
        self.patch_or_warn(
            ctx,
            space_id,
            item_id,
            DocumentPatch::Trashed(false),
            "restore_item",
        )
    }

    fn search(
        &self,
        ctx: &RequestContext,
        request: &SearchRequest,
        actor: &Actor,
    ) -> SearchResult<SearchResponse> {
        ctx.check()?;
        let limit = effective_page_size(request.page_size);
        let fp = fingerprint(request);
        let offset = decode_page_token(&request.page_token, fp)?;

        let permitted = self.storage.list_spaces(actor)?;
        let reference = &request.reference;
        let spaces = match reference.space_id.as_deref().filter(|s| !s.is_empty()) {
            Some(space) if permitted.iter().any(|p| p == space) => vec![space.to_string()],
            Some(space) => {
                tracing::debug!(actor = %actor.id, space_id = space, "space not visible to actor");
                Vec::new()
            }
            None => permitted,
        };
        if spaces.is_empty() {
            return Ok(SearchResponse::default());
        }

        let base = match (&reference.item_id, spaces.as_slice()) {
            (Some(item_id), [space]) => match self.storage.resolve(space, item_id) {
                Ok(resource) => Some(resource.path),
                Err(SearchError::ItemNotFound(_)) => {
                    return Err(SearchError::BadQuery(format!(
                        "reference item {item_id} not found in space {space}"
                    )));
                }
                Err(e) => return Err(e),
            },
            _ => None,
        };
        let query = BackendQuery {
            query: request.query.trim().to_string(),
            spaces,
            path_scope: path_scope(base.as_deref(), reference.path.as_deref()),
            include_trashed: request.include_trashed,
            offset,
            limit,
        };
        let found = self.backend.search(ctx, &query)?;

        let matches: Vec<Match> = found
            .hits
            .into_iter()
            .map(|(doc, score)| Match::from_document(doc, score))
            .collect();
        let next_offset = offset + matches.len();
        let next_page_token = if !matches.is_empty()
            && (next_offset as u64) < found.total
            && next_offset <= MAX_RESULT_WINDOW
        {
            encode_page_token(next_offset, fp)
        } else {
            String::new()
        };
        tracing::debug!(
            backend = self.backend.name(),
            actor = %actor.id,
            query = %request.query,
            offset,
            returned = matches.len(),
            total = found.total,
            "search_done"
        );
        Ok(SearchResponse {
            matches,
            total_matches: found.total as i64,
            next_page_token,
        })
    }
}
