//! Physical index backends.
//!
//! A backend stores [`IndexDocument`]s keyed by `(space_id, item_id)` and
//! answers scoped queries. It knows nothing about storage, extraction or
//! actors; [`crate::search::engine::IndexEngine`] layers those on top.

use crate::context::RequestContext;
use crate::error::SearchResult;
use crate::model::IndexDocument;

/// Query as handed to a backend, already scoped and authorized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendQuery {
    /// Backend query syntax; empty matches everything in scope.
    pub query: String,
    /// Spaces the caller may see. Never empty when handed to a backend.
    pub spaces: Vec<String>,
    /// Restrict to this path and its descendants.
    pub path_scope: Option<String>,
    pub include_trashed: bool,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BackendHits {
    /// Documents with their scores, best first.
    pub hits: Vec<(IndexDocument, f32)>,
    pub total: u64,
}

/// Single-field changes applied in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentPatch {
    /// New path; name and ancestry follow.
    Relocate(String),
    Trashed(bool),
}

impl DocumentPatch {
    pub fn apply(&self, doc: &mut IndexDocument) {
        match self {
            Self::Relocate(path) => doc.relocate(path),
            Self::Trashed(flag) => doc.trashed = *flag,
        }
    }
}

pub trait IndexBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inserts or replaces every document by identity, visible on return.
    fn upsert(&self, ctx: &RequestContext, docs: &[IndexDocument]) -> SearchResult<()>;

    fn get(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        item_id: &str,
    ) -> SearchResult<Option<IndexDocument>>;

    /// Applies `patch`; returns `false` when the document is unknown.
    fn patch(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        item_id: &str,
        patch: &DocumentPatch,
    ) -> SearchResult<bool> {
        let Some(mut doc) = self.get(ctx, space_id, item_id)? else {
            return Ok(false);
        };
        patch.apply(&mut doc);
        self.upsert(ctx, std::slice::from_ref(&doc))?;
        Ok(true)
    }

    fn search(&self, ctx: &RequestContext, query: &BackendQuery) -> SearchResult<BackendHits>;

    /// Number of documents held, trashed ones included.
    fn doc_count(&self, ctx: &RequestContext) -> SearchResult<u64>;
}
