//! Search layer facade.
//!
//! - **[`engine`]**: The [`Engine`] contract and [`IndexEngine`], which ties a backend to storage and extraction.
//! - **[`backend`]**: Physical index trait shared by both backends.
//! - **[`tantivy`]**: Embedded Tantivy index, schema and document mapping.
//! - **[`remote`]**: OpenSearch-compatible cluster over REST.
//! - **[`query`]**: Page sizes, page tokens and path scoping.
//! - **[`cache`]**: Short-TTL memo of search responses.

pub mod backend;
pub mod cache;
pub mod engine;
pub mod query;
pub mod remote;
pub mod tantivy;

use std::sync::Arc;

use crate::config::{EngineConfig, EngineType};
use crate::content::Extractor;
use crate::context::RequestContext;
use crate::error::SearchResult;
use crate::storage::Storage;

pub use backend::IndexBackend;
pub use cache::{CacheKey, ResultCache};
pub use engine::{Engine, IndexEngine, IndexStats};

/// Opens the configured backend.
pub fn open_backend(cfg: &EngineConfig) -> SearchResult<Arc<dyn IndexBackend>> {
    Ok(match cfg.kind {
        EngineType::Tantivy => {
            let dir = tantivy::index_dir(&cfg.data_dir)?;
            tracing::info!(path = %dir.display(), "opening embedded index");
            Arc::new(tantivy::TantivyBackend::open_or_create(
                &dir,
                cfg.writer_heap_bytes,
            )?)
        }
        EngineType::Remote => {
            let backend = remote::RemoteBackend::new(&cfg.remote)?;
            backend.connect(&RequestContext::background())?;
            tracing::info!(index = %cfg.remote.index, "connected to cluster");
            Arc::new(backend)
        }
    })
}

pub fn open_engine(
    cfg: &EngineConfig,
    storage: Arc<dyn Storage>,
    extractor: Arc<dyn Extractor>,
) -> SearchResult<Arc<dyn Engine>> {
    let backend = open_backend(cfg)?;
    Ok(Arc::new(IndexEngine::new(backend, storage, extractor)))
}
