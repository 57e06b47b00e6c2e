//! Content extraction.
//!
//! | Name  | Backend                              | Content                |
//! |-------|--------------------------------------|------------------------|
//! | basic | none                                 | always empty           |
//! | tika  | Apache Tika server (`PUT /tika`)     | plain text of the file |
//!
//! Callers go through [`Extractor::extract`], which never fails: any backend
//! error, timeout or unsupported input yields empty content and a
//! `degraded` reason.

pub mod basic;
pub mod tika;

use std::sync::Arc;

use crate::config::{ExtractorConfig, ExtractorType};
use crate::context::RequestContext;
use crate::error::SearchResult;
use crate::model::ResourceMetadata;
use crate::storage::Storage;

pub use basic::BasicExtractor;
pub use tika::TikaExtractor;

/// Outcome of extracting one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub content: String,
    /// Why content is empty when extraction was attempted and gave up.
    pub degraded: Option<String>,
}

pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Backend-specific extraction; may fail.
    fn try_extract(
        &self,
        ctx: &RequestContext,
        resource: &ResourceMetadata,
        storage: &dyn Storage,
    ) -> SearchResult<String>;

    /// Extracts text, degrading to empty content on any failure.
    fn extract(
        &self,
        ctx: &RequestContext,
        resource: &ResourceMetadata,
        storage: &dyn Storage,
    ) -> Extraction {
        match self.try_extract(ctx, resource, storage) {
            Ok(content) => Extraction {
                content,
                degraded: None,
            },
            Err(e) => {
                tracing::warn!(
                    extractor = self.name(),
                    space_id = %resource.space_id,
                    item_id = %resource.item_id,
                    path = %resource.path,
                    error = %e,
                    "extraction_degraded"
                );
                Extraction {
                    content: String::new(),
                    degraded: Some(e.to_string()),
                }
            }
        }
    }
}

/// Builds the extractor selected in configuration.
pub fn from_config(cfg: &ExtractorConfig) -> SearchResult<Arc<dyn Extractor>> {
    Ok(match cfg.kind {
        ExtractorType::Basic => Arc::new(BasicExtractor),
        ExtractorType::Tika => Arc::new(TikaExtractor::new(cfg)?),
    })
}
