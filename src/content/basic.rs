use super::Extractor;
use crate::context::RequestContext;
use crate::error::SearchResult;
use crate::model::ResourceMetadata;
use crate::storage::Storage;

/// Indexes name, mime type and tags only; never reads file bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicExtractor;

impl Extractor for BasicExtractor {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn try_extract(
        &self,
        _ctx: &RequestContext,
        _resource: &ResourceMetadata,
        _storage: &dyn Storage,
    ) -> SearchResult<String> {
        Ok(String::new())
    }
}
