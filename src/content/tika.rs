//! Apache Tika server extractor.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Body, Client};

use super::Extractor;
use crate::config::ExtractorConfig;
use crate::context::RequestContext;
use crate::error::{SearchError, SearchResult};
use crate::model::ResourceMetadata;
use crate::storage::Storage;

pub struct TikaExtractor {
    client: Client,
    endpoint: String,
    timeout: Duration,
    max_file_size: u64,
}

impl TikaExtractor {
    pub fn new(cfg: &ExtractorConfig) -> SearchResult<Self> {
        let timeout = Duration::from_secs(cfg.timeout_secs.max(1));
        let client = Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("space-search/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SearchError::Internal(format!("building tika client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/tika", cfg.tika_url.trim_end_matches('/')),
            timeout,
            max_file_size: cfg.max_file_size,
        })
    }
}

impl Extractor for TikaExtractor {
    fn name(&self) -> &'static str {
        "tika"
    }

    fn try_extract(
        &self,
        ctx: &RequestContext,
        resource: &ResourceMetadata,
        storage: &dyn Storage,
    ) -> SearchResult<String> {
        if resource.is_dir {
            return Ok(String::new());
        }
        if resource.size > self.max_file_size {
            tracing::debug!(
                path = %resource.path,
                size = resource.size,
                limit = self.max_file_size,
                "skipping content extraction for large file"
            );
            return Ok(String::new());
        }
        ctx.check()?;

        let reader = storage.open(resource)?;
        let response = self
            .client
            .put(&self.endpoint)
            .timeout(ctx.clamp_timeout(self.timeout))
            .header("Accept", "text/plain")
            .header("Content-Type", resource.mime_type.as_str())
            .body(Body::sized(reader, resource.size))
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Cancelled(format!("tika timed out: {e}"))
                } else {
                    SearchError::EngineUnavailable(format!("tika request failed: {e}"))
                }
            })?;

        check_status(response.status(), &resource.mime_type)?;
        let text = response
            .text()
            .map_err(|e| SearchError::EngineUnavailable(format!("reading tika response: {e}")))?;
        Ok(text.trim().to_string())
    }
}

/// Tika answers 415/422 for input it cannot parse; anything else non-2xx
/// means the server itself is unhealthy.
fn check_status(status: StatusCode, mime_type: &str) -> SearchResult<()> {
    if status == StatusCode::UNPROCESSABLE_ENTITY || status == StatusCode::UNSUPPORTED_MEDIA_TYPE {
        return Err(SearchError::Internal(format!(
            "unsupported by tika: {mime_type} ({status})"
        )));
    }
    if !status.is_success() {
        return Err(SearchError::EngineUnavailable(format!(
            "tika returned {status}"
        )));
    }
    Ok(())
}
