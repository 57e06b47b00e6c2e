//! Query and reindex entry points.
//!
//! [`SearchService`] is the boundary callers talk to: it authenticates the
//! request token, memoizes identical searches for a short TTL and folds
//! engine errors into a [`StatusCode`].

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use serde::Serialize;
use thiserror::Error;

use crate::config::{Config, ReindexPolicy};
use crate::content;
use crate::context::RequestContext;
use crate::error::SearchError;
use crate::identity::{JwtTokenManager, TokenManager};
use crate::model::{SearchRequest, SearchResponse};
use crate::search::{self, CacheKey, Engine, ResultCache};
use crate::storage::{FsStorage, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusCode {
    Unauthenticated,
    BadRequest,
    Internal,
}

impl StatusCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::BadRequest => "BAD_REQUEST",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, Serialize)]
#[error("{code}: {message}")]
pub struct ServiceError {
    pub code: StatusCode,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<SearchError> for ServiceError {
    fn from(err: SearchError) -> Self {
        let code = match &err {
            SearchError::Unauthenticated(_) => StatusCode::Unauthenticated,
            SearchError::BadQuery(_) => StatusCode::BadRequest,
            _ => StatusCode::Internal,
        };
        Self::new(code, err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailedSpace {
    pub space_id: String,
    pub error: String,
}

/// Outcome of an `index_space` request.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct IndexSpaceReport {
    pub indexed: Vec<String>,
    pub failed: Vec<FailedSpace>,
}

impl IndexSpaceReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct SearchService {
    engine: Arc<dyn Engine>,
    tokens: Arc<dyn TokenManager>,
    storage: Arc<dyn Storage>,
    cache: ResultCache,
    policy: ReindexPolicy,
}

impl SearchService {
    pub fn new(
        engine: Arc<dyn Engine>,
        tokens: Arc<dyn TokenManager>,
        storage: Arc<dyn Storage>,
        cache: ResultCache,
    ) -> Self {
        Self {
            engine,
            tokens,
            storage,
            cache,
            policy: ReindexPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReindexPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Wires storage, extractor, engine and token manager from `cfg`.
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(&cfg.storage.root));
        let extractor =
            content::from_config(&cfg.extractor).context("initializing content extractor")?;
        let engine = search::open_engine(&cfg.engine, Arc::clone(&storage), extractor)
            .context("opening search engine")?;
        let tokens = JwtTokenManager::new(&cfg.token_manager, cfg.service_account.clone())
            .context("initializing token manager")?;
        let cache = ResultCache::new(cfg.cache.ttl(), cfg.cache.capacity);
        Ok(Self::new(engine, Arc::new(tokens), storage, cache).with_policy(cfg.reindex.policy))
    }

    pub fn engine(&self) -> Arc<dyn Engine> {
        Arc::clone(&self.engine)
    }

    pub fn search(
        &self,
        ctx: &RequestContext,
        request: &SearchRequest,
        token: &str,
    ) -> Result<SearchResponse, ServiceError> {
        let actor = self.tokens.dismantle_token(token).map_err(|e| {
            tracing::debug!(error = %e, "rejecting search request");
            ServiceError::new(StatusCode::Unauthenticated, e.to_string())
        })?;

        let key = CacheKey::new(request, &actor);
        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(actor = %actor.id, query = %request.query, "search_cache_hit");
            return Ok(hit);
        }

        let started = Instant::now();
        let response = self
            .engine
            .search(ctx, request, &actor)
            .map_err(|e| {
                tracing::warn!(
                    actor = %actor.id,
                    query = %request.query,
                    error_type = e.error_type(),
                    error = %e,
                    "search_failed"
                );
                match e {
                    SearchError::BadQuery(msg) => ServiceError::new(StatusCode::BadRequest, msg),
                    other => ServiceError::new(StatusCode::Internal, other.to_string()),
                }
            })?;
        tracing::info!(
            actor = %actor.id,
            query = %request.query,
            total = response.total_matches,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search"
        );
        self.cache.put(key, response.clone());
        Ok(response)
    }

    /// Rebuilds one space, or every space when `space_id` is empty or absent.
    pub fn index_space(
        &self,
        ctx: &RequestContext,
        space_id: Option<&str>,
    ) -> Result<IndexSpaceReport, ServiceError> {
        if let Some(space) = space_id.filter(|s| !s.is_empty()) {
            self.engine.index_space(ctx, space)?;
            return Ok(IndexSpaceReport {
                indexed: vec![space.to_string()],
                failed: Vec::new(),
            });
        }

        let spaces = self
            .tokens
            .service_actor()
            .and_then(|actor| self.storage.list_spaces(&actor))
            .map_err(|e| SearchError::EnumerationFailed(e.to_string()))?;
        tracing::info!(spaces = spaces.len(), policy = ?self.policy, "full reindex");

        let mut report = IndexSpaceReport::default();
        for space in spaces {
            match self.engine.index_space(ctx, &space) {
                Ok(_) => report.indexed.push(space),
                Err(e) => {
                    tracing::warn!(space_id = %space, error = %e, "space reindex failed");
                    if self.policy == ReindexPolicy::AbortOnFirst {
                        return Err(SearchError::per_space(space, e).into());
                    }
                    report.failed.push(FailedSpace {
                        space_id: space,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_errors_fold_into_status_codes() {
        let code = |e: SearchError| ServiceError::from(e).code;
        assert_eq!(
            code(SearchError::Unauthenticated("x".into())),
            StatusCode::Unauthenticated
        );
        assert_eq!(code(SearchError::BadQuery("x".into())), StatusCode::BadRequest);
        assert_eq!(
            code(SearchError::EngineUnavailable("x".into())),
            StatusCode::Internal
        );
        assert_eq!(
            code(SearchError::EnumerationFailed("x".into())),
            StatusCode::Internal
        );
    }

    #[test]
    fn service_error_displays_code_and_message() {
        let err = ServiceError::new(StatusCode::BadRequest, "unbalanced quote");
        assert_eq!(err.to_string(), "BAD_REQUEST: unbalanced quote");
    }
}
