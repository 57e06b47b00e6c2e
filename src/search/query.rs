//! Request normalization and opaque page tokens.
//!
//! A page token is `base64url({"o": offset, "f": fingerprint})`. The
//! fingerprint hashes everything that shapes the result list except the page
//! position, so replaying a token always yields the same page and a token
//! cannot be reused with a different query. Offsets are capped at
//! [`MAX_RESULT_WINDOW`].

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::error::{SearchError, SearchResult};
use crate::model::SearchRequest;
use crate::model::types::normalize_path;

/// Page size used when the request leaves it unset.
pub const DEFAULT_PAGE_SIZE: usize = 200;

/// Upper bound for a single page.
pub const MAX_PAGE_SIZE: usize = 1_000;

/// Deepest offset a page token may carry.
pub const MAX_RESULT_WINDOW: usize = 10_000;

#[derive(Debug, Serialize, Deserialize)]
struct PageToken {
    o: usize,
    f: u64,
}

pub fn effective_page_size(requested: i32) -> usize {
    if requested <= 0 {
        DEFAULT_PAGE_SIZE
    } else {
        (requested as usize).min(MAX_PAGE_SIZE)
    }
}

/// Stable hash of the result-shaping parts of a request.
pub fn fingerprint(request: &SearchRequest) -> u64 {
    fxhash::hash64(&(
        request.query.trim(),
        &request.reference,
        request.include_trashed,
        effective_page_size(request.page_size),
    ))
}

pub fn encode_page_token(offset: usize, fingerprint: u64) -> String {
    let token = PageToken {
        o: offset,
        f: fingerprint,
    };
    // Serializing two integers cannot fail.
    let raw = serde_json::to_vec(&token).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(raw)
}

/// Offset encoded in `token`; an empty token starts at zero.
pub fn decode_page_token(token: &str, fingerprint: u64) -> SearchResult<usize> {
    if token.is_empty() {
        return Ok(0);
    }
    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| SearchError::BadQuery("malformed page token".into()))?;
    let parsed: PageToken = serde_json::from_slice(&raw)
        .map_err(|_| SearchError::BadQuery("malformed page token".into()))?;
    if parsed.f != fingerprint {
        return Err(SearchError::BadQuery(
            "page token does not belong to this query".into(),
        ));
    }
    if parsed.o > MAX_RESULT_WINDOW {
        return Err(SearchError::BadQuery(format!(
            "page token offset {} exceeds the result window of {MAX_RESULT_WINDOW}",
            parsed.o
        )));
    }
    Ok(parsed.o)
}

/// Joins a subtree base with a relative path; `None` means the whole space.
pub fn path_scope(base: Option<&str>, relative: Option<&str>) -> Option<String> {
    let joined = format!("{}/{}", base.unwrap_or("/"), relative.unwrap_or(""));
    let scope = normalize_path(&joined);
    (scope != "/").then_some(scope)
}
