//! Indexed entities and the request/response shapes of the query path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Separator between space and item in a document's identity key.
pub const ID_SEPARATOR: char = '!';

/// One searchable record, keyed by `(space_id, item_id)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDocument {
    pub space_id: String,
    pub item_id: String,
    /// Logical path inside the space, always starting with `/`.
    pub path: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    /// Modification time in unix seconds.
    pub mtime: i64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Extracted text; empty when extraction was skipped or degraded.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub trashed: bool,
    /// Extraction gave up; the next rebuild extracts again.
    #[serde(default)]
    pub degraded: bool,
}

impl IndexDocument {
    /// Identity key shared by every backend.
    pub fn id(&self) -> String {
        document_id(&self.space_id, &self.item_id)
    }

    /// Re-points the document at `new_path`, keeping identity and content.
    pub fn relocate(&mut self, new_path: &str) {
        self.path = normalize_path(new_path);
        self.name = file_name(&self.path).to_string();
    }

    /// Every ancestor of `path` including itself, root first.
    pub fn path_ancestors(&self) -> Vec<String> {
        path_ancestors(&self.path)
    }
}

pub fn document_id(space_id: &str, item_id: &str) -> String {
    format!("{space_id}{ID_SEPARATOR}{item_id}")
}

/// Normalizes to a rooted, slash-separated path without trailing slash.
pub fn normalize_path(path: &str) -> String {
    let parts: Vec<&str> = path
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    format!("/{}", parts.join("/"))
}

pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

pub fn path_ancestors(path: &str) -> Vec<String> {
    let normalized = normalize_path(path);
    let mut out = vec!["/".to_string()];
    let mut current = String::new();
    for part in normalized.split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);
        out.push(current.clone());
    }
    out
}

/// Authenticated identity a request runs as.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Privileged service identity, used for full enumeration.
    #[serde(default)]
    pub service: bool,
}

/// Scope of a search: a space, optionally narrowed to a subtree.
///
/// `item_id` names the subtree root by identity; `path` is then relative to
/// it (or to the space root when `item_id` is absent).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceReference {
    #[serde(default)]
    pub space_id: Option<String>,
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl ResourceReference {
    pub fn space(space_id: impl Into<String>) -> Self {
        Self {
            space_id: Some(space_id.into()),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn is_unscoped(&self) -> bool {
        self.space_id.as_deref().unwrap_or("").is_empty()
    }
}

/// Resource as reported by the storage collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceMetadata {
    pub space_id: String,
    pub item_id: String,
    pub path: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub mtime: i64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub is_dir: bool,
}

impl ResourceMetadata {
    /// Builds the indexed form with the given extracted content.
    pub fn into_document(self, content: String) -> IndexDocument {
        IndexDocument {
            space_id: self.space_id,
            item_id: self.item_id,
            path: normalize_path(&self.path),
            name: self.name,
            mime_type: self.mime_type,
            size: self.size,
            mtime: self.mtime,
            tags: self.tags,
            content,
            trashed: false,
            degraded: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SearchRequest {
    pub query: String,
    pub page_size: i32,
    #[serde(default)]
    pub reference: ResourceReference,
    /// Opaque token from a previous response; empty for the first page.
    #[serde(default)]
    pub page_token: String,
    #[serde(default)]
    pub include_trashed: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, page_size: i32) -> Self {
        Self {
            query: query.into(),
            page_size,
            ..Self::default()
        }
    }
}

/// One hit. Carries metadata only; extracted content is never returned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Match {
    pub score: f32,
    pub space_id: String,
    pub item_id: String,
    pub path: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub mtime: i64,
    pub tags: Vec<String>,
    pub trashed: bool,
}

impl Match {
    pub fn from_document(doc: IndexDocument, score: f32) -> Self {
        Self {
            score,
            space_id: doc.space_id,
            item_id: doc.item_id,
            path: doc.path,
            name: doc.name,
            mime_type: doc.mime_type,
            size: doc.size,
            mtime: doc.mtime,
            tags: doc.tags.into_iter().collect(),
            trashed: doc.trashed,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    pub matches: Vec<Match>,
    pub total_matches: i64,
    /// Empty when there is no further page.
    pub next_page_token: String,
}
