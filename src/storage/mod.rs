//! Storage backend collaborator.
//!
//! The index never owns resources; it asks storage which spaces an actor can
//! see, what a space contains, and for the bytes of a single resource.

pub mod fs;
pub mod memory;

use std::io::Read;

use crate::error::SearchResult;
use crate::model::{Actor, ResourceMetadata};

pub use fs::FsStorage;
pub use memory::MemoryStorage;

pub trait Storage: Send + Sync {
    /// Spaces visible to `actor`. Service actors see every space.
    fn list_spaces(&self, actor: &Actor) -> SearchResult<Vec<String>>;

    /// Every live (non-trashed) resource of a space, directories included.
    fn walk_space(&self, space_id: &str) -> SearchResult<Vec<ResourceMetadata>>;

    /// Metadata of a single resource by identity.
    fn resolve(&self, space_id: &str, item_id: &str) -> SearchResult<ResourceMetadata>;

    /// Content stream of a file resource.
    fn open(&self, resource: &ResourceMetadata) -> SearchResult<Box<dyn Read + Send>>;
}

/// Best-effort mime type from a file name's extension.
pub fn mime_from_name(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "odt" => "application/vnd.oasis.opendocument.text",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "zip" => "application/zip",
        "rs" => "text/x-rust",
        _ => "application/octet-stream",
    }
}

/// Mime type reported for directories.
pub const DIRECTORY_MIME: &str = "httpd/unix-directory";
