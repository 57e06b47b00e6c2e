//! Data model shared across the crate.

pub mod types;

pub use types::{
    Actor, IndexDocument, Match, ResourceMetadata, ResourceReference, SearchRequest,
    SearchResponse,
};
