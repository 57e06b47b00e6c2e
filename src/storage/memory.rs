//! In-process storage used by tests, benches and embedders that already
//! hold their resources in memory.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use parking_lot::RwLock;

use super::Storage;
use crate::error::{SearchError, SearchResult};
use crate::model::{Actor, ResourceMetadata};

#[derive(Debug, Clone)]
struct Entry {
    meta: ResourceMetadata,
    body: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
struct Space {
    members: Vec<String>,
    items: BTreeMap<String, Entry>,
    /// Spaces flagged broken fail every walk, for failure-path tests.
    broken: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    spaces: RwLock<BTreeMap<String, Space>>,
    listing_fails: RwLock<bool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_space(&self, space_id: &str, members: &[&str]) {
        let mut spaces = self.spaces.write();
        let space = spaces.entry(space_id.to_string()).or_default();
        space.members = members.iter().map(|m| (*m).to_string()).collect();
    }

    /// Inserts or replaces a file resource.
    pub fn put(&self, meta: ResourceMetadata, body: impl Into<Vec<u8>>) {
        let mut spaces = self.spaces.write();
        let space = spaces.entry(meta.space_id.clone()).or_default();
        space.items.insert(
            meta.item_id.clone(),
            Entry {
                meta,
                body: body.into(),
            },
        );
    }

    /// Removes a resource, as trashing it in storage would.
    pub fn remove(&self, space_id: &str, item_id: &str) -> Option<ResourceMetadata> {
        self.spaces
            .write()
            .get_mut(space_id)
            .and_then(|s| s.items.remove(item_id))
            .map(|e| e.meta)
    }

    /// Applies `f` to a stored resource's metadata.
    pub fn update(&self, space_id: &str, item_id: &str, f: impl FnOnce(&mut ResourceMetadata)) {
        if let Some(entry) = self
            .spaces
            .write()
            .get_mut(space_id)
            .and_then(|s| s.items.get_mut(item_id))
        {
            f(&mut entry.meta);
        }
    }

    pub fn set_broken(&self, space_id: &str, broken: bool) {
        self.spaces
            .write()
            .entry(space_id.to_string())
            .or_default()
            .broken = broken;
    }

    pub fn set_listing_fails(&self, fails: bool) {
        *self.listing_fails.write() = fails;
    }
}

impl Storage for MemoryStorage {
    fn list_spaces(&self, actor: &Actor) -> SearchResult<Vec<String>> {
        if *self.listing_fails.read() {
            return Err(SearchError::Storage("listing spaces failed".into()));
        }
        Ok(self
            .spaces
            .read()
            .iter()
            .filter(|(id, s)| actor.service || **id == actor.id || s.members.contains(&actor.id))
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn walk_space(&self, space_id: &str) -> SearchResult<Vec<ResourceMetadata>> {
        let spaces = self.spaces.read();
        let space = spaces
            .get(space_id)
            .ok_or_else(|| SearchError::Storage(format!("space {space_id} not found")))?;
        if space.broken {
            return Err(SearchError::Storage(format!("space {space_id} unavailable")));
        }
        Ok(space.items.values().map(|e| e.meta.clone()).collect())
    }

    fn resolve(&self, space_id: &str, item_id: &str) -> SearchResult<ResourceMetadata> {
        self.spaces
            .read()
            .get(space_id)
            .and_then(|s| s.items.get(item_id))
            .map(|e| e.meta.clone())
            .ok_or_else(|| SearchError::ItemNotFound(format!("{space_id}!{item_id}")))
    }

    fn open(&self, resource: &ResourceMetadata) -> SearchResult<Box<dyn Read + Send>> {
        let body = self
            .spaces
            .read()
            .get(&resource.space_id)
            .and_then(|s| s.items.get(&resource.item_id))
            .map(|e| e.body.clone())
            .ok_or_else(|| SearchError::ItemNotFound(resource.item_id.clone()))?;
        Ok(Box::new(Cursor::new(body)))
    }
}
