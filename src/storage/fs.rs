//! Directory-tree storage: every directory under the root is a space.
//!
//! - item ids are inode numbers on unix, so they survive renames
//! - `<space>/.members` lists user ids (one per line) with access besides
//!   the owner, whose id equals the space name
//! - `<space>/.tags.json` maps space-relative paths to tag lists
//!
//! Dotfiles are never reported as resources.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use walkdir::WalkDir;

use super::{DIRECTORY_MIME, Storage, mime_from_name};
use crate::error::{SearchError, SearchResult};
use crate::model::types::normalize_path;
use crate::model::{Actor, ResourceMetadata};

const MEMBERS_FILE: &str = ".members";
const TAGS_FILE: &str = ".tags.json";

pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn space_dir(&self, space_id: &str) -> SearchResult<PathBuf> {
        if space_id.is_empty() || space_id.starts_with('.') || space_id.contains(['/', '\\']) {
            return Err(SearchError::Storage(format!("invalid space id {space_id:?}")));
        }
        let dir = self.root.join(space_id);
        if !dir.is_dir() {
            return Err(SearchError::Storage(format!("space {space_id} not found")));
        }
        Ok(dir)
    }

    fn members(&self, space_dir: &Path) -> Vec<String> {
        fs::read_to_string(space_dir.join(MEMBERS_FILE))
            .map(|raw| {
                raw.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn tags(&self, space_dir: &Path) -> HashMap<String, BTreeSet<String>> {
        let Ok(raw) = fs::read_to_string(space_dir.join(TAGS_FILE)) else {
            return HashMap::new();
        };
        match serde_json::from_str::<HashMap<String, BTreeSet<String>>>(&raw) {
            Ok(map) => map
                .into_iter()
                .map(|(path, tags)| (normalize_path(&path), tags))
                .collect(),
            Err(e) => {
                tracing::warn!(dir = %space_dir.display(), error = %e, "ignoring unreadable tags file");
                HashMap::new()
            }
        }
    }

    fn metadata_for(
        &self,
        space_id: &str,
        space_dir: &Path,
        path: &Path,
        tags: &HashMap<String, BTreeSet<String>>,
    ) -> SearchResult<ResourceMetadata> {
        let meta = fs::metadata(path)?;
        let rel = path.strip_prefix(space_dir).unwrap_or(path);
        let logical = normalize_path(&rel.to_string_lossy().replace('\\', "/"));
        let name = if logical == "/" {
            String::new()
        } else {
            rel.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        let is_dir = meta.is_dir();
        Ok(ResourceMetadata {
            space_id: space_id.to_string(),
            item_id: item_id(&meta, &logical),
            mime_type: if is_dir {
                DIRECTORY_MIME.to_string()
            } else {
                mime_from_name(&name).to_string()
            },
            tags: tags.get(&logical).cloned().unwrap_or_default(),
            size: if is_dir { 0 } else { meta.len() },
            path: logical,
            name,
            mtime,
            is_dir,
        })
    }
}

#[cfg(unix)]
fn item_id(meta: &fs::Metadata, _logical: &str) -> String {
    use std::os::unix::fs::MetadataExt;
    format!("{:x}", meta.ino())
}

#[cfg(not(unix))]
fn item_id(_meta: &fs::Metadata, logical: &str) -> String {
    format!("{:x}", fxhash::hash64(logical))
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|s| s.starts_with('.'))
}

impl Storage for FsStorage {
    fn list_spaces(&self, actor: &Actor) -> SearchResult<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            SearchError::Storage(format!("listing spaces in {}: {e}", self.root.display()))
        })?;
        let mut spaces = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if actor.service || name == actor.id || self.members(&entry.path()).contains(&actor.id)
            {
                spaces.push(name);
            }
        }
        spaces.sort();
        Ok(spaces)
    }

    fn walk_space(&self, space_id: &str) -> SearchResult<Vec<ResourceMetadata>> {
        let dir = self.space_dir(space_id)?;
        let tags = self.tags(&dir);
        let mut out = Vec::new();
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !is_hidden(e))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(space_id, error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            match self.metadata_for(space_id, &dir, entry.path(), &tags) {
                Ok(meta) => out.push(meta),
                Err(e) => tracing::warn!(space_id, path = %entry.path().display(), error = %e, "stat failed"),
            }
        }
        Ok(out)
    }

    fn resolve(&self, space_id: &str, item_id: &str) -> SearchResult<ResourceMetadata> {
        let dir = self.space_dir(space_id)?;
        let tags = self.tags(&dir);
        let root = self.metadata_for(space_id, &dir, &dir, &tags)?;
        if root.item_id == item_id {
            return Ok(root);
        }
        self.walk_space(space_id)?
            .into_iter()
            .find(|m| m.item_id == item_id)
            .ok_or_else(|| SearchError::ItemNotFound(format!("{space_id}!{item_id}")))
    }

    fn open(&self, resource: &ResourceMetadata) -> SearchResult<Box<dyn Read + Send>> {
        if resource.is_dir {
            return Err(SearchError::Storage(format!("{} is a directory", resource.path)));
        }
        let dir = self.space_dir(&resource.space_id)?;
        let file = fs::File::open(dir.join(resource.path.trim_start_matches('/')))?;
        Ok(Box::new(file))
    }
}
