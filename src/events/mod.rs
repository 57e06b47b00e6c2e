//! Storage change events and their translation into engine calls.
//!
//! [`plan`] is the pure mapping from one event to an ordered list of
//! [`EngineCall`]s; [`Reindexer`] executes those calls for every delivery
//! of an [`EventStream`] and acknowledges afterwards.

pub mod reindexer;
pub mod stream;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::EventsConfig;
use crate::model::IndexDocument;

pub use reindexer::{Reindexer, ReindexerHandle};
pub use stream::{ChannelStream, Delivery, EventStream, JsonLinesStream};

/// One storage change, as published on the event bus.
///
/// Serialized with a `"type"` discriminator next to the common fields:
/// `{"type":"ItemMoved","space_id":"s","item_id":"1","old_path":"/a","new_path":"/b"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub space_id: String,
    pub item_id: String,
    /// User who caused the change; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executant: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    ItemTrashed,
    ItemRestored,
    ItemMoved {
        #[serde(default)]
        old_path: String,
        new_path: String,
    },
    ItemUploaded,
    UploadReady {
        #[serde(default)]
        executing_user: String,
        #[serde(default)]
        failed: bool,
    },
    ContainerCreated,
    FileTouched,
    FileVersionRestored,
    TagsAdded {
        tags: BTreeSet<String>,
    },
    TagsRemoved {
        tags: BTreeSet<String>,
    },
    /// Any event type this service does not react to.
    #[serde(other)]
    Unknown,
}

impl EventKind {
    /// Wire name, also used as the stream subject.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ItemTrashed => "ItemTrashed",
            Self::ItemRestored => "ItemRestored",
            Self::ItemMoved { .. } => "ItemMoved",
            Self::ItemUploaded => "ItemUploaded",
            Self::UploadReady { .. } => "UploadReady",
            Self::ContainerCreated => "ContainerCreated",
            Self::FileTouched => "FileTouched",
            Self::FileVersionRestored => "FileVersionRestored",
            Self::TagsAdded { .. } => "TagsAdded",
            Self::TagsRemoved { .. } => "TagsRemoved",
            Self::Unknown => "Unknown",
        }
    }
}

impl ChangeEvent {
    pub fn new(space_id: impl Into<String>, item_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            space_id: space_id.into(),
            item_id: item_id.into(),
            executant: None,
            kind,
        }
    }
}

/// Subjects the reindexer subscribes to.
pub const SUBSCRIBED_EVENTS: &[&str] = &[
    "ItemTrashed",
    "ItemRestored",
    "ItemMoved",
    "ItemUploaded",
    "UploadReady",
    "ContainerCreated",
    "FileTouched",
    "FileVersionRestored",
    "TagsAdded",
    "TagsRemoved",
];

/// Set change applied to a document's tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagDelta {
    Add(BTreeSet<String>),
    Remove(BTreeSet<String>),
}

impl TagDelta {
    /// Applies the delta; returns whether the tag set changed.
    pub fn apply(&self, doc: &mut IndexDocument) -> bool {
        let before = doc.tags.len();
        match self {
            Self::Add(tags) => doc.tags.extend(tags.iter().cloned()),
            Self::Remove(tags) => doc.tags.retain(|t| !tags.contains(t)),
        }
        doc.tags.len() != before
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    IndexSpace {
        space_id: String,
    },
    TrashItem {
        space_id: String,
        item_id: String,
    },
    RestoreItem {
        space_id: String,
        item_id: String,
    },
    MoveItem {
        space_id: String,
        item_id: String,
        new_path: String,
    },
    UpsertItem {
        space_id: String,
        item_id: String,
        delta: TagDelta,
    },
}

impl EngineCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::IndexSpace { .. } => "index_space",
            Self::TrashItem { .. } => "trash_item",
            Self::RestoreItem { .. } => "restore_item",
            Self::MoveItem { .. } => "move_item",
            Self::UpsertItem { .. } => "upsert_item",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReindexOptions {
    /// Index uploads on `UploadReady` (post-processing done) instead of
    /// `ItemUploaded`.
    pub async_uploads: bool,
    /// Follow point mutations with a rebuild of their space.
    pub rebuild_after_mutation: bool,
}

impl Default for ReindexOptions {
    fn default() -> Self {
        Self {
            async_uploads: false,
            rebuild_after_mutation: true,
        }
    }
}

impl From<&EventsConfig> for ReindexOptions {
    fn from(cfg: &EventsConfig) -> Self {
        Self {
            async_uploads: cfg.async_uploads,
            rebuild_after_mutation: cfg.rebuild_after_mutation,
        }
    }
}

/// Engine calls for one event, in execution order.
pub fn plan(event: &ChangeEvent, options: &ReindexOptions) -> Vec<EngineCall> {
    let space_id = event.space_id.clone();
    let item_id = event.item_id.clone();
    let rebuild = || EngineCall::IndexSpace {
        space_id: event.space_id.clone(),
    };

    let point = match &event.kind {
        EventKind::ItemTrashed => EngineCall::TrashItem { space_id, item_id },
        EventKind::ItemRestored => EngineCall::RestoreItem { space_id, item_id },
        EventKind::ItemMoved { new_path, .. } => EngineCall::MoveItem {
            space_id,
            item_id,
            new_path: new_path.clone(),
        },
        EventKind::TagsAdded { tags } => EngineCall::UpsertItem {
            space_id,
            item_id,
            delta: TagDelta::Add(tags.clone()),
        },
        EventKind::TagsRemoved { tags } => EngineCall::UpsertItem {
            space_id,
            item_id,
            delta: TagDelta::Remove(tags.clone()),
        },
        EventKind::ContainerCreated | EventKind::FileTouched | EventKind::FileVersionRestored => {
            return vec![rebuild()];
        }
        EventKind::ItemUploaded if !options.async_uploads => return vec![rebuild()],
        EventKind::UploadReady { failed: false, .. } if options.async_uploads => {
            return vec![rebuild()];
        }
        EventKind::ItemUploaded | EventKind::UploadReady { .. } | EventKind::Unknown => {
            return Vec::new();
        }
    };

    if options.rebuild_after_mutation {
        vec![point, rebuild()]
    } else {
        vec![point]
    }
}
