//! Drawing records and the host-document snapshot they are built from.
//!
//! A [`DrawingRecord`] is the locally persisted state of one canvas document:
//! content payload, timestamps, content hash, and sync bookkeeping. Records
//! are stored one per key under the `drawing:` prefix.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::Result;
use crate::hash;
use crate::store::{DRAWING_KEY_PREFIX, KeyValueStore, get_json, set_json};
use crate::sync::SyncStatus;

/// One canvas document as persisted in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DrawingRecord {
    /// Stable local identifier, prefixed so drawing keys can be told apart
    /// from other key classes sharing the store (`drawing:<uuid>`).
    pub id: String,

    /// Display name. Mutable; may legitimately diverge from the remote
    /// object's name while a rename is pending sync.
    pub name: String,

    /// When the drawing was created
    pub created_at: DateTime<Utc>,

    /// Last time the content meaningfully changed. Only advances when the
    /// change detector reports a real difference, so sort-by-recency is not
    /// defeated by noisy host fields.
    pub last_modified: DateTime<Utc>,

    /// Timestamp of the last successful remote write. `None` means never
    /// synced, or known to differ from the remote copy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,

    /// Canonical content hash at the last time the payload was stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// Document data (element list, app state fragments). Opaque to the sync
    /// core except for the embedded asset-id list and the noise fields the
    /// change detector filters.
    pub payload: Value,

    /// Optional thumbnail (base64). Immaterial to sync correctness.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_image: Option<String>,

    /// Canvas background color
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
}

/// Snapshot of the host editor's persisted document state, as delivered
/// with each mutation event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct HostSnapshot {
    /// The document payload
    pub payload: Value,

    /// Canvas background color
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,

    /// Thumbnail rendered by the host (base64)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_image: Option<String>,
}

impl DrawingRecord {
    /// Create a new record from a host snapshot, minting a fresh id and
    /// computing the initial content hash.
    pub fn new(name: impl Into<String>, snapshot: HostSnapshot, now: DateTime<Utc>) -> Self {
        let content_hash = hash::hash_payload(&snapshot.payload);
        Self {
            id: mint_drawing_id(),
            name: name.into(),
            created_at: now,
            last_modified: now,
            last_sync: None,
            content_hash: Some(content_hash),
            payload: snapshot.payload,
            preview_image: snapshot.preview_image,
            background_color: snapshot.background_color,
        }
    }

    /// Derive the sync state of this record from its bookkeeping fields.
    pub fn sync_status(&self) -> SyncStatus {
        match self.last_sync {
            None => SyncStatus::Unsynced,
            Some(sync) if self.last_modified > sync => SyncStatus::Dirty,
            Some(_) => SyncStatus::Synced,
        }
    }
}

/// Mint a fresh namespaced drawing id.
pub fn mint_drawing_id() -> String {
    format!("{}{}", DRAWING_KEY_PREFIX, Uuid::new_v4())
}

/// Whether a store key names a drawing record.
pub fn is_drawing_key(key: &str) -> bool {
    key.starts_with(DRAWING_KEY_PREFIX)
}

/// Collect the ids of all image assets a payload references.
///
/// Scans the element list for image elements carrying a `fileId`,
/// deduplicated in first-seen order.
pub fn referenced_asset_ids(payload: &Value) -> Vec<String> {
    let mut seen = indexmap::IndexSet::new();

    if let Some(elements) = payload.get("elements").and_then(Value::as_array) {
        for element in elements {
            let is_image = element.get("type").and_then(Value::as_str) == Some("image");
            if !is_image {
                continue;
            }
            if let Some(file_id) = element.get("fileId").and_then(Value::as_str) {
                seen.insert(file_id.to_string());
            }
        }
    }

    seen.into_iter().collect()
}

/// Load a drawing record by id. The id doubles as the store key.
pub fn load_drawing(store: &dyn KeyValueStore, id: &str) -> Result<Option<DrawingRecord>> {
    get_json(store, id)
}

/// Persist a drawing record under its own id.
pub fn save_drawing(store: &dyn KeyValueStore, record: &DrawingRecord) -> Result<()> {
    set_json(store, &record.id, record)
}

/// Remove a drawing record from the store.
pub fn delete_drawing(store: &dyn KeyValueStore, id: &str) -> Result<()> {
    store.remove(id)
}

/// Load every drawing record in the store.
///
/// Records that fail to parse are skipped with a warning rather than
/// aborting the enumeration.
pub fn all_drawings(store: &dyn KeyValueStore) -> Result<Vec<DrawingRecord>> {
    let mut drawings = Vec::new();
    for key in store.keys()? {
        if !is_drawing_key(&key) {
            continue;
        }
        match get_json::<DrawingRecord>(store, &key) {
            Ok(Some(record)) => drawings.push(record),
            Ok(None) => {}
            Err(err) => log::warn!("skipping unreadable drawing record {}: {}", key, err),
        }
    }
    Ok(drawings)
}
