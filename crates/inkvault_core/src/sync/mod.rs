//! Cloud sync module for mirroring drawings to a remote object store.
//!
//! # Architecture
//!
//! ```text
//! Remote object store (one container per account)
//!         ↑↓
//!    SyncCoordinator (upsert / pull-all / trash)
//!         ↑↓
//!    IdentifierMapping (Local ↔ Remote id table)
//!         ↑↓
//!    KeyValueStore (drawing records + session state)
//! ```
//!
//! Per drawing, the sync state derived from record bookkeeping moves as:
//!
//! ```text
//! Unsynced -> (remote object created, mapping stored) -> Synced
//! Synced   -> (local content hash changes)            -> Dirty
//! Dirty    -> (upload succeeds)                       -> Synced
//! Dirty    -> (upload fails)                          -> Dirty (retried on next trigger)
//! Synced/Dirty -> (remote object gone after pull)     -> Unsynced
//! any      -> (deleted locally)                       -> remote trashed, mapping removed
//! ```

/// Provider-facing coordinator
pub mod coordinator;

pub use coordinator::SyncCoordinator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::drawing::DrawingRecord;
use crate::error::{InkvaultError, Result, SerializableError};
use crate::provider::RemoteObjectRef;

/// Sync state of one drawing, derived from its record bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SyncStatus {
    /// Never synced, or known to differ from the remote copy
    Unsynced,
    /// Remote copy matches the last local write
    Synced,
    /// Local content changed since the last successful upload
    Dirty,
}

/// Result of one remote write (upsert, rename, trash).
///
/// Provider failures are reported here as values, never thrown across the
/// core boundary; the local record has already been written by the time the
/// remote call runs.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RemoteWriteResult {
    /// Whether the remote write completed
    pub success: bool,
    /// The remote object involved, when known
    pub remote_id: Option<String>,
    /// The provider-side modified timestamp after the write
    pub modified_at: Option<DateTime<Utc>>,
    /// Whether credentials are invalid and the caller must re-authenticate
    /// before retrying
    pub needs_reauth: bool,
    /// The failure, when `success` is false
    pub error: Option<SerializableError>,
}

impl RemoteWriteResult {
    /// A completed write.
    pub fn completed(remote_id: impl Into<String>, modified_at: Option<DateTime<Utc>>) -> Self {
        Self {
            success: true,
            remote_id: Some(remote_id.into()),
            modified_at,
            needs_reauth: false,
            error: None,
        }
    }

    /// A write that had nothing to do (e.g. deleting an object that does
    /// not exist remotely).
    pub fn noop() -> Self {
        Self {
            success: true,
            remote_id: None,
            modified_at: None,
            needs_reauth: false,
            error: None,
        }
    }

    /// A write short-circuited because re-authentication is already pending.
    pub fn auth_required() -> Self {
        Self {
            success: false,
            remote_id: None,
            modified_at: None,
            needs_reauth: true,
            error: None,
        }
    }

    /// A failed write.
    pub fn from_error(err: InkvaultError) -> Self {
        Self {
            success: false,
            remote_id: None,
            modified_at: None,
            needs_reauth: err.is_auth(),
            error: Some(err.to_serializable()),
        }
    }
}

/// One remote object that could not be reconciled during a pull.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PullFailure {
    /// Remote object id
    pub remote_id: String,
    /// Remote object name
    pub name: String,
    /// What went wrong
    pub message: String,
}

/// Report of a full-catalog reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PullReport {
    /// Drawings materialized locally from remote content
    pub downloaded: Vec<String>,
    /// Drawings whose hash matched; only bookkeeping was refreshed
    pub refreshed: Vec<String>,
    /// Drawings whose local copy diverged and was left untouched
    pub diverged: Vec<String>,
    /// Local drawings absent remotely whose `last_sync` was cleared
    pub cleared: Vec<String>,
    /// Per-object failures; one bad object never aborts the pass
    pub failures: Vec<PullFailure>,
}

impl PullReport {
    /// Whether every remote object reconciled cleanly.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The wire shape of a drawing as uploaded to the provider.
///
/// Carries the payload plus enough record metadata to materialize a local
/// record on a device that has never seen the drawing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawingExport {
    /// Export format version
    pub version: u32,
    /// The document payload
    pub payload: Value,
    /// Embedded record metadata
    pub record: ExportedRecordMeta,
}

/// Record metadata embedded in a [`DrawingExport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedRecordMeta {
    /// Local drawing id
    pub id: String,
    /// Display name at export time
    pub name: String,
    /// Original creation time
    pub created_at: DateTime<Utc>,
    /// Thumbnail, if one was rendered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_image: Option<String>,
    /// Canvas background color
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
}

impl DrawingExport {
    /// Current export format version
    pub const CURRENT_VERSION: u32 = 1;

    /// Build the export shape for a record.
    pub fn from_record(record: &DrawingRecord) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            payload: record.payload.clone(),
            record: ExportedRecordMeta {
                id: record.id.clone(),
                name: record.name.clone(),
                created_at: record.created_at,
                preview_image: record.preview_image.clone(),
                background_color: record.background_color.clone(),
            },
        }
    }

    /// Serialize to upload bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse downloaded bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Materialize a local record from downloaded content and the remote
    /// object it came from. The remote copy is in sync with itself by
    /// definition, so `last_sync` starts at the object's modified time.
    pub fn into_record(self, local_id: &str, object: &RemoteObjectRef) -> DrawingRecord {
        DrawingRecord {
            id: local_id.to_string(),
            name: object.name.clone(),
            created_at: self.record.created_at,
            last_modified: object.modified_at,
            last_sync: Some(object.modified_at),
            content_hash: object.content_hash().map(str::to_string),
            payload: self.payload,
            preview_image: self.record.preview_image,
            background_color: self.record.background_color,
        }
    }
}
