//! Host mutation-event handlers.
//!
//! The external editor observer fires an event whenever it detects the host
//! document changed; this layer is what those events land on. Each handler
//! follows the same shape: detect whether anything meaningful changed,
//! write the local record first, then dispatch the remote call and apply
//! its result as a best-effort follow-up. A provider failure never rolls
//! back local state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use ts_rs::TS;

use crate::change;
use crate::config::Config;
use crate::drawing::{
    DrawingRecord, HostSnapshot, all_drawings, delete_drawing, load_drawing, save_drawing,
};
use crate::error::{InkvaultError, Result};
use crate::gc::{self, AssetCache, CollectionReport};
use crate::hash;
use crate::mapping::IdentifierMapping;
use crate::provider::RemoteProvider;
use crate::sync::{PullReport, RemoteWriteResult, SyncCoordinator};
use crate::store::KeyValueStore;

/// Outcome of handling a content-change event.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ChangeOutcome {
    /// Whether the snapshot differed meaningfully from the stored payload
    pub changed: bool,
    /// The record as stored after handling the event
    pub record: DrawingRecord,
    /// Result of the remote dispatch, when one was made
    pub remote: Option<RemoteWriteResult>,
}

/// Entry point for host events, owning the coordinator and config.
pub struct SyncService<P: RemoteProvider> {
    coordinator: SyncCoordinator<P>,
    config: Config,
}

impl<P: RemoteProvider> SyncService<P> {
    /// Create a service for a provider with the given configuration.
    pub fn new(provider: P, config: Config) -> Self {
        let coordinator = SyncCoordinator::new(provider, config.container_name.clone());
        Self {
            coordinator,
            config,
        }
    }

    /// Access the coordinator (e.g. to read the re-authentication latch).
    pub fn coordinator(&self) -> &SyncCoordinator<P> {
        &self.coordinator
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A new drawing was saved in the host editor. Mints an id, stores the
    /// record, and returns it. Upload happens on the first change event or
    /// the next reconciliation, not here.
    pub fn drawing_saved(
        &self,
        store: &dyn KeyValueStore,
        name: &str,
        snapshot: HostSnapshot,
        now: DateTime<Utc>,
    ) -> Result<DrawingRecord> {
        let record = DrawingRecord::new(name, snapshot, now);
        save_drawing(store, &record)?;
        log::info!("saved new drawing '{}' as {}", record.name, record.id);
        Ok(record)
    }

    /// The host document changed. Runs change detection against the stored
    /// payload; only a meaningful difference advances `last_modified` and
    /// triggers an upload.
    pub async fn drawing_changed(
        &self,
        store: &dyn KeyValueStore,
        id: &str,
        snapshot: HostSnapshot,
        now: DateTime<Utc>,
    ) -> Result<ChangeOutcome> {
        let Some(mut record) = load_drawing(store, id)? else {
            log::error!("no drawing found with id {}", id);
            return Err(InkvaultError::NotFound(id.to_string()));
        };

        let changed = change::has_changed(&record.payload, &snapshot.payload);
        if changed {
            record.payload = snapshot.payload;
            record.content_hash = Some(hash::hash_payload(&record.payload));
            record.last_modified = now;
            if snapshot.background_color.is_some() {
                record.background_color = snapshot.background_color;
            }
            if snapshot.preview_image.is_some() {
                record.preview_image = snapshot.preview_image;
            }
            save_drawing(store, &record)?;
            log::debug!("drawing {} changed, record updated", id);
        } else {
            log::debug!("no meaningful change in drawing {}", id);
        }

        let remote = if changed && self.config.upload_on_change {
            let mut mappings = IdentifierMapping::load(store)?;
            let result = self.coordinator.upsert_remote(store, &mut mappings, &record).await;
            if result.success {
                mappings.persist(store)?;
            }
            Some(result)
        } else {
            None
        };

        // The coordinator may have patched last_sync; return what is stored.
        let record = load_drawing(store, id)?.unwrap_or(record);
        Ok(ChangeOutcome {
            changed,
            record,
            remote,
        })
    }

    /// The drawing was renamed in the host. The local name always wins;
    /// the rename is pushed remotely as an independent metadata operation.
    pub async fn drawing_renamed(
        &self,
        store: &dyn KeyValueStore,
        id: &str,
        new_name: &str,
    ) -> Result<Option<RemoteWriteResult>> {
        let Some(mut record) = load_drawing(store, id)? else {
            log::error!("no drawing found with id {}", id);
            return Err(InkvaultError::NotFound(id.to_string()));
        };

        record.name = new_name.to_string();
        save_drawing(store, &record)?;

        if !self.config.upload_on_change {
            return Ok(None);
        }
        Ok(Some(self.coordinator.rename_remote(id, new_name).await))
    }

    /// The drawing was deleted in the host. Removes the local record, then
    /// trashes the remote object (soft delete) and drops the mapping.
    pub async fn drawing_deleted(
        &self,
        store: &dyn KeyValueStore,
        id: &str,
    ) -> Result<Option<RemoteWriteResult>> {
        delete_drawing(store, id)?;
        log::info!("deleted drawing {}", id);

        if !self.config.upload_on_change {
            return Ok(None);
        }
        let mut mappings = IdentifierMapping::load(store)?;
        let result = self.coordinator.delete_remote(&mut mappings, id).await;
        if result.success {
            mappings.persist(store)?;
        }
        Ok(Some(result))
    }

    /// The drawing became the one currently open. Bumps `last_retrieved`
    /// on every asset it references so no concurrent collection pass can
    /// take them.
    pub fn drawing_activated(
        &self,
        store: &dyn KeyValueStore,
        cache: &dyn AssetCache,
        id: &str,
    ) -> Result<()> {
        let Some(record) = load_drawing(store, id)? else {
            return Err(InkvaultError::NotFound(id.to_string()));
        };
        gc::bump_assets_for_activation(cache, &record)
    }

    /// The user (re)authenticated. Verifies the connection, invalidates the
    /// container cache, and reconciles the full remote catalog.
    pub async fn login(&self, store: &dyn KeyValueStore) -> Result<PullReport> {
        let identity = self.coordinator.authenticate().await?;
        log::info!("authenticated with {} as {}", self.coordinator.provider().name(), identity.id);

        // Force a fresh container lookup in case the account changed.
        self.coordinator.invalidate_container_cache(store)?;

        let mut mappings = IdentifierMapping::load(store)?;
        self.coordinator.pull_all(store, &mut mappings).await
    }

    /// The user logged out. Clears `last_sync` on every drawing so all of
    /// them count as pending upload on the next login, and drops the
    /// container cache.
    pub async fn logout(&self, store: &dyn KeyValueStore) -> Result<()> {
        log::info!("logging out, clearing sync bookkeeping");
        for mut record in all_drawings(store)? {
            if record.last_sync.is_some() {
                record.last_sync = None;
                save_drawing(store, &record)?;
            }
        }
        self.coordinator.invalidate_container_cache(store)
    }

    /// Periodic trigger for asset collection. Runs a pass only when the
    /// configured interval has elapsed since the last one.
    pub fn run_collection(
        &self,
        store: &dyn KeyValueStore,
        cache: &dyn AssetCache,
        execution_timestamp: DateTime<Utc>,
    ) -> Result<Option<CollectionReport>> {
        let drawings = all_drawings(store)?;
        gc::maybe_collect(
            store,
            cache,
            &drawings,
            execution_timestamp,
            self.config.asset_cleanup_interval_days,
        )
    }
}
