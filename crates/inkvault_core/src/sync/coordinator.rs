//! Provider-facing sync coordinator.
//!
//! Drives the remote protocol for a single account: locate-or-create the
//! container, upsert remote objects for local records, full-catalog
//! reconciliation on (re)authentication, soft deletes.
//!
//! Persisted state (container-id cache, mapping table) is passed into each
//! operation through the store rather than held as ambient singletons.
//! Remote objects are always resolved through the `{localId, hash}`
//! metadata pair - never by name, since names are not unique and may
//! legitimately differ while a rename is pending.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;

use super::{DrawingExport, PullFailure, PullReport, RemoteWriteResult};
use crate::drawing::{DrawingRecord, all_drawings, load_drawing, save_drawing};
use crate::error::{InkvaultError, Result};
use crate::mapping::IdentifierMapping;
use crate::provider::{
    METADATA_HASH, METADATA_LOCAL_ID, ProviderIdentity, RemoteObjectRef, RemoteProvider,
};
use crate::store::{CONTAINER_ID_KEY, KeyValueStore};

/// Pseudo-id of the local root container. Drawings have no local folder
/// hierarchy; this single id is mapped to the remote container so parent-id
/// resolution is total.
pub const LOCAL_CONTAINER_ID: &str = "container:root";

/// The sync coordinator owns the provider connection and drives all remote
/// operations for one account.
pub struct SyncCoordinator<P: RemoteProvider> {
    provider: P,
    container_name: String,
    needs_reauth: AtomicBool,
}

impl<P: RemoteProvider> SyncCoordinator<P> {
    /// Create a coordinator for a provider and container name.
    pub fn new(provider: P, container_name: impl Into<String>) -> Self {
        Self {
            provider,
            container_name: container_name.into(),
            needs_reauth: AtomicBool::new(false),
        }
    }

    /// Access the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Whether an authentication failure is pending. Latched on the first
    /// auth error and checked before further remote writes, so repeated
    /// failures surface a single re-authentication prompt instead of one
    /// per operation.
    pub fn needs_reauth(&self) -> bool {
        self.needs_reauth.load(Ordering::SeqCst)
    }

    /// Clear the re-authentication latch after the caller has obtained
    /// fresh credentials.
    pub fn clear_reauth(&self) {
        self.needs_reauth.store(false, Ordering::SeqCst);
    }

    fn note_failure(&self, err: &InkvaultError) {
        if err.is_auth() {
            self.needs_reauth.store(true, Ordering::SeqCst);
        }
    }

    /// Verify the provider connection and report the authenticated account.
    /// Success clears the re-authentication latch.
    pub async fn authenticate(&self) -> Result<ProviderIdentity> {
        match self.provider.get_authenticated_identity().await {
            Ok(identity) => {
                self.clear_reauth();
                Ok(identity)
            }
            Err(err) => {
                self.note_failure(&err);
                Err(err)
            }
        }
    }

    /// Look up or create the remote container, caching its id locally so
    /// subsequent syncs skip the lookup round-trip.
    pub async fn ensure_container(&self, store: &dyn KeyValueStore) -> Result<String> {
        if let Some(cached) = store.get(CONTAINER_ID_KEY)? {
            log::debug!("using cached container id {}", cached);
            return Ok(cached);
        }

        log::debug!("container id not cached, resolving '{}'", self.container_name);
        let id = self.provider.ensure_container(&self.container_name).await?;
        store.set(CONTAINER_ID_KEY, &id)?;
        Ok(id)
    }

    /// Drop the cached container id, forcing a fresh lookup on the next
    /// sync. Done on login in case the account changed underneath us.
    pub fn invalidate_container_cache(&self, store: &dyn KeyValueStore) -> Result<()> {
        store.remove(CONTAINER_ID_KEY)
    }

    /// Create or update the remote object for a record.
    ///
    /// Resolution is by `localId` metadata; when the stored remote name
    /// disagrees with the current local name the object is renamed before
    /// the content upload (rename is a cheap metadata operation and must
    /// not be held hostage by a failing upload). On success the local
    /// record's `last_sync` is patched to the provider's modified time.
    pub async fn upsert_remote(
        &self,
        store: &dyn KeyValueStore,
        mappings: &mut IdentifierMapping,
        record: &DrawingRecord,
    ) -> RemoteWriteResult {
        if self.needs_reauth() {
            return RemoteWriteResult::auth_required();
        }
        match self.try_upsert(store, mappings, record).await {
            Ok(result) => result,
            Err(err) => {
                self.note_failure(&err);
                log::error!("failed to upsert '{}' remotely: {}", record.id, err);
                RemoteWriteResult::from_error(err)
            }
        }
    }

    async fn try_upsert(
        &self,
        store: &dyn KeyValueStore,
        mappings: &mut IdentifierMapping,
        record: &DrawingRecord,
    ) -> Result<RemoteWriteResult> {
        let container_id = self.ensure_container(store).await?;
        let existing = self.provider.find_by_local_id(&record.id).await?;

        let object_id = match existing.first() {
            Some(object) => {
                if object.name != record.name {
                    log::info!(
                        "remote name '{}' differs from local '{}', renaming",
                        object.name,
                        record.name
                    );
                    self.provider.rename_object(&object.id, &record.name).await?;
                }
                object.id.clone()
            }
            None => {
                let created = self
                    .provider
                    .create_object(&record.name, &container_id, &object_metadata(record))
                    .await?;
                log::info!("created remote object {} for '{}'", created.id, record.id);
                created.id
            }
        };

        let bytes = DrawingExport::from_record(record).to_bytes()?;
        let updated = self
            .provider
            .upload_content(&object_id, &bytes, &object_metadata(record))
            .await?;

        mappings.add_drawing(Some(&record.id), Some(&object_id))?;
        mappings.add_container(Some(LOCAL_CONTAINER_ID), Some(&container_id))?;

        // The record was written before this network call; apply the sync
        // timestamp as a follow-up patch to whatever is stored now.
        if let Some(mut current) = load_drawing(store, &record.id)? {
            current.last_sync = Some(updated.modified_at);
            current.last_modified = updated.modified_at;
            save_drawing(store, &current)?;
        }

        Ok(RemoteWriteResult::completed(
            object_id,
            Some(updated.modified_at),
        ))
    }

    /// Rename the remote object for a record. A missing remote object is a
    /// failed precondition, not a silent success.
    pub async fn rename_remote(&self, record_id: &str, new_name: &str) -> RemoteWriteResult {
        if self.needs_reauth() {
            return RemoteWriteResult::auth_required();
        }
        match self.try_rename(record_id, new_name).await {
            Ok(result) => result,
            Err(err) => {
                self.note_failure(&err);
                log::error!("failed to rename '{}' remotely: {}", record_id, err);
                RemoteWriteResult::from_error(err)
            }
        }
    }

    async fn try_rename(&self, record_id: &str, new_name: &str) -> Result<RemoteWriteResult> {
        let existing = self.provider.find_by_local_id(record_id).await?;
        let Some(object) = existing.first() else {
            return Err(InkvaultError::NotFound(record_id.to_string()));
        };
        self.provider.rename_object(&object.id, new_name).await?;
        Ok(RemoteWriteResult::completed(object.id.clone(), None))
    }

    /// Trash the remote object for a record and drop its mapping. Nothing
    /// remote is a no-op, not an error, so deletes are idempotent.
    pub async fn delete_remote(
        &self,
        mappings: &mut IdentifierMapping,
        record_id: &str,
    ) -> RemoteWriteResult {
        if self.needs_reauth() {
            return RemoteWriteResult::auth_required();
        }
        match self.try_delete(mappings, record_id).await {
            Ok(result) => result,
            Err(err) => {
                self.note_failure(&err);
                log::error!("failed to trash '{}' remotely: {}", record_id, err);
                RemoteWriteResult::from_error(err)
            }
        }
    }

    async fn try_delete(
        &self,
        mappings: &mut IdentifierMapping,
        record_id: &str,
    ) -> Result<RemoteWriteResult> {
        let existing = self.provider.find_by_local_id(record_id).await?;
        let Some(object) = existing.first() else {
            log::debug!("no remote object for '{}', nothing to trash", record_id);
            mappings.remove_drawing(Some(record_id), None);
            return Ok(RemoteWriteResult::noop());
        };
        self.provider.trash_object(&object.id).await?;
        mappings.remove_drawing(Some(record_id), Some(&object.id));
        log::info!("trashed remote object {} for '{}'", object.id, record_id);
        Ok(RemoteWriteResult::completed(object.id.clone(), None))
    }

    /// Reconcile the full remote catalog against local records.
    ///
    /// Pages through every object in the container. Objects unknown locally
    /// are downloaded and materialized; objects whose metadata hash matches
    /// the local record get a bookkeeping-only refresh with no content
    /// download; diverged objects are left alone (the local store is the
    /// source of truth until the next push). Afterwards, any local record
    /// the provider no longer has loses its `last_sync` so it counts as
    /// pending upload rather than silently synced.
    ///
    /// The mapping table is mutated in memory throughout and persisted once
    /// at the end of the pass. The pass is idempotent; re-running after an
    /// abandoned attempt is always safe.
    pub async fn pull_all(
        &self,
        store: &dyn KeyValueStore,
        mappings: &mut IdentifierMapping,
    ) -> Result<PullReport> {
        let container_id = match self.ensure_container(store).await {
            Ok(id) => id,
            Err(err) => {
                self.note_failure(&err);
                return Err(err);
            }
        };

        let mut report = PullReport::default();
        let mut seen_local_ids: HashSet<String> = HashSet::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = match self
                .provider
                .list_objects(&container_id, page_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    self.note_failure(&err);
                    return Err(err);
                }
            };

            for object in &page.objects {
                // Objects without our metadata were not written by this
                // core and do not belong to the catalog.
                let Some(local_id) = object.local_id().map(str::to_string) else {
                    continue;
                };
                seen_local_ids.insert(local_id.clone());

                if let Err(err) = self
                    .reconcile_object(store, mappings, object, &local_id, &mut report)
                    .await
                {
                    log::error!(
                        "failed to reconcile remote object {} ('{}'): {}",
                        object.id,
                        object.name,
                        err
                    );
                    report.failures.push(PullFailure {
                        remote_id: object.id.clone(),
                        name: object.name.clone(),
                        message: err.to_string(),
                    });
                }
            }

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        for mut record in all_drawings(store)? {
            if !seen_local_ids.contains(&record.id) && record.last_sync.is_some() {
                log::debug!("'{}' not in remote catalog, clearing last_sync", record.id);
                record.last_sync = None;
                save_drawing(store, &record)?;
                report.cleared.push(record.id);
            }
        }

        mappings.add_container(Some(LOCAL_CONTAINER_ID), Some(&container_id))?;
        mappings.persist(store)?;

        log::info!(
            "pull complete: {} downloaded, {} refreshed, {} diverged, {} cleared, {} failed",
            report.downloaded.len(),
            report.refreshed.len(),
            report.diverged.len(),
            report.cleared.len(),
            report.failures.len()
        );

        Ok(report)
    }

    async fn reconcile_object(
        &self,
        store: &dyn KeyValueStore,
        mappings: &mut IdentifierMapping,
        object: &RemoteObjectRef,
        local_id: &str,
        report: &mut PullReport,
    ) -> Result<()> {
        match load_drawing(store, local_id)? {
            None => {
                log::debug!("no local record for {}, downloading", object.id);
                let bytes = self.provider.download_content(&object.id).await?;
                let record = DrawingExport::from_bytes(&bytes)?.into_record(local_id, object);
                save_drawing(store, &record)?;
                mappings.add_drawing(Some(local_id), Some(&object.id))?;
                report.downloaded.push(local_id.to_string());
            }
            Some(mut record) => {
                let remote_hash = object.content_hash();
                if remote_hash.is_some() && record.content_hash.as_deref() == remote_hash {
                    // Content identical by hash: refresh bookkeeping only,
                    // never re-download.
                    record.last_sync = Some(object.modified_at);
                    record.last_modified = object.modified_at;
                    save_drawing(store, &record)?;
                    mappings.add_drawing(Some(local_id), Some(&object.id))?;
                    report.refreshed.push(local_id.to_string());
                } else {
                    // Local copy diverged; it stays authoritative until the
                    // next local change pushes it.
                    mappings.add_drawing(Some(local_id), Some(&object.id))?;
                    report.diverged.push(local_id.to_string());
                }
            }
        }
        Ok(())
    }
}

fn object_metadata(record: &DrawingRecord) -> IndexMap<String, String> {
    IndexMap::from([
        (METADATA_LOCAL_ID.to_string(), record.id.clone()),
        (
            METADATA_HASH.to_string(),
            record.content_hash.clone().unwrap_or_default(),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drawing::HostSnapshot;
    use crate::provider::MemoryRemote;
    use crate::store::MemoryStore;
    use crate::sync::SyncStatus;
    use chrono::{TimeZone, Utc};
    use futures_lite::future::block_on;
    use serde_json::json;

    fn record(name: &str) -> DrawingRecord {
        DrawingRecord::new(
            name,
            HostSnapshot {
                payload: json!({"elements": [{"id": "e1", "type": "rectangle"}]}),
                background_color: None,
                preview_image: None,
            },
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        )
    }

    fn coordinator() -> SyncCoordinator<MemoryRemote> {
        SyncCoordinator::new(MemoryRemote::new(), "inkvault")
    }

    #[test]
    fn test_ensure_container_caches_the_id() {
        let store = MemoryStore::new();
        let coordinator = coordinator();

        let first = block_on(coordinator.ensure_container(&store)).unwrap();
        assert_eq!(store.get(CONTAINER_ID_KEY).unwrap(), Some(first.clone()));

        // Second call is served from the cache even if the provider is down.
        coordinator.provider().fail_requests(true);
        let second = block_on(coordinator.ensure_container(&store)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_upsert_twice_creates_one_object() {
        let store = MemoryStore::new();
        let coordinator = coordinator();
        let mut mappings = IdentifierMapping::default();
        let record = record("sketch");
        save_drawing(&store, &record).unwrap();

        let first = block_on(coordinator.upsert_remote(&store, &mut mappings, &record));
        let second = block_on(coordinator.upsert_remote(&store, &mut mappings, &record));

        assert!(first.success);
        assert!(second.success);
        assert_eq!(first.remote_id, second.remote_id);
        assert_eq!(coordinator.provider().object_count(), 1);
        assert_eq!(
            mappings.remote_drawing_id(&record.id),
            first.remote_id.as_deref()
        );
    }

    #[test]
    fn test_upsert_patches_last_sync_on_the_stored_record() {
        let store = MemoryStore::new();
        let coordinator = coordinator();
        let mut mappings = IdentifierMapping::default();
        let record = record("sketch");
        save_drawing(&store, &record).unwrap();

        let result = block_on(coordinator.upsert_remote(&store, &mut mappings, &record));

        let stored = load_drawing(&store, &record.id).unwrap().unwrap();
        assert_eq!(stored.last_sync, result.modified_at);
        assert_eq!(stored.sync_status(), SyncStatus::Synced);
    }

    #[test]
    fn test_upsert_renames_stale_remote_object() {
        let store = MemoryStore::new();
        let coordinator = coordinator();
        let mut mappings = IdentifierMapping::default();
        let mut record = record("first name");
        save_drawing(&store, &record).unwrap();

        block_on(coordinator.upsert_remote(&store, &mut mappings, &record));

        record.name = "second name".to_string();
        save_drawing(&store, &record).unwrap();
        block_on(coordinator.upsert_remote(&store, &mut mappings, &record));

        assert_eq!(
            coordinator.provider().object_names(),
            vec!["second name".to_string()]
        );
        assert_eq!(coordinator.provider().object_count(), 1);
    }

    #[test]
    fn test_upsert_failure_is_a_value_and_local_state_survives() {
        let store = MemoryStore::new();
        let coordinator = coordinator();
        let mut mappings = IdentifierMapping::default();
        let record = record("sketch");
        save_drawing(&store, &record).unwrap();

        coordinator.provider().fail_requests(true);
        let result = block_on(coordinator.upsert_remote(&store, &mut mappings, &record));

        assert!(!result.success);
        assert!(!result.needs_reauth);
        assert_eq!(result.error.as_ref().unwrap().kind, "ProviderRequest");
        // The local record is untouched by the remote failure.
        let stored = load_drawing(&store, &record.id).unwrap().unwrap();
        assert_eq!(stored.sync_status(), SyncStatus::Unsynced);
    }

    #[test]
    fn test_auth_failure_latches_and_short_circuits() {
        let store = MemoryStore::new();
        let coordinator = coordinator();
        let mut mappings = IdentifierMapping::default();
        let record = record("sketch");
        save_drawing(&store, &record).unwrap();

        coordinator.provider().fail_auth(true);
        let first = block_on(coordinator.upsert_remote(&store, &mut mappings, &record));
        assert!(first.needs_reauth);
        assert!(coordinator.needs_reauth());

        // Provider recovers, but the latch still short-circuits until the
        // caller re-authenticates.
        coordinator.provider().fail_auth(false);
        let second = block_on(coordinator.upsert_remote(&store, &mut mappings, &record));
        assert!(!second.success);
        assert!(second.needs_reauth);

        block_on(coordinator.authenticate()).unwrap();
        assert!(!coordinator.needs_reauth());
        let third = block_on(coordinator.upsert_remote(&store, &mut mappings, &record));
        assert!(third.success);
    }

    #[test]
    fn test_delete_remote_is_soft_and_idempotent() {
        let store = MemoryStore::new();
        let coordinator = coordinator();
        let mut mappings = IdentifierMapping::default();
        let record = record("sketch");
        save_drawing(&store, &record).unwrap();

        block_on(coordinator.upsert_remote(&store, &mut mappings, &record));
        assert_eq!(mappings.drawing_count(), 1);

        let first = block_on(coordinator.delete_remote(&mut mappings, &record.id));
        assert!(first.success);
        assert_eq!(coordinator.provider().object_count(), 0);
        assert_eq!(coordinator.provider().trashed_count(), 1);
        assert_eq!(mappings.drawing_count(), 0);

        let second = block_on(coordinator.delete_remote(&mut mappings, &record.id));
        assert!(second.success);
        assert!(second.remote_id.is_none());
    }

    #[test]
    fn test_rename_remote_requires_an_object() {
        let coordinator = coordinator();

        let result = block_on(coordinator.rename_remote("drawing:missing", "new name"));

        assert!(!result.success);
        assert_eq!(result.error.as_ref().unwrap().kind, "NotFound");
    }

    #[test]
    fn test_pull_all_paginates_and_materializes() {
        let store = MemoryStore::new();
        let remote = MemoryRemote::new().with_page_size(2);
        let coordinator = SyncCoordinator::new(remote, "inkvault");
        let mut mappings = IdentifierMapping::default();

        // Seed the remote side as if another device had pushed five drawings.
        let container = block_on(coordinator.provider().ensure_container("inkvault")).unwrap();
        for idx in 0..5 {
            let record = record(&format!("sketch-{}", idx));
            let bytes = DrawingExport::from_record(&record).to_bytes().unwrap();
            coordinator.provider().seed_object(
                &container,
                &record.name,
                object_metadata(&record),
                &bytes,
            );
        }

        let report = block_on(coordinator.pull_all(&store, &mut mappings)).unwrap();

        assert_eq!(report.downloaded.len(), 5);
        assert!(report.is_clean());
        assert_eq!(all_drawings(&store).unwrap().len(), 5);
        assert_eq!(mappings.drawing_count(), 5);
        // The table was persisted at the end of the pass.
        let reloaded = IdentifierMapping::load(&store).unwrap();
        assert_eq!(reloaded.drawing_count(), 5);
    }

    #[test]
    fn test_pull_all_hash_match_skips_download() {
        let store = MemoryStore::new();
        let coordinator = coordinator();
        let mut mappings = IdentifierMapping::default();
        let record = record("sketch");
        save_drawing(&store, &record).unwrap();

        let container = block_on(coordinator.provider().ensure_container("inkvault")).unwrap();
        let bytes = DrawingExport::from_record(&record).to_bytes().unwrap();
        coordinator.provider().seed_object(
            &container,
            &record.name,
            object_metadata(&record),
            &bytes,
        );
        let downloads_before = coordinator.provider().download_calls();

        let report = block_on(coordinator.pull_all(&store, &mut mappings)).unwrap();

        assert_eq!(report.refreshed, vec![record.id.clone()]);
        assert!(report.downloaded.is_empty());
        assert_eq!(coordinator.provider().download_calls(), downloads_before);

        let stored = load_drawing(&store, &record.id).unwrap().unwrap();
        assert!(stored.last_sync.is_some());
        assert_eq!(stored.sync_status(), SyncStatus::Synced);
    }

    #[test]
    fn test_pull_all_leaves_diverged_records_untouched() {
        let store = MemoryStore::new();
        let coordinator = coordinator();
        let mut mappings = IdentifierMapping::default();
        let mut record = record("sketch");
        record.content_hash = Some("locally-different".to_string());
        save_drawing(&store, &record).unwrap();

        let container = block_on(coordinator.provider().ensure_container("inkvault")).unwrap();
        let bytes = DrawingExport::from_record(&record).to_bytes().unwrap();
        let mut metadata = object_metadata(&record);
        metadata.insert(METADATA_HASH.to_string(), "remote-hash".to_string());
        coordinator
            .provider()
            .seed_object(&container, &record.name, metadata, &bytes);

        let report = block_on(coordinator.pull_all(&store, &mut mappings)).unwrap();

        assert_eq!(report.diverged, vec![record.id.clone()]);
        let stored = load_drawing(&store, &record.id).unwrap().unwrap();
        assert_eq!(stored.content_hash.as_deref(), Some("locally-different"));
        assert!(stored.last_sync.is_none());
    }

    #[test]
    fn test_pull_all_clears_last_sync_of_local_only_records() {
        let store = MemoryStore::new();
        let coordinator = coordinator();
        let mut mappings = IdentifierMapping::default();
        let mut record = record("sketch");
        record.last_sync = Some(record.last_modified);
        save_drawing(&store, &record).unwrap();

        let report = block_on(coordinator.pull_all(&store, &mut mappings)).unwrap();

        assert_eq!(report.cleared, vec![record.id.clone()]);
        let stored = load_drawing(&store, &record.id).unwrap().unwrap();
        assert!(stored.last_sync.is_none());
        assert_eq!(stored.sync_status(), SyncStatus::Unsynced);
    }

    #[test]
    fn test_pull_all_isolates_per_object_failures() {
        let store = MemoryStore::new();
        let coordinator = coordinator();
        let mut mappings = IdentifierMapping::default();

        let container = block_on(coordinator.provider().ensure_container("inkvault")).unwrap();
        // One object with unparseable content, one good object.
        coordinator.provider().seed_object(
            &container,
            "broken",
            IndexMap::from([(METADATA_LOCAL_ID.to_string(), "drawing:broken".to_string())]),
            b"not json",
        );
        let good = record("good");
        let bytes = DrawingExport::from_record(&good).to_bytes().unwrap();
        coordinator
            .provider()
            .seed_object(&container, &good.name, object_metadata(&good), &bytes);

        let report = block_on(coordinator.pull_all(&store, &mut mappings)).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "broken");
        assert_eq!(report.downloaded, vec![good.id.clone()]);
    }
}
