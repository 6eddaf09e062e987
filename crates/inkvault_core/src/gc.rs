//! Garbage collection for cached image assets.
//!
//! Drawings reference binary assets (embedded images) by opaque id; the
//! assets live in their own cache and are never deleted by anything but
//! this collector. Safety under concurrent mutation comes from timestamp
//! cutoffs, not locks:
//!
//! - an unreferenced asset created *after* the scan's execution timestamp
//!   is exempt, because it may belong to a drawing saved concurrently with
//!   the pass and the used-set is already stale;
//! - activating a drawing bumps `last_retrieved` on every asset it
//!   references to a far-future date, so those assets survive any pass
//!   triggered from another execution context.
//!
//! The collector runs on a cadence of days, gated by a persisted last-run
//! timestamp that is checked opportunistically rather than by a scheduler.

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::drawing::{DrawingRecord, referenced_asset_ids};
use crate::error::Result;
use crate::store::{GC_LAST_RUN_KEY, KeyValueStore, get_json, set_json};

/// One cached binary asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Content-addressed or provider-assigned id
    pub id: String,
    /// Binary payload
    pub bytes: Vec<u8>,
    /// When the asset entered the cache
    pub created_at: DateTime<Utc>,
    /// Last time a drawing using this asset was activated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_retrieved: Option<DateTime<Utc>>,
}

/// Trait for the asset cache backend.
pub trait AssetCache: Send + Sync {
    /// List every asset id in the cache.
    fn keys(&self) -> Result<Vec<String>>;

    /// Read an asset record, if present.
    fn get(&self, id: &str) -> Result<Option<AssetRecord>>;

    /// Insert or replace an asset record.
    fn put(&self, record: AssetRecord) -> Result<()>;

    /// Delete an asset. Deleting a missing asset is a no-op.
    fn delete(&self, id: &str) -> Result<()>;

    /// Update an asset's `last_retrieved` timestamp. Missing assets are
    /// ignored.
    fn set_last_retrieved(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// In-memory asset cache for tests and development.
#[derive(Debug, Default)]
pub struct MemoryAssetCache {
    entries: std::sync::RwLock<indexmap::IndexMap<String, AssetRecord>>,
}

impl MemoryAssetCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AssetCache for MemoryAssetCache {
    fn keys(&self) -> Result<Vec<String>> {
        let entries = self.entries.read().unwrap();
        Ok(entries.keys().cloned().collect())
    }

    fn get(&self, id: &str) -> Result<Option<AssetRecord>> {
        let entries = self.entries.read().unwrap();
        Ok(entries.get(id).cloned())
    }

    fn put(&self, record: AssetRecord) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        entries.insert(record.id.clone(), record);
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        entries.shift_remove(id);
        Ok(())
    }

    fn set_last_retrieved(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        if let Some(record) = entries.get_mut(id) {
            record.last_retrieved = Some(at);
        }
        Ok(())
    }
}

/// An asset that could not be deleted.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionFailure {
    /// The asset id
    pub asset_id: String,
    /// What went wrong
    pub message: String,
}

/// Report of one collection pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionReport {
    /// Assets deleted as unreferenced
    pub deleted: Vec<String>,
    /// Unreferenced assets retained because they are newer than the scan
    pub retained_recent: Vec<String>,
    /// Per-asset failures; one failed deletion never aborts the batch
    pub failures: Vec<CollectionFailure>,
}

/// Timestamp far enough ahead that a bumped asset survives every
/// cutoff-based pass.
pub fn far_future() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2400, 1, 1, 0, 0, 0).unwrap()
}

/// Delete every cached asset that no drawing references, except assets
/// created after `execution_timestamp`.
pub fn collect(
    cache: &dyn AssetCache,
    drawings: &[DrawingRecord],
    execution_timestamp: DateTime<Utc>,
) -> Result<CollectionReport> {
    let used: HashSet<String> = drawings
        .iter()
        .flat_map(|drawing| referenced_asset_ids(&drawing.payload))
        .collect();

    log::debug!(
        "collecting assets: {} in use, cutoff {}",
        used.len(),
        execution_timestamp
    );

    let mut report = CollectionReport::default();

    for id in cache.keys()? {
        if used.contains(&id) {
            continue;
        }

        let record = match cache.get(&id) {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(err) => {
                report.failures.push(CollectionFailure {
                    asset_id: id,
                    message: err.to_string(),
                });
                continue;
            }
        };

        // Created after the scan began: may belong to a drawing saved
        // concurrently, and the used-set above is already stale.
        if record.created_at > execution_timestamp {
            report.retained_recent.push(id);
            continue;
        }

        match cache.delete(&id) {
            Ok(()) => {
                log::debug!("deleted unused asset {}", id);
                report.deleted.push(id);
            }
            Err(err) => {
                log::warn!("failed to delete asset {}: {}", id, err);
                report.failures.push(CollectionFailure {
                    asset_id: id,
                    message: err.to_string(),
                });
            }
        }
    }

    Ok(report)
}

/// Mark every asset a drawing references as recently retrieved, so a
/// concurrent collection pass from another context cannot take them.
pub fn bump_assets_for_activation(cache: &dyn AssetCache, drawing: &DrawingRecord) -> Result<()> {
    let bump = far_future();
    for id in referenced_asset_ids(&drawing.payload) {
        cache.set_last_retrieved(&id, bump)?;
    }
    Ok(())
}

/// Whether enough days have passed since the last collection run.
pub fn should_run(
    store: &dyn KeyValueStore,
    now: DateTime<Utc>,
    interval_days: i64,
) -> Result<bool> {
    let last_run: Option<DateTime<Utc>> = get_json(store, GC_LAST_RUN_KEY)?;
    Ok(match last_run {
        None => true,
        Some(last) => now - last > chrono::Duration::days(interval_days),
    })
}

/// Record `now` as the last collection run.
pub fn mark_run(store: &dyn KeyValueStore, now: DateTime<Utc>) -> Result<()> {
    set_json(store, GC_LAST_RUN_KEY, &now)
}

/// Run a collection pass if one is due, marking the run first so two
/// near-simultaneous triggers do not both scan.
pub fn maybe_collect(
    store: &dyn KeyValueStore,
    cache: &dyn AssetCache,
    drawings: &[DrawingRecord],
    now: DateTime<Utc>,
    interval_days: i64,
) -> Result<Option<CollectionReport>> {
    if !should_run(store, now, interval_days)? {
        return Ok(None);
    }
    mark_run(store, now)?;
    Ok(Some(collect(cache, drawings, now)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drawing::HostSnapshot;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
    }

    fn drawing_using(asset_ids: &[&str]) -> DrawingRecord {
        let elements: Vec<serde_json::Value> = asset_ids
            .iter()
            .map(|id| json!({"id": format!("e-{}", id), "type": "image", "fileId": id}))
            .collect();
        DrawingRecord::new(
            "sketch",
            HostSnapshot {
                payload: json!({"elements": elements}),
                background_color: None,
                preview_image: None,
            },
            at(1),
        )
    }

    fn asset(id: &str, created_at: DateTime<Utc>) -> AssetRecord {
        AssetRecord {
            id: id.to_string(),
            bytes: vec![1, 2, 3],
            created_at,
            last_retrieved: None,
        }
    }

    #[test]
    fn test_collect_deletes_only_unreferenced_old_assets() {
        let cache = MemoryAssetCache::new();
        cache.put(asset("a1", at(1))).unwrap();
        cache.put(asset("a2", at(1))).unwrap();
        cache.put(asset("a3", at(1))).unwrap();
        let drawings = vec![drawing_using(&["a1", "a2"])];

        let report = collect(&cache, &drawings, at(5)).unwrap();

        assert_eq!(report.deleted, vec!["a3".to_string()]);
        assert!(cache.get("a1").unwrap().is_some());
        assert!(cache.get("a2").unwrap().is_some());
        assert!(cache.get("a3").unwrap().is_none());
    }

    #[test]
    fn test_collect_spares_assets_created_after_the_scan() {
        let cache = MemoryAssetCache::new();
        cache.put(asset("a3", at(10))).unwrap();
        let drawings = vec![drawing_using(&["a1"])];

        let report = collect(&cache, &drawings, at(5)).unwrap();

        assert!(report.deleted.is_empty());
        assert_eq!(report.retained_recent, vec!["a3".to_string()]);
        assert!(cache.get("a3").unwrap().is_some());
    }

    #[test]
    fn test_activation_bump_marks_referenced_assets() {
        let cache = MemoryAssetCache::new();
        cache.put(asset("a1", at(1))).unwrap();
        cache.put(asset("a2", at(1))).unwrap();
        let drawing = drawing_using(&["a1"]);

        bump_assets_for_activation(&cache, &drawing).unwrap();

        assert_eq!(
            cache.get("a1").unwrap().unwrap().last_retrieved,
            Some(far_future())
        );
        assert_eq!(cache.get("a2").unwrap().unwrap().last_retrieved, None);
    }

    #[test]
    fn test_cadence_gating() {
        let store = MemoryStore::new();

        // Never ran: due immediately.
        assert!(should_run(&store, at(1), 3).unwrap());
        mark_run(&store, at(1)).unwrap();

        // Two days later: not due with a three-day interval.
        assert!(!should_run(&store, at(3), 3).unwrap());
        // Five days later: due.
        assert!(should_run(&store, at(6), 3).unwrap());
    }

    #[test]
    fn test_maybe_collect_runs_once_per_interval() {
        let store = MemoryStore::new();
        let cache = MemoryAssetCache::new();
        cache.put(asset("a1", at(1))).unwrap();
        let drawings: Vec<DrawingRecord> = Vec::new();

        let first = maybe_collect(&store, &cache, &drawings, at(2), 3).unwrap();
        assert_eq!(first.unwrap().deleted, vec!["a1".to_string()]);

        let second = maybe_collect(&store, &cache, &drawings, at(3), 3).unwrap();
        assert!(second.is_none());
    }
}
