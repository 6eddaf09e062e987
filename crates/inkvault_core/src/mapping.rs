//! Bidirectional identifier mapping between the Local and Remote namespaces.
//!
//! Every logical entity exists per-namespace with independently assigned
//! identifiers. The mapping table links the two, per entity kind, as a pair
//! of mutual-inverse maps: inserting one direction inserts the other, and
//! removing one direction removes the other.
//!
//! The table is a singleton per sync session, persisted as one store record
//! and reloaded before any reconciliation pass. Within a pass it is mutated
//! in memory and persisted once at the end.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::diff::Entity;
use crate::error::{InkvaultError, Result};
use crate::store::{KeyValueStore, MAPPINGS_KEY, get_json, set_json};

/// The two identifier namespaces entities live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum Namespace {
    /// This device's local store
    Local,
    /// The provider's object store
    Remote,
}

impl Namespace {
    /// The other namespace.
    pub fn opposite(self) -> Self {
        match self {
            Namespace::Local => Namespace::Remote,
            Namespace::Remote => Namespace::Local,
        }
    }
}

/// Kinds of entities the mapping table distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    /// A canvas document
    Drawing,
    /// A provider-side folder holding drawing objects
    Container,
}

/// Mutual-inverse id maps for one entity kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct DirectionalTable {
    local_to_remote: HashMap<String, String>,
    remote_to_local: HashMap<String, String>,
}

impl DirectionalTable {
    fn add(&mut self, local: Option<&str>, remote: Option<&str>) -> Result<()> {
        let (Some(local), Some(remote)) = (local, remote) else {
            return Err(InkvaultError::InvalidMapping(
                "both a local and a remote id are required".to_string(),
            ));
        };
        self.local_to_remote
            .insert(local.to_string(), remote.to_string());
        self.remote_to_local
            .insert(remote.to_string(), local.to_string());
        Ok(())
    }

    fn remove(&mut self, local: Option<&str>, remote: Option<&str>) {
        if let (Some(local_id), Some(remote_id)) = (local, remote)
            && self.local_to_remote.get(local_id).map(String::as_str) != Some(remote_id)
        {
            // Supplied pair disagrees with the stored mapping: stale inverse
            // entries. Resolve each side independently and drop both.
            self.remove(Some(local_id), None);
            self.remove(None, Some(remote_id));
            return;
        }

        if let Some(local_id) = local {
            if let Some(remote_id) = self.local_to_remote.remove(local_id) {
                self.remote_to_local.remove(&remote_id);
            }
        } else if let Some(remote_id) = remote {
            if let Some(local_id) = self.remote_to_local.remove(remote_id) {
                self.local_to_remote.remove(&local_id);
            }
        }
    }

    fn get(&self, source: Namespace, id: &str) -> Option<&String> {
        match source {
            Namespace::Local => self.local_to_remote.get(id),
            Namespace::Remote => self.remote_to_local.get(id),
        }
    }

    fn len(&self) -> usize {
        self.local_to_remote.len()
    }
}

/// The persisted identifier-mapping table for one sync session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentifierMapping {
    drawings: DirectionalTable,
    containers: DirectionalTable,
}

impl IdentifierMapping {
    /// Load the table from the store, or start empty if none was persisted.
    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        Ok(get_json(store, MAPPINGS_KEY)?.unwrap_or_default())
    }

    /// Persist the full table as one store record.
    pub fn persist(&self, store: &dyn KeyValueStore) -> Result<()> {
        set_json(store, MAPPINGS_KEY, self)
    }

    /// Link a local drawing id with its remote counterpart.
    /// Fails with [`InkvaultError::InvalidMapping`] unless both ids are present.
    pub fn add_drawing(&mut self, local: Option<&str>, remote: Option<&str>) -> Result<()> {
        self.drawings.add(local, remote)
    }

    /// Unlink a drawing mapping by whichever id is supplied.
    pub fn remove_drawing(&mut self, local: Option<&str>, remote: Option<&str>) {
        self.drawings.remove(local, remote);
    }

    /// Link a local container id with its remote counterpart.
    pub fn add_container(&mut self, local: Option<&str>, remote: Option<&str>) -> Result<()> {
        self.containers.add(local, remote)
    }

    /// Unlink a container mapping by whichever id is supplied.
    pub fn remove_container(&mut self, local: Option<&str>, remote: Option<&str>) {
        self.containers.remove(local, remote);
    }

    /// The remote id mapped to a local drawing id, if any.
    pub fn remote_drawing_id(&self, local: &str) -> Option<&str> {
        self.drawings.get(Namespace::Local, local).map(String::as_str)
    }

    /// The local id mapped to a remote drawing id, if any.
    pub fn local_drawing_id(&self, remote: &str) -> Option<&str> {
        self.drawings
            .get(Namespace::Remote, remote)
            .map(String::as_str)
    }

    /// Number of drawing pairs currently mapped.
    pub fn drawing_count(&self) -> usize {
        self.drawings.len()
    }

    /// Take a read-only snapshot for use during a reconciliation pass.
    pub fn snapshot(&self) -> MappingSnapshot {
        MappingSnapshot {
            drawings: self.drawings.clone(),
            containers: self.containers.clone(),
        }
    }
}

/// An immutable copy of the mapping table, used to translate entity ids
/// while the underlying table may still be collecting new pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingSnapshot {
    drawings: DirectionalTable,
    containers: DirectionalTable,
}

impl MappingSnapshot {
    fn table(&self, kind: EntityKind) -> &DirectionalTable {
        match kind {
            EntityKind::Drawing => &self.drawings,
            EntityKind::Container => &self.containers,
        }
    }

    /// Translate an entity's id into the target namespace.
    ///
    /// Identity when the entity already lives in the target namespace;
    /// otherwise a table lookup, `None` when no pair exists yet.
    pub fn map_id(&self, entity: &Entity, target: Namespace) -> Option<String> {
        if entity.namespace == target {
            return Some(entity.id.clone());
        }
        self.table(entity.kind)
            .get(entity.namespace, &entity.id)
            .cloned()
    }

    /// Translate an entity's parent id into the target namespace.
    ///
    /// Parent ids always resolve through the container table. `None` means
    /// either "no parent" or "no mapping yet"; callers distinguish the two
    /// by checking whether the source entity had a parent at all.
    pub fn map_parent_id(&self, entity: &Entity, target: Namespace) -> Option<String> {
        if entity.namespace == target {
            return entity.parent_id.clone();
        }
        entity
            .parent_id
            .as_ref()
            .and_then(|parent| self.containers.get(entity.namespace, parent))
            .cloned()
    }

    /// Symmetric "already correspond" check: true if either entity's id,
    /// mapped into the other's namespace, equals the other's id. Used to
    /// avoid creating a duplicate remote object for an entity that is
    /// already linked.
    pub fn mappable(&self, a: &Entity, b: &Entity) -> bool {
        if self.map_id(a, b.namespace).as_deref() == Some(b.id.as_str()) {
            return true;
        }
        if self.map_id(b, a.namespace).as_deref() == Some(a.id.as_str()) {
            return true;
        }
        false
    }
}
