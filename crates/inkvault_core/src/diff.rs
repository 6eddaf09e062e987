//! Typed mutation batches replayed between namespaces during reconciliation.
//!
//! A [`ReconciliationDiff`] holds Create/Update/Move/Remove mutations
//! partitioned by kind, each preserving insertion order. Replay enumerates
//! updates and creates before moves and removes, so nothing is moved into
//! state that does not exist yet and nothing is deleted out from under a
//! pending move.
//!
//! [`ReconciliationDiff::retarget`] re-expresses a whole batch in the other
//! namespace by resolving every identifier through the mapping table, and
//! [`find_chain`] guards moves against containment loops.

use serde::{Deserialize, Serialize};

use crate::error::{InkvaultError, Result};
use crate::mapping::{EntityKind, MappingSnapshot, Namespace};

/// One entity as seen by the diff machinery, tagged with the namespace its
/// identifiers belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// What kind of entity this is
    pub kind: EntityKind,
    /// Which namespace the identifiers below are valid in
    pub namespace: Namespace,
    /// Identifier in `namespace`
    pub id: String,
    /// Identifier of the containing entity, if any
    pub parent_id: Option<String>,
    /// Display name
    pub name: String,
}

impl Entity {
    /// Build a drawing entity.
    pub fn drawing(
        namespace: Namespace,
        id: impl Into<String>,
        parent_id: Option<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: EntityKind::Drawing,
            namespace,
            id: id.into(),
            parent_id,
            name: name.into(),
        }
    }

    /// Build a container entity.
    pub fn container(
        namespace: Namespace,
        id: impl Into<String>,
        parent_id: Option<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: EntityKind::Container,
            namespace,
            id: id.into(),
            parent_id,
            name: name.into(),
        }
    }

    /// Clone this entity with its namespace tag switched. Identifiers are
    /// copied as-is; the caller is responsible for resolving them.
    pub fn with_namespace(&self, namespace: Namespace) -> Self {
        Self {
            namespace,
            ..self.clone()
        }
    }
}

/// The kind of a mutation, used for partitioning and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    /// An entity came into existence
    Create,
    /// An entity's content changed in place
    Update,
    /// An entity changed parents
    Move,
    /// An entity was removed
    Remove,
}

/// One typed mutation over an entity.
///
/// The optional prior snapshot recovers identifiers the mutation itself
/// destroyed, such as a move's previous parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Bring an entity into existence
    Create {
        /// The created entity
        entity: Entity,
        /// Counterpart snapshot from the other namespace, when known
        previous: Option<Entity>,
    },
    /// Replace an entity's content
    Update {
        /// The entity in its new state
        entity: Entity,
        /// The entity as it was before the update
        previous: Option<Entity>,
    },
    /// Re-parent an entity
    Move {
        /// The entity at its new position
        entity: Entity,
        /// The entity at its old position; required to recover the old parent
        previous: Entity,
    },
    /// Remove an entity
    Remove {
        /// The removed entity
        entity: Entity,
        /// The entity as it was before removal
        previous: Option<Entity>,
    },
}

impl Mutation {
    /// The kind of this mutation.
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Create { .. } => MutationKind::Create,
            Mutation::Update { .. } => MutationKind::Update,
            Mutation::Move { .. } => MutationKind::Move,
            Mutation::Remove { .. } => MutationKind::Remove,
        }
    }

    /// The entity this mutation applies to.
    pub fn entity(&self) -> &Entity {
        match self {
            Mutation::Create { entity, .. } => entity,
            Mutation::Update { entity, .. } => entity,
            Mutation::Move { entity, .. } => entity,
            Mutation::Remove { entity, .. } => entity,
        }
    }

    /// The prior snapshot, if one was captured.
    pub fn previous(&self) -> Option<&Entity> {
        match self {
            Mutation::Create { previous, .. } => previous.as_ref(),
            Mutation::Update { previous, .. } => previous.as_ref(),
            Mutation::Move { previous, .. } => Some(previous),
            Mutation::Remove { previous, .. } => previous.as_ref(),
        }
    }

    fn with_entities(&self, entity: Entity, previous: Entity) -> Mutation {
        match self {
            Mutation::Create { .. } => Mutation::Create {
                entity,
                previous: Some(previous),
            },
            Mutation::Update { .. } => Mutation::Update {
                entity,
                previous: Some(previous),
            },
            Mutation::Move { .. } => Mutation::Move { entity, previous },
            Mutation::Remove { .. } => Mutation::Remove {
                entity,
                previous: Some(previous),
            },
        }
    }
}

/// An ordered batch of typed mutations, partitioned by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationDiff {
    updates: Vec<Mutation>,
    creates: Vec<Mutation>,
    moves: Vec<Mutation>,
    removes: Vec<Mutation>,
}

impl ReconciliationDiff {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mutation to its kind's partition.
    pub fn commit(&mut self, mutation: Mutation) {
        self.list_mut(mutation.kind()).push(mutation);
    }

    /// Append a move after checking it would not create a containment loop
    /// together with the mutations already in the batch. `new_parent` is the
    /// entity the move targets. Non-move mutations commit unconditionally.
    pub fn commit_move(
        &mut self,
        mappings: &MappingSnapshot,
        new_parent: &Entity,
        mutation: Mutation,
    ) -> Result<()> {
        if mutation.kind() == MutationKind::Move
            && find_chain(mappings, &self.mutations(), new_parent, &mutation)
        {
            return Err(InkvaultError::CycleDetected(mutation.entity().id.clone()));
        }
        self.commit(mutation);
        Ok(())
    }

    /// Remove the first mutation equal to the given one. Returns whether
    /// anything was removed.
    pub fn retract(&mut self, mutation: &Mutation) -> bool {
        let list = self.list_mut(mutation.kind());
        match list.iter().position(|m| m == mutation) {
            Some(pos) => {
                list.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Mutations of one kind, in insertion order.
    pub fn of_kind(&self, kind: MutationKind) -> &[Mutation] {
        match kind {
            MutationKind::Update => &self.updates,
            MutationKind::Create => &self.creates,
            MutationKind::Move => &self.moves,
            MutationKind::Remove => &self.removes,
        }
    }

    /// All mutations in replay order: updates, creates, moves, removes.
    pub fn mutations(&self) -> Vec<&Mutation> {
        self.updates
            .iter()
            .chain(self.creates.iter())
            .chain(self.moves.iter())
            .chain(self.removes.iter())
            .collect()
    }

    /// Total number of mutations in the batch.
    pub fn len(&self) -> usize {
        self.updates.len() + self.creates.len() + self.moves.len() + self.removes.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-express the batch in `target`'s namespace, resolving every
    /// identifier through the mapping snapshot.
    ///
    /// Mutations rejected by `filter` are carried over unchanged. For
    /// accepted mutations:
    ///
    /// - When a prior snapshot exists and the target is not the canonical
    ///   (remote) namespace, entity ids are swapped with the snapshot's: the
    ///   old snapshot already carries a known-valid id in that namespace, so
    ///   no table entry is needed for a brand-new id.
    /// - Otherwise the id is resolved through the table.
    /// - Parent ids follow the same rule, except moves and updates always
    ///   resolve the new parent freshly (the parent legitimately changed).
    ///
    /// An identifier that cannot be resolved fails the whole batch with
    /// [`InkvaultError::MappingResolution`], or silently drops the single
    /// mutation when `skip_invalid` is set (best-effort pulls where one bad
    /// entity must not abort the pass).
    pub fn retarget<F>(
        &self,
        mappings: &MappingSnapshot,
        target: Namespace,
        filter: F,
        skip_invalid: bool,
    ) -> Result<ReconciliationDiff>
    where
        F: Fn(&Mutation) -> bool,
    {
        let mut out = ReconciliationDiff::new();

        for mutation in self.mutations() {
            if !filter(mutation) {
                out.commit(mutation.clone());
                continue;
            }

            let entity = mutation.entity();
            let previous = mutation.previous();

            let (mut new_entity, mut new_previous) = match previous {
                Some(prev) if target != Namespace::Remote => {
                    let mut e = entity.with_namespace(target);
                    e.id = prev.id.clone();
                    let mut p = prev.with_namespace(entity.namespace);
                    p.id = entity.id.clone();
                    (e, p)
                }
                _ => {
                    let mut e = entity.with_namespace(target);
                    match mappings.map_id(entity, target) {
                        Some(id) => e.id = id,
                        None => {
                            if skip_invalid {
                                log::warn!(
                                    "failed to map id '{}' into {:?}, dropping {:?} mutation",
                                    entity.id,
                                    target,
                                    mutation.kind()
                                );
                                continue;
                            }
                            return Err(InkvaultError::MappingResolution(entity.id.clone()));
                        }
                    }
                    (e, entity.clone())
                }
            };

            let keep_old_parents = previous.is_some()
                && target != Namespace::Remote
                && !matches!(mutation.kind(), MutationKind::Move | MutationKind::Update);

            if keep_old_parents {
                if let Some(prev) = previous {
                    new_entity.parent_id = prev.parent_id.clone();
                }
                new_previous.parent_id = entity.parent_id.clone();
            } else {
                new_previous.parent_id = entity.parent_id.clone();
                let mapped_parent = mappings.map_parent_id(entity, target);
                if mapped_parent.is_none() && entity.parent_id.is_some() {
                    if skip_invalid {
                        log::warn!(
                            "failed to map parent '{}' of '{}', dropping {:?} mutation",
                            entity.parent_id.as_deref().unwrap_or_default(),
                            entity.id,
                            mutation.kind()
                        );
                        continue;
                    }
                    return Err(InkvaultError::MappingResolution(
                        entity.parent_id.clone().unwrap_or_default(),
                    ));
                }
                new_entity.parent_id = mapped_parent;
            }

            out.commit(mutation.with_entities(new_entity, new_previous));
        }

        Ok(out)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON. Every entity is reconstructed fresh, so the
    /// result shares no state with whatever batch produced the JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn list_mut(&mut self, kind: MutationKind) -> &mut Vec<Mutation> {
        match kind {
            MutationKind::Update => &mut self.updates,
            MutationKind::Create => &mut self.creates,
            MutationKind::Move => &mut self.moves,
            MutationKind::Remove => &mut self.removes,
        }
    }
}

/// Whether `from` would end up containing `target`'s entity once the
/// not-yet-applied move and create mutations in the batch are taken into
/// account - i.e. whether accepting `target` closes a containment loop.
///
/// Walks parent links with an explicit work list; every batch mutation is
/// followed at most once, so the search terminates on any input.
pub fn find_chain(
    mappings: &MappingSnapshot,
    mutations: &[&Mutation],
    from: &Entity,
    target: &Mutation,
) -> bool {
    let target_ns = target.entity().namespace;
    let Some(target_id) = mappings.map_id(target.entity(), target_ns) else {
        return false;
    };

    let links: Vec<&Entity> = mutations
        .iter()
        .filter(|m| matches!(m.kind(), MutationKind::Move | MutationKind::Create))
        .map(|m| m.entity())
        .collect();

    let mut followed = vec![false; links.len()];
    let mut work: Vec<&Entity> = vec![from];

    while let Some(current) = work.pop() {
        let Some(parent_id) = mappings.map_parent_id(current, target_ns) else {
            continue;
        };
        if parent_id == target_id {
            return true;
        }
        for (idx, link) in links.iter().enumerate() {
            if followed[idx] {
                continue;
            }
            if mappings.map_id(link, target_ns).as_deref() == Some(parent_id.as_str()) {
                followed[idx] = true;
                work.push(link);
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::IdentifierMapping;

    fn mapped() -> IdentifierMapping {
        let mut mapping = IdentifierMapping::default();
        mapping
            .add_drawing(Some("drawing:1"), Some("object-1"))
            .unwrap();
        mapping
            .add_container(Some("container:root"), Some("folder-1"))
            .unwrap();
        mapping
            .add_container(Some("container:alt"), Some("folder-2"))
            .unwrap();
        mapping
    }

    fn local_drawing(parent: &str) -> Entity {
        Entity::drawing(
            Namespace::Local,
            "drawing:1",
            Some(parent.to_string()),
            "sketch",
        )
    }

    #[test]
    fn test_replay_order_is_update_create_move_remove() {
        let mut diff = ReconciliationDiff::new();
        let entity = local_drawing("container:root");

        diff.commit(Mutation::Remove {
            entity: entity.clone(),
            previous: None,
        });
        diff.commit(Mutation::Create {
            entity: entity.clone(),
            previous: None,
        });
        diff.commit(Mutation::Move {
            entity: entity.clone(),
            previous: entity.clone(),
        });
        diff.commit(Mutation::Update {
            entity: entity.clone(),
            previous: None,
        });

        let kinds: Vec<MutationKind> = diff.mutations().iter().map(|m| m.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                MutationKind::Update,
                MutationKind::Create,
                MutationKind::Move,
                MutationKind::Remove
            ]
        );
    }

    #[test]
    fn test_retarget_resolves_ids_and_parents() {
        let mapping = mapped();
        let snapshot = mapping.snapshot();

        let mut diff = ReconciliationDiff::new();
        diff.commit(Mutation::Create {
            entity: local_drawing("container:root"),
            previous: None,
        });

        let remote = diff
            .retarget(&snapshot, Namespace::Remote, |_| true, false)
            .unwrap();
        let mutation = &remote.of_kind(MutationKind::Create)[0];

        assert_eq!(mutation.entity().namespace, Namespace::Remote);
        assert_eq!(mutation.entity().id, "object-1");
        assert_eq!(mutation.entity().parent_id.as_deref(), Some("folder-1"));
    }

    #[test]
    fn test_retarget_round_trip_restores_ids() {
        let mapping = mapped();
        let snapshot = mapping.snapshot();

        let mut previous = local_drawing("container:root");
        previous.name = "old name".to_string();
        let original = Mutation::Update {
            entity: local_drawing("container:root"),
            previous: Some(previous),
        };

        let mut diff = ReconciliationDiff::new();
        diff.commit(original.clone());

        let there = diff
            .retarget(&snapshot, Namespace::Remote, |_| true, false)
            .unwrap();
        let back = there
            .retarget(&snapshot, Namespace::Local, |_| true, false)
            .unwrap();

        let mutation = &back.of_kind(MutationKind::Update)[0];
        assert_eq!(mutation.entity().id, "drawing:1");
        assert_eq!(mutation.entity().namespace, Namespace::Local);
        assert_eq!(
            mutation.entity().parent_id.as_deref(),
            Some("container:root")
        );
    }

    #[test]
    fn test_retarget_moves_always_map_the_new_parent() {
        let mapping = mapped();
        let snapshot = mapping.snapshot();

        // Moved from container:root to container:alt
        let mutation = Mutation::Move {
            entity: local_drawing("container:alt"),
            previous: local_drawing("container:root"),
        };
        let mut diff = ReconciliationDiff::new();
        diff.commit(mutation);

        let remote = diff
            .retarget(&snapshot, Namespace::Remote, |_| true, false)
            .unwrap();
        let moved = &remote.of_kind(MutationKind::Move)[0];

        assert_eq!(moved.entity().parent_id.as_deref(), Some("folder-2"));
    }

    #[test]
    fn test_retarget_unmapped_parent_is_an_error_by_default() {
        let mapping = mapped();
        let snapshot = mapping.snapshot();

        let mut diff = ReconciliationDiff::new();
        diff.commit(Mutation::Create {
            entity: Entity::drawing(
                Namespace::Local,
                "drawing:1",
                Some("container:unknown".to_string()),
                "sketch",
            ),
            previous: None,
        });

        let result = diff.retarget(&snapshot, Namespace::Remote, |_| true, false);
        assert!(matches!(
            result,
            Err(InkvaultError::MappingResolution(id)) if id == "container:unknown"
        ));
    }

    #[test]
    fn test_retarget_skip_invalid_drops_only_the_bad_mutation() {
        let mapping = mapped();
        let snapshot = mapping.snapshot();

        let mut diff = ReconciliationDiff::new();
        diff.commit(Mutation::Create {
            entity: Entity::drawing(
                Namespace::Local,
                "drawing:1",
                Some("container:unknown".to_string()),
                "sketch",
            ),
            previous: None,
        });
        diff.commit(Mutation::Create {
            entity: local_drawing("container:root"),
            previous: None,
        });

        let remote = diff
            .retarget(&snapshot, Namespace::Remote, |_| true, true)
            .unwrap();

        assert_eq!(remote.len(), 1);
        assert_eq!(
            remote.of_kind(MutationKind::Create)[0]
                .entity()
                .parent_id
                .as_deref(),
            Some("folder-1")
        );
    }

    #[test]
    fn test_retarget_filter_carries_mutations_unchanged() {
        let mapping = mapped();
        let snapshot = mapping.snapshot();

        let original = Mutation::Create {
            entity: local_drawing("container:root"),
            previous: None,
        };
        let mut diff = ReconciliationDiff::new();
        diff.commit(original.clone());

        let out = diff
            .retarget(&snapshot, Namespace::Remote, |_| false, false)
            .unwrap();

        assert_eq!(out.of_kind(MutationKind::Create)[0], original);
    }

    fn container_move(id: &str, new_parent: &str) -> Mutation {
        Mutation::Move {
            entity: Entity::container(
                Namespace::Local,
                id,
                Some(new_parent.to_string()),
                id,
            ),
            previous: Entity::container(Namespace::Local, id, Some("root".to_string()), id),
        }
    }

    #[test]
    fn test_find_chain_detects_three_step_cycle() {
        let snapshot = IdentifierMapping::default().snapshot();

        // A moves into B, B moves into C, C moves into A
        let move_a = container_move("A", "B");
        let batch = vec![container_move("B", "C"), container_move("C", "A")];
        let refs: Vec<&Mutation> = batch.iter().collect();

        // The destination of the A move, as staged by the batch
        let destination = Entity::container(Namespace::Local, "B", Some("C".to_string()), "B");

        assert!(find_chain(&snapshot, &refs, &destination, &move_a));
    }

    #[test]
    fn test_find_chain_accepts_acyclic_chain() {
        let snapshot = IdentifierMapping::default().snapshot();

        let move_a = container_move("A", "B");
        let batch = vec![container_move("B", "C"), container_move("C", "root")];
        let refs: Vec<&Mutation> = batch.iter().collect();

        let destination = Entity::container(Namespace::Local, "B", Some("C".to_string()), "B");

        assert!(!find_chain(&snapshot, &refs, &destination, &move_a));
    }

    #[test]
    fn test_commit_move_rejects_cycles() {
        let snapshot = IdentifierMapping::default().snapshot();

        let mut diff = ReconciliationDiff::new();
        diff.commit(container_move("B", "C"));
        diff.commit(container_move("C", "A"));

        let destination = Entity::container(Namespace::Local, "B", Some("C".to_string()), "B");
        let result = diff.commit_move(&snapshot, &destination, container_move("A", "B"));

        assert!(matches!(result, Err(InkvaultError::CycleDetected(id)) if id == "A"));
        assert_eq!(diff.of_kind(MutationKind::Move).len(), 2);
    }

    #[test]
    fn test_commit_move_accepts_safe_moves() {
        let snapshot = IdentifierMapping::default().snapshot();

        let mut diff = ReconciliationDiff::new();
        diff.commit(container_move("B", "C"));

        let destination = Entity::container(Namespace::Local, "B", Some("C".to_string()), "B");
        diff.commit_move(&snapshot, &destination, container_move("A", "B"))
            .unwrap();

        assert_eq!(diff.of_kind(MutationKind::Move).len(), 2);
    }

    #[test]
    fn test_json_roundtrip_is_a_structural_clone() {
        let mut diff = ReconciliationDiff::new();
        diff.commit(Mutation::Update {
            entity: local_drawing("container:root"),
            previous: Some(local_drawing("container:alt")),
        });

        let json = diff.to_json().unwrap();
        let mut restored = ReconciliationDiff::from_json(&json).unwrap();
        assert_eq!(restored, diff);

        // Mutating the restored batch leaves the serialized form untouched
        restored.commit(Mutation::Remove {
            entity: local_drawing("container:root"),
            previous: None,
        });
        assert_eq!(ReconciliationDiff::from_json(&json).unwrap(), diff);
    }

    #[test]
    fn test_retract_removes_first_match() {
        let mut diff = ReconciliationDiff::new();
        let mutation = Mutation::Create {
            entity: local_drawing("container:root"),
            previous: None,
        };
        diff.commit(mutation.clone());

        assert!(diff.retract(&mutation));
        assert!(diff.is_empty());
        assert!(!diff.retract(&mutation));
    }
}
