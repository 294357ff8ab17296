//! In-memory reference store.
//!
//! State lives in persistent maps, so taking a [`Snapshot`] is O(1) and a
//! batch write can be staged on a clone and swapped in only once every
//! unit in it has been validated.

use std::collections::HashSet;
use std::sync::Arc;

use im::OrdMap;
use parking_lot::Mutex;
use strata_foundation::{CrossRefId, EntityId, Error, GroupId, Result, UnitId};
use tracing::debug;

use crate::store::{CrossReference, Store};
use crate::unit::{StorageUnit, UnitLink};

/// A call recorded by [`MemoryStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreOp {
    /// `create_entity`.
    CreateEntity(EntityId),
    /// `persist_units`, with the ids in batch order.
    Persist(Vec<UnitId>),
    /// `delete_units`, with the ids as requested.
    Delete(Vec<UnitId>),
    /// `create_cross_reference`.
    CreateCrossReference(CrossReference),
}

#[derive(Clone, Debug, Default)]
struct State {
    next_entity: u64,
    next_unit: u64,
    next_xref: u64,
    entities: OrdMap<EntityId, Arc<str>>,
    units: OrdMap<UnitId, StorageUnit>,
    cross_references: OrdMap<CrossRefId, CrossReference>,
}

impl State {
    fn entity(&self, id: EntityId) -> Result<&Arc<str>> {
        self.entities.get(&id).ok_or_else(|| Error::entity_not_found(id))
    }

    fn unit(&self, id: UnitId) -> Result<&StorageUnit> {
        self.units.get(&id).ok_or_else(|| Error::unit_not_found(id))
    }
}

/// Point-in-time copy of a [`MemoryStore`]'s contents.
#[derive(Clone, Debug)]
pub struct Snapshot(State);

/// Store backend holding everything in memory.
///
/// Every call is recorded in an operation log that tests can inspect.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    ops: Mutex<Vec<StoreOp>>,
    refused: Mutex<HashSet<String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `create_entity` fail for `entity_type`.
    pub fn refuse_entity_type(&self, entity_type: impl Into<String>) {
        self.refused.lock().insert(entity_type.into());
    }

    /// Captures the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.state.lock().clone())
    }

    /// Replaces the contents with a snapshot. The operation log is kept.
    pub fn restore(&self, snapshot: Snapshot) {
        *self.state.lock() = snapshot.0;
    }

    /// Returns the recorded operations, oldest first.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.ops.lock().clone()
    }

    /// Clears the operation log.
    pub fn clear_operations(&self) {
        self.ops.lock().clear();
    }

    /// Returns every unit id passed to `delete_units`, in call order.
    #[must_use]
    pub fn deleted_ids(&self) -> Vec<UnitId> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                StoreOp::Delete(ids) => Some(ids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Returns every unit id written by `persist_units`, in call order.
    #[must_use]
    pub fn written_ids(&self) -> Vec<UnitId> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                StoreOp::Persist(ids) => Some(ids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Looks up a unit.
    #[must_use]
    pub fn unit(&self, id: UnitId) -> Option<StorageUnit> {
        self.state.lock().units.get(&id).cloned()
    }

    /// Returns every unit of an entity, in persistence order.
    #[must_use]
    pub fn units_of(&self, entity: EntityId) -> Vec<StorageUnit> {
        self.state
            .lock()
            .units
            .values()
            .filter(|unit| unit.entity == Some(entity))
            .cloned()
            .collect()
    }

    /// Returns every cross-reference, in creation order.
    #[must_use]
    pub fn cross_references(&self) -> Vec<CrossReference> {
        self.state.lock().cross_references.values().copied().collect()
    }

    /// Returns the number of entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.state.lock().entities.len()
    }

    fn record(&self, op: StoreOp) {
        self.ops.lock().push(op);
    }
}

impl Store for MemoryStore {
    fn create_entity(&self, entity_type: &str) -> Result<EntityId> {
        if self.refused.lock().contains(entity_type) {
            return Err(Error::store(format!("{entity_type} entities are read-only")));
        }
        let id = {
            let mut state = self.state.lock();
            state.next_entity += 1;
            let id = EntityId::new(state.next_entity);
            state.entities.insert(id, entity_type.into());
            id
        };
        debug!(%id, entity_type, "created entity");
        self.record(StoreOp::CreateEntity(id));
        Ok(id)
    }

    fn entity_type(&self, entity: EntityId) -> Result<String> {
        Ok(self.state.lock().entity(entity)?.to_string())
    }

    fn load_units(&self, entity: EntityId, group: Option<GroupId>) -> Result<Vec<StorageUnit>> {
        let state = self.state.lock();
        state.entity(entity)?;
        let units: Vec<_> = state
            .units
            .values()
            .filter(|unit| unit.entity == Some(entity))
            .filter(|unit| group.is_none_or(|group| unit.group == group))
            .cloned()
            .collect();
        debug!(%entity, ?group, count = units.len(), "loaded units");
        Ok(units)
    }

    fn persist_units(&self, units: &[StorageUnit]) -> Result<Vec<UnitId>> {
        let mut state = self.state.lock();
        let mut staged = state.clone();
        let mut ids: Vec<UnitId> = Vec::with_capacity(units.len());

        for (index, unit) in units.iter().enumerate() {
            let entity = unit
                .entity
                .ok_or_else(|| Error::store(format!("unit at {index} has no entity")))?;
            staged.entity(entity)?;

            let parent = match unit.parent {
                None => None,
                Some(UnitLink::Persisted(parent)) => {
                    staged.unit(parent)?;
                    Some(UnitLink::Persisted(parent))
                }
                Some(UnitLink::Pending(position)) => {
                    let parent = ids.get(position).copied().ok_or_else(|| {
                        Error::store(format!(
                            "unit at {index} refers to pending parent {position} not yet written"
                        ))
                    })?;
                    Some(UnitLink::Persisted(parent))
                }
            };

            let id = match unit.id {
                Some(id) => {
                    let existing = staged.unit(id)?;
                    if existing.entity != Some(entity) || existing.group != unit.group {
                        return Err(Error::store(format!(
                            "{id} cannot move to another entity or group"
                        )));
                    }
                    id
                }
                None => {
                    staged.next_unit += 1;
                    UnitId::new(staged.next_unit)
                }
            };

            let stored = StorageUnit {
                id: Some(id),
                parent,
                ..unit.clone()
            };
            staged.units.insert(id, stored);
            ids.push(id);
        }

        *state = staged;
        drop(state);
        debug!(count = ids.len(), "persisted units");
        self.record(StoreOp::Persist(ids.clone()));
        Ok(ids)
    }

    fn delete_units(&self, ids: &[UnitId]) -> Result<()> {
        let mut state = self.state.lock();
        for id in ids {
            state.unit(*id)?;
        }

        // Nested units go with their parents.
        let mut doomed: HashSet<UnitId> = ids.iter().copied().collect();
        loop {
            let children: Vec<UnitId> = state
                .units
                .values()
                .filter(|unit| unit.parent_id().is_some_and(|p| doomed.contains(&p)))
                .filter_map(|unit| unit.id)
                .filter(|id| !doomed.contains(id))
                .collect();
            if children.is_empty() {
                break;
            }
            doomed.extend(children);
        }

        for id in &doomed {
            state.units.remove(id);
        }
        let stale: Vec<CrossRefId> = state
            .cross_references
            .values()
            .filter(|xref| doomed.contains(&xref.from_unit))
            .map(|xref| xref.id)
            .collect();
        for id in stale {
            state.cross_references.remove(&id);
        }
        drop(state);

        debug!(requested = ids.len(), removed = doomed.len(), "deleted units");
        self.record(StoreOp::Delete(ids.to_vec()));
        Ok(())
    }

    fn create_cross_reference(
        &self,
        from_unit: UnitId,
        to_entity: EntityId,
    ) -> Result<CrossRefId> {
        let xref = {
            let mut state = self.state.lock();
            state.unit(from_unit)?;
            state.entity(to_entity)?;
            state.next_xref += 1;
            let xref = CrossReference {
                id: CrossRefId::new(state.next_xref),
                from_unit,
                to_entity,
            };
            state.cross_references.insert(xref.id, xref);
            xref
        };
        debug!(id = %xref.id, %from_unit, %to_entity, "created cross-reference");
        self.record(StoreOp::CreateCrossReference(xref));
        Ok(xref.id)
    }

    fn find_cross_references(&self, from_entity: EntityId) -> Result<Vec<CrossReference>> {
        let state = self.state.lock();
        state.entity(from_entity)?;
        Ok(state
            .cross_references
            .values()
            .filter(|xref| {
                state
                    .units
                    .get(&xref.from_unit)
                    .is_some_and(|unit| unit.entity == Some(from_entity))
            })
            .copied()
            .collect())
    }
}
