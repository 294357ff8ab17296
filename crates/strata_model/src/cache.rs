//! Per-entity cache of loaded storage units.
//!
//! Each group is looked up in the store at most once per entity. A group
//! is loaded together with the groups nested below it, so nested unit
//! handles can be linked to their parent handles as they are built.

use std::collections::HashMap;
use std::sync::Arc;

use strata_foundation::{EntityId, Error, GroupId, Result, UnitId};
use strata_storage::{EntitySchema, GroupSchema, StorageUnit, Store};
use tracing::debug;

use crate::unit_ref::UnitRef;

#[derive(Clone, Debug)]
enum Slot {
    /// Looked up; the store has no units for the group.
    Empty,
    Units(Vec<UnitRef>),
}

impl Slot {
    fn from_units(units: Vec<UnitRef>) -> Self {
        if units.is_empty() {
            Self::Empty
        } else {
            Self::Units(units)
        }
    }

    fn units(&self) -> Vec<UnitRef> {
        match self {
            Self::Empty => Vec::new(),
            Self::Units(units) => units.clone(),
        }
    }
}

/// Loaded units of one entity, keyed by group alias.
///
/// A missing key means the group has not been looked up yet.
#[derive(Debug, Default)]
pub struct ValueCache {
    slots: HashMap<Arc<str>, Slot>,
}

impl ValueCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the units of `group`, loading them on first use.
    ///
    /// An entity with no id has no stored units; its groups are recorded as
    /// empty without asking the store.
    ///
    /// # Errors
    ///
    /// Returns the store's error, or `InvariantViolation` if a nested unit
    /// refers to a parent unit that was not loaded.
    pub fn get(
        &mut self,
        store: &dyn Store,
        schema: &EntitySchema,
        entity: Option<EntityId>,
        group: &GroupSchema,
    ) -> Result<Vec<UnitRef>> {
        if let Some(slot) = self.slots.get(&group.alias) {
            return Ok(slot.units());
        }
        let Some(entity) = entity else {
            self.slots.insert(Arc::clone(&group.alias), Slot::Empty);
            return Ok(Vec::new());
        };

        if let Some(parent) = group.parent {
            let parent = lookup_group(schema, parent)?;
            if !self.is_checked(&parent.alias) {
                self.get(store, schema, Some(entity), parent)?;
                return self.get(store, schema, Some(entity), group);
            }
        }

        let mut handles = self.known_handles();
        for id in schema.group_closure(group.id) {
            let member = lookup_group(schema, id)?;
            if self.is_checked(&member.alias) {
                continue;
            }
            let units = store.load_units(entity, Some(id))?;
            debug!(%entity, group = %member.alias, count = units.len(), "loaded group");
            let refs = link(member, units, &mut handles)?;
            self.slots
                .insert(Arc::clone(&member.alias), Slot::from_units(refs));
        }

        Ok(self
            .slots
            .get(&group.alias)
            .map(Slot::units)
            .unwrap_or_default())
    }

    /// Replaces the units cached for a group.
    pub fn set(&mut self, alias: impl Into<Arc<str>>, units: Vec<UnitRef>) {
        self.slots.insert(alias.into(), Slot::from_units(units));
    }

    /// Fills every group of the schema from a full set of units.
    ///
    /// Groups with no units are recorded as empty.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if a nested unit refers to a parent unit
    /// that is not in the set, or a unit belongs to no known group.
    pub fn populate(&mut self, schema: &EntitySchema, units: Vec<StorageUnit>) -> Result<()> {
        let mut by_group: HashMap<GroupId, Vec<StorageUnit>> = HashMap::new();
        for unit in units {
            by_group.entry(unit.group).or_default().push(unit);
        }
        if let Some(stray) = by_group.keys().find(|id| schema.group(**id).is_none()) {
            return Err(Error::invariant(format!(
                "{}: stored units belong to unknown {stray}",
                schema.entity_type()
            )));
        }

        let mut groups: Vec<&Arc<GroupSchema>> = schema.groups().collect();
        groups.sort_by_key(|group| (schema.group_depth(group.id), group.id));

        let mut handles = HashMap::new();
        for group in groups {
            let units = by_group.remove(&group.id).unwrap_or_default();
            let refs = link(group, units, &mut handles)?;
            self.slots.insert(Arc::clone(&group.alias), Slot::from_units(refs));
        }
        debug!(entity_type = schema.entity_type(), units = handles.len(), "populated cache");
        Ok(())
    }

    /// Returns true if the group has been looked up.
    #[must_use]
    pub fn is_checked(&self, alias: &str) -> bool {
        self.slots.contains_key(alias)
    }

    /// Forgets every loaded group.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Returns the number of groups looked up.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no group has been looked up.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn known_handles(&self) -> HashMap<UnitId, UnitRef> {
        self.slots
            .values()
            .flat_map(Slot::units)
            .filter_map(|unit| unit.id().map(|id| (id, unit)))
            .collect()
    }
}

fn lookup_group(schema: &EntitySchema, id: GroupId) -> Result<&Arc<GroupSchema>> {
    schema
        .group(id)
        .ok_or_else(|| Error::unknown_group(schema.entity_type(), id.to_string()))
}

/// Wraps units in handles, linking nested units to their parent handles.
fn link(
    group: &GroupSchema,
    units: Vec<StorageUnit>,
    handles: &mut HashMap<UnitId, UnitRef>,
) -> Result<Vec<UnitRef>> {
    units
        .into_iter()
        .map(|unit| {
            let parent = match group.parent {
                None => None,
                Some(_) => {
                    let parent_id = unit.parent_id().ok_or_else(|| {
                        Error::invariant(format!("{} unit has no parent unit", group.alias))
                    })?;
                    let parent = handles.get(&parent_id).cloned().ok_or_else(|| {
                        Error::invariant(format!(
                            "{} unit refers to {parent_id}, which is not loaded",
                            group.alias
                        ))
                    })?;
                    Some(parent)
                }
            };
            let id = unit.id;
            let handle = UnitRef::loaded(unit, parent);
            if let Some(id) = id {
                handles.insert(id, handle.clone());
            }
            Ok(handle)
        })
        .collect()
}
