//! Storage units: one persisted record per field-group instance.

use strata_foundation::{EntityId, FieldId, GroupId, LtMap, UnitId, Value};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Raw field values of one storage unit, keyed by field id.
pub type Payload = LtMap<FieldId, Value>;

/// Reference from a nested unit to its parent unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UnitLink {
    /// The parent is already persisted.
    Persisted(UnitId),
    /// The parent is persisted in the same batch, at this index.
    ///
    /// Stores must resolve the index to the id they assign, which
    /// requires parents to appear earlier in the batch than children.
    Pending(usize),
}

/// A storage unit.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StorageUnit {
    /// Store-assigned id, `None` until persisted.
    pub id: Option<UnitId>,
    /// Owning entity.
    pub entity: Option<EntityId>,
    /// Field-group this unit stores.
    pub group: GroupId,
    /// Parent unit for nested groups.
    pub parent: Option<UnitLink>,
    /// Raw field values.
    pub payload: Payload,
}

impl StorageUnit {
    /// Creates an empty, unpersisted unit for `group`.
    #[must_use]
    pub fn new(group: GroupId) -> Self {
        Self {
            id: None,
            entity: None,
            group,
            parent: None,
            payload: Payload::new(),
        }
    }

    /// Sets the id.
    #[must_use]
    pub fn with_id(mut self, id: UnitId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the owning entity.
    #[must_use]
    pub fn with_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Sets the parent link.
    #[must_use]
    pub fn with_parent(mut self, parent: UnitLink) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Sets a payload entry.
    #[must_use]
    pub fn with_value(mut self, field: FieldId, value: impl Into<Value>) -> Self {
        self.payload.insert_mut(field, value.into());
        self
    }

    /// Returns true if the unit has been persisted.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Returns the persisted parent id, if the parent link is resolved.
    #[must_use]
    pub fn parent_id(&self) -> Option<UnitId> {
        match self.parent {
            Some(UnitLink::Persisted(id)) => Some(id),
            _ => None,
        }
    }

    /// Returns the payload value for `field`.
    #[must_use]
    pub fn value(&self, field: FieldId) -> Option<&Value> {
        self.payload.get(&field)
    }
}
