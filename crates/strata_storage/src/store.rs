//! The persistence interface consumed by the entity model.

use strata_foundation::{CrossRefId, EntityId, GroupId, Result, UnitId};

use crate::unit::StorageUnit;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A cross-reference record linking a storage unit to another entity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CrossReference {
    /// Record id.
    pub id: CrossRefId,
    /// The unit holding the relationship value.
    pub from_unit: UnitId,
    /// The referenced entity.
    pub to_entity: EntityId,
}

/// Backend that stores entities, storage units and cross-references.
///
/// Implementations are expected to make each `persist_units` call atomic:
/// either every unit in the batch is written or none is.
pub trait Store: Send + Sync {
    /// Allocates a new entity of `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the backend fails.
    fn create_entity(&self, entity_type: &str) -> Result<EntityId>;

    /// Returns the entity type of a persisted entity.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity does not exist.
    fn entity_type(&self, entity: EntityId) -> Result<String>;

    /// Loads the units of an entity, optionally restricted to one group.
    ///
    /// Units are returned in persistence order.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity does not exist.
    fn load_units(&self, entity: EntityId, group: Option<GroupId>) -> Result<Vec<StorageUnit>>;

    /// Inserts or updates a batch of units, returning their ids in order.
    ///
    /// Units with an id are updated; units without one are inserted.
    /// `UnitLink::Pending(i)` parent links refer to the unit at index `i`
    /// of the same batch.
    ///
    /// # Errors
    ///
    /// Returns an error, with nothing written, if any unit is invalid.
    fn persist_units(&self, units: &[StorageUnit]) -> Result<Vec<UnitId>>;

    /// Deletes units by id.
    ///
    /// # Errors
    ///
    /// Returns `UnitNotFound` if any unit does not exist.
    fn delete_units(&self, ids: &[UnitId]) -> Result<()>;

    /// Creates a cross-reference from a unit to an entity.
    ///
    /// # Errors
    ///
    /// Returns an error if either end does not exist.
    fn create_cross_reference(&self, from_unit: UnitId, to_entity: EntityId)
    -> Result<CrossRefId>;

    /// Lists the cross-references originating from an entity's units.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity does not exist.
    fn find_cross_references(&self, from_entity: EntityId) -> Result<Vec<CrossReference>>;
}
