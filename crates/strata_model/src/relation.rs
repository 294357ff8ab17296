//! Relationship values: references from one entity to another.
//!
//! A relationship composes its target instead of becoming it. The target is
//! either already persisted, known by id, or a live entity handle that may
//! not have been saved yet. Saving the referring entity makes a pending
//! target durable and records the cross-reference between them.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use strata_foundation::{CrossRefId, EntityId, Error, Result};

use crate::context::ModelContext;
use crate::entity::{Entity, EntityHandle};

/// The entity a relationship points at.
#[derive(Clone)]
pub enum RelatedEntity {
    /// A persisted entity.
    Persisted {
        /// Entity id.
        id: EntityId,
        /// Entity type name.
        entity_type: Arc<str>,
    },
    /// A live entity, possibly unsaved.
    Pending {
        /// Handle to the entity.
        handle: EntityHandle,
        /// Entity type name.
        entity_type: Arc<str>,
    },
}

impl RelatedEntity {
    /// Returns the target's id, if it has one.
    ///
    /// A pending target that is currently borrowed mutably reports `None`.
    #[must_use]
    pub fn id(&self) -> Option<EntityId> {
        match self {
            Self::Persisted { id, .. } => Some(*id),
            Self::Pending { handle, .. } => handle.try_borrow().ok().and_then(|e| e.id()),
        }
    }

    /// Returns the target's entity type.
    #[must_use]
    pub fn entity_type(&self) -> &Arc<str> {
        match self {
            Self::Persisted { entity_type, .. } | Self::Pending { entity_type, .. } => entity_type,
        }
    }

    /// Returns a handle to the target, loading a persisted target.
    ///
    /// # Errors
    ///
    /// Returns an error if a persisted target cannot be loaded.
    pub fn resolve(&self, ctx: &ModelContext) -> Result<EntityHandle> {
        match self {
            Self::Persisted { id, .. } => Ok(Entity::load(ctx, *id)?.into_handle()),
            Self::Pending { handle, .. } => Ok(Rc::clone(handle)),
        }
    }

    fn same_target(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Pending { handle: a, .. }, Self::Pending { handle: b, .. }) => Rc::ptr_eq(a, b),
            _ => self.id().is_some() && self.id() == other.id(),
        }
    }
}

impl fmt::Debug for RelatedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persisted { id, entity_type } => write!(f, "{entity_type}({id})"),
            Self::Pending { entity_type, .. } => match self.id() {
                Some(id) => write!(f, "{entity_type}({id}, live)"),
                None => write!(f, "{entity_type}(unsaved)"),
            },
        }
    }
}

/// A reference to another entity, with its cross-reference record.
///
/// Clones share the cross-reference slot, so resolving one clone is seen
/// by the value cached in the node it came from.
#[derive(Clone)]
pub struct Relationship {
    target: RelatedEntity,
    cross_reference: Rc<Cell<Option<CrossRefId>>>,
}

impl Relationship {
    /// Creates a relationship to a persisted entity.
    #[must_use]
    pub fn to(id: EntityId, entity_type: impl Into<Arc<str>>) -> Self {
        Self::new(RelatedEntity::Persisted {
            id,
            entity_type: entity_type.into(),
        })
    }

    /// Creates a relationship to a live entity.
    ///
    /// # Errors
    ///
    /// Returns `RelationshipResolution` if the handle is mutably borrowed.
    pub fn pending(handle: &EntityHandle) -> Result<Self> {
        let entity_type: Arc<str> = handle
            .try_borrow()
            .map_err(|_| Error::relationship_resolution("live entity", "entity is being modified"))?
            .entity_type()
            .into();
        Ok(Self::new(RelatedEntity::Pending {
            handle: Rc::clone(handle),
            entity_type,
        }))
    }

    /// Creates a relationship to `target` with no cross-reference yet.
    #[must_use]
    pub fn new(target: RelatedEntity) -> Self {
        Self {
            target,
            cross_reference: Rc::new(Cell::new(None)),
        }
    }

    /// Sets the cross-reference id.
    #[must_use]
    pub fn with_cross_reference(self, id: CrossRefId) -> Self {
        self.cross_reference.set(Some(id));
        self
    }

    /// Returns the target.
    #[must_use]
    pub fn target(&self) -> &RelatedEntity {
        &self.target
    }

    /// Returns the cross-reference id, once resolved.
    #[must_use]
    pub fn cross_reference(&self) -> Option<CrossRefId> {
        self.cross_reference.get()
    }

    pub(crate) fn set_cross_reference(&self, id: CrossRefId) {
        self.cross_reference.set(Some(id));
    }
}

impl PartialEq for Relationship {
    fn eq(&self, other: &Self) -> bool {
        self.target.same_target(&other.target) && self.cross_reference() == other.cross_reference()
    }
}

impl fmt::Debug for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cross_reference() {
            Some(xref) => write!(f, "-> {:?} via {xref}", self.target),
            None => write!(f, "-> {:?}", self.target),
        }
    }
}
