//! Shared handles to in-memory storage units.
//!
//! Sibling fields of one group instance write into the same unit, so the
//! unit is shared between their nodes through a [`UnitRef`]. Each handle
//! also remembers the unit as it was last loaded or persisted, which is
//! what reconciliation diffs against.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use strata_foundation::{EntityId, FieldId, GroupId, UnitId, Value};
use strata_storage::{StorageUnit, UnitLink};

struct UnitCell {
    current: RefCell<StorageUnit>,
    original: RefCell<Option<StorageUnit>>,
    parent: Option<UnitRef>,
}

/// Shared handle to one storage unit.
///
/// Clones share the same unit. Equality of handles is identity, see
/// [`UnitRef::ptr_eq`].
#[derive(Clone)]
pub struct UnitRef(Rc<UnitCell>);

impl UnitRef {
    /// Creates a handle to a new, empty, unpersisted unit.
    #[must_use]
    pub fn new(group: GroupId, parent: Option<UnitRef>) -> Self {
        Self(Rc::new(UnitCell {
            current: RefCell::new(StorageUnit::new(group)),
            original: RefCell::new(None),
            parent,
        }))
    }

    /// Creates a handle to a unit loaded from the store.
    #[must_use]
    pub fn loaded(unit: StorageUnit, parent: Option<UnitRef>) -> Self {
        Self(Rc::new(UnitCell {
            original: RefCell::new(Some(unit.clone())),
            current: RefCell::new(unit),
            parent,
        }))
    }

    /// Returns the persisted id, if any.
    #[must_use]
    pub fn id(&self) -> Option<UnitId> {
        self.0.current.borrow().id
    }

    /// Returns the group this unit stores.
    #[must_use]
    pub fn group(&self) -> GroupId {
        self.0.current.borrow().group
    }

    /// Returns the parent unit handle.
    #[must_use]
    pub fn parent(&self) -> Option<&UnitRef> {
        self.0.parent.as_ref()
    }

    /// Returns true if both handles point at the same unit.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Returns true if two optional handles are both absent or the same unit.
    #[must_use]
    pub fn same(a: Option<&Self>, b: Option<&Self>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => Self::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Returns true if the two ancestry chains consist of the same units.
    #[must_use]
    pub fn same_chain(mut a: Option<&Self>, mut b: Option<&Self>) -> bool {
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) if Self::ptr_eq(x, y) => {
                    a = x.parent();
                    b = y.parent();
                }
                _ => return false,
            }
        }
    }

    /// Returns the current payload value of `field`.
    #[must_use]
    pub fn value(&self, field: FieldId) -> Option<Value> {
        self.0.current.borrow().payload.get(&field).cloned()
    }

    /// Writes a payload value, or removes the key for `None`.
    pub fn write(&self, field: FieldId, value: Option<Value>) {
        let mut unit = self.0.current.borrow_mut();
        match value {
            Some(value) => {
                unit.payload.insert_mut(field, value);
            }
            None => {
                unit.payload.remove_mut(&field);
            }
        }
    }

    /// Returns a copy of the unit in its current state.
    #[must_use]
    pub fn snapshot(&self) -> StorageUnit {
        self.0.current.borrow().clone()
    }

    /// Returns the unit as last loaded or persisted.
    #[must_use]
    pub fn original(&self) -> Option<StorageUnit> {
        self.0.original.borrow().clone()
    }

    /// Returns true if the unit was loaded or has been persisted.
    #[must_use]
    pub fn has_original(&self) -> bool {
        self.0.original.borrow().is_some()
    }

    /// Returns true if the current payload differs from the original one.
    ///
    /// Units with no original are always changed.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.0
            .original
            .borrow()
            .as_ref()
            .is_none_or(|original| original.payload != self.0.current.borrow().payload)
    }

    /// Returns true if the payload holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.current.borrow().payload.is_empty()
    }

    /// Records that the store persisted this unit under `id`.
    ///
    /// The current state becomes the new original.
    pub fn mark_persisted(&self, id: UnitId, entity: EntityId) {
        let mut unit = self.0.current.borrow_mut();
        unit.id = Some(id);
        unit.entity = Some(entity);
        unit.parent = self.parent().and_then(UnitRef::id).map(UnitLink::Persisted);
        *self.0.original.borrow_mut() = Some(unit.clone());
    }

    /// Returns a stable key for identity-based maps.
    pub(crate) fn key(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.0.current.borrow();
        f.debug_struct("UnitRef")
            .field("id", &unit.id)
            .field("group", &unit.group)
            .field("payload", &unit.payload)
            .finish()
    }
}
