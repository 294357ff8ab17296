//! Identifiers for entities, storage units, cross-references, fields and groups.
//!
//! Store-assigned identifiers (`EntityId`, `UnitId`, `CrossRefId`) are opaque
//! 64-bit values. Schema identifiers (`FieldId`, `GroupId`) are 32-bit and
//! stable for the lifetime of an entity type.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

macro_rules! store_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        #[cfg_attr(feature = "serde", serde(transparent))]
        pub struct $name(u64);

        impl $name {
            /// Creates an identifier from its raw value.
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

macro_rules! schema_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        #[cfg_attr(feature = "serde", serde(transparent))]
        pub struct $name(u32);

        impl $name {
            /// Creates an identifier from its raw value.
            #[must_use]
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Returns the raw index of this identifier.
            #[must_use]
            pub const fn index(self) -> u32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, ":{}"), self.0)
            }
        }
    };
}

store_id!(
    /// Identifier of a persisted entity (an aggregate of storage units).
    EntityId,
    "entity"
);

store_id!(
    /// Identifier of a persisted storage unit.
    ///
    /// Units that have not been persisted yet have no id.
    UnitId,
    "unit"
);

store_id!(
    /// Identifier of a cross-reference record linking a unit to another entity.
    CrossRefId,
    "xref"
);

schema_id!(
    /// Identifier of a field within an entity type's schema.
    FieldId,
    "field"
);

schema_id!(
    /// Identifier of a field-group within an entity type's schema.
    GroupId,
    "group"
);
