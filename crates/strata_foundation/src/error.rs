//! Error types for the Strata system.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.

use std::fmt;

use thiserror::Error;

use crate::ids::{EntityId, GroupId, UnitId};
use crate::value::ValueKind;

/// The main error type for Strata operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Pushes a frame onto this error's context, creating the context if needed.
    #[must_use]
    pub fn in_frame(mut self, frame: impl Into<String>) -> Self {
        let context = self.context.take().unwrap_or_default();
        self.context = Some(context.with_frame(frame));
        self
    }

    /// Creates an unknown entity type error.
    #[must_use]
    pub fn unknown_entity_type(entity_type: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownEntityType(entity_type.into()))
    }

    /// Creates an unknown field error.
    #[must_use]
    pub fn unknown_field(entity_type: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownField {
            entity_type: entity_type.into(),
            alias: alias.into(),
        })
    }

    /// Creates an unknown group error.
    #[must_use]
    pub fn unknown_group(entity_type: impl Into<String>, group: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownGroup {
            entity_type: entity_type.into(),
            group: group.into(),
        })
    }

    /// Creates an invalid schema error.
    #[must_use]
    pub fn schema_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SchemaInvalid(message.into()))
    }

    /// Creates a permission denied error.
    #[must_use]
    pub fn permission_denied(group: GroupId, access: Access) -> Self {
        Self::new(ErrorKind::PermissionDenied { group, access })
    }

    /// Creates an invariant violation error.
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvariantViolation(message.into()))
    }

    /// Creates a relationship resolution error.
    #[must_use]
    pub fn relationship_resolution(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::RelationshipResolution {
            target: target.into(),
            reason: reason.into(),
        })
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(datatype: impl Into<String>, actual: ValueKind) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            datatype: datatype.into(),
            actual,
        })
    }

    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid_value(datatype: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidValue {
            datatype: datatype.into(),
            message: message.into(),
        })
    }

    /// Creates an entity not found error.
    #[must_use]
    pub fn entity_not_found(id: EntityId) -> Self {
        Self::new(ErrorKind::EntityNotFound(id))
    }

    /// Creates a unit not found error.
    #[must_use]
    pub fn unit_not_found(id: UnitId) -> Self {
        Self::new(ErrorKind::UnitNotFound(id))
    }

    /// Creates a store backend error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Store(message.into()))
    }

    /// Returns the taxonomy category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if this is a permission error.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self.kind, ErrorKind::PermissionDenied { .. })
    }
}

/// The kind of access an operation needed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    /// Reading a field's value.
    Read,
    /// Writing a changed storage unit.
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Coarse error taxonomy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Unknown entity type, field or group; malformed schema.
    Schema,
    /// The caller's security context does not allow the operation.
    Permission,
    /// An internal consistency rule of the node tree was broken.
    Invariant,
    /// A referenced entity could not be made durable or cross-referenced.
    Relationship,
    /// A value could not be decoded or encoded.
    Codec,
    /// The storage backend failed or could not find a record.
    Store,
    /// Internal error.
    Internal,
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Entity type is not known to the schema provider.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Field alias is not defined for the entity type.
    #[error("unknown field: {alias} on {entity_type}")]
    UnknownField {
        /// The entity type that was queried.
        entity_type: String,
        /// The alias that was not found.
        alias: String,
    },

    /// Group is not defined for the entity type.
    #[error("unknown group: {group} on {entity_type}")]
    UnknownGroup {
        /// The entity type that was queried.
        entity_type: String,
        /// The group alias or id that was not found.
        group: String,
    },

    /// Schema definition is inconsistent.
    #[error("invalid schema: {0}")]
    SchemaInvalid(String),

    /// Access to a field-group is not permitted.
    #[error("permission denied: {access} access to {group}")]
    PermissionDenied {
        /// The group being accessed.
        group: GroupId,
        /// The access that was refused.
        access: Access,
    },

    /// An invariant of the pseudo-node tree was violated.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A related entity could not be made durable or cross-referenced.
    #[error("relationship resolution failed for {target}: {reason}")]
    RelationshipResolution {
        /// Description of the related entity.
        target: String,
        /// Why resolution failed.
        reason: String,
    },

    /// Raw value has the wrong shape for the field's datatype.
    #[error("type mismatch: {datatype} cannot decode {actual}")]
    TypeMismatch {
        /// The datatype tag of the codec.
        datatype: String,
        /// The shape of the offending value.
        actual: ValueKind,
    },

    /// Raw or typed value is malformed for the field's datatype.
    #[error("invalid {datatype} value: {message}")]
    InvalidValue {
        /// The datatype tag of the codec.
        datatype: String,
        /// Description of the problem.
        message: String,
    },

    /// Entity was not found in the store.
    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Storage unit was not found in the store.
    #[error("storage unit not found: {0}")]
    UnitNotFound(UnitId),

    /// Storage backend failure.
    #[error("store error: {0}")]
    Store(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorKind {
    /// Returns the taxonomy category of this kind.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownEntityType(_)
            | Self::UnknownField { .. }
            | Self::UnknownGroup { .. }
            | Self::SchemaInvalid(_) => ErrorCategory::Schema,
            Self::PermissionDenied { .. } => ErrorCategory::Permission,
            Self::InvariantViolation(_) => ErrorCategory::Invariant,
            Self::RelationshipResolution { .. } => ErrorCategory::Relationship,
            Self::TypeMismatch { .. } | Self::InvalidValue { .. } => ErrorCategory::Codec,
            Self::EntityNotFound(_) | Self::UnitNotFound(_) | Self::Store(_) => {
                ErrorCategory::Store
            }
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Entity type being worked on.
    pub entity_type: Option<String>,
    /// Entity being worked on, if persisted.
    pub entity: Option<EntityId>,
    /// Trail of fields and groups, outermost first.
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the entity type.
    #[must_use]
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Sets the entity id.
    #[must_use]
    pub fn with_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Adds a frame. Frames are pushed innermost first as errors unwind.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.insert(0, frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(entity_type) = &self.entity_type {
            write!(f, "in {entity_type}")?;
            if let Some(entity) = self.entity {
                write!(f, " ({entity})")?;
            }
        }
        if !self.stack.is_empty() {
            write!(f, " at {}", self.stack.join("."))?;
        }
        Ok(())
    }
}
