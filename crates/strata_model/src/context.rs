//! The collaborators an entity works with.

use std::fmt;
use std::sync::Arc;

use strata_foundation::{EntityId, Result};
use strata_storage::{SchemaRegistry, Store};

use crate::access::{AccessGuard, SecurityContext};
use crate::codec::CodecRegistry;
use crate::config::ModelConfig;
use crate::entity::{Entity, EntityHandle};

/// Registries, store, access guard and caller identity for one session.
///
/// Cloning is cheap; every collaborator is shared.
#[derive(Clone)]
pub struct ModelContext {
    schemas: Arc<SchemaRegistry>,
    codecs: Arc<CodecRegistry>,
    store: Arc<dyn Store>,
    guard: Arc<AccessGuard>,
    security: SecurityContext,
    config: ModelConfig,
}

impl ModelContext {
    /// Creates a context with built-in codecs, full access and default
    /// configuration.
    #[must_use]
    pub fn new(schemas: Arc<SchemaRegistry>, store: Arc<dyn Store>) -> Self {
        Self {
            schemas,
            codecs: Arc::new(CodecRegistry::with_builtins()),
            store,
            guard: Arc::new(AccessGuard::allow_all()),
            security: SecurityContext::anonymous(),
            config: ModelConfig::default(),
        }
    }

    /// Builder method to set the codec registry.
    #[must_use]
    pub fn with_codecs(mut self, codecs: Arc<CodecRegistry>) -> Self {
        self.codecs = codecs;
        self
    }

    /// Builder method to set the access guard.
    #[must_use]
    pub fn with_guard(mut self, guard: Arc<AccessGuard>) -> Self {
        self.guard = guard;
        self
    }

    /// Builder method to set the caller identity.
    #[must_use]
    pub fn with_security(mut self, security: SecurityContext) -> Self {
        self.security = security;
        self
    }

    /// Builder method to set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ModelConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the schema registry.
    #[must_use]
    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Returns the codec registry.
    #[must_use]
    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Returns the access guard.
    #[must_use]
    pub fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    /// Returns the caller identity.
    #[must_use]
    pub fn security(&self) -> &SecurityContext {
        &self.security
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Creates a new, unsaved entity and wraps it in a handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity type is unknown.
    pub fn create(&self, entity_type: &str) -> Result<EntityHandle> {
        Ok(Entity::create(self, entity_type)?.into_handle())
    }

    /// Loads a persisted entity and wraps it in a handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity does not exist or its type is unknown.
    pub fn load(&self, id: EntityId) -> Result<EntityHandle> {
        Ok(Entity::load(self, id)?.into_handle())
    }
}

impl fmt::Debug for ModelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelContext")
            .field("schemas", &self.schemas)
            .field("codecs", &self.codecs)
            .field("guard", &self.guard)
            .field("security", &self.security)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
