//! Schema providers and the per-type schema cache.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use strata_foundation::{Error, FieldId, GroupId, Result};
use tracing::debug;

use crate::schema::{EntitySchema, FieldSchema, GroupSchema};

/// Source of schema definitions.
///
/// Answers are assumed stable for the lifetime of the process.
pub trait SchemaProvider: Send + Sync {
    /// Returns the fields of an entity type.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` if the type is not defined.
    fn fields(&self, entity_type: &str) -> Result<HashMap<FieldId, FieldSchema>>;

    /// Returns the field-groups of an entity type.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` if the type is not defined.
    fn groups(&self, entity_type: &str) -> Result<HashMap<GroupId, GroupSchema>>;

    /// Returns the field adjacency of an entity type.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` if the type is not defined.
    fn edges(&self, entity_type: &str) -> Result<HashMap<FieldId, Vec<FieldId>>>;
}

#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
struct Definition {
    fields: Vec<FieldSchema>,
    #[cfg_attr(feature = "serde", serde(default))]
    groups: Vec<GroupSchema>,
    #[cfg_attr(feature = "serde", serde(default))]
    edges: Vec<(FieldId, FieldId)>,
}

/// Provider backed by definitions held in memory.
#[derive(Clone, Debug, Default)]
pub struct StaticSchemaProvider {
    definitions: HashMap<String, Definition>,
}

impl StaticSchemaProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a built schema under its entity type.
    pub fn register(&mut self, schema: &EntitySchema) {
        let mut edges = Vec::new();
        for (from, children) in schema.edges() {
            edges.extend(children.iter().map(|to| (*from, *to)));
        }
        let definition = Definition {
            fields: schema.fields().map(|f| FieldSchema::clone(f)).collect(),
            groups: schema.groups().map(|g| GroupSchema::clone(g)).collect(),
            edges,
        };
        self.definitions
            .insert(schema.entity_type().to_string(), definition);
    }

    /// Registers a built schema, builder style.
    #[must_use]
    pub fn with(mut self, schema: &EntitySchema) -> Self {
        self.register(schema);
        self
    }

    /// Parses definitions from JSON.
    ///
    /// The document maps entity type names to
    /// `{"fields": [...], "groups": [...], "edges": [[from, to], ...]}`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaInvalid` if the document does not parse.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        let definitions: HashMap<String, Definition> = serde_json::from_str(json)
            .map_err(|e| Error::schema_invalid(format!("schema document: {e}")))?;
        Ok(Self { definitions })
    }

    /// Returns the registered entity type names.
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    fn definition(&self, entity_type: &str) -> Result<&Definition> {
        self.definitions
            .get(entity_type)
            .ok_or_else(|| Error::unknown_entity_type(entity_type))
    }
}

impl SchemaProvider for StaticSchemaProvider {
    fn fields(&self, entity_type: &str) -> Result<HashMap<FieldId, FieldSchema>> {
        let definition = self.definition(entity_type)?;
        Ok(definition
            .fields
            .iter()
            .map(|f| (f.id, f.clone()))
            .collect())
    }

    fn groups(&self, entity_type: &str) -> Result<HashMap<GroupId, GroupSchema>> {
        let definition = self.definition(entity_type)?;
        Ok(definition
            .groups
            .iter()
            .map(|g| (g.id, g.clone()))
            .collect())
    }

    fn edges(&self, entity_type: &str) -> Result<HashMap<FieldId, Vec<FieldId>>> {
        let definition = self.definition(entity_type)?;
        let mut edges: HashMap<FieldId, Vec<FieldId>> = HashMap::new();
        for (from, to) in &definition.edges {
            edges.entry(*from).or_default().push(*to);
        }
        Ok(edges)
    }
}

/// Process-wide cache of validated schemas, loaded once per entity type.
pub struct SchemaRegistry {
    provider: Arc<dyn SchemaProvider>,
    cache: RwLock<HashMap<String, Arc<EntitySchema>>>,
}

impl SchemaRegistry {
    /// Creates a registry over a provider.
    #[must_use]
    pub fn new(provider: Arc<dyn SchemaProvider>) -> Self {
        Self {
            provider,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the schema of an entity type, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` if the provider does not know the type,
    /// or `SchemaInvalid` if its definition does not validate.
    pub fn get(&self, entity_type: &str) -> Result<Arc<EntitySchema>> {
        if let Some(schema) = self.cache.read().get(entity_type) {
            return Ok(Arc::clone(schema));
        }

        let schema = Arc::new(EntitySchema::from_parts(
            entity_type,
            self.provider.fields(entity_type)?,
            self.provider.groups(entity_type)?,
            self.provider.edges(entity_type)?,
        )?);
        debug!(
            entity_type,
            fields = schema.fields().count(),
            groups = schema.groups().count(),
            "loaded schema"
        );

        // Another thread may have raced us here; keep whichever landed first.
        let mut cache = self.cache.write();
        let schema = cache
            .entry(entity_type.to_string())
            .or_insert(schema);
        Ok(Arc::clone(schema))
    }

    /// Returns the number of cached schemas.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("cached", &self.cached())
            .finish_non_exhaustive()
    }
}
