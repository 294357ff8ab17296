//! Schema definitions for entity types.
//!
//! An entity type is a tree of fields. Fields that store data belong to a
//! field-group; each group is rooted at one field and stores one storage
//! unit per instance. Groups nest: a group whose root field hangs below
//! another group's field stores units that point at that group's units.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use strata_foundation::{Error, FieldId, GroupId, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Field type tag.
///
/// Selects the codec used to decode and encode the field's payload value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "String", into = "String"))]
pub enum DataType {
    /// Grouping-only field with no payload of its own.
    Semantic,
    /// Localized text.
    String,
    /// Plain text with no language tagging.
    NonLocalizedString,
    /// Number.
    Number,
    /// Boolean.
    Boolean,
    /// Calendar date.
    Date,
    /// Reference to one other entity.
    ResourceInstance,
    /// References to several other entities.
    ResourceInstanceList,
    /// Arbitrary payload passed through untouched.
    Json,
    /// Any other tag, handled by a custom codec.
    Custom(Arc<str>),
}

impl DataType {
    /// Returns the string tag of this datatype.
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Self::Semantic => "semantic",
            Self::String => "string",
            Self::NonLocalizedString => "non-localized-string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::ResourceInstance => "resource-instance",
            Self::ResourceInstanceList => "resource-instance-list",
            Self::Json => "json",
            Self::Custom(tag) => tag,
        }
    }

    /// Parses a string tag. Unknown tags become [`DataType::Custom`].
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "semantic" => Self::Semantic,
            "string" => Self::String,
            "non-localized-string" => Self::NonLocalizedString,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "resource-instance" => Self::ResourceInstance,
            "resource-instance-list" => Self::ResourceInstanceList,
            "json" => Self::Json,
            other => Self::Custom(other.into()),
        }
    }

    /// Returns true for grouping-only fields.
    #[must_use]
    pub const fn is_grouping(&self) -> bool {
        matches!(self, Self::Semantic)
    }

    /// Returns true if values of this type reference other entities.
    #[must_use]
    pub const fn is_relationship(&self) -> bool {
        matches!(self, Self::ResourceInstance | Self::ResourceInstanceList)
    }

    /// Returns true if the payload holds a list even under `cardinality=one`.
    #[must_use]
    pub const fn collects_multiple(&self) -> bool {
        matches!(self, Self::ResourceInstanceList)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl From<String> for DataType {
    fn from(tag: String) -> Self {
        Self::from_tag(&tag)
    }
}

impl From<DataType> for String {
    fn from(datatype: DataType) -> Self {
        datatype.tag().to_string()
    }
}

/// How many storage units a group stores per entity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Cardinality {
    /// At most one unit (per parent unit, for nested groups).
    One,
    /// Zero or more independent units.
    Many,
}

/// Schema definition for a field.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldSchema {
    /// Field id, the key of this field's payload entry.
    pub id: FieldId,
    /// Unique name within the entity type.
    pub alias: Arc<str>,
    /// Type tag.
    pub datatype: DataType,
    /// Owning group. `None` only for grouping-only fields outside any group.
    #[cfg_attr(feature = "serde", serde(default))]
    pub group: Option<GroupId>,
    /// Whether the payload stores a list for this field.
    #[cfg_attr(feature = "serde", serde(default))]
    pub collects_multiple: bool,
}

impl FieldSchema {
    /// Creates a field schema with no group.
    #[must_use]
    pub fn new(id: FieldId, alias: impl Into<Arc<str>>, datatype: DataType) -> Self {
        let collects_multiple = datatype.collects_multiple();
        Self {
            id,
            alias: alias.into(),
            datatype,
            group: None,
            collects_multiple,
        }
    }

    /// Creates a grouping-only field.
    #[must_use]
    pub fn semantic(id: FieldId, alias: impl Into<Arc<str>>) -> Self {
        Self::new(id, alias, DataType::Semantic)
    }

    /// Sets the owning group.
    #[must_use]
    pub fn in_group(mut self, group: GroupId) -> Self {
        self.group = Some(group);
        self
    }
}

/// Schema definition for a field-group.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GroupSchema {
    /// Group id.
    pub id: GroupId,
    /// Alias, equal to the alias of the group's root field.
    pub alias: Arc<str>,
    /// Units per entity (or per parent unit).
    pub cardinality: Cardinality,
    /// Enclosing group, `None` for top-level groups.
    #[cfg_attr(feature = "serde", serde(default))]
    pub parent: Option<GroupId>,
    /// The field whose subtree this group stores.
    pub root: FieldId,
}

impl GroupSchema {
    /// Creates a top-level group schema.
    #[must_use]
    pub fn new(
        id: GroupId,
        alias: impl Into<Arc<str>>,
        cardinality: Cardinality,
        root: FieldId,
    ) -> Self {
        Self {
            id,
            alias: alias.into(),
            cardinality,
            parent: None,
            root,
        }
    }

    /// Sets the enclosing group.
    #[must_use]
    pub fn with_parent(mut self, parent: GroupId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Returns true if the group stores many units.
    #[must_use]
    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}

/// Complete, validated schema of one entity type.
#[derive(Clone, Debug)]
pub struct EntitySchema {
    entity_type: Arc<str>,
    root: FieldId,
    fields: HashMap<FieldId, Arc<FieldSchema>>,
    groups: HashMap<GroupId, Arc<GroupSchema>>,
    edges: HashMap<FieldId, Vec<FieldId>>,
    parents: HashMap<FieldId, FieldId>,
    field_aliases: HashMap<Arc<str>, FieldId>,
    group_aliases: HashMap<Arc<str>, GroupId>,
}

impl EntitySchema {
    /// Starts a schema builder rooted at `root`.
    #[must_use]
    pub fn builder(entity_type: impl Into<Arc<str>>, root: FieldSchema) -> EntitySchemaBuilder {
        EntitySchemaBuilder::new(entity_type, root)
    }

    /// Assembles and validates a schema from a provider's three maps.
    ///
    /// Group parents are derived from the edges. A group whose declared
    /// parent disagrees with the derived one is rejected.
    ///
    /// # Errors
    ///
    /// Returns `SchemaInvalid` if the parts do not form a single rooted tree,
    /// aliases collide, or a group's root is missing or misplaced.
    #[allow(clippy::too_many_lines)]
    pub fn from_parts(
        entity_type: impl Into<Arc<str>>,
        fields: HashMap<FieldId, FieldSchema>,
        groups: HashMap<GroupId, GroupSchema>,
        edges: HashMap<FieldId, Vec<FieldId>>,
    ) -> Result<Self> {
        let entity_type = entity_type.into();

        let mut field_aliases = HashMap::new();
        for field in fields.values() {
            if field_aliases.insert(field.alias.clone(), field.id).is_some() {
                return Err(Error::schema_invalid(format!(
                    "{entity_type}: duplicate field alias {}",
                    field.alias
                )));
            }
        }

        let mut parents = HashMap::new();
        for (from, children) in &edges {
            if !fields.contains_key(from) {
                return Err(Error::schema_invalid(format!(
                    "{entity_type}: edge from unknown {from}"
                )));
            }
            for child in children {
                if !fields.contains_key(child) {
                    return Err(Error::schema_invalid(format!(
                        "{entity_type}: edge to unknown {child}"
                    )));
                }
                if parents.insert(*child, *from).is_some() {
                    return Err(Error::schema_invalid(format!(
                        "{entity_type}: {child} has more than one parent"
                    )));
                }
            }
        }

        let mut roots = fields.keys().filter(|id| !parents.contains_key(id));
        let root = match (roots.next(), roots.next()) {
            (Some(root), None) => *root,
            (None, _) => {
                return Err(Error::schema_invalid(format!(
                    "{entity_type}: no root field"
                )));
            }
            (Some(_), Some(_)) => {
                return Err(Error::schema_invalid(format!(
                    "{entity_type}: more than one root field"
                )));
            }
        };

        // Every field must be reachable from the root; this also rules out cycles.
        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            for child in edges.get(&id).into_iter().flatten() {
                if seen.insert(*child) {
                    queue.push_back(*child);
                }
            }
        }
        if seen.len() != fields.len() {
            return Err(Error::schema_invalid(format!(
                "{entity_type}: fields unreachable from the root"
            )));
        }

        let mut group_aliases = HashMap::new();
        let mut group_roots = HashMap::new();
        for group in groups.values() {
            if group_aliases.insert(group.alias.clone(), group.id).is_some() {
                return Err(Error::schema_invalid(format!(
                    "{entity_type}: duplicate group alias {}",
                    group.alias
                )));
            }
            let root_field = fields.get(&group.root).ok_or_else(|| {
                Error::schema_invalid(format!(
                    "{entity_type}: {} roots at unknown {}",
                    group.id, group.root
                ))
            })?;
            if root_field.group != Some(group.id) {
                return Err(Error::schema_invalid(format!(
                    "{entity_type}: root field {} of {} belongs to another group",
                    root_field.alias, group.id
                )));
            }
            group_roots.insert(group.root, group.id);
        }

        let group_of_parent = |field: FieldId| -> Option<GroupId> {
            parents
                .get(&field)
                .and_then(|parent| fields.get(parent))
                .and_then(|parent| parent.group)
        };

        let mut groups_out = HashMap::new();
        for (id, mut group) in groups {
            let derived = group_of_parent(group.root);
            if group.parent.is_some() && group.parent != derived {
                return Err(Error::schema_invalid(format!(
                    "{entity_type}: {id} declares parent {:?} but hangs below {derived:?}",
                    group.parent
                )));
            }
            group.parent = derived;
            groups_out.insert(id, Arc::new(group));
        }

        for field in fields.values() {
            if field.id == root {
                continue;
            }
            let is_group_root = group_roots.contains_key(&field.id);
            match field.group {
                None if !field.datatype.is_grouping() => {
                    return Err(Error::schema_invalid(format!(
                        "{entity_type}: {} stores data but has no group",
                        field.alias
                    )));
                }
                Some(group) if !groups_out.contains_key(&group) => {
                    return Err(Error::schema_invalid(format!(
                        "{entity_type}: {} belongs to unknown {group}",
                        field.alias
                    )));
                }
                Some(group) if !is_group_root && group_of_parent(field.id) != Some(group) => {
                    return Err(Error::schema_invalid(format!(
                        "{entity_type}: {} is not stored with its parent",
                        field.alias
                    )));
                }
                _ => {}
            }
        }

        let fields = fields
            .into_iter()
            .map(|(id, mut field)| {
                field.collects_multiple |= field.datatype.collects_multiple();
                (id, Arc::new(field))
            })
            .collect();

        Ok(Self {
            entity_type,
            root,
            fields,
            groups: groups_out,
            edges,
            parents,
            field_aliases,
            group_aliases,
        })
    }

    /// Returns the entity type name.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Returns the root field id.
    #[must_use]
    pub fn root(&self) -> FieldId {
        self.root
    }

    /// Returns the root field.
    #[must_use]
    pub fn root_field(&self) -> &Arc<FieldSchema> {
        &self.fields[&self.root]
    }

    /// Looks up a field by id.
    #[must_use]
    pub fn field(&self, id: FieldId) -> Option<&Arc<FieldSchema>> {
        self.fields.get(&id)
    }

    /// Looks up a field by alias.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` if no field has this alias.
    pub fn field_by_alias(&self, alias: &str) -> Result<&Arc<FieldSchema>> {
        self.field_aliases
            .get(alias)
            .and_then(|id| self.fields.get(id))
            .ok_or_else(|| Error::unknown_field(self.entity_type.as_ref(), alias))
    }

    /// Looks up a group by id.
    #[must_use]
    pub fn group(&self, id: GroupId) -> Option<&Arc<GroupSchema>> {
        self.groups.get(&id)
    }

    /// Looks up a group by alias.
    ///
    /// # Errors
    ///
    /// Returns `UnknownGroup` if no group has this alias.
    pub fn group_by_alias(&self, alias: &str) -> Result<&Arc<GroupSchema>> {
        self.group_aliases
            .get(alias)
            .and_then(|id| self.groups.get(id))
            .ok_or_else(|| Error::unknown_group(self.entity_type.as_ref(), alias))
    }

    /// Returns the group rooted at `field`, if any.
    #[must_use]
    pub fn group_rooted_at(&self, field: FieldId) -> Option<&Arc<GroupSchema>> {
        let group = self.fields.get(&field)?.group?;
        self.groups.get(&group).filter(|g| g.root == field)
    }

    /// Returns the children of a field, in declaration order.
    #[must_use]
    pub fn children(&self, field: FieldId) -> &[FieldId] {
        self.edges.get(&field).map_or(&[], Vec::as_slice)
    }

    /// Returns the parent of a field.
    #[must_use]
    pub fn parent(&self, field: FieldId) -> Option<FieldId> {
        self.parents.get(&field).copied()
    }

    /// Returns true if `child` hangs directly below `parent`.
    #[must_use]
    pub fn is_child(&self, parent: FieldId, child: FieldId) -> bool {
        self.parent(child) == Some(parent)
    }

    /// Returns true if `field` is a plain grouping field below another
    /// plain grouping field.
    ///
    /// Group roots and the entity root do not count as plain grouping fields.
    #[must_use]
    pub fn is_nested_grouping(&self, field: FieldId) -> bool {
        let plain_grouping = |id: FieldId| {
            id != self.root
                && self.group_rooted_at(id).is_none()
                && self.fields.get(&id).is_some_and(|f| f.datatype.is_grouping())
        };
        plain_grouping(field) && self.parent(field).is_some_and(plain_grouping)
    }

    /// Returns `group` and every group nested below it, parents first.
    ///
    /// These are the groups that must be loaded together for `group`'s
    /// subtree to be complete.
    #[must_use]
    pub fn group_closure(&self, group: GroupId) -> Vec<GroupId> {
        let Some(start) = self.groups.get(&group) else {
            return Vec::new();
        };
        let mut out = vec![group];
        let mut queue = VecDeque::from([start.root]);
        while let Some(field) = queue.pop_front() {
            for child in self.children(field) {
                if let Some(nested) = self.group_rooted_at(*child) {
                    out.push(nested.id);
                }
                queue.push_back(*child);
            }
        }
        out
    }

    /// Returns how many groups enclose `group` (0 for top-level groups).
    #[must_use]
    pub fn group_depth(&self, group: GroupId) -> usize {
        let mut depth = 0;
        let mut current = self.groups.get(&group).and_then(|g| g.parent);
        while let Some(parent) = current {
            depth += 1;
            current = self.groups.get(&parent).and_then(|g| g.parent);
        }
        depth
    }

    /// Iterates over all fields.
    pub fn fields(&self) -> impl Iterator<Item = &Arc<FieldSchema>> {
        self.fields.values()
    }

    /// Iterates over all groups.
    pub fn groups(&self) -> impl Iterator<Item = &Arc<GroupSchema>> {
        self.groups.values()
    }

    /// Returns the field → children adjacency.
    #[must_use]
    pub fn edges(&self) -> &HashMap<FieldId, Vec<FieldId>> {
        &self.edges
    }
}

/// Builder for [`EntitySchema`].
///
/// Fields are declared below an already-declared parent. A plain field
/// inherits its parent's group; a group's root field starts a new group
/// nested in its parent's group.
#[derive(Clone, Debug)]
pub struct EntitySchemaBuilder {
    entity_type: Arc<str>,
    fields: Vec<FieldSchema>,
    groups: Vec<GroupSchema>,
    edges: Vec<(FieldId, FieldId)>,
}

impl EntitySchemaBuilder {
    /// Creates a builder with the given root field.
    #[must_use]
    pub fn new(entity_type: impl Into<Arc<str>>, root: FieldSchema) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields: vec![root],
            groups: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Declares a group rooted at `root`, below `parent`.
    #[must_use]
    pub fn group(
        mut self,
        parent: FieldId,
        id: GroupId,
        cardinality: Cardinality,
        root: FieldSchema,
    ) -> Self {
        let root = root.in_group(id);
        self.groups
            .push(GroupSchema::new(id, root.alias.clone(), cardinality, root.id));
        self.edges.push((parent, root.id));
        self.fields.push(root);
        self
    }

    /// Declares a field below `parent`, stored in the parent's group.
    #[must_use]
    pub fn field(mut self, parent: FieldId, field: FieldSchema) -> Self {
        let group = self
            .fields
            .iter()
            .find(|f| f.id == parent)
            .and_then(|f| f.group);
        let field = FieldSchema { group, ..field };
        self.edges.push((parent, field.id));
        self.fields.push(field);
        self
    }

    /// Validates and builds the schema.
    ///
    /// # Errors
    ///
    /// Returns `SchemaInvalid` for duplicate ids, grouping fields nested
    /// more than one level deep, or any error of [`EntitySchema::from_parts`].
    pub fn build(self) -> Result<EntitySchema> {
        let mut fields = HashMap::new();
        for field in self.fields {
            let id = field.id;
            if fields.insert(id, field).is_some() {
                return Err(Error::schema_invalid(format!(
                    "{}: duplicate {id}",
                    self.entity_type
                )));
            }
        }
        let mut groups = HashMap::new();
        for group in self.groups {
            let id = group.id;
            if groups.insert(id, group).is_some() {
                return Err(Error::schema_invalid(format!(
                    "{}: duplicate {id}",
                    self.entity_type
                )));
            }
        }
        let mut edges: HashMap<FieldId, Vec<FieldId>> = HashMap::new();
        for (from, to) in self.edges {
            edges.entry(from).or_default().push(to);
        }
        let schema = EntitySchema::from_parts(self.entity_type, fields, groups, edges)?;
        if let Some(field) = schema.fields().find(|f| schema.is_nested_grouping(f.id)) {
            return Err(Error::schema_invalid(format!(
                "{}: grouping field {} nests more than one level",
                schema.entity_type(),
                field.alias
            )));
        }
        Ok(schema)
    }
}
