//! Pseudo-nodes: the lazy, mutable representation of one field's value.
//!
//! A [`PseudoValue`] decodes its field on first access and keeps the typed
//! value until it is cleared. A [`PseudoList`] holds the items of a
//! `cardinality=many` group and remembers the persisted items removed from
//! it. An [`Unavailable`] node stands in for a field the caller may not
//! read.

use std::sync::Arc;

use chrono::NaiveDate;
use strata_foundation::{Access, Error, FieldId, GroupId, Result, Value};
use strata_storage::FieldSchema;

use crate::codec::{Codec, DecodeContext, LocalizedText, TypedValue};
use crate::grouping::GroupingNode;
use crate::relation::Relationship;
use crate::unit_ref::UnitRef;

/// A value assigned to a field.
///
/// Raw values are decoded by the field's codec before they are stored, so
/// literal and typed assignment end up in the same form.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldInput {
    /// An already-decoded value.
    Typed(TypedValue),
    /// A payload-form value to decode.
    Raw(Value),
}

impl From<TypedValue> for FieldInput {
    fn from(value: TypedValue) -> Self {
        Self::Typed(value)
    }
}

impl From<Value> for FieldInput {
    fn from(value: Value) -> Self {
        Self::Raw(value)
    }
}

impl From<&str> for FieldInput {
    fn from(s: &str) -> Self {
        Self::Raw(Value::from(s))
    }
}

impl From<String> for FieldInput {
    fn from(s: String) -> Self {
        Self::Raw(Value::from(s))
    }
}

impl From<bool> for FieldInput {
    fn from(b: bool) -> Self {
        Self::Raw(Value::Bool(b))
    }
}

impl From<i64> for FieldInput {
    fn from(n: i64) -> Self {
        Self::Raw(Value::Int(n))
    }
}

impl From<f64> for FieldInput {
    fn from(n: f64) -> Self {
        Self::Raw(Value::Float(n))
    }
}

impl From<LocalizedText> for FieldInput {
    fn from(text: LocalizedText) -> Self {
        Self::Typed(TypedValue::Text(text))
    }
}

impl From<NaiveDate> for FieldInput {
    fn from(date: NaiveDate) -> Self {
        Self::Typed(TypedValue::Date(date))
    }
}

impl From<Relationship> for FieldInput {
    fn from(rel: Relationship) -> Self {
        Self::Typed(TypedValue::Relationship(rel))
    }
}

/// A relationship held in one field of a storage unit.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldRelationship {
    /// The field holding the relationship.
    pub field: FieldId,
    /// Position within the field's payload.
    pub slot: usize,
    /// The relationship.
    pub relationship: Relationship,
}

/// The materialized content of a [`PseudoValue`].
#[derive(Debug)]
pub enum NodeValue {
    /// A decoded field value.
    Scalar(TypedValue),
    /// The children of a grouping field.
    Group(GroupingNode),
}

/// Lazy value node for one field.
pub struct PseudoValue {
    field: Arc<FieldSchema>,
    codec: Arc<dyn Codec>,
    language: Arc<str>,
    unit: Option<UnitRef>,
    parent: Option<UnitRef>,
    initial: Option<Value>,
    value: Option<NodeValue>,
    accessed: bool,
    assigned: bool,
}

impl PseudoValue {
    /// Creates a node with no backing unit.
    #[must_use]
    pub fn new(field: Arc<FieldSchema>, codec: Arc<dyn Codec>, language: Arc<str>) -> Self {
        Self {
            field,
            codec,
            language,
            unit: None,
            parent: None,
            initial: None,
            value: None,
            accessed: false,
            assigned: false,
        }
    }

    /// Sets the backing unit.
    #[must_use]
    pub fn with_unit(mut self, unit: UnitRef) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the parent unit used when a backing unit has to be created.
    #[must_use]
    pub fn with_parent(mut self, parent: Option<UnitRef>) -> Self {
        self.parent = parent;
        self
    }

    /// Sets a payload value that takes priority over the unit's payload.
    #[must_use]
    pub fn with_initial(mut self, raw: Value) -> Self {
        self.initial = Some(raw);
        self
    }

    /// Returns the field schema.
    #[must_use]
    pub fn field(&self) -> &Arc<FieldSchema> {
        &self.field
    }

    /// Returns the backing unit, if one exists.
    #[must_use]
    pub fn unit(&self) -> Option<&UnitRef> {
        self.unit.as_ref()
    }

    /// Returns the unit this node's unit hangs below.
    #[must_use]
    pub fn parent_unit(&self) -> Option<&UnitRef> {
        match &self.unit {
            Some(unit) => unit.parent(),
            None => self.parent.as_ref(),
        }
    }

    /// Returns true once the value was read or written this session.
    #[must_use]
    pub fn is_accessed(&self) -> bool {
        self.accessed
    }

    /// Returns true once the value was set or cleared this session.
    #[must_use]
    pub fn is_assigned(&self) -> bool {
        self.assigned
    }

    /// Returns true if the value has been materialized.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.value.is_some()
    }

    /// Returns the materialized value without loading it.
    #[must_use]
    pub fn loaded(&self) -> Option<&NodeValue> {
        self.value.as_ref()
    }

    fn decode_context(&self) -> DecodeContext<'_> {
        DecodeContext {
            language: &self.language,
            field: &self.field,
        }
    }

    /// Decodes the value from the explicit initial value or the unit's payload.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the value is already materialized, or
    /// the codec's error.
    pub fn materialize(&mut self) -> Result<()> {
        if self.value.is_some() {
            return Err(Error::invariant(format!(
                "{} is already materialized",
                self.field.alias
            )));
        }
        let value = if self.field.datatype.is_grouping() {
            NodeValue::Group(GroupingNode::new(Arc::clone(&self.field), self.unit.clone()))
        } else {
            let raw = self
                .initial
                .clone()
                .or_else(|| self.unit.as_ref().and_then(|u| u.value(self.field.id)))
                .unwrap_or(Value::Nil);
            let decoded = self.codec.decode(&raw, &self.decode_context())?;
            NodeValue::Scalar(decoded.value)
        };
        self.value = Some(value);
        Ok(())
    }

    /// Returns the materialized node value, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns the codec's error if decoding fails.
    pub fn node(&mut self) -> Result<&mut NodeValue> {
        if self.value.is_none() {
            self.materialize()?;
        }
        self.accessed = true;
        self.value
            .as_mut()
            .ok_or_else(|| Error::invariant(format!("{} failed to load", self.field.alias)))
    }

    /// Returns the decoded value, loading it on first use.
    ///
    /// Repeated calls return the same cached value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` for grouping fields, or the codec's error.
    pub fn get(&mut self) -> Result<&TypedValue> {
        let alias = Arc::clone(&self.field.alias);
        match self.node()? {
            NodeValue::Scalar(value) => Ok(value),
            NodeValue::Group(_) => Err(grouping_has_no_value(&alias)),
        }
    }

    /// Returns the grouping node of a grouping field.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if the field is not a grouping field.
    pub fn group_mut(&mut self) -> Result<&mut GroupingNode> {
        let field = Arc::clone(&self.field);
        match self.node()? {
            NodeValue::Group(group) => Ok(group),
            NodeValue::Scalar(_) => Err(Error::invalid_value(
                field.datatype.tag(),
                format!("{} has no fields of its own", field.alias),
            )),
        }
    }

    /// Assigns a value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` for grouping fields, or the codec's error if
    /// the value cannot be decoded or encoded.
    pub fn set(&mut self, input: impl Into<FieldInput>) -> Result<()> {
        if self.field.datatype.is_grouping() {
            return Err(grouping_has_no_value(&self.field.alias));
        }
        let value = match input.into() {
            FieldInput::Typed(value) => value,
            FieldInput::Raw(raw) => self.codec.decode(&raw, &self.decode_context())?.value,
        };
        self.codec.encode(&value, &self.decode_context())?;
        self.value = Some(NodeValue::Scalar(value));
        self.accessed = true;
        self.assigned = true;
        Ok(())
    }

    /// Returns the backing unit, creating an empty one if none exists.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the field belongs to no group.
    pub fn ensure_unit(&mut self) -> Result<&UnitRef> {
        if self.unit.is_none() {
            let group = self.field.group.ok_or_else(|| {
                Error::invariant(format!("{} is not stored in any group", self.field.alias))
            })?;
            self.unit = Some(UnitRef::new(group, self.parent.clone()));
        }
        self.unit
            .as_ref()
            .ok_or_else(|| Error::invariant(format!("{} has no unit", self.field.alias)))
    }

    /// Writes the decoded value back into the unit's payload.
    ///
    /// Returns the relationships the encoded value contains. Grouping
    /// fields and values that were never loaded write nothing.
    ///
    /// # Errors
    ///
    /// Returns the codec's error if encoding fails.
    pub fn flush(&mut self) -> Result<Vec<FieldRelationship>> {
        let Some(NodeValue::Scalar(value)) = &self.value else {
            return Ok(Vec::new());
        };
        let encoded = self.codec.encode(value, &self.decode_context())?;
        let field = self.field.id;
        let raw = (!encoded.raw.is_nil()).then_some(encoded.raw);
        self.ensure_unit()?.write(field, raw);
        Ok(encoded
            .relationships
            .into_iter()
            .map(|side| FieldRelationship {
                field,
                slot: side.slot,
                relationship: side.relationship,
            })
            .collect())
    }

    /// Unsets the value and removes the field from the unit's payload.
    pub fn clear(&mut self) {
        self.value = None;
        self.initial = None;
        self.accessed = true;
        self.assigned = true;
        if let Some(unit) = &self.unit {
            unit.write(self.field.id, None);
        }
    }

    /// Returns true if the value is truthy. Grouping fields are truthy when
    /// their unit holds data.
    ///
    /// # Errors
    ///
    /// Returns the codec's error if decoding fails.
    pub fn is_truthy(&mut self) -> Result<bool> {
        if self.field.datatype.is_grouping() {
            return Ok(self.unit.as_ref().is_some_and(|unit| !unit.is_empty()));
        }
        Ok(self.get()?.is_truthy())
    }
}

impl std::fmt::Debug for PseudoValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PseudoValue")
            .field("field", &self.field.alias)
            .field("unit", &self.unit)
            .field("value", &self.value)
            .field("accessed", &self.accessed)
            .field("assigned", &self.assigned)
            .finish_non_exhaustive()
    }
}

fn grouping_has_no_value(alias: &str) -> Error {
    Error::invalid_value("semantic", format!("{alias} groups other fields and has no value"))
}

/// Items of a `cardinality=many` group.
///
/// All items hang below the same parent unit. Removing an item whose unit
/// was persisted records it as a ghost, to be deleted on save.
pub struct PseudoList {
    field: Arc<FieldSchema>,
    codec: Arc<dyn Codec>,
    language: Arc<str>,
    parent: Option<UnitRef>,
    items: Vec<PseudoValue>,
    ghosts: Vec<UnitRef>,
}

impl PseudoList {
    /// Creates an empty list whose items hang below `parent`.
    #[must_use]
    pub fn new(
        field: Arc<FieldSchema>,
        codec: Arc<dyn Codec>,
        language: Arc<str>,
        parent: Option<UnitRef>,
    ) -> Self {
        Self {
            field,
            codec,
            language,
            parent,
            items: Vec::new(),
            ghosts: Vec::new(),
        }
    }

    /// Returns the group root field.
    #[must_use]
    pub fn field(&self) -> &Arc<FieldSchema> {
        &self.field
    }

    /// Returns the parent unit of every item.
    #[must_use]
    pub fn parent(&self) -> Option<&UnitRef> {
        self.parent.as_ref()
    }

    /// Creates an item backed by a new, empty unit, without adding it.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the field belongs to no group.
    pub fn new_item(&self) -> Result<PseudoValue> {
        let group = self.field.group.ok_or_else(|| {
            Error::invariant(format!("{} is not stored in any group", self.field.alias))
        })?;
        Ok(self.item_for(UnitRef::new(group, self.parent.clone())))
    }

    /// Creates an item over an existing unit, without adding it.
    #[must_use]
    pub fn item_for(&self, unit: UnitRef) -> PseudoValue {
        PseudoValue::new(
            Arc::clone(&self.field),
            Arc::clone(&self.codec),
            Arc::clone(&self.language),
        )
        .with_parent(self.parent.clone())
        .with_unit(unit)
    }

    fn check(&self, item: &PseudoValue) -> Result<()> {
        if item.field.id != self.field.id {
            return Err(Error::invariant(format!(
                "{} item added to the {} list",
                item.field.alias, self.field.alias
            )));
        }
        if !UnitRef::same_chain(item.parent_unit(), self.parent.as_ref()) {
            return Err(Error::invariant(format!(
                "{} item hangs below a different parent unit than its list",
                self.field.alias
            )));
        }
        Ok(())
    }

    fn unghost(&mut self, item: &PseudoValue) {
        if let Some(unit) = item.unit() {
            self.ghosts.retain(|ghost| !UnitRef::ptr_eq(ghost, unit));
        }
    }

    fn ghost(&mut self, item: &PseudoValue) {
        let Some(unit) = item.unit() else {
            return;
        };
        if unit.id().is_some() && !self.ghosts.iter().any(|g| UnitRef::ptr_eq(g, unit)) {
            self.ghosts.push(unit.clone());
        }
    }

    /// Appends an item.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the item belongs to another field or
    /// hangs below a different parent unit.
    pub fn append(&mut self, item: PseudoValue) -> Result<()> {
        self.check(&item)?;
        self.unghost(&item);
        self.items.push(item);
        Ok(())
    }

    /// Appends a new, empty item and returns it.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the field belongs to no group.
    pub fn append_new(&mut self) -> Result<&mut PseudoValue> {
        let item = self.new_item()?;
        self.items.push(item);
        let last = self.items.len() - 1;
        Ok(&mut self.items[last])
    }

    /// Inserts an item at `index`.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` as for [`PseudoList::append`], or
    /// `InvalidValue` if `index` is past the end.
    pub fn insert(&mut self, index: usize, item: PseudoValue) -> Result<()> {
        if index > self.items.len() {
            return Err(out_of_range(&self.field.alias, index, self.items.len()));
        }
        self.check(&item)?;
        self.unghost(&item);
        self.items.insert(index, item);
        Ok(())
    }

    /// Removes and returns the item at `index`.
    pub fn remove(&mut self, index: usize) -> Option<PseudoValue> {
        if index >= self.items.len() {
            return None;
        }
        let item = self.items.remove(index);
        self.ghost(&item);
        Some(item)
    }

    /// Removes and returns the last item.
    pub fn pop(&mut self) -> Option<PseudoValue> {
        let item = self.items.pop()?;
        self.ghost(&item);
        Some(item)
    }

    /// Removes every item.
    pub fn clear(&mut self) {
        for item in std::mem::take(&mut self.items) {
            self.ghost(&item);
        }
    }

    /// Returns the units of removed, persisted items.
    #[must_use]
    pub fn ghosts(&self) -> &[UnitRef] {
        &self.ghosts
    }

    /// Returns and forgets the units of removed, persisted items.
    pub fn drain_ghosts(&mut self) -> Vec<UnitRef> {
        std::mem::take(&mut self.ghosts)
    }

    /// Returns the number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if there are no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the item at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&PseudoValue> {
        self.items.get(index)
    }

    /// Returns the item at `index` mutably.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut PseudoValue> {
        self.items.get_mut(index)
    }

    /// Iterates over the items.
    pub fn iter(&self) -> impl Iterator<Item = &PseudoValue> {
        self.items.iter()
    }

    /// Iterates over the items mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PseudoValue> {
        self.items.iter_mut()
    }
}

impl std::fmt::Debug for PseudoList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PseudoList")
            .field("field", &self.field.alias)
            .field("items", &self.items)
            .field("ghosts", &self.ghosts.len())
            .finish_non_exhaustive()
    }
}

pub(crate) fn out_of_range(alias: &str, index: usize, len: usize) -> Error {
    Error::invalid_value("list", format!("{alias}[{index}] is out of range for {len} items"))
}

/// Placeholder for a field in a group the caller may not read.
///
/// Evaluates as empty. Reading, writing or flushing it fails.
#[derive(Clone, Debug)]
pub struct Unavailable {
    field: Arc<FieldSchema>,
    group: GroupId,
}

impl Unavailable {
    /// Creates a placeholder for `field` in `group`.
    #[must_use]
    pub fn new(field: Arc<FieldSchema>, group: GroupId) -> Self {
        Self { field, group }
    }

    /// Returns the field schema.
    #[must_use]
    pub fn field(&self) -> &Arc<FieldSchema> {
        &self.field
    }

    /// Returns the unreadable group.
    #[must_use]
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Returns the permission error for this field.
    #[must_use]
    pub fn denied(&self) -> Error {
        Error::permission_denied(self.group, Access::Read).in_frame(self.field.alias.as_ref())
    }

    /// Always fails.
    ///
    /// # Errors
    ///
    /// Always returns `PermissionDenied`.
    pub fn get(&self) -> Result<&TypedValue> {
        Err(self.denied())
    }

    /// Always fails.
    ///
    /// # Errors
    ///
    /// Always returns `PermissionDenied`.
    pub fn set(&self, _input: impl Into<FieldInput>) -> Result<()> {
        Err(self.denied())
    }

    /// Always fails.
    ///
    /// # Errors
    ///
    /// Always returns `PermissionDenied`.
    pub fn flush(&self) -> Result<Vec<FieldRelationship>> {
        Err(self.denied())
    }

    /// Always false.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        false
    }
}

/// One field's node: a value, a list, or an unreadable placeholder.
#[derive(Debug)]
pub enum PseudoNode {
    /// A single value.
    Value(PseudoValue),
    /// Items of a `cardinality=many` group.
    List(PseudoList),
    /// A field the caller may not read.
    Unavailable(Unavailable),
}

impl PseudoNode {
    /// Returns the field schema.
    #[must_use]
    pub fn field(&self) -> &Arc<FieldSchema> {
        match self {
            Self::Value(value) => value.field(),
            Self::List(list) => list.field(),
            Self::Unavailable(unavailable) => unavailable.field(),
        }
    }

    /// Returns true for an unreadable placeholder.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Returns the value node, if this is one.
    pub fn as_value_mut(&mut self) -> Option<&mut PseudoValue> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the list node, if this is one.
    pub fn as_list_mut(&mut self) -> Option<&mut PseudoList> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    /// Returns true if the node holds data. Unavailable nodes are falsy.
    ///
    /// # Errors
    ///
    /// Returns the codec's error if a value fails to decode.
    pub fn is_truthy(&mut self) -> Result<bool> {
        match self {
            Self::Value(value) => value.is_truthy(),
            Self::List(list) => Ok(!list.is_empty()),
            Self::Unavailable(unavailable) => Ok(unavailable.is_truthy()),
        }
    }
}
