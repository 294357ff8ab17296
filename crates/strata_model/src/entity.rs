//! The caller-facing entity surface.
//!
//! An [`Entity`] owns the node tree and value cache of one entity. Fields
//! are addressed by alias through a [`Cursor`], or by dotted path such as
//! `"name.0.full_name"` where numeric segments index lists.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use strata_foundation::{EntityId, Error, ErrorContext, ErrorKind, Result};
use strata_storage::EntitySchema;
use tracing::{debug, info};

use crate::access::GroupPermissions;
use crate::cache::ValueCache;
use crate::codec::TypedValue;
use crate::context::ModelContext;
use crate::grouping::{GroupingNode, NodeFactory};
use crate::node::{FieldInput, PseudoList, PseudoNode, PseudoValue, Unavailable, out_of_range};
use crate::reconcile::{WritePlan, reconcile, settle};
use crate::resolve::resolve;
use crate::unit_ref::UnitRef;

/// Shared, mutable handle to an entity, used by relationships.
pub type EntityHandle = Rc<RefCell<Entity>>;

/// What a save did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Units inserted or updated.
    pub written: usize,
    /// Persisted units left unchanged.
    pub passed_through: usize,
    /// Units deleted.
    pub deleted: usize,
    /// Cross-references created.
    pub cross_references_created: usize,
    /// Cross-references found and reused.
    pub cross_references_reused: usize,
}

/// One entity: its id, schema, loaded units and node tree.
pub struct Entity {
    ctx: ModelContext,
    schema: Arc<EntitySchema>,
    id: Option<EntityId>,
    cache: ValueCache,
    root: GroupingNode,
    permissions: Arc<GroupPermissions>,
}

impl Entity {
    fn open(ctx: &ModelContext, entity_type: &str, id: Option<EntityId>) -> Result<Self> {
        let schema = ctx.schemas().get(entity_type)?;
        let permissions = ctx.guard().permitted(ctx.security(), entity_type)?;
        let root = GroupingNode::new(Arc::clone(schema.root_field()), None);
        Ok(Self {
            ctx: ctx.clone(),
            schema,
            id,
            cache: ValueCache::new(),
            root,
            permissions,
        })
    }

    /// Creates a new, unsaved entity.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` if the schema provider does not know the
    /// type, or the permission backend's error.
    pub fn create(ctx: &ModelContext, entity_type: &str) -> Result<Self> {
        let entity = Self::open(ctx, entity_type, None)?;
        debug!(entity_type, "created entity");
        Ok(entity)
    }

    /// Opens a persisted entity.
    ///
    /// Units are loaded per group on first access, or all at once when the
    /// configuration asks for eager loading.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the store does not know the id.
    pub fn load(ctx: &ModelContext, id: EntityId) -> Result<Self> {
        let entity_type = ctx.store().entity_type(id)?;
        let mut entity = Self::open(ctx, &entity_type, Some(id))?;
        if ctx.config().eager_load {
            let units = ctx.store().load_units(id, None)?;
            entity
                .cache
                .populate(&entity.schema, units)
                .map_err(|err| entity.annotate(err))?;
        }
        debug!(%id, entity_type, eager = ctx.config().eager_load, "loaded entity");
        Ok(entity)
    }

    /// Wraps the entity in a shared handle.
    #[must_use]
    pub fn into_handle(self) -> EntityHandle {
        Rc::new(RefCell::new(self))
    }

    /// Returns the id, once the entity has been saved.
    #[must_use]
    pub fn id(&self) -> Option<EntityId> {
        self.id
    }

    /// Returns the entity type name.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        self.schema.entity_type()
    }

    /// Returns the schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    /// Returns the caller's permissions on this entity type.
    #[must_use]
    pub fn permissions(&self) -> &GroupPermissions {
        &self.permissions
    }

    /// Returns the context the entity was opened with.
    #[must_use]
    pub fn context(&self) -> &ModelContext {
        &self.ctx
    }

    fn annotate(&self, err: Error) -> Error {
        annotate(err, self.schema.entity_type(), self.id)
    }

    /// Returns a cursor on a top-level field.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` if `alias` is not a top-level field, or an
    /// error from loading its group.
    pub fn field(&mut self, alias: &str) -> Result<Cursor<'_>> {
        let mut scope = Scope {
            ctx: &self.ctx,
            schema: &self.schema,
            cache: &mut self.cache,
            entity: self.id,
            permissions: &self.permissions,
        };
        match self.root.child_mut(alias, &mut scope) {
            Ok(node) => Ok(Cursor::new(node, scope)),
            Err(err) => Err(scope.annotate(err)),
        }
    }

    /// Returns a cursor on the node at a dotted path.
    ///
    /// # Errors
    ///
    /// Returns the first error met while walking the path.
    pub fn cursor(&mut self, path: &str) -> Result<Cursor<'_>> {
        let mut segments = path.split('.');
        let first = segments.next().unwrap_or_default();
        let mut cursor = self.field(first)?;
        for segment in segments {
            cursor = match segment.parse::<usize>() {
                Ok(index) => cursor.item(index)?,
                Err(_) => cursor.field(segment)?,
            };
        }
        Ok(cursor)
    }

    /// Returns the value at a dotted path.
    ///
    /// # Errors
    ///
    /// As for [`Entity::cursor`] and [`Cursor::get`].
    pub fn get(&mut self, path: &str) -> Result<TypedValue> {
        self.cursor(path)?.get()
    }

    /// Assigns the value at a dotted path.
    ///
    /// # Errors
    ///
    /// As for [`Entity::cursor`] and [`Cursor::set`].
    pub fn set(&mut self, path: &str, value: impl Into<FieldInput>) -> Result<()> {
        self.cursor(path)?.set(value)
    }

    /// Plans the write-back of the current tree without touching the store.
    ///
    /// Accessed values are flushed into their units.
    ///
    /// # Errors
    ///
    /// As for [`reconcile`].
    pub fn reconcile(&mut self) -> Result<WritePlan> {
        let policy = self.ctx.config().write_policy;
        reconcile(&mut self.root, &self.schema, &self.permissions, policy)
            .map_err(|err| self.annotate(err))
    }

    /// Writes the tree back to the store.
    ///
    /// A new entity gets its id first. Changed and new units are persisted
    /// in one batch, removed list items are deleted, and relationships get
    /// their cross-references.
    ///
    /// A permission or invariant failure leaves the store untouched. A
    /// relationship failure happens after the units are written.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `InvariantViolation`,
    /// `RelationshipResolution`, a codec error or the store's error.
    pub fn save(&mut self) -> Result<SaveReport> {
        self.save_inner().map_err(|err| self.annotate(err))
    }

    fn save_inner(&mut self) -> Result<SaveReport> {
        let policy = self.ctx.config().write_policy;
        let plan = reconcile(&mut self.root, &self.schema, &self.permissions, policy)?;
        let store = self.ctx.store();

        let entity = match self.id {
            Some(id) => id,
            None => {
                let id = store.create_entity(self.schema.entity_type())?;
                self.id = Some(id);
                id
            }
        };

        let batch = plan.batch(entity)?;
        if !batch.is_empty() {
            let ids = store.persist_units(&batch)?;
            for (planned, id) in plan.planned().zip(ids) {
                planned.handle.mark_persisted(id, entity);
            }
        }
        if !plan.deletions.is_empty() {
            store.delete_units(&plan.deletions)?;
        }
        settle(&mut self.root);

        let resolution = resolve(&self.ctx, &self.schema, entity, &plan.relationships)?;

        let report = SaveReport {
            written: batch.len(),
            passed_through: plan.passed_through.len(),
            deleted: plan.deletions.len(),
            cross_references_created: resolution.created,
            cross_references_reused: resolution.reused,
        };
        info!(
            %entity,
            entity_type = self.schema.entity_type(),
            written = report.written,
            deleted = report.deleted,
            "saved entity"
        );
        Ok(report)
    }

    /// Forgets every loaded unit and node, so the next access reads the
    /// store again. Unsaved changes are lost.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.root = GroupingNode::new(Arc::clone(self.schema.root_field()), None);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("entity_type", &self.schema.entity_type())
            .field("id", &self.id)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

fn annotate(mut err: Error, entity_type: &str, id: Option<EntityId>) -> Error {
    let context = err.context.get_or_insert_with(ErrorContext::default);
    if context.entity_type.is_none() {
        context.entity_type = Some(entity_type.to_string());
    }
    if context.entity.is_none() {
        context.entity = id;
    }
    err
}

/// Builds child nodes for one entity.
struct Scope<'a> {
    ctx: &'a ModelContext,
    schema: &'a EntitySchema,
    cache: &'a mut ValueCache,
    entity: Option<EntityId>,
    permissions: &'a GroupPermissions,
}

impl Scope<'_> {
    fn annotate(&self, err: Error) -> Error {
        annotate(err, self.schema.entity_type(), self.entity)
    }
}

impl NodeFactory for Scope<'_> {
    fn make_child(&mut self, parent: &GroupingNode, alias: &str) -> Result<PseudoNode> {
        let schema = self.schema;
        let field = Arc::clone(schema.field_by_alias(alias)?);
        if !schema.is_child(parent.field().id, field.id) {
            return Err(Error::unknown_field(schema.entity_type(), alias)
                .in_frame(parent.field().alias.as_ref()));
        }
        if schema.is_nested_grouping(field.id) {
            return Err(Error::invariant(format!(
                "{alias} nests more than one grouping level"
            )));
        }

        let codec = self.ctx.codecs().get(&field.datatype)?;
        let language = Arc::clone(&self.ctx.config().default_language);
        let Some(group_id) = field.group else {
            let node = PseudoValue::new(field, codec, language).with_parent(parent.unit().cloned());
            return Ok(PseudoNode::Value(node));
        };
        if !self.permissions.can_read(group_id) {
            debug!(alias, group = %group_id, "field is not readable");
            return Ok(PseudoNode::Unavailable(Unavailable::new(field, group_id)));
        }

        let Some(group) = schema.group_rooted_at(field.id) else {
            let unit = parent
                .unit()
                .filter(|unit| unit.group() == group_id)
                .ok_or_else(|| {
                    Error::invariant(format!(
                        "{alias} is not stored with its parent {}",
                        parent.field().alias
                    ))
                })?;
            let node = PseudoValue::new(field, codec, language)
                .with_parent(unit.parent().cloned())
                .with_unit(unit.clone());
            return Ok(PseudoNode::Value(node));
        };

        let units: Vec<UnitRef> = self
            .cache
            .get(self.ctx.store(), schema, self.entity, group)?
            .into_iter()
            .filter(|unit| UnitRef::same(unit.parent(), parent.unit()))
            .collect();

        if group.is_many() {
            let mut list = PseudoList::new(field, codec, language, parent.unit().cloned());
            for unit in units {
                let item = list.item_for(unit);
                list.append(item)?;
            }
            return Ok(PseudoNode::List(list));
        }

        let unit = match units.as_slice() {
            [] => UnitRef::new(group.id, parent.unit().cloned()),
            [unit] => unit.clone(),
            more => {
                return Err(Error::invariant(format!(
                    "{alias} stores one unit but {} were found",
                    more.len()
                )));
            }
        };
        let node = PseudoValue::new(field, codec, language)
            .with_parent(parent.unit().cloned())
            .with_unit(unit);
        Ok(PseudoNode::Value(node))
    }
}

enum Slot<'a> {
    Value(&'a mut PseudoValue),
    List(&'a mut PseudoList),
    Unavailable(&'a Unavailable),
}

/// A position in an entity's node tree.
///
/// Navigating consumes the cursor and returns one positioned on the child.
pub struct Cursor<'a> {
    slot: Slot<'a>,
    scope: Scope<'a>,
}

impl<'a> Cursor<'a> {
    fn new(node: &'a mut PseudoNode, scope: Scope<'a>) -> Self {
        let slot = match node {
            PseudoNode::Value(value) => Slot::Value(value),
            PseudoNode::List(list) => Slot::List(list),
            PseudoNode::Unavailable(unavailable) => Slot::Unavailable(unavailable),
        };
        Self { slot, scope }
    }

    fn alias(&self) -> &str {
        match &self.slot {
            Slot::Value(value) => value.field().alias.as_ref(),
            Slot::List(list) => list.field().alias.as_ref(),
            Slot::Unavailable(unavailable) => unavailable.field().alias.as_ref(),
        }
    }

    fn not_a_list(&self) -> Error {
        match &self.slot {
            Slot::Unavailable(unavailable) => self.scope.annotate(unavailable.denied()),
            _ => self.scope.annotate(Error::invalid_value(
                "list",
                format!("{} is not a list", self.alias()),
            )),
        }
    }

    /// Moves to a child of a grouping field.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` on a list, `PermissionDenied` on an
    /// unreadable field, `InvalidValue` on a non-grouping field, or
    /// `UnknownField` if `alias` is not a child.
    pub fn field(self, alias: &str) -> Result<Cursor<'a>> {
        let Cursor { slot, mut scope } = self;
        let group = match slot {
            Slot::Value(value) => value.group_mut().map_err(|err| scope.annotate(err))?,
            Slot::List(list) => {
                return Err(scope.annotate(Error::invariant(format!(
                    "{} is a list; select an item before addressing {alias}",
                    list.field().alias
                ))));
            }
            Slot::Unavailable(unavailable) => return Err(scope.annotate(unavailable.denied())),
        };
        match group.child_mut(alias, &mut scope) {
            Ok(node) => Ok(Cursor::new(node, scope)),
            Err(err) => Err(scope.annotate(err)),
        }
    }

    /// Moves to a list item.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if the index is out of range or the field is
    /// not a list.
    pub fn item(self, index: usize) -> Result<Cursor<'a>> {
        let Cursor { slot, scope } = self;
        let list = match slot {
            Slot::List(list) => list,
            slot => return Err(Cursor { slot, scope }.not_a_list()),
        };
        let len = list.len();
        let alias = Arc::clone(&list.field().alias);
        match list.get_mut(index) {
            Some(item) => Ok(Cursor {
                slot: Slot::Value(item),
                scope,
            }),
            None => Err(scope.annotate(out_of_range(&alias, index, len))),
        }
    }

    /// Appends a new item to a list and moves to it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if the field is not a list.
    pub fn append(self) -> Result<Cursor<'a>> {
        let Cursor { slot, scope } = self;
        let list = match slot {
            Slot::List(list) => list,
            slot => return Err(Cursor { slot, scope }.not_a_list()),
        };
        match list.append_new() {
            Ok(item) => Ok(Cursor {
                slot: Slot::Value(item),
                scope,
            }),
            Err(err) => Err(scope.annotate(err)),
        }
    }

    fn list(&mut self) -> Result<&mut PseudoList> {
        if !matches!(self.slot, Slot::List(_)) {
            return Err(self.not_a_list());
        }
        match &mut self.slot {
            Slot::List(list) => Ok(&mut **list),
            _ => Err(Error::new(ErrorKind::Internal("cursor moved off its list".into()))),
        }
    }

    /// Removes a list item.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if the index is out of range or the field is
    /// not a list.
    pub fn remove(&mut self, index: usize) -> Result<()> {
        let list = self.list()?;
        let len = list.len();
        if list.remove(index).is_some() {
            return Ok(());
        }
        let err = out_of_range(self.alias(), index, len);
        Err(self.scope.annotate(err))
    }

    /// Removes the last list item, returning false if the list was empty.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if the field is not a list.
    pub fn pop(&mut self) -> Result<bool> {
        Ok(self.list()?.pop().is_some())
    }

    /// Returns the number of list items.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if the field is not a list.
    pub fn len(&mut self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    /// Returns true if the list has no items.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if the field is not a list.
    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.list()?.is_empty())
    }

    /// Clears a value, or removes every item of a list.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` on an unreadable field.
    pub fn clear(&mut self) -> Result<()> {
        match &mut self.slot {
            Slot::Value(value) => value.clear(),
            Slot::List(list) => list.clear(),
            Slot::Unavailable(unavailable) => return Err(self.scope.annotate(unavailable.denied())),
        }
        Ok(())
    }

    /// Returns the value, decoding it on first access.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` on an unreadable field, `InvalidValue` on
    /// a list or grouping field, or the codec's error.
    pub fn value(&mut self) -> Result<&TypedValue> {
        let scope = &self.scope;
        match &mut self.slot {
            Slot::Value(value) => value.get().map_err(|err| scope.annotate(err)),
            Slot::List(list) => Err(scope.annotate(Error::invalid_value(
                "list",
                format!("{} holds a list; address one of its items", list.field().alias),
            ))),
            Slot::Unavailable(unavailable) => Err(scope.annotate(unavailable.denied())),
        }
    }

    /// Returns a copy of the value.
    ///
    /// # Errors
    ///
    /// As for [`Cursor::value`].
    pub fn get(&mut self) -> Result<TypedValue> {
        self.value().cloned()
    }

    /// Assigns the value.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` on an unreadable field, `InvalidValue` on
    /// a list or grouping field, or the codec's error.
    pub fn set(&mut self, input: impl Into<FieldInput>) -> Result<()> {
        let scope = &self.scope;
        match &mut self.slot {
            Slot::Value(value) => value.set(input).map_err(|err| scope.annotate(err)),
            Slot::List(list) => Err(scope.annotate(Error::invalid_value(
                "list",
                format!("{} holds a list; append an item instead", list.field().alias),
            ))),
            Slot::Unavailable(unavailable) => Err(scope.annotate(unavailable.denied())),
        }
    }

    /// Returns true if the node holds data. Unreadable fields are false.
    ///
    /// # Errors
    ///
    /// Returns the codec's error if the value fails to decode.
    pub fn is_truthy(&mut self) -> Result<bool> {
        let scope = &self.scope;
        match &mut self.slot {
            Slot::Value(value) => value.is_truthy().map_err(|err| scope.annotate(err)),
            Slot::List(list) => Ok(!list.is_empty()),
            Slot::Unavailable(unavailable) => Ok(unavailable.is_truthy()),
        }
    }

    /// Returns true if the caller may not read this field.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self.slot, Slot::Unavailable(_))
    }
}

impl fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("field", &self.alias())
            .field("entity", &self.scope.entity)
            .finish_non_exhaustive()
    }
}
