//! Grouping nodes: the children of a semantic field.

use std::collections::BTreeMap;
use std::sync::Arc;

use strata_foundation::{Error, Result};
use strata_storage::FieldSchema;

use crate::codec::TypedValue;
use crate::node::{FieldInput, PseudoNode};
use crate::unit_ref::UnitRef;

/// Builds child nodes on demand.
pub trait NodeFactory {
    /// Builds the node for child `alias` of `parent`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` if `alias` is not a child of the parent field,
    /// or an error from loading the child's units.
    fn make_child(&mut self, parent: &GroupingNode, alias: &str) -> Result<PseudoNode>;
}

/// Children of a grouping field, keyed by alias and built lazily.
///
/// A grouping node is bound to the unit of the group instance it belongs
/// to. Children in the same group share that unit. Children rooting another
/// group get their own units.
pub struct GroupingNode {
    field: Arc<FieldSchema>,
    unit: Option<UnitRef>,
    children: BTreeMap<Arc<str>, PseudoNode>,
}

impl GroupingNode {
    /// Creates a grouping node with no children built yet.
    #[must_use]
    pub fn new(field: Arc<FieldSchema>, unit: Option<UnitRef>) -> Self {
        Self {
            field,
            unit,
            children: BTreeMap::new(),
        }
    }

    /// Returns the grouping field.
    #[must_use]
    pub fn field(&self) -> &Arc<FieldSchema> {
        &self.field
    }

    /// Returns the unit this node belongs to.
    #[must_use]
    pub fn unit(&self) -> Option<&UnitRef> {
        self.unit.as_ref()
    }

    /// Returns an already built child.
    #[must_use]
    pub fn child(&self, alias: &str) -> Option<&PseudoNode> {
        self.children.get(alias)
    }

    /// Returns a child, building it through `factory` on first access.
    ///
    /// # Errors
    ///
    /// Returns the factory's error.
    pub fn child_mut(
        &mut self,
        alias: &str,
        factory: &mut dyn NodeFactory,
    ) -> Result<&mut PseudoNode> {
        if !self.children.contains_key(alias) {
            let node = factory.make_child(self, alias)?;
            self.children.insert(Arc::from(alias), node);
        }
        self.children
            .get_mut(alias)
            .ok_or_else(|| Error::invariant(format!("{alias} vanished from {}", self.field.alias)))
    }

    /// Returns the value of a child field.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` for unreadable children, `InvalidValue`
    /// for list children, or the factory's or codec's error.
    pub fn get(&mut self, alias: &str, factory: &mut dyn NodeFactory) -> Result<TypedValue> {
        match self.child_mut(alias, factory)? {
            PseudoNode::Value(value) => value.get().cloned(),
            PseudoNode::List(_) => Err(holds_a_list(alias)),
            PseudoNode::Unavailable(unavailable) => Err(unavailable.denied()),
        }
    }

    /// Assigns the value of a child field.
    ///
    /// # Errors
    ///
    /// As for [`GroupingNode::get`].
    pub fn set(
        &mut self,
        alias: &str,
        input: impl Into<FieldInput>,
        factory: &mut dyn NodeFactory,
    ) -> Result<()> {
        match self.child_mut(alias, factory)? {
            PseudoNode::Value(value) => value.set(input),
            PseudoNode::List(_) => Err(holds_a_list(alias)),
            PseudoNode::Unavailable(unavailable) => unavailable.set(input),
        }
    }

    /// Iterates over built children in alias order.
    ///
    /// With `direct`, yields only value children stored in this node's own
    /// unit, skipping lists, placeholders and children rooting other groups.
    pub fn children(&self, direct: bool) -> impl Iterator<Item = (&str, &PseudoNode)> {
        self.children
            .iter()
            .filter(move |(_, node)| !direct || self.is_direct(node))
            .map(|(alias, node)| (alias.as_ref(), node))
    }

    /// Iterates mutably over built children in alias order.
    pub fn children_mut(&mut self) -> impl Iterator<Item = (&str, &mut PseudoNode)> {
        self.children
            .iter_mut()
            .map(|(alias, node)| (alias.as_ref(), node))
    }

    /// Returns the number of built children.
    #[must_use]
    pub fn built(&self) -> usize {
        self.children.len()
    }

    fn is_direct(&self, node: &PseudoNode) -> bool {
        match node {
            PseudoNode::Value(value) => UnitRef::same(value.unit(), self.unit.as_ref()),
            _ => false,
        }
    }
}

impl std::fmt::Debug for GroupingNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupingNode")
            .field("field", &self.field.alias)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

fn holds_a_list(alias: &str) -> Error {
    Error::invalid_value("list", format!("{alias} holds a list; address one of its items"))
}
