//! Write-back planning.
//!
//! [`reconcile`] walks the materialized part of an entity's node tree,
//! flushes every accessed value into its unit, and decides per unit
//! whether it is written, passed through unchanged, or deleted. Nothing is
//! sent to the store here; the resulting [`WritePlan`] is executed by
//! [`crate::Entity::save`].

use std::collections::{BTreeMap, HashMap, HashSet};

use strata_foundation::{Access, EntityId, Error, FieldId, GroupId, Result, UnitId};
use strata_storage::{EntitySchema, StorageUnit, UnitLink};
use tracing::debug;

use crate::access::GroupPermissions;
use crate::config::WritePolicy;
use crate::grouping::GroupingNode;
use crate::node::{FieldRelationship, PseudoNode, PseudoValue};
use crate::relation::Relationship;
use crate::unit_ref::UnitRef;

/// Where a planned unit's parent comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlannedParent {
    /// The parent is already stored.
    Persisted(UnitId),
    /// The parent is written in the same plan.
    Pending {
        /// The parent's group.
        group: GroupId,
        /// Index within that group's planned units.
        position: usize,
    },
}

/// One unit to insert or update.
#[derive(Debug)]
pub struct PlannedUnit {
    /// The live handle, marked persisted once written.
    pub handle: UnitRef,
    /// The unit as flushed.
    pub unit: StorageUnit,
    /// The parent, for nested groups.
    pub parent: Option<PlannedParent>,
}

/// A relationship whose cross-reference is settled after the units are
/// written.
#[derive(Clone, Debug)]
pub struct PendingRelationship {
    /// Group of the unit holding the relationship.
    pub group: GroupId,
    /// Index within the group's planned units, `None` if the unit is not
    /// written.
    pub position: Option<usize>,
    /// The unit holding the relationship.
    pub unit: UnitRef,
    /// The field holding the relationship.
    pub field: FieldId,
    /// Position within the field's payload.
    pub slot: usize,
    /// The relationship.
    pub relationship: Relationship,
}

/// The outcome of reconciliation.
#[derive(Debug, Default)]
pub struct WritePlan {
    /// Units to write, per group, in tree order.
    pub units: BTreeMap<GroupId, Vec<PlannedUnit>>,
    /// Groups of `units`, parents before children.
    pub group_order: Vec<GroupId>,
    /// Relationships found in flushed values.
    pub relationships: Vec<PendingRelationship>,
    /// Units to delete, children before parents.
    pub deletions: Vec<UnitId>,
    /// Persisted units left as they are.
    pub passed_through: Vec<UnitRef>,
}

impl WritePlan {
    /// Returns the number of units to write.
    #[must_use]
    pub fn written(&self) -> usize {
        self.units.values().map(Vec::len).sum()
    }

    /// Returns true if the plan writes and deletes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.written() == 0 && self.deletions.is_empty()
    }

    /// Iterates over planned units in write order.
    pub fn planned(&self) -> impl Iterator<Item = &PlannedUnit> {
        self.group_order
            .iter()
            .filter_map(|group| self.units.get(group))
            .flatten()
    }

    /// Flattens the plan into one store batch for `entity`.
    ///
    /// Parents precede their children, and pending parents are linked by
    /// their index in the batch.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if a pending parent is not in the plan.
    pub fn batch(&self, entity: EntityId) -> Result<Vec<StorageUnit>> {
        let mut offsets = HashMap::new();
        let mut next = 0;
        for group in &self.group_order {
            offsets.insert(*group, next);
            next += self.units.get(group).map_or(0, Vec::len);
        }

        self.planned()
            .map(|planned| {
                let parent = match planned.parent {
                    None => None,
                    Some(PlannedParent::Persisted(id)) => Some(UnitLink::Persisted(id)),
                    Some(PlannedParent::Pending { group, position }) => {
                        let offset = offsets.get(&group).ok_or_else(|| {
                            Error::invariant(format!("parent {group} is not part of the write"))
                        })?;
                        Some(UnitLink::Pending(offset + position))
                    }
                };
                Ok(StorageUnit {
                    entity: Some(entity),
                    parent,
                    ..planned.unit.clone()
                })
            })
            .collect()
    }
}

struct Collected {
    unit: UnitRef,
    relationships: Vec<FieldRelationship>,
    assigned: bool,
}

#[derive(Default)]
struct Walk {
    collected: Vec<Collected>,
    index: HashMap<usize, usize>,
    ghosts: Vec<UnitRef>,
}

impl Walk {
    fn collect(&mut self, unit: &UnitRef, relationships: Vec<FieldRelationship>, assigned: bool) {
        match self.index.get(&unit.key()) {
            Some(&at) => {
                let entry = &mut self.collected[at];
                entry.relationships.extend(relationships);
                entry.assigned |= assigned;
            }
            None => {
                self.index.insert(unit.key(), self.collected.len());
                self.collected.push(Collected {
                    unit: unit.clone(),
                    relationships,
                    assigned,
                });
            }
        }
    }

    fn group(&mut self, node: &mut GroupingNode) -> Result<()> {
        let own = node.unit().cloned();
        for (_, child) in node.children_mut() {
            match child {
                PseudoNode::Unavailable(_) => {}
                PseudoNode::Value(value) => self.value(value, own.as_ref())?,
                PseudoNode::List(list) => {
                    for ghost in list.ghosts() {
                        let known = self.ghosts.iter().any(|g| UnitRef::ptr_eq(g, ghost));
                        if ghost.id().is_some() && !known {
                            self.ghosts.push(ghost.clone());
                        }
                    }
                    for item in list.iter_mut() {
                        self.value(item, own.as_ref())?;
                    }
                }
            }
        }
        Ok(())
    }

    fn value(&mut self, value: &mut PseudoValue, enclosing: Option<&UnitRef>) -> Result<()> {
        if !value.field().datatype.is_grouping() {
            if value.is_accessed() {
                let alias = value.field().alias.clone();
                let assigned = value.is_assigned();
                let relationships = value.flush().map_err(|err| err.in_frame(alias.as_ref()))?;
                if let Some(unit) = value.unit() {
                    self.collect(unit, relationships, assigned);
                }
            } else if let Some(unit) = value.unit() {
                self.collect(unit, Vec::new(), false);
            }
            return Ok(());
        }

        if let Some(unit) = value.unit().cloned() {
            check_nesting(value, &unit, enclosing)?;
            self.collect(&unit, Vec::new(), false);
        }
        if value.is_loaded() {
            let alias = value.field().alias.clone();
            self.group(value.group_mut()?)
                .map_err(|err| err.in_frame(alias.as_ref()))?;
        }
        Ok(())
    }
}

fn check_nesting(value: &PseudoValue, unit: &UnitRef, enclosing: Option<&UnitRef>) -> Result<()> {
    let same_group = enclosing.is_some_and(|e| e.group() == unit.group());
    let consistent = if same_group {
        UnitRef::same(Some(unit), enclosing)
    } else {
        UnitRef::same(unit.parent(), enclosing)
    };
    if consistent {
        Ok(())
    } else {
        Err(Error::invariant(format!(
            "{} is stored below a unit other than its enclosing group's",
            value.field().alias
        )))
    }
}

fn write_denied(schema: &EntitySchema, group: GroupId) -> Error {
    let err = Error::permission_denied(group, Access::Write);
    match schema.group(group) {
        Some(group) => err.in_frame(group.alias.as_ref()),
        None => err,
    }
}

/// Plans the write-back of a node tree.
///
/// Accessed values are flushed into their units first. Then:
/// - persisted units whose payload is unchanged are passed through,
/// - new units that stayed empty and hold no relationship are skipped,
///   unless a written nested unit needs them as its parent,
/// - every other collected unit is written,
/// - removed list items that were persisted are deleted.
///
/// A written or deleted unit in a group the caller may not write fails the
/// whole plan, as does a relationship there still waiting for its
/// cross-reference. Deleting a unit also needs write access to the groups
/// nested below it. Under [`WritePolicy::Strict`], any unit in such a group
/// with a value that was set or cleared fails too, even if unchanged.
///
/// # Errors
///
/// Returns `PermissionDenied`, `InvariantViolation` for inconsistent unit
/// nesting, or a codec error raised while flushing.
pub fn reconcile(
    root: &mut GroupingNode,
    schema: &EntitySchema,
    permissions: &GroupPermissions,
    policy: WritePolicy,
) -> Result<WritePlan> {
    let mut walk = Walk::default();
    walk.group(root)?;

    let mut plan = WritePlan::default();
    let mut write: Vec<UnitRef> = Vec::new();
    let mut writing: HashSet<usize> = HashSet::new();

    for entry in &walk.collected {
        let unit = &entry.unit;
        let writable = permissions.can_write(unit.group());
        if policy == WritePolicy::Strict && entry.assigned && !writable {
            return Err(write_denied(schema, unit.group()));
        }
        let unresolved = entry
            .relationships
            .iter()
            .any(|rel| rel.relationship.cross_reference().is_none());
        if unresolved && !writable {
            return Err(write_denied(schema, unit.group()));
        }
        if unit.has_original() && !unit.is_changed() {
            plan.passed_through.push(unit.clone());
        } else if !unit.has_original() && unit.is_empty() && entry.relationships.is_empty() {
            continue;
        } else if writing.insert(unit.key()) {
            write.push(unit.clone());
        }
    }

    // New parents of written units are written too, even when empty.
    let mut forced = Vec::new();
    for unit in &write {
        let mut parent = unit.parent();
        while let Some(p) = parent {
            if p.id().is_none() && writing.insert(p.key()) {
                forced.push(p.clone());
            }
            parent = p.parent();
        }
    }
    write.extend(forced);

    for unit in &write {
        if !permissions.can_write(unit.group()) {
            return Err(write_denied(schema, unit.group()));
        }
    }

    let mut positions: HashMap<usize, (GroupId, usize)> = HashMap::new();
    for unit in &write {
        let planned = plan.units.entry(unit.group()).or_default();
        positions.insert(unit.key(), (unit.group(), planned.len()));
        planned.push(PlannedUnit {
            handle: unit.clone(),
            unit: unit.snapshot(),
            parent: None,
        });
    }
    for planned in plan.units.values_mut().flatten() {
        planned.parent = match planned.handle.parent() {
            None => None,
            Some(parent) => Some(match parent.id() {
                Some(id) => PlannedParent::Persisted(id),
                None => {
                    let (group, position) =
                        positions.get(&parent.key()).copied().ok_or_else(|| {
                            Error::invariant(format!(
                                "new parent of a {} unit is not written",
                                planned.handle.group()
                            ))
                        })?;
                    PlannedParent::Pending { group, position }
                }
            }),
        };
    }

    plan.group_order = plan.units.keys().copied().collect();
    plan.group_order
        .sort_by_key(|group| (schema.group_depth(*group), *group));

    for entry in walk.collected {
        let position = positions.get(&entry.unit.key()).map(|(_, position)| *position);
        for rel in entry.relationships {
            plan.relationships.push(PendingRelationship {
                group: entry.unit.group(),
                position,
                unit: entry.unit.clone(),
                field: rel.field,
                slot: rel.slot,
                relationship: rel.relationship,
            });
        }
    }

    let mut ghosts = walk.ghosts;
    for ghost in &ghosts {
        let denied = schema
            .group_closure(ghost.group())
            .into_iter()
            .find(|group| !permissions.can_write(*group));
        if let Some(group) = denied {
            return Err(write_denied(schema, group));
        }
    }
    ghosts.sort_by_key(|ghost| std::cmp::Reverse(schema.group_depth(ghost.group())));
    plan.deletions = ghosts.iter().filter_map(UnitRef::id).collect();

    debug!(
        entity_type = schema.entity_type(),
        written = plan.written(),
        passed_through = plan.passed_through.len(),
        deletions = plan.deletions.len(),
        relationships = plan.relationships.len(),
        "reconciled"
    );
    Ok(plan)
}

/// Forgets the removed list items of a tree once their deletion is stored.
pub(crate) fn settle(node: &mut GroupingNode) {
    for (_, child) in node.children_mut() {
        match child {
            PseudoNode::List(list) => {
                list.drain_ghosts();
                for item in list.iter_mut().filter(|item| item.is_loaded()) {
                    if let Ok(group) = item.group_mut() {
                        settle(group);
                    }
                }
            }
            PseudoNode::Value(value)
                if value.is_loaded() && value.field().datatype.is_grouping() =>
            {
                if let Ok(group) = value.group_mut() {
                    settle(group);
                }
            }
            _ => {}
        }
    }
}
