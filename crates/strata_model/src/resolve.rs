//! Cross-reference resolution for relationships found during a save.

use std::collections::HashSet;

use strata_foundation::{EntityId, Error, Result, Value};
use strata_storage::{CrossReference, EntitySchema, StorageUnit, UnitLink};
use tracing::debug;

use crate::context::ModelContext;
use crate::reconcile::PendingRelationship;
use crate::relation::{RelatedEntity, Relationship};
use crate::unit_ref::UnitRef;

#[derive(Debug, Default)]
pub(crate) struct Resolution {
    pub created: usize,
    pub reused: usize,
}

fn describe(relationship: &Relationship) -> String {
    format!("{:?}", relationship.target())
}

/// Returns the stored id of a relationship's target, saving a live target
/// that was never stored.
fn target_id(ctx: &ModelContext, relationship: &Relationship) -> Result<EntityId> {
    let fail = |reason: String| Error::relationship_resolution(describe(relationship), reason);
    match relationship.target() {
        RelatedEntity::Persisted { id, entity_type } => {
            let stored = ctx
                .store()
                .entity_type(*id)
                .map_err(|err| fail(err.to_string()))?;
            if stored.as_str() != entity_type.as_ref() {
                return Err(fail(format!("stored entity is a {stored}")));
            }
            Ok(*id)
        }
        RelatedEntity::Pending { handle, .. } => {
            if let Some(id) = relationship.target().id() {
                return Ok(id);
            }
            let mut target = handle
                .try_borrow_mut()
                .map_err(|_| fail("entity is in use and cannot be saved".into()))?;
            target.save().map_err(|err| fail(err.to_string()))?;
            target
                .id()
                .ok_or_else(|| fail("entity has no id after saving".into()))
        }
    }
}

/// Gives every pending relationship a cross-reference and writes the
/// cross-reference ids into the units' payloads.
///
/// Units are only patched for relationships that had no cross-reference,
/// and reconciliation has already refused those in read-only groups.
pub(crate) fn resolve(
    ctx: &ModelContext,
    schema: &EntitySchema,
    entity: EntityId,
    pending: &[PendingRelationship],
) -> Result<Resolution> {
    let mut resolution = Resolution::default();
    if pending.is_empty() {
        return Ok(resolution);
    }

    let mut known: Vec<CrossReference> = ctx.store().find_cross_references(entity)?;
    let mut patched: Vec<UnitRef> = Vec::new();
    let mut seen = HashSet::new();

    for rel in pending {
        let from_unit = rel.unit.id().ok_or_else(|| {
            Error::relationship_resolution(
                describe(&rel.relationship),
                "the unit holding it was not stored",
            )
        })?;
        let to_entity = target_id(ctx, &rel.relationship)?;

        let existing = known
            .iter()
            .find(|xref| xref.from_unit == from_unit && xref.to_entity == to_entity);
        let id = match existing {
            Some(xref) => {
                resolution.reused += 1;
                xref.id
            }
            None => {
                let id = ctx.store().create_cross_reference(from_unit, to_entity)?;
                known.push(CrossReference {
                    id,
                    from_unit,
                    to_entity,
                });
                resolution.created += 1;
                id
            }
        };
        rel.relationship.set_cross_reference(id);

        let field = schema.field(rel.field).ok_or_else(|| {
            Error::invariant(format!("{} holds unknown {}", schema.entity_type(), rel.field))
        })?;
        let codec = ctx.codecs().get(&field.datatype)?;
        let raw = rel.unit.value(rel.field).unwrap_or(Value::Nil);
        let updated = codec.patch_slot(&raw, rel.slot, &rel.relationship)?;
        if updated != raw {
            rel.unit.write(rel.field, Some(updated));
            if seen.insert(rel.unit.key()) {
                patched.push(rel.unit.clone());
            }
        }
    }

    if !patched.is_empty() {
        let batch: Vec<StorageUnit> = patched
            .iter()
            .map(|unit| StorageUnit {
                entity: Some(entity),
                parent: unit.parent().and_then(UnitRef::id).map(UnitLink::Persisted),
                ..unit.snapshot()
            })
            .collect();
        let ids = ctx.store().persist_units(&batch)?;
        for (unit, id) in patched.iter().zip(ids) {
            unit.mark_persisted(id, entity);
        }
    }

    debug!(
        %entity,
        created = resolution.created,
        reused = resolution.reused,
        patched = patched.len(),
        "resolved cross-references"
    );
    Ok(resolution)
}
