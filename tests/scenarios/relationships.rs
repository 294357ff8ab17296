//! Relationships between entities and their cross-references.

use strata_foundation::{EntityId, ErrorKind, Value};
use strata_model::{Entity, Relationship, TypedValue};

use crate::fixtures::{FRIEND, World};

fn raw_id(id: u64) -> Value {
    Value::Int(i64::try_from(id).unwrap())
}

// =============================================================================
// Pending Targets
// =============================================================================

#[test]
fn unsaved_target_is_saved_first_and_cross_referenced() {
    let world = World::new();
    let ctx = world.context();

    let friend = ctx.create("Person").unwrap();
    friend
        .borrow_mut()
        .field("name")
        .unwrap()
        .append()
        .unwrap()
        .field("full_name")
        .unwrap()
        .set("Charles Babbage")
        .unwrap();

    let mut person = Entity::create(&ctx, "Person").unwrap();
    person
        .set("friend", Relationship::pending(&friend).unwrap())
        .unwrap();
    let report = person.save().unwrap();
    assert_eq!(report.cross_references_created, 1);
    assert_eq!(report.cross_references_reused, 0);

    let friend_id = friend.borrow().id().unwrap();
    assert_eq!(world.store.units_of(friend_id).len(), 1);

    let xrefs = world.store.cross_references();
    assert_eq!(xrefs.len(), 1);
    assert_eq!(xrefs[0].to_entity, friend_id);

    let unit = world.store.unit(xrefs[0].from_unit).unwrap();
    assert_eq!(unit.entity, person.id());
    let raw = unit.value(FRIEND).unwrap();
    assert_eq!(raw.get("entity"), Some(&raw_id(friend_id.get())));
    assert_eq!(raw.get("entity_type"), Some(&Value::from("Person")));
    assert_eq!(raw.get("xref"), Some(&raw_id(xrefs[0].id.get())));
}

#[test]
fn cross_reference_is_reused_on_the_next_save() {
    let world = World::new();
    let ctx = world.context();
    let friend = ctx.create("Person").unwrap();

    let mut person = Entity::create(&ctx, "Person").unwrap();
    person
        .set("friend", Relationship::pending(&friend).unwrap())
        .unwrap();
    person.save().unwrap();

    world.store.clear_operations();
    let report = person.save().unwrap();
    assert_eq!(report.written, 0);
    assert_eq!(report.cross_references_created, 0);
    assert_eq!(report.cross_references_reused, 1);
    assert!(world.store.operations().is_empty());
    assert_eq!(world.store.cross_references().len(), 1);
}

#[test]
fn reloaded_relationship_carries_its_cross_reference() {
    let world = World::new();
    let ctx = world.context();
    let friend = world.seed_person(&["Charles"], None);

    let mut person = Entity::create(&ctx, "Person").unwrap();
    person.set("friend", Relationship::to(friend, "Person")).unwrap();
    person.save().unwrap();
    let xref = world.store.cross_references()[0].id;

    let mut reloaded = Entity::load(&ctx, person.id().unwrap()).unwrap();
    let value = reloaded.get("friend").unwrap();
    let relationship = value.as_relationship().unwrap();
    assert_eq!(relationship.target().id(), Some(friend));
    assert_eq!(relationship.cross_reference(), Some(xref));

    let target = relationship.target().resolve(&ctx).unwrap();
    assert_eq!(
        target.borrow_mut().get("name.0.full_name").unwrap().text("en"),
        Some("Charles")
    );
}

#[test]
fn replacing_the_target_creates_a_new_cross_reference() {
    let world = World::new();
    let ctx = world.context();
    let first = world.seed_person(&["Charles"], None);
    let second = world.seed_person(&["Mary"], None);

    let mut person = Entity::create(&ctx, "Person").unwrap();
    person.set("friend", Relationship::to(first, "Person")).unwrap();
    person.save().unwrap();

    person.set("friend", Relationship::to(second, "Person")).unwrap();
    let report = person.save().unwrap();
    assert_eq!(report.cross_references_created, 1);

    let latest = world.store.cross_references();
    assert!(latest.iter().any(|xref| xref.to_entity == second));
}

// =============================================================================
// Resolution Failures
// =============================================================================

#[test]
fn missing_target_fails_resolution() {
    let world = World::new();
    let ctx = world.context();
    let mut person = Entity::create(&ctx, "Person").unwrap();
    person
        .set("friend", Relationship::to(EntityId::new(404), "Person"))
        .unwrap();

    let err = person.save().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::RelationshipResolution { .. }));
    assert!(world.store.cross_references().is_empty());
}

#[test]
fn target_of_the_wrong_type_fails_resolution() {
    let world = World::new();
    let ctx = world.context();
    let friend = world.seed_person(&["Charles"], None);
    let mut person = Entity::create(&ctx, "Person").unwrap();
    person.set("friend", Relationship::to(friend, "Place")).unwrap();

    let err = person.save().unwrap_err();
    match err.kind {
        ErrorKind::RelationshipResolution { reason, .. } => {
            assert!(reason.contains("Person"), "{reason}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn self_reference_while_saving_fails_resolution() {
    let world = World::new();
    let ctx = world.context();
    let me = ctx.create("Person").unwrap();
    let myself = Relationship::pending(&me).unwrap();
    me.borrow_mut().set("friend", myself).unwrap();

    let err = me.borrow_mut().save().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::RelationshipResolution { .. }));
}

#[test]
fn relationship_values_are_typed() {
    let world = World::new();
    let ctx = world.context();
    let mut person = Entity::create(&ctx, "Person").unwrap();
    let err = person.set("friend", "Charles").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
    assert_eq!(person.get("friend").unwrap(), TypedValue::Nil);
}
