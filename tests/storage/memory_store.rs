//! Integration tests for the in-memory store
//!
//! Tests batch persistence, parent linking, cascading deletes,
//! cross-references, and the operation log.

use strata_foundation::{EntityId, ErrorKind, FieldId, GroupId, UnitId, Value};
use strata_storage::{MemoryStore, StorageUnit, Store, StoreOp, UnitLink};

const NAME_GROUP: GroupId = GroupId::new(1);
const NOTE_GROUP: GroupId = GroupId::new(2);
const FULL_NAME: FieldId = FieldId::new(2);

fn store_with_entity() -> (MemoryStore, EntityId) {
    let store = MemoryStore::new();
    let entity = store.create_entity("Person").unwrap();
    (store, entity)
}

fn name(entity: EntityId, text: &str) -> StorageUnit {
    StorageUnit::new(NAME_GROUP)
        .with_entity(entity)
        .with_value(FULL_NAME, Value::object([("en", Value::from(text))]))
}

// =============================================================================
// Entities
// =============================================================================

#[test]
fn entities_get_distinct_ids() {
    let store = MemoryStore::new();
    let a = store.create_entity("Person").unwrap();
    let b = store.create_entity("Place").unwrap();
    assert_ne!(a, b);
    assert_eq!(store.entity_type(b).unwrap(), "Place");
    assert_eq!(store.entity_count(), 2);
}

#[test]
fn unknown_entity_is_not_found() {
    let store = MemoryStore::new();
    let err = store.load_units(EntityId::new(42), None).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::EntityNotFound(_)));
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn nested_units_link_to_parents_in_the_same_batch() {
    let (store, entity) = store_with_entity();
    let batch = vec![
        name(entity, "Ada"),
        StorageUnit::new(NOTE_GROUP)
            .with_entity(entity)
            .with_parent(UnitLink::Pending(0)),
    ];
    let ids = store.persist_units(&batch).unwrap();
    let note = store.unit(ids[1]).unwrap();
    assert_eq!(note.parent_id(), Some(ids[0]));
}

#[test]
fn failed_batch_writes_nothing() {
    let (store, entity) = store_with_entity();
    let batch = vec![
        name(entity, "Ada"),
        name(entity, "Lovelace").with_id(UnitId::new(77)),
    ];
    let err = store.persist_units(&batch).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnitNotFound(_)));
    assert!(store.units_of(entity).is_empty());
    assert!(store.written_ids().is_empty());
}

#[test]
fn rewriting_a_unit_keeps_its_id() {
    let (store, entity) = store_with_entity();
    let id = store.persist_units(&[name(entity, "Ada")]).unwrap()[0];
    let ids = store
        .persist_units(&[name(entity, "Augusta").with_id(id)])
        .unwrap();
    assert_eq!(ids, vec![id]);
    assert_eq!(store.units_of(entity).len(), 1);
    let stored = store.unit(id).unwrap();
    assert_eq!(
        stored.value(FULL_NAME).and_then(|v| v.get("en")).and_then(Value::as_str),
        Some("Augusta")
    );
}

#[test]
fn unit_cannot_change_group() {
    let (store, entity) = store_with_entity();
    let id = store.persist_units(&[name(entity, "Ada")]).unwrap()[0];
    let moved = StorageUnit::new(NOTE_GROUP).with_entity(entity).with_id(id);
    assert!(store.persist_units(&[moved]).is_err());
}

#[test]
fn load_filters_by_group() {
    let (store, entity) = store_with_entity();
    let ids = store
        .persist_units(&[
            name(entity, "Ada"),
            StorageUnit::new(NOTE_GROUP)
                .with_entity(entity)
                .with_parent(UnitLink::Pending(0)),
        ])
        .unwrap();
    let names = store.load_units(entity, Some(NAME_GROUP)).unwrap();
    assert_eq!(names.len(), 1);
    assert_eq!(names[0].id, Some(ids[0]));
    assert_eq!(store.load_units(entity, None).unwrap().len(), 2);
}

// =============================================================================
// Deletion and Cross-References
// =============================================================================

#[test]
fn deleting_a_parent_removes_children_and_their_cross_references() {
    let (store, entity) = store_with_entity();
    let other = store.create_entity("Person").unwrap();
    let ids = store
        .persist_units(&[
            name(entity, "Ada"),
            StorageUnit::new(NOTE_GROUP)
                .with_entity(entity)
                .with_parent(UnitLink::Pending(0)),
        ])
        .unwrap();
    store.create_cross_reference(ids[1], other).unwrap();

    store.delete_units(&[ids[0]]).unwrap();
    assert!(store.units_of(entity).is_empty());
    assert!(store.cross_references().is_empty());
    assert_eq!(store.deleted_ids(), vec![ids[0]]);
}

#[test]
fn deleting_a_missing_unit_fails_cleanly() {
    let (store, entity) = store_with_entity();
    let id = store.persist_units(&[name(entity, "Ada")]).unwrap()[0];
    assert!(store.delete_units(&[id, UnitId::new(999)]).is_err());
    assert!(store.unit(id).is_some());
}

#[test]
fn cross_references_are_found_by_source_entity() {
    let (store, entity) = store_with_entity();
    let friend = store.create_entity("Person").unwrap();
    let unit = store.persist_units(&[name(entity, "Ada")]).unwrap()[0];
    let xref = store.create_cross_reference(unit, friend).unwrap();

    let found = store.find_cross_references(entity).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, xref);
    assert_eq!(found[0].to_entity, friend);
    assert!(store.find_cross_references(friend).unwrap().is_empty());
}

// =============================================================================
// Snapshots and the Operation Log
// =============================================================================

#[test]
fn restore_rolls_back_contents_but_not_the_log() {
    let (store, entity) = store_with_entity();
    let snapshot = store.snapshot();
    store.persist_units(&[name(entity, "Ada")]).unwrap();
    store.restore(snapshot);
    assert!(store.units_of(entity).is_empty());
    assert_eq!(store.written_ids().len(), 1);
}

#[test]
fn operations_are_recorded_in_order() {
    let store = MemoryStore::new();
    let entity = store.create_entity("Person").unwrap();
    let id = store.persist_units(&[name(entity, "Ada")]).unwrap()[0];
    store.delete_units(&[id]).unwrap();
    assert_eq!(
        store.operations(),
        vec![
            StoreOp::CreateEntity(entity),
            StoreOp::Persist(vec![id]),
            StoreOp::Delete(vec![id]),
        ]
    );
    store.clear_operations();
    assert!(store.operations().is_empty());
}

#[test]
fn refused_types_cannot_be_created() {
    let store = MemoryStore::new();
    store.refuse_entity_type("Archive");
    assert!(matches!(
        store.create_entity("Archive").unwrap_err().kind,
        ErrorKind::Store(_)
    ));
    assert!(store.create_entity("Person").is_ok());
}
