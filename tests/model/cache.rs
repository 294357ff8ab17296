//! Tests for the per-entity unit cache over the in-memory store.

use strata_foundation::{EntityId, FieldId, GroupId, Value};
use strata_model::{UnitRef, ValueCache};
use strata_storage::{
    Cardinality, DataType, EntitySchema, FieldSchema, MemoryStore, StorageUnit, Store, UnitLink,
};

const ROOT: FieldId = FieldId::new(0);
const NAME: FieldId = FieldId::new(1);
const FULL_NAME: FieldId = FieldId::new(2);
const NOTE: FieldId = FieldId::new(3);
const NOTE_TEXT: FieldId = FieldId::new(4);

const NAME_GROUP: GroupId = GroupId::new(1);
const NOTE_GROUP: GroupId = GroupId::new(2);

fn schema() -> EntitySchema {
    EntitySchema::builder("Person", FieldSchema::semantic(ROOT, "person"))
        .group(ROOT, NAME_GROUP, Cardinality::Many, FieldSchema::semantic(NAME, "name"))
        .field(NAME, FieldSchema::new(FULL_NAME, "full_name", DataType::String))
        .group(NAME, NOTE_GROUP, Cardinality::One, FieldSchema::semantic(NOTE, "note"))
        .field(NOTE, FieldSchema::new(NOTE_TEXT, "note_text", DataType::String))
        .build()
        .unwrap()
}

fn text(s: &str) -> Value {
    Value::object([("en", Value::from(s))])
}

/// Stores two names, each with a note.
fn seeded() -> (MemoryStore, EntityId) {
    let store = MemoryStore::new();
    let entity = store.create_entity("Person").unwrap();
    let units = vec![
        StorageUnit::new(NAME_GROUP)
            .with_entity(entity)
            .with_value(FULL_NAME, text("Ash")),
        StorageUnit::new(NAME_GROUP)
            .with_entity(entity)
            .with_value(FULL_NAME, text("Birch")),
        StorageUnit::new(NOTE_GROUP)
            .with_entity(entity)
            .with_parent(UnitLink::Pending(0))
            .with_value(NOTE_TEXT, text("first")),
        StorageUnit::new(NOTE_GROUP)
            .with_entity(entity)
            .with_parent(UnitLink::Pending(1))
            .with_value(NOTE_TEXT, text("second")),
    ];
    store.persist_units(&units).unwrap();
    (store, entity)
}

fn note_of(notes: &[UnitRef], name: &UnitRef) -> Option<Value> {
    notes
        .iter()
        .find(|note| UnitRef::same(note.parent(), Some(name)))
        .and_then(|note| note.value(NOTE_TEXT))
}

// =============================================================================
// Lazy Loading
// =============================================================================

#[test]
fn nested_groups_link_to_their_parents() {
    let (store, entity) = seeded();
    let schema = schema();
    let mut cache = ValueCache::new();

    let note_group = schema.group(NOTE_GROUP).unwrap();
    let notes = cache.get(&store, &schema, Some(entity), note_group).unwrap();
    assert_eq!(notes.len(), 2);
    assert!(cache.is_checked("name"));

    let names = cache
        .get(&store, &schema, Some(entity), schema.group(NAME_GROUP).unwrap())
        .unwrap();
    let ash = names
        .iter()
        .find(|name| name.value(FULL_NAME) == Some(text("Ash")))
        .unwrap();
    assert_eq!(note_of(&notes, ash), Some(text("first")));
}

#[test]
fn repeated_lookups_share_handles() {
    let (store, entity) = seeded();
    let schema = schema();
    let group = schema.group(NAME_GROUP).unwrap();
    let mut cache = ValueCache::new();

    let first = cache.get(&store, &schema, Some(entity), group).unwrap();
    first[0].write(FULL_NAME, Some(text("Cedar")));

    let second = cache.get(&store, &schema, Some(entity), group).unwrap();
    assert!(UnitRef::ptr_eq(&first[0], &second[0]));
    assert_eq!(second[0].value(FULL_NAME), Some(text("Cedar")));
}

#[test]
fn groups_without_units_are_remembered_as_empty() {
    let store = MemoryStore::new();
    let entity = store.create_entity("Person").unwrap();
    let schema = schema();
    let mut cache = ValueCache::new();

    let names = cache
        .get(&store, &schema, Some(entity), schema.group(NAME_GROUP).unwrap())
        .unwrap();
    assert!(names.is_empty());
    assert!(cache.is_checked("name"));
    assert!(cache.is_checked("note"));
}

// =============================================================================
// Populate and Reset
// =============================================================================

#[test]
fn populated_cache_never_asks_the_store() {
    let (store, entity) = seeded();
    let schema = schema();
    let mut cache = ValueCache::new();
    cache
        .populate(&schema, store.load_units(entity, None).unwrap())
        .unwrap();
    assert_eq!(cache.len(), 2);

    let empty = MemoryStore::new();
    let notes = cache
        .get(&empty, &schema, Some(entity), schema.group(NOTE_GROUP).unwrap())
        .unwrap();
    assert_eq!(notes.len(), 2);
    assert!(notes.iter().all(|note| note.parent().is_some()));
}

#[test]
fn units_of_unknown_groups_are_rejected() {
    let schema = schema();
    let mut cache = ValueCache::new();
    let stray = StorageUnit::new(GroupId::new(42)).with_entity(EntityId::new(1));
    assert!(cache.populate(&schema, vec![stray]).is_err());
}

#[test]
fn set_and_clear_replace_loaded_groups() {
    let (store, entity) = seeded();
    let schema = schema();
    let group = schema.group(NAME_GROUP).unwrap();
    let mut cache = ValueCache::new();

    cache.set("name", vec![UnitRef::new(NAME_GROUP, None)]);
    let names = cache.get(&store, &schema, Some(entity), group).unwrap();
    assert_eq!(names.len(), 1);
    assert!(names[0].id().is_none());

    cache.clear();
    assert!(cache.is_empty());
    let names = cache.get(&store, &schema, Some(entity), group).unwrap();
    assert_eq!(names.len(), 2);
}
