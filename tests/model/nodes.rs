//! Tests for pseudo-nodes over real codecs and shared units.

use std::sync::Arc;

use strata_foundation::{Access, EntityId, ErrorKind, FieldId, GroupId, UnitId, Value};
use strata_model::{
    CodecRegistry, NodeValue, PseudoList, PseudoNode, PseudoValue, Relationship, TypedValue,
    Unavailable, UnitRef,
};
use strata_storage::{DataType, FieldSchema, StorageUnit};

const NAME: FieldId = FieldId::new(1);
const FULL_NAME: FieldId = FieldId::new(2);
const FRIEND: FieldId = FieldId::new(3);
const NATIONAL_ID: FieldId = FieldId::new(4);

const NAME_GROUP: GroupId = GroupId::new(1);
const FRIEND_GROUP: GroupId = GroupId::new(2);
const SENSITIVE_GROUP: GroupId = GroupId::new(3);

fn field(id: FieldId, alias: &str, datatype: DataType, group: GroupId) -> Arc<FieldSchema> {
    Arc::new(FieldSchema::new(id, alias, datatype).in_group(group))
}

fn value_node(field: Arc<FieldSchema>) -> PseudoValue {
    let codec = CodecRegistry::with_builtins().get(&field.datatype).unwrap();
    PseudoValue::new(field, codec, "en".into())
}

fn name_list(parent: Option<UnitRef>) -> PseudoList {
    let root = field(NAME, "name", DataType::Semantic, NAME_GROUP);
    let codec = CodecRegistry::with_builtins().get(&root.datatype).unwrap();
    PseudoList::new(root, codec, "en".into(), parent)
}

fn stored_name(id: u64, text: &str) -> UnitRef {
    UnitRef::loaded(
        StorageUnit::new(NAME_GROUP)
            .with_id(UnitId::new(id))
            .with_entity(EntityId::new(1))
            .with_value(FULL_NAME, Value::object([("en", Value::from(text))])),
        None,
    )
}

// =============================================================================
// Values
// =============================================================================

#[test]
fn writing_the_loaded_value_back_is_no_change() {
    let unit = stored_name(1, "Ash");
    let mut node = value_node(field(FULL_NAME, "full_name", DataType::String, NAME_GROUP))
        .with_unit(unit.clone());

    node.set("Birch").unwrap();
    node.flush().unwrap();
    assert!(unit.is_changed());

    node.set("Ash").unwrap();
    node.flush().unwrap();
    assert!(!unit.is_changed());
}

#[test]
fn nodes_sharing_a_unit_see_each_others_flushes() {
    let unit = stored_name(1, "Ash");
    let field = field(FULL_NAME, "full_name", DataType::String, NAME_GROUP);
    let mut writer = value_node(Arc::clone(&field)).with_unit(unit.clone());
    let mut reader = value_node(field).with_unit(unit);

    writer.set("Birch").unwrap();
    writer.flush().unwrap();
    assert_eq!(reader.get().unwrap().text("en"), Some("Birch"));
}

#[test]
fn decoded_value_is_kept_until_cleared() {
    let unit = stored_name(1, "Ash");
    let mut node = value_node(field(FULL_NAME, "full_name", DataType::String, NAME_GROUP))
        .with_unit(unit.clone());
    assert_eq!(node.get().unwrap().text("en"), Some("Ash"));

    unit.write(FULL_NAME, Some(Value::object([("en", Value::from("Elm"))])));
    assert_eq!(node.get().unwrap().text("en"), Some("Ash"));

    node.clear();
    assert!(!node.is_loaded());
    assert!(unit.value(FULL_NAME).is_none());
    assert!(node.get().unwrap().is_nil());
}

#[test]
fn flushing_a_relationship_reports_its_slot() {
    let mut node = value_node(field(FRIEND, "friend", DataType::ResourceInstance, FRIEND_GROUP));
    node.set(Relationship::to(EntityId::new(9), "Person")).unwrap();

    let found = node.flush().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].field, FRIEND);
    assert_eq!(found[0].slot, 0);

    let unit = node.unit().unwrap();
    assert_eq!(unit.group(), FRIEND_GROUP);
    let raw = unit.value(FRIEND).unwrap();
    assert_eq!(raw.get("entity"), Some(&Value::Int(9)));
    assert_eq!(raw.get("entity_type"), Some(&Value::from("Person")));
}

#[test]
fn values_of_the_wrong_shape_are_refused() {
    let mut node = value_node(field(FRIEND, "friend", DataType::ResourceInstance, FRIEND_GROUP));
    let err = node.set("Ash").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
    assert!(!node.is_loaded());
}

#[test]
fn grouping_values_bind_their_unit() {
    let unit = stored_name(1, "Ash");
    let list = name_list(None);
    let mut item = list.item_for(unit.clone());

    assert!(item.is_truthy().unwrap());
    match item.node().unwrap() {
        NodeValue::Group(group) => assert!(UnitRef::same(group.unit(), Some(&unit))),
        NodeValue::Scalar(_) => panic!("name is a grouping field"),
    }
    assert!(item.set("x").is_err());
}

// =============================================================================
// Lists
// =============================================================================

#[test]
fn new_items_hang_below_the_list_parent() {
    let parent = UnitRef::new(GroupId::new(9), None);
    let mut list = name_list(Some(parent.clone()));
    let item = list.append_new().unwrap();

    let unit = item.unit().unwrap();
    assert_eq!(unit.group(), NAME_GROUP);
    assert!(UnitRef::same(unit.parent(), Some(&parent)));
    assert!(!item.is_truthy().unwrap());
}

#[test]
fn re_adding_a_removed_item_cancels_its_deletion() {
    let mut list = name_list(None);
    list.append(list.item_for(stored_name(1, "Ash"))).unwrap();
    list.append(list.item_for(stored_name(2, "Birch"))).unwrap();

    let removed = list.remove(0).unwrap();
    assert_eq!(list.ghosts().len(), 1);

    list.insert(1, removed).unwrap();
    assert!(list.ghosts().is_empty());
    assert_eq!(list.len(), 2);
}

#[test]
fn clearing_ghosts_every_persisted_item() {
    let mut list = name_list(None);
    list.append(list.item_for(stored_name(1, "Ash"))).unwrap();
    list.append_new().unwrap();
    list.append(list.item_for(stored_name(2, "Birch"))).unwrap();

    list.clear();
    let ids: Vec<_> = list.ghosts().iter().filter_map(UnitRef::id).collect();
    assert_eq!(ids, [UnitId::new(1), UnitId::new(2)]);

    assert_eq!(list.drain_ghosts().len(), 2);
    assert!(list.ghosts().is_empty());
}

#[test]
fn items_cannot_move_between_parents() {
    let one = UnitRef::new(GroupId::new(9), None);
    let other = UnitRef::new(GroupId::new(9), None);
    let source = name_list(Some(one));
    let mut target = name_list(Some(other));

    let err = target.append(source.new_item().unwrap()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvariantViolation(_)));
    assert!(target.is_empty());
}

#[test]
fn list_nodes_are_truthy_when_they_have_items() {
    let mut node = PseudoNode::List(name_list(None));
    assert!(!node.is_truthy().unwrap());
    node.as_list_mut().unwrap().append_new().unwrap();
    assert!(node.is_truthy().unwrap());
}

// =============================================================================
// Unavailable
// =============================================================================

#[test]
fn unavailable_fields_name_themselves_in_errors() {
    let national_id = field(
        NATIONAL_ID,
        "national_id",
        DataType::NonLocalizedString,
        SENSITIVE_GROUP,
    );
    let mut node = PseudoNode::Unavailable(Unavailable::new(national_id, SENSITIVE_GROUP));
    assert!(node.is_unavailable());
    assert!(!node.is_truthy().unwrap());

    let PseudoNode::Unavailable(unavailable) = &node else {
        unreachable!()
    };
    let err = unavailable.get().unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::PermissionDenied {
            group: SENSITIVE_GROUP,
            access: Access::Read,
        }
    ));
    assert_eq!(err.context.unwrap().stack, vec!["national_id".to_string()]);
    assert!(unavailable.flush().is_err());
    assert!(unavailable.set(TypedValue::Nil).is_err());
}
