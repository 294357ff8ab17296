//! Tests for permission lookup through the access guard.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use strata_foundation::{Error, ErrorKind, FieldId, GroupId, Result};
use strata_model::{
    AccessGuard, Entity, GroupPermissions, GroupSet, ModelContext, PermissionBackend,
    SecurityContext, StaticPermissions,
};
use strata_storage::{
    Cardinality, DataType, EntitySchema, FieldSchema, MemoryStore, SchemaRegistry,
    StaticSchemaProvider,
};

const ROOT: FieldId = FieldId::new(0);
const NICKNAME: FieldId = FieldId::new(1);
const SALARY: FieldId = FieldId::new(2);

const NICKNAME_GROUP: GroupId = GroupId::new(1);
const SALARY_GROUP: GroupId = GroupId::new(2);

fn schema() -> EntitySchema {
    EntitySchema::builder("Person", FieldSchema::semantic(ROOT, "person"))
        .group(
            ROOT,
            NICKNAME_GROUP,
            Cardinality::One,
            FieldSchema::new(NICKNAME, "nickname", DataType::NonLocalizedString),
        )
        .group(
            ROOT,
            SALARY_GROUP,
            Cardinality::One,
            FieldSchema::new(SALARY, "salary", DataType::Number),
        )
        .build()
        .unwrap()
}

fn context(backend: Arc<dyn PermissionBackend>, security: &SecurityContext) -> ModelContext {
    let provider = StaticSchemaProvider::new().with(&schema());
    ModelContext::new(
        Arc::new(SchemaRegistry::new(Arc::new(provider))),
        Arc::new(MemoryStore::new()),
    )
    .with_guard(Arc::new(AccessGuard::new(backend)))
    .with_security(security.clone())
}

/// Counts lookups and hides salaries until opened.
#[derive(Default)]
struct Payroll {
    lookups: AtomicUsize,
    open: AtomicBool,
}

impl PermissionBackend for Payroll {
    fn permitted_groups(&self, _: &SecurityContext, _: &str) -> Result<GroupPermissions> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.open.load(Ordering::SeqCst) {
            Ok(GroupPermissions::all())
        } else {
            Ok(GroupPermissions::all().deny_read(SALARY_GROUP))
        }
    }
}

struct Offline;

impl PermissionBackend for Offline {
    fn permitted_groups(&self, _: &SecurityContext, _: &str) -> Result<GroupPermissions> {
        Err(Error::store("permission service unreachable"))
    }
}

// =============================================================================
// Permission Sets
// =============================================================================

#[test]
fn group_sets_compose() {
    let everything_but_salary = GroupSet::All.without(SALARY_GROUP);
    assert!(everything_but_salary.contains(NICKNAME_GROUP));
    assert!(!everything_but_salary.contains(SALARY_GROUP));
    assert!(everything_but_salary.with(SALARY_GROUP).contains(SALARY_GROUP));

    let permissions = GroupPermissions::read_only().allow_write(NICKNAME_GROUP);
    assert!(permissions.can_write(NICKNAME_GROUP));
    assert!(!permissions.can_write(SALARY_GROUP));
    assert!(permissions.can_read(SALARY_GROUP));
}

#[test]
fn ungranted_contexts_get_the_fallback() {
    let clerk = SecurityContext::new("clerk");
    let backend = StaticPermissions::new()
        .with_fallback(GroupPermissions::none())
        .grant(&clerk, "Person", GroupPermissions::read_only());

    let guard = AccessGuard::new(Arc::new(backend));
    let granted = guard.permitted(&clerk, "Person").unwrap();
    assert_eq!(*granted, GroupPermissions::read_only());
    let stranger = guard
        .permitted(&SecurityContext::anonymous(), "Person")
        .unwrap();
    assert_eq!(*stranger, GroupPermissions::none());
}

// =============================================================================
// Guard
// =============================================================================

#[test]
fn guard_is_shared_across_threads() {
    let backend = Arc::new(Payroll::default());
    let guard = Arc::new(AccessGuard::new(backend.clone()));
    let clerk = SecurityContext::new("clerk");

    thread::scope(|scope| {
        for _ in 0..8 {
            let guard = Arc::clone(&guard);
            let clerk = clerk.clone();
            scope.spawn(move || {
                let permissions = guard.permitted(&clerk, "Person").unwrap();
                assert!(!permissions.can_read(SALARY_GROUP));
            });
        }
    });

    assert_eq!(guard.memoized(), 1);
    let lookups = backend.lookups.load(Ordering::SeqCst);
    assert!((1..=8).contains(&lookups));
}

#[test]
fn entities_of_one_context_share_the_answer() {
    let backend = Arc::new(Payroll::default());
    let clerk = SecurityContext::new("clerk");
    let ctx = context(backend.clone(), &clerk);

    Entity::create(&ctx, "Person").unwrap();
    Entity::create(&ctx, "Person").unwrap();
    assert_eq!(backend.lookups.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.guard().memoized(), 1);
}

#[test]
fn invalidation_applies_to_entities_opened_afterwards() {
    let backend = Arc::new(Payroll::default());
    let clerk = SecurityContext::new("clerk");
    let ctx = context(backend.clone(), &clerk);

    let mut before = Entity::create(&ctx, "Person").unwrap();
    assert!(before.field("salary").unwrap().is_unavailable());

    backend.open.store(true, Ordering::SeqCst);
    ctx.guard().invalidate_context(&clerk);

    let mut after = Entity::create(&ctx, "Person").unwrap();
    assert!(!after.field("salary").unwrap().is_unavailable());
    after.set("salary", 1200_i64).unwrap();
    assert!(before.field("salary").unwrap().is_unavailable());
}

#[test]
fn backend_failures_surface_when_opening() {
    let clerk = SecurityContext::new("clerk");
    let ctx = context(Arc::new(Offline), &clerk);

    let err = Entity::create(&ctx, "Person").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Store(_)));
    assert_eq!(ctx.guard().memoized(), 0);
}
