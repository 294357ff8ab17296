//! Field-group access control.
//!
//! The [`AccessGuard`] asks a [`PermissionBackend`] which groups of an
//! entity type a security context may read and write, and memoizes the
//! answer per `(context, entity type)`. The memo is the only state shared
//! across sessions; call [`AccessGuard::invalidate`] when the underlying
//! permission data changes.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use strata_foundation::{GroupId, Result};
use tracing::debug;

/// Opaque caller identity.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SecurityContext(Arc<str>);

impl SecurityContext {
    /// Creates a context from a token.
    #[must_use]
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self(token.into())
    }

    /// The context used when none is given.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new("anonymous")
    }

    /// Returns the token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecurityContext({})", self.0)
    }
}

/// A set of groups, possibly unbounded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupSet {
    /// Every group.
    All,
    /// Exactly these groups.
    Only(HashSet<GroupId>),
    /// Every group except these.
    AllExcept(HashSet<GroupId>),
}

impl GroupSet {
    /// The empty set.
    #[must_use]
    pub fn none() -> Self {
        Self::Only(HashSet::new())
    }

    /// Returns true if `group` is in the set.
    #[must_use]
    pub fn contains(&self, group: GroupId) -> bool {
        match self {
            Self::All => true,
            Self::Only(groups) => groups.contains(&group),
            Self::AllExcept(groups) => !groups.contains(&group),
        }
    }

    /// Returns the set with `group` added.
    #[must_use]
    pub fn with(self, group: GroupId) -> Self {
        match self {
            Self::All => Self::All,
            Self::Only(mut groups) => {
                groups.insert(group);
                Self::Only(groups)
            }
            Self::AllExcept(mut groups) => {
                groups.remove(&group);
                Self::AllExcept(groups)
            }
        }
    }

    /// Returns the set with `group` removed.
    #[must_use]
    pub fn without(self, group: GroupId) -> Self {
        match self {
            Self::All => Self::AllExcept(HashSet::from([group])),
            Self::Only(mut groups) => {
                groups.remove(&group);
                Self::Only(groups)
            }
            Self::AllExcept(mut groups) => {
                groups.insert(group);
                Self::AllExcept(groups)
            }
        }
    }
}

/// The groups of one entity type a context may read and write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupPermissions {
    /// Readable groups.
    pub read: GroupSet,
    /// Writable groups.
    pub write: GroupSet,
}

impl GroupPermissions {
    /// Full access.
    #[must_use]
    pub fn all() -> Self {
        Self {
            read: GroupSet::All,
            write: GroupSet::All,
        }
    }

    /// No access.
    #[must_use]
    pub fn none() -> Self {
        Self {
            read: GroupSet::none(),
            write: GroupSet::none(),
        }
    }

    /// Read access to everything, write access to nothing.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            read: GroupSet::All,
            write: GroupSet::none(),
        }
    }

    /// Grants read access to a group.
    #[must_use]
    pub fn allow_read(mut self, group: GroupId) -> Self {
        self.read = self.read.with(group);
        self
    }

    /// Grants read and write access to a group.
    #[must_use]
    pub fn allow_write(mut self, group: GroupId) -> Self {
        self.read = self.read.with(group);
        self.write = self.write.with(group);
        self
    }

    /// Revokes read and write access to a group.
    #[must_use]
    pub fn deny_read(mut self, group: GroupId) -> Self {
        self.read = self.read.without(group);
        self.write = self.write.without(group);
        self
    }

    /// Revokes write access to a group.
    #[must_use]
    pub fn deny_write(mut self, group: GroupId) -> Self {
        self.write = self.write.without(group);
        self
    }

    /// Returns true if the group is readable.
    #[must_use]
    pub fn can_read(&self, group: GroupId) -> bool {
        self.read.contains(group)
    }

    /// Returns true if the group is writable.
    #[must_use]
    pub fn can_write(&self, group: GroupId) -> bool {
        self.write.contains(group)
    }
}

/// Source of permission data.
pub trait PermissionBackend: Send + Sync {
    /// Returns the groups of `entity_type` that `context` may read and write.
    ///
    /// # Errors
    ///
    /// Returns an error if the permission data cannot be read.
    fn permitted_groups(
        &self,
        context: &SecurityContext,
        entity_type: &str,
    ) -> Result<GroupPermissions>;
}

/// Backend granting full access to everyone.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl PermissionBackend for AllowAll {
    fn permitted_groups(&self, _: &SecurityContext, _: &str) -> Result<GroupPermissions> {
        Ok(GroupPermissions::all())
    }
}

/// Backend holding fixed grants per context and entity type.
#[derive(Clone, Debug)]
pub struct StaticPermissions {
    grants: HashMap<(SecurityContext, String), GroupPermissions>,
    fallback: GroupPermissions,
}

impl Default for StaticPermissions {
    fn default() -> Self {
        Self {
            grants: HashMap::new(),
            fallback: GroupPermissions::all(),
        }
    }
}

impl StaticPermissions {
    /// Creates a backend where ungranted pairs get full access.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the permissions used for pairs with no grant.
    #[must_use]
    pub fn with_fallback(mut self, fallback: GroupPermissions) -> Self {
        self.fallback = fallback;
        self
    }

    /// Sets the permissions of a context on an entity type.
    #[must_use]
    pub fn grant(
        mut self,
        context: &SecurityContext,
        entity_type: impl Into<String>,
        permissions: GroupPermissions,
    ) -> Self {
        self.grants
            .insert((context.clone(), entity_type.into()), permissions);
        self
    }
}

impl PermissionBackend for StaticPermissions {
    fn permitted_groups(
        &self,
        context: &SecurityContext,
        entity_type: &str,
    ) -> Result<GroupPermissions> {
        Ok(self
            .grants
            .get(&(context.clone(), entity_type.to_string()))
            .unwrap_or(&self.fallback)
            .clone())
    }
}

/// Memoizing front for a [`PermissionBackend`].
pub struct AccessGuard {
    backend: Arc<dyn PermissionBackend>,
    memo: RwLock<HashMap<(SecurityContext, String), Arc<GroupPermissions>>>,
}

impl AccessGuard {
    /// Creates a guard over a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn PermissionBackend>) -> Self {
        Self {
            backend,
            memo: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a guard granting full access.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::new(Arc::new(AllowAll))
    }

    /// Returns the permissions of `context` on `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns the backend's error on a memo miss.
    pub fn permitted(
        &self,
        context: &SecurityContext,
        entity_type: &str,
    ) -> Result<Arc<GroupPermissions>> {
        let key = (context.clone(), entity_type.to_string());
        if let Some(permissions) = self.memo.read().get(&key) {
            return Ok(Arc::clone(permissions));
        }

        let permissions = Arc::new(self.backend.permitted_groups(context, entity_type)?);
        debug!(context = context.token(), entity_type, "computed permitted groups");
        let mut memo = self.memo.write();
        Ok(Arc::clone(memo.entry(key).or_insert(permissions)))
    }

    /// Drops every memoized answer.
    pub fn invalidate(&self) {
        self.memo.write().clear();
    }

    /// Drops the memoized answers for one context.
    pub fn invalidate_context(&self, context: &SecurityContext) {
        self.memo.write().retain(|(memo_context, _), _| memo_context != context);
    }

    /// Returns the number of memoized answers.
    #[must_use]
    pub fn memoized(&self) -> usize {
        self.memo.read().len()
    }
}

impl fmt::Debug for AccessGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGuard")
            .field("memoized", &self.memoized())
            .finish_non_exhaustive()
    }
}
