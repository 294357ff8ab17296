//! Configuration for the entity model.

use std::sync::Arc;

/// How reconciliation treats units in groups the caller cannot write.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum WritePolicy {
    /// A unit whose payload still equals what was loaded is passed through
    /// unwritten. Only a changed payload is refused.
    #[default]
    PassThroughUnchanged,
    /// A unit in a non-writable group is refused once any of its values was
    /// set or cleared, even back to what was loaded. Reading is allowed.
    Strict,
}

/// Configuration for the entity model.
#[derive(Clone, Debug)]
pub struct ModelConfig {
    /// Language tag applied to untagged text.
    pub default_language: Arc<str>,

    /// Write policy for non-writable groups.
    pub write_policy: WritePolicy,

    /// Load every group of an entity in one pass when it is loaded.
    pub eager_load: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default_language: "en".into(),
            write_policy: WritePolicy::PassThroughUnchanged,
            eager_load: false,
        }
    }
}

impl ModelConfig {
    /// Creates a configuration that refuses every write to a non-writable group.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            write_policy: WritePolicy::Strict,
            ..Self::default()
        }
    }

    /// Creates a configuration that loads entities in one bulk pass.
    #[must_use]
    pub fn eager() -> Self {
        Self {
            eager_load: true,
            ..Self::default()
        }
    }

    /// Builder method to set the default language.
    #[must_use]
    pub fn with_default_language(mut self, language: impl Into<Arc<str>>) -> Self {
        self.default_language = language.into();
        self
    }

    /// Builder method to set the write policy.
    #[must_use]
    pub fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    /// Builder method to enable/disable eager loading.
    #[must_use]
    pub fn with_eager_load(mut self, eager: bool) -> Self {
        self.eager_load = eager;
        self
    }
}
