//! Masking strategies: how a replacement token is produced for an entity.
//!
//! A strategy only generates tokens. Remembering which token was issued for
//! which value is the mapping store's job; generation never touches it.

pub mod context;
pub mod custom;
pub mod fixed;
pub mod hash;
pub mod opaque;
pub mod template;

pub use context::{ContextAwareStrategy, HybridStrategy};
pub use custom::CustomReplacementStrategy;
pub use fixed::FixedReplacementStrategy;
pub use hash::HashStrategy;
pub use opaque::OpaqueStrategy;
pub use template::{TypeTemplateStrategy, TypeTemplates};

use crate::entity::EntityType;
use crate::error::MaskingError;
use crate::store::MappingStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Produces the replacement token for an `(original, type)` pair
pub trait MaskingStrategy: Send + Sync {
    /// Strategy name for logs and configuration
    fn name(&self) -> &'static str;

    /// Generate a token for `original`
    ///
    /// Called at most once per pair for reversible strategies; the store
    /// replays the recorded token afterwards.
    fn generate(&self, original: &str, entity_type: EntityType, state: &mut StrategyState)
        -> String;

    /// Whether every token maps back to exactly one original
    ///
    /// Tokens from lossy strategies are not recorded and cannot be unmasked.
    fn is_reversible(&self) -> bool {
        true
    }
}

/// Per-type running counters, persisted with the mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyState {
    counters: HashMap<EntityType, u64>,
}

impl StrategyState {
    /// Advance the counter for `entity_type` and return the new value
    pub fn next(&mut self, entity_type: EntityType) -> u64 {
        let counter = self.counters.entry(entity_type).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Current counter value (0 if never advanced)
    pub fn current(&self, entity_type: EntityType) -> u64 {
        self.counters.get(&entity_type).copied().unwrap_or(0)
    }

    /// Raise the counter to at least `value`
    pub fn observe(&mut self, entity_type: EntityType, value: u64) {
        let counter = self.counters.entry(entity_type).or_insert(0);
        *counter = (*counter).max(value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityType, u64)> + '_ {
        self.counters.iter().map(|(t, n)| (*t, *n))
    }

    pub fn clear(&mut self) {
        self.counters.clear();
    }
}

/// Named strategy variants, as used in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    #[default]
    Opaque,
    Fixed,
    Hash,
    Template,
    Context,
    Hybrid,
    Custom,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Opaque => "opaque",
            StrategyKind::Fixed => "fixed",
            StrategyKind::Hash => "hash",
            StrategyKind::Template => "template",
            StrategyKind::Context => "context",
            StrategyKind::Hybrid => "hybrid",
            StrategyKind::Custom => "custom",
        }
    }

    /// Build a strategy instance of this kind
    ///
    /// `store` is the mapping the hybrid strategy keeps its replacements in.
    pub fn build(
        &self,
        options: &StrategyOptions,
        store: &Arc<Mutex<MappingStore>>,
    ) -> Arc<dyn MaskingStrategy> {
        match self {
            StrategyKind::Opaque => Arc::new(OpaqueStrategy),
            StrategyKind::Fixed => {
                Arc::new(FixedReplacementStrategy::new(options.fixed_replacement.clone()))
            }
            StrategyKind::Hash => Arc::new(HashStrategy::new(
                options.hash_salt.clone(),
                options.hash_length,
            )),
            StrategyKind::Template => {
                Arc::new(TypeTemplateStrategy::with_templates(options.templates.clone()))
            }
            StrategyKind::Context => {
                Arc::new(ContextAwareStrategy::with_templates(options.templates.clone()))
            }
            StrategyKind::Hybrid => Arc::new(HybridStrategy::with_templates(
                options.templates.clone(),
                store.clone(),
            )),
            StrategyKind::Custom => Arc::new(CustomReplacementStrategy::new()),
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = MaskingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "opaque" | "masked" => Ok(StrategyKind::Opaque),
            "fixed" | "replacement" => Ok(StrategyKind::Fixed),
            "hash" => Ok(StrategyKind::Hash),
            "template" | "type" => Ok(StrategyKind::Template),
            "context" | "context-aware" => Ok(StrategyKind::Context),
            "hybrid" => Ok(StrategyKind::Hybrid),
            "custom" => Ok(StrategyKind::Custom),
            _ => Err(MaskingError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Parameters needed to build any strategy kind
#[derive(Debug, Clone)]
pub struct StrategyOptions {
    pub fixed_replacement: String,
    pub hash_salt: String,
    pub hash_length: usize,
    pub templates: TypeTemplates,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            fixed_replacement: fixed::DEFAULT_REPLACEMENT.to_string(),
            hash_salt: String::new(),
            hash_length: hash::DEFAULT_HASH_LENGTH,
            templates: TypeTemplates::default(),
        }
    }
}

/// Strategy selection: per-type overrides over a default
#[derive(Clone)]
pub struct StrategySet {
    default: Arc<dyn MaskingStrategy>,
    per_type: HashMap<EntityType, Arc<dyn MaskingStrategy>>,
}

impl Default for StrategySet {
    fn default() -> Self {
        Self::new(Arc::new(OpaqueStrategy))
    }
}

impl std::fmt::Debug for StrategySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let per_type: HashMap<&str, &str> = self
            .per_type
            .iter()
            .map(|(t, s)| (t.as_str(), s.name()))
            .collect();
        f.debug_struct("StrategySet")
            .field("default", &self.default.name())
            .field("per_type", &per_type)
            .finish()
    }
}

impl StrategySet {
    pub fn new(default: Arc<dyn MaskingStrategy>) -> Self {
        Self {
            default,
            per_type: HashMap::new(),
        }
    }

    pub fn set_default(&mut self, strategy: Arc<dyn MaskingStrategy>) {
        self.default = strategy;
    }

    pub fn set(&mut self, entity_type: EntityType, strategy: Arc<dyn MaskingStrategy>) {
        self.per_type.insert(entity_type, strategy);
    }

    /// Remove a per-type override, falling back to the default again
    pub fn unset(&mut self, entity_type: EntityType) {
        self.per_type.remove(&entity_type);
    }

    pub fn default_strategy(&self) -> &Arc<dyn MaskingStrategy> {
        &self.default
    }

    /// Strategy for `entity_type`
    pub fn for_type(&self, entity_type: EntityType) -> &Arc<dyn MaskingStrategy> {
        self.per_type.get(&entity_type).unwrap_or(&self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_advance_per_type() {
        let mut state = StrategyState::default();
        assert_eq!(state.next(EntityType::Person), 1);
        assert_eq!(state.next(EntityType::Person), 2);
        assert_eq!(state.next(EntityType::Organization), 1);
        state.observe(EntityType::Person, 7);
        state.observe(EntityType::Person, 3);
        assert_eq!(state.current(EntityType::Person), 7);
        state.clear();
        assert_eq!(state.current(EntityType::Person), 0);
    }

    #[test]
    fn test_strategy_kind_from_str() {
        assert_eq!("opaque".parse::<StrategyKind>().unwrap(), StrategyKind::Opaque);
        assert_eq!("Hybrid".parse::<StrategyKind>().unwrap(), StrategyKind::Hybrid);
        assert_eq!(
            "context-aware".parse::<StrategyKind>().unwrap(),
            StrategyKind::Context
        );
        assert!(matches!(
            "rot13".parse::<StrategyKind>(),
            Err(MaskingError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn test_build_matches_kind() {
        let options = StrategyOptions::default();
        let store = Arc::new(Mutex::new(MappingStore::in_memory()));
        for kind in [
            StrategyKind::Opaque,
            StrategyKind::Fixed,
            StrategyKind::Hash,
            StrategyKind::Template,
            StrategyKind::Context,
            StrategyKind::Hybrid,
            StrategyKind::Custom,
        ] {
            assert_eq!(kind.build(&options, &store).name(), kind.as_str());
        }
    }

    #[test]
    fn test_per_type_selection_falls_back_to_default() {
        let mut set = StrategySet::default();
        set.set(EntityType::Phone, Arc::new(FixedReplacementStrategy::default()));
        assert_eq!(set.for_type(EntityType::Phone).name(), "fixed");
        assert_eq!(set.for_type(EntityType::Person).name(), "opaque");
        set.unset(EntityType::Phone);
        assert_eq!(set.for_type(EntityType::Phone).name(), "opaque");
    }
}
