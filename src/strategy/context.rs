//! Numbered, human-readable tokens such as "某人 1", "某人 2".

use super::{MaskingStrategy, StrategyState, TypeTemplates};
use crate::entity::EntityType;
use crate::error::MaskingError;
use crate::store::MappingStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

fn numbered(
    templates: &TypeTemplates,
    entity_type: EntityType,
    state: &mut StrategyState,
) -> String {
    format!("{} {}", templates.get(entity_type), state.next(entity_type))
}

/// Numbers each new value per type: `"{label} {counter}"`
///
/// Counters live in [`StrategyState`] and are persisted with the mapping, so
/// numbering continues across restarts.
#[derive(Debug, Clone, Default)]
pub struct ContextAwareStrategy {
    templates: TypeTemplates,
}

impl ContextAwareStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_templates(templates: TypeTemplates) -> Self {
        Self { templates }
    }

    pub fn set_template(&mut self, entity_type: EntityType, label: impl Into<String>) {
        self.templates.set(entity_type, label);
    }
}

impl MaskingStrategy for ContextAwareStrategy {
    fn name(&self) -> &'static str {
        "context"
    }

    fn generate(
        &self,
        _original: &str,
        entity_type: EntityType,
        state: &mut StrategyState,
    ) -> String {
        numbered(&self.templates, entity_type, state)
    }
}

/// Numbered tokens plus caller-managed custom replacements
///
/// Replacements are kept as overrides in the shared [`MappingStore`], so they
/// are persisted with the mapping and honoured by every strategy.
/// [`generate`](MaskingStrategy::generate) is only reached for values without
/// an override and never locks the store.
#[derive(Debug, Clone)]
pub struct HybridStrategy {
    templates: TypeTemplates,
    store: Arc<Mutex<MappingStore>>,
}

impl HybridStrategy {
    pub fn new(store: Arc<Mutex<MappingStore>>) -> Self {
        Self::with_templates(TypeTemplates::default(), store)
    }

    pub fn with_templates(templates: TypeTemplates, store: Arc<Mutex<MappingStore>>) -> Self {
        Self { templates, store }
    }

    /// Register a fixed replacement for `original` and save the mapping
    ///
    /// Nothing is changed on rejection.
    pub async fn set_custom_replacement(
        &self,
        original: &str,
        replacement: &str,
    ) -> Result<(), MaskingError> {
        let mut store = self.store.lock().await;
        store.register_custom(original, replacement)?;
        debug!(replacement = %replacement, "Hybrid replacement registered");
        store.save();
        Ok(())
    }

    /// Remove a registered replacement; returns whether one existed
    pub async fn remove_custom_replacement(&self, original: &str) -> bool {
        let mut store = self.store.lock().await;
        let removed = store.remove_custom(original);
        if removed {
            store.save();
        }
        removed
    }

    pub async fn custom_replacements(&self) -> BTreeMap<String, String> {
        self.store.lock().await.custom_overrides().clone()
    }

    /// Restore every token the mapping knows, including replacements
    pub async fn unmask(&self, text: &str) -> String {
        self.store.lock().await.restore(text)
    }
}

impl MaskingStrategy for HybridStrategy {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn generate(
        &self,
        _original: &str,
        entity_type: EntityType,
        state: &mut StrategyState,
    ) -> String {
        numbered(&self.templates, entity_type, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_numbers_per_type() {
        let strategy = ContextAwareStrategy::new();
        let mut state = StrategyState::default();
        assert_eq!(strategy.generate("张三", EntityType::Person, &mut state), "某人 1");
        assert_eq!(strategy.generate("李四", EntityType::Person, &mut state), "某人 2");
        assert_eq!(
            strategy.generate("腾讯", EntityType::Organization, &mut state),
            "某机构 1"
        );
        assert_eq!(state.current(EntityType::Person), 2);
    }

    #[test]
    fn test_context_continues_from_restored_counter() {
        let mut strategy = ContextAwareStrategy::new();
        strategy.set_template(EntityType::Person, "Person");
        let mut state = StrategyState::default();
        state.observe(EntityType::Person, 41);
        assert_eq!(strategy.generate("x", EntityType::Person, &mut state), "Person 42");
    }

    fn shared_store() -> Arc<Mutex<MappingStore>> {
        Arc::new(Mutex::new(MappingStore::in_memory()))
    }

    #[tokio::test]
    async fn test_hybrid_override_and_unmask() {
        let store = shared_store();
        let strategy = HybridStrategy::new(store.clone());
        strategy.set_custom_replacement("张三", "甲方").await.unwrap();

        let (a, b) = {
            let mut guard = store.lock().await;
            let a = guard.resolve("张三", EntityType::Person, &strategy);
            let b = guard.resolve("李四", EntityType::Person, &strategy);
            (a, b)
        };
        assert_eq!(a, "甲方");
        assert_eq!(b, "某人 1");
        assert_eq!(store.lock().await.counters().current(EntityType::Person), 1);

        assert_eq!(strategy.unmask("甲方和某人 1见面").await, "张三和李四见面");
    }

    #[tokio::test]
    async fn test_hybrid_unmask_prefers_longer_tokens() {
        let store = shared_store();
        let strategy = HybridStrategy::new(store.clone());
        {
            let mut guard = store.lock().await;
            for i in 1..=12 {
                guard.resolve(&format!("人{}", i), EntityType::Person, &strategy);
            }
        }
        assert_eq!(strategy.unmask("某人 12 与 某人 1").await, "人12 与 人1");
    }

    #[tokio::test]
    async fn test_hybrid_replacements_live_in_the_store() {
        let store = shared_store();
        let strategy = HybridStrategy::new(store.clone());
        assert!(matches!(
            strategy.set_custom_replacement("", "x").await,
            Err(MaskingError::InvalidReplacement)
        ));
        assert!(strategy.custom_replacements().await.is_empty());

        strategy.set_custom_replacement("张三", "甲方").await.unwrap();
        assert_eq!(store.lock().await.custom_overrides().get("张三").unwrap(), "甲方");

        // Registered through the store directly, visible to the strategy
        store.lock().await.register_custom("李四", "乙方").unwrap();
        assert_eq!(strategy.custom_replacements().await.len(), 2);

        assert!(strategy.remove_custom_replacement("张三").await);
        assert!(!strategy.remove_custom_replacement("张三").await);
        assert_eq!(strategy.unmask("甲方").await, "甲方");
        assert_eq!(strategy.unmask("乙方").await, "李四");
    }
}
