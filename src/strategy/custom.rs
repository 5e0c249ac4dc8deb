//! Caller-supplied replacements with opaque fallback tokens.

use super::{MaskingStrategy, StrategyState};
use crate::entity::EntityType;
use std::collections::HashMap;
use uuid::Uuid;

/// Uses a registered replacement when one exists, otherwise `__CUSTOM_<8 hex>__`
///
/// Fallback tokens are recorded by the mapping store, so a value keeps its
/// token for as long as the mapping lives.
#[derive(Debug, Clone, Default)]
pub struct CustomReplacementStrategy {
    replacements: HashMap<String, String>,
}

impl CustomReplacementStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`set_replacement`](Self::set_replacement)
    pub fn with_replacement(
        mut self,
        original: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        self.set_replacement(original, replacement);
        self
    }

    pub fn set_replacement(&mut self, original: impl Into<String>, replacement: impl Into<String>) {
        self.replacements.insert(original.into(), replacement.into());
    }

    pub fn remove_replacement(&mut self, original: &str) -> bool {
        self.replacements.remove(original).is_some()
    }

    pub fn replacements(&self) -> &HashMap<String, String> {
        &self.replacements
    }
}

impl MaskingStrategy for CustomReplacementStrategy {
    fn name(&self) -> &'static str {
        "custom"
    }

    fn generate(
        &self,
        original: &str,
        _entity_type: EntityType,
        _state: &mut StrategyState,
    ) -> String {
        match self.replacements.get(original) {
            Some(replacement) => replacement.clone(),
            None => format!("__CUSTOM_{}__", &Uuid::new_v4().simple().to_string()[..8]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_replacement_wins() {
        let strategy = CustomReplacementStrategy::new().with_replacement("张三", "甲");
        let mut state = StrategyState::default();
        assert_eq!(strategy.generate("张三", EntityType::Person, &mut state), "甲");
    }

    #[test]
    fn test_fallback_token_shape() {
        let mut strategy = CustomReplacementStrategy::new().with_replacement("张三", "甲");
        assert!(strategy.remove_replacement("张三"));
        assert!(!strategy.remove_replacement("张三"));

        let mut state = StrategyState::default();
        let token = strategy.generate("张三", EntityType::Person, &mut state);
        assert!(token.starts_with("__CUSTOM_") && token.ends_with("__"));
        assert_eq!(token.len(), "__CUSTOM_".len() + 8 + 2);
    }
}
