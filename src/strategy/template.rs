//! Per-type display labels.

use super::{MaskingStrategy, StrategyState};
use crate::entity::EntityType;
use std::collections::HashMap;

const FALLBACK_LABEL: &str = "***";

/// Human-readable label for each entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeTemplates {
    labels: HashMap<EntityType, String>,
}

impl Default for TypeTemplates {
    fn default() -> Self {
        let labels = [
            (EntityType::Person, "某人"),
            (EntityType::Organization, "某机构"),
            (EntityType::Location, "某地点"),
            (EntityType::Gpe, "某地区"),
            (EntityType::Phone, "电话号码"),
            (EntityType::IdCard, "身份证号"),
            (EntityType::BankCard, "银行卡号"),
            (EntityType::Email, "电子邮箱"),
            (EntityType::IpAddress, "IP地址"),
            (EntityType::Date, "某日期"),
            (EntityType::Time, "某时间"),
            (EntityType::Money, "某金额"),
            (EntityType::Default, FALLBACK_LABEL),
        ]
        .into_iter()
        .map(|(t, label)| (t, label.to_string()))
        .collect();
        Self { labels }
    }
}

impl TypeTemplates {
    /// Label for `entity_type`, falling back to the `DEFAULT` label
    pub fn get(&self, entity_type: EntityType) -> &str {
        self.labels
            .get(&entity_type)
            .or_else(|| self.labels.get(&EntityType::Default))
            .map(String::as_str)
            .unwrap_or(FALLBACK_LABEL)
    }

    pub fn set(&mut self, entity_type: EntityType, label: impl Into<String>) {
        self.labels.insert(entity_type, label.into());
    }
}

impl Extend<(EntityType, String)> for TypeTemplates {
    fn extend<I: IntoIterator<Item = (EntityType, String)>>(&mut self, iter: I) {
        self.labels.extend(iter);
    }
}

/// Replaces every value with its type label, e.g. any person becomes "某人"
///
/// Lossy: intended for display-only redaction.
#[derive(Debug, Clone, Default)]
pub struct TypeTemplateStrategy {
    templates: TypeTemplates,
}

impl TypeTemplateStrategy {
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

impl MaskingStrategy for TypeTemplateStrategy {
    fn name(&self) -> &'static str {
        "template"
    }

    fn generate(
        &self,
        _original: &str,
        entity_type: EntityType,
        _state: &mut StrategyState,
    ) -> String {
        self.templates.get(entity_type).to_string()
    }

    fn is_reversible(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_labels() {
        let templates = TypeTemplates::default();
        assert_eq!(templates.get(EntityType::Person), "某人");
        assert_eq!(templates.get(EntityType::Money), "某金额");
        assert_eq!(templates.get(EntityType::Custom), "***");
    }

    #[test]
    fn test_many_originals_collapse_to_label() {
        let mut strategy = TypeTemplateStrategy::new();
        strategy.set_template(EntityType::Person, "Someone");
        let mut state = StrategyState::default();
        assert_eq!(strategy.generate("张三", EntityType::Person, &mut state), "Someone");
        assert_eq!(strategy.generate("李四", EntityType::Person, &mut state), "Someone");
        assert!(!strategy.is_reversible());
    }
}
