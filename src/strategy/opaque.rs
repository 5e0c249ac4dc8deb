//! Opaque random tokens carrying only the entity type.

use super::{MaskingStrategy, StrategyState};
use crate::entity::EntityType;
use uuid::Uuid;

/// Replaces values with `__MASKED_<type>_<8 hex>__`
///
/// The default strategy. Tokens are random, so they reveal nothing about the
/// original, and they match the unmask lexical pattern.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpaqueStrategy;

impl MaskingStrategy for OpaqueStrategy {
    fn name(&self) -> &'static str {
        "opaque"
    }

    fn generate(
        &self,
        _original: &str,
        entity_type: EntityType,
        _state: &mut StrategyState,
    ) -> String {
        format!(
            "__MASKED_{}_{}__",
            type_tag(entity_type),
            &Uuid::new_v4().simple().to_string()[..8]
        )
    }
}

/// Lower-case ASCII letters of the type label, so tokens keep their shape
fn type_tag(entity_type: EntityType) -> String {
    let tag: String = entity_type
        .as_str()
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if tag.is_empty() {
        "default".to_string()
    } else {
        tag
    }
}
