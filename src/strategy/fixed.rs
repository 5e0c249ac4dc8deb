//! Constant replacement for every value.

use super::{MaskingStrategy, StrategyState};
use crate::entity::EntityType;

pub const DEFAULT_REPLACEMENT: &str = "***";

/// Replaces every entity with the same text
///
/// Lossy: masked output cannot be restored.
#[derive(Debug, Clone)]
pub struct FixedReplacementStrategy {
    replacement: String,
}

impl Default for FixedReplacementStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_REPLACEMENT)
    }
}

impl FixedReplacementStrategy {
    pub fn new(replacement: impl Into<String>) -> Self {
        Self {
            replacement: replacement.into(),
        }
    }
}

impl MaskingStrategy for FixedReplacementStrategy {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn generate(
        &self,
        _original: &str,
        _entity_type: EntityType,
        _state: &mut StrategyState,
    ) -> String {
        self.replacement.clone()
    }

    fn is_reversible(&self) -> bool {
        false
    }
}
