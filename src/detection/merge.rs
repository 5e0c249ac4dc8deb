//! Merging of entity lists from several detectors.

use crate::entity::{Entity, EntityType};
use std::collections::HashMap;

/// Merges detector output and deduplicates it by `(span, type)`
pub struct EntityMerger;

impl EntityMerger {
    /// Merge entities, keeping the highest-confidence instance per key
    ///
    /// Ties keep the first entity seen. Spans that overlap without being
    /// identical are left alone and will be masked independently.
    pub fn merge(entities: impl IntoIterator<Item = Entity>) -> Vec<Entity> {
        let mut slots: HashMap<(String, EntityType), usize> = HashMap::new();
        let mut merged: Vec<Entity> = Vec::new();

        for entity in entities {
            let key = (entity.span.clone(), entity.entity_type);
            match slots.get(&key) {
                Some(&idx) => {
                    if entity.confidence > merged[idx].confidence {
                        merged[idx] = entity;
                    }
                }
                None => {
                    slots.insert(key, merged.len());
                    merged.push(entity);
                }
            }
        }

        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_highest_confidence() {
        let merged = EntityMerger::merge(vec![
            Entity::new("张三", EntityType::Person, 0, 0.7),
            Entity::new("张三", EntityType::Person, 30, 0.95),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].confidence, 0.95);
        assert_eq!(merged[0].start, 30);
    }

    #[test]
    fn test_tie_keeps_first_seen() {
        let merged = EntityMerger::merge(vec![
            Entity::new("张三", EntityType::Person, 0, 0.9),
            Entity::new("张三", EntityType::Person, 12, 0.9),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].start, 0);
    }

    #[test]
    fn test_same_span_different_type_kept() {
        let merged = EntityMerger::merge(vec![
            Entity::new("长江", EntityType::Location, 0, 0.9),
            Entity::new("长江", EntityType::Organization, 0, 0.6),
            Entity::new("13800001000", EntityType::Phone, 10, 1.0),
        ]);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_empty_input() {
        assert!(EntityMerger::merge(Vec::new()).is_empty());
    }
}
