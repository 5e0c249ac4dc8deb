//! Pattern-based detection of structurally recognizable entities.
//!
//! Detects phone numbers, national ID numbers, bank cards, emails, IPv4
//! addresses, dates, times and money amounts. Every match is certain by
//! construction and reported with confidence 1.0.

use crate::entity::{Entity, EntityType};
use crate::error::MaskingError;
use regex::Regex;

/// One row of the pattern table
#[derive(Debug, Clone)]
struct PatternRule {
    entity_type: EntityType,
    regex: Regex,
    /// Reject matches that sit inside a longer run of digits
    digit_bounded: bool,
}

impl PatternRule {
    fn new(entity_type: EntityType, pattern: &str, digit_bounded: bool) -> Self {
        Self {
            entity_type,
            regex: Regex::new(pattern)
                .unwrap_or_else(|e| panic!("Invalid {} regex: {}", entity_type, e)),
            digit_bounded,
        }
    }

    /// Non-overlapping matches as `(start, end)` byte ranges
    fn find_all(&self, text: &str) -> Vec<(usize, usize)> {
        let mut found = Vec::new();
        let mut pos = 0;

        while pos <= text.len() {
            let Some(m) = self.regex.find_at(text, pos) else {
                break;
            };

            if !self.digit_bounded || is_digit_bounded(text, m.start(), m.end()) {
                found.push((m.start(), m.end()));
                // Empty matches would otherwise loop forever
                pos = if m.end() > m.start() {
                    m.end()
                } else {
                    next_char_boundary(text, m.end())
                };
            } else {
                // Retry one character later so a valid match starting inside
                // the rejected one is not lost
                pos = next_char_boundary(text, m.start());
            }
        }

        found
    }
}

fn is_digit_bounded(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(|c| c.is_ascii_digit()) && !after.is_some_and(|c| c.is_ascii_digit())
}

fn next_char_boundary(text: &str, pos: usize) -> usize {
    text[pos..]
        .chars()
        .next()
        .map(|c| pos + c.len_utf8())
        .unwrap_or(text.len() + 1)
}

/// Detector for entities with a fixed lexical shape
#[derive(Debug, Clone)]
pub struct RegexDetector {
    rules: Vec<PatternRule>,
}

impl Default for RegexDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl RegexDetector {
    /// Create a detector with the built-in pattern table
    pub fn new() -> Self {
        Self {
            rules: vec![
                // Mobile numbers and landlines with optional area-code hyphen
                PatternRule::new(
                    EntityType::Phone,
                    r"1[3-9][0-9]{9}|0[0-9]{2,3}-?[0-9]{7,8}",
                    true,
                ),
                PatternRule::new(EntityType::IdCard, r"[0-9]{17}[0-9Xx]", true),
                // Longest alternative first so 19-digit cards are not cut to 16
                PatternRule::new(EntityType::BankCard, r"[0-9]{19}|[0-9]{16}", true),
                PatternRule::new(
                    EntityType::Email,
                    r"[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9.-]+",
                    false,
                ),
                PatternRule::new(
                    EntityType::IpAddress,
                    r"(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)",
                    true,
                ),
                PatternRule::new(
                    EntityType::Date,
                    r"[0-9]{4}[-/年][0-9]{1,2}[-/月][0-9]{1,2}日?",
                    false,
                ),
                PatternRule::new(
                    EntityType::Time,
                    r"[0-9]{1,2}:[0-9]{1,2}(?::[0-9]{1,2})?",
                    false,
                ),
                PatternRule::new(
                    EntityType::Money,
                    r"[0-9]+(?:\.[0-9]+)?(?:万元|亿元|美元|欧元|元)",
                    false,
                ),
            ],
        }
    }

    /// Create a detector with no patterns
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a pattern, replacing any existing pattern for the same type
    pub fn add_pattern(
        &mut self,
        entity_type: EntityType,
        pattern: &str,
    ) -> Result<(), MaskingError> {
        let regex = Regex::new(pattern).map_err(|source| MaskingError::InvalidPattern {
            entity_type: entity_type.to_string(),
            source,
        })?;

        let rule = PatternRule {
            entity_type,
            regex,
            digit_bounded: false,
        };
        match self.rules.iter_mut().find(|r| r.entity_type == entity_type) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
        Ok(())
    }

    /// Entity types this detector has patterns for
    pub fn entity_types(&self) -> Vec<EntityType> {
        self.rules.iter().map(|r| r.entity_type).collect()
    }

    /// Detect all pattern matches in text
    ///
    /// Patterns run independently; a span matched by two types is reported
    /// once per type.
    pub fn detect(&self, text: &str) -> Vec<Entity> {
        let mut entities = Vec::new();

        for rule in &self.rules {
            for (start, end) in rule.find_all(text) {
                entities.push(Entity {
                    span: text[start..end].to_string(),
                    entity_type: rule.entity_type,
                    start,
                    end,
                    confidence: 1.0,
                });
            }
        }

        entities.sort_by_key(|e| e.start);
        entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types_of(entities: &[Entity]) -> Vec<EntityType> {
        entities.iter().map(|e| e.entity_type).collect()
    }

    #[test]
    fn test_detects_mobile_phone() {
        let detector = RegexDetector::new();
        let entities = detector.detect("call 13800001000 now");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity_type, EntityType::Phone);
        assert_eq!(entities[0].span, "13800001000");
        assert_eq!(entities[0].start, 5);
        assert_eq!(entities[0].end, 16);
        assert_eq!(entities[0].confidence, 1.0);
    }

    #[test]
    fn test_detects_landline() {
        let detector = RegexDetector::new();
        let entities = detector.detect("办公电话010-12345678。");
        assert_eq!(types_of(&entities), vec![EntityType::Phone]);
        assert_eq!(entities[0].span, "010-12345678");
    }

    #[test]
    fn test_phone_inside_longer_number_ignored() {
        let detector = RegexDetector::new();
        let entities = detector.detect("编号 9913800001000999");
        assert!(!entities.iter().any(|e| e.entity_type == EntityType::Phone));
    }

    #[test]
    fn test_detects_id_card() {
        let detector = RegexDetector::new();
        let entities = detector.detect("身份证号11010519491231002X。");
        assert_eq!(types_of(&entities), vec![EntityType::IdCard]);
        assert_eq!(entities[0].span, "11010519491231002X");
    }

    #[test]
    fn test_detects_bank_cards() {
        let detector = RegexDetector::new();
        let entities = detector.detect("卡号6222020200112233445，备用卡6222020200112233。");
        let cards: Vec<&str> = entities
            .iter()
            .filter(|e| e.entity_type == EntityType::BankCard)
            .map(|e| e.span.as_str())
            .collect();
        assert_eq!(cards, vec!["6222020200112233445", "6222020200112233"]);
    }

    #[test]
    fn test_detects_email_and_ip() {
        let detector = RegexDetector::new();
        let entities = detector.detect("mail zhang.san@example.com from 203.0.113.7");
        assert_eq!(
            types_of(&entities),
            vec![EntityType::Email, EntityType::IpAddress]
        );
        assert_eq!(entities[0].span, "zhang.san@example.com");
        assert_eq!(entities[1].span, "203.0.113.7");
    }

    #[test]
    fn test_detects_date_time_money() {
        let detector = RegexDetector::new();
        let entities = detector.detect("2023年5月12日 14:30 支付3.5万元");
        let spans: Vec<(EntityType, &str)> = entities
            .iter()
            .map(|e| (e.entity_type, e.span.as_str()))
            .collect();
        assert!(spans.contains(&(EntityType::Date, "2023年5月12日")));
        assert!(spans.contains(&(EntityType::Time, "14:30")));
        assert!(spans.contains(&(EntityType::Money, "3.5万元")));
    }

    #[test]
    fn test_add_pattern_replaces_and_rejects_invalid() {
        let mut detector = RegexDetector::empty();
        detector
            .add_pattern(EntityType::Custom, r"CASE-[0-9]+")
            .unwrap();
        detector
            .add_pattern(EntityType::Custom, r"CASE-[0-9]{4}")
            .unwrap();
        assert_eq!(detector.entity_types(), vec![EntityType::Custom]);

        let entities = detector.detect("see CASE-12345");
        assert_eq!(entities[0].span, "CASE-1234");

        let err = detector.add_pattern(EntityType::Custom, r"(unclosed");
        assert!(matches!(err, Err(MaskingError::InvalidPattern { .. })));
    }

    #[test]
    fn test_no_entities() {
        let detector = RegexDetector::new();
        assert!(detector.detect("Hello, how are you today?").is_empty());
    }
}
