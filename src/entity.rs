//! Entity types shared by detectors, strategies and the mapping store.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock, PoisonError};
use tracing::warn;

/// Distinct unknown labels kept before further ones collapse to `DEFAULT`
pub const MAX_OTHER_LABELS: usize = 256;

/// Shared copy of `label`, so `EntityType` stays `Copy`
fn intern_label(label: String) -> Option<&'static str> {
    static LABELS: OnceLock<Mutex<HashSet<&'static str>>> = OnceLock::new();
    let mut labels = LABELS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if let Some(existing) = labels.get(label.as_str()) {
        return Some(*existing);
    }
    if labels.len() >= MAX_OTHER_LABELS {
        warn!(label = %label, "Too many distinct entity labels, using DEFAULT");
        return None;
    }
    let leaked: &'static str = Box::leak(label.into_boxed_str());
    labels.insert(leaked);
    Some(leaked)
}

/// Kinds of sensitive entity the engine knows how to mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(into = "String")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Gpe,
    Phone,
    IdCard,
    BankCard,
    Email,
    IpAddress,
    Date,
    Time,
    Money,
    /// Values registered as custom replacements
    Custom,
    /// Catch-all used when a label is missing or cannot be kept
    #[default]
    Default,
    /// Any other label a detector reports (PRODUCT, NORP, ...), upper-cased
    Other(&'static str),
}

impl EntityType {
    /// All built-in types, in the order regex patterns and templates are listed
    pub const ALL: [EntityType; 14] = [
        EntityType::Person,
        EntityType::Organization,
        EntityType::Location,
        EntityType::Gpe,
        EntityType::Phone,
        EntityType::IdCard,
        EntityType::BankCard,
        EntityType::Email,
        EntityType::IpAddress,
        EntityType::Date,
        EntityType::Time,
        EntityType::Money,
        EntityType::Custom,
        EntityType::Default,
    ];

    /// Get the label used in persisted mappings and detector output
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "PER",
            EntityType::Organization => "ORG",
            EntityType::Location => "LOC",
            EntityType::Gpe => "GPE",
            EntityType::Phone => "PHONE",
            EntityType::IdCard => "ID",
            EntityType::BankCard => "BANK",
            EntityType::Email => "EMAIL",
            EntityType::IpAddress => "IP",
            EntityType::Date => "DATE",
            EntityType::Time => "TIME",
            EntityType::Money => "MONEY",
            EntityType::Custom => "CUSTOM",
            EntityType::Default => "DEFAULT",
            EntityType::Other(label) => label,
        }
    }

    /// Parse a label leniently
    ///
    /// Unknown labels are kept as [`EntityType::Other`]; an empty label, or
    /// one arriving after [`MAX_OTHER_LABELS`] distinct labels were seen,
    /// becomes `Default`.
    pub fn from_label(label: &str) -> Self {
        if let Ok(known) = label.parse() {
            return known;
        }
        let label = label.trim().to_uppercase();
        if label.is_empty() {
            return EntityType::Default;
        }
        intern_label(label).map_or(EntityType::Default, EntityType::Other)
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        EntityType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| format!("Invalid entity type: {}", s))
    }
}

impl From<String> for EntityType {
    fn from(label: String) -> Self {
        EntityType::from_label(&label)
    }
}

impl<'de> Deserialize<'de> for EntityType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(EntityType::from)
    }
}

impl From<EntityType> for String {
    fn from(entity_type: EntityType) -> Self {
        entity_type.as_str().to_string()
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sensitive span reported by a detector
///
/// Offsets are byte offsets into the text the detector was given. They are
/// only used to locate the span; masking replaces by span text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub span: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub end: usize,
    #[serde(alias = "prob", default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.95
}

impl Entity {
    pub fn new(
        span: impl Into<String>,
        entity_type: EntityType,
        start: usize,
        confidence: f64,
    ) -> Self {
        let span = span.into();
        let end = start + span.len();
        Self {
            span,
            entity_type,
            start,
            end,
            confidence,
        }
    }

    /// Shift offsets by `offset`, used when merging chunked detection results
    pub fn shifted(mut self, offset: usize) -> Self {
        self.start += offset;
        self.end += offset;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_labels_round_trip() {
        for t in EntityType::ALL {
            assert_eq!(t.as_str().parse::<EntityType>().unwrap(), t);
        }
        assert_eq!("per".parse::<EntityType>().unwrap(), EntityType::Person);
        assert!("NOPE".parse::<EntityType>().is_err());
        assert_eq!(EntityType::from_label(""), EntityType::Default);
    }

    #[test]
    fn test_unknown_labels_are_kept() {
        let product = EntityType::from_label("product");
        assert_eq!(product, EntityType::Other("PRODUCT"));
        assert_eq!(product.as_str(), "PRODUCT");
        assert_eq!(EntityType::from_label(" PRODUCT "), product);
        assert_ne!(EntityType::from_label("NORP"), product);
        assert_eq!(EntityType::from(product.as_str().to_string()), product);
    }

    #[test]
    fn test_entity_deserializes_detector_output() {
        let json = r#"{"span": "张三", "type": "PER", "start": 0, "end": 6, "prob": 0.8}"#;
        let entity: Entity = serde_json::from_str(json).unwrap();
        assert_eq!(entity.entity_type, EntityType::Person);
        assert!((entity.confidence - 0.8).abs() < f64::EPSILON);

        let json = r#"{"span": "x", "type": "PRODUCT"}"#;
        let entity: Entity = serde_json::from_str(json).unwrap();
        assert_eq!(entity.entity_type, EntityType::Other("PRODUCT"));
        assert!((entity.confidence - 0.95).abs() < f64::EPSILON);
    }
}
