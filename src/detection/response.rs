//! Parsing of entity lists returned by LLM-backed detectors.
//!
//! Model output is free text that usually, but not always, contains a JSON
//! array of `{span, type, start?, end?, prob?}` objects. Anything that cannot
//! be understood yields no entities rather than an error.

use crate::entity::{Entity, EntityType};
use serde_json::Value;
use tracing::debug;

/// Confidence assigned when the model omits one
const DEFAULT_CONFIDENCE: f64 = 0.95;

/// Extract entities from a detector response for `source`
///
/// Items missing `start`/`end` are located by searching `source` for the
/// span; items whose span does not occur are dropped.
pub fn parse_detector_response(response: &str, source: &str) -> Vec<Entity> {
    let payload = match (response.find('['), response.rfind(']')) {
        (Some(open), Some(close)) if open < close => &response[open..=close],
        _ => response.trim(),
    };

    let items: Vec<Value> = match serde_json::from_str(payload) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            debug!("Detector response is not a JSON array");
            return Vec::new();
        }
        Err(e) => {
            debug!(error = %e, "Detector response is not valid JSON");
            return Vec::new();
        }
    };

    items
        .iter()
        .filter_map(|item| parse_item(item, source))
        .collect()
}

fn parse_item(item: &Value, source: &str) -> Option<Entity> {
    let span = item.get("span")?.as_str()?;
    let label = item.get("type")?.as_str()?;
    if span.is_empty() {
        return None;
    }

    let offsets = match (
        item.get("start").and_then(Value::as_u64),
        item.get("end").and_then(Value::as_u64),
    ) {
        (Some(start), Some(end)) => (start as usize, end as usize),
        _ => {
            let start = source.find(span)?;
            (start, start + span.len())
        }
    };

    let confidence = item
        .get("prob")
        .or_else(|| item.get("confidence"))
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_CONFIDENCE);

    Some(Entity {
        span: span.to_string(),
        entity_type: EntityType::from_label(label),
        start: offsets.0,
        end: offsets.1,
        confidence,
    })
}
