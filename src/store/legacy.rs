//! Adapters for mapping files written by the pickle-based releases.
//!
//! Those releases pickled one of three layouts:
//!
//! 1. `{token: (original, type)}`
//! 2. `(token map, {(original, type): token})`
//! 3. `(token map, entity index, {original: replacement})`
//!
//! Entries without the expected shape are skipped; the rest still load.

use super::persist::{DecodeError, LoadedState};
use super::MaskRecord;
use crate::entity::EntityType;
use crate::strategy::StrategyState;
use serde_pickle::{HashableValue, Value};
use std::collections::BTreeMap;
use tracing::debug;

type PickleDict = BTreeMap<HashableValue, Value>;

pub(crate) fn decode(value: Value) -> Result<LoadedState, DecodeError> {
    let parts = match value {
        Value::Dict(tokens) => return Ok(assemble(tokens, None, None, "legacy-v1a")),
        Value::Tuple(parts) => parts,
        _ => return Err(DecodeError::LegacyLayout),
    };

    let mut parts = parts.into_iter();
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(Value::Dict(tokens)), Some(Value::Dict(entities)), None, None) => {
            Ok(assemble(tokens, Some(entities), None, "legacy-v1b"))
        }
        (
            Some(Value::Dict(tokens)),
            Some(Value::Dict(entities)),
            Some(Value::Dict(overrides)),
            None,
        ) => Ok(assemble(tokens, Some(entities), Some(overrides), "legacy-v1c")),
        _ => Err(DecodeError::LegacyLayout),
    }
}

fn assemble(
    tokens: PickleDict,
    entities: Option<PickleDict>,
    overrides: Option<PickleDict>,
    format: &'static str,
) -> LoadedState {
    let total = tokens.len();
    let records: Vec<MaskRecord> = tokens
        .into_iter()
        .filter_map(|(token, value)| {
            let token = hashable_text(token)?;
            let (original, label) = text_pair(value)?;
            Some(MaskRecord {
                token,
                original,
                entity_type: EntityType::from_label(&label),
            })
        })
        .collect();
    if records.len() < total {
        debug!(skipped = total - records.len(), "Skipped malformed legacy tokens");
    }

    let entity_index = entities
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, token)| {
            let HashableValue::Tuple(key) = key else {
                return None;
            };
            let mut key = key.into_iter();
            let (original, label) = match (key.next(), key.next(), key.next()) {
                (Some(original), Some(label), None) => {
                    (hashable_text(original)?, hashable_text(label)?)
                }
                _ => return None,
            };
            Some((original, EntityType::from_label(&label), text(token)?))
        })
        .collect();

    let custom_overrides = overrides
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(original, replacement)| Some((hashable_text(original)?, text(replacement)?)))
        .collect();

    LoadedState {
        records,
        entity_index,
        counters: StrategyState::default(),
        custom_overrides,
        format,
    }
}

fn hashable_text(value: HashableValue) -> Option<String> {
    match value {
        HashableValue::String(s) => Some(s),
        HashableValue::Bytes(b) => String::from_utf8(b).ok(),
        _ => None,
    }
}

fn text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Bytes(b) => String::from_utf8(b).ok(),
        _ => None,
    }
}

/// `(original, type)` stored as a tuple or list
fn text_pair(value: Value) -> Option<(String, String)> {
    let (Value::Tuple(items) | Value::List(items)) = value else {
        return None;
    };
    let mut items = items.into_iter();
    match (items.next(), items.next(), items.next()) {
        (Some(first), Some(second), None) => Some((text(first)?, text(second)?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(entries: Vec<(HashableValue, Value)>) -> Value {
        Value::Dict(entries.into_iter().collect())
    }

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    fn hs(v: &str) -> HashableValue {
        HashableValue::String(v.to_string())
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let tokens = dict(vec![
            (hs("某人 1"), Value::Tuple(vec![s("张三"), s("PER")])),
            (hs("broken"), s("not a pair")),
            (HashableValue::I64(7), Value::Tuple(vec![s("x"), s("PER")])),
        ]);
        let state = decode(tokens).unwrap();
        assert_eq!(state.format, "legacy-v1a");
        assert_eq!(state.records.len(), 1);
        assert_eq!(state.records[0].original, "张三");
    }

    #[test]
    fn test_bytes_values_are_accepted() {
        let tokens = dict(vec![(
            HashableValue::Bytes("某人 1".as_bytes().to_vec()),
            Value::List(vec![Value::Bytes(b"abc".to_vec()), s("PER")]),
        )]);
        let state = decode(tokens).unwrap();
        assert_eq!(state.records[0].token, "某人 1");
        assert_eq!(state.records[0].original, "abc");
    }

    #[test]
    fn test_unknown_layouts_are_rejected() {
        assert!(matches!(
            decode(Value::List(vec![])),
            Err(DecodeError::LegacyLayout)
        ));
        assert!(matches!(
            decode(Value::Tuple(vec![dict(vec![])])),
            Err(DecodeError::LegacyLayout)
        ));
        let four = Value::Tuple(vec![dict(vec![]), dict(vec![]), dict(vec![]), dict(vec![])]);
        assert!(matches!(decode(four), Err(DecodeError::LegacyLayout)));
    }
}
