//! On-disk format of the mapping store.
//!
//! Current files are a versioned JSON object. Files written by the older
//! pickle-based releases are still accepted on load; see [`super::legacy`].

use super::MaskRecord;
use crate::entity::EntityType;
use crate::strategy::StrategyState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version written by this release
pub const SNAPSHOT_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    pub original: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredEntityEntry {
    pub original: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub token: String,
}

/// Current on-disk format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub version: u32,
    pub tokens: BTreeMap<String, StoredRecord>,
    pub entities: Vec<StoredEntityEntry>,
    #[serde(default)]
    pub counters: BTreeMap<String, u64>,
    #[serde(default)]
    pub custom_overrides: BTreeMap<String, String>,
}

/// Decoded file contents, independent of the shape they came from
#[derive(Debug, Default)]
pub(crate) struct LoadedState {
    pub records: Vec<MaskRecord>,
    /// `(original, type, token)`; empty means "derive from records"
    pub entity_index: Vec<(String, EntityType, String)>,
    pub counters: StrategyState,
    pub custom_overrides: BTreeMap<String, String>,
    /// Name of the shape that was decoded, for logging
    pub format: &'static str,
}

/// Why a mapping file could not be decoded
#[derive(Debug, thiserror::Error)]
pub(crate) enum DecodeError {
    #[error("unrecognized mapping format (as JSON: {json}; as pickle: {pickle})")]
    Unrecognized {
        json: serde_json::Error,
        pickle: serde_pickle::Error,
    },
    #[error("unsupported mapping version {0}")]
    UnsupportedVersion(u32),
    #[error("pickled mapping has an unknown layout")]
    LegacyLayout,
}

pub(crate) fn decode(bytes: &[u8]) -> Result<LoadedState, DecodeError> {
    let json = match serde_json::from_slice::<Snapshot>(bytes) {
        Ok(snapshot) => return from_snapshot(snapshot),
        Err(e) => e,
    };
    match serde_pickle::value_from_slice(bytes, serde_pickle::DeOptions::new()) {
        Ok(value) => super::legacy::decode(value),
        Err(pickle) => Err(DecodeError::Unrecognized { json, pickle }),
    }
}

fn from_snapshot(snapshot: Snapshot) -> Result<LoadedState, DecodeError> {
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(DecodeError::UnsupportedVersion(snapshot.version));
    }

    let records = snapshot
        .tokens
        .into_iter()
        .map(|(token, r)| MaskRecord {
            token,
            original: r.original,
            entity_type: r.entity_type,
        })
        .collect();
    let entity_index = snapshot
        .entities
        .into_iter()
        .map(|e| (e.original, e.entity_type, e.token))
        .collect();

    let mut counters = StrategyState::default();
    for (label, value) in snapshot.counters {
        counters.observe(EntityType::from_label(&label), value);
    }

    Ok(LoadedState {
        records,
        entity_index,
        counters,
        custom_overrides: snapshot.custom_overrides,
        format: "v2",
    })
}

/// Encode the full store state as the current format
pub(crate) fn encode<'a>(
    records: impl Iterator<Item = &'a MaskRecord>,
    entity_index: impl Iterator<Item = (&'a (String, EntityType), &'a String)>,
    counters: &StrategyState,
    custom_overrides: &BTreeMap<String, String>,
) -> Result<Vec<u8>, serde_json::Error> {
    let tokens = records
        .map(|r| {
            (
                r.token.clone(),
                StoredRecord {
                    original: r.original.clone(),
                    entity_type: r.entity_type,
                },
            )
        })
        .collect();

    let mut entities: Vec<StoredEntityEntry> = entity_index
        .map(|((original, entity_type), token)| StoredEntityEntry {
            original: original.clone(),
            entity_type: *entity_type,
            token: token.clone(),
        })
        .collect();
    entities.sort_by(|a, b| a.token.cmp(&b.token));

    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        tokens,
        entities,
        counters: counters
            .iter()
            .map(|(t, n)| (t.as_str().to_string(), n))
            .collect(),
        custom_overrides: custom_overrides.clone(),
    };
    serde_json::to_vec_pretty(&snapshot)
}
