//! Durable bidirectional mapping between tokens and original values.
//!
//! The store keeps two indexes over the same set of [`MaskRecord`]s:
//! `token -> record` for unmasking and `(original, type) -> token` for
//! masking. Both are always updated together, and a pair that has been
//! masked once keeps its token for the lifetime of the store.

mod legacy;
mod persist;

pub use persist::SNAPSHOT_VERSION;

use crate::entity::EntityType;
use crate::error::MaskingError;
use crate::strategy::{MaskingStrategy, StrategyState};
use regex::{Regex, RegexBuilder};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Tokens from the opaque strategy, current `__MASKED_<type>_<hex>__` and
/// legacy `__MASKED_<hex>__` forms
pub const MASKED_TOKEN_PATTERN: &str = r"__MASKED_(?:[a-z]+_)?[0-9a-f]{8}__";

/// Fallback tokens from the custom replacement strategy
pub const CUSTOM_TOKEN_PATTERN: &str = r"__CUSTOM_[0-9a-f]{8}__";

/// How often a colliding token is regenerated before giving up
const MAX_TOKEN_ATTEMPTS: usize = 16;

/// Upper bound for the compiled unmask pattern
const TOKEN_PATTERN_SIZE_LIMIT: usize = 64 * (1 << 20);

/// Opaque and custom token shapes, unanchored
fn token_shape() -> &'static Regex {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    SHAPE.get_or_init(|| {
        Regex::new(&format!("{}|{}", MASKED_TOKEN_PATTERN, CUSTOM_TOKEN_PATTERN))
            .expect("Invalid token shape regex")
    })
}

/// Whether `token` is exactly one opaque or custom token
fn is_token_shaped(token: &str) -> bool {
    token_shape()
        .find(token)
        .is_some_and(|m| m.start() == 0 && m.end() == token.len())
}

/// Association between a token and the value it replaced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskRecord {
    pub token: String,
    pub original: String,
    pub entity_type: EntityType,
}

/// Token mapping with optional file persistence
#[derive(Debug, Default)]
pub struct MappingStore {
    path: Option<PathBuf>,
    token_index: HashMap<String, MaskRecord>,
    entity_index: HashMap<(String, EntityType), String>,
    /// original -> replacement, checked before any strategy
    custom_overrides: BTreeMap<String, String>,
    state: StrategyState,
    dirty: bool,
    /// Cached unmask pattern, rebuilt after the token set changes
    token_pattern: Option<Regex>,
}

impl MappingStore {
    /// Create a store that is never persisted
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a store backed by `path`, loading it if it exists
    ///
    /// Unreadable or unrecognised files leave the store empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut store = Self {
            path: Some(path.into()),
            ..Default::default()
        };
        store.load();
        store
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of recorded tokens
    pub fn len(&self) -> usize {
        self.token_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_index.is_empty()
    }

    /// Whether there are changes not yet saved
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn counters(&self) -> &StrategyState {
        &self.state
    }

    pub fn records(&self) -> impl Iterator<Item = &MaskRecord> {
        self.token_index.values()
    }

    /// Return the token for `(original, entity_type)`, creating it if needed
    ///
    /// Custom overrides win over everything. An existing token is returned
    /// unchanged. Otherwise `strategy` generates one; tokens from reversible
    /// strategies are recorded so later calls return the same token.
    pub fn resolve(
        &mut self,
        original: &str,
        entity_type: EntityType,
        strategy: &dyn MaskingStrategy,
    ) -> String {
        if let Some(replacement) = self.custom_overrides.get(original) {
            return replacement.clone();
        }

        let key = (original.to_string(), entity_type);
        if let Some(token) = self.entity_index.get(&key) {
            return token.clone();
        }

        if !strategy.is_reversible() {
            return strategy.generate(original, entity_type, &mut self.state);
        }

        let mut token = String::new();
        for _ in 0..MAX_TOKEN_ATTEMPTS {
            token = strategy.generate(original, entity_type, &mut self.state);
            if token.is_empty() {
                break;
            }
            if !self.token_index.contains_key(&token) {
                self.insert_record(MaskRecord {
                    token: token.clone(),
                    original: original.to_string(),
                    entity_type,
                });
                return token;
            }
            debug!(
                strategy = strategy.name(),
                token = %token,
                "Generated token already in use, regenerating"
            );
        }

        warn!(
            strategy = strategy.name(),
            entity_type = %entity_type,
            "Could not generate a unique token, value will not be restorable"
        );
        token
    }

    /// Find the value a token stands for
    pub fn lookup(&self, token: &str) -> Option<&MaskRecord> {
        self.token_index.get(token)
    }

    /// Token previously assigned to `(original, entity_type)`, if any
    pub fn token_for(&self, original: &str, entity_type: EntityType) -> Option<&str> {
        self.custom_overrides
            .get(original)
            .or_else(|| self.entity_index.get(&(original.to_string(), entity_type)))
            .map(String::as_str)
    }

    fn insert_record(&mut self, record: MaskRecord) {
        self.entity_index.insert(
            (record.original.clone(), record.entity_type),
            record.token.clone(),
        );
        self.token_index.insert(record.token.clone(), record);
        self.mark_changed();
    }

    fn mark_changed(&mut self) {
        self.dirty = true;
        self.token_pattern = None;
    }

    /// Register `replacement` as the token for every occurrence of `original`
    ///
    /// Rejected without any change when either value is empty, the
    /// replacement embeds an opaque token shape, or it already stands for a
    /// different original. A replacement equal to a token already issued for
    /// `original` reuses that record.
    pub fn register_custom(
        &mut self,
        original: &str,
        replacement: &str,
    ) -> Result<(), MaskingError> {
        if original.is_empty() || replacement.is_empty() {
            return Err(MaskingError::InvalidReplacement);
        }
        if token_shape().is_match(replacement) {
            return Err(MaskingError::InvalidReplacement);
        }
        if let Some(existing) = self.token_index.get(replacement) {
            if existing.original != original {
                return Err(MaskingError::ReplacementInUse {
                    replacement: replacement.to_string(),
                });
            }
        }

        self.remove_custom(original);
        self.attach_override(original.to_string(), replacement.to_string());
        Ok(())
    }

    /// Record an override that has already been validated
    fn attach_override(&mut self, original: String, replacement: String) {
        let reused = self
            .token_index
            .get(&replacement)
            .is_some_and(|r| r.original == original);
        if reused {
            self.mark_changed();
        } else {
            self.insert_record(MaskRecord {
                token: replacement.clone(),
                original: original.clone(),
                entity_type: EntityType::Custom,
            });
        }
        self.custom_overrides.insert(original, replacement);
    }

    /// Remove a custom override; returns whether one existed
    ///
    /// Only the `CUSTOM` record created for the override is dropped. A token
    /// the override merely reused stays mapped.
    pub fn remove_custom(&mut self, original: &str) -> bool {
        let Some(replacement) = self.custom_overrides.remove(original) else {
            return false;
        };

        let owned = self
            .token_index
            .get(&replacement)
            .is_some_and(|r| r.original == original && r.entity_type == EntityType::Custom);
        if owned {
            self.token_index.remove(&replacement);
            let key = (original.to_string(), EntityType::Custom);
            if self.entity_index.get(&key) == Some(&replacement) {
                self.entity_index.remove(&key);
            }
        }
        self.mark_changed();
        true
    }

    pub fn custom_overrides(&self) -> &BTreeMap<String, String> {
        &self.custom_overrides
    }

    /// Pattern matching every token this store can restore
    ///
    /// The opaque and custom token shapes are tried first, then known literal
    /// tokens longest first.
    pub fn token_pattern(&mut self) -> Regex {
        if let Some(pattern) = &self.token_pattern {
            return pattern.clone();
        }

        let shape = token_shape();
        let mut literals: Vec<&str> = self
            .token_index
            .keys()
            .map(String::as_str)
            .filter(|t| !is_token_shaped(t))
            .collect();
        literals.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut alternatives = vec![shape.as_str().to_string()];
        alternatives.extend(literals.into_iter().map(regex::escape));

        let pattern = RegexBuilder::new(&alternatives.join("|"))
            .size_limit(TOKEN_PATTERN_SIZE_LIMIT)
            .build()
            .unwrap_or_else(|e| {
                warn!(
                    error = %e,
                    "Known-token pattern too large, unmasking only opaque tokens"
                );
                shape.clone()
            });

        self.token_pattern = Some(pattern.clone());
        pattern
    }

    /// Replace every known token in `text` with its original
    ///
    /// Unknown tokens are left verbatim.
    pub fn restore(&mut self, text: &str) -> String {
        let pattern = self.token_pattern();
        pattern
            .replace_all(text, |caps: &regex::Captures| {
                let token = &caps[0];
                match self.lookup(token) {
                    Some(record) => record.original.clone(),
                    None => token.to_string(),
                }
            })
            .into_owned()
    }

    /// Reload state from the backing file, replacing what is in memory
    ///
    /// Missing files give an empty store. Unreadable or unrecognised files
    /// are logged and also give an empty store.
    pub fn load(&mut self) {
        self.reset();
        let Some(path) = self.path.clone() else {
            return;
        };
        if !path.exists() {
            debug!(path = %path.display(), "No mapping file yet, starting empty");
            return;
        }

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read mapping file");
                return;
            }
        };

        let loaded = match persist::decode(&bytes) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unusable mapping file");
                return;
            }
        };

        let format = loaded.format;
        self.apply_loaded(loaded);
        info!(
            path = %path.display(),
            format,
            records = self.token_index.len(),
            "Loaded mapping"
        );
    }

    fn apply_loaded(&mut self, loaded: persist::LoadedState) {
        for record in loaded.records {
            self.token_index.insert(record.token.clone(), record);
        }

        for (original, entity_type, token) in loaded.entity_index {
            match self.token_index.get(&token) {
                Some(record) if record.original == original => {
                    self.entity_index.insert((original, entity_type), token);
                }
                _ => debug!(token = %token, "Dropping entity index entry without matching record"),
            }
        }
        // Older files may carry only the token map
        for record in self.token_index.values() {
            self.entity_index
                .entry((record.original.clone(), record.entity_type))
                .or_insert_with(|| record.token.clone());
        }

        for (original, replacement) in loaded.custom_overrides {
            let unusable = original.is_empty() || replacement.is_empty();
            if unusable || token_shape().is_match(&replacement) {
                continue;
            }
            let taken = self
                .token_index
                .get(&replacement)
                .is_some_and(|r| r.original != original);
            if taken {
                debug!(replacement = %replacement, "Dropping conflicting custom override");
                continue;
            }
            self.attach_override(original, replacement);
        }

        self.state = loaded.counters;
        // Keep counters ahead of any numbered token already handed out
        for record in self.token_index.values() {
            if let Some(n) = record
                .token
                .rsplit_once(' ')
                .and_then(|(_, n)| n.parse::<u64>().ok())
            {
                self.state.observe(record.entity_type, n);
            }
        }

        self.dirty = false;
        self.token_pattern = None;
    }

    /// Write the full state to the backing file
    ///
    /// Written to a temporary file first and renamed into place, so the
    /// file always holds one complete snapshot.
    pub fn try_save(&mut self) -> Result<(), MaskingError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let bytes = persist::encode(
            self.token_index.values(),
            self.entity_index.iter(),
            &self.state,
            &self.custom_overrides,
        )?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;

        self.dirty = false;
        debug!(path = %path.display(), records = self.token_index.len(), "Saved mapping");
        Ok(())
    }

    /// Save, logging instead of returning failures
    ///
    /// Returns whether the state is now persisted.
    pub fn save(&mut self) -> bool {
        match self.try_save() {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    path = ?self.path,
                    error = %e,
                    "Failed to save mapping, keeping it in memory only"
                );
                false
            }
        }
    }

    fn reset(&mut self) {
        self.token_index.clear();
        self.entity_index.clear();
        self.custom_overrides.clear();
        self.state.clear();
        self.dirty = false;
        self.token_pattern = None;
    }

    /// Drop all mappings, optionally deleting the backing file
    pub fn clear(&mut self, delete_backing_store: bool) {
        self.reset();
        if !delete_backing_store {
            return;
        }
        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => info!(path = %path.display(), "Deleted mapping file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to delete mapping file")
                }
            }
        }
    }
}
