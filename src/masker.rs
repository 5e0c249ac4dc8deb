//! Masking and unmasking of a single text unit.
//!
//! Masking substitutes in two phases. Every entity span is first replaced by
//! a random placeholder drawn from a private-use range, and only then are the
//! placeholders swapped for their tokens. A token is never scanned for other
//! spans, and no character offsets need to survive earlier replacements.

use crate::detection::{detect_chunked, ChunkOptions, EntityDetector, EntityMerger, RegexDetector};
use crate::entity::{Entity, EntityType};
use crate::store::{MappingStore, MaskRecord};
use crate::strategy::StrategySet;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Start of the Supplementary Private Use Area-A
const PLACEHOLDER_BASE: u32 = 0xF0000;

/// Detection settings shared by every masking call
#[derive(Debug, Clone, Copy)]
pub struct MaskerOptions {
    /// Run the built-in pattern table
    pub regex_enabled: bool,
    /// Chunking for the external detector
    pub chunk: ChunkOptions,
}

impl Default for MaskerOptions {
    fn default() -> Self {
        Self {
            regex_enabled: true,
            chunk: ChunkOptions::default(),
        }
    }
}

/// Masks and restores text against a shared mapping store
///
/// Cloning is cheap; clones share the store, strategies and detectors.
#[derive(Clone)]
pub struct TextMasker {
    store: Arc<Mutex<MappingStore>>,
    strategies: Arc<RwLock<StrategySet>>,
    patterns: Arc<RwLock<RegexDetector>>,
    detector: Arc<dyn EntityDetector>,
    options: Arc<RwLock<MaskerOptions>>,
}

impl TextMasker {
    pub fn new(
        store: MappingStore,
        strategies: StrategySet,
        detector: Arc<dyn EntityDetector>,
        options: MaskerOptions,
    ) -> Self {
        Self::with_store(Arc::new(Mutex::new(store)), strategies, detector, options)
    }

    /// Build a masker over a store handle that is also held elsewhere
    pub fn with_store(
        store: Arc<Mutex<MappingStore>>,
        strategies: StrategySet,
        detector: Arc<dyn EntityDetector>,
        options: MaskerOptions,
    ) -> Self {
        Self {
            store,
            strategies: Arc::new(RwLock::new(strategies)),
            patterns: Arc::new(RwLock::new(RegexDetector::new())),
            detector,
            options: Arc::new(RwLock::new(options)),
        }
    }

    pub fn store(&self) -> &Arc<Mutex<MappingStore>> {
        &self.store
    }

    pub fn strategies(&self) -> &Arc<RwLock<StrategySet>> {
        &self.strategies
    }

    pub fn patterns(&self) -> &Arc<RwLock<RegexDetector>> {
        &self.patterns
    }

    pub async fn options(&self) -> MaskerOptions {
        *self.options.read().await
    }

    pub async fn set_options(&self, options: MaskerOptions) {
        *self.options.write().await = options;
    }

    /// Find entities in `text` with the external detector and, if enabled,
    /// the built-in patterns
    ///
    /// Every occurrence of a value with a custom replacement is reported as
    /// a `CUSTOM` entity, whether or not a detector found it.
    pub async fn detect(&self, text: &str, parallel: bool) -> Vec<Entity> {
        let options = self.options().await;
        let chunk = ChunkOptions {
            parallel,
            ..options.chunk
        };

        let mut entities = detect_chunked(self.detector.clone(), text, chunk).await;
        if options.regex_enabled {
            entities.extend(self.patterns.read().await.detect(text));
        }
        entities.extend(self.custom_entities(text).await);
        EntityMerger::merge(entities)
    }

    async fn custom_entities(&self, text: &str) -> Vec<Entity> {
        let store = self.store.lock().await;
        store
            .custom_overrides()
            .keys()
            .filter(|original| !original.is_empty())
            .flat_map(|original| {
                text.match_indices(original.as_str())
                    .map(|(start, span)| Entity::new(span, EntityType::Custom, start, 1.0))
            })
            .collect()
    }

    /// Detect entities in `text` and mask them
    pub async fn mask(&self, text: &str, parallel: bool) -> (String, Vec<Entity>) {
        let entities = self.detect(text, parallel).await;
        let masked = self.mask_with_entities(text, &entities).await;
        (masked, entities)
    }

    /// Mask every literal occurrence of the given entities' spans
    ///
    /// Longer spans are substituted first. A span that no longer occurs by
    /// the time it is reached is skipped.
    pub async fn mask_with_entities(&self, text: &str, entities: &[Entity]) -> String {
        let mut ordered: Vec<&Entity> = entities.iter().filter(|e| !e.span.is_empty()).collect();
        ordered.sort_by(|a, b| {
            b.span
                .len()
                .cmp(&a.span.len())
                .then_with(|| a.start.cmp(&b.start))
        });

        let mut seen: HashSet<(&str, EntityType)> = HashSet::new();
        let mut working = text.to_string();
        let mut pending: Vec<(String, &Entity)> = Vec::new();

        for entity in ordered {
            if !seen.insert((entity.span.as_str(), entity.entity_type)) {
                continue;
            }
            if !working.contains(entity.span.as_str()) {
                debug!(
                    span = %entity.span,
                    entity_type = %entity.entity_type,
                    "Span no longer present, skipping"
                );
                continue;
            }
            let placeholder = placeholder_for(&working);
            working = working.replace(entity.span.as_str(), &placeholder);
            pending.push((placeholder, entity));
        }

        if pending.is_empty() {
            return working;
        }

        let tokens: Vec<String> = {
            let strategies = self.strategies.read().await;
            let mut store = self.store.lock().await;
            pending
                .iter()
                .map(|(_, entity)| {
                    let strategy = strategies.for_type(entity.entity_type);
                    store.resolve(&entity.span, entity.entity_type, strategy.as_ref())
                })
                .collect()
        };

        for ((placeholder, _), token) in pending.iter().zip(tokens) {
            working = working.replace(placeholder.as_str(), &token);
        }
        working
    }

    /// Restore every known token in `text`; unknown tokens are left as is
    pub async fn unmask(&self, text: &str) -> String {
        self.store.lock().await.restore(text)
    }

    /// Known tokens in `text`, in order of first appearance
    pub async fn masked_entities(&self, text: &str) -> Vec<MaskRecord> {
        let mut store = self.store.lock().await;
        let pattern = store.token_pattern();
        let mut seen = HashSet::new();
        pattern
            .find_iter(text)
            .filter(|m| seen.insert(m.as_str()))
            .filter_map(|m| store.lookup(m.as_str()).cloned())
            .collect()
    }

    /// Save the mapping if it has unsaved changes
    pub async fn persist(&self) -> bool {
        let mut store = self.store.lock().await;
        if !store.is_dirty() {
            return true;
        }
        store.save()
    }
}

/// Random placeholder that does not occur in `text`
fn placeholder_for(text: &str) -> String {
    loop {
        let placeholder: String = uuid::Uuid::new_v4()
            .as_bytes()
            .iter()
            .filter_map(|b| char::from_u32(PLACEHOLDER_BASE + u32::from(*b)))
            .collect();
        if !text.contains(placeholder.as_str()) {
            return placeholder;
        }
    }
}
