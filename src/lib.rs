//! Reversible entity masking for free text and documents.
//!
//! Provides:
//! - Built-in pattern detection (phone, ID card, bank card, email, IP, date, time, money)
//! - Merging with an external entity detector (NER model, LLM)
//! - Pluggable masking strategies selected per entity type
//! - A persisted mapping so masked text can be restored later
//! - Two-pass document masking that keeps tokens consistent across segments

pub mod detection;
pub mod document;
pub mod entity;
pub mod error;
pub mod masker;
mod pool;
pub mod store;
pub mod strategy;

pub use detection::{EntityDetector, NoopDetector, RegexDetector};
pub use document::{DocumentMasker, Segment};
pub use entity::{Entity, EntityType};
pub use error::MaskingError;
pub use masker::{MaskerOptions, TextMasker};
pub use store::{MappingStore, MaskRecord};
pub use strategy::{
    HybridStrategy, MaskingStrategy, StrategyKind, StrategyOptions, StrategySet, TypeTemplates,
};

use detection::ChunkOptions;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// JSON-serializable configuration for the masking service
///
/// Field names use kebab-case to match typical YAML/JSON config style.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MaskingConfigJson {
    /// Mapping file path (none = in-memory only)
    #[serde(default)]
    pub mapping_file: Option<PathBuf>,
    /// Default strategy: opaque, fixed, hash, template, context, hybrid, custom
    #[serde(default = "default_strategy_name")]
    pub default_strategy: String,
    /// Replacement used by the fixed strategy
    #[serde(default = "default_fixed_replacement")]
    pub fixed_replacement: String,
    /// Salt appended before hashing
    #[serde(default)]
    pub hash_salt: String,
    /// Hex characters kept from the hash
    #[serde(default = "default_hash_length")]
    pub hash_length: usize,
    /// Label overrides by entity type, e.g. {"PER": "Person"}
    #[serde(default)]
    pub templates: HashMap<String, String>,
    /// Run the built-in pattern table
    #[serde(default = "default_true")]
    pub regex_enabled: bool,
    /// Maximum characters per external detector call
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    /// Concurrent units when running in parallel
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Run detection and document passes concurrently by default
    #[serde(default)]
    pub parallel: bool,
}

fn default_true() -> bool {
    true
}

fn default_strategy_name() -> String {
    StrategyKind::default().as_str().to_string()
}

fn default_fixed_replacement() -> String {
    strategy::fixed::DEFAULT_REPLACEMENT.to_string()
}

fn default_hash_length() -> usize {
    strategy::hash::DEFAULT_HASH_LENGTH
}

fn default_max_chunk_chars() -> usize {
    ChunkOptions::default().max_chars
}

fn default_workers() -> usize {
    ChunkOptions::default().workers
}

impl Default for MaskingConfigJson {
    fn default() -> Self {
        Self {
            mapping_file: None,
            default_strategy: default_strategy_name(),
            fixed_replacement: default_fixed_replacement(),
            hash_salt: String::new(),
            hash_length: default_hash_length(),
            templates: HashMap::new(),
            regex_enabled: true,
            max_chunk_chars: default_max_chunk_chars(),
            workers: default_workers(),
            parallel: false,
        }
    }
}

impl From<MaskingConfigJson> for MaskingConfig {
    fn from(json: MaskingConfigJson) -> Self {
        let default_strategy = json
            .default_strategy
            .parse::<StrategyKind>()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to the opaque strategy");
                StrategyKind::Opaque
            });

        let mut templates = TypeTemplates::default();
        for (label, value) in json.templates {
            match label.parse::<EntityType>() {
                Ok(entity_type) => templates.set(entity_type, value),
                Err(e) => warn!(error = %e, "Ignoring template override"),
            }
        }

        Self {
            mapping_file: json.mapping_file,
            default_strategy,
            strategy_options: StrategyOptions {
                fixed_replacement: json.fixed_replacement,
                hash_salt: json.hash_salt,
                hash_length: json.hash_length,
                templates,
            },
            regex_enabled: json.regex_enabled,
            max_chunk_chars: json.max_chunk_chars.max(1),
            workers: json.workers.max(1),
            parallel: json.parallel,
        }
    }
}

/// Configuration for the masking service
#[derive(Debug, Clone)]
pub struct MaskingConfig {
    /// Mapping file path (None = in-memory only)
    pub mapping_file: Option<PathBuf>,
    /// Strategy for types without an explicit one
    pub default_strategy: StrategyKind,
    /// Parameters for building strategies
    pub strategy_options: StrategyOptions,
    /// Run the built-in pattern table
    pub regex_enabled: bool,
    /// Maximum characters per external detector call
    pub max_chunk_chars: usize,
    /// Concurrent units when running in parallel
    pub workers: usize,
    /// Run detection and document passes concurrently by default
    pub parallel: bool,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        MaskingConfigJson::default().into()
    }
}

impl MaskingConfig {
    fn masker_options(&self) -> MaskerOptions {
        MaskerOptions {
            regex_enabled: self.regex_enabled,
            chunk: ChunkOptions {
                max_chars: self.max_chunk_chars,
                workers: self.workers,
                parallel: self.parallel,
            },
        }
    }

    fn open_store(&self) -> MappingStore {
        match &self.mapping_file {
            Some(path) => MappingStore::open(path),
            None => MappingStore::in_memory(),
        }
    }
}

/// Masking service
///
/// Owns the mapping store and strategy selection. Every clone of the inner
/// maskers shares the same store, so text and document operations issue
/// consistent tokens.
pub struct MaskingService {
    config: RwLock<MaskingConfig>,
    masker: TextMasker,
    documents: DocumentMasker,
}

impl MaskingService {
    /// Create a service using `detector` alongside the built-in patterns
    pub fn new(config: MaskingConfig, detector: Arc<dyn EntityDetector>) -> Self {
        let store = Arc::new(Mutex::new(config.open_store()));
        let strategies =
            StrategySet::new(config.default_strategy.build(&config.strategy_options, &store));
        let masker = TextMasker::with_store(
            store,
            strategies,
            detector,
            config.masker_options(),
        );

        Self {
            documents: DocumentMasker::new(masker.clone()),
            masker,
            config: RwLock::new(config),
        }
    }

    /// Create a service that only uses the built-in patterns
    pub fn regex_only(config: MaskingConfig) -> Self {
        Self::new(config, Arc::new(NoopDetector))
    }

    pub async fn config(&self) -> MaskingConfig {
        self.config.read().await.clone()
    }

    /// Apply a JSON configuration; unparseable input falls back to defaults
    pub async fn configure(&self, value: serde_json::Value) {
        let json_config: MaskingConfigJson = match serde_json::from_value(value) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(error = %e, "Failed to parse configuration, using defaults");
                MaskingConfigJson::default()
            }
        };

        self.reconfigure(json_config.into()).await;
        debug!("Configuration applied successfully");
    }

    /// Reconfigure the service with new settings
    ///
    /// Per-type strategy overrides are kept; the default strategy is
    /// rebuilt. A changed mapping file saves the current mapping and loads
    /// the new one.
    pub async fn reconfigure(&self, config: MaskingConfig) {
        info!(
            default_strategy = config.default_strategy.as_str(),
            mapping_file = ?config.mapping_file,
            regex_enabled = config.regex_enabled,
            parallel = config.parallel,
            "Reconfiguring masking service"
        );

        self.masker
            .strategies()
            .write()
            .await
            .set_default(
                config
                    .default_strategy
                    .build(&config.strategy_options, self.masker.store()),
            );
        self.masker.set_options(config.masker_options()).await;

        let mut current = self.config.write().await;
        if current.mapping_file != config.mapping_file {
            let mut store = self.masker.store().lock().await;
            if store.is_dirty() {
                store.save();
            }
            *store = config.open_store();
        }
        *current = config;
    }

    async fn parallel_default(&self) -> bool {
        self.config.read().await.parallel
    }

    /// Detect entities without masking
    pub async fn detect_entities(&self, text: &str) -> Vec<Entity> {
        self.masker.detect(text, self.parallel_default().await).await
    }

    /// Mask a single text and save the mapping
    pub async fn mask_text(&self, text: &str) -> String {
        let (masked, entities) = self.masker.mask(text, self.parallel_default().await).await;
        debug!(entities = entities.len(), "Masked text");
        self.masker.persist().await;
        masked
    }

    /// Mask a single text against a caller-supplied entity list
    pub async fn mask_text_with_entities(&self, text: &str, entities: &[Entity]) -> String {
        let masked = self.masker.mask_with_entities(text, entities).await;
        self.masker.persist().await;
        masked
    }

    /// Restore the originals of every known token in `text`
    pub async fn unmask_text(&self, text: &str) -> String {
        self.masker.unmask(text).await
    }

    /// Mask a document, using the configured parallelism
    pub async fn mask_document(&self, segments: &[Segment]) -> Vec<Segment> {
        let parallel = self.parallel_default().await;
        self.documents.mask_document(segments, parallel).await
    }

    /// Mask a document, choosing parallelism for this call
    pub async fn mask_document_with(&self, segments: &[Segment], parallel: bool) -> Vec<Segment> {
        self.documents.mask_document(segments, parallel).await
    }

    pub async fn unmask_document(&self, segments: &[Segment]) -> Vec<Segment> {
        self.documents.unmask_document(segments).await
    }

    pub async fn mask_markdown(&self, markdown: &str) -> String {
        let parallel = self.parallel_default().await;
        self.documents.mask_markdown(markdown, parallel).await
    }

    pub async fn unmask_markdown(&self, markdown: &str) -> String {
        self.documents.unmask_markdown(markdown).await
    }

    /// Use `strategy` for every entity of `entity_type`
    pub async fn set_strategy(&self, entity_type: EntityType, strategy: Arc<dyn MaskingStrategy>) {
        debug!(entity_type = %entity_type, strategy = strategy.name(), "Strategy set");
        self.masker.strategies().write().await.set(entity_type, strategy);
    }

    /// Use a configured strategy kind for `entity_type`
    pub async fn set_strategy_kind(&self, entity_type: EntityType, kind: StrategyKind) {
        let strategy = kind.build(
            &self.config.read().await.strategy_options,
            self.masker.store(),
        );
        self.set_strategy(entity_type, strategy).await;
    }

    /// Drop the strategy for `entity_type`, falling back to the default
    pub async fn unset_strategy(&self, entity_type: EntityType) {
        self.masker.strategies().write().await.unset(entity_type);
    }

    pub async fn set_default_strategy(&self, strategy: Arc<dyn MaskingStrategy>) {
        self.masker.strategies().write().await.set_default(strategy);
    }

    /// A hybrid strategy whose replacements are this service's overrides
    pub async fn hybrid_strategy(&self) -> Arc<HybridStrategy> {
        let templates = self.config.read().await.strategy_options.templates.clone();
        Arc::new(HybridStrategy::with_templates(
            templates,
            self.masker.store().clone(),
        ))
    }

    /// Always mask `original` as `replacement`
    ///
    /// The mapping is saved on success. Rejected registrations change nothing.
    pub async fn register_custom_replacement(
        &self,
        original: &str,
        replacement: &str,
    ) -> Result<(), MaskingError> {
        let mut store = self.masker.store().lock().await;
        store.register_custom(original, replacement)?;
        info!(replacement = %replacement, "Registered custom replacement");
        store.save();
        Ok(())
    }

    /// Remove a custom replacement; returns whether one existed
    pub async fn remove_custom_replacement(&self, original: &str) -> bool {
        let mut store = self.masker.store().lock().await;
        let removed = store.remove_custom(original);
        if removed {
            store.save();
        }
        removed
    }

    pub async fn custom_replacements(&self) -> BTreeMap<String, String> {
        self.masker.store().lock().await.custom_overrides().clone()
    }

    /// Add or replace the built-in pattern for `entity_type`
    pub async fn add_regex_pattern(
        &self,
        entity_type: EntityType,
        pattern: &str,
    ) -> Result<(), MaskingError> {
        self.masker
            .patterns()
            .write()
            .await
            .add_pattern(entity_type, pattern)
    }

    /// Known tokens in `text` with the values they stand for
    pub async fn masked_entities(&self, text: &str) -> Vec<MaskRecord> {
        self.masker.masked_entities(text).await
    }

    /// Number of recorded tokens
    pub async fn mapping_len(&self) -> usize {
        self.masker.store().lock().await.len()
    }

    /// Save the mapping, reporting failures
    pub async fn save_mapping(&self) -> Result<(), MaskingError> {
        self.masker.store().lock().await.try_save()
    }

    /// Forget every mapping, optionally deleting the mapping file
    pub async fn clear_mapping(&self, delete_file: bool) {
        info!(delete_file, "Clearing mapping");
        self.masker.store().lock().await.clear(delete_file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = MaskingConfig::default();
        assert!(config.mapping_file.is_none());
        assert_eq!(config.default_strategy, StrategyKind::Opaque);
        assert!(config.regex_enabled);
        assert_eq!(config.max_chunk_chars, 450);
        assert_eq!(config.workers, 4);
        assert!(!config.parallel);
    }

    #[test]
    fn test_config_json_parsing() {
        let json: MaskingConfigJson = serde_json::from_value(json!({
            "default-strategy": "context",
            "templates": {"PER": "Person", "BOGUS": "x"},
            "workers": 0,
            "parallel": true
        }))
        .unwrap();
        let config: MaskingConfig = json.into();

        assert_eq!(config.default_strategy, StrategyKind::Context);
        assert_eq!(config.strategy_options.templates.get(EntityType::Person), "Person");
        assert_eq!(config.strategy_options.templates.get(EntityType::Phone), "电话号码");
        assert_eq!(config.workers, 1);
        assert!(config.parallel);
    }

    #[test]
    fn test_unknown_strategy_falls_back() {
        let json = MaskingConfigJson {
            default_strategy: "rot13".to_string(),
            ..Default::default()
        };
        assert_eq!(MaskingConfig::from(json).default_strategy, StrategyKind::Opaque);
    }

    #[tokio::test]
    async fn test_configure_switches_default_strategy() {
        let service = MaskingService::regex_only(MaskingConfig::default());
        service
            .configure(json!({"default-strategy": "template"}))
            .await;
        assert_eq!(service.mask_text("call 13800001000 now").await, "call 电话号码 now");

        // Invalid config resets to defaults
        service.configure(json!({"workers": "many"})).await;
        assert_eq!(service.config().await.default_strategy, StrategyKind::Opaque);
    }

    #[tokio::test]
    async fn test_strategy_kind_per_type() {
        let service = MaskingService::regex_only(MaskingConfig::default());
        service
            .set_strategy_kind(EntityType::Email, StrategyKind::Fixed)
            .await;
        assert_eq!(service.mask_text("a@b.com").await, "***");
        service.unset_strategy(EntityType::Email).await;
        assert!(service.mask_text("a@b.com").await.starts_with("__MASKED_email_"));
    }

    #[tokio::test]
    async fn test_add_regex_pattern() {
        let service = MaskingService::regex_only(MaskingConfig::default());
        assert!(matches!(
            service.add_regex_pattern(EntityType::Custom, "(").await,
            Err(MaskingError::InvalidPattern { .. })
        ));

        service
            .add_regex_pattern(EntityType::Custom, r"PRJ-[0-9]{4}")
            .await
            .unwrap();
        let masked = service.mask_text("ticket PRJ-0042").await;
        assert!(masked.starts_with("ticket __MASKED_custom_"));
        assert_eq!(service.unmask_text(&masked).await, "ticket PRJ-0042");
    }

    #[tokio::test]
    async fn test_custom_replacement_lifecycle() {
        let service = MaskingService::regex_only(MaskingConfig::default());
        service
            .register_custom_replacement("13800001000", "PHONE_A")
            .await
            .unwrap();
        assert_eq!(service.mask_text("call 13800001000").await, "call PHONE_A");
        assert_eq!(service.custom_replacements().await.len(), 1);

        assert!(service.remove_custom_replacement("13800001000").await);
        assert!(service.custom_replacements().await.is_empty());
        assert!(service
            .mask_text("call 13800001000")
            .await
            .starts_with("call __MASKED_phone_"));
    }

    #[tokio::test]
    async fn test_hybrid_strategy_shares_service_overrides() {
        let service = MaskingService::regex_only(MaskingConfig::default());
        let hybrid = service.hybrid_strategy().await;
        service.set_default_strategy(hybrid.clone()).await;

        hybrid
            .set_custom_replacement("13800001000", "PHONE_A")
            .await
            .unwrap();
        assert_eq!(service.custom_replacements().await.len(), 1);
        assert_eq!(service.mask_text("call 13800001000").await, "call PHONE_A");
        assert_eq!(service.mask_text("call 13900002000").await, "call 电话号码 1");
        assert_eq!(
            hybrid.unmask("PHONE_A / 电话号码 1").await,
            "13800001000 / 13900002000"
        );
    }
}
