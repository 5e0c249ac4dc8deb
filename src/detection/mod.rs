//! Entity detection: built-in patterns, external detectors and merging.

pub mod chunk;
pub mod merge;
pub mod patterns;
pub mod response;

pub use chunk::split_into_chunks;
pub use merge::EntityMerger;
pub use patterns::RegexDetector;
pub use response::parse_detector_response;

use crate::entity::Entity;
use crate::error::MaskingError;
use crate::pool::run_bounded;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// An external entity detector (NER model, remote LLM, ...)
///
/// Errors are never fatal to masking: a failed call contributes no entities.
#[async_trait]
pub trait EntityDetector: Send + Sync {
    /// Name used in log output
    fn name(&self) -> &str {
        "detector"
    }

    /// Detect entities in `text`, with offsets relative to `text`
    async fn detect(&self, text: &str) -> Result<Vec<Entity>, MaskingError>;
}

/// Detector that never finds anything, for regex-only operation
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDetector;

#[async_trait]
impl EntityDetector for NoopDetector {
    fn name(&self) -> &str {
        "noop"
    }

    async fn detect(&self, _text: &str) -> Result<Vec<Entity>, MaskingError> {
        Ok(Vec::new())
    }
}

/// How texts are split and scheduled for the external detector
#[derive(Debug, Clone, Copy)]
pub struct ChunkOptions {
    /// Maximum characters per detector call
    pub max_chars: usize,
    /// Maximum concurrent detector calls when parallel
    pub workers: usize,
    /// Detect chunks concurrently
    pub parallel: bool,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chars: 450,
            workers: 4,
            parallel: false,
        }
    }
}

async fn detect_or_empty(detector: &dyn EntityDetector, text: &str) -> Vec<Entity> {
    match detector.detect(text).await {
        Ok(entities) => entities,
        Err(e) => {
            warn!(
                detector = detector.name(),
                error = %e,
                "Entity detection failed, continuing without its entities"
            );
            Vec::new()
        }
    }
}

/// Run `detector` over `text`, chunking long input
///
/// Chunk results are shifted back to offsets in `text` and deduplicated.
pub async fn detect_chunked(
    detector: Arc<dyn EntityDetector>,
    text: &str,
    options: ChunkOptions,
) -> Vec<Entity> {
    if text.is_empty() {
        return Vec::new();
    }

    let chunks = split_into_chunks(text, options.max_chars);
    if chunks.len() <= 1 {
        return EntityMerger::merge(detect_or_empty(detector.as_ref(), text).await);
    }

    debug!(
        detector = detector.name(),
        chunks = chunks.len(),
        parallel = options.parallel,
        "Detecting entities in chunks"
    );

    let mut all = Vec::new();
    if options.parallel {
        let owned: Vec<(usize, String)> = chunks
            .into_iter()
            .map(|(offset, chunk)| (offset, chunk.to_string()))
            .collect();
        let results = run_bounded(owned, options.workers, move |(offset, chunk)| {
            let detector = detector.clone();
            async move {
                detect_or_empty(detector.as_ref(), &chunk)
                    .await
                    .into_iter()
                    .map(|e| e.shifted(offset))
                    .collect::<Vec<_>>()
            }
        })
        .await;
        all.extend(results.into_iter().flatten().flatten());
    } else {
        for (offset, chunk) in chunks {
            all.extend(
                detect_or_empty(detector.as_ref(), chunk)
                    .await
                    .into_iter()
                    .map(|e| e.shifted(offset)),
            );
        }
    }

    EntityMerger::merge(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;

    /// Finds every occurrence of a fixed word, fails on chunks containing "!"
    struct WordDetector(&'static str);

    #[async_trait]
    impl EntityDetector for WordDetector {
        async fn detect(&self, text: &str) -> Result<Vec<Entity>, MaskingError> {
            if text.contains('!') {
                return Err(MaskingError::Detector("model unavailable".to_string()));
            }
            Ok(text
                .match_indices(self.0)
                .map(|(start, span)| Entity::new(span, EntityType::Person, start, 0.9))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_chunk_offsets_are_adjusted() {
        let text = "开头。张三来了。结尾。";
        let options = ChunkOptions {
            max_chars: 4,
            ..Default::default()
        };
        let entities = detect_chunked(Arc::new(WordDetector("张三")), text, options).await;
        assert_eq!(entities.len(), 1);
        let e = &entities[0];
        assert_eq!(&text[e.start..e.end], "张三");
    }

    #[tokio::test]
    async fn test_duplicates_across_chunks_merged() {
        let text = "张三。张三。张三。";
        for parallel in [false, true] {
            let options = ChunkOptions {
                max_chars: 3,
                workers: 2,
                parallel,
            };
            let entities = detect_chunked(Arc::new(WordDetector("张三")), text, options).await;
            assert_eq!(entities.len(), 1, "parallel={}", parallel);
        }
    }

    #[tokio::test]
    async fn test_failed_chunk_degrades_to_empty() {
        let text = "李四好。坏掉了!李四。";
        let options = ChunkOptions {
            max_chars: 4,
            workers: 2,
            parallel: true,
        };
        let entities = detect_chunked(Arc::new(WordDetector("李四")), text, options).await;
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].span, "李四");
    }

    #[tokio::test]
    async fn test_noop_detector() {
        let entities =
            detect_chunked(Arc::new(NoopDetector), "张三", ChunkOptions::default()).await;
        assert!(entities.is_empty());
    }
}
