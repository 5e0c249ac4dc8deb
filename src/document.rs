//! Document-level masking over ordered segments.
//!
//! Masking a document takes two passes. The first pass detects and masks
//! the concatenation of all segment texts, which assigns a token to every
//! entity in the document. The second pass masks each segment against that
//! document-wide entity list, so an entity gets the same token wherever it
//! appears even when a per-segment detector run would have missed it.

use crate::entity::Entity;
use crate::masker::TextMasker;
use crate::pool::run_bounded;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// One unit of a parsed document
///
/// Fields other than `type`, `text` and `title` (page index, image path,
/// ...) are carried through masking untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_kind() -> String {
    "text".to_string()
}

impl Segment {
    /// A plain text segment
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: default_kind(),
            text: Some(text.into()),
            title: None,
            extra: Map::new(),
        }
    }

    /// Texts of this segment that take part in masking
    fn texts(&self) -> impl Iterator<Item = &str> {
        self.title.as_deref().into_iter().chain(self.text.as_deref())
    }
}

/// Two-pass masking of segment lists and markdown
#[derive(Clone)]
pub struct DocumentMasker {
    masker: TextMasker,
}

impl DocumentMasker {
    pub fn new(masker: TextMasker) -> Self {
        Self { masker }
    }

    /// Mask every segment, keeping entity tokens consistent document-wide
    ///
    /// With `parallel`, segments of the second pass run concurrently; output
    /// order always matches input order.
    pub async fn mask_document(&self, segments: &[Segment], parallel: bool) -> Vec<Segment> {
        let combined: Vec<&str> = segments.iter().flat_map(Segment::texts).collect();
        let entities = self.seed(&combined.join("\n"), parallel).await;
        if entities.is_empty() {
            return segments.to_vec();
        }

        debug!(
            segments = segments.len(),
            entities = entities.len(),
            parallel,
            "Masking segments"
        );
        let entities = Arc::new(entities);
        let masked = self
            .map_units(segments.to_vec(), parallel, move |masker, segment| {
                let entities = entities.clone();
                async move { mask_segment(&masker, segment, &entities).await }
            })
            .await;

        self.masker.persist().await;
        masked
    }

    /// Restore every segment
    pub async fn unmask_document(&self, segments: &[Segment]) -> Vec<Segment> {
        let mut restored = Vec::with_capacity(segments.len());
        for segment in segments {
            let mut segment = segment.clone();
            if let Some(text) = &segment.text {
                segment.text = Some(self.masker.unmask(text).await);
            }
            if let Some(title) = &segment.title {
                segment.title = Some(self.masker.unmask(title).await);
            }
            restored.push(segment);
        }
        restored
    }

    /// Mask markdown paragraph by paragraph
    ///
    /// Paragraph separators and blank paragraphs are kept byte for byte.
    pub async fn mask_markdown(&self, markdown: &str, parallel: bool) -> String {
        let pieces = split_paragraphs(markdown);
        let paragraphs: Vec<&str> = pieces
            .iter()
            .filter_map(|p| match p {
                Piece::Paragraph(text) if !text.trim().is_empty() => Some(*text),
                _ => None,
            })
            .collect();

        let entities = self.seed(&paragraphs.join("\n"), parallel).await;
        if entities.is_empty() {
            return markdown.to_string();
        }

        let owned: Vec<String> = pieces
            .iter()
            .map(|p| match p {
                Piece::Paragraph(text) | Piece::Separator(text) => text.to_string(),
            })
            .collect();
        let kinds: Vec<bool> = pieces
            .iter()
            .map(|p| matches!(p, Piece::Paragraph(t) if !t.trim().is_empty()))
            .collect();

        let entities = Arc::new(entities);
        let units: Vec<(String, bool)> = owned.into_iter().zip(kinds).collect();
        let masked = self
            .map_units(units, parallel, move |masker, (text, maskable)| {
                let entities = entities.clone();
                async move {
                    let text = if maskable {
                        mask_field(&masker, &text, &entities).await
                    } else {
                        text
                    };
                    (text, maskable)
                }
            })
            .await;

        self.masker.persist().await;
        masked.into_iter().map(|(text, _)| text).collect()
    }

    /// Restore markdown; separators are untouched
    pub async fn unmask_markdown(&self, markdown: &str) -> String {
        let mut restored = String::with_capacity(markdown.len());
        for piece in split_paragraphs(markdown) {
            match piece {
                Piece::Paragraph(text) if !text.trim().is_empty() => {
                    restored.push_str(&self.masker.unmask(text).await)
                }
                Piece::Paragraph(text) | Piece::Separator(text) => restored.push_str(text),
            }
        }
        restored
    }

    /// First pass: detect across the whole document and assign tokens
    async fn seed(&self, combined: &str, parallel: bool) -> Vec<Entity> {
        if combined.trim().is_empty() {
            return Vec::new();
        }
        let (_, entities) = self.masker.mask(combined, parallel).await;
        debug!(entities = entities.len(), "Document entities seeded");
        entities
    }

    /// Apply `task` to every unit, concurrently when `parallel`
    ///
    /// A unit whose concurrent task fails is redone inline, so a result is
    /// always produced for every unit.
    async fn map_units<U, F, Fut>(&self, units: Vec<U>, parallel: bool, task: F) -> Vec<U>
    where
        U: Clone + Send + 'static,
        F: Fn(TextMasker, U) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = U> + Send + 'static,
    {
        let task = Arc::new(task);
        if !parallel || units.len() <= 1 {
            let mut out = Vec::with_capacity(units.len());
            for unit in units {
                out.push((*task)(self.masker.clone(), unit).await);
            }
            return out;
        }

        let workers = self.masker.options().await.chunk.workers;
        let masker = self.masker.clone();
        let spawned = task.clone();
        let results = run_bounded(units.clone(), workers, move |unit| {
            (*spawned)(masker.clone(), unit)
        })
        .await;

        let mut out = Vec::with_capacity(units.len());
        for (unit, result) in units.into_iter().zip(results) {
            match result {
                Some(done) => out.push(done),
                None => {
                    warn!("Concurrent masking task failed, redoing unit inline");
                    out.push((*task)(self.masker.clone(), unit).await);
                }
            }
        }
        out
    }
}

/// Second pass for one segment
async fn mask_segment(masker: &TextMasker, mut segment: Segment, entities: &[Entity]) -> Segment {
    if let Some(text) = segment.text.take() {
        segment.text = Some(mask_field(masker, &text, entities).await);
    }
    if let Some(title) = segment.title.take() {
        segment.title = Some(mask_field(masker, &title, entities).await);
    }
    segment
}

/// Mask `text` with the document entities that occur in it
async fn mask_field(masker: &TextMasker, text: &str, entities: &[Entity]) -> String {
    let present: Vec<Entity> = entities
        .iter()
        .filter(|e| text.contains(e.span.as_str()))
        .cloned()
        .collect();
    if present.is_empty() {
        return text.to_string();
    }
    masker.mask_with_entities(text, &present).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Piece<'a> {
    Paragraph(&'a str),
    Separator(&'a str),
}

fn paragraph_separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"\r\n\r\n|\n\n").expect("Invalid separator regex"))
}

/// Split markdown into paragraphs and the separators between them
fn split_paragraphs(markdown: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for m in paragraph_separator().find_iter(markdown) {
        pieces.push(Piece::Paragraph(&markdown[last..m.start()]));
        pieces.push(Piece::Separator(m.as_str()));
        last = m.end();
    }
    pieces.push(Piece::Paragraph(&markdown[last..]));
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{EntityDetector, NoopDetector};
    use crate::entity::EntityType;
    use crate::error::MaskingError;
    use crate::masker::MaskerOptions;
    use crate::store::MappingStore;
    use crate::strategy::{ContextAwareStrategy, StrategySet};
    use async_trait::async_trait;

    /// Detects a fixed list of names
    struct Names(&'static [&'static str]);

    #[async_trait]
    impl EntityDetector for Names {
        async fn detect(&self, text: &str) -> Result<Vec<Entity>, MaskingError> {
            Ok(self
                .0
                .iter()
                .flat_map(|name| {
                    text.match_indices(name)
                        .map(|(start, span)| Entity::new(span, EntityType::Person, start, 0.9))
                })
                .collect())
        }
    }

    fn documents(detector: Arc<dyn EntityDetector>) -> DocumentMasker {
        DocumentMasker::new(TextMasker::new(
            MappingStore::in_memory(),
            StrategySet::new(Arc::new(ContextAwareStrategy::new())),
            detector,
            MaskerOptions::default(),
        ))
    }

    #[test]
    fn test_split_paragraphs_keeps_separators() {
        let pieces = split_paragraphs("a\n\nb\r\n\r\n\n\nc");
        assert_eq!(
            pieces,
            vec![
                Piece::Paragraph("a"),
                Piece::Separator("\n\n"),
                Piece::Paragraph("b"),
                Piece::Separator("\r\n\r\n"),
                Piece::Paragraph(""),
                Piece::Separator("\n\n"),
                Piece::Paragraph("c"),
            ]
        );
    }

    #[test]
    fn test_segment_extra_fields_pass_through() {
        let json = r#"{"type": "image", "img_path": "a.png", "page_idx": 3}"#;
        let segment: Segment = serde_json::from_str(json).unwrap();
        assert_eq!(segment.kind, "image");
        assert!(segment.text.is_none());
        assert_eq!(segment.extra.get("page_idx"), Some(&Value::from(3)));

        let back = serde_json::to_value(&segment).unwrap();
        assert_eq!(back, serde_json::from_str::<Value>(json).unwrap());
    }

    #[tokio::test]
    async fn test_entities_consistent_across_segments() {
        let docs = documents(Arc::new(Names(&["张三", "李四"])));
        let segments = vec![
            Segment::text("张三签署了合同"),
            Segment::text("李四见证"),
            Segment::text("张三付款"),
        ];

        for parallel in [false, true] {
            let masked = docs.mask_document(&segments, parallel).await;
            assert_eq!(masked[0].text.as_deref(), Some("某人 1签署了合同"));
            assert_eq!(masked[1].text.as_deref(), Some("某人 2见证"));
            assert_eq!(masked[2].text.as_deref(), Some("某人 1付款"));
            assert_eq!(docs.unmask_document(&masked).await, segments);
        }
    }

    #[tokio::test]
    async fn test_titles_are_masked_and_other_segments_untouched() {
        let docs = documents(Arc::new(Names(&["王五"])));
        let mut titled = Segment::text("王五的报告");
        titled.title = Some("关于王五".to_string());
        let image: Segment =
            serde_json::from_str(r#"{"type": "image", "img_path": "王五.png"}"#).unwrap();

        let masked = docs.mask_document(&[titled, image.clone()], false).await;
        assert_eq!(masked[0].title.as_deref(), Some("关于某人 1"));
        assert_eq!(masked[0].text.as_deref(), Some("某人 1的报告"));
        assert_eq!(masked[1], image);
    }

    #[tokio::test]
    async fn test_document_without_entities_is_unchanged() {
        let docs = documents(Arc::new(NoopDetector));
        let segments = vec![Segment::text("nothing sensitive")];
        assert_eq!(docs.mask_document(&segments, true).await, segments);
        assert!(docs.mask_document(&[], false).await.is_empty());
    }

    #[tokio::test]
    async fn test_markdown_round_trip_preserves_separators() {
        let docs = documents(Arc::new(Names(&["张三"])));
        let markdown = "# 合同\r\n\r\n甲方：张三\n\n\n\n乙方：张三的公司\n";

        let masked = docs.mask_markdown(markdown, true).await;
        assert_eq!(masked, "# 合同\r\n\r\n甲方：某人 1\n\n\n\n乙方：某人 1的公司\n");
        assert_eq!(docs.unmask_markdown(&masked).await, markdown);
    }
}
