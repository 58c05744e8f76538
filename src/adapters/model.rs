//! Statistical NER model served over HTTP.
//!
//! The server takes `{"inputs": "<text>"}` and answers with token
//! classification predictions carrying character offsets, as
//! Hugging Face style inference servers do. Long documents are sent in
//! whitespace-aligned chunks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Detector;
use crate::domain::{DetectorKind, EntityType, Span};
use crate::text::char_to_byte_offset;

/// Connection settings for the NER model server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NerModelConfig {
    /// Full URL of the prediction endpoint
    pub endpoint: String,

    /// Bearer token, if the server needs one
    #[serde(default)]
    pub api_key: Option<String>,

    /// Predictions below this score are ignored (default: 0.5)
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,

    /// Maximum characters per request (default: 2000)
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
}

fn default_score_threshold() -> f64 {
    0.5
}
fn default_max_chunk_chars() -> usize {
    2000
}

impl NerModelConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            score_threshold: default_score_threshold(),
            max_chunk_chars: default_max_chunk_chars(),
        }
    }
}

/// One prediction as returned by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NerPrediction {
    /// Aggregated label ("PER"); some servers only send `entity` ("B-PER")
    #[serde(default, alias = "entity")]
    pub entity_group: String,
    pub score: f64,
    /// Character offsets into the request text
    pub start: usize,
    pub end: usize,
    /// Token text; may be a subword piece, never used for offsets
    #[serde(default)]
    pub word: Option<String>,
}

/// Predictions for one chunk of the document
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPredictions {
    pub byte_start: usize,
    pub byte_end: usize,
    pub predictions: Vec<NerPrediction>,
}

/// Map a model label to an entity type
pub fn map_label(label: &str) -> Option<EntityType> {
    let bare = label
        .strip_prefix("B-")
        .or_else(|| label.strip_prefix("I-"))
        .unwrap_or(label);
    match bare {
        "PER" | "PERSON" => Some(EntityType::Person),
        "ORG" => Some(EntityType::Organization),
        "LOC" | "GPE" => Some(EntityType::Location),
        "TME" => Some(EntityType::Date),
        "MISC" => Some(EntityType::Other),
        _ => None,
    }
}

/// Split `text` into byte ranges of at most `max_chars` characters,
/// breaking at whitespace where possible.
pub fn chunk_ranges(text: &str, max_chars: usize) -> Vec<(usize, usize)> {
    let max_chars = max_chars.max(1);
    let mut ranges = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let rest = &text[start..];
        let Some(limit) = char_to_byte_offset(rest, max_chars) else {
            ranges.push((start, text.len()));
            break;
        };
        let cut = rest[..limit]
            .rfind(char::is_whitespace)
            .filter(|&i| i > 0)
            .unwrap_or(limit);
        ranges.push((start, start + cut));
        start += cut;
    }

    ranges
}

/// NER detector backed by a model server
pub struct NerModelDetector {
    config: NerModelConfig,
    client: reqwest::Client,
}

impl NerModelDetector {
    pub const ID: &'static str = "model:ner";

    pub fn new(config: NerModelConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn predict(&self, chunk: &str) -> Result<Vec<NerPrediction>> {
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .json(&serde_json::json!({ "inputs": chunk }));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("Failed to reach NER model server")?
            .error_for_status()
            .context("NER model server returned an error")?;

        response
            .json()
            .await
            .context("Failed to parse NER model response")
    }
}

#[async_trait]
impl Detector for NerModelDetector {
    type Raw = Vec<ChunkPredictions>;

    fn id(&self) -> &str {
        Self::ID
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Model
    }

    async fn detect(&self, text: &str) -> Result<Self::Raw> {
        let mut chunks = Vec::new();
        for (byte_start, byte_end) in chunk_ranges(text, self.config.max_chunk_chars) {
            let predictions = self.predict(&text[byte_start..byte_end]).await?;
            chunks.push(ChunkPredictions {
                byte_start,
                byte_end,
                predictions,
            });
        }
        Ok(chunks)
    }

    fn adapt(&self, raw: Self::Raw, text: &str) -> Vec<Span> {
        let mut spans = Vec::new();
        for chunk in raw {
            let Some(chunk_text) = text.get(chunk.byte_start..chunk.byte_end) else {
                continue;
            };
            for prediction in chunk.predictions {
                if prediction.score < self.config.score_threshold {
                    continue;
                }
                let Some(entity_type) = map_label(&prediction.entity_group) else {
                    continue;
                };
                let (Some(start), Some(end)) = (
                    char_to_byte_offset(chunk_text, prediction.start),
                    char_to_byte_offset(chunk_text, prediction.end),
                ) else {
                    continue;
                };
                // Rebuild text from the slice; `word` may be a subword piece
                if let Some(span) = Span::from_document(
                    text,
                    chunk.byte_start + start,
                    chunk.byte_start + end,
                    Self::ID,
                    prediction.score,
                    entity_type,
                ) {
                    spans.push(span);
                }
            }
        }
        spans
    }
}
