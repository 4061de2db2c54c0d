//! Sliding-window text chunking on top of `text-splitter`.
//!
//! Sizes are in characters. The splitter prefers paragraph, then sentence,
//! then word boundaries before falling back to hard cuts.

use serde_json::{Map, Value};
use text_splitter::{ChunkConfig, TextSplitter};

use crate::core::config::ChunkSettings;
use crate::core::error::AppError;
use crate::vector::Document;

/// Split `text` into chunks according to `settings`.
pub fn split_text(text: &str, settings: ChunkSettings) -> Result<Vec<String>, AppError> {
    let config = ChunkConfig::new(settings.size)
        .with_overlap(settings.overlap)
        .map_err(|e| AppError::Config(format!("chunk settings: {e}")))?;
    let splitter = TextSplitter::new(config);
    Ok(splitter.chunks(text).map(str::to_string).collect())
}

/// Chunk `text` into documents.
///
/// Every document gets a copy of `base_metadata` plus `chunk_index` and
/// `chunk_id = "{id_prefix}_chunk_{i}"`. When `title_line` is set it is
/// prepended to each chunk, separated by a blank line.
pub fn chunk_documents(
    text: &str,
    base_metadata: &Map<String, Value>,
    id_prefix: &str,
    settings: ChunkSettings,
    title_line: Option<&str>,
) -> Result<Vec<Document>, AppError> {
    let chunks = split_text(text, settings)?;
    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut metadata = base_metadata.clone();
            metadata.insert("chunk_index".into(), Value::from(i));
            metadata.insert(
                "chunk_id".into(),
                Value::String(format!("{id_prefix}_chunk_{i}")),
            );
            let page_content = match title_line {
                Some(title) => format!("{title}\n\n{chunk}"),
                None => chunk,
            };
            Document {
                page_content,
                metadata,
            }
        })
        .collect())
}
