use futures::future::BoxFuture;

use crate::error::{Result, TrellisError};
use crate::types::{ChatMessage, ChatOptions, ModelClass};

/// Uniform call surface over chat-completion and embedding providers.
///
/// The rest of the system treats the gateway as opaque; which provider
/// backs it is a startup decision.
pub trait ModelGateway: Send + Sync + 'static {
    /// Send a chat request against the given model class and return the
    /// response text.
    fn chat(
        &self,
        class: ModelClass,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> BoxFuture<'_, Result<String>>;

    /// Embed texts, returning vectors in caller order, all of the
    /// configured embedding dimension.
    fn embed(&self, texts: Vec<String>) -> BoxFuture<'_, Result<Vec<Vec<f32>>>>;

    /// Model identifier for a class, for step labels.
    fn model_label(&self, class: ModelClass) -> String;
}

/// File formats the engine dispatches on when extracting content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Text,
    Markdown,
    Csv,
    Pdf,
    Docx,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" => Some(Self::Text),
            "md" => Some(Self::Markdown),
            "csv" => Some(Self::Csv),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }
}

/// Format-specific text extraction. PDF and office handlers are external
/// collaborators plugged in through this seam; the built-in extractor
/// covers the text formats.
pub trait DocumentExtractor: Send + Sync + 'static {
    fn extract(&self, format: FileFormat, bytes: &[u8]) -> Result<String>;
}

/// Passthrough extractor for text-shaped formats.
#[derive(Debug, Default)]
pub struct TextExtractor;

impl DocumentExtractor for TextExtractor {
    fn extract(&self, format: FileFormat, bytes: &[u8]) -> Result<String> {
        match format {
            FileFormat::Text | FileFormat::Markdown | FileFormat::Csv => {
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| TrellisError::Parse("file is not valid UTF-8".into()))
            }
            FileFormat::Pdf | FileFormat::Docx => Err(TrellisError::Parse(format!(
                "no extraction handler registered for {format:?}"
            ))),
        }
    }
}
