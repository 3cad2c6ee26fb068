//! Wire types for the Ollama generate protocol.

use serde::{Deserialize, Serialize};

/// Request body for `POST /api/generate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model identifier, e.g. `mistral:latest`.
    pub model: String,
    /// Full prompt text, including any formatting instruction.
    pub prompt: String,
    /// Always true here; the non-streaming mode buffers the whole
    /// response server-side.
    pub stream: bool,
}

/// One newline-delimited record from the generate response stream.
///
/// Ollama emits many more fields (timings, token context, etc.);
/// only the ones a relay consumes are modeled and the rest are
/// ignored during deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRecord {
    /// The next fragment of generated text, when this record carries one.
    #[serde(default)]
    pub response: Option<String>,
    /// Set on the final record of a generation.
    #[serde(default)]
    pub done: bool,
}

impl GenerateRecord {
    /// The text fragment of this record, if non-empty.
    pub fn text(&self) -> Option<&str> {
        self.response.as_deref().filter(|t| !t.is_empty())
    }
}
