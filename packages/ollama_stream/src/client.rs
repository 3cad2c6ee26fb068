//! Streaming client for the Ollama generate endpoint.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, StreamError};
use crate::types::GenerateRequest;

/// Formatting instruction wrapped around every prompt so responses
/// render as markdown in the client.
const MARKDOWN_INSTRUCTION: &str = "Please provide your response in markdown format. Use markdown syntax for:
- Headers (# for main headers, ## for subheaders, etc.)
- Code blocks (use triple backticks with language name)
- Lists (use - or numbers)
- Emphasis (* for italic, ** for bold)
- Links and images if needed

Here's the user's question:";

/// Client for one Ollama-compatible generation endpoint.
///
/// Cheap to clone; the underlying HTTP client is shared.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    /// Create a client with a default HTTP client.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_http_client(reqwest::Client::new(), base_url, model)
    }

    /// Create a client with a caller-configured HTTP client
    /// (timeouts, proxies, etc.).
    pub fn with_http_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            model: model.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Issue one generation request for `prompt`.
    ///
    /// The prompt is wrapped in the fixed markdown instruction before
    /// it is sent. A non-success status fails immediately with
    /// [`StreamError::Status`]; otherwise the returned stream yields
    /// raw body chunks until the upstream closes it. Signalling
    /// `cancel` makes any pending read fail with
    /// [`StreamError::Cancelled`].
    pub async fn generate(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<GenerateStream> {
        let body = GenerateRequest {
            model: self.model.clone(),
            prompt: wrap_prompt(prompt),
            stream: true,
        };
        let url = format!("{}/api/generate", self.base_url);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            result = self.http.post(&url).json(&body).send() => result?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status(status));
        }
        debug!(model = %self.model, "generation stream opened");

        Ok(GenerateStream { response, cancel })
    }
}

/// Wrap the raw user prompt in the fixed formatting instruction.
fn wrap_prompt(prompt: &str) -> String {
    format!("{MARKDOWN_INSTRUCTION}\n\n{prompt}")
}

/// An open generation response body.
///
/// Dropping the stream aborts the underlying request, so an early
/// return after cancellation also tears down the upstream fetch.
#[derive(Debug)]
pub struct GenerateStream {
    response: reqwest::Response,
    cancel: CancellationToken,
}

impl GenerateStream {
    /// Pull the next raw chunk of the body.
    ///
    /// `Ok(None)` is natural end-of-stream. A pending read races the
    /// cancellation token, so a stop signalled from another task is
    /// observed without waiting for the upstream to produce more
    /// data.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(StreamError::Cancelled),
            result = self.response.chunk() => Ok(result?.map(|bytes| bytes.to_vec())),
        }
    }
}
