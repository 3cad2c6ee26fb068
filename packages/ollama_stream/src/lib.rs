//! # Ollama Stream
//!
//! A streaming client for the Ollama `/api/generate` endpoint.
//!
//! ## Overview
//!
//! Ollama answers a generate request with a body of newline-delimited
//! JSON records, each carrying the next fragment of generated text.
//! This library provides:
//! - A client that issues one generation request and exposes the body
//!   as raw chunks ([`OllamaClient`] / [`GenerateStream`])
//! - Cooperative cancellation of an in-flight request via a
//!   [`CancellationToken`](tokio_util::sync::CancellationToken)
//! - A decoder that reassembles records split across chunk boundaries
//!   ([`LineDecoder`])
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ollama_stream::{LineDecoder, OllamaClient};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), ollama_stream::StreamError> {
//! let client = OllamaClient::new("http://localhost:11434", "mistral:latest");
//! let cancel = CancellationToken::new();
//!
//! let mut stream = client.generate("why is the sky blue?", cancel.clone()).await?;
//! let mut decoder = LineDecoder::new();
//!
//! while let Some(chunk) = stream.next_chunk().await? {
//!     for record in decoder.push(&chunk) {
//!         if let Some(text) = record.response {
//!             print!("{text}");
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Signalling `cancel` from another task makes the pending
//! `next_chunk` call fail promptly with [`StreamError::Cancelled`],
//! distinguishable from transport failures.

pub mod client;
pub mod decoder;
pub mod error;
pub mod types;

pub use client::{GenerateStream, OllamaClient};
pub use decoder::LineDecoder;
pub use error::StreamError;
pub use types::{GenerateRecord, GenerateRequest};
