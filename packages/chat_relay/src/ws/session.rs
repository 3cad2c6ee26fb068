//! Relay Session
//!
//! One session per WebSocket connection: it owns at most one
//! in-flight generation at a time, pumps decoded increments to the
//! client in arrival order, and finalizes with exactly one terminal
//! event (`Complete`, `Stopped`, or `Error`) per generation.
//!
//! A `Chat` while a generation is active is rejected with an error
//! event; `Stop` cancels the active generation; disconnect cancels it
//! silently.

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ollama_stream::{LineDecoder, OllamaClient, StreamError};

use super::protocol::{ClientMessage, ServerMessage};
use crate::AppState;
use crate::metrics::ServerMetrics;

/// Handle of the in-flight generation for one connection.
///
/// The id ties a finishing task back to the slot entry it created, so
/// a task that lost a stop/finish race can never clear a newer
/// generation's token.
struct ActiveGeneration {
    id: u64,
    cancel: CancellationToken,
}

/// Single-flight slot holding the connection's active generation.
#[derive(Clone, Default)]
struct GenerationSlot {
    inner: Arc<Mutex<Option<ActiveGeneration>>>,
    next_id: Arc<AtomicU64>,
}

impl GenerationSlot {
    fn new() -> Self {
        Self::default()
    }

    /// Reserve the slot for a new generation. Returns the generation
    /// id and its cancellation token, or `None` when a generation is
    /// already active.
    async fn try_start(&self) -> Option<(u64, CancellationToken)> {
        let mut guard = self.inner.lock().await;
        if guard.is_some() {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *guard = Some(ActiveGeneration {
            id,
            cancel: cancel.clone(),
        });
        Some((id, cancel))
    }

    /// Signal the active generation's token, if any. Signalling an
    /// already-cancelled or already-finished token is a no-op.
    async fn cancel_active(&self) {
        if let Some(active) = self.inner.lock().await.as_ref() {
            active.cancel.cancel();
        }
    }

    /// Clear the entry created by generation `id`. A stale id leaves
    /// the current entry alone.
    async fn clear(&self, id: u64) {
        let mut guard = self.inner.lock().await;
        if guard.as_ref().is_some_and(|active| active.id == id) {
            *guard = None;
        }
    }

    async fn is_active(&self) -> bool {
        self.inner.lock().await.is_some()
    }
}

/// Handle one chat WebSocket connection to completion.
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %connection_id, "chat client connected");
    state.metrics.connection_opened();

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending messages to the WebSocket. A single writer
    // task keeps outbound events in emission order.
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(100);
    let slot = GenerationSlot::new();

    let sender_task = async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    error!("failed to serialize message: {e}");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    };

    let slot_input = slot.clone();
    let tx_input = tx.clone();
    let client = state.client.clone();
    let metrics = state.metrics.clone();
    let conn_id = connection_id.clone();

    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let client_msg = match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(m) => m,
                        Err(e) => {
                            warn!(conn_id = %conn_id, "ignoring unparseable message: {e}");
                            continue;
                        }
                    };
                    match client_msg {
                        ClientMessage::Chat { prompt } => {
                            info!(conn_id = %conn_id, "received prompt ({} chars)", prompt.len());

                            let Some((id, cancel)) = slot_input.try_start().await else {
                                metrics.session_rejected();
                                warn!(conn_id = %conn_id, "rejecting chat: generation already in progress");
                                if tx_input
                                    .send(ServerMessage::Error {
                                        message: "generation already in progress".to_string(),
                                    })
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                                continue;
                            };

                            metrics.session_started();
                            let client = client.clone();
                            let tx = tx_input.clone();
                            let slot = slot_input.clone();
                            let metrics = metrics.clone();
                            tokio::spawn(async move {
                                run_generation(&client, &prompt, cancel, &tx, &metrics).await;
                                slot.clear(id).await;
                            });
                        }
                        ClientMessage::Stop => {
                            debug!(conn_id = %conn_id, "stop requested");
                            slot_input.cancel_active().await;
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!(conn_id = %conn_id, "client closed connection");
                    break;
                }
                Err(e) => {
                    error!(conn_id = %conn_id, "websocket error: {e}");
                    break;
                }
                _ => {}
            }
        }

        // The channel to the client is gone; stop the upstream fetch.
        // No notification — there is nothing left to notify.
        slot_input.cancel_active().await;
    };

    tokio::select! {
        _ = sender_task => debug!("sender task ended"),
        _ = input_task => debug!("input task ended"),
    }

    // Whichever task lost the select was dropped before its own
    // cleanup ran; cancel again from the surviving handle.
    slot.cancel_active().await;

    state.metrics.connection_closed();
    info!(conn_id = %connection_id, "chat client disconnected");
}

/// Drive one generation to its terminal event: read chunks, decode
/// records, emit increments in order, then exactly one of
/// `Complete` / `Stopped` / `Error`.
async fn run_generation(
    client: &OllamaClient,
    prompt: &str,
    cancel: CancellationToken,
    tx: &mpsc::Sender<ServerMessage>,
    metrics: &ServerMetrics,
) {
    let terminal = match relay_stream(client, prompt, cancel, tx, metrics).await {
        Ok(()) => {
            metrics.session_completed();
            debug!("generation complete");
            ServerMessage::Complete
        }
        Err(StreamError::Cancelled) => {
            metrics.session_stopped();
            info!("generation stopped");
            ServerMessage::Stopped
        }
        Err(e) => {
            metrics.session_failed();
            error!("generation failed: {e}");
            ServerMessage::Error {
                message: "Error communicating with model".to_string(),
            }
        }
    };

    // A send failure means the subscriber disconnected; the terminal
    // event is silently dropped along with the connection.
    let _ = tx.send(terminal).await;
}

/// The read-decode-emit loop. Returns `Ok(())` on natural
/// end-of-stream; a vanished subscriber is folded into `Cancelled`.
async fn relay_stream(
    client: &OllamaClient,
    prompt: &str,
    cancel: CancellationToken,
    tx: &mpsc::Sender<ServerMessage>,
    metrics: &ServerMetrics,
) -> Result<(), StreamError> {
    let mut stream = client.generate(prompt, cancel).await?;
    let mut decoder = LineDecoder::new();

    let result = async {
        while let Some(chunk) = stream.next_chunk().await? {
            for record in decoder.push(&chunk) {
                emit_increment(record.text(), tx, metrics).await?;
            }
        }
        if let Some(record) = decoder.finish() {
            emit_increment(record.text(), tx, metrics).await?;
        }
        Ok(())
    }
    .await;

    metrics.malformed_records(decoder.skipped_lines());
    result
}

/// Forward one record's text to the subscriber, preserving order by
/// awaiting the channel before the next chunk is read.
async fn emit_increment(
    text: Option<&str>,
    tx: &mpsc::Sender<ServerMessage>,
    metrics: &ServerMetrics,
) -> Result<(), StreamError> {
    let Some(text) = text else { return Ok(()) };
    if tx
        .send(ServerMessage::Chunk {
            text: text.to_string(),
        })
        .await
        .is_err()
    {
        return Err(StreamError::Cancelled);
    }
    metrics.chunk_relayed();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::StatusCode, routing::post};
    use futures::stream;
    use std::time::Duration;

    async fn spawn_upstream(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn ndjson_upstream(body: &'static str) -> Router {
        Router::new().route("/api/generate", post(move || async move { body }))
    }

    /// Upstream that sends one record and then hangs forever.
    fn hanging_upstream() -> Router {
        Router::new().route(
            "/api/generate",
            post(|| async {
                let first = stream::iter(vec![Ok::<_, std::io::Error>(
                    "{\"response\":\"Hel\"}\n".to_string(),
                )]);
                Body::from_stream(first.chain(stream::pending()))
            }),
        )
    }

    async fn collect_events(mut rx: mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut events = Vec::new();
        while let Some(msg) = rx.recv().await {
            events.push(msg);
        }
        events
    }

    // ── Order preservation and single terminal event ───────────────

    #[tokio::test]
    async fn increments_in_order_then_complete() {
        let url = spawn_upstream(ndjson_upstream(
            "{\"response\":\"Hel\"}\n{\"response\":\"lo\"}\n{\"done\":true}\n",
        ))
        .await;
        let client = OllamaClient::new(url, "mistral:latest");
        let metrics = ServerMetrics::new();
        let (tx, rx) = mpsc::channel(100);

        run_generation(&client, "hi", CancellationToken::new(), &tx, &metrics).await;
        drop(tx);

        let events = collect_events(rx).await;
        let texts: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ServerMessage::Chunk { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, ["Hel", "lo"]);
        // Exactly one terminal event, after the last increment.
        assert!(matches!(events.last(), Some(ServerMessage::Complete)));
        assert_eq!(
            events
                .iter()
                .filter(|e| !matches!(e, ServerMessage::Chunk { .. }))
                .count(),
            1
        );

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions.completed, 1);
        assert_eq!(snapshot.stream.chunks_relayed, 2);
    }

    // ── Malformed-line resilience ──────────────────────────────────

    #[tokio::test]
    async fn malformed_line_yields_no_error_event() {
        let url = spawn_upstream(ndjson_upstream(
            "{\"response\":\"a\"}\ngarbage line\n{\"response\":\"b\"}\n",
        ))
        .await;
        let client = OllamaClient::new(url, "mistral:latest");
        let metrics = ServerMetrics::new();
        let (tx, rx) = mpsc::channel(100);

        run_generation(&client, "hi", CancellationToken::new(), &tx, &metrics).await;
        drop(tx);

        let events = collect_events(rx).await;
        let texts: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ServerMessage::Chunk { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, ["a", "b"]);
        assert!(matches!(events.last(), Some(ServerMessage::Complete)));
        assert_eq!(metrics.snapshot().stream.malformed_records_skipped, 1);
    }

    // ── Cancellation promptness ────────────────────────────────────

    #[tokio::test]
    async fn stop_during_pending_read_emits_stopped() {
        let url = spawn_upstream(hanging_upstream()).await;
        let client = OllamaClient::new(url, "mistral:latest");
        let metrics = Arc::new(ServerMetrics::new());
        let (tx, mut rx) = mpsc::channel(100);
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let client = client.clone();
            let cancel = cancel.clone();
            let metrics = metrics.clone();
            async move {
                run_generation(&client, "hi", cancel, &tx, &metrics).await;
            }
        });

        // First increment arrives, then the upstream stalls.
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ServerMessage::Chunk { text } if text == "Hel"));

        cancel.cancel();
        let next = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("stop must not wait for upstream completion")
            .unwrap();
        assert!(matches!(next, ServerMessage::Stopped));

        task.await.unwrap();
        // Nothing after the terminal event.
        assert!(rx.recv().await.is_none());
        assert_eq!(metrics.snapshot().sessions.stopped, 1);
    }

    // ── Upstream failure ───────────────────────────────────────────

    #[tokio::test]
    async fn upstream_error_emits_single_error_event() {
        let app = Router::new().route(
            "/api/generate",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let url = spawn_upstream(app).await;
        let client = OllamaClient::new(url, "mistral:latest");
        let metrics = ServerMetrics::new();
        let (tx, rx) = mpsc::channel(100);

        run_generation(&client, "hi", CancellationToken::new(), &tx, &metrics).await;
        drop(tx);

        let events = collect_events(rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ServerMessage::Error { message } if message == "Error communicating with model"
        ));
        assert_eq!(metrics.snapshot().sessions.failed, 1);
    }

    // ── Disconnect silence ─────────────────────────────────────────

    #[tokio::test]
    async fn vanished_subscriber_gets_no_events() {
        let url = spawn_upstream(ndjson_upstream(
            "{\"response\":\"a\"}\n{\"response\":\"b\"}\n",
        ))
        .await;
        let client = OllamaClient::new(url, "mistral:latest");
        let metrics = ServerMetrics::new();
        let (tx, rx) = mpsc::channel(100);
        drop(rx);

        // Must return quietly: no panic, no event delivered anywhere.
        run_generation(&client, "hi", CancellationToken::new(), &tx, &metrics).await;
        assert_eq!(metrics.snapshot().stream.chunks_relayed, 0);
    }

    // ── Single-flight slot ─────────────────────────────────────────

    #[tokio::test]
    async fn slot_rejects_second_start_while_active() {
        let slot = GenerationSlot::new();
        let (first_id, _cancel) = slot.try_start().await.unwrap();

        assert!(slot.try_start().await.is_none());
        assert!(slot.is_active().await);

        slot.clear(first_id).await;
        assert!(!slot.is_active().await);
        assert!(slot.try_start().await.is_some());
    }

    #[tokio::test]
    async fn stale_id_does_not_clear_newer_generation() {
        let slot = GenerationSlot::new();
        let (old_id, _old_cancel) = slot.try_start().await.unwrap();
        slot.clear(old_id).await;

        let (new_id, _new_cancel) = slot.try_start().await.unwrap();
        assert_ne!(old_id, new_id);

        // A stale finish must not free the slot out from under the
        // newer generation.
        slot.clear(old_id).await;
        assert!(slot.is_active().await);

        slot.clear(new_id).await;
        assert!(!slot.is_active().await);
    }

    #[tokio::test]
    async fn cancel_active_is_noop_when_idle() {
        let slot = GenerationSlot::new();
        // No active generation: nothing to signal, nothing to panic.
        slot.cancel_active().await;
        assert!(!slot.is_active().await);
    }

    #[tokio::test]
    async fn cancel_active_signals_current_token() {
        let slot = GenerationSlot::new();
        let (_id, cancel) = slot.try_start().await.unwrap();
        assert!(!cancel.is_cancelled());

        slot.cancel_active().await;
        assert!(cancel.is_cancelled());

        // Double-cancel is a no-op.
        slot.cancel_active().await;
        assert!(cancel.is_cancelled());
    }
}
