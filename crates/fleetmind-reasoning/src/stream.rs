//! Real-time stream processing of model output.
//!
//! Two cooperating tasks per stream:
//!
//! 1. the **parser** drains inbound chunks in arrival order, appends to
//!    a single-owner accumulator, and re-parses for the outermost
//!    balanced-brace candidates; new envelope steps are emitted by
//!    ordinal so re-parses never repeat a step
//! 2. the **UI dispatcher** drains queued updates in batches of at most
//!    ten per tick, sleeping the tick interval between batches, so UI
//!    backpressure never reaches the parser
//!
//! Both queues are bounded with a drop-oldest overflow policy; dropped
//! counts are tracked and reported as diagnostics, not failures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch, Notify};

use fleetmind_core::config::StreamConfig;
use fleetmind_core::reasoning::ReasoningStep;
use fleetmind_core::CoreError;

use crate::envelope::{self, Envelope};

/// One chunk of streamed content, as queued for the parser.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// Text content.
    pub content: String,
    /// Arrival instant.
    pub received_at: Instant,
    /// Monotonic sequence number within the stream.
    pub seq: u64,
    /// Whether this is the final chunk.
    pub is_final: bool,
}

/// Final outcome of one stream.
#[derive(Debug, Clone)]
pub enum StreamOutcome {
    /// A valid envelope parsed; all steps were emitted.
    Completed {
        /// The parsed envelope.
        envelope: Envelope,
        /// Full accumulated text.
        raw: String,
    },
    /// No valid envelope could be parsed, even after recovery.
    ParseFailed {
        /// Full accumulated text, for diagnostics.
        raw: String,
    },
    /// The stream was cancelled before completion.
    Cancelled,
}

/// Paced updates delivered to UI consumers.
#[derive(Debug, Clone)]
pub enum UiUpdate {
    /// New raw content arrived.
    ContentDelta {
        /// Chunk text.
        content: String,
        /// Accumulated length after this chunk.
        accumulated_len: usize,
        /// Chunk sequence number.
        seq: u64,
    },
    /// A reasoning step was parsed.
    Step {
        /// Step ordinal within the envelope.
        ordinal: usize,
        /// Phase name.
        name: String,
    },
    /// The stream finished.
    Complete {
        /// Number of steps parsed.
        parsed_steps: usize,
    },
    /// The stream failed.
    Error {
        /// Failure description.
        message: String,
    },
}

/// Bounded FIFO with drop-oldest overflow.
struct DropOldestQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
}

impl<T> DropOldestQueue<T> {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    fn push(&self, item: T) {
        {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            if items.len() >= self.capacity {
                items.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            items.push_back(item);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<T> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Stream processor: one live stream at a time per instance.
pub struct StreamProcessor {
    config: StreamConfig,
    busy: Arc<AtomicBool>,
}

impl StreamProcessor {
    /// Create a processor with the given configuration.
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start processing a new stream.
    ///
    /// Fails if a stream is already active on this processor.
    pub fn start(&self, stream_id: impl Into<String>) -> Result<StreamHandle, CoreError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(CoreError::internal(
                "stream processor already has an active stream",
            ));
        }

        let stream_id = stream_id.into();
        tracing::info!(target: "fleetmind::stream", %stream_id, "starting stream processing");

        let chunks = Arc::new(DropOldestQueue::new(self.config.chunk_queue_capacity));
        let ui_queue = Arc::new(DropOldestQueue::new(self.config.ui_queue_capacity));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (steps_tx, steps_rx) = mpsc::channel(64);
        let (ui_tx, ui_rx) = mpsc::channel(self.config.ui_queue_capacity);
        let (completion_tx, completion_rx) = oneshot::channel();
        let (errors_tx, errors_rx) = mpsc::channel(16);

        let parser = ParserTask {
            stream_id: stream_id.clone(),
            chunks: Arc::clone(&chunks),
            ui_queue: Arc::clone(&ui_queue),
            steps: steps_tx,
            errors: errors_tx,
            completion: completion_tx,
            stop: stop_rx.clone(),
            busy: Arc::clone(&self.busy),
        };
        tokio::spawn(parser.run());

        let dispatcher = DispatcherTask {
            ui_queue: Arc::clone(&ui_queue),
            ui_out: ui_tx,
            stop: stop_rx,
            tick: Duration::from_millis(self.config.update_interval_ms),
        };
        tokio::spawn(dispatcher.run());

        Ok(StreamHandle {
            stream_id,
            chunks,
            seq: AtomicU64::new(0),
            stopped: stop_tx,
            steps: Some(steps_rx),
            ui_updates: Some(ui_rx),
            completion: Some(completion_rx),
            errors: Some(errors_rx),
        })
    }

    /// Whether a stream is currently active.
    pub fn is_active(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

/// Handle to one live stream.
pub struct StreamHandle {
    stream_id: String,
    chunks: Arc<DropOldestQueue<StreamChunk>>,
    seq: AtomicU64,
    stopped: watch::Sender<bool>,
    steps: Option<mpsc::Receiver<ReasoningStep>>,
    ui_updates: Option<mpsc::Receiver<UiUpdate>>,
    completion: Option<oneshot::Receiver<StreamOutcome>>,
    errors: Option<mpsc::Receiver<String>>,
}

impl StreamHandle {
    /// Stream identifier.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Take the step channel. Steps arrive in envelope order; each
    /// ordinal is delivered at most once.
    pub fn take_steps(&mut self) -> Option<mpsc::Receiver<ReasoningStep>> {
        self.steps.take()
    }

    /// Take the paced UI update channel.
    pub fn take_ui_updates(&mut self) -> Option<mpsc::Receiver<UiUpdate>> {
        self.ui_updates.take()
    }

    /// Take the non-fatal diagnostics channel.
    pub fn take_errors(&mut self) -> Option<mpsc::Receiver<String>> {
        self.errors.take()
    }

    /// Enqueue a chunk. Non-blocking; once the queue is full the oldest
    /// chunk is discarded and counted. After `stop` the call succeeds
    /// but the chunk is discarded.
    pub fn push_chunk(&self, content: impl Into<String>, is_final: bool) {
        if *self.stopped.borrow() {
            return;
        }
        let chunk = StreamChunk {
            content: content.into(),
            received_at: Instant::now(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            is_final,
        };
        self.chunks.push(chunk);
    }

    /// Number of chunks discarded on queue overflow.
    pub fn dropped_chunks(&self) -> u64 {
        self.chunks.dropped()
    }

    /// Cancel the stream: both tasks exit within one tick and the
    /// completion channel yields [`StreamOutcome::Cancelled`].
    pub fn stop(&self) {
        let _ = self.stopped.send(true);
        // Wake the parser so it observes the stop signal promptly.
        self.chunks.notify.notify_one();
    }

    /// Await the final outcome. Yields exactly one result per stream.
    pub async fn completion(&mut self) -> StreamOutcome {
        match self.completion.take() {
            Some(rx) => rx.await.unwrap_or(StreamOutcome::Cancelled),
            None => StreamOutcome::Cancelled,
        }
    }
}

struct ParserTask {
    stream_id: String,
    chunks: Arc<DropOldestQueue<StreamChunk>>,
    ui_queue: Arc<DropOldestQueue<UiUpdate>>,
    steps: mpsc::Sender<ReasoningStep>,
    errors: mpsc::Sender<String>,
    completion: oneshot::Sender<StreamOutcome>,
    stop: watch::Receiver<bool>,
    busy: Arc<AtomicBool>,
}

impl ParserTask {
    async fn run(mut self) {
        let mut accumulator = String::new();
        let mut emitted = 0usize;
        let mut envelope: Option<Envelope> = None;

        let outcome = loop {
            if *self.stop.borrow() {
                break StreamOutcome::Cancelled;
            }

            let Some(chunk) = self.chunks.pop() else {
                tokio::select! {
                    _ = self.chunks.wait() => continue,
                    changed = self.stop.changed() => {
                        // A dropped handle counts as cancellation.
                        if changed.is_err() {
                            break StreamOutcome::Cancelled;
                        }
                        continue;
                    }
                }
            };

            accumulator.push_str(&chunk.content);
            self.ui_queue.push(UiUpdate::ContentDelta {
                content: chunk.content,
                accumulated_len: accumulator.len(),
                seq: chunk.seq,
            });

            if let Some(parsed) = self.try_parse(&accumulator) {
                self.emit_new_steps(&parsed, &mut emitted).await;
                envelope = Some(parsed);
            }

            if chunk.is_final {
                if envelope.is_none() {
                    if let Some(recovered) = envelope::recover_envelope(&accumulator) {
                        tracing::info!(target: "fleetmind::stream", stream_id = %self.stream_id, "recovered partial envelope");
                        self.emit_new_steps(&recovered, &mut emitted).await;
                        envelope = Some(recovered);
                    }
                }

                break match envelope.take() {
                    Some(envelope) => StreamOutcome::Completed {
                        envelope,
                        raw: accumulator.clone(),
                    },
                    None => StreamOutcome::ParseFailed {
                        raw: accumulator.clone(),
                    },
                };
            }
        };

        let dropped = self.chunks.dropped();
        if dropped > 0 {
            let _ = self
                .errors
                .try_send(format!("{dropped} chunks dropped on queue overflow"));
        }

        match &outcome {
            StreamOutcome::Completed { .. } => {
                self.ui_queue.push(UiUpdate::Complete {
                    parsed_steps: emitted,
                });
            }
            StreamOutcome::ParseFailed { .. } => {
                self.ui_queue.push(UiUpdate::Error {
                    message: "model output never parsed as an envelope".to_string(),
                });
            }
            StreamOutcome::Cancelled => {}
        }

        tracing::debug!(target: "fleetmind::stream", stream_id = %self.stream_id, steps = emitted, "parser finished");
        // Free the processor slot before the completion is observable.
        self.busy.store(false, Ordering::SeqCst);
        let _ = self.completion.send(outcome);
    }

    /// Try each outermost balanced object as an envelope candidate.
    fn try_parse(&self, accumulator: &str) -> Option<Envelope> {
        let text = envelope::strip_code_fences(accumulator);
        for candidate in envelope::balanced_objects(text) {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) else {
                continue;
            };
            if !envelope::is_envelope_value(&value) {
                continue;
            }
            if let Ok(parsed) = serde_json::from_value::<Envelope>(value) {
                return Some(parsed);
            }
        }
        None
    }

    /// Emit steps past the last emitted ordinal; never re-emit.
    async fn emit_new_steps(&self, envelope: &Envelope, emitted: &mut usize) {
        for (ordinal, step) in envelope.chain_of_thought.iter().enumerate().skip(*emitted) {
            // A dropped receiver does not stop the count; UI ordinals
            // stay stable either way.
            let _ = self.steps.send(step.clone()).await;
            self.ui_queue.push(UiUpdate::Step {
                ordinal,
                name: step.name.clone(),
            });
            *emitted = ordinal + 1;
        }
    }
}

struct DispatcherTask {
    ui_queue: Arc<DropOldestQueue<UiUpdate>>,
    ui_out: mpsc::Sender<UiUpdate>,
    stop: watch::Receiver<bool>,
    tick: Duration,
}

impl DispatcherTask {
    /// Maximum updates forwarded per tick.
    const BATCH: usize = 10;

    async fn run(mut self) {
        loop {
            if self.ui_out.is_closed() {
                return;
            }
            let mut forwarded = 0;
            while forwarded < Self::BATCH {
                let Some(update) = self.ui_queue.pop() else {
                    break;
                };
                let terminal = matches!(update, UiUpdate::Complete { .. } | UiUpdate::Error { .. });
                // Consumer backpressure drops updates rather than
                // stalling the pipeline.
                let _ = self.ui_out.try_send(update);
                forwarded += 1;
                if terminal {
                    return;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.tick) => {}
                _ = self.stop.changed() => {
                    // Drain one final batch, then exit within the tick.
                    while let Some(update) = self.ui_queue.pop() {
                        let _ = self.ui_out.try_send(update);
                    }
                    return;
                }
            }
        }
    }
}
