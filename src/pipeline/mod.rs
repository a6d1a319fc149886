//! Usage: Single-consumer run loop (byte stream -> decoder -> mapper -> events -> reducer).
//!
//! `RunStream` yields domain events one at a time. The merged cancellation token
//! is checked at every yield; once it fires, queued events are dropped and a
//! single `StreamAbort` is emitted.

use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;

use crate::domain::accumulator::StreamAccumulator;
use crate::domain::events::{DomainEvent, ErrorOrigin, MetaFields, StreamErrorInfo};
use crate::domain::mapper::map_frame;
use crate::domain::projection::{ProjectionOptions, RunView};
use crate::domain::reducer::{apply_event, start_generation, GenerationHandle, StartGeneration};
use crate::domain::snapshot::{to_snapshot, Snapshot};
use crate::domain::state::RootState;
use crate::infra::snapshots::SnapshotStore;
use crate::protocol::{FrameDecoder, FrameSignal};
use crate::shared::error::AppError;
use crate::transport::{
    ByteStream, CancelScope, ChatRequest, StreamResponse, Transport, TransportError,
    ABORT_REASON_CANCELLED, ABORT_REASON_TIMEOUT,
};

pub const STREAM_READ_ERROR_CODE: &str = "stream_read_error";

struct NextFuture<'a, S: Stream + Unpin>(&'a mut S);

impl<'a, S: Stream + Unpin> Future for NextFuture<'a, S> {
    type Output = Option<S::Item>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut *self.0).poll_next(cx)
    }
}

async fn next_item<S: Stream + Unpin>(stream: &mut S) -> Option<S::Item> {
    NextFuture(stream).await
}

pub struct RunStream<S> {
    bytes: S,
    decoder: FrameDecoder,
    cancel: CancelScope,
    message_id: String,
    pending: VecDeque<DomainEvent>,
    terminal_queued: bool,
    eof: bool,
    finished: bool,
    malformed_frames: usize,
}

impl RunStream<ByteStream> {
    pub fn from_response(response: StreamResponse, message_id: impl Into<String>) -> Self {
        RunStream::new(response.bytes, response.cancel, message_id)
    }
}

impl<S, B, E> RunStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    pub fn new(bytes: S, cancel: CancelScope, message_id: impl Into<String>) -> Self {
        Self {
            bytes,
            decoder: FrameDecoder::new(),
            cancel,
            message_id: message_id.into(),
            pending: VecDeque::new(),
            terminal_queued: false,
            eof: false,
            finished: false,
            malformed_frames: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn malformed_frames(&self) -> usize {
        self.malformed_frames
    }

    /// Next event, or `None` once a terminal event has been yielded.
    pub async fn next_event(&mut self) -> Option<DomainEvent> {
        loop {
            if self.finished {
                return None;
            }
            if self.cancel.is_cancelled() {
                return Some(self.abort());
            }
            if let Some(event) = self.pending.pop_front() {
                if event.is_terminal() {
                    self.finished = true;
                }
                return Some(event);
            }
            if self.eof {
                self.finished = true;
                return Some(DomainEvent::StreamDone);
            }

            let item = tokio::select! {
                biased;
                _ = self.cancel.token().cancelled() => continue,
                item = next_item(&mut self.bytes) => item,
            };

            match item {
                Some(Ok(chunk)) => {
                    let signals = self.decoder.push(chunk.as_ref());
                    self.handle_signals(signals);
                }
                Some(Err(err)) => {
                    tracing::warn!(
                        message_id = %self.message_id,
                        "stream read failed mid-response: {err}"
                    );
                    self.queue_terminal(DomainEvent::StreamError {
                        error: StreamErrorInfo {
                            code: Some(STREAM_READ_ERROR_CODE.to_string()),
                            message: err.to_string(),
                            origin: ErrorOrigin::StreamRead,
                            metadata: None,
                        },
                    });
                }
                None => {
                    let signals = self.decoder.finish();
                    self.handle_signals(signals);
                    self.eof = true;
                }
            }
        }
    }

    fn abort(&mut self) -> DomainEvent {
        let dropped = self.pending.len();
        self.pending.clear();
        self.finished = true;
        let reason = self.cancel.abort_reason();
        tracing::debug!(
            message_id = %self.message_id,
            reason,
            dropped,
            "run stream aborted"
        );
        DomainEvent::StreamAbort {
            reason: reason.to_string(),
        }
    }

    fn queue_terminal(&mut self, event: DomainEvent) {
        if !self.terminal_queued {
            self.terminal_queued = true;
            self.pending.push_back(event);
        }
    }

    fn handle_signals(&mut self, signals: Vec<FrameSignal>) {
        for signal in signals {
            if self.terminal_queued {
                return;
            }
            match signal {
                FrameSignal::Comment(text) => {
                    self.pending.push_back(DomainEvent::StreamComment { text });
                }
                FrameSignal::Json {
                    payload,
                    terminal_error,
                } => {
                    for event in map_frame(&payload, &self.message_id) {
                        if event.is_terminal() {
                            self.queue_terminal(event);
                        } else {
                            self.pending.push_back(event);
                        }
                    }
                    if terminal_error && !self.terminal_queued {
                        tracing::warn!(message_id = %self.message_id, "error frame produced no error event");
                    }
                }
                FrameSignal::Done => self.queue_terminal(DomainEvent::StreamDone),
                FrameSignal::Malformed { line, error } => {
                    self.malformed_frames += 1;
                    tracing::warn!(
                        message_id = %self.message_id,
                        line_len = line.len(),
                        "malformed stream frame skipped: {error}"
                    );
                }
            }
        }
    }
}

/// Feeds every event from `stream` into `accumulator`. Returns the number of events.
pub async fn drive<S, B, E>(stream: &mut RunStream<S>, accumulator: &mut StreamAccumulator) -> usize
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut count = 0usize;
    while let Some(event) = stream.next_event().await {
        accumulator.push(event);
        count += 1;
    }
    count
}

#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub start: StartGeneration,
    pub chat: ChatRequest,
    pub projection: ProjectionOptions,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub handle: GenerationHandle,
    /// Ordered event log; replaying it over the freshly started run reproduces the final state.
    pub events: Vec<DomainEvent>,
    pub view: Option<RunView>,
    pub snapshot: Option<Snapshot>,
    pub header_generation_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Persistence(#[from] AppError),
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    transport: Transport,
    store: Option<SnapshotStore>,
}

impl Pipeline {
    pub fn new(transport: Transport, store: Option<SnapshotStore>) -> Self {
        Self { transport, store }
    }

    /// Starts a run in `state`, streams it to a terminal status, and snapshots it when a store is configured.
    ///
    /// Pre-stream transport failures are returned as `Err`; the run is still closed
    /// in `state` (aborted for cancellation/timeout, errored otherwise).
    pub async fn execute(
        &self,
        state: &mut RootState,
        request: GenerationRequest,
    ) -> Result<RunOutcome, GenerationError> {
        let GenerationRequest {
            start,
            mut chat,
            projection,
        } = request;
        let (started, handle) = start_generation(std::mem::take(state), start);
        chat.request_id = Some(handle.request_id.clone());

        let response = match self.transport.send(chat).await {
            Ok(response) => response,
            Err(err) => {
                *state = started;
                apply_event(state, &handle.run_id, &transport_failure_event(&err));
                if let Err(persist_err) = self.persist(state, &handle.run_id).await {
                    tracing::warn!(
                        run_id = %handle.run_id,
                        code = persist_err.code(),
                        "failed to snapshot run closed by transport failure: {persist_err}"
                    );
                }
                return Err(err.into());
            }
        };

        let header_generation_id = response.generation_id.clone();
        let mut accumulator = StreamAccumulator::with_options(started, &handle.run_id, projection);
        if let Some(generation_id) = header_generation_id.clone() {
            accumulator.push(DomainEvent::MetaDelta {
                fields: MetaFields {
                    generation_id: Some(generation_id),
                    ..MetaFields::default()
                },
            });
        }

        let mut stream = RunStream::from_response(response, handle.assistant_message_id.clone());
        drive(&mut stream, &mut accumulator).await;
        let view = accumulator.view();
        let (final_state, events) = accumulator.into_parts();
        *state = final_state;

        tracing::info!(
            run_id = %handle.run_id,
            request_id = %handle.request_id,
            status = view.as_ref().map(|v| v.status.as_str()),
            events = events.len(),
            malformed_frames = stream.malformed_frames(),
            "generation run finished"
        );

        let snapshot = self.persist(state, &handle.run_id).await?;
        Ok(RunOutcome {
            handle,
            events,
            view,
            snapshot,
            header_generation_id,
        })
    }

    async fn persist(&self, state: &RootState, run_id: &str) -> Result<Option<Snapshot>, AppError> {
        let Some(store) = self.store.as_ref() else {
            return Ok(None);
        };
        let Some(snapshot) = to_snapshot(state, run_id)? else {
            return Ok(None);
        };
        store.save_async(snapshot.clone()).await?;
        Ok(Some(snapshot))
    }
}

/// Terminal event recorded on the run when the request never produced a stream.
pub fn transport_failure_event(err: &TransportError) -> DomainEvent {
    match err {
        TransportError::Aborted => DomainEvent::StreamAbort {
            reason: ABORT_REASON_CANCELLED.to_string(),
        },
        TransportError::Timeout { .. } => DomainEvent::StreamAbort {
            reason: ABORT_REASON_TIMEOUT.to_string(),
        },
        TransportError::HttpError { status, body, .. } => DomainEvent::StreamError {
            error: StreamErrorInfo {
                code: Some(err.code().to_string()),
                message: err.to_string(),
                origin: ErrorOrigin::Transport,
                metadata: Some(serde_json::json!({ "status": status, "body": body })),
            },
        },
        TransportError::NetworkError { .. } | TransportError::InvalidRequest { .. } => {
            DomainEvent::StreamError {
                error: StreamErrorInfo {
                    code: Some(err.code().to_string()),
                    message: err.to_string(),
                    origin: ErrorOrigin::Transport,
                    metadata: None,
                },
            }
        }
    }
}
