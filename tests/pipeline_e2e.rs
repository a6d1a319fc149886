mod support;

use std::time::Duration;

use chat_stream_core::domain::reducer::start_generation_with;
use chat_stream_core::{
    reduce, ChatRequest, DomainEvent, ErrorOrigin, GenerationError, GenerationRequest, Pipeline,
    ReasoningVisibility, RootState, RunStatus, StartGeneration, TransportError,
};
use tokio_util::sync::CancellationToken;

fn request(prompt: &str) -> GenerationRequest {
    GenerationRequest {
        start: StartGeneration {
            model: "openai/gpt-4o".to_string(),
            prompt: Some(prompt.to_string()),
            ..StartGeneration::default()
        },
        chat: ChatRequest {
            api_key: "sk-test".to_string(),
            body: support::chat_body(),
            ..ChatRequest::default()
        },
        ..GenerationRequest::default()
    }
}

#[tokio::test]
async fn streamed_run_completes_with_projected_view() {
    let upstream = support::MockUpstream::start().await;
    let pipeline = Pipeline::new(support::transport(&upstream.base_url("ok"), 0), None);
    let mut state = RootState::new();

    let outcome = pipeline
        .execute(&mut state, request("say hello"))
        .await
        .expect("run");

    let view = outcome.view.as_ref().expect("view");
    assert_eq!(view.status, RunStatus::Completed);
    assert_eq!(view.text, "Hello, world");
    assert_eq!(view.generation_id.as_deref(), Some(support::HEADER_GENERATION_ID));
    assert_eq!(view.model.as_deref(), Some("openai/gpt-4o"));
    assert_eq!(view.finish_reason.as_deref(), Some("stop"));
    assert_eq!(view.usage["total_tokens"], 15);
    assert_eq!(view.reasoning_text, "thinking");
    let reasoning = view.reasoning.as_ref().expect("reasoning record");
    assert_eq!(reasoning.visibility, ReasoningVisibility::Visible);
    assert!(reasoning.summary_synthesized);

    assert_eq!(
        outcome.header_generation_id.as_deref(),
        Some(support::HEADER_GENERATION_ID)
    );
    assert!(outcome.snapshot.is_none());
    assert_eq!(outcome.events.last(), Some(&DomainEvent::StreamDone));

    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].request_id.as_deref(),
        Some(outcome.handle.request_id.as_str())
    );

    let run = state.run(&outcome.handle.run_id).expect("run in state");
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(state.run_messages(&outcome.handle.run_id).len(), 2);
}

#[tokio::test]
async fn event_log_replays_to_live_state() {
    let upstream = support::MockUpstream::start().await;
    let pipeline = Pipeline::new(support::transport(&upstream.base_url("ok"), 0), None);
    let mut state = RootState::new();

    let outcome = pipeline
        .execute(&mut state, request("say hello"))
        .await
        .expect("run");

    let replayed = reduce(
        start_generation_with(
            RootState::new(),
            request("say hello").start,
            &outcome.handle,
        ),
        &outcome.handle.run_id,
        &outcome.events,
    );
    assert_eq!(replayed, state);
}

#[tokio::test]
async fn mid_stream_error_frame_ends_run_as_errored() {
    let upstream = support::MockUpstream::start().await;
    let pipeline = Pipeline::new(support::transport(&upstream.base_url("broken"), 0), None);
    let mut state = RootState::new();

    let outcome = pipeline
        .execute(&mut state, request("break please"))
        .await
        .expect("stream errors are run outcomes, not failures");

    let view = outcome.view.expect("view");
    assert_eq!(view.status, RunStatus::Errored);
    assert_eq!(view.text, "par");
    let error = view.error.expect("error info");
    assert_eq!(error.code.as_deref(), Some("server_error"));
    assert_eq!(error.message, "upstream crashed");
    assert!(matches!(
        outcome.events.last(),
        Some(DomainEvent::StreamError { .. })
    ));
}

#[tokio::test]
async fn http_failure_closes_run_and_returns_transport_error() {
    let upstream = support::MockUpstream::start().await;
    let pipeline = Pipeline::new(support::transport(&upstream.base_url("limited"), 0), None);
    let mut state = RootState::new();

    let err = pipeline
        .execute(&mut state, request("hello"))
        .await
        .expect_err("429 should fail");

    match &err {
        GenerationError::Transport(TransportError::HttpError { status, .. }) => {
            assert_eq!(*status, 429)
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(state.runs.len(), 1);
    let run = state.runs.values().next().expect("run");
    assert_eq!(run.status, RunStatus::Errored);
    let error = run.error.as_ref().expect("error");
    assert_eq!(error.origin, ErrorOrigin::Transport);
    assert_eq!(error.code.as_deref(), Some("http_error"));
}

#[tokio::test]
async fn caller_cancel_mid_stream_aborts_run() {
    let upstream = support::MockUpstream::start().await;
    let pipeline = Pipeline::new(support::transport(&upstream.base_url("stall"), 0), None);
    let mut state = RootState::new();
    let cancel = CancellationToken::new();

    let mut req = request("take your time");
    req.chat.cancel = Some(cancel.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let outcome = tokio::time::timeout(Duration::from_secs(10), pipeline.execute(&mut state, req))
        .await
        .expect("abort should end the run")
        .expect("run");

    let view = outcome.view.expect("view");
    assert_eq!(view.status, RunStatus::Aborted);
    assert_eq!(view.abort_reason.as_deref(), Some("cancelled"));
    assert_eq!(view.text, "partial");
    assert_eq!(
        outcome
            .events
            .iter()
            .filter(|e| matches!(e, DomainEvent::StreamAbort { .. }))
            .count(),
        1
    );
}

#[tokio::test]
async fn request_timeout_mid_stream_aborts_with_timeout_reason() {
    let upstream = support::MockUpstream::start().await;
    let pipeline = Pipeline::new(support::transport(&upstream.base_url("stall"), 300), None);
    let mut state = RootState::new();

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        pipeline.execute(&mut state, request("take your time")),
    )
    .await
    .expect("timeout should end the run")
    .expect("run");

    let view = outcome.view.expect("view");
    assert_eq!(view.status, RunStatus::Aborted);
    assert_eq!(view.abort_reason.as_deref(), Some("timeout"));
}
