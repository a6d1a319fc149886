//! Usage: Live accumulator for one run, fed event-by-event.
//!
//! Holds the reducer state and projects on demand, so the live view and the
//! stored record come from the same fold and cannot drift apart.

use super::events::DomainEvent;
use super::projection::{project_run, ProjectionOptions, RunView};
use super::reducer::apply_event;
use super::state::RootState;

#[derive(Debug, Clone)]
pub struct StreamAccumulator {
    state: RootState,
    run_id: String,
    options: ProjectionOptions,
    log: Vec<DomainEvent>,
}

impl StreamAccumulator {
    pub fn new(state: RootState, run_id: impl Into<String>) -> Self {
        Self::with_options(state, run_id, ProjectionOptions::default())
    }

    pub fn with_options(
        state: RootState,
        run_id: impl Into<String>,
        options: ProjectionOptions,
    ) -> Self {
        Self {
            state,
            run_id: run_id.into(),
            options,
            log: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Applies one event; every event is logged, applied or not, so the log replays exactly.
    pub fn push(&mut self, event: DomainEvent) -> bool {
        let applied = apply_event(&mut self.state, &self.run_id, &event);
        self.log.push(event);
        applied
    }

    pub fn is_terminal(&self) -> bool {
        self.state
            .run(&self.run_id)
            .is_some_and(|run| run.status.is_terminal())
    }

    pub fn view(&self) -> Option<RunView> {
        project_run(&self.state, &self.run_id, self.options)
    }

    pub fn state(&self) -> &RootState {
        &self.state
    }

    pub fn events(&self) -> &[DomainEvent] {
        &self.log
    }

    pub fn into_parts(self) -> (RootState, Vec<DomainEvent>) {
        (self.state, self.log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::MetaFields;
    use crate::domain::reducer::{reduce, start_generation_with, GenerationHandle, StartGeneration};
    use serde_json::json;

    fn started() -> RootState {
        start_generation_with(
            RootState::new(),
            StartGeneration {
                model: "m".to_string(),
                ..StartGeneration::default()
            },
            &GenerationHandle {
                run_id: "run_1".to_string(),
                request_id: "req_1".to_string(),
                assistant_message_id: "msg_a".to_string(),
                prompt_message_id: None,
            },
        )
    }

    fn sample_events() -> Vec<DomainEvent> {
        vec![
            DomainEvent::MetaDelta {
                fields: MetaFields {
                    generation_id: Some("gen-1".to_string()),
                    ..MetaFields::default()
                },
            },
            DomainEvent::ReasoningDetail {
                message_id: "msg_a".to_string(),
                detail: json!({"type": "reasoning.text", "text": "plan", "id": "r1"}),
                identity_key: "r1".to_string(),
            },
            DomainEvent::ReasoningDetail {
                message_id: "msg_a".to_string(),
                detail: json!({"type": "reasoning.text", "text": "plan", "id": "r1"}),
                identity_key: "r1".to_string(),
            },
            DomainEvent::MessageDeltaText {
                message_id: "msg_a".to_string(),
                text: "Hi".to_string(),
            },
            DomainEvent::UsageDelta {
                usage: json!({"prompt_tokens": 4}).as_object().cloned().expect("object"),
            },
            DomainEvent::StreamDone,
            DomainEvent::MessageDeltaText {
                message_id: "msg_a".to_string(),
                text: "ignored".to_string(),
            },
        ]
    }

    #[test]
    fn accumulator_view_matches_reducer_projection() {
        let mut acc = StreamAccumulator::new(started(), "run_1");
        for event in sample_events() {
            acc.push(event);
        }

        let reduced = reduce(started(), "run_1", &sample_events());
        let expected = project_run(&reduced, "run_1", ProjectionOptions::default());

        assert_eq!(acc.view(), expected);
        assert!(acc.is_terminal());
        let view = acc.view().expect("view");
        assert_eq!(view.text, "Hi");
        assert_eq!(view.reasoning_details.len(), 1);
    }

    #[test]
    fn log_replays_to_same_state() {
        let mut acc = StreamAccumulator::new(started(), "run_1");
        for event in sample_events() {
            acc.push(event);
        }
        let (state, log) = acc.into_parts();
        assert_eq!(log.len(), sample_events().len());
        assert_eq!(reduce(started(), "run_1", &log), state);
    }
}
