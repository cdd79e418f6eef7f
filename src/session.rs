//! Rolling session counters.
//!
//! One tracker per orchestrator process. The executor folds token usage
//! and cost into it as phases run; snapshots go out as `session_update`
//! events on the wildcard topic so every monitoring subscriber sees them.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::event::{Event, EventPayload};
use crate::pipeline::Publisher;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    input_tokens: u64,
    output_tokens: u64,
    cost_usd: f64,
    tasks_running: u32,
    is_paused: bool,
}

pub struct SessionTracker {
    started_at: DateTime<Utc>,
    counters: Mutex<Counters>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn add_tokens(&self, input: u64, output: u64) {
        let mut c = self.lock();
        c.input_tokens += input;
        c.output_tokens += output;
    }

    pub fn add_cost(&self, usd: f64) {
        self.lock().cost_usd += usd;
    }

    pub fn task_started(&self) {
        self.lock().tasks_running += 1;
    }

    pub fn task_finished(&self) {
        let mut c = self.lock();
        c.tasks_running = c.tasks_running.saturating_sub(1);
    }

    pub fn set_paused(&self, paused: bool) {
        self.lock().is_paused = paused;
    }

    pub fn tasks_running(&self) -> u32 {
        self.lock().tasks_running
    }

    /// Current counters as a `session_update` payload.
    pub fn snapshot(&self) -> EventPayload {
        let c = *self.lock();
        let duration = (Utc::now() - self.started_at).num_seconds().max(0) as u64;
        EventPayload::SessionUpdate {
            duration_seconds: duration,
            total_tokens: c.input_tokens + c.output_tokens,
            cost_usd: c.cost_usd,
            input: c.input_tokens,
            output: c.output_tokens,
            tasks_running: c.tasks_running,
            is_paused: c.is_paused,
        }
    }

    /// Publish a snapshot on the wildcard topic.
    pub fn publish_update(&self, publisher: &dyn Publisher) {
        publisher.publish(&Event::session_update(self.snapshot()));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().expect("session counters lock poisoned")
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::WILDCARD_TOPIC;
    use std::sync::Arc;

    #[derive(Default)]
    struct Capture {
        events: Mutex<Vec<Event>>,
    }

    impl Publisher for Capture {
        fn publish(&self, event: &Event) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn counters_accumulate_into_snapshot() {
        let tracker = SessionTracker::new();
        tracker.add_tokens(100, 40);
        tracker.add_tokens(10, 5);
        tracker.add_cost(0.25);
        tracker.task_started();

        match tracker.snapshot() {
            EventPayload::SessionUpdate {
                total_tokens,
                input,
                output,
                cost_usd,
                tasks_running,
                is_paused,
                ..
            } => {
                assert_eq!(total_tokens, 155);
                assert_eq!(input, 110);
                assert_eq!(output, 45);
                assert!((cost_usd - 0.25).abs() < 1e-9);
                assert_eq!(tasks_running, 1);
                assert!(!is_paused);
            }
            other => panic!("expected SessionUpdate, got {other:?}"),
        }
    }

    #[test]
    fn task_counter_never_underflows() {
        let tracker = SessionTracker::new();
        tracker.task_finished();
        assert_eq!(tracker.tasks_running(), 0);
    }

    #[test]
    fn update_travels_on_wildcard_topic() {
        let tracker = SessionTracker::new();
        let capture = Arc::new(Capture::default());
        tracker.publish_update(capture.as_ref());

        let events = capture.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].task_id, WILDCARD_TOPIC);
        assert_eq!(events[0].event_type(), "session_update");
    }
}
