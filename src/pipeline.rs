//! Persistent event pipeline.
//!
//! Wraps a [`Fanout`]: every published event is forwarded to real-time
//! subscribers first, then buffered for the durable event log. The buffer
//! flushes when it reaches the configured threshold, when a phase
//! completes, and on a background timer. Phase durations are computed here
//! from the producer-assigned event times. A failed batch is logged and
//! dropped, never retried; events are durable only as far as the last
//! successful flush.

use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::event::{Event, EventLogRow, EventPayload, PhaseEventStatus, WILDCARD_TOPIC};
use crate::fanout::{Fanout, Subscription};
use crate::store::ProjectStore;

/// Buffer size that triggers an immediate flush.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 10;

/// Background flush period.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Anything that can accept events. The executor and importer publish
/// through this seam so events can be disabled wholesale.
pub trait Publisher: Send + Sync {
    fn publish(&self, event: &Event);
}

/// Publisher for disabled-events mode.
pub struct NopPublisher;

impl Publisher for NopPublisher {
    fn publish(&self, _event: &Event) {}
}

pub struct EventPipeline {
    fanout: Fanout,
    store: Option<Arc<ProjectStore>>,
    source: String,
    flush_threshold: usize,
    buffer: Mutex<Vec<EventLogRow>>,
    phase_starts: RwLock<HashMap<(String, String), DateTime<Utc>>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl EventPipeline {
    /// Real-time-only pipeline: no storage attached, nothing buffered.
    pub fn without_store(fanout: Fanout) -> Arc<Self> {
        Self::build(fanout, None, "core", DEFAULT_FLUSH_THRESHOLD, None)
    }

    /// Durable pipeline with the default thresholds and flush timer.
    pub fn new(fanout: Fanout, store: Arc<ProjectStore>, source: &str) -> Arc<Self> {
        Self::build(
            fanout,
            Some(store),
            source,
            DEFAULT_FLUSH_THRESHOLD,
            Some(DEFAULT_FLUSH_INTERVAL),
        )
    }

    /// Durable pipeline with explicit thresholds (tests and tuned setups).
    pub fn with_config(
        fanout: Fanout,
        store: Arc<ProjectStore>,
        source: &str,
        flush_threshold: usize,
        flush_interval: Option<Duration>,
    ) -> Arc<Self> {
        Self::build(fanout, Some(store), source, flush_threshold, flush_interval)
    }

    fn build(
        fanout: Fanout,
        store: Option<Arc<ProjectStore>>,
        source: &str,
        flush_threshold: usize,
        flush_interval: Option<Duration>,
    ) -> Arc<Self> {
        let pipeline = Arc::new(Self {
            fanout,
            store,
            source: source.to_string(),
            flush_threshold: flush_threshold.max(1),
            buffer: Mutex::new(Vec::new()),
            phase_starts: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            timer: Mutex::new(None),
        });

        if pipeline.store.is_some()
            && let Some(interval) = flush_interval
        {
            let weak = Arc::downgrade(&pipeline);
            let token = pipeline.shutdown.clone();
            let handle = tokio::spawn(flush_timer(weak, token, interval));
            *pipeline.timer.lock().expect("timer lock poisoned") = Some(handle);
        }

        pipeline
    }

    /// Subscribe to the real-time side.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        self.fanout.subscribe(topic)
    }

    pub fn fanout(&self) -> &Fanout {
        &self.fanout
    }

    /// Publish: forward to the fanout immediately, then buffer the durable
    /// row. Wildcard events are real-time only (there is no task row for
    /// them to reference).
    pub fn publish(&self, event: &Event) {
        self.fanout.publish(event);

        if self.closed.load(Ordering::SeqCst) || self.store.is_none() {
            return;
        }
        if event.task_id == WILDCARD_TOPIC {
            return;
        }

        let mut row = event.to_log_row(&self.source);
        self.track_phase_timing(event, &mut row);

        let should_flush = {
            let mut buffer = self.buffer.lock().expect("pipeline buffer lock poisoned");
            buffer.push(row);
            buffer.len() >= self.flush_threshold || event.is_phase_completed()
        };
        if should_flush {
            self.flush();
        }
    }

    /// Record phase starts; stamp `duration_ms` on the matching completion
    /// from the events' own times.
    fn track_phase_timing(&self, event: &Event, row: &mut EventLogRow) {
        let EventPayload::Phase { phase, status, .. } = &event.payload else {
            return;
        };
        let key = (event.task_id.clone(), phase.clone());
        match status {
            PhaseEventStatus::Started => {
                self.phase_starts
                    .write()
                    .expect("phase-start lock poisoned")
                    .insert(key, event.time);
            }
            PhaseEventStatus::Completed => {
                let started = self
                    .phase_starts
                    .write()
                    .expect("phase-start lock poisoned")
                    .remove(&key);
                if let Some(started) = started {
                    row.duration_ms = Some((event.time - started).num_milliseconds());
                }
            }
            _ => {}
        }
    }

    /// Swap the buffer under the lock and write the batch outside it.
    /// A batch failure is logged and the batch dropped.
    pub fn flush(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let batch = {
            let mut buffer = self.buffer.lock().expect("pipeline buffer lock poisoned");
            mem::take(&mut *buffer)
        };
        if batch.is_empty() {
            return;
        }
        let len = batch.len();
        match store.save_events(&batch) {
            Ok(_) => {}
            Err(e) => {
                // Not retried: re-queuing failed batches would grow the
                // buffer without bound.
                error!(batch_len = len, error = %e, "event batch flush failed");
            }
        }
    }

    /// Stop the flush timer, drain the buffer, close the fanout.
    /// Idempotent; returns only after the final flush completes. Events
    /// published concurrently with close race and may or may not be
    /// persisted.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        let handle = self.timer.lock().expect("timer lock poisoned").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "flush timer task failed during close");
            }
        }
        self.flush();
        self.fanout.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Rows currently buffered and not yet durable.
    pub fn pending_len(&self) -> usize {
        self.buffer.lock().expect("pipeline buffer lock poisoned").len()
    }
}

impl Publisher for EventPipeline {
    fn publish(&self, event: &Event) {
        EventPipeline::publish(self, event);
    }
}

async fn flush_timer(pipeline: Weak<EventPipeline>, token: CancellationToken, period: Duration) {
    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately; consume it so the first real
    // flush fires after one full period.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                let Some(pipeline) = pipeline.upgrade() else { break };
                pipeline.flush();
            }
        }
    }
}
