// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Translation status poller.
//!
//! One [`StatusPoller`] tracks at most one model at a time. [`StatusPoller::start`]
//! opens a [`PollingSession`]: a task that queries the status source
//! immediately and then once per interval until the model reaches a terminal
//! state, the session is replaced or stopped, or the attempt bound is hit.
//!
//! Every session carries a generation number. The session task only
//! publishes while the shared snapshot still belongs to its generation, and
//! the check and the update happen inside one `watch::Sender::send_if_modified`
//! call, so a response that arrives after the session was superseded is
//! dropped even if the task has not been cancelled yet.
//!
//! Queries inside a session are sequential: the next tick is only awaited
//! after the previous query returned, and missed ticks are delayed rather than
//! bursted, so a slow network never stacks concurrent requests.

use crate::error::ClientError;
use crate::model::ModelIdentifier;
use crate::status::TranslationState;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default delay between two status queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default attempt bound: 30 minutes at the default interval.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 360;

/// Shortest accepted interval. Smaller values are raised to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

const EVENT_CAPACITY: usize = 64;

/// Anything that can answer "what is the translation state of this model".
#[async_trait]
pub trait StatusSource: Send + Sync + 'static {
    async fn query_status(&self, id: &ModelIdentifier) -> Result<TranslationState, ClientError>;
}

/// Poller settings.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay between the starts of two consecutive queries.
    pub interval: Duration,
    /// Give up after this many queries without a terminal state.
    pub max_attempts: Option<u32>,
}

impl PollerConfig {
    /// Copy of this config with the interval raised to [`MIN_POLL_INTERVAL`].
    pub fn normalized(&self) -> Self {
        Self {
            interval: self.interval.max(MIN_POLL_INTERVAL),
            max_attempts: self.max_attempts,
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
        }
    }
}

/// Lifecycle phase of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No session, or the session was cancelled.
    #[default]
    Idle,
    /// Queries are being issued.
    Polling,
    /// A terminal state was observed.
    Finished,
    /// The attempt bound was reached without a terminal state.
    TimedOut,
}

/// Publicly observed poller state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSnapshot {
    pub model: Option<ModelIdentifier>,
    pub generation: u64,
    pub phase: SessionPhase,
    /// Most recent state reported for `model`.
    pub state: Option<TranslationState>,
    /// Most recent transient error, cleared by the next successful query.
    pub last_error: Option<String>,
    /// Queries issued in this session.
    pub attempts: u32,
}

impl PollSnapshot {
    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Polling
    }
}

/// Notifications sent to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// A query returned a state.
    Status {
        model: ModelIdentifier,
        generation: u64,
        state: TranslationState,
    },
    /// A query failed; polling continues.
    TransientError {
        model: ModelIdentifier,
        generation: u64,
        message: String,
    },
    /// The attempt bound was reached.
    TimedOut {
        model: ModelIdentifier,
        generation: u64,
        attempts: u32,
    },
}

/// The active session: one model, one generation, one query task.
#[derive(Debug)]
pub struct PollingSession {
    model: ModelIdentifier,
    generation: u64,
    task: JoinHandle<()>,
}

impl PollingSession {
    pub fn model(&self) -> &ModelIdentifier {
        &self.model
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for PollingSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Publication handle given to a session task.
#[derive(Clone)]
struct SessionPublisher {
    model: ModelIdentifier,
    generation: u64,
    snapshot: Arc<watch::Sender<PollSnapshot>>,
    events: broadcast::Sender<PollEvent>,
}

impl SessionPublisher {
    /// Apply `update` if the snapshot still belongs to this session.
    /// Returns `false` when the session is stale.
    fn publish(&self, update: impl FnOnce(&mut PollSnapshot) -> PollEvent) -> bool {
        self.snapshot.send_if_modified(|snap| {
            if snap.generation != self.generation || snap.phase != SessionPhase::Polling {
                return false;
            }
            let event = update(snap);
            // No subscribers is fine.
            let _ = self.events.send(event);
            true
        })
    }

    fn state(&self, state: TranslationState, attempts: u32) -> bool {
        self.publish(|snap| {
            if state.is_terminal() {
                snap.phase = SessionPhase::Finished;
            }
            snap.state = Some(state.clone());
            snap.last_error = None;
            snap.attempts = attempts;
            PollEvent::Status {
                model: self.model.clone(),
                generation: self.generation,
                state,
            }
        })
    }

    fn transient_error(&self, message: String, attempts: u32) -> bool {
        self.publish(|snap| {
            snap.last_error = Some(message.clone());
            snap.attempts = attempts;
            PollEvent::TransientError {
                model: self.model.clone(),
                generation: self.generation,
                message,
            }
        })
    }

    fn timed_out(&self, attempts: u32) -> bool {
        self.publish(|snap| {
            snap.phase = SessionPhase::TimedOut;
            snap.attempts = attempts;
            PollEvent::TimedOut {
                model: self.model.clone(),
                generation: self.generation,
                attempts,
            }
        })
    }
}

/// Owns the polling lifecycle for the selected model.
pub struct StatusPoller {
    source: Arc<dyn StatusSource>,
    config: PollerConfig,
    snapshot: Arc<watch::Sender<PollSnapshot>>,
    events: broadcast::Sender<PollEvent>,
    session: Option<PollingSession>,
    generation: u64,
}

impl StatusPoller {
    pub fn new(source: Arc<dyn StatusSource>, config: PollerConfig) -> Self {
        if config.interval < MIN_POLL_INTERVAL {
            tracing::warn!(
                interval_ms = config.interval.as_millis() as u64,
                min_ms = MIN_POLL_INTERVAL.as_millis() as u64,
                "Poll interval too short, using the minimum"
            );
        }
        let config = config.normalized();
        let (snapshot, _) = watch::channel(PollSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            source,
            config,
            snapshot: Arc::new(snapshot),
            events,
            session: None,
            generation: 0,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Begin polling `id`, cancelling any previous session first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, id: ModelIdentifier) {
        self.stop();

        self.generation += 1;
        let generation = self.generation;
        self.snapshot.send_replace(PollSnapshot {
            model: Some(id.clone()),
            generation,
            phase: SessionPhase::Polling,
            ..PollSnapshot::default()
        });

        let publisher = SessionPublisher {
            model: id.clone(),
            generation,
            snapshot: Arc::clone(&self.snapshot),
            events: self.events.clone(),
        };
        let task = tokio::spawn(run_session(
            Arc::clone(&self.source),
            self.config.clone(),
            publisher,
        ));

        tracing::debug!(model = %id, generation, "Polling session started");
        self.session = Some(PollingSession {
            model: id,
            generation,
            task,
        });
    }

    /// Cancel the current session. Idempotent.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.generation += 1;
        let generation = self.generation;
        self.snapshot.send_replace(PollSnapshot {
            generation,
            ..PollSnapshot::default()
        });
        tracing::debug!(
            model = %session.model,
            generation = session.generation,
            "Polling session stopped"
        );
        drop(session);
    }

    /// The session currently owned by the poller, active or finished.
    pub fn session(&self) -> Option<&PollingSession> {
        self.session.as_ref()
    }

    /// Whether queries are still being issued.
    pub fn is_active(&self) -> bool {
        self.snapshot.borrow().is_active()
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> PollSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that is notified on every published change.
    pub fn watch(&self) -> watch::Receiver<PollSnapshot> {
        self.snapshot.subscribe()
    }

    /// Event stream for status updates and transient errors.
    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.events.subscribe()
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_session(source: Arc<dyn StatusSource>, config: PollerConfig, publisher: SessionPublisher) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempts: u32 = 0;

    loop {
        // First tick completes immediately.
        ticker.tick().await;
        attempts += 1;

        let live = match source.query_status(&publisher.model).await {
            Ok(state) => {
                let terminal = state.is_terminal();
                tracing::debug!(
                    model = %publisher.model,
                    generation = publisher.generation,
                    attempt = attempts,
                    state = %state,
                    "Translation status"
                );
                if !publisher.state(state, attempts) {
                    false
                } else if terminal {
                    tracing::info!(
                        model = %publisher.model,
                        attempts,
                        "Translation reached a terminal state"
                    );
                    return;
                } else {
                    true
                }
            }
            Err(err) => {
                tracing::warn!(
                    model = %publisher.model,
                    generation = publisher.generation,
                    attempt = attempts,
                    error = %err,
                    "Status query failed, will retry"
                );
                publisher.transient_error(err.to_string(), attempts)
            }
        };

        if !live {
            tracing::debug!(
                model = %publisher.model,
                generation = publisher.generation,
                "Discarding result of superseded session"
            );
            return;
        }

        if config.max_attempts.is_some_and(|max| attempts >= max) {
            tracing::warn!(model = %publisher.model, attempts, "Giving up on translation status");
            publisher.timed_out(attempts);
            return;
        }
    }
}
