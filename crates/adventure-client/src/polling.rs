//! Snapshot polling lifecycle.
//!
//! Polls the message history on a fixed interval and renders every
//! non-empty snapshot in place of the previous one. Consecutive empty
//! snapshots pause the loop; the next non-empty snapshot (from a manual
//! poll) resumes it. A hard stop ends polling after a fixed window whether
//! or not the loop is paused.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at, sleep};
use tracing::{debug, info, warn};

use crate::config::PollingConfig;
use crate::error::{ClientError, Result};
use crate::http::AdventureClient;
use crate::session::SessionId;
use crate::sink::{OutputSink, StatusIndicator};

/// Source of accumulated output snapshots.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    async fn fetch_snapshot(&self, session_id: &SessionId) -> Result<String>;
}

#[async_trait]
impl SnapshotSource for AdventureClient {
    async fn fetch_snapshot(&self, session_id: &SessionId) -> Result<String> {
        self.message_history(session_id).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingPhase {
    /// Never started.
    Idle,
    Polling,
    Paused,
    Stopped,
}

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Polling is idle or stopped; nothing was fetched.
    Skipped,
    Empty { consecutive: u32 },
    /// The snapshot was empty and reached the pause threshold.
    Paused,
    Rendered,
    /// A non-empty snapshot arrived while paused and polling resumed.
    Resumed,
    /// The fetch failed and polling stopped.
    Failed,
    /// Polling was stopped or restarted while the fetch was in flight.
    Stale,
}

/// Point-in-time view of the polling state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingStatus {
    pub phase: PollingPhase,
    pub is_paused: bool,
    pub empty_response_count: u32,
    pub interval_armed: bool,
    pub hard_stop_armed: bool,
    pub polls: u64,
    pub session_id: Option<SessionId>,
}

struct PollingState {
    phase: PollingPhase,
    session_id: Option<SessionId>,
    interval: Option<JoinHandle<()>>,
    hard_stop: Option<JoinHandle<()>>,
    is_paused: bool,
    empty_response_count: u32,
    epoch: u64,
    polls: u64,
}

struct Shared<F, S> {
    source: F,
    sink: Arc<S>,
    config: PollingConfig,
    state: Mutex<PollingState>,
    phase_tx: watch::Sender<PollingPhase>,
}

/// Polling lifecycle manager.
pub struct PollingManager<F, S> {
    shared: Arc<Shared<F, S>>,
}

impl<F, S> Clone for PollingManager<F, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F, S> PollingManager<F, S>
where
    F: SnapshotSource,
    S: OutputSink + 'static,
{
    pub fn new(source: F, sink: Arc<S>, config: PollingConfig) -> Self {
        let (phase_tx, _phase_rx) = watch::channel(PollingPhase::Idle);
        Self {
            shared: Arc::new(Shared {
                source,
                sink,
                config,
                state: Mutex::new(PollingState {
                    phase: PollingPhase::Idle,
                    session_id: None,
                    interval: None,
                    hard_stop: None,
                    is_paused: false,
                    empty_response_count: 0,
                    epoch: 0,
                    polls: 0,
                }),
                phase_tx,
            }),
        }
    }

    pub async fn set_session(&self, session_id: SessionId) {
        self.shared.state.lock().await.session_id = Some(session_id);
    }

    pub fn phase(&self) -> PollingPhase {
        *self.shared.phase_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollingPhase> {
        self.shared.phase_tx.subscribe()
    }

    pub async fn status(&self) -> PollingStatus {
        let state = self.shared.state.lock().await;
        PollingStatus {
            phase: state.phase,
            is_paused: state.is_paused,
            empty_response_count: state.empty_response_count,
            interval_armed: state.interval.is_some(),
            hard_stop_armed: state.hard_stop.is_some(),
            polls: state.polls,
            session_id: state.session_id.clone(),
        }
    }

    pub async fn wait_stopped(&self) -> Result<()> {
        let mut receiver = self.shared.phase_tx.subscribe();
        receiver
            .wait_for(|phase| *phase == PollingPhase::Stopped)
            .await
            .map_err(|error| ClientError::Internal(error.to_string()))?;
        Ok(())
    }

    /// Poll once immediately, then on every interval tick until paused or
    /// stopped. Re-arms the hard stop for a fresh window.
    pub async fn start_polling(&self) {
        let epoch = {
            let mut state = self.shared.state.lock().await;
            if let Some(interval) = state.interval.take() {
                interval.abort();
            }
            state.epoch += 1;
            state.is_paused = false;
            state.empty_response_count = 0;
            self.set_phase(&mut state, PollingPhase::Polling);
            info!("starting message polling");
            state.epoch
        };

        self.poll().await;

        let mut state = self.shared.state.lock().await;
        if state.epoch != epoch {
            return;
        }
        match state.phase {
            PollingPhase::Polling => {
                state.interval = Some(self.spawn_ticker(false));
            }
            PollingPhase::Paused => {}
            PollingPhase::Idle | PollingPhase::Stopped => return,
        }
        if let Some(hard_stop) = state.hard_stop.take() {
            hard_stop.abort();
        }
        state.hard_stop = Some(self.spawn_hard_stop());
    }

    /// Cancel the interval and the hard stop and reset the pause state.
    pub async fn stop_polling(&self) {
        let mut state = self.shared.state.lock().await;
        self.stop_locked(&mut state);
    }

    /// Fetch one snapshot and apply it. Safe to call while paused; this is
    /// how a paused loop is resumed.
    pub async fn poll(&self) -> PollOutcome {
        let (epoch, session_id, polls) = {
            let mut state = self.shared.state.lock().await;
            if !matches!(state.phase, PollingPhase::Polling | PollingPhase::Paused) {
                return PollOutcome::Skipped;
            }
            state.polls += 1;
            (state.epoch, state.session_id.clone(), state.polls)
        };

        let Some(session_id) = session_id else {
            warn!("polling without a session id, stopping");
            self.stop_polling().await;
            return PollOutcome::Failed;
        };

        debug!(polls, session = %session_id, "polling for updates");
        let fetched = self.shared.source.fetch_snapshot(&session_id).await;

        let mut state = self.shared.state.lock().await;
        if state.epoch != epoch {
            debug!("discarding snapshot from a previous polling run");
            return PollOutcome::Stale;
        }
        match fetched {
            Err(error) => {
                warn!("polling failed: {}", error);
                self.stop_locked(&mut state);
                PollOutcome::Failed
            }
            Ok(snapshot) if snapshot.is_empty() => {
                state.empty_response_count += 1;
                let consecutive = state.empty_response_count;
                debug!(consecutive, "empty snapshot");
                if self.shared.config.pause_on_empty
                    && consecutive >= self.shared.config.max_empty_responses
                {
                    self.pause_locked(&mut state);
                    PollOutcome::Paused
                } else {
                    PollOutcome::Empty { consecutive }
                }
            }
            Ok(snapshot) => {
                state.empty_response_count = 0;
                let resumed = state.is_paused;
                if resumed {
                    self.resume_locked(&mut state);
                }
                self.shared.sink.replace(&snapshot);
                if resumed {
                    PollOutcome::Resumed
                } else {
                    PollOutcome::Rendered
                }
            }
        }
    }

    fn set_phase(&self, state: &mut PollingState, phase: PollingPhase) {
        state.phase = phase;
        self.shared.phase_tx.send_replace(phase);
    }

    fn pause_locked(&self, state: &mut PollingState) {
        if state.is_paused {
            return;
        }
        info!(
            empty = state.empty_response_count,
            "pausing polling due to empty responses"
        );
        state.is_paused = true;
        if let Some(interval) = state.interval.take() {
            interval.abort();
        }
        self.set_phase(state, PollingPhase::Paused);
        self.shared.sink.set_status(StatusIndicator::Paused);
    }

    fn resume_locked(&self, state: &mut PollingState) {
        if !state.is_paused {
            return;
        }
        info!("resuming polling");
        state.is_paused = false;
        state.empty_response_count = 0;
        self.set_phase(state, PollingPhase::Polling);
        if let Some(interval) = state.interval.take() {
            interval.abort();
        }
        state.interval = Some(self.spawn_ticker(true));
        if let Some(hard_stop) = state.hard_stop.take() {
            hard_stop.abort();
        }
        state.hard_stop = Some(self.spawn_hard_stop());
        self.shared.sink.set_status(StatusIndicator::Active);
    }

    fn stop_locked(&self, state: &mut PollingState) {
        info!("stopping message polling");
        if let Some(interval) = state.interval.take() {
            interval.abort();
        }
        if let Some(hard_stop) = state.hard_stop.take() {
            hard_stop.abort();
        }
        state.is_paused = false;
        state.empty_response_count = 0;
        state.epoch += 1;
        self.set_phase(state, PollingPhase::Stopped);
        self.shared.sink.set_status(StatusIndicator::Complete);
    }

    fn spawn_ticker(&self, immediate: bool) -> JoinHandle<()> {
        let manager = self.clone();
        let period = self.shared.config.interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let first = if immediate {
                Instant::now()
            } else {
                Instant::now() + period
            };
            let mut ticker = interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.poll().await;
            }
        })
    }

    fn spawn_hard_stop(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let window = self.shared.config.hard_stop;
        tokio::spawn(async move {
            sleep(window).await;
            info!("polling window of {:?} elapsed", window);
            manager.stop_polling().await;
        })
    }
}
