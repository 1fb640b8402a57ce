//! Streaming connection lifecycle.
//!
//! One manager keeps at most one live channel for a session. Inbound text
//! frames are appended to the sink verbatim; a frame containing a completion
//! marker ends the stream. Errors and unexpected closes reconnect after a
//! fixed delay until the retry budget is spent. A channel that does not open
//! within the establishment timeout fails without touching the budget.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ConnectionConfig;
use crate::error::{ClientError, Result};
use crate::notice;
use crate::session::SessionId;
use crate::sink::OutputSink;
use crate::transport::{ChannelConnector, MessageChannel, channel_url};

/// Why a connection ended in the failed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    TimedOut,
    RetriesExhausted,
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    /// Waiting out the retry delay before attempt `attempt`.
    Reconnecting {
        attempt: u32,
    },
    Failed(FailureKind),
}

impl ConnectionState {
    /// Idle or failed: nothing is running and nothing is scheduled.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Idle | Self::Failed(_))
    }
}

enum StreamEnd {
    Completed,
    Dropped,
    Superseded,
}

enum Reconnect {
    Retry,
    Exhausted,
    Superseded,
}

struct Lifecycle {
    session_id: Option<SessionId>,
    retry_count: u32,
    task: Option<JoinHandle<()>>,
}

struct Shared<C, S> {
    origin: Url,
    connector: C,
    sink: Arc<S>,
    config: ConnectionConfig,
    lifecycle: Mutex<Lifecycle>,
    generation: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
}

/// Connection lifecycle manager for one session at a time.
pub struct ConnectionManager<C, S> {
    shared: Arc<Shared<C, S>>,
}

impl<C, S> Clone for ConnectionManager<C, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C, S> ConnectionManager<C, S>
where
    C: ChannelConnector,
    S: OutputSink + 'static,
{
    /// `origin` is the page origin the channel URL is derived from.
    pub fn new(origin: Url, connector: C, sink: Arc<S>, config: ConnectionConfig) -> Self {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Idle);
        Self {
            shared: Arc::new(Shared {
                origin,
                connector,
                sink,
                config,
                lifecycle: Mutex::new(Lifecycle {
                    session_id: None,
                    retry_count: 0,
                    task: None,
                }),
                generation: AtomicU64::new(0),
                state_tx,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub async fn retry_count(&self) -> u32 {
        self.shared.lifecycle.lock().await.retry_count
    }

    pub async fn session_id(&self) -> Option<SessionId> {
        self.shared.lifecycle.lock().await.session_id.clone()
    }

    /// Wait until the manager is idle or failed.
    pub async fn wait_settled(&self) -> Result<ConnectionState> {
        let mut receiver = self.shared.state_tx.subscribe();
        let state = receiver
            .wait_for(|state| state.is_settled())
            .await
            .map_err(|error| ClientError::Internal(error.to_string()))?;
        Ok(*state)
    }

    /// Open a channel for `session_id`, closing any existing one first.
    ///
    /// A blank id is reported to the sink and re-enables the control without
    /// touching the manager's state.
    pub async fn connect(&self, session_id: &str) -> Result<()> {
        let session_id = match SessionId::parse(session_id) {
            Ok(session_id) => session_id,
            Err(error) => {
                warn!("refusing to connect without a session id");
                self.shared.sink.append(notice::GENERATION_ERROR);
                self.shared.sink.set_control_enabled(true);
                return Err(error);
            }
        };
        let url = channel_url(&self.shared.origin, &session_id)?;

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = {
            let mut lifecycle = self.shared.lifecycle.lock().await;
            if lifecycle.session_id.as_ref() != Some(&session_id) {
                lifecycle.retry_count = 0;
            }
            lifecycle.session_id = Some(session_id.clone());
            lifecycle.task.take()
        };
        close_task(previous).await;

        let mut lifecycle = self.shared.lifecycle.lock().await;
        if !self.shared.is_current(generation) {
            debug!(session = %session_id, "connect superseded by a newer call");
            return Ok(());
        }
        info!(session = %session_id, %url, "connecting to generation stream");
        self.shared.state_tx.send_replace(ConnectionState::Connecting);
        lifecycle.task = Some(tokio::spawn(run_channel(
            Arc::clone(&self.shared),
            url,
            generation,
        )));
        Ok(())
    }

    /// Close the current channel if there is one. Idempotent.
    ///
    /// A channel task that already settled keeps its final state, so a
    /// `Failed` outcome survives a later close.
    pub async fn close_existing(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let Some(previous) = self.shared.lifecycle.lock().await.task.take() else {
            return;
        };
        if previous.is_finished() {
            debug!("channel task already settled");
            return;
        }
        close_task(Some(previous)).await;
        debug!("closed existing channel");
        self.shared.state_tx.send_replace(ConnectionState::Idle);
    }
}

impl<C, S> Shared<C, S>
where
    C: ChannelConnector,
    S: OutputSink + 'static,
{
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, generation: u64, state: ConnectionState) {
        if self.is_current(generation) {
            self.state_tx.send_replace(state);
        }
    }

    async fn on_open(&self, generation: u64) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        if !self.is_current(generation) {
            return false;
        }
        lifecycle.retry_count = 0;
        self.set_state(generation, ConnectionState::Open);
        info!("generation stream connected");
        true
    }

    async fn pump(&self, channel: &mut dyn MessageChannel, generation: u64) -> StreamEnd {
        while let Some(frame) = channel.next_message().await {
            match frame {
                Ok(text) => {
                    if !self.is_current(generation) {
                        return StreamEnd::Superseded;
                    }
                    self.sink.append(&text);
                    if self.config.completion_markers.matches(&text) {
                        info!("completion marker received");
                        self.sink.set_control_enabled(true);
                        return StreamEnd::Completed;
                    }
                }
                Err(error) => {
                    warn!("channel error: {}", error);
                    return StreamEnd::Dropped;
                }
            }
        }
        debug!("channel closed by peer");
        StreamEnd::Dropped
    }

    async fn attempt_reconnection(&self, generation: u64) -> Reconnect {
        let attempt = {
            let lifecycle = self.lifecycle.lock().await;
            if !self.is_current(generation) {
                return Reconnect::Superseded;
            }
            if lifecycle.retry_count >= self.config.max_retries {
                warn!(
                    retries = lifecycle.retry_count,
                    "reconnect budget exhausted, giving up"
                );
                self.sink.append(notice::CONNECTION_FAILED);
                self.sink.set_control_enabled(true);
                self.set_state(
                    generation,
                    ConnectionState::Failed(FailureKind::RetriesExhausted),
                );
                return Reconnect::Exhausted;
            }
            lifecycle.retry_count + 1
        };

        self.set_state(generation, ConnectionState::Reconnecting { attempt });
        sleep(self.config.retry_delay).await;

        let mut lifecycle = self.lifecycle.lock().await;
        if !self.is_current(generation) {
            return Reconnect::Superseded;
        }
        lifecycle.retry_count += 1;
        info!(
            "retry attempt {}/{}",
            lifecycle.retry_count, self.config.max_retries
        );
        self.set_state(generation, ConnectionState::Connecting);
        Reconnect::Retry
    }
}

async fn run_channel<C, S>(shared: Arc<Shared<C, S>>, url: Url, generation: u64)
where
    C: ChannelConnector,
    S: OutputSink + 'static,
{
    loop {
        match timeout(shared.config.connect_timeout, shared.connector.open(&url)).await {
            Err(_elapsed) => {
                if shared.is_current(generation) {
                    warn!(
                        "channel to {} not established within {:?}",
                        url, shared.config.connect_timeout
                    );
                    shared.sink.append(notice::TIMEOUT);
                    shared.sink.set_control_enabled(true);
                    shared.set_state(generation, ConnectionState::Failed(FailureKind::TimedOut));
                }
                return;
            }
            Ok(Err(error)) => warn!("channel open failed for {}: {}", url, error),
            Ok(Ok(mut channel)) => {
                if !shared.on_open(generation).await {
                    return;
                }
                match shared.pump(channel.as_mut(), generation).await {
                    StreamEnd::Completed => {
                        if let Err(error) = channel.close().await {
                            debug!("channel close after completion failed: {}", error);
                        }
                        shared.set_state(generation, ConnectionState::Idle);
                        return;
                    }
                    StreamEnd::Superseded => return,
                    StreamEnd::Dropped => {}
                }
            }
        }

        match shared.attempt_reconnection(generation).await {
            Reconnect::Retry => {}
            Reconnect::Exhausted | Reconnect::Superseded => return,
        }
    }
}

async fn close_task(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        task.abort();
        // Wait for the task to drop its channel before anything new opens.
        let _ = task.await;
    }
}
