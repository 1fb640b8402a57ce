//! Submit flows: start a generation and hand the session to a lifecycle
//! manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::config::{ConnectionConfig, PollingConfig};
use crate::connection::ConnectionManager;
use crate::error::{ClientError, Result};
use crate::http::{AdventureClient, GenerateRequest, GenerateResponse};
use crate::notice;
use crate::polling::{PollingManager, SnapshotSource};
use crate::session::{SessionId, SessionPrecedence};
use crate::sink::{OutputSink, StatusIndicator};
use crate::transport::ChannelConnector;

/// Starts generations and wires their sessions to the output sink.
pub struct GenerationLauncher<S> {
    client: AdventureClient,
    sink: Arc<S>,
    precedence: SessionPrecedence,
    in_flight: AtomicBool,
}

/// Clears the launcher's in-flight flag when a submit returns.
struct SubmitGuard<'a>(&'a AtomicBool);

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S> GenerationLauncher<S>
where
    S: OutputSink + 'static,
{
    pub fn new(client: AdventureClient, sink: Arc<S>, precedence: SessionPrecedence) -> Self {
        Self {
            client,
            sink,
            precedence,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn client(&self) -> &AdventureClient {
        &self.client
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    /// Connection manager sharing this launcher's sink and origin.
    pub fn connection_manager<C>(&self, connector: C, config: ConnectionConfig) -> ConnectionManager<C, S>
    where
        C: ChannelConnector,
    {
        ConnectionManager::new(
            self.client.base_url().clone(),
            connector,
            Arc::clone(&self.sink),
            config,
        )
    }

    /// Polling manager fetching snapshots through this launcher's client.
    pub fn polling_manager(&self, config: PollingConfig) -> PollingManager<AdventureClient, S> {
        PollingManager::new(self.client.clone(), Arc::clone(&self.sink), config)
    }

    /// Streaming flow: disable the control, clear the log, request a
    /// generation and connect the channel for the returned session.
    pub async fn start_streaming<C>(
        &self,
        request: &GenerateRequest,
        manager: &ConnectionManager<C, S>,
    ) -> Result<SessionId>
    where
        C: ChannelConnector,
    {
        let _guard = self.begin_submit()?;
        self.require_prompt(request)?;
        self.sink.set_control_enabled(false);
        self.sink.clear();
        self.sink.append(notice::START);

        let session_id = match self.request_session(request).await {
            Ok((session_id, _response)) => session_id,
            Err(error) => {
                warn!("generation request failed: {}", error);
                self.sink.append(notice::GENERATION_ERROR);
                self.sink.set_control_enabled(true);
                return Err(error);
            }
        };
        manager.connect(session_id.as_str()).await?;
        Ok(session_id)
    }

    /// Polling flow: stop any running loop, request a generation, render the
    /// immediate response and start polling the returned session.
    pub async fn start_polling<F>(
        &self,
        request: &GenerateRequest,
        manager: &PollingManager<F, S>,
    ) -> Result<SessionId>
    where
        F: SnapshotSource,
    {
        let _guard = self.begin_submit()?;
        self.require_prompt(request)?;
        self.sink.set_control_enabled(false);
        manager.stop_polling().await;

        let outcome = match self.request_session(request).await {
            Ok((session_id, response)) => {
                // A JSON body only carries the session id; anything else is content.
                if response.sessions.json_body.is_none() {
                    self.sink.replace(&response.body);
                }
                manager.set_session(session_id.clone()).await;
                manager.start_polling().await;
                Ok(session_id)
            }
            Err(error) => {
                warn!("generation request failed: {}", error);
                self.sink.set_status(StatusIndicator::Error(format!(
                    "{}: {error}",
                    notice::GENERATION_ERROR
                )));
                Err(error)
            }
        };
        self.sink.set_control_enabled(true);
        outcome
    }

    /// Only one submit runs at a time; overlapping calls are rejected
    /// before they touch the sink or the server.
    fn begin_submit(&self) -> Result<SubmitGuard<'_>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("generation already in flight, ignoring submit");
            return Err(ClientError::GenerationInFlight);
        }
        Ok(SubmitGuard(&self.in_flight))
    }

    fn require_prompt(&self, request: &GenerateRequest) -> Result<()> {
        if request.prompt.trim().is_empty() {
            warn!("empty prompt submitted");
            self.sink
                .set_status(StatusIndicator::Error(notice::PROMPT_REQUIRED.to_string()));
            return Err(ClientError::EmptyPrompt);
        }
        Ok(())
    }

    async fn request_session(
        &self,
        request: &GenerateRequest,
    ) -> Result<(SessionId, GenerateResponse)> {
        let response = self.client.generate(request).await?;
        let (source, session_id) = response
            .sessions
            .resolve(&self.precedence)
            .ok_or(ClientError::MissingSessionId)?;
        info!(session = %session_id, source = source.as_str(), "generation session started");
        Ok((session_id, response))
    }
}
