use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use adventure_client::{
    ChannelConnector, ClientError, ConnectionConfig, ConnectionManager, ConnectionState,
    FailureKind, MemorySink, MessageChannel, SinkEvent, notice,
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::time::{Instant, sleep};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Attempt(usize),
    Open(usize, String),
    Close(usize),
    Dropped(usize),
}

enum Step {
    /// The open attempt errors.
    Fail,
    /// The open attempt never resolves.
    Hang,
    /// Deliver the frames, then report a peer close.
    Open(Vec<&'static str>),
    /// Deliver the frames, then stay open.
    OpenIdle(Vec<&'static str>),
    /// Deliver the frames, then fail with a read error.
    OpenThenError(Vec<&'static str>),
}

#[derive(Clone, Copy)]
enum Ending {
    PeerClose,
    StayOpen,
    ReadError,
}

#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    fn push(&self, event: Event) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    fn all(&self) -> Vec<Event> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Channel events without the bare open attempts.
    fn events(&self) -> Vec<Event> {
        self.all()
            .into_iter()
            .filter(|event| !matches!(event, Event::Attempt(_)))
            .collect()
    }

    fn attempts(&self) -> usize {
        self.all()
            .iter()
            .filter(|event| matches!(event, Event::Attempt(_)))
            .count()
    }

    fn opens(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Open(..)))
            .count()
    }
}

struct ScriptedConnector {
    steps: Mutex<VecDeque<Step>>,
    attempts: Mutex<usize>,
    log: EventLog,
}

impl ScriptedConnector {
    fn new(steps: Vec<Step>, log: EventLog) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            attempts: Mutex::new(0),
            log,
        }
    }
}

#[async_trait]
impl ChannelConnector for ScriptedConnector {
    async fn open(&self, url: &Url) -> adventure_client::Result<Box<dyn MessageChannel>> {
        let attempt = {
            let mut attempts = self
                .attempts
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *attempts += 1;
            *attempts - 1
        };
        self.log.push(Event::Attempt(attempt));
        let step = self
            .steps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or(Step::Fail);
        match step {
            Step::Fail => Err(ClientError::WebSocket("connection refused".to_string())),
            Step::Hang => {
                std::future::pending::<()>().await;
                Err(ClientError::Internal("unreachable".to_string()))
            }
            Step::Open(frames) => {
                self.log.push(Event::Open(attempt, url.to_string()));
                Ok(Box::new(ScriptedChannel::new(
                    attempt,
                    frames,
                    Ending::PeerClose,
                    self.log.clone(),
                )))
            }
            Step::OpenIdle(frames) => {
                self.log.push(Event::Open(attempt, url.to_string()));
                Ok(Box::new(ScriptedChannel::new(
                    attempt,
                    frames,
                    Ending::StayOpen,
                    self.log.clone(),
                )))
            }
            Step::OpenThenError(frames) => {
                self.log.push(Event::Open(attempt, url.to_string()));
                Ok(Box::new(ScriptedChannel::new(
                    attempt,
                    frames,
                    Ending::ReadError,
                    self.log.clone(),
                )))
            }
        }
    }
}

struct ScriptedChannel {
    id: usize,
    frames: VecDeque<&'static str>,
    ending: Ending,
    log: EventLog,
}

impl ScriptedChannel {
    fn new(id: usize, frames: Vec<&'static str>, ending: Ending, log: EventLog) -> Self {
        Self {
            id,
            frames: frames.into(),
            ending,
            log,
        }
    }
}

#[async_trait]
impl MessageChannel for ScriptedChannel {
    async fn next_message(&mut self) -> Option<adventure_client::Result<String>> {
        if let Some(frame) = self.frames.pop_front() {
            return Some(Ok(frame.to_string()));
        }
        match self.ending {
            Ending::PeerClose => None,
            Ending::StayOpen => std::future::pending().await,
            Ending::ReadError => {
                // Report the failure once; a broken channel then reads as closed.
                self.ending = Ending::PeerClose;
                Some(Err(ClientError::WebSocket("connection reset".to_string())))
            }
        }
    }

    async fn close(&mut self) -> adventure_client::Result<()> {
        self.log.push(Event::Close(self.id));
        Ok(())
    }
}

impl Drop for ScriptedChannel {
    fn drop(&mut self) {
        self.log.push(Event::Dropped(self.id));
    }
}

type Manager = ConnectionManager<ScriptedConnector, MemorySink>;

fn manager(steps: Vec<Step>) -> Result<(Manager, Arc<MemorySink>, EventLog)> {
    let log = EventLog::default();
    let sink = Arc::new(MemorySink::new());
    let origin = Url::parse("http://127.0.0.1:8080/")?;
    let manager = ConnectionManager::new(
        origin,
        ScriptedConnector::new(steps, log.clone()),
        Arc::clone(&sink),
        ConnectionConfig::default(),
    );
    Ok((manager, sink, log))
}

async fn wait_for_state(manager: &Manager, wanted: ConnectionState) -> Result<()> {
    let mut receiver = manager.subscribe();
    receiver
        .wait_for(|state| *state == wanted)
        .await
        .map_err(|error| anyhow!("state channel closed: {error}"))?;
    Ok(())
}

fn count(sink: &MemorySink, fragment: &str) -> usize {
    sink.fragments()
        .iter()
        .filter(|existing| existing.as_str() == fragment)
        .count()
}

#[tokio::test(start_paused = true)]
async fn completion_marker_ends_stream_and_closes_channel() -> Result<()> {
    let (manager, sink, log) = manager(vec![Step::OpenIdle(vec![
        "Generating scene 1...",
        "Adventure complete!",
    ])])?;

    manager.connect("abc123").await?;
    assert_eq!(manager.wait_settled().await?, ConnectionState::Idle);

    assert_eq!(
        sink.fragments(),
        vec![
            "Generating scene 1...".to_string(),
            "Adventure complete!".to_string()
        ]
    );
    assert!(sink.control_enabled());
    assert_eq!(
        log.events(),
        vec![
            Event::Open(0, "ws://127.0.0.1:8080/ws/abc123".to_string()),
            Event::Close(0),
            Event::Dropped(0),
        ]
    );

    sleep(Duration::from_secs(30)).await;
    assert_eq!(log.attempts(), 1, "a completed stream never reconnects");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn progress_without_marker_keeps_stream_open() -> Result<()> {
    let (manager, sink, log) = manager(vec![Step::OpenIdle(vec!["still working"])])?;

    manager.connect("abc123").await?;
    wait_for_state(&manager, ConnectionState::Open).await?;
    sleep(Duration::from_secs(60)).await;

    assert_eq!(manager.state(), ConnectionState::Open);
    assert_eq!(sink.fragments(), vec!["still working".to_string()]);
    assert!(!log.events().contains(&Event::Close(0)));

    manager.close_existing().await;
    assert_eq!(manager.state(), ConnectionState::Idle);
    assert_eq!(log.events().last(), Some(&Event::Dropped(0)));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn error_marker_also_completes() -> Result<()> {
    let (manager, sink, _log) = manager(vec![Step::OpenIdle(vec!["fatal error occurred"])])?;

    manager.connect("abc123").await?;
    assert_eq!(manager.wait_settled().await?, ConnectionState::Idle);
    assert_eq!(sink.fragments(), vec!["fatal error occurred".to_string()]);
    assert!(sink.control_enabled());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn retries_are_bounded_and_reported_once() -> Result<()> {
    let (manager, sink, log) = manager(Vec::new())?;
    let started = Instant::now();

    manager.connect("abc123").await?;
    assert_eq!(
        manager.wait_settled().await?,
        ConnectionState::Failed(FailureKind::RetriesExhausted)
    );

    // One initial attempt plus five retries, one second apart.
    assert_eq!(log.attempts(), 6);
    assert_eq!(log.opens(), 0);
    assert_eq!(manager.retry_count().await, 5);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(6), "{elapsed:?}");

    assert_eq!(count(&sink, notice::CONNECTION_FAILED), 1);
    assert!(sink.control_enabled());

    sleep(Duration::from_secs(30)).await;
    assert_eq!(log.attempts(), 6, "no seventh attempt");
    assert_eq!(
        manager.state(),
        ConnectionState::Failed(FailureKind::RetriesExhausted)
    );
    assert_eq!(count(&sink, notice::CONNECTION_FAILED), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn establishment_timeout_fails_without_retrying() -> Result<()> {
    let (manager, sink, log) = manager(vec![Step::Hang, Step::OpenIdle(vec!["never"])])?;
    let started = Instant::now();

    manager.connect("abc123").await?;
    assert_eq!(
        manager.wait_settled().await?,
        ConnectionState::Failed(FailureKind::TimedOut)
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(11), "{elapsed:?}");

    assert_eq!(sink.fragments(), vec![notice::TIMEOUT.to_string()]);
    assert!(sink.control_enabled());

    sleep(Duration::from_secs(30)).await;
    assert_eq!(log.attempts(), 1, "a timed out connection is not retried");
    assert_eq!(log.opens(), 0);
    assert_eq!(count(&sink, notice::CONNECTION_FAILED), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reconnect_closes_previous_channel_first() -> Result<()> {
    let (manager, sink, log) = manager(vec![
        Step::OpenIdle(vec!["Generating scene 1..."]),
        Step::OpenIdle(vec!["Adventure complete!"]),
    ])?;

    manager.connect("first").await?;
    wait_for_state(&manager, ConnectionState::Open).await?;

    manager.connect("second").await?;
    assert_eq!(manager.wait_settled().await?, ConnectionState::Idle);

    let events = log.events();
    let first_dropped = events
        .iter()
        .position(|event| *event == Event::Dropped(0))
        .ok_or_else(|| anyhow!("first channel was never dropped: {events:?}"))?;
    let second_opened = events
        .iter()
        .position(|event| matches!(event, Event::Open(1, _)))
        .ok_or_else(|| anyhow!("second channel never opened: {events:?}"))?;
    assert!(first_dropped < second_opened, "{events:?}");
    assert_eq!(
        events[second_opened],
        Event::Open(1, "ws://127.0.0.1:8080/ws/second".to_string())
    );
    assert_eq!(
        sink.fragments(),
        vec![
            "Generating scene 1...".to_string(),
            "Adventure complete!".to_string()
        ]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn blank_session_is_reported_without_connecting() -> Result<()> {
    let (manager, sink, log) = manager(vec![Step::OpenIdle(vec!["never"])])?;

    let result = manager.connect("   ").await;
    assert!(matches!(result, Err(ClientError::InvalidSession)));
    assert_eq!(manager.state(), ConnectionState::Idle);
    assert_eq!(
        sink.events(),
        vec![
            SinkEvent::Append(notice::GENERATION_ERROR.to_string()),
            SinkEvent::Control(true),
        ]
    );

    sleep(Duration::from_secs(5)).await;
    assert_eq!(log.attempts(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn successful_open_resets_retry_budget() -> Result<()> {
    let (manager, sink, log) = manager(vec![
        Step::Fail,
        Step::Fail,
        Step::Open(Vec::new()),
        Step::Fail,
        Step::Fail,
        Step::Fail,
        Step::Fail,
        Step::OpenIdle(vec!["Adventure complete!"]),
    ])?;

    manager.connect("abc123").await?;
    assert_eq!(manager.wait_settled().await?, ConnectionState::Idle);

    assert_eq!(log.attempts(), 8);
    assert_eq!(log.opens(), 2);
    assert_eq!(
        log.events()
            .iter()
            .filter_map(|event| match event {
                Event::Open(attempt, _) => Some(*attempt),
                _ => None,
            })
            .collect::<Vec<_>>(),
        vec![2, 7]
    );
    assert_eq!(count(&sink, notice::CONNECTION_FAILED), 0);
    assert_eq!(sink.fragments(), vec!["Adventure complete!".to_string()]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn close_existing_is_idempotent() -> Result<()> {
    let (manager, _sink, log) = manager(vec![Step::OpenIdle(Vec::new())])?;

    manager.close_existing().await;
    assert_eq!(manager.state(), ConnectionState::Idle);

    manager.connect("abc123").await?;
    wait_for_state(&manager, ConnectionState::Open).await?;
    manager.close_existing().await;
    manager.close_existing().await;

    assert_eq!(
        log.events(),
        vec![
            Event::Open(0, "ws://127.0.0.1:8080/ws/abc123".to_string()),
            Event::Dropped(0),
        ]
    );
    sleep(Duration::from_secs(30)).await;
    assert_eq!(log.attempts(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn read_error_mid_stream_reconnects_after_delay() -> Result<()> {
    let (manager, sink, log) = manager(vec![
        Step::OpenThenError(vec!["Generating scene 1..."]),
        Step::OpenIdle(vec!["Adventure complete!"]),
    ])?;
    let started = Instant::now();

    manager.connect("abc123").await?;
    assert_eq!(manager.wait_settled().await?, ConnectionState::Idle);

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    assert_eq!(
        sink.fragments(),
        vec![
            "Generating scene 1...".to_string(),
            "Adventure complete!".to_string()
        ]
    );
    assert_eq!(log.attempts(), 2);
    assert_eq!(log.opens(), 2);
    assert_eq!(log.events()[1], Event::Dropped(0));
    assert_eq!(count(&sink, notice::CONNECTION_FAILED), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn close_after_failure_keeps_failed_state() -> Result<()> {
    let (manager, sink, log) = manager(Vec::new())?;

    manager.connect("abc123").await?;
    assert_eq!(
        manager.wait_settled().await?,
        ConnectionState::Failed(FailureKind::RetriesExhausted)
    );
    sleep(Duration::from_secs(1)).await;

    manager.close_existing().await;
    assert_eq!(
        manager.state(),
        ConnectionState::Failed(FailureKind::RetriesExhausted)
    );
    assert_eq!(count(&sink, notice::CONNECTION_FAILED), 1);
    assert_eq!(log.attempts(), 6);

    // A fresh connect still replaces the failed state.
    manager.connect("abc123").await?;
    assert!(!matches!(manager.state(), ConnectionState::Failed(_)));
    Ok(())
}
