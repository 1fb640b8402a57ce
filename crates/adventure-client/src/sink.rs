//! Output sink capability the lifecycle managers write into.
//!
//! The managers never read the buffer back; they only push fragments,
//! replace the whole buffer, update the status line and toggle the control
//! that started the generation.

use std::sync::{Mutex, MutexGuard};

/// Status line shown next to the output buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusIndicator {
    Active,
    Paused,
    Complete,
    Error(String),
}

impl StatusIndicator {
    pub fn text(&self) -> &str {
        match self {
            Self::Active => "Generating content...",
            Self::Paused => "Generation paused...",
            Self::Complete => "Generation complete",
            Self::Error(message) => message.as_str(),
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Active => "status-active",
            Self::Paused => "status-paused",
            Self::Complete => "status-complete",
            Self::Error(_) => "error",
        }
    }
}

/// Write-only view of the log/output buffer and its status element.
pub trait OutputSink: Send + Sync {
    /// Append one fragment to the log.
    fn append(&self, fragment: &str);

    /// Replace the whole buffer with `content`.
    fn replace(&self, content: &str);

    /// Empty the buffer.
    fn clear(&self) {
        self.replace("");
    }

    fn set_status(&self, status: StatusIndicator);

    /// Enable or disable the control that triggered the generation.
    fn set_control_enabled(&self, enabled: bool);
}

/// Recorded sink call, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Append(String),
    Replace(String),
    Status(StatusIndicator),
    Control(bool),
}

#[derive(Debug, Default)]
struct MemoryBuffer {
    fragments: Vec<String>,
    status: Option<StatusIndicator>,
    control_enabled: bool,
    events: Vec<SinkEvent>,
}

/// In-memory sink used by headless callers and tests.
#[derive(Debug)]
pub struct MemorySink {
    buffer: Mutex<MemoryBuffer>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(MemoryBuffer {
                control_enabled: true,
                ..MemoryBuffer::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryBuffer> {
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current buffer fragments in order.
    pub fn fragments(&self) -> Vec<String> {
        self.lock().fragments.clone()
    }

    /// Buffer rendered as newline-joined text.
    pub fn contents(&self) -> String {
        self.lock().fragments.join("\n")
    }

    pub fn status(&self) -> Option<StatusIndicator> {
        self.lock().status.clone()
    }

    pub fn control_enabled(&self) -> bool {
        self.lock().control_enabled
    }

    /// Every call made on the sink so far.
    pub fn events(&self) -> Vec<SinkEvent> {
        self.lock().events.clone()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for MemorySink {
    fn append(&self, fragment: &str) {
        let mut buffer = self.lock();
        buffer.fragments.push(fragment.to_string());
        buffer.events.push(SinkEvent::Append(fragment.to_string()));
    }

    fn replace(&self, content: &str) {
        let mut buffer = self.lock();
        buffer.fragments.clear();
        if !content.is_empty() {
            buffer.fragments.push(content.to_string());
        }
        buffer.events.push(SinkEvent::Replace(content.to_string()));
    }

    fn set_status(&self, status: StatusIndicator) {
        let mut buffer = self.lock();
        buffer.status = Some(status.clone());
        buffer.events.push(SinkEvent::Status(status));
    }

    fn set_control_enabled(&self, enabled: bool) {
        let mut buffer = self.lock();
        buffer.control_enabled = enabled;
        buffer.events.push(SinkEvent::Control(enabled));
    }
}
