use std::sync::{Mutex, MutexGuard};

use adventure_client::{OutputSink, StatusIndicator};
use tracing::{debug, info, warn};

/// Sink that writes the output log to stdout.
///
/// Snapshots that extend the previous one only print the new tail.
#[derive(Debug, Default)]
pub struct TerminalSink {
    last_snapshot: Mutex<String>,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn last_snapshot(&self) -> MutexGuard<'_, String> {
        self.last_snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Portion of `content` not already shown as `previous`.
fn unseen_tail<'a>(previous: &str, content: &'a str) -> &'a str {
    if previous.is_empty() {
        return content;
    }
    content.strip_prefix(previous).unwrap_or(content)
}

impl OutputSink for TerminalSink {
    fn append(&self, fragment: &str) {
        println!("{fragment}");
    }

    fn replace(&self, content: &str) {
        let mut last = self.last_snapshot();
        let tail = unseen_tail(&last, content).trim();
        if !tail.is_empty() {
            println!("{tail}");
        }
        *last = content.to_string();
    }

    fn set_status(&self, status: StatusIndicator) {
        match &status {
            StatusIndicator::Error(message) => warn!("{}", message),
            other => info!(status = other.class_name(), "{}", other.text()),
        }
    }

    fn set_control_enabled(&self, enabled: bool) {
        debug!(enabled, "submit control toggled");
    }
}
