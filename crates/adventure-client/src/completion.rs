//! End-of-stream detection for free-text progress messages.

/// Substrings that mark the end of a generation stream.
pub const DEFAULT_COMPLETION_MARKERS: [&str; 2] = ["complete", "error"];

/// Case-sensitive substring markers that end a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionMarkers {
    markers: Vec<String>,
}

impl CompletionMarkers {
    pub fn new<I, T>(markers: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(Into::into)
                .filter(|marker: &String| !marker.is_empty())
                .collect(),
        }
    }

    /// Whether `payload` contains any marker anywhere in its text.
    pub fn matches(&self, payload: &str) -> bool {
        self.markers
            .iter()
            .any(|marker| payload.contains(marker.as_str()))
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

impl Default for CompletionMarkers {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLETION_MARKERS)
    }
}
