//! Session identifiers and the places a server can hand them out.

use std::fmt;

use crate::error::{ClientError, Result};

/// Cookie the server uses to carry the session identifier.
pub const SESSION_COOKIE: &str = "session_id";
/// Request/response header carrying the session identifier.
pub const SESSION_HEADER: &str = "X-Session-Id";

/// Opaque identifier of one server-side generation task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Parse a raw identifier; blank input is rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ClientError::InvalidSession);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a session identifier was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionIdSource {
    JsonBody,
    ResponseHeader,
    Cookie,
}

impl SessionIdSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JsonBody => "json",
            Self::ResponseHeader => "header",
            Self::Cookie => "cookie",
        }
    }
}

/// Parse a source name as accepted on the command line.
pub fn parse_session_id_source(raw: &str) -> Option<SessionIdSource> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" | "body" | "json_body" => Some(SessionIdSource::JsonBody),
        "header" | "response_header" | "x-session-id" => Some(SessionIdSource::ResponseHeader),
        "cookie" | "session_id" => Some(SessionIdSource::Cookie),
        _ => None,
    }
}

/// Caller-chosen order in which session id carriers are consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPrecedence(Vec<SessionIdSource>);

impl SessionPrecedence {
    pub fn new(order: impl IntoIterator<Item = SessionIdSource>) -> Self {
        let mut sources = Vec::new();
        for source in order {
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        Self(sources)
    }

    /// Parse a comma-separated list such as `json,header,cookie`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut sources = Vec::new();
        for part in raw.split(',').filter(|part| !part.trim().is_empty()) {
            sources.push(parse_session_id_source(part)?);
        }
        if sources.is_empty() {
            return None;
        }
        Some(Self::new(sources))
    }

    pub fn sources(&self) -> &[SessionIdSource] {
        &self.0
    }
}

/// Every session identifier a generate response carried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIdSources {
    pub json_body: Option<String>,
    pub response_header: Option<String>,
    pub cookie: Option<String>,
}

impl SessionIdSources {
    pub fn get(&self, source: SessionIdSource) -> Option<SessionId> {
        let raw = match source {
            SessionIdSource::JsonBody => self.json_body.as_deref(),
            SessionIdSource::ResponseHeader => self.response_header.as_deref(),
            SessionIdSource::Cookie => self.cookie.as_deref(),
        };
        raw.and_then(|value| SessionId::parse(value).ok())
    }

    /// First valid identifier in `precedence` order.
    pub fn resolve(&self, precedence: &SessionPrecedence) -> Option<(SessionIdSource, SessionId)> {
        precedence
            .sources()
            .iter()
            .find_map(|source| self.get(*source).map(|id| (*source, id)))
    }

    /// True when two carriers hold different valid identifiers.
    pub fn disagree(&self) -> bool {
        let mut seen: Option<SessionId> = None;
        for source in [
            SessionIdSource::JsonBody,
            SessionIdSource::ResponseHeader,
            SessionIdSource::Cookie,
        ] {
            if let Some(id) = self.get(source) {
                match &seen {
                    Some(existing) if *existing != id => return true,
                    Some(_) => {}
                    None => seen = Some(id),
                }
            }
        }
        false
    }
}

/// Extract a named cookie value from a `Cookie` header string.
pub fn cookie_value(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
