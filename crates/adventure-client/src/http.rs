//! HTTP client for the generate and message-history endpoints.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::cookie::{CookieStore, Jar};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result, format_http_error};
use crate::session::{SESSION_COOKIE, SESSION_HEADER, SessionId, SessionIdSources, cookie_value};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Form fields for `POST /generate`.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    pub setting: Option<String>,
    pub style: Option<String>,
    /// Identifier of the session the caller already holds, sent as `X-Session-Id`.
    pub session_id: Option<SessionId>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    fn form(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![("prompt", self.prompt.trim().to_string())];
        if let Some(setting) = &self.setting {
            form.push(("setting", setting.trim().to_string()));
        }
        if let Some(style) = &self.style {
            form.push(("style", style.trim().to_string()));
        }
        form
    }
}

/// Successful `POST /generate` outcome.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub status: StatusCode,
    /// Raw response body; rendered content for the plain-text variant.
    pub body: String,
    pub sessions: SessionIdSources,
}

#[derive(Debug, Deserialize)]
struct GenerateBody {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Read `sessionId` from a JSON body.
///
/// Bodies that are not a JSON object carry no id. A body that opens an
/// object but does not parse is an error.
pub fn parse_json_session_id(body: &str) -> Result<Option<String>> {
    if !body.trim_start().starts_with('{') {
        return Ok(None);
    }
    let parsed: GenerateBody = serde_json::from_str(body)?;
    Ok(parsed.session_id.filter(|value| !value.trim().is_empty()))
}

/// Client for the adventure generator's HTTP surface.
#[derive(Debug, Clone)]
pub struct AdventureClient {
    base_url: Url,
    timeout: Duration,
    cookies: Arc<Jar>,
    http: reqwest::Client,
}

impl AdventureClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let cookies = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&cookies))
            .build()
            .map_err(|error| ClientError::Internal(format!("http client build failed: {error}")))?;
        Ok(Self {
            base_url: config.base_url.clone(),
            timeout: config.request_timeout,
            cookies,
            http,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for a server path.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(ClientError::InvalidUrl("empty path".to_string()));
        }
        let absolute = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        Ok(self.base_url.join(&absolute)?)
    }

    pub fn message_history_url(&self, session_id: &SessionId) -> Result<Url> {
        let mut url = self.endpoint("/api/messages")?;
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidUrl(self.base_url.to_string()))?
            .push(session_id.as_str());
        Ok(url)
    }

    /// Session id currently held in the cookie jar for this origin.
    pub fn cookie_session_id(&self) -> Option<String> {
        let header = self.cookies.cookies(&self.base_url)?;
        let header = header.to_str().ok()?;
        cookie_value(header, SESSION_COOKIE)
    }

    /// Start a generation task.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let url = self.endpoint("/generate")?;
        info!(prompt_len = request.prompt.len(), "generating adventure");

        let mut builder = self
            .http
            .post(url)
            .header(REQUEST_ID_HEADER, format!("req_{}", Uuid::new_v4().simple()))
            .timeout(self.timeout)
            .form(&request.form());
        if let Some(session_id) = &request.session_id {
            builder = builder.header(SESSION_HEADER, session_id.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|error| ClientError::Request(error.to_string()))?;
        let status = response.status();
        let header_session = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let bytes = response
            .bytes()
            .await
            .map_err(|error| ClientError::Read(error.to_string()))?;
        debug!(%status, body_len = bytes.len(), "generate response received");

        if !status.is_success() {
            warn!(%status, "generate request rejected");
            return Err(format_http_error(status, &bytes));
        }

        let body = String::from_utf8_lossy(&bytes).into_owned();
        let sessions = SessionIdSources {
            json_body: parse_json_session_id(&body)?,
            response_header: header_session,
            cookie: self.cookie_session_id(),
        };
        if sessions.disagree() {
            warn!(?sessions, "generate response carried conflicting session ids");
        }

        Ok(GenerateResponse {
            status,
            body,
            sessions,
        })
    }

    /// Fetch the accumulated output snapshot; an empty body means nothing new yet.
    pub async fn message_history(&self, session_id: &SessionId) -> Result<String> {
        let url = self.message_history_url(session_id)?;
        let response = self
            .http
            .get(url)
            .header(REQUEST_ID_HEADER, format!("req_{}", Uuid::new_v4().simple()))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| ClientError::Request(error.to_string()))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|error| ClientError::Read(error.to_string()))?;
        if !status.is_success() {
            return Err(format_http_error(status, &bytes));
        }
        debug!(session = %session_id, len = bytes.len(), "message history retrieved");
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
