//! Adventure generator client.
//!
//! Starts generation tasks over HTTP and follows their output either through
//! a streaming channel ([`ConnectionManager`]) or by polling the message
//! history ([`PollingManager`]). Both managers write into an [`OutputSink`].

pub mod completion;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod launch;
pub mod notice;
pub mod polling;
pub mod session;
pub mod sink;
pub mod transport;

pub use completion::{CompletionMarkers, DEFAULT_COMPLETION_MARKERS};
pub use config::{ClientConfig, ConfigError, ConnectionConfig, PollingConfig};
pub use connection::{ConnectionManager, ConnectionState, FailureKind};
pub use error::{ClientError, Result};
pub use http::{AdventureClient, GenerateRequest, GenerateResponse};
pub use launch::GenerationLauncher;
pub use polling::{PollOutcome, PollingManager, PollingPhase, PollingStatus, SnapshotSource};
pub use session::{SessionId, SessionIdSource, SessionIdSources, SessionPrecedence};
pub use sink::{MemorySink, OutputSink, SinkEvent, StatusIndicator};
pub use transport::{ChannelConnector, MessageChannel, WsConnector, channel_url};
