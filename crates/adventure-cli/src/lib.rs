#![allow(clippy::print_stdout)]

use std::sync::Arc;

use adventure_client::config::{ENV_BASE_URL, normalize_base_url};
use adventure_client::{
    AdventureClient, ClientConfig, ConnectionManager, ConnectionState, FailureKind,
    GenerateRequest, GenerationLauncher, PollingManager, SessionId, SessionPrecedence, WsConnector,
};
use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;

mod terminal;

pub use terminal::TerminalSink;

#[derive(Parser)]
#[command(name = "adventure")]
#[command(about = "Generate adventures and follow their progress")]
pub struct AdventureCli {
    /// Generator origin
    #[arg(long, global = true, env = ENV_BASE_URL)]
    pub base_url: Option<String>,
    /// Order in which session id carriers are consulted (json, header, cookie)
    #[arg(long, global = true, default_value = "json,header,cookie")]
    pub session_source: String,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a generation and follow its stream
    Stream(PromptArgs),
    /// Start a generation and poll its message history
    Poll(PromptArgs),
    /// Follow an existing session's stream, or poll it with --poll
    Watch(WatchArgs),
    /// Print a session's message history once
    History(SessionArgs),
}

#[derive(Args)]
pub struct PromptArgs {
    pub prompt: String,
    #[arg(long)]
    pub setting: Option<String>,
    #[arg(long)]
    pub style: Option<String>,
    /// Existing session the server should continue
    #[arg(long)]
    pub session: Option<String>,
}

impl PromptArgs {
    fn request(&self) -> Result<GenerateRequest> {
        let mut request = GenerateRequest::new(self.prompt.clone());
        request.setting = self.setting.clone();
        request.style = self.style.clone();
        request.session_id = self
            .session
            .as_deref()
            .map(SessionId::parse)
            .transpose()
            .context("--session cannot be blank")?;
        Ok(request)
    }
}

#[derive(Args)]
pub struct SessionArgs {
    pub session_id: String,
}

#[derive(Args)]
pub struct WatchArgs {
    pub session_id: String,
    /// Poll the message history instead of opening the stream
    #[arg(long)]
    pub poll: bool,
}

type Launcher = GenerationLauncher<TerminalSink>;

pub async fn run(cli: AdventureCli) -> Result<()> {
    let mut config = ClientConfig::from_env().context("invalid client configuration")?;
    if let Some(base_url) = &cli.base_url {
        config.base_url = normalize_base_url(base_url)?;
    }
    let precedence = SessionPrecedence::parse(&cli.session_source)
        .ok_or_else(|| anyhow!("invalid --session-source: {}", cli.session_source))?;
    let client = AdventureClient::new(&config)?;
    let launcher = GenerationLauncher::new(client, Arc::new(TerminalSink::new()), precedence);

    match cli.command {
        Commands::Stream(args) => run_stream(&launcher, &config, &args).await,
        Commands::Poll(args) => run_poll(&launcher, &config, &args).await,
        Commands::Watch(args) => run_watch(&launcher, &config, &args).await,
        Commands::History(args) => run_history(&launcher, &args).await,
    }
}

async fn run_stream(launcher: &Launcher, config: &ClientConfig, args: &PromptArgs) -> Result<()> {
    let manager = launcher.connection_manager(WsConnector, config.connection.clone());
    let session = launcher.start_streaming(&args.request()?, &manager).await?;
    info!(session = %session, "following generation stream");
    follow_stream(&manager).await
}

async fn run_poll(launcher: &Launcher, config: &ClientConfig, args: &PromptArgs) -> Result<()> {
    let polling = launcher.polling_manager(config.polling.clone());
    let session = launcher.start_polling(&args.request()?, &polling).await?;
    info!(session = %session, "polling message history");
    follow_polling(&polling).await
}

async fn run_watch(launcher: &Launcher, config: &ClientConfig, args: &WatchArgs) -> Result<()> {
    if args.poll {
        let session = SessionId::parse(&args.session_id).context("session id cannot be blank")?;
        let polling = launcher.polling_manager(config.polling.clone());
        polling.set_session(session).await;
        polling.start_polling().await;
        return follow_polling(&polling).await;
    }
    let manager = launcher.connection_manager(WsConnector, config.connection.clone());
    manager.connect(&args.session_id).await?;
    follow_stream(&manager).await
}

async fn run_history(launcher: &Launcher, args: &SessionArgs) -> Result<()> {
    let session = SessionId::parse(&args.session_id).context("session id cannot be blank")?;
    let snapshot = launcher.client().message_history(&session).await?;
    if snapshot.is_empty() {
        println!("(no messages yet)");
    } else {
        println!("{snapshot}");
    }
    Ok(())
}

async fn follow_polling(polling: &PollingManager<AdventureClient, TerminalSink>) -> Result<()> {
    tokio::select! {
        stopped = polling.wait_stopped() => stopped?,
        _ = tokio::signal::ctrl_c() => polling.stop_polling().await,
    }
    Ok(())
}

async fn follow_stream(manager: &ConnectionManager<WsConnector, TerminalSink>) -> Result<()> {
    let settled = tokio::select! {
        settled = manager.wait_settled() => settled?,
        _ = tokio::signal::ctrl_c() => {
            manager.close_existing().await;
            return Ok(());
        }
    };
    match settled {
        ConnectionState::Failed(FailureKind::TimedOut) => {
            bail!("generation stream did not open in time")
        }
        ConnectionState::Failed(FailureKind::RetriesExhausted) => {
            bail!("generation stream connection failed")
        }
        _ => Ok(()),
    }
}
