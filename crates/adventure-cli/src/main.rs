#![allow(clippy::print_stderr, clippy::exit)]

use adventure_cli::{AdventureCli, run};
use clap::Parser;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run(AdventureCli::parse()).await {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}
