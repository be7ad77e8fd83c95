use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use tracing::{info, warn};

use waav_realtime::{
    ClientConfig, RealtimeSession,
    core::realtime::openai::{ContentPart, ItemRole},
};

/// WaaV Realtime - send one message to a realtime model and print the reply
#[derive(Parser, Debug)]
#[command(name = "waav-realtime")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Seconds to wait for the assistant reply
    #[arg(short = 't', long = "timeout", default_value_t = 60)]
    timeout: u64,

    /// Message sent as user input text
    message: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        ClientConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ClientConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let session = RealtimeSession::with_config(Arc::new(config.transport()), config.session);

    info!("Connecting to {} ({})", config.url, config.model);
    session.connect().await?;
    session.wait_for_session_created().await?;

    session.send_user_message_content(vec![ContentPart::input_text(cli.message)])?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(cli.timeout);
    let reply = loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break None;
        }
        match session.wait_for_next_completed_item(Some(remaining)).await {
            Some(item) if item.role == Some(ItemRole::Assistant) => break Some(item),
            Some(_) => continue,
            None => break None,
        }
    };

    let result = match reply {
        Some(item) => {
            let text = if item.formatted.text.is_empty() {
                item.formatted.transcript.trim()
            } else {
                item.formatted.text.trim()
            };
            println!("{text}");
            Ok(())
        }
        None => {
            warn!("No assistant reply within {} seconds", cli.timeout);
            Err(anyhow!("Timed out waiting for the assistant reply"))
        }
    };

    session.disconnect();
    result
}
