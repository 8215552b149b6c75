use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::io::AsyncRead;
use tracing::{error, info, warn};

use asr_stream::{
    CredentialProvider, RecognitionSession, SessionSinks,
    config::ClientConfig,
    core::stt::ReaderAudioSource,
    utils::pretty_print,
};

/// Streaming speech recognition client
#[derive(Parser, Debug)]
#[command(name = "asr-stream")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream raw PCM audio and print transcripts
    Stream {
        /// Raw PCM file, or `-` for stdin
        #[arg(short = 'i', long = "input", value_name = "FILE")]
        input: String,

        /// Send audio no faster than real time
        #[arg(long)]
        realtime: bool,

        /// Print transcripts as received, without formatting
        #[arg(long)]
        raw: bool,
    },

    /// Request a token with the configured credentials
    Token,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    // Must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => {
            info!("Loading configuration from {}", path.display());
            ClientConfig::from_file(path).map_err(|e| anyhow!(e.to_string()))?
        }
        None => ClientConfig::from_env().map_err(|e| anyhow!(e.to_string()))?,
    };

    match cli.command {
        Commands::Stream {
            input,
            realtime,
            raw,
        } => stream(config, &input, realtime, raw).await,
        Commands::Token => {
            let provider = CredentialProvider::new(config.build_credentials()?);
            let authorization = provider.request_token().await?;
            println!("Obtained {} authorization", authorization.kind());
            Ok(())
        }
    }
}

async fn stream(config: ClientConfig, input: &str, realtime: bool, raw: bool) -> anyhow::Result<()> {
    let credentials = CredentialProvider::new(config.build_credentials()?);
    let failed = Arc::new(AtomicBool::new(false));

    let sinks = {
        let failed = failed.clone();
        SessionSinks::new(Arc::new(move |result| {
            let failed = failed.clone();
            Box::pin(async move {
                match result {
                    Ok(frame) => {
                        let status = frame.status();
                        if !status.is_success() {
                            warn!(%status, "Recognizer reported a non-success status");
                            return;
                        }
                        let Some(transcript) = frame.transcript() else {
                            return;
                        };
                        let text = if raw {
                            transcript.to_string()
                        } else {
                            pretty_print(transcript)
                        };
                        if frame.is_final() {
                            println!("{text}");
                        } else {
                            eprintln!("... {text}");
                        }
                    }
                    Err(e) => {
                        error!("{}", e);
                        if e.is_terminal() {
                            failed.store(true, Ordering::SeqCst);
                        }
                    }
                }
            })
        }))
    };

    let reader: Box<dyn AsyncRead + Unpin + Send> = if input == "-" {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(
            tokio::fs::File::open(input)
                .await
                .map_err(|e| anyhow!("Failed to open {}: {}", input, e))?,
        )
    };
    let mut source = ReaderAudioSource::for_config(reader, &config.session);
    if realtime {
        source = source.realtime(&config.session);
    }

    let session = RecognitionSession::new(config.session.clone(), credentials, sinks);
    info!(session_id = %session.id(), "Starting recognition");
    session.recognize();

    let capture = session.start_capture(source);
    tokio::select! {
        pumped = capture => {
            let pumped = pumped?;
            info!(bytes = pumped, "Audio input finished");
            session.end_transmission().await;
            tokio::select! {
                _ = session.wait_finished() => {}
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, closing connection");
                    session.end_connection();
                    session.wait_finished().await;
                }
            }
        }
        _ = session.wait_finished() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, closing connection");
            session.end_recognize();
            session.end_connection();
            session.wait_finished().await;
        }
    }

    info!(state = %session.state(), "Session finished");
    if failed.load(Ordering::SeqCst) {
        anyhow::bail!("Recognition ended with an error");
    }
    Ok(())
}
