//! Socket Chat CLI
//!
//! Terminal front-end for the chat session: each stdin line is sent as a
//! message and the transcript is printed as it grows.

use socket_chat::config::Config;
use socket_chat::transport::Transport;
use socket_chat::{ChatSession, ConnectionManager, Message, Transcript};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing (stdout is reserved for the transcript)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = Config::from_env();
    config.validate()?;
    info!("Configuration loaded: {:?}", config);

    let connection = Arc::new(ConnectionManager::from_config(&config));
    let session = ChatSession::new(connection.clone());
    let mut updates = session.updates();

    info!(user_id = %session.current_user_id(), "Type a message and press Enter");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut printed = 0usize;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => match line? {
                Some(line) => {
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    if let Err(e) = session.send_message(text).await {
                        warn!(error = %e, "Session stopped accepting messages");
                        break;
                    }
                }
                None => {
                    info!("Input closed");
                    break;
                }
            },
            Some(_) = updates.recv() => {
                let transcript = session.transcript();
                for message in transcript.iter().skip(printed) {
                    println!("{}", render_line(&transcript, message));
                }
                printed = transcript.len();
            }
        }
    }

    session.shutdown().await;
    connection.disconnect();
    info!("Chat client shutdown complete");
    Ok(())
}

fn render_line(transcript: &Transcript, message: &Message) -> String {
    if transcript.is_own(message) {
        format!("{:>40}  [me]", message.text)
    } else {
        let author: String = message.user_id.chars().take(8).collect();
        format!("[{}]  {}", author, message.text)
    }
}

/// Handle graceful shutdown signals (Ctrl+C, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        },
    }
}
