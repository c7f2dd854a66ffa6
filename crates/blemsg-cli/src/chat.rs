//! Interactive chat over an established session

use std::io::Write;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use blemsg_core::{ConnectionState, OperationResult, SessionCoordinator, SessionEvent};

use crate::config::CliConfig;
use crate::error::{CliError, Result};
use crate::render;

/// Line typed to leave the chat
pub const QUIT_COMMAND: &str = "/quit";

/// Relay stdin lines to the peer and print incoming messages until the
/// user quits or the peer goes away
pub async fn run_chat(session: &SessionCoordinator, config: &CliConfig) -> Result<()> {
    let peer_name = session
        .connected_peer()
        .map(|peer| peer.display_name().to_string())
        .unwrap_or_else(|| "peer".to_string());
    println!("Chatting with {}. Type {} to leave.", peer_name, QUIT_COMMAND);

    let mut events = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt(config);

    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e.into()),
                };
                let line = line.trim();
                if line == QUIT_COMMAND {
                    break Ok(());
                }
                if !line.is_empty() {
                    send_line(session, line).await;
                }
                prompt(config);
            }
            event = events.recv() => match event {
                Ok(SessionEvent::MessageReceived(message)) => {
                    println!("\r{}", render::message_line(&message, &peer_name, config.show_timestamps));
                    prompt(config);
                }
                Ok(SessionEvent::ConnectionStateChanged(state)) if !state.is_connected() => {
                    println!("\r{}", render::state_line(state));
                    break Err(CliError::Disconnected(format!("{} left the chat", peer_name)));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} session events", skipped),
                Err(RecvError::Closed) => break Ok(()),
            }
        }
    };

    session.disconnect().await;
    outcome
}

async fn send_line(session: &SessionCoordinator, line: &str) {
    let mut results = session.send(line);
    while let Some(result) = results.next().await {
        match result {
            OperationResult::Outcome { error: Some(e), .. } => println!("Message not sent: {}", e),
            OperationResult::Outcome { state: ConnectionState::Connected, .. } => {
                debug!("Sent {} bytes", line.len())
            }
            _ => {}
        }
    }
}

fn prompt(config: &CliConfig) {
    print!("{}", config.prompt);
    let _ = std::io::stdout().flush();
}
