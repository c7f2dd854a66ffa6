//! Command handlers for the blemsg CLI

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{info, warn};

use blemsg_ble::{normalize_address, BleRadio};
use blemsg_core::{
    ConnectionState, MemoryAir, OperationResult, OperationStream, SessionCoordinator,
};

use crate::chat;
use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::render;

/// Messages the demo peers exchange
const DEMO_SCRIPT: [(&str, &str); 3] = [
    ("alice", "hi bob, can you hear me?"),
    ("bob", "loud and clear"),
    ("alice", "great, signing off"),
];

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Scan { duration } => Self::handle_scan_command(config, duration).await,
            Commands::Connect { address, insecure } => {
                let secure = config.ble.secure && !insecure;
                Self::handle_connect_command(config, address, secure).await
            }
            Commands::Listen { insecure } => {
                let secure = config.ble.secure && !insecure;
                Self::handle_listen_command(config, secure).await
            }
            Commands::Demo => Self::handle_demo_command(config).await,
        }
    }

    async fn open_session(config: &AppConfig) -> Result<SessionCoordinator> {
        let radio = BleRadio::open(config.ble.clone()).await?;
        Ok(SessionCoordinator::new(Arc::new(radio), config.session.clone()))
    }

    /// Handle the scan command
    async fn handle_scan_command(mut config: AppConfig, duration: Option<u64>) -> Result<()> {
        let seconds = duration.unwrap_or(config.cli.scan_duration_secs);
        config.session = config
            .session
            .with_scan_timeout(Duration::from_secs(seconds));
        let session = Self::open_session(&config).await?;

        println!("Scanning for {}s... Press Ctrl+C to stop", seconds);
        let mut scan = session.scan();
        let mut printed = 0;
        loop {
            tokio::select! {
                item = scan.next() => {
                    let Some(item) = item else {
                        break;
                    };
                    if let Some(error) = item.error() {
                        return Err(error.clone().into());
                    }
                    if let Some(peers) = item.data() {
                        for peer in peers.iter().skip(printed) {
                            println!("{}", render::peer_line(peer));
                        }
                        printed = peers.len();
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    session.stop_scan().await;
                }
            }
        }

        if printed == 0 {
            println!("No peers found");
        }
        Ok(())
    }

    /// Handle the connect command
    async fn handle_connect_command(config: AppConfig, address: String, secure: bool) -> Result<()> {
        let address = normalize_address(&address)?;
        let session = Self::open_session(&config).await?;

        println!("Connecting to {}...", address);
        Self::await_connection(session.connect_as_client(&address, secure)).await?;
        chat::run_chat(&session, &config.cli).await
    }

    /// Handle the listen command
    async fn handle_listen_command(config: AppConfig, secure: bool) -> Result<()> {
        let session = Self::open_session(&config).await?;

        println!(
            "Waiting for a {} connection...",
            if secure { "secure" } else { "insecure" }
        );
        Self::await_connection(session.connect_as_server(secure)).await?;
        chat::run_chat(&session, &config.cli).await
    }

    /// Drain a connect stream, failing unless it ends connected
    async fn await_connection(mut attempt: OperationStream<ConnectionState>) -> Result<()> {
        let mut connected = false;
        while let Some(result) = attempt.next().await {
            if let OperationResult::Outcome { state, error, .. } = result {
                if let Some(error) = error {
                    return Err(error.into());
                }
                connected = state.is_connected();
                println!("{}", render::state_line(state));
            }
        }
        if connected {
            Ok(())
        } else {
            Err(CliError::Disconnected("no connection established".to_string()))
        }
    }

    /// Handle the demo command: two simulated radios chat end to end
    async fn handle_demo_command(config: AppConfig) -> Result<()> {
        let air = MemoryAir::new();
        let alice_radio = air.radio("0A:00:00:00:00:01", "alice");
        let bob_radio = air.radio("0B:00:00:00:00:02", "bob");
        air.pair(&alice_radio, &bob_radio);

        let alice = SessionCoordinator::new(alice_radio, config.session.clone());
        let bob = SessionCoordinator::new(bob_radio.clone(), config.session.clone());

        println!("alice scans:");
        let mut scan = alice.scan();
        let mut printed = 0;
        while let Some(item) = scan.next().await {
            if let Some(peers) = item.data() {
                for peer in peers.iter().skip(printed) {
                    println!("{}", render::peer_line(peer));
                }
                printed = peers.len();
                if printed > 0 {
                    alice.stop_scan().await;
                }
            }
        }

        info!("bob listens, alice connects");
        let listening = tokio::spawn(Self::await_connection(bob.connect_as_server(true)));
        air.wait_for_listener(bob_radio.address()).await;
        Self::await_connection(alice.connect_as_client(bob_radio.address(), true)).await?;
        listening
            .await
            .map_err(|e| CliError::Disconnected(e.to_string()))??;

        for (speaker, text) in DEMO_SCRIPT {
            let (from, to) = if speaker == "alice" { (&alice, &bob) } else { (&bob, &alice) };
            let expected = to.messages().len() + 1;
            let mut log = to.watch_messages();
            from.send(text).collect::<Vec<_>>().await;
            if tokio::time::timeout(Duration::from_secs(2), log.wait_for(|log| log.len() >= expected))
                .await
                .is_err()
            {
                warn!("{} did not receive {:?}", if speaker == "alice" { "bob" } else { "alice" }, text);
            }
        }

        println!("\nalice's log:");
        for message in alice.messages() {
            println!("  {}", render::message_line(&message, "bob", config.cli.show_timestamps));
        }
        println!("bob's log:");
        for message in bob.messages() {
            println!("  {}", render::message_line(&message, "alice", config.cli.show_timestamps));
        }

        alice.disconnect().await;
        let mut bob_state = bob.watch_connection_state();
        let _ = tokio::time::timeout(
            Duration::from_secs(2),
            bob_state.wait_for(|state| *state == ConnectionState::None),
        )
        .await;
        println!("\nbob sees: {}", render::state_line(bob.connection_state()));
        Ok(())
    }
}
