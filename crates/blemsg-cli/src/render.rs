//! Text rendering of session state for the terminal

use blemsg_core::{ConnectionState, DeviceOrigin, Message, MessageDirection, PeerDevice};

/// One line per peer, e.g. `  [paired]  Phone (00:11:22:33:44:55)`
pub fn peer_line(peer: &PeerDevice) -> String {
    let origin = match peer.origin() {
        DeviceOrigin::Paired => "[paired] ",
        DeviceOrigin::Scanned => "[nearby] ",
    };
    format!("  {} {}", origin, peer)
}

/// A chat line; sent messages are shown as `me`, received ones with `peer_name`
pub fn message_line(message: &Message, peer_name: &str, show_timestamps: bool) -> String {
    let author = match message.direction {
        MessageDirection::Sent => "me",
        MessageDirection::Received => peer_name,
    };
    if show_timestamps {
        format!("[{}] {}: {}", message.timestamp, author, message.text)
    } else {
        format!("{}: {}", author, message.text)
    }
}

/// Human-readable connection state
pub fn state_line(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::None => "not connected",
        ConnectionState::Initializing => "connecting...",
        ConnectionState::Connected => "connected",
        ConnectionState::Closed => "disconnected",
        ConnectionState::Failed => "connection failed",
    }
}
