//! Connection handlers for the roomcast server.
//!
//! Each TCP connection is one room member. The first line is a
//! handshake naming the room, the member, and an optional mode string;
//! after that the connection task plays the transport collaborator:
//! socket lines go onto the room bus, routed deliveries drain from the
//! member's outbox back to the socket, and a closed socket turns into a
//! leave.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use bytes::BytesMut;
use dashmap::DashMap;
use roomcast_core::{BusPublisher, Membership, Room};
use roomcast_wire::codec;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Control lines interpreted at the transport layer, never routed.
const MUTE_PREFIX: &str = "mute:";
const UNMUTE_PREFIX: &str = "unmute:";

/// Shared server state.
pub struct AppState {
    /// Rooms indexed by name. Each room is an isolated broadcast domain.
    pub rooms: DashMap<String, Room>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            rooms: DashMap::new(),
            config,
        }
    }

    /// Get or create the room named `name`.
    fn room(&self, name: &str) -> Room {
        self.rooms
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(room = %name, "creating room");
                Room::with_config(name, self.config.room.room_config())
            })
            .clone()
    }
}

/// Run the TCP server.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;
    info!("roomcast server listening on {}", addr);

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    debug!(peer = %peer, "connection accepted");
                    handle_connection(stream, &state).await;
                    debug!(peer = %peer, "connection closed");
                });
            }
            Err(e) => warn!(error = %e, "failed to accept connection"),
        }
    }
}

/// Handle one client connection from handshake to departure.
async fn handle_connection(stream: TcpStream, state: &AppState) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let max_line = state.config.limits.max_line_length;

    let (mut reader, writer) = stream.into_split();
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Handshake: `<room>:<name>[:<mode>]`
    let hello = match read_line(&mut reader, &mut read_buffer, max_line).await {
        Ok(Some(line)) => line,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "handshake failed");
            metrics::record_error("handshake");
            return;
        }
    };
    let Some((room_name, member, mode)) = parse_handshake(&hello) else {
        warn!(line = %hello.trim_end(), "malformed handshake, closing connection");
        metrics::record_error("handshake");
        return;
    };

    let room = state.room(room_name);
    let membership = match room.join(member, mode).await {
        Ok(membership) => membership,
        Err(e) => {
            // Deliberate silent-drop towards the peer: the rejection is
            // only observable as a closed socket and a server log line.
            warn!(room = %room_name, member = %member, error = %e, "join rejected");
            metrics::record_error("join");
            return;
        }
    };
    metrics::record_join();
    metrics::set_active_rooms(state.rooms.len());
    info!(room = %room_name, member = %member, "client attached");

    run_session(&room, membership, reader, writer, read_buffer, max_line).await;

    room.leave(member).await;
    if state.config.room.drop_empty_rooms && room.member_count().await == 0 {
        state.rooms.remove(room_name);
        room.close().await;
        debug!(room = %room_name, "dropped empty room");
    }
    metrics::set_active_rooms(state.rooms.len());
    info!(room = %room_name, member = %member, "client detached");
}

/// Shuttle lines between the socket and the room until either side ends.
async fn run_session(
    room: &Room,
    membership: Membership,
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    mut read_buffer: BytesMut,
    max_line: usize,
) {
    let Membership {
        publisher,
        mut outbox,
    } = membership;
    let mut write_buffer = BytesMut::with_capacity(1024);

    'session: loop {
        tokio::select! {
            delivery = outbox.recv() => match delivery {
                Some(line) => {
                    write_buffer.clear();
                    codec::encode_into(&line, &mut write_buffer);
                    metrics::record_message(write_buffer.len(), "outbound");
                    if writer.write_all(&write_buffer).await.is_err() {
                        break 'session;
                    }
                }
                // Outbox closed: the member was removed behind our back
                // (room closed), so the session is over.
                None => break 'session,
            },

            read = reader.read_buf(&mut read_buffer) => match read {
                Ok(0) => break 'session,
                Ok(_) => loop {
                    match codec::decode_from(&mut read_buffer, max_line) {
                        Ok(Some(line)) => {
                            metrics::record_message(line.len(), "inbound");
                            if !handle_line(room, &publisher, line).await {
                                break 'session;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(member = %publisher.member(), error = %e, "protocol error");
                            metrics::record_error("protocol");
                            break 'session;
                        }
                    }
                },
                Err(e) => {
                    debug!(member = %publisher.member(), error = %e, "read error");
                    break 'session;
                }
            },
        }
    }
}

/// Apply one inbound line: a transport-level control line or a publish.
///
/// Returns `false` when the session should end.
async fn handle_line(room: &Room, publisher: &BusPublisher, line: String) -> bool {
    if let Some(target) = line.strip_prefix(MUTE_PREFIX) {
        let target = target.trim_end_matches(['\r', '\n']);
        room.mute(publisher.member(), target).await;
        return true;
    }
    if let Some(target) = line.strip_prefix(UNMUTE_PREFIX) {
        let target = target.trim_end_matches(['\r', '\n']);
        room.unmute(publisher.member(), target).await;
        return true;
    }

    match publisher.publish(&line).await {
        Ok(()) => true,
        Err(_) => {
            debug!(member = %publisher.member(), "bus closed, ending session");
            false
        }
    }
}

/// Read one complete line, growing the buffer as needed.
async fn read_line(
    reader: &mut OwnedReadHalf,
    buf: &mut BytesMut,
    max_line: usize,
) -> Result<Option<String>> {
    loop {
        if let Some(line) = codec::decode_from(buf, max_line)? {
            return Ok(Some(line));
        }
        if reader.read_buf(buf).await? == 0 {
            return Ok(None);
        }
    }
}

/// Split a handshake line into room, member name, and mode.
fn parse_handshake(line: &str) -> Option<(&str, &str, &str)> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields = line.splitn(3, ':');
    let room = fields.next()?;
    let name = fields.next()?;
    let mode = fields.next().unwrap_or("");
    if room.is_empty() || name.is_empty() {
        return None;
    }
    Some((room, name, mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_handshake() {
        assert_eq!(
            parse_handshake("lobby:alice\n"),
            Some(("lobby", "alice", ""))
        );
        assert_eq!(
            parse_handshake("lobby:alice:spectator\r\n"),
            Some(("lobby", "alice", "spectator"))
        );
        // Mode keeps any further colons verbatim.
        assert_eq!(
            parse_handshake("lobby:alice:a:b:c\n"),
            Some(("lobby", "alice", "a:b:c"))
        );
    }

    #[test]
    fn test_parse_handshake_rejects_missing_fields() {
        assert_eq!(parse_handshake("lobby\n"), None);
        assert_eq!(parse_handshake(":alice\n"), None);
        assert_eq!(parse_handshake("lobby:\n"), None);
        assert_eq!(parse_handshake("\n"), None);
    }
}
