//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake,
//! message parsing, and bidirectional communication with the Matchmaker.

use std::sync::Arc;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::matchmaker::MatchmakerHandle;
use crate::message::{ClientMessage, ServerMessage};
use crate::notifier::ChannelNotifier;
use crate::types::{ConnectionId, DisplayName, SessionId, UserId};

/// Outbound buffer per connection
const OUTBOUND_BUFFER_SIZE: usize = 32;

/// Identity announced with `hello`
#[derive(Debug, Clone)]
struct Identity {
    user_id: UserId,
    display_name: DisplayName,
}

/// Handle a new TCP connection
///
/// Performs WebSocket handshake, sets up bidirectional communication,
/// and manages the connection lifecycle.
pub async fn handle_connection(
    stream: TcpStream,
    matchmaker: MatchmakerHandle,
    notifier: Arc<ChannelNotifier>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let connection = ConnectionId::new();
    info!("Connection {} opened from {}", connection, peer_addr);

    // Send connection success message
    let connected_msg = ServerMessage::Connected {
        connection_id: connection.to_string(),
    };
    let json = serde_json::to_string(&connected_msg)?;
    ws_sender.send(Message::Text(json.into())).await?;

    // Channel for engine -> client events
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER_SIZE);
    notifier.register(connection, msg_tx.clone());

    // Spawn write task (ServerMessage -> WebSocket)
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                }
            }
        }
        debug!("Write task ended for {}", connection);

        // Send close frame when done
        let _ = ws_sender.close().await;
    });

    let mut identity: Option<Identity> = None;

    // Read in this task so the identity outlives the loop
    tokio::select! {
        _ = read_messages(&mut ws_receiver, &matchmaker, connection, &msg_tx, &mut identity) => {
            debug!("Read loop completed for {}", connection);
        }
        _ = &mut write_task => {
            debug!("Write task completed for {}", connection);
        }
    }

    notifier.unregister(&connection);

    if let Some(identity) = identity {
        if let Err(e) = matchmaker.on_disconnect(identity.user_id, connection).await {
            warn!("Could not report disconnect of {}: {}", connection, e);
        }
    }

    info!("Connection {} closed", connection);

    Ok(())
}

/// Read frames until the client goes away or the matchmaker stops
async fn read_messages<S>(
    ws_receiver: &mut S,
    matchmaker: &MatchmakerHandle,
    connection: ConnectionId,
    msg_tx: &mpsc::Sender<ServerMessage>,
    identity: &mut Option<Identity>,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = ws_receiver.next().await {
        let text = match msg_result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                debug!("Connection {} sent close frame", connection);
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Pong is handled automatically by tungstenite
                continue;
            }
            Ok(_) => {
                // Binary or other message types - ignore
                continue;
            }
            Err(e) => {
                error!("WebSocket error for {}: {}", connection, e);
                break;
            }
        };

        let result = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(client_msg) => dispatch(matchmaker, connection, identity, client_msg).await,
            Err(e) => {
                warn!("Invalid JSON from {}: {}", connection, e);
                Err(AppError::Json(e))
            }
        };

        let reply = match result {
            Ok(Some(reply)) => reply,
            Ok(None) => continue,
            Err(AppError::ChannelSend) => {
                error!("Matchmaker closed, ending read loop for {}", connection);
                break;
            }
            Err(e) => e.into(),
        };

        if msg_tx.send(reply).await.is_err() {
            break;
        }
    }
}

/// Apply one client message
///
/// Engine events arrive through the notifier; only `hello` is answered
/// directly.
async fn dispatch(
    matchmaker: &MatchmakerHandle,
    connection: ConnectionId,
    identity: &mut Option<Identity>,
    msg: ClientMessage,
) -> Result<Option<ServerMessage>, AppError> {
    match msg {
        ClientMessage::Hello {
            user_id,
            display_name,
        } => {
            let user_id = UserId::parse(&user_id)?;
            let display_name = DisplayName::parse(&display_name)?;

            // Switching identity abandons the previous identity's search
            if let Some(previous) = identity.take() {
                if previous.user_id != user_id {
                    matchmaker
                        .on_disconnect(previous.user_id, connection)
                        .await?;
                }
            }

            info!("Connection {} identified as {}", connection, user_id);
            let ready = ServerMessage::Ready {
                user_id: user_id.to_string(),
            };
            *identity = Some(Identity {
                user_id,
                display_name,
            });
            Ok(Some(ready))
        }
        ClientMessage::JoinQueue => {
            let id = identity.as_ref().ok_or(AppError::IdentityRequired)?;
            let outcome = matchmaker
                .join_queue(id.user_id.clone(), id.display_name.clone(), connection)
                .await?;
            debug!("Join from {}: {:?}", id.user_id, outcome);
            Ok(None)
        }
        ClientMessage::CancelSearch => {
            let id = identity.as_ref().ok_or(AppError::IdentityRequired)?;
            matchmaker
                .cancel_search(id.user_id.clone(), connection)
                .await?;
            Ok(None)
        }
        ClientMessage::EndSession { session_id } => {
            let id = identity.as_ref().ok_or(AppError::IdentityRequired)?;
            let session_id = SessionId::parse(&session_id)?;
            matchmaker
                .end_session(id.user_id.clone(), session_id, connection)
                .await?;
            Ok(None)
        }
    }
}
