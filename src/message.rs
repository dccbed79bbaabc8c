//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization. The `type` tag doubles as
//! the event name delivered through the `Notifier`.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Client → Server message
///
/// All messages from client to server. Uses tagged enum with snake_case naming.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Identify the connection (required before queue operations)
    Hello { user_id: String, display_name: String },
    /// Look for a partner
    JoinQueue,
    /// Stop looking for a partner
    CancelSearch,
    /// End the given session
    EndSession { session_id: String },
}

/// Server → Client message
///
/// All messages from server to client. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection successful, connection ID issued
    Connected { connection_id: String },
    /// Identity accepted
    Ready { user_id: String },
    /// Queued, waiting for a partner
    Waiting { position: usize },
    /// Session created, either with a partner or with the automated fallback
    Matched {
        session_id: String,
        room_url: String,
        is_fallback: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        partner_name: Option<String>,
    },
    /// Search cancelled on request
    SearchCancelled,
    /// Session ended on request
    SessionEnded { session_id: String },
    /// Error occurred
    Error { code: ErrorCode, message: String },
}

impl ServerMessage {
    /// Event name as seen on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::Ready { .. } => "ready",
            ServerMessage::Waiting { .. } => "waiting",
            ServerMessage::Matched { .. } => "matched",
            ServerMessage::SearchCancelled => "search_cancelled",
            ServerMessage::SessionEnded { .. } => "session_ended",
            ServerMessage::Error { .. } => "error",
        }
    }
}

/// Error codes for ServerMessage::Error
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Queue operation before `hello`
    IdentityRequired,
    /// Malformed frame or identifier
    InvalidRequest,
    /// No room could be provisioned at all
    ProvisioningFailed,
    /// Anything else
    Internal,
}

/// Convert AppError to ServerMessage for client notification
impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        let (code, message) = match &err {
            AppError::IdentityRequired => (
                ErrorCode::IdentityRequired,
                "Send hello before joining the queue".to_string(),
            ),
            AppError::InvalidRequest(reason) => (ErrorCode::InvalidRequest, reason.clone()),
            AppError::Json(e) => (
                ErrorCode::InvalidRequest,
                format!("Invalid message format: {}", e),
            ),
            AppError::Provisioning(_) => (
                ErrorCode::ProvisioningFailed,
                "Voice rooms are unavailable right now, please try again later".to_string(),
            ),
            // Fatal errors are not typically converted (connection closes)
            _ => (ErrorCode::Internal, "Internal error".to_string()),
        };
        ServerMessage::Error { code, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProvisionError;

    #[test]
    fn test_client_message_deserialize() {
        let json = r#"{"type": "hello", "user_id": "u1", "display_name": "Alice"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Hello {
                user_id,
                display_name,
            } => {
                assert_eq!(user_id, "u1");
                assert_eq!(display_name, "Alice");
            }
            _ => panic!("Wrong variant"),
        }

        let json = r#"{"type": "end_session", "session_id": "abc"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::EndSession { .. }));
    }

    #[test]
    fn test_matched_serialize_fallback_omits_partner() {
        let msg = ServerMessage::Matched {
            session_id: "s1".to_string(),
            room_url: "https://x.daily.co/ai1".to_string(),
            is_fallback: true,
            partner_name: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"matched\""));
        assert!(json.contains("\"is_fallback\":true"));
        assert!(!json.contains("partner_name"));
    }

    #[test]
    fn test_unit_event_serialize() {
        let json = serde_json::to_string(&ServerMessage::SearchCancelled).unwrap();
        assert_eq!(json, r#"{"type":"search_cancelled"}"#);
        assert_eq!(ServerMessage::SearchCancelled.event_name(), "search_cancelled");
    }

    #[test]
    fn test_error_code_serialize() {
        let msg: ServerMessage =
            AppError::Provisioning(ProvisionError::Unavailable("down".to_string())).into();
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"code\":\"provisioning_failed\""));
    }
}
