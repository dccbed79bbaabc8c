//! Basic type definitions for the matchmaking server
//!
//! Provides newtype wrappers for type safety:
//! - `UserId`: validated identifier supplied by the client
//! - `DisplayName`: validated name shown to the partner
//! - `ConnectionId`: UUID-based handle for one transport connection
//! - `SessionId`: random unguessable session token
//! - `RoomName`: random room identifier handed to the room provisioner

use rand::Rng;
use uuid::Uuid;

use crate::error::AppError;

/// Maximum length of a user identifier
const MAX_USER_ID_LEN: usize = 64;

/// Maximum length of a display name (in characters)
const MAX_DISPLAY_NAME_LEN: usize = 32;

/// Length of generated session tokens
const SESSION_ID_LEN: usize = 22;

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Opaque user identifier
///
/// Identity is established outside this crate; the engine only needs a
/// stable key. Limited to `[A-Za-z0-9_-]`, 1 to 64 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    /// Validate and wrap a raw identifier
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        if raw.is_empty() || raw.len() > MAX_USER_ID_LEN || !raw.chars().all(is_token_char) {
            return Err(AppError::InvalidRequest(format!("invalid user id '{}'", raw)));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display name shown to the matched partner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayName(String);

impl DisplayName {
    /// Trim and validate a display name
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let name = raw.trim();
        let len = name.chars().count();
        if len == 0 || len > MAX_DISPLAY_NAME_LEN || name.chars().any(char::is_control) {
            return Err(AppError::InvalidRequest(
                "display name must be 1-32 printable characters".to_string(),
            ));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DisplayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique connection identifier (newtype pattern)
///
/// Wraps a UUID v4. This is the handle the engine uses to address events
/// to a connected client through the `Notifier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session token (22 random alphanumeric characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new random session token
    pub fn generate() -> Self {
        let token: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(SESSION_ID_LEN)
            .map(char::from)
            .collect();
        Self(token)
    }

    /// Validate a session token received from a client
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        if raw.is_empty() || raw.len() > MAX_USER_ID_LEN || !raw.chars().all(is_token_char) {
            return Err(AppError::InvalidRequest(format!("invalid session id '{}'", raw)));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of room being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    /// Two human participants
    Pair,
    /// One participant with the automated partner
    Fallback,
}

/// Room name sent to the provisioner
///
/// `room` + 16 hex digits for pairs, `ai` + 16 hex digits for fallback rooms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomName(String);

impl RoomName {
    /// Generate a fresh room name for the given kind
    pub fn generate(kind: RoomKind) -> Self {
        let prefix = match kind {
            RoomKind::Pair => "room",
            RoomKind::Fallback => "ai",
        };
        let suffix: u64 = rand::thread_rng().gen();
        Self(format!("{}{:016x}", prefix, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
