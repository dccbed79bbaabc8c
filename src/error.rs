//! Error types for the matchmaking server
//!
//! Defines application-level errors, room provisioning errors and
//! message send errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::types::{SessionId, UserId};

/// Application-level errors
///
/// Covers fatal transport errors (connection termination) and
/// request errors (sent back to the client as an `error` event).
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - matchmaker actor is gone)
    #[error("Channel send error")]
    ChannelSend,

    /// Invalid configuration value
    #[error("Invalid configuration {key}: {message}")]
    Config { key: String, message: String },

    /// Malformed identifier or frame, rejected at the boundary
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Engine operation attempted before `hello`
    #[error("Identity required")]
    IdentityRequired,

    /// Session unknown, already ended, or not owned by the caller
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Participant already has an active session
    #[error("User {0} already has an active session")]
    AlreadyInSession(UserId),

    /// Room could not be provisioned and no degraded room exists
    #[error("Room provisioning failed: {0}")]
    Provisioning(#[from] ProvisionError),
}

/// Room provisioning errors
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// HTTP transport failure talking to the provider
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with a non-success status
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Provider is not reachable at all
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

/// Message send errors
///
/// Occurs when attempting to deliver an event to a connection whose
/// channel is closed or full.
#[derive(Debug, Error)]
pub enum SendError {
    /// No channel registered for the connection
    #[error("Connection not registered")]
    NotRegistered,

    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The client is not draining its channel
    #[error("Channel full")]
    ChannelFull,
}
