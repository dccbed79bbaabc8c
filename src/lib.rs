//! Anonymous 1:1 Voice Matchmaking Library
//!
//! Pairs users who want a voice conversation and guarantees that every
//! user is connected to something within a bounded wait: a human partner,
//! or an automated fallback partner once the deadline passes.
//!
//! # Features
//! - FIFO waiting queue with idempotent join
//! - Fallback session after the match timeout
//! - Search cancellation and silent cleanup on disconnect
//! - Session registry with idempotent termination
//! - Room provisioning through a pluggable provider (Daily REST API)
//! - WebSocket JSON transport
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Matchmaker` is the central actor owning the queue, deadlines and sessions
//! - `MatchmakerHandle` is the only way in: join, cancel, end, disconnect
//! - Room creation runs in spawned tasks so the queue never waits on the network
//! - Events go out through a `Notifier`, addressed by `ConnectionId`
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio::net::TcpListener;
//! use voice_match::{handle_connection, ChannelNotifier, Matchmaker, StaticProvisioner};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let notifier = Arc::new(ChannelNotifier::new());
//!     let provisioner = Arc::new(StaticProvisioner::new("demo"));
//!     let matchmaker = Matchmaker::spawn(provisioner, notifier.clone(), Duration::from_secs(8), 256);
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, matchmaker.clone(), notifier.clone()));
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod matchmaker;
pub mod message;
pub mod notifier;
pub mod provisioner;
pub mod queue;
pub mod scheduler;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use config::Config;
pub use error::{AppError, ProvisionError, SendError};
pub use handler::handle_connection;
pub use matchmaker::{JoinOutcome, MatchCommand, Matchmaker, MatchmakerHandle};
pub use message::{ClientMessage, ErrorCode, ServerMessage};
pub use notifier::{ChannelNotifier, Notifier};
pub use provisioner::{DailyProvisioner, RoomHandle, RoomProvisioner, StaticProvisioner};
pub use queue::{WaitingEntry, WaitingQueue};
pub use scheduler::TimeoutScheduler;
pub use session::{Session, SessionRegistry, SessionStatus};
pub use types::{ConnectionId, DisplayName, RoomKind, RoomName, SessionId, UserId};
