//! Session struct and registry
//!
//! A session is a 1:1 voice room between two users, or between one user
//! and the automated fallback partner. The registry is the only writer of
//! session status and the only place rooms get released.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::provisioner::{RoomHandle, RoomProvisioner};
use crate::types::{SessionId, UserId};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Ended,
}

/// 1:1 voice session
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// Participant who was waiting (or the only participant)
    pub participant_a: UserId,
    /// Second human participant, `None` for fallback sessions
    pub participant_b: Option<UserId>,
    pub is_fallback: bool,
    pub room: RoomHandle,
    pub status: SessionStatus,
    pub created_at: Instant,
    pub ended_at: Option<Instant>,
}

impl Session {
    /// Session between two humans
    pub fn pair(participant_a: UserId, participant_b: UserId, room: RoomHandle) -> Self {
        Self {
            id: SessionId::generate(),
            participant_a,
            participant_b: Some(participant_b),
            is_fallback: false,
            room,
            status: SessionStatus::Active,
            created_at: Instant::now(),
            ended_at: None,
        }
    }

    /// Session between one human and the automated partner
    pub fn fallback(participant: UserId, room: RoomHandle) -> Self {
        Self {
            id: SessionId::generate(),
            participant_a: participant,
            participant_b: None,
            is_fallback: true,
            room,
            status: SessionStatus::Active,
            created_at: Instant::now(),
            ended_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Check if a user takes part in this session
    pub fn contains(&self, user_id: &UserId) -> bool {
        &self.participant_a == user_id || self.participant_b.as_ref() == Some(user_id)
    }

    /// Human participants of this session
    pub fn participants(&self) -> impl Iterator<Item = &UserId> {
        std::iter::once(&self.participant_a).chain(self.participant_b.iter())
    }
}

/// Registry of sessions
///
/// Maps users to their single active session and owns room release.
pub struct SessionRegistry {
    /// Active sessions: SessionId -> Session
    sessions: HashMap<SessionId, Session>,
    /// Active participant mapping: UserId -> SessionId
    active_by_user: HashMap<UserId, SessionId>,
    provisioner: Arc<dyn RoomProvisioner>,
}

impl SessionRegistry {
    pub fn new(provisioner: Arc<dyn RoomProvisioner>) -> Self {
        Self {
            sessions: HashMap::new(),
            active_by_user: HashMap::new(),
            provisioner,
        }
    }

    /// Publish a freshly created session
    ///
    /// Fails if any participant already has an active session.
    pub fn register(&mut self, session: Session) -> Result<(), AppError> {
        if let Some(busy) = session
            .participants()
            .find(|user| self.active_by_user.contains_key(*user))
        {
            return Err(AppError::AlreadyInSession(busy.clone()));
        }

        for user in session.participants() {
            self.active_by_user.insert(user.clone(), session.id.clone());
        }
        info!(
            "Session {} registered (fallback: {}, room: {})",
            session.id, session.is_fallback, session.room.name
        );
        self.sessions.insert(session.id.clone(), session);
        debug!("Active sessions: {}", self.active_by_user.len());
        Ok(())
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    /// The active session `user_id` takes part in
    pub fn active_session_of(&self, user_id: &UserId) -> Option<&Session> {
        self.active_by_user
            .get(user_id)
            .and_then(|id| self.sessions.get(id))
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// End a session, drop it from the registry and release its room
    ///
    /// Ending an unknown or already ended session changes nothing and
    /// returns `SessionNotFound`. The room release runs in the background;
    /// a failed release is logged and the session stays ended.
    pub fn end(&mut self, session_id: &SessionId) -> Result<Session, AppError> {
        let mut session = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| AppError::SessionNotFound(session_id.clone()))?;

        session.status = SessionStatus::Ended;
        session.ended_at = Some(Instant::now());

        for user in session.participants() {
            self.active_by_user.remove(user);
        }

        info!("Session {} ended", session.id);
        self.release_room(session.room.clone());
        Ok(session)
    }

    /// Release a room in the background
    pub fn release_room(&self, room: RoomHandle) {
        let provisioner = Arc::clone(&self.provisioner);
        tokio::spawn(async move {
            if let Err(e) = provisioner.destroy_room(&room).await {
                warn!("Failed to release room {}: {}", room.name, e);
            }
        });
    }
}
