//! Matchmaker Actor implementation
//!
//! The central actor that owns all matchmaking state: the waiting queue,
//! the timeout deadlines, pending room allocations and the session registry.
//! Uses the Actor pattern with mpsc channels for message passing, so every
//! pairing, fallback and teardown is applied in one consistent order.
//!
//! Room creation is a network call and runs in a spawned task. Participants
//! sit in a pending allocation until the task reports back, and are
//! re-validated before the session is published.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{AppError, ProvisionError};
use crate::message::ServerMessage;
use crate::notifier::Notifier;
use crate::provisioner::{RoomHandle, RoomProvisioner};
use crate::queue::{WaitingEntry, WaitingQueue};
use crate::scheduler::TimeoutScheduler;
use crate::session::{Session, SessionRegistry};
use crate::types::{ConnectionId, DisplayName, RoomKind, RoomName, SessionId, UserId};

/// Commands sent from the transport to the Matchmaker actor
#[derive(Debug)]
pub enum MatchCommand {
    /// Look for a partner
    Join {
        user_id: UserId,
        display_name: DisplayName,
        connection: ConnectionId,
        reply: oneshot::Sender<JoinOutcome>,
    },
    /// Stop looking for a partner
    Cancel {
        user_id: UserId,
        connection: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    /// End a session the user takes part in
    End {
        user_id: UserId,
        session_id: SessionId,
        connection: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    /// Connection lost
    Disconnect {
        user_id: UserId,
        connection: ConnectionId,
        reply: oneshot::Sender<()>,
    },
}

/// Result of a join request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// No partner available, waiting at `position`
    Queued { position: usize },
    /// Paired with the queue head, room being provisioned
    Matching,
}

/// Messages from tasks spawned by the actor
#[derive(Debug)]
enum Internal {
    RoomReady {
        ticket: u64,
        name: RoomName,
        result: Result<RoomHandle, ProvisionError>,
    },
}

/// A user who has been taken out of the queue for a session
#[derive(Debug, Clone)]
struct Participant {
    user_id: UserId,
    display_name: DisplayName,
    connection: ConnectionId,
}

impl From<WaitingEntry> for Participant {
    fn from(entry: WaitingEntry) -> Self {
        Self {
            user_id: entry.user_id,
            display_name: entry.display_name,
            connection: entry.connection,
        }
    }
}

/// Room requested, session not yet published
#[derive(Debug)]
struct PendingAllocation {
    kind: RoomKind,
    participants: Vec<Participant>,
}

/// Cloneable handle to the Matchmaker actor
///
/// This is the entire inbound surface of the engine.
#[derive(Debug, Clone)]
pub struct MatchmakerHandle {
    sender: mpsc::Sender<MatchCommand>,
}

impl MatchmakerHandle {
    pub fn new(sender: mpsc::Sender<MatchCommand>) -> Self {
        Self { sender }
    }

    /// Pair with the longest-waiting user, or wait for one
    pub async fn join_queue(
        &self,
        user_id: UserId,
        display_name: DisplayName,
        connection: ConnectionId,
    ) -> Result<JoinOutcome, AppError> {
        self.request(|reply| MatchCommand::Join {
            user_id,
            display_name,
            connection,
            reply,
        })
        .await
    }

    /// Stop searching; returns false if the user was not searching
    pub async fn cancel_search(
        &self,
        user_id: UserId,
        connection: ConnectionId,
    ) -> Result<bool, AppError> {
        self.request(|reply| MatchCommand::Cancel {
            user_id,
            connection,
            reply,
        })
        .await
    }

    /// End a session; returns false if nothing was ended
    pub async fn end_session(
        &self,
        user_id: UserId,
        session_id: SessionId,
        connection: ConnectionId,
    ) -> Result<bool, AppError> {
        self.request(|reply| MatchCommand::End {
            user_id,
            session_id,
            connection,
            reply,
        })
        .await
    }

    /// Forget any search started from `connection`
    pub async fn on_disconnect(
        &self,
        user_id: UserId,
        connection: ConnectionId,
    ) -> Result<(), AppError> {
        self.request(|reply| MatchCommand::Disconnect {
            user_id,
            connection,
            reply,
        })
        .await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> MatchCommand,
    ) -> Result<T, AppError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(command(reply_tx))
            .await
            .map_err(|_| AppError::ChannelSend)?;
        reply_rx.await.map_err(|_| AppError::ChannelSend)
    }
}

/// The main Matchmaker actor
pub struct Matchmaker {
    queue: WaitingQueue,
    scheduler: TimeoutScheduler,
    registry: SessionRegistry,
    /// Allocations in flight: ticket -> participants
    pending: HashMap<u64, PendingAllocation>,
    /// Pending participant mapping: UserId -> ticket
    pending_users: HashMap<UserId, u64>,
    next_ticket: u64,
    provisioner: Arc<dyn RoomProvisioner>,
    notifier: Arc<dyn Notifier>,
    /// Command receiver channel
    receiver: mpsc::Receiver<MatchCommand>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

impl Matchmaker {
    /// Create a Matchmaker with the given command receiver and collaborators
    pub fn new(
        receiver: mpsc::Receiver<MatchCommand>,
        provisioner: Arc<dyn RoomProvisioner>,
        notifier: Arc<dyn Notifier>,
        match_timeout: Duration,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            queue: WaitingQueue::new(),
            scheduler: TimeoutScheduler::new(match_timeout),
            registry: SessionRegistry::new(Arc::clone(&provisioner)),
            pending: HashMap::new(),
            pending_users: HashMap::new(),
            next_ticket: 0,
            provisioner,
            notifier,
            receiver,
            internal_tx,
            internal_rx,
        }
    }

    /// Start the actor on the current runtime and return its handle
    pub fn spawn(
        provisioner: Arc<dyn RoomProvisioner>,
        notifier: Arc<dyn Notifier>,
        match_timeout: Duration,
        buffer: usize,
    ) -> MatchmakerHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(buffer);
        tokio::spawn(Self::new(cmd_rx, provisioner, notifier, match_timeout).run());
        MatchmakerHandle::new(cmd_tx)
    }

    /// Run the Matchmaker event loop
    ///
    /// Processes commands, room allocation results and expired deadlines
    /// until all handles are dropped.
    pub async fn run(mut self) {
        info!(
            "Matchmaker started (match timeout {:?})",
            self.scheduler.timeout()
        );

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
                Some(user_id) = self.scheduler.expired(), if !self.scheduler.is_empty() => {
                    self.handle_timeout(user_id);
                }
            }
        }

        info!(
            "Matchmaker shutting down ({} waiting, {} active sessions)",
            self.queue.len(),
            self.registry.active_count()
        );
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: MatchCommand) {
        // A dropped reply receiver only means the caller went away
        match cmd {
            MatchCommand::Join {
                user_id,
                display_name,
                connection,
                reply,
            } => {
                let outcome = self.handle_join(user_id, display_name, connection);
                let _ = reply.send(outcome);
            }
            MatchCommand::Cancel {
                user_id,
                connection,
                reply,
            } => {
                let _ = reply.send(self.handle_cancel(user_id, connection));
            }
            MatchCommand::End {
                user_id,
                session_id,
                connection,
                reply,
            } => {
                let _ = reply.send(self.handle_end(user_id, session_id, connection));
            }
            MatchCommand::Disconnect {
                user_id,
                connection,
                reply,
            } => {
                self.handle_disconnect(user_id, connection);
                let _ = reply.send(());
            }
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::RoomReady {
                ticket,
                name,
                result,
            } => self.handle_room_ready(ticket, name, result),
        }
    }

    /// Handle a join request: pair with the queue head or wait
    fn handle_join(
        &mut self,
        user_id: UserId,
        display_name: DisplayName,
        connection: ConnectionId,
    ) -> JoinOutcome {
        // A stale search from an earlier connection must not linger
        if self.withdraw(&user_id, None).is_some() {
            debug!("Replaced earlier search of {}", user_id);
        }

        // Next partner: the current session ends first
        if let Some(session_id) = self
            .registry
            .active_session_of(&user_id)
            .map(|s| s.id.clone())
        {
            if self.registry.end(&session_id).is_ok() {
                info!("User {} left session {} for a new partner", user_id, session_id);
                self.notifier.send(
                    connection,
                    ServerMessage::SessionEnded {
                        session_id: session_id.to_string(),
                    },
                );
            }
        }

        let joiner = Participant {
            user_id,
            display_name,
            connection,
        };

        match self.queue.pop_front() {
            Some(partner) => {
                self.scheduler.cancel(&partner.user_id);
                info!("Pairing {} with {}", partner.user_id, joiner.user_id);
                self.start_allocation(RoomKind::Pair, vec![partner.into(), joiner]);
                JoinOutcome::Matching
            }
            None => {
                let entry = WaitingEntry::new(
                    joiner.user_id.clone(),
                    joiner.display_name,
                    joiner.connection,
                );
                let enqueued_at = entry.enqueued_at;
                let position = self.queue.enqueue(entry);
                self.scheduler.arm(joiner.user_id.clone(), enqueued_at);

                info!("User {} waiting, position {}", joiner.user_id, position);
                self.notifier
                    .send(joiner.connection, ServerMessage::Waiting { position });
                JoinOutcome::Queued { position }
            }
        }
    }

    /// Handle search cancellation
    ///
    /// Once a pairing or fallback has taken the user out of the queue the
    /// session is committed, so only a waiting entry can be cancelled.
    fn handle_cancel(&mut self, user_id: UserId, connection: ConnectionId) -> bool {
        if self.withdraw_waiting(&user_id, None).is_none() {
            debug!("Cancel from {} ignored, not waiting", user_id);
            return false;
        }

        info!("User {} cancelled search", user_id);
        self.notifier.send(connection, ServerMessage::SearchCancelled);
        true
    }

    /// Handle session termination requested by a participant
    fn handle_end(
        &mut self,
        user_id: UserId,
        session_id: SessionId,
        connection: ConnectionId,
    ) -> bool {
        let owned = self
            .registry
            .get(&session_id)
            .is_some_and(|s| s.contains(&user_id));
        if !owned {
            debug!("User {} cannot end unknown session {}", user_id, session_id);
            return false;
        }

        match self.registry.end(&session_id) {
            Ok(_) => {
                // The partner learns about it from the media room itself
                self.notifier.send(
                    connection,
                    ServerMessage::SessionEnded {
                        session_id: session_id.to_string(),
                    },
                );
                true
            }
            Err(e) => {
                debug!("End of {} by {} ignored: {}", session_id, user_id, e);
                false
            }
        }
    }

    /// Handle connection loss; active sessions are left alone
    fn handle_disconnect(&mut self, user_id: UserId, connection: ConnectionId) {
        if self.withdraw(&user_id, Some(connection)).is_some() {
            info!("User {} disconnected while searching", user_id);
        }
    }

    /// Handle an expired match deadline
    fn handle_timeout(&mut self, user_id: UserId) {
        let Some(entry) = self.queue.dequeue_if_present(&user_id) else {
            debug!("Deadline for {} fired after the entry was consumed", user_id);
            return;
        };

        info!(
            "No partner for {} within {:?}, starting fallback session",
            user_id,
            self.scheduler.timeout()
        );
        self.start_allocation(RoomKind::Fallback, vec![entry.into()]);
    }

    /// Handle a finished room allocation
    fn handle_room_ready(
        &mut self,
        ticket: u64,
        name: RoomName,
        result: Result<RoomHandle, ProvisionError>,
    ) {
        let Some(pending) = self.pending.remove(&ticket) else {
            return;
        };
        for participant in &pending.participants {
            self.pending_users.remove(&participant.user_id);
        }

        if pending.participants.is_empty() {
            debug!("Everyone left before room {} was ready", name);
            if let Ok(room) = result {
                self.registry.release_room(room);
            }
            return;
        }

        let room = match result {
            Ok(room) => room,
            Err(e) => {
                warn!("Failed to create room {}: {}", name, e);
                match self.provisioner.fallback_room(&name) {
                    Some(room) => {
                        warn!("Using degraded room {}", room.url);
                        room
                    }
                    None => {
                        error!("No room available for {} participant(s)", pending.participants.len());
                        let message = ServerMessage::from(AppError::Provisioning(e));
                        for participant in &pending.participants {
                            self.notifier.send(participant.connection, message.clone());
                        }
                        return;
                    }
                }
            }
        };

        let (session, recipients) = match pending.participants.as_slice() {
            [a, b] => (
                Session::pair(a.user_id.clone(), b.user_id.clone(), room),
                vec![
                    (a.connection, Some(b.display_name.to_string())),
                    (b.connection, Some(a.display_name.to_string())),
                ],
            ),
            [solo] => {
                if pending.kind == RoomKind::Pair {
                    info!("Partner of {} withdrew, continuing with fallback", solo.user_id);
                }
                (
                    Session::fallback(solo.user_id.clone(), room),
                    vec![(solo.connection, None)],
                )
            }
            _ => {
                error!("Allocation {} had {} participants", ticket, pending.participants.len());
                self.registry.release_room(room);
                return;
            }
        };

        self.publish(session, recipients);
    }

    /// Register a session and tell its participants
    fn publish(&mut self, session: Session, recipients: Vec<(ConnectionId, Option<String>)>) {
        let session_id = session.id.to_string();
        let room = session.room.clone();
        let is_fallback = session.is_fallback;

        if let Err(e) = self.registry.register(session) {
            error!("Could not register session {}: {}", session_id, e);
            self.registry.release_room(room);
            let message = ServerMessage::from(e);
            for (connection, _) in recipients {
                self.notifier.send(connection, message.clone());
            }
            return;
        }

        for (connection, partner_name) in recipients {
            self.notifier.send(
                connection,
                ServerMessage::Matched {
                    session_id: session_id.clone(),
                    room_url: room.url.clone(),
                    is_fallback,
                    partner_name,
                },
            );
        }
    }

    /// Request a room for `participants` without blocking the actor
    fn start_allocation(&mut self, kind: RoomKind, participants: Vec<Participant>) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;

        for participant in &participants {
            self.pending_users
                .insert(participant.user_id.clone(), ticket);
        }
        self.pending
            .insert(ticket, PendingAllocation { kind, participants });

        let name = RoomName::generate(kind);
        let provisioner = Arc::clone(&self.provisioner);
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = provisioner.create_room(&name).await;
            // Fails only when the actor has shut down
            let _ = internal_tx.send(Internal::RoomReady {
                ticket,
                name,
                result,
            });
        });
    }

    /// Take a user out of the queue or out of a pending allocation
    ///
    /// With `only_connection`, the search is withdrawn only if it was
    /// started from that connection. Returns the connection of the
    /// withdrawn search.
    fn withdraw(
        &mut self,
        user_id: &UserId,
        only_connection: Option<ConnectionId>,
    ) -> Option<ConnectionId> {
        self.withdraw_waiting(user_id, only_connection)
            .or_else(|| self.withdraw_pending(user_id, only_connection))
    }

    /// Remove a waiting entry and its deadline
    fn withdraw_waiting(
        &mut self,
        user_id: &UserId,
        only_connection: Option<ConnectionId>,
    ) -> Option<ConnectionId> {
        let entry = self.queue.get(user_id)?;
        if only_connection.is_some_and(|c| c != entry.connection) {
            return None;
        }
        let entry = self.queue.dequeue_if_present(user_id)?;
        self.scheduler.cancel(user_id);
        Some(entry.connection)
    }

    /// Drop a participant from a room allocation still in flight
    fn withdraw_pending(
        &mut self,
        user_id: &UserId,
        only_connection: Option<ConnectionId>,
    ) -> Option<ConnectionId> {
        let ticket = *self.pending_users.get(user_id)?;
        let pending = self.pending.get_mut(&ticket)?;
        let index = pending.participants.iter().position(|p| {
            &p.user_id == user_id && only_connection.map_or(true, |c| c == p.connection)
        })?;
        let participant = pending.participants.remove(index);
        self.pending_users.remove(user_id);
        debug!("User {} withdrew from allocation {}", user_id, ticket);
        Some(participant.connection)
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::{sleep, timeout, Instant};

    use super::*;
    use crate::message::ErrorCode;
    use crate::notifier::ChannelNotifier;
    use crate::provisioner::mock::RecordingProvisioner;

    const TIMEOUT: Duration = Duration::from_secs(8);

    struct Harness {
        handle: MatchmakerHandle,
        notifier: Arc<ChannelNotifier>,
        provisioner: Arc<RecordingProvisioner>,
    }

    struct TestClient {
        user_id: UserId,
        name: DisplayName,
        connection: ConnectionId,
        rx: mpsc::Receiver<ServerMessage>,
    }

    fn start(provisioner: RecordingProvisioner) -> Harness {
        let provisioner = Arc::new(provisioner);
        let notifier = Arc::new(ChannelNotifier::new());
        let handle = Matchmaker::spawn(provisioner.clone(), notifier.clone(), TIMEOUT, 64);
        Harness {
            handle,
            notifier,
            provisioner,
        }
    }

    impl Harness {
        fn client(&self, id: &str) -> TestClient {
            let (tx, rx) = mpsc::channel(16);
            let connection = ConnectionId::new();
            self.notifier.register(connection, tx);
            TestClient {
                user_id: UserId::parse(id).unwrap(),
                name: DisplayName::parse(&format!("{}-name", id)).unwrap(),
                connection,
                rx,
            }
        }

        async fn join(&self, client: &TestClient) -> JoinOutcome {
            self.handle
                .join_queue(client.user_id.clone(), client.name.clone(), client.connection)
                .await
                .unwrap()
        }

        async fn cancel(&self, client: &TestClient) -> bool {
            self.handle
                .cancel_search(client.user_id.clone(), client.connection)
                .await
                .unwrap()
        }

        async fn end(&self, client: &TestClient, session_id: &str) -> bool {
            self.handle
                .end_session(
                    client.user_id.clone(),
                    SessionId::parse(session_id).unwrap(),
                    client.connection,
                )
                .await
                .unwrap()
        }
    }

    impl TestClient {
        async fn next(&mut self) -> ServerMessage {
            timeout(Duration::from_secs(60), self.rx.recv())
                .await
                .expect("no event within 60s")
                .expect("channel closed")
        }

        /// Events received so far, after letting time run for `wait`
        async fn drain_after(&mut self, wait: Duration) -> Vec<ServerMessage> {
            sleep(wait).await;
            let mut events = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                events.push(event);
            }
            events
        }

        async fn expect_matched(&mut self) -> (String, bool, Option<String>) {
            match self.next().await {
                ServerMessage::Matched {
                    session_id,
                    is_fallback,
                    partner_name,
                    ..
                } => (session_id, is_fallback, partner_name),
                other => panic!("expected matched, got {:?}", other),
            }
        }
    }

    fn count_matched(events: &[ServerMessage]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, ServerMessage::Matched { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_users_are_paired() {
        let h = start(RecordingProvisioner::new());
        let mut u1 = h.client("u1");
        let mut u2 = h.client("u2");

        assert_eq!(h.join(&u1).await, JoinOutcome::Queued { position: 1 });
        assert_eq!(u1.next().await, ServerMessage::Waiting { position: 1 });

        assert_eq!(h.join(&u2).await, JoinOutcome::Matching);
        let (s1, fallback1, partner1) = u1.expect_matched().await;
        let (s2, fallback2, partner2) = u2.expect_matched().await;

        assert_eq!(s1, s2);
        assert!(!fallback1 && !fallback2);
        assert_eq!(partner1.as_deref(), Some("u2-name"));
        assert_eq!(partner2.as_deref(), Some("u1-name"));
        assert_eq!(h.provisioner.created(), 1);

        // The waiting user's deadline was cancelled by the pairing
        assert!(u1.drain_after(TIMEOUT * 3).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_after_deadline() {
        let h = start(RecordingProvisioner::new());
        let mut u1 = h.client("u1");
        let started = Instant::now();

        h.join(&u1).await;
        assert_eq!(u1.next().await, ServerMessage::Waiting { position: 1 });

        let (_, is_fallback, partner) = u1.expect_matched().await;
        assert!(is_fallback);
        assert!(partner.is_none());
        assert!(started.elapsed() >= TIMEOUT);
        assert!(u1.drain_after(TIMEOUT * 2).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_removes_entry() {
        let h = start(RecordingProvisioner::new());
        let mut u1 = h.client("u1");
        let u2 = h.client("u2");

        h.join(&u1).await;
        assert!(h.cancel(&u1).await);
        assert_eq!(u1.next().await, ServerMessage::Waiting { position: 1 });
        assert_eq!(u1.next().await, ServerMessage::SearchCancelled);

        // The next user does not find u1 in the queue
        assert_eq!(h.join(&u2).await, JoinOutcome::Queued { position: 1 });
        assert!(u1.drain_after(TIMEOUT * 2).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_when_not_searching_is_noop() {
        let h = start(RecordingProvisioner::new());
        let mut u1 = h.client("u1");

        assert!(!h.cancel(&u1).await);
        assert!(u1.drain_after(Duration::from_millis(10)).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_session_once() {
        let h = start(RecordingProvisioner::new());
        let mut u1 = h.client("u1");
        let mut u2 = h.client("u2");

        h.join(&u1).await;
        h.join(&u2).await;
        u1.next().await;
        let (session_id, _, _) = u1.expect_matched().await;
        u2.expect_matched().await;

        assert!(h.end(&u1, &session_id).await);
        assert_eq!(
            u1.next().await,
            ServerMessage::SessionEnded {
                session_id: session_id.clone()
            }
        );
        assert_eq!(h.provisioner.settled_destroyed().await.len(), 1);

        assert!(!h.end(&u1, &session_id).await);
        assert!(!h.end(&u2, &session_id).await);
        assert_eq!(h.provisioner.settled_destroyed().await.len(), 1);
        assert!(u1.drain_after(Duration::from_millis(10)).await.is_empty());

        // The partner is not told by the engine
        assert!(u2.drain_after(Duration::from_millis(10)).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_session_requires_participant() {
        let h = start(RecordingProvisioner::new());
        let mut u1 = h.client("u1");
        let mut outsider = h.client("u9");

        h.join(&u1).await;
        u1.next().await;
        let (session_id, _, _) = u1.expect_matched().await;

        assert!(!h.end(&outsider, &session_id).await);
        assert!(outsider.drain_after(Duration::from_millis(10)).await.is_empty());
        assert!(h.provisioner.settled_destroyed().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_keeps_single_deadline() {
        let h = start(RecordingProvisioner::new());
        let mut u1 = h.client("u1");

        assert_eq!(h.join(&u1).await, JoinOutcome::Queued { position: 1 });
        sleep(Duration::from_secs(4)).await;
        assert_eq!(h.join(&u1).await, JoinOutcome::Queued { position: 1 });

        let events = u1.drain_after(TIMEOUT * 3).await;
        assert_eq!(
            &events[..2],
            &[
                ServerMessage::Waiting { position: 1 },
                ServerMessage::Waiting { position: 1 }
            ]
        );
        assert_eq!(count_matched(&events), 1);
        assert_eq!(h.provisioner.created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_silent() {
        let h = start(RecordingProvisioner::new());
        let mut u1 = h.client("u1");
        let u2 = h.client("u2");

        h.join(&u1).await;
        u1.next().await;
        h.handle
            .on_disconnect(u1.user_id.clone(), u1.connection)
            .await
            .unwrap();

        assert_eq!(h.join(&u2).await, JoinOutcome::Queued { position: 1 });
        assert!(u1.drain_after(TIMEOUT * 2).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_connection_disconnect_keeps_new_search() {
        let h = start(RecordingProvisioner::new());
        let old = h.client("u1");
        let mut new = h.client("u1");

        h.join(&new).await;
        h.handle
            .on_disconnect(old.user_id.clone(), old.connection)
            .await
            .unwrap();

        let events = new.drain_after(TIMEOUT * 2).await;
        assert_eq!(count_matched(&events), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_race_has_one_outcome() {
        for offset_ms in [7_900u64, 7_999, 8_000, 8_001, 8_100] {
            let h = start(RecordingProvisioner::new());
            let mut u1 = h.client("u1");
            let mut u2 = h.client("u2");

            h.join(&u1).await;
            tokio::time::advance(Duration::from_millis(offset_ms)).await;
            h.join(&u2).await;

            let u1_events = u1.drain_after(TIMEOUT * 3).await;
            let u2_events = u2.drain_after(Duration::ZERO).await;
            assert_eq!(count_matched(&u1_events), 1, "offset {}", offset_ms);

            let u1_fallback = u1_events.iter().any(|e| {
                matches!(e, ServerMessage::Matched { is_fallback: true, .. })
            });
            if u1_fallback {
                // u2 found an empty queue and later got its own fallback
                assert_eq!(u2_events[0], ServerMessage::Waiting { position: 1 });
            } else {
                assert!(matches!(
                    u2_events[0],
                    ServerMessage::Matched { is_fallback: false, .. }
                ));
            }
            assert_eq!(count_matched(&u2_events), 1, "offset {}", offset_ms);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_partner_disconnects_during_allocation() {
        let h = start(RecordingProvisioner::with_delay(Duration::from_secs(2)));
        let mut u1 = h.client("u1");
        let mut u2 = h.client("u2");

        h.join(&u1).await;
        assert_eq!(h.join(&u2).await, JoinOutcome::Matching);
        h.handle
            .on_disconnect(u2.user_id.clone(), u2.connection)
            .await
            .unwrap();

        u1.next().await;
        let (_, is_fallback, partner) = u1.expect_matched().await;
        assert!(is_fallback);
        assert!(partner.is_none());
        assert!(u2.drain_after(TIMEOUT).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_released_when_everyone_leaves_allocation() {
        let h = start(RecordingProvisioner::with_delay(Duration::from_secs(2)));
        let mut u1 = h.client("u1");
        let mut u2 = h.client("u2");

        h.join(&u1).await;
        assert_eq!(h.join(&u2).await, JoinOutcome::Matching);
        for client in [&u1, &u2] {
            h.handle
                .on_disconnect(client.user_id.clone(), client.connection)
                .await
                .unwrap();
        }

        sleep(Duration::from_secs(3)).await;
        let destroyed = h.provisioner.settled_destroyed().await;
        assert_eq!(h.provisioner.created(), 1);
        assert_eq!(destroyed.len(), 1);
        assert!(destroyed[0].starts_with("room"));

        assert_eq!(count_matched(&u1.drain_after(TIMEOUT * 2).await), 0);
        assert_eq!(count_matched(&u2.drain_after(Duration::ZERO).await), 0);
        assert_eq!(h.provisioner.settled_destroyed().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_deadline_keeps_fallback() {
        let h = start(RecordingProvisioner::with_delay(Duration::from_secs(2)));
        let mut u1 = h.client("u1");

        h.join(&u1).await;
        assert_eq!(u1.next().await, ServerMessage::Waiting { position: 1 });

        // Deadline fired, fallback room creation in flight
        sleep(TIMEOUT + Duration::from_millis(500)).await;
        assert!(!h.cancel(&u1).await);

        let (_, is_fallback, _) = u1.expect_matched().await;
        assert!(is_fallback);
        assert!(u1.drain_after(TIMEOUT).await.is_empty());
        assert_eq!(h.provisioner.created(), 1);
        assert!(h.provisioner.settled_destroyed().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_pairing_keeps_session() {
        let h = start(RecordingProvisioner::with_delay(Duration::from_secs(2)));
        let mut u1 = h.client("u1");
        let mut u2 = h.client("u2");

        h.join(&u1).await;
        assert_eq!(h.join(&u2).await, JoinOutcome::Matching);
        assert!(!h.cancel(&u2).await);

        u1.next().await;
        let (s1, fallback1, _) = u1.expect_matched().await;
        let (s2, fallback2, _) = u2.expect_matched().await;
        assert_eq!(s1, s2);
        assert!(!fallback1 && !fallback2);
        assert!(u2.drain_after(TIMEOUT).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_responsive_during_allocation() {
        let h = start(RecordingProvisioner::with_delay(Duration::from_secs(5)));
        let u1 = h.client("u1");
        let u2 = h.client("u2");
        let u3 = h.client("u3");

        h.join(&u1).await;
        h.join(&u2).await;

        let before = Instant::now();
        assert_eq!(h.join(&u3).await, JoinOutcome::Queued { position: 1 });
        assert!(before.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_provisioning_failure_uses_degraded_room() {
        let provisioner = RecordingProvisioner::new();
        provisioner.fail_creates();
        let h = start(provisioner);
        let mut u1 = h.client("u1");
        let u2 = h.client("u2");

        h.join(&u1).await;
        h.join(&u2).await;
        u1.next().await;

        match u1.next().await {
            ServerMessage::Matched { room_url, .. } => {
                assert!(room_url.starts_with("https://fallback.test/room"))
            }
            other => panic!("expected matched, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_outage_reports_error() {
        let h = start(RecordingProvisioner::outage());
        let mut u1 = h.client("u1");
        let mut u2 = h.client("u2");

        h.join(&u1).await;
        h.join(&u2).await;
        u1.next().await;

        for client in [&mut u1, &mut u2] {
            match client.next().await {
                ServerMessage::Error { code, .. } => {
                    assert_eq!(code, ErrorCode::ProvisioningFailed)
                }
                other => panic!("expected error, got {:?}", other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_partner_ends_current_session() {
        let h = start(RecordingProvisioner::new());
        let mut u1 = h.client("u1");
        let mut u2 = h.client("u2");

        h.join(&u1).await;
        h.join(&u2).await;
        u1.next().await;
        let (first, _, _) = u1.expect_matched().await;
        u2.expect_matched().await;

        assert_eq!(h.join(&u1).await, JoinOutcome::Queued { position: 1 });
        assert_eq!(
            u1.next().await,
            ServerMessage::SessionEnded {
                session_id: first.clone()
            }
        );
        assert_eq!(u1.next().await, ServerMessage::Waiting { position: 1 });
        assert_eq!(h.provisioner.settled_destroyed().await.len(), 1);

        // u2 still holds the old session id; joining again pairs with u1
        assert_eq!(h.join(&u2).await, JoinOutcome::Matching);
        let (second, is_fallback, _) = u1.expect_matched().await;
        assert!(!is_fallback);
        assert_ne!(first, second);
    }
}
