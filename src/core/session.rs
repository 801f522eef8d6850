//! Session state and the session registry.
//!
//! The registry is the single shared-mutable structure in the server: it maps
//! a client identifier to its live [`Session`] and is the only authority for
//! session existence. Entries are held in a [`DashMap`] so unrelated clients
//! never contend on one lock.
//!
//! A session outlives its connection: on disconnect the connection handle is
//! cleared and the session is retained for the configured window so that a
//! reconnecting client resumes with its language preference (and conversation
//! memory) intact.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::handlers::ws::messages::{MessageRoute, ServerMessage};
use crate::utils::text::detect_user_name;

/// Upper bound on remembered conversation turns per session.
const MAX_HISTORY_TURNS: usize = 10;

/// Input of one accepted query, as decoded off the wire.
#[derive(Debug, Clone)]
pub enum QueryInput {
    /// `text_query` payload.
    Text(String),
    /// `audio_query` payload, already base64-decoded.
    Audio(Bytes),
}

/// A query waiting for the session's single pipeline slot.
#[derive(Debug)]
pub struct QueuedQuery {
    pub input: QueryInput,
    /// Connection epoch that submitted the query. Results are only
    /// deliverable while this epoch is still the session's current one.
    pub epoch: u64,
}

#[derive(Default)]
struct QueryQueue {
    items: VecDeque<QueuedQuery>,
    /// True while a drain task owns the session's pipeline slot.
    draining: bool,
}

/// Live connection handle: the outbound channel and the epoch it belongs to.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub tx: mpsc::Sender<MessageRoute>,
    pub epoch: u64,
}

/// Server-side state for one client's conversation.
pub struct Session {
    client_id: String,
    language: RwLock<String>,
    user_name: RwLock<Option<String>>,
    history: Mutex<VecDeque<(String, String)>>,
    queue: Mutex<QueryQueue>,
    conn: RwLock<Option<ConnectionHandle>>,
    epoch: AtomicU64,
    artifact_seq: AtomicU64,
    detached_at: Mutex<Option<Instant>>,
}

impl Session {
    fn new(client_id: String, default_language: String) -> Self {
        Self {
            client_id,
            language: RwLock::new(default_language),
            user_name: RwLock::new(None),
            history: Mutex::new(VecDeque::new()),
            queue: Mutex::new(QueryQueue::default()),
            conn: RwLock::new(None),
            epoch: AtomicU64::new(0),
            artifact_seq: AtomicU64::new(0),
            detached_at: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Active language tag for requests that begin processing now.
    pub fn language(&self) -> String {
        self.language.read().clone()
    }

    pub fn set_language(&self, language: &str) {
        *self.language.write() = language.trim().to_string();
    }

    pub fn user_name(&self) -> Option<String> {
        self.user_name.read().clone()
    }

    /// Capture a self-introduced name from a query, once.
    pub fn observe_user_name(&self, query: &str) {
        if self.user_name.read().is_some() {
            return;
        }
        if let Some(name) = detect_user_name(query) {
            info!(client_id = %self.client_id, user_name = %name, "captured user name");
            *self.user_name.write() = Some(name);
        }
    }

    /// Recent conversation turns, oldest first.
    pub fn history(&self) -> Vec<(String, String)> {
        self.history.lock().iter().cloned().collect()
    }

    /// Remember one (query, answer) exchange, keeping the window bounded.
    pub fn record_turn(&self, query: String, answer: String) {
        let mut history = self.history.lock();
        history.push_back((query, answer));
        while history.len() > MAX_HISTORY_TURNS {
            history.pop_front();
        }
    }

    /// Point the session at a new connection, invalidating the previous one.
    ///
    /// Returns the new connection epoch; any result tagged with an older
    /// epoch is undeliverable from this moment on.
    pub fn attach(&self, tx: mpsc::Sender<MessageRoute>) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *self.conn.write() = Some(ConnectionHandle { tx, epoch });
        *self.detached_at.lock() = None;
        epoch
    }

    /// Clear the connection handle if `epoch` is still the attached one.
    ///
    /// The epoch guard keeps a slow old connection's teardown from clobbering
    /// a handle that a reconnect has already replaced.
    pub fn detach(&self, epoch: u64) {
        let mut conn = self.conn.write();
        match conn.as_ref() {
            Some(handle) if handle.epoch == epoch => {
                *conn = None;
                *self.detached_at.lock() = Some(Instant::now());
            }
            _ => {}
        }
    }

    pub fn is_attached(&self) -> bool {
        self.conn.read().is_some()
    }

    /// How long the session has been without a connection, if detached.
    pub fn detached_for(&self) -> Option<Duration> {
        self.detached_at.lock().map(|t| t.elapsed())
    }

    /// Deliver a message if `epoch` still names the live connection.
    ///
    /// Returns false when the result had to be discarded (stale epoch,
    /// detached session, or a closed channel).
    pub async fn send_to(&self, epoch: u64, message: ServerMessage) -> bool {
        let tx = {
            let conn = self.conn.read();
            match conn.as_ref() {
                Some(handle) if handle.epoch == epoch => handle.tx.clone(),
                _ => return false,
            }
        };
        tx.send(MessageRoute::Message(message)).await.is_ok()
    }

    /// Next playback sequence number; assigned at request completion.
    pub fn next_artifact_seq(&self) -> u64 {
        self.artifact_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Queue a query for the session's single in-flight slot.
    ///
    /// Returns true when the caller must spawn the drain task (the queue was
    /// idle); false when a drainer is already working the queue.
    pub fn enqueue(&self, query: QueuedQuery) -> bool {
        let mut queue = self.queue.lock();
        queue.items.push_back(query);
        if queue.draining {
            false
        } else {
            queue.draining = true;
            true
        }
    }

    /// Pop the next queued query, or release the drain slot when empty.
    pub fn next_queued(&self) -> Option<QueuedQuery> {
        let mut queue = self.queue.lock();
        match queue.items.pop_front() {
            Some(query) => Some(query),
            None => {
                queue.draining = false;
                None
            }
        }
    }

    /// Number of queries waiting (excluding any in-flight one).
    pub fn queued_len(&self) -> usize {
        self.queue.lock().items.len()
    }

    /// Whether a drain task currently owns the pipeline slot.
    pub fn is_busy(&self) -> bool {
        self.queue.lock().draining
    }
}

/// Maps client identifiers to live sessions.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    default_language: String,
    retention: Duration,
}

impl SessionRegistry {
    pub fn new(default_language: String, retention: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            default_language,
            retention,
        }
    }

    /// Look up or create the session for a client identifier.
    ///
    /// Idempotent: a second call with the same identifier returns the same
    /// logical session, so a reconnecting client keeps its language
    /// preference.
    pub fn get_or_create(&self, client_id: &str) -> Arc<Session> {
        self.sessions
            .entry(client_id.to_string())
            .or_insert_with(|| {
                info!(client_id, "creating session");
                Arc::new(Session::new(
                    client_id.to_string(),
                    self.default_language.clone(),
                ))
            })
            .clone()
    }

    /// Resolve the session and point it at a fresh connection.
    pub fn attach(
        &self,
        client_id: &str,
        tx: mpsc::Sender<MessageRoute>,
    ) -> (Arc<Session>, u64) {
        let session = self.get_or_create(client_id);
        let epoch = session.attach(tx);
        (session, epoch)
    }

    pub fn get(&self, client_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(client_id).map(|s| s.clone())
    }

    pub fn remove(&self, client_id: &str) -> bool {
        self.sessions.remove(client_id).is_some()
    }

    /// Number of live sessions (health probe surface).
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions that have been detached longer than the retention
    /// window and have no queued work. Returns how many were removed.
    pub fn sweep_detached(&self) -> usize {
        let retention = self.retention;
        let mut removed = 0usize;
        self.sessions.retain(|_, session| {
            let expired = session
                .detached_for()
                .map(|idle| idle >= retention)
                .unwrap_or(false);
            if expired && !session.is_busy() {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            debug!(removed, "swept detached sessions");
        }
        removed
    }

    /// Run the retention sweep periodically until the registry is dropped.
    pub fn spawn_retention_sweeper(self: Arc<Self>) {
        let interval = self.retention.max(Duration::from_secs(2)) / 2;
        // Hold only a weak handle so the sweeper does not keep the registry
        // alive on its own.
        let registry = Arc::downgrade(&self);
        drop(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.sweep_detached();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new("en".to_string(), Duration::from_secs(300))
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = registry();
        let a = registry.get_or_create("client_demo");
        let b = registry.get_or_create("client_demo");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_language_survives_reattach() {
        let registry = registry();
        let (tx1, _rx1) = mpsc::channel(4);
        let (session, first_epoch) = registry.attach("client_demo", tx1);
        session.set_language("hi");
        session.detach(first_epoch);
        assert!(!session.is_attached());

        let (tx2, _rx2) = mpsc::channel(4);
        let (session2, second_epoch) = registry.attach("client_demo", tx2);
        assert!(Arc::ptr_eq(&session, &session2));
        assert!(second_epoch > first_epoch);
        assert_eq!(session2.language(), "hi");
    }

    #[test]
    fn test_detach_with_stale_epoch_is_ignored() {
        let registry = registry();
        let (tx1, _rx1) = mpsc::channel(4);
        let (session, old_epoch) = registry.attach("client_demo", tx1);
        let (tx2, _rx2) = mpsc::channel(4);
        let new_epoch = session.attach(tx2);

        // The old connection's teardown must not clear the new handle.
        session.detach(old_epoch);
        assert!(session.is_attached());

        session.detach(new_epoch);
        assert!(!session.is_attached());
    }

    #[tokio::test]
    async fn test_send_to_discards_for_stale_epoch() {
        let registry = registry();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (session, old_epoch) = registry.attach("client_demo", tx1);
        let (tx2, mut rx2) = mpsc::channel(4);
        let new_epoch = session.attach(tx2);

        assert!(!session.send_to(old_epoch, ServerMessage::status("late")).await);
        assert!(session.send_to(new_epoch, ServerMessage::status("fresh")).await);

        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_enqueue_reports_drainer_ownership() {
        let registry = registry();
        let session = registry.get_or_create("client_demo");

        let first = session.enqueue(QueuedQuery {
            input: QueryInput::Text("one".to_string()),
            epoch: 1,
        });
        let second = session.enqueue(QueuedQuery {
            input: QueryInput::Text("two".to_string()),
            epoch: 1,
        });
        assert!(first, "first enqueue should claim the drain slot");
        assert!(!second, "second enqueue should reuse the running drainer");
        assert_eq!(session.queued_len(), 2);

        assert!(session.next_queued().is_some());
        assert!(session.next_queued().is_some());
        assert!(session.next_queued().is_none());
        assert!(!session.is_busy(), "drain slot released once queue is empty");

        // The next arrival claims the slot again.
        assert!(session.enqueue(QueuedQuery {
            input: QueryInput::Text("three".to_string()),
            epoch: 1,
        }));
    }

    #[test]
    fn test_history_is_bounded() {
        let registry = registry();
        let session = registry.get_or_create("client_demo");
        for i in 0..15 {
            session.record_turn(format!("q{i}"), format!("a{i}"));
        }
        let history = session.history();
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].0, "q5");
        assert_eq!(history[9].0, "q14");
    }

    #[test]
    fn test_observe_user_name_keeps_first_match() {
        let registry = registry();
        let session = registry.get_or_create("client_demo");
        session.observe_user_name("what is the price?");
        assert_eq!(session.user_name(), None);
        session.observe_user_name("my name is asha");
        assert_eq!(session.user_name(), Some("Asha".to_string()));
        session.observe_user_name("my name is rohan");
        assert_eq!(session.user_name(), Some("Asha".to_string()));
    }

    #[test]
    fn test_artifact_sequence_is_monotonic() {
        let registry = registry();
        let session = registry.get_or_create("client_demo");
        assert_eq!(session.next_artifact_seq(), 1);
        assert_eq!(session.next_artifact_seq(), 2);
        assert_eq!(session.next_artifact_seq(), 3);
    }

    #[test]
    fn test_sweep_removes_only_expired_detached_sessions() {
        let registry = SessionRegistry::new("en".to_string(), Duration::from_millis(0));
        let (tx, _rx) = mpsc::channel(4);
        let (attached, _epoch) = registry.attach("attached", tx);
        let _ = attached;

        let (tx2, _rx2) = mpsc::channel(4);
        let (detached, epoch2) = registry.attach("detached", tx2);
        detached.detach(epoch2);

        assert_eq!(registry.len(), 2);
        let removed = registry.sweep_detached();
        assert_eq!(removed, 1);
        assert!(registry.get("attached").is_some());
        assert!(registry.get("detached").is_none());
    }
}
