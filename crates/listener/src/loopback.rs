//! In-process implementations of the collaborator ports.
//!
//! [`LoopbackTransport`] stands in for a real publish/subscribe server: it
//! records every channel opened, joined and left, lets callers script join
//! outcomes, and pushes inbound traffic into an `mpsc` channel exactly as a
//! network transport would. [`LoopbackAuthorization`] and
//! [`InMemorySystemOfRecord`] complete the set. The CLI replays recorded
//! traffic through them, and the tests drive every scenario with them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pipeline::{
    ArtifactRecord, AuthError, AuthorizationProvider, ChannelConfig, ChannelHandle, ChannelId,
    InboundKind, InboundMessage, JoinStatus, RealtimeTransport, SessionId, StoreError,
    SystemOfRecord, Topic,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TransportState {
    opened: Vec<ChannelHandle>,
    configs: Vec<ChannelConfig>,
    join_requests: Vec<ChannelId>,
    joined: Vec<ChannelId>,
    left: Vec<ChannelId>,
    scripted: VecDeque<JoinStatus>,
    join_delay: Option<Duration>,
}

/// In-process [`RealtimeTransport`].
pub struct LoopbackTransport {
    state: Mutex<TransportState>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
}

impl LoopbackTransport {
    /// Creates a transport and the receiver its inbound traffic arrives on.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<InboundMessage>) {
        let (inbound, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            state: Mutex::new(TransportState::default()),
            inbound,
        });
        (transport, rx)
    }

    /// Queues the outcome of the next join. Unscripted joins succeed.
    pub fn script_join(&self, status: JoinStatus) {
        self.state.lock().scripted.push_back(status);
    }

    /// Delays every subsequent join acknowledgement by `delay`.
    pub fn set_join_delay(&self, delay: Duration) {
        self.state.lock().join_delay = Some(delay);
    }

    /// Publishes an event to the most recently joined channel for `topic`
    /// that has not been left. Returns `false` if there is none.
    pub fn broadcast(&self, topic: &Topic, event: &str, payload: Value) -> bool {
        let target = {
            let state = self.state.lock();
            state
                .opened
                .iter()
                .rev()
                .find(|h| {
                    &h.topic == topic && state.joined.contains(&h.id) && !state.left.contains(&h.id)
                })
                .map(|h| h.id)
        };
        match target {
            Some(channel) => {
                self.deliver(InboundMessage {
                    channel,
                    kind: InboundKind::Broadcast {
                        event: event.to_string(),
                        payload,
                    },
                });
                true
            }
            None => {
                trace!(topic = %topic, event, "No joined channel; broadcast lost");
                false
            }
        }
    }

    /// Pushes a status notice for `channel`, whether or not it is still live.
    pub fn notify_status(&self, channel: ChannelId, status: JoinStatus) {
        self.deliver(InboundMessage {
            channel,
            kind: InboundKind::Status(status),
        });
    }

    /// Pushes a raw message, bypassing all bookkeeping.
    pub fn deliver(&self, message: InboundMessage) {
        // A dropped receiver means nobody is listening any more.
        let _ = self.inbound.send(message);
    }

    pub fn opened(&self) -> Vec<ChannelHandle> {
        self.state.lock().opened.clone()
    }

    pub fn configs(&self) -> Vec<ChannelConfig> {
        self.state.lock().configs.clone()
    }

    pub fn join_requests(&self) -> Vec<ChannelId> {
        self.state.lock().join_requests.clone()
    }

    pub fn left(&self) -> Vec<ChannelId> {
        self.state.lock().left.clone()
    }

    /// Channels that joined successfully and have not been left.
    pub fn live_channels(&self) -> Vec<ChannelId> {
        let state = self.state.lock();
        state
            .joined
            .iter()
            .filter(|id| !state.left.contains(id))
            .copied()
            .collect()
    }
}

#[async_trait]
impl RealtimeTransport for LoopbackTransport {
    fn open(&self, topic: &Topic, config: &ChannelConfig) -> ChannelHandle {
        let handle = ChannelHandle {
            id: ChannelId::new_random(),
            topic: topic.clone(),
        };
        let mut state = self.state.lock();
        state.opened.push(handle.clone());
        state.configs.push(config.clone());
        handle
    }

    async fn join(&self, channel: &ChannelHandle) -> JoinStatus {
        let (status, delay) = {
            let mut state = self.state.lock();
            state.join_requests.push(channel.id);
            let status = state.scripted.pop_front().unwrap_or(JoinStatus::Subscribed);
            (status, state.join_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if status == JoinStatus::Subscribed {
            self.state.lock().joined.push(channel.id);
        }
        status
    }

    async fn leave(&self, channel: &ChannelHandle) {
        self.state.lock().left.push(channel.id);
    }
}

// ---------------------------------------------------------------------------
// Authorisation
// ---------------------------------------------------------------------------

/// [`AuthorizationProvider`] that counts refreshes and can be told to fail.
#[derive(Default)]
pub struct LoopbackAuthorization {
    refreshes: AtomicUsize,
    failure: Mutex<Option<String>>,
}

impl LoopbackAuthorization {
    /// Makes every subsequent refresh fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    /// Makes subsequent refreshes succeed again.
    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorizationProvider for LoopbackAuthorization {
    async fn refresh(&self) -> Result<(), AuthError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().clone() {
            Some(message) => Err(AuthError::new(message)),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// System of record
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordState {
    sessions: HashMap<SessionId, String>,
    artifacts: HashMap<SessionId, ArtifactRecord>,
    unavailable: bool,
}

/// In-memory [`SystemOfRecord`].
#[derive(Default)]
pub struct InMemorySystemOfRecord {
    state: Mutex<RecordState>,
    queries: AtomicUsize,
}

impl InMemorySystemOfRecord {
    pub fn set_session_status(&self, session: SessionId, status: impl Into<String>) {
        self.state.lock().sessions.insert(session, status.into());
    }

    pub fn insert_artifact(&self, session: SessionId, artifact: ArtifactRecord) {
        self.state.lock().artifacts.insert(session, artifact);
    }

    /// Makes every query fail until called again with `false`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Number of queries served, including failed ones.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.state.lock().unavailable {
            return Err(StoreError::Unavailable {
                message: "in-memory store marked unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SystemOfRecord for InMemorySystemOfRecord {
    async fn session_status(&self, session: &SessionId) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.state.lock().sessions.get(session).cloned())
    }

    async fn latest_artifact(
        &self,
        session: &SessionId,
    ) -> Result<Option<ArtifactRecord>, StoreError> {
        self.check()?;
        Ok(self.state.lock().artifacts.get(session).cloned())
    }
}
