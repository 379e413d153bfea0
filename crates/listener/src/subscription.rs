//! Lifecycle of one named topic subscription.
//!
//! [`ChannelSubscriptionManager`] owns at most one transport channel at a time
//! and drives it through join, authorisation, observation of the join
//! outcome, and teardown. It holds no business data: inbound broadcasts are
//! handed to the [`EventDispatcher`] registered with the subscription, which
//! mutates a context owned by the caller.
//!
//! ## Failure handling
//!
//! Nothing here returns an error. A failed authorisation refresh, a rejected
//! join, a timeout, or a closed channel is recorded as [`SubscriptionState`]
//! plus an error message. The manager never retries on its own; callers decide
//! when to invoke [`ChannelSubscriptionManager::reconnect`].
//!
//! ## Stale notices
//!
//! Every channel the manager opens has a fresh [`ChannelId`]. Join outcomes
//! and status notices are applied only when they name the currently active
//! channel and its cancellation token has not fired. Anything else belongs to
//! a channel that has already been torn down and is discarded.

use std::sync::Arc;

use pipeline::{
    AuthorizationProvider, ChannelHandle, ChannelId, DispatchOutcome, EventDispatcher,
    InboundKind, InboundMessage, JoinStatus, RealtimeTransport, SubscriptionState, Topic,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ChannelOptions;

/// Everything needed to (re)create a subscription.
pub struct SubscriptionRequest<C> {
    /// Topic name. An empty topic means "do not subscribe".
    pub topic: String,
    pub options: ChannelOptions,
    pub dispatcher: Arc<EventDispatcher<C>>,
}

impl<C> Clone for SubscriptionRequest<C> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            options: self.options.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl<C> std::fmt::Debug for SubscriptionRequest<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRequest")
            .field("topic", &self.topic)
            .field("options", &self.options)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Broadcast routed to a handler.
    Handled,
    /// Broadcast for the active channel with no registered handler.
    Ignored,
    /// Status notice applied to the active channel.
    StatusChanged,
    /// Message for a channel that is no longer active; dropped.
    Stale,
}

struct ActiveChannel<C> {
    handle: ChannelHandle,
    dispatcher: Arc<EventDispatcher<C>>,
    /// Child of the caller's token; cancelled on teardown.
    cancel: CancellationToken,
}

/// Manages a single topic subscription over a [`RealtimeTransport`].
pub struct ChannelSubscriptionManager<C> {
    transport: Arc<dyn RealtimeTransport>,
    auth: Arc<dyn AuthorizationProvider>,
    active: Option<ActiveChannel<C>>,
    state: SubscriptionState,
    error: Option<String>,
    last_request: Option<SubscriptionRequest<C>>,
}

impl<C> ChannelSubscriptionManager<C> {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        auth: Arc<dyn AuthorizationProvider>,
    ) -> Self {
        Self {
            transport,
            auth,
            active: None,
            state: SubscriptionState::Idle,
            error: None,
            last_request: None,
        }
    }

    /// Subscribes to `request.topic`, waiting for the join outcome.
    ///
    /// - If the same topic is already joining or joined this is a no-op.
    /// - An empty topic or disabled options tear down any existing
    ///   subscription and do not join.
    /// - Otherwise any previous channel is torn down, a new one is opened with
    ///   the dispatcher's event names registered, credentials are refreshed for
    ///   private topics, and the join is issued.
    ///
    /// Cancelling `cancel` (or any token it was derived from) while waiting
    /// abandons the attempt and tears the new channel down. Returns the
    /// resulting state.
    pub async fn subscribe(
        &mut self,
        request: SubscriptionRequest<C>,
        cancel: CancellationToken,
    ) -> SubscriptionState {
        let topic = match Topic::new(request.topic.as_str()) {
            Some(topic) if request.options.enabled => topic,
            _ => {
                debug!(topic = %request.topic, "Subscription disabled or topic empty; tearing down");
                self.last_request = Some(request);
                self.teardown().await;
                return self.state;
            }
        };

        if let Some(active) = &self.active {
            if active.handle.topic == topic
                && self.state.is_active()
                && !active.cancel.is_cancelled()
            {
                debug!(topic = %topic, state = %self.state, "Already subscribed");
                self.last_request = Some(request);
                return self.state;
            }
        }

        self.teardown().await;
        self.last_request = Some(request.clone());
        self.error = None;

        let SubscriptionRequest {
            options,
            dispatcher,
            ..
        } = request;
        let config = options.channel_config(dispatcher.event_names());
        let handle = self.transport.open(&topic, &config);
        let channel_id = handle.id;
        let cancel = cancel.child_token();
        self.active = Some(ActiveChannel {
            handle: handle.clone(),
            dispatcher,
            cancel: cancel.clone(),
        });
        self.state = SubscriptionState::Joining;
        debug!(topic = %topic, channel = %channel_id, "Channel opened");

        if options.private {
            let refreshed = tokio::select! {
                result = self.auth.refresh() => Some(result),
                _ = cancel.cancelled() => None,
            };
            match refreshed {
                None => {
                    self.abandon(channel_id).await;
                    return self.state;
                }
                Some(Err(err)) => {
                    warn!(topic = %topic, error = %err, "Authorization refresh failed");
                    self.state = SubscriptionState::Errored;
                    self.error = Some(err.message);
                    return self.state;
                }
                Some(Ok(())) => {}
            }
        }

        let timeout = options.join_timeout();
        let outcome = tokio::select! {
            status = tokio::time::timeout(timeout, self.transport.join(&handle)) => {
                Some(status.unwrap_or(JoinStatus::TimedOut))
            }
            _ = cancel.cancelled() => None,
        };
        match outcome {
            Some(status) => {
                self.apply_status(channel_id, status);
            }
            None => self.abandon(channel_id).await,
        }
        self.state
    }

    /// Tears down the active subscription, if any. Safe to call repeatedly.
    pub async fn unsubscribe(&mut self) {
        self.teardown().await;
    }

    /// Re-runs [`subscribe`](Self::subscribe) with the last request.
    ///
    /// Does nothing if no subscription was ever requested.
    pub async fn reconnect(&mut self, cancel: CancellationToken) -> SubscriptionState {
        match self.last_request.clone() {
            Some(request) => {
                info!(topic = %request.topic, "Reconnecting");
                self.subscribe(request, cancel).await
            }
            None => {
                debug!("Reconnect requested with no previous subscription");
                self.state
            }
        }
    }

    /// Routes one inbound message.
    ///
    /// Broadcasts for the active channel go to its dispatcher with `ctx`;
    /// status notices update the subscription state. Messages for any other
    /// channel are dropped.
    pub fn handle(&mut self, ctx: &mut C, message: &InboundMessage) -> Delivery {
        match &message.kind {
            InboundKind::Status(status) => {
                if self.apply_status(message.channel, status.clone()) {
                    Delivery::StatusChanged
                } else {
                    Delivery::Stale
                }
            }
            InboundKind::Broadcast { event, payload } => {
                let Some(active) = self.live_channel(message.channel) else {
                    debug!(event = %event, channel = %message.channel, "Dropping stale broadcast");
                    return Delivery::Stale;
                };
                if !self.state.is_active() {
                    debug!(event = %event, state = %self.state, "Dropping broadcast on inactive channel");
                    return Delivery::Stale;
                }
                debug!(topic = %active.handle.topic, event = %event, "Broadcast received");
                match active.dispatcher.dispatch(ctx, event, payload) {
                    DispatchOutcome::Handled => Delivery::Handled,
                    DispatchOutcome::Ignored => Delivery::Ignored,
                }
            }
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Message describing the last channel or authorisation failure.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// `true` only while the active channel is joined.
    pub fn is_subscribed(&self) -> bool {
        self.state == SubscriptionState::Joined
            && self.active.as_ref().is_some_and(|a| !a.cancel.is_cancelled())
    }

    pub fn topic(&self) -> Option<&Topic> {
        self.active.as_ref().map(|a| &a.handle.topic)
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.active.as_ref().map(|a| a.handle.id)
    }

    // -- internals ----------------------------------------------------------

    fn live_channel(&self, channel: ChannelId) -> Option<&ActiveChannel<C>> {
        self.active
            .as_ref()
            .filter(|a| a.handle.id == channel && !a.cancel.is_cancelled())
    }

    /// Applies a join outcome or status notice. Returns `false` when the
    /// notice is stale.
    fn apply_status(&mut self, channel: ChannelId, status: JoinStatus) -> bool {
        let Some(active) = self.live_channel(channel) else {
            debug!(channel = %channel, status = ?status, "Discarding stale channel status");
            return false;
        };
        let topic = active.handle.topic.clone();
        match status {
            JoinStatus::Subscribed => {
                info!(topic = %topic, "Subscribed");
                self.state = SubscriptionState::Joined;
                self.error = None;
            }
            JoinStatus::ChannelError { message } => {
                let message = message.unwrap_or_else(|| "Channel error".to_string());
                warn!(topic = %topic, error = %message, "Channel error");
                self.state = SubscriptionState::Errored;
                self.error = Some(message);
            }
            JoinStatus::TimedOut => {
                warn!(topic = %topic, "Join timed out");
                self.state = SubscriptionState::TimedOut;
                self.error = Some("Connection timed out".to_string());
            }
            JoinStatus::Closed => {
                info!(topic = %topic, "Channel closed");
                self.state = SubscriptionState::Closed;
            }
        }
        true
    }

    /// Tears down `channel` if it is still the active one.
    async fn abandon(&mut self, channel: ChannelId) {
        if self.active.as_ref().is_some_and(|a| a.handle.id == channel) {
            debug!(channel = %channel, "Subscription cancelled while joining");
            self.teardown().await;
        }
    }

    async fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            info!(topic = %active.handle.topic, channel = %active.handle.id, "Unsubscribing");
            self.transport.leave(&active.handle).await;
        }
        self.state = SubscriptionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::loopback::{LoopbackAuthorization, LoopbackTransport};
    use serde_json::{json, Value};

    type Seen = Vec<(String, Value)>;

    fn recorder() -> Arc<EventDispatcher<Seen>> {
        Arc::new(
            EventDispatcher::new()
                .on("ping", |seen: &mut Seen, p| seen.push(("ping".into(), p.clone()))),
        )
    }

    fn request(topic: &str) -> SubscriptionRequest<Seen> {
        SubscriptionRequest {
            topic: topic.to_string(),
            options: ChannelOptions::default(),
            dispatcher: recorder(),
        }
    }

    fn manager() -> (
        ChannelSubscriptionManager<Seen>,
        Arc<LoopbackTransport>,
        Arc<LoopbackAuthorization>,
    ) {
        let (transport, _inbound) = LoopbackTransport::new();
        let auth = Arc::new(LoopbackAuthorization::default());
        let manager = ChannelSubscriptionManager::new(transport.clone(), auth.clone());
        (manager, transport, auth)
    }

    fn broadcast(channel: ChannelId, event: &str) -> InboundMessage {
        InboundMessage {
            channel,
            kind: InboundKind::Broadcast {
                event: event.to_string(),
                payload: json!({ "n": 1 }),
            },
        }
    }

    #[tokio::test]
    async fn subscribe_joins_after_authorizing() {
        let (mut manager, transport, auth) = manager();
        let state = manager
            .subscribe(request("validator:s1"), CancellationToken::new())
            .await;
        assert_eq!(state, SubscriptionState::Joined);
        assert!(manager.is_subscribed());
        assert_eq!(auth.refresh_count(), 1);
        assert_eq!(transport.opened().len(), 1);
        assert_eq!(transport.configs()[0].events, vec!["ping".to_string()]);
    }

    #[tokio::test]
    async fn public_topics_skip_authorization() {
        let (mut manager, _transport, auth) = manager();
        let mut req = request("public:s1");
        req.options.private = false;
        manager.subscribe(req, CancellationToken::new()).await;
        assert_eq!(auth.refresh_count(), 0);
        assert!(manager.is_subscribed());
    }

    #[tokio::test]
    async fn repeated_subscribe_is_idempotent() {
        let (mut manager, transport, _auth) = manager();
        let cancel = CancellationToken::new();
        manager.subscribe(request("validator:s1"), cancel.clone()).await;
        manager.subscribe(request("validator:s1"), cancel).await;
        assert_eq!(transport.opened().len(), 1);
        assert!(transport.left().is_empty());
    }

    #[tokio::test]
    async fn new_topic_tears_down_previous_channel() {
        let (mut manager, transport, _auth) = manager();
        let cancel = CancellationToken::new();
        manager.subscribe(request("validator:s1"), cancel.clone()).await;
        let first = manager.channel_id().unwrap();
        manager.subscribe(request("validator:s2"), cancel).await;
        assert_eq!(transport.left(), vec![first]);
        assert_eq!(manager.topic().unwrap().as_str(), "validator:s2");
    }

    #[tokio::test]
    async fn empty_or_disabled_topic_tears_down_without_joining() {
        let (mut manager, transport, _auth) = manager();
        let cancel = CancellationToken::new();
        manager.subscribe(request("validator:s1"), cancel.clone()).await;

        let state = manager.subscribe(request(""), cancel.clone()).await;
        assert_eq!(state, SubscriptionState::Idle);
        assert_eq!(transport.left().len(), 1);

        let mut disabled = request("validator:s3");
        disabled.options.enabled = false;
        manager.subscribe(disabled, cancel).await;
        assert_eq!(transport.opened().len(), 1);
        assert_eq!(transport.join_requests().len(), 1);
    }

    #[tokio::test]
    async fn join_failures_are_recorded_as_state() {
        let (mut manager, transport, _auth) = manager();
        transport.script_join(JoinStatus::ChannelError {
            message: Some("RLS denied".into()),
        });
        let state = manager
            .subscribe(request("validator:s1"), CancellationToken::new())
            .await;
        assert_eq!(state, SubscriptionState::Errored);
        assert_eq!(manager.error(), Some("RLS denied"));
        assert!(!manager.is_subscribed());
    }

    #[tokio::test]
    async fn authorization_failure_prevents_join() {
        let (mut manager, transport, auth) = manager();
        auth.fail_with("token expired");
        let state = manager
            .subscribe(request("validator:s1"), CancellationToken::new())
            .await;
        assert_eq!(state, SubscriptionState::Errored);
        assert!(manager.error().unwrap().contains("token expired"));
        assert!(transport.join_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_join_times_out() {
        let (mut manager, transport, _auth) = manager();
        transport.set_join_delay(Duration::from_secs(60));
        let state = manager
            .subscribe(request("validator:s1"), CancellationToken::new())
            .await;
        assert_eq!(state, SubscriptionState::TimedOut);
        assert_eq!(manager.error(), Some("Connection timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_while_joining_discards_the_channel() {
        let (mut manager, transport, _auth) = manager();
        transport.set_join_delay(Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let state = manager.subscribe(request("validator:s1"), cancel).await;
        assert_eq!(state, SubscriptionState::Idle);
        assert_eq!(transport.left().len(), 1);
        assert!(manager.channel_id().is_none());
    }

    #[tokio::test]
    async fn unsubscribe_is_safe_when_idle() {
        let (mut manager, transport, _auth) = manager();
        manager.unsubscribe().await;
        manager.unsubscribe().await;
        assert_eq!(manager.state(), SubscriptionState::Idle);
        assert!(transport.left().is_empty());
    }

    #[tokio::test]
    async fn broadcasts_route_only_for_the_active_channel() {
        let (mut manager, _transport, _auth) = manager();
        let cancel = CancellationToken::new();
        manager.subscribe(request("validator:s1"), cancel.clone()).await;
        let old = manager.channel_id().unwrap();
        manager.subscribe(request("validator:s2"), cancel).await;
        let current = manager.channel_id().unwrap();

        let mut seen = Seen::new();
        assert_eq!(manager.handle(&mut seen, &broadcast(old, "ping")), Delivery::Stale);
        assert_eq!(
            manager.handle(&mut seen, &broadcast(current, "ping")),
            Delivery::Handled
        );
        assert_eq!(
            manager.handle(&mut seen, &broadcast(current, "unknown")),
            Delivery::Ignored
        );
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn stale_status_notices_are_discarded() {
        let (mut manager, _transport, _auth) = manager();
        let cancel = CancellationToken::new();
        manager.subscribe(request("validator:s1"), cancel.clone()).await;
        let old = manager.channel_id().unwrap();
        manager.subscribe(request("validator:s2"), cancel).await;

        let notice = InboundMessage {
            channel: old,
            kind: InboundKind::Status(JoinStatus::Closed),
        };
        assert_eq!(manager.handle(&mut Seen::new(), &notice), Delivery::Stale);
        assert_eq!(manager.state(), SubscriptionState::Joined);
    }

    #[tokio::test]
    async fn closed_notice_disconnects_and_reconnect_rejoins() {
        let (mut manager, transport, _auth) = manager();
        let cancel = CancellationToken::new();
        manager.subscribe(request("validator:s1"), cancel.clone()).await;
        let channel = manager.channel_id().unwrap();
        let closed = InboundMessage {
            channel,
            kind: InboundKind::Status(JoinStatus::Closed),
        };
        assert_eq!(
            manager.handle(&mut Seen::new(), &closed),
            Delivery::StatusChanged
        );
        assert_eq!(manager.state(), SubscriptionState::Closed);
        assert_eq!(
            manager.handle(&mut Seen::new(), &broadcast(channel, "ping")),
            Delivery::Stale
        );

        let state = manager.reconnect(cancel).await;
        assert_eq!(state, SubscriptionState::Joined);
        assert_eq!(transport.opened().len(), 2);
        assert_eq!(transport.left(), vec![channel]);
    }

    #[tokio::test]
    async fn reconnect_without_history_is_a_no_op() {
        let (mut manager, transport, _auth) = manager();
        let state = manager.reconnect(CancellationToken::new()).await;
        assert_eq!(state, SubscriptionState::Idle);
        assert!(transport.opened().is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_stops_delivery_immediately() {
        let (mut manager, _transport, _auth) = manager();
        let cancel = CancellationToken::new();
        manager.subscribe(request("validator:s1"), cancel.clone()).await;
        let channel = manager.channel_id().unwrap();
        cancel.cancel();
        assert!(!manager.is_subscribed());
        assert_eq!(
            manager.handle(&mut Seen::new(), &broadcast(channel, "ping")),
            Delivery::Stale
        );
    }
}
