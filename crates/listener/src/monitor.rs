//! Live monitoring of one pipeline session.
//!
//! [`PipelineMonitor`] composes the pieces of this crate around a single
//! [`PipelineStateMachine`]:
//!
//! | Piece | Role |
//! |-------|------|
//! | [`ChannelSubscriptionManager`] | joins `{scope}:{sessionId}` and routes broadcasts |
//! | [`EventDispatcher::pipeline`] | decodes broadcasts into state-machine input |
//! | [`PollingFallback`] | asks the system of record when the channel stays silent |
//! | [`ReconnectBackoff`] | paces automatic reconnects in [`PipelineMonitor::run`] |
//!
//! After every mutation the monitor publishes a fresh [`PipelineSnapshot`] on a
//! `watch` channel and forwards queued [`PipelineNotification`]s on an `mpsc`
//! channel. Consumers never touch the state machine directly.
//!
//! The monitor can be driven step by step (`watch_session`, `handle_message`,
//! `poll_fallback`) or handed to [`PipelineMonitor::run`], which multiplexes
//! inbound traffic, caller commands, the polling timer and the reconnect timer
//! on one task until cancelled.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use pipeline::{
    project, AuthorizationProvider, EventDispatcher, InboundMessage, PipelineNotification,
    PipelineSnapshot, PipelineStateMachine, PipelineStatus, RealtimeTransport, SessionId,
    SubscriptionState, SystemOfRecord, Topic,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backoff::ReconnectBackoff;
use crate::config::MonitorConfig;
use crate::fallback::PollingFallback;
use crate::subscription::{ChannelSubscriptionManager, Delivery, SubscriptionRequest};

/// Receiving ends handed out by [`PipelineMonitor::new`].
pub struct MonitorChannels {
    /// Always holds the latest snapshot.
    pub snapshots: watch::Receiver<PipelineSnapshot>,
    /// Completion, failure and follow-up notifications, in order.
    pub notifications: mpsc::UnboundedReceiver<PipelineNotification>,
}

/// Instructions accepted by [`PipelineMonitor::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorCommand {
    /// Switch to another session, or to none.
    WatchSession(Option<SessionId>),
    /// Tear down and rejoin the current topic.
    Reconnect,
    /// Leave the current topic and stay disconnected.
    Unsubscribe,
}

/// Watches one session at a time and keeps its snapshot current.
pub struct PipelineMonitor {
    config: MonitorConfig,
    machine: PipelineStateMachine,
    channel: ChannelSubscriptionManager<PipelineStateMachine>,
    dispatcher: Arc<EventDispatcher<PipelineStateMachine>>,
    fallback: Option<PollingFallback>,
    backoff: Option<ReconnectBackoff>,
    session_started: Instant,
    snapshots: watch::Sender<PipelineSnapshot>,
    notifications: mpsc::UnboundedSender<PipelineNotification>,
}

impl PipelineMonitor {
    /// Creates a monitor with no session.
    ///
    /// Polling is enabled only when both `config.fallback` and `store` are
    /// present.
    pub fn new(
        config: MonitorConfig,
        transport: Arc<dyn RealtimeTransport>,
        auth: Arc<dyn AuthorizationProvider>,
        store: Option<Arc<dyn SystemOfRecord>>,
    ) -> (Self, MonitorChannels) {
        let machine = PipelineStateMachine::new(config.roster.clone());
        let (snapshots, snapshot_rx) = watch::channel(project(&machine, false));
        let (notifications, notification_rx) = mpsc::unbounded_channel();
        let fallback = match (store, config.fallback.clone()) {
            (Some(store), Some(fallback)) => Some(PollingFallback::new(store, fallback)),
            _ => None,
        };
        let backoff = config.reconnect.clone().map(ReconnectBackoff::new);
        let monitor = Self {
            config,
            machine,
            channel: ChannelSubscriptionManager::new(transport, auth),
            dispatcher: Arc::new(EventDispatcher::pipeline()),
            fallback,
            backoff,
            session_started: Instant::now(),
            snapshots,
            notifications,
        };
        let channels = MonitorChannels {
            snapshots: snapshot_rx,
            notifications: notification_rx,
        };
        (monitor, channels)
    }

    /// Switches to `session` and subscribes to its topic.
    ///
    /// A different session resets all pipeline state before anything else,
    /// and the reset snapshot is published before the join starts. `None`
    /// tears down the subscription.
    pub async fn watch_session(
        &mut self,
        session: Option<SessionId>,
        cancel: &CancellationToken,
    ) -> SubscriptionState {
        if self.machine.observe_session(session.clone()) {
            self.session_started = Instant::now();
            if let Some(backoff) = &mut self.backoff {
                backoff.reset();
            }
        }
        self.publish();

        let topic = session
            .as_ref()
            .and_then(|s| Topic::for_session(&self.config.scope, s))
            .map(|t| t.to_string())
            .unwrap_or_default();
        let request = SubscriptionRequest {
            topic,
            options: self.config.channel.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
        };
        let state = self.channel.subscribe(request, cancel.clone()).await;
        self.after_join(state);
        state
    }

    /// Routes one inbound message and publishes the result.
    pub fn handle_message(&mut self, message: &InboundMessage) -> Delivery {
        let delivery = self.channel.handle(&mut self.machine, message);
        match delivery {
            Delivery::Stale => trace!(channel = %message.channel, "Stale message dropped"),
            Delivery::StatusChanged => self.after_join(self.channel.state()),
            Delivery::Handled | Delivery::Ignored => self.publish(),
        }
        delivery
    }

    /// Tears down and rejoins the current topic.
    pub async fn reconnect(&mut self, cancel: &CancellationToken) -> SubscriptionState {
        let state = self.channel.reconnect(cancel.clone()).await;
        self.after_join(state);
        state
    }

    /// Leaves the current topic. The pipeline state is kept.
    pub async fn unsubscribe(&mut self) {
        self.channel.unsubscribe().await;
        self.publish();
    }

    /// Polls the system of record once if the fallback says a poll is due.
    ///
    /// Returns `true` when a terminal persisted status was applied.
    pub async fn poll_fallback(&mut self) -> bool {
        let Some(fallback) = &self.fallback else {
            return false;
        };
        let snapshot = project(&self.machine, self.channel.is_subscribed());
        if !fallback.should_poll(&snapshot, self.session_started.elapsed()) {
            return false;
        }
        debug!("Channel silent; polling system of record");
        self.poll_now().await
    }

    /// Polls the system of record immediately, ignoring the silence threshold.
    ///
    /// Only a `running` pipeline for a watched session is polled. Returns
    /// `true` when a terminal persisted status was applied.
    pub async fn poll_now(&mut self) -> bool {
        let Some(fallback) = &self.fallback else {
            return false;
        };
        if self.machine.pipeline_status() != PipelineStatus::Running {
            return false;
        }
        let Some(session) = self.machine.session().cloned() else {
            return false;
        };
        debug!(session = %session, "Polling system of record");
        match fallback.poll(&session).await {
            Some(outcome) => {
                self.machine.apply_polled(outcome.status, outcome.artifact);
                self.publish();
                true
            }
            None => false,
        }
    }

    /// Current state as a snapshot.
    pub fn snapshot(&self) -> PipelineSnapshot {
        project(&self.machine, self.channel.is_subscribed())
    }

    pub fn machine(&self) -> &PipelineStateMachine {
        &self.machine
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.channel.state()
    }

    pub fn subscription_error(&self) -> Option<&str> {
        self.channel.error()
    }

    /// Runs until `cancel` fires or the inbound stream ends.
    ///
    /// Each iteration waits for whichever comes first: an inbound message, a
    /// command, a fallback poll tick, or a pending reconnect. A subscription
    /// left `errored`, `timed_out` or `closed` schedules a reconnect when a
    /// back-off policy is configured; once its budget is spent the monitor
    /// stays disconnected until the next successful join or session change.
    ///
    /// Leaves the topic on exit and returns the final snapshot.
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
        mut commands: mpsc::UnboundedReceiver<MonitorCommand>,
        cancel: CancellationToken,
    ) -> PipelineSnapshot {
        let mut ticker = self.fallback.as_ref().map(|f| {
            let mut ticker = interval(f.config().poll_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        let mut retry: Option<Pin<Box<Sleep>>> = None;
        let mut gave_up = false;
        let mut commands_open = true;

        loop {
            if self.channel.state() == SubscriptionState::Joined {
                gave_up = false;
            }
            if retry.is_none() && !gave_up && self.needs_reconnect() {
                match self.backoff.as_mut().and_then(ReconnectBackoff::next_delay) {
                    Some(delay) => {
                        debug!(delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
                        retry = Some(Box::pin(sleep(delay)));
                    }
                    None => {
                        warn!(
                            state = %self.channel.state(),
                            "Reconnect attempts exhausted; staying disconnected"
                        );
                        gave_up = true;
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Monitor cancelled");
                    break;
                }
                message = inbound.recv() => match message {
                    Some(message) => {
                        self.handle_message(&message);
                    }
                    None => {
                        info!("Inbound stream closed; stopping monitor");
                        break;
                    }
                },
                command = commands.recv(), if commands_open => match command {
                    Some(MonitorCommand::WatchSession(session)) => {
                        retry = None;
                        gave_up = false;
                        self.watch_session(session, &cancel).await;
                    }
                    Some(MonitorCommand::Reconnect) => {
                        retry = None;
                        gave_up = false;
                        self.reconnect(&cancel).await;
                    }
                    Some(MonitorCommand::Unsubscribe) => {
                        retry = None;
                        self.unsubscribe().await;
                    }
                    None => commands_open = false,
                },
                _ = next_tick(&mut ticker) => {
                    self.poll_fallback().await;
                }
                _ = until_retry(&mut retry) => {
                    retry = None;
                    self.reconnect(&cancel).await;
                }
            }
        }

        self.unsubscribe().await;
        self.snapshot()
    }

    // -- internals ----------------------------------------------------------

    fn needs_reconnect(&self) -> bool {
        self.backoff.is_some()
            && self.machine.session().is_some()
            && matches!(
                self.channel.state(),
                SubscriptionState::Errored | SubscriptionState::TimedOut | SubscriptionState::Closed
            )
    }

    fn after_join(&mut self, state: SubscriptionState) {
        if state == SubscriptionState::Joined {
            if let Some(backoff) = &mut self.backoff {
                backoff.reset();
            }
        }
        self.publish();
    }

    fn publish(&mut self) {
        for notification in self.machine.take_notifications() {
            if self.notifications.send(notification).is_err() {
                trace!("No notification receiver");
            }
        }
        self.snapshots.send_replace(self.snapshot());
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn until_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(delay) => delay.as_mut().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::BackoffConfig;
    use crate::loopback::{InMemorySystemOfRecord, LoopbackAuthorization, LoopbackTransport};
    use pipeline::{ArtifactRecord, CorrelationId, JoinStatus, PipelineStatus, Score};
    use serde_json::json;

    fn session(id: &str) -> SessionId {
        SessionId::new(id).unwrap()
    }

    struct Harness {
        monitor: PipelineMonitor,
        channels: MonitorChannels,
        transport: Arc<LoopbackTransport>,
        inbound: mpsc::UnboundedReceiver<InboundMessage>,
        store: Arc<InMemorySystemOfRecord>,
    }

    fn harness(config: MonitorConfig) -> Harness {
        let (transport, inbound) = LoopbackTransport::new();
        let store = Arc::new(InMemorySystemOfRecord::default());
        let (monitor, channels) = PipelineMonitor::new(
            config,
            transport.clone(),
            Arc::new(LoopbackAuthorization::default()),
            Some(store.clone()),
        );
        Harness {
            monitor,
            channels,
            transport,
            inbound,
            store,
        }
    }

    #[tokio::test]
    async fn watching_a_session_joins_its_topic() {
        let mut h = harness(MonitorConfig::default());
        let state = h
            .monitor
            .watch_session(Some(session("s1")), &CancellationToken::new())
            .await;
        assert_eq!(state, SubscriptionState::Joined);
        assert_eq!(h.transport.opened()[0].topic.as_str(), "validator:s1");
        let snapshot = h.channels.snapshots.borrow().clone();
        assert!(snapshot.is_connected);
        assert_eq!(snapshot.session_id, Some(session("s1")));
        assert!(snapshot.is_silent());
    }

    #[tokio::test]
    async fn inbound_broadcasts_update_the_published_snapshot() {
        let mut h = harness(MonitorConfig::default());
        h.monitor
            .watch_session(Some(session("s1")), &CancellationToken::new())
            .await;
        let topic = Topic::new("validator:s1").unwrap();
        h.transport
            .broadcast(&topic, "agent_started", json!({ "agent": "ExtractorAgent" }));
        let message = h.inbound.recv().await.unwrap();
        assert_eq!(h.monitor.handle_message(&message), Delivery::Handled);

        let snapshot = h.channels.snapshots.borrow().clone();
        assert_eq!(snapshot.event_count, 1);
        assert_eq!(snapshot.last_event_name.as_deref(), Some("agent_started"));
    }

    #[tokio::test]
    async fn closing_the_channel_marks_the_snapshot_disconnected() {
        let mut h = harness(MonitorConfig::default());
        h.monitor
            .watch_session(Some(session("s1")), &CancellationToken::new())
            .await;
        let channel = h.transport.opened()[0].id;
        h.transport.notify_status(channel, JoinStatus::Closed);
        let message = h.inbound.recv().await.unwrap();
        assert_eq!(h.monitor.handle_message(&message), Delivery::StatusChanged);
        assert!(!h.channels.snapshots.borrow().is_connected);
        assert_eq!(h.monitor.subscription_state(), SubscriptionState::Closed);
    }

    #[tokio::test]
    async fn switching_sessions_publishes_a_reset_snapshot() {
        let mut h = harness(MonitorConfig::default());
        let cancel = CancellationToken::new();
        h.monitor.watch_session(Some(session("s1")), &cancel).await;
        let topic = Topic::new("validator:s1").unwrap();
        h.transport.broadcast(
            &topic,
            "agent_completed",
            json!({ "agent": "ExtractorAgent", "durationMs": 100 }),
        );
        let message = h.inbound.recv().await.unwrap();
        h.monitor.handle_message(&message);
        assert_eq!(h.monitor.snapshot().progress, 14);

        h.monitor.watch_session(Some(session("s2")), &cancel).await;
        let snapshot = h.channels.snapshots.borrow().clone();
        assert_eq!(snapshot.progress, 0);
        assert_eq!(snapshot.event_count, 0);
        assert_eq!(h.transport.left().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_is_not_due_before_the_silence_threshold() {
        let mut h = harness(MonitorConfig::default());
        h.store.set_session_status(session("s1"), "failed");
        h.monitor
            .watch_session(Some(session("s1")), &CancellationToken::new())
            .await;
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!h.monitor.poll_fallback().await);
        assert_eq!(h.store.query_count(), 0);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(h.monitor.poll_fallback().await);
        assert_eq!(h.monitor.snapshot().pipeline_status, PipelineStatus::Failed);
        assert!(matches!(
            h.channels.notifications.try_recv(),
            Ok(PipelineNotification::Failed(_))
        ));
    }

    #[tokio::test]
    async fn immediate_poll_ignores_the_silence_threshold() {
        let mut h = harness(MonitorConfig::default());
        h.store.set_session_status(session("s1"), "complete");
        h.store.insert_artifact(
            session("s1"),
            ArtifactRecord {
                id: CorrelationId::new("r1").unwrap(),
                score: Score::new(82.0),
            },
        );
        assert!(!h.monitor.poll_now().await);

        h.monitor
            .watch_session(Some(session("s1")), &CancellationToken::new())
            .await;
        assert!(h.monitor.poll_now().await);
        let snapshot = h.monitor.snapshot();
        assert_eq!(snapshot.pipeline_status, PipelineStatus::Complete);
        assert_eq!(snapshot.correlation_id.unwrap().as_str(), "r1");
        assert!(matches!(
            h.channels.notifications.try_recv(),
            Ok(PipelineNotification::Completed(_))
        ));

        assert!(!h.monitor.poll_now().await);
        assert_eq!(h.store.query_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_falls_back_to_polling_a_silent_channel() {
        let Harness {
            monitor,
            mut channels,
            inbound,
            store,
            ..
        } = harness(MonitorConfig::default());
        store.set_session_status(session("s1"), "complete");
        store.insert_artifact(
            session("s1"),
            ArtifactRecord {
                id: CorrelationId::new("r1").unwrap(),
                score: Score::new(82.0),
            },
        );
        let (commands, command_rx) = mpsc::unbounded_channel();
        commands
            .send(MonitorCommand::WatchSession(Some(session("s1"))))
            .unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor.run(inbound, command_rx, cancel.clone()));

        let notification = channels.notifications.recv().await.unwrap();
        let PipelineNotification::Completed(outcome) = notification else {
            panic!("expected completion, got {notification:?}");
        };
        assert_eq!(outcome.correlation_id.unwrap().as_str(), "r1");

        cancel.cancel();
        let last = task.await.unwrap();
        assert_eq!(last.pipeline_status, PipelineStatus::Complete);
        assert_eq!(last.score, Score::new(82.0));
        assert_eq!(last.event_count, 0);
        assert!(!last.is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_reconnects_with_backoff() {
        let config = MonitorConfig {
            reconnect: Some(BackoffConfig::default()),
            fallback: None,
            ..MonitorConfig::default()
        };
        let Harness {
            monitor,
            mut channels,
            transport,
            inbound,
            ..
        } = harness(config);
        transport.script_join(JoinStatus::ChannelError { message: None });
        transport.script_join(JoinStatus::TimedOut);
        let (commands, command_rx) = mpsc::unbounded_channel();
        commands
            .send(MonitorCommand::WatchSession(Some(session("s1"))))
            .unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor.run(inbound, command_rx, cancel.clone()));

        channels
            .snapshots
            .wait_for(|s| s.is_connected)
            .await
            .unwrap();
        assert_eq!(transport.join_requests().len(), 3);
        assert_eq!(transport.live_channels().len(), 1);

        cancel.cancel();
        task.await.unwrap();
        assert!(transport.live_channels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_gives_up_after_the_attempt_budget() {
        let config = MonitorConfig {
            reconnect: Some(BackoffConfig {
                max_attempts: 2,
                ..BackoffConfig::default()
            }),
            fallback: None,
            ..MonitorConfig::default()
        };
        let Harness {
            monitor,
            transport,
            inbound,
            ..
        } = harness(config);
        for _ in 0..4 {
            transport.script_join(JoinStatus::ChannelError {
                message: Some("denied".into()),
            });
        }
        let (commands, command_rx) = mpsc::unbounded_channel();
        commands
            .send(MonitorCommand::WatchSession(Some(session("s1"))))
            .unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor.run(inbound, command_rx, cancel.clone()));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(transport.join_requests().len(), 3);

        cancel.cancel();
        let last = task.await.unwrap();
        assert!(!last.is_connected);
    }
}
