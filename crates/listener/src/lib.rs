//! Realtime subscription infrastructure for pipeline monitoring.
//!
//! The [`pipeline`] crate defines what a pipeline *is*; this crate keeps a
//! live view of one running. It joins the session's topic through a
//! [`pipeline::RealtimeTransport`], feeds decoded events into a
//! [`pipeline::PipelineStateMachine`], and publishes snapshots to consumers.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`subscription`] | Join/leave lifecycle of one topic, stale-notice filtering |
//! | [`monitor`] | Session-level composition, snapshot publishing, run loop |
//! | [`fallback`] | Polling the system of record when the channel is silent |
//! | [`backoff`] | Caller-owned reconnect pacing |
//! | [`config`] | JSON configuration with per-field defaults |
//! | [`loopback`] | In-process transport, authorisation and store |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Timers, channels and transport wiring live here. The
//! [`pipeline`] crate sees only its own ports and never spawns or sleeps.
//!
//! ## Failure model
//!
//! Channel and authorisation failures are state, not errors: they surface as
//! [`pipeline::SubscriptionState`] plus a message, and recovery is driven by the
//! caller (or by [`PipelineMonitor::run`] when a back-off policy is set).
//! [`ListenerError`] covers configuration loading only.

pub mod backoff;
pub mod config;
pub mod errors;
pub mod fallback;
pub mod loopback;
pub mod monitor;
pub mod subscription;

pub use backoff::ReconnectBackoff;
pub use config::{BackoffConfig, ChannelOptions, FallbackConfig, MonitorConfig};
pub use errors::ListenerError;
pub use fallback::{PolledOutcome, PollingFallback};
pub use loopback::{InMemorySystemOfRecord, LoopbackAuthorization, LoopbackTransport};
pub use monitor::{MonitorChannels, MonitorCommand, PipelineMonitor};
pub use subscription::{ChannelSubscriptionManager, Delivery, SubscriptionRequest};
