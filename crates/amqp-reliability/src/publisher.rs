//! Confirm-tracked publishing on one channel.

use crate::completion::{Deferred, OneshotDeferred, Promise};
use crate::confirm_tracker::ConfirmTracker;
use crate::error::{PublishError, TransportError};
use crate::message::PublishCommand;
use crate::transport::{AmqpChannel, ConfirmEvent, ConfirmListener};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters describing a publisher's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublisherStats {
    /// Frames handed to the transport.
    pub published: u64,
    /// Publications resolved by a broker ack.
    pub confirmed: u64,
    /// Publications resolved by a broker nack.
    pub rejected: u64,
    /// Publications whose send failed synchronously.
    pub send_failures: u64,
    /// Publications failed because the channel closed first.
    pub orphaned: u64,
    /// Confirm events that matched nothing.
    pub unattributed: u64,
}

/// State guarded by the channel lock.
struct ChannelState<P: Promise> {
    tracker: ConfirmTracker<P>,
    closed: Option<String>,
    stats: PublisherStats,
}

struct Shared<P: Promise> {
    channel_id: u16,
    state: Mutex<ChannelState<P>>,
}

impl<P: Promise> Shared<P> {
    fn apply(&self, event: ConfirmEvent) {
        let mut state = self.state.lock();
        match event {
            ConfirmEvent::Accepted { sequence, multiple } => {
                let resolved = state.tracker.resolve_accepted(sequence, multiple) as u64;
                if resolved == 0 {
                    state.stats.unattributed += 1;
                }
                state.stats.confirmed += resolved;
                debug!(
                    channel = self.channel_id,
                    sequence,
                    multiple,
                    resolved,
                    "Broker confirmed"
                );
            }
            ConfirmEvent::Rejected { sequence, multiple } => {
                let resolved = state.tracker.resolve_rejected(sequence, multiple) as u64;
                if resolved == 0 {
                    state.stats.unattributed += 1;
                }
                state.stats.rejected += resolved;
            }
            ConfirmEvent::ChannelClosed { reason } => {
                self.close_locked(&mut state, reason);
            }
        }
    }

    fn close_locked(&self, state: &mut ChannelState<P>, reason: String) {
        if state.closed.is_some() {
            return;
        }
        let orphaned = state.tracker.fail_all(&reason) as u64;
        state.stats.orphaned += orphaned;
        info!(
            channel = self.channel_id,
            reason = %reason,
            orphaned,
            "Channel closed, failed outstanding publications"
        );
        state.closed = Some(reason);
    }
}

/// Routes confirm events from the transport into the shared state.
struct TrackerListener<P: Promise> {
    shared: Arc<Shared<P>>,
}

impl<P: Promise> ConfirmListener for TrackerListener<P> {
    fn on_event(&self, event: ConfirmEvent) {
        self.shared.apply(event);
    }
}

/// Publishes on one channel and tracks every publication until the broker
/// confirms or rejects it.
///
/// Obtaining the sequence number, registering the promise and calling the
/// send primitive happen under a single lock, the same lock confirm events
/// take, so a confirm can never be processed before its registration.
/// Promises are completed while that lock is held; a [`Promise`]
/// implementation must not block or publish from `complete`.
pub struct Publisher<C: AmqpChannel, D: Deferred = OneshotDeferred> {
    channel: Arc<C>,
    deferred: D,
    shared: Arc<Shared<D::Promise>>,
}

impl<C: AmqpChannel> Publisher<C, OneshotDeferred> {
    /// Publisher handing out [`CompletionHandle`](crate::CompletionHandle)s.
    pub fn open(channel: Arc<C>) -> Result<Self, TransportError> {
        Self::new(channel, OneshotDeferred)
    }
}

impl<C: AmqpChannel, D: Deferred> Publisher<C, D> {
    /// Put the channel in confirm mode and start tracking.
    pub fn new(channel: Arc<C>, deferred: D) -> Result<Self, TransportError> {
        let shared = Arc::new(Shared {
            channel_id: channel.channel_id(),
            state: Mutex::new(ChannelState {
                tracker: ConfirmTracker::new(),
                closed: None,
                stats: PublisherStats::default(),
            }),
        });

        channel.register_confirm_listener(Arc::new(TrackerListener {
            shared: shared.clone(),
        }))?;

        info!(channel = shared.channel_id, "Publisher confirm mode enabled");

        Ok(Self {
            channel,
            deferred,
            shared,
        })
    }

    /// Publish a message. Returns immediately; the handle resolves once the
    /// broker confirms or rejects, or right away if the send itself fails.
    pub fn publish(&self, command: PublishCommand) -> D::Handle {
        let (promise, handle) = self.deferred.deferred();
        let mut state = self.shared.state.lock();

        if let Some(reason) = state.closed.clone() {
            drop(state);
            debug!(
                channel = self.shared.channel_id,
                exchange = %command.exchange(),
                "Publish on closed channel"
            );
            promise.complete(Err(PublishError::ChannelClosed(reason)));
            return handle;
        }

        let sequence = self.channel.next_sequence_number();
        if let Err(promise) = state.tracker.register(sequence, promise) {
            drop(state);
            promise.complete(Err(PublishError::DuplicateSequence(sequence)));
            return handle;
        }

        let sent = self.channel.send_raw(
            command.exchange(),
            command.routing_key(),
            command.properties(),
            command.payload(),
        );

        match sent {
            Ok(()) => {
                state.stats.published += 1;
                debug!(
                    channel = self.shared.channel_id,
                    sequence,
                    exchange = %command.exchange(),
                    routing_key = %command.routing_key(),
                    payload_len = command.payload().len(),
                    "Published"
                );
            }
            Err(e) => {
                state.stats.send_failures += 1;
                let promise = state.tracker.remove(sequence);
                drop(state);
                warn!(
                    channel = self.shared.channel_id,
                    sequence,
                    exchange = %command.exchange(),
                    routing_key = %command.routing_key(),
                    error = %e,
                    "Send failed"
                );
                if let Some(promise) = promise {
                    promise.complete(Err(PublishError::Transport(e)));
                }
            }
        }

        handle
    }

    /// Fail every outstanding publication and refuse new ones.
    ///
    /// Used when the application tears the channel down itself; a close
    /// reported by the transport has the same effect.
    pub fn close(&self, reason: impl Into<String>) {
        let mut state = self.shared.state.lock();
        self.shared.close_locked(&mut state, reason.into());
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed.is_some()
    }

    /// Number of publications awaiting a confirm.
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().tracker.len()
    }

    /// Outstanding sequence numbers in ascending order.
    pub fn pending_sequences(&self) -> Vec<u64> {
        self.shared.state.lock().tracker.pending_sequences()
    }

    pub fn stats(&self) -> PublisherStats {
        self.shared.state.lock().stats
    }

    pub fn channel(&self) -> &Arc<C> {
        &self.channel
    }
}
