//! Consumer dispatch with exactly-once acknowledgment.
//!
//! Each delivery moves through `Received -> HandlerRunning -> (Resolved |
//! HandlerFailed) -> Acknowledged`. The handler returns an asynchronous
//! [`AckAction`]; a failure or panic anywhere in the handler is replaced by
//! the configured default action. The acknowledgment call is issued from a
//! one-shot continuation, so a delivery is acknowledged at most once, and a
//! delivery tag that is already in flight is dropped.

use crate::action::AckAction;
use crate::config::ConsumerConfig;
use crate::effect::{panic_message, Effect};
use crate::error::{ReliabilityResult, TransportError};
use crate::message::Delivery;
use crate::transport::{AmqpChannel, DeliveryListener, RawDelivery};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Per-subscription counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub delivered: u64,
    pub accepted: u64,
    pub rejected_discard: u64,
    pub rejected_requeue: u64,
    /// Handlers that failed or panicked and fell back to the default action.
    pub handler_failures: u64,
    /// Ack or nack calls the transport refused.
    pub ack_failures: u64,
    /// Deliveries dropped because their tag was already in flight.
    pub duplicates: u64,
}

#[derive(Debug, Default)]
struct DispatchState {
    in_flight: HashSet<u64>,
    stats: DispatcherStats,
}

/// Issue the single acknowledgment call for `action`.
fn acknowledge<C: AmqpChannel>(
    channel: &C,
    state: &Mutex<DispatchState>,
    consumer_tag: &str,
    delivery_tag: u64,
    action: AckAction,
) {
    let result = match action.requeue() {
        None => channel.ack(delivery_tag, false),
        Some(requeue) => channel.nack(delivery_tag, false, requeue),
    };

    let mut state = state.lock();
    state.in_flight.remove(&delivery_tag);
    match result {
        Ok(()) => {
            match action {
                AckAction::Accept => state.stats.accepted += 1,
                AckAction::RejectDiscard => state.stats.rejected_discard += 1,
                AckAction::RejectRequeue => state.stats.rejected_requeue += 1,
            }
            debug!(consumer_tag, delivery_tag, action = %action, "Acknowledged delivery");
        }
        Err(e) => {
            state.stats.ack_failures += 1;
            error!(
                consumer_tag,
                delivery_tag,
                action = %action,
                error = %e,
                "Failed to acknowledge delivery"
            );
        }
    }
}

/// Delivery listener installed on the transport for one consumer.
struct DispatchListener<C, E, H> {
    channel: Arc<C>,
    effect: E,
    handler: H,
    default_failure_action: AckAction,
    consumer_tag: Arc<str>,
    state: Arc<Mutex<DispatchState>>,
}

impl<C, E, H> DispatchListener<C, E, H>
where
    C: AmqpChannel,
    E: Effect,
    H: Fn(Delivery) -> E::Of<AckAction> + Send + Sync + 'static,
{
    /// Run the handler, turning a panic in the synchronous part into a
    /// failed result.
    fn run_handler(&self, delivery: Delivery) -> E::Of<AckAction> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(delivery))) {
            Ok(outcome) => outcome,
            Err(payload) => E::fail(anyhow::anyhow!(
                "handler panicked: {}",
                panic_message(payload)
            )),
        }
    }
}

impl<C, E, H> DeliveryListener for DispatchListener<C, E, H>
where
    C: AmqpChannel,
    E: Effect,
    H: Fn(Delivery) -> E::Of<AckAction> + Send + Sync + 'static,
{
    fn on_delivery(&self, raw: RawDelivery) {
        let delivery_tag = raw.delivery_tag;
        {
            let mut state = self.state.lock();
            if !state.in_flight.insert(delivery_tag) {
                state.stats.duplicates += 1;
                warn!(
                    consumer_tag = %self.consumer_tag,
                    delivery_tag,
                    "Delivery tag already in flight, dropping duplicate"
                );
                return;
            }
            state.stats.delivered += 1;
        }

        debug!(
            consumer_tag = %self.consumer_tag,
            delivery_tag,
            redelivered = raw.envelope.redelivered,
            body_len = raw.body.len(),
            "Received delivery"
        );

        let outcome = self.run_handler(Delivery::from(raw));

        let fallback = self.default_failure_action;
        let state = self.state.clone();
        let consumer_tag = self.consumer_tag.clone();
        let decided = E::map(E::attempt(outcome), move |result| match result {
            Ok(action) => action,
            Err(e) => {
                state.lock().stats.handler_failures += 1;
                warn!(
                    consumer_tag = %consumer_tag,
                    delivery_tag,
                    error = %e,
                    fallback = %fallback,
                    "Handler failed, applying default action"
                );
                fallback
            }
        });

        let channel = self.channel.clone();
        let state = self.state.clone();
        let consumer_tag = self.consumer_tag.clone();
        let acked = E::map(decided, move |action| {
            acknowledge(&*channel, &state, &consumer_tag, delivery_tag, action)
        });

        self.effect.spawn(acked);
    }
}

/// Subscribes handlers to queues on one channel.
pub struct ConsumerDispatcher<C: AmqpChannel, E: Effect> {
    channel: Arc<C>,
    effect: E,
}

impl<C: AmqpChannel, E: Effect> ConsumerDispatcher<C, E> {
    pub fn new(channel: Arc<C>, effect: E) -> Self {
        Self { channel, effect }
    }

    /// Start consuming `queue` with manual acknowledgment.
    ///
    /// `prefetch_count` is applied to the channel before subscribing.
    pub fn consume<H>(
        &self,
        queue: &str,
        handler: H,
        default_failure_action: AckAction,
        prefetch_count: u16,
    ) -> ReliabilityResult<Subscription<C>>
    where
        H: Fn(Delivery) -> E::Of<AckAction> + Send + Sync + 'static,
    {
        let config = ConsumerConfig::default()
            .with_prefetch_count(prefetch_count)
            .with_failure_action(default_failure_action);
        self.consume_with_config(queue, handler, &config)
    }

    pub fn consume_with_config<H>(
        &self,
        queue: &str,
        handler: H,
        config: &ConsumerConfig,
    ) -> ReliabilityResult<Subscription<C>>
    where
        H: Fn(Delivery) -> E::Of<AckAction> + Send + Sync + 'static,
    {
        self.channel.set_prefetch(config.prefetch_count)?;

        let consumer_tag: Arc<str> = Arc::from(config.consumer_tag());
        let state = Arc::new(Mutex::new(DispatchState::default()));

        let listener = Arc::new(DispatchListener {
            channel: self.channel.clone(),
            effect: self.effect.clone(),
            handler,
            default_failure_action: config.default_failure_action,
            consumer_tag: consumer_tag.clone(),
            state: state.clone(),
        });

        self.channel
            .subscribe(queue, false, &consumer_tag, listener)?;

        info!(
            channel = self.channel.channel_id(),
            queue,
            consumer_tag = %consumer_tag,
            prefetch = config.prefetch_count,
            default_failure_action = %config.default_failure_action,
            "Consumer subscribed"
        );

        Ok(Subscription {
            channel: self.channel.clone(),
            queue: queue.to_string(),
            consumer_tag,
            state,
            cancelled: AtomicBool::new(false),
        })
    }
}

/// Handle to an active consumer.
pub struct Subscription<C: AmqpChannel> {
    channel: Arc<C>,
    queue: String,
    consumer_tag: Arc<str>,
    state: Arc<Mutex<DispatchState>>,
    cancelled: AtomicBool,
}

impl<C: AmqpChannel> Subscription<C> {
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Deliveries whose acknowledgment has not been issued yet.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn stats(&self) -> DispatcherStats {
        self.state.lock().stats
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Stop receiving deliveries. In-flight deliveries are still
    /// acknowledged when their handlers finish. Cancelling twice is a no-op.
    pub fn cancel(&self) -> Result<(), TransportError> {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.channel.cancel(&self.consumer_tag) {
            self.cancelled.store(false, Ordering::SeqCst);
            return Err(e);
        }
        info!(
            queue = %self.queue,
            consumer_tag = %self.consumer_tag,
            in_flight = self.in_flight(),
            "Consumer cancelled"
        );
        Ok(())
    }
}
