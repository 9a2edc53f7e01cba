//! Boundary to the external AMQP transport.
//!
//! The core does not speak the wire protocol. A transport implementation
//! wraps a real client channel and exposes the primitives below; the core
//! layers confirm bookkeeping and acknowledgment discipline on top.
//!
//! Listener callbacks may arrive on any thread. Implementations must not
//! invoke a listener while holding a lock that `send_raw`, `ack` or `nack`
//! also takes, otherwise a listener that calls back into the channel will
//! deadlock. The confirm listener must also never run from inside
//! `send_raw`: the publisher holds its own lock across that call.

use crate::error::TransportError;
use crate::message::MessageProperties;
use std::sync::Arc;

/// Routing information attached to an inbound delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
}

/// Delivery as handed over by the transport, before the core wraps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDelivery {
    pub delivery_tag: u64,
    pub consumer_tag: String,
    pub envelope: Envelope,
    pub properties: MessageProperties,
    pub body: Vec<u8>,
}

/// Publisher-confirm notification, modelled as a message to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmEvent {
    /// basic.ack from the broker; `multiple` covers every sequence <= `sequence`.
    Accepted { sequence: u64, multiple: bool },
    /// basic.nack from the broker.
    Rejected { sequence: u64, multiple: bool },
    /// The channel closed; no further confirms will arrive.
    ChannelClosed { reason: String },
}

/// Receives confirm events for one channel.
pub trait ConfirmListener: Send + Sync {
    fn on_event(&self, event: ConfirmEvent);
}

/// Receives deliveries for one consumer.
pub trait DeliveryListener: Send + Sync {
    fn on_delivery(&self, delivery: RawDelivery);
}

/// Primitive channel operations provided by the transport.
pub trait AmqpChannel: Send + Sync + 'static {
    /// Identifier used in log fields.
    fn channel_id(&self) -> u16;

    /// basic.qos: bound unacknowledged deliveries dispatched to consumers.
    fn set_prefetch(&self, count: u16) -> Result<(), TransportError>;

    /// basic.publish. Returns an error only for failures detected before the
    /// frame leaves the client.
    ///
    /// Must not invoke the registered [`ConfirmListener`] on the calling
    /// thread. The publisher calls this with its channel lock held and the
    /// listener takes the same lock, so a synchronous confirm from in here
    /// deadlocks. Queue the event or hand it to another thread instead.
    fn send_raw(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Sequence number the next `send_raw` will be confirmed under.
    fn next_sequence_number(&self) -> u64;

    /// Install the confirm listener. Puts the channel in confirm mode.
    fn register_confirm_listener(
        &self,
        listener: Arc<dyn ConfirmListener>,
    ) -> Result<(), TransportError>;

    /// basic.consume.
    fn subscribe(
        &self,
        queue: &str,
        auto_ack: bool,
        consumer_tag: &str,
        listener: Arc<dyn DeliveryListener>,
    ) -> Result<(), TransportError>;

    /// basic.cancel.
    fn cancel(&self, consumer_tag: &str) -> Result<(), TransportError>;

    /// basic.ack.
    fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), TransportError>;

    /// basic.nack.
    fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool)
        -> Result<(), TransportError>;
}

/// Opens channels on an established connection.
pub trait Connection: Send + Sync {
    type Channel: AmqpChannel;

    fn open_channel(&self) -> Result<Arc<Self::Channel>, TransportError>;
}
