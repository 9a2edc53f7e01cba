//! In-memory transport for tests and the simulator.
//!
//! `InMemoryChannel` implements [`AmqpChannel`] and lets the caller play the
//! broker: confirm or reject sequence numbers, push deliveries to consumers,
//! close the channel, and inject send/ack failures. Every ack and nack call
//! is recorded, including refused ones, so tests can assert on exact call
//! counts.
//!
//! Listeners are always invoked after the internal lock is released.

use crate::error::TransportError;
use crate::message::MessageProperties;
use crate::transport::{
    AmqpChannel, ConfirmEvent, ConfirmListener, Connection, DeliveryListener, Envelope,
    RawDelivery,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A frame accepted by `send_raw`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub sequence: u64,
    pub exchange: String,
    pub routing_key: String,
    pub properties: MessageProperties,
    pub payload: Vec<u8>,
}

/// An acknowledgment call as issued by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCall {
    Ack {
        delivery_tag: u64,
        multiple: bool,
    },
    Nack {
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    },
}

impl AckCall {
    pub fn delivery_tag(&self) -> u64 {
        match *self {
            AckCall::Ack { delivery_tag, .. } | AckCall::Nack { delivery_tag, .. } => delivery_tag,
        }
    }
}

struct Consumer {
    queue: String,
    listener: Arc<dyn DeliveryListener>,
}

/// A delivery handed out but not yet settled, with the queue it came from.
struct Outstanding {
    queue: String,
    raw: RawDelivery,
}

#[derive(Default)]
struct Inner {
    next_sequence: u64,
    next_delivery_tag: u64,
    prefetch: Option<u16>,
    sent: Vec<SentFrame>,
    ack_log: Vec<AckCall>,
    confirm_listener: Option<Arc<dyn ConfirmListener>>,
    consumers: BTreeMap<String, Consumer>,
    unacked: BTreeMap<u64, Outstanding>,
    requeued: Vec<Outstanding>,
    fail_next_send: Option<TransportError>,
    fail_acks: Option<TransportError>,
    closed: Option<String>,
}

impl Inner {
    fn ensure_open(&self) -> Result<(), TransportError> {
        match &self.closed {
            Some(reason) => Err(TransportError::ChannelClosed(reason.clone())),
            None => Ok(()),
        }
    }

    fn settle(&mut self, delivery_tag: u64, multiple: bool) -> Vec<Outstanding> {
        if multiple {
            let rest = match delivery_tag.checked_add(1) {
                Some(next) => self.unacked.split_off(&next),
                None => BTreeMap::new(),
            };
            std::mem::replace(&mut self.unacked, rest).into_values().collect()
        } else {
            self.unacked.remove(&delivery_tag).into_iter().collect()
        }
    }
}

/// Simulated AMQP channel.
pub struct InMemoryChannel {
    id: u16,
    inner: Mutex<Inner>,
}

impl InMemoryChannel {
    /// Create an open channel whose first publish gets sequence number 1.
    pub fn new(id: u16) -> Self {
        Self {
            id,
            inner: Mutex::new(Inner {
                next_sequence: 1,
                next_delivery_tag: 1,
                ..Inner::default()
            }),
        }
    }

    fn emit(&self, event: ConfirmEvent) -> bool {
        let listener = self.inner.lock().confirm_listener.clone();
        match listener {
            Some(listener) => {
                listener.on_event(event);
                true
            }
            None => false,
        }
    }

    /// Broker ack for `sequence`. Returns false when no listener is registered.
    pub fn confirm(&self, sequence: u64, multiple: bool) -> bool {
        self.emit(ConfirmEvent::Accepted { sequence, multiple })
    }

    /// Broker nack for `sequence`.
    pub fn reject(&self, sequence: u64, multiple: bool) -> bool {
        self.emit(ConfirmEvent::Rejected { sequence, multiple })
    }

    /// Close the channel and notify the confirm listener once.
    pub fn close(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let listener = {
            let mut inner = self.inner.lock();
            if inner.closed.is_some() {
                return;
            }
            inner.closed = Some(reason.clone());
            inner.consumers.clear();
            inner.confirm_listener.take()
        };
        debug!(channel = self.id, reason = %reason, "In-memory channel closed");
        if let Some(listener) = listener {
            listener.on_event(ConfirmEvent::ChannelClosed { reason });
        }
    }

    /// Deliver a plain message to the consumer subscribed on `queue`.
    pub fn deliver(&self, queue: &str, body: impl Into<Vec<u8>>) -> Option<u64> {
        self.deliver_message(
            queue,
            Envelope {
                exchange: String::new(),
                routing_key: queue.to_string(),
                redelivered: false,
            },
            MessageProperties::default(),
            body.into(),
        )
    }

    /// Deliver a message with explicit routing data. Returns the delivery
    /// tag, or `None` if nobody consumes `queue`.
    pub fn deliver_message(
        &self,
        queue: &str,
        envelope: Envelope,
        properties: MessageProperties,
        body: Vec<u8>,
    ) -> Option<u64> {
        let (listener, raw) = {
            let mut inner = self.inner.lock();
            if inner.closed.is_some() {
                return None;
            }
            let (consumer_tag, consumer) =
                inner.consumers.iter().find(|(_, c)| c.queue == queue)?;
            let consumer_tag = consumer_tag.clone();
            let listener = consumer.listener.clone();

            let delivery_tag = inner.next_delivery_tag;
            inner.next_delivery_tag += 1;

            let raw = RawDelivery {
                delivery_tag,
                consumer_tag,
                envelope,
                properties,
                body,
            };
            inner.unacked.insert(
                delivery_tag,
                Outstanding {
                    queue: queue.to_string(),
                    raw: raw.clone(),
                },
            );
            (listener, raw)
        };

        let delivery_tag = raw.delivery_tag;
        listener.on_delivery(raw);
        Some(delivery_tag)
    }

    /// Hand a delivery to the named consumer verbatim, tag included.
    pub fn deliver_raw(&self, raw: RawDelivery) -> bool {
        let listener = {
            let mut inner = self.inner.lock();
            let Some(consumer) = inner.consumers.get(&raw.consumer_tag) else {
                return false;
            };
            let listener = consumer.listener.clone();
            let queue = consumer.queue.clone();
            inner.unacked.insert(
                raw.delivery_tag,
                Outstanding {
                    queue,
                    raw: raw.clone(),
                },
            );
            listener
        };
        listener.on_delivery(raw);
        true
    }

    /// Redeliver the messages nacked with requeue that came from `queue`,
    /// flagged as redelivered. Requeued messages of other queues stay put.
    pub fn redeliver_requeued(&self, queue: &str) -> usize {
        let matching: Vec<RawDelivery> = {
            let mut inner = self.inner.lock();
            let (matching, rest): (Vec<Outstanding>, Vec<Outstanding>) =
                std::mem::take(&mut inner.requeued)
                    .into_iter()
                    .partition(|entry| entry.queue == queue);
            inner.requeued = rest;
            matching.into_iter().map(|entry| entry.raw).collect()
        };
        let mut count = 0;
        for raw in matching {
            let envelope = Envelope {
                redelivered: true,
                ..raw.envelope
            };
            if self
                .deliver_message(queue, envelope, raw.properties, raw.body)
                .is_some()
            {
                count += 1;
            }
        }
        count
    }

    /// Make the next `send_raw` fail with `error`.
    pub fn fail_next_send(&self, error: TransportError) {
        self.inner.lock().fail_next_send = Some(error);
    }

    /// Make every ack/nack fail with `error` until cleared with `None`.
    pub fn fail_acks(&self, error: Option<TransportError>) {
        self.inner.lock().fail_acks = error;
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.inner.lock().sent.clone()
    }

    pub fn ack_log(&self) -> Vec<AckCall> {
        self.inner.lock().ack_log.clone()
    }

    /// Ack/nack calls issued for one delivery tag.
    pub fn ack_calls_for(&self, delivery_tag: u64) -> Vec<AckCall> {
        self.inner
            .lock()
            .ack_log
            .iter()
            .filter(|call| call.delivery_tag() == delivery_tag)
            .copied()
            .collect()
    }

    pub fn prefetch(&self) -> Option<u16> {
        self.inner.lock().prefetch
    }

    pub fn unacked_tags(&self) -> Vec<u64> {
        self.inner.lock().unacked.keys().copied().collect()
    }

    pub fn requeued_count(&self) -> usize {
        self.inner.lock().requeued.len()
    }

    pub fn consumer_tags(&self) -> Vec<String> {
        self.inner.lock().consumers.keys().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed.is_some()
    }
}

impl AmqpChannel for InMemoryChannel {
    fn channel_id(&self) -> u16 {
        self.id
    }

    fn set_prefetch(&self, count: u16) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        inner.prefetch = Some(count);
        Ok(())
    }

    fn send_raw(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        if let Some(error) = inner.fail_next_send.take() {
            return Err(error);
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.sent.push(SentFrame {
            sequence,
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            properties: properties.clone(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn next_sequence_number(&self) -> u64 {
        self.inner.lock().next_sequence
    }

    fn register_confirm_listener(
        &self,
        listener: Arc<dyn ConfirmListener>,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        inner.confirm_listener = Some(listener);
        Ok(())
    }

    fn subscribe(
        &self,
        queue: &str,
        _auto_ack: bool,
        consumer_tag: &str,
        listener: Arc<dyn DeliveryListener>,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        if inner.consumers.contains_key(consumer_tag) {
            return Err(TransportError::Refused(format!(
                "consumer tag {consumer_tag} already in use"
            )));
        }
        inner.consumers.insert(
            consumer_tag.to_string(),
            Consumer {
                queue: queue.to_string(),
                listener,
            },
        );
        Ok(())
    }

    fn cancel(&self, consumer_tag: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        inner
            .consumers
            .remove(consumer_tag)
            .map(|_| ())
            .ok_or_else(|| TransportError::UnknownConsumer(consumer_tag.to_string()))
    }

    fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.ack_log.push(AckCall::Ack {
            delivery_tag,
            multiple,
        });
        inner.ensure_open()?;
        if let Some(error) = inner.fail_acks.clone() {
            return Err(error);
        }
        if inner.settle(delivery_tag, multiple).is_empty() {
            return Err(TransportError::Refused(format!(
                "unknown delivery tag {delivery_tag}"
            )));
        }
        Ok(())
    }

    fn nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.ack_log.push(AckCall::Nack {
            delivery_tag,
            multiple,
            requeue,
        });
        inner.ensure_open()?;
        if let Some(error) = inner.fail_acks.clone() {
            return Err(error);
        }
        let settled = inner.settle(delivery_tag, multiple);
        if settled.is_empty() {
            return Err(TransportError::Refused(format!(
                "unknown delivery tag {delivery_tag}"
            )));
        }
        if requeue {
            inner.requeued.extend(settled);
        }
        Ok(())
    }
}

/// Connection handing out [`InMemoryChannel`]s with increasing ids.
#[derive(Default)]
pub struct InMemoryConnection {
    next_channel_id: AtomicU16,
    channels: Mutex<Vec<Arc<InMemoryChannel>>>,
}

impl InMemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channels(&self) -> Vec<Arc<InMemoryChannel>> {
        self.channels.lock().clone()
    }
}

impl Connection for InMemoryConnection {
    type Channel = InMemoryChannel;

    fn open_channel(&self) -> Result<Arc<InMemoryChannel>, TransportError> {
        let id = self.next_channel_id.fetch_add(1, Ordering::SeqCst) + 1;
        let channel = Arc::new(InMemoryChannel::new(id));
        self.channels.lock().push(channel.clone());
        Ok(channel)
    }
}
