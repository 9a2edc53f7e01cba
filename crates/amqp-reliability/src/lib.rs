//! Reliability core for AMQP clients.
//!
//! Two halves sit on top of a transport that speaks the wire protocol:
//!
//! - [`Publisher`] tracks every publication by its channel sequence number
//!   until the broker confirms or rejects it, and hands the caller a handle
//!   that resolves exactly once. Cumulative confirms resolve a whole prefix
//!   of outstanding publications.
//! - [`ConsumerDispatcher`] runs a handler per delivery and turns its
//!   outcome, including failures and panics, into exactly one ack or nack.
//!
//! The transport is abstracted by [`AmqpChannel`]; [`InMemoryChannel`] is a
//! complete in-process implementation for tests and simulation.
//!
//! # Example
//!
//! ```
//! use amqp_reliability::{InMemoryChannel, PublishCommand, Publisher};
//! use std::sync::Arc;
//!
//! let channel = Arc::new(InMemoryChannel::new(1));
//! let publisher = Publisher::open(channel.clone()).unwrap();
//!
//! let mut handle = publisher.publish(PublishCommand::new("orders", "new", b"hello".to_vec()));
//! channel.confirm(1, false);
//! assert_eq!(handle.try_outcome(), Some(Ok(())));
//! ```

pub mod action;
pub mod completion;
pub mod config;
pub mod confirm_tracker;
pub mod dispatcher;
pub mod effect;
pub mod error;
pub mod memory;
pub mod message;
pub mod publisher;
pub mod transport;

#[cfg(test)]
mod tests;

pub use action::AckAction;
pub use completion::{
    CompletionHandle, CompletionPromise, Deferred, OneshotDeferred, Promise, PublishOutcome,
};
pub use config::ConsumerConfig;
pub use confirm_tracker::ConfirmTracker;
pub use dispatcher::{ConsumerDispatcher, DispatcherStats, Subscription};
pub use effect::{Effect, EffectError, ImmediateEffect, TokioEffect};
pub use error::{PublishError, ReliabilityError, ReliabilityResult, TransportError};
pub use memory::{AckCall, InMemoryChannel, InMemoryConnection, SentFrame};
pub use message::{Delivery, MessageProperties, PublishCommand};
pub use publisher::{Publisher, PublisherStats};
pub use transport::{
    AmqpChannel, ConfirmEvent, ConfirmListener, Connection, DeliveryListener, Envelope,
    RawDelivery,
};
