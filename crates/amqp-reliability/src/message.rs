//! Outbound publish commands and inbound deliveries.
//!
//! The core never interprets payloads or properties; it only carries them
//! between the application and the transport.

use crate::transport::RawDelivery;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message properties carried alongside a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    /// MIME content type, e.g. `application/json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Correlation identifier for request/reply flows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Application-assigned message identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// 1 = transient, 2 = persistent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_mode: Option<u8>,
    /// Free-form headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl MessageProperties {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn persistent(mut self) -> Self {
        self.delivery_mode = Some(2);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// A message to publish. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishCommand {
    exchange: String,
    routing_key: String,
    properties: MessageProperties,
    payload: Vec<u8>,
}

impl PublishCommand {
    /// Create a command with empty properties.
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            properties: MessageProperties::default(),
            payload: payload.into(),
        }
    }

    /// Replace the properties while building.
    pub fn with_properties(mut self, properties: MessageProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn properties(&self) -> &MessageProperties {
        &self.properties
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// A message received from the broker, handed to the delivery handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub payload: Vec<u8>,
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub properties: MessageProperties,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
}

impl Delivery {
    /// Payload as UTF-8, if valid.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

impl From<RawDelivery> for Delivery {
    fn from(raw: RawDelivery) -> Self {
        Self {
            payload: raw.body,
            consumer_tag: raw.consumer_tag,
            delivery_tag: raw.delivery_tag,
            properties: raw.properties,
            redelivered: raw.envelope.redelivered,
            exchange: raw.envelope.exchange,
            routing_key: raw.envelope.routing_key,
        }
    }
}
