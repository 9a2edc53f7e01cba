//! Consumer configuration.

use crate::action::AckAction;
use crate::error::{ReliabilityError, ReliabilityResult};

/// Settings applied when a consumer subscribes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Maximum unacknowledged deliveries the broker dispatches at once
    pub prefetch_count: u16,

    /// Action taken when a handler fails or panics
    pub default_failure_action: AckAction,

    /// Prefix for generated consumer tags
    pub consumer_tag_prefix: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            prefetch_count: 10,
            default_failure_action: AckAction::RejectDiscard,
            consumer_tag_prefix: "amqp-reliability".to_string(),
        }
    }
}

impl ConsumerConfig {
    /// Build from environment variables, falling back to defaults.
    ///
    /// Reads `AMQP_PREFETCH_COUNT`, `AMQP_FAILURE_ACTION` and
    /// `AMQP_CONSUMER_TAG_PREFIX`.
    pub fn from_env() -> ReliabilityResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> ReliabilityResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let prefetch_count = match lookup("AMQP_PREFETCH_COUNT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| {
                ReliabilityError::Config(format!("invalid AMQP_PREFETCH_COUNT {raw:?}: {e}"))
            })?,
            None => defaults.prefetch_count,
        };

        let default_failure_action = match lookup("AMQP_FAILURE_ACTION") {
            Some(raw) => raw.parse()?,
            None => defaults.default_failure_action,
        };

        let consumer_tag_prefix = lookup("AMQP_CONSUMER_TAG_PREFIX")
            .filter(|prefix| !prefix.is_empty())
            .unwrap_or(defaults.consumer_tag_prefix);

        Ok(Self {
            prefetch_count,
            default_failure_action,
            consumer_tag_prefix,
        })
    }

    pub fn with_prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    pub fn with_failure_action(mut self, action: AckAction) -> Self {
        self.default_failure_action = action;
        self
    }

    /// Generate a unique consumer tag.
    pub fn consumer_tag(&self) -> String {
        format!("{}-{}", self.consumer_tag_prefix, uuid::Uuid::new_v4())
    }
}
