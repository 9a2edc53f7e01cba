//! Acknowledgment outcome produced by delivery handlers.

use crate::error::ReliabilityError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Decision about how a delivery is settled with the broker.
///
/// The set is closed: dispatching on it is an exhaustive match, so a new
/// variant cannot be silently swallowed by a fallback branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckAction {
    /// Positive acknowledgment; the broker removes the message.
    Accept,
    /// Negative acknowledgment without requeue; dead-lettered or dropped.
    #[default]
    RejectDiscard,
    /// Negative acknowledgment with requeue; redelivered later.
    RejectRequeue,
}

impl AckAction {
    /// Requeue flag for the nack call, or `None` for a positive ack.
    pub fn requeue(self) -> Option<bool> {
        match self {
            AckAction::Accept => None,
            AckAction::RejectDiscard => Some(false),
            AckAction::RejectRequeue => Some(true),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AckAction::Accept => "accept",
            AckAction::RejectDiscard => "reject-discard",
            AckAction::RejectRequeue => "reject-requeue",
        }
    }
}

impl fmt::Display for AckAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckAction {
    type Err = ReliabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept" | "ack" => Ok(AckAction::Accept),
            "reject-discard" | "discard" => Ok(AckAction::RejectDiscard),
            "reject-requeue" | "requeue" => Ok(AckAction::RejectRequeue),
            other => Err(ReliabilityError::Config(format!(
                "unknown acknowledgment action: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_flags() {
        assert_eq!(AckAction::Accept.requeue(), None);
        assert_eq!(AckAction::RejectDiscard.requeue(), Some(false));
        assert_eq!(AckAction::RejectRequeue.requeue(), Some(true));
    }

    #[test]
    fn test_default_is_discard() {
        assert_eq!(AckAction::default(), AckAction::RejectDiscard);
    }

    #[test]
    fn test_parse_names_and_aliases() {
        assert_eq!("accept".parse::<AckAction>().unwrap(), AckAction::Accept);
        assert_eq!(
            "Reject-Requeue".parse::<AckAction>().unwrap(),
            AckAction::RejectRequeue
        );
        assert_eq!(
            " discard ".parse::<AckAction>().unwrap(),
            AckAction::RejectDiscard
        );
        assert!("maybe".parse::<AckAction>().is_err());
    }

    #[test]
    fn test_serde_uses_kebab_case() {
        let json = serde_json::to_string(&AckAction::RejectRequeue).unwrap();
        assert_eq!(json, "\"reject-requeue\"");
        let back: AckAction = serde_json::from_str("\"accept\"").unwrap();
        assert_eq!(back, AckAction::Accept);
    }
}
