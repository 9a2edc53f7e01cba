//! IV. Channel closure and send failure tests.
//!
//! Rules covered:
//! - 17. Closing the channel fails every outstanding publication
//! - 18. Publishing on a closed channel fails immediately without sending
//! - 19. A synchronous send failure leaves no orphaned entry
//! - 20. Closing from the application side behaves like a transport close

use super::harness::TestHarness;
use crate::error::{PublishError, TransportError};

/// Rule 17: Closing the channel fails every outstanding publication
#[test]
fn rule_17_close_fails_pending() {
    let harness = TestHarness::new();

    let mut confirmed = harness.publish("one");
    let mut orphan_a = harness.publish("two");
    let mut orphan_b = harness.publish("three");
    harness.channel.confirm(1, false);

    harness.channel.close("CONNECTION_FORCED - broker shutdown");

    assert_eq!(confirmed.try_outcome(), Some(Ok(())));
    let expected = Some(Err(PublishError::ChannelClosed(
        "CONNECTION_FORCED - broker shutdown".into(),
    )));
    assert_eq!(orphan_a.try_outcome(), expected);
    assert_eq!(orphan_b.try_outcome(), expected);

    assert!(harness.publisher.is_closed());
    assert_eq!(harness.publisher.pending_count(), 0);
    assert_eq!(harness.publisher.stats().orphaned, 2);
}

/// Rule 18: Publishing on a closed channel fails immediately without sending
#[test]
fn rule_18_publish_after_close() {
    let harness = TestHarness::new();
    harness.channel.close("gone");

    let mut handle = harness.publish("late");

    assert_eq!(
        handle.try_outcome(),
        Some(Err(PublishError::ChannelClosed("gone".into())))
    );
    assert!(harness.channel.sent().is_empty());
    assert!(!harness.channel.confirm(1, false), "Listener detached on close");
}

/// Rule 19: A synchronous send failure leaves no orphaned entry
#[test]
fn rule_19_send_failure_cleans_up() {
    let harness = TestHarness::new();

    let mut first = harness.publish("one");
    harness
        .channel
        .fail_next_send(TransportError::Refused("frame too large".into()));
    let mut failed = harness.publish("two");
    let mut third = harness.publish("three");

    assert_eq!(
        failed.try_outcome(),
        Some(Err(PublishError::Transport(TransportError::Refused(
            "frame too large".into()
        ))))
    );
    assert_eq!(harness.publisher.pending_sequences(), vec![1, 2]);

    // The failed send never consumed a sequence number, so "three" is 2.
    harness.channel.confirm(2, true);
    assert_eq!(first.try_outcome(), Some(Ok(())));
    assert_eq!(third.try_outcome(), Some(Ok(())));

    let stats = harness.publisher.stats();
    assert_eq!(stats.send_failures, 1);
    assert_eq!(stats.published, 2);
    assert_eq!(stats.confirmed, 2);
}

/// Rule 20: Closing from the application side behaves like a transport close
#[test]
fn rule_20_application_close() {
    let harness = TestHarness::new();
    let mut pending = harness.publish("one");

    harness.publisher.close("application shutdown");
    harness.publisher.close("second close is ignored");

    assert_eq!(
        pending.try_outcome(),
        Some(Err(PublishError::ChannelClosed(
            "application shutdown".into()
        )))
    );
    assert_eq!(harness.publisher.stats().orphaned, 1);

    // A late broker ack for the orphaned publication changes nothing.
    harness.channel.confirm(1, false);
    assert_eq!(harness.publisher.stats().confirmed, 0);
}
