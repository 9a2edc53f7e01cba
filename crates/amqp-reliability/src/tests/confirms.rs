//! I. Publisher confirm tests.
//!
//! Rules covered:
//! - 1. A single accept resolves its publication with success
//! - 2. A cumulative accept resolves every publication up to and including it
//! - 3. A reject resolves with "broker rejected publication"
//! - 4. Confirms for unknown sequence numbers change nothing
//! - 5. Each handle resolves exactly once
//! - 6. Awaiting a handle does not block the runtime

use super::harness::TestHarness;
use crate::error::PublishError;
use crate::message::{MessageProperties, PublishCommand};
use std::time::Duration;

/// Rule 1: A single accept resolves its publication with success
#[test]
fn rule_01_single_accept_resolves_success() {
    let harness = TestHarness::new();

    let mut handle = harness.publish("hello");

    let sent = harness.channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].sequence, 1);
    assert_eq!(sent[0].exchange, "orders");
    assert_eq!(sent[0].routing_key, "new");
    assert_eq!(sent[0].payload, b"hello");
    assert_eq!(sent[0].properties, MessageProperties::default());

    assert!(handle.try_outcome().is_none(), "Pending until the broker answers");

    harness.channel.confirm(1, false);
    assert_eq!(handle.try_outcome(), Some(Ok(())));
}

/// Rule 2: A cumulative accept resolves every publication up to and including it
#[test]
fn rule_02_cumulative_accept_resolves_prefix() {
    let harness = TestHarness::new();

    let mut first = harness.publish("one");
    let mut second = harness.publish("two");
    let mut third = harness.publish("three");
    assert_eq!(harness.publisher.pending_sequences(), vec![1, 2, 3]);

    harness.channel.confirm(2, true);

    assert_eq!(first.try_outcome(), Some(Ok(())));
    assert_eq!(second.try_outcome(), Some(Ok(())));
    assert!(third.try_outcome().is_none(), "Sequence 3 is above the confirm");
    assert_eq!(harness.publisher.pending_sequences(), vec![3]);
}

/// Rule 3: A reject resolves with "broker rejected publication"
#[test]
fn rule_03_reject_resolves_failure() {
    let harness = TestHarness::new();

    let mut handles: Vec<_> = (1..=6).map(|i| harness.publish(&i.to_string())).collect();

    harness.channel.reject(5, false);

    let outcome = handles[4].try_outcome().unwrap();
    assert_eq!(outcome, Err(PublishError::Rejected));
    assert_eq!(
        outcome.unwrap_err().to_string(),
        "broker rejected publication"
    );

    for (i, handle) in handles.iter_mut().enumerate() {
        if i != 4 {
            assert!(handle.try_outcome().is_none(), "Only sequence 5 is rejected");
        }
    }
    assert_eq!(harness.publisher.stats().rejected, 1);
}

/// Rule 4: Confirms for unknown sequence numbers change nothing
#[test]
fn rule_04_unattributed_confirm_is_noop() {
    let harness = TestHarness::new();

    let mut handle = harness.publish("hello");
    harness.channel.confirm(1, false);
    assert_eq!(handle.try_outcome(), Some(Ok(())));

    let before = harness.publisher.stats();
    harness.channel.confirm(99, false);
    harness.channel.reject(1, false);
    let after = harness.publisher.stats();

    assert_eq!(handle.try_outcome(), Some(Ok(())), "Outcome never flips");
    assert_eq!(after.confirmed, before.confirmed);
    assert_eq!(after.rejected, before.rejected);
    assert_eq!(after.unattributed, before.unattributed + 2);
    assert_eq!(harness.publisher.pending_count(), 0);
}

/// Rule 5: Each handle resolves exactly once
#[test]
fn rule_05_each_handle_resolves_once() {
    let harness = TestHarness::new();

    let mut handles: Vec<_> = (0..10).map(|i| harness.publish(&i.to_string())).collect();

    // Overlapping broker answers: cumulative, single, then a cumulative
    // reject covering entries that are already resolved.
    harness.channel.confirm(4, true);
    harness.channel.reject(7, false);
    harness.channel.confirm(7, false);
    harness.channel.reject(10, true);

    for (i, handle) in handles.iter_mut().enumerate() {
        let sequence = i as u64 + 1;
        let outcome = handle.try_outcome().unwrap();
        if sequence <= 4 {
            assert_eq!(outcome, Ok(()), "sequence {sequence}");
        } else {
            assert_eq!(outcome, Err(PublishError::Rejected), "sequence {sequence}");
        }
    }

    let stats = harness.publisher.stats();
    assert_eq!(stats.confirmed + stats.rejected, 10);
    assert_eq!(stats.published, 10);
}

/// Rule 6: Awaiting a handle does not block the runtime
#[tokio::test]
async fn rule_06_await_resolves_from_another_task() {
    let harness = TestHarness::new();

    let handle = harness.publisher.publish(
        PublishCommand::new("orders", "new", b"hello".to_vec())
            .with_properties(MessageProperties::default().persistent()),
    );

    let channel = harness.channel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.confirm(1, false);
    });

    let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("confirm should arrive");
    assert_eq!(outcome, Ok(()));
    assert_eq!(harness.channel.sent()[0].properties.delivery_mode, Some(2));
}
