//! III. Handler failure tests.
//!
//! Rules covered:
//! - 12. A raising handler gets the default action
//! - 13. Synchronous and asynchronous failures produce the same action
//! - 14. The same holds for tokio-driven handlers, including async panics
//! - 15. A failing handler does not stop later deliveries
//! - 16. A refused ack is logged, counted and never retried

use super::harness::{wait_until, HandlerResponse, ScriptedHandler, TestHarness};
use crate::action::AckAction;
use crate::error::TransportError;
use crate::memory::AckCall;
use crate::message::MessageProperties;
use crate::transport::{Envelope, RawDelivery};
use std::time::Duration;

/// Rule 12: A raising handler gets the default action
#[test]
fn rule_12_panicking_handler_uses_default_discard() {
    let harness = TestHarness::new();
    let handler = ScriptedHandler::new(HandlerResponse::PanicSync);
    let subscription = harness.consume_immediate("jobs", &handler, AckAction::RejectDiscard);

    assert!(harness.channel.deliver_raw(RawDelivery {
        delivery_tag: 7,
        consumer_tag: subscription.consumer_tag().to_string(),
        envelope: Envelope::default(),
        properties: MessageProperties::default(),
        body: b"boom".to_vec(),
    }));

    assert_eq!(
        harness.channel.ack_log(),
        vec![AckCall::Nack {
            delivery_tag: 7,
            multiple: false,
            requeue: false
        }]
    );
    assert_eq!(subscription.stats().handler_failures, 1);
    assert_eq!(subscription.in_flight(), 0);
}

/// Rule 13: Synchronous and asynchronous failures produce the same action
#[test]
fn rule_13_sync_and_async_failures_match() {
    let harness = TestHarness::new();
    let handler = ScriptedHandler::accepting();
    handler.queue_response(HandlerResponse::PanicSync);
    handler.queue_response(HandlerResponse::FailAsync);
    let subscription = harness.consume_immediate("jobs", &handler, AckAction::RejectRequeue);

    let panicked = harness.channel.deliver("jobs", "a").unwrap();
    let failed = harness.channel.deliver("jobs", "b").unwrap();

    let panicked_calls = harness.channel.ack_calls_for(panicked);
    let failed_calls = harness.channel.ack_calls_for(failed);
    assert_eq!(panicked_calls.len(), 1);
    assert_eq!(failed_calls.len(), 1);
    assert!(matches!(
        panicked_calls[0],
        AckCall::Nack {
            requeue: true,
            multiple: false,
            ..
        }
    ));
    assert!(matches!(
        failed_calls[0],
        AckCall::Nack {
            requeue: true,
            multiple: false,
            ..
        }
    ));
    assert_eq!(subscription.stats().handler_failures, 2);
    assert_eq!(subscription.stats().rejected_requeue, 2);
}

/// Rule 14: The same holds for tokio-driven handlers, including async panics
#[tokio::test]
async fn rule_14_tokio_failures_match() {
    let harness = TestHarness::new();
    let handler = ScriptedHandler::accepting();
    handler.queue_response(HandlerResponse::PanicSync);
    handler.queue_response(HandlerResponse::FailAsync);
    handler.queue_response(HandlerResponse::PanicAsync);
    let subscription = harness.consume_tokio("jobs", &handler, AckAction::RejectRequeue);

    let tags: Vec<u64> = ["a", "b", "c"]
        .iter()
        .map(|body| harness.channel.deliver("jobs", *body).unwrap())
        .collect();

    assert!(wait_until(|| harness.channel.ack_log().len() == 3, Duration::from_secs(2)).await);

    for tag in tags {
        assert_eq!(
            harness.channel.ack_calls_for(tag),
            vec![AckCall::Nack {
                delivery_tag: tag,
                multiple: false,
                requeue: true
            }],
            "delivery {tag}"
        );
    }
    assert_eq!(subscription.stats().handler_failures, 3);
}

/// Rule 15: A failing handler does not stop later deliveries
#[test]
fn rule_15_failure_does_not_stop_consumer() {
    let harness = TestHarness::new();
    let handler = ScriptedHandler::accepting();
    handler.queue_response(HandlerResponse::PanicSync);
    let subscription = harness.consume_immediate("jobs", &handler, AckAction::RejectDiscard);

    harness.channel.deliver("jobs", "bad").unwrap();
    let good = harness.channel.deliver("jobs", "good").unwrap();

    assert_eq!(
        harness.channel.ack_calls_for(good),
        vec![AckCall::Ack {
            delivery_tag: good,
            multiple: false
        }]
    );
    let stats = subscription.stats();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.rejected_discard, 1);
}

/// Rule 16: A refused ack is logged, counted and never retried
#[test]
fn rule_16_refused_ack_not_retried() {
    let harness = TestHarness::new();
    let handler = ScriptedHandler::accepting();
    let subscription = harness.consume_immediate("jobs", &handler, AckAction::RejectDiscard);

    harness
        .channel
        .fail_acks(Some(TransportError::Io("connection reset".into())));
    let tag = harness.channel.deliver("jobs", "work").unwrap();
    harness.channel.fail_acks(None);

    assert_eq!(harness.channel.ack_calls_for(tag).len(), 1);
    assert_eq!(subscription.stats().ack_failures, 1);
    assert_eq!(subscription.in_flight(), 0);

    let next = harness.channel.deliver("jobs", "more").unwrap();
    assert_eq!(harness.channel.ack_calls_for(next).len(), 1);
    assert_eq!(subscription.stats().accepted, 1);
}
