//! Simulator binary.
//!
//! Usage: amqp-reliability-sim [--messages <n>] [--reject-every <n>] ...
//!
//! Publishes messages through a confirm-tracking publisher on an in-memory
//! channel, plays the broker (batched cumulative confirms, periodic rejects,
//! routing every confirmed message to a queue), consumes the queue with a
//! handler that fails or requeues on a schedule, and prints a JSON report.

use amqp_reliability::{
    AckAction, Connection, ConsumerConfig, ConsumerDispatcher, Delivery, DispatcherStats,
    EffectError, Envelope, InMemoryChannel, InMemoryConnection, MessageProperties,
    PublishCommand, PublishError, Publisher, PublisherStats, ReliabilityResult, Subscription,
    TokioEffect,
};
use clap::Parser;
use futures_util::future::{join_all, BoxFuture, FutureExt};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

const EXCHANGE: &str = "orders";
const ROUTING_KEY: &str = "new";
const QUEUE: &str = "orders.new";

/// Exercise publisher confirms and consumer acknowledgments end to end.
#[derive(Parser, Debug)]
#[command(name = "amqp-reliability-sim")]
#[command(about = "Simulate confirm tracking and exactly-once acknowledgment against an in-memory broker")]
struct Args {
    /// Number of messages to publish.
    #[arg(long, default_value = "100")]
    messages: u64,

    /// Broker rejects every Nth sequence number (0 = never).
    #[arg(long, default_value = "10")]
    reject_every: u64,

    /// Broker confirms cumulatively after this many sends.
    #[arg(long, default_value = "8")]
    confirm_batch: u64,

    /// Handler fails on every Nth message (0 = never).
    #[arg(long, default_value = "7")]
    fail_every: u64,

    /// Handler requeues every Nth message on first delivery (0 = never).
    #[arg(long, default_value = "13")]
    requeue_every: u64,

    /// Redelivery rounds for requeued messages.
    #[arg(long, default_value = "3")]
    max_redeliveries: u32,

    /// Consumer prefetch count.
    #[arg(long, env = "AMQP_PREFETCH_COUNT")]
    prefetch: Option<u16>,

    /// Action applied when the handler fails (accept, reject-discard, reject-requeue).
    #[arg(long, env = "AMQP_FAILURE_ACTION")]
    failure_action: Option<AckAction>,

    /// Seconds to wait for in-flight deliveries to settle.
    #[arg(long, default_value = "10")]
    settle_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write JSONL logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize)]
struct Outcomes {
    confirmed: u64,
    rejected: u64,
    failed: u64,
}

#[derive(Debug, Serialize)]
struct Report {
    messages: u64,
    consumer_tag: String,
    publish_outcomes: Outcomes,
    publisher: PublisherStats,
    consumer: DispatcherStats,
    redelivered: usize,
    unacknowledged: usize,
}

/// Handler that fails or requeues on a schedule keyed by message id.
fn scheduled_handler(
    fail_every: u64,
    requeue_every: u64,
) -> impl Fn(Delivery) -> BoxFuture<'static, Result<AckAction, EffectError>> + Send + Sync + 'static
{
    move |delivery: Delivery| {
        let index = delivery
            .properties
            .message_id
            .as_deref()
            .and_then(|id| id.parse::<u64>().ok())
            .unwrap_or_default();
        async move {
            if fail_every > 0 && index % fail_every == 0 {
                anyhow::bail!("simulated handler failure for message {index}");
            }
            if requeue_every > 0 && index % requeue_every == 0 && !delivery.redelivered {
                return Ok(AckAction::RejectRequeue);
            }
            Ok(AckAction::Accept)
        }
        .boxed()
    }
}

/// Play the broker for everything sent since `settled`: reject on schedule,
/// confirm the rest cumulatively and route confirmed frames to the queue.
fn broker_round(channel: &InMemoryChannel, settled: &mut usize, reject_every: u64) {
    let sent = channel.sent();
    let Some(last) = sent.last().map(|frame| frame.sequence) else {
        return;
    };
    if *settled >= sent.len() {
        return;
    }

    for frame in &sent[*settled..] {
        if reject_every > 0 && frame.sequence % reject_every == 0 {
            channel.reject(frame.sequence, false);
        }
    }
    channel.confirm(last, true);

    for frame in &sent[*settled..] {
        if reject_every > 0 && frame.sequence % reject_every == 0 {
            continue;
        }
        channel.deliver_message(
            QUEUE,
            Envelope {
                exchange: frame.exchange.clone(),
                routing_key: frame.routing_key.clone(),
                redelivered: false,
            },
            frame.properties.clone(),
            frame.payload.clone(),
        );
    }
    *settled = sent.len();
}

/// Wait until no delivery is awaiting its acknowledgment.
async fn settle(subscription: &Subscription<InMemoryChannel>, timeout: Duration) -> bool {
    let drained = async {
        while subscription.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    tokio::time::timeout(timeout, drained).await.is_ok()
}

#[tokio::main]
async fn main() -> ReliabilityResult<()> {
    let args = Args::parse();

    observability::init_with_config(observability::LogConfig {
        service_name: "amqp-reliability-sim".into(),
        default_level: args.log_level.clone(),
        log_path: args.log_file.clone(),
        also_stderr: true,
    });

    let mut config = ConsumerConfig::from_env()?;
    if let Some(prefetch) = args.prefetch {
        config.prefetch_count = prefetch;
    }
    if let Some(action) = args.failure_action {
        config.default_failure_action = action;
    }

    info!(
        messages = args.messages,
        reject_every = args.reject_every,
        fail_every = args.fail_every,
        prefetch = config.prefetch_count,
        failure_action = %config.default_failure_action,
        "Simulation starting"
    );

    let connection = InMemoryConnection::new();
    let channel = connection.open_channel()?;
    let publisher = Publisher::open(channel.clone())?;

    let dispatcher = ConsumerDispatcher::new(channel.clone(), TokioEffect::current());
    let subscription = dispatcher.consume_with_config(
        QUEUE,
        scheduled_handler(args.fail_every, args.requeue_every),
        &config,
    )?;

    let batch = args.confirm_batch.max(1);
    let mut settled = 0usize;
    let mut handles = Vec::new();
    for index in 1..=args.messages {
        let command = PublishCommand::new(EXCHANGE, ROUTING_KEY, format!("order #{index}"))
            .with_properties(
                MessageProperties::default()
                    .with_content_type("text/plain")
                    .with_message_id(index.to_string())
                    .persistent(),
            );
        handles.push(publisher.publish(command));

        if index % batch == 0 {
            broker_round(&channel, &mut settled, args.reject_every);
        }
    }
    broker_round(&channel, &mut settled, args.reject_every);

    let timeout = Duration::from_secs(args.settle_timeout_secs);
    let mut redelivered = 0;
    for round in 0..=args.max_redeliveries {
        if !settle(&subscription, timeout).await {
            warn!(round, in_flight = subscription.in_flight(), "Deliveries did not settle");
            break;
        }
        if round == args.max_redeliveries {
            break;
        }
        let count = channel.redeliver_requeued(QUEUE);
        if count == 0 {
            break;
        }
        redelivered += count;
    }

    let mut outcomes = Outcomes::default();
    for outcome in join_all(handles).await {
        match outcome {
            Ok(()) => outcomes.confirmed += 1,
            Err(PublishError::Rejected) => outcomes.rejected += 1,
            Err(_) => outcomes.failed += 1,
        }
    }

    subscription.cancel()?;
    publisher.close("simulation complete");

    let report = Report {
        messages: args.messages,
        consumer_tag: subscription.consumer_tag().to_string(),
        publish_outcomes: outcomes,
        publisher: publisher.stats(),
        consumer: subscription.stats(),
        redelivered,
        unacknowledged: channel.unacked_tags().len(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    info!("Simulation finished");
    Ok(())
}
