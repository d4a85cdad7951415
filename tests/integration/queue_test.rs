use rabbit_relay::rabbitmq::{BrokerLink, PublisherError, QueueEnsurer, RetryPolicy};
use std::time::Duration;
use tokio::time::Instant;

use crate::mock_broker::{test_settings, MockBroker, QUEUE};

const DELAY: Duration = Duration::from_millis(40);

fn ensurer() -> QueueEnsurer {
    QueueEnsurer::new(RetryPolicy::new(3, DELAY), Duration::from_secs(1))
}

#[tokio::test]
async fn redeclaring_an_existing_queue_never_fails() {
    let broker = MockBroker::new();
    let link = BrokerLink::new(&test_settings(), broker.connector());
    let channel = link.channels().acquire().await.unwrap();
    let ensurer = ensurer();

    for _ in 0..5 {
        ensurer.ensure_queue(&channel, QUEUE).await.unwrap();
    }

    assert_eq!(broker.declare_calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn transient_declare_failures_back_off_linearly() {
    let broker = MockBroker::new();
    broker.fail_next_declares(&["resource locked", "resource locked"]);
    let link = BrokerLink::new(&test_settings(), broker.connector());
    let channel = link.channels().acquire().await.unwrap();

    let started = Instant::now();
    ensurer().ensure_queue(&channel, QUEUE).await.unwrap();

    assert_eq!(broker.declare_calls(), 3);
    assert!(started.elapsed() >= DELAY * 1 + DELAY * 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_declaration_names_last_cause() {
    let broker = MockBroker::new();
    broker.fail_next_declares(&["first", "second", "access refused"]);
    let link = BrokerLink::new(&test_settings(), broker.connector());
    let channel = link.channels().acquire().await.unwrap();

    let err = ensurer().ensure_queue(&channel, QUEUE).await.unwrap_err();

    match err {
        PublisherError::QueueDeclaration { attempts, cause } => {
            assert_eq!(attempts, 3);
            assert!(cause.contains("access refused"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(broker.declare_calls(), 3);
}
