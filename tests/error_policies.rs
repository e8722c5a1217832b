//! Error policy chains driving a real consumer loop.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reliable_rust::broker::{InMemoryBroker, Producer};
use reliable_rust::consumer::{ConsumerLoop, ConsumerSettings, ConsumerThread, Disposition};
use reliable_rust::envelope::{FAILURE_REASON, SOURCE_ENDPOINT};
use reliable_rust::error_policy::{ErrorKind, ErrorPolicy, ErrorPolicyChain};
use reliable_rust::outbox::OutboxStore;
use reliable_rust::store::InMemoryStore;
use support::orders::{order_message, order_pipeline, GROUP, ORDERS};
use support::wait_for;

const DEAD_LETTER: &str = "orders-dead-letter";

fn order_loop(
    broker: &InMemoryBroker,
    store: &InMemoryStore,
    group: &str,
    calls: &Arc<AtomicUsize>,
    policies: ErrorPolicyChain,
) -> ConsumerLoop<reliable_rust::broker::InMemoryConsumer> {
    ConsumerLoop::new(
        broker.consumer(),
        ORDERS,
        group,
        order_pipeline(store, Arc::clone(calls)),
        Arc::new(broker.clone()),
    )
    .unwrap()
    .with_policies(policies)
    .with_settings(ConsumerSettings {
        poll_timeout: Duration::from_millis(10),
        error_backoff: Duration::from_millis(5),
    })
}

#[test]
fn retries_twice_then_moves_to_dead_letter() {
    let broker = InMemoryBroker::new();
    let store = InMemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    broker.produce_message(&order_message("o-1", -5)).unwrap();

    let mut consumer_loop = order_loop(
        &broker,
        &store,
        GROUP,
        &calls,
        ErrorPolicyChain::new(vec![
            ErrorPolicy::retry().max_failed_attempts(2),
            ErrorPolicy::move_to(DEAD_LETTER),
        ]),
    );

    let processed = consumer_loop.process_next().unwrap().unwrap();
    assert_eq!(
        processed.disposition,
        Disposition::Moved {
            endpoint: DEAD_LETTER.into()
        }
    );
    assert_eq!(processed.retries, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // The dead letter carries the original body and the final attempt count.
    let original = &broker.records(ORDERS)[0];
    let dead = broker.records(DEAD_LETTER);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].body, original.body);
    assert_eq!(dead[0].failed_attempts(), 3);
    assert_eq!(dead[0].headers.get(SOURCE_ENDPOINT), Some(ORDERS));
    assert!(dead[0]
        .headers
        .get(FAILURE_REASON)
        .unwrap_or_default()
        .contains("negative total"));

    // Acked, and nothing from the failed attempts was committed.
    assert_eq!(broker.committed(ORDERS, GROUP, 0), Some(1));
    assert_eq!(store.value("order:o-1").unwrap(), None);
    assert!(store.outbox_rows().unwrap().is_empty());
}

#[test]
fn stop_policy_halts_the_loop_without_ack() {
    let broker = InMemoryBroker::new();
    let store = InMemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    broker.produce_message(&order_message("o-1", -5)).unwrap();
    broker.produce_message(&order_message("o-2", 10)).unwrap();

    let consumer_loop = order_loop(&broker, &store, GROUP, &calls, ErrorPolicyChain::default());
    let thread = ConsumerThread::spawn(consumer_loop);

    assert!(wait_for(Duration::from_secs(2), || thread.is_finished()));
    let stats = thread.stop();

    assert!(stats.halted.is_some());
    assert_eq!(stats.handled, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(broker.committed(ORDERS, GROUP, 0), None);
    assert_eq!(store.value("order:o-2").unwrap(), None);
}

#[test]
fn policy_order_changes_the_selected_action() {
    let broker = InMemoryBroker::new();
    let store = InMemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    broker.produce_message(&order_message("o-1", -5)).unwrap();

    let mut skip_first = order_loop(
        &broker,
        &store,
        "billing-a",
        &calls,
        ErrorPolicyChain::new(vec![ErrorPolicy::skip(), ErrorPolicy::move_to(DEAD_LETTER)]),
    );
    let mut move_first = order_loop(
        &broker,
        &store,
        "billing-b",
        &calls,
        ErrorPolicyChain::new(vec![ErrorPolicy::move_to(DEAD_LETTER), ErrorPolicy::skip()]),
    );

    assert_eq!(
        skip_first.process_next().unwrap().unwrap().disposition,
        Disposition::Skipped
    );
    assert!(broker.is_empty(DEAD_LETTER));

    assert!(matches!(
        move_first.process_next().unwrap().unwrap().disposition,
        Disposition::Moved { .. }
    ));
    assert_eq!(broker.len(DEAD_LETTER), 1);
}

#[test]
fn failure_kinds_route_to_different_policies() {
    let broker = InMemoryBroker::new();
    let store = InMemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    broker
        .produce(ORDERS, None, b"not json", &Default::default())
        .unwrap();
    broker.produce_message(&order_message("o-2", -1)).unwrap();

    let mut consumer_loop = order_loop(
        &broker,
        &store,
        GROUP,
        &calls,
        ErrorPolicyChain::new(vec![
            ErrorPolicy::move_to(DEAD_LETTER).include(ErrorKind::Deserialization),
            ErrorPolicy::retry()
                .max_failed_attempts(1)
                .exclude(ErrorKind::Deserialization),
            ErrorPolicy::skip(),
        ]),
    );

    let poison = consumer_loop.process_next().unwrap().unwrap();
    assert!(matches!(poison.disposition, Disposition::Moved { .. }));
    assert_eq!(poison.retries, 0);

    let rejected = consumer_loop.process_next().unwrap().unwrap();
    assert_eq!(rejected.disposition, Disposition::Skipped);
    assert_eq!(rejected.retries, 1);
    assert_eq!(broker.len(DEAD_LETTER), 1);
}
