//! End-to-end drain under induced connection faults.
//!
//! Mirrors the production failure mode this crate exists for: a pool of
//! sessions consuming a queue while a fault injector keeps killing their
//! connections at random. Every message forwards to a downstream queue
//! inside the delivery transaction; the downstream queue must end up with
//! each identity exactly once — no loss, no duplicate commit — and the pool
//! must converge back to full strength once the faults stop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, Instant};

use inflow::{
    ActivationManager, ActivationSpec, Broker, Connection, Consumer, ConsumerOptions,
    DeliveryLimit, DestinationKind, HandlerError, HandlerFn, MemoryBroker, Message, RetryLimit,
    TransactedProducer, Transaction,
};

const SESSIONS: usize = 10;
const MESSAGES: u64 = 600;
const IN_QUEUE: &str = "inQueue";
const OUT_QUEUE: &str = "outQueue";

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn drain_under_random_faults_commits_each_message_exactly_once() {
    let broker = Arc::new(MemoryBroker::with_redelivery_delay(Duration::from_millis(
        20,
    )));

    // The forwarding producer lives on its own connection, outside the
    // pool, so the fault injector never touches it.
    let out_producer = broker
        .connect()
        .await
        .expect("connect")
        .create_producer(OUT_QUEUE)
        .await
        .expect("producer");

    let handler = HandlerFn::arc(move |message: Message, tx: Arc<Transaction>| {
        let producer = out_producer.clone();
        async move {
            let outbound = TransactedProducer::new(producer);
            tx.enlist(outbound.clone()).map_err(HandlerError::fail)?;
            let forwarded = Message::new(message.body.clone())
                .with_header("i", message.header("i").unwrap_or_default());
            outbound.send(forwarded).await.map_err(HandlerError::fail)?;
            Ok(())
        }
    });

    let manager = ActivationManager::builder(broker.clone()).build();
    let spec = ActivationSpec::new(IN_QUEUE, DestinationKind::Queue)
        .with_session_count(SESSIONS)
        .with_reconnect_attempts(RetryLimit::Infinite)
        .with_reconnect_interval(Duration::from_millis(10))
        .with_call_timeout(Duration::from_millis(100))
        .with_max_delivery_attempts(DeliveryLimit::Unlimited);

    let handle = manager.activate(spec, handler).await.expect("activate");

    // Feeder: uniquely-identified messages, pushed in bursts so production
    // overlaps consumption and the induced faults.
    let feeder = {
        let broker = broker.clone();
        tokio::spawn(async move {
            for i in 0..MESSAGES {
                broker.enqueue(
                    IN_QUEUE,
                    Message::new(format!("payload {i}")).with_header("i", i.to_string()),
                );
                if i % 100 == 0 {
                    sleep(Duration::from_millis(5)).await;
                }
            }
        })
    };

    // Fault injector: keeps killing random pool connections until the
    // drain completes.
    let running = Arc::new(AtomicBool::new(true));
    let injector = {
        let broker = broker.clone();
        let running = running.clone();
        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let pause = rand::rng().random_range(10..30);
                sleep(Duration::from_millis(pause)).await;
                broker.fail_random_matching("pool", IN_QUEUE, "induced fault");
            }
        })
    };

    // Verifier: drain the downstream queue on its own connection and count
    // every identity.
    let verifier_conn = broker.connect().await.expect("connect");
    let verifier = verifier_conn
        .create_consumer(OUT_QUEUE, ConsumerOptions::default())
        .await
        .expect("consumer");

    let mut seen: HashMap<u64, u32> = HashMap::new();
    let mut received: u64 = 0;
    while received < MESSAGES {
        let message = verifier
            .receive(Duration::from_secs(10))
            .await
            .expect("receive")
            .unwrap_or_else(|| panic!("drain stalled at {received}/{MESSAGES}"));
        verifier.acknowledge(&message).await.expect("ack");
        let identity: u64 = message
            .header("i")
            .expect("identity header")
            .parse()
            .expect("numeric identity");
        *seen.entry(identity).or_default() += 1;
        received += 1;
    }

    running.store(false, Ordering::SeqCst);
    injector.await.expect("injector");
    feeder.await.expect("feeder");

    // Let any straggling redeliveries settle, then check nothing extra
    // arrives: a duplicate here would be a double commit.
    sleep(Duration::from_millis(300)).await;
    while let Some(extra) = verifier
        .receive(Duration::from_millis(200))
        .await
        .expect("receive")
    {
        verifier.acknowledge(&extra).await.expect("ack");
        let identity: u64 = extra.header("i").expect("identity").parse().expect("id");
        *seen.entry(identity).or_default() += 1;
    }

    for i in 0..MESSAGES {
        match seen.get(&i).copied() {
            Some(1) => {}
            Some(n) => panic!("message {i} committed {n} times"),
            None => panic!("message {i} was lost"),
        }
    }

    // With the injector stopped, the pool converges back to full strength
    // within a bounded number of reconnect intervals.
    let until = Instant::now() + Duration::from_secs(5);
    while handle.live_sessions() != SESSIONS && Instant::now() < until {
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(handle.live_sessions(), SESSIONS);
    // Pool connections plus the producer's and the verifier's.
    assert!(broker.live_connections() >= SESSIONS);

    // Nothing left anywhere on the inbound side.
    assert_eq!(broker.queue_depth(IN_QUEUE), 0);
    assert_eq!(broker.dead_letters(IN_QUEUE), 0);

    handle.deactivate().await.expect("deactivate");
}
