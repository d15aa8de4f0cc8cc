use std::time::Duration;

use assert_matches::assert_matches;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use crate::config::{Protocol, SimConfig};
use crate::network::SimulatedNetwork;
use crate::types::{Message, Payload};

fn network_config(num_nodes: usize, loss: f64, latency: Duration) -> SimConfig {
    let mut config = SimConfig::base("network_test", Protocol::Pbft, num_nodes, 1024);
    config.packet_loss_prob = loss;
    config.network_latency = latency;
    config
}

fn new_view(requested_view: u64) -> Payload {
    Payload::NewView { requested_view }
}

#[tokio::test(start_paused = true)]
async fn message_is_delivered_after_latency() {
    let config = network_config(4, 0.0, Duration::from_millis(20));
    let network = SimulatedNetwork::new(&config, CancellationToken::new());
    let mut inbox = network.take_inbox(1);

    network.send(Message { from: 0, to: 1, payload: new_view(7) });
    let before = tokio::time::Instant::now();
    let message = inbox.recv().await.unwrap();

    assert_eq!(message.from, 0);
    assert_eq!(message.to, 1);
    assert_matches!(message.payload, Payload::NewView { requested_view: 7 });
    assert!(before.elapsed() >= Duration::from_millis(20));
}

#[tokio::test(start_paused = true)]
async fn total_loss_delivers_nothing() {
    let config = network_config(4, 1.0, Duration::from_millis(5));
    let network = SimulatedNetwork::new(&config, CancellationToken::new());
    let mut inbox = network.take_inbox(2);

    for view in 0..50 {
        network.send(Message { from: 0, to: 2, payload: new_view(view) });
    }
    let received = tokio::time::timeout(Duration::from_secs(1), inbox.recv()).await;
    assert!(received.is_err(), "every message should have been dropped");
}

#[tokio::test(start_paused = true)]
async fn broadcast_reaches_everyone_but_the_sender() {
    let config = network_config(4, 0.0, Duration::from_millis(1));
    let network = SimulatedNetwork::new(&config, CancellationToken::new());
    let mut inboxes: Vec<_> = (0..4).map(|id| network.take_inbox(id)).collect();

    network.broadcast(1, new_view(3));
    tokio::time::sleep(Duration::from_millis(10)).await;

    for (id, inbox) in inboxes.iter_mut().enumerate() {
        if id == 1 {
            assert_matches!(inbox.try_recv(), Err(TryRecvError::Empty));
        } else {
            let message = inbox.try_recv().unwrap();
            assert_eq!(message.from, 1);
            assert_eq!(message.to, id);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_inflight_deliveries() {
    let config = network_config(4, 0.0, Duration::from_secs(3600));
    let network = SimulatedNetwork::new(&config, CancellationToken::new());
    let mut inbox = network.take_inbox(1);

    network.send(Message { from: 0, to: 1, payload: new_view(0) });
    // Completes promptly even though the delivery still has an hour of
    // latency ahead of it.
    network.shutdown().await;
    assert_matches!(inbox.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test(start_paused = true)]
async fn identical_seeds_reproduce_loss_patterns() {
    let config = network_config(4, 0.5, Duration::from_millis(1));
    let mut received = Vec::new();
    for _ in 0..2 {
        let network = SimulatedNetwork::new(&config, CancellationToken::new());
        let mut inbox = network.take_inbox(1);
        for view in 0..100 {
            network.send(Message { from: 0, to: 1, payload: new_view(view) });
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut views = Vec::new();
        while let Ok(message) = inbox.try_recv() {
            if let Payload::NewView { requested_view } = message.payload {
                views.push(requested_view);
            }
        }
        views.sort_unstable();
        received.push(views);
        network.shutdown().await;
    }
    assert_eq!(received[0], received[1]);
}

#[tokio::test]
#[should_panic(expected = "inbox already taken")]
async fn taking_an_inbox_twice_panics() {
    let config = network_config(4, 0.0, Duration::from_millis(1));
    let network = SimulatedNetwork::new(&config, CancellationToken::new());
    let _first = network.take_inbox(0);
    let _second = network.take_inbox(0);
}
