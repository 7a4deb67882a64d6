use futures_util::stream;
use serde_json::json;
use std::{
    future,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    Notify,
};
use vesper_relay::{
    broker::PayloadStream,
    link::{GatewayLink, LinkFuture},
    ControlOp, LocalBroker, NodeControl, Payload, PayloadSink, PayloadSource, UpstreamRelay,
};

/// Gateway link with scriptable inbound payloads and recorded outbound ones.
#[derive(Debug)]
struct FakeLink {
    closed: Mutex<Vec<bool>>,
    inbound: Mutex<Option<UnboundedReceiver<Payload>>>,
    sent: Arc<Mutex<Vec<Payload>>>,
    shutdown: Notify,
}

impl FakeLink {
    fn new() -> (UnboundedSender<Payload>, Arc<Self>) {
        let (tx, rx) = mpsc::unbounded_channel();

        (
            tx,
            Arc::new(Self {
                closed: Mutex::new(Vec::new()),
                inbound: Mutex::new(Some(rx)),
                sent: Arc::new(Mutex::new(Vec::new())),
                shutdown: Notify::new(),
            }),
        )
    }

    fn sent(&self) -> Vec<Payload> {
        self.sent.lock().unwrap().clone()
    }

    fn closes(&self) -> Vec<bool> {
        self.closed.lock().unwrap().clone()
    }
}

impl GatewayLink for FakeLink {
    fn execute(&self, _url: String) -> LinkFuture<'_> {
        Box::pin(async move {
            self.shutdown.notified().await;

            Ok(())
        })
    }

    fn close(&self, reconnect: bool) -> LinkFuture<'_> {
        self.closed.lock().unwrap().push(reconnect);
        self.shutdown.notify_waiters();

        Box::pin(future::ready(Ok(())))
    }

    fn payloads(&self) -> PayloadStream {
        let rx = self
            .inbound
            .lock()
            .unwrap()
            .take()
            .expect("payloads taken twice");

        Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|payload| (payload, rx))
        }))
    }

    fn send(&self, payload: Payload) -> LinkFuture<'_> {
        self.sent.lock().unwrap().push(payload);

        Box::pin(future::ready(Ok(())))
    }

    fn session_id(&self) -> Option<Box<str>> {
        Some(Box::from("leader-session"))
    }

    fn sequence(&self) -> u64 {
        42
    }

    fn response_time(&self) -> Duration {
        Duration::from_millis(5)
    }

    fn is_connected(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn leader_pumps_inbound_payloads_to_the_broker() {
    let (leader_half, worker_half) = LocalBroker::pair();
    let (inbound, link) = FakeLink::new();
    let broker = Arc::new(leader_half);
    let upstream = UpstreamRelay::new(link, broker.clone(), broker);

    let run = tokio::spawn(async move { upstream.execute("wss://gateway.example").await });

    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
    let worker_half = Arc::new(worker_half);
    let observer = Arc::clone(&worker_half);
    tokio::spawn(async move {
        let _ = observer
            .receive(Box::new(move |payload| {
                let _ = seen_tx.send(payload);

                Box::pin(future::ready(()))
            }))
            .await;
    });

    let event = Payload::dispatch("MESSAGE_CREATE", 1, json!({"id": "1"}));
    inbound.send(event.clone()).unwrap();

    assert_eq!(event, seen_rx.recv().await.unwrap());

    run.abort();
}

#[tokio::test]
async fn leader_injects_worker_commands_into_the_link() {
    let (leader_half, worker_half) = LocalBroker::pair();
    let (_inbound, link) = FakeLink::new();
    let broker = Arc::new(leader_half);
    let upstream = UpstreamRelay::new(link.clone(), broker.clone(), broker);

    let run = tokio::spawn(async move { upstream.execute("wss://gateway.example").await });

    let command = Payload::new(vesper_relay::OpCode::PresenceUpdate);
    worker_half
        .send(Box::pin(stream::iter([command.clone()])))
        .await
        .unwrap();

    // The pump is asynchronous; wait for the injection to land.
    for _ in 0..100 {
        if !link.sent().is_empty() {
            break;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(vec![command], link.sent());

    run.abort();
}

#[tokio::test]
async fn control_request_closes_the_link_and_is_acknowledged() {
    let (leader_half, worker_half) = LocalBroker::pair();
    let (_inbound, link) = FakeLink::new();
    let broker = Arc::new(leader_half);
    let upstream = UpstreamRelay::new(link.clone(), broker.clone(), broker);

    let run = tokio::spawn(async move { upstream.execute("wss://gateway.example").await });

    let (ack_tx, mut ack_rx) = tokio::sync::mpsc::unbounded_channel();
    let worker_half = Arc::new(worker_half);
    let observer = Arc::clone(&worker_half);
    tokio::spawn(async move {
        let _ = observer
            .receive_control(Box::new(move |control| {
                let _ = ack_tx.send(control);

                Box::pin(future::ready(()))
            }))
            .await;
    });

    worker_half
        .send_control(Box::pin(stream::iter([NodeControl::new(
            ControlOp::Reconnect,
            0,
        )])))
        .await
        .unwrap();

    // The leader echoes the control back once the link is closed.
    let ack = ack_rx.recv().await.unwrap();
    assert_eq!(ControlOp::Reconnect, ack.op());
    assert_eq!(vec![true], link.closes());

    run.abort();
}

#[tokio::test]
async fn accessors_delegate_to_the_link() {
    let (leader_half, _worker_half) = LocalBroker::pair();
    let (_inbound, link) = FakeLink::new();
    let broker = Arc::new(leader_half);
    let upstream = UpstreamRelay::new(link, broker.clone(), broker);

    assert_eq!(Some(Box::from("leader-session")), upstream.session_id());
    assert_eq!(42, upstream.sequence());
    assert_eq!(Duration::from_millis(5), upstream.response_time());
    assert!(upstream.is_connected());
}
