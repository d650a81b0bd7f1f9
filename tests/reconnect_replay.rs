//! Reconnection tests: a dropped upstream connection is reopened and the
//! accumulated conversation context is silently replayed, using the last
//! provider-confirmed session config rather than the constructor's.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures_util::{SinkExt, StreamExt};

use voicebridge_gateway::core::realtime::{
    ClientConfig, ConnectRequest, ConnectionState, RealtimeClient, RealtimeError, RealtimeResult,
    RealtimeTransport, ReconnectionConfig, TransportFrame, TransportSink, TransportStream,
};

/// Transport whose connections are scripted: each `open` consumes the next
/// prepared inbound channel, and every frame the client sends is forwarded
/// to a shared channel tagged with the connection index.
struct ScriptedTransport {
    inbound: Mutex<VecDeque<UnboundedReceiver<TransportFrame>>>,
    outbound: UnboundedSender<(usize, TransportFrame)>,
    opens: AtomicUsize,
}

#[async_trait::async_trait]
impl RealtimeTransport for ScriptedTransport {
    async fn open(
        &self,
        _request: &ConnectRequest,
    ) -> RealtimeResult<(TransportSink, TransportStream)> {
        let index = self.opens.fetch_add(1, Ordering::SeqCst);
        let receiver = self
            .inbound
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| RealtimeError::ConnectionFailed("no more connections".to_string()))?;

        let sink = self
            .outbound
            .clone()
            .sink_map_err(|e| RealtimeError::WebSocketError(e.to_string()))
            .with(move |frame: TransportFrame| {
                futures_util::future::ready(Ok::<_, RealtimeError>((index, frame)))
            });
        let stream = receiver.map(Ok);
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

struct Fixture {
    client: Arc<RealtimeClient>,
    server_tx: Vec<UnboundedSender<TransportFrame>>,
    sent_rx: UnboundedReceiver<(usize, TransportFrame)>,
    events_seen: Arc<AtomicUsize>,
}

fn fixture(connections: usize, reconnection: ReconnectionConfig) -> Fixture {
    let mut server_tx = Vec::new();
    let mut inbound = VecDeque::new();
    for _ in 0..connections {
        let (tx, rx) = unbounded();
        server_tx.push(tx);
        inbound.push_back(rx);
    }
    let (outbound_tx, sent_rx) = unbounded();
    let transport = Arc::new(ScriptedTransport {
        inbound: Mutex::new(inbound),
        outbound: outbound_tx,
        opens: AtomicUsize::new(0),
    });

    let client = Arc::new(
        RealtimeClient::new(
            ClientConfig {
                api_key: "test_key".to_string(),
                model: "gpt-4o-realtime-preview".to_string(),
                voice: Some("alloy".to_string()),
                instructions: Some("constructor instructions".to_string()),
                reconnection: Some(reconnection),
                ..Default::default()
            },
            transport,
        )
        .unwrap(),
    );

    let events_seen = Arc::new(AtomicUsize::new(0));
    let counter = events_seen.clone();
    client.on_server_event(Arc::new(move |_event| {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }));

    Fixture {
        client,
        server_tx,
        sent_rx,
        events_seen,
    }
}

fn inject(tx: &UnboundedSender<TransportFrame>, json: &str) {
    tx.unbounded_send(TransportFrame::Text(json.to_string()))
        .unwrap();
}

fn item_created(id: &str, previous: Option<&str>) -> String {
    let previous = match previous {
        Some(p) => format!("\"{p}\""),
        None => "null".to_string(),
    };
    format!(
        r#"{{"type":"conversation.item.created","previous_item_id":{previous},"item":{{"id":"{id}","type":"message","role":"user","content":[{{"type":"input_text","text":"{id}"}}]}}}}"#
    )
}

async fn wait_for<F: Fn() -> bool>(condition: F, what: &str) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn next_frame(rx: &mut UnboundedReceiver<(usize, TransportFrame)>) -> (usize, serde_json::Value) {
    let (index, frame) = tokio::time::timeout(Duration::from_secs(2), rx.next())
        .await
        .expect("timed out waiting for frame")
        .expect("outbound channel closed");
    match frame {
        TransportFrame::Text(text) => (index, serde_json::from_str(&text).unwrap()),
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn reconnect_replays_store_with_confirmed_config() {
    let mut fixture = fixture(
        2,
        ReconnectionConfig {
            enabled: true,
            max_attempts: 3,
            initial_delay_ms: 10,
            max_delay_ms: 50,
            backoff_multiplier: 2.0,
            jitter: false,
        },
    );

    fixture.client.connect().await.unwrap();
    assert_eq!(fixture.client.connection_state(), ConnectionState::Connected);

    // Initial negotiation uses the constructor's config.
    let (index, frame) = next_frame(&mut fixture.sent_rx).await;
    assert_eq!(index, 0);
    assert_eq!(frame["type"], "session.update");
    assert_eq!(frame["session"]["instructions"], "constructor instructions");
    assert!(frame["event_id"].as_str().unwrap().starts_with("evt_"));

    // The provider confirms a session with different instructions; that
    // confirmed config becomes the reconnect baseline.
    inject(
        &fixture.server_tx[0],
        r#"{"type":"session.created","session":{"id":"sess_1","object":"realtime.session","model":"gpt-4o-realtime-preview","expires_at":1700000000,"instructions":"confirmed instructions","voice":"echo"}}"#,
    );

    // Three items accumulate in the store.
    inject(&fixture.server_tx[0], &item_created("item_a", None));
    inject(&fixture.server_tx[0], &item_created("item_b", Some("item_a")));
    inject(&fixture.server_tx[0], &item_created("item_c", Some("item_b")));

    let client = fixture.client.clone();
    wait_for(|| client.item_count() == 3, "items to be stored").await;
    assert_eq!(fixture.client.session_id().as_deref(), Some("sess_1"));
    let events_before = fixture.events_seen.load(Ordering::SeqCst);
    assert_eq!(events_before, 4);

    // Drop the connection; the client reconnects and silently rebuilds
    // upstream context.
    fixture.server_tx.remove(0);

    let client = fixture.client.clone();
    wait_for(
        || client.connection_state() == ConnectionState::Connected && client.session_id().is_none(),
        "reconnection",
    )
    .await;

    // First replayed frame: the provider-confirmed baseline, not the
    // constructor's config.
    let (index, frame) = next_frame(&mut fixture.sent_rx).await;
    assert_eq!(index, 1);
    assert_eq!(frame["type"], "session.update");
    assert_eq!(frame["session"]["instructions"], "confirmed instructions");
    assert_eq!(frame["session"]["voice"], "echo");
    assert!(frame["session"].get("id").is_none());
    assert!(frame["session"].get("model").is_none());

    // Then exactly one create command per stored item, in store order, each
    // carrying its recorded previous-item-id.
    let expected = [
        ("item_a", serde_json::Value::Null),
        ("item_b", serde_json::json!("item_a")),
        ("item_c", serde_json::json!("item_b")),
    ];
    for (id, previous) in expected {
        let (index, frame) = next_frame(&mut fixture.sent_rx).await;
        assert_eq!(index, 1);
        assert_eq!(frame["type"], "conversation.item.create");
        assert_eq!(frame["item"]["id"], *id);
        assert_eq!(
            frame.get("previous_item_id").cloned().unwrap_or_default(),
            previous
        );
    }

    // No further frames were sent: exactly N item creates.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fixture.sent_rx.try_next().is_err(), "no extra frames expected");

    // Subscribers were not re-notified during the silent reconnect.
    assert_eq!(fixture.events_seen.load(Ordering::SeqCst), events_before);

    // The store itself is unchanged.
    let ids: Vec<_> = fixture
        .client
        .ordered_items()
        .into_iter()
        .map(|item| item.id.unwrap())
        .collect();
    assert_eq!(ids, vec!["item_a", "item_b", "item_c"]);
}

#[tokio::test]
async fn disabled_reconnection_surfaces_error_and_disconnects() {
    let mut fixture = fixture(1, ReconnectionConfig::disabled());

    let errors = Arc::new(AtomicUsize::new(0));
    let counter = errors.clone();
    fixture.client.on_error(Arc::new(move |_error| {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }));

    fixture.client.connect().await.unwrap();
    let (_, frame) = next_frame(&mut fixture.sent_rx).await;
    assert_eq!(frame["type"], "session.update");

    // Drop the connection: no reconnect attempt is made.
    fixture.server_tx.clear();

    let client = fixture.client.clone();
    wait_for(
        || client.connection_state() == ConnectionState::Disconnected,
        "disconnect",
    )
    .await;
    assert!(!fixture.client.is_ready());
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    // Commands now fail with a precondition error.
    assert!(matches!(
        fixture.client.commit_input_audio().await,
        Err(RealtimeError::NotConnected)
    ));
}

#[tokio::test]
async fn replay_with_empty_store_resends_config_only() {
    let mut fixture = fixture(
        2,
        ReconnectionConfig {
            enabled: true,
            max_attempts: 3,
            initial_delay_ms: 10,
            max_delay_ms: 50,
            backoff_multiplier: 2.0,
            jitter: false,
        },
    );

    fixture.client.connect().await.unwrap();
    let (_, frame) = next_frame(&mut fixture.sent_rx).await;
    assert_eq!(frame["type"], "session.update");

    fixture.server_tx.remove(0);

    let client = fixture.client.clone();
    wait_for(
        || client.connection_state() == ConnectionState::Connected,
        "reconnection",
    )
    .await;

    // With no confirmed baseline and an empty store, the replay is just the
    // desired session config.
    let (index, frame) = next_frame(&mut fixture.sent_rx).await;
    assert_eq!(index, 1);
    assert_eq!(frame["type"], "session.update");
    assert_eq!(frame["session"]["instructions"], "constructor instructions");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fixture.sent_rx.try_next().is_err());
}
