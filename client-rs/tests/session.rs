//! Subscription session against an in-process realtime endpoint
//!
//! The mock endpoint speaks the broker's subprotocol: it acknowledges
//! `connection_init`, answers `subscribe` with `subscribe_success` (or
//! `subscribe_error`), then plays a scripted list of frames.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use async_trait::async_trait;
use commentbus_client::{
    Channel, ConnectionState, Credential, Error, Item, ItemStream, RealtimeGrant, SessionConfig,
    SharedTopicView, StaticTokenSource, SubscriptionSession, TokenSource, TopicView,
    REALTIME_PATH,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone, Default)]
struct MockBroker {
    script: Arc<Vec<String>>,
    reject: bool,
    hang_up: bool,
    withhold_ack: bool,
    received: Arc<Mutex<Vec<Value>>>,
    offered_protocols: Arc<Mutex<Vec<String>>>,
}

impl MockBroker {
    fn with_script(script: Vec<String>) -> Self {
        Self {
            script: Arc::new(script),
            ..Default::default()
        }
    }

    fn frames_of_type(&self, frame_type: &str) -> Vec<Value> {
        self.received
            .lock()
            .iter()
            .filter(|f| f["type"] == frame_type)
            .cloned()
            .collect()
    }
}

fn data_frame(item: &Item) -> String {
    json!({
        "id": "ignored",
        "type": "data",
        "event": serde_json::to_string(item).unwrap(),
    })
    .to_string()
}

async fn realtime(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(broker): State<MockBroker>,
) -> impl IntoResponse {
    if let Some(offered) = headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
    {
        broker.offered_protocols.lock().push(offered.to_string());
    }

    ws.protocols(["aws-appsync-event-ws"])
        .on_upgrade(move |socket| serve_socket(socket, broker))
}

async fn send_json(socket: &mut WebSocket, value: Value) {
    let _ = socket.send(Message::Text(value.to_string().into())).await;
}

async fn serve_socket(mut socket: WebSocket, broker: MockBroker) {
    while let Some(Ok(msg)) = socket.recv().await {
        let text = match msg {
            Message::Text(text) => text.as_str().to_owned(),
            Message::Close(_) => break,
            _ => continue,
        };

        let frame: Value = serde_json::from_str(&text).unwrap();
        broker.received.lock().push(frame.clone());

        match frame["type"].as_str() {
            Some("connection_init") if broker.withhold_ack => {}
            Some("connection_init") => {
                send_json(&mut socket, json!({"type": "connection_ack", "connectionTimeoutMs": 300000})).await;
            }
            Some("subscribe") => {
                let id = frame["id"].as_str().unwrap_or_default().to_string();

                if broker.reject {
                    send_json(
                        &mut socket,
                        json!({
                            "id": id,
                            "type": "subscribe_error",
                            "errors": [{"errorType": "UnauthorizedException"}],
                        }),
                    )
                    .await;
                    continue;
                }

                send_json(&mut socket, json!({"id": id, "type": "subscribe_success"})).await;
                send_json(&mut socket, json!({"type": "ka"})).await;

                for raw in broker.script.iter() {
                    let _ = socket.send(Message::Text(raw.clone().into())).await;
                }

                if broker.hang_up {
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }
            }
            _ => {}
        }
    }
}

async fn spawn_broker(broker: MockBroker) -> SocketAddr {
    let app = Router::new()
        .route(REALTIME_PATH, get(realtime))
        .with_state(broker);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn grant_for(addr: SocketAddr) -> RealtimeGrant {
    RealtimeGrant {
        protocol: Credential::new("k", "h").to_protocol_token().to_string(),
        realtime_host: addr.to_string(),
        channel: "/default/comments".into(),
    }
}

/// Token source that answers only after a delay
struct SlowTokenSource {
    grant: RealtimeGrant,
    delay: Duration,
}

#[async_trait]
impl TokenSource for SlowTokenSource {
    async fn request_token(&self, _channel: &Channel) -> commentbus_client::Result<RealtimeGrant> {
        tokio::time::sleep(self.delay).await;
        Ok(self.grant.clone())
    }
}

fn session_for(addr: SocketAddr, config: SessionConfig) -> SubscriptionSession {
    let grant = grant_for(addr);
    SubscriptionSession::new(
        config.dangerous_plaintext(),
        Arc::new(StaticTokenSource::new(grant)),
    )
}

async fn next(stream: &mut ItemStream) -> Option<commentbus_client::Result<Item>> {
    tokio::time::timeout(Duration::from_secs(5), stream.next_item())
        .await
        .expect("timed out waiting for the session")
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..50 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

#[tokio::test]
async fn test_handshake_and_delivery() {
    let first = Item::new(1, "Alice", "Great article!", "2 hours ago");
    let second = Item::new(2, "Bob", "Question?", "1 hour ago");

    let broker = MockBroker::with_script(vec![
        data_frame(&first),
        json!({"id": "x", "type": "data"}).to_string(),
        "not json".to_string(),
        data_frame(&Item::new(5, "Eve", "   ", "")),
        json!({"id": "x", "type": "data", "event": "{\"no\":\"item\"}"}).to_string(),
        data_frame(&first),
        data_frame(&second),
    ]);
    let addr = spawn_broker(broker.clone()).await;

    let session = session_for(addr, SessionConfig::default());
    let mut stream = session.open().await.unwrap();
    assert_eq!(session.connection_state(), ConnectionState::Subscribed);

    // The session does not deduplicate: the repeated event comes through twice
    let mut delivered = Vec::new();
    for _ in 0..3 {
        delivered.push(next(&mut stream).await.unwrap().unwrap());
    }
    assert_eq!(delivered, vec![first.clone(), first.clone(), second.clone()]);

    let mut view = TopicView::new();
    for item in delivered {
        view.apply(item);
    }
    assert_eq!(view.items(), &[first, second]);

    // Token carried at the negotiation layer next to the event subprotocol
    let offered = broker.offered_protocols.lock().clone();
    assert_eq!(offered.len(), 1);
    let token = Credential::new("k", "h").to_protocol_token();
    assert!(offered[0].contains("aws-appsync-event-ws"));
    assert!(offered[0].contains(token.as_str()));

    let received = broker.received.lock().clone();
    assert_eq!(received[0], json!({"type": "connection_init"}));
    assert_eq!(received[1]["type"], "subscribe");
    assert_eq!(received[1]["channel"], "/default/comments");
    assert_eq!(received[1]["authorization"], json!({"x-api-key": "k", "host": "h"}));

    let id = Uuid::parse_str(received[1]["id"].as_str().unwrap()).unwrap();
    assert_eq!(session.subscription_id(), Some(id));

    session.close().await.unwrap();
    assert_eq!(session.connection_state(), ConnectionState::Closed);
    assert!(next(&mut stream).await.is_none());

    assert!(eventually(|| !broker.frames_of_type("unsubscribe").is_empty()).await);
    let unsubscribe = broker.frames_of_type("unsubscribe");
    assert_eq!(unsubscribe[0]["id"], id.to_string());

    // Second close is a no-op
    session.close().await.unwrap();
    assert_eq!(session.connection_state(), ConnectionState::Closed);
    assert_eq!(broker.frames_of_type("unsubscribe").len(), 1);
}

#[tokio::test]
async fn test_await_connection_ack() {
    let item = Item::new(7, "Carol", "Nice", "");
    let broker = MockBroker::with_script(vec![data_frame(&item)]);
    let addr = spawn_broker(broker.clone()).await;

    let session = session_for(addr, SessionConfig::default().await_connection_ack());
    let mut stream = session.open().await.unwrap();

    assert_eq!(next(&mut stream).await.unwrap().unwrap(), item);
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_subscription_without_authorization() {
    let broker = MockBroker::with_script(vec![]);
    let addr = spawn_broker(broker.clone()).await;

    let session = session_for(addr, SessionConfig::default().subscribe_authorization(false));
    let _stream = session.open().await.unwrap();

    assert!(eventually(|| !broker.frames_of_type("subscribe").is_empty()).await);
    let subscribe = broker.frames_of_type("subscribe");
    assert!(subscribe[0].get("authorization").is_none());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_subscribe_error_surfaces() {
    let broker = MockBroker {
        reject: true,
        ..Default::default()
    };
    let addr = spawn_broker(broker.clone()).await;

    let session = session_for(addr, SessionConfig::default());
    let mut stream = session.open().await.unwrap();

    let err = next(&mut stream).await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Connect(_)));
    assert!(next(&mut stream).await.is_none());
    assert_eq!(session.connection_state(), ConnectionState::Error);
    assert_eq!(session.subscription_id(), None);

    // Reopening after an error uses a fresh subscription id
    let mut again = session.open().await.unwrap();
    assert!(next(&mut again).await.unwrap().is_err());

    let subscribes = broker.frames_of_type("subscribe");
    assert_eq!(subscribes.len(), 2);
    assert_ne!(subscribes[0]["id"], subscribes[1]["id"]);

    session.close().await.unwrap();
    assert_eq!(session.connection_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_reconnect_replaces_subscription() {
    let item = Item::new(3, "Dave", "Again", "");
    let broker = MockBroker {
        script: Arc::new(vec![data_frame(&item)]),
        hang_up: true,
        ..Default::default()
    };
    let addr = spawn_broker(broker.clone()).await;

    let config = SessionConfig::default().auto_reconnect(
        Duration::from_millis(10),
        Duration::from_millis(50),
        3,
    );
    let session = session_for(addr, config);
    let stream = session.open().await.unwrap();
    let view = SharedTopicView::new(TopicView::new());

    let follower = {
        let view = view.clone();
        tokio::spawn(async move { view.follow(stream).await })
    };

    // Every connection replays the same event; the view keeps one copy
    assert!(eventually(|| broker.frames_of_type("subscribe").len() >= 2).await);
    assert!(eventually(|| view.len() == 1).await);

    let ids: Vec<Value> = broker
        .frames_of_type("subscribe")
        .iter()
        .map(|f| f["id"].clone())
        .collect();
    assert_ne!(ids[0], ids[1]);

    session.close().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), follower)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(view.items(), vec![item]);
}

#[tokio::test]
async fn test_open_after_close_is_refused() {
    let broker = MockBroker::with_script(vec![]);
    let addr = spawn_broker(broker).await;

    let session = session_for(addr, SessionConfig::default());
    let _stream = session.open().await.unwrap();

    // A second open while subscribed is refused
    assert!(matches!(session.open().await, Err(Error::Connect(_))));

    session.close().await.unwrap();
    assert!(matches!(session.open().await, Err(Error::Closed)));
}

#[tokio::test]
async fn test_close_while_fetching_grant() {
    let broker = MockBroker::with_script(vec![]);
    let addr = spawn_broker(broker.clone()).await;

    let session = SubscriptionSession::new(
        SessionConfig::default().dangerous_plaintext(),
        Arc::new(SlowTokenSource {
            grant: grant_for(addr),
            delay: Duration::from_millis(300),
        }),
    );

    let (opened, _) = tokio::join!(session.open(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.connection_state(), ConnectionState::Connecting);
        session.close().await.unwrap();
    });

    assert!(matches!(opened, Err(Error::Closed)));
    assert_eq!(session.connection_state(), ConnectionState::Closed);
    assert_eq!(session.subscription_id(), None);

    // Nothing reaches the broker once the grant would have arrived
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(broker.received.lock().is_empty());
    assert_eq!(session.connection_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_close_while_awaiting_ack() {
    let broker = MockBroker {
        withhold_ack: true,
        ..Default::default()
    };
    let addr = spawn_broker(broker.clone()).await;

    let session = session_for(addr, SessionConfig::default().await_connection_ack());
    let mut states = session.state_receiver();

    let (opened, _) = tokio::join!(session.open(), async {
        states
            .wait_for(|state| *state == ConnectionState::Connected)
            .await
            .unwrap();
        session.close().await.unwrap();
    });

    assert!(matches!(opened, Err(Error::Closed)));
    assert_eq!(session.connection_state(), ConnectionState::Closed);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(broker.frames_of_type("subscribe").is_empty());
    assert_eq!(broker.frames_of_type("connection_init").len(), 1);
}
