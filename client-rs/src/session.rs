//! Subscription session over the realtime WebSocket endpoint

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::messages::{ClientFrame, InboundFrame, Item};
use crate::source::TokenSource;
use crate::token::ProtocolToken;

use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of a subscription session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never opened
    Disconnected,
    /// Fetching a grant and establishing the connection
    Connecting,
    /// Connection open, handshake frames not yet sent
    Connected,
    /// Subscribe frame sent; events are flowing
    Subscribed,
    /// Transport failed or the broker rejected the handshake
    Error,
    /// Torn down by the owner
    Closed,
}

/// How an inbound text frame should be handled
#[derive(Debug)]
enum Frame {
    Item(Item),
    Ack,
    Rejected(String),
    Ignored,
    Malformed(String),
}

fn classify_frame(text: &str) -> Frame {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => return Frame::Malformed(e.to_string()),
    };

    if frame.is_rejection() {
        let detail = frame
            .errors
            .map(|errors| errors.to_string())
            .unwrap_or_else(|| frame.frame_type.clone());
        return Frame::Rejected(detail);
    }

    match frame.item() {
        // Empty content is never published, so never shown either
        Some(Ok(item)) if !item.has_content() => Frame::Ignored,
        Some(Ok(item)) => Frame::Item(item),
        Some(Err(e)) => Frame::Malformed(format!("undecodable event: {}", e)),
        None if frame.frame_type == "connection_ack" => Frame::Ack,
        None => Frame::Ignored,
    }
}

/// State shared between the session handle and its receive loop
struct Shared {
    config: SessionConfig,
    tokens: Arc<dyn TokenSource>,
    state: watch::Sender<ConnectionState>,
    subscription_id: Mutex<Option<Uuid>>,
}

impl Shared {
    /// `Closed` is terminal; no later transition overrides it
    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == ConnectionState::Closed || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    /// Atomically move to `Connecting` if an open is allowed
    fn begin_open(&self) -> Result<()> {
        let mut refused = None;
        self.state.send_if_modified(|current| match *current {
            ConnectionState::Disconnected | ConnectionState::Error => {
                *current = ConnectionState::Connecting;
                true
            }
            other => {
                refused = Some(other);
                false
            }
        });

        match refused {
            None => Ok(()),
            Some(ConnectionState::Closed) => Err(Error::Closed),
            Some(state) => Err(Error::Connect(format!("Cannot open in state: {:?}", state))),
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

/// Lazy sequence of items delivered by a session
///
/// Yields `Err` once if the connection fails for good, then ends.
pub struct ItemStream {
    rx: mpsc::Receiver<Result<Item>>,
}

impl ItemStream {
    /// Wait for the next item
    pub async fn next_item(&mut self) -> Option<Result<Item>> {
        self.rx.recv().await
    }

    /// Invoke `on_item` once per delivered item, in arrival order
    ///
    /// Returns when the session closes, or with the error that ended it.
    pub async fn for_each_item<F>(mut self, mut on_item: F) -> Result<()>
    where
        F: FnMut(Item),
    {
        while let Some(next) = self.rx.recv().await {
            on_item(next?);
        }
        Ok(())
    }
}

impl Stream for ItemStream {
    type Item = Result<Item>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// One persistent subscription to a topic
///
/// The owner calls [`open`](Self::open) and [`close`](Self::close)
/// explicitly. Dropping the session also stops the receive loop.
pub struct SubscriptionSession {
    shared: Arc<Shared>,
    shutdown: Mutex<Option<mpsc::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionSession {
    pub fn new(config: SessionConfig, tokens: Arc<dyn TokenSource>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            shared: Arc::new(Shared {
                config,
                tokens,
                state,
                subscription_id: Mutex::new(None),
            }),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Get the current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.current_state()
    }

    /// Get a receiver for connection state changes
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Id of the live subscription, if any
    pub fn subscription_id(&self) -> Option<Uuid> {
        *self.shared.subscription_id.lock()
    }

    /// Connect, subscribe, and start delivering items
    ///
    /// Allowed from `Disconnected` or after an `Error`; each call uses a
    /// fresh subscription id. A [`close`](Self::close) issued while the
    /// connection is still being established cancels it.
    pub async fn open(&self) -> Result<ItemStream> {
        self.shared.begin_open()?;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown.lock() = Some(shutdown_tx);

        let established = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => Err(Error::Closed),
            result = establish(&self.shared) => result,
        };

        let (mut ws, subscription_id) = match established {
            Ok(conn) => conn,
            Err(Error::Closed) => {
                debug!("Open cancelled by close");
                return Err(Error::Closed);
            }
            Err(e) => {
                self.shared.set_state(ConnectionState::Error);
                return Err(e);
            }
        };

        // close() may have finished before its shutdown signal could be seen
        if self.shared.current_state() == ConnectionState::Closed {
            teardown(&mut ws, subscription_id).await;
            *self.shared.subscription_id.lock() = None;
            return Err(Error::Closed);
        }

        let (tx, rx) = mpsc::channel(self.shared.config.event_buffer);

        let handle = tokio::spawn(receive_loop(
            self.shared.clone(),
            ws,
            subscription_id,
            tx,
            shutdown_rx,
        ));

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }

        Ok(ItemStream { rx })
    }

    /// Tear the session down
    ///
    /// Idempotent and safe in any state, including before the subscription
    /// was established.
    pub async fn close(&self) -> Result<()> {
        if self.connection_state() == ConnectionState::Closed {
            return Ok(());
        }

        let shutdown = self.shutdown.lock().take();
        if let Some(tx) = shutdown {
            let _ = tx.send(()).await;
        }

        let task = self.task.lock().take();
        if let Some(handle) = task {
            let abort = handle.abort_handle();
            // The loop sends unsubscribe + close; do not wait forever on a dead peer
            if timeout(self.shared.config.connect_timeout, handle).await.is_err() {
                warn!("Receive loop did not stop in time");
                abort.abort();
            }
        }

        *self.shared.subscription_id.lock() = None;
        self.shared.set_state(ConnectionState::Closed);
        debug!("Session closed");
        Ok(())
    }
}

impl Drop for SubscriptionSession {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

/// Fetch a grant, connect, and run the init/subscribe handshake
async fn establish(shared: &Shared) -> Result<(WsStream, Uuid)> {
    shared.set_state(ConnectionState::Connecting);
    let subscription_id = Uuid::new_v4();
    let config = &shared.config;

    let grant = shared.tokens.request_token(&config.channel).await?;
    let token = ProtocolToken::parse(&grant.protocol)?;

    let url = config.endpoint_url(&grant.realtime_host);
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::Config(format!("invalid realtime endpoint {}: {}", url, e)))?;
    let protocols = HeaderValue::from_str(&token.subprotocols())
        .map_err(|e| Error::Config(format!("token is not a valid header value: {}", e)))?;
    request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocols);

    debug!(url = %url, "Connecting to realtime endpoint");
    let (mut ws, _response) = timeout(config.connect_timeout, connect_async(request))
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(|e| Error::Connect(e.to_string()))?;

    shared.set_state(ConnectionState::Connected);

    send_frame(&mut ws, &ClientFrame::ConnectionInit).await?;

    if config.await_connection_ack {
        timeout(config.connect_timeout, wait_for_ack(&mut ws))
            .await
            .map_err(|_| Error::Timeout)??;
    }

    let authorization = if config.subscribe_authorization {
        Some(token.credential()?)
    } else {
        None
    };

    send_frame(
        &mut ws,
        &ClientFrame::Subscribe {
            id: subscription_id.to_string(),
            channel: config.channel.to_string(),
            authorization,
        },
    )
    .await?;

    *shared.subscription_id.lock() = Some(subscription_id);
    shared.set_state(ConnectionState::Subscribed);
    info!(subscription_id = %subscription_id, channel = %config.channel, "Subscribed");

    Ok((ws, subscription_id))
}

async fn send_frame(ws: &mut WsStream, frame: &ClientFrame) -> Result<()> {
    let text = serde_json::to_string(frame)?;
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| Error::Connect(e.to_string()))
}

async fn wait_for_ack(ws: &mut WsStream) -> Result<()> {
    while let Some(msg) = ws.next().await {
        match msg.map_err(|e| Error::Connect(e.to_string()))? {
            Message::Text(text) => match classify_frame(text.as_str()) {
                Frame::Ack => return Ok(()),
                Frame::Rejected(detail) => {
                    return Err(Error::Connect(format!("connection rejected: {}", detail)))
                }
                _ => continue,
            },
            Message::Close(_) => break,
            _ => continue,
        }
    }
    Err(Error::Connect("Connection closed before acknowledgement".into()))
}

/// Why a single connection stopped
enum Exit {
    Shutdown,
    OwnerGone,
}

/// Pump frames from the socket into the item channel until told to stop
async fn run_connection(
    ws: &mut WsStream,
    tx: &mpsc::Sender<Result<Item>>,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> Result<Exit> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => return Ok(Exit::Shutdown),

            msg = ws.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(Error::Connect("Connection closed by server".into()));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(Error::Connect(e.to_string())),
                };

                match classify_frame(&text) {
                    Frame::Item(item) => {
                        debug!(item_id = item.id, "Received item");
                        if tx.send(Ok(item)).await.is_err() {
                            return Ok(Exit::OwnerGone);
                        }
                    }
                    Frame::Rejected(detail) => {
                        return Err(Error::Connect(format!("subscription rejected: {}", detail)));
                    }
                    Frame::Malformed(reason) => {
                        let err = Error::Protocol(reason);
                        warn!(error = %err, "Dropping inbound frame");
                    }
                    Frame::Ack | Frame::Ignored => {}
                }
            }
        }
    }
}

/// Unsubscribe and close, ignoring failures on an already-broken socket
async fn teardown(ws: &mut WsStream, subscription_id: Uuid) {
    let _ = send_frame(
        ws,
        &ClientFrame::Unsubscribe {
            id: subscription_id.to_string(),
        },
    )
    .await;
    let _ = ws.close(None).await;
}

/// Retry with bounded exponential backoff; `Ok(None)` means shutdown was requested
async fn reconnect(
    shared: &Shared,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> Result<Option<(WsStream, Uuid)>> {
    let config = &shared.config;
    let mut attempt = 0u32;

    loop {
        if attempt >= config.max_reconnect_attempts {
            return Err(Error::Connect(format!(
                "gave up after {} reconnect attempts",
                attempt
            )));
        }

        let delay = config.backoff(attempt);
        info!("Reconnecting in {:?}...", delay);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.recv() => return Ok(None),
        }

        match establish(shared).await {
            Ok(conn) => return Ok(Some(conn)),
            Err(e) => {
                warn!("Reconnect attempt {} failed: {}", attempt + 1, e);
                shared.set_state(ConnectionState::Error);
                attempt += 1;
            }
        }
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    mut ws: WsStream,
    mut subscription_id: Uuid,
    tx: mpsc::Sender<Result<Item>>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        let err = match run_connection(&mut ws, &tx, &mut shutdown_rx).await {
            Ok(exit) => {
                if matches!(exit, Exit::OwnerGone) {
                    debug!(subscription_id = %subscription_id, "Item stream dropped");
                }
                teardown(&mut ws, subscription_id).await;
                return;
            }
            Err(e) => e,
        };

        warn!(subscription_id = %subscription_id, error = %err, "Session error");
        shared.set_state(ConnectionState::Error);
        *shared.subscription_id.lock() = None;

        if !shared.config.auto_reconnect {
            let _ = tx.send(Err(err)).await;
            return;
        }

        match reconnect(&shared, &mut shutdown_rx).await {
            Ok(Some((next_ws, next_id))) => {
                ws = next_ws;
                subscription_id = next_id;
            }
            Ok(None) => return,
            Err(gave_up) => {
                warn!(error = %gave_up, "Giving up on reconnect");
                let _ = tx.send(Err(err)).await;
                return;
            }
        }
    }
}
