/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

use crate::client::StreamClient;
use crate::config::StreamConfig;
use crate::connection::{DisconnectCallback, WebSocketConnection};
use crate::error::{StreamError, StreamResult};
use crate::events::{Balance, Bar, FieldMap, Order, Position, Quote};
use crate::ledger::SubscriptionLedger;
use crate::messages::{
    CMD_CREATE_SESSION, CMD_PING, CMD_SUBSCRIBE, CMD_UNSUBSCRIBE, HTTP_CLIENT_TYPE, PONG_FRAME,
    SessionCreatedMessage, SubscriptionMessage, TOPIC_BALANCE, TOPIC_CANDLE, TOPIC_ORDER,
    TOPIC_POSITION, TOPIC_QUOTE,
};
use crate::utils::{Outlet, etna_topic};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

/// Identifiers of an existing venue session.
///
/// When all three are set the stream resumes that session instead of logging
/// in with the account credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIdentity {
    pub stream_session_id: String,
    pub user_session_id: String,
    pub user_id: i32,
}

impl SessionIdentity {
    fn can_resume(&self) -> bool {
        !self.stream_session_id.is_empty() && !self.user_session_id.is_empty() && self.user_id != 0
    }
}

struct Outlets {
    quotes: Outlet<Quote>,
    bars: Outlet<Bar>,
    balances: Outlet<Balance>,
    positions: Outlet<Position>,
    orders: Outlet<Order>,
}

struct EtnaState {
    url: String,
    login: String,
    password: String,
    session: Mutex<SessionIdentity>,
    ledger: SubscriptionLedger,
    outlets: Outlets,
    resubscribe: bool,
}

impl EtnaState {
    fn session(&self) -> MutexGuard<'_, SessionIdentity> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `{url}/CreateSession.txt?HttpClientType=WebSocket&Password=..&User=..`
    fn create_url(&self) -> StreamResult<String> {
        let session = self.session().clone();
        let (user, password) = if session.can_resume() {
            (
                format!("{}:{}", session.user_id, session.user_session_id),
                session.stream_session_id,
            )
        } else {
            (
                decode_credential("login", &self.login)?,
                decode_credential("password", &self.password)?,
            )
        };

        let query = serde_urlencoded::to_string([
            ("HttpClientType", HTTP_CLIENT_TYPE),
            ("Password", password.as_str()),
            ("User", user.as_str()),
        ])
        .map_err(|e| StreamError::Credentials(format!("can't encode session query: {}", e)))?;

        Ok(format!("{}/{}?{}", self.url, CMD_CREATE_SESSION, query))
    }
}

fn decode_credential(what: &str, encoded: &str) -> StreamResult<String> {
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|e| StreamError::Credentials(format!("can't decode {}: {}", what, e)))?;
    let start = raw.iter().position(|b| *b != 0).unwrap_or(raw.len());
    let end = raw.iter().rposition(|b| *b != 0).map_or(start, |i| i + 1);
    String::from_utf8(raw[start..end].to_vec())
        .map_err(|e| StreamError::Credentials(format!("{} is not UTF-8: {}", what, e)))
}

/// Streaming client for the Etna trading platform.
///
/// One stream carries market data (quotes, candles) and account data
/// (balances, positions, orders). Records are published on bounded queues
/// handed out once by the `*_stream` accessors. Records of a type whose queue
/// was never taken are dropped; a taken queue that is never drained
/// eventually stalls the receive task.
///
/// # Example
///
/// ```no_run
/// use etnalink::{EtnaStream, SessionIdentity, StreamConfig};
///
/// # async fn run() -> etnalink::StreamResult<()> {
/// let stream = EtnaStream::new(
///     "md",
///     "wss://pub-api.etnasoft.com/api/v1.0",
///     "dXNlcg==",
///     "c2VjcmV0",
///     SessionIdentity::default(),
///     StreamConfig::default(),
/// );
/// let mut quotes = stream.quote_stream()?;
/// stream.start().await?;
/// stream.subscribe("Quote", "AAPL").await?;
/// while let Some(quote) = quotes.recv().await {
///     println!("{} {} {}", quote.symbol, quote.bid, quote.ask);
/// }
/// # Ok(())
/// # }
/// ```
pub struct EtnaStream {
    client: StreamClient,
    state: Arc<EtnaState>,
}

impl EtnaStream {
    /// Creates a stream that is not yet connected.
    ///
    /// # Arguments
    ///
    /// * `name` - Label used in logs and passed to the connect handler.
    /// * `url` - Base URL of the streaming API; `/CreateSession.txt` is appended.
    /// * `login`, `password` - Base64 encoded account credentials.
    /// * `session` - A previous session to resume; `SessionIdentity::default()`
    ///   logs in with the credentials.
    /// * `config` - Timeouts, backoff and queue capacities.
    pub fn new(
        name: &str,
        url: &str,
        login: &str,
        password: &str,
        session: SessionIdentity,
        config: StreamConfig,
    ) -> Self {
        let state = Arc::new(EtnaState {
            url: url.trim_end_matches('/').to_string(),
            login: login.to_string(),
            password: password.to_string(),
            session: Mutex::new(session),
            ledger: SubscriptionLedger::new(),
            outlets: Outlets {
                quotes: Outlet::new("quote", config.quotes_capacity),
                bars: Outlet::new("bar", config.bars_capacity),
                balances: Outlet::new("balance", config.balances_capacity),
                positions: Outlet::new("position", config.positions_capacity),
                orders: Outlet::new("order", config.orders_capacity),
            },
            resubscribe: config.resubscribe_on_reconnect,
        });

        let client = StreamClient::new(name, config);

        let connect_state = state.clone();
        client.set_connect_func(move |client| open_connection(connect_state.clone(), client).boxed());
        client.set_topic_func(etna_topic);
        let handler_state = state.clone();
        client.set_message_handler(move |client, topic, frame| {
            on_message(handler_state.clone(), client, topic, frame).boxed()
        });

        Self { client, state }
    }

    /// Connects and waits for the venue to create the session.
    ///
    /// # Returns
    ///
    /// * `Ok(())` once the stream is operational.
    /// * `Err(StreamError::Timeout)` if no session was created within
    ///   `start_timeout`; the half-open socket is closed.
    /// * Any credential or connection error raised while dialing.
    pub async fn start(&self) -> StreamResult<()> {
        self.client.start().await
    }

    /// Closes the socket and ends the background tasks and any reconnect loop.
    pub async fn stop(&self) {
        self.client.stop().await
    }

    /// Socket connected and session created.
    pub fn is_operational(&self) -> bool {
        self.client.is_operational()
    }

    /// Requests `(topic, key)`. The subscription is recorded once the venue
    /// acknowledges it; repeating a known pair sends nothing.
    ///
    /// # Arguments
    ///
    /// * `topic` - Entity type such as `Quote`, `Candle` or `Order`.
    /// * `key` - Entity key, e.g. a symbol.
    ///
    /// # Returns
    ///
    /// * `Err(StreamError::NotConnected)` while no session is established,
    ///   including the window in which a lost socket is being replaced.
    ///   Subscriptions made before the loss are replayed on the new session.
    pub async fn subscribe(&self, topic: &str, key: &str) -> StreamResult<()> {
        if !self.client.is_operational() {
            return Err(StreamError::NotConnected);
        }
        if self.state.ledger.is_known(topic, key) {
            debug!("{}: already subscribed {}: {}", self.client.name(), topic, key);
            return Ok(());
        }

        let session_id = self.state.session().user_session_id.clone();
        self.state.ledger.mark_pending(topic, key);
        self.client
            .send_json(&SubscriptionMessage::subscribe(topic, key, &session_id))
            .await
    }

    /// Cancels `(topic, key)`. The local record is dropped right away.
    ///
    /// Fails with `NotConnected` while no session is established and with
    /// `Subscription` if the pair is not active.
    pub async fn unsubscribe(&self, topic: &str, key: &str) -> StreamResult<()> {
        if !self.client.is_operational() {
            return Err(StreamError::NotConnected);
        }
        self.state.ledger.remove(topic, key)?;

        let session_id = self.state.session().user_session_id.clone();
        self.client
            .send_json(&SubscriptionMessage::unsubscribe(topic, key, &session_id))
            .await
    }

    /// Acknowledged subscriptions by topic.
    pub fn subscriptions(&self) -> HashMap<String, Vec<String>> {
        self.state.ledger.snapshot()
    }

    /// Current session identifiers; the user session id is replaced on every
    /// session the venue creates.
    pub fn session(&self) -> SessionIdentity {
        self.state.session().clone()
    }

    /// Receiver of decoded quotes. It can be taken once; quotes arriving
    /// before that are dropped.
    pub fn quote_stream(&self) -> StreamResult<mpsc::Receiver<Quote>> {
        self.state.outlets.quotes.take()
    }

    /// Completed bars only.
    pub fn bar_stream(&self) -> StreamResult<mpsc::Receiver<Bar>> {
        self.state.outlets.bars.take()
    }

    pub fn balance_stream(&self) -> StreamResult<mpsc::Receiver<Balance>> {
        self.state.outlets.balances.take()
    }

    pub fn position_stream(&self) -> StreamResult<mpsc::Receiver<Position>> {
        self.state.outlets.positions.take()
    }

    pub fn order_stream(&self) -> StreamResult<mpsc::Receiver<Order>> {
        self.state.outlets.orders.take()
    }

    /// See [`StreamClient::set_connect_handler`].
    pub fn set_connect_handler<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.client.set_connect_handler(callback);
    }

    pub fn set_disconnect_handler(&self, callback: DisconnectCallback) {
        self.client.set_disconnect_handler(callback);
    }

    /// The underlying engine.
    pub fn client(&self) -> &StreamClient {
        &self.client
    }
}

async fn open_connection(
    state: Arc<EtnaState>,
    client: StreamClient,
) -> StreamResult<WebSocketConnection> {
    if client.has_connection() {
        return Err(StreamError::Connection(
            "connection already exists".to_string(),
        ));
    }
    let url = state.create_url()?;
    info!("{}: connecting: {}", client.name(), state.url);
    client.dial(&url).await
}

fn decoding_fault(what: &str, e: StreamError) -> StreamError {
    StreamError::Decode(format!("{} decoding fault: {}", what, e))
}

async fn on_message(
    state: Arc<EtnaState>,
    client: StreamClient,
    topic: String,
    frame: Vec<u8>,
) -> StreamResult<()> {
    let outlets = &state.outlets;

    match topic.as_str() {
        TOPIC_QUOTE => {
            let quote = FieldMap::from_slice(&frame)
                .and_then(|fields| Quote::from_fields(&fields))
                .map_err(|e| decoding_fault("quote", e))?;
            outlets.quotes.publish(quote).await
        }
        TOPIC_CANDLE => {
            let bar = FieldMap::from_slice(&frame)
                .and_then(|fields| Bar::from_fields(&fields))
                .map_err(|e| decoding_fault("bar", e))?;
            if !bar.is_completed {
                trace!("{}: partial bar {} skipped", client.name(), bar.symbol);
                return Ok(());
            }
            outlets.bars.publish(bar).await
        }
        TOPIC_ORDER => {
            log_frame(&client, &frame);
            let order = FieldMap::from_slice(&frame)
                .and_then(|fields| Order::from_fields(&fields))
                .map_err(|e| decoding_fault("order", e))?;
            outlets.orders.publish(order).await
        }
        TOPIC_POSITION => {
            log_frame(&client, &frame);
            let position = FieldMap::from_slice(&frame)
                .and_then(|fields| Position::from_fields(&fields))
                .map_err(|e| decoding_fault("position", e))?;
            outlets.positions.publish(position).await
        }
        TOPIC_BALANCE => {
            log_frame(&client, &frame);
            let balance = Balance::from_slice(&frame).map_err(|e| decoding_fault("balance", e))?;
            outlets.balances.publish(balance).await
        }
        CMD_PING => client.enqueue(PONG_FRAME.to_string()).await,
        CMD_SUBSCRIBE => {
            log_frame(&client, &frame);
            let ack: SubscriptionMessage = serde_json::from_slice(&frame)
                .map_err(|e| decoding_fault("subscription", e.into()))?;
            state.ledger.confirm(&ack.topic, &ack.keys);
            info!(
                "{}: subscribed {}: {} [{}]",
                client.name(),
                ack.topic,
                ack.keys,
                ack.session_id
            );
            Ok(())
        }
        CMD_UNSUBSCRIBE => {
            log_frame(&client, &frame);
            let ack: SubscriptionMessage = serde_json::from_slice(&frame)
                .map_err(|e| decoding_fault("unsubscription", e.into()))?;
            info!(
                "{}: unsubscribed {}: {} [{}]",
                client.name(),
                ack.topic,
                ack.keys,
                ack.session_id
            );
            Ok(())
        }
        CMD_CREATE_SESSION => {
            log_frame(&client, &frame);
            let created: SessionCreatedMessage = serde_json::from_slice(&frame)
                .map_err(|e| decoding_fault("CreateSession", e.into()))?;
            state.session().user_session_id = created.session_id.clone();
            client.set_logged_in(true);
            info!("{}: websocket session created: {}", client.name(), created.session_id);
            client.notify_connected();

            if state.resubscribe {
                resubscribe(&state, &client, &created.session_id).await;
            }
            Ok(())
        }
        _ => Err(StreamError::Protocol(format!("wrong message {}", topic))),
    }
}

/// Replays every known subscription on a fresh session.
async fn resubscribe(state: &EtnaState, client: &StreamClient, session_id: &str) {
    for (topic, key) in state.ledger.entries() {
        state.ledger.mark_pending(&topic, &key);
        let request = SubscriptionMessage::subscribe(&topic, &key, session_id);
        match client.send_json(&request).await {
            Ok(()) => debug!("{}: resubscribed {}: {}", client.name(), topic, key),
            Err(e) => error!(
                "{}: can't resubscribe {}: {}: {}",
                client.name(),
                topic,
                key,
                e
            ),
        }
    }
}

fn log_frame(client: &StreamClient, frame: &[u8]) {
    debug!("{}: <-- {}", client.name(), String::from_utf8_lossy(frame));
}
