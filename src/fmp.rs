/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

use crate::client::StreamClient;
use crate::config::StreamConfig;
use crate::connection::{DisconnectCallback, WebSocketConnection};
use crate::error::{StreamError, StreamResult};
use crate::events::TradeQuote;
use crate::ledger::KeyLedger;
use crate::messages::{
    EVENT_HEARTBEAT, EVENT_LOGIN, EVENT_SUBSCRIBE, EVENT_UNSUBSCRIBE, FMP_STATUS_OK,
    FMP_SUBSCRIBED_PREFIX_LEN, FMP_UNSUBSCRIBED_PREFIX_LEN, FmpRequest, FmpResponse, TOPIC_EVENT,
    TOPIC_QUOTE,
};
use crate::utils::{Outlet, fmp_topic};
use futures_util::FutureExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

struct FmpState {
    url: String,
    api_key: String,
    ledger: KeyLedger,
    quotes: Outlet<TradeQuote>,
    resubscribe: bool,
}

/// Streaming client for the Financial Modeling Prep quote feed.
///
/// Logs in with an API key right after dialing and subscribes by bare ticker.
/// Only trade prints reach the quote stream.
pub struct FmpStream {
    client: StreamClient,
    state: Arc<FmpState>,
}

impl FmpStream {
    /// Creates a stream for `config.fmp_url` that is not yet connected.
    ///
    /// # Arguments
    ///
    /// * `name` - Label used in logs and passed to the connect handler.
    /// * `api_key` - Sent in the login event right after dialing.
    /// * `config` - Timeouts, backoff and queue capacities.
    pub fn new(name: &str, api_key: &str, config: StreamConfig) -> Self {
        let state = Arc::new(FmpState {
            url: config.fmp_url.clone(),
            api_key: api_key.to_string(),
            ledger: KeyLedger::new(),
            quotes: Outlet::new("quote", config.quotes_capacity),
            resubscribe: config.resubscribe_on_reconnect,
        });

        let client = StreamClient::new(name, config);

        let connect_state = state.clone();
        client.set_connect_func(move |client| open_connection(connect_state.clone(), client).boxed());
        client.set_topic_func(fmp_topic);
        let handler_state = state.clone();
        client.set_message_handler(move |client, topic, frame| {
            on_message(handler_state.clone(), client, topic, frame).boxed()
        });

        Self { client, state }
    }

    /// Connects, logs in and waits for the login to be confirmed.
    ///
    /// # Returns
    ///
    /// * `Ok(())` once the stream is operational.
    /// * `Err(StreamError::Timeout)` if the venue did not confirm the login
    ///   within `start_timeout`, e.g. because the key was rejected.
    pub async fn start(&self) -> StreamResult<()> {
        self.client.start().await
    }

    pub async fn stop(&self) {
        self.client.stop().await
    }

    /// Socket connected and login confirmed.
    pub fn is_operational(&self) -> bool {
        self.client.is_operational()
    }

    /// Requests quotes for `key`. Fails if `key` is already subscribed; a
    /// request still awaiting confirmation is not repeated.
    ///
    /// # Arguments
    ///
    /// * `key` - Ticker, lower case as the venue reports it.
    ///
    /// # Returns
    ///
    /// * `Err(StreamError::NotConnected)` until the login is confirmed,
    ///   including while a lost socket is being replaced.
    /// * `Err(StreamError::Subscription)` if `key` is already active.
    pub async fn subscribe(&self, key: &str) -> StreamResult<()> {
        if !self.client.is_operational() {
            return Err(StreamError::NotConnected);
        }
        if self.state.ledger.is_active(key) {
            return Err(StreamError::Subscription(format!(
                "already subscribed {}",
                key
            )));
        }
        if self.state.ledger.is_known(key) {
            debug!("{}: subscription pending {}", self.client.name(), key);
            return Ok(());
        }

        self.state.ledger.mark_pending(key);
        self.client.send_json(&FmpRequest::subscribe(key)).await
    }

    /// Cancels `key` and forgets it at once. Fails if `key` is not active.
    pub async fn unsubscribe(&self, key: &str) -> StreamResult<()> {
        if !self.client.is_operational() {
            return Err(StreamError::NotConnected);
        }
        if !self.state.ledger.remove(key) {
            return Err(StreamError::Subscription(format!(
                "subscription is absent: {}",
                key
            )));
        }
        self.client.send_json(&FmpRequest::unsubscribe(key)).await
    }

    /// Confirmed tickers.
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.ledger.active()
    }

    /// Receiver of trade prints. It can be taken once.
    pub fn quote_stream(&self) -> StreamResult<mpsc::Receiver<TradeQuote>> {
        self.state.quotes.take()
    }

    pub fn set_connect_handler<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.client.set_connect_handler(callback);
    }

    pub fn set_disconnect_handler(&self, callback: DisconnectCallback) {
        self.client.set_disconnect_handler(callback);
    }

    pub fn client(&self) -> &StreamClient {
        &self.client
    }
}

async fn open_connection(
    state: Arc<FmpState>,
    client: StreamClient,
) -> StreamResult<WebSocketConnection> {
    if client.has_connection() {
        return Err(StreamError::Connection(
            "connection already exists".to_string(),
        ));
    }
    info!("{}: connecting: {}", client.name(), state.url);
    let connection = client.dial(&state.url).await?;
    client.send_json(&FmpRequest::login(&state.api_key)).await?;
    Ok(connection)
}

/// Ticker named in a confirmation such as `Subscribed to aapl`.
fn confirmed_key(message: &str, prefix_len: usize) -> StreamResult<&str> {
    message
        .get(prefix_len..)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| StreamError::Protocol(format!("FMP wrong response message {}", message)))
}

async fn on_message(
    state: Arc<FmpState>,
    client: StreamClient,
    topic: String,
    frame: Vec<u8>,
) -> StreamResult<()> {
    match topic.as_str() {
        TOPIC_QUOTE => {
            let quote: TradeQuote = serde_json::from_slice(&frame)
                .map_err(|e| StreamError::Decode(format!("decoding fault: {}", e)))?;
            if quote.is_trade() {
                state.quotes.publish(quote).await?;
            }
            Ok(())
        }
        TOPIC_EVENT => {
            let response: FmpResponse = serde_json::from_slice(&frame)
                .map_err(|e| StreamError::Decode(format!("FMP event decoding fault: {}", e)))?;
            on_event(&state, &client, response).await
        }
        _ => Err(StreamError::Protocol(format!("wrong message {}", topic))),
    }
}

async fn on_event(state: &FmpState, client: &StreamClient, response: FmpResponse) -> StreamResult<()> {
    if response.event != EVENT_HEARTBEAT && response.status != FMP_STATUS_OK {
        error!(
            "{}: FMP: {} {}",
            client.name(),
            response.status,
            response.message
        );
        if response.event == EVENT_LOGIN {
            client.set_logged_in(false);
        }
        return Ok(());
    }

    match response.event.as_str() {
        EVENT_HEARTBEAT => debug!("{}: HB: {}", client.name(), response.timestamp),
        EVENT_SUBSCRIBE => {
            let key = confirmed_key(&response.message, FMP_SUBSCRIBED_PREFIX_LEN)?;
            state.ledger.confirm(key);
            info!("{}: subscribed: {} {}", client.name(), response.status, key);
        }
        EVENT_UNSUBSCRIBE => {
            let key = confirmed_key(&response.message, FMP_UNSUBSCRIBED_PREFIX_LEN)?;
            if state.ledger.remove(key) {
                info!("{}: unsubscribed: {} {}", client.name(), response.status, key);
            } else {
                debug!("{}: unsubscribe confirmed: {}", client.name(), key);
            }
        }
        EVENT_LOGIN => {
            client.set_logged_in(true);
            info!(
                "{}: logged in: {} {}",
                client.name(),
                response.status,
                response.message
            );
            client.notify_connected();
            if state.resubscribe {
                resubscribe(state, client).await;
            }
        }
        other => debug!("{}: unhandled FMP event {}", client.name(), other),
    }
    Ok(())
}

async fn resubscribe(state: &FmpState, client: &StreamClient) {
    for key in state.ledger.entries() {
        state.ledger.mark_pending(&key);
        match client.send_json(&FmpRequest::subscribe(&key)).await {
            Ok(()) => debug!("{}: resubscribed {}", client.name(), key),
            Err(e) => error!("{}: can't resubscribe {}: {}", client.name(), key, e),
        }
    }
}
