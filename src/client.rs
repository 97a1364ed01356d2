/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

use crate::config::StreamConfig;
use crate::connection::{ConnectionHooks, DisconnectCallback, WebSocketConnection};
use crate::error::{StreamError, StreamResult};
use crate::messages::PONG_FRAME;
use crate::utils::reconnect_delay;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, Weak};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval, sleep, timeout};
use tracing::{debug, error, info, trace, warn};

/// Bound on the best-effort close of a replaced socket.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Dials the venue and performs any protocol handshake.
pub type ConnectFunc =
    Arc<dyn Fn(StreamClient) -> BoxFuture<'static, StreamResult<WebSocketConnection>> + Send + Sync>;

/// Classifies a raw frame into a topic.
pub type TopicFunc = Arc<dyn Fn(&[u8]) -> StreamResult<String> + Send + Sync>;

/// Handles one classified frame.
pub type MessageHandler =
    Arc<dyn Fn(StreamClient, String, Vec<u8>) -> BoxFuture<'static, StreamResult<()>> + Send + Sync>;

/// Invoked with the client name once a session is established.
pub type ConnectCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Why a receive loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiveExit {
    /// `stop()` was called.
    Stopped,
    /// The session was torn down or replaced by a newer one.
    Superseded,
    /// The socket failed underneath us.
    Dropped,
}

struct Session {
    id: u64,
    connection: WebSocketConnection,
    down: watch::Sender<bool>,
}

struct ClientCore {
    name: String,
    config: StreamConfig,
    connect_fn: RwLock<Option<ConnectFunc>>,
    topic_fn: RwLock<Option<TopicFunc>>,
    handler: RwLock<Option<MessageHandler>>,
    on_connect: RwLock<Option<ConnectCallback>>,
    on_disconnect: RwLock<Option<DisconnectCallback>>,
    connected: AtomicBool,
    logged_in: AtomicBool,
    last_message_ts: AtomicI64,
    next_session_id: AtomicU64,
    session: Mutex<Option<Session>>,
    outbound_tx: mpsc::Sender<String>,
    outbound_rx: AsyncMutex<mpsc::Receiver<String>>,
    stop_tx: watch::Sender<bool>,
}

impl ClientCore {
    fn touch(&self) {
        self.last_message_ts
            .store(Utc::now().timestamp(), Ordering::SeqCst);
    }
}

/// Protocol-agnostic streaming engine.
///
/// Owns the socket and three background tasks per session: a receive task
/// (read, classify, dispatch), a send task (drains the outbound queue) and an
/// optional liveness task (pings after a silent period). A socket failure
/// triggers a bounded reconnect loop with oscillating backoff.
///
/// Protocol adapters plug in through [`StreamClient::set_connect_func`],
/// [`StreamClient::set_topic_func`] and [`StreamClient::set_message_handler`].
/// The handle is cheap to clone; every clone drives the same engine.
#[derive(Clone)]
pub struct StreamClient {
    core: Arc<ClientCore>,
}

impl fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamClient")
            .field("name", &self.core.name)
            .field("connected", &self.is_connected())
            .field("logged_in", &self.is_logged_in())
            .finish()
    }
}

fn read_slot<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_slot<T>(lock: &RwLock<T>, value: T) {
    *lock.write().unwrap_or_else(|e| e.into_inner()) = value;
}

impl StreamClient {
    /// Creates an idle engine. Nothing is dialed until [`StreamClient::start`].
    ///
    /// # Arguments
    ///
    /// * `name` - Prefix of every log line and the argument of the connect
    ///   callback.
    /// * `config` - Timeouts, backoff, liveness and queue capacities.
    pub fn new(name: &str, config: StreamConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (stop_tx, _) = watch::channel(false);

        Self {
            core: Arc::new(ClientCore {
                name: name.to_string(),
                config,
                connect_fn: RwLock::new(None),
                topic_fn: RwLock::new(None),
                handler: RwLock::new(None),
                on_connect: RwLock::new(None),
                on_disconnect: RwLock::new(None),
                connected: AtomicBool::new(false),
                logged_in: AtomicBool::new(false),
                last_message_ts: AtomicI64::new(0),
                next_session_id: AtomicU64::new(1),
                session: Mutex::new(None),
                outbound_tx,
                outbound_rx: AsyncMutex::new(outbound_rx),
                stop_tx,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn config(&self) -> &StreamConfig {
        &self.core.config
    }

    /// Registers the function that dials the venue.
    ///
    /// It is called by every `start` and every reconnect attempt with a handle
    /// to this client, and must return the open socket. Protocol handshake
    /// frames may be queued with [`StreamClient::enqueue`] before returning;
    /// the send task writes them as soon as the socket is attached.
    pub fn set_connect_func<F>(&self, connect: F)
    where
        F: Fn(StreamClient) -> BoxFuture<'static, StreamResult<WebSocketConnection>>
            + Send
            + Sync
            + 'static,
    {
        let connect: ConnectFunc = Arc::new(connect);
        write_slot(&self.core.connect_fn, Some(connect));
    }

    /// Registers the classifier run on every inbound frame before dispatch.
    /// An error drops the frame.
    pub fn set_topic_func<F>(&self, topic: F)
    where
        F: Fn(&[u8]) -> StreamResult<String> + Send + Sync + 'static,
    {
        let topic: TopicFunc = Arc::new(topic);
        write_slot(&self.core.topic_fn, Some(topic));
    }

    /// Registers the handler that receives each classified frame.
    ///
    /// # Arguments
    ///
    /// * `handler` - Called with this client, the topic and the raw frame. An
    ///   error is logged and the receive loop moves on to the next frame.
    pub fn set_message_handler<F>(&self, handler: F)
    where
        F: Fn(StreamClient, String, Vec<u8>) -> BoxFuture<'static, StreamResult<()>>
            + Send
            + Sync
            + 'static,
    {
        let handler: MessageHandler = Arc::new(handler);
        write_slot(&self.core.handler, Some(handler));
    }

    /// Called with the client name each time a session is established.
    pub fn set_connect_handler<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let callback: ConnectCallback = Arc::new(callback);
        write_slot(&self.core.on_connect, Some(callback));
    }

    /// Called with the close code and text when the venue closes the socket.
    /// Takes effect from the next dial.
    pub fn set_disconnect_handler(&self, callback: DisconnectCallback) {
        write_slot(&self.core.on_disconnect, Some(callback));
    }

    /// Socket connected and session established.
    pub fn is_operational(&self) -> bool {
        self.is_connected() && self.is_logged_in()
    }

    /// Socket attached and not known to have failed.
    pub fn is_connected(&self) -> bool {
        self.core.connected.load(Ordering::SeqCst)
    }

    pub fn is_logged_in(&self) -> bool {
        self.core.logged_in.load(Ordering::SeqCst)
    }

    /// Set by the message handler once the protocol handshake completes.
    pub fn set_logged_in(&self, logged_in: bool) {
        self.core.logged_in.store(logged_in, Ordering::SeqCst);
    }

    /// Time of the last inbound frame or pong.
    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        match self.core.last_message_ts.load(Ordering::SeqCst) {
            0 => None,
            ts => DateTime::from_timestamp(ts, 0),
        }
    }

    /// True while a socket is attached, even one that has failed.
    pub fn has_connection(&self) -> bool {
        self.lock_session().is_some()
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.core.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_stopped(&self) -> bool {
        *self.core.stop_tx.borrow()
    }

    /// Hooks to pass to [`WebSocketConnection::connect`]: pongs stamp the
    /// liveness timestamp, close frames go to the disconnect handler.
    pub fn connection_hooks(&self) -> ConnectionHooks {
        let core: Weak<ClientCore> = Arc::downgrade(&self.core);
        ConnectionHooks {
            on_pong: Some(Arc::new(move |payload: &[u8]| {
                if let Some(core) = core.upgrade() {
                    core.touch();
                    debug!("{}: <-- PONG {}", core.name, String::from_utf8_lossy(payload));
                }
            })),
            on_close: read_slot(&self.core.on_disconnect).clone(),
        }
    }

    /// Dials `url` with the configured user agent, handshake timeout and hooks.
    pub async fn dial(&self, url: &str) -> StreamResult<WebSocketConnection> {
        let config = &self.core.config;
        WebSocketConnection::connect(
            url,
            &config.user_agent,
            config.handshake_timeout,
            self.connection_hooks(),
        )
        .await
    }

    /// Fires the connect callback.
    pub fn notify_connected(&self) {
        let callback = read_slot(&self.core.on_connect).clone();
        if let Some(callback) = callback {
            callback(&self.core.name);
        }
    }

    /// Queues a text frame for the send task.
    pub async fn enqueue(&self, frame: String) -> StreamResult<()> {
        self.core
            .outbound_tx
            .send(frame)
            .await
            .map_err(|_| StreamError::ChannelClosed("outbound queue".to_string()))
    }

    /// Serializes `message` and queues it for the send task.
    pub async fn send_json<T: Serialize>(&self, message: &T) -> StreamResult<()> {
        let frame = serde_json::to_string(message)?;
        self.enqueue(frame).await
    }

    /// Connects and waits until the client is operational.
    ///
    /// Fails at once without a connect function, with the connect function's
    /// error if dialing fails, and with `StreamError::Timeout` if no session
    /// is established within `start_timeout`. A timed-out session is torn
    /// down before returning.
    pub async fn start(&self) -> StreamResult<()> {
        self.core.stop_tx.send_replace(false);
        if !self.is_connected() {
            self.clear_session().await;
        }
        self.open_session().await
    }

    /// Signals every task to exit and closes the socket.
    pub async fn stop(&self) {
        self.core.stop_tx.send_replace(true);
        self.core.connected.store(false, Ordering::SeqCst);
        self.core.logged_in.store(false, Ordering::SeqCst);
        self.clear_session().await;
        info!("{}: stopped", self.core.name);
    }

    async fn open_session(&self) -> StreamResult<()> {
        let connect = read_slot(&self.core.connect_fn).clone().ok_or_else(|| {
            StreamError::Connection(format!("{}: connect function is not set", self.core.name))
        })?;

        if !self.has_connection() {
            self.drain_outbound().await;
        }
        let connection = connect(self.clone()).await?;
        let (session_id, down) = self.attach(connection.clone());
        self.spawn_session(connection, down);

        let config = &self.core.config;
        let deadline = Instant::now() + config.start_timeout;
        loop {
            if self.is_operational() {
                info!("{}: operational", self.core.name);
                return Ok(());
            }
            if self.is_stopped() {
                self.teardown(session_id).await;
                return Err(StreamError::Connection(format!(
                    "{}: stopped while starting",
                    self.core.name
                )));
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(config.start_poll_interval.min(deadline - now)).await;
        }

        self.teardown(session_id).await;
        Err(StreamError::Timeout(format!(
            "{}: not operational after {:?}",
            self.core.name, config.start_timeout
        )))
    }

    /// Discards frames queued for a session that no longer exists. They carry
    /// that session's identifiers, and anything still wanted is replayed once
    /// the new session is established.
    async fn drain_outbound(&self) {
        let mut outbound = self.core.outbound_rx.lock().await;
        let mut dropped = 0usize;
        while outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("{}: dropped {} stale outbound frame(s)", self.core.name, dropped);
        }
    }

    fn attach(&self, connection: WebSocketConnection) -> (u64, watch::Receiver<bool>) {
        let id = self.core.next_session_id.fetch_add(1, Ordering::SeqCst);
        let (down, down_rx) = watch::channel(false);
        let previous = self.lock_session().replace(Session {
            id,
            connection,
            down,
        });
        if let Some(previous) = previous {
            previous.down.send_replace(true);
        }
        self.core.connected.store(true, Ordering::SeqCst);
        self.core.touch();
        info!("{}: connected", self.core.name);
        (id, down_rx)
    }

    fn spawn_session(&self, connection: WebSocketConnection, down: watch::Receiver<bool>) {
        tokio::spawn(
            self.clone()
                .supervise_receiver(connection.clone(), down.clone()),
        );
        tokio::spawn(self.clone().send_loop(connection.clone(), down.clone()));
        if self.core.config.liveness_check {
            tokio::spawn(self.clone().liveness_loop(connection, down));
        }
    }

    /// Drops the attached socket, whatever its state.
    async fn clear_session(&self) {
        let previous = self.lock_session().take();
        if let Some(session) = previous {
            close_session(&self.core.name, session).await;
        }
    }

    /// Drops the session `id` if it is still the attached one.
    async fn teardown(&self, id: u64) {
        let previous = {
            let mut slot = self.lock_session();
            if slot.as_ref().is_some_and(|session| session.id == id) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(session) = previous {
            self.core.connected.store(false, Ordering::SeqCst);
            self.core.logged_in.store(false, Ordering::SeqCst);
            close_session(&self.core.name, session).await;
        }
    }

    /// Marks the socket lost and winds the session tasks down. The socket
    /// handle stays attached until the next reconnect attempt clears it.
    fn disconnect(&self) {
        self.core.connected.store(false, Ordering::SeqCst);
        self.core.logged_in.store(false, Ordering::SeqCst);
        if let Some(session) = self.lock_session().as_ref() {
            session.down.send_replace(true);
        }
        info!("{}: disconnected", self.core.name);
    }

    /// Bounded retry loop with [`reconnect_delay`] between attempts.
    fn reconnect(&self) -> BoxFuture<'static, ()> {
        let client = self.clone();
        async move {
            let name = client.core.name.clone();
            let attempts = client.core.config.reconnect_attempts;
            let base = client.core.config.reconnect_interval;
            let mut stop = client.core.stop_tx.subscribe();
            let mut last_error = None;

            for attempt in 0..attempts {
                tokio::select! {
                    _ = sleep(reconnect_delay(attempt, base)) => {}
                    _ = wait_stopped(&mut stop) => {
                        info!("{}: reconnect cancelled", name);
                        return;
                    }
                }

                client.clear_session().await;
                match client.open_session().await {
                    Ok(()) => {
                        info!("{}: reconnected after {} attempt(s)", name, attempt + 1);
                        return;
                    }
                    Err(e) => {
                        error!("{}: reconnect fault: {}", name, e);
                        last_error = Some(e);
                    }
                }
                if client.is_stopped() {
                    return;
                }
            }

            match last_error {
                Some(e) => error!("{}: giving up with reconnect: {}", name, e),
                None => error!("{}: giving up with reconnect", name),
            }
        }
        .boxed()
    }

    /// Classifies `frame` and hands it to the message handler.
    pub async fn dispatch(&self, frame: Vec<u8>) -> StreamResult<()> {
        let topic_fn = read_slot(&self.core.topic_fn).clone().ok_or_else(|| {
            StreamError::Protocol(format!("{}: topic function is not set", self.core.name))
        })?;
        let handler = read_slot(&self.core.handler).clone().ok_or_else(|| {
            StreamError::Protocol(format!("{}: message handler is not set", self.core.name))
        })?;

        let topic = topic_fn(&frame)?;
        trace!("{}: <-- {} {}", self.core.name, topic, String::from_utf8_lossy(&frame));
        handler(self.clone(), topic, frame).await
    }

    /// Runs the receive loop in its own task and respawns it after a panic.
    /// A dropped socket leads to `disconnect` and `reconnect`.
    async fn supervise_receiver(self, connection: WebSocketConnection, down: watch::Receiver<bool>) {
        let name = self.core.name.clone();
        loop {
            let task = tokio::spawn(self.clone().receive_loop(connection.clone(), down.clone()));
            match task.await {
                Ok(ReceiveExit::Dropped) => {
                    info!("{}: receiver finished", name);
                    self.disconnect();
                    self.reconnect().await;
                    return;
                }
                Ok(exit) => {
                    debug!("{}: receiver finished: {:?}", name, exit);
                    return;
                }
                Err(e) if e.is_panic() => {
                    error!(
                        "{}: receiver got panic: {}",
                        name,
                        panic_message(e.into_panic())
                    );
                }
                Err(e) => {
                    warn!("{}: receiver task cancelled: {}", name, e);
                    return;
                }
            }
        }
    }

    async fn receive_loop(
        self,
        connection: WebSocketConnection,
        mut down: watch::Receiver<bool>,
    ) -> ReceiveExit {
        let mut stop = self.core.stop_tx.subscribe();

        while self.is_connected() {
            if *stop.borrow() || *down.borrow() {
                break;
            }
            let result = tokio::select! {
                biased;
                _ = stop.changed() => continue,
                _ = down.changed() => continue,
                result = connection.receive() => result,
            };
            self.core.touch();

            let frame = match result {
                Ok(frame) => frame,
                Err(e) => {
                    self.core.connected.store(false, Ordering::SeqCst);
                    error!("{}: reading message fault: {}", self.core.name, e);
                    continue;
                }
            };
            if *stop.borrow() {
                break;
            }
            if let Err(e) = self.dispatch(frame).await {
                error!("{}: message processing fault: {}", self.core.name, e);
            }
        }

        if *stop.borrow() {
            ReceiveExit::Stopped
        } else if *down.borrow() {
            ReceiveExit::Superseded
        } else {
            ReceiveExit::Dropped
        }
    }

    async fn send_loop(self, connection: WebSocketConnection, mut down: watch::Receiver<bool>) {
        let mut stop = self.core.stop_tx.subscribe();
        let mut outbound = self.core.outbound_rx.lock().await;

        while self.is_connected() {
            if *stop.borrow() || *down.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = stop.changed() => {}
                _ = down.changed() => {}
                request = outbound.recv() => {
                    let Some(frame) = request else { break };
                    let quiet = frame == PONG_FRAME;
                    if let Err(e) = connection.send_text(frame.clone()).await {
                        error!("{}: can't send message {}: {}", self.core.name, frame, e);
                        continue;
                    }
                    if !quiet {
                        debug!("{}: --> {}", self.core.name, frame);
                    }
                }
            }
        }
        info!("{}: sender finished", self.core.name);
    }

    async fn liveness_loop(self, connection: WebSocketConnection, mut down: watch::Receiver<bool>) {
        let config = &self.core.config;
        let mut stop = self.core.stop_tx.subscribe();
        let mut ticker = interval(config.liveness_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let max_silent = i64::try_from(config.max_silent_period.as_secs()).unwrap_or(i64::MAX);

        loop {
            tokio::select! {
                _ = stop.changed() => {}
                _ = down.changed() => {}
                _ = ticker.tick() => {}
            }
            if *stop.borrow() || *down.borrow() || !self.is_connected() {
                break;
            }

            let now = Utc::now().timestamp();
            if now - self.core.last_message_ts.load(Ordering::SeqCst) <= max_silent {
                continue;
            }
            if let Err(e) = connection
                .ping(now.to_string().into_bytes(), config.ping_deadline)
                .await
            {
                self.core.connected.store(false, Ordering::SeqCst);
                error!("{}: ping fault: {}", self.core.name, e);
                // unblock the reader
                let _ = timeout(CLOSE_TIMEOUT, connection.close()).await;
                break;
            }
        }
        info!("{}: pinger finished", self.core.name);
    }

    /// Pops the next queued outbound frame without sending it.
    #[cfg(test)]
    pub(crate) async fn next_outbound(&self) -> Option<String> {
        self.core.outbound_rx.lock().await.try_recv().ok()
    }
}

async fn close_session(name: &str, session: Session) {
    session.down.send_replace(true);
    match timeout(CLOSE_TIMEOUT, session.connection.close()).await {
        Ok(Ok(())) => debug!("{}: socket closed", name),
        Ok(Err(e)) => debug!("{}: socket close: {}", name, e),
        Err(_) => debug!("{}: socket close timed out", name),
    }
}

async fn wait_stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
