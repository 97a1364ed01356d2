/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

use super::error::{StreamError, StreamResult};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tokio_tungstenite::{WebSocketStream, connect_async};
use tracing::{debug, error};

/// Close code reported when the peer sends a close frame without a payload.
const NO_STATUS_CODE: u16 = 1005;

/// Invoked with the payload of every pong frame.
pub type PongCallback = Arc<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// Invoked with `(close code, close text)` when the peer closes the socket.
pub type DisconnectCallback = Arc<dyn Fn(u16, &str) -> StreamResult<()> + Send + Sync + 'static>;

/// Callbacks registered on a connection at dial time.
#[derive(Clone, Default)]
pub struct ConnectionHooks {
    pub on_pong: Option<PongCallback>,
    pub on_close: Option<DisconnectCallback>,
}

impl fmt::Debug for ConnectionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHooks")
            .field("on_pong", &self.on_pong.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Represents a WebSocket connection.
///
/// The read and write halves are held behind separate `Arc<Mutex>` so that the
/// receive task can block on a read while the send task and the liveness task
/// keep writing.
///
/// # Fields
///
/// * `write`: the sink half; data frames come from the send task only, ping
///   control frames from the liveness task.
/// * `read`: the stream half; read exclusively by the receive task.
/// * `hooks`: pong and close callbacks invoked while reading.
#[derive(Debug)]
pub struct WebSocketConnection {
    write: Arc<Mutex<futures_util::stream::SplitSink<WsStream, Message>>>,
    read: Arc<Mutex<futures_util::stream::SplitStream<WsStream>>>,
    hooks: ConnectionHooks,
}

impl WebSocketConnection {
    /// Dials `url`, sending `user_agent` as the `User-Agent` header.
    ///
    /// The whole opening handshake is bounded by `handshake_timeout`; exceeding
    /// it yields `StreamError::Timeout`, any other dial failure
    /// `StreamError::Connection`.
    pub async fn connect(
        url: &str,
        user_agent: &str,
        handshake_timeout: Duration,
        hooks: ConnectionHooks,
    ) -> StreamResult<Self> {
        let mut request = url.into_client_request()?;
        let agent = HeaderValue::from_str(user_agent)
            .map_err(|e| StreamError::Connection(format!("invalid user agent: {}", e)))?;
        request.headers_mut().insert(USER_AGENT, agent);

        let (ws_stream, response) = timeout(handshake_timeout, connect_async(request))
            .await
            .map_err(|_| {
                StreamError::Timeout(format!("handshake exceeded {:?}", handshake_timeout))
            })?
            .map_err(|e| StreamError::Connection(format!("Failed to connect: {}", e)))?;

        debug!(
            "WebSocket connection established: status {}, server {:?}, date {:?}",
            response.status(),
            response.headers().get("server"),
            response.headers().get("date"),
        );

        let (write, read) = ws_stream.split();

        Ok(Self {
            write: Arc::new(Mutex::new(write)),
            read: Arc::new(Mutex::new(read)),
            hooks,
        })
    }

    /// Writes one text frame.
    pub async fn send_text(&self, text: String) -> StreamResult<()> {
        let mut write = self.write.lock().await;
        write.send(Message::text(text)).await?;
        Ok(())
    }

    /// Reads the next data frame and returns its bytes.
    ///
    /// Control frames are consumed here: pongs go to `on_pong`, a close frame
    /// goes to `on_close` and ends the read with `StreamError::Connection`.
    pub async fn receive(&self) -> StreamResult<Vec<u8>> {
        let mut read = self.read.lock().await;

        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.as_str().as_bytes().to_vec()),
                Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
                Some(Ok(Message::Pong(payload))) => {
                    if let Some(on_pong) = &self.hooks.on_pong {
                        on_pong(&payload[..]);
                    }
                }
                Some(Ok(Message::Ping(_))) => {
                    // tungstenite queues the pong reply itself
                    debug!("Received ping");
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, text) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                        .unwrap_or((NO_STATUS_CODE, String::new()));
                    if let Some(on_close) = &self.hooks.on_close {
                        if let Err(e) = on_close(code, &text) {
                            error!("Close handler failed: {}", e);
                        }
                    }
                    return Err(StreamError::Connection(format!(
                        "closed by peer: {} {}",
                        code, text
                    )));
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    return Err(e.into());
                }
                None => {
                    error!("WebSocket connection closed unexpectedly");
                    return Err(StreamError::Connection(
                        "Connection closed unexpectedly".to_string(),
                    ));
                }
            }
        }
    }

    /// Sends a ping control frame, giving up after `deadline`.
    pub async fn ping(&self, payload: Vec<u8>, deadline: Duration) -> StreamResult<()> {
        let send = async {
            let mut write = self.write.lock().await;
            write.send(Message::Ping(payload.into())).await
        };
        match timeout(deadline, send).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StreamError::Timeout(format!(
                "ping not written within {:?}",
                deadline
            ))),
        }
    }

    /// Sends a close frame. Best effort: the peer may already be gone.
    pub async fn close(&self) -> StreamResult<()> {
        let mut write = self.write.lock().await;
        write.close().await?;
        Ok(())
    }
}

/// Clones share the underlying read and write halves.
impl Clone for WebSocketConnection {
    fn clone(&self) -> Self {
        Self {
            write: Arc::clone(&self.write),
            read: Arc::clone(&self.read),
            hooks: self.hooks.clone(),
        }
    }
}
