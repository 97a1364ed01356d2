/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/
use std::error::Error;
use std::fmt::{Display, Formatter};

/**
Errors that can occur while running a streaming client.

Only a handful of these ever reach the caller synchronously: the bounded wait of
`start`, and the precondition failures of `subscribe` / `unsubscribe`. Everything
else is recovered inside the engine and only shows up in the log stream.
*/
#[derive(Debug)]
pub enum StreamError {
    /// Represents an error originating from the underlying WebSocket connection.
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    /// Represents an error that occurred during serialization or deserialization of JSON data.
    Serialization(serde_json::Error),
    /// Dial or handshake failure, or a socket that went away.
    Connection(String),
    /// An operation that needs a socket was called while no socket is attached.
    NotConnected,
    /// Represents a timeout error, such as a failure to become operational in time.
    Timeout(String),
    /// Invalid configuration value.
    Config(String),
    /// Login or password could not be decoded.
    Credentials(String),
    /// Represents an error due to a violation of the venue protocol.
    Protocol(String),
    /// A field of an inbound record could not be coerced to its typed value.
    Decode(String),
    /// Unknown, duplicate or absent subscription.
    Subscription(String),
    /// The consumer side of an event queue was dropped.
    ChannelClosed(String),
}

impl Display for StreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::WebSocket(e) => write!(f, "WebSocket error: {}", e),
            StreamError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StreamError::Connection(e) => write!(f, "Connection error: {}", e),
            StreamError::NotConnected => write!(f, "Connection error: not connected"),
            StreamError::Timeout(e) => write!(f, "Timeout error: {}", e),
            StreamError::Config(e) => write!(f, "Config error: {}", e),
            StreamError::Credentials(e) => write!(f, "Credentials error: {}", e),
            StreamError::Protocol(e) => write!(f, "Protocol error: {}", e),
            StreamError::Decode(e) => write!(f, "Decode error: {}", e),
            StreamError::Subscription(e) => write!(f, "Subscription error: {}", e),
            StreamError::ChannelClosed(e) => write!(f, "Channel closed: {}", e),
        }
    }
}

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StreamError::WebSocket(e) => Some(e.as_ref()),
            StreamError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        StreamError::WebSocket(Box::new(e))
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(e: serde_json::Error) -> Self {
        StreamError::Serialization(e)
    }
}

/// A type alias for `Result<T, StreamError>`.
///
/// ```rust
/// use etnalink::error::StreamResult;
///
/// fn example_function() -> StreamResult<String> {
///     Ok("Success!".to_string())
/// }
/// ```
pub type StreamResult<T> = Result<T, StreamError>;
