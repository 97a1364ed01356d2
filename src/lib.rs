//! # etnalink
//!
//! `etnalink` is a streaming client library for the Etna trading platform and the
//! Financial Modeling Prep (FMP) quote feed. A protocol-agnostic engine owns the
//! WebSocket, runs the receive, send and liveness tasks, and reconnects with a
//! bounded oscillating backoff. Two protocol adapters sit on top of it.
//!
//! ## Features
//!
//! - Session-token adapter (`EtnaStream`): quotes, candles, balances, positions and orders
//! - API-key adapter (`FmpStream`): trade prints by ticker
//! - Bounded tokio channels per record type
//! - Subscription ledger with acknowledgement tracking and replay after reconnect
//! - Cheap prefix-scan topic classification, no full parse before routing
//! - Receive loop survives malformed frames and handler panics
//!
//! ## Example
//!
//! ```rust,no_run
//! use etnalink::{EtnaStream, SessionIdentity, StreamConfig};
//! use std::error::Error;
//! use tracing::info;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn Error>> {
//!     let config = StreamConfig::from_env()?;
//!     // login and password are base64 encoded
//!     let stream = EtnaStream::new(
//!         "md",
//!         "wss://pub-api.etnasoft.com/api/v1.0",
//!         "dXNlcg==",
//!         "c2VjcmV0",
//!         SessionIdentity::default(),
//!         config,
//!     );
//!     stream.set_connect_handler(|name| info!("{} is up", name));
//!
//!     let mut quotes = stream.quote_stream()?;
//!     stream.start().await?;
//!     stream.subscribe("Quote", "AAPL").await?;
//!
//!     while let Some(quote) = quotes.recv().await {
//!         info!("{} bid {} ask {}", quote.symbol, quote.bid, quote.ask);
//!     }
//!
//!     stream.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Only `start` and the subscription calls report errors to the caller. Everything
//! that goes wrong inside the background tasks is logged through `tracing` and
//! recovered locally.
//!
//! ```rust,no_run
//! use etnalink::{FmpStream, StreamConfig, StreamError};
//! use tracing::error;
//!
//! async fn example_error_handling() {
//!     let stream = FmpStream::new("fmp", "api-key", StreamConfig::default());
//!     match stream.start().await {
//!         Ok(()) => {}
//!         Err(StreamError::Timeout(e)) => error!("Login not confirmed: {}", e),
//!         Err(StreamError::Connection(e)) => error!("Connection error: {}", e),
//!         Err(e) => error!("Other error: {}", e),
//!     }
//! }
//! ```
//!
//! ## Configuration
//!
//! `StreamConfig::default()` carries production values. `StreamConfig::from_env()`
//! overlays the `STREAM_*` environment variables, e.g. `STREAM_RECONNECT_INTERVAL_SECS`,
//! `STREAM_MAX_SILENT_SECS` or `STREAM_FMP_URL`.
//!
//! ## License
//!
//! This project is licensed under the MIT License.
//!
//!  ## Contribution and Contact
//!
//!  **Joaquín Béjar García**
//!  - Email: jb@taunais.com
//!  - GitHub: [joaquinbejar](https://github.com/joaquinbejar)
//!

/// Generic streaming engine.
///
/// `StreamClient` owns the socket and the background tasks, polls for the
/// operational state on start, and runs the reconnect policy. Adapters inject
/// a connect function, a topic classifier and a message handler.
pub mod client;

/// Tuning values shared by all streams.
pub mod config;

/// WebSocket transport: dial, read one frame, write one frame, ping, close.
pub mod connection;

/// Crate-wide `StreamError` and `StreamResult`.
pub mod error;

/// Session-token adapter for the Etna platform.
pub mod etna;

/// Domain records and the field coercion used to decode them.
pub mod events;

/// API-key adapter for the FMP quote feed.
pub mod fmp;

/// Subscription bookkeeping.
pub mod ledger;

/// Control-frame wire structs and protocol constants.
pub mod messages;

/// Topic classifiers and the reconnect backoff.
pub mod utils;

pub use client::StreamClient;
pub use config::StreamConfig;
pub use connection::{ConnectionHooks, WebSocketConnection};
pub use error::{StreamError, StreamResult};
pub use etna::{EtnaStream, SessionIdentity};
pub use events::{Balance, Bar, FieldMap, Order, Position, Quote, TradeQuote};
pub use fmp::FmpStream;
pub use ledger::{KeyLedger, SubscriptionLedger};
pub use utils::{etna_topic, fmp_topic, reconnect_delay};
