/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Etna topics
pub const TOPIC_QUOTE: &str = "Quote";
pub const TOPIC_CANDLE: &str = "Candle";
pub const TOPIC_BALANCE: &str = "AccountBalance";
pub const TOPIC_POSITION: &str = "Position";
pub const TOPIC_ORDER: &str = "Order";

// Etna commands
pub const CMD_CREATE_SESSION: &str = "CreateSession.txt";
pub const CMD_SUBSCRIBE: &str = "Subscribe.txt";
pub const CMD_UNSUBSCRIBE: &str = "Unsubscribe.txt";
pub const CMD_PING: &str = "Ping";

pub const HTTP_CLIENT_TYPE: &str = "WebSocket";

/// Frame prefixes used by the classifiers.
pub const FIELD_ENTITY_TYPE: &[u8] = b"\"EntityType\": ";
pub const FIELD_CMD: &[u8] = b"\"Cmd\": ";
pub const FIELD_EVENT: &[u8] = b"{\"event\":";

/// Reply to a server `Ping` command.
pub const PONG_FRAME: &str = r#"{"Cmd":"Pong","StatusCode":"Ok"}"#;

// FMP
pub const TOPIC_EVENT: &str = "event";
pub const EVENT_LOGIN: &str = "login";
pub const EVENT_SUBSCRIBE: &str = "subscribe";
pub const EVENT_UNSUBSCRIBE: &str = "unsubscribe";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const FMP_STATUS_OK: i16 = 200;
/// Length of `"Subscribed to "` in subscribe confirmations.
pub const FMP_SUBSCRIBED_PREFIX_LEN: usize = 14;
/// Length of `"Unsubscribed from "` in unsubscribe confirmations.
pub const FMP_UNSUBSCRIBED_PREFIX_LEN: usize = 18;

// SUBSCRIBE / UNSUBSCRIBE, also echoed back as the acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMessage {
    #[serde(rename = "Cmd")]
    pub cmd: String,
    #[serde(rename = "SessionId", default)]
    pub session_id: String,
    #[serde(rename = "Keys", default)]
    pub keys: String,
    #[serde(rename = "EntityType", default)]
    pub topic: String,
    #[serde(rename = "HttpClientType", default)]
    pub http_client_type: String,
}

impl SubscriptionMessage {
    pub fn subscribe(topic: &str, keys: &str, session_id: &str) -> Self {
        Self {
            cmd: CMD_SUBSCRIBE.to_string(),
            session_id: session_id.to_string(),
            keys: keys.to_string(),
            topic: topic.to_string(),
            http_client_type: HTTP_CLIENT_TYPE.to_string(),
        }
    }

    pub fn unsubscribe(topic: &str, keys: &str, session_id: &str) -> Self {
        Self {
            cmd: CMD_UNSUBSCRIBE.to_string(),
            ..Self::subscribe(topic, keys, session_id)
        }
    }
}

// CREATE_SESSION acknowledgement
#[derive(Debug, Clone, Deserialize)]
pub struct SessionCreatedMessage {
    #[serde(rename = "SessionId")]
    pub session_id: String,
    #[serde(rename = "StatusCode", default)]
    pub status_code: Option<String>,
}

// FMP request: login / subscribe / unsubscribe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FmpRequest {
    pub event: String,
    pub data: HashMap<String, String>,
}

impl FmpRequest {
    pub fn login(api_key: &str) -> Self {
        Self::with_data(EVENT_LOGIN, "apiKey", api_key)
    }

    pub fn subscribe(ticker: &str) -> Self {
        Self::with_data(EVENT_SUBSCRIBE, "ticker", ticker)
    }

    pub fn unsubscribe(ticker: &str) -> Self {
        Self::with_data(EVENT_UNSUBSCRIBE, "ticker", ticker)
    }

    fn with_data(event: &str, key: &str, value: &str) -> Self {
        let mut data = HashMap::new();
        data.insert(key.to_string(), value.to_string());
        Self {
            event: event.to_string(),
            data,
        }
    }
}

// FMP event response
#[derive(Debug, Clone, Deserialize)]
pub struct FmpResponse {
    pub event: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: i16,
    #[serde(default)]
    pub timestamp: u64,
}
