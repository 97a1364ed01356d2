/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

use super::mock_venue::{MockVenue, Responder, eventually};
use etnalink::{EtnaStream, SessionIdentity, StreamConfig, StreamError};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

const SESSION_CREATED: &str = r#"{"Cmd": "CreateSession.txt", "StatusCode": "Ok", "SessionId": "S1"}"#;
const PONG: &str = r#"{"Cmd":"Pong","StatusCode":"Ok"}"#;

fn test_config() -> StreamConfig {
    StreamConfig {
        start_timeout: Duration::from_secs(2),
        start_poll_interval: Duration::from_millis(20),
        reconnect_interval: Duration::from_millis(50),
        reconnect_attempts: 20,
        liveness_check: false,
        handshake_timeout: Duration::from_secs(2),
        ..StreamConfig::default()
    }
}

/// Echoes subscribe and unsubscribe requests back as acknowledgements.
fn etna_responder() -> Responder {
    Arc::new(|frame: &str| {
        let Ok(request) = serde_json::from_str::<Value>(frame) else {
            return vec![];
        };
        match request["Cmd"].as_str() {
            Some(cmd @ ("Subscribe.txt" | "Unsubscribe.txt")) => vec![format!(
                r#"{{"Cmd": "{}", "SessionId": "{}", "Keys": "{}", "EntityType": "{}", "HttpClientType": "WebSocket"}}"#,
                cmd,
                request["SessionId"].as_str().unwrap_or_default(),
                request["Keys"].as_str().unwrap_or_default(),
                request["EntityType"].as_str().unwrap_or_default(),
            )],
            _ => vec![],
        }
    })
}

/// Acknowledges nothing.
fn silent_responder() -> Responder {
    Arc::new(|_: &str| vec![])
}

async fn start_venue(responder: Responder) -> MockVenue {
    MockVenue::start(vec![SESSION_CREATED.to_string()], responder).await
}

fn new_stream(venue: &MockVenue, config: StreamConfig) -> EtnaStream {
    EtnaStream::new(
        "etna",
        &venue.url,
        "dXNlcg==",
        "cGFzcw==",
        SessionIdentity::default(),
        config,
    )
}

fn subscribe_frame(topic: &str, key: &str) -> Value {
    json!({
        "Cmd": "Subscribe.txt",
        "SessionId": "S1",
        "Keys": key,
        "EntityType": topic,
        "HttpClientType": "WebSocket"
    })
}

#[tokio::test]
async fn test_start_creates_session() {
    let venue = start_venue(etna_responder()).await;
    let stream = new_stream(&venue, test_config());
    let connected = Arc::new(Mutex::new(Vec::new()));
    let names = connected.clone();
    stream.set_connect_handler(move |name| names.lock().unwrap().push(name.to_string()));

    stream.start().await.expect("start failed");

    assert!(stream.is_operational());
    assert_eq!(stream.session().user_session_id, "S1");
    assert_eq!(connected.lock().unwrap().clone(), vec!["etna".to_string()]);

    let requests = venue.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].uri,
        "/CreateSession.txt?HttpClientType=WebSocket&Password=pass&User=user"
    );
    assert!(
        requests[0]
            .user_agent
            .as_deref()
            .is_some_and(|agent| agent.starts_with("etnalink/"))
    );

    stream.stop().await;
    assert!(!stream.is_operational());
}

#[tokio::test]
async fn test_start_times_out_without_session() {
    let venue = MockVenue::start(vec![], silent_responder()).await;
    let config = StreamConfig {
        start_timeout: Duration::from_millis(300),
        ..test_config()
    };
    let stream = new_stream(&venue, config);

    match stream.start().await {
        Err(StreamError::Timeout(_)) => {}
        other => panic!("Expected Timeout error, got {:?}", other),
    }
    assert!(!stream.is_operational());
    assert!(!stream.client().has_connection());
}

#[tokio::test]
async fn test_subscribe_is_acknowledged_once() {
    let mut venue = start_venue(etna_responder()).await;
    let stream = new_stream(&venue, test_config());
    stream.start().await.unwrap();

    stream.subscribe("Quote", "AAPL").await.unwrap();
    // still pending: no second frame
    stream.subscribe("Quote", "AAPL").await.unwrap();

    assert_eq!(venue.next_json().await, Some(subscribe_frame("Quote", "AAPL")));
    assert!(
        eventually(Duration::from_secs(2), || {
            stream.subscriptions().get("Quote") == Some(&vec!["AAPL".to_string()])
        })
        .await
    );

    // acknowledged: still no frame
    stream.subscribe("Quote", "AAPL").await.unwrap();
    stream.subscribe("Quote", "MSFT").await.unwrap();
    assert_eq!(venue.next_json().await, Some(subscribe_frame("Quote", "MSFT")));

    stream.stop().await;
}

#[tokio::test]
async fn test_unsubscribe_absent_sends_nothing() {
    let mut venue = start_venue(etna_responder()).await;
    let stream = new_stream(&venue, test_config());
    stream.start().await.unwrap();

    match stream.unsubscribe("Quote", "AAPL").await {
        Err(StreamError::Subscription(msg)) => assert!(msg.contains("absent")),
        other => panic!("Expected Subscription error, got {:?}", other),
    }
    assert!(venue.is_quiet(Duration::from_millis(200)).await);

    stream.stop().await;
}

#[tokio::test]
async fn test_unsubscribe_removes_entry() {
    let mut venue = start_venue(etna_responder()).await;
    let stream = new_stream(&venue, test_config());
    stream.start().await.unwrap();

    stream.subscribe("Candle", "AAPL:1m").await.unwrap();
    assert!(venue.next_json().await.is_some());
    assert!(
        eventually(Duration::from_secs(2), || !stream.subscriptions().is_empty()).await
    );

    stream.unsubscribe("Candle", "AAPL:1m").await.unwrap();
    assert!(stream.subscriptions().is_empty());

    let frame = venue.next_json().await.unwrap();
    assert_eq!(frame["Cmd"], "Unsubscribe.txt");
    assert_eq!(frame["Keys"], "AAPL:1m");
    assert_eq!(frame["EntityType"], "Candle");

    stream.stop().await;
}

#[tokio::test]
async fn test_ping_is_answered_with_pong() {
    let mut venue = start_venue(etna_responder()).await;
    let stream = new_stream(&venue, test_config());
    stream.start().await.unwrap();

    venue.push(r#"{"Cmd": "Ping"}"#);
    assert_eq!(venue.next_frame().await.as_deref(), Some(PONG));

    stream.stop().await;
}

#[tokio::test]
async fn test_bad_frames_do_not_stop_delivery() {
    let venue = start_venue(etna_responder()).await;
    let stream = new_stream(&venue, test_config());
    let mut quotes = stream.quote_stream().unwrap();
    let mut bars = stream.bar_stream().unwrap();
    let _balances = stream.balance_stream().unwrap();
    stream.start().await.unwrap();

    venue.push("garbage");
    venue.push(r#"{"EntityType": "AccountBalance", "cash": "lots"}"#);
    venue.push(r#"{"EntityType": "Unknown", "Key": "AAPL"}"#);
    venue.push(r#"{"EntityType": "Candle", "Key": "AAPL", "Close": "1", "IsCompleted": "false"}"#);
    venue.push(
        r#"{"EntityType": "Quote", "Key": "AAPL", "Date": "03/15/2025 14:30:05", "Ask": "190.12", "Bid": "190.10", "Price": "190.11", "Volume": "300", "QuoteTypes": "Trade"}"#,
    );
    venue.push(r#"{"EntityType": "Candle", "Key": "AAPL", "Close": "2", "IsCompleted": "true"}"#);

    let quote = timeout(Duration::from_secs(2), quotes.recv())
        .await
        .expect("no quote")
        .unwrap();
    assert_eq!(quote.symbol, "AAPL");
    assert_eq!(quote.last, 190.11);

    let bar = timeout(Duration::from_secs(2), bars.recv())
        .await
        .expect("no bar")
        .unwrap();
    assert_eq!(bar.close, 2.0);
    assert!(bars.try_recv().is_err());
    assert!(stream.is_operational());

    stream.stop().await;
}

#[tokio::test]
async fn test_read_failure_clears_operational() {
    let venue = start_venue(etna_responder()).await;
    let config = StreamConfig {
        reconnect_interval: Duration::from_secs(60),
        ..test_config()
    };
    let stream = new_stream(&venue, config);
    stream.start().await.unwrap();
    assert!(stream.is_operational());

    venue.drop_connection();
    assert!(eventually(Duration::from_secs(2), || !stream.is_operational()).await);
    assert!(!stream.client().is_logged_in());

    stream.stop().await;
}

#[tokio::test]
async fn test_close_frame_reaches_disconnect_handler() {
    let venue = start_venue(etna_responder()).await;
    let config = StreamConfig {
        reconnect_interval: Duration::from_secs(60),
        ..test_config()
    };
    let stream = new_stream(&venue, config);
    let closed = Arc::new(Mutex::new(None::<(u16, String)>));
    let record = closed.clone();
    stream.set_disconnect_handler(Arc::new(move |code, text| {
        *record.lock().unwrap() = Some((code, text.to_string()));
        Ok(())
    }));
    stream.start().await.unwrap();

    venue.close(4001, "session expired");
    assert!(eventually(Duration::from_secs(2), || closed.lock().unwrap().is_some()).await);
    assert_eq!(
        closed.lock().unwrap().clone(),
        Some((4001, "session expired".to_string()))
    );

    stream.stop().await;
}

#[tokio::test]
async fn test_reconnect_replays_subscriptions() {
    let mut venue = start_venue(etna_responder()).await;
    let stream = new_stream(&venue, test_config());
    let sessions = Arc::new(AtomicUsize::new(0));
    let counter = sessions.clone();
    stream.set_connect_handler(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    stream.start().await.unwrap();

    stream.subscribe("Quote", "AAPL").await.unwrap();
    assert_eq!(venue.next_json().await, Some(subscribe_frame("Quote", "AAPL")));
    assert!(eventually(Duration::from_secs(2), || !stream.subscriptions().is_empty()).await);

    venue.drop_connection();
    assert!(eventually(Duration::from_secs(3), || venue.connections() == 2).await);
    assert!(eventually(Duration::from_secs(3), || stream.is_operational()).await);

    assert_eq!(venue.next_json().await, Some(subscribe_frame("Quote", "AAPL")));
    assert_eq!(sessions.load(Ordering::SeqCst), 2);
    assert_eq!(
        stream.subscriptions().get("Quote"),
        Some(&vec!["AAPL".to_string()])
    );

    stream.stop().await;
}

#[tokio::test]
async fn test_resumed_session_url() {
    let venue = start_venue(etna_responder()).await;
    let stream = EtnaStream::new(
        "etna",
        &venue.url,
        "dXNlcg==",
        "cGFzcw==",
        SessionIdentity {
            stream_session_id: "stream-7".to_string(),
            user_session_id: "U9".to_string(),
            user_id: 12,
        },
        test_config(),
    );
    stream.start().await.unwrap();

    assert_eq!(
        venue.requests()[0].uri,
        "/CreateSession.txt?HttpClientType=WebSocket&Password=stream-7&User=12%3AU9"
    );
    assert_eq!(stream.session().user_session_id, "S1");

    stream.stop().await;
}

#[tokio::test]
async fn test_subscribe_while_reconnecting_is_rejected() {
    let mut venue = start_venue(etna_responder()).await;
    let config = StreamConfig {
        reconnect_interval: Duration::from_millis(400),
        ..test_config()
    };
    let stream = new_stream(&venue, config);
    stream.start().await.unwrap();

    stream.subscribe("Quote", "AAPL").await.unwrap();
    assert_eq!(venue.next_json().await, Some(subscribe_frame("Quote", "AAPL")));
    assert!(eventually(Duration::from_secs(2), || !stream.subscriptions().is_empty()).await);

    venue.drop_connection();
    assert!(eventually(Duration::from_secs(2), || !stream.is_operational()).await);
    assert!(matches!(
        stream.subscribe("Quote", "MSFT").await,
        Err(StreamError::NotConnected)
    ));
    assert!(matches!(
        stream.unsubscribe("Quote", "AAPL").await,
        Err(StreamError::NotConnected)
    ));

    assert!(eventually(Duration::from_secs(3), || stream.is_operational()).await);
    assert_eq!(venue.connections(), 2);
    // the replay is the only frame on the new socket
    assert_eq!(venue.next_json().await, Some(subscribe_frame("Quote", "AAPL")));
    assert!(venue.is_quiet(Duration::from_millis(300)).await);

    stream.subscribe("Quote", "MSFT").await.unwrap();
    assert_eq!(venue.next_json().await, Some(subscribe_frame("Quote", "MSFT")));
    assert!(venue.is_quiet(Duration::from_millis(300)).await);

    stream.stop().await;
}
