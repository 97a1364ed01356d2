/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

use super::mock_venue::{MockVenue, Responder, eventually};
use etnalink::{FmpStream, StreamConfig, StreamError};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn test_config(venue: &MockVenue) -> StreamConfig {
    StreamConfig {
        start_timeout: Duration::from_secs(2),
        start_poll_interval: Duration::from_millis(20),
        reconnect_interval: Duration::from_millis(50),
        reconnect_attempts: 20,
        liveness_check: false,
        handshake_timeout: Duration::from_secs(2),
        fmp_url: venue.url.clone(),
        ..StreamConfig::default()
    }
}

/// Accepts `valid_key` and confirms every subscription request.
fn fmp_responder(valid_key: &'static str) -> Responder {
    Arc::new(move |frame: &str| {
        let Ok(request) = serde_json::from_str::<Value>(frame) else {
            return vec![];
        };
        let reply = match request["event"].as_str() {
            Some("login") if request["data"]["apiKey"] == valid_key => {
                json!({"event": "login", "message": "Authenticated", "status": 200, "timestamp": 1})
            }
            Some("login") => {
                json!({"event": "login", "message": "Invalid API key", "status": 401, "timestamp": 1})
            }
            Some("subscribe") => json!({
                "event": "subscribe",
                "message": format!("Subscribed to {}", request["data"]["ticker"].as_str().unwrap_or_default()),
                "status": 200,
                "timestamp": 2
            }),
            Some("unsubscribe") => json!({
                "event": "unsubscribe",
                "message": format!("Unsubscribed from {}", request["data"]["ticker"].as_str().unwrap_or_default()),
                "status": 200,
                "timestamp": 3
            }),
            _ => return vec![],
        };
        vec![reply.to_string()]
    })
}

fn login_frame() -> Value {
    json!({"event": "login", "data": {"apiKey": "k3y"}})
}

fn subscribe_frame(ticker: &str) -> Value {
    json!({"event": "subscribe", "data": {"ticker": ticker}})
}

#[tokio::test]
async fn test_start_logs_in() {
    let mut venue = MockVenue::start(vec![], fmp_responder("k3y")).await;
    let stream = FmpStream::new("fmp", "k3y", test_config(&venue));

    stream.start().await.expect("start failed");
    assert!(stream.is_operational());
    assert_eq!(venue.next_json().await, Some(login_frame()));

    stream.stop().await;
}

#[tokio::test]
async fn test_rejected_key_times_out() {
    let venue = MockVenue::start(vec![], fmp_responder("k3y")).await;
    let config = StreamConfig {
        start_timeout: Duration::from_millis(300),
        ..test_config(&venue)
    };
    let stream = FmpStream::new("fmp", "wrong", config);

    match stream.start().await {
        Err(StreamError::Timeout(_)) => {}
        other => panic!("Expected Timeout error, got {:?}", other),
    }
    assert!(!stream.is_operational());
}

#[tokio::test]
async fn test_subscribe_confirmed_then_rejected_twice() {
    let mut venue = MockVenue::start(vec![], fmp_responder("k3y")).await;
    let stream = FmpStream::new("fmp", "k3y", test_config(&venue));
    stream.start().await.unwrap();
    assert_eq!(venue.next_json().await, Some(login_frame()));

    stream.subscribe("aapl").await.unwrap();
    assert_eq!(venue.next_json().await, Some(subscribe_frame("aapl")));
    assert!(
        eventually(Duration::from_secs(2), || stream.subscriptions() == vec!["aapl".to_string()])
            .await
    );

    match stream.subscribe("aapl").await {
        Err(StreamError::Subscription(msg)) => assert_eq!(msg, "already subscribed aapl"),
        other => panic!("Expected Subscription error, got {:?}", other),
    }

    stream.unsubscribe("aapl").await.unwrap();
    assert!(stream.subscriptions().is_empty());
    assert_eq!(
        venue.next_json().await,
        Some(json!({"event": "unsubscribe", "data": {"ticker": "aapl"}}))
    );
    assert!(matches!(
        stream.unsubscribe("aapl").await,
        Err(StreamError::Subscription(_))
    ));

    stream.stop().await;
}

#[tokio::test]
async fn test_only_trades_are_published() {
    let venue = MockVenue::start(vec![], fmp_responder("k3y")).await;
    let stream = FmpStream::new("fmp", "k3y", test_config(&venue));
    let mut quotes = stream.quote_stream().unwrap();
    stream.start().await.unwrap();

    venue.push(r#"{"event":"heartbeat","status":0,"timestamp":1700000000}"#);
    venue.push(r#"{"s":"aapl","t":1700000000000000000,"type":"Q","ap":190.2,"as":1,"bp":190.1,"bs":2}"#);
    venue.push(r#"{"s":"aapl","t":1700000000000000000,"type":"T","lp":"oops"}"#);
    venue.push(r#"{"s":"aapl","t":1700000001000000000,"type":"T","lp":190.15,"ls":25}"#);

    let quote = timeout(Duration::from_secs(2), quotes.recv())
        .await
        .expect("no trade")
        .unwrap();
    assert_eq!(quote.symbol, "aapl");
    assert_eq!(quote.last, 190.15);
    assert_eq!(quote.time().timestamp(), 1_700_000_001);
    assert!(quotes.try_recv().is_err());

    stream.stop().await;
}

#[tokio::test]
async fn test_reconnect_logs_in_and_replays() {
    let mut venue = MockVenue::start(vec![], fmp_responder("k3y")).await;
    let stream = FmpStream::new("fmp", "k3y", test_config(&venue));
    stream.start().await.unwrap();
    assert_eq!(venue.next_json().await, Some(login_frame()));

    stream.subscribe("msft").await.unwrap();
    assert_eq!(venue.next_json().await, Some(subscribe_frame("msft")));
    assert!(eventually(Duration::from_secs(2), || !stream.subscriptions().is_empty()).await);

    venue.drop_connection();
    assert!(eventually(Duration::from_secs(3), || venue.connections() == 2).await);

    assert_eq!(venue.next_json().await, Some(login_frame()));
    assert_eq!(venue.next_json().await, Some(subscribe_frame("msft")));
    assert!(eventually(Duration::from_secs(2), || stream.is_operational()).await);
    assert_eq!(stream.subscriptions(), vec!["msft".to_string()]);

    stream.stop().await;
}

#[tokio::test]
async fn test_subscribe_while_reconnecting_is_rejected() {
    let mut venue = MockVenue::start(vec![], fmp_responder("k3y")).await;
    let config = StreamConfig {
        reconnect_interval: Duration::from_millis(400),
        ..test_config(&venue)
    };
    let stream = FmpStream::new("fmp", "k3y", config);
    stream.start().await.unwrap();
    assert_eq!(venue.next_json().await, Some(login_frame()));

    stream.subscribe("aapl").await.unwrap();
    assert_eq!(venue.next_json().await, Some(subscribe_frame("aapl")));
    assert!(eventually(Duration::from_secs(2), || !stream.subscriptions().is_empty()).await);

    venue.drop_connection();
    assert!(eventually(Duration::from_secs(2), || !stream.is_operational()).await);
    assert!(matches!(
        stream.subscribe("msft").await,
        Err(StreamError::NotConnected)
    ));

    assert!(eventually(Duration::from_secs(3), || stream.is_operational()).await);
    // login first, then the replay, nothing else
    assert_eq!(venue.next_json().await, Some(login_frame()));
    assert_eq!(venue.next_json().await, Some(subscribe_frame("aapl")));
    assert!(venue.is_quiet(Duration::from_millis(300)).await);

    stream.stop().await;
}
