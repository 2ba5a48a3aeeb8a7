//! Integration tests for the WebSocket client.
//!
//! These tests talk to the live 0xarchive service and are marked as ignored by default.
//! Set `OXARCHIVE_API_KEY` (a `.env` file works) and run with:
//! `cargo test --test websocket_integration -- --ignored`

use std::time::Duration;

use oxarchive::prelude::*;

fn client() -> OxArchiveWs {
    dotenvy::dotenv().ok();
    let options = WsOptions::from_env();
    assert!(options.api_key.is_some(), "OXARCHIVE_API_KEY is not set");
    OxArchiveWs::new(options).expect("Failed to build client")
}

/// Test basic connection
#[tokio::test]
#[ignore = "requires OXARCHIVE_API_KEY and network access"]
async fn test_connect() {
    let client = client();
    let result = client.connect().await;
    assert!(result.is_ok(), "Failed to connect: {:?}", result.err());
    assert!(client.is_connected());

    client.close().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
}

/// Test live order book subscription
#[tokio::test]
#[ignore = "requires OXARCHIVE_API_KEY and network access"]
async fn test_subscribe_orderbook() {
    let client = client();
    client.connect().await.expect("Failed to connect");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let result = client
        .subscribe_orderbook("BTC", move |data| {
            let _ = tx.send(data.parse::<OrderBook>());
        })
        .await;
    assert!(result.is_ok(), "Failed to subscribe: {:?}", result.err());

    let book = tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("No order book update within 30s")
        .expect("Handler dropped");
    let book = book.expect("Order book payload did not parse");
    assert_eq!(book.coin, "BTC");

    client.unsubscribe(WsChannel::Orderbook, "BTC").await.unwrap();
    client.close().await.unwrap();
}

/// Test a short trades replay
#[tokio::test]
#[ignore = "requires OXARCHIVE_API_KEY and network access"]
async fn test_replay_trades() {
    let client = client();
    let (forwarder, mut events) = EventForwarder::channel();
    client.set_handler(forwarder).unwrap();
    client.connect().await.expect("Failed to connect");

    let end = chrono::Utc::now() - chrono::Duration::hours(1);
    let start = end - chrono::Duration::minutes(5);
    let replay_id = client
        .start_replay(WsChannel::Trades, "BTC", start, Some(end.into()), Some(100.0))
        .await
        .expect("Failed to start replay");
    assert!(!replay_id.is_empty());

    let finished = tokio::time::timeout(Duration::from_secs(60), async {
        while let Some(event) = events.recv().await {
            if let WsEvent::Replay(ReplayEvent::Completed { .. }) = event {
                return true;
            }
        }
        false
    })
    .await;
    if finished.is_err() {
        client.stop_replay(&replay_id).await.unwrap();
    }

    client.close().await.unwrap();
}

/// Test a bulk stream of trades
#[tokio::test]
#[ignore = "requires OXARCHIVE_API_KEY and network access"]
async fn test_stream_trades() {
    let client = client();
    let (forwarder, mut events) = EventForwarder::channel();
    client.set_handler(forwarder).unwrap();
    client.connect().await.expect("Failed to connect");

    let end = chrono::Utc::now() - chrono::Duration::hours(2);
    let start = end - chrono::Duration::minutes(10);
    let stream_id = client
        .start_stream(WsChannel::Trades, "ETH", start, end, 500)
        .await
        .expect("Failed to start stream");

    let mut batches = 0;
    let _ = tokio::time::timeout(Duration::from_secs(60), async {
        while let Some(event) = events.recv().await {
            match event {
                WsEvent::HistoricalBatch(batch) => {
                    assert_eq!(batch.stream_id, stream_id);
                    batches += 1;
                }
                WsEvent::Stream(StreamEvent::Completed { .. }) => break,
                WsEvent::Error(e) => println!("Stream error: {}", e),
                _ => {}
            }
        }
    })
    .await;
    println!("Received {} batches", batches);

    client.stop_stream(&stream_id).await.unwrap();
    client.close().await.unwrap();
}
