//! Session behaviour against an in-process server.

mod common;

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use common::{collect_until, drain, test_options, wait_for, MockServer, ServerConn, WAIT};
use oxarchive::websocket::*;

async fn connected(server: &mut MockServer) -> (OxArchiveWs, mpsc::UnboundedReceiver<WsEvent>, ServerConn) {
    let client = OxArchiveWs::new(test_options(server.connector.clone())).unwrap();
    let (forwarder, events) = EventForwarder::channel();
    client.set_handler(forwarder).unwrap();
    client.connect().await.unwrap();
    let conn = server.accept().await;
    (client, events, conn)
}

async fn subscribe_acked(
    client: &OxArchiveWs,
    conn: &mut ServerConn,
    channel: WsChannel,
    symbol: &str,
) -> mpsc::UnboundedReceiver<WsData> {
    let (tx, rx) = mpsc::unbounded_channel();
    let (result, ()) = tokio::join!(
        client.subscribe(channel, symbol, move |data| {
            let _ = tx.send(data.clone());
        }),
        async {
            let op = conn.next_op().await;
            conn.ack_subscription(&op);
        }
    );
    result.unwrap();
    rx
}

fn batch(stream_id: &str, sequence: u64) -> Value {
    json!({
        "type": "historical_batch",
        "stream_id": stream_id,
        "channel": "trades",
        "coin": "ETH",
        "sequence": sequence,
        "records": [
            {"timestamp": 1_000 + sequence * 10, "data": {"px": "1"}},
            {"timestamp": 1_001 + sequence * 10, "data": {"px": "2"}}
        ]
    })
}

#[tokio::test]
async fn test_reconnect_resubscribes_each_subscription_once() {
    let mut server = MockServer::new();
    let (client, mut events, mut conn) = connected(&mut server).await;

    let _replaced = subscribe_acked(&client, &mut conn, WsChannel::Trades, "btc").await;
    let _eth = subscribe_acked(&client, &mut conn, WsChannel::Orderbook, "ETH").await;
    let mut btc = subscribe_acked(&client, &mut conn, WsChannel::Trades, "BTC").await;
    let _sol = subscribe_acked(&client, &mut conn, WsChannel::Trades, "SOL").await;

    let (result, ()) = tokio::join!(client.unsubscribe(WsChannel::Trades, "SOL"), async {
        let op = conn.next_op().await;
        assert_eq!(op["op"], "unsubscribe");
        assert_eq!(op["coin"], "SOL");
        conn.ack_subscription(&op);
    });
    result.unwrap();

    server.refuse(2);
    drop(conn);
    wait_for(&mut events, |e| {
        matches!(e, WsEvent::StateChanged(ConnectionState::Reconnecting)).then_some(())
    })
    .await;
    client.unsubscribe(WsChannel::Orderbook, "ETH").await.unwrap();
    let mut conn = server.accept().await;

    let first = conn.next_op().await;
    assert_eq!(
        (first["op"].clone(), first["channel"].clone(), first["coin"].clone()),
        (json!("subscribe"), json!("trades"), json!("BTC"))
    );
    assert!(conn.try_next_op(Duration::from_millis(100)).await.is_none());
    assert_eq!(server.attempts(), 4);

    conn.ack_subscription(&first);
    conn.push(json!({"type": "data", "channel": "trades", "coin": "BTC", "data": {"seq": 1}}));

    let data = tokio::time::timeout(WAIT, btc.recv()).await.unwrap().unwrap();
    assert_eq!(data.coin, "BTC");
    assert_eq!(data.data["seq"], 1);
    assert!(client.is_connected());

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_data_is_delivered_in_arrival_order() {
    let mut server = MockServer::new();
    let (client, mut events, mut conn) = connected(&mut server).await;
    let mut trades = subscribe_acked(&client, &mut conn, WsChannel::Trades, "SOL").await;

    for seq in 0..20 {
        conn.push(json!({"type": "data", "channel": "trades", "coin": "SOL", "data": {"seq": seq}}));
    }
    // not subscribed: dropped
    conn.push(json!({"type": "data", "channel": "trades", "coin": "DOGE", "data": {}}));

    let mut seen = Vec::new();
    for _ in 0..20 {
        let data = tokio::time::timeout(WAIT, trades.recv()).await.unwrap().unwrap();
        seen.push(data.data["seq"].as_u64().unwrap());
    }
    assert_eq!(seen, (0..20).collect::<Vec<_>>());

    let on_data: Vec<u64> = collect_until(&mut events, |e| {
        matches!(e, WsEvent::Data(d) if d.data["seq"] == 19)
    })
    .await
    .into_iter()
    .filter_map(|e| match e {
        WsEvent::Data(d) => d.data["seq"].as_u64(),
        _ => None,
    })
    .collect();
    assert_eq!(on_data, (0..20).collect::<Vec<_>>());

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_stream_gap_is_reported_and_batch_still_delivered() {
    let mut server = MockServer::new();
    let (client, mut events, mut conn) = connected(&mut server).await;

    let (stream_id, ()) = tokio::join!(
        client.start_stream(WsChannel::Trades, "eth", 1_000i64, 5_000i64, 2),
        async {
            let op = conn.next_op().await;
            assert_eq!(op["op"], "stream");
            assert_eq!(op["coin"], "ETH");
            assert_eq!(op["batch_size"], 2);
            conn.push(json!({
                "type": "stream_started",
                "id": op["id"],
                "stream_id": "s-1",
                "channel": "trades",
                "coin": "ETH",
                "start": 1000,
                "end": 5000,
                "total": 8
            }));
        }
    );
    assert_eq!(stream_id.unwrap(), "s-1");

    for sequence in [0, 1, 3, 3] {
        conn.push(batch("s-1", sequence));
    }
    conn.push(json!({"type": "stream_progress", "stream_id": "s-1", "records_sent": 8, "total": 8}));
    conn.push(json!({"type": "stream_completed", "stream_id": "s-1", "records_sent": 8}));

    let collected = collect_until(&mut events, |e| {
        matches!(e, WsEvent::Stream(StreamEvent::Completed { .. }))
    })
    .await;

    let mut order = Vec::new();
    for event in &collected {
        match event {
            WsEvent::HistoricalBatch(b) => order.push(format!("batch {}", b.sequence)),
            WsEvent::Error(WebSocketError::SequenceGap {
                stream_id,
                expected,
                received,
            }) => {
                assert_eq!(stream_id, "s-1");
                order.push(format!("gap {}->{}", expected, received));
            }
            _ => {}
        }
    }
    assert_eq!(order, vec!["batch 0", "batch 1", "gap 2->3", "batch 3"]);

    let progress = collected.iter().find_map(|e| match e {
        WsEvent::StreamProgress(p) => Some(p.clone()),
        _ => None,
    });
    assert_eq!(
        progress,
        Some(StreamProgress {
            stream_id: "s-1".into(),
            records_delivered: 6,
            records_sent: 8,
            total: Some(8),
        })
    );
    assert!(matches!(
        collected.last(),
        Some(WsEvent::Stream(StreamEvent::Completed { records_delivered: 6, .. }))
    ));

    // late batch for a finished stream is ignored
    conn.push(batch("s-1", 4));
    assert_eq!(client.state(), ConnectionState::Connected);
    client.close().await.unwrap();
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, WsEvent::HistoricalBatch(_))));
}

#[tokio::test]
async fn test_undecodable_frames_leave_session_running() {
    let mut server = MockServer::new();
    let (client, mut events, mut conn) = connected(&mut server).await;
    let mut trades = subscribe_acked(&client, &mut conn, WsChannel::Trades, "BTC").await;

    conn.push(json!({"type": "mystery", "payload": 1}));
    conn.push_raw("not json");
    conn.push(json!({"type": "historical_batch", "stream_id": 7}));

    let decode_errors = collect_until(&mut events, |e| {
        matches!(e, WsEvent::Error(WebSocketError::Decode(DecodeError::Malformed { .. })))
    })
    .await
    .into_iter()
    .filter_map(|e| match e {
        WsEvent::Error(WebSocketError::Decode(d)) => Some(d),
        _ => None,
    })
    .collect::<Vec<_>>();
    assert_eq!(decode_errors.len(), 3);
    assert_eq!(decode_errors[0], DecodeError::UnknownTag("mystery".into()));
    assert!(matches!(decode_errors[1], DecodeError::InvalidJson(_)));
    assert_eq!(client.state(), ConnectionState::Connected);

    conn.push(json!({"type": "data", "channel": "trades", "coin": "BTC", "data": []}));
    assert!(tokio::time::timeout(WAIT, trades.recv()).await.unwrap().is_some());
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, WsEvent::StateChanged(_))));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_replay_lifecycle_and_idempotent_stop() {
    let mut server = MockServer::new();
    let (client, mut events, mut conn) = connected(&mut server).await;

    let (replay_id, ()) = tokio::join!(
        client.start_replay(
            WsChannel::Orderbook,
            "BTC",
            "2024-01-01T00:00:00Z",
            Some(1_704_070_800_000i64.into()),
            Some(10.0)
        ),
        async {
            let op = conn.next_op().await;
            assert_eq!(op["op"], "replay");
            assert_eq!(op["start"], 1_704_067_200_000i64);
            assert_eq!(op["speed"], 10.0);
            conn.push(json!({
                "type": "replay_started",
                "id": op["id"],
                "replay_id": "r-1",
                "channel": "orderbook",
                "coin": "BTC",
                "start": 1_704_067_200_000i64,
                "end": 1_704_070_800_000i64,
                "speed": 10.0
            }));
        }
    );
    let replay_id = replay_id.unwrap();
    assert_eq!(replay_id, "r-1");

    let (paused, ()) = tokio::join!(client.pause_replay(&replay_id), async {
        let op = conn.next_op().await;
        assert_eq!(op["op"], "replay.pause");
        conn.push(json!({"type": "replay_paused", "id": op["id"], "replay_id": "r-1", "current_timestamp": 5}));
    });
    paused.unwrap();

    let (resumed, ()) = tokio::join!(client.resume_replay(&replay_id), async {
        let op = conn.next_op().await;
        assert_eq!(op["op"], "replay.resume");
        conn.push(json!({"type": "replay_resumed", "id": op["id"], "replay_id": "r-1"}));
    });
    resumed.unwrap();

    conn.push(json!({
        "type": "historical_data",
        "replay_id": "r-1",
        "channel": "orderbook",
        "coin": "BTC",
        "timestamp": 1_704_067_260_000i64,
        "data": {"coin": "BTC", "bids": [], "asks": []}
    }));

    let (stopped, ()) = tokio::join!(client.stop_replay(&replay_id), async {
        let op = conn.next_op().await;
        assert_eq!(op["op"], "replay.stop");
        // a second stop while the first is in flight sends nothing
        client.stop_replay(&replay_id).await.unwrap();
        conn.push(json!({"type": "replay_stopped", "id": op["id"], "replay_id": "r-1"}));
    });
    stopped.unwrap();

    client.stop_replay(&replay_id).await.unwrap();
    client.stop_replay("never-started").await.unwrap();
    assert!(conn.try_next_op(Duration::from_millis(100)).await.is_none());

    let collected = collect_until(&mut events, |e| {
        matches!(e, WsEvent::Replay(ReplayEvent::Stopped { .. }))
    })
    .await;
    let records: Vec<i64> = collected
        .iter()
        .filter_map(|e| match e {
            WsEvent::HistoricalData(d) => Some(d.timestamp),
            _ => None,
        })
        .collect();
    assert_eq!(records, vec![1_704_067_260_000]);

    let lifecycle: Vec<ReplayEvent> = collected
        .into_iter()
        .filter_map(|e| match e {
            WsEvent::Replay(r) => Some(r),
            _ => None,
        })
        .collect();
    assert!(matches!(
        lifecycle.as_slice(),
        [
            ReplayEvent::Started { end: Some(1_704_070_800_000), .. },
            ReplayEvent::Paused { current_timestamp: Some(5), .. },
            ReplayEvent::Resumed { .. },
            ReplayEvent::Stopped { .. }
        ]
    ));

    assert!(matches!(
        client.pause_replay(&replay_id).await,
        Err(WebSocketError::InvalidArgument(_))
    ));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_newer_replay_supersedes_older_one() {
    let mut server = MockServer::new();
    let (client, mut events, mut conn) = connected(&mut server).await;

    for replay_id in ["r-1", "r-2"] {
        let (result, ()) = tokio::join!(
            client.start_replay(WsChannel::Trades, "BTC", 0i64, None, None),
            async {
                let op = conn.next_op().await;
                conn.push(json!({
                    "type": "replay_started",
                    "id": op["id"],
                    "replay_id": replay_id,
                    "channel": "trades",
                    "coin": "BTC",
                    "start": 0
                }));
            }
        );
        assert_eq!(result.unwrap(), replay_id);
    }

    let stop = conn.next_op().await;
    assert_eq!(stop["op"], "replay.stop");
    assert_eq!(stop["replay_id"], "r-1");

    let cancelled = wait_for(&mut events, |e| match e {
        WsEvent::Replay(ReplayEvent::Cancelled { replay_id, reason }) => Some((replay_id, reason)),
        _ => None,
    })
    .await;
    assert_eq!(cancelled, ("r-1".to_string(), CancelReason::Superseded));

    // records of the superseded replay are dropped
    conn.push(json!({
        "type": "historical_data",
        "replay_id": "r-1",
        "channel": "trades",
        "coin": "BTC",
        "timestamp": 1,
        "data": []
    }));
    conn.push(json!({
        "type": "historical_data",
        "replay_id": "r-2",
        "channel": "trades",
        "coin": "BTC",
        "timestamp": 2,
        "data": []
    }));
    let record = wait_for(&mut events, |e| match e {
        WsEvent::HistoricalData(d) => Some(d),
        _ => None,
    })
    .await;
    assert_eq!(record.replay_id, "r-2");

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_server_error_fails_request_and_drops_subscription() {
    let mut server = MockServer::new();
    let (client, mut events, mut conn) = connected(&mut server).await;
    let _eth = subscribe_acked(&client, &mut conn, WsChannel::Trades, "ETH").await;

    let (result, ()) = tokio::join!(client.subscribe(WsChannel::Trades, "NOPE", |_| {}), async {
        let op = conn.next_op().await;
        conn.push(json!({
            "type": "error",
            "id": op["id"],
            "message": "unknown coin",
            "code": "bad_request"
        }));
    });
    match result {
        Err(WebSocketError::Server { message, code, .. }) => {
            assert_eq!(message, "unknown coin");
            assert_eq!(code.as_deref(), Some("bad_request"));
        }
        other => panic!("expected server error, got {:?}", other),
    }

    drop(conn);
    let mut conn = server.accept().await;
    let op = conn.next_op().await;
    assert_eq!(op["coin"], "ETH");
    assert!(conn.try_next_op(Duration::from_millis(100)).await.is_none());
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, WsEvent::Error(WebSocketError::Server { .. }))));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_replay_started_offline_is_sent_after_burst() {
    let mut server = MockServer::new();
    let (client, mut events, mut conn) = connected(&mut server).await;
    let _btc = subscribe_acked(&client, &mut conn, WsChannel::Trades, "BTC").await;

    server.refuse(3);
    drop(conn);
    wait_for(&mut events, |e| {
        matches!(e, WsEvent::StateChanged(ConnectionState::Reconnecting)).then_some(())
    })
    .await;

    let (replay_id, ()) = tokio::join!(
        client.start_replay(WsChannel::Trades, "BTC", 0i64, None, None),
        async {
            let mut conn = server.accept().await;
            let burst = conn.next_op().await;
            assert_eq!(burst["op"], "subscribe");
            let replay = conn.next_op().await;
            assert_eq!(replay["op"], "replay");
            conn.push(json!({
                "type": "replay_started",
                "id": replay["id"],
                "replay_id": "r-9",
                "channel": "trades",
                "coin": "BTC",
                "start": 0
            }));
            // keep the connection open until the reply is read
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(conn);
        }
    );
    assert_eq!(replay_id.unwrap(), "r-9");
    assert!(server.attempts() >= 4);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_stop_resolves_when_stream_completes_first() {
    let mut server = MockServer::new();
    let (client, mut events, mut conn) = connected(&mut server).await;

    let (stream_id, ()) = tokio::join!(
        client.start_stream(WsChannel::Trades, "ETH", 0i64, 10i64, 100),
        async {
            let op = conn.next_op().await;
            conn.push(json!({
                "type": "stream_started",
                "id": op["id"],
                "stream_id": "s-1",
                "channel": "trades",
                "coin": "ETH",
                "start": 0,
                "end": 10
            }));
        }
    );
    let stream_id = stream_id.unwrap();

    let (stopped, ()) = tokio::join!(client.stop_stream(&stream_id), async {
        let op = conn.next_op().await;
        assert_eq!(op["op"], "stream.stop");
        // the server finished before it saw the stop
        conn.push(json!({"type": "stream_completed", "stream_id": "s-1", "records_sent": 0}));
    });
    assert_eq!(stopped, Ok(()));

    wait_for(&mut events, |e| {
        matches!(e, WsEvent::Stream(StreamEvent::Completed { .. })).then_some(())
    })
    .await;
    client.stop_stream(&stream_id).await.unwrap();
    assert!(conn.try_next_op(Duration::from_millis(100)).await.is_none());

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_pause_fails_when_replay_completes_first() {
    let mut server = MockServer::new();
    let (client, _events, mut conn) = connected(&mut server).await;

    let (replay_id, ()) = tokio::join!(
        client.start_replay(WsChannel::Trades, "BTC", 0i64, None, None),
        async {
            let op = conn.next_op().await;
            conn.push(json!({
                "type": "replay_started",
                "id": op["id"],
                "replay_id": "r-1",
                "channel": "trades",
                "coin": "BTC",
                "start": 0
            }));
        }
    );
    let replay_id = replay_id.unwrap();

    let (paused, ()) = tokio::join!(client.pause_replay(&replay_id), async {
        let op = conn.next_op().await;
        assert_eq!(op["op"], "replay.pause");
        conn.push(json!({"type": "replay_completed", "replay_id": "r-1", "records_sent": 3}));
    });
    assert_eq!(
        paused,
        Err(WebSocketError::Cancelled {
            operation: "replay.pause"
        })
    );
    client.stop_replay(&replay_id).await.unwrap();

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_connection_loss_cancels_live_stream() {
    let mut server = MockServer::new();
    let (client, mut events, mut conn) = connected(&mut server).await;

    let (stream_id, ()) = tokio::join!(
        client.start_stream(WsChannel::Trades, "ETH", 0i64, 10i64, 100),
        async {
            let op = conn.next_op().await;
            conn.push(json!({
                "type": "stream_started",
                "id": op["id"],
                "stream_id": "s-2",
                "channel": "trades",
                "coin": "ETH",
                "start": 0,
                "end": 10
            }));
        }
    );
    assert_eq!(stream_id.unwrap(), "s-2");

    drop(conn);
    let cancelled = wait_for(&mut events, |e| match e {
        WsEvent::Stream(StreamEvent::Cancelled { stream_id, reason }) => Some((stream_id, reason)),
        _ => None,
    })
    .await;
    assert_eq!(cancelled, ("s-2".to_string(), CancelReason::ConnectionLost));

    // stopping a cancelled stream is a no-op
    client.stop_stream("s-2").await.unwrap();
    let _conn = server.accept().await;
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_close_cancels_pending_requests() {
    let mut server = MockServer::new();
    let (client, mut events, mut conn) = connected(&mut server).await;

    let (result, ()) = tokio::join!(client.subscribe(WsChannel::Trades, "BTC", |_| {}), async {
        let op = conn.next_op().await;
        assert_eq!(op["op"], "subscribe");
        client.close().await.unwrap();
    });
    assert!(matches!(
        result,
        Err(WebSocketError::Cancelled {
            operation: "subscribe"
        })
    ));

    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(matches!(
        client.subscribe(WsChannel::Trades, "BTC", |_| {}).await,
        Err(WebSocketError::Closed)
    ));
    client.close().await.unwrap();

    let states: Vec<ConnectionState> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            WsEvent::StateChanged(s) => Some(s),
            _ => None,
        })
        .collect();
    assert!(states.ends_with(&[ConnectionState::Closing, ConnectionState::Closed]));
}

#[tokio::test]
async fn test_reconnect_exhaustion_is_fatal() {
    let server = MockServer::new();
    server.refuse(u32::MAX);
    let options = test_options(server.connector.clone()).with_reconnect(ReconnectPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        ..Default::default()
    });
    let client = OxArchiveWs::new(options).unwrap();
    let (forwarder, mut events) = EventForwarder::channel();
    client.set_handler(forwarder).unwrap();

    let result = client.connect().await;
    assert!(matches!(
        result,
        Err(WebSocketError::ReconnectExhausted { attempts: 3 })
    ));
    assert_eq!(server.attempts(), 4);
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(matches!(
        client.start_stream(WsChannel::Trades, "BTC", 0i64, 1i64, 10).await,
        Err(WebSocketError::Closed)
    ));

    let fatal = drain(&mut events).into_iter().any(|e| {
        matches!(e, WsEvent::Error(WebSocketError::ReconnectExhausted { attempts: 3 }))
    });
    assert!(fatal);
}

#[tokio::test(start_paused = true)]
async fn test_missing_pong_triggers_reconnect() {
    let mut server = MockServer::new();
    let options = test_options(server.connector.clone())
        .with_heartbeat(Duration::from_secs(1), Duration::from_millis(500));
    let client = OxArchiveWs::new(options).unwrap();
    let (forwarder, mut events) = EventForwarder::channel();
    client.set_handler(forwarder).unwrap();
    client.connect().await.unwrap();
    let _silent = server.accept().await;

    wait_for(&mut events, |e| {
        matches!(e, WsEvent::Error(WebSocketError::PongTimeout)).then_some(())
    })
    .await;
    let _next = server.accept().await;

    client.close().await.unwrap();
}
