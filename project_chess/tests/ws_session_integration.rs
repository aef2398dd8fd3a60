/// Integration test: two WebSocket clients play through a real server backed
/// by a temporary SQLite file.
use std::net::SocketAddr;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use coordinator::{sign_join, wall_clock_ms};
use game_db::{GameStatus, GameStore, SqliteGameStore};
use project_chess::config::ServerConfig;
use project_chess::server::{serve_on, ServerError};
use project_chess::shutdown::{stop_channel, StopHandle, StopReason};
use session::{RoomCode, SeatRole};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    db_path: String,
    stop: StopHandle,
    handle: JoinHandle<Result<(), ServerError>>,
    _dir: tempfile::TempDir,
}

async fn start_server(room: &str, creator: &SigningKey) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("games.db").to_str().unwrap().to_string();

    let code = RoomCode::new(room).unwrap();
    let (creator_id, _) = sign_join(creator, &code, SeatRole::Creator, wall_clock_ms());
    let store = SqliteGameStore::open(&db_path).unwrap();
    store.create_game(room, &creator_id, None).unwrap();
    drop(store);

    let mut config = ServerConfig::default();
    config.database.path = db_path.clone();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, listener_stop) = stop_channel();
    let handle = tokio::spawn(serve_on(listener, config, listener_stop));

    TestServer {
        addr,
        db_path,
        stop,
        handle,
        _dir: dir,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn join(ws: &mut Client, key: &SigningKey, room: &str, seat: SeatRole) {
    let code = RoomCode::new(room).unwrap();
    let signed_at = wall_clock_ms();
    let (identity, signature) = sign_join(key, &code, seat, signed_at);
    send(
        ws,
        json!({
            "type": "join",
            "room_code": room,
            "identity": identity,
            "signature": signature,
            "signed_at": signed_at,
            "seat": seat.as_str(),
        }),
    )
    .await;
}

/// Read frames until one of type `kind` arrives.
async fn expect(ws: &mut Client, kind: &str) -> Value {
    let wait = async {
        loop {
            let frame = ws.next().await.expect("socket closed").expect("read error");
            if let Message::Text(text) = frame {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                if value["type"] == kind {
                    return value;
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {kind}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_game_over_websocket() {
    let creator = SigningKey::from_bytes(&[11; 32]);
    let joiner = SigningKey::from_bytes(&[22; 32]);
    let server = start_server("WSROOM", &creator).await;

    let mut white = connect(server.addr).await;
    join(&mut white, &creator, "WSROOM", SeatRole::Creator).await;
    let admitted = expect(&mut white, "join_admitted").await;
    assert_eq!(admitted["seat"], "creator");

    let mut black = connect(server.addr).await;
    join(&mut black, &joiner, "WSROOM", SeatRole::Joiner).await;
    expect(&mut black, "join_admitted").await;

    for ws in [&mut white, &mut black] {
        expect(ws, "session_ready").await;
        let started = expect(ws, "clock_started").await;
        assert_eq!(started["clock"]["white_secs"], 900);
        assert_eq!(started["clock"]["black_secs"], 900);
        assert_eq!(started["clock"]["running"], "white");
    }

    send(
        &mut white,
        json!({"type": "move", "room_code": "WSROOM", "from": "e2", "to": "e4"}),
    )
    .await;
    let accepted = expect(&mut white, "move_accepted").await;
    assert_eq!(accepted["san"], "e4");
    let relayed = expect(&mut black, "move_broadcast").await;
    assert_eq!(relayed["from"], "e2");
    assert_eq!(relayed["to"], "e4");

    send(&mut black, json!({"type": "heartbeat"})).await;
    expect(&mut black, "pong").await;

    send(&mut black, json!({"type": "resign", "room_code": "WSROOM"})).await;
    for ws in [&mut white, &mut black] {
        let ended = expect(ws, "game_ended").await;
        assert_eq!(ended["winner"], "creator");
        assert_eq!(ended["reason"], "resignation");
        assert!(ended["pgn"].as_str().unwrap().contains("1. e4"));
    }

    let store = SqliteGameStore::open(&server.db_path).unwrap();
    let record = store.get_game_record("WSROOM").unwrap().unwrap();
    assert_eq!(record.status, GameStatus::Completed);
    assert_eq!(record.winner, Some(SeatRole::Creator));
    assert_eq!(record.reason.as_deref(), Some("resignation"));

    server.stop.stop(StopReason::Requested);
    let result = tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn forged_and_wrong_seat_joins_are_rejected() {
    let creator = SigningKey::from_bytes(&[33; 32]);
    let stranger = SigningKey::from_bytes(&[44; 32]);
    let server = start_server("WSAUTH", &creator).await;

    let mut ws = connect(server.addr).await;
    send(
        &mut ws,
        json!({
            "type": "join",
            "room_code": "WSAUTH",
            "identity": "00",
            "signature": "00",
            "signed_at": wall_clock_ms(),
            "seat": "creator",
        }),
    )
    .await;
    let rejected = expect(&mut ws, "join_rejected").await;
    assert_eq!(rejected["reason"], "bad_signature");

    join(&mut ws, &stranger, "WSAUTH", SeatRole::Creator).await;
    let rejected = expect(&mut ws, "join_rejected").await;
    assert_eq!(rejected["reason"], "seat_mismatch");

    join(&mut ws, &stranger, "NOSUCHROOM", SeatRole::Joiner).await;
    let rejected = expect(&mut ws, "join_rejected").await;
    assert_eq!(rejected["reason"], "unknown_room");

    // Unseated connections cannot act.
    send(&mut ws, json!({"type": "resign", "room_code": "WSAUTH"})).await;
    let error = expect(&mut ws, "error").await;
    assert_eq!(error["message"], "join a seat first");

    server.stop.stop(StopReason::Requested);
    let _ = tokio::time::timeout(Duration::from_secs(5), server.handle).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_seat_is_reported_to_opponent() {
    let creator = SigningKey::from_bytes(&[55; 32]);
    let joiner = SigningKey::from_bytes(&[66; 32]);
    let server = start_server("WSDROP", &creator).await;

    let mut white = connect(server.addr).await;
    join(&mut white, &creator, "WSDROP", SeatRole::Creator).await;
    expect(&mut white, "join_admitted").await;

    let mut black = connect(server.addr).await;
    join(&mut black, &joiner, "WSDROP", SeatRole::Joiner).await;
    expect(&mut white, "clock_started").await;

    black.close(None).await.unwrap();
    let notice = expect(&mut white, "opponent_disconnected").await;
    assert_eq!(notice["seat"], "joiner");
    assert_eq!(notice["remaining_lifelines"], 3);
    assert_eq!(notice["countdown_ms"], 30_000);

    let mut back = connect(server.addr).await;
    join(&mut back, &joiner, "WSDROP", SeatRole::Joiner).await;
    let snapshot = expect(&mut back, "snapshot").await;
    assert_eq!(snapshot["reason"], "reconnected");
    let reconnected = expect(&mut white, "opponent_reconnected").await;
    assert_eq!(reconnected["remaining_lifelines"], 3);

    server.stop.stop(StopReason::Requested);
    let _ = tokio::time::timeout(Duration::from_secs(5), server.handle).await;
}
