use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use stockpulse::application::usecases::InventoryService;
use stockpulse::domain::{EntryDraft, EntryType};
use stockpulse::infrastructure::broadcast_notifier::BroadcastNotifier;
use stockpulse::infrastructure::entry_broker::EntryEventBroker;
use stockpulse::infrastructure::memory_store::InMemoryEntryStore;
use stockpulse::interfaces::http_api::{ApiState, build_router};

async fn spawn_app(api_token: Option<&str>) -> (String, InventoryService, Arc<EntryEventBroker>) {
    let broker = Arc::new(EntryEventBroker::new());
    broker.configure(16);
    broker.set_loop(&tokio::runtime::Handle::current());

    let inventory = InventoryService::new(
        Arc::new(InMemoryEntryStore::new()),
        Arc::new(BroadcastNotifier::new(broker.clone())),
    );
    let app = build_router(ApiState {
        inventory: inventory.clone(),
        broker: broker.clone(),
        api_token: api_token.map(str::to_string),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, inventory, broker)
}

async fn open(addr: &str, path: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let req = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nAccept: text/event-stream\r\n\r\n");
    stream.write_all(req.as_bytes()).await.unwrap();
    stream
}

/// Read until `needle` shows up in the accumulated response.
async fn read_until(stream: &mut TcpStream, buf: &mut String, needle: &str) {
    let fut = async {
        let mut chunk = [0u8; 4096];
        while !buf.contains(needle) {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before {needle:?}, got {buf:?}");
            buf.push_str(&String::from_utf8_lossy(&chunk[..n]));
        }
    };
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out waiting for stream data");
}

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn open_ws(addr: &str, query: &str) -> WsClient {
    let url = format!("ws://{addr}/api/v1/entries/stream{query}");
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn next_frame(ws: &mut WsClient) -> Message {
    tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("websocket ended")
        .unwrap()
}

async fn next_json(ws: &mut WsClient) -> serde_json::Value {
    let frame = next_frame(ws).await;
    serde_json::from_str(frame.to_text().unwrap()).unwrap()
}

fn draft(item_name: &str) -> EntryDraft {
    EntryDraft {
        item_name: item_name.into(),
        category_name: None,
        entry_type: EntryType::Fg,
        unit: "pcs".into(),
        qty: 12.0,
        warehouse_name: "Dispatch".into(),
        batch: None,
        price: None,
        mfg: None,
        exp: None,
        entry_date: None,
    }
}

async fn wait_for_subscribers(broker: &EntryEventBroker, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while broker.stats().subscribers != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscriber count never settled");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ws_stream_acknowledges_forwards_and_cleans_up_on_close() {
    let (addr, inventory, broker) = spawn_app(None).await;

    let mut ws = open_ws(&addr, "").await;
    assert_eq!(next_json(&mut ws).await["type"], "connected");
    assert_eq!(broker.stats().subscribers, 1);

    let entry = inventory.create_entry(draft("Shrink film"), None).await.unwrap();
    let created = next_json(&mut ws).await;
    assert_eq!(created["type"], "entry_created");
    assert_eq!(created["entry"]["id"], entry.id.to_string());

    inventory.delete_entry(entry.id).await.unwrap();
    let deleted = next_json(&mut ws).await;
    assert_eq!(deleted["type"], "entry_deleted");
    assert_eq!(deleted["entry_id"], entry.id.to_string());
    assert_eq!(deleted["entry_type"], "fg");

    ws.close(None).await.unwrap();
    wait_for_subscribers(&broker, 0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ws_stream_ignores_inbound_text() {
    let (addr, inventory, broker) = spawn_app(None).await;

    let mut ws = open_ws(&addr, "").await;
    assert_eq!(next_json(&mut ws).await["type"], "connected");

    ws.send(Message::Text("ping".into())).await.unwrap();
    inventory.create_entry(draft("Carton"), None).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "entry_created");
    assert_eq!(broker.stats().subscribers, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ws_stream_closes_with_policy_code_on_bad_token() {
    let (addr, _inventory, broker) = spawn_app(Some("s3cret")).await;

    let mut denied = open_ws(&addr, "?token=nope").await;
    match next_frame(&mut denied).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1008),
        other => panic!("expected a close frame, got {other:?}"),
    }
    assert_eq!(broker.stats().subscribers, 0);

    let mut allowed = open_ws(&addr, "?token=s3cret").await;
    assert_eq!(next_json(&mut allowed).await["type"], "connected");
    assert_eq!(broker.stats().subscribers, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ws_stream_ends_with_going_away_on_shutdown() {
    let (addr, _inventory, broker) = spawn_app(None).await;

    let mut ws = open_ws(&addr, "").await;
    assert_eq!(next_json(&mut ws).await["type"], "connected");

    broker.shutdown().await;
    match next_frame(&mut ws).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1001),
        other => panic!("expected a close frame, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sse_stream_acknowledges_then_forwards_entries() {
    let (addr, inventory, broker) = spawn_app(None).await;

    let mut stream = open(&addr, "/api/v1/entries/events").await;
    let mut buf = String::new();
    read_until(&mut stream, &mut buf, "event: connected").await;
    assert!(buf.starts_with("HTTP/1.1 200"));
    assert_eq!(broker.stats().subscribers, 1);

    let entry = inventory.create_entry(draft("Label roll"), None).await.unwrap();
    read_until(&mut stream, &mut buf, "event: entry_created").await;
    read_until(&mut stream, &mut buf, &entry.id.to_string()).await;

    inventory.delete_entry(entry.id).await.unwrap();
    read_until(&mut stream, &mut buf, "event: entry_deleted").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_requires_token_when_configured() {
    let (addr, _inventory, broker) = spawn_app(Some("s3cret")).await;

    let mut denied = open(&addr, "/api/v1/entries/events").await;
    let mut buf = String::new();
    read_until(&mut denied, &mut buf, "\r\n").await;
    assert!(buf.starts_with("HTTP/1.1 401"), "got {buf:?}");

    let mut allowed = open(&addr, "/api/v1/entries/events?token=s3cret").await;
    let mut buf = String::new();
    read_until(&mut allowed, &mut buf, "event: connected").await;
    assert_eq!(broker.stats().subscribers, 1);
}
