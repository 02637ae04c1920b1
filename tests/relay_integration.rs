use std::future::pending;
use std::net::SocketAddr;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{SinkExt, StreamExt};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use locshare::config::ServerConfig;
use locshare::protocol::ServerMessage;
use locshare::registry::DeviceMode;
use locshare::server;
use locshare::service::RelayService;
use locshare::transfer::{ReceiverStatus, TransferStatus};

const WAIT: Duration = Duration::from_secs(5);

async fn start_relay() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let service = RelayService::new(ServerConfig {
        chunk_size: 4096,
        chunk_pause_ms: 0,
        ..Default::default()
    });
    tokio::spawn(async move {
        server::serve(listener, service, pending::<()>()).await.expect("serve");
    });
    addr
}

struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.expect("connect");
        let mut client = Self { ws };
        match client.next().await {
            ServerMessage::Welcome { ip } => assert_eq!(ip, "127.0.0.1"),
            other => panic!("expected welcome, got {other:?}"),
        }
        client
    }

    async fn register(addr: SocketAddr, id: &str, mode: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client
            .send(serde_json::json!({
                "type": "register_device",
                "id": id,
                "name": format!("{id} device"),
                "mode": mode,
            }))
            .await;
        match client.next().await {
            ServerMessage::DeviceRegistered { id: assigned, .. } => assert_eq!(assigned, id),
            other => panic!("unexpected {other:?}"),
        }
        match client.next().await {
            ServerMessage::DevicesUpdate { .. } => {}
            other => panic!("expected own presence update, got {other:?}"),
        }
        client
    }

    async fn send(&mut self, message: Value) {
        self.ws
            .send(Message::Text(message.to_string()))
            .await
            .expect("send");
    }

    async fn next(&mut self) -> ServerMessage {
        loop {
            let frame = timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for a message")
                .expect("socket closed")
                .expect("socket error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).expect("server message");
            }
        }
    }

    async fn next_of_kind(&mut self, kind: &str) -> ServerMessage {
        loop {
            let message = self.next().await;
            if message.kind() == kind {
                return message;
            }
        }
    }
}

async fn upload(addr: SocketAddr, sender: &str, receivers: &str, bytes: Option<Vec<u8>>) -> (u16, Value) {
    let mut form = Form::new()
        .text("senderId", sender.to_string())
        .text("receiverIds", receivers.to_string());
    if let Some(bytes) = bytes {
        let part = Part::bytes(bytes)
            .file_name("photo.png")
            .mime_str("image/png")
            .expect("mime");
        form = form.part("file", part);
    }
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/upload"))
        .multipart(form)
        .send()
        .await
        .expect("upload request");
    let status = response.status().as_u16();
    (status, response.json().await.expect("json body"))
}

#[tokio::test]
async fn upload_is_chunked_to_receiver_and_acks_reach_sender() {
    let addr = start_relay().await;
    let mut laptop = Client::register(addr, "laptop", "idle").await;
    let mut tv = Client::register(addr, "tv", "receive").await;

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let (status, body) = upload(addr, "laptop", r#"["tv","tv"]"#, Some(payload.clone())).await;
    assert_eq!(status, 200);
    assert_eq!(body["fileName"], "photo.png");
    assert_eq!(body["size"], 10_000);
    assert_eq!(body["status"], "uploaded");
    let transfer_id = body["transferId"].as_str().expect("transfer id").to_string();

    match tv.next_of_kind("transfer_receive_start").await {
        ServerMessage::TransferReceiveStart {
            transfer_id: id,
            mime_type,
            size,
            sender,
            sender_id,
            ..
        } => {
            assert_eq!(id, transfer_id);
            assert_eq!(mime_type, "image/png");
            assert_eq!(size, 10_000);
            assert_eq!(sender, "laptop device");
            assert_eq!(sender_id, "laptop");
        }
        other => panic!("unexpected {other:?}"),
    }

    let mut received = Vec::new();
    let mut progress = Vec::new();
    loop {
        match tv.next().await {
            ServerMessage::TransferReceiveChunk {
                chunk,
                progress: percent,
                chunk_size,
                ..
            } => {
                let bytes = STANDARD.decode(chunk).expect("base64 chunk");
                assert_eq!(bytes.len(), chunk_size);
                received.extend_from_slice(&bytes);
                progress.push(percent);
                tv.send(serde_json::json!({
                    "type": "chunk_ack",
                    "transferId": transfer_id,
                    "chunkSize": chunk_size,
                }))
                .await;
            }
            ServerMessage::TransferReceiveComplete { file_name, .. } => {
                assert_eq!(file_name, "photo.png");
                break;
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(received, payload);
    assert_eq!(progress, vec![41, 82, 100]);

    let mut acked = Vec::new();
    let mut completed = false;
    while acked.len() < 3 || !completed {
        match laptop.next().await {
            ServerMessage::TransferDeliveryProgress {
                receiver_progress,
                aggregate_progress,
                ..
            } => {
                assert_eq!(receiver_progress, aggregate_progress);
                acked.push(receiver_progress);
            }
            ServerMessage::TransferReceiverStatus { status, .. } => {
                assert_eq!(status, ReceiverStatus::Completed);
            }
            ServerMessage::TransferComplete { status, .. } => {
                assert_eq!(status, TransferStatus::Completed);
                completed = true;
            }
            _ => {}
        }
    }
    assert_eq!(acked, vec![41, 82, 100]);

    let summary: Value = reqwest::get(format!("http://{addr}/api/transfers/{transfer_id}"))
        .await
        .expect("summary request")
        .json()
        .await
        .expect("summary json");
    assert_eq!(summary["status"], "completed");
    assert_eq!(summary["receivers"][0]["receiverId"], "tv");
    assert_eq!(summary["receivers"][0]["ackBytes"], 10_000);
    assert_eq!(summary["receivers"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn rejected_uploads_report_reason() {
    let addr = start_relay().await;
    let _laptop = Client::register(addr, "laptop", "idle").await;

    let (status, body) = upload(addr, "laptop", "tv", None).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Missing file payload.");

    let (status, body) = upload(addr, "phone", "tv", Some(vec![1, 2, 3])).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Sender is not connected over WebSocket.");

    let (status, body) = upload(addr, "laptop", " , ", Some(vec![1, 2, 3])).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "At least one receiver must be selected.");

    let stats: Value = reqwest::get(format!("http://{addr}/api/stats"))
        .await
        .expect("stats request")
        .json()
        .await
        .expect("stats json");
    assert_eq!(stats["uploadsRejected"], 3);
    assert_eq!(stats["transfersCreated"], 0);
}

#[tokio::test]
async fn unknown_receiver_is_reported_offline() {
    let addr = start_relay().await;
    let mut laptop = Client::register(addr, "laptop", "idle").await;

    let (status, _) = upload(addr, "laptop", "ghost", Some(vec![9; 100])).await;
    assert_eq!(status, 200);

    assert!(matches!(
        laptop.next_of_kind("transfer_registered").await,
        ServerMessage::TransferRegistered { .. }
    ));
    match laptop.next_of_kind("transfer_receiver_status").await {
        ServerMessage::TransferReceiverStatus {
            receiver_id, status, ..
        } => {
            assert_eq!(receiver_id, "ghost");
            assert_eq!(status, ReceiverStatus::Offline);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        laptop.next_of_kind("transfer_complete").await,
        ServerMessage::TransferComplete {
            status: TransferStatus::Completed,
            ..
        }
    ));
}

#[tokio::test]
async fn presence_follows_mode_changes_and_disconnects() {
    let addr = start_relay().await;
    let mut watcher = Client::register(addr, "watcher", "idle").await;
    let mut tablet = Client::register(addr, "tablet", "receive").await;

    match watcher.next_of_kind("devices_update").await {
        ServerMessage::DevicesUpdate { receivers } => {
            assert_eq!(receivers.len(), 1);
            assert_eq!(receivers[0].id, "tablet");
            assert_eq!(receivers[0].name, "tablet device");
        }
        other => panic!("unexpected {other:?}"),
    }

    tablet
        .send(serde_json::json!({ "type": "update_name", "name": "Kitchen Tablet" }))
        .await;
    match watcher.next_of_kind("devices_update").await {
        ServerMessage::DevicesUpdate { receivers } => {
            assert_eq!(receivers[0].name, "Kitchen Tablet");
        }
        other => panic!("unexpected {other:?}"),
    }

    tablet
        .send(serde_json::json!({ "type": "set_mode", "mode": DeviceMode::Idle }))
        .await;
    match watcher.next_of_kind("devices_update").await {
        ServerMessage::DevicesUpdate { receivers } => assert!(receivers.is_empty()),
        other => panic!("unexpected {other:?}"),
    }

    tablet
        .send(serde_json::json!({ "type": "set_mode", "mode": "receive" }))
        .await;
    watcher.next_of_kind("devices_update").await;
    tablet.ws.close(None).await.expect("close");

    match watcher.next_of_kind("devices_update").await {
        ServerMessage::DevicesUpdate { receivers } => assert!(receivers.is_empty()),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn reregistering_an_identity_closes_the_old_socket() {
    let addr = start_relay().await;
    let mut first = Client::register(addr, "phone", "receive").await;
    let _second = Client::register(addr, "phone", "receive").await;

    let closed = timeout(WAIT, async {
        loop {
            match first.ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "old socket was not closed");
}

#[tokio::test]
async fn helper_routes_respond() {
    let addr = start_relay().await;

    let health: Value = reqwest::get(format!("http://{addr}/api/health"))
        .await
        .expect("health request")
        .json()
        .await
        .expect("health json");
    assert_eq!(health["status"], "ok");
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));

    let me: Value = reqwest::get(format!("http://{addr}/api/me"))
        .await
        .expect("me request")
        .json()
        .await
        .expect("me json");
    assert_eq!(me["ip"], "127.0.0.1");

    let missing = reqwest::get(format!("http://{addr}/api/transfers/nope"))
        .await
        .expect("summary request");
    assert_eq!(missing.status().as_u16(), 404);
}
