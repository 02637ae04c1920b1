use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};

use crate::net::client_ip;
use crate::protocol::ServerMessage;
use crate::registry::{Connection, Outbound};
use crate::service::RelayService;

pub(super) async fn upgrade(
    ws: WebSocketUpgrade,
    State(service): State<RelayService>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let ip = client_ip(&headers, peer, service.config().advertise_ip);
    ws.on_upgrade(move |socket| async move {
        handle_socket(socket, service, ip).await;
    })
}

async fn handle_socket(socket: WebSocket, service: RelayService, ip: String) {
    let (mut sender, mut receiver) = socket.split();
    let (connection, mut rx) = Connection::new();
    debug!("connection {} opened from {ip}", connection.id());

    if send_message(&mut sender, &ServerMessage::Welcome { ip: ip.clone() })
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            biased;
            Some(outbound) = rx.recv() => {
                match outbound {
                    Outbound::Message(message) => {
                        if send_message(&mut sender, &message).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            maybe_msg = receiver.next() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        service.dispatch(&connection, &ip, &text).await;
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Ping(payload))) => {
                        if sender.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Err(err)) => {
                        warn!("connection {} errored: {err}", connection.id());
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // drop the receiving half first so the handle reports closed to senders
    drop(rx);
    service.registry().remove(connection.id()).await;
    debug!("connection {} closed", connection.id());
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).unwrap_or_default();
    sender.send(Message::Text(text)).await
}
