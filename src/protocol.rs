//! JSON messages exchanged over the `/ws` connection.
//!
//! Outbound messages are a tagged serde enum. Inbound messages are parsed by
//! hand from a `serde_json::Value` so that loosely typed client fields can be
//! coerced instead of failing the whole message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::{DeviceMode, ReceiverView};
use crate::transfer::{ReceiverStatus, TransferStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        ip: String,
    },
    DeviceRegistered {
        id: String,
        ip: String,
    },
    DevicesUpdate {
        receivers: Vec<ReceiverView>,
    },
    #[serde(rename_all = "camelCase")]
    TransferRegistered {
        transfer_id: String,
        file_name: String,
        size: u64,
        receivers: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    TransferReceiveStart {
        transfer_id: String,
        file_name: String,
        mime_type: String,
        size: u64,
        sender: String,
        sender_id: String,
        receiver_id: String,
    },
    #[serde(rename_all = "camelCase")]
    TransferReceiveChunk {
        transfer_id: String,
        receiver_id: String,
        /// Base64 (standard alphabet, padded) of the chunk bytes.
        chunk: String,
        progress: u8,
        chunk_size: usize,
    },
    #[serde(rename_all = "camelCase")]
    TransferReceiveComplete {
        transfer_id: String,
        receiver_id: String,
        file_name: String,
    },
    #[serde(rename_all = "camelCase")]
    TransferDeliveryProgress {
        transfer_id: String,
        receiver_id: String,
        receiver_progress: u8,
        aggregate_progress: u8,
    },
    #[serde(rename_all = "camelCase")]
    TransferReceiverStatus {
        transfer_id: String,
        receiver_id: String,
        status: ReceiverStatus,
    },
    #[serde(rename_all = "camelCase")]
    TransferComplete {
        transfer_id: String,
        status: TransferStatus,
    },
    #[serde(rename_all = "camelCase")]
    TransferError {
        transfer_id: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "welcome",
            ServerMessage::DeviceRegistered { .. } => "device_registered",
            ServerMessage::DevicesUpdate { .. } => "devices_update",
            ServerMessage::TransferRegistered { .. } => "transfer_registered",
            ServerMessage::TransferReceiveStart { .. } => "transfer_receive_start",
            ServerMessage::TransferReceiveChunk { .. } => "transfer_receive_chunk",
            ServerMessage::TransferReceiveComplete { .. } => "transfer_receive_complete",
            ServerMessage::TransferDeliveryProgress { .. } => "transfer_delivery_progress",
            ServerMessage::TransferReceiverStatus { .. } => "transfer_receiver_status",
            ServerMessage::TransferComplete { .. } => "transfer_complete",
            ServerMessage::TransferError { .. } => "transfer_error",
        }
    }
}

/// A recognised inbound message with its fields already coerced.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Register {
        id: Option<String>,
        name: Option<String>,
        mode: DeviceMode,
    },
    SetMode {
        mode: DeviceMode,
    },
    UpdateName {
        name: Option<String>,
    },
    RequestReceivers,
    Heartbeat,
    ChunkAck {
        transfer_id: String,
        /// Zero when the client sent a missing, negative or non-numeric size.
        chunk_size: u64,
    },
}

impl ClientMessage {
    /// Returns `None` for anything that is not a JSON object with a known `type`.
    pub fn parse(raw: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(raw).ok()?;
        let object = value.as_object()?;
        let kind = object.get("type")?.as_str()?;

        let message = match kind {
            "register" | "register_device" => ClientMessage::Register {
                id: coerce_string(object.get("id")),
                name: coerce_string(object.get("name")),
                mode: coerce_mode(object.get("mode")),
            },
            "set_mode" => ClientMessage::SetMode {
                mode: coerce_mode(object.get("mode")),
            },
            "update_name" => ClientMessage::UpdateName {
                name: coerce_string(object.get("name")),
            },
            "request_receivers" => ClientMessage::RequestReceivers,
            "heartbeat" => ClientMessage::Heartbeat,
            "chunk_ack" | "transfer_chunk_ack" => ClientMessage::ChunkAck {
                transfer_id: coerce_string(object.get("transferId")).unwrap_or_default(),
                chunk_size: coerce_byte_count(object.get("chunkSize")),
            },
            _ => return None,
        };
        Some(message)
    }
}

/// Mirrors the loose truthiness the browser client relies on: empty strings,
/// `null`, `false` and `0` count as absent.
fn coerce_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) if number.as_f64() != Some(0.0) => Some(number.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

fn coerce_mode(value: Option<&Value>) -> DeviceMode {
    match value.and_then(Value::as_str) {
        Some("receive") => DeviceMode::Receive,
        _ => DeviceMode::Idle,
    }
}

fn coerce_byte_count(value: Option<&Value>) -> u64 {
    let parsed = match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(bytes) if bytes.is_finite() && bytes > 0.0 => bytes as u64,
        _ => 0,
    }
}
