//! Upload acceptance: validates a submission, registers the transfer and
//! schedules its delivery.

use bytes::Bytes;
use log::{info, warn};
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::metrics::RelayEvent;
use crate::protocol::ServerMessage;
use crate::service::RelayService;
use crate::transfer::{NewTransfer, TransferSummary, DEFAULT_MIME_TYPE};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IngestError {
    #[error("Missing file payload.")]
    MissingFile,
    #[error("Sender is not connected over WebSocket.")]
    SenderNotConnected,
    #[error("At least one receiver must be selected.")]
    NoReceivers,
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub sender_id: String,
    pub receiver_ids: Vec<String>,
    pub file: Option<UploadedFile>,
}

pub struct AcceptedTransfer {
    pub summary: TransferSummary,
    pub delivery: JoinHandle<()>,
}

/// Accepts a JSON array (`["a","b"]`) or a comma separated list (`a, b`).
/// Blank entries are dropped and duplicates keep their first position.
pub fn parse_receiver_ids(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }

    let candidates: Vec<String> = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(id) => Some(id),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            })
            .collect(),
        Ok(_) => Vec::new(),
        Err(_) => raw.split(',').map(|part| part.trim().to_string()).collect(),
    };

    let mut ids: Vec<String> = Vec::with_capacity(candidates.len());
    for id in candidates {
        if !id.is_empty() && !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

impl RelayService {
    pub async fn accept_upload(&self, request: UploadRequest) -> Result<AcceptedTransfer, IngestError> {
        let result = self.try_accept_upload(request).await;
        if let Err(err) = &result {
            warn!("upload rejected: {err}");
            self.metrics().record(RelayEvent::UploadRejected);
        }
        result
    }

    async fn try_accept_upload(&self, request: UploadRequest) -> Result<AcceptedTransfer, IngestError> {
        let file = request.file.ok_or(IngestError::MissingFile)?;

        let sender_id = request.sender_id.trim().to_string();
        if sender_id.is_empty() {
            return Err(IngestError::SenderNotConnected);
        }
        let sender = self
            .registry()
            .lookup_by_identity(&sender_id)
            .await
            .filter(|device| device.connection.is_open())
            .ok_or(IngestError::SenderNotConnected)?;

        if request.receiver_ids.is_empty() {
            return Err(IngestError::NoReceivers);
        }

        let transfer = self
            .store()
            .insert(NewTransfer {
                sender_id: sender.id.clone(),
                sender_name: sender.name.clone(),
                receivers: request.receiver_ids,
                file_name: file
                    .file_name
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| "file".to_string()),
                mime_type: file
                    .mime_type
                    .filter(|mime| !mime.is_empty())
                    .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
                payload: file.bytes,
            })
            .await;
        self.metrics().record(RelayEvent::TransferCreated);
        info!(
            "transfer {} registered: {} ({} bytes) from {} to {} receiver(s)",
            transfer.id,
            transfer.file_name,
            transfer.size,
            transfer.sender_id,
            transfer.receivers.len()
        );

        sender.connection.send(ServerMessage::TransferRegistered {
            transfer_id: transfer.id.clone(),
            file_name: transfer.file_name.clone(),
            size: transfer.size,
            receivers: transfer.receivers.clone(),
        });

        let delivery = self
            .orchestrator()
            .spawn(transfer.id.clone(), transfer.sender_id.clone());
        Ok(AcceptedTransfer {
            summary: transfer.to_summary(),
            delivery,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{drain, registration};
    use crate::registry::{Connection, DeviceMode, Outbound};
    use crate::transfer::{ReceiverStatus, TransferStatus};

    fn upload(sender: &str, receivers: &[&str], bytes: &[u8]) -> UploadRequest {
        UploadRequest {
            sender_id: sender.to_string(),
            receiver_ids: receivers.iter().map(|id| id.to_string()).collect(),
            file: Some(UploadedFile {
                file_name: Some("notes.txt".into()),
                mime_type: None,
                bytes: Bytes::copy_from_slice(bytes),
            }),
        }
    }

    #[test]
    fn receiver_ids_from_json_or_csv() {
        assert_eq!(parse_receiver_ids(r#"["a","b",""]"#), vec!["a", "b"]);
        assert_eq!(parse_receiver_ids("a, b,,c "), vec!["a", "b", "c"]);
        assert_eq!(parse_receiver_ids("a,a,b"), vec!["a", "b"]);
        assert_eq!(parse_receiver_ids(r#"{"a":1}"#), Vec::<String>::new());
        assert_eq!(parse_receiver_ids("   "), Vec::<String>::new());
    }

    #[tokio::test]
    async fn rejections_are_classified_in_order() {
        let service = RelayService::default();
        let (sender, _rx) = Connection::new();
        service
            .registry()
            .register(&sender, registration("sender", DeviceMode::Idle))
            .await;

        let missing_file = UploadRequest {
            file: None,
            ..upload("nobody", &[], b"")
        };
        assert_eq!(
            service.accept_upload(missing_file).await.err(),
            Some(IngestError::MissingFile)
        );
        assert_eq!(
            service.accept_upload(upload("nobody", &["a"], b"x")).await.err(),
            Some(IngestError::SenderNotConnected)
        );
        assert_eq!(
            service.accept_upload(upload("", &["a"], b"x")).await.err(),
            Some(IngestError::SenderNotConnected)
        );
        assert_eq!(
            service.accept_upload(upload("sender", &[], b"x")).await.err(),
            Some(IngestError::NoReceivers)
        );
        assert!(service.store().is_empty().await);
        assert_eq!(service.metrics().snapshot().uploads_rejected, 4);
    }

    #[tokio::test]
    async fn closed_sender_is_not_connected() {
        let service = RelayService::default();
        let (sender, rx) = Connection::new();
        service
            .registry()
            .register(&sender, registration("sender", DeviceMode::Idle))
            .await;
        drop(rx);
        assert_eq!(
            service.accept_upload(upload("sender", &["a"], b"x")).await.err(),
            Some(IngestError::SenderNotConnected)
        );
    }

    #[tokio::test]
    async fn accepted_upload_notifies_sender_before_delivery() {
        let service = RelayService::new(crate::config::ServerConfig {
            chunk_pause_ms: 0,
            ..Default::default()
        });
        let (sender, mut sender_rx) = Connection::new();
        let (receiver, _receiver_rx) = Connection::new();
        service
            .registry()
            .register(&sender, registration("sender", DeviceMode::Idle))
            .await;
        service
            .registry()
            .register(&receiver, registration("phone", DeviceMode::Receive))
            .await;
        drain(&mut sender_rx);

        let accepted = service
            .accept_upload(upload("sender", &["phone"], b"hello"))
            .await
            .expect("accepted");
        assert_eq!(accepted.summary.status, TransferStatus::Uploaded);
        assert_eq!(accepted.summary.mime_type, DEFAULT_MIME_TYPE);
        assert_eq!(accepted.summary.sender_name, "sender-name");
        accepted.delivery.await.expect("delivery");

        let kinds: Vec<_> = drain(&mut sender_rx)
            .into_iter()
            .filter_map(|item| match item {
                Outbound::Message(message) => Some(message.kind()),
                Outbound::Close => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["transfer_registered", "transfer_receiver_status", "transfer_complete"]
        );

        let stored = service
            .store()
            .get(&accepted.summary.transfer_id)
            .await
            .expect("stored");
        assert_eq!(stored.receiver_status["phone"], ReceiverStatus::Completed);
    }

    #[tokio::test]
    async fn sender_name_is_snapshotted() {
        let service = RelayService::default();
        let (sender, _rx) = Connection::new();
        service
            .registry()
            .register(&sender, registration("sender", DeviceMode::Idle))
            .await;
        let accepted = service
            .accept_upload(upload("sender", &["ghost"], b"abc"))
            .await
            .expect("accepted");
        service
            .registry()
            .update_name(sender.id(), Some("Renamed".into()))
            .await;
        let stored = service
            .store()
            .get(&accepted.summary.transfer_id)
            .await
            .expect("stored");
        assert_eq!(stored.sender_name, "sender-name");
    }
}
