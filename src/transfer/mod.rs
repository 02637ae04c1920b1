pub mod orchestrator;
pub mod progress;

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

pub use orchestrator::{DeliveryError, DeliveryReport, Orchestrator};

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Uploaded,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverStatus {
    Pending,
    Offline,
    Completed,
}

impl ReceiverStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReceiverStatus::Pending)
    }
}

/// Everything the ingestion boundary hands over for a new transfer.
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub sender_id: String,
    pub sender_name: String,
    pub receivers: Vec<String>,
    pub file_name: String,
    pub mime_type: String,
    pub payload: Bytes,
}

#[derive(Debug, Clone)]
pub struct Transfer {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub receivers: Vec<String>,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    /// Shared read-only by every receiver's delivery loop.
    pub payload: Bytes,
    pub status: TransferStatus,
    pub receiver_status: HashMap<String, ReceiverStatus>,
    pub receiver_ack_bytes: HashMap<String, u64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<Instant>,
}

impl Transfer {
    pub fn new(request: NewTransfer) -> Self {
        let receiver_status = request
            .receivers
            .iter()
            .map(|id| (id.clone(), ReceiverStatus::Pending))
            .collect();
        let receiver_ack_bytes = request.receivers.iter().map(|id| (id.clone(), 0)).collect();
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: request.sender_id,
            sender_name: request.sender_name,
            receivers: request.receivers,
            file_name: request.file_name,
            mime_type: request.mime_type,
            size: request.payload.len() as u64,
            payload: request.payload,
            status: TransferStatus::Uploaded,
            receiver_status,
            receiver_ack_bytes,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn ack_bytes(&self, receiver_id: &str) -> u64 {
        self.receiver_ack_bytes.get(receiver_id).copied().unwrap_or(0)
    }

    pub fn receiver_progress(&self, receiver_id: &str) -> u8 {
        progress::receiver_progress(self.ack_bytes(receiver_id), self.size)
    }

    pub fn aggregate_progress(&self) -> u8 {
        progress::aggregate_progress(
            self.receivers.iter().map(|id| self.ack_bytes(id)),
            self.size,
            self.receivers.len(),
        )
    }

    pub fn to_summary(&self) -> TransferSummary {
        TransferSummary {
            transfer_id: self.id.clone(),
            file_name: self.file_name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.size,
            sender_id: self.sender_id.clone(),
            sender_name: self.sender_name.clone(),
            status: self.status,
            created_at: self.created_at,
            aggregate_progress: self.aggregate_progress(),
            receivers: self
                .receivers
                .iter()
                .map(|id| ReceiverSummary {
                    receiver_id: id.clone(),
                    status: self
                        .receiver_status
                        .get(id)
                        .copied()
                        .unwrap_or(ReceiverStatus::Pending),
                    ack_bytes: self.ack_bytes(id),
                    progress: self.receiver_progress(id),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub transfer_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub sender_id: String,
    pub sender_name: String,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
    pub aggregate_progress: u8,
    pub receivers: Vec<ReceiverSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverSummary {
    pub receiver_id: String,
    pub status: ReceiverStatus,
    pub ack_bytes: u64,
    pub progress: u8,
}

/// Result of accepting one `chunk_ack`, destined for the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryProgress {
    pub transfer_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub receiver_progress: u8,
    pub aggregate_progress: u8,
}

#[derive(Debug, Clone, Default)]
pub struct TransferStore {
    transfers: Arc<RwLock<HashMap<String, Transfer>>>,
}

impl TransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, request: NewTransfer) -> Transfer {
        let transfer = Transfer::new(request);
        let mut transfers = self.transfers.write().await;
        transfers.insert(transfer.id.clone(), transfer.clone());
        transfer
    }

    pub async fn get(&self, transfer_id: &str) -> Option<Transfer> {
        self.transfers.read().await.get(transfer_id).cloned()
    }

    pub async fn summary(&self, transfer_id: &str) -> Option<TransferSummary> {
        let transfers = self.transfers.read().await;
        transfers.get(transfer_id).map(Transfer::to_summary)
    }

    pub async fn update<F, T>(&self, transfer_id: &str, updater: F) -> Option<T>
    where
        F: FnOnce(&mut Transfer) -> T,
    {
        let mut transfers = self.transfers.write().await;
        let transfer = transfers.get_mut(transfer_id)?;
        Some(updater(transfer))
    }

    /// `None` if the transfer or the receiver is unknown.
    pub async fn set_receiver_status(
        &self,
        transfer_id: &str,
        receiver_id: &str,
        status: ReceiverStatus,
    ) -> Option<()> {
        self.update(transfer_id, |transfer| {
            let slot = transfer.receiver_status.get_mut(receiver_id)?;
            *slot = status;
            Some(())
        })
        .await
        .flatten()
    }

    pub async fn mark_completed(&self, transfer_id: &str) -> bool {
        self.update(transfer_id, |transfer| {
            transfer.status = TransferStatus::Completed;
            transfer.completed_at = Some(Instant::now());
        })
        .await
        .is_some()
    }

    /// Adds `bytes` to the receiver's acknowledged total, capped at the file
    /// size. Unknown transfers, non-members and zero-byte acks are ignored.
    pub async fn record_ack(
        &self,
        transfer_id: &str,
        receiver_id: &str,
        bytes: u64,
    ) -> Option<DeliveryProgress> {
        if bytes == 0 {
            return None;
        }
        self.update(transfer_id, |transfer| {
            let size = transfer.size;
            let acked = transfer.receiver_ack_bytes.get_mut(receiver_id)?;
            *acked = acked.saturating_add(bytes).min(size);
            Some(DeliveryProgress {
                transfer_id: transfer.id.clone(),
                sender_id: transfer.sender_id.clone(),
                receiver_id: receiver_id.to_string(),
                receiver_progress: transfer.receiver_progress(receiver_id),
                aggregate_progress: transfer.aggregate_progress(),
            })
        })
        .await
        .flatten()
    }

    /// Drops completed transfers older than `ttl`; in-flight ones are kept.
    pub async fn expire_completed(&self, now: Instant, ttl: Duration) -> Vec<String> {
        let mut transfers = self.transfers.write().await;
        let expired: Vec<String> = transfers
            .values()
            .filter(|transfer| {
                transfer
                    .completed_at
                    .is_some_and(|done| now.saturating_duration_since(done) >= ttl)
            })
            .map(|transfer| transfer.id.clone())
            .collect();
        for id in &expired {
            transfers.remove(id);
        }
        expired
    }

    pub async fn len(&self) -> usize {
        self.transfers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
