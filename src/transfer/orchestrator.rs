//! Chunked delivery of one transfer's payload to its receivers.
//!
//! Receivers are served one after another in list order. Each delivery runs
//! in its own task; failures travel back through the task's `JoinHandle` and
//! are reported to the sender as `transfer_error`.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::task::JoinHandle;

use super::{progress, ReceiverStatus, Transfer, TransferStatus, TransferStore};
use crate::metrics::{RelayEvent, RelayMetrics};
use crate::protocol::ServerMessage;
use crate::registry::{Connection, ConnectionRegistry};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("transfer {0} is no longer tracked")]
    TransferMissing(String),
    #[error("delivery task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub completed: Vec<String>,
    pub offline: Vec<String>,
}

enum ReceiverOutcome {
    Delivered(Connection),
    Offline,
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: ConnectionRegistry,
    store: TransferStore,
    metrics: Arc<RelayMetrics>,
    chunk_size: usize,
    chunk_pause: Duration,
}

impl Orchestrator {
    pub fn new(
        registry: ConnectionRegistry,
        store: TransferStore,
        metrics: Arc<RelayMetrics>,
        chunk_size: usize,
        chunk_pause: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            metrics,
            chunk_size: chunk_size.max(1),
            chunk_pause,
        }
    }

    /// Starts delivery in the background. The returned handle resolves once
    /// delivery finished and any failure has been reported.
    pub fn spawn(&self, transfer_id: String, sender_id: String) -> JoinHandle<()> {
        let worker = self.clone();
        let id = transfer_id.clone();
        let delivery = tokio::spawn(async move { worker.deliver(&id).await });

        let reporter = self.clone();
        tokio::spawn(async move {
            let outcome = match delivery.await {
                Ok(result) => result,
                Err(err) => Err(DeliveryError::Aborted(err.to_string())),
            };
            match outcome {
                Ok(report) => info!(
                    "transfer {transfer_id} finished: {} completed, {} offline",
                    report.completed.len(),
                    report.offline.len()
                ),
                Err(err) => reporter.report_failure(&transfer_id, &sender_id, err).await,
            }
        })
    }

    pub async fn deliver(&self, transfer_id: &str) -> Result<DeliveryReport, DeliveryError> {
        let transfer = self
            .store
            .get(transfer_id)
            .await
            .ok_or_else(|| DeliveryError::TransferMissing(transfer_id.to_string()))?;

        let mut report = DeliveryReport::default();
        for receiver_id in &transfer.receivers {
            match self.deliver_to(&transfer, receiver_id).await {
                ReceiverOutcome::Delivered(connection) => {
                    self.set_status(&transfer, receiver_id, ReceiverStatus::Completed)
                        .await?;
                    connection.send(ServerMessage::TransferReceiveComplete {
                        transfer_id: transfer.id.clone(),
                        receiver_id: receiver_id.clone(),
                        file_name: transfer.file_name.clone(),
                    });
                    self.notify_receiver_status(&transfer, receiver_id, ReceiverStatus::Completed)
                        .await;
                    self.metrics.record(RelayEvent::ReceiverCompleted);
                    report.completed.push(receiver_id.clone());
                }
                ReceiverOutcome::Offline => {
                    debug!("receiver {receiver_id} offline for transfer {}", transfer.id);
                    self.set_status(&transfer, receiver_id, ReceiverStatus::Offline)
                        .await?;
                    self.notify_receiver_status(&transfer, receiver_id, ReceiverStatus::Offline)
                        .await;
                    self.metrics.record(RelayEvent::ReceiverOffline);
                    report.offline.push(receiver_id.clone());
                }
            }
        }

        if !self.store.mark_completed(&transfer.id).await {
            return Err(DeliveryError::TransferMissing(transfer.id.clone()));
        }
        self.notify_sender(
            &transfer.sender_id,
            ServerMessage::TransferComplete {
                transfer_id: transfer.id.clone(),
                status: TransferStatus::Completed,
            },
        )
        .await;
        Ok(report)
    }

    async fn deliver_to(&self, transfer: &Transfer, receiver_id: &str) -> ReceiverOutcome {
        let Some(connection) = self.registry.live_connection(receiver_id).await else {
            return ReceiverOutcome::Offline;
        };

        let started = connection.send(ServerMessage::TransferReceiveStart {
            transfer_id: transfer.id.clone(),
            file_name: transfer.file_name.clone(),
            mime_type: transfer.mime_type.clone(),
            size: transfer.size,
            sender: transfer.sender_name.clone(),
            sender_id: transfer.sender_id.clone(),
            receiver_id: receiver_id.to_string(),
        });
        if !started {
            return ReceiverOutcome::Offline;
        }

        let mut sent_bytes: u64 = 0;
        for chunk in transfer.payload.chunks(self.chunk_size) {
            sent_bytes += chunk.len() as u64;
            let delivered = connection.send(ServerMessage::TransferReceiveChunk {
                transfer_id: transfer.id.clone(),
                receiver_id: receiver_id.to_string(),
                chunk: STANDARD.encode(chunk),
                progress: progress::percent(sent_bytes as u128, transfer.size as u128),
                chunk_size: chunk.len(),
            });
            if !delivered {
                warn!(
                    "receiver {receiver_id} dropped mid-delivery of {} at {sent_bytes} bytes",
                    transfer.id
                );
                return ReceiverOutcome::Offline;
            }
            self.metrics.record(RelayEvent::ChunkSent { bytes: chunk.len() });
            self.pause().await;
        }

        ReceiverOutcome::Delivered(connection)
    }

    async fn pause(&self) {
        if self.chunk_pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.chunk_pause).await;
        }
    }

    async fn set_status(
        &self,
        transfer: &Transfer,
        receiver_id: &str,
        status: ReceiverStatus,
    ) -> Result<(), DeliveryError> {
        self.store
            .set_receiver_status(&transfer.id, receiver_id, status)
            .await
            .ok_or_else(|| DeliveryError::TransferMissing(transfer.id.clone()))
    }

    async fn notify_receiver_status(
        &self,
        transfer: &Transfer,
        receiver_id: &str,
        status: ReceiverStatus,
    ) {
        self.notify_sender(
            &transfer.sender_id,
            ServerMessage::TransferReceiverStatus {
                transfer_id: transfer.id.clone(),
                receiver_id: receiver_id.to_string(),
                status,
            },
        )
        .await;
    }

    /// Resolved on every call so a reconnected sender still hears about progress.
    async fn notify_sender(&self, sender_id: &str, message: ServerMessage) {
        if let Some(connection) = self.registry.live_connection(sender_id).await {
            connection.send(message);
        }
    }

    async fn report_failure(&self, transfer_id: &str, sender_id: &str, err: DeliveryError) {
        warn!("transfer {transfer_id} failed: {err}");
        self.metrics.record(RelayEvent::DeliveryFailed {
            error: err.to_string(),
        });
        self.notify_sender(
            sender_id,
            ServerMessage::TransferError {
                transfer_id: transfer_id.to_string(),
                message: err.to_string(),
            },
        )
        .await;
    }
}
