use std::sync::RwLock;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    TransferCreated,
    UploadRejected,
    ChunkSent { bytes: usize },
    ReceiverCompleted,
    ReceiverOffline,
    DeliveryFailed { error: String },
    DevicesEvicted { count: usize },
    TransfersExpired { count: usize },
}

#[derive(Debug, Default)]
pub struct RelayMetrics {
    inner: RwLock<RelayCounters>,
}

#[derive(Debug, Default, Clone)]
struct RelayCounters {
    transfers_created: u64,
    uploads_rejected: u64,
    chunks_sent: u64,
    bytes_delivered: u64,
    receivers_completed: u64,
    receivers_offline: u64,
    delivery_failures: u64,
    devices_evicted: u64,
    transfers_expired: u64,
    last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelayMetricsSnapshot {
    pub transfers_created: u64,
    pub uploads_rejected: u64,
    pub chunks_sent: u64,
    pub bytes_delivered: u64,
    pub receivers_completed: u64,
    pub receivers_offline: u64,
    pub delivery_failures: u64,
    pub devices_evicted: u64,
    pub transfers_expired: u64,
    pub completion_rate: Option<f32>,
    pub last_error: Option<String>,
}

impl RelayMetrics {
    pub fn record(&self, event: RelayEvent) {
        if let Ok(mut guard) = self.inner.write() {
            match event {
                RelayEvent::TransferCreated => {
                    guard.transfers_created = guard.transfers_created.saturating_add(1);
                }
                RelayEvent::UploadRejected => {
                    guard.uploads_rejected = guard.uploads_rejected.saturating_add(1);
                }
                RelayEvent::ChunkSent { bytes } => {
                    guard.chunks_sent = guard.chunks_sent.saturating_add(1);
                    guard.bytes_delivered = guard.bytes_delivered.saturating_add(bytes as u64);
                }
                RelayEvent::ReceiverCompleted => {
                    guard.receivers_completed = guard.receivers_completed.saturating_add(1);
                }
                RelayEvent::ReceiverOffline => {
                    guard.receivers_offline = guard.receivers_offline.saturating_add(1);
                }
                RelayEvent::DeliveryFailed { error } => {
                    guard.delivery_failures = guard.delivery_failures.saturating_add(1);
                    guard.last_error = Some(error);
                }
                RelayEvent::DevicesEvicted { count } => {
                    guard.devices_evicted = guard.devices_evicted.saturating_add(count as u64);
                }
                RelayEvent::TransfersExpired { count } => {
                    guard.transfers_expired = guard.transfers_expired.saturating_add(count as u64);
                }
            }
        }
    }

    pub fn snapshot(&self) -> RelayMetricsSnapshot {
        let stats = self
            .inner
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default();
        let attempted = stats.receivers_completed + stats.receivers_offline;
        RelayMetricsSnapshot {
            transfers_created: stats.transfers_created,
            uploads_rejected: stats.uploads_rejected,
            chunks_sent: stats.chunks_sent,
            bytes_delivered: stats.bytes_delivered,
            receivers_completed: stats.receivers_completed,
            receivers_offline: stats.receivers_offline,
            delivery_failures: stats.delivery_failures,
            devices_evicted: stats.devices_evicted,
            transfers_expired: stats.transfers_expired,
            completion_rate: if attempted > 0 {
                Some(stats.receivers_completed as f32 / attempted as f32)
            } else {
                None
            },
            last_error: stats.last_error,
        }
    }
}
