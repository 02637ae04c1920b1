use log::trace;
use serde::{Deserialize, Serialize};

use super::{ConnectionRegistry, DeviceStatus, RegistryInner};
use crate::protocol::ServerMessage;

/// One entry of the `devices_update.receivers` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverView {
    pub id: String,
    pub name: String,
    pub ip: String,
    pub status: DeviceStatus,
}

impl RegistryInner {
    fn receiver_views(&self) -> Vec<ReceiverView> {
        let mut receivers: Vec<_> = self
            .devices
            .values()
            .filter(|device| device.is_receiver())
            .collect();
        receivers.sort_by_key(|device| device.seq);
        receivers
            .into_iter()
            .map(|device| ReceiverView {
                id: device.id.clone(),
                name: device.name.clone(),
                ip: device.ip.clone(),
                status: device.status,
            })
            .collect()
    }
}

impl ConnectionRegistry {
    /// Devices currently willing to receive, in registration order.
    pub async fn available_receivers(&self) -> Vec<ReceiverView> {
        self.inner.read().await.receiver_views()
    }

    /// Pushes the receiver list to every registered device, senders included.
    /// Snapshot and queueing share one exclusive guard, so concurrent
    /// broadcasts reach every socket in the order they were taken.
    pub async fn broadcast(&self) {
        let guard = self.inner.write().await;
        let receivers = guard.receiver_views();
        trace!(
            "broadcasting {} receiver(s) to {} device(s)",
            receivers.len(),
            guard.devices.len()
        );
        for device in guard.devices.values() {
            device.connection.send(ServerMessage::DevicesUpdate {
                receivers: receivers.clone(),
            });
        }
    }
}
