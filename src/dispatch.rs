//! Routes inbound WebSocket text frames to the registry and transfer store.
//!
//! Every branch that cannot act (unparseable input, unregistered connection,
//! unknown transfer, non-member ack) returns quietly.

use log::trace;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::{Connection, Registration};
use crate::service::RelayService;

impl RelayService {
    pub async fn dispatch(&self, connection: &Connection, ip: &str, raw: &str) {
        let Some(message) = ClientMessage::parse(raw) else {
            trace!("dropping unparseable message on {}", connection.id());
            return;
        };

        if let ClientMessage::Register { id, name, mode } = message {
            let device = self
                .registry()
                .install(
                    connection,
                    Registration {
                        id,
                        name,
                        mode: Some(mode),
                        ip: ip.to_string(),
                    },
                )
                .await;
            connection.send(ServerMessage::DeviceRegistered {
                id: device.id,
                ip: device.ip,
            });
            // the new device learns its id before it sees itself in the list
            self.registry().broadcast().await;
            return;
        }

        let Some(device) = self.registry().lookup_by_connection(connection.id()).await else {
            trace!("ignoring message from unregistered connection {}", connection.id());
            return;
        };
        self.registry().touch(connection.id()).await;

        match message {
            ClientMessage::Register { .. } => {}
            ClientMessage::SetMode { mode } => {
                self.registry().update_mode(connection.id(), mode).await;
            }
            ClientMessage::UpdateName { name } => {
                self.registry().update_name(connection.id(), name).await;
            }
            ClientMessage::RequestReceivers => {
                let receivers = self.registry().available_receivers().await;
                connection.send(ServerMessage::DevicesUpdate { receivers });
            }
            ClientMessage::Heartbeat => {}
            ClientMessage::ChunkAck {
                transfer_id,
                chunk_size,
            } => {
                let Some(progress) = self
                    .store()
                    .record_ack(&transfer_id, &device.id, chunk_size)
                    .await
                else {
                    return;
                };
                if let Some(sender) = self.registry().live_connection(&progress.sender_id).await {
                    sender.send(ServerMessage::TransferDeliveryProgress {
                        transfer_id: progress.transfer_id,
                        receiver_id: progress.receiver_id,
                        receiver_progress: progress.receiver_progress,
                        aggregate_progress: progress.aggregate_progress,
                    });
                }
            }
        }
    }
}
