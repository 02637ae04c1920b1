//! Live device registry keyed by identity, with a side index from the
//! connection handle back to that identity.

mod presence;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use crate::protocol::ServerMessage;

pub use presence::ReceiverView;

pub const DEFAULT_DEVICE_NAME: &str = "Unnamed Device";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    Idle,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Available,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Commands drained by the socket task that owns the other end.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Close,
}

/// Cloneable handle to one live WebSocket connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
    closing: Arc<AtomicBool>,
}

impl Connection {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Self {
            id: ConnectionId::new(),
            tx,
            closing: Arc::new(AtomicBool::new(false)),
        };
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.closing.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Queues a message; returns `false` when the connection is already gone.
    pub fn send(&self, message: ServerMessage) -> bool {
        if !self.is_open() {
            return false;
        }
        self.tx.send(Outbound::Message(message)).is_ok()
    }

    pub fn close(&self) {
        if !self.closing.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Outbound::Close);
        }
    }
}

#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub mode: DeviceMode,
    pub status: DeviceStatus,
    pub ip: String,
    pub connection: Connection,
    pub last_seen_at: Instant,
    seq: u64,
}

impl Device {
    pub fn is_receiver(&self) -> bool {
        self.mode == DeviceMode::Receive
            && self.status == DeviceStatus::Available
            && self.connection.is_open()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub id: Option<String>,
    pub name: Option<String>,
    pub mode: Option<DeviceMode>,
    pub ip: String,
}

#[derive(Debug, Default)]
struct RegistryInner {
    devices: HashMap<String, Device>,
    by_connection: HashMap<ConnectionId, String>,
    next_seq: u64,
}

impl RegistryInner {
    fn device_for(&mut self, connection: ConnectionId) -> Option<&mut Device> {
        let id = self.by_connection.get(&connection)?;
        self.devices.get_mut(id)
    }

    fn remove_identity(&mut self, id: &str) -> Option<Device> {
        let device = self.devices.remove(id)?;
        if self.by_connection.get(&device.connection.id()).map(String::as_str) == Some(id) {
            self.by_connection.remove(&device.connection.id());
        }
        Some(device)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the device and broadcasts the new receiver list.
    pub async fn register(&self, connection: &Connection, registration: Registration) -> Device {
        let device = self.install(connection, registration).await;
        self.broadcast().await;
        device
    }

    /// Installs (or replaces) the device for `registration.id` without
    /// broadcasting. A different live connection already holding that
    /// identity is closed first.
    pub async fn install(&self, connection: &Connection, registration: Registration) -> Device {
        let id = registration
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let name = registration
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string());

        let device = {
            let mut guard = self.inner.write().await;

            let mut seq = None;
            if let Some(existing) = guard.devices.get(&id) {
                seq = Some(existing.seq);
                if existing.connection.id() != connection.id() {
                    info!(
                        "device {id} re-registered on connection {}, closing {}",
                        connection.id(),
                        existing.connection.id()
                    );
                    existing.connection.close();
                }
            }
            guard.remove_identity(&id);

            // One record per connection: drop whatever this socket registered as before.
            if let Some(previous) = guard.by_connection.get(&connection.id()).cloned() {
                guard.remove_identity(&previous);
            }

            let seq = match seq {
                Some(seq) => seq,
                None => {
                    guard.next_seq += 1;
                    guard.next_seq
                }
            };
            let device = Device {
                id: id.clone(),
                name,
                mode: registration.mode.unwrap_or(DeviceMode::Idle),
                status: DeviceStatus::Available,
                ip: registration.ip,
                connection: connection.clone(),
                last_seen_at: Instant::now(),
                seq,
            };
            guard.devices.insert(id.clone(), device.clone());
            guard.by_connection.insert(connection.id(), id);
            device
        };

        debug!("registered device {} ({:?})", device.id, device.mode);
        device
    }

    pub async fn update_mode(&self, connection: ConnectionId, mode: DeviceMode) -> bool {
        let updated = {
            let mut guard = self.inner.write().await;
            match guard.device_for(connection) {
                Some(device) => {
                    device.mode = mode;
                    device.last_seen_at = Instant::now();
                    true
                }
                None => false,
            }
        };
        if updated {
            self.broadcast().await;
        }
        updated
    }

    /// A missing or empty name keeps the current one (still broadcasts).
    pub async fn update_name(&self, connection: ConnectionId, name: Option<String>) -> bool {
        let updated = {
            let mut guard = self.inner.write().await;
            match guard.device_for(connection) {
                Some(device) => {
                    if let Some(name) = name.filter(|name| !name.is_empty()) {
                        device.name = name;
                    }
                    device.last_seen_at = Instant::now();
                    true
                }
                None => false,
            }
        };
        if updated {
            self.broadcast().await;
        }
        updated
    }

    pub async fn touch(&self, connection: ConnectionId) -> bool {
        let mut guard = self.inner.write().await;
        match guard.device_for(connection) {
            Some(device) => {
                device.last_seen_at = Instant::now();
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, connection: ConnectionId) -> Option<Device> {
        let removed = {
            let mut guard = self.inner.write().await;
            let id = guard.by_connection.remove(&connection)?;
            guard.devices.remove(&id)
        };
        if let Some(device) = &removed {
            debug!("device {} left", device.id);
        }
        self.broadcast().await;
        removed
    }

    /// Drops devices idle for longer than `timeout` or whose socket is gone.
    /// Broadcasts once if anything was removed; returns the removed ids.
    pub async fn sweep_stale(&self, now: Instant, timeout: Duration) -> Vec<String> {
        let removed: Vec<String> = {
            let mut guard = self.inner.write().await;
            let stale: Vec<String> = guard
                .devices
                .values()
                .filter(|device| {
                    now.saturating_duration_since(device.last_seen_at) > timeout
                        || !device.connection.is_open()
                })
                .map(|device| device.id.clone())
                .collect();
            for id in &stale {
                guard.remove_identity(id);
            }
            stale
        };

        if !removed.is_empty() {
            info!("evicted {} stale device(s): {}", removed.len(), removed.join(", "));
            self.broadcast().await;
        }
        removed
    }

    pub async fn lookup_by_connection(&self, connection: ConnectionId) -> Option<Device> {
        let guard = self.inner.read().await;
        let id = guard.by_connection.get(&connection)?;
        guard.devices.get(id).cloned()
    }

    pub async fn lookup_by_identity(&self, id: &str) -> Option<Device> {
        self.inner.read().await.devices.get(id).cloned()
    }

    /// The identity's connection, only while it is still open.
    pub async fn live_connection(&self, id: &str) -> Option<Connection> {
        let guard = self.inner.read().await;
        guard
            .devices
            .get(id)
            .map(|device| device.connection.clone())
            .filter(Connection::is_open)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.devices.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[cfg(test)]
    pub(crate) async fn set_last_seen(&self, id: &str, at: Instant) {
        if let Some(device) = self.inner.write().await.devices.get_mut(id) {
            device.last_seen_at = at;
        }
    }
}
