//! Periodic maintenance: stale device eviction and completed transfer expiry.

use log::debug;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::metrics::RelayEvent;
use crate::service::RelayService;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub evicted_devices: Vec<String>,
    pub expired_transfers: Vec<String>,
}

impl RelayService {
    pub async fn run_maintenance_tick(&self, now: Instant) -> MaintenanceReport {
        let evicted_devices = self
            .registry()
            .sweep_stale(now, self.config().stale_timeout())
            .await;
        if !evicted_devices.is_empty() {
            self.metrics().record(RelayEvent::DevicesEvicted {
                count: evicted_devices.len(),
            });
        }

        let expired_transfers = self
            .store()
            .expire_completed(now, self.config().transfer_ttl())
            .await;
        if !expired_transfers.is_empty() {
            debug!("expired {} completed transfer(s)", expired_transfers.len());
            self.metrics().record(RelayEvent::TransfersExpired {
                count: expired_transfers.len(),
            });
        }

        MaintenanceReport {
            evicted_devices,
            expired_transfers,
        }
    }

    /// Runs a maintenance tick every `sweep_interval` until the task is aborted.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut interval = time::interval(service.config().sweep_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                service.run_maintenance_tick(Instant::now()).await;
            }
        })
    }
}
