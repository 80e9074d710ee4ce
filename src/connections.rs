//! Connection bookkeeping for both producer (phone) and dashboard sides,
//! and the fan-out broadcast to dashboard subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::protocol::DashboardEvent;

/// Producer connection record, kept from OPEN to CLOSED.
#[derive(Clone, Debug)]
pub struct ProducerInfo {
    pub id: u64,
    pub remote_address: String,
    pub connected_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: u64,
    pub remote_address: String,
    pub connected_at: String,
}

/// Tracks producer and dashboard connections separately; producer ids are
/// monotonic and never reused, even after disconnect.
pub struct ConnectionManager {
    next_id: AtomicU64,
    producers: Mutex<HashMap<u64, ProducerInfo>>,
    next_subscriber_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, UnboundedSender<String>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            producers: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_connection_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register_producer(&self, id: u64, remote_address: String) {
        if let Ok(mut producers) = self.producers.lock() {
            producers.insert(
                id,
                ProducerInfo {
                    id,
                    remote_address,
                    connected_at: Utc::now(),
                },
            );
        }
    }

    pub fn unregister_producer(&self, id: u64) {
        if let Ok(mut producers) = self.producers.lock() {
            producers.remove(&id);
        }
    }

    pub fn producer_count(&self) -> usize {
        self.producers.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn producer_snapshot(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .producers
            .lock()
            .map(|producers| {
                producers
                    .values()
                    .map(|p| ConnectionInfo {
                        id: p.id,
                        remote_address: p.remote_address.clone(),
                        connected_at: p.connected_at.to_rfc3339(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Register a dashboard subscriber; returns its id and the receiving
    /// end of its outbound queue.
    pub fn subscribe_dashboard(&self) -> (u64, UnboundedReceiver<String>) {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.insert(id, tx);
        }
        (id, rx)
    }

    pub fn unsubscribe_dashboard(&self, id: u64) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.remove(&id);
        }
    }

    pub fn dashboard_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Fan one event out to every dashboard subscriber. The event is
    /// serialized once; a failed send (subscriber already gone) is logged
    /// and the subscriber dropped, but never aborts delivery to siblings.
    pub fn broadcast(&self, event: &DashboardEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize broadcast event: {e}");
                return;
            }
        };

        let mut dead = Vec::new();
        if let Ok(subscribers) = self.subscribers.lock() {
            for (id, tx) in subscribers.iter() {
                if tx.send(json.clone()).is_err() {
                    warn!("dropping dashboard subscriber {id}: send failed");
                    dead.push(*id);
                }
            }
        }
        if !dead.is_empty() {
            if let Ok(mut subscribers) = self.subscribers.lock() {
                for id in dead {
                    subscribers.remove(&id);
                }
            }
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{LatencyStats, ServerStats};

    fn stats_event() -> DashboardEvent {
        DashboardEvent::ServerStats(ServerStats {
            connected_clients: 0,
            producer_connection_count: 0,
            latency_stats: LatencyStats::default(),
            uptime: 0,
            timestamp: Utc::now().to_rfc3339(),
        })
    }

    #[test]
    fn connection_ids_are_monotonic_and_never_reused() {
        let manager = ConnectionManager::new();

        let first = manager.next_connection_id();
        let second = manager.next_connection_id();
        assert_eq!(first, 1);
        assert_eq!(second, 2);

        manager.register_producer(first, "10.0.0.1:1234".to_string());
        manager.register_producer(second, "10.0.0.2:1234".to_string());
        manager.unregister_producer(first);
        manager.unregister_producer(second);

        // A producer connecting after both disconnected still gets a fresh id.
        assert_eq!(manager.next_connection_id(), 3);
    }

    #[test]
    fn producer_snapshot_reflects_registrations() {
        let manager = ConnectionManager::new();
        let id = manager.next_connection_id();
        manager.register_producer(id, "192.168.1.5:40000".to_string());

        assert_eq!(manager.producer_count(), 1);
        let snapshot = manager.producer_snapshot();
        assert_eq!(snapshot[0].id, id);
        assert_eq!(snapshot[0].remote_address, "192.168.1.5:40000");

        manager.unregister_producer(id);
        assert_eq!(manager.producer_count(), 0);
    }

    #[test]
    fn broadcast_reaches_all_live_subscribers() {
        let manager = ConnectionManager::new();
        let (_id_a, mut rx_a) = manager.subscribe_dashboard();
        let (_id_b, mut rx_b) = manager.subscribe_dashboard();
        assert_eq!(manager.dashboard_count(), 2);

        manager.broadcast(&stats_event());

        assert!(rx_a.try_recv().unwrap().contains("serverStats"));
        assert!(rx_b.try_recv().unwrap().contains("serverStats"));
    }

    #[test]
    fn dead_subscriber_does_not_abort_siblings() {
        let manager = ConnectionManager::new();
        let (_dead_id, rx_dead) = manager.subscribe_dashboard();
        let (_live_id, mut rx_live) = manager.subscribe_dashboard();

        drop(rx_dead);
        manager.broadcast(&stats_event());

        assert!(rx_live.try_recv().is_ok());
        // Dead subscriber got pruned.
        assert_eq!(manager.dashboard_count(), 1);
    }
}
