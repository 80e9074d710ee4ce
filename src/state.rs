use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::Utc;

use crate::connections::ConnectionManager;
use crate::data_logger::PersistentLogger;
use crate::latency::LatencyTracker;
use crate::processor::SensorHistory;
use crate::protocol::{CameraFrame, LatencyStats, ProcessedRecord, ServerStats};

/// Process-scoped services, constructed at startup and injected into every
/// handler. Cheap to clone; all fields are shared handles.
#[derive(Clone)]
pub struct AppState {
    pub connections: Arc<ConnectionManager>,
    pub history: Arc<Mutex<SensorHistory>>,
    pub latency: Arc<Mutex<LatencyTracker>>,
    pub logger: Arc<Mutex<PersistentLogger>>,
    pub latest_record: Arc<RwLock<Option<ProcessedRecord>>>,
    pub latest_frame: Arc<RwLock<Option<CameraFrame>>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(log_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            connections: Arc::new(ConnectionManager::new()),
            history: Arc::new(Mutex::new(SensorHistory::new())),
            latency: Arc::new(Mutex::new(LatencyTracker::new())),
            logger: Arc::new(Mutex::new(PersistentLogger::new(log_dir))),
            latest_record: Arc::new(RwLock::new(None)),
            latest_frame: Arc::new(RwLock::new(None)),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn latency_stats(&self) -> LatencyStats {
        self.latency
            .lock()
            .map(|t| t.stats())
            .unwrap_or_default()
    }

    pub fn average_latency(&self) -> f64 {
        self.latency
            .lock()
            .map(|t| t.average_latency())
            .unwrap_or(0.0)
    }

    pub fn server_stats(&self) -> ServerStats {
        ServerStats {
            connected_clients: self.connections.dashboard_count(),
            producer_connection_count: self.connections.producer_count(),
            latency_stats: self.latency_stats(),
            uptime: self.uptime_seconds(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}
