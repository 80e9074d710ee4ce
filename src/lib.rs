// Phone Sensor Bridge
// Streams phone sensor readings to dashboards: validation, filtering,
// motion classification, persistence and fan-out broadcast.

pub mod api;
pub mod connections;
pub mod data_logger;
pub mod error;
pub mod latency;
pub mod processor;
pub mod protocol;
pub mod reconnect;
pub mod sanitize;
pub mod state;
pub mod ws;

// Re-export public types for embedding and tests
pub use connections::{ConnectionInfo, ConnectionManager};
pub use data_logger::{LogEntry, PersistentLogger};
pub use error::{BridgeError, BridgeResult};
pub use latency::LatencyTracker;
pub use processor::{ProcessorStats, SensorHistory, SignalProcessor};
pub use protocol::{
    CameraFrame, ControlMessage, DashboardEvent, Inbound, Motion, MotionKind, ProcessedRecord,
    SensorSample, ServerStats, Vec3,
};
pub use reconnect::{ConnectDecision, LinkState, ReconnectController};
pub use state::AppState;
