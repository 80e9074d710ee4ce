//! Wire types shared by the phone producer, the server and the dashboard.
//!
//! Inbound messages are dispatched on their `type` field; anything without a
//! recognized `type` is treated as a raw sensor sample. All JSON field names
//! are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Producer message size cap, enforced per message.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024;

/// Transport-level accept cap, configured on the WebSocket upgrade.
pub const TRANSPORT_MAX_BYTES: usize = 32 * 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Filtered accelerometer vector with its Euclidean norm attached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilteredVec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub magnitude: f64,
}

/// Device-frame Euler-like angles as reported by the phone, in degrees.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeviceOrientation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute: Option<bool>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GpsFix {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charging: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charging_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discharging_time: Option<f64>,
}

/// One inbound phone reading. Every field is optional; unknown fields ride
/// along in `extra` and survive the round trip to the dashboard.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SensorSample {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerometer: Option<Vec3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gyroscope: Option<Vec3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnetometer: Option<Vec3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<DeviceOrientation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsFix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<BatteryInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionKind {
    Stationary,
    Walking,
    Running,
    Vigorous,
}

impl MotionKind {
    pub fn label(&self) -> &'static str {
        match self {
            MotionKind::Stationary => "stationary",
            MotionKind::Walking => "walking",
            MotionKind::Running => "running",
            MotionKind::Vigorous => "vigorous",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Motion {
    pub is_moving: bool,
    pub intensity: f64,
    #[serde(rename = "type")]
    pub kind: MotionKind,
}

/// Tilt estimate from accelerometer + gyroscope, degrees. Approximate: roll
/// and pitch come from gravity alone, yaw is the raw gyro z rate.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct OrientationEstimate {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// A sensor sample after filtering and classification, tagged with the
/// server timestamp, running average latency and originating connection.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerometer: Option<FilteredVec3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gyroscope: Option<Vec3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnetometer: Option<Vec3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<DeviceOrientation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsFix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<BatteryInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion: Option<Motion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculated_orientation: Option<OrientationEstimate>,
    pub timestamp: String,
    #[serde(default)]
    pub server_latency: f64,
    #[serde(default)]
    pub connection_id: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Opaque camera frame payload, broadcast without touching the numeric
/// pipeline. `data` is a base64 data-URI.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraFrame {
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facing_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl CameraFrame {
    /// Decode the JPEG bytes out of the base64 data-URI.
    pub fn jpeg_bytes(&self) -> Option<Vec<u8>> {
        use base64::Engine;
        let (_, payload) = self.data.split_once(',')?;
        base64::engine::general_purpose::STANDARD.decode(payload).ok()
    }
}

/// Inbound producer message, classified by its declared `type` field.
#[derive(Debug)]
pub enum Inbound {
    Ping { timestamp: Option<f64> },
    CameraFrame(Value),
    Latency { latency: f64 },
    Sensor(Value),
}

impl Inbound {
    /// Classify a parsed top-level object. Unrecognized or missing `type`
    /// falls through to the sensor path (legacy untyped payloads).
    pub fn classify(value: Value) -> Inbound {
        match value.get("type").and_then(Value::as_str) {
            Some("ping") => Inbound::Ping {
                timestamp: value.get("timestamp").and_then(Value::as_f64),
            },
            Some("cameraFrame") => Inbound::CameraFrame(value),
            Some("latency") => Inbound::Latency {
                latency: value.get("latency").and_then(Value::as_f64).unwrap_or(0.0),
            },
            _ => Inbound::Sensor(value),
        }
    }
}

/// Server → producer control messages.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ControlMessage {
    Welcome {
        message: String,
        connection_id: u64,
        max_message_size: usize,
        server_time: i64,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<f64>,
        server_time: i64,
    },
}

/// Server → dashboard broadcast events.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DashboardEvent {
    SensorData(ProcessedRecord),
    CameraFrame(CameraFrame),
    ServerStats(ServerStats),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    pub connected_clients: usize,
    pub producer_connection_count: usize,
    pub latency_stats: LatencyStats,
    pub uptime: u64,
    pub timestamp: String,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}
