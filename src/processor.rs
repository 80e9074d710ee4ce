//! Signal processing stage: low-pass filtering, motion classification and
//! tilt orientation, plus the bounded history ring backing `/api/stats`.
//!
//! Filter state is per-producer-connection (each connection gets its own
//! `SignalProcessor` so the low-pass `previous` value never mixes samples
//! from unrelated phones); the history ring is process-wide and shared
//! between all processors.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::protocol::{
    FilteredVec3, Motion, MotionKind, OrientationEstimate, ProcessedRecord, SensorSample, Vec3,
};

/// Low-pass smoothing factor, weight of the new sample.
const ALPHA: f64 = 0.8;

/// Standard gravity, m/s².
const GRAVITY: f64 = 9.81;

const MAX_HISTORY: usize = 1000;
const RECENT_WINDOW: usize = 100;

pub fn classify_motion(magnitude: f64) -> MotionKind {
    if magnitude < 0.5 {
        MotionKind::Stationary
    } else if magnitude < 2.0 {
        MotionKind::Walking
    } else if magnitude < 5.0 {
        MotionKind::Running
    } else {
        MotionKind::Vigorous
    }
}

#[derive(Clone, Debug)]
pub struct HistoryEntry {
    /// Milliseconds since the Unix epoch at ingestion.
    pub timestamp: i64,
    pub data: ProcessedRecord,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorStats {
    pub total_readings: usize,
    pub recent_readings: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_acceleration: Option<Vec3>,
    pub motion_classification: BTreeMap<String, u64>,
    pub data_rate: f64,
}

/// Fixed-capacity FIFO of processed records, used only for derived
/// statistics, never for replay.
#[derive(Debug, Default)]
pub struct SensorHistory {
    entries: VecDeque<HistoryEntry>,
}

impl SensorHistory {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(MAX_HISTORY),
        }
    }

    pub fn push(&mut self, data: ProcessedRecord) {
        self.entries.push_back(HistoryEntry {
            timestamp: Utc::now().timestamp_millis(),
            data,
        });
        while self.entries.len() > MAX_HISTORY {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Aggregate statistics over the most recent 100 entries.
    pub fn stats(&self) -> ProcessorStats {
        let recent: Vec<&HistoryEntry> = self
            .entries
            .iter()
            .rev()
            .take(RECENT_WINDOW)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        let mut motion_classification = BTreeMap::new();
        for entry in &recent {
            let label = entry
                .data
                .motion
                .as_ref()
                .map(|m| m.kind.label())
                .unwrap_or("unknown");
            *motion_classification.entry(label.to_string()).or_insert(0) += 1;
        }

        let accel_values: Vec<&FilteredVec3> = recent
            .iter()
            .filter_map(|e| e.data.accelerometer.as_ref())
            .collect();
        let average_acceleration = if accel_values.is_empty() {
            None
        } else {
            let n = accel_values.len() as f64;
            Some(Vec3 {
                x: accel_values.iter().map(|a| a.x).sum::<f64>() / n,
                y: accel_values.iter().map(|a| a.y).sum::<f64>() / n,
                z: accel_values.iter().map(|a| a.z).sum::<f64>() / n,
            })
        };

        ProcessorStats {
            total_readings: self.entries.len(),
            recent_readings: recent.len(),
            average_acceleration,
            motion_classification,
            data_rate: data_rate(&recent),
        }
    }
}

/// Readings per second over the recent window, 0 with fewer than 2 entries
/// or a zero time span.
fn data_rate(recent: &[&HistoryEntry]) -> f64 {
    if recent.len() < 2 {
        return 0.0;
    }
    let first = recent[0].timestamp;
    let last = recent[recent.len() - 1].timestamp;
    let span_secs = (last - first) as f64 / 1000.0;
    if span_secs <= 0.0 {
        return 0.0;
    }
    let rate = recent.len() as f64 / span_secs;
    (rate * 100.0).round() / 100.0
}

/// Stateful per-connection transform from raw samples to processed records.
pub struct SignalProcessor {
    accel_filter: Option<Vec3>,
    gyro_filter: Option<Vec3>,
    history: Arc<Mutex<SensorHistory>>,
}

impl SignalProcessor {
    pub fn new(history: Arc<Mutex<SensorHistory>>) -> Self {
        Self {
            accel_filter: None,
            gyro_filter: None,
            history,
        }
    }

    /// Processor with a private history ring, for tests and offline use.
    pub fn detached() -> Self {
        Self::new(Arc::new(Mutex::new(SensorHistory::new())))
    }

    pub fn history(&self) -> Arc<Mutex<SensorHistory>> {
        Arc::clone(&self.history)
    }

    /// Filter, classify and augment one sample. Also appends the result to
    /// the shared history ring.
    pub fn process(&mut self, sample: SensorSample) -> ProcessedRecord {
        let mut accelerometer = None;
        let mut motion = None;

        if let Some(raw) = sample.accelerometer {
            let filtered = self.low_pass(raw, Filter::Accel);
            let magnitude = filtered.magnitude();
            accelerometer = Some(FilteredVec3 {
                x: filtered.x,
                y: filtered.y,
                z: filtered.z,
                magnitude,
            });
            // Classification runs on the gravity-compensated intensity so a
            // phone at rest (magnitude ≈ 9.81) reads as stationary.
            let intensity = (magnitude - GRAVITY).abs();
            motion = Some(Motion {
                is_moving: intensity > 1.2,
                intensity,
                kind: classify_motion(intensity),
            });
        }

        let gyroscope = sample
            .gyroscope
            .map(|raw| self.low_pass(raw, Filter::Gyro));

        let calculated_orientation = match (&accelerometer, &gyroscope) {
            (Some(accel), Some(gyro)) => Some(tilt_orientation(accel, gyro)),
            _ => None,
        };

        let record = ProcessedRecord {
            accelerometer,
            gyroscope,
            magnetometer: sample.magnetometer,
            orientation: sample.orientation,
            gps: sample.gps,
            battery: sample.battery,
            network: sample.network,
            device: sample.device,
            camera: sample.camera,
            motion,
            calculated_orientation,
            timestamp: Utc::now().to_rfc3339(),
            server_latency: 0.0,
            connection_id: 0,
            extra: sample.extra,
        };

        match self.history.lock() {
            Ok(mut history) => history.push(record.clone()),
            Err(_) => warn!("history lock poisoned, dropping history entry"),
        }

        record
    }

    /// `filtered = previous + α·(raw − previous)` per axis; the first sample
    /// for a sensor kind seeds the filter with the raw value.
    fn low_pass(&mut self, raw: Vec3, which: Filter) -> Vec3 {
        let slot = match which {
            Filter::Accel => &mut self.accel_filter,
            Filter::Gyro => &mut self.gyro_filter,
        };
        let prev = slot.unwrap_or(raw);
        let filtered = Vec3 {
            x: prev.x + ALPHA * (raw.x - prev.x),
            y: prev.y + ALPHA * (raw.y - prev.y),
            z: prev.z + ALPHA * (raw.z - prev.z),
        };
        *slot = Some(filtered);
        filtered
    }
}

enum Filter {
    Accel,
    Gyro,
}

/// Tilt estimate from gravity: roll/pitch in degrees, yaw is the raw gyro z
/// rate (not integrated).
fn tilt_orientation(accel: &FilteredVec3, gyro: &Vec3) -> OrientationEstimate {
    let roll = accel.y.atan2(accel.z).to_degrees();
    let pitch = (-accel.x)
        .atan2((accel.y * accel.y + accel.z * accel.z).sqrt())
        .to_degrees();
    OrientationEstimate {
        roll,
        pitch,
        yaw: gyro.z,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn accel_sample(x: f64, y: f64, z: f64) -> SensorSample {
        SensorSample {
            accelerometer: Some(Vec3 { x, y, z }),
            ..Default::default()
        }
    }

    #[test]
    fn first_sample_seeds_filter_with_raw_value() {
        let mut proc = SignalProcessor::detached();
        let record = proc.process(accel_sample(1.0, 2.0, 3.0));
        let accel = record.accelerometer.unwrap();
        assert_relative_eq!(accel.x, 1.0);
        assert_relative_eq!(accel.y, 2.0);
        assert_relative_eq!(accel.z, 3.0);
    }

    #[test]
    fn constant_input_is_a_fixed_point() {
        let mut proc = SignalProcessor::detached();
        let mut last = 0.0;
        for _ in 0..50 {
            let record = proc.process(accel_sample(0.0, 0.0, 9.81));
            last = record.accelerometer.unwrap().z;
        }
        assert_relative_eq!(last, 9.81, epsilon = 1e-9);
    }

    #[test]
    fn step_input_converges_toward_raw() {
        let mut proc = SignalProcessor::detached();
        proc.process(accel_sample(0.0, 0.0, 0.0));
        // One step of the recurrence from 0 toward 10 lands at α·10.
        let record = proc.process(accel_sample(0.0, 0.0, 10.0));
        assert_relative_eq!(record.accelerometer.unwrap().z, 8.0, epsilon = 1e-9);
        for _ in 0..100 {
            proc.process(accel_sample(0.0, 0.0, 10.0));
        }
        let record = proc.process(accel_sample(0.0, 0.0, 10.0));
        assert_relative_eq!(record.accelerometer.unwrap().z, 10.0, epsilon = 1e-6);
    }

    #[test]
    fn stationary_phone_scenario() {
        let mut proc = SignalProcessor::detached();
        let record = proc.process(accel_sample(0.0, 0.0, 9.81));
        let accel = record.accelerometer.unwrap();
        let motion = record.motion.unwrap();
        assert_relative_eq!(accel.magnitude, 9.81, epsilon = 1e-9);
        assert_relative_eq!(motion.intensity, 0.0, epsilon = 1e-9);
        assert_eq!(motion.kind, MotionKind::Stationary);
        assert!(!motion.is_moving);
    }

    #[test]
    fn motion_classification_boundaries_are_closed() {
        assert_eq!(classify_motion(0.0), MotionKind::Stationary);
        assert_eq!(classify_motion(0.49), MotionKind::Stationary);
        assert_eq!(classify_motion(0.5), MotionKind::Walking);
        assert_eq!(classify_motion(1.99), MotionKind::Walking);
        assert_eq!(classify_motion(2.0), MotionKind::Running);
        assert_eq!(classify_motion(4.99), MotionKind::Running);
        assert_eq!(classify_motion(5.0), MotionKind::Vigorous);
        assert_eq!(classify_motion(100.0), MotionKind::Vigorous);
    }

    #[test]
    fn orientation_only_with_both_sensors() {
        let mut proc = SignalProcessor::detached();
        let record = proc.process(accel_sample(0.0, 0.0, 9.81));
        assert!(record.calculated_orientation.is_none());

        let sample = SensorSample {
            accelerometer: Some(Vec3 { x: 0.0, y: 0.0, z: 9.81 }),
            gyroscope: Some(Vec3 { x: 0.0, y: 0.0, z: 1.5 }),
            ..Default::default()
        };
        let record = proc.process(sample);
        let orientation = record.calculated_orientation.unwrap();
        assert_relative_eq!(orientation.roll, 0.0);
        assert_relative_eq!(orientation.pitch, 0.0);
        assert_relative_eq!(orientation.yaw, 1.5);
    }

    #[test]
    fn tilt_orientation_flat_face_up() {
        let accel = FilteredVec3 { x: 0.0, y: 9.81, z: 0.0, magnitude: 9.81 };
        let gyro = Vec3 { x: 0.0, y: 0.0, z: 0.0 };
        let est = tilt_orientation(&accel, &gyro);
        assert_relative_eq!(est.roll, 90.0, epsilon = 1e-9);
    }

    #[test]
    fn history_never_exceeds_capacity_and_evicts_fifo() {
        let mut history = SensorHistory::new();
        for i in 0..(MAX_HISTORY + 10) {
            let mut record = ProcessedRecord::default();
            record.connection_id = i as u64;
            history.push(record);
        }
        assert_eq!(history.len(), MAX_HISTORY);
        // Oldest 10 evicted.
        assert_eq!(history.entries.front().unwrap().data.connection_id, 10);
        assert_eq!(
            history.entries.back().unwrap().data.connection_id,
            (MAX_HISTORY + 9) as u64
        );
    }

    #[test]
    fn stats_over_recent_window() {
        let mut proc = SignalProcessor::detached();
        for _ in 0..150 {
            proc.process(accel_sample(0.0, 0.0, 9.81));
        }
        let history = proc.history();
        let stats = history.lock().unwrap().stats();
        assert_eq!(stats.total_readings, 150);
        assert_eq!(stats.recent_readings, 100);
        let avg = stats.average_acceleration.unwrap();
        assert_relative_eq!(avg.z, 9.81, epsilon = 1e-6);
        assert_eq!(stats.motion_classification["stationary"], 100);
    }

    #[test]
    fn stats_on_empty_history() {
        let history = SensorHistory::new();
        let stats = history.stats();
        assert_eq!(stats.total_readings, 0);
        assert_eq!(stats.recent_readings, 0);
        assert!(stats.average_acceleration.is_none());
        assert_eq!(stats.data_rate, 0.0);
    }

    #[test]
    fn missing_motion_counts_as_unknown() {
        let mut history = SensorHistory::new();
        history.push(ProcessedRecord::default());
        let stats = history.stats();
        assert_eq!(stats.motion_classification["unknown"], 1);
    }
}
