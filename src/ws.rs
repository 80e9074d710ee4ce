//! WebSocket handlers: the producer (phone) message-dispatch loop and the
//! dashboard subscriber loop.
//!
//! The producer loop is the per-connection state machine: on upgrade the
//! connection is OPEN, gets a monotonic id and a welcome message, and every
//! inbound message resets a 5-minute idle timer. Malformed input is dropped
//! with a warning and the connection stays open; oversized messages close
//! it with code 1009.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use log::{info, warn};
use serde_json::Value;
use tokio::time::Instant;

use crate::error::BridgeError;
use crate::processor::SignalProcessor;
use crate::protocol::{
    CameraFrame, ControlMessage, DashboardEvent, Inbound, SensorSample, MAX_MESSAGE_BYTES,
    TRANSPORT_MAX_BYTES,
};
use crate::sanitize;
use crate::state::AppState;

/// Idle producer connections are closed after 5 minutes without a message.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Normal closure.
const CLOSE_NORMAL: u16 = 1000;
/// Message too big.
const CLOSE_TOO_LARGE: u16 = 1009;

enum Flow {
    Continue,
    Close,
}

pub async fn producer_ws(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.max_message_size(TRANSPORT_MAX_BYTES)
        .on_upgrade(move |socket| handle_producer(socket, addr, state))
}

async fn handle_producer(mut socket: WebSocket, addr: SocketAddr, state: AppState) {
    let conn_id = state.connections.next_connection_id();
    state
        .connections
        .register_producer(conn_id, addr.to_string());
    info!("phone connected from {addr} (id: {conn_id})");

    // One processor per producer connection: low-pass filter state never
    // mixes samples from unrelated phones.
    let mut processor = SignalProcessor::new(Arc::clone(&state.history));

    let welcome = ControlMessage::Welcome {
        message: "Connected to sensor server".to_string(),
        connection_id: conn_id,
        max_message_size: MAX_MESSAGE_BYTES,
        server_time: Utc::now().timestamp_millis(),
    };
    if send_control(&mut socket, &welcome).await.is_err() {
        state.connections.unregister_producer(conn_id);
        return;
    }

    let mut deadline = Instant::now() + IDLE_TIMEOUT;
    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(message)) => {
                        deadline = Instant::now() + IDLE_TIMEOUT;
                        match dispatch(&mut socket, message, conn_id, &mut processor, &state).await {
                            Flow::Continue => {}
                            Flow::Close => break,
                        }
                    }
                    Some(Err(e)) => {
                        warn!("websocket error (id: {conn_id}): {e}");
                        break;
                    }
                    None => break,
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                info!("connection timeout for id: {conn_id}");
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_NORMAL,
                        reason: "Timeout".into(),
                    })))
                    .await;
                break;
            }
        }
    }

    state.connections.unregister_producer(conn_id);
    info!("phone disconnected (id: {conn_id})");
}

async fn dispatch(
    socket: &mut WebSocket,
    message: Message,
    conn_id: u64,
    processor: &mut SignalProcessor,
    state: &AppState,
) -> Flow {
    match message {
        Message::Text(text) => handle_payload(socket, text.as_bytes(), conn_id, processor, state).await,
        Message::Binary(bytes) => handle_payload(socket, &bytes, conn_id, processor, state).await,
        Message::Close(_) => Flow::Close,
        // Protocol-level ping/pong is answered by the transport.
        Message::Ping(_) | Message::Pong(_) => Flow::Continue,
    }
}

async fn handle_payload(
    socket: &mut WebSocket,
    payload: &[u8],
    conn_id: u64,
    processor: &mut SignalProcessor,
    state: &AppState,
) -> Flow {
    let value = match sanitize::validate(payload) {
        Ok(value) => value,
        Err(BridgeError::MessageTooLarge(len)) => {
            warn!("message too large from id: {conn_id} ({len} bytes), closing connection");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_TOO_LARGE,
                    reason: "Message too large".into(),
                })))
                .await;
            return Flow::Close;
        }
        Err(e) => {
            warn!("rejected message from id: {conn_id}: {e}");
            return Flow::Continue;
        }
    };

    match Inbound::classify(value) {
        Inbound::Ping { timestamp } => {
            let pong = ControlMessage::Pong {
                timestamp,
                server_time: Utc::now().timestamp_millis(),
            };
            if send_control(socket, &pong).await.is_err() {
                return Flow::Close;
            }
            Flow::Continue
        }
        Inbound::CameraFrame(raw) => {
            handle_camera_frame(raw, conn_id, state);
            Flow::Continue
        }
        Inbound::Latency { latency } => {
            if let Ok(mut tracker) = state.latency.lock() {
                tracker.add_measurement(latency);
            }
            Flow::Continue
        }
        Inbound::Sensor(raw) => {
            handle_sensor(raw, conn_id, processor, state);
            Flow::Continue
        }
    }
}

/// Camera frames bypass the numeric pipeline entirely: cached as the latest
/// frame and broadcast opaque, never sanitized, logged or added to history.
fn handle_camera_frame(raw: Value, conn_id: u64, state: &AppState) {
    let frame: CameraFrame = match serde_json::from_value(raw) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("malformed camera frame from id: {conn_id}: {e}");
            return;
        }
    };
    if let Ok(mut latest) = state.latest_frame.write() {
        *latest = Some(frame.clone());
    }
    state.connections.broadcast(&DashboardEvent::CameraFrame(frame));
}

fn handle_sensor(raw: Value, conn_id: u64, processor: &mut SignalProcessor, state: &AppState) {
    let clean = sanitize::sanitize_value(raw);
    let mut sample: SensorSample = match serde_json::from_value(clean) {
        Ok(sample) => sample,
        Err(e) => {
            warn!("invalid sensor payload from id: {conn_id}: {e}");
            return;
        }
    };
    sanitize::scrub_gps(&mut sample);

    let mut record = processor.process(sample);
    record.server_latency = state.average_latency();
    record.connection_id = conn_id;

    if let Ok(mut latest) = state.latest_record.write() {
        *latest = Some(record.clone());
    }
    if let Ok(mut logger) = state.logger.lock() {
        logger.log(&record);
    }
    state
        .connections
        .broadcast(&DashboardEvent::SensorData(record));
}

async fn send_control(socket: &mut WebSocket, message: &ControlMessage) -> Result<(), ()> {
    let json = serde_json::to_string(message).map_err(|_| ())?;
    socket.send(Message::Text(json)).await.map_err(|_| ())
}

pub async fn dashboard_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_dashboard(socket, state))
}

async fn handle_dashboard(mut socket: WebSocket, state: AppState) {
    let (sub_id, mut queue) = state.connections.subscribe_dashboard();
    info!("web client connected (subscriber {sub_id})");

    // A fresh dashboard immediately gets the latest record and a stats
    // snapshot instead of waiting for the next broadcast.
    let latest = state.latest_record.read().ok().and_then(|r| r.clone());
    if let Some(record) = latest {
        send_event(&mut socket, &DashboardEvent::SensorData(record)).await;
    }
    send_event(&mut socket, &DashboardEvent::ServerStats(state.server_stats())).await;

    loop {
        tokio::select! {
            queued = queue.recv() => {
                match queued {
                    Some(json) => {
                        if socket.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_dashboard_message(&mut socket, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.connections.unsubscribe_dashboard(sub_id);
    info!("web client disconnected (subscriber {sub_id})");
}

/// Dashboards may measure latency with the same ping/pong exchange the
/// phone uses.
async fn handle_dashboard_message(socket: &mut WebSocket, text: &str) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return;
    };
    if value.get("type").and_then(Value::as_str) == Some("ping") {
        let pong = ControlMessage::Pong {
            timestamp: value.get("timestamp").and_then(Value::as_f64),
            server_time: Utc::now().timestamp_millis(),
        };
        let _ = send_control(socket, &pong).await;
    }
}

async fn send_event(socket: &mut WebSocket, event: &DashboardEvent) {
    if let Ok(json) = serde_json::to_string(event) {
        let _ = socket.send(Message::Text(json)).await;
    }
}
