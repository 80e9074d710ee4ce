//! Synthetic phone client: streams mock sensor readings to the bridge and
//! exercises the reconnect/backoff path against a flaky server.

use std::f64::consts::PI;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use serde_json::{json, Value};
use tokio::time::{interval, sleep, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use sensor_bridge_rs::{ConnectDecision, ReconnectController};

#[derive(Parser, Debug)]
#[command(name = "phone_sim")]
#[command(about = "Synthetic phone sensor client", long_about = None)]
struct Args {
    /// Bridge producer endpoint
    #[arg(long, default_value = "ws://127.0.0.1:3000/ws")]
    url: String,

    /// Sensor sample rate in Hz
    #[arg(long, default_value = "10.0")]
    rate: f64,

    /// Duration in seconds (0 = continuous)
    #[arg(long, default_value = "0")]
    duration: u64,
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("phone sim: {} at {} Hz", args.url, args.rate);

    let started = Instant::now();
    let mut controller = ReconnectController::new();

    loop {
        if expired(started, args.duration) {
            break;
        }

        match controller.begin_attempt() {
            ConnectDecision::BreakerOpen { remaining } => {
                warn!(
                    "circuit breaker open, refusing to connect for {:.1}s",
                    remaining.as_secs_f64()
                );
                sleep(remaining.min(Duration::from_secs(5))).await;
                continue;
            }
            ConnectDecision::Proceed => {}
        }

        info!("connecting (attempt {})", controller.attempts());
        match connect_async(&args.url).await {
            Ok((stream, _)) => {
                controller.on_open();
                info!("connected");
                if let Err(e) = stream_sensors(stream, &args, started).await {
                    warn!("stream ended: {e}");
                }
                controller.on_disconnect();
            }
            Err(e) => {
                warn!("connect failed: {e}");
                controller.on_disconnect();
            }
        }

        if expired(started, args.duration) {
            break;
        }
        let delay = controller.next_delay();
        info!("reconnecting in {:.1}s", delay.as_secs_f64());
        sleep(delay).await;
    }

    info!("phone sim done");
    Ok(())
}

fn expired(started: Instant, duration: u64) -> bool {
    duration > 0 && started.elapsed().as_secs() >= duration
}

async fn stream_sensors(mut stream: WsStream, args: &Args, started: Instant) -> Result<()> {
    let period = Duration::from_secs_f64(1.0 / args.rate.max(0.1));
    let mut sample_tick = interval(period);
    let mut ping_tick = interval(Duration::from_secs(15));
    ping_tick.tick().await; // skip the immediate first tick

    let mut sample_count = 0u64;

    loop {
        if expired(started, args.duration) {
            let _ = stream.close(None).await;
            return Ok(());
        }

        tokio::select! {
            _ = sample_tick.tick() => {
                let t = started.elapsed().as_secs_f64();
                let sample = mock_sample(t);
                stream.send(Message::Text(sample.to_string())).await?;
                sample_count += 1;
                if sample_count % 100 == 0 {
                    info!("[sim] {} samples sent", sample_count);
                }
            }
            _ = ping_tick.tick() => {
                let ping = json!({
                    "type": "ping",
                    "timestamp": Utc::now().timestamp_millis() as f64,
                });
                stream.send(Message::Text(ping.to_string())).await?;
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(latency) = handle_server_message(&text) {
                            let report = json!({"type": "latency", "latency": latency});
                            stream.send(Message::Text(report.to_string())).await?;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        anyhow::bail!("server closed the connection");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }
}

/// Returns a measured round-trip latency in ms when the message is a pong.
fn handle_server_message(text: &str) -> Option<f64> {
    let value: Value = serde_json::from_str(text).ok()?;
    match value.get("type").and_then(Value::as_str) {
        Some("welcome") => {
            info!(
                "server welcome: connection {} (max message {} bytes)",
                value.get("connectionId").and_then(Value::as_u64).unwrap_or(0),
                value.get("maxMessageSize").and_then(Value::as_u64).unwrap_or(0),
            );
            None
        }
        Some("pong") => {
            let sent = value.get("timestamp").and_then(Value::as_f64)?;
            let latency = Utc::now().timestamp_millis() as f64 - sent;
            info!("latency: {latency:.0} ms");
            Some(latency.max(0.0))
        }
        _ => None,
    }
}

/// Smooth synthetic waveforms: gravity on z plus small oscillations, a slow
/// GPS drift, and a draining battery.
fn mock_sample(t: f64) -> Value {
    json!({
        "accelerometer": {
            "x": (t * 2.0 * PI).sin() * 0.5,
            "y": (t * 2.0 * PI).cos() * 0.3,
            "z": 9.81 + (t * PI).sin() * 0.1,
        },
        "gyroscope": {
            "x": (t * 0.5).sin() * 0.05,
            "y": (t * 0.3).cos() * 0.03,
            "z": (t * 1.0).sin() * 0.1,
        },
        "gps": {
            "latitude": 37.7749 + t * 0.00001,
            "longitude": -122.4194 + t * 0.00001,
            "accuracy": 5.0 + (t * 0.1).sin() * 2.0,
            "speed": 10.0 + (t * 0.5).sin() * 5.0,
        },
        "battery": {
            "level": (1.0 - t / 36000.0).max(0.05),
            "charging": false,
        },
        "timestamp": Utc::now().to_rfc3339(),
    })
}
