//! WebSocket telemetry server.
//!
//! Each accepted client gets its own bus subscriber and two tasks: a
//! blocking bridge that drains the subscriber queue into a bounded channel,
//! and the connection task that writes frames to the socket and applies
//! inbound control messages. A failed send tears the client down; its
//! subscriber drops and the bus forgets it; no other consumer is affected.

use crate::control::{self, ControlEffect, ControlMessage};
use crate::ServerError;
use chroma_engine::ControlSlots;
use chroma_telemetry::{FanOutBus, LatencyFrame, MetricsFrame, Subscriber};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Shared handles the server needs from the pipeline owner.
#[derive(Clone)]
pub struct ServerContext {
    /// Parameter control slots.
    pub slots: Arc<ControlSlots>,
    /// Metrics fan-out bus.
    pub metrics: Arc<FanOutBus<MetricsFrame>>,
    /// Latency fan-out bus.
    pub latency: Arc<FanOutBus<LatencyFrame>>,
}

/// Bind the telemetry listener.
pub async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    let listener = TcpListener::bind(addr).await.map_err(ServerError::Bind)?;
    tracing::info!(addr, "telemetry server listening");
    Ok(listener)
}

/// Accept clients forever. Run inside its own task; aborting the task is
/// the shutdown path.
pub async fn serve(listener: TcpListener, ctx: ServerContext) -> Result<(), ServerError> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(cause) => {
                tracing::warn!(%cause, "accept failed");
                continue;
            }
        };
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tracing::debug!(%peer, "telemetry client connected");
            if let Err(cause) = handle_client(stream, ctx).await {
                tracing::debug!(%peer, %cause, "telemetry client closed");
            }
        });
    }
}

/// Bridge a bus subscriber into the client's outbound channel.
///
/// Runs on the blocking pool; exits when the client or the bus goes away.
fn pump_frames<T: Serialize + Send + 'static>(
    subscriber: Subscriber<T>,
    outbound: mpsc::Sender<Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        loop {
            match subscriber.recv_timeout(Duration::from_millis(500)) {
                Some(frame) => {
                    let Ok(text) = serde_json::to_string(&frame) else {
                        continue;
                    };
                    if outbound.blocking_send(Message::Text(text.into())).is_err() {
                        break;
                    }
                }
                None => {
                    if subscriber.is_closed() || outbound.is_closed() {
                        break;
                    }
                }
            }
        }
    })
}

async fn handle_client(stream: TcpStream, ctx: ServerContext) -> Result<(), ServerError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    // Bounded outbound channel: the per-client lag budget past the bus's
    // own two-frame queue.
    let (outbound, mut inbox) = mpsc::channel::<Message>(4);

    let _metrics_pump = pump_frames(ctx.metrics.subscribe(), outbound.clone());
    let mut latency_pump: Option<tokio::task::JoinHandle<()>> = None;

    loop {
        tokio::select! {
            queued = inbox.recv() => match queued {
                Some(message) => sink.send(message).await?,
                None => break,
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_control(
                        text.as_ref(),
                        &ctx,
                        &outbound,
                        &mut latency_pump,
                    );
                    sink.send(Message::Text(reply.to_string().into())).await?;
                }
                Some(Ok(Message::Ping(payload))) => {
                    sink.send(Message::Pong(payload)).await?;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(cause)) => return Err(cause.into()),
            },
        }
    }
    Ok(())
}

fn handle_control(
    text: &str,
    ctx: &ServerContext,
    outbound: &mpsc::Sender<Message>,
    latency_pump: &mut Option<tokio::task::JoinHandle<()>>,
) -> serde_json::Value {
    let message: ControlMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(cause) => return json!({ "ok": false, "error": cause.to_string() }),
    };

    match control::apply(&message, &ctx.slots) {
        Err(reply) => reply,
        Ok(ControlEffect::None) => json!({ "ok": true }),
        Ok(ControlEffect::SendLatestMetrics) => match ctx.metrics.latest() {
            Some(frame) => json!({ "ok": true, "metrics": frame }),
            None => json!({ "ok": true, "metrics": null }),
        },
        Ok(ControlEffect::SendLatency) => match ctx.latency.latest() {
            Some(frame) => json!({ "ok": true, "latency": frame }),
            None => json!({ "ok": true, "latency": null }),
        },
        Ok(ControlEffect::StreamLatency) => {
            if latency_pump.is_none() {
                *latency_pump = Some(pump_frames(ctx.latency.subscribe(), outbound.clone()));
            }
            json!({ "ok": true })
        }
    }
}
