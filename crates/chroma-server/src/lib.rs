//! WebSocket telemetry and control surface for the chroma pipeline.
//!
//! This crate provides:
//!
//! - **Telemetry fan-out**: every connected WebSocket client receives the
//!   metrics stream as JSON text frames (one object per frame); latency
//!   frames on request
//! - **Control surface**: JSON commands tagged by `cmd`, mapped onto the
//!   engine's atomic parameter slots
//! - **Session logger**: a JSONL disk subscriber
//!
//! The server never touches the audio thread: it consumes bus subscribers
//! and writes atomic slots, nothing else.

mod control;
mod logger;
mod ws;

pub use control::{ControlEffect, ControlMessage, apply};
pub use logger::{LoggerSummary, SessionLogger, spawn_jsonl_logger};
pub use ws::{ServerContext, bind, serve};

use thiserror::Error;

/// Errors surfaced by the telemetry server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Could not bind the listen address.
    #[error("failed to bind telemetry address: {0}")]
    Bind(#[source] std::io::Error),

    /// WebSocket protocol error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Socket I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
