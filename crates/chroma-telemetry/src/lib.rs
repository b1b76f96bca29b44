//! Telemetry layer for the chroma pipeline.
//!
//! This crate provides:
//!
//! - **Value records**: [`MetricsFrame`] and [`LatencyFrame`], the immutable
//!   per-block snapshots with sanitation, state classification, and the JSON
//!   wire format
//! - **Fan-out bus**: [`FanOutBus`], the single-producer multi-consumer
//!   bridge between the audio thread and WebSocket / logger / controller
//!   consumers, with bounded per-consumer lag and a drop-oldest policy
//!
//! ## Quick Start
//!
//! ```rust
//! use chroma_telemetry::{FanOutBus, MetricsFrame};
//! use std::time::Duration;
//!
//! let (mut sender, bus) = FanOutBus::<MetricsFrame>::spawn(64, None);
//! let subscriber = bus.subscribe();
//!
//! // Audio thread side: wait-free.
//! sender.publish(MetricsFrame::idle(0.0, 1));
//!
//! // Consumer side: blocking with timeout.
//! let frame = subscriber.recv_timeout(Duration::from_secs(1));
//! assert_eq!(frame.map(|f| f.frame_id), Some(1));
//! bus.shutdown();
//! ```

mod bus;
mod frame;

pub use bus::{
    BusStats, DEFAULT_RING_CAPACITY, FanOutBus, FrameSender, HeartbeatFn, IDLE_HEARTBEAT,
    SUBSCRIBER_QUEUE_DEPTH, Subscriber,
};
pub use frame::{ConsciousnessState, LatencyFrame, MetricsFrame, classify_state};
