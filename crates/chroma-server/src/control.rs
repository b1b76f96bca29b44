//! JSON control messages accepted over the telemetry socket.
//!
//! One JSON object per message, tagged by `cmd`. Every command maps onto an
//! atomic slot write (or a snapshot read); rejected parameters return an
//! error reply and leave the previous value in place.

use chroma_core::{DownmixStrategy, PhiSourceKind};
use chroma_engine::{ControlSlots, PresetUpdate};
use serde::Deserialize;
use serde_json::{Value, json};

/// Parsed control command.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Select the Φ source.
    SetPhiSource {
        /// Source kind (`manual|audio|sensor|internal`).
        source: PhiSourceKind,
    },
    /// Latch manual Φ values.
    SetPhiManual {
        /// Phase in radians.
        phase: f32,
        /// Depth, `[0, 1]`.
        depth: f32,
    },
    /// Set the internal oscillator rate.
    SetInternalRate {
        /// Rate in Hz.
        hz: f32,
    },
    /// Select the downmix strategy; unknown names fall back to linear.
    SetDownmixStrategy {
        /// Strategy name.
        strategy: String,
    },
    /// Update the adaptive controller; absent fields stay unchanged.
    SetAdaptive {
        /// Enable flag.
        #[serde(default)]
        enabled: Option<bool>,
        /// Depth gain.
        #[serde(default)]
        k: Option<f32>,
        /// Phase gain.
        #[serde(default)]
        gamma: Option<f32>,
        /// Criticality setpoint.
        #[serde(default)]
        target: Option<f32>,
        /// Feed-forward bias.
        #[serde(default)]
        bias: Option<f64>,
    },
    /// Set the compensation offset in ms.
    SetCompensationOffsetMs {
        /// Offset, `[0, 200]` ms.
        offset_ms: f32,
    },
    /// Nudge the compensation offset.
    AdjustCompensationMs {
        /// Delta, `[-50, 50]` ms.
        delta_ms: f32,
    },
    /// Feed an external sensor sample.
    SetSensorValue {
        /// Normalised sample, `[0, 1]`.
        value: f32,
    },
    /// Bulk parameter update.
    ApplyPreset {
        /// Fields to update; absent fields stay unchanged.
        #[serde(default)]
        phi_source: Option<PhiSourceKind>,
        /// Manual phase (paired with `phi_depth`).
        #[serde(default)]
        phi_phase: Option<f32>,
        /// Manual depth.
        #[serde(default)]
        phi_depth: Option<f32>,
        /// Downmix strategy name.
        #[serde(default)]
        downmix: Option<String>,
        /// Adaptive enable flag.
        #[serde(default)]
        adaptive_enabled: Option<bool>,
        /// Compensation offset in ms.
        #[serde(default)]
        compensation_offset_ms: Option<f32>,
    },
    /// Request the most recent metrics frame.
    GetLatestMetrics,
    /// Request the most recent latency frame.
    GetLatency,
    /// Also stream latency frames to this client.
    SubscribeLatency,
}

/// Side effects a command asks the connection handler to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEffect {
    /// Plain acknowledgement.
    None,
    /// Reply with the latest metrics frame.
    SendLatestMetrics,
    /// Reply with the latest latency frame.
    SendLatency,
    /// Start streaming latency frames to this client.
    StreamLatency,
}

/// Apply a control message to the slots.
///
/// Returns the effect for the connection handler, or the error reply
/// payload when the parameter was rejected.
pub fn apply(message: &ControlMessage, slots: &ControlSlots) -> Result<ControlEffect, Value> {
    let reject = |e: chroma_engine::EngineError| json!({ "ok": false, "error": e.to_string() });

    match message {
        ControlMessage::SetPhiSource { source } => {
            slots.set_phi_source(*source);
            Ok(ControlEffect::None)
        }
        ControlMessage::SetPhiManual { phase, depth } => slots
            .set_phi_manual(*phase, *depth)
            .map(|()| ControlEffect::None)
            .map_err(reject),
        ControlMessage::SetInternalRate { hz } => slots
            .set_internal_rate_hz(*hz)
            .map(|()| ControlEffect::None)
            .map_err(reject),
        ControlMessage::SetDownmixStrategy { strategy } => {
            slots.set_downmix_strategy(DownmixStrategy::parse_or_linear(strategy));
            Ok(ControlEffect::None)
        }
        ControlMessage::SetAdaptive {
            enabled,
            k,
            gamma,
            target,
            bias,
        } => {
            if let Some(k) = k {
                slots.set_adaptive_k(*k).map_err(reject)?;
            }
            if let Some(gamma) = gamma {
                slots.set_adaptive_gamma(*gamma).map_err(reject)?;
            }
            if let Some(target) = target {
                slots.set_adaptive_target(*target).map_err(reject)?;
            }
            if let Some(bias) = bias {
                slots.set_adaptive_bias(*bias).map_err(reject)?;
            }
            if let Some(enabled) = enabled {
                slots.set_adaptive_enabled(*enabled);
            }
            Ok(ControlEffect::None)
        }
        ControlMessage::SetCompensationOffsetMs { offset_ms } => slots
            .set_compensation_offset_ms(*offset_ms)
            .map(|()| ControlEffect::None)
            .map_err(reject),
        ControlMessage::AdjustCompensationMs { delta_ms } => slots
            .adjust_compensation_ms(*delta_ms)
            .map(|()| ControlEffect::None)
            .map_err(reject),
        ControlMessage::SetSensorValue { value } => {
            slots.set_sensor_value(*value);
            Ok(ControlEffect::None)
        }
        ControlMessage::ApplyPreset {
            phi_source,
            phi_phase,
            phi_depth,
            downmix,
            adaptive_enabled,
            compensation_offset_ms,
        } => {
            let preset = PresetUpdate {
                phi_source: *phi_source,
                phi_manual: match (phi_phase, phi_depth) {
                    (Some(phase), Some(depth)) => Some((*phase, *depth)),
                    _ => None,
                },
                downmix: downmix
                    .as_deref()
                    .map(DownmixStrategy::parse_or_linear),
                adaptive_enabled: *adaptive_enabled,
                compensation_offset_ms: *compensation_offset_ms,
                ..PresetUpdate::default()
            };
            slots.apply_preset(&preset).map_err(reject)?;
            Ok(ControlEffect::None)
        }
        ControlMessage::GetLatestMetrics => Ok(ControlEffect::SendLatestMetrics),
        ControlMessage::GetLatency => Ok(ControlEffect::SendLatency),
        ControlMessage::SubscribeLatency => Ok(ControlEffect::StreamLatency),
    }
}
