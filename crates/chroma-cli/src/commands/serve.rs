//! Run the audio pipeline and the telemetry server.

use chroma_config::{ServerConfig, get_factory_profile, validate_config};
use chroma_engine::{Pipeline, PipelineConfig, PresetUpdate};
use chroma_io::{BackendStreamConfig, CpalBackend, CpalLoopback, DuplexConfig, run_duplex};
use chroma_server::{ServerContext, spawn_jsonl_logger};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Args)]
pub struct ServeArgs {
    /// Configuration file (defaults to the user config path)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start from a factory profile instead of a config file
    #[arg(short, long)]
    profile: Option<String>,

    /// Override the telemetry bind address
    #[arg(long)]
    bind: Option<String>,

    /// Skip startup loopback calibration even if configured
    #[arg(long)]
    no_calibrate: bool,
}

fn load_config(args: &ServeArgs) -> anyhow::Result<ServerConfig> {
    if let Some(name) = &args.profile {
        return Ok(get_factory_profile(name)?);
    }
    let path = args
        .config
        .clone()
        .unwrap_or_else(chroma_config::paths::default_config_path);
    if path.exists() {
        Ok(ServerConfig::load(&path)?)
    } else {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        Ok(ServerConfig::default())
    }
}

pub fn run(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = load_config(&args)?;
    if let Some(bind) = &args.bind {
        config.bind_addr.clone_from(bind);
    }
    validate_config(&config)?;

    let (mut pipeline, handles) = Pipeline::new(PipelineConfig {
        sample_rate: config.sample_rate as f32,
        output_channels: config.output_channels,
        ..PipelineConfig::default()
    });

    // Seed the control slots from the configuration.
    handles.slots.apply_preset(&PresetUpdate {
        phi_source: Some(config.phi.source),
        phi_manual: Some((config.phi.manual_phase, config.phi.manual_depth)),
        internal_rate_hz: Some(config.phi.internal_rate_hz),
        downmix: Some(config.downmix.strategy),
        adaptive_enabled: Some(config.adaptive.enabled),
        adaptive_k: Some(config.adaptive.k),
        adaptive_gamma: Some(config.adaptive.gamma),
        adaptive_target: Some(config.adaptive.target),
        compensation_offset_ms: Some(config.latency.compensation_offset_ms),
    })?;
    handles.slots.set_adaptive_bias(config.adaptive.bias)?;

    let backend = CpalBackend::new();

    if config.latency.calibrate_on_start && !args.no_calibrate {
        let loopback_config = BackendStreamConfig {
            sample_rate: config.sample_rate,
            buffer_size: config.device_block_frames as u32,
            channels: 2,
            device_name: config.output_device.clone(),
        };
        let hw_ms =
            f64::from(config.device_block_frames as u32) / f64::from(config.sample_rate) * 1000.0;
        let mut loopback = CpalLoopback::new(&backend, loopback_config);
        match pipeline.start_calibrated(&mut loopback, hw_ms, hw_ms) {
            Ok(outcome) => println!(
                "Calibrated: {:.2} ms round trip (quality {:.2})",
                outcome.total_measured_ms, outcome.quality
            ),
            Err(cause) => {
                eprintln!("Calibration failed ({cause}); starting uncalibrated");
                pipeline.start()?;
            }
        }
    } else {
        pipeline.start()?;
    }

    // Optional JSONL session log.
    let logger = config
        .session_log
        .as_ref()
        .map(|path| spawn_jsonl_logger(path, handles.metrics.subscribe()))
        .transpose()?;

    // Wire the pipeline between the devices. The streams stay alive for as
    // long as this handle does.
    let duplex = run_duplex(
        &backend,
        &DuplexConfig {
            sample_rate: config.sample_rate,
            device_block_frames: config.device_block_frames,
            input_channels: 2,
            output_channels: config.output_channels as u16,
            input_device: config.input_device.clone(),
            output_device: config.output_device.clone(),
        },
        pipeline,
    )?;

    // Telemetry server on its own runtime.
    let metrics = Arc::new(handles.metrics);
    let latency = Arc::new(handles.latency);
    let ctx = ServerContext {
        slots: Arc::clone(&handles.slots),
        metrics: Arc::clone(&metrics),
        latency: Arc::clone(&latency),
    };
    let bind_addr = config.bind_addr.clone();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;
    let server = runtime.spawn(async move {
        match chroma_server::bind(&bind_addr).await {
            Ok(listener) => {
                if let Err(cause) = chroma_server::serve(listener, ctx).await {
                    tracing::error!(%cause, "telemetry server stopped");
                }
            }
            Err(cause) => tracing::error!(%cause, "telemetry bind failed"),
        }
    });

    println!("chroma serving on {} (Ctrl+C to stop)", config.bind_addr);

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        println!("\nStopping...");
        flag.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    // Teardown: stop the streams first, then the telemetry fabric.
    drop(duplex);
    server.abort();
    runtime.shutdown_timeout(Duration::from_secs(1));
    metrics.shutdown();
    latency.shutdown();
    if let Some(logger) = logger {
        let summary = logger.stop();
        println!(
            "Session log: {} frames written, {} dropped",
            summary.frames_written, summary.dropped_frames
        );
    }

    println!("Done!");
    Ok(())
}
