//! One-shot loopback latency calibration command.

use chroma_engine::{Pipeline, PipelineConfig};
use chroma_io::{BackendStreamConfig, CpalBackend, CpalLoopback};
use clap::Args;

#[derive(Args)]
pub struct CalibrateArgs {
    /// Sample rate
    #[arg(long, default_value = "48000")]
    sample_rate: u32,

    /// Device buffer size in frames
    #[arg(long, default_value = "512")]
    buffer_size: u32,

    /// Input device (partial name match)
    #[arg(short, long)]
    input: Option<String>,

    /// Output device (partial name match)
    #[arg(short, long)]
    output: Option<String>,

    /// Print the full latency report after measuring
    #[arg(long)]
    report: bool,
}

pub fn run(args: CalibrateArgs) -> anyhow::Result<()> {
    let backend = CpalBackend::new();
    let stream_config = BackendStreamConfig {
        sample_rate: args.sample_rate,
        buffer_size: args.buffer_size,
        channels: 2,
        // The loopback runner opens input and output separately; a single
        // name filter covers the common "same interface" case.
        device_name: args.output.clone().or_else(|| args.input.clone()),
    };

    let (mut pipeline, handles) = Pipeline::new(PipelineConfig {
        sample_rate: args.sample_rate as f32,
        ..PipelineConfig::default()
    });

    println!("Playing a 100 ms 1 kHz burst through the loopback...");
    let mut loopback = CpalLoopback::new(&backend, stream_config);

    // cpal does not report nominal hardware latencies; estimate each side
    // as one device buffer.
    let hw_ms = f64::from(args.buffer_size) / f64::from(args.sample_rate) * 1000.0;
    match pipeline.calibrate_latency(&mut loopback, hw_ms, hw_ms) {
        Ok(outcome) => {
            println!("Calibration accepted:");
            println!("  round trip: {:.2} ms", outcome.total_measured_ms);
            println!("  quality:    {:.2}", outcome.quality);
            println!("  peak lag:   {} samples", outcome.lag_samples);
            if args.report {
                let frame = pipeline.latency_frame();
                println!("Breakdown:");
                println!("  hw input:     {:.2} ms", frame.hw_input_ms);
                println!("  hw output:    {:.2} ms", frame.hw_output_ms);
                println!("  engine:       {:.2} ms", frame.engine_ms);
                println!("  os residual:  {:.2} ms", frame.os_ms);
                println!("  compensation: {:.2} ms", frame.compensation_offset_ms);
                println!("  effective:    {:.2} ms", frame.effective_ms);
                println!("  aligned(5ms): {}", frame.aligned_5ms);
            }
        }
        Err(cause) => {
            eprintln!("Calibration failed: {cause}");
            eprintln!("Connect the output back to the input (physical or virtual loopback) and retry.");
        }
    }

    handles.shutdown();
    Ok(())
}
