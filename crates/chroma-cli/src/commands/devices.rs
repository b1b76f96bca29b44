//! Audio device listing command.

use chroma_io::{AudioBackend, CpalBackend};
use clap::Args;

#[derive(Args)]
pub struct DevicesArgs {
    /// Only show devices with input channels
    #[arg(long)]
    input: bool,

    /// Only show devices with output channels
    #[arg(long)]
    output: bool,
}

pub fn run(args: DevicesArgs) -> anyhow::Result<()> {
    let backend = CpalBackend::new();
    let devices = backend.list_devices()?;

    if devices.is_empty() {
        println!("No audio devices found");
        return Ok(());
    }

    println!("Audio devices ({}):", backend.name());
    for device in devices {
        if args.input && device.input_channels == 0 {
            continue;
        }
        if args.output && device.output_channels == 0 {
            continue;
        }
        println!(
            "  [{}] {} (in: {}, out: {}, {} Hz)",
            device.index,
            device.name,
            device.input_channels,
            device.output_channels,
            device.default_sample_rate
        );
    }
    Ok(())
}
