//! Live metrics monitor: connects to a running server and prints frames.

use chroma_telemetry::MetricsFrame;
use clap::Args;
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;

#[derive(Args)]
pub struct MonitorArgs {
    /// Server WebSocket URL
    #[arg(short, long, default_value = "ws://127.0.0.1:9807")]
    url: String,

    /// Print raw JSON instead of the formatted view
    #[arg(long)]
    raw: bool,

    /// Stop after this many frames (0 = run until interrupted)
    #[arg(short, long, default_value = "0")]
    count: u64,
}

pub fn run(args: MonitorArgs) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(monitor(args))
}

async fn monitor(args: MonitorArgs) -> anyhow::Result<()> {
    let (ws, _) = tokio_tungstenite::connect_async(&args.url).await?;
    println!("Connected to {}", args.url);
    let (_, mut source) = ws.split();

    let mut seen = 0u64;
    while let Some(message) = source.next().await {
        let Message::Text(text) = message? else {
            continue;
        };
        // Control replies and latency frames fail to parse as metrics and
        // are simply skipped.
        let Ok(frame) = serde_json::from_str::<MetricsFrame>(&text) else {
            continue;
        };

        if args.raw {
            println!("{text}");
        } else {
            println!(
                "#{:<8} {:>9?}  ici {:.3}  coh {:.3}  crit {:.3}  mind {:.3}  phi({:.2}, {:.2})  {}  lat {:+.2} ms  cpu {:>3.0}%",
                frame.frame_id,
                frame.state,
                frame.ici,
                frame.phase_coherence,
                frame.criticality,
                frame.consciousness_level,
                frame.phi_phase,
                frame.phi_depth,
                frame.phi_source.as_str(),
                frame.latency_ms,
                frame.cpu_load * 100.0,
            );
        }

        seen += 1;
        if args.count > 0 && seen >= args.count {
            break;
        }
    }
    Ok(())
}
