//! JSONL session logger: a disk-writing bus subscriber.
//!
//! Appends one JSON metrics frame per line. Runs on its own thread so a
//! slow disk never touches the audio path; the bus's drop-oldest policy is
//! the only backpressure.

use chroma_telemetry::{MetricsFrame, Subscriber};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Totals reported when the logger stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggerSummary {
    /// Frames written to disk.
    pub frames_written: u64,
    /// Frames the bus dropped for this subscriber.
    pub dropped_frames: u64,
}

/// Handle to a running session logger.
pub struct SessionLogger {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<LoggerSummary>>,
}

impl SessionLogger {
    /// Stop the logger, flush the file, and return the totals.
    pub fn stop(mut self) -> LoggerSummary {
        self.stop.store(true, Ordering::Release);
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

impl Drop for SessionLogger {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawn a logger writing `subscriber`'s frames to `path`, one JSON object
/// per line.
pub fn spawn_jsonl_logger(
    path: impl AsRef<Path>,
    subscriber: Subscriber<MetricsFrame>,
) -> std::io::Result<SessionLogger> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    tracing::info!(path = %path.as_ref().display(), "session logger started");

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);

    let handle = thread::Builder::new()
        .name("chroma-logger".into())
        .spawn(move || {
            let mut frames_written = 0u64;
            loop {
                if stop_flag.load(Ordering::Acquire) {
                    break;
                }
                match subscriber.recv_timeout(Duration::from_millis(250)) {
                    Some(frame) => {
                        match serde_json::to_string(&frame) {
                            Ok(line) => {
                                if writeln!(writer, "{line}").is_err() {
                                    tracing::warn!("session log write failed, stopping");
                                    break;
                                }
                                frames_written += 1;
                            }
                            Err(cause) => {
                                tracing::warn!(%cause, "frame serialisation failed");
                            }
                        }
                    }
                    None => {
                        if subscriber.is_closed() {
                            break;
                        }
                    }
                }
            }
            let _ = writer.flush();
            let summary = LoggerSummary {
                frames_written,
                dropped_frames: subscriber.dropped_frames(),
            };
            tracing::info!(
                frames = summary.frames_written,
                dropped = summary.dropped_frames,
                "session logger stopped"
            );
            summary
        })?;

    Ok(SessionLogger {
        stop,
        handle: Some(handle),
    })
}
