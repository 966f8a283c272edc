use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes a `tracing_subscriber` using `SPHCROP_LOG` first, then `RUST_LOG`, then a default.
///
/// Log field contract for sphcrop workers:
/// - Always include `layer`, `split` and `process` on run-level events.
/// - Include `tilt` on any bucket-level event (claim, skip, write, failure).
/// - Include `frame_id` on frame loads and per-frame failures.
pub fn init_tracing() {
    let filter = env_filter();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Same as [`init_tracing`], but events are also appended to `log_path`.
///
/// The file is the per-process run log; it is never truncated so reruns of the
/// same worker keep their history.
pub fn init_tracing_with_log_file(log_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("SPHCROP_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_receives_events_without_ansi() -> anyhow::Result<()> {
        let dir = std::env::temp_dir().join(format!(
            "sphcrop-observe-log-{}",
            std::process::id()
        ));
        let path = dir.join("SphereH320").join("vgg161_2").join("process00.log");
        init_tracing_with_log_file(&path)?;

        tracing::info!(target: "sphcrop", event = "log_file_check", tilt = 7u32, "file layer event");
        let text = std::fs::read_to_string(&path)?;
        assert!(text.contains("file layer event"), "log file was: {text:?}");
        assert!(text.contains("tilt=7"));
        assert!(!text.contains('\u{1b}'), "ansi escapes in log file");
        Ok(())
    }
}
