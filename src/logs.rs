// src/logs.rs
//
// =============================================================================
// NMR BATCH: RUN LOG (v 0.1 )
// =============================================================================
//
// Routes `log::info!` & friends into an append-mode log file, one line per
// record:
//
//   18-Oct-26 14:02:11 - INFO (scheduler) - Sample batch-01 inserted ...
//
// The file is the audit trail of a run (dry runs included), so it is never
// truncated; consecutive runs append to it.

use anyhow::{Context, Result};
use chrono::Local;
use env_logger::{Builder, Env, Target};
use log::Level;
use std::fmt::Display;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

const TIMESTAMP_FORMAT: &str = "%d-%b-%y %H:%M:%S";

/// Installs the global logger writing to `path`.
/// Level defaults to `info`; `RUST_LOG` overrides it.
pub fn init_file_logger(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {:?}", parent))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {:?}", path))?;

    Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Pipe(Box::new(file)))
        .format(|buf, record| {
            let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
            writeln!(
                buf,
                "{}",
                render_line(&timestamp, record.level(), record.target(), record.args())
            )
        })
        .try_init()
        .context("Logger already initialised")?;
    Ok(())
}

/// One log line. Targets are shortened to their last path segment
/// (e.g. "nmr_batch::scheduler" -> "scheduler").
pub fn render_line(timestamp: &str, level: Level, target: &str, message: &dyn Display) -> String {
    let target = target.rsplit("::").next().unwrap_or(target);
    format!("{} - {} ({}) - {}", timestamp, level, target, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_line_shortens_target() {
        let line = render_line(
            "18-Oct-26 14:02:11",
            Level::Warn,
            "nmr_batch::batch",
            &"Unknown parameter set",
        );
        assert_eq!(
            line,
            "18-Oct-26 14:02:11 - WARN (batch) - Unknown parameter set"
        );
    }

    #[test]
    fn test_render_line_keeps_plain_targets() {
        let line = render_line("t", Level::Info, "nmr_batch", &42);
        assert_eq!(line, "t - INFO (nmr_batch) - 42");
    }
}
