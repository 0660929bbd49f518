use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive for the requested verbosity
fn filter_directive(debug: bool, quiet: bool) -> &'static str {
    if debug {
        "prompt_batch=debug"
    } else if quiet {
        "prompt_batch=error"
    } else {
        "prompt_batch=info"
    }
}

/// Initialize logging based on output mode and debug flag
///
/// With a log file, records are also appended there as JSON lines. The
/// returned guard flushes the file writer and must live until exit.
pub fn init_logging(
    debug: bool,
    quiet: bool,
    log_file: Option<&Path>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::new(filter_directive(debug, quiet));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(debug)
        .with_file(debug)
        .with_writer(std::io::stderr);

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        let (writer, guard) = tracing_appender::non_blocking(file);

        let file_layer = fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
            .with_target(true)
            .with_line_number(true)
            .with_file(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(file_layer)
            .try_init()?;
        Ok(Some(guard))
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
        Ok(None)
    }
}

/// Default log file path for a run of `workflow_name`
pub fn default_log_path(workflow_name: &str) -> anyhow::Result<PathBuf> {
    let log_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join("prompt-batch")
        .join("logs");

    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let filename = format!("{}-{}.log", workflow_name, timestamp);

    Ok(log_dir.join(filename))
}

/// Resolve `--log-file`: absent, an explicit path, or the default for this run
pub fn resolve_log_path(
    flag: Option<Option<PathBuf>>,
    workflow: Option<&str>,
) -> anyhow::Result<Option<PathBuf>> {
    match flag {
        None => Ok(None),
        Some(Some(path)) => Ok(Some(path)),
        Some(None) => {
            let name = workflow
                .and_then(|w| Path::new(w).file_stem())
                .and_then(|stem| stem.to_str())
                .unwrap_or("prompt-batch");
            default_log_path(name).map(Some)
        }
    }
}
