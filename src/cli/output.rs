//! Output handlers for CLI commands
//!
//! Supports console (pretty), JSON, and quiet output modes.

use crate::job::{ItemRecord, ItemStatus, JobStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Output mode for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputMode {
    #[default]
    Console,
    Json,
    Quiet,
}

/// Events emitted while a job runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputEvent {
    JobStart {
        workflow: String,
        job_id: u64,
        items: usize,
        concurrency: usize,
    },
    ItemComplete {
        item_id: usize,
        status: ItemStatus,
        turnaround_ms: u64,
        error: Option<String>,
        finished: usize,
        total: usize,
    },
    Cancelled {
        items: usize,
    },
    JobComplete {
        status: JobStatus,
        done: usize,
        error: usize,
        cancelled: usize,
        duration_ms: u64,
    },
    JobError {
        error: String,
    },
    Info {
        message: String,
    },
    Debug {
        message: String,
    },
}

/// Output handler trait
pub trait OutputHandler: Send + Sync {
    /// Emit an event
    fn emit(&self, event: OutputEvent);

    /// Write the final per-item results
    fn result(&self, items: &[ItemRecord]);
}

fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

/// `a=1, b="x"` rendering of one output row
fn format_row(row: &Map<String, Value>) -> String {
    row.iter()
        .map(|(key, value)| match value {
            Value::String(s) => format!("{}={}", key, s),
            other => format!("{}={}", key, other),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Console output handler
pub struct ConsoleHandler {
    debug: bool,
}

impl ConsoleHandler {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }
}

impl OutputHandler for ConsoleHandler {
    fn emit(&self, event: OutputEvent) {
        match event {
            OutputEvent::JobStart {
                workflow,
                job_id,
                items,
                concurrency,
            } => {
                eprintln!(
                    "Running workflow '{}' as job {} ({} items, {} workers)",
                    workflow, job_id, items, concurrency
                );
            }
            OutputEvent::ItemComplete {
                item_id,
                status,
                turnaround_ms,
                error,
                finished,
                total,
            } => {
                let mark = if status == ItemStatus::Done { "✓" } else { "✗" };
                eprint!(
                    "[{}/{}] item {} {} ({})",
                    finished,
                    total,
                    item_id,
                    mark,
                    format_duration(turnaround_ms)
                );
                match error {
                    Some(error) => eprintln!(": {}", error),
                    None => eprintln!(),
                }
            }
            OutputEvent::Cancelled { items } => {
                eprintln!("Cancelled {} pending item(s); waiting for running items", items);
            }
            OutputEvent::JobComplete {
                status,
                done,
                error,
                cancelled,
                duration_ms,
            } => {
                eprintln!();
                let mark = if status == JobStatus::Done { "✓" } else { "✗" };
                eprintln!(
                    "{} Job {} in {}: {} done, {} failed, {} cancelled",
                    mark,
                    status,
                    format_duration(duration_ms),
                    done,
                    error,
                    cancelled
                );
            }
            OutputEvent::JobError { error } => {
                eprintln!("Error: {}", error);
            }
            OutputEvent::Info { message } => {
                eprintln!("{}", message);
            }
            OutputEvent::Debug { message } => {
                if self.debug {
                    eprintln!("[debug] {}", message);
                }
            }
        }
    }

    fn result(&self, items: &[ItemRecord]) {
        for item in items {
            match (&item.error, item.status) {
                (Some(error), _) => println!("item {}: error {}", item.item_id, error),
                (None, ItemStatus::Cancelled) => println!("item {}: cancelled", item.item_id),
                _ => {}
            }
            for row in &item.output_rows {
                println!("item {}: {}", item.item_id, format_row(row));
            }
        }
    }
}

/// JSON output handler
pub struct JsonHandler {
    pretty: bool,
}

impl JsonHandler {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn print_json<T: Serialize>(&self, value: &T) {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };

        if let Ok(s) = json {
            println!("{}", s);
        }
    }
}

impl OutputHandler for JsonHandler {
    fn emit(&self, event: OutputEvent) {
        self.print_json(&event);
    }

    fn result(&self, items: &[ItemRecord]) {
        self.print_json(&items);
    }
}

/// Quiet handler: no events, one JSON line per output row
pub struct QuietHandler;

impl OutputHandler for QuietHandler {
    fn emit(&self, _event: OutputEvent) {}

    fn result(&self, items: &[ItemRecord]) {
        for row in items.iter().flat_map(|item| &item.output_rows) {
            if let Ok(line) = serde_json::to_string(row) {
                println!("{}", line);
            }
        }
    }
}

/// Create an output handler based on mode
pub fn create_handler(mode: OutputMode, debug: bool) -> Box<dyn OutputHandler> {
    match mode {
        OutputMode::Console => Box::new(ConsoleHandler::new(debug)),
        OutputMode::Json => Box::new(JsonHandler::new(false)),
        OutputMode::Quiet => Box::new(QuietHandler),
    }
}
