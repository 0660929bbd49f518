//! CLI command implementations

use super::output::{OutputEvent, OutputHandler};
use super::signals::{CancellationToken, cancel_job_on_shutdown, setup_signal_handlers};
use crate::config::{BatchConfig, DefinitionStore, FileDefinitionStore};
use crate::engine::Interpreter;
use crate::job::{ItemInput, JobService, JobStatus, load_rows, repeat_items, rows_to_items};
use crate::parser::StructuredParser;
use crate::provider::{ECHO_PROVIDER, PromptExecutor, ProviderRegistry};
use crate::store::ResultStore;
use crate::template::TemplateEngine;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Exit code when the run was interrupted
pub const EXIT_INTERRUPTED: i32 = 130;

/// Options for `run`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub workflow: String,
    pub dataset: Option<PathBuf>,
    pub repeat: Option<usize>,
    pub concurrency: Option<usize>,
    pub db: Option<PathBuf>,
    /// Answer every prompt with the `echo` provider
    pub dry_run: bool,
}

/// Build the item list: one per dataset row, else `repeat` passes (default 1)
fn build_inputs(options: &RunOptions, config: &BatchConfig) -> Result<Vec<ItemInput>> {
    match &options.dataset {
        Some(path) => Ok(rows_to_items(load_rows(path)?)),
        None => repeat_items(options.repeat.unwrap_or(1), config.defaults.repeat_cap),
    }
}

/// Resolve `--db`: absent, an explicit path, or the default result database
pub fn resolve_db_path(flag: Option<Option<PathBuf>>) -> Result<Option<PathBuf>> {
    flag.map(|path| path.map_or_else(ResultStore::default_path, Ok)).transpose()
}

fn build_service(config: &BatchConfig, dry_run: bool) -> Result<JobService> {
    let mut registry = ProviderRegistry::from_config(config).context("building providers")?;
    if dry_run {
        registry = registry.force(ECHO_PROVIDER);
    }

    let interpreter = Interpreter::new(
        Arc::new(TemplateEngine::new()),
        Arc::new(registry),
        Arc::new(StructuredParser),
    )
    .with_max_steps(config.defaults.max_steps);

    Ok(JobService::new(interpreter))
}

/// Run a workflow over its items and report results
///
/// Returns the process exit code: 0 when every item finished without error,
/// 1 when some failed, 130 after an interrupt.
pub async fn run_workflow(
    options: RunOptions,
    project_dir: Option<&Path>,
    config: &BatchConfig,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let started = Instant::now();
    let workflow = FileDefinitionStore::new(project_dir)
        .load(&options.workflow)
        .with_context(|| format!("Failed to load workflow '{}'", options.workflow))?;
    let inputs = build_inputs(&options, config)?;
    let total = inputs.len();
    let concurrency = options.concurrency.unwrap_or(config.defaults.concurrency);

    let service = Arc::new(build_service(config, options.dry_run)?);
    let job_id = service.create_run(&workflow, inputs, concurrency)?;

    handler.emit(OutputEvent::JobStart {
        workflow: workflow.name.clone(),
        job_id: job_id.0,
        items: total,
        concurrency,
    });

    let token = CancellationToken::new();
    let signals = tokio::spawn(setup_signal_handlers(token.clone()));
    let canceller = cancel_job_on_shutdown(token.clone(), Arc::clone(&service), job_id);

    if let Some(mut completions) = service.completions(job_id) {
        while let Some(completion) = completions.recv().await {
            let finished = service
                .get_progress(job_id)
                .map(|p| p.done + p.error)
                .unwrap_or_default();
            handler.emit(OutputEvent::ItemComplete {
                item_id: completion.item_id,
                status: completion.status,
                turnaround_ms: completion.turnaround_ms,
                error: completion.error.map(|e| e.to_string()),
                finished,
                total,
            });
        }
    }

    let progress = service.wait(job_id).await?;
    signals.abort();
    if token.is_cancelled() {
        if let Ok(Ok(cancelled)) = canceller.await {
            handler.emit(OutputEvent::Cancelled { items: cancelled });
        }
    } else {
        canceller.abort();
    }

    let items = service.items(job_id)?;
    handler.result(&items);

    if let Some(db) = &options.db {
        let mut store = ResultStore::open(db)?;
        let run_id = store.save_job(job_id, &workflow.name, &progress, &items)?;
        handler.emit(OutputEvent::Debug {
            message: format!("saved job {} as run {} in {}", job_id, run_id, db.display()),
        });
    }

    let status = progress.job_status();
    handler.emit(OutputEvent::JobComplete {
        status,
        done: progress.done,
        error: progress.error,
        cancelled: progress.cancelled,
        duration_ms: started.elapsed().as_millis() as u64,
    });

    Ok(if token.is_cancelled() {
        EXIT_INTERRUPTED
    } else if status == JobStatus::Done {
        0
    } else {
        1
    })
}

/// Validate a workflow without running it
pub fn validate_workflow(
    workflow_name: &str,
    project_dir: Option<&Path>,
    handler: &dyn OutputHandler,
) -> i32 {
    match FileDefinitionStore::new(project_dir).load(workflow_name) {
        Ok(wf) => {
            handler.emit(OutputEvent::Info {
                message: format!(
                    "✓ Workflow '{}' is valid ({} steps, {} prompts)",
                    wf.name,
                    wf.steps.len(),
                    wf.prompts.len()
                ),
            });
            0
        }
        Err(e) => {
            handler.emit(OutputEvent::JobError {
                error: format!("✗ {:#}", e),
            });
            1
        }
    }
}

/// List configured providers and whether each one is reachable
pub async fn list_providers(config: &BatchConfig, handler: &dyn OutputHandler) -> Result<i32> {
    let registry = ProviderRegistry::from_config(config).context("building providers")?;
    let mut all_ok = true;

    for name in registry.names() {
        let Some(provider) = registry.get(name) else {
            continue;
        };
        let kind = match config.providers.get(name) {
            Some(p) if p.is_http() => format!("http: {}", p.command),
            Some(p) => format!("cli: {}", p.command),
            None => "built-in".to_string(),
        };
        let default = if config.defaults.provider.as_deref() == Some(name) {
            " [default]"
        } else {
            ""
        };

        let message = if provider.is_available().await {
            format!("✓ {} ({}){}", name, kind, default)
        } else {
            all_ok = false;
            format!("✗ {} ({} - unavailable){}", name, kind, default)
        };
        handler.emit(OutputEvent::Info { message });
    }

    for (name, _) in config.providers.iter().filter(|(_, p)| !p.enabled) {
        handler.emit(OutputEvent::Info {
            message: format!("- {} (disabled)", name),
        });
    }

    Ok(if all_ok { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ItemRecord, ItemStatus};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MockHandler {
        events: Mutex<Vec<OutputEvent>>,
        results: Mutex<Vec<ItemRecord>>,
    }

    impl OutputHandler for MockHandler {
        fn emit(&self, event: OutputEvent) {
            self.events.lock().unwrap().push(event);
        }

        fn result(&self, items: &[ItemRecord]) {
            self.results.lock().unwrap().extend_from_slice(items);
        }
    }

    fn count_status(items: &[ItemRecord], status: ItemStatus) -> usize {
        items.iter().filter(|item| item.status == status).count()
    }

    const GRADER: &str = r#"
        name = "grader"

        [prompts.ask]
        template = "ANSWER: {{ row.answer }}"
        provider = "missing"

        [prompts.ask.parser]
        kind = "regex"
        pattern = "ANSWER: (?P<ANSWER>\\w+)"

        [[steps]]
        kind = "prompt"
        prompt = "ask"

        [[steps]]
        kind = "set"
        name = "correct"
        expr = "parsed.ANSWER == row.key"

        [[steps]]
        kind = "output"
        fields = ["row.key", "correct"]
    "#;

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        let workflows = dir.path().join(".prompt-batch/workflows");
        fs::create_dir_all(&workflows).unwrap();
        fs::write(workflows.join("grader.toml"), GRADER).unwrap();
        fs::write(
            dir.path().join("rows.jsonl"),
            "{\"answer\": \"4\", \"key\": \"4\"}\n{\"answer\": \"5\", \"key\": \"6\"}\n",
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_dry_run_over_dataset_saves_results() {
        let dir = project();
        let handler = MockHandler::default();
        let options = RunOptions {
            workflow: "grader".into(),
            dataset: Some(dir.path().join("rows.jsonl")),
            concurrency: Some(2),
            db: Some(dir.path().join("results.db")),
            dry_run: true,
            ..Default::default()
        };

        let code = run_workflow(options, Some(dir.path()), &BatchConfig::default(), &handler)
            .await
            .unwrap();
        assert_eq!(code, 0);

        let results = handler.results.lock().unwrap();
        assert_eq!(count_status(&results, ItemStatus::Done), 2);
        assert_eq!(results[0].output_rows[0]["correct"], true);
        assert_eq!(results[1].output_rows[0]["correct"], false);

        let events = handler.events.lock().unwrap();
        assert!(matches!(events[0], OutputEvent::JobStart { items: 2, .. }));
        assert!(events.iter().any(|e| matches!(
            e,
            OutputEvent::JobComplete {
                status: JobStatus::Done,
                done: 2,
                ..
            }
        )));

        let store = ResultStore::open(&dir.path().join("results.db")).unwrap();
        assert_eq!(store.recent_runs(5).unwrap()[0].workflow_name, "grader");
    }

    #[tokio::test]
    async fn test_unknown_provider_fails_items_not_run() {
        let dir = project();
        let handler = MockHandler::default();
        let options = RunOptions {
            workflow: "grader".into(),
            dataset: Some(dir.path().join("rows.jsonl")),
            concurrency: Some(1),
            ..Default::default()
        };

        let code = run_workflow(options, Some(dir.path()), &BatchConfig::default(), &handler)
            .await
            .unwrap();
        assert_eq!(code, 1);

        let results = handler.results.lock().unwrap();
        assert_eq!(count_status(&results, ItemStatus::Error), 2);
        assert!(
            results[0]
                .error
                .as_ref()
                .unwrap()
                .message
                .contains("unknown provider 'missing'")
        );
    }

    #[tokio::test]
    async fn test_repeat_cap_is_enforced() {
        let dir = project();
        let mut config = BatchConfig::default();
        config.defaults.repeat_cap = 2;
        let options = RunOptions {
            workflow: "grader".into(),
            repeat: Some(3),
            ..Default::default()
        };

        let err = run_workflow(options, Some(dir.path()), &config, &MockHandler::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exceeds the cap of 2"));
    }

    #[test]
    fn test_resolve_db_path() {
        assert_eq!(resolve_db_path(None).unwrap(), None);

        let explicit = PathBuf::from("/tmp/results.db");
        assert_eq!(
            resolve_db_path(Some(Some(explicit.clone()))).unwrap(),
            Some(explicit)
        );
    }

    #[test]
    fn test_validate_workflow() {
        let dir = project();
        let handler = MockHandler::default();
        assert_eq!(validate_workflow("grader", Some(dir.path()), &handler), 0);

        fs::write(
            dir.path().join(".prompt-batch/workflows/broken.toml"),
            "name = \"broken\"\n[[steps]]\nkind = \"end_if\"\n",
        )
        .unwrap();
        assert_eq!(validate_workflow("broken", Some(dir.path()), &handler), 1);

        let events = handler.events.lock().unwrap();
        match &events[1] {
            OutputEvent::JobError { error } => assert!(error.contains("'end_if' has no open 'if'")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_providers_includes_echo() {
        let handler = MockHandler::default();
        let code = list_providers(&BatchConfig::default(), &handler).await.unwrap();
        assert_eq!(code, 0);

        let events = handler.events.lock().unwrap();
        assert_eq!(
            events[0],
            OutputEvent::Info {
                message: "✓ echo (built-in)".into()
            }
        );
    }
}
