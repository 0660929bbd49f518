use anyhow::Result;
use clap::{Parser, Subcommand};
use prompt_batch::cli::{self, OutputMode, RunOptions};
use prompt_batch::config::BatchConfig;
use prompt_batch::logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "prompt-batch")]
#[command(about = "Run prompt workflows once, repeatedly, or per dataset row")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory (defaults to current)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputMode::Console)]
    output: OutputMode,

    /// Also write logs as JSON lines (to a per-run file under the config
    /// directory when no path is given)
    #[arg(long, global = true, require_equals = true)]
    log_file: Option<Option<PathBuf>>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow
    Run {
        /// Workflow name or path to a workflow file
        workflow: String,

        /// Dataset with one item per row (.json array or .jsonl)
        #[arg(long, conflicts_with = "repeat")]
        dataset: Option<PathBuf>,

        /// Run the workflow this many times
        #[arg(long)]
        repeat: Option<usize>,

        /// Number of workers (1-99)
        #[arg(long, short = 'j')]
        concurrency: Option<usize>,

        /// Save results to SQLite (the shared results database when no path
        /// is given)
        #[arg(long, require_equals = true)]
        db: Option<Option<PathBuf>>,

        /// Answer every prompt with the built-in echo provider
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate a workflow without running
    Validate {
        /// Workflow name or path to a workflow file
        workflow: String,
    },

    /// List configured providers and check availability
    Providers,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let quiet = cli.quiet || cli.output == OutputMode::Quiet;
    let workflow_name = match &cli.command {
        Commands::Run { workflow, .. } => Some(workflow.as_str()),
        _ => None,
    };
    let log_file = logging::resolve_log_path(cli.log_file.clone(), workflow_name)?;
    let log_guard = logging::init_logging(cli.debug, quiet, log_file.as_deref())?;

    let project_dir = cli.dir.as_deref();
    let config = BatchConfig::load(project_dir)?;
    let mode = if cli.quiet { OutputMode::Quiet } else { cli.output };
    let handler = cli::create_handler(mode, cli.debug);

    let code = match cli.command {
        Commands::Run {
            workflow,
            dataset,
            repeat,
            concurrency,
            db,
            dry_run,
        } => {
            let options = RunOptions {
                workflow,
                dataset,
                repeat,
                concurrency,
                db: cli::resolve_db_path(db)?,
                dry_run,
            };
            cli::run_workflow(options, project_dir, &config, &*handler).await?
        }

        Commands::Validate { workflow } => cli::validate_workflow(&workflow, project_dir, &*handler),

        Commands::Providers => cli::list_providers(&config, &*handler).await?,
    };

    if code != 0 {
        drop(log_guard);
        std::process::exit(code);
    }
    Ok(())
}
