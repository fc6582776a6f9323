//! Stepflow CLI Entry Point
//!
//! # Usage
//!
//! ```bash
//! # Run a workflow
//! stepflow --workflow workflow.yaml
//!
//! # Write outputs elsewhere and log to a file
//! stepflow --workflow workflow.yaml --output-dir /data/runs --log-file run.log
//!
//! # Allow at most 4 concurrent branches per parallel step
//! stepflow --workflow workflow.yaml --max-workers 4
//! ```

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use log::{debug, error, info, warn};

use stepflow::execution::{Engine, RunReport, DEFAULT_MAX_WORKERS};
use stepflow::{load_workflow, APP_NAME, VERSION};

/// Command-line configuration.
#[derive(Debug, Parser)]
#[command(name = "stepflow", version, about = "Run a declarative YAML workflow")]
struct Cli {
    /// Path to the workflow YAML file
    #[arg(short, long)]
    workflow: PathBuf,

    /// Credential for a text-completion backend. This binary has no built-in
    /// backend, so the key is only recorded and ai_analyze steps fail softly
    /// unless the library is embedded with one (Actions::with_completion)
    #[arg(long, env = "STEPFLOW_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Root directory for workflow outputs
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Default worker capacity for parallel steps
    #[arg(long, default_value_t = DEFAULT_MAX_WORKERS)]
    max_workers: usize,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Configures `timestamp - LEVEL - message` logging to stderr or a file.
fn setup_logging(verbose: bool, log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose { "debug" } else { "info" };

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} - {} - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(path) = log_file {
        let file = File::options().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!();
}

fn print_summary(report: &RunReport) {
    println!();
    let status = if report.succeeded() {
        "Workflow completed".green().bold()
    } else {
        "Workflow completed with failures".yellow().bold()
    };
    println!("{}: {}", status, report.workflow_id);
    println!("  Steps executed: {}", report.steps_executed);
    if report.jumps > 0 {
        println!("  Jumps taken:    {}", report.jumps);
    }
    let failed = report.failed_steps.to_string();
    println!(
        "  Failed steps:   {}",
        if report.failed_steps == 0 {
            failed.normal()
        } else {
            failed.red()
        }
    );
    println!("  Elapsed:        {:.2?}", report.elapsed);
    println!("  Outputs:        {}", report.output_dir.display());
    debug!("{}", report.timeline.gantt_chart());
}

/// Main application entry point.
fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    setup_logging(cli.verbose, cli.log_file.as_deref())?;
    print_banner();

    match &cli.api_key {
        Some(_) => warn!(
            "API key given, but no text-completion backend is built in, ai_analyze steps will fail"
        ),
        None => debug!("No API key provided"),
    }

    info!("Loading workflow: {}", cli.workflow.display());
    let workflow = load_workflow(&cli.workflow).map_err(|e| {
        error!("Failed to load workflow: {}", e);
        format!(
            "Could not load workflow from '{}': {}",
            cli.workflow.display(),
            e
        )
    })?;

    let mut engine = Engine::new(workflow);
    engine.set_output_root(&cli.output_dir);
    engine.set_max_workers(cli.max_workers);

    let report = engine.run()?;
    print_summary(&report);

    Ok(())
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
