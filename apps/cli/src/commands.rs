//! CLI definition, routing, tracing setup and signal handling.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use docforge_core::{
    Pipeline, PipelineReport, ProcessRunner, ProgressReporter, SilentProgress, Stage,
    StepInvocation, StepRunner, resolve_project,
};
use docforge_shared::{
    AppConfig, CompilationRequest, DocForgeError, Engine, ModeFlags, ProjectContext,
    init_config, init_config_at, load_config, load_config_from,
};
use docforge_watch::{Detector, select_backend, watch_loop};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docforge — compile a document through the project's build steps.
#[derive(Parser, Debug)]
#[command(
    name = "docforge",
    version,
    about = "Extract, enhance and compile a document into a PDF, once or on every change.",
    long_about = None,
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true,
)]
pub(crate) struct Cli {
    /// Source document to build.
    #[arg(required = true)]
    pub input: Option<PathBuf>,

    /// Output PDF (defaults to the input path with a .pdf extension).
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Compilation engine (defaults to [compile].engine in the settings).
    #[arg(short, long)]
    pub engine: Option<Engine>,

    /// Rebuild whenever the input changes.
    #[arg(short, long)]
    pub watch: bool,

    /// Open the PDF after a successful build.
    #[arg(short, long)]
    pub preview: bool,

    /// Generate the project dashboard after compiling.
    #[arg(short, long)]
    pub dashboard: bool,

    /// Project config file; skips searching for the project root.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the steps that would run, without running them.
    #[arg(long)]
    pub dry_run: bool,

    /// Settings file (defaults to ~/.docforge/docforge.toml).
    #[arg(long, value_name = "FILE", env = "DOCFORGE_SETTINGS", global = true)]
    pub settings: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Subcommands that do not build anything.
#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Settings management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Write a settings file with defaults.
    Init,
    /// Show resolved settings.
    Show,
}

/// Parse the command line. Usage errors exit 1; `--help` and `--version`
/// exit 0.
pub(crate) fn parse_args() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = usage_exit_code(&e);
            // nothing useful to do if printing the usage text fails
            let _ = e.print();
            std::process::exit(code);
        }
    }
}

fn usage_exit_code(error: &clap::Error) -> i32 {
    if error.use_stderr() { 1 } else { 0 }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docforge=info",
        1 => "docforge=debug",
        _ => "docforge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Resolves on SIGINT, or SIGTERM on unix.
pub(crate) async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Some(Command::Config { action }) => match action {
            ConfigAction::Init => cmd_config_init(cli.settings.as_deref()),
            ConfigAction::Show => cmd_config_show(cli.settings.as_deref()),
        },
        None => {
            let config = load_settings(cli.settings.as_deref())?;
            let request = build_request(&cli, &config)?;
            cmd_build(&request, &config).await
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Turn flags into a request. Flags override settings, which override
/// defaults.
fn build_request(cli: &Cli, config: &AppConfig) -> Result<CompilationRequest> {
    let input = cli
        .input
        .as_deref()
        .ok_or_else(|| eyre!("no input document given"))?;

    let engine = match &cli.engine {
        Some(engine) => engine.clone(),
        None => config
            .compile
            .engine
            .parse()
            .map_err(|e| eyre!("invalid [compile] engine in settings: {e}"))?,
    };

    let mode = ModeFlags {
        watch: cli.watch,
        preview: cli.preview,
        dashboard: cli.dashboard,
        dry_run: cli.dry_run,
    };

    let request = CompilationRequest::new(
        input,
        cli.output.as_deref(),
        engine,
        mode,
        cli.config.as_deref(),
    )?;
    Ok(request)
}

async fn cmd_build(request: &CompilationRequest, config: &AppConfig) -> Result<()> {
    info!(
        input = %request.input.display(),
        output = %request.output.display(),
        engine = %request.engine,
        "building document"
    );

    if request.mode.dry_run {
        return cmd_dry_run(request, config);
    }

    let runner = ProcessRunner;
    let project = Pipeline::new(&runner, config, &SilentProgress).prepare(request)?;

    if request.mode.watch {
        return cmd_watch(&runner, request, &project, config).await;
    }

    let report = build_once(&runner, config, request, &project).await?;
    print_summary(&report);
    Ok(())
}

/// Resolve roots and list the planned invocations. No tool is probed or run.
fn cmd_dry_run(request: &CompilationRequest, config: &AppConfig) -> Result<()> {
    let project = resolve_project(request, &config.markers)?;
    let runner = ProcessRunner;
    let pipeline = Pipeline::new(&runner, config, &SilentProgress);

    println!();
    println!("  Repository: {}", project.repository_root.display());
    println!("  Project:    {}", project.project_root.display());
    println!("  Config:     {}", project.config_path.display());
    println!();
    for step in pipeline.planned_steps(request, &project) {
        println!("  [{}] {step}", step.kind);
        if let Some(cwd) = &step.cwd {
            println!("      in {}", cwd.display());
        }
    }
    println!();
    Ok(())
}

async fn cmd_watch(
    runner: &ProcessRunner,
    request: &CompilationRequest,
    project: &ProjectContext,
    config: &AppConfig,
) -> Result<()> {
    let backend = select_backend(config.watch.backend, |program| {
        runner.is_available(program)
    })?;
    // monitor first, so saves during the initial build are not missed
    let mut detector = Detector::start(backend, &request.input, &config.watch)?;
    info!(
        %backend,
        input = %request.input.display(),
        "watching for changes (ctrl-c to stop)"
    );

    let summary = watch_loop(
        &mut detector,
        Duration::from_millis(config.watch.debounce_ms),
        move || async move {
            let report = build_once(runner, config, request, project).await?;
            println!(
                "[{}] built {} in {:.1}s",
                chrono::Local::now().format("%H:%M:%S"),
                report.output.display(),
                report.elapsed.as_secs_f64()
            );
            Ok::<_, DocForgeError>(report)
        },
    )
    .await?;

    info!(
        builds = summary.builds,
        failures = summary.failures,
        "watch stopped"
    );
    Ok(())
}

/// One pipeline run with a fresh spinner.
async fn build_once(
    runner: &ProcessRunner,
    config: &AppConfig,
    request: &CompilationRequest,
    project: &ProjectContext,
) -> std::result::Result<PipelineReport, DocForgeError> {
    let progress = CliProgress::new();
    Pipeline::new(runner, config, &progress)
        .run(request, project)
        .await
}

fn print_summary(report: &PipelineReport) {
    let stages: Vec<&str> = report.stages.iter().map(Stage::name).collect();

    println!();
    println!("  Build complete!");
    println!("  Output:   {}", report.output.display());
    println!("  Stages:   {}", stages.join(" → "));
    println!("  Warnings: {}", report.warnings.len());
    for warning in &report.warnings {
        println!("    - {warning}");
    }
    println!("  Time:     {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
///
/// External steps share the terminal, so the spinner is cleared while a step
/// runs and redrawn with the current stage once it exits.
struct CliProgress {
    spinner: Mutex<Option<ProgressBar>>,
    message: Mutex<String>,
}

impl CliProgress {
    fn new() -> Self {
        Self {
            spinner: Mutex::new(Some(new_spinner(""))),
            message: Mutex::new(String::new()),
        }
    }

    fn set_message(&self, message: String) {
        if let Ok(spinner) = self.spinner.lock() {
            if let Some(spinner) = spinner.as_ref() {
                spinner.set_message(message.clone());
            }
        }
        if let Ok(mut current) = self.message.lock() {
            *current = message;
        }
    }

    /// Clear and drop the spinner, if one is showing.
    fn clear(&self) {
        if let Ok(mut spinner) = self.spinner.lock() {
            if let Some(spinner) = spinner.take() {
                spinner.finish_and_clear();
            }
        }
    }

    #[cfg(test)]
    fn is_spinning(&self) -> bool {
        self.spinner.lock().is_ok_and(|s| s.is_some())
    }
}

fn new_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    spinner.set_style(style);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

impl ProgressReporter for CliProgress {
    fn stage(&self, stage: Stage) {
        self.set_message(format!("{stage}..."));
    }

    fn step_started(&self, _invocation: &StepInvocation) {
        self.clear();
    }

    fn step_finished(&self, _invocation: &StepInvocation) {
        let message = self.message.lock().map(|m| m.clone()).unwrap_or_default();
        if let Ok(mut spinner) = self.spinner.lock() {
            if spinner.is_none() {
                *spinner = Some(new_spinner(&message));
            }
        }
    }

    fn warning(&self, warning: &DocForgeError) {
        self.set_message(format!("warning: {warning}"));
    }

    fn done(&self, _report: &PipelineReport) {
        self.clear();
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        // failed runs never reach `done`
        self.clear();
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => {
            init_config_at(path)?;
            path.to_path_buf()
        }
        None => init_config()?,
    };
    println!("Settings initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = load_settings(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
