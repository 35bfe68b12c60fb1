//! External step execution.
//!
//! Each pipeline stage that does real work shells out to an external
//! program. A step is run synchronously from the pipeline's point of view:
//! the orchestrator waits for the child to exit and only looks at its exit
//! status. Child stdout/stderr go straight to the user's terminal.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::{debug, info, warn};

use docforge_shared::StepCommand;

// ---------------------------------------------------------------------------
// Step identity & policy
// ---------------------------------------------------------------------------

/// The external steps the pipeline knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Extract,
    Enhance,
    Compile,
    Dashboard,
    Preview,
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Enhance => "enhance",
            Self::Compile => "compile",
            Self::Dashboard => "dashboard",
            Self::Preview => "preview",
        }
    }

    /// Failure policy for this step.
    pub fn policy(&self) -> StepPolicy {
        match self {
            Self::Extract | Self::Preview => StepPolicy::Recoverable,
            Self::Enhance | Self::Compile | Self::Dashboard => StepPolicy::Fatal,
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a failing step does to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    /// Failure aborts the pipeline.
    Fatal,
    /// Failure is logged and the pipeline carries on.
    Recoverable,
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Values substituted into `{name}` placeholders of step argument templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    vars: BTreeMap<&'static str, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a path-valued placeholder.
    pub fn with_path(mut self, key: &'static str, path: &Path) -> Self {
        self.vars.insert(key, path.to_string_lossy().into_owned());
        self
    }

    /// Replace every known `{key}` in `template` in a single left-to-right
    /// pass. Unknown placeholders are left untouched, and substituted values
    /// are never expanded again.
    pub fn expand(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let known = after
                .find('}')
                .and_then(|close| self.vars.get(&after[..close]).map(|value| (close, value)));
            match known {
                Some((close, value)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }

        out.push_str(rest);
        out
    }
}

/// A fully expanded external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInvocation {
    pub kind: StepKind,
    pub program: String,
    pub args: Vec<String>,
    /// Working directory (inherits the orchestrator's when `None`).
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl StepInvocation {
    pub fn new(kind: StepKind, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind,
            program: program.into(),
            args,
            cwd: None,
            env: Vec::new(),
        }
    }

    /// Expand a configured command template.
    pub fn from_command(kind: StepKind, command: &StepCommand, vars: &TemplateVars) -> Self {
        Self::new(
            kind,
            vars.expand(&command.program),
            command.args.iter().map(|a| vars.expand(a)).collect(),
        )
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl std::fmt::Display for StepInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Termination status of an external step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepExit {
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
}

impl StepExit {
    pub const SUCCESS: Self = Self { code: Some(0) };

    pub fn failure(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for StepExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("termination by signal"),
        }
    }
}

/// Executes external programs.
///
/// The pipeline only ever talks to this trait, so tests can script step
/// behaviour without spawning processes.
pub trait StepRunner: Sync {
    /// Whether `program` can be spawned at all.
    fn is_available(&self, program: &str) -> bool;

    /// Run one invocation to completion.
    fn execute(
        &self,
        invocation: &StepInvocation,
    ) -> impl Future<Output = std::io::Result<StepExit>> + Send;
}

/// Runs steps as real child processes.
///
/// Children are killed if the awaiting future is dropped, so an interrupted
/// run never leaves a compiler behind.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl StepRunner for ProcessRunner {
    fn is_available(&self, program: &str) -> bool {
        std::process::Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }

    async fn execute(&self, invocation: &StepInvocation) -> std::io::Result<StepExit> {
        let mut command = tokio::process::Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.cwd {
            command.current_dir(dir);
        }

        let status = command.status().await?;
        Ok(StepExit {
            code: status.code(),
        })
    }
}

// ---------------------------------------------------------------------------
// run_step
// ---------------------------------------------------------------------------

/// A step that did not complete successfully.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} step `{program}` failed: {reason}")]
pub struct StepError {
    pub kind: StepKind,
    pub program: String,
    pub reason: String,
}

/// Result of a step that did not abort the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    /// A recoverable step failed; the pipeline continues.
    SoftFailed(StepError),
}

/// Run one step and apply `policy` to its termination status.
///
/// Fatal failures come back as `Err`; recoverable ones as
/// [`StepOutcome::SoftFailed`].
pub async fn run_step<R: StepRunner>(
    runner: &R,
    invocation: &StepInvocation,
    policy: StepPolicy,
) -> Result<StepOutcome, StepError> {
    info!(step = %invocation.kind, "running {invocation}");
    debug!(cwd = ?invocation.cwd, env = ?invocation.env, "step environment");

    let reason = match runner.execute(invocation).await {
        Ok(exit) if exit.success() => {
            debug!(step = %invocation.kind, "step completed");
            return Ok(StepOutcome::Completed);
        }
        Ok(exit) => format!("{exit}"),
        Err(e) => format!("could not start: {e}"),
    };

    let error = StepError {
        kind: invocation.kind,
        program: invocation.program.clone(),
        reason,
    };

    match policy {
        StepPolicy::Fatal => Err(error),
        StepPolicy::Recoverable => {
            warn!(step = %invocation.kind, "{error}; continuing");
            Ok(StepOutcome::SoftFailed(error))
        }
    }
}
