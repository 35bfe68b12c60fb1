//! End-to-end build pipeline:
//! resolve → extract → enhance → compile → relocate → dashboard → preview.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use docforge_shared::{AppConfig, CompilationRequest, DocForgeError, ProjectContext, Result};

use crate::cleanup::CleanupRegistry;
use crate::resolver;
use crate::step::{
    StepError, StepInvocation, StepKind, StepOutcome, StepPolicy, StepRunner, TemplateVars,
    run_step,
};

/// Auxiliary outputs LaTeX toolchains leave next to the compiled document.
const AUX_EXTENSIONS: &[&str] = &[
    "aux",
    "log",
    "out",
    "fls",
    "fdb_latexmk",
    "synctex.gz",
    "toc",
    "bbl",
    "blg",
];

/// Placeholder shown for the temporary directory in dry-run plans.
const PLANNED_WORKDIR: &str = "<workdir>";

// ---------------------------------------------------------------------------
// Stages & progress
// ---------------------------------------------------------------------------

/// Pipeline states, in the order a successful run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Extracting,
    Enhancing,
    Compiling,
    Relocating,
    Dashboard,
    Preview,
    Done,
    Failed,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Resolving => "resolving",
            Self::Extracting => "extracting",
            Self::Enhancing => "enhancing",
            Self::Compiling => "compiling",
            Self::Relocating => "relocating",
            Self::Dashboard => "dashboard",
            Self::Preview => "preview",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Summary of a successful run.
#[derive(Debug)]
pub struct PipelineReport {
    /// Final artifact.
    pub output: PathBuf,
    /// Stages visited, in order.
    pub stages: Vec<Stage>,
    /// Recoverable and non-fatal failures.
    pub warnings: Vec<DocForgeError>,
    /// Total elapsed time.
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new stage.
    fn stage(&self, stage: Stage);
    /// Called right before an external step starts. The step writes to the
    /// terminal until [`ProgressReporter::step_finished`].
    fn step_started(&self, _invocation: &StepInvocation) {}
    /// Called once the external step has exited.
    fn step_finished(&self, _invocation: &StepInvocation) {}
    /// Called for every recoverable or non-fatal failure.
    fn warning(&self, warning: &DocForgeError);
    /// Called when the pipeline completes.
    fn done(&self, report: &PipelineReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _stage: Stage) {}
    fn warning(&self, _warning: &DocForgeError) {}
    fn done(&self, _report: &PipelineReport) {}
}

// ---------------------------------------------------------------------------
// Run context
// ---------------------------------------------------------------------------

/// Per-run state threaded through every stage. Owns the run's cleanup
/// registry, so dropping the context releases everything.
struct RunContext<'a> {
    request: &'a CompilationRequest,
    project: &'a ProjectContext,
    cleanup: CleanupRegistry,
    stages: Vec<Stage>,
    warnings: Vec<DocForgeError>,
    progress: &'a dyn ProgressReporter,
}

impl RunContext<'_> {
    fn enter(&mut self, stage: Stage) {
        debug!(%stage, "entering stage");
        self.stages.push(stage);
        self.progress.stage(stage);
    }

    fn current(&self) -> Stage {
        self.stages.last().copied().unwrap_or(Stage::Resolving)
    }

    fn warn(&mut self, warning: DocForgeError) {
        warn!("{warning}");
        self.progress.warning(&warning);
        self.warnings.push(warning);
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Invocations a run will make, in stage order.
struct Plan {
    extract: StepInvocation,
    enhance: StepInvocation,
    compile: StepInvocation,
    dashboard: Option<StepInvocation>,
    preview: Option<StepInvocation>,
}

impl Plan {
    fn into_vec(self) -> Vec<StepInvocation> {
        let mut steps = vec![self.extract, self.enhance, self.compile];
        steps.extend(self.dashboard);
        steps.extend(self.preview);
        steps
    }
}

/// The build pipeline, generic over how external steps are executed.
pub struct Pipeline<'a, R> {
    runner: &'a R,
    config: &'a AppConfig,
    progress: &'a dyn ProgressReporter,
}

impl<'a, R: StepRunner> Pipeline<'a, R> {
    pub fn new(runner: &'a R, config: &'a AppConfig, progress: &'a dyn ProgressReporter) -> Self {
        Self {
            runner,
            config,
            progress,
        }
    }

    /// Resolve the project context and check that every required tool is
    /// installed. Nothing is created on disk.
    pub fn prepare(&self, request: &CompilationRequest) -> Result<ProjectContext> {
        self.progress.stage(Stage::Resolving);
        let project = resolver::resolve_project(request, &self.config.markers)?;
        self.check_dependencies(request, &project)?;
        Ok(project)
    }

    /// Fail with `MissingDependency` when a fatal step's program is absent.
    pub fn check_dependencies(
        &self,
        request: &CompilationRequest,
        project: &ProjectContext,
    ) -> Result<()> {
        let plan = self.plan(request, project, Path::new(PLANNED_WORKDIR));
        for step in plan.into_vec() {
            if step.kind.policy() != StepPolicy::Fatal {
                continue;
            }
            if !self.runner.is_available(&step.program) {
                return Err(DocForgeError::MissingDependency {
                    program: step.program,
                    step: step.kind.to_string(),
                });
            }
            debug!(program = %step.program, step = %step.kind, "dependency found");
        }
        Ok(())
    }

    /// Every invocation a run would make, without running anything.
    pub fn planned_steps(
        &self,
        request: &CompilationRequest,
        project: &ProjectContext,
    ) -> Vec<StepInvocation> {
        self.plan(request, project, Path::new(PLANNED_WORKDIR))
            .into_vec()
    }

    fn plan(
        &self,
        request: &CompilationRequest,
        project: &ProjectContext,
        workdir: &Path,
    ) -> Plan {
        let enhanced = request.enhanced_path(&self.config.compile.enhanced_suffix);
        let project_config = project.project_root.join(&self.config.markers.project_config);
        let vars = TemplateVars::new()
            .with_path("input", &request.input)
            .with_path("output", &enhanced)
            .with_path("config", &project.config_path)
            .with_path("project_root", &project.project_root)
            .with_path("repo_root", &project.repository_root)
            .with_path("project_config", &project_config)
            .with_path("workdir", workdir);

        let with_env = |inv: StepInvocation| {
            inv.env("TMPDIR", workdir.to_string_lossy())
                .env("DOCFORGE_WORKDIR", workdir.to_string_lossy())
        };
        let steps = &self.config.steps;

        let extract = with_env(
            StepInvocation::from_command(StepKind::Extract, &steps.extract, &vars)
                .current_dir(&project.project_root),
        );
        let enhance = with_env(
            StepInvocation::from_command(StepKind::Enhance, &steps.enhance, &vars)
                .current_dir(&project.project_root),
        );

        let file_name = enhanced
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let compile = with_env(
            StepInvocation::new(
                StepKind::Compile,
                request.engine.program(),
                request.engine.args(&file_name),
            )
            .current_dir(request.input_dir()),
        );

        let dashboard = request.mode.dashboard.then(|| {
            with_env(
                StepInvocation::from_command(StepKind::Dashboard, &steps.dashboard, &vars)
                    .current_dir(&project.project_root),
            )
        });
        let preview = request
            .mode
            .preview
            .then(|| preview_invocation(&request.output));

        Plan {
            extract,
            enhance,
            compile,
            dashboard,
            preview,
        }
    }

    /// Run one full pipeline invocation.
    ///
    /// A fresh temporary directory is acquired first and released before
    /// returning, whatever the outcome. The final artifact is never removed.
    #[instrument(skip_all, fields(input = %request.input.display()))]
    pub async fn run(
        &self,
        request: &CompilationRequest,
        project: &ProjectContext,
    ) -> Result<PipelineReport> {
        let start = Instant::now();
        let cleanup = CleanupRegistry::acquire(self.config.cleanup.temp_root.as_deref())?;
        let plan = self.plan(request, project, cleanup.workdir());

        let mut ctx = RunContext {
            request,
            project,
            cleanup,
            stages: Vec::new(),
            warnings: Vec::new(),
            progress: self.progress,
        };

        let outcome = self.run_stages(&mut ctx, plan).await;
        ctx.cleanup.release();

        match outcome {
            Ok(()) => {
                ctx.enter(Stage::Done);
                let report = PipelineReport {
                    output: request.output.clone(),
                    stages: std::mem::take(&mut ctx.stages),
                    warnings: std::mem::take(&mut ctx.warnings),
                    elapsed: start.elapsed(),
                };
                info!(
                    output = %report.output.display(),
                    warnings = report.warnings.len(),
                    elapsed_ms = report.elapsed.as_millis(),
                    "pipeline complete"
                );
                self.progress.done(&report);
                Ok(report)
            }
            Err(e) => {
                let stage = ctx.current();
                ctx.enter(Stage::Failed);
                error!(%stage, "pipeline failed: {e}");
                Err(e)
            }
        }
    }

    async fn run_stages(&self, ctx: &mut RunContext<'_>, plan: Plan) -> Result<()> {
        let request = ctx.request;
        let enhanced = request.enhanced_path(&self.config.compile.enhanced_suffix);

        // --- Extracting (recoverable) ---
        ctx.enter(Stage::Extracting);
        match self.execute(&plan.extract).await {
            Ok(StepOutcome::Completed) => {}
            Ok(StepOutcome::SoftFailed(e)) | Err(e) => {
                ctx.warn(DocForgeError::ExtractionFailed {
                    reason: e.to_string(),
                });
            }
        }

        // --- Enhancing ---
        ctx.enter(Stage::Enhancing);
        ctx.cleanup.register(&enhanced);
        self.run_fatal(&plan.enhance, |reason| DocForgeError::EnhancementFailed {
            reason,
        })
        .await?;
        if !enhanced.is_file() {
            return Err(DocForgeError::EnhancementFailed {
                reason: format!("{} was not produced", enhanced.display()),
            });
        }

        // --- Compiling ---
        ctx.enter(Stage::Compiling);
        let compiled = enhanced.with_extension("pdf");
        if compiled.exists() {
            debug!(path = %compiled.display(), "removing stale compiled artifact");
            std::fs::remove_file(&compiled).map_err(|e| DocForgeError::io(&compiled, e))?;
        }
        for ext in AUX_EXTENSIONS {
            ctx.cleanup.register(enhanced.with_extension(ext));
        }
        self.run_fatal(&plan.compile, |reason| DocForgeError::CompilationFailed {
            reason,
        })
        .await?;
        if !compiled.is_file() {
            return Err(DocForgeError::CompilationFailed {
                reason: format!("expected {} was not produced", compiled.display()),
            });
        }

        // --- Relocating ---
        ctx.enter(Stage::Relocating);
        relocate(&compiled, &request.output)?;

        // --- Dashboard (optional) ---
        if let Some(dashboard) = &plan.dashboard {
            ctx.enter(Stage::Dashboard);
            let project_config = ctx
                .project
                .project_root
                .join(&self.config.markers.project_config);
            if !project_config.is_file() {
                return Err(DocForgeError::MissingProjectConfig {
                    path: project_config,
                });
            }
            self.run_fatal(dashboard, |reason| DocForgeError::DashboardFailed { reason })
                .await?;
        }

        // --- Preview (optional, non-fatal) ---
        if let Some(preview) = &plan.preview {
            ctx.enter(Stage::Preview);
            match self.execute(preview).await {
                Ok(StepOutcome::Completed) => {}
                Ok(StepOutcome::SoftFailed(e)) | Err(e) => {
                    ctx.warn(DocForgeError::PreviewUnavailable {
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    async fn run_fatal(
        &self,
        invocation: &StepInvocation,
        to_error: impl FnOnce(String) -> DocForgeError,
    ) -> Result<()> {
        self.execute(invocation)
            .await
            .map(|_| ())
            .map_err(|e| to_error(e.to_string()))
    }

    /// Run one step under its own policy, bracketed by progress callbacks.
    async fn execute(
        &self,
        invocation: &StepInvocation,
    ) -> std::result::Result<StepOutcome, StepError> {
        self.progress.step_started(invocation);
        let outcome = run_step(self.runner, invocation, invocation.kind.policy()).await;
        self.progress.step_finished(invocation);
        outcome
    }
}

/// Move the compiled PDF to the requested output path.
fn relocate(compiled: &Path, output: &Path) -> Result<()> {
    if compiled == output {
        return Ok(());
    }
    let failed = |source| DocForgeError::RelocationFailed {
        from: compiled.to_path_buf(),
        to: output.to_path_buf(),
        source,
    };

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).map_err(failed)?;
    }

    if std::fs::rename(compiled, output).is_err() {
        // rename fails across filesystems; fall back to copy + remove
        std::fs::copy(compiled, output).map_err(failed)?;
        std::fs::remove_file(compiled).map_err(failed)?;
    }
    debug!(from = %compiled.display(), to = %output.display(), "relocated artifact");
    Ok(())
}

/// Platform opener for the finished PDF.
fn preview_invocation(output: &Path) -> StepInvocation {
    let file = output.to_string_lossy().into_owned();
    if cfg!(target_os = "macos") {
        StepInvocation::new(StepKind::Preview, "open", vec![file])
    } else if cfg!(windows) {
        StepInvocation::new(
            StepKind::Preview,
            "cmd",
            vec!["/C".into(), "start".into(), String::new(), file],
        )
    } else {
        StepInvocation::new(StepKind::Preview, "xdg-open", vec![file])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepExit;
    use crate::step::testing::FakeRunner;
    use docforge_shared::{Engine, ModeFlags};

    /// repo/flake.nix (depth 2), repo/proj/manifest.json (depth 1),
    /// repo/proj/paper/paper.tex, plus a private temp root.
    struct Fixture {
        _tmp: tempfile::TempDir,
        repo: PathBuf,
        proj: PathBuf,
        paper_dir: PathBuf,
        input: PathBuf,
        temp_root: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let repo = tmp.path().join("repo");
            let proj = repo.join("proj");
            let paper_dir = proj.join("paper");
            let temp_root = tmp.path().join("scratch");
            std::fs::create_dir_all(&paper_dir).unwrap();
            std::fs::create_dir_all(&temp_root).unwrap();
            std::fs::write(repo.join("flake.nix"), "").unwrap();
            std::fs::write(proj.join("manifest.json"), "{}").unwrap();
            let input = paper_dir.join("paper.tex");
            std::fs::write(&input, "\\documentclass{article}").unwrap();

            Self {
                _tmp: tmp,
                repo,
                proj,
                paper_dir,
                input,
                temp_root,
            }
        }

        fn config(&self) -> AppConfig {
            let mut config = AppConfig::default();
            config.cleanup.temp_root = Some(self.temp_root.clone());
            config
        }

        fn request(&self, mode: ModeFlags) -> CompilationRequest {
            CompilationRequest::new(&self.input, None, Engine::Latexmk, mode, None).unwrap()
        }

        fn enhanced(&self) -> PathBuf {
            self.paper_dir.join("paper_enhanced.tex")
        }

        fn temp_entries(&self) -> usize {
            std::fs::read_dir(&self.temp_root).unwrap().count()
        }

        /// Runner whose enhance and compile steps behave like the real tools.
        fn working_runner(&self) -> FakeRunner {
            let enhanced = self.enhanced();
            FakeRunner::new()
                .on(StepKind::Enhance, move |_| {
                    std::fs::write(&enhanced, "enhanced").unwrap();
                    StepExit::SUCCESS
                })
                .on(StepKind::Compile, fake_compile)
        }
    }

    /// Writes `<stem>.pdf` and a couple of aux files in the step's cwd.
    fn fake_compile(inv: &StepInvocation) -> StepExit {
        let cwd = inv.cwd.clone().unwrap();
        let source = Path::new(inv.args.last().unwrap());
        for ext in ["pdf", "aux", "log"] {
            std::fs::write(cwd.join(source.with_extension(ext)), ext).unwrap();
        }
        StepExit::SUCCESS
    }

    async fn run(fx: &Fixture, runner: &FakeRunner, mode: ModeFlags) -> Result<PipelineReport> {
        let config = fx.config();
        let pipeline = Pipeline::new(runner, &config, &SilentProgress);
        let request = fx.request(mode);
        let project = pipeline.prepare(&request)?;
        pipeline.run(&request, &project).await
    }

    #[tokio::test]
    async fn plain_build_produces_pdf_beside_input() {
        let fx = Fixture::new();
        let runner = fx.working_runner();

        let report = run(&fx, &runner, ModeFlags::default()).await.expect("build");

        assert_eq!(report.output, fx.paper_dir.join("paper.pdf"));
        assert!(report.output.is_file());
        assert_eq!(
            report.stages,
            vec![
                Stage::Extracting,
                Stage::Enhancing,
                Stage::Compiling,
                Stage::Relocating,
                Stage::Done
            ]
        );
        assert!(report.warnings.is_empty());
        assert_eq!(
            runner.kinds(),
            vec![StepKind::Extract, StepKind::Enhance, StepKind::Compile]
        );
        // moved, not copied; intermediates gone
        assert!(!fx.paper_dir.join("paper_enhanced.pdf").exists());
        assert!(!fx.enhanced().exists());
        assert!(!fx.paper_dir.join("paper_enhanced.aux").exists());
        assert!(!fx.paper_dir.join("paper_enhanced.log").exists());
        assert!(fx.input.exists());
        assert_eq!(fx.temp_entries(), 0);
    }

    #[tokio::test]
    async fn steps_receive_resolved_paths() {
        let fx = Fixture::new();
        let runner = fx.working_runner();
        run(&fx, &runner, ModeFlags::default()).await.expect("build");

        let calls = runner.calls.lock().unwrap();
        let extract = &calls[0];
        assert!(extract.args[0].starts_with(&*fx.repo.to_string_lossy()));
        assert!(extract.args.contains(&fx.proj.to_string_lossy().into_owned()));
        assert!(
            extract
                .args
                .contains(&fx.proj.join("manifest.json").to_string_lossy().into_owned())
        );

        let enhance = &calls[1];
        assert!(enhance.args.contains(&fx.input.to_string_lossy().into_owned()));
        assert!(enhance.args.contains(&fx.enhanced().to_string_lossy().into_owned()));
        assert_eq!(enhance.cwd.as_deref(), Some(fx.proj.as_path()));

        let compile = &calls[2];
        assert_eq!(compile.program, "latexmk");
        assert_eq!(compile.args.last().unwrap(), "paper_enhanced.tex");
        assert_eq!(compile.cwd.as_deref(), Some(fx.paper_dir.as_path()));

        let (_, workdir) = compile.env.iter().find(|(k, _)| k == "TMPDIR").unwrap();
        assert!(Path::new(workdir).starts_with(&fx.temp_root));
    }

    #[tokio::test]
    async fn workdir_exists_while_steps_run() {
        let fx = Fixture::new();
        let enhanced = fx.enhanced();
        let runner = FakeRunner::new()
            .on(StepKind::Extract, |inv| {
                let (_, dir) = inv.env.iter().find(|(k, _)| k == "DOCFORGE_WORKDIR").unwrap();
                assert!(Path::new(dir).is_dir());
                StepExit::SUCCESS
            })
            .on(StepKind::Enhance, move |_| {
                std::fs::write(&enhanced, "").unwrap();
                StepExit::SUCCESS
            })
            .on(StepKind::Compile, fake_compile);

        run(&fx, &runner, ModeFlags::default()).await.expect("build");
        assert_eq!(fx.temp_entries(), 0);
    }

    #[tokio::test]
    async fn extraction_failure_is_recoverable() {
        let fx = Fixture::new();
        let runner = fx
            .working_runner()
            .on(StepKind::Extract, |_| StepExit::failure(1));

        let report = run(&fx, &runner, ModeFlags::default()).await.expect("build");

        assert!(report.stages.contains(&Stage::Compiling));
        assert_eq!(report.warnings.len(), 1);
        assert!(matches!(
            report.warnings[0],
            DocForgeError::ExtractionFailed { .. }
        ));
        assert!(report.output.is_file());
    }

    #[tokio::test]
    async fn enhancement_failure_stops_before_compile() {
        let fx = Fixture::new();
        let runner = fx
            .working_runner()
            .on(StepKind::Enhance, |_| StepExit::failure(1));

        let err = run(&fx, &runner, ModeFlags::default()).await.unwrap_err();

        assert!(matches!(err, DocForgeError::EnhancementFailed { .. }));
        assert!(!runner.kinds().contains(&StepKind::Compile));
        assert_eq!(fx.temp_entries(), 0);
    }

    #[tokio::test]
    async fn enhancement_without_output_is_fatal() {
        let fx = Fixture::new();
        let runner = FakeRunner::new().on(StepKind::Compile, fake_compile);

        let err = run(&fx, &runner, ModeFlags::default()).await.unwrap_err();
        assert!(matches!(err, DocForgeError::EnhancementFailed { .. }));
        assert!(err.to_string().contains("was not produced"));
    }

    #[tokio::test]
    async fn compilation_failure_cleans_intermediates() {
        let fx = Fixture::new();
        let runner = fx.working_runner().on(StepKind::Compile, |inv| {
            let cwd = inv.cwd.clone().unwrap();
            std::fs::write(cwd.join("paper_enhanced.log"), "! Undefined control sequence").unwrap();
            StepExit::failure(12)
        });

        let err = run(&fx, &runner, ModeFlags::default()).await.unwrap_err();

        assert!(matches!(err, DocForgeError::CompilationFailed { .. }));
        assert!(err.to_string().contains("exit code 12"));
        assert!(!fx.enhanced().exists());
        assert!(!fx.paper_dir.join("paper_enhanced.log").exists());
        assert!(!fx.paper_dir.join("paper.pdf").exists());
        assert_eq!(fx.temp_entries(), 0);
    }

    #[tokio::test]
    async fn missing_pdf_after_compile_is_fatal() {
        let fx = Fixture::new();
        let runner = fx.working_runner().on(StepKind::Compile, |_| StepExit::SUCCESS);

        let err = run(&fx, &runner, ModeFlags::default()).await.unwrap_err();
        assert!(matches!(err, DocForgeError::CompilationFailed { .. }));
        assert!(!fx.paper_dir.join("paper.pdf").exists());
    }

    #[tokio::test]
    async fn stale_pdf_is_not_mistaken_for_fresh_output() {
        let fx = Fixture::new();
        std::fs::write(fx.paper_dir.join("paper_enhanced.pdf"), "stale").unwrap();
        let runner = fx.working_runner().on(StepKind::Compile, |_| StepExit::SUCCESS);

        let err = run(&fx, &runner, ModeFlags::default()).await.unwrap_err();
        assert!(matches!(err, DocForgeError::CompilationFailed { .. }));
        assert!(!fx.paper_dir.join("paper.pdf").exists());
    }

    #[tokio::test]
    async fn dashboard_without_project_config_keeps_artifact() {
        let fx = Fixture::new();
        let runner = fx.working_runner();
        let mode = ModeFlags {
            dashboard: true,
            ..ModeFlags::default()
        };

        let err = run(&fx, &runner, mode).await.unwrap_err();

        assert!(matches!(err, DocForgeError::MissingProjectConfig { .. }));
        assert!(fx.paper_dir.join("paper.pdf").is_file());
        assert!(!runner.kinds().contains(&StepKind::Dashboard));
        assert!(!fx.enhanced().exists());
        assert_eq!(fx.temp_entries(), 0);
    }

    #[tokio::test]
    async fn dashboard_runs_with_project_config() {
        let fx = Fixture::new();
        std::fs::write(fx.proj.join("composable.toml"), "").unwrap();
        let runner = fx.working_runner();
        let mode = ModeFlags {
            dashboard: true,
            ..ModeFlags::default()
        };

        let report = run(&fx, &runner, mode).await.expect("build");

        assert!(report.stages.contains(&Stage::Dashboard));
        let calls = runner.calls.lock().unwrap();
        let dashboard = calls.iter().find(|c| c.kind == StepKind::Dashboard).unwrap();
        assert!(
            dashboard
                .args
                .contains(&fx.proj.join("composable.toml").to_string_lossy().into_owned())
        );
    }

    #[tokio::test]
    async fn dashboard_failure_is_fatal() {
        let fx = Fixture::new();
        std::fs::write(fx.proj.join("composable.toml"), "").unwrap();
        let runner = fx
            .working_runner()
            .on(StepKind::Dashboard, |_| StepExit::failure(1));
        let mode = ModeFlags {
            dashboard: true,
            ..ModeFlags::default()
        };

        let err = run(&fx, &runner, mode).await.unwrap_err();
        assert!(matches!(err, DocForgeError::DashboardFailed { .. }));
    }

    #[tokio::test]
    async fn preview_failure_still_succeeds() {
        let fx = Fixture::new();
        let runner = fx
            .working_runner()
            .on(StepKind::Preview, |_| StepExit::failure(4));
        let mode = ModeFlags {
            preview: true,
            ..ModeFlags::default()
        };

        let report = run(&fx, &runner, mode).await.expect("build");

        assert_eq!(report.stages.last(), Some(&Stage::Done));
        assert!(report.stages.contains(&Stage::Preview));
        assert!(matches!(
            report.warnings[0],
            DocForgeError::PreviewUnavailable { .. }
        ));
    }

    /// Records step callbacks as `+kind` / `-kind`.
    #[derive(Default)]
    struct StepLog(std::sync::Mutex<Vec<String>>);

    impl ProgressReporter for StepLog {
        fn stage(&self, _stage: Stage) {}
        fn step_started(&self, invocation: &StepInvocation) {
            self.0.lock().unwrap().push(format!("+{}", invocation.kind));
        }
        fn step_finished(&self, invocation: &StepInvocation) {
            self.0.lock().unwrap().push(format!("-{}", invocation.kind));
        }
        fn warning(&self, _warning: &DocForgeError) {}
        fn done(&self, _report: &PipelineReport) {}
    }

    #[tokio::test]
    async fn progress_is_told_when_steps_own_the_terminal() {
        let fx = Fixture::new();
        let runner = fx
            .working_runner()
            .on(StepKind::Extract, |_| StepExit::failure(1))
            .on(StepKind::Preview, |_| StepExit::failure(1));
        let config = fx.config();
        let log = StepLog::default();
        let pipeline = Pipeline::new(&runner, &config, &log);
        let request = fx.request(ModeFlags {
            preview: true,
            ..ModeFlags::default()
        });
        let project = pipeline.prepare(&request).unwrap();

        pipeline.run(&request, &project).await.expect("build");

        assert_eq!(
            *log.0.lock().unwrap(),
            vec![
                "+extract", "-extract", "+enhance", "-enhance", "+compile", "-compile",
                "+preview", "-preview"
            ]
        );
    }

    #[tokio::test]
    async fn failing_step_still_reports_its_end() {
        let fx = Fixture::new();
        let runner = fx
            .working_runner()
            .on(StepKind::Compile, |_| StepExit::failure(2));
        let config = fx.config();
        let log = StepLog::default();
        let pipeline = Pipeline::new(&runner, &config, &log);
        let request = fx.request(ModeFlags::default());
        let project = pipeline.prepare(&request).unwrap();

        pipeline.run(&request, &project).await.unwrap_err();

        assert_eq!(log.0.lock().unwrap().last().map(String::as_str), Some("-compile"));
    }

    #[tokio::test]
    async fn custom_output_directory_is_created() {
        let fx = Fixture::new();
        let runner = fx.working_runner();
        let config = fx.config();
        let pipeline = Pipeline::new(&runner, &config, &SilentProgress);
        let output = fx.repo.join("build/out/final.pdf");
        let request = CompilationRequest::new(
            &fx.input,
            Some(&output),
            Engine::Latexmk,
            ModeFlags::default(),
            None,
        )
        .unwrap();

        let project = pipeline.prepare(&request).unwrap();
        let report = pipeline.run(&request, &project).await.expect("build");

        assert_eq!(report.output, output);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "pdf");
    }

    #[tokio::test]
    async fn interrupted_run_releases_everything() {
        let fx = Fixture::new();
        let runner = fx.working_runner().hang_on(StepKind::Compile);
        let config = fx.config();
        let pipeline = Pipeline::new(&runner, &config, &SilentProgress);
        let request = fx.request(ModeFlags::default());
        let project = pipeline.prepare(&request).unwrap();

        let result =
            tokio::time::timeout(Duration::from_millis(50), pipeline.run(&request, &project)).await;

        assert!(result.is_err(), "run should still be hanging");
        assert_eq!(runner.kinds().last(), Some(&StepKind::Compile));
        assert!(!fx.enhanced().exists());
        assert_eq!(fx.temp_entries(), 0);
    }

    #[tokio::test]
    async fn missing_tool_is_reported_before_anything_runs() {
        let fx = Fixture::new();
        let runner = fx.working_runner().without_program("latexmk");

        let err = run(&fx, &runner, ModeFlags::default()).await.unwrap_err();

        match err {
            DocForgeError::MissingDependency { program, step } => {
                assert_eq!(program, "latexmk");
                assert_eq!(step, "compile");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(runner.kinds().is_empty());
        assert_eq!(fx.temp_entries(), 0);
    }

    #[tokio::test]
    async fn unresolved_root_runs_nothing() {
        let fx = Fixture::new();
        std::fs::remove_file(fx.proj.join("manifest.json")).unwrap();
        let runner = fx.working_runner();

        let err = run(&fx, &runner, ModeFlags::default()).await.unwrap_err();

        assert!(matches!(err, DocForgeError::RootNotFound { .. }));
        assert!(runner.kinds().is_empty());
        assert_eq!(fx.temp_entries(), 0);
    }

    #[test]
    fn planned_steps_follow_mode_flags() {
        let fx = Fixture::new();
        let runner = FakeRunner::new();
        let config = fx.config();
        let pipeline = Pipeline::new(&runner, &config, &SilentProgress);

        let request = fx.request(ModeFlags::default());
        let project = pipeline.prepare(&request).unwrap();
        let kinds: Vec<_> = pipeline
            .planned_steps(&request, &project)
            .iter()
            .map(|s| s.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![StepKind::Extract, StepKind::Enhance, StepKind::Compile]
        );

        let request = fx.request(ModeFlags {
            dashboard: true,
            preview: true,
            ..ModeFlags::default()
        });
        let kinds: Vec<_> = pipeline
            .planned_steps(&request, &project)
            .iter()
            .map(|s| s.kind)
            .collect();
        assert_eq!(kinds.len(), 5);
        assert_eq!(kinds[3], StepKind::Dashboard);
        assert_eq!(kinds[4], StepKind::Preview);
        assert!(runner.kinds().is_empty());
        assert_eq!(fx.temp_entries(), 0);
    }
}
