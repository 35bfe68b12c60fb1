//! Build orchestration for docforge.
//!
//! This crate resolves project boundaries and sequences the external steps
//! of a build:
//! - [`resolver`] — ascends the filesystem to the repository and project roots
//! - [`step`] — runs external programs under a fatal/recoverable policy
//! - [`cleanup`] — scoped ownership of a run's temporary resources
//! - [`pipeline`] — the stage sequence from extraction to preview

pub mod cleanup;
pub mod pipeline;
pub mod resolver;
pub mod step;

pub use cleanup::CleanupRegistry;
pub use pipeline::{Pipeline, PipelineReport, ProgressReporter, SilentProgress, Stage};
pub use resolver::{find_root, resolve_project};
pub use step::{
    ProcessRunner, StepError, StepExit, StepInvocation, StepKind, StepOutcome, StepPolicy,
    StepRunner, run_step,
};
