//! Application settings for docforge.
//!
//! Settings live at `~/.docforge/docforge.toml`.
//! CLI flags override settings values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DocForgeError, Result};

/// Default settings file name.
const CONFIG_FILE_NAME: &str = "docforge.toml";

/// Default settings directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docforge";

// ---------------------------------------------------------------------------
// Settings structs (matching docforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application settings, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Marker file names used for root resolution.
    #[serde(default)]
    pub markers: MarkersConfig,

    /// External step commands.
    #[serde(default)]
    pub steps: StepsConfig,

    /// Compilation defaults.
    #[serde(default)]
    pub compile: CompileConfig,

    /// Watch mode settings.
    #[serde(default)]
    pub watch: WatchConfig,

    /// Temporary resource settings.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// `[markers]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkersConfig {
    /// File marking the repository root.
    #[serde(default = "default_repository_marker")]
    pub repository: String,

    /// File marking the project root. Also the config handed to the
    /// extraction and enhancement steps when `--config` is absent.
    #[serde(default = "default_project_marker")]
    pub project: String,

    /// Project configuration required by the dashboard stage.
    #[serde(default = "default_project_config")]
    pub project_config: String,
}

impl Default for MarkersConfig {
    fn default() -> Self {
        Self {
            repository: default_repository_marker(),
            project: default_project_marker(),
            project_config: default_project_config(),
        }
    }
}

fn default_repository_marker() -> String {
    "flake.nix".into()
}
fn default_project_marker() -> String {
    "manifest.json".into()
}
fn default_project_config() -> String {
    "composable.toml".into()
}

/// A program plus argument templates.
///
/// Arguments may contain `{input}`, `{output}`, `{config}`, `{project_root}`,
/// `{repo_root}`, `{project_config}` and `{workdir}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl StepCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// `[steps]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepsConfig {
    /// Metadata/value extraction (recoverable).
    #[serde(default = "default_extract")]
    pub extract: StepCommand,

    /// Document enhancement (fatal).
    #[serde(default = "default_enhance")]
    pub enhance: StepCommand,

    /// Dashboard generation (fatal, only with `--dashboard`).
    #[serde(default = "default_dashboard")]
    pub dashboard: StepCommand,
}

impl Default for StepsConfig {
    fn default() -> Self {
        Self {
            extract: default_extract(),
            enhance: default_enhance(),
            dashboard: default_dashboard(),
        }
    }
}

fn default_extract() -> StepCommand {
    StepCommand::new(
        "python3",
        &[
            "{repo_root}/scripts/extract-values.py",
            "--project-root",
            "{project_root}",
            "--config",
            "{config}",
        ],
    )
}
fn default_enhance() -> StepCommand {
    StepCommand::new(
        "python3",
        &[
            "{repo_root}/scripts/process-metadata.py",
            "{input}",
            "--output",
            "{output}",
            "--project-root",
            "{project_root}",
            "--config",
            "{config}",
        ],
    )
}
fn default_dashboard() -> StepCommand {
    StepCommand::new(
        "python3",
        &[
            "{repo_root}/scripts/generate-dashboard.py",
            "--project-root",
            "{project_root}",
            "--config",
            "{project_config}",
        ],
    )
}

/// `[compile]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Engine used when `--engine` is not given.
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Suffix appended to the input stem to name the enhanced document.
    #[serde(default = "default_enhanced_suffix")]
    pub enhanced_suffix: String,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            enhanced_suffix: default_enhanced_suffix(),
        }
    }
}

fn default_engine() -> String {
    "latexmk".into()
}
fn default_enhanced_suffix() -> String {
    "_enhanced".into()
}

/// Which change-detection backend watch mode uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchBackendChoice {
    /// Probe event backends in priority order, fall back to polling.
    #[default]
    Auto,
    Inotifywait,
    Fswatch,
    Poll,
}

/// `[watch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub backend: WatchBackendChoice,

    /// Sampling interval for the polling backend.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Quiet period after a change before queued events are discarded.
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            backend: WatchBackendChoice::default(),
            poll_interval_ms: default_poll_interval(),
            debounce_ms: default_debounce(),
        }
    }
}

fn default_poll_interval() -> u64 {
    2000
}
fn default_debounce() -> u64 {
    150
}

/// `[cleanup]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Parent directory for per-run temporary directories (system temp dir
    /// when unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_root: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Settings loading
// ---------------------------------------------------------------------------

/// Get the path to the settings directory (`~/.docforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocForgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the settings file (`~/.docforge/docforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the settings from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "settings file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the settings from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocForgeError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        DocForgeError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the settings directory and write a default settings file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let path = config_file_path()?;
    init_config_at(&path)?;
    Ok(path)
}

/// Write a default settings file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| DocForgeError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocForgeError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| DocForgeError::io(path, e))?;
    tracing::info!(?path, "created default settings file");

    Ok(())
}
