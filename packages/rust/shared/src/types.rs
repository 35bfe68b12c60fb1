//! Core domain types for a docforge build.

use std::path::{Path, PathBuf};

use crate::error::{DocForgeError, Result};

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Compilation engine identifier.
///
/// Known engines get their usual non-interactive flags; any other name is
/// run as `<name> <file>`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Engine {
    #[default]
    Latexmk,
    Pdflatex,
    Xelatex,
    Lualatex,
    Tectonic,
    Other(String),
}

impl Engine {
    /// Executable to spawn.
    pub fn program(&self) -> &str {
        match self {
            Self::Latexmk => "latexmk",
            Self::Pdflatex => "pdflatex",
            Self::Xelatex => "xelatex",
            Self::Lualatex => "lualatex",
            Self::Tectonic => "tectonic",
            Self::Other(name) => name,
        }
    }

    /// Arguments for compiling `file_name` from within its own directory.
    pub fn args(&self, file_name: &str) -> Vec<String> {
        let flags: &[&str] = match self {
            Self::Latexmk => &["-pdf", "-interaction=nonstopmode", "-halt-on-error"],
            Self::Pdflatex | Self::Xelatex | Self::Lualatex => {
                &["-interaction=nonstopmode", "-halt-on-error"]
            }
            Self::Tectonic | Self::Other(_) => &[],
        };
        flags
            .iter()
            .map(|f| f.to_string())
            .chain(std::iter::once(file_name.to_string()))
            .collect()
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.program())
    }
}

impl std::str::FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let name = s.trim();
        Ok(match name.to_ascii_lowercase().as_str() {
            "" => return Err("engine name must not be empty".into()),
            "latexmk" => Self::Latexmk,
            "pdflatex" => Self::Pdflatex,
            "xelatex" => Self::Xelatex,
            "lualatex" => Self::Lualatex,
            "tectonic" => Self::Tectonic,
            _ => Self::Other(name.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// CompilationRequest
// ---------------------------------------------------------------------------

/// Mode flags selected on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeFlags {
    pub watch: bool,
    pub preview: bool,
    pub dashboard: bool,
    /// Print the planned step invocations instead of running them.
    pub dry_run: bool,
}

/// A fully resolved build request. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct CompilationRequest {
    /// Absolute path of the source document.
    pub input: PathBuf,
    /// Absolute path of the final PDF.
    pub output: PathBuf,
    /// Selected compilation engine.
    pub engine: Engine,
    /// Mode flags.
    pub mode: ModeFlags,
    /// Absolute path of an explicitly supplied project config file.
    pub config: Option<PathBuf>,
}

impl CompilationRequest {
    /// Build a request, making every path absolute.
    ///
    /// Fails with [`DocForgeError::InputNotFound`] when `input` is not a file.
    /// The input, and the config file when it exists, are canonicalized so
    /// that root resolution only ever ascends through real ancestors. The
    /// output defaults to the input's sibling with a `.pdf` extension.
    pub fn new(
        input: &Path,
        output: Option<&Path>,
        engine: Engine,
        mode: ModeFlags,
        config: Option<&Path>,
    ) -> Result<Self> {
        let input = absolute(input)?;
        if !input.is_file() {
            return Err(DocForgeError::InputNotFound { path: input });
        }
        let input = canonical(&input)?;

        let output = match output {
            Some(p) => absolute(p)?,
            None => input.with_extension("pdf"),
        };
        let config = config
            .map(|p| {
                let p = absolute(p)?;
                // a missing config is reported by the resolver
                if p.exists() { canonical(&p) } else { Ok(p) }
            })
            .transpose()?;

        Ok(Self {
            input,
            output,
            engine,
            mode,
            config,
        })
    }

    /// Directory containing the input document.
    pub fn input_dir(&self) -> &Path {
        self.input.parent().unwrap_or(Path::new("/"))
    }

    /// File stem of the input document.
    pub fn input_stem(&self) -> String {
        self.input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Path of the enhanced intermediate: `<stem><suffix>.<ext>` beside the input.
    pub fn enhanced_path(&self, suffix: &str) -> PathBuf {
        let name = match self.input.extension() {
            Some(ext) => format!("{}{suffix}.{}", self.input_stem(), ext.to_string_lossy()),
            None => format!("{}{suffix}", self.input_stem()),
        };
        self.input_dir().join(name)
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| DocForgeError::io(path, e))
}

fn canonical(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| DocForgeError::io(path, e))
}

// ---------------------------------------------------------------------------
// ProjectContext
// ---------------------------------------------------------------------------

/// Roots resolved once per invocation; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectContext {
    /// Nearest ancestor containing the repository marker.
    pub repository_root: PathBuf,
    /// Nearest ancestor containing the project marker, or the directory of
    /// the explicit config file.
    pub project_root: PathBuf,
    /// Config file handed to the extraction and enhancement steps.
    pub config_path: PathBuf,
}
