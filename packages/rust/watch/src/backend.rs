//! Change-detection backends and the order they are tried in.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use docforge_shared::{DocForgeError, Result, WatchBackendChoice, WatchConfig};

use crate::source::{ChangeSource, EventSource, PollSource};

/// A way of noticing that the input document changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Linux inotify through `inotifywait -m`.
    Inotifywait,
    /// `fswatch` (FSEvents, kqueue, inotify...).
    Fswatch,
    /// Modification-time sampling. Always available.
    Poll,
}

impl Backend {
    /// Backends in the order `auto` tries them.
    pub const PRIORITY: [Backend; 3] = [Backend::Inotifywait, Backend::Fswatch, Backend::Poll];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Inotifywait => "inotifywait",
            Self::Fswatch => "fswatch",
            Self::Poll => "poll",
        }
    }

    /// External monitor program, `None` for polling.
    pub fn program(&self) -> Option<&'static str> {
        match self {
            Self::Inotifywait => Some("inotifywait"),
            Self::Fswatch => Some("fswatch"),
            Self::Poll => None,
        }
    }

    /// Arguments for a monitor that prints one changed path per line while
    /// watching `dir`.
    pub(crate) fn monitor_args(&self, dir: &Path) -> Vec<String> {
        let dir = dir.to_string_lossy().into_owned();
        let args: &[&str] = match self {
            Self::Inotifywait => &[
                "-m",
                "-q",
                "-e",
                "close_write",
                "-e",
                "moved_to",
                "-e",
                "create",
                "--format",
                "%w%f",
            ],
            Self::Fswatch => &[
                "--event",
                "Created",
                "--event",
                "Updated",
                "--event",
                "Renamed",
                "--event",
                "MovedTo",
            ],
            Self::Poll => &[],
        };
        args.iter()
            .map(|a| a.to_string())
            .chain(std::iter::once(dir))
            .collect()
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Pick the backend once, before the loop starts.
///
/// `auto` commits to the first available backend in [`Backend::PRIORITY`];
/// an explicit event backend must be installed.
pub fn select_backend(
    choice: WatchBackendChoice,
    is_available: impl Fn(&str) -> bool,
) -> Result<Backend> {
    let available = |backend: Backend| backend.program().is_none_or(&is_available);

    let selected = match choice {
        WatchBackendChoice::Auto => Backend::PRIORITY
            .into_iter()
            .find(|b| {
                let ok = available(*b);
                debug!(backend = %b, available = ok, "probing watch backend");
                ok
            })
            .unwrap_or(Backend::Poll),
        WatchBackendChoice::Poll => Backend::Poll,
        WatchBackendChoice::Inotifywait | WatchBackendChoice::Fswatch => {
            let backend = if choice == WatchBackendChoice::Inotifywait {
                Backend::Inotifywait
            } else {
                Backend::Fswatch
            };
            if !available(backend) {
                return Err(DocForgeError::MissingDependency {
                    program: backend.name().to_string(),
                    step: "watch".into(),
                });
            }
            backend
        }
    };

    info!(backend = %selected, "selected watch backend");
    Ok(selected)
}

/// A started backend.
#[derive(Debug)]
pub enum Detector {
    Events(EventSource),
    Poll(PollSource),
}

impl Detector {
    /// Start watching `target` with `backend`.
    pub fn start(backend: Backend, target: &Path, config: &WatchConfig) -> Result<Self> {
        match backend.program() {
            Some(program) => {
                let dir = target.parent().unwrap_or(Path::new("/"));
                let source =
                    EventSource::spawn(backend, program, &backend.monitor_args(dir), target)?;
                Ok(Self::Events(source))
            }
            None => Ok(Self::Poll(PollSource::new(
                target,
                Duration::from_millis(config.poll_interval_ms),
            ))),
        }
    }
}

impl ChangeSource for Detector {
    fn backend(&self) -> Backend {
        match self {
            Self::Events(s) => s.backend(),
            Self::Poll(s) => s.backend(),
        }
    }

    async fn next_change(&mut self) -> Result<bool> {
        match self {
            Self::Events(s) => s.next_change().await,
            Self::Poll(s) => s.next_change().await,
        }
    }

    fn drain(&mut self) -> usize {
        match self {
            Self::Events(s) => s.drain(),
            Self::Poll(s) => s.drain(),
        }
    }
}
