//! Change sources: event streams from a monitor process, and polling.

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use docforge_shared::{DocForgeError, Result};

use crate::backend::Backend;

/// Something that reports when the watched document changes.
pub trait ChangeSource {
    fn backend(&self) -> Backend;

    /// Wait for the next change. `Ok(false)` means the source has nothing
    /// more to report.
    fn next_change(&mut self) -> impl Future<Output = Result<bool>>;

    /// Discard changes that are already pending and return how many there
    /// were.
    fn drain(&mut self) -> usize;
}

// ---------------------------------------------------------------------------
// Event stream
// ---------------------------------------------------------------------------

/// Changes reported by a long-running monitor process (`inotifywait -m`,
/// `fswatch`). Events queue up in a channel while a build runs.
#[derive(Debug)]
pub struct EventSource {
    backend: Backend,
    events: mpsc::UnboundedReceiver<()>,
    monitor: Option<Child>,
}

impl EventSource {
    /// Spawn `program` and turn every output line naming `target` into an
    /// event. The monitor is killed when the source is dropped.
    pub(crate) fn spawn(
        backend: Backend,
        program: &str,
        args: &[String],
        target: &Path,
    ) -> Result<Self> {
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DocForgeError::Watch(format!("failed to start {program}: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DocForgeError::Watch(format!("failed to capture {program} stdout")))?;

        let target_name: OsString = target.file_name().unwrap_or_default().to_os_string();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                trace!(%line, "monitor output");
                if Path::new(line.trim_end()).file_name() == Some(target_name.as_os_str())
                    && tx.send(()).is_err()
                {
                    break;
                }
            }
        });

        debug!(%backend, program, "started change monitor");
        Ok(Self {
            backend,
            events: rx,
            monitor: Some(child),
        })
    }

    /// A source fed directly through a channel, with no monitor process.
    pub fn from_channel(backend: Backend, events: mpsc::UnboundedReceiver<()>) -> Self {
        Self {
            backend,
            events,
            monitor: None,
        }
    }
}

impl ChangeSource for EventSource {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn next_change(&mut self) -> Result<bool> {
        match self.events.recv().await {
            Some(()) => Ok(true),
            None if self.monitor.is_some() => Err(DocForgeError::Watch(format!(
                "{} stopped reporting changes",
                self.backend
            ))),
            None => Ok(false),
        }
    }

    fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.events.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Samples the document's modification time every `interval`.
#[derive(Debug)]
pub struct PollSource {
    path: PathBuf,
    interval: Duration,
    last: Option<SystemTime>,
}

impl PollSource {
    /// Start from the document's current modification time.
    pub fn new(path: &Path, interval: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            interval,
            last: modified(path),
        }
    }

    /// Record the current mtime; true if it differs from the last one seen.
    fn sample(&mut self) -> bool {
        match modified(&self.path) {
            // a missing file is usually an editor mid-save
            None => false,
            Some(current) if Some(current) == self.last => false,
            Some(current) => {
                self.last = Some(current);
                true
            }
        }
    }
}

impl ChangeSource for PollSource {
    fn backend(&self) -> Backend {
        Backend::Poll
    }

    async fn next_change(&mut self) -> Result<bool> {
        loop {
            tokio::time::sleep(self.interval).await;
            if self.sample() {
                return Ok(true);
            }
        }
    }

    fn drain(&mut self) -> usize {
        usize::from(self.sample())
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
