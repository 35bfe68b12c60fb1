//! Watch mode: rebuild whenever the input document changes.
//!
//! This crate provides:
//! - [`backend`] — the backends (`inotifywait`, `fswatch`, polling) and the
//!   order they are tried in
//! - [`source`] — the [`ChangeSource`] trait and its implementations
//! - [`watch_loop`] — the sequential rebuild loop
//!
//! The loop never runs two builds at once. Changes that arrive while a build
//! is running are queued by the source and coalesced into a single rebuild
//! once the build finishes.

pub mod backend;
pub mod source;

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{error, info, instrument};

use docforge_shared::Result;

pub use backend::{Backend, Detector, select_backend};
pub use source::{ChangeSource, EventSource, PollSource};

/// Counters for a finished watch session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatchSummary {
    /// Builds started, including the initial one.
    pub builds: usize,
    /// Builds that returned an error.
    pub failures: usize,
    /// Change events folded into another rebuild.
    pub coalesced: usize,
}

/// Run `rebuild` once, then again after every change reported by `source`.
///
/// After a change the loop waits `debounce`, drops every other pending
/// change, and runs exactly one rebuild. A failed rebuild is logged and the
/// loop keeps watching. Returns when the source is exhausted; in practice
/// that only happens in tests, and the CLI ends the loop by dropping it on
/// a termination signal.
#[instrument(skip_all, fields(backend = %source.backend()))]
pub async fn watch_loop<S, F, Fut, T, E>(
    source: &mut S,
    debounce: Duration,
    mut rebuild: F,
) -> Result<WatchSummary>
where
    S: ChangeSource,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let mut summary = WatchSummary::default();

    info!("initial build");
    build(&mut rebuild, &mut summary).await;

    while source.next_change().await? {
        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
        }
        let coalesced = source.drain();
        summary.coalesced += coalesced;
        info!(coalesced, "change detected, rebuilding");
        build(&mut rebuild, &mut summary).await;
    }

    info!(builds = summary.builds, "change source exhausted");
    Ok(summary)
}

async fn build<F, Fut, T, E>(rebuild: &mut F, summary: &mut WatchSummary)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    summary.builds += 1;
    if let Err(e) = rebuild().await {
        summary.failures += 1;
        error!("build failed: {e}; waiting for the next change");
    }
}
