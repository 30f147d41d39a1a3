//! Removes the startup taint from a Node and stamps its completion record.
//!
//! The removal is a read-modify-write against the k8s API: the node is re-fetched on every attempt and
//! written back with its `resourceVersion`, so a concurrent writer causes a conflict rather than a lost
//! update. Conflicts and other transient failures are retried with bounded exponential backoff.
use super::error::{self, Result};
use models::node::{StartupClientError, StartupClusterClient, StartupNodeExt};

use chrono::Utc;
use snafu::ResultExt;
use std::future::Future;
use tokio::time::Duration;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{event, instrument, Level};

// These values configure how long to delay between update attempts.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(10);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(1);
const NUM_RETRIES: usize = 4;

/// The backoff used between attempts to update a Node.
pub fn default_backoff() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(RETRY_BASE_DELAY.as_millis() as u64)
        .max_delay(RETRY_MAX_DELAY)
        .map(jitter)
        .take(NUM_RETRIES)
}

/// Runs `attempt` until it succeeds, fails with an error that isn't retryable, or `strategy` runs out
/// of delays.
///
/// Each call to `attempt` must perform a complete read-modify-write, so that a retry after a conflict
/// starts from the object's latest version.
pub async fn retry_on_conflict<S, A, F, T>(
    strategy: S,
    attempt: A,
) -> std::result::Result<T, StartupClientError>
where
    S: IntoIterator<Item = Duration>,
    A: FnMut() -> F,
    F: Future<Output = std::result::Result<T, StartupClientError>>,
{
    RetryIf::spawn(strategy, attempt, |err: &StartupClientError| {
        let retry = err.is_retryable();
        if retry {
            event!(Level::DEBUG, error = %err, "Retrying node update.");
        }
        retry
    })
    .await
}

/// The result of a successful call to `remove_startup_taint`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaintRemoval {
    /// The taint was removed and the completion record written.
    Removed,
    /// The current version of the node had no startup taint. Nothing was written.
    AlreadyAbsent,
}

/// Removes the startup taint from the named node and records when it happened.
///
/// Safe to call speculatively: if the taint is already gone, no write is issued and any existing
/// completion record is left untouched.
#[instrument(skip(client), err)]
pub async fn remove_startup_taint<T: StartupClusterClient>(
    client: &T,
    node_name: &str,
) -> Result<TaintRemoval> {
    remove_startup_taint_with_backoff(client, node_name, default_backoff).await
}

pub(crate) async fn remove_startup_taint_with_backoff<T, S, I>(
    client: &T,
    node_name: &str,
    strategy: S,
) -> Result<TaintRemoval>
where
    T: StartupClusterClient,
    S: FnOnce() -> I,
    I: IntoIterator<Item = Duration>,
{
    retry_on_conflict(strategy(), move || async move {
        let mut node = client.get_node(node_name).await?;
        if !node.remove_startup_taint() {
            return Ok(TaintRemoval::AlreadyAbsent);
        }
        node.mark_startup_complete(Utc::now());
        client.replace_node(&node).await?;
        Ok::<_, StartupClientError>(TaintRemoval::Removed)
    })
    .await
    .context(error::RemoveStartupTaintSnafu { node_name })
}
