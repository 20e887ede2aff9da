//! Shared utility functions.

use std::time::Duration;

use tokio::task::spawn_blocking;
use tokio::time::timeout;

use crate::{Error, Result};

/// Run a blocking closure on the blocking pool.
pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    blocking_within(None, f).await
}

/// Like [`blocking`], giving up after `limit` when one is set.
///
/// The closure keeps running on its thread after a timeout; only the wait
/// is abandoned.
pub async fn blocking_within<F, T>(limit: Option<Duration>, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let handle = spawn_blocking(f);
    let joined = match limit {
        Some(limit) => timeout(limit, handle)
            .await
            .map_err(|_| Error::Timeout(limit))?,
        None => handle.await,
    };
    joined.map_err(|e| Error::TaskJoin(e.to_string()))?
}

/// Collapse every whitespace run to a single space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Shorten `text` to at most `max_chars` characters for log fields.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}
