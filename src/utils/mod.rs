use std::future::Future;
use std::time::Duration;

use tokio::time::{self, error::Elapsed};

/// Applies `timeout` when one is given; `None` is the infinite sentinel and
/// runs the future to completion.
pub(crate) async fn maybe_timeout<F: Future>(
    timeout: Option<Duration>,
    fut: F,
) -> Result<F::Output, Elapsed> {
    match timeout {
        Some(duration) => time::timeout(duration, fut).await,
        None => Ok(fut.await),
    }
}
