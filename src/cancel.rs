//! Cooperative cancellation for generation calls
//!
//! A call receives one [`CancellationToken`] owned by the caller. Backends
//! check it at every suspension point; the helpers here make those
//! suspension points abortable. Related calls can share a token, or a
//! parent token's `child_token()`, to be cancelled together.

use std::future::Future;
use std::time::Duration;
use log::trace;
use tokio_util::sync::CancellationToken;
use crate::error::{Error, Result};

/// Fail fast when the caller has already given up
pub fn ensure_active(cancel: &CancellationToken) -> Result<()>
{   if cancel.is_cancelled()
    {   trace!("Cancellation observed");
        Err(Error::Cancelled)
    } else
    {   Ok(())
    }
}

/// Interruptible delay.
/// Returns `Cancelled` as soon as the token fires rather than after `delay`.
pub async fn pace(
  delay: Duration
, cancel: &CancellationToken
) -> Result<()>
{   tokio::select!
    {   biased;
        _ = cancel.cancelled() => {
          trace!("Pacing interrupted by cancellation");
          Err(Error::Cancelled)
        }
      , _ = tokio::time::sleep(delay) => Ok(())
    }
}

/// Race a future against the token; the future is dropped on cancellation
pub async fn until_cancelled<F>(
  cancel: &CancellationToken
, fut: F
) -> Result<F::Output>
where
  F: Future
{   tokio::select!
    {   biased;
        _ = cancel.cancelled() => Err(Error::Cancelled)
      , output = fut => Ok(output)
    }
}
