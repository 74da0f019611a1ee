//! Retry and failover layered on top of any backend
//!
//! Backends never retry on their own. These wrappers add that policy
//! from the outside and implement [`TextCompletion`] themselves, so they
//! nest: a failover chain of retrying backends is just another backend.
//! Only `BackendUnavailable` triggers another attempt; `Cancelled` and
//! `InvalidSettings` pass straight through. A stream is only retried or
//! failed over while nothing has been delivered from it yet.

use std::sync::Arc;
use std::time::Duration;
use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, trace, warn};
use tokio_util::sync::CancellationToken;
use crate::backend::{ChunkStream, TextCompletion};
use crate::cancel;
use crate::config::FailoverConfig;
use crate::error::{Error, Result};
use crate::request::GenerationRequestSettings;

pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;

/// Longest single wait between attempts
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// How often, and how patiently, an unavailable backend is re-tried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy
{   pub max_retries: usize
  , pub backoff_multiplier: f32
  , pub initial_backoff: Duration
}

impl RetryPolicy
{   pub fn new(
      max_retries: usize
    , backoff_multiplier: f32
    , initial_backoff_ms: u64
    ) -> Self
    {   RetryPolicy
        {   max_retries
          , backoff_multiplier
          , initial_backoff: Duration::from_millis(initial_backoff_ms)
        }
    }

    /// Single attempt, no backoff
    pub fn none() -> Self
    {   RetryPolicy::new(0, 1.0, 0)
    }

    pub fn from_config(config: &FailoverConfig) -> Self
    {   if !config.enabled
        {   return RetryPolicy::none();
        }
        RetryPolicy::new(
          config.max_retries
        , config.backoff_multiplier
        , config.initial_backoff_ms
        )
    }

    /// Wait before retry number `attempt` (zero-based):
    /// `initial_backoff * multiplier^attempt`, capped at [`MAX_BACKOFF`]
    pub fn backoff_for_attempt(&self, attempt: usize) -> Duration
    {   let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.initial_backoff.as_millis() as f64
          * f64::from(self.backoff_multiplier).powi(exponent);
        let capped = millis.min(MAX_BACKOFF.as_millis() as f64);
        trace!("Backoff for attempt {}: {} ms", attempt, capped);
        // NaN and negative products saturate to zero
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy
{   fn default() -> Self
    {   RetryPolicy::new(
          DEFAULT_MAX_RETRIES
        , DEFAULT_BACKOFF_MULTIPLIER
        , DEFAULT_INITIAL_BACKOFF_MS
        )
    }
}

// ===== Retrying Backend =====

/// Re-issues calls that failed with `BackendUnavailable`.
/// Backoff waits are cancellable.
pub struct RetryingBackend<B>
{   inner: B
  , policy: RetryPolicy
}

impl<B> RetryingBackend<B>
where
  B: TextCompletion
{   pub fn new(inner: B, policy: RetryPolicy) -> Self
    {   RetryingBackend
        {   inner
          , policy
        }
    }

    pub fn policy(&self) -> &RetryPolicy
    {   &self.policy
    }

    pub fn inner(&self) -> &B
    {   &self.inner
    }

    fn should_retry(&self, error: &Error, attempt: usize) -> bool
    {   error.is_retryable() && attempt < self.policy.max_retries
    }
}

#[async_trait]
impl<B> TextCompletion for RetryingBackend<B>
where
  B: TextCompletion
{   async fn complete(
      &self
    , prompt: &str
    , settings: &GenerationRequestSettings
    , cancel: &CancellationToken
    ) -> Result<String>
    {   let mut attempt = 0;
        loop
        {   match self.inner.complete(prompt, settings, cancel).await
            {   Err(error) if self.should_retry(&error, attempt) => {
                  let backoff = self.policy.backoff_for_attempt(attempt);
                  warn!(
                    "Attempt {} failed: {}; retrying in {:?}",
                    attempt + 1, error, backoff
                  );
                  cancel::pace(backoff, cancel).await?;
                  attempt += 1;
                }
              , outcome => return outcome
            }
        }
    }

    fn stream_chunks<'a>(
      &'a self
    , prompt: &'a str
    , settings: &'a GenerationRequestSettings
    , cancel: &'a CancellationToken
    ) -> ChunkStream<'a>
    {   Box::pin(stream!
        {   let mut attempt = 0;
            loop
            {   let mut chunks
                  = self.inner.stream_chunks(prompt, settings, cancel);
                let mut delivered = 0usize;
                let mut retry_error = None;

                while let Some(item) = chunks.next().await
                {   match item
                    {   Ok(text) => {
                          delivered += 1;
                          yield Ok(text);
                        }
                      , Err(error)
                          if delivered == 0
                            && self.should_retry(&error, attempt) => {
                          retry_error = Some(error);
                          break;
                        }
                      , Err(error) => {
                          yield Err(error);
                          return;
                        }
                    }
                }

                let error = match retry_error
                {   Some(error) => error
                  , None => return
                };
                let backoff = self.policy.backoff_for_attempt(attempt);
                warn!(
                  "Stream attempt {} failed: {}; retrying in {:?}",
                  attempt + 1, error, backoff
                );
                if let Err(error) = cancel::pace(backoff, cancel).await
                {   yield Err(error);
                    return;
                }
                attempt += 1;
            }
        })
    }
}

// ===== Failover Backend =====

/// Ordered list of backends.
/// Moves to the next one when the current one is unavailable.
#[derive(Clone, Default)]
pub struct FailoverBackend
{   backends: Vec<(String, Arc<dyn TextCompletion>)>
}

impl FailoverBackend
{   pub fn new() -> Self
    {   FailoverBackend::default()
    }

    /// Append a backend to the end of the order
    pub fn with_backend(
      mut self
    , name: impl Into<String>
    , backend: Arc<dyn TextCompletion>
    ) -> Self
    {   self.backends.push((name.into(), backend));
        self
    }

    pub fn names(&self) -> Vec<&str>
    {   self.backends.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize
    {   self.backends.len()
    }

    pub fn is_empty(&self) -> bool
    {   self.backends.is_empty()
    }
}

fn exhausted(last_error: Option<Error>) -> Error
{   last_error.unwrap_or_else(|| {
      Error::BackendUnavailable("no backends configured".to_string())
    })
}

#[async_trait]
impl TextCompletion for FailoverBackend
{   async fn complete(
      &self
    , prompt: &str
    , settings: &GenerationRequestSettings
    , cancel: &CancellationToken
    ) -> Result<String>
    {   let mut last_error = None;
        for (name, backend) in &self.backends
        {   match backend.complete(prompt, settings, cancel).await
            {   Err(error) if error.is_retryable() => {
                  warn!("Backend {} unavailable: {}", name, error);
                  last_error = Some(error);
                }
              , outcome => {
                  debug!("Backend {} answered", name);
                  return outcome;
                }
            }
        }
        Err(exhausted(last_error))
    }

    fn stream_chunks<'a>(
      &'a self
    , prompt: &'a str
    , settings: &'a GenerationRequestSettings
    , cancel: &'a CancellationToken
    ) -> ChunkStream<'a>
    {   Box::pin(stream!
        {   let mut last_error = None;
            for (name, backend) in &self.backends
            {   let mut chunks = backend.stream_chunks(prompt, settings, cancel);
                let mut delivered = 0usize;
                let mut failed_over = false;

                while let Some(item) = chunks.next().await
                {   match item
                    {   Ok(text) => {
                          delivered += 1;
                          yield Ok(text);
                        }
                      , Err(error) if delivered == 0 && error.is_retryable() => {
                          warn!("Backend {} unavailable: {}", name, error);
                          last_error = Some(error);
                          failed_over = true;
                          break;
                        }
                      , Err(error) => {
                          yield Err(error);
                          return;
                        }
                    }
                }

                if !failed_over
                {   debug!("Backend {} streamed {} chunks", name, delivered);
                    return;
                }
            }
            yield Err(exhausted(last_error));
        })
    }
}
