//! The generation backend contract and its streaming harness
//!
//! Any text generator (an in-process model, a proprietary HTTP service, a
//! vendor API) plugs in by implementing [`TextCompletion`]. Callers get two
//! call modes with the same inputs:
//!
//! * [`TextCompletion::complete`] resolves to the whole text at once.
//! * [`TextCompletion::complete_stream`] yields the text chunk by chunk as
//!   the backend produces it.
//!
//! Both take a [`CancellationToken`] owned by the caller. Streaming goes
//! through [`CompletionStream`], which enforces the cancellation and
//! termination rules even when a backend is careless about them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use async_trait::async_trait;
use futures_util::stream::{FusedStream, Stream, StreamExt};
use log::{debug, trace};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use crate::error::{Error, Result, StreamFailure};
use crate::request::{GeneratedChunk, GenerationRequestSettings};

/// Raw chunk sequence produced by a backend.
///
/// Finite on success. An `Err` item ends the generation; the harness
/// ignores anything after it.
pub type ChunkStream<'a>
  = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'a>>;

/// A pluggable text generator.
///
/// Implementations must be safe to call concurrently; one that wraps a
/// non-reentrant resource serializes internally (see
/// [`crate::serial::SerialBackend`]). Each implementation documents whether
/// it honours or ignores every settings field, and whether it clamps
/// values (the default here is to forward them as validated).
#[async_trait]
pub trait TextCompletion: Send + Sync
{   /// Generate the complete text for `prompt`.
    ///
    /// Returns only once generation finished or was cancelled. Fails with
    /// exactly one of `Cancelled`, `BackendUnavailable` or
    /// `InvalidSettings`; never a silently truncated string.
    async fn complete(
      &self
    , prompt: &str
    , settings: &GenerationRequestSettings
    , cancel: &CancellationToken
    ) -> Result<String>;

    /// Backend hook behind [`TextCompletion::complete_stream`].
    ///
    /// Must be lazy: no work starts until the stream is polled. Every
    /// wait between chunks must observe `cancel`.
    fn stream_chunks<'a>(
      &'a self
    , prompt: &'a str
    , settings: &'a GenerationRequestSettings
    , cancel: &'a CancellationToken
    ) -> ChunkStream<'a>;

    /// Generate `prompt` incrementally.
    ///
    /// Chunks arrive in generation order. The stream either ends normally
    /// or yields exactly one [`StreamFailure`] and then ends.
    fn complete_stream<'a>(
      &'a self
    , prompt: &'a str
    , settings: &'a GenerationRequestSettings
    , cancel: &'a CancellationToken
    ) -> CompletionStream<'a>
    {   CompletionStream::new(
          self.stream_chunks(prompt, settings, cancel)
        , cancel
        )
    }
}

#[async_trait]
impl<T> TextCompletion for Arc<T>
where
  T: TextCompletion + ?Sized
{   async fn complete(
      &self
    , prompt: &str
    , settings: &GenerationRequestSettings
    , cancel: &CancellationToken
    ) -> Result<String>
    {   (**self).complete(prompt, settings, cancel).await
    }

    fn stream_chunks<'a>(
      &'a self
    , prompt: &'a str
    , settings: &'a GenerationRequestSettings
    , cancel: &'a CancellationToken
    ) -> ChunkStream<'a>
    {   (**self).stream_chunks(prompt, settings, cancel)
    }
}

/// Caller-facing side of a streaming call.
///
/// * Cancellation is checked before every pull and also wakes the stream
///   while the backend is suspended; the backend stream is dropped and the
///   caller sees `Cancelled`.
/// * A backend that simply stops after cancellation is reported as
///   `Cancelled`, not as a short success.
/// * The first failure is the last item. A finished stream stays finished
///   and never replays chunks; a new call is needed to generate again.
pub struct CompletionStream<'a>
{   inner: Option<ChunkStream<'a>>
  , cancel: CancellationToken
  , cancelled: Pin<Box<WaitForCancellationFutureOwned>>
  , delivered: usize
}

impl<'a> CompletionStream<'a>
{   pub fn new(
      inner: ChunkStream<'a>
    , cancel: &CancellationToken
    ) -> Self
    {   CompletionStream
        {   inner: Some(inner)
          , cancel: cancel.clone()
          , cancelled: Box::pin(cancel.clone().cancelled_owned())
          , delivered: 0
        }
    }

    /// Chunks handed out so far
    pub fn delivered(&self) -> usize
    {   self.delivered
    }

    /// Drain the stream into one string.
    /// Partial output is discarded on failure.
    pub async fn collect_text(mut self)
      -> std::result::Result<String, StreamFailure>
    {   let mut text = String::new();
        while let Some(chunk) = self.next().await
        {   text.push_str(&chunk?.text);
        }
        Ok(text)
    }

    fn fail(&mut self, error: Error)
      -> Poll<Option<std::result::Result<GeneratedChunk, StreamFailure>>>
    {   self.inner = None;
        debug!(
          "Stream ended with failure after {} chunks: {}",
          self.delivered, error
        );
        Poll::Ready(Some(Err(StreamFailure::new(self.delivered, error))))
    }
}

impl Stream for CompletionStream<'_>
{   type Item = std::result::Result<GeneratedChunk, StreamFailure>;

    fn poll_next(
      self: Pin<&mut Self>
    , cx: &mut Context<'_>
    ) -> Poll<Option<Self::Item>>
    {   let this = self.get_mut();
        if this.inner.is_none()
        {   return Poll::Ready(None);
        }
        if this.cancelled.as_mut().poll(cx).is_ready()
        {   return this.fail(Error::Cancelled);
        }

        let polled = match this.inner.as_mut()
        {   Some(inner) => inner.as_mut().poll_next(cx)
          , None => return Poll::Ready(None)
        };

        match polled
        {   Poll::Pending => Poll::Pending
          , Poll::Ready(Some(Ok(text))) => {
              let chunk = GeneratedChunk
              {   index: this.delivered
                , text
              };
              this.delivered += 1;
              trace!("Chunk {} ready", chunk.index);
              Poll::Ready(Some(Ok(chunk)))
            }
          , Poll::Ready(Some(Err(error))) => this.fail(error)
          , Poll::Ready(None) => {
              if this.cancel.is_cancelled()
              {   return this.fail(Error::Cancelled);
              }
              this.inner = None;
              debug!("Stream finished with {} chunks", this.delivered);
              Poll::Ready(None)
            }
        }
    }
}

impl FusedStream for CompletionStream<'_>
{   fn is_terminated(&self) -> bool
    {   self.inner.is_none()
    }
}
