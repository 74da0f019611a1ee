//! Test backends with scripted, misbehaving or instrumented behavior
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_stream::stream;
use async_trait::async_trait;
use llmport::cancel;
use llmport::{
  CancellationToken
, ChunkStream
, Error
, GenerationRequestSettings
, Result
, TextCompletion
};

pub const PROMPT: &str = "Write one paragraph why AI is awesome";

/// Settings used by the documented scenarios
pub fn scenario_settings() -> GenerationRequestSettings
{   GenerationRequestSettings::builder()
      .max_output_units(100)
      .temperature(1.0)
      .nucleus_probability(0.5)
      .frequency_penalty(0.0)
      .presence_penalty(0.0)
      .build()
      .expect("scenario settings are valid")
}

pub fn chunks(words: &[&str]) -> Vec<String>
{   words.iter().map(|w| w.to_string()).collect()
}

/// Emits fixed chunks with a cancellable delay, then optionally fails
#[derive(Debug, Clone)]
pub struct ScriptedBackend
{   pub chunks: Vec<String>
  , pub delay: Duration
  , pub fail_with: Option<Error>
  , pub calls: Arc<AtomicUsize>
}

impl ScriptedBackend
{   pub fn new(chunks: Vec<String>) -> Self
    {   ScriptedBackend
        {   chunks
          , delay: Duration::from_millis(10)
          , fail_with: None
          , calls: Arc::new(AtomicUsize::new(0))
        }
    }

    pub fn failing_with(mut self, error: Error) -> Self
    {   self.fail_with = Some(error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self
    {   self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize
    {   self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextCompletion for ScriptedBackend
{   async fn complete(
      &self
    , _prompt: &str
    , _settings: &GenerationRequestSettings
    , cancel: &CancellationToken
    ) -> Result<String>
    {   self.calls.fetch_add(1, Ordering::SeqCst);
        cancel::pace(self.delay, cancel).await?;
        match &self.fail_with
        {   Some(error) => Err(error.clone())
          , None => Ok(self.chunks.concat())
        }
    }

    fn stream_chunks<'a>(
      &'a self
    , _prompt: &'a str
    , _settings: &'a GenerationRequestSettings
    , cancel: &'a CancellationToken
    ) -> ChunkStream<'a>
    {   Box::pin(stream!
        {   self.calls.fetch_add(1, Ordering::SeqCst);
            for chunk in &self.chunks
            {   if let Err(error) = cancel::pace(self.delay, cancel).await
                {   yield Err(error);
                    return;
                }
                yield Ok(chunk.clone());
            }
            if let Some(error) = &self.fail_with
            {   yield Err(error.clone());
            }
        })
    }
}

/// Ignores the token entirely and sleeps with uninterruptible waits
#[derive(Debug, Clone)]
pub struct StubbornBackend
{   pub chunks: Vec<String>
  , pub delay: Duration
}

#[async_trait]
impl TextCompletion for StubbornBackend
{   async fn complete(
      &self
    , _prompt: &str
    , _settings: &GenerationRequestSettings
    , _cancel: &CancellationToken
    ) -> Result<String>
    {   tokio::time::sleep(self.delay).await;
        Ok(self.chunks.concat())
    }

    fn stream_chunks<'a>(
      &'a self
    , _prompt: &'a str
    , _settings: &'a GenerationRequestSettings
    , _cancel: &'a CancellationToken
    ) -> ChunkStream<'a>
    {   Box::pin(stream!
        {   for chunk in &self.chunks
            {   tokio::time::sleep(self.delay).await;
                yield Ok(chunk.clone());
            }
        })
    }
}

/// Stops quietly once cancelled instead of reporting it
#[derive(Debug, Clone)]
pub struct QuietStopBackend
{   pub chunks: Vec<String>
}

#[async_trait]
impl TextCompletion for QuietStopBackend
{   async fn complete(
      &self
    , _prompt: &str
    , _settings: &GenerationRequestSettings
    , _cancel: &CancellationToken
    ) -> Result<String>
    {   Ok(self.chunks.concat())
    }

    fn stream_chunks<'a>(
      &'a self
    , _prompt: &'a str
    , _settings: &'a GenerationRequestSettings
    , cancel: &'a CancellationToken
    ) -> ChunkStream<'a>
    {   Box::pin(stream!
        {   for chunk in &self.chunks
            {   if cancel.is_cancelled()
                {   return;
                }
                yield Ok(chunk.clone());
            }
        })
    }
}

/// Keeps yielding after its own failure
#[derive(Debug, Clone)]
pub struct BabblingBackend;

#[async_trait]
impl TextCompletion for BabblingBackend
{   async fn complete(
      &self
    , _prompt: &str
    , _settings: &GenerationRequestSettings
    , _cancel: &CancellationToken
    ) -> Result<String>
    {   Err(Error::BackendUnavailable("babbling".to_string()))
    }

    fn stream_chunks<'a>(
      &'a self
    , _prompt: &'a str
    , _settings: &'a GenerationRequestSettings
    , _cancel: &'a CancellationToken
    ) -> ChunkStream<'a>
    {   Box::pin(stream!
        {   yield Ok("one ".to_string());
            yield Err(Error::BackendUnavailable("lost".to_string()));
            yield Ok("two ".to_string());
            yield Err(Error::Cancelled);
        })
    }
}

/// Streams one chunk at once, then stalls for `pause` before the rest.
/// Blocking calls answer immediately.
#[derive(Debug, Clone)]
pub struct StallingBackend
{   pub pause: Duration
}

#[async_trait]
impl TextCompletion for StallingBackend
{   async fn complete(
      &self
    , _prompt: &str
    , _settings: &GenerationRequestSettings
    , cancel: &CancellationToken
    ) -> Result<String>
    {   cancel::ensure_active(cancel)?;
        Ok("done".to_string())
    }

    fn stream_chunks<'a>(
      &'a self
    , _prompt: &'a str
    , _settings: &'a GenerationRequestSettings
    , cancel: &'a CancellationToken
    ) -> ChunkStream<'a>
    {   Box::pin(stream!
        {   yield Ok("a ".to_string());
            if let Err(error) = cancel::pace(self.pause, cancel).await
            {   yield Err(error);
                return;
            }
            yield Ok("b ".to_string());
        })
    }
}

/// Unavailable for the first `failures` calls, then succeeds
#[derive(Debug, Clone)]
pub struct FlakyBackend
{   pub failures: usize
  , pub text: String
  , pub calls: Arc<AtomicUsize>
}

impl FlakyBackend
{   pub fn new(failures: usize, text: &str) -> Self
    {   FlakyBackend
        {   failures
          , text: text.to_string()
          , calls: Arc::new(AtomicUsize::new(0))
        }
    }

    pub fn calls(&self) -> usize
    {   self.calls.load(Ordering::SeqCst)
    }

    fn attempt(&self) -> Result<()>
    {   let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures
        {   Err(Error::BackendUnavailable(format!("call {} refused", call)))
        } else
        {   Ok(())
        }
    }
}

#[async_trait]
impl TextCompletion for FlakyBackend
{   async fn complete(
      &self
    , _prompt: &str
    , _settings: &GenerationRequestSettings
    , _cancel: &CancellationToken
    ) -> Result<String>
    {   self.attempt()?;
        Ok(self.text.clone())
    }

    fn stream_chunks<'a>(
      &'a self
    , _prompt: &'a str
    , _settings: &'a GenerationRequestSettings
    , _cancel: &'a CancellationToken
    ) -> ChunkStream<'a>
    {   Box::pin(stream!
        {   if let Err(error) = self.attempt()
            {   yield Err(error);
                return;
            }
            for word in self.text.split_inclusive(' ')
            {   yield Ok(word.to_string());
            }
        })
    }
}

/// Records how many calls overlap
#[derive(Debug, Clone, Default)]
pub struct OverlapCounter
{   pub active: Arc<AtomicUsize>
  , pub peak: Arc<AtomicUsize>
  , pub delay: Duration
}

impl OverlapCounter
{   pub fn new(delay: Duration) -> Self
    {   OverlapCounter
        {   delay
          , ..OverlapCounter::default()
        }
    }

    pub fn peak(&self) -> usize
    {   self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self)
    {   let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self)
    {   self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TextCompletion for OverlapCounter
{   async fn complete(
      &self
    , prompt: &str
    , _settings: &GenerationRequestSettings
    , cancel: &CancellationToken
    ) -> Result<String>
    {   self.enter();
        let paced = cancel::pace(self.delay, cancel).await;
        self.leave();
        paced.map(|_| prompt.to_string())
    }

    fn stream_chunks<'a>(
      &'a self
    , prompt: &'a str
    , _settings: &'a GenerationRequestSettings
    , cancel: &'a CancellationToken
    ) -> ChunkStream<'a>
    {   Box::pin(stream!
        {   self.enter();
            let paced = cancel::pace(self.delay, cancel).await;
            self.leave();
            yield paced.map(|_| prompt.to_string());
        })
    }
}
