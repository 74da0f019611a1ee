//! In-process reference backend used to exercise the contract

use std::time::Duration;
use async_stream::stream;
use async_trait::async_trait;
use log::{debug, trace};
use tokio_util::sync::CancellationToken;
use crate::backend::{ChunkStream, TextCompletion};
use crate::cancel;
use crate::error::Result;
use crate::request::GenerationRequestSettings;

/// Text produced by [`ReferenceCompletion::default`].
/// Single line, and ends in a space so every unit carries one.
pub const REFERENCE_TEXT: &str
  = "...output from your custom model... Example: AI is awesome \
     because it can help us solve complex problems, enhance our \
     creativity, and improve our lives in many ways. AI can perform \
     tasks that are too difficult, tedious, or dangerous for humans, \
     such as diagnosing diseases, detecting fraud, or exploring space. \
     AI can also augment our abilities and inspire us to create new \
     forms of art, music, or literature. AI can also improve our \
     well-being and happiness by providing personalized \
     recommendations, entertainment, and assistance. AI is awesome ";

/// Pause between streamed chunks
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(50);

/// Echoes a fixed text regardless of the prompt.
///
/// * `complete` returns the text at once, with no pacing.
/// * `stream_chunks` emits one whitespace-delimited word per chunk, each
///   keeping its trailing whitespace, with an interruptible
///   [`DEFAULT_CHUNK_DELAY`] before every chunk.
///
/// `max_output_units` caps the number of words in both modes. Temperature,
/// nucleus probability, penalties and stop sequences are no-ops. Nothing
/// is clamped.
#[derive(Debug, Clone)]
pub struct ReferenceCompletion
{   text: String
  , chunk_delay: Duration
}

impl ReferenceCompletion
{   pub fn new(text: impl Into<String>) -> Self
    {   ReferenceCompletion
        {   text: text.into()
          , chunk_delay: DEFAULT_CHUNK_DELAY
        }
    }

    pub fn with_chunk_delay(mut self, chunk_delay: Duration) -> Self
    {   self.chunk_delay = chunk_delay;
        self
    }

    pub fn text(&self) -> &str
    {   &self.text
    }

    pub fn chunk_delay(&self) -> Duration
    {   self.chunk_delay
    }

    /// Words with their trailing whitespace, at most `max_output_units`
    fn units<'a>(
      &'a self
    , settings: &GenerationRequestSettings
    ) -> impl Iterator<Item = &'a str> + Send + 'a
    {   self.text
          .split_inclusive(char::is_whitespace)
          .take(settings.max_output_units())
    }
}

impl Default for ReferenceCompletion
{   fn default() -> Self
    {   ReferenceCompletion::new(REFERENCE_TEXT)
    }
}

#[async_trait]
impl TextCompletion for ReferenceCompletion
{   async fn complete(
      &self
    , prompt: &str
    , settings: &GenerationRequestSettings
    , cancel: &CancellationToken
    ) -> Result<String>
    {   cancel::ensure_active(cancel)?;
        trace!("Reference completion for prompt: {:?}", prompt);
        let text: String = self.units(settings).collect();
        debug!("Reference completion produced {} bytes", text.len());
        Ok(text)
    }

    fn stream_chunks<'a>(
      &'a self
    , prompt: &'a str
    , settings: &'a GenerationRequestSettings
    , cancel: &'a CancellationToken
    ) -> ChunkStream<'a>
    {   Box::pin(stream!
        {   trace!("Reference stream for prompt: {:?}", prompt);
            for unit in self.units(settings)
            {   if let Err(error) = cancel::pace(self.chunk_delay, cancel).await
                {   yield Err(error);
                    return;
                }
                yield Ok(unit.to_string());
            }
        })
    }
}
