//! Serialized access to a backend through a command-loop task
//!
//! For backends around a single non-reentrant resource (one model
//! handle, one connection). The backend is moved into a spawned task
//! which runs one call at a time, in arrival order. Callers hold a
//! cheap [`SerialBackend`] handle that implements the same contract.

use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, trace};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use crate::backend::{ChunkStream, TextCompletion};
use crate::cancel;
use crate::error::{Error, Result};
use crate::request::GenerationRequestSettings;

/// Chunks in flight between the loop and one consumer
const STREAM_BUFFER: usize = 1;

pub type CompleteReply = Result<String>;
pub type CompleteReplySender
  = mpsc::UnboundedSender<CompleteReply>;

/// `Some(item)` carries backend output; `None` marks a clean end
pub type StreamItem = Option<Result<String>>;
pub type StreamItemSender = mpsc::Sender<StreamItem>;

/// Commands for the serial loop
pub enum SerialCommand
{   Complete
    {   prompt: String
      , settings: GenerationRequestSettings
      , cancel: CancellationToken
      , reply: CompleteReplySender
    }
  , Stream
    {   prompt: String
      , settings: GenerationRequestSettings
      , cancel: CancellationToken
      , chunks: StreamItemSender
    }
  , Shutdown
    {   reply: mpsc::UnboundedSender<()>
    }
}

/// Handle to a backend owned by a serial loop task.
///
/// Must be created inside a tokio runtime. The loop stops on
/// [`SerialBackend::shutdown`] or when the handle is dropped; calls made
/// after that fail with `BackendUnavailable`. A call whose caller stops
/// listening is abandoned so the next one can start.
pub struct SerialBackend
{   tx: mpsc::UnboundedSender<SerialCommand>
  , _task: tokio::task::JoinHandle<()>
}

impl SerialBackend
{   /// Spawn the loop and move `backend` into it
    pub fn new<B>(backend: B) -> Self
    where
      B: TextCompletion + 'static
    {   debug!("Creating SerialBackend");
        let (cmd_tx, cmd_rx)
          = mpsc::unbounded_channel();

        let _task = tokio::spawn(async move {
          run_serial_loop(backend, cmd_rx).await;
        });

        SerialBackend
        {   tx: cmd_tx
          , _task
        }
    }

    /// Stop the loop once queued calls have run
    pub async fn shutdown(self) -> Result<()>
    {   debug!("Shutting down SerialBackend");
        let (reply_tx, mut reply_rx)
          = mpsc::unbounded_channel();

        self.tx.send(SerialCommand::Shutdown { reply: reply_tx })
          .map_err(|_| disconnected())?;

        reply_rx.recv().await.ok_or_else(disconnected)
    }
}

fn disconnected() -> Error
{   Error::BackendUnavailable("serial backend has shut down".to_string())
}

#[async_trait]
impl TextCompletion for SerialBackend
{   async fn complete(
      &self
    , prompt: &str
    , settings: &GenerationRequestSettings
    , cancel: &CancellationToken
    ) -> Result<String>
    {   cancel::ensure_active(cancel)?;
        let (reply_tx, mut reply_rx)
          = mpsc::unbounded_channel();

        self.tx.send(SerialCommand::Complete {
          prompt: prompt.to_string(),
          settings: settings.clone(),
          cancel: cancel.clone(),
          reply: reply_tx,
        }).map_err(|_| disconnected())?;

        match cancel::until_cancelled(cancel, reply_rx.recv()).await?
        {   Some(result) => result
          , None => Err(disconnected())
        }
    }

    fn stream_chunks<'a>(
      &'a self
    , prompt: &'a str
    , settings: &'a GenerationRequestSettings
    , cancel: &'a CancellationToken
    ) -> ChunkStream<'a>
    {   Box::pin(stream!
        {   let (chunk_tx, mut chunk_rx) = mpsc::channel(STREAM_BUFFER);
            let command = SerialCommand::Stream
            {   prompt: prompt.to_string()
              , settings: settings.clone()
              , cancel: cancel.clone()
              , chunks: chunk_tx
            };
            if self.tx.send(command).is_err()
            {   yield Err(disconnected());
                return;
            }

            loop
            {   match chunk_rx.recv().await
                {   Some(Some(item)) => {
                      yield item;
                    }
                  , Some(None) => return
                  , None => {
                      yield Err(Error::BackendUnavailable(
                        "serial backend stopped mid-stream".to_string()
                      ));
                      return;
                    }
                }
            }
        })
    }
}

/// Main serial loop
async fn run_serial_loop<B>(
  backend: B
, mut cmd_rx: mpsc::UnboundedReceiver<SerialCommand>
)
where
  B: TextCompletion
{   debug!("Starting serial backend loop");

    loop
    { match cmd_rx.recv().await
      {   Some(SerialCommand::Complete {
            prompt, settings, cancel, reply
          }) => {
            trace!("Processing Complete");
            tokio::select!
            {   biased;
                _ = reply.closed() => {
                  debug!("Complete caller gone");
                }
              , result = backend.complete(&prompt, &settings, &cancel) => {
                  let _ = reply.send(result);
                }
            }
          }
        , Some(SerialCommand::Stream {
            prompt, settings, cancel, chunks
          }) => {
            trace!("Processing Stream");
            forward_stream(&backend, &prompt, &settings, &cancel, &chunks)
              .await;
          }
        , Some(SerialCommand::Shutdown { reply }) => {
            info!("Serial backend shutting down");
            let _ = reply.send(());
            break;
          }
        , None => {
            debug!("Command channel closed");
            break;
          }
      }
    }
}

/// Drive one backend stream to its end, or until the consumer leaves.
/// A departed consumer is noticed while the backend is still working.
async fn forward_stream<B>(
  backend: &B
, prompt: &str
, settings: &GenerationRequestSettings
, cancel: &CancellationToken
, chunks: &StreamItemSender
)
where
  B: TextCompletion
{   let mut stream = backend.stream_chunks(prompt, settings, cancel);
    loop
    {   let item = tokio::select!
        {   biased;
            _ = chunks.closed() => {
              debug!("Stream consumer gone");
              return;
            }
          , item = stream.next() => item
        };
        let Some(item) = item else { break };
        let failed = item.is_err();
        if !send_item(chunks, cancel, Some(item)).await || failed
        {   return;
        }
    }
    send_item(chunks, cancel, None).await;
}

async fn send_item(
  chunks: &StreamItemSender
, cancel: &CancellationToken
, item: StreamItem
) -> bool
{   match cancel::until_cancelled(cancel, chunks.send(item)).await
    {   Ok(Ok(())) => true
      , _ => {
          debug!("Stream consumer gone");
          false
        }
    }
}
