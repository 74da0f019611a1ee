use std::time::Duration;
use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, error, trace, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use crate::backend::{ChunkStream, TextCompletion};
use crate::cancel;
use crate::error::{Error, Result};
use crate::request::GenerationRequestSettings;

pub const DEFAULT_API_BASE: &str
  = "https://api.mistral.ai/v1";
pub const DEFAULT_MODEL: &str = "mistral-small-latest";

// ===== Wire Types =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage
{   pub role: String
  , pub content: String
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest
{   pub model: String
  , pub messages: Vec<ChatMessage>
  , pub max_tokens: usize
  , pub temperature: f32
  , pub top_p: f32
  , pub frequency_penalty: f32
  , pub presence_penalty: f32
  , #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>
  , pub stream: bool
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse
{   pub choices: Vec<Choice>
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice
{   pub message: ChatMessage
  , pub finish_reason: Option<String>
}

/// One server-sent event payload of a streamed completion
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk
{   #[serde(default)]
    pub choices: Vec<ChunkChoice>
  , #[serde(default)]
    pub error: Option<serde_json::Value>
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice
{   #[serde(default)]
    pub delta: Delta
  , pub finish_reason: Option<String>
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Delta
{   #[serde(default)]
    pub content: Option<String>
}

// ===== Backend =====

/// Backend for OpenAI-compatible chat completion services
/// (Mistral, OpenAI, vLLM, LM Studio, Ollama's compatibility layer).
///
/// Every settings field is forwarded: `max_output_units` as `max_tokens`,
/// `nucleus_probability` as `top_p`, both penalties, and stop sequences.
/// Values are sent exactly as validated; nothing is clamped. A provider
/// that rejects a value with 400 or 422 surfaces as `InvalidSettings`.
#[derive(Debug, Clone)]
pub struct HttpCompletion
{   http_client: reqwest::Client
  , api_base: String
  , model: String
  , api_key: Option<String>
  , timeout: Option<Duration>
}

impl HttpCompletion
{   pub fn new(
      api_base: impl Into<String>
    , model: impl Into<String>
    ) -> Self
    {   let api_base = api_base.into();
        let model = model.into();
        debug!("Creating HttpCompletion for {} at {}", model, api_base);
        HttpCompletion
        {   http_client: reqwest::Client::new()
          , api_base
          , model
          , api_key: None
          , timeout: None
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self
    {   self.api_key = Some(api_key.into());
        self
    }

    /// Overall deadline for a blocking call. Streams are not bounded.
    pub fn with_timeout(mut self, timeout: Duration) -> Self
    {   self.timeout = Some(timeout);
        self
    }

    pub fn model(&self) -> &str
    {   &self.model
    }

    fn endpoint(&self) -> String
    {   format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    fn build_request(
      &self
    , prompt: &str
    , settings: &GenerationRequestSettings
    , stream: bool
    ) -> ChatCompletionRequest
    {   ChatCompletionRequest
        {   model: self.model.clone()
          , messages: vec![
              ChatMessage
              {   role: "user".to_string()
                , content: prompt.to_string()
              }
            ]
          , max_tokens: settings.max_output_units()
          , temperature: settings.temperature()
          , top_p: settings.nucleus_probability()
          , frequency_penalty: settings.frequency_penalty()
          , presence_penalty: settings.presence_penalty()
          , stop: settings.stop_sequences().to_vec()
          , stream
        }
    }

    async fn send(
      &self
    , request: &ChatCompletionRequest
    ) -> Result<reqwest::Response>
    {   trace!("Chat completion request: {:?}", request);

        let mut builder = self.http_client
          .post(self.endpoint())
          .json(request);
        if let Some(api_key) = &self.api_key
        {   builder = builder.bearer_auth(api_key);
        }
        if let (Some(timeout), false) = (self.timeout, request.stream)
        {   builder = builder.timeout(timeout);
        }

        let response = builder
          .send()
          .await
          .map_err(|e| {
            error!("HTTP error: {}", e);
            Error::BackendUnavailable(format!("request failed: {}", e))
          })?;

        let status = response.status();
        trace!("Chat completion response status: {}", status);

        if status.is_success()
        {   return Ok(response);
        }

        let error_text = response.text().await
          .unwrap_or_else(|_|
            "Unknown error".to_string()
          );
        error!("Provider error {}: {}", status, error_text);
        Err(status_error(status, error_text))
    }
}

impl Default for HttpCompletion
{   fn default() -> Self
    {   HttpCompletion::new(DEFAULT_API_BASE, DEFAULT_MODEL)
    }
}

fn status_error(status: StatusCode, body: String) -> Error
{   match status
    {   StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
          Error::InvalidSettings(
            format!("provider rejected request ({}): {}", status, body)
          )
        }
      , _ => {
          Error::BackendUnavailable(
            format!("provider returned {}: {}", status, body)
          )
        }
    }
}

#[async_trait]
impl TextCompletion for HttpCompletion
{   async fn complete(
      &self
    , prompt: &str
    , settings: &GenerationRequestSettings
    , cancel: &CancellationToken
    ) -> Result<String>
    {   cancel::ensure_active(cancel)?;
        debug!("Blocking completion via {}", self.model);

        let request = self.build_request(prompt, settings, false);
        let response = cancel::until_cancelled(
          cancel
        , self.send(&request)
        ).await??;

        let chat_response: ChatCompletionResponse
          = cancel::until_cancelled(
            cancel
          , response.json::<ChatCompletionResponse>()
          )
            .await?
            .map_err(|e| {
              error!("Parse error: {}", e);
              Error::BackendUnavailable(format!("malformed response: {}", e))
            })?;

        chat_response.choices
          .into_iter()
          .next()
          .map(|c| c.message.content)
          .ok_or_else(|| {
            error!("No choices in response");
            Error::BackendUnavailable(
              "response contained no choices".to_string()
            )
          })
    }

    fn stream_chunks<'a>(
      &'a self
    , prompt: &'a str
    , settings: &'a GenerationRequestSettings
    , cancel: &'a CancellationToken
    ) -> ChunkStream<'a>
    {   Box::pin(stream!
        {   if let Err(error) = cancel::ensure_active(cancel)
            {   yield Err(error);
                return;
            }
            debug!("Streaming completion via {}", self.model);

            let request = self.build_request(prompt, settings, true);
            let response = match cancel::until_cancelled(
              cancel
            , self.send(&request)
            ).await
            {   Ok(Ok(response)) => response
              , Ok(Err(error)) | Err(error) => {
                  yield Err(error);
                  return;
                }
            };

            let mut body = Box::pin(response.bytes_stream());
            let mut decoder = SseDecoder::default();
            loop
            {   let next = match cancel::until_cancelled(cancel, body.next()).await
                {   Ok(next) => next
                  , Err(error) => {
                      yield Err(error);
                      return;
                    }
                };
                let (events, ended) = match next
                {   Some(Ok(bytes)) => (decoder.push(&bytes), false)
                  , Some(Err(e)) => {
                      error!("Event stream interrupted: {}", e);
                      yield Err(Error::BackendUnavailable(
                        format!("stream interrupted: {}", e)
                      ));
                      return;
                    }
                  , None => (decoder.finish(), true)
                };

                for event in events
                {   match event
                    {   SseEvent::Done => {
                          debug!("Event stream complete");
                          return;
                        }
                      , SseEvent::Data(payload) => {
                          match parse_delta(&payload)
                          {   Ok(Some(text)) => {
                                yield Ok(text);
                              }
                            , Ok(None) => {}
                            , Err(error) => {
                                yield Err(error);
                                return;
                              }
                          }
                        }
                    }
                }

                if ended
                {   warn!("Event stream closed without a completion marker");
                    yield Err(Error::BackendUnavailable(
                      "stream ended before completion".to_string()
                    ));
                    return;
                }
            }
        })
    }
}

// ===== Server-Sent Events =====

#[derive(Debug, Clone, PartialEq, Eq)]
enum SseEvent
{   Data(String)
  , Done
}

/// Splits a byte stream into `data:` payloads.
/// Lines are only decoded once complete, so multi-byte characters can
/// straddle network reads.
#[derive(Debug, Default)]
struct SseDecoder
{   buffer: Vec<u8>
}

impl SseDecoder
{   fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent>
    {   self.buffer.extend_from_slice(bytes);
        let mut events = vec![];
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n')
        {   let line: Vec<u8> = self.buffer.drain(..=end).collect();
            if let Some(event) = parse_line(&line)
            {   events.push(event);
            }
        }
        events
    }

    /// Flush a final line that had no terminator
    fn finish(&mut self) -> Vec<SseEvent>
    {   let line = std::mem::take(&mut self.buffer);
        parse_line(&line).into_iter().collect()
    }
}

fn parse_line(line: &[u8]) -> Option<SseEvent>
{   let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(|c: char| c == '\r' || c == '\n');
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload == "[DONE]"
    {   Some(SseEvent::Done)
    } else if payload.is_empty()
    {   None
    } else
    {   Some(SseEvent::Data(payload.to_string()))
    }
}

fn parse_delta(payload: &str) -> Result<Option<String>>
{   let chunk: ChatCompletionChunk = serde_json::from_str(payload)
      .map_err(|e| {
        error!("Parse error in event stream: {}", e);
        Error::BackendUnavailable(format!("malformed stream event: {}", e))
      })?;
    if let Some(provider_error) = chunk.error
    {   error!("Provider error mid-stream: {}", provider_error);
        return Err(Error::BackendUnavailable(
          format!("provider error: {}", provider_error)
        ));
    }
    Ok(chunk.choices
      .into_iter()
      .next()
      .and_then(|c| c.delta.content)
      .filter(|text| !text.is_empty()))
}
