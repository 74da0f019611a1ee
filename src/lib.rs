//! llmport: one contract for any text generator
//!
//! An orchestration layer hands a prompt and a
//! [`GenerationRequestSettings`] value to a [`TextCompletion`] backend and
//! gets back either the whole text or a stream of chunks, with the same
//! failure taxonomy and cancellation behavior whatever the backend is.
//!
//! ```ignore
//! use futures_util::StreamExt;
//! use llmport::{CancellationToken, GenerationRequestSettings, TextCompletion};
//! use llmport::providers::ReferenceCompletion;
//!
//! let backend = ReferenceCompletion::default();
//! let settings = GenerationRequestSettings::builder()
//!   .max_output_units(100)
//!   .temperature(1.0)
//!   .nucleus_probability(0.5)
//!   .build()?;
//! let cancel = CancellationToken::new();
//!
//! let mut stream = backend.complete_stream("Write one paragraph why AI is awesome", &settings, &cancel);
//! while let Some(chunk) = stream.next().await
//! {   print!("{}", chunk?);
//! }
//! ```
//!
//! Layout:
//!
//! ```text
//! src/
//! ├── lib.rs          # Re-exports and crate documentation
//! ├── error.rs        # Failure taxonomy
//! ├── request.rs      # Generation settings and streamed chunks
//! ├── cancel.rs       # Cancellation-aware waits
//! ├── backend.rs      # The backend trait and streaming harness
//! ├── providers/      # Concrete backends
//! │   ├── reference.rs
//! │   └── http.rs
//! ├── serial.rs       # One-call-at-a-time wrapper
//! ├── failover.rs     # Retry and failover wrappers
//! ├── config.rs       # JSON configuration
//! └── registry.rs     # Named backends and factories
//! ```

pub mod error;
pub mod request;
pub mod cancel;
pub mod backend;
pub mod providers;
pub mod serial;
pub mod failover;
pub mod config;
pub mod registry;

pub use backend::{ChunkStream, CompletionStream, TextCompletion};
pub use config::{BackendConfig, FailoverConfig, LlmportConfig};
pub use error::{Error, Result, StreamFailure};
pub use failover::{FailoverBackend, RetryPolicy, RetryingBackend};
pub use registry::BackendRegistry;
pub use request::{
  GeneratedChunk
, GenerationRequestSettings
, GenerationRequestSettingsBuilder
, SettingsSpec
};
pub use serial::SerialBackend;
pub use tokio_util::sync::CancellationToken;
