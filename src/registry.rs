//! Named backends and the factories that build them
//!
//! An orchestration layer asks the registry for a backend by name and
//! never learns which concrete type it got. Factories are keyed by the
//! `kind` field of [`BackendConfig`]; "reference" and "http" are built in
//! and any other kind can be registered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use log::{debug, info};
use crate::backend::TextCompletion;
use crate::config::{BackendConfig, LlmportConfig, HTTP_KIND, REFERENCE_KIND};
use crate::error::{Error, Result};
use crate::failover::{FailoverBackend, RetryPolicy, RetryingBackend};
use crate::providers::http::{HttpCompletion, DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::providers::reference::ReferenceCompletion;
use crate::serial::SerialBackend;

/// Name under which `from_config` registers the failover chain
pub const FAILOVER_NAME: &str = "failover";

pub type BackendFactory = Arc<
  dyn Fn(&BackendConfig) -> Result<Arc<dyn TextCompletion>> + Send + Sync
>;

pub struct BackendRegistry
{   factories: HashMap<String, BackendFactory>
  , backends: HashMap<String, Arc<dyn TextCompletion>>
  , default_name: Option<String>
}

impl BackendRegistry
{   /// Registry with the built-in kinds and no backends
    pub fn new() -> Self
    {   let mut registry = BackendRegistry
        {   factories: HashMap::new()
          , backends: HashMap::new()
          , default_name: None
        };
        registry.register_kind(REFERENCE_KIND, reference_factory);
        registry.register_kind(HTTP_KIND, http_factory);
        registry
    }

    /// Build every configured backend.
    ///
    /// Each backend gets the configured retry policy; those marked
    /// `serialize` run behind a [`SerialBackend`], which needs a tokio
    /// runtime. A non-empty failover order is registered as
    /// [`FAILOVER_NAME`].
    pub fn from_config(config: &LlmportConfig) -> Result<Self>
    {   let mut registry = BackendRegistry::new();
        registry.load_config(config)?;
        Ok(registry)
    }

    pub fn load_config(&mut self, config: &LlmportConfig) -> Result<()>
    {   config.validate()?;
        let policy = RetryPolicy::from_config(&config.failover);

        for backend_config in &config.backends
        {   let backend = self.build(backend_config)?;
            let backend: Arc<dyn TextCompletion> = if policy.max_retries > 0
            {   Arc::new(RetryingBackend::new(backend, policy.clone()))
            } else
            {   backend
            };
            self.register(backend_config.name.clone(), backend);
        }

        if !config.failover.order.is_empty()
        {   let mut chain = FailoverBackend::new();
            for name in &config.failover.order
            {   chain = chain.with_backend(name.clone(), self.get(name)?);
            }
            info!("Failover order: {:?}", chain.names());
            self.register(FAILOVER_NAME, Arc::new(chain));
        }

        if let Some(name) = &config.default_backend
        {   self.set_default(name)?;
        }
        Ok(())
    }

    /// Add or replace the factory for a backend kind
    pub fn register_kind<F>(&mut self, kind: impl Into<String>, factory: F)
    where
      F: Fn(&BackendConfig) -> Result<Arc<dyn TextCompletion>>
        + Send + Sync + 'static
    {   let kind = kind.into();
        debug!("Registering backend kind {}", kind);
        self.factories.insert(kind, Arc::new(factory));
    }

    /// Add or replace a named backend.
    /// The first one registered becomes the default.
    pub fn register(
      &mut self
    , name: impl Into<String>
    , backend: Arc<dyn TextCompletion>
    )
    {   let name = name.into();
        debug!("Registering backend {}", name);
        if self.default_name.is_none()
        {   self.default_name = Some(name.clone());
        }
        self.backends.insert(name, backend);
    }

    pub fn set_default(&mut self, name: &str) -> Result<()>
    {   if !self.backends.contains_key(name)
        {   return Err(unknown_backend(name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Construct a backend from its configuration without registering it
    pub fn build(&self, config: &BackendConfig)
      -> Result<Arc<dyn TextCompletion>>
    {   let factory = self.factories.get(&config.kind)
          .ok_or_else(|| {
            Error::InvalidConfiguration(format!(
              "unknown backend kind {} for {}",
              config.kind, config.name
            ))
          })?;
        let backend = factory(config)?;

        if !config.serialize
        {   return Ok(backend);
        }
        if tokio::runtime::Handle::try_current().is_err()
        {   return Err(Error::InvalidConfiguration(format!(
              "backend {} is serialized and needs a tokio runtime",
              config.name
            )));
        }
        Ok(Arc::new(SerialBackend::new(backend)))
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn TextCompletion>>
    {   self.backends.get(name)
          .cloned()
          .ok_or_else(|| unknown_backend(name))
    }

    pub fn default_backend(&self) -> Result<Arc<dyn TextCompletion>>
    {   match &self.default_name
        {   Some(name) => self.get(name)
          , None => Err(Error::InvalidConfiguration(
              "no backends registered".to_string()
            ))
        }
    }

    pub fn default_name(&self) -> Option<&str>
    {   self.default_name.as_deref()
    }

    /// Registered backend names, sorted
    pub fn names(&self) -> Vec<&str>
    {   let mut names: Vec<&str>
          = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for BackendRegistry
{   fn default() -> Self
    {   BackendRegistry::new()
    }
}

fn unknown_backend(name: &str) -> Error
{   Error::InvalidConfiguration(format!("unknown backend {}", name))
}

fn reference_factory(config: &BackendConfig)
  -> Result<Arc<dyn TextCompletion>>
{   let mut backend = match &config.text
    {   Some(text) => ReferenceCompletion::new(text.clone())
      , None => ReferenceCompletion::default()
    };
    if let Some(delay_ms) = config.chunk_delay_ms
    {   backend = backend.with_chunk_delay(Duration::from_millis(delay_ms));
    }
    Ok(Arc::new(backend))
}

fn http_factory(config: &BackendConfig)
  -> Result<Arc<dyn TextCompletion>>
{   let mut backend = HttpCompletion::new(
      config.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    , config.model.as_deref().unwrap_or(DEFAULT_MODEL)
    );
    if let Some(api_key) = config.api_key()?
    {   backend = backend.with_api_key(api_key);
    }
    if let Some(timeout_secs) = config.timeout_secs
    {   backend = backend.with_timeout(Duration::from_secs(timeout_secs));
    }
    Ok(Arc::new(backend))
}
