//! Configuration for backends, retry and failover behavior

use std::path::Path;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::failover::{
  DEFAULT_BACKOFF_MULTIPLIER
, DEFAULT_INITIAL_BACKOFF_MS
, DEFAULT_MAX_RETRIES
};
use crate::request::{GenerationRequestSettings, SettingsSpec};

/// Environment variable naming a JSON configuration file
pub const CONFIG_ENV: &str = "LLMPORT_CONFIG";

pub const REFERENCE_KIND: &str = "reference";
pub const HTTP_KIND: &str = "http";

/// Backend configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig
{   /// Name callers look the backend up by
    pub name: String
  , /// Factory kind: "reference", "http", or a registered custom kind
    pub kind: String
  , /// API base URL, for HTTP backends
    pub api_base: Option<String>
  , /// Model identifier sent to the provider
    pub model: Option<String>
  , /// Environment variable holding the API key
    pub api_key_env: Option<String>
  , /// Request timeout in seconds
    pub timeout_secs: Option<u64>
  , /// Pause between streamed chunks, for the reference backend
    pub chunk_delay_ms: Option<u64>
  , /// Fixed output, for the reference backend
    pub text: Option<String>
  , /// Run calls one at a time through a serial loop
    pub serialize: bool
}

impl BackendConfig
{   pub fn reference(name: impl Into<String>) -> Self
    {   BackendConfig
        {   name: name.into()
          , kind: REFERENCE_KIND.to_string()
          , ..BackendConfig::default()
        }
    }

    pub fn http(
      name: impl Into<String>
    , api_base: impl Into<String>
    , model: impl Into<String>
    ) -> Self
    {   BackendConfig
        {   name: name.into()
          , kind: HTTP_KIND.to_string()
          , api_base: Some(api_base.into())
          , model: Some(model.into())
          , ..BackendConfig::default()
        }
    }

    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<Option<String>>
    {   match &self.api_key_env
        {   None => Ok(None)
          , Some(var) => std::env::var(var)
              .map(Some)
              .map_err(|_| {
                Error::InvalidConfiguration(format!(
                  "environment variable {} not set for backend {}",
                  var, self.name
                ))
              })
        }
    }
}

/// Failover configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FailoverConfig
{   /// Enable automatic retries
    pub enabled: bool
  , /// Max retry attempts per backend
    pub max_retries: usize
  , /// Backoff multiplier for retries
    pub backoff_multiplier: f32
  , /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64
  , /// Backend names tried in turn by the "failover" backend
    pub order: Vec<String>
}

impl Default for FailoverConfig
{   fn default() -> Self
    {   FailoverConfig
        {   enabled: true
          , max_retries: DEFAULT_MAX_RETRIES
          , backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER
          , initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS
          , order: vec![]
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmportConfig
{   /// Backend configurations
    pub backends: Vec<BackendConfig>
  , /// Backend used when none is named; the first one otherwise
    pub default_backend: Option<String>
  , /// Failover configuration
    pub failover: FailoverConfig
  , /// Generation settings; omitted fields take the defaults
    pub settings: SettingsSpec
}

impl Default for LlmportConfig
{   fn default() -> Self
    {   LlmportConfig
        {   backends: vec![BackendConfig::reference(REFERENCE_KIND)]
          , default_backend: None
          , failover: FailoverConfig::default()
          , settings: SettingsSpec::default()
        }
    }
}

impl LlmportConfig
{   pub fn from_json_str(json: &str) -> Result<Self>
    {   let config: LlmportConfig = serde_json::from_str(json)
          .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self>
    {   let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let json = std::fs::read_to_string(path)
          .map_err(|e| {
            Error::InvalidConfiguration(
              format!("cannot read {}: {}", path.display(), e)
            )
          })?;
        LlmportConfig::from_json_str(&json)
    }

    /// The file named by `LLMPORT_CONFIG`, or the built-in default
    pub fn from_env() -> Result<Self>
    {   match std::env::var(CONFIG_ENV)
        {   Ok(path) => LlmportConfig::load(path)
          , Err(_) => {
              info!("{} not set; using the reference backend", CONFIG_ENV);
              Ok(LlmportConfig::default())
            }
        }
    }

    /// Structural checks; settings ranges are checked by `settings()`
    pub fn validate(&self) -> Result<()>
    {   let mut seen = std::collections::HashSet::new();
        for backend in &self.backends
        {   if backend.name.is_empty()
            {   return Err(Error::InvalidConfiguration(
                  "backend without a name".to_string()
                ));
            }
            if backend.kind.is_empty()
            {   return Err(Error::InvalidConfiguration(
                  format!("backend {} has no kind", backend.name)
                ));
            }
            if !seen.insert(backend.name.as_str())
            {   return Err(Error::InvalidConfiguration(
                  format!("duplicate backend name {}", backend.name)
                ));
            }
        }
        let known = |name: &String| seen.contains(name.as_str());
        if let Some(name) = &self.default_backend
        {   if !known(name)
            {   return Err(Error::InvalidConfiguration(
                  format!("default backend {} is not configured", name)
                ));
            }
        }
        if let Some(name) = self.failover.order.iter().find(|n| !known(*n))
        {   return Err(Error::InvalidConfiguration(
              format!("failover backend {} is not configured", name)
            ));
        }
        Ok(())
    }

    /// Resolve the settings block
    pub fn settings(&self) -> Result<GenerationRequestSettings>
    {   self.settings.clone().resolve()
    }
}
