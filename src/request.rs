//! Backend-neutral request settings and streamed output units

use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{Error, Result};

pub const DEFAULT_MAX_OUTPUT_UNITS: usize = 256;
pub const DEFAULT_TEMPERATURE: f32 = 0.0;
pub const DEFAULT_NUCLEUS_PROBABILITY: f32 = 1.0;

const MAX_TEMPERATURE: f32 = 2.0;
const PENALTY_BOUND: f32 = 2.0;

/// How a single generation call should behave.
///
/// Values are validated when built and never change afterwards; derive a
/// modified copy through [`GenerationRequestSettings::to_builder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SettingsSpec", into = "SettingsSpec")]
pub struct GenerationRequestSettings
{   max_output_units: usize
  , temperature: f32
  , nucleus_probability: f32
  , frequency_penalty: f32
  , presence_penalty: f32
  , stop_sequences: Vec<String>
}

impl GenerationRequestSettings
{   pub fn builder() -> GenerationRequestSettingsBuilder
    {   GenerationRequestSettingsBuilder::default()
    }

    /// Upper bound on generated length, in backend units (tokens, words)
    pub fn max_output_units(&self) -> usize
    {   self.max_output_units
    }

    pub fn temperature(&self) -> f32
    {   self.temperature
    }

    /// Top-p cutoff, in (0, 1]
    pub fn nucleus_probability(&self) -> f32
    {   self.nucleus_probability
    }

    pub fn frequency_penalty(&self) -> f32
    {   self.frequency_penalty
    }

    pub fn presence_penalty(&self) -> f32
    {   self.presence_penalty
    }

    pub fn stop_sequences(&self) -> &[String]
    {   &self.stop_sequences
    }

    /// Greedy decoding; a well-behaved backend repeats itself
    pub fn is_deterministic(&self) -> bool
    {   self.temperature == 0.0
    }

    /// Builder seeded with these values
    pub fn to_builder(&self) -> GenerationRequestSettingsBuilder
    {   GenerationRequestSettingsBuilder
        {   spec: SettingsSpec::from(self.clone())
        }
    }
}

impl Default for GenerationRequestSettings
{   fn default() -> Self
    {   GenerationRequestSettings
        {   max_output_units: DEFAULT_MAX_OUTPUT_UNITS
          , temperature: DEFAULT_TEMPERATURE
          , nucleus_probability: DEFAULT_NUCLEUS_PROBABILITY
          , frequency_penalty: 0.0
          , presence_penalty: 0.0
          , stop_sequences: vec![]
        }
    }
}

/// Named options for settings; omitted fields take the defaults.
///
/// This is the shape configuration files use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsSpec
{   #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_units: Option<usize>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub nucleus_probability: Option<f32>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>
  , #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>
}

impl SettingsSpec
{   /// Apply defaults and check every range
    pub fn resolve(self) -> Result<GenerationRequestSettings>
    {   let defaults = GenerationRequestSettings::default();
        let settings = GenerationRequestSettings
        {   max_output_units: self.max_output_units
              .unwrap_or(defaults.max_output_units)
          , temperature: self.temperature
              .unwrap_or(defaults.temperature)
          , nucleus_probability: self.nucleus_probability
              .unwrap_or(defaults.nucleus_probability)
          , frequency_penalty: self.frequency_penalty
              .unwrap_or(defaults.frequency_penalty)
          , presence_penalty: self.presence_penalty
              .unwrap_or(defaults.presence_penalty)
          , stop_sequences: self.stop_sequences
        };
        validate(&settings)?;
        Ok(settings)
    }
}

impl From<GenerationRequestSettings> for SettingsSpec
{   fn from(settings: GenerationRequestSettings) -> Self
    {   SettingsSpec
        {   max_output_units: Some(settings.max_output_units)
          , temperature: Some(settings.temperature)
          , nucleus_probability: Some(settings.nucleus_probability)
          , frequency_penalty: Some(settings.frequency_penalty)
          , presence_penalty: Some(settings.presence_penalty)
          , stop_sequences: settings.stop_sequences
        }
    }
}

impl TryFrom<SettingsSpec> for GenerationRequestSettings
{   type Error = Error;

    fn try_from(spec: SettingsSpec) -> Result<Self>
    {   spec.resolve()
    }
}

fn validate(settings: &GenerationRequestSettings) -> Result<()>
{   if settings.max_output_units == 0
    {   return Err(Error::InvalidSettings(
          "max_output_units must be at least 1".to_string()
        ));
    }
    if !settings.temperature.is_finite()
      || !(0.0..=MAX_TEMPERATURE).contains(&settings.temperature)
    {   return Err(Error::InvalidSettings(format!(
          "temperature must be within [0, {}], got {}",
          MAX_TEMPERATURE, settings.temperature
        )));
    }
    // NaN fails both comparisons
    if !(settings.nucleus_probability > 0.0
      && settings.nucleus_probability <= 1.0)
    {   return Err(Error::InvalidSettings(format!(
          "nucleus_probability must be within (0, 1], got {}",
          settings.nucleus_probability
        )));
    }
    for (name, value) in [
      ("frequency_penalty", settings.frequency_penalty)
    , ("presence_penalty", settings.presence_penalty)
    ]
    {   if !value.is_finite()
          || !(-PENALTY_BOUND..=PENALTY_BOUND).contains(&value)
        {   return Err(Error::InvalidSettings(format!(
              "{} must be within [-{}, {}], got {}",
              name, PENALTY_BOUND, PENALTY_BOUND, value
            )));
        }
    }
    if settings.stop_sequences.iter().any(|s| s.is_empty())
    {   return Err(Error::InvalidSettings(
          "stop sequences must not be empty".to_string()
        ));
    }
    Ok(())
}

/// Named-option construction for [`GenerationRequestSettings`]
#[derive(Debug, Clone, Default)]
pub struct GenerationRequestSettingsBuilder
{   spec: SettingsSpec
}

impl GenerationRequestSettingsBuilder
{   pub fn max_output_units(mut self, units: usize) -> Self
    {   self.spec.max_output_units = Some(units);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self
    {   self.spec.temperature = Some(temperature);
        self
    }

    pub fn nucleus_probability(mut self, top_p: f32) -> Self
    {   self.spec.nucleus_probability = Some(top_p);
        self
    }

    pub fn frequency_penalty(mut self, penalty: f32) -> Self
    {   self.spec.frequency_penalty = Some(penalty);
        self
    }

    pub fn presence_penalty(mut self, penalty: f32) -> Self
    {   self.spec.presence_penalty = Some(penalty);
        self
    }

    pub fn stop_sequence(mut self, stop: impl Into<String>) -> Self
    {   self.spec.stop_sequences.push(stop.into());
        self
    }

    pub fn build(self) -> Result<GenerationRequestSettings>
    {   self.spec.resolve()
    }
}

/// One unit of streamed output. Its only identity is its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedChunk
{   /// Zero-based position within the call's sequence
    pub index: usize
  , pub text: String
}

impl AsRef<str> for GeneratedChunk
{   fn as_ref(&self) -> &str
    {   &self.text
    }
}

impl fmt::Display for GeneratedChunk
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   f.write_str(&self.text)
    }
}
