//! Generation request and sampling parameters.

use serde::{Deserialize, Serialize};

use crate::{Error, ErrorContext, Result};

pub const MIN_TEMPERATURE: f64 = 0.0;
pub const MAX_TEMPERATURE: f64 = 2.0;

/// Sampling parameters shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl GenerationParams {
    pub fn new(temperature: f64, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Reject parameters no backend would accept.
    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite()
            || self.temperature < MIN_TEMPERATURE
            || self.temperature > MAX_TEMPERATURE
        {
            return Err(Error::validation_with_context(
                format!(
                    "temperature {} outside [{}, {}]",
                    self.temperature, MIN_TEMPERATURE, MAX_TEMPERATURE
                ),
                ErrorContext::new()
                    .with_field_path("params.temperature")
                    .with_source("request_validator"),
            ));
        }
        if self.max_tokens == 0 {
            return Err(Error::validation_with_context(
                "max_tokens must be positive",
                ErrorContext::new()
                    .with_field_path("params.max_tokens")
                    .with_source("request_validator"),
            ));
        }
        Ok(())
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

/// A single generation request addressed to one backend/model pair.
///
/// Requests are plain values: once handed to the controller they are only
/// ever read, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub prompt: String,
    pub backend_id: String,
    pub model_name: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Request {
    pub fn new(
        prompt: impl Into<String>,
        backend_id: impl Into<String>,
        model_name: impl Into<String>,
        params: GenerationParams,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            backend_id: backend_id.into(),
            model_name: model_name.into(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        }
    }

    pub fn params(&self) -> GenerationParams {
        GenerationParams::new(self.temperature, self.max_tokens)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend_id.trim().is_empty() {
            return Err(Error::validation_with_context(
                "backend_id must not be empty",
                ErrorContext::new()
                    .with_field_path("request.backend_id")
                    .with_source("request_validator"),
            ));
        }
        self.params().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        assert!(GenerationParams::default().validate().is_ok());
    }

    #[test]
    fn test_temperature_bounds() {
        assert!(GenerationParams::new(0.0, 10).validate().is_ok());
        assert!(GenerationParams::new(2.0, 10).validate().is_ok());
        assert!(GenerationParams::new(2.01, 10).validate().is_err());
        assert!(GenerationParams::new(-0.1, 10).validate().is_err());
        assert!(GenerationParams::new(f64::NAN, 10).validate().is_err());
    }

    #[test]
    fn test_zero_max_tokens_rejected() {
        let err = GenerationParams::new(0.5, 0).validate().unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("params.max_tokens")
        );
    }

    #[test]
    fn test_request_carries_params() {
        let req = Request::new("p", "ollama", "llama2", GenerationParams::new(1.1, 64));
        assert_eq!(req.params(), GenerationParams::new(1.1, 64));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_blank_backend_rejected() {
        let req = Request::new("p", "  ", "m", GenerationParams::default());
        assert!(req.validate().is_err());
    }
}
