//! Named ensembles over the workbench backends.

use std::fmt;
use std::str::FromStr;

use super::{EnsembleConfig, EnsembleMember, EnsembleStrategy};
use crate::{Error, ErrorContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnsemblePreset {
    /// The three major hosted backends, best-of-N.
    Balanced,
    /// Quick models only.
    Fast,
    /// Two OpenAI models plus Gemini, consensus.
    Quality,
    /// Every backend, voting.
    Diverse,
}

impl EnsemblePreset {
    pub const ALL: [EnsemblePreset; 4] = [
        EnsemblePreset::Balanced,
        EnsemblePreset::Fast,
        EnsemblePreset::Quality,
        EnsemblePreset::Diverse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnsemblePreset::Balanced => "balanced",
            EnsemblePreset::Fast => "fast",
            EnsemblePreset::Quality => "quality",
            EnsemblePreset::Diverse => "diverse",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            EnsemblePreset::Balanced => "Balanced ensemble with major backends",
            EnsemblePreset::Fast => "Fast ensemble with quick models",
            EnsemblePreset::Quality => "High-quality ensemble with consensus",
            EnsemblePreset::Diverse => "Diverse ensemble with voting",
        }
    }

    pub fn strategy(&self) -> EnsembleStrategy {
        match self {
            EnsemblePreset::Balanced | EnsemblePreset::Fast => EnsembleStrategy::BestOfN,
            EnsemblePreset::Quality => EnsembleStrategy::Consensus { min_agreement: None },
            EnsemblePreset::Diverse => EnsembleStrategy::Voting,
        }
    }

    /// Members refer to the backend ids of
    /// [`OrchestratorConfig::workbench`](crate::config::OrchestratorConfig::workbench).
    pub fn config(&self) -> EnsembleConfig {
        let members = match self {
            EnsemblePreset::Balanced => vec![
                EnsembleMember::new("openai", "gpt-4o"),
                EnsembleMember::new("gemini", "gemini-1.5-flash"),
                EnsembleMember::new("watsonx", "meta-llama/llama-3-70b-instruct"),
            ],
            EnsemblePreset::Fast => vec![
                EnsembleMember::new("gemini", "gemini-1.5-flash"),
                EnsembleMember::new("ollama", "llama2"),
            ],
            EnsemblePreset::Quality => vec![
                EnsembleMember::new("openai", "gpt-4o"),
                EnsembleMember::new("openai", "gpt-4-turbo"),
                EnsembleMember::new("gemini", "gemini-1.5-flash"),
            ],
            EnsemblePreset::Diverse => vec![
                EnsembleMember::new("openai", "gpt-4o"),
                EnsembleMember::new("gemini", "gemini-1.5-flash"),
                EnsembleMember::new("watsonx", "meta-llama/llama-3-70b-instruct"),
                EnsembleMember::new("ollama", "llama2"),
            ],
        };
        EnsembleConfig::new(members)
    }
}

impl fmt::Display for EnsemblePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnsemblePreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                Error::validation_with_context(
                    format!("unknown ensemble preset '{}'", s),
                    ErrorContext::new()
                        .with_field_path("ensemble.preset")
                        .with_details("expected one of: balanced, fast, quality, diverse"),
                )
            })
    }
}
