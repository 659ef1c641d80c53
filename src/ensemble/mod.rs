//! 集成聚合模块：将同一提示并发发送给多个后端，并按策略合并结果。
//!
//! # Ensemble Aggregator
//!
//! An ensemble is a configured set of (backend, model) pairs queried together
//! for one logical prompt. The [`EnsembleAggregator`] fans the prompt out
//! through the [`ConcurrencyController`](crate::batch::ConcurrencyController),
//! waits for every member to reach a terminal state, then reduces the member
//! responses with an [`EnsembleStrategy`].
//!
//! | Strategy | Result |
//! |----------|--------|
//! | [`EnsembleStrategy::BestOfN`] | Highest [`QualityWeights`] score, verbatim |
//! | [`EnsembleStrategy::Voting`] | Largest equivalence class |
//! | [`EnsembleStrategy::WeightedAverage`] | Weighted mean of numeric answers |
//! | [`EnsembleStrategy::Consensus`] | Largest class if at least M members agree |
//!
//! Failed members are kept in [`EnsembleResult::member_responses`] but are
//! ignored by every strategy.

mod aggregator;
pub mod numeric;
mod presets;
mod scoring;
pub mod similarity;

pub use aggregator::EnsembleAggregator;
pub use presets::EnsemblePreset;
pub use scoring::{looks_truncated, QualityWeights};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{ErrorInfo, ErrorKind, GenerationParams, Response};
use crate::{Error, ErrorContext, Result};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleStrategy {
    #[default]
    BestOfN,
    Voting,
    /// Numeric or flat-JSON answers; text answers fall back to best-of-N.
    WeightedAverage,
    /// `min_agreement` defaults to every successful member.
    Consensus { min_agreement: Option<usize> },
}

impl EnsembleStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnsembleStrategy::BestOfN => "best_of_n",
            EnsembleStrategy::Voting => "voting",
            EnsembleStrategy::WeightedAverage => "weighted_average",
            EnsembleStrategy::Consensus { .. } => "consensus",
        }
    }
}

impl fmt::Display for EnsembleStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleMember {
    pub backend_id: String,
    /// Empty means the backend's default model.
    pub model: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl EnsembleMember {
    pub fn new(backend_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            model: model.into(),
            weight: default_weight(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub members: Vec<EnsembleMember>,
    #[serde(default)]
    pub params: GenerationParams,
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f64,
    #[serde(default)]
    pub quality: QualityWeights,
}

fn default_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}

impl EnsembleConfig {
    pub fn new(members: Vec<EnsembleMember>) -> Self {
        Self {
            members,
            params: GenerationParams::default(),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            quality: QualityWeights::default(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_quality(mut self, quality: QualityWeights) -> Self {
        self.quality = quality;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.members.is_empty() {
            return Err(invalid("ensemble.members", "an ensemble needs at least one member"));
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(invalid(
                "ensemble.similarity_threshold",
                "must be in (0, 1]",
            ));
        }
        for (i, m) in self.members.iter().enumerate() {
            if m.backend_id.trim().is_empty() {
                return Err(invalid(&format!("ensemble.members[{}].backend_id", i), "must not be empty"));
            }
            if !m.weight.is_finite() || m.weight < 0.0 {
                return Err(invalid(
                    &format!("ensemble.members[{}].weight", i),
                    "must be a non-negative number",
                ));
            }
        }
        self.params.validate()
    }
}

fn invalid(field: &str, msg: &str) -> Error {
    Error::validation_with_context(
        msg.to_string(),
        ErrorContext::new()
            .with_field_path(field)
            .with_source("ensemble_validator"),
    )
}

/// Outcome of one ensemble call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub final_text: String,
    /// Strategy that produced `final_text` (weighted average over text
    /// answers reports best-of-N).
    pub strategy_used: EnsembleStrategy,
    /// One entry per configured member, in configuration order.
    pub member_responses: Vec<Response>,
    /// Fraction of successful members in the winning equivalence class.
    pub agreement_score: f64,
    pub succeeded: bool,
    pub error: Option<ErrorInfo>,
}

impl EnsembleResult {
    pub fn success_count(&self) -> usize {
        self.member_responses.iter().filter(|r| r.succeeded).count()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(EnsembleConfig::new(vec![]).validate().is_err());
        let ok = EnsembleConfig::new(vec![EnsembleMember::new("a", "")]);
        assert!(ok.validate().is_ok());
        assert!(ok.clone().with_similarity_threshold(0.0).validate().is_err());
        let neg = EnsembleConfig::new(vec![EnsembleMember::new("a", "").with_weight(-1.0)]);
        assert!(neg.validate().is_err());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = "members:\n  - backend_id: openai\n    model: gpt-4o\n    weight: 0.6\n  - backend_id: gemini\n    model: ''\n";
        let cfg: EnsembleConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.members[1].weight, 1.0);
        assert_eq!(cfg.similarity_threshold, DEFAULT_SIMILARITY_THRESHOLD);
        assert_eq!(cfg.params, GenerationParams::default());
    }
}
