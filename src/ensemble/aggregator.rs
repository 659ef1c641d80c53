use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::numeric::{self, NumericValue};
use super::similarity;
use super::{EnsembleConfig, EnsembleResult, EnsembleStrategy};
use crate::batch::ConcurrencyController;
use crate::types::{ErrorInfo, ErrorKind, Request, Response};
use crate::Result;

/// Fans one prompt out to every ensemble member and reduces the answers.
#[derive(Debug, Clone)]
pub struct EnsembleAggregator {
    controller: ConcurrencyController,
}

impl EnsembleAggregator {
    pub fn new(controller: ConcurrencyController) -> Self {
        Self { controller }
    }

    /// One request per member, in configuration order.
    pub fn requests(prompt: &str, config: &EnsembleConfig) -> Vec<Request> {
        config
            .members
            .iter()
            .map(|m| Request::new(prompt, m.backend_id.clone(), m.model.clone(), config.params))
            .collect()
    }

    /// Query every member (bypassing any cache) and reduce.
    pub async fn generate(
        &self,
        prompt: &str,
        config: &EnsembleConfig,
        strategy: EnsembleStrategy,
    ) -> Result<EnsembleResult> {
        config.validate()?;
        let responses = self
            .controller
            .submit_batch(&Self::requests(prompt, config))
            .await?;
        Ok(Self::reduce(config, strategy, responses))
    }

    pub async fn generate_with_cancel(
        &self,
        prompt: &str,
        config: &EnsembleConfig,
        strategy: EnsembleStrategy,
        cancel: &CancellationToken,
    ) -> Result<EnsembleResult> {
        config.validate()?;
        let responses = self
            .controller
            .submit_batch_with_cancel(Self::requests(prompt, config), cancel)
            .await?;
        Ok(Self::reduce(config, strategy, responses))
    }

    /// Combine member responses (positional with `config.members`).
    pub fn reduce(
        config: &EnsembleConfig,
        strategy: EnsembleStrategy,
        responses: Vec<Response>,
    ) -> EnsembleResult {
        let successes: Vec<usize> = (0..responses.len())
            .filter(|&i| responses[i].succeeded)
            .collect();
        if successes.is_empty() {
            return all_failed(strategy, responses);
        }

        let texts: Vec<&str> = successes.iter().map(|&i| responses[i].text.as_str()).collect();
        let classes = similarity::partition(&texts, config.similarity_threshold);
        let winner = similarity::largest(&classes).unwrap_or(0);
        let n_ok = successes.len() as f64;
        let class_share = |c: usize| classes[c].len() as f64 / n_ok;

        let (final_text, strategy_used, agreement_score, error) = match strategy {
            EnsembleStrategy::BestOfN => {
                let (text, agreement) = best_of_n(config, &responses, &successes, &classes);
                (text, strategy, agreement, None)
            }
            EnsembleStrategy::Voting => {
                let text = texts[classes[winner][0]].to_string();
                (text, strategy, class_share(winner), None)
            }
            EnsembleStrategy::WeightedAverage => {
                match weighted(config, &responses, &successes) {
                    Some(text) => (text, strategy, class_share(winner), None),
                    None => {
                        debug!("non-numeric ensemble answers, falling back to best_of_n");
                        let (text, agreement) =
                            best_of_n(config, &responses, &successes, &classes);
                        (text, EnsembleStrategy::BestOfN, agreement, None)
                    }
                }
            }
            EnsembleStrategy::Consensus { min_agreement } => {
                let required = min_agreement.unwrap_or(successes.len()).max(1);
                let agreeing = classes[winner].len();
                if agreeing >= required {
                    let text = texts[classes[winner][0]].to_string();
                    (text, strategy, class_share(winner), None)
                } else {
                    let info = ErrorInfo::new(
                        ErrorKind::Disagreement,
                        format!(
                            "only {} of {} successful members agree ({} required)",
                            agreeing,
                            successes.len(),
                            required
                        ),
                    );
                    (String::new(), strategy, class_share(winner), Some(info))
                }
            }
        };

        let succeeded = error.is_none();
        if succeeded {
            info!(
                strategy = strategy_used.as_str(),
                members = responses.len(),
                succeeded_members = successes.len(),
                agreement_score,
                "ensemble reduced"
            );
        } else {
            warn!(
                strategy = strategy_used.as_str(),
                agreement_score,
                error_kind = ErrorKind::Disagreement.as_str(),
                "ensemble members disagree"
            );
        }
        EnsembleResult {
            final_text,
            strategy_used,
            member_responses: responses,
            agreement_score,
            succeeded,
            error,
        }
    }
}

/// Highest score wins, earliest member on ties. Agreement is the share of
/// the class holding the winner.
fn best_of_n(
    config: &EnsembleConfig,
    responses: &[Response],
    successes: &[usize],
    classes: &[Vec<usize>],
) -> (String, f64) {
    let mut best = 0;
    let mut best_score = f64::NEG_INFINITY;
    for (pos, &i) in successes.iter().enumerate() {
        let score = config.quality.score(&responses[i], config.params.max_tokens);
        if score > best_score {
            best = pos;
            best_score = score;
        }
    }
    let class_len = classes
        .iter()
        .find(|c| c.contains(&best))
        .map(|c| c.len())
        .unwrap_or(1);
    (
        responses[successes[best]].text.clone(),
        class_len as f64 / successes.len() as f64,
    )
}

fn weighted(config: &EnsembleConfig, responses: &[Response], successes: &[usize]) -> Option<String> {
    let values: Vec<(NumericValue, f64)> = successes
        .iter()
        .map(|&i| {
            let weight = config.members.get(i).map(|m| m.weight).unwrap_or(1.0);
            NumericValue::parse(&responses[i].text).map(|v| (v, weight))
        })
        .collect::<Option<_>>()?;
    numeric::weighted_average(&values).map(|v| numeric::render(&v))
}

fn all_failed(strategy: EnsembleStrategy, responses: Vec<Response>) -> EnsembleResult {
    let kinds: Vec<ErrorKind> = responses.iter().filter_map(|r| r.error_kind()).collect();
    let kind = match kinds.first() {
        Some(first) if kinds.iter().all(|k| k == first) => *first,
        _ => ErrorKind::BackendError,
    };
    let details: Vec<String> = responses
        .iter()
        .map(|r| match &r.error {
            Some(e) => format!("{}: {}", r.backend_id, e),
            None => format!("{}: no error reported", r.backend_id),
        })
        .collect();
    let message = format!(
        "0 of {} ensemble members succeeded: {}",
        responses.len(),
        details.join("; ")
    );
    warn!(
        strategy = strategy.as_str(),
        members = responses.len(),
        error_kind = kind.as_str(),
        "every ensemble member failed"
    );
    EnsembleResult {
        final_text: String::new(),
        strategy_used: strategy,
        member_responses: responses,
        agreement_score: 0.0,
        succeeded: false,
        error: Some(ErrorInfo::new(kind, message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::EnsembleMember;
    use std::time::Duration;

    fn config(n: usize) -> EnsembleConfig {
        EnsembleConfig::new(
            (0..n)
                .map(|i| EnsembleMember::new(format!("b{}", i), "m"))
                .collect(),
        )
    }

    fn ok(i: usize, text: &str) -> Response {
        Response::success(format!("b{}", i), text, 10, Duration::from_millis(5))
    }

    fn fail(i: usize, kind: ErrorKind) -> Response {
        Response::failure(format!("b{}", i), kind, "boom", Duration::ZERO)
    }

    #[test]
    fn test_best_of_n_ignores_failures() {
        let long = format!("```dockerfile\n{}\n```", "RUN npm ci\n".repeat(30));
        let responses = vec![ok(0, "FROM node"), fail(1, ErrorKind::Timeout), ok(2, &long)];
        let r = EnsembleAggregator::reduce(&config(3), EnsembleStrategy::BestOfN, responses);
        assert!(r.succeeded);
        assert_eq!(r.member_responses.len(), 3);
        assert_eq!(r.success_count(), 2);
        assert_eq!(r.final_text, long);
        assert_eq!(r.agreement_score, 0.5);
    }

    #[test]
    fn test_voting_picks_largest_class_then_earliest() {
        let responses = vec![
            ok(0, "replicas: 2"),
            ok(1, "replicas: 3"),
            ok(2, "Replicas: 3."),
            ok(3, "replicas: 2"),
            ok(4, "something else entirely"),
        ];
        let r = EnsembleAggregator::reduce(&config(5), EnsembleStrategy::Voting, responses);
        // two classes of size two; the class seen first wins
        assert_eq!(r.final_text, "replicas: 2");
        assert_eq!(r.agreement_score, 0.4);
    }

    #[test]
    fn test_consensus_disagreement() {
        let responses = vec![
            ok(0, "use port 8080"),
            ok(1, "use port 8080"),
            ok(2, "use port 9090 instead"),
        ];
        let r = EnsembleAggregator::reduce(
            &config(3),
            EnsembleStrategy::Consensus { min_agreement: Some(3) },
            responses.clone(),
        );
        assert!(!r.succeeded);
        assert_eq!(r.error_kind(), Some(ErrorKind::Disagreement));
        assert!((r.agreement_score - 2.0 / 3.0).abs() < 1e-9);

        let r = EnsembleAggregator::reduce(
            &config(3),
            EnsembleStrategy::Consensus { min_agreement: Some(2) },
            responses,
        );
        assert!(r.succeeded);
        assert_eq!(r.final_text, "use port 8080");
    }

    #[test]
    fn test_consensus_default_requires_all_successes() {
        let responses = vec![ok(0, "yes"), fail(1, ErrorKind::Network), ok(2, "yes")];
        let r = EnsembleAggregator::reduce(
            &config(3),
            EnsembleStrategy::Consensus { min_agreement: None },
            responses,
        );
        assert!(r.succeeded);
        assert_eq!(r.agreement_score, 1.0);
    }

    #[test]
    fn test_weighted_average_renormalizes_over_survivors() {
        let cfg = EnsembleConfig::new(vec![
            EnsembleMember::new("b0", "m").with_weight(3.0),
            EnsembleMember::new("b1", "m").with_weight(2.0),
            EnsembleMember::new("b2", "m").with_weight(1.0),
        ]);
        let responses = vec![ok(0, "8"), fail(1, ErrorKind::Auth), ok(2, "2")];
        let r = EnsembleAggregator::reduce(&cfg, EnsembleStrategy::WeightedAverage, responses);
        assert_eq!(r.strategy_used, EnsembleStrategy::WeightedAverage);
        assert_eq!(r.final_text, "6.5");
    }

    #[test]
    fn test_weighted_average_text_falls_back() {
        let responses = vec![ok(0, "short"), ok(1, &"a much longer answer ".repeat(20))];
        let r = EnsembleAggregator::reduce(&config(2), EnsembleStrategy::WeightedAverage, responses);
        assert_eq!(r.strategy_used, EnsembleStrategy::BestOfN);
        assert!(r.final_text.starts_with("a much longer"));
    }

    #[test]
    fn test_all_failed_aggregates_errors() {
        let responses = vec![fail(0, ErrorKind::Auth), fail(1, ErrorKind::Auth)];
        let r = EnsembleAggregator::reduce(&config(2), EnsembleStrategy::BestOfN, responses);
        assert!(!r.succeeded);
        assert_eq!(r.error_kind(), Some(ErrorKind::Auth));
        let msg = &r.error.as_ref().unwrap().message;
        assert!(msg.starts_with("0 of 2 ensemble members succeeded"));
        assert!(msg.contains("b0: auth: boom"));

        let mixed = vec![fail(0, ErrorKind::Auth), fail(1, ErrorKind::Timeout)];
        let r = EnsembleAggregator::reduce(&config(2), EnsembleStrategy::Voting, mixed);
        assert_eq!(r.error_kind(), Some(ErrorKind::BackendError));
    }
}
