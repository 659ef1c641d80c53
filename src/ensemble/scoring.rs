//! Best-of-N quality heuristic.

use serde::{Deserialize, Serialize};

use crate::types::Response;

/// Weights of the Best-of-N heuristic.
///
/// Score = `per_char * min(len, target_max_chars)`
/// `+ code_fence * count("```")`
/// `+ file_marker * count("---FILE:")`
/// `+ newline * count('\n')`,
/// minus `below_band_penalty` when shorter than `target_min_chars` and
/// `truncation_penalty` when the text looks cut off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub per_char: f64,
    pub code_fence: f64,
    pub file_marker: f64,
    pub newline: f64,
    pub target_min_chars: usize,
    pub target_max_chars: usize,
    pub below_band_penalty: f64,
    pub truncation_penalty: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            per_char: 0.3,
            code_fence: 100.0,
            file_marker: 200.0,
            newline: 2.0,
            target_min_chars: 200,
            target_max_chars: 20_000,
            below_band_penalty: 300.0,
            truncation_penalty: 500.0,
        }
    }
}

impl QualityWeights {
    pub fn score(&self, response: &Response, max_tokens: u32) -> f64 {
        let text = response.text.as_str();
        let chars = text.chars().count();
        let mut score = self.per_char * chars.min(self.target_max_chars) as f64;
        score += self.code_fence * text.matches("```").count() as f64;
        score += self.file_marker * text.matches("---FILE:").count() as f64;
        score += self.newline * text.matches('\n').count() as f64;
        if chars < self.target_min_chars {
            score -= self.below_band_penalty;
        }
        if looks_truncated(text, response.generated_tokens(), max_tokens) {
            score -= self.truncation_penalty;
        }
        score
    }
}

/// Unclosed code fence, trailing ellipsis, or the token budget fully spent.
pub fn looks_truncated(text: &str, token_count: u32, max_tokens: u32) -> bool {
    let trimmed = text.trim_end();
    text.matches("```").count() % 2 == 1
        || trimmed.ends_with("...")
        || trimmed.ends_with('…')
        || (max_tokens > 0 && token_count >= max_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn resp(text: &str, tokens: u32) -> Response {
        Response::success("b", text, tokens, Duration::ZERO)
    }

    #[test]
    fn test_structured_content_wins() {
        let w = QualityWeights::default();
        let body = "x".repeat(300);
        let plain = resp(&body, 10);
        let fenced = resp(&format!("```\n{}\n```", body), 10);
        assert!(w.score(&fenced, 2000) > w.score(&plain, 2000));

        let files = resp(&format!("---FILE: main.tf\n{}", body), 10);
        assert!(w.score(&files, 2000) > w.score(&plain, 2000));
    }

    #[test]
    fn test_penalties() {
        let w = QualityWeights::default();
        let short = resp("ok", 1);
        assert_eq!(w.score(&short, 2000), 0.3 * 2.0 - 300.0);

        let body = "y".repeat(400);
        let whole = resp(&body, 100);
        let cut = resp(&format!("{}...", body), 100);
        assert!(w.score(&cut, 2000) < w.score(&whole, 2000) - 400.0);

        let budget_spent = resp(&body, 2000);
        assert_eq!(w.score(&budget_spent, 2000), w.score(&whole, 2000) - 500.0);
    }

    #[test]
    fn test_length_is_capped_at_band() {
        let w = QualityWeights::default();
        let huge = resp(&"z".repeat(50_000), 1);
        assert_eq!(w.score(&huge, 0), 0.3 * 20_000.0);
    }

    #[test]
    fn test_truncation_detection() {
        assert!(looks_truncated("```rust\nfn main() {", 5, 100));
        assert!(looks_truncated("and then…", 5, 100));
        assert!(!looks_truncated("```\ndone\n```", 5, 100));
        assert!(!looks_truncated("done", 5, 0));
    }

    #[test]
    fn test_prompt_tokens_do_not_count_against_budget() {
        let w = QualityWeights::default();
        let body = "y".repeat(400);
        // long prompt: 2300 total, 180 of them generated
        let hosted = resp(&body, 2300).with_completion_tokens(180);
        let local = resp(&body, 180);
        assert_eq!(w.score(&hosted, 2000), w.score(&local, 2000));

        let spent = resp(&body, 2300).with_completion_tokens(2000);
        assert_eq!(w.score(&spent, 2000), w.score(&local, 2000) - 500.0);
    }
}
