use std::fmt;

use serde::{Deserialize, Serialize};

use crate::runner::RunResult;

/// Token the engine prints when it aborts internally.
pub const FAILURE_SENTINEL: &str = "STOP";

/// Success or failure of one run plus the text to show the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the engine's artifacts may be consumed.
    pub success: bool,
    /// Captured output, verbatim.
    pub display_text: String,
}

/// Policy deciding whether a run succeeded.
pub trait OutcomeClassifier: Send + Sync + fmt::Debug {
    /// Classifies a finished run.
    fn classify(&self, run: &RunResult) -> Verdict;
}

/// Substring policy: any occurrence of the sentinel marks the run failed.
///
/// A successful log that legitimately contains the sentinel is misclassified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelClassifier {
    sentinel: String,
}

impl SentinelClassifier {
    /// Creates a classifier for a custom, non-empty sentinel.
    #[must_use]
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }

    /// Sentinel in use.
    #[must_use]
    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    /// Classifies raw output text.
    #[must_use]
    pub fn classify_text(&self, output: &str) -> Verdict {
        Verdict {
            success: !output.contains(self.sentinel.as_str()),
            display_text: output.to_string(),
        }
    }
}

impl Default for SentinelClassifier {
    fn default() -> Self {
        Self::new(FAILURE_SENTINEL)
    }
}

impl OutcomeClassifier for SentinelClassifier {
    fn classify(&self, run: &RunResult) -> Verdict {
        self.classify_text(&run.output)
    }
}

/// Classifies text with the default `STOP` sentinel.
#[must_use]
pub fn classify(output: &str) -> Verdict {
    SentinelClassifier::default().classify_text(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_marks_failure() {
        let log = " Mass out of range\n STOP\n";
        let verdict = classify(log);
        assert!(!verdict.success);
        assert_eq!(verdict.display_text, log);
    }

    #[test]
    fn sentinel_inside_a_word_still_counts() {
        assert!(!classify("NONSTOP evolution").success);
    }

    #[test]
    fn clean_output_succeeds() {
        let verdict = classify("     0.0000   1   1.0000\n");
        assert!(verdict.success);
        assert!(classify("").success);
        assert!(classify("stop").success);
    }

    #[test]
    fn classification_is_deterministic() {
        let text = "evolution finished\n";
        assert_eq!(classify(text), classify(text));
    }

    #[test]
    fn classifies_run_results_with_custom_sentinel() {
        let classifier = SentinelClassifier::new("FATAL");
        let run = RunResult {
            output: "FATAL ERROR\n".into(),
            pid: Some(1),
            exit_code: Some(0),
            elapsed_ms: 1,
        };
        assert!(!classifier.classify(&run).success);
        assert_eq!(classifier.sentinel(), "FATAL");
    }
}
