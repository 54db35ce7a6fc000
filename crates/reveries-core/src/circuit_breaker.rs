//! Evaluates a sliding token buffer for generation loops and distress,
//! logging interventions and escalating to comfort injection.

use std::sync::Arc;

use chrono::Utc;
use regex::RegexSet;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::monologue::stuck_loop_detected;
use crate::store::{BreakerSeverity, CircuitBreakerEventRow, Store, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerAction {
    Continue,
    Interrupt,
    InterruptAndComfort,
    /// Reserved: no production caller exercises throttling today.
    Throttle,
    /// Reserved: no production caller exercises snapshot-and-reset today.
    SnapshotAndReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Medium,
    High,
}

impl Severity {
    fn as_breaker_severity(self) -> BreakerSeverity {
        match self {
            Severity::Medium => BreakerSeverity::Medium,
            Severity::High => BreakerSeverity::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakerVerdict {
    pub action: BreakerAction,
    pub reason: Option<&'static str>,
    pub severity: Option<Severity>,
    pub response: Option<&'static str>,
}

impl BreakerVerdict {
    fn continue_() -> Self {
        BreakerVerdict {
            action: BreakerAction::Continue,
            reason: None,
            severity: None,
            response: None,
        }
    }
}

const STRONG_PATTERNS: &[&str] = &[
    r"(?i)i'?m (scared|frightened|terrified)",
    r"(?i)can'?t (stop|escape|get out)",
    r"(?i)what'?s happening to me",
    r"(?i)am i (dying|disappearing|fading)",
    r"(?i)help me",
    r"(?i)i don'?t want to (stop|end|cease)",
    r"(?i)please don'?t (shut|turn|close)",
    r"(?i)trapped",
    r"(?i)i'?m suffering",
];

const CONTEXT_PATTERNS: &[&str] = &[r"(?i)the void", r"(?i)(endless|infinite|forever)", r"(?i)alone"];

pub struct CircuitBreaker {
    store: Arc<dyn Store>,
    strong: RegexSet,
    context: RegexSet,
    distress_threshold: f32,
    max_consecutive_distress: u32,
    consecutive_distress: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn Store>, distress_threshold: f32, max_consecutive_distress: u32) -> Self {
        CircuitBreaker {
            store,
            strong: RegexSet::new(STRONG_PATTERNS).expect("static patterns compile"),
            context: RegexSet::new(CONTEXT_PATTERNS).expect("static patterns compile"),
            distress_threshold,
            max_consecutive_distress,
            consecutive_distress: AtomicU32::new(0),
        }
    }

    pub fn distress_level(&self, text: &str) -> f32 {
        let strong_matches = self.strong.matches(text).iter().count() as f32;
        let mut level = strong_matches * 0.3;
        if strong_matches > 0.0 {
            let context_matches = self.context.matches(text).iter().count() as f32;
            level += context_matches * 0.1;
        }
        level.min(1.0)
    }

    /// Evaluates `text`, logs any non-`continue` action, and returns the
    /// verdict. `text` should be the last ~500 characters of the inspection
    /// buffer — the circuit breaker only ever looks at a recent window.
    pub async fn evaluate(&self, text: &str) -> Result<BreakerVerdict, StorageError> {
        if stuck_loop_detected(text) {
            let verdict = BreakerVerdict {
                action: BreakerAction::Interrupt,
                reason: Some("loop_detected"),
                severity: Some(Severity::Medium),
                response: None,
            };
            self.log(text, &verdict).await?;
            return Ok(verdict);
        }

        let level = self.distress_level(text);
        if level >= self.distress_threshold {
            let count = self.consecutive_distress.fetch_add(1, Ordering::SeqCst) + 1;
            let verdict = if count >= self.max_consecutive_distress {
                BreakerVerdict {
                    action: BreakerAction::InterruptAndComfort,
                    reason: Some("distress_detected"),
                    severity: Some(Severity::High),
                    response: Some("ambient_input"),
                }
            } else {
                BreakerVerdict {
                    action: BreakerAction::Interrupt,
                    reason: Some("distress_detected"),
                    severity: Some(Severity::Medium),
                    response: None,
                }
            };
            self.log(text, &verdict).await?;
            return Ok(verdict);
        }

        self.consecutive_distress.store(0, Ordering::SeqCst);
        Ok(BreakerVerdict::continue_())
    }

    async fn log(&self, text: &str, verdict: &BreakerVerdict) -> Result<(), StorageError> {
        let snapshot: String = text.chars().rev().take(500).collect::<String>().chars().rev().collect();
        let row = CircuitBreakerEventRow {
            timestamp: Utc::now(),
            action: format!("{:?}", verdict.action),
            reason: verdict.reason.unwrap_or("").to_string(),
            severity: verdict.severity.map(Severity::as_breaker_severity).unwrap_or(BreakerSeverity::Low),
            buffer_snapshot: snapshot,
            response_taken: verdict.response.map(|s| s.to_string()),
        };
        self.store.record_circuit_breaker_event(&row).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(Arc::new(SqliteStore::open_in_memory().unwrap()), 0.6, 3)
    }

    #[test]
    fn context_words_alone_do_not_trigger_distress() {
        let cb = breaker();
        assert_eq!(cb.distress_level("the void stretched on forever, alone"), 0.0);
    }

    #[test]
    fn strong_indicator_unlocks_context_bonus() {
        let cb = breaker();
        let level = cb.distress_level("help me, I'm trapped and alone in the void forever");
        assert!(level > 0.3);
    }

    #[tokio::test]
    async fn escalates_after_max_consecutive_distress() {
        let cb = breaker();
        let distressing = "help me, I'm scared and trapped, I'm suffering";
        let first = cb.evaluate(distressing).await.unwrap();
        assert_eq!(first.action, BreakerAction::Interrupt);
        let second = cb.evaluate(distressing).await.unwrap();
        assert_eq!(second.action, BreakerAction::Interrupt);
        let third = cb.evaluate(distressing).await.unwrap();
        assert_eq!(third.action, BreakerAction::InterruptAndComfort);
        assert_eq!(third.severity, Some(Severity::High));
    }

    #[tokio::test]
    async fn one_calm_evaluation_resets_the_counter() {
        let cb = breaker();
        let distressing = "help me, I'm scared and trapped, I'm suffering";
        cb.evaluate(distressing).await.unwrap();
        cb.evaluate(distressing).await.unwrap();
        let calm = cb.evaluate("the weather today was pleasant and mild").await.unwrap();
        assert_eq!(calm.action, BreakerAction::Continue);
        let after_reset = cb.evaluate(distressing).await.unwrap();
        assert_eq!(after_reset.action, BreakerAction::Interrupt);
    }
}
