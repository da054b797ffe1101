//! Classification of raw agent output into retry decisions.
//!
//! [`classify`] is pure: text, exit status, attempt number and the current
//! instant in, [`RetryDecision`] out. [`RetryManager`] wraps it with the
//! notification side effect and the wall clock.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::core::reset_time::parse_reset_time;
use crate::core::rules::{Backoff, ClassifierRules};
use crate::core::types::{OutcomeKind, RetryDecision};

/// Compiled form of [`ClassifierRules`].
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: ClassifierRules,
    session_patterns: Vec<Regex>,
}

impl Classifier {
    pub fn new(rules: ClassifierRules) -> Result<Self> {
        let session_patterns = rules
            .session_limit_patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("compile session limit pattern '{pattern}'"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            rules,
            session_patterns,
        })
    }

    /// Classify one invocation.
    ///
    /// Precedence: success, session limit, transient network, other.
    /// `attempt` is 1-based; 0 is treated as 1.
    pub fn classify<Tz: TimeZone>(
        &self,
        raw_output: &str,
        exit_status: i32,
        attempt: u32,
        now: &DateTime<Tz>,
    ) -> RetryDecision {
        let lowered = raw_output.to_lowercase();
        let session_limited = self.session_patterns.iter().any(|re| re.is_match(raw_output));
        let has_marker = self
            .rules
            .error_markers
            .iter()
            .any(|marker| lowered.contains(&marker.to_lowercase()));

        if exit_status == 0 && !session_limited && !has_marker {
            return RetryDecision::success();
        }

        if session_limited {
            let wait = match parse_reset_time(raw_output, now) {
                Some(reset) => {
                    let remaining = (reset - now.with_timezone(&Utc)).num_seconds().max(0);
                    Duration::from_secs(remaining as u64 + self.rules.reset_time_buffer_secs)
                }
                None => Duration::from_secs(self.rules.default_session_wait_secs),
            };
            return RetryDecision::retry(OutcomeKind::SessionLimit, wait);
        }

        if self
            .rules
            .network_keywords
            .iter()
            .any(|kw| lowered.contains(&kw.to_lowercase()))
        {
            return RetryDecision::retry(
                OutcomeKind::TransientNetwork,
                backoff_wait(self.rules.network_backoff, attempt),
            );
        }

        RetryDecision::retry(
            OutcomeKind::OtherRetryable,
            backoff_wait(self.rules.other_backoff, attempt),
        )
    }
}

/// `min(base * 2^(attempt-1), cap)`, saturating for large attempts.
pub fn backoff_wait(backoff: Backoff, attempt: u32) -> Duration {
    let exponent = attempt.max(1) - 1;
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    Duration::from_secs(backoff.base_secs.saturating_mul(factor).min(backoff.cap_secs))
}

/// Callback invoked once per retry decision with a message and the wait.
pub type RetryNotifier = Box<dyn FnMut(&str, Duration) + Send>;

/// Classifier plus notification side effect.
pub struct RetryManager {
    classifier: Classifier,
    notifier: RetryNotifier,
}

impl RetryManager {
    pub fn new(classifier: Classifier, notifier: RetryNotifier) -> Self {
        Self {
            classifier,
            notifier,
        }
    }

    /// Classify against the local wall clock. Clock-form reset times
    /// ("resets 2am") are read in the local timezone.
    pub fn check(&mut self, raw_output: &str, exit_status: i32, attempt: u32) -> RetryDecision {
        self.check_at(raw_output, exit_status, attempt, &Local::now())
    }

    /// Classify against an explicit instant. Fires the notifier exactly once
    /// when the decision is to retry.
    pub fn check_at<Tz: TimeZone>(
        &mut self,
        raw_output: &str,
        exit_status: i32,
        attempt: u32,
        now: &DateTime<Tz>,
    ) -> RetryDecision {
        let decision = self.classifier.classify(raw_output, exit_status, attempt, now);
        if decision.should_retry {
            let message = retry_message(decision, attempt);
            debug!(
                kind = ?decision.kind,
                attempt,
                wait_secs = decision.wait_seconds(),
                "retry decided"
            );
            (self.notifier)(&message, decision.wait);
        }
        decision
    }
}

fn retry_message(decision: RetryDecision, attempt: u32) -> String {
    let secs = decision.wait.as_secs();
    match decision.kind {
        OutcomeKind::SessionLimit => format!("session limit reached, waiting {secs}s for reset"),
        OutcomeKind::TransientNetwork => {
            format!("transient network error (attempt {attempt}), retrying in {secs}s")
        }
        OutcomeKind::OtherRetryable => {
            format!("agent error (attempt {attempt}), retrying in {secs}s")
        }
        OutcomeKind::Success => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::FixedOffset;

    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(ClassifierRules::default()).expect("default rules compile")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0)
            .single()
            .expect("valid time")
    }

    #[test]
    fn zero_exit_without_markers_is_success() {
        let decision = classifier().classify("Still working...", 0, 1, &now());
        assert_eq!(decision, RetryDecision::success());
    }

    #[test]
    fn zero_exit_with_api_error_marker_retries() {
        let decision = classifier().classify("API Error: 500 internal", 0, 1, &now());
        assert_eq!(decision.kind, OutcomeKind::OtherRetryable);
        assert!(decision.should_retry);
    }

    #[test]
    fn session_limit_without_reset_time_waits_default() {
        let decision = classifier().classify("Session limit reached", 1, 4, &now());
        assert_eq!(decision.kind, OutcomeKind::SessionLimit);
        assert_eq!(decision.wait, Duration::from_secs(3600));
    }

    #[test]
    fn clock_reset_is_read_in_the_callers_timezone() {
        let pacific = FixedOffset::west_opt(7 * 3600).expect("offset");
        let local_now = pacific
            .with_ymd_and_hms(2025, 6, 1, 0, 23, 0)
            .single()
            .expect("valid time");
        let mut manager = RetryManager::new(classifier(), Box::new(|_: &str, _: Duration| {}));

        let decision = manager.check_at("Session limit reached. Resets 2am", 1, 1, &local_now);

        assert_eq!(decision.kind, OutcomeKind::SessionLimit);
        // 01:37 until 02:00 local, plus the 300s buffer.
        assert_eq!(decision.wait, Duration::from_secs(97 * 60 + 300));
    }

    #[test]
    fn session_limit_with_reset_time_waits_until_reset_plus_buffer() {
        let reset = now().timestamp() + 1200;
        let text = format!("Claude usage limit reached|{reset}");
        let decision = classifier().classify(&text, 1, 1, &now());
        assert_eq!(decision.kind, OutcomeKind::SessionLimit);
        assert_eq!(decision.wait, Duration::from_secs(1200 + 300));
    }

    #[test]
    fn session_limit_reset_in_past_waits_only_buffer() {
        let reset = now().timestamp() - 60;
        let text = format!("usage limit reached|{reset}");
        let decision = classifier().classify(&text, 0, 1, &now());
        assert_eq!(decision.wait, Duration::from_secs(300));
    }

    #[test]
    fn session_limit_takes_precedence_over_network() {
        let decision = classifier().classify("network: usage limit reached", 1, 1, &now());
        assert_eq!(decision.kind, OutcomeKind::SessionLimit);
    }

    #[test]
    fn network_keywords_are_case_insensitive() {
        let decision = classifier().classify("Connection RESET by peer", 1, 1, &now());
        assert_eq!(decision.kind, OutcomeKind::TransientNetwork);
        assert_eq!(decision.wait, Duration::from_secs(5));
    }

    #[test]
    fn other_errors_use_medium_backoff() {
        let c = classifier();
        let waits: Vec<u64> = (1..=8)
            .map(|attempt| c.classify("boom", 2, attempt, &now()).wait.as_secs())
            .collect();
        assert_eq!(waits, vec![10, 20, 40, 80, 160, 320, 600, 600]);
    }

    #[test]
    fn backoff_is_monotonic_and_capped_for_huge_attempts() {
        for backoff in [
            ClassifierRules::default().network_backoff,
            ClassifierRules::default().other_backoff,
        ] {
            let mut previous = Duration::ZERO;
            for attempt in (1..200).chain([u32::MAX - 1, u32::MAX]) {
                let wait = backoff_wait(backoff, attempt);
                assert!(wait >= previous, "attempt {attempt} decreased");
                assert!(wait <= Duration::from_secs(backoff.cap_secs));
                previous = wait;
            }
        }
    }

    #[test]
    fn attempt_zero_behaves_like_first_attempt() {
        let backoff = ClassifierRules::default().network_backoff;
        assert_eq!(backoff_wait(backoff, 0), backoff_wait(backoff, 1));
    }

    #[test]
    fn notifier_fires_once_per_retry_and_never_on_success() {
        let calls: Arc<Mutex<Vec<(String, Duration)>>> = Arc::default();
        let sink = Arc::clone(&calls);
        let mut manager = RetryManager::new(
            classifier(),
            Box::new(move |msg: &str, wait: Duration| {
                sink.lock().expect("lock").push((msg.to_string(), wait));
            }),
        );

        manager.check_at("done", 0, 1, &now());
        manager.check_at("network unreachable", 1, 2, &now());
        manager.check_at("segfault", 139, 1, &now());

        let calls = calls.lock().expect("lock");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, Duration::from_secs(10));
        assert!(calls[0].0.contains("network"));
        assert_eq!(calls[1].1, Duration::from_secs(10));
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let rules = ClassifierRules {
            session_limit_patterns: vec!["(unclosed".to_string()],
            ..ClassifierRules::default()
        };
        let err = Classifier::new(rules).unwrap_err();
        assert!(err.to_string().contains("session limit pattern"));
    }
}
