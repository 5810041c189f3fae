//! Streaming error classification and bounded recovery

use super::ClientErrorCategory;
use crate::config::RetryPolicy;
use crate::error::ErrorKind;
use std::time::Duration;

/// Map a client error onto the event taxonomy.
///
/// Manifest failures are reported by clients under the network category
/// with a `manifest*` detail code; they are classified separately because
/// they are never retried.
pub fn classify(category: ClientErrorCategory, details: &str) -> ErrorKind {
    if details.to_ascii_lowercase().starts_with("manifest") {
        return ErrorKind::Manifest;
    }
    match category {
        ClientErrorCategory::Network => ErrorKind::Network,
        ClientErrorCategory::Media | ClientErrorCategory::Mux => ErrorKind::Media,
        ClientErrorCategory::KeySystem | ClientErrorCategory::Other => ErrorKind::Other,
    }
}

/// Decision for one streaming error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Recover in place after `delay`
    Retry {
        attempt: u32,
        delay: Duration,
        kind: ErrorKind,
    },
    /// Report and carry on; the client handles it
    Report,
    /// Tear down the client and end the session
    Terminal,
}

/// Retry budget for consecutive recoverable errors
#[derive(Debug, Clone)]
pub struct RetryTracker {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Restore the full budget after playback is healthy again
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn decide(&mut self, kind: ErrorKind, fatal: bool) -> RecoveryAction {
        if fatal || kind == ErrorKind::Manifest {
            return RecoveryAction::Terminal;
        }
        if !kind.is_retryable() {
            return RecoveryAction::Report;
        }
        if self.attempts >= self.policy.max_attempts {
            return RecoveryAction::Terminal;
        }
        self.attempts += 1;
        RecoveryAction::Retry {
            attempt: self.attempts,
            delay: self.policy.delay_for(self.attempts),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(ClientErrorCategory::Network, "manifestLoadError"),
            ErrorKind::Manifest
        );
        assert_eq!(
            classify(ClientErrorCategory::Network, "fragLoadTimeOut"),
            ErrorKind::Network
        );
        assert_eq!(
            classify(ClientErrorCategory::Mux, "fragParsingError"),
            ErrorKind::Media
        );
        assert_eq!(
            classify(ClientErrorCategory::KeySystem, "keySystemNoKeys"),
            ErrorKind::Other
        );
    }

    #[test]
    fn test_budget_with_backoff() {
        let mut tracker = RetryTracker::new(RetryPolicy::default());

        let delays: Vec<_> = (0..3)
            .map(|_| match tracker.decide(ErrorKind::Network, false) {
                RecoveryAction::Retry { delay, .. } => delay.as_millis(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000]);
        assert_eq!(tracker.decide(ErrorKind::Media, false), RecoveryAction::Terminal);

        tracker.reset();
        assert!(matches!(
            tracker.decide(ErrorKind::Media, false),
            RecoveryAction::Retry { attempt: 1, .. }
        ));
    }

    #[test]
    fn test_fatal_and_manifest_are_terminal() {
        let mut tracker = RetryTracker::new(RetryPolicy::default());
        assert_eq!(tracker.decide(ErrorKind::Network, true), RecoveryAction::Terminal);
        assert_eq!(tracker.decide(ErrorKind::Manifest, false), RecoveryAction::Terminal);
        assert_eq!(tracker.decide(ErrorKind::Other, false), RecoveryAction::Report);
        assert_eq!(tracker.attempts(), 0);
    }
}
