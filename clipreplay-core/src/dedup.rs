//! Immediate-repeat filtering against the last dispatched hash.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::content::ClipCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupVerdict {
    /// Different from the last dispatch; dispatch it.
    New,
    /// Same hash shortly after the last dispatch; drop silently.
    Duplicate,
    /// Same hash well after the last dispatch; the user copied it again.
    /// Signalled to collaborators but not re-dispatched.
    IntentionalRepeat,
}

#[derive(Debug)]
pub struct ContentDeduplicator {
    repeat_window: Duration,
    last: Option<(String, Instant)>,
}

impl ContentDeduplicator {
    pub fn new(repeat_window: Duration) -> Self {
        Self {
            repeat_window,
            last: None,
        }
    }

    /// Classify a hash without recording anything.
    pub fn check_at(&self, hash: &str, now: Instant) -> DedupVerdict {
        match &self.last {
            Some((last_hash, at)) if last_hash == hash => {
                if now.saturating_duration_since(*at) < self.repeat_window {
                    DedupVerdict::Duplicate
                } else {
                    DedupVerdict::IntentionalRepeat
                }
            }
            _ => DedupVerdict::New,
        }
    }

    pub fn is_duplicate(&self, candidate: &ClipCandidate) -> bool {
        self.check_at(candidate.content_hash(), Instant::now()) != DedupVerdict::New
    }

    /// Classify and, for new content, remember it as the last dispatch.
    pub fn observe_at(&mut self, hash: &str, now: Instant) -> DedupVerdict {
        let verdict = self.check_at(hash, now);
        if verdict == DedupVerdict::New {
            self.last = Some((hash.to_owned(), now));
        }
        verdict
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last.as_ref().map(|(h, _)| h.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(200);

    #[test]
    fn test_first_is_new() {
        let mut d = ContentDeduplicator::new(WINDOW);
        assert_eq!(d.observe_at("a", Instant::now()), DedupVerdict::New);
        assert_eq!(d.last_hash(), Some("a"));
    }

    #[test]
    fn test_quick_repeat_is_duplicate() {
        let mut d = ContentDeduplicator::new(WINDOW);
        let t0 = Instant::now();
        d.observe_at("a", t0);
        assert_eq!(d.observe_at("a", t0 + Duration::from_millis(50)), DedupVerdict::Duplicate);
    }

    #[test]
    fn test_late_repeat_is_intentional() {
        let mut d = ContentDeduplicator::new(WINDOW);
        let t0 = Instant::now();
        d.observe_at("a", t0);
        assert_eq!(
            d.observe_at("a", t0 + Duration::from_millis(250)),
            DedupVerdict::IntentionalRepeat
        );
        // Not re-recorded: timing stays anchored to the dispatch.
        assert_eq!(
            d.observe_at("a", t0 + Duration::from_millis(260)),
            DedupVerdict::IntentionalRepeat
        );
    }

    #[test]
    fn test_different_content_resets() {
        let mut d = ContentDeduplicator::new(WINDOW);
        let t0 = Instant::now();
        d.observe_at("a", t0);
        assert_eq!(d.observe_at("b", t0 + Duration::from_millis(1)), DedupVerdict::New);
        assert_eq!(d.observe_at("a", t0 + Duration::from_millis(2)), DedupVerdict::New);
    }

    #[test]
    fn test_check_does_not_record() {
        let d = ContentDeduplicator::new(WINDOW);
        assert_eq!(d.check_at("a", Instant::now()), DedupVerdict::New);
        assert!(d.last_hash().is_none());
    }
}
