//! Self-write suppression and notification debounce.
//!
//! Before a replay writes the clipboard, the writer registers the hash it
//! is about to put there.  The next observed change consumes the token:
//! a matching hash inside the window is dropped before extraction.  The
//! token lives in a single slot, so a second registration before the first
//! echo arrives replaces it (last writer wins).

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::format::ClipFormat;

/// Expected echo of a programmatic clipboard write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressionToken {
    pub expected_hash: String,
    pub valid_until: Instant,
}

#[derive(Debug)]
pub struct SuppressionGuard {
    window: Duration,
    slot: Mutex<Option<SuppressionToken>>,
}

/// Shared handle given to the replay side.
pub type SuppressionHandle = Arc<SuppressionGuard>;

impl SuppressionGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slot: Mutex::new(None),
        }
    }

    /// Expect `hash` to echo back within the suppression window.
    pub fn register(&self, hash: &str) {
        self.register_at(hash, Instant::now());
    }

    pub fn register_at(&self, hash: &str, now: Instant) {
        let mut slot = self.slot.lock();
        if let Some(old) = slot.as_ref() {
            if old.valid_until > now {
                log::debug!("guard: replacing live suppression token");
            }
        }
        *slot = Some(SuppressionToken {
            expected_hash: hash.to_owned(),
            valid_until: now + self.window,
        });
    }

    /// Remove the token and return it if it had not expired.
    ///
    /// Called once per observed change; an expired token is discarded.
    pub fn take_live(&self, now: Instant) -> Option<SuppressionToken> {
        self.slot.lock().take().filter(|t| now < t.valid_until)
    }

    /// Consume the token and report whether `observed_hash` is its echo.
    pub fn should_suppress_at(&self, observed_hash: &str, now: Instant) -> bool {
        self.take_live(now)
            .map_or(false, |t| t.expected_hash == observed_hash)
    }

    /// True while a live token waits for its echo.
    pub fn is_armed_at(&self, now: Instant) -> bool {
        self.slot
            .lock()
            .as_ref()
            .map_or(false, |t| now < t.valid_until)
    }
}

/// Drops notifications that arrive too soon after the last processed one.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Accept the notification at `now` unless it falls inside the window.
    pub fn accept_at(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

/// What the clipboard holds, as far as capture is concerned.
///
/// `Empty` drives the host's erase notification; `Unsupported` must not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipboardState {
    Empty,
    Unsupported,
    Supported,
}

pub fn classify_formats(formats: &[ClipFormat]) -> ClipboardState {
    if formats.is_empty() {
        ClipboardState::Empty
    } else if formats.iter().any(ClipFormat::is_supported) {
        ClipboardState::Supported
    } else {
        ClipboardState::Unsupported
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CF_UNICODETEXT, ClipFormat};

    const WINDOW: Duration = Duration::from_millis(500);

    #[test]
    fn test_matching_echo_inside_window_suppressed() {
        let guard = SuppressionGuard::new(WINDOW);
        let t0 = Instant::now();
        guard.register_at("H", t0);
        assert!(guard.should_suppress_at("H", t0 + Duration::from_millis(100)));
        // Consumed: the same hash again is not suppressed.
        assert!(!guard.should_suppress_at("H", t0 + Duration::from_millis(120)));
    }

    #[test]
    fn test_echo_after_expiry_not_suppressed() {
        let guard = SuppressionGuard::new(WINDOW);
        let t0 = Instant::now();
        guard.register_at("H", t0);
        assert!(!guard.should_suppress_at("H", t0 + Duration::from_millis(600)));
        assert!(!guard.is_armed_at(t0));
    }

    #[test]
    fn test_mismatch_consumes_token() {
        let guard = SuppressionGuard::new(WINDOW);
        let t0 = Instant::now();
        guard.register_at("H", t0);
        assert!(!guard.should_suppress_at("OTHER", t0 + Duration::from_millis(10)));
        assert!(!guard.should_suppress_at("H", t0 + Duration::from_millis(20)));
    }

    #[test]
    fn test_second_write_replaces_first() {
        let guard = SuppressionGuard::new(WINDOW);
        let t0 = Instant::now();
        guard.register_at("FIRST", t0);
        guard.register_at("SECOND", t0 + Duration::from_millis(10));
        assert!(!guard.should_suppress_at("FIRST", t0 + Duration::from_millis(20)));
    }

    #[test]
    fn test_armed_state() {
        let guard = SuppressionGuard::new(WINDOW);
        let t0 = Instant::now();
        assert!(!guard.is_armed_at(t0));
        guard.register_at("H", t0);
        assert!(guard.is_armed_at(t0 + Duration::from_millis(499)));
        assert!(!guard.is_armed_at(t0 + WINDOW));
    }

    #[test]
    fn test_debounce_window() {
        let mut d = Debouncer::new(Duration::from_millis(150));
        let t0 = Instant::now();
        assert!(d.accept_at(t0));
        assert!(!d.accept_at(t0 + Duration::from_millis(149)));
        assert!(d.accept_at(t0 + Duration::from_millis(150)));
        assert!(!d.accept_at(t0 + Duration::from_millis(200)));
    }

    #[test]
    fn test_classify_formats() {
        assert_eq!(classify_formats(&[]), ClipboardState::Empty);
        let unsupported = [ClipFormat::new(0xC123, Some("Ole Private Data".into()))];
        assert_eq!(classify_formats(&unsupported), ClipboardState::Unsupported);
        let text = [ClipFormat::new(CF_UNICODETEXT, None)];
        assert_eq!(classify_formats(&text), ClipboardState::Supported);
    }
}
