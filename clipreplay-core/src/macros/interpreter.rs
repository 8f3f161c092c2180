//! Macro execution against a [`KeystrokeSimulator`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::config::ReplayConfig;
use crate::errors::{ClipReplayError, Result};
use crate::input::{Key, KeystrokeSimulator, ModifierMask};

use super::token::{tokenize, MacroToken, SpecialKey};

/// Longest single sleep inside a `{PAUSE}`; cancellation is checked
/// between slices.
const PAUSE_SLICE: Duration = Duration::from_millis(50);

/// Cooperative cancellation flag, checked between macro tokens.
///
/// Keystrokes already handed to the OS are not revoked.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Summary of one macro run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MacroReport {
    pub tokens: usize,
    /// Events the sink accepted, summed over all batches.
    pub events_accepted: u32,
}

pub struct MacroInterpreter {
    simulator: KeystrokeSimulator,
    inter_token_delay: Duration,
    pause: Duration,
}

impl MacroInterpreter {
    pub fn new(simulator: KeystrokeSimulator, config: &ReplayConfig) -> Self {
        Self {
            simulator,
            inter_token_delay: Duration::from_millis(config.inter_token_delay_ms),
            pause: Duration::from_millis(config.pause_ms),
        }
    }

    /// Run `text`; `false` only when cancelled.
    pub fn execute(&self, text: &str) -> bool {
        self.run(text, &CancelToken::new()).is_ok()
    }

    /// Tokenize and run `text`, one token at a time with the inter-token
    /// delay after each.  Sinks rejecting events do not stop the run.
    pub fn run(&self, text: &str, cancel: &CancelToken) -> Result<MacroReport> {
        let tokens = tokenize(text);
        let mut report = MacroReport::default();
        for token in &tokens {
            if cancel.is_cancelled() {
                log::info!("macro: cancelled after {} of {} tokens", report.tokens, tokens.len());
                return Err(ClipReplayError::Cancelled);
            }
            report.events_accepted += self.send(token, cancel)?;
            report.tokens += 1;
            if !self.inter_token_delay.is_zero() {
                thread::sleep(self.inter_token_delay);
            }
        }
        log::debug!(
            "macro: {} tokens, {} events accepted",
            report.tokens,
            report.events_accepted
        );
        Ok(report)
    }

    fn send(&self, token: &MacroToken, cancel: &CancelToken) -> Result<u32> {
        let sent = match *token {
            MacroToken::Literal(c) => self.simulator.type_char(c),
            MacroToken::ModifiedChar(m, c) => self.simulator.chord_char(m.mask(), c),
            MacroToken::SpecialKey(key) => self.special(ModifierMask::NONE, key, cancel)?,
            MacroToken::ModifiedSpecialKey(m, key) => self.special(m.mask(), key, cancel)?,
        };
        Ok(sent)
    }

    fn special(&self, modifiers: ModifierMask, key: SpecialKey, cancel: &CancelToken) -> Result<u32> {
        if key.is_pause {
            self.pause_for(self.pause.saturating_mul(key.repeat), cancel)?;
            return Ok(0);
        }
        Ok(self
            .simulator
            .chord_n(modifiers, Key::Virtual(key.vk), key.repeat))
    }

    fn pause_for(&self, total: Duration, cancel: &CancelToken) -> Result<()> {
        let mut left = total;
        while !left.is_zero() {
            if cancel.is_cancelled() {
                return Err(ClipReplayError::Cancelled);
            }
            let step = left.min(PAUSE_SLICE);
            thread::sleep(step);
            left -= step;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
