//! Replay target resolution.
//!
//! The target is normally the foreground window, re-read on every request
//! (auto-tracking).  Locking pins the current target until unlocked.  Any
//! candidate matching a deny pattern is rejected.
//!
//! # Deny patterns
//!
//! `process:class`, each side a case-insensitive prefix; an empty side is
//! a wildcard.  `"NOTEPAD:"` rejects every Notepad window, `":EDIT"` any
//! window whose class starts with `EDIT`.  A pattern without `:` names a
//! process only.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::config::TargetConfig;
use crate::errors::{ClipReplayError, Result};

/// Raw OS window handle.
pub type WindowHandle = isize;

/// Owned snapshot of a candidate target window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetDescriptor {
    pub process_name: String,
    pub window_class: String,
    pub window_title: String,
    pub window_handle: WindowHandle,
    pub process_id: u32,
}

/// Window-manager seam.
pub trait WindowSystem: Send + Sync {
    fn foreground_window(&self) -> Option<WindowHandle>;

    /// Describe a window; `None` if it no longer exists.
    fn describe(&self, handle: WindowHandle) -> Option<TargetDescriptor>;

    fn is_window(&self, handle: WindowHandle) -> bool;

    /// Ask the OS to bring `handle` to the foreground.  Focus transfer is
    /// asynchronous; `true` only means the request was accepted.
    fn focus(&self, handle: WindowHandle) -> bool;

    fn own_process_id(&self) -> u32 {
        std::process::id()
    }
}

// ---------------------------------------------------------------------------
// Deny patterns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenyPattern {
    process: String,
    class: String,
}

impl DenyPattern {
    pub fn parse(pattern: &str) -> Self {
        let (process, class) = pattern.split_once(':').unwrap_or((pattern, ""));
        Self {
            process: process.trim().to_lowercase(),
            class: class.trim().to_lowercase(),
        }
    }

    pub fn matches(&self, process_name: &str, window_class: &str) -> bool {
        prefix_ci(&self.process, process_name) && prefix_ci(&self.class, window_class)
    }

    pub fn matches_target(&self, target: &TargetDescriptor) -> bool {
        self.matches(&target.process_name, &target.window_class)
    }
}

fn prefix_ci(prefix: &str, actual: &str) -> bool {
    prefix.is_empty() || actual.to_lowercase().starts_with(prefix)
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    AutoTrack,
    Locked,
}

pub struct TargetResolver {
    windows: Arc<dyn WindowSystem>,
    deny: Vec<DenyPattern>,
    ignore_own_process: bool,
    auto_track: bool,
    mode: TargetMode,
    current: Option<TargetDescriptor>,
}

impl TargetResolver {
    pub fn new(windows: Arc<dyn WindowSystem>, config: &TargetConfig) -> Self {
        Self {
            windows,
            deny: config.deny_patterns.iter().map(|p| DenyPattern::parse(p)).collect(),
            ignore_own_process: config.ignore_own_process,
            auto_track: config.auto_track,
            mode: TargetMode::AutoTrack,
            current: None,
        }
    }

    pub fn mode(&self) -> TargetMode {
        self.mode
    }

    pub fn current_target(&self) -> Option<&TargetDescriptor> {
        self.current.as_ref()
    }

    /// True if `target` is acceptable for replay.
    pub fn is_allowed(&self, target: &TargetDescriptor) -> bool {
        if self.ignore_own_process && target.process_id == self.windows.own_process_id() {
            return false;
        }
        !self.deny.iter().any(|p| p.matches_target(target))
    }

    /// Resolve the replay target.
    ///
    /// Locked: the pinned target, while its window still exists.
    /// Otherwise the foreground window, unless auto-tracking is off and a
    /// target was already resolved.
    pub fn resolve_foreground_target(&mut self) -> Option<TargetDescriptor> {
        if self.mode == TargetMode::Locked {
            match &self.current {
                Some(t) if self.windows.is_window(t.window_handle) => return Some(t.clone()),
                _ => {
                    log::info!("target: locked window is gone, unlocking");
                    self.mode = TargetMode::AutoTrack;
                    self.current = None;
                }
            }
        }

        if !self.auto_track {
            if let Some(t) = &self.current {
                if self.windows.is_window(t.window_handle) {
                    return Some(t.clone());
                }
            }
        }

        let Some(handle) = self.windows.foreground_window() else {
            log::debug!("target: no foreground window");
            return None;
        };
        let candidate = self.windows.describe(handle)?;
        if !self.is_allowed(&candidate) {
            log::debug!(
                "target: rejected {}:{}",
                candidate.process_name,
                candidate.window_class
            );
            return None;
        }
        self.current = Some(candidate.clone());
        Some(candidate)
    }

    /// Lock onto the current target, or return to auto-tracking.
    ///
    /// Locking resolves the foreground window first.  When that window is
    /// not eligible the last resolved target is locked instead, provided it
    /// still exists; otherwise the resolver stays in auto-track mode and an
    /// error is returned.
    pub fn set_target_lock(&mut self, locked: bool) -> Result<()> {
        if !locked {
            self.mode = TargetMode::AutoTrack;
            return Ok(());
        }
        if self.resolve_foreground_target().is_none() {
            let alive = self
                .current
                .as_ref()
                .map_or(false, |t| self.windows.is_window(t.window_handle));
            if !alive {
                self.current = None;
                return Err(ClipReplayError::Target("no target to lock".into()));
            }
            log::debug!("target: foreground not eligible, locking last target");
        }
        self.mode = TargetMode::Locked;
        Ok(())
    }

    /// Focus `target` and wait `settle` for the switch to land.
    pub fn activate(&self, target: &TargetDescriptor, settle: Duration) -> Result<()> {
        if self.windows.foreground_window() == Some(target.window_handle) {
            return Ok(());
        }
        if !self.windows.focus(target.window_handle) {
            return Err(ClipReplayError::Target(format!(
                "cannot focus {} ({})",
                target.window_title, target.process_name
            )));
        }
        if !settle.is_zero() {
            thread::sleep(settle);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
