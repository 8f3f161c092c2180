//! Engine configuration.
//!
//! Every field has a serde default so partial TOML/JSON documents are
//! valid.  The host owns persistence; this module only parses.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ClipReplayError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub target: TargetConfig,
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Parse a JSON document (used by the FFI layer).
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ClipReplayError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Notifications closer than this to the last processed one are ignored.
    pub debounce_ms: u64,
    /// Fixed wait before the first clipboard probe, for slow writers.
    pub pre_probe_delay_ms: u64,
    /// Clipboard-open attempts before giving up on a change.
    pub open_retries: u32,
    /// Backoff unit; attempt `n` sleeps `n * open_backoff_ms`.
    pub open_backoff_ms: u64,
    /// Lifetime of a suppression token.
    pub suppression_ms: u64,
    /// A duplicate later than this after the last dispatch is an intentional repeat.
    pub repeat_window_ms: u64,
    pub queue_capacity: usize,
    /// Consult the format policy for the foreground application.
    pub per_app_filtering: bool,
    /// Skip content flagged by password managers.
    pub honor_exclusion_formats: bool,
    pub capture_text: bool,
    pub capture_images: bool,
    pub capture_files: bool,
    pub max_image_bytes: usize,
    /// Pixels sampled by the zero-alpha DIB check.
    pub zero_alpha_sample_pixels: usize,
    pub source_url_max_len: usize,
    pub title_max_chars: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 150,
            pre_probe_delay_ms: 0,
            open_retries: 5,
            open_backoff_ms: 10,
            suppression_ms: 500,
            repeat_window_ms: 200,
            queue_capacity: 100,
            per_app_filtering: false,
            honor_exclusion_formats: true,
            capture_text: true,
            capture_images: true,
            capture_files: true,
            max_image_bytes: 32 * 1024 * 1024,
            zero_alpha_sample_pixels: 4096,
            source_url_max_len: 2048,
            title_max_chars: 100,
        }
    }
}

impl CaptureConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn suppression(&self) -> Duration {
        Duration::from_millis(self.suppression_ms)
    }

    pub fn repeat_window(&self) -> Duration {
        Duration::from_millis(self.repeat_window_ms)
    }
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Shortcut sent after the clipboard has been written for a paste replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasteShortcut {
    #[default]
    CtrlV,
    ShiftInsert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Wait after every macro token; target applications drop input without it.
    pub inter_token_delay_ms: u64,
    /// Duration of one `{PAUSE}`.
    pub pause_ms: u64,
    /// Wait after switching focus before the first keystroke.
    pub focus_settle_ms: u64,
    pub paste_shortcut: PasteShortcut,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            inter_token_delay_ms: 30,
            pause_ms: 500,
            focus_settle_ms: 100,
            paste_shortcut: PasteShortcut::CtrlV,
        }
    }
}

impl ReplayConfig {
    /// All waits zeroed.  Used by tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            inter_token_delay_ms: 0,
            pause_ms: 0,
            focus_settle_ms: 0,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Re-resolve the foreground window on every request unless locked.
    pub auto_track: bool,
    /// `process:class` prefixes that are never valid targets.
    pub deny_patterns: Vec<String>,
    /// Reject windows that belong to the host process.
    pub ignore_own_process: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            auto_track: true,
            deny_patterns: Vec::new(),
            ignore_own_process: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.capture.debounce_ms, 150);
        assert_eq!(c.capture.open_retries, 5);
        assert_eq!(c.capture.suppression_ms, 500);
        assert_eq!(c.capture.queue_capacity, 100);
        assert_eq!(c.replay.pause_ms, 500);
        assert_eq!(c.replay.paste_shortcut, PasteShortcut::CtrlV);
        assert!(c.target.auto_track);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c = Config::from_toml_str(
            r#"
            [capture]
            debounce_ms = 100

            [target]
            deny_patterns = ["NOTEPAD:", ":EDIT"]
            "#,
        )
        .unwrap();
        assert_eq!(c.capture.debounce_ms, 100);
        assert_eq!(c.capture.queue_capacity, 100);
        assert_eq!(c.target.deny_patterns, vec!["NOTEPAD:", ":EDIT"]);
        assert_eq!(c.replay, ReplayConfig::default());
    }

    #[test]
    fn test_paste_shortcut_snake_case() {
        let c = Config::from_toml_str("[replay]\npaste_shortcut = \"shift_insert\"\n").unwrap();
        assert_eq!(c.replay.paste_shortcut, PasteShortcut::ShiftInsert);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml_str("[capture\n").unwrap_err();
        assert!(matches!(err, ClipReplayError::Config(_)));
    }

    #[test]
    fn test_json_round_trip_through_ffi_format() {
        let c = Config::from_json_str(r#"{"replay":{"inter_token_delay_ms":5}}"#).unwrap();
        assert_eq!(c.replay.inter_token_delay_ms, 5);
        assert_eq!(c.replay.focus_settle_ms, 100);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[capture]\nper_app_filtering = true").unwrap();
        let c = Config::load(file.path()).unwrap();
        assert!(c.capture.per_app_filtering);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
