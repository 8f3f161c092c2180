//! `clipreplay_core` -- Clipboard capture-and-replay engine.
//!
//! This crate contains all pipeline and replay logic.  OS interaction sits
//! behind small traits so the whole engine runs against fakes in tests;
//! the Win32 adapters live in [`win32`] and are only compiled on Windows.
//! It can be consumed by:
//! - `clipreplay-ffi` (C ABI DLL for the clipboard manager front end)
//! - `clipreplay-cli` (standalone CLI tools)
//!
//! # Capture pipeline
//!
//! OS event -> [`monitor`] (debounce, [`guard`] suppression) -> [`extract`]
//! -> [`dedup`] -> [`queue`] -> consumers.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`errors`] | `ClipReplayError` enum via `thiserror` |
//! | [`config`] | TOML/JSON configuration with serde defaults |
//! | [`content`] | `ClipCandidate`, content hashing, image signatures |
//! | [`format`] | Clipboard format names, allow-sets, `ClipboardBackend` trait |
//! | [`extract`] | Priority-ordered extraction of one candidate per change |
//! | [`guard`] | Suppression token and notification debounce |
//! | [`dedup`] | Immediate-repeat filtering |
//! | [`memory`] | In-memory `ClipboardBackend` for tests and non-OS hosts |
//! | [`platform`] | Native adapter constructors for hosts |
//! | [`queue`] | Bounded drop-oldest dispatch queue |
//! | [`monitor`] | Notification handling and the capture worker |
//! | [`input`] | `KeyInput` batches and the keystroke simulator |
//! | [`macros`] | Macro tokenizer and interpreter |
//! | [`target`] | Foreground target resolution, deny patterns, lock |
//! | [`replay`] | Paste/macro replay into the resolved target |
//! | `win32` | Win32 adapters (Windows only) |

pub mod config;
pub mod content;
pub mod dedup;
pub mod errors;
pub mod extract;
pub mod format;
pub mod guard;
pub mod input;
pub mod macros;
pub mod memory;
pub mod monitor;
pub mod platform;
pub mod queue;
pub mod replay;
pub mod target;

#[cfg(windows)]
pub mod win32;
