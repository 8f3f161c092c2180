//! Win32 adapters for the platform seams.
//!
//! | Module | Implements |
//! |--------|-----------|
//! | [`clipboard`] | `ClipboardBackend`, `ClipboardWriter` |
//! | [`listener`] | message-only window feeding a `ChangeListener` |
//! | [`window`] | `WindowSystem` |
//! | [`keyboard`] | `KeyboardSink` via `SendInput` |

pub mod clipboard;
pub mod keyboard;
pub mod listener;
pub mod window;

pub use clipboard::Win32Clipboard;
pub use keyboard::SendInputKeyboard;
pub use listener::ClipboardListener;
pub use window::Win32Windows;

use std::ffi::OsString;
use std::os::windows::ffi::OsStringExt;

/// UTF-16 buffer to `String`, lossy.
pub(crate) fn wide_to_string(buf: &[u16]) -> String {
    OsString::from_wide(buf).to_string_lossy().into_owned()
}
