//! Native adapters for the current OS.
//!
//! Hosts (the FFI crate, the CLI tools) build their monitor and replay
//! engine from these constructors.  Off Windows every constructor fails
//! with `InvalidArgument`.

use std::sync::Arc;

use crate::errors::Result;
use crate::format::ClipboardBackend;
use crate::input::KeyboardSink;
use crate::monitor::ChangeListener;
use crate::replay::ClipboardWriter;
use crate::target::{WindowHandle, WindowSystem};

#[cfg(windows)]
mod native {
    use super::*;
    use crate::win32::{ClipboardListener, SendInputKeyboard, Win32Clipboard, Win32Windows};

    pub fn clipboard() -> Result<Arc<dyn ClipboardBackend>> {
        Ok(Arc::new(Win32Clipboard::new()))
    }

    pub fn clipboard_writer(owner: WindowHandle) -> Result<Arc<dyn ClipboardWriter>> {
        Ok(Arc::new(Win32Clipboard::with_owner(owner)))
    }

    pub fn windows() -> Result<Arc<dyn WindowSystem>> {
        Ok(Arc::new(Win32Windows))
    }

    pub fn keyboard() -> Result<Arc<dyn KeyboardSink>> {
        Ok(Arc::new(SendInputKeyboard))
    }

    pub struct Listener(ClipboardListener);

    impl Listener {
        pub fn start(target: Arc<dyn ChangeListener>) -> Result<Self> {
            ClipboardListener::start(target).map(Listener)
        }

        pub fn window(&self) -> WindowHandle {
            self.0.window()
        }

        pub fn stop(self) {
            self.0.stop();
        }
    }
}

#[cfg(not(windows))]
mod native {
    use super::*;
    use crate::errors::ClipReplayError;

    fn unsupported<T>() -> Result<T> {
        Err(ClipReplayError::InvalidArgument(
            "native clipboard and input require Windows".into(),
        ))
    }

    pub fn clipboard() -> Result<Arc<dyn ClipboardBackend>> {
        unsupported()
    }

    pub fn clipboard_writer(_owner: WindowHandle) -> Result<Arc<dyn ClipboardWriter>> {
        unsupported()
    }

    pub fn windows() -> Result<Arc<dyn WindowSystem>> {
        unsupported()
    }

    pub fn keyboard() -> Result<Arc<dyn KeyboardSink>> {
        unsupported()
    }

    pub struct Listener;

    impl Listener {
        pub fn start(_target: Arc<dyn ChangeListener>) -> Result<Self> {
            unsupported()
        }

        pub fn window(&self) -> WindowHandle {
            0
        }

        pub fn stop(self) {}
    }
}

pub use native::{clipboard, clipboard_writer, keyboard, windows, Listener};
