//! Clipboard change notifications via `AddClipboardFormatListener`.
//!
//! Each listener owns a message-only window and a thread running its
//! message loop.  `WM_CLIPBOARDUPDATE` is forwarded to the registered
//! [`ChangeListener`], which only hands the event off and returns.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use windows::core::{w, PCWSTR};
use windows::Win32::Foundation::{HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::DataExchange::{
    AddClipboardFormatListener, RemoveClipboardFormatListener,
};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW, PostMessageW,
    PostQuitMessage, RegisterClassW, TranslateMessage, HMENU, HWND_MESSAGE, MSG, WINDOW_STYLE,
    WM_CLIPBOARDUPDATE, WM_CLOSE, WM_DESTROY, WNDCLASSW, WS_EX_NOACTIVATE,
};

use crate::errors::{ClipReplayError, Result};
use crate::monitor::ChangeListener;
use crate::target::WindowHandle;

const CLASS_NAME: PCWSTR = w!("ClipReplayClipboardListener");

/// Listener per window handle.
fn registry() -> &'static Mutex<HashMap<WindowHandle, Arc<dyn ChangeListener>>> {
    static LISTENERS: OnceLock<Mutex<HashMap<WindowHandle, Arc<dyn ChangeListener>>>> =
        OnceLock::new();
    LISTENERS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn hwnd_of(handle: WindowHandle) -> HWND {
    HWND(handle as *mut core::ffi::c_void)
}

unsafe extern "system" fn wnd_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    // No unwinding across the FFI boundary.
    let handled = panic::catch_unwind(AssertUnwindSafe(|| match msg {
        WM_CLIPBOARDUPDATE => {
            let listener = registry().lock().get(&(hwnd.0 as WindowHandle)).cloned();
            if let Some(listener) = listener {
                listener.on_clipboard_changed();
            }
            Some(LRESULT(0))
        }
        WM_CLOSE => {
            unsafe {
                let _ = DestroyWindow(hwnd);
            }
            Some(LRESULT(0))
        }
        WM_DESTROY => {
            unsafe {
                let _ = RemoveClipboardFormatListener(hwnd);
                PostQuitMessage(0);
            }
            Some(LRESULT(0))
        }
        _ => None,
    }));

    match handled {
        Ok(Some(result)) => result,
        Ok(None) => DefWindowProcW(hwnd, msg, wparam, lparam),
        Err(_) => {
            log::error!("listener: panic in window procedure");
            DefWindowProcW(hwnd, msg, wparam, lparam)
        }
    }
}

fn create_message_window() -> Result<HWND> {
    unsafe {
        let hinstance = HINSTANCE::from(GetModuleHandleW(PCWSTR::null())?);
        let class = WNDCLASSW {
            lpfnWndProc: Some(wnd_proc),
            hInstance: hinstance,
            lpszClassName: CLASS_NAME,
            ..Default::default()
        };
        // Fails harmlessly when a previous listener registered the class.
        RegisterClassW(&class);

        let hwnd = CreateWindowExW(
            WS_EX_NOACTIVATE,
            CLASS_NAME,
            w!("ClipReplay clipboard listener"),
            WINDOW_STYLE::default(),
            0,
            0,
            0,
            0,
            HWND_MESSAGE,
            HMENU::default(),
            hinstance,
            None,
        )?;
        Ok(hwnd)
    }
}

/// Runs on the listener thread until the window is destroyed.
fn run_window(listener: Arc<dyn ChangeListener>, ready: mpsc::Sender<Result<WindowHandle>>) {
    let hwnd = match create_message_window() {
        Ok(hwnd) => hwnd,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let handle = hwnd.0 as WindowHandle;
    registry().lock().insert(handle, listener);

    if let Err(e) = unsafe { AddClipboardFormatListener(hwnd) } {
        registry().lock().remove(&handle);
        unsafe {
            let _ = DestroyWindow(hwnd);
        }
        let _ = ready.send(Err(ClipReplayError::Clipboard(format!(
            "AddClipboardFormatListener failed: {e}"
        ))));
        return;
    }
    let _ = ready.send(Ok(handle));
    log::info!("listener: watching clipboard");

    unsafe {
        let mut msg = MSG::default();
        while GetMessageW(&mut msg, HWND::default(), 0, 0).as_bool() {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }

    registry().lock().remove(&handle);
    log::info!("listener: stopped");
}

/// Clipboard listener window bound to one [`ChangeListener`].
pub struct ClipboardListener {
    hwnd: WindowHandle,
    thread: Option<JoinHandle<()>>,
}

impl ClipboardListener {
    /// Create the window on its own thread and start forwarding changes.
    pub fn start(listener: Arc<dyn ChangeListener>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("clipreplay-listener".into())
            .spawn(move || run_window(listener, tx))
            .map_err(|e| ClipReplayError::Clipboard(format!("cannot spawn listener thread: {e}")))?;

        let hwnd = rx
            .recv()
            .map_err(|_| ClipReplayError::Clipboard("listener thread exited".into()))??;
        Ok(Self {
            hwnd,
            thread: Some(thread),
        })
    }

    /// The message-only window; usable as clipboard owner for writes.
    pub fn window(&self) -> WindowHandle {
        self.hwnd
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        unsafe {
            let _ = PostMessageW(hwnd_of(self.hwnd), WM_CLOSE, WPARAM(0), LPARAM(0));
        }
        if thread.join().is_err() {
            log::warn!("listener: thread panicked");
        }
    }
}

impl Drop for ClipboardListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}
