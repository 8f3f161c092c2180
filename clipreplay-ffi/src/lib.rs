//! C ABI DLL for clipreplay -- loadable by the clipboard manager front end,
//! ctypes, C#, or any FFI consumer.
//!
//! All exported functions follow the convention:
//! - Return `i32` status code: `CLIPREPLAY_OK=0`, `CLIPREPLAY_ERROR=-1`;
//!   `clipreplay_monitor_next` may also return `CLIPREPLAY_TIMEOUT` or
//!   `CLIPREPLAY_CLOSED`
//! - String outputs allocated by Rust, freed via `clipreplay_free_string()`
//! - Handles allocated by `*_new`, released by the matching `*_free`;
//!   `*_free` must not race any other call on the same handle
//! - Last error retrievable via `clipreplay_last_error()`
//!
//! Configuration is passed as a JSON document with the same shape as the
//! TOML file; null means defaults.

use std::cell::RefCell;
use std::ffi::{c_char, CStr, CString};
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use clipreplay_core::config::Config;
use clipreplay_core::content::{ClipCandidate, Sha256Hasher, SourceInfo, TextPayload};
use clipreplay_core::macros::{self, CancelToken};
use clipreplay_core::monitor::{ChangeListener, ClipboardMonitor, MonitorHooks};
use clipreplay_core::platform;
use clipreplay_core::queue::{QueueReader, Recv};
use clipreplay_core::replay::ReplayEngine;

pub const CLIPREPLAY_OK: i32 = 0;
pub const CLIPREPLAY_ERROR: i32 = -1;
pub const CLIPREPLAY_TIMEOUT: i32 = 1;
pub const CLIPREPLAY_CLOSED: i32 = 2;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Record `msg` and return `CLIPREPLAY_ERROR`.
fn fail(msg: &str) -> i32 {
    set_last_error(msg);
    CLIPREPLAY_ERROR
}

/// Borrow a C string as UTF-8.
///
/// # Safety
///
/// `ptr` must be null or a valid null-terminated string.
unsafe fn str_arg<'a>(ptr: *const c_char, name: &str) -> Result<&'a str, String> {
    if ptr.is_null() {
        return Err(format!("{name} is null"));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|e| format!("{name}: invalid UTF-8: {e}"))
}

/// Parse an optional JSON configuration.
///
/// # Safety
///
/// Same as [`str_arg`].
unsafe fn config_arg(ptr: *const c_char) -> Result<Config, String> {
    if ptr.is_null() {
        return Ok(Config::default());
    }
    let text = unsafe { str_arg(ptr, "config_json") }?;
    Config::from_json_str(text).map_err(|e| e.to_string())
}

/// Hand `json` to the caller through `out_json`.
///
/// # Safety
///
/// `out_json` must be a valid, non-null pointer.
unsafe fn write_json(out_json: *mut *mut c_char, json: String) -> i32 {
    match CString::new(json) {
        Ok(cstr) => {
            unsafe { *out_json = cstr.into_raw() };
            CLIPREPLAY_OK
        }
        Err(e) => fail(&format!("CString conversion failed: {e}")),
    }
}

/// Retrieve the last error message (thread-local).
///
/// Returns a pointer valid until the next clipreplay_* call on this thread.
/// Returns null if no error has occurred.
#[no_mangle]
pub extern "C" fn clipreplay_last_error() -> *const c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|s| s.as_ptr())
            .unwrap_or(ptr::null())
    })
}

/// Free a string previously allocated by a clipreplay_* function.
///
/// # Safety
///
/// `ptr` must be a pointer returned by a clipreplay_* function or null.
#[no_mangle]
pub unsafe extern "C" fn clipreplay_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(unsafe { CString::from_raw(ptr) });
    }
}

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

/// Report whether a macro stays within the close-sequence limit.
///
/// # Safety
///
/// `text` must be a valid null-terminated UTF-8 C string.
/// `out_safe` must be a valid pointer; receives 1 (safe) or 0.
#[no_mangle]
pub unsafe extern "C" fn clipreplay_is_macro_safe(text: *const c_char, out_safe: *mut i32) -> i32 {
    if out_safe.is_null() {
        return fail("out_safe is null");
    }
    let text = match unsafe { str_arg(text, "text") } {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    unsafe { *out_safe = i32::from(macros::is_macro_safe(text)) };
    CLIPREPLAY_OK
}

/// Tokenize a macro into a JSON array of tokens.
///
/// # Safety
///
/// `text` must be a valid null-terminated UTF-8 C string.
/// `*out_json` will be set to a heap-allocated string; free with
/// `clipreplay_free_string()`.
#[no_mangle]
pub unsafe extern "C" fn clipreplay_tokenize_macro(
    text: *const c_char,
    out_json: *mut *mut c_char,
) -> i32 {
    if out_json.is_null() {
        return fail("out_json is null");
    }
    let text = match unsafe { str_arg(text, "text") } {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    match serde_json::to_string(&macros::tokenize(text)) {
        Ok(json) => unsafe { write_json(out_json, json) },
        Err(e) => fail(&format!("JSON serialization failed: {e}")),
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Opaque monitor: capture worker, dispatch queue, OS listener window.
pub struct MonitorHandle {
    monitor: Arc<ClipboardMonitor>,
    reader: QueueReader<ClipCandidate>,
    listener: Mutex<Option<platform::Listener>>,
}

impl MonitorHandle {
    fn start(&self) -> clipreplay_core::errors::Result<()> {
        self.monitor.start_monitoring()?;
        let mut listener = self.listener.lock();
        if listener.is_none() {
            let target: Arc<dyn ChangeListener> = Arc::clone(&self.monitor) as _;
            *listener = Some(platform::Listener::start(target)?);
        }
        Ok(())
    }

    fn stop(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.stop();
        }
        self.monitor.stop_monitoring();
    }

    fn close(&self) {
        self.stop();
        self.monitor.close();
    }

    /// Listener window, or 0 when not listening.
    fn owner_window(&self) -> isize {
        self.listener.lock().as_ref().map_or(0, |l| l.window())
    }
}

/// Create a monitor for the OS clipboard.  Not started.
///
/// # Safety
///
/// `config_json` must be null or a valid null-terminated UTF-8 C string.
/// `out_handle` must be a valid pointer; receives a handle to release with
/// `clipreplay_monitor_free()`.
#[no_mangle]
pub unsafe extern "C" fn clipreplay_monitor_new(
    config_json: *const c_char,
    out_handle: *mut *mut MonitorHandle,
) -> i32 {
    if out_handle.is_null() {
        return fail("out_handle is null");
    }
    let config = match unsafe { config_arg(config_json) } {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    let backend = match platform::clipboard() {
        Ok(b) => b,
        Err(e) => return fail(&e.to_string()),
    };
    let hooks = MonitorHooks {
        windows: platform::windows().ok(),
        ..MonitorHooks::default()
    };

    let monitor = Arc::new(ClipboardMonitor::new(config.capture, backend, hooks));
    let handle = Box::new(MonitorHandle {
        reader: monitor.reader(),
        monitor,
        listener: Mutex::new(None),
    });
    unsafe { *out_handle = Box::into_raw(handle) };
    CLIPREPLAY_OK
}

/// Start the capture worker and the clipboard listener.
///
/// # Safety
///
/// `handle` must be a live pointer from `clipreplay_monitor_new()`.
#[no_mangle]
pub unsafe extern "C" fn clipreplay_monitor_start(handle: *mut MonitorHandle) -> i32 {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return fail("handle is null");
    };
    match handle.start() {
        Ok(()) => CLIPREPLAY_OK,
        Err(e) => {
            handle.stop();
            fail(&e.to_string())
        }
    }
}

/// Wait up to `timeout_ms` for the next dispatched item as JSON.
///
/// Returns `CLIPREPLAY_TIMEOUT` when nothing arrived and
/// `CLIPREPLAY_CLOSED` once `clipreplay_monitor_close()` was called and the
/// queue is drained.  A blocked call wakes up on close.
///
/// # Safety
///
/// `handle` must be a live pointer from `clipreplay_monitor_new()`.
/// `*out_json` will be set to a heap-allocated string on `CLIPREPLAY_OK`;
/// free with `clipreplay_free_string()`.
#[no_mangle]
pub unsafe extern "C" fn clipreplay_monitor_next(
    handle: *mut MonitorHandle,
    timeout_ms: u32,
    out_json: *mut *mut c_char,
) -> i32 {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return fail("handle is null");
    };
    if out_json.is_null() {
        return fail("out_json is null");
    }
    match handle
        .reader
        .recv_timeout(Duration::from_millis(u64::from(timeout_ms)))
    {
        Recv::Item(candidate) => match serde_json::to_string(&candidate) {
            Ok(json) => unsafe { write_json(out_json, json) },
            Err(e) => fail(&format!("JSON serialization failed: {e}")),
        },
        Recv::Timeout => CLIPREPLAY_TIMEOUT,
        Recv::Closed => CLIPREPLAY_CLOSED,
    }
}

/// Stop listening.  Queued items stay readable; start again at will.
///
/// # Safety
///
/// `handle` must be a live pointer from `clipreplay_monitor_new()`.
#[no_mangle]
pub unsafe extern "C" fn clipreplay_monitor_stop(handle: *mut MonitorHandle) -> i32 {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return fail("handle is null");
    };
    handle.stop();
    CLIPREPLAY_OK
}

/// Stop listening and close the queue for good, without releasing the
/// handle.  Threads blocked in `clipreplay_monitor_next()` return
/// `CLIPREPLAY_CLOSED` once the queue is drained.  Safe to call from any
/// thread.
///
/// # Safety
///
/// `handle` must be a live pointer from `clipreplay_monitor_new()`.
#[no_mangle]
pub unsafe extern "C" fn clipreplay_monitor_close(handle: *mut MonitorHandle) -> i32 {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return fail("handle is null");
    };
    handle.close();
    CLIPREPLAY_OK
}

/// Close and release a monitor.
///
/// # Safety
///
/// `handle` must be null or a pointer from `clipreplay_monitor_new()` not
/// yet freed.  Every `clipreplay_monitor_next()` call on it must have
/// returned; wake blocked readers with `clipreplay_monitor_close()` and join
/// them first.  Replayers created from it must be freed first.
#[no_mangle]
pub unsafe extern "C" fn clipreplay_monitor_free(handle: *mut MonitorHandle) {
    if handle.is_null() {
        return;
    }
    let handle = unsafe { Box::from_raw(handle) };
    handle.close();
}

// ---------------------------------------------------------------------------
// Replayer
// ---------------------------------------------------------------------------

/// Opaque replay engine.
pub struct ReplayerHandle {
    engine: Mutex<ReplayEngine>,
    cancel: CancelToken,
    title_max_chars: usize,
}

/// Create a replay engine.
///
/// When `monitor` is non-null, clipboard writes register with its
/// suppression guard and use its listener window as clipboard owner, so
/// the monitor does not capture them.
///
/// # Safety
///
/// `config_json` must be null or a valid null-terminated UTF-8 C string.
/// `monitor` must be null or a live pointer from `clipreplay_monitor_new()`.
/// `out_handle` must be a valid pointer; release the result with
/// `clipreplay_replayer_free()`.
#[no_mangle]
pub unsafe extern "C" fn clipreplay_replayer_new(
    config_json: *const c_char,
    monitor: *const MonitorHandle,
    out_handle: *mut *mut ReplayerHandle,
) -> i32 {
    if out_handle.is_null() {
        return fail("out_handle is null");
    }
    let config = match unsafe { config_arg(config_json) } {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    let monitor = unsafe { monitor.as_ref() };
    let owner = monitor.map_or(0, MonitorHandle::owner_window);

    let adapters = platform::keyboard().and_then(|keyboard| {
        Ok((keyboard, platform::windows()?, platform::clipboard_writer(owner)?))
    });
    let (keyboard, windows, writer) = match adapters {
        Ok(a) => a,
        Err(e) => return fail(&e.to_string()),
    };

    let mut engine = ReplayEngine::new(keyboard, windows, writer, &config);
    if let Some(m) = monitor {
        engine = engine.with_suppression(m.monitor.suppression());
    }
    let handle = Box::new(ReplayerHandle {
        engine: Mutex::new(engine),
        cancel: CancelToken::new(),
        title_max_chars: config.capture.title_max_chars,
    });
    unsafe { *out_handle = Box::into_raw(handle) };
    CLIPREPLAY_OK
}

/// Run a macro against the current target.
///
/// Fails when the target cannot be activated or the macro is cancelled
/// via `clipreplay_replayer_cancel()`, including a cancel issued before
/// this call.  The cancel flag is cleared once the run ends.  Safety is not
/// checked here; ask `clipreplay_is_macro_safe()` and confirm with the user
/// first.
///
/// # Safety
///
/// `handle` must be a live pointer from `clipreplay_replayer_new()`.
/// `text` must be a valid null-terminated UTF-8 C string.
#[no_mangle]
pub unsafe extern "C" fn clipreplay_replayer_execute_macro(
    handle: *mut ReplayerHandle,
    text: *const c_char,
) -> i32 {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return fail("handle is null");
    };
    let text = match unsafe { str_arg(text, "text") } {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    let outcome = handle.engine.lock().run_macro(text, &handle.cancel);
    handle.cancel.reset();
    match outcome {
        Ok(_) => CLIPREPLAY_OK,
        Err(e) => fail(&e.to_string()),
    }
}

/// Cancel a running macro between tokens.  Safe to call from any thread.
///
/// # Safety
///
/// `handle` must be a live pointer from `clipreplay_replayer_new()`.
#[no_mangle]
pub unsafe extern "C" fn clipreplay_replayer_cancel(handle: *mut ReplayerHandle) -> i32 {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return fail("handle is null");
    };
    handle.cancel.cancel();
    CLIPREPLAY_OK
}

/// Put `text` on the clipboard and paste it into the current target.
///
/// # Safety
///
/// `handle` must be a live pointer from `clipreplay_replayer_new()`.
/// `text` must be a valid null-terminated UTF-8 C string.
#[no_mangle]
pub unsafe extern "C" fn clipreplay_replayer_paste_text(
    handle: *mut ReplayerHandle,
    text: *const c_char,
) -> i32 {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return fail("handle is null");
    };
    let text = match unsafe { str_arg(text, "text") } {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    let candidate = ClipCandidate::from_text(
        TextPayload {
            text: text.to_owned(),
            ..TextPayload::default()
        },
        SourceInfo::default(),
        &Sha256Hasher,
        handle.title_max_chars,
    );
    match handle.engine.lock().paste(&candidate) {
        Ok(_) => CLIPREPLAY_OK,
        Err(e) => fail(&e.to_string()),
    }
}

/// Resolve the replay target as JSON, or the string `null` when there is
/// none.
///
/// # Safety
///
/// `handle` must be a live pointer from `clipreplay_replayer_new()`.
/// `*out_json` will be set to a heap-allocated string; free with
/// `clipreplay_free_string()`.
#[no_mangle]
pub unsafe extern "C" fn clipreplay_replayer_resolve_target(
    handle: *mut ReplayerHandle,
    out_json: *mut *mut c_char,
) -> i32 {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return fail("handle is null");
    };
    if out_json.is_null() {
        return fail("out_json is null");
    }
    let target = handle.engine.lock().resolve_foreground_target();
    match serde_json::to_string(&target) {
        Ok(json) => unsafe { write_json(out_json, json) },
        Err(e) => fail(&format!("JSON serialization failed: {e}")),
    }
}

/// Lock (non-zero) or release (0) the current target.
///
/// # Safety
///
/// `handle` must be a live pointer from `clipreplay_replayer_new()`.
#[no_mangle]
pub unsafe extern "C" fn clipreplay_replayer_set_target_lock(
    handle: *mut ReplayerHandle,
    locked: i32,
) -> i32 {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return fail("handle is null");
    };
    match handle.engine.lock().set_target_lock(locked != 0) {
        Ok(()) => CLIPREPLAY_OK,
        Err(e) => fail(&e.to_string()),
    }
}

/// Release a replayer.
///
/// # Safety
///
/// `handle` must be null or a pointer from `clipreplay_replayer_new()` not
/// yet freed.
#[no_mangle]
pub unsafe extern "C" fn clipreplay_replayer_free(handle: *mut ReplayerHandle) {
    if !handle.is_null() {
        drop(unsafe { Box::from_raw(handle) });
    }
}
