//! OS clipboard access.
//!
//! Reading happens inside a session that holds the clipboard open; the
//! session closes it on drop.  Writing opens, empties and fills the
//! clipboard in one scope.  Text is written as `CF_UNICODETEXT` (plus RTF
//! and HTML when attached), images as their encoded format plus `CF_DIB`,
//! file lists as `CF_HDROP`.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use windows::core::HSTRING;
use windows::Win32::Foundation::{HANDLE, HGLOBAL, HWND};
use windows::Win32::System::DataExchange::{
    CloseClipboard, EmptyClipboard, EnumClipboardFormats, GetClipboardData,
    GetClipboardFormatNameW, IsClipboardFormatAvailable, OpenClipboard, RegisterClipboardFormatW,
    SetClipboardData,
};
use windows::Win32::System::Memory::{
    GlobalAlloc, GlobalFree, GlobalLock, GlobalSize, GlobalUnlock, GMEM_MOVEABLE,
};
use windows::Win32::System::Ole::{CF_DIB, CF_HDROP, CF_UNICODETEXT};
use windows::Win32::UI::Shell::{DragQueryFileW, HDROP};

use crate::content::{ClipCandidate, ClipKind, ImageSignature};
use crate::errors::{ClipReplayError, Result};
use crate::extract::dib_from_encoded;
use crate::format::{
    names, standard_format_id, standard_format_name, ClipFormat, ClipboardBackend,
    ClipboardSession, FormatId,
};
use crate::replay::ClipboardWriter;
use crate::target::WindowHandle;

use super::wide_to_string;

/// Open attempts for writes before giving up.
const WRITE_OPEN_ATTEMPTS: u32 = 5;
const WRITE_OPEN_BACKOFF: Duration = Duration::from_millis(10);

/// `DROPFILES` header: pFiles, pt.x, pt.y, fNC, fWide.
const DROPFILES_SIZE: u32 = 20;

/// The Windows clipboard.
///
/// Writes need an owner window, otherwise `SetClipboardData` may fail
/// after `EmptyClipboard`; use [`Win32Clipboard::with_owner`] with the
/// listener's window.
#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Clipboard {
    owner: WindowHandle,
}

impl Win32Clipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owner(owner: WindowHandle) -> Self {
        Self { owner }
    }

    fn owner_hwnd(&self) -> HWND {
        HWND(self.owner as *mut core::ffi::c_void)
    }
}

/// Closes the clipboard on drop.
struct OpenGuard;

impl OpenGuard {
    fn try_open(owner: HWND) -> Option<Self> {
        unsafe { OpenClipboard(owner) }.ok().map(|_| OpenGuard)
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseClipboard();
        }
    }
}

/// Numeric id for a format name; registers custom names on first use.
fn format_id(name: &str) -> Option<FormatId> {
    standard_format_id(name).or_else(|| {
        let id = unsafe { RegisterClipboardFormatW(&HSTRING::from(name)) };
        (id != 0).then_some(id)
    })
}

fn format_name(id: FormatId) -> Option<String> {
    if let Some(name) = standard_format_name(id) {
        return Some(name.to_owned());
    }
    let mut buf = [0u16; 256];
    let len = unsafe { GetClipboardFormatNameW(id, &mut buf) };
    (len > 0).then(|| wide_to_string(&buf[..len as usize]))
}

/// Copy the `HGLOBAL` contents of `id`.  GDI-handle formats yield `None`.
fn read_global(id: FormatId) -> Option<Vec<u8>> {
    unsafe {
        let handle = GetClipboardData(id).ok()?;
        let hglobal = HGLOBAL(handle.0);
        let ptr = GlobalLock(hglobal) as *const u8;
        if ptr.is_null() {
            return None;
        }
        let size = GlobalSize(hglobal);
        let bytes = std::slice::from_raw_parts(ptr, size).to_vec();
        let _ = GlobalUnlock(hglobal);
        Some(bytes)
    }
}

struct Win32Session {
    _open: OpenGuard,
}

impl ClipboardSession for Win32Session {
    fn formats(&self) -> Vec<ClipFormat> {
        let mut formats = Vec::new();
        let mut id = 0;
        loop {
            id = unsafe { EnumClipboardFormats(id) };
            if id == 0 {
                break;
            }
            formats.push(ClipFormat::new(id, format_name(id)));
        }
        formats
    }

    fn read_text(&self) -> Option<String> {
        let bytes = read_global(CF_UNICODETEXT.0 as u32)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .take_while(|&u| u != 0)
            .collect();
        Some(String::from_utf16_lossy(&units))
    }

    fn read_bytes(&self, format_name: &str) -> Option<Vec<u8>> {
        let id = format_id(format_name)?;
        unsafe { IsClipboardFormatAvailable(id) }.ok()?;
        read_global(id)
    }

    fn read_files(&self) -> Option<Vec<PathBuf>> {
        unsafe {
            let handle = GetClipboardData(CF_HDROP.0 as u32).ok()?;
            let hdrop = HDROP(handle.0);
            let count = DragQueryFileW(hdrop, u32::MAX, None);
            let mut paths = Vec::with_capacity(count as usize);
            for i in 0..count {
                let len = DragQueryFileW(hdrop, i, None);
                let mut buf = vec![0u16; len as usize + 1];
                let copied = DragQueryFileW(hdrop, i, Some(&mut buf));
                paths.push(PathBuf::from(wide_to_string(&buf[..copied as usize])));
            }
            Some(paths)
        }
    }
}

impl ClipboardBackend for Win32Clipboard {
    fn try_open(&self) -> Option<Box<dyn ClipboardSession + '_>> {
        let guard = OpenGuard::try_open(self.owner_hwnd())?;
        Some(Box::new(Win32Session { _open: guard }))
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

fn nul_terminated(bytes: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    out.push(0);
    out
}

fn utf16_bytes(text: &str) -> Vec<u8> {
    text.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// `DROPFILES` followed by NUL-separated wide paths and a final NUL.
fn dropfiles_bytes(paths: &[PathBuf]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&DROPFILES_SIZE.to_le_bytes());
    out.extend_from_slice(&[0u8; 12]);
    out.extend_from_slice(&1u32.to_le_bytes());
    for path in paths {
        let text = path.to_string_lossy();
        out.extend(text.encode_utf16().chain(std::iter::once(0)).flat_map(u16::to_le_bytes));
    }
    out.extend_from_slice(&[0, 0]);
    out
}

/// Clipboard entries for a candidate, in the order they are set.
fn entries(candidate: &ClipCandidate) -> Result<Vec<(FormatId, Vec<u8>)>> {
    let missing = |what: &str| ClipReplayError::InvalidArgument(format!("candidate has no {what}"));
    let registered = |name: &str| {
        format_id(name).ok_or_else(|| ClipReplayError::Clipboard(format!("cannot register {name}")))
    };

    let mut out = Vec::new();
    match candidate.kind() {
        ClipKind::Text | ClipKind::RichText | ClipKind::Html => {
            let text = candidate.text_content().ok_or_else(|| missing("text"))?;
            out.push((CF_UNICODETEXT.0 as u32, utf16_bytes(text)));
            if let Some(rtf) = candidate.rich_markup() {
                out.push((registered(names::RICH_TEXT)?, nul_terminated(rtf.as_bytes())));
            }
            if let Some(html) = candidate.html_markup() {
                out.push((registered(names::HTML)?, nul_terminated(html.as_bytes())));
            }
        }
        ClipKind::Image => {
            let bytes = candidate.image_bytes().ok_or_else(|| missing("image bytes"))?;
            let name = match ImageSignature::classify(bytes) {
                ImageSignature::Png => names::PNG,
                ImageSignature::Jpeg => names::JFIF,
                ImageSignature::Unknown => {
                    return Err(ClipReplayError::Clipboard("unrecognized image bytes".into()))
                }
            };
            out.push((registered(name)?, bytes.to_vec()));
            out.push((CF_DIB.0 as u32, dib_from_encoded(bytes)?));
        }
        ClipKind::Files => {
            out.push((CF_HDROP.0 as u32, dropfiles_bytes(candidate.file_paths())));
        }
    }
    Ok(out)
}

/// Hand `bytes` to the clipboard as a movable global block.
fn set_global(id: FormatId, bytes: &[u8]) -> Result<()> {
    unsafe {
        let hmem = GlobalAlloc(GMEM_MOVEABLE, bytes.len().max(1))?;
        let ptr = GlobalLock(hmem) as *mut u8;
        if ptr.is_null() {
            let _ = GlobalFree(hmem);
            return Err(ClipReplayError::Clipboard("GlobalLock failed".into()));
        }
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
        let _ = GlobalUnlock(hmem);

        // Ownership passes to the system on success.
        if let Err(e) = SetClipboardData(id, HANDLE(hmem.0)) {
            let _ = GlobalFree(hmem);
            return Err(e.into());
        }
    }
    Ok(())
}

impl ClipboardWriter for Win32Clipboard {
    fn write(&self, candidate: &ClipCandidate) -> Result<()> {
        let entries = entries(candidate)?;

        let mut guard = None;
        for attempt in 1..=WRITE_OPEN_ATTEMPTS {
            guard = OpenGuard::try_open(self.owner_hwnd());
            if guard.is_some() {
                break;
            }
            thread::sleep(WRITE_OPEN_BACKOFF * attempt);
        }
        let _guard = guard.ok_or_else(|| ClipReplayError::Clipboard("clipboard is locked".into()))?;

        unsafe { EmptyClipboard()? };
        for (id, bytes) in &entries {
            set_global(*id, bytes)?;
        }
        log::debug!("clipboard: wrote {} format(s)", entries.len());
        Ok(())
    }
}
