//! In-memory clipboard backend.
//!
//! Behaves like the OS clipboard for the capture pipeline: formats keep
//! insertion order, and the clipboard can be made to report "busy" for a
//! number of open attempts.  Used by tests and by hosts that feed content
//! from somewhere other than the OS clipboard.

use std::path::PathBuf;

use parking_lot::Mutex;

use crate::content::{ClipCandidate, ClipKind, ImageSignature};
use crate::errors::{ClipReplayError, Result};
use crate::format::{
    names, standard_format_id, ClipFormat, ClipboardBackend, ClipboardSession, FormatId,
};
use crate::replay::ClipboardWriter;

const FIRST_REGISTERED_ID: FormatId = 0xC000;

#[derive(Debug, Clone, Default)]
struct Contents {
    formats: Vec<(ClipFormat, Vec<u8>)>,
    files: Option<Vec<PathBuf>>,
    text: Option<String>,
}

#[derive(Debug, Default)]
pub struct MemoryClipboard {
    contents: Mutex<Contents>,
    busy_attempts: Mutex<u32>,
    opens: Mutex<u32>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every format.
    pub fn clear(&self) {
        *self.contents.lock() = Contents::default();
    }

    /// Replace the contents with plain text.
    pub fn set_text(&self, text: &str) {
        self.clear();
        self.add_text(text);
    }

    /// Add `CF_UNICODETEXT` without clearing other formats.
    pub fn add_text(&self, text: &str) {
        let mut c = self.contents.lock();
        c.text = Some(text.to_owned());
        push_format(&mut c, names::UNICODE_TEXT, text.as_bytes().to_vec());
    }

    /// Add a format with raw bytes without clearing other formats.
    pub fn add_bytes(&self, format_name: &str, bytes: Vec<u8>) {
        push_format(&mut self.contents.lock(), format_name, bytes);
    }

    /// Replace the contents with a file list.
    pub fn set_files(&self, paths: Vec<PathBuf>) {
        self.clear();
        let mut c = self.contents.lock();
        c.files = Some(paths);
        push_format(&mut c, names::HDROP, Vec::new());
    }

    /// Report busy for the next `attempts` open calls.
    pub fn set_busy(&self, attempts: u32) {
        *self.busy_attempts.lock() = attempts;
    }

    /// Number of successful opens so far.
    pub fn open_count(&self) -> u32 {
        *self.opens.lock()
    }
}

fn push_format(contents: &mut Contents, name: &str, bytes: Vec<u8>) {
    contents.formats.retain(|(f, _)| !f.name.eq_ignore_ascii_case(name));
    let id = standard_format_id(name)
        .unwrap_or(FIRST_REGISTERED_ID + contents.formats.len() as FormatId);
    contents
        .formats
        .push((ClipFormat::new(id, Some(name.to_owned())), bytes));
}

struct MemorySession {
    snapshot: Contents,
}

impl ClipboardSession for MemorySession {
    fn formats(&self) -> Vec<ClipFormat> {
        self.snapshot.formats.iter().map(|(f, _)| f.clone()).collect()
    }

    fn read_text(&self) -> Option<String> {
        self.snapshot.text.clone()
    }

    fn read_bytes(&self, format_name: &str) -> Option<Vec<u8>> {
        self.snapshot
            .formats
            .iter()
            .find(|(f, _)| f.name.eq_ignore_ascii_case(format_name))
            .map(|(_, b)| b.clone())
    }

    fn read_files(&self) -> Option<Vec<PathBuf>> {
        self.snapshot.files.clone()
    }
}

impl ClipboardBackend for MemoryClipboard {
    fn try_open(&self) -> Option<Box<dyn ClipboardSession + '_>> {
        {
            let mut busy = self.busy_attempts.lock();
            if *busy > 0 {
                *busy -= 1;
                return None;
            }
        }
        *self.opens.lock() += 1;
        Some(Box::new(MemorySession {
            snapshot: self.contents.lock().clone(),
        }))
    }
}

/// Replays write back into the same in-memory clipboard, so a monitor
/// watching it sees the echo.
impl ClipboardWriter for MemoryClipboard {
    fn write(&self, candidate: &ClipCandidate) -> Result<()> {
        match candidate.kind() {
            ClipKind::Text | ClipKind::RichText | ClipKind::Html => {
                let text = candidate
                    .text_content()
                    .ok_or_else(|| ClipReplayError::InvalidArgument("text candidate without text".into()))?;
                self.set_text(text);
                if let Some(rtf) = candidate.rich_markup() {
                    self.add_bytes(names::RICH_TEXT, rtf.as_bytes().to_vec());
                }
                if let Some(html) = candidate.html_markup() {
                    self.add_bytes(names::HTML, html.as_bytes().to_vec());
                }
            }
            ClipKind::Image => {
                let bytes = candidate
                    .image_bytes()
                    .ok_or_else(|| ClipReplayError::InvalidArgument("image candidate without bytes".into()))?;
                let name = match ImageSignature::classify(bytes) {
                    ImageSignature::Png => names::PNG,
                    ImageSignature::Jpeg => names::JFIF,
                    ImageSignature::Unknown => {
                        return Err(ClipReplayError::Clipboard("unrecognized image bytes".into()))
                    }
                };
                self.clear();
                self.add_bytes(name, bytes.to_vec());
            }
            ClipKind::Files => self.set_files(candidate.file_paths().to_vec()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_then_open() {
        let clip = MemoryClipboard::new();
        clip.set_text("x");
        clip.set_busy(2);
        assert!(clip.try_open().is_none());
        assert!(clip.try_open().is_none());
        let session = clip.try_open().unwrap();
        assert_eq!(session.read_text().as_deref(), Some("x"));
        assert_eq!(clip.open_count(), 1);
    }

    #[test]
    fn test_format_order_and_ids() {
        let clip = MemoryClipboard::new();
        clip.set_text("x");
        clip.add_bytes(names::HTML, b"<b>x</b>".to_vec());
        let session = clip.try_open().unwrap();
        let formats = session.formats();
        assert_eq!(formats[0].id, crate::format::CF_UNICODETEXT);
        assert_eq!(formats[1].name, names::HTML);
        assert!(formats[1].id >= FIRST_REGISTERED_ID);
        assert!(session.has_format("html format"));
    }

    #[test]
    fn test_write_back_files() {
        use crate::content::{SourceInfo, Sha256Hasher};
        let clip = MemoryClipboard::new();
        let paths = vec![PathBuf::from("C:\\a.txt"), PathBuf::from("C:\\b.txt")];
        let c = ClipCandidate::from_files(paths.clone(), SourceInfo::default(), &Sha256Hasher);
        clip.write(&c).unwrap();
        let session = clip.try_open().unwrap();
        assert_eq!(session.read_files(), Some(paths));
        assert!(session.read_text().is_none());
    }
}
