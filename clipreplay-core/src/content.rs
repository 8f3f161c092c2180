//! Captured clipboard content.
//!
//! A [`ClipCandidate`] is built once by the extractor and never mutated.
//! Its `content_hash` covers the primary payload only: for text that is
//! the plain text, so attached RTF/HTML markup never changes the hash.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_SIGNATURE: [u8; 3] = [0xFF, 0xD8, 0xFF];

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Stable content hash supplied by the host.
///
/// The same bytes must always produce the same string, across runs.
pub trait ContentHasher: Send + Sync {
    fn hash(&self, bytes: &[u8]) -> String;
}

/// Default hasher: SHA-256, lowercase hex.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn hash(&self, bytes: &[u8]) -> String {
        format!("{:x}", Sha256::digest(bytes))
    }
}

/// Hash of a text payload.
pub fn text_hash(hasher: &dyn ContentHasher, text: &str) -> String {
    hasher.hash(&tagged(b"text:", text.as_bytes()))
}

/// Hash of an encoded image payload.
pub fn image_hash(hasher: &dyn ContentHasher, bytes: &[u8]) -> String {
    hasher.hash(&tagged(b"image:", bytes))
}

/// Hash of a file list.  Order-sensitive: Explorer preserves selection order.
pub fn files_hash(hasher: &dyn ContentHasher, paths: &[PathBuf]) -> String {
    hasher.hash(&tagged(b"files:", files_text_mirror(paths).as_bytes()))
}

fn tagged(tag: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(tag.len() + payload.len());
    buf.extend_from_slice(tag);
    buf.extend_from_slice(payload);
    buf
}

// ---------------------------------------------------------------------------
// Image signatures
// ---------------------------------------------------------------------------

/// Encoded image container recognised by magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageSignature {
    Png,
    Jpeg,
    Unknown,
}

impl ImageSignature {
    /// Classify a buffer by its leading bytes.
    ///
    /// Buffers shorter than 8 bytes are always `Unknown`, even if they
    /// start with the 3-byte JPEG marker.
    pub fn classify(bytes: &[u8]) -> Self {
        if bytes.len() < PNG_SIGNATURE.len() {
            return Self::Unknown;
        }
        if bytes.starts_with(&PNG_SIGNATURE) {
            Self::Png
        } else if bytes.starts_with(&JPEG_SIGNATURE) {
            Self::Jpeg
        } else {
            Self::Unknown
        }
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipKind {
    Text,
    RichText,
    Html,
    Image,
    Files,
}

/// Application that owned the foreground when the change was captured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub process_name: Option<String>,
    pub window_title: Option<String>,
}

/// One captured clipboard change, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipCandidate {
    kind: ClipKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    text_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rich_markup: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    html_markup: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_base64"
    )]
    image_bytes: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_size: Option<(u32, u32)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    file_paths: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_list: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_url: Option<String>,
    content_hash: String,
    size_bytes: usize,
    captured_at: DateTime<Utc>,
    title: String,
    #[serde(flatten)]
    source: SourceInfo,
}

fn serialize_base64<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(b) => s.serialize_str(&BASE64.encode(b)),
        None => s.serialize_none(),
    }
}

/// Text payload with optional markup overlays.
#[derive(Debug, Clone, Default)]
pub struct TextPayload {
    pub text: String,
    pub rich: Option<String>,
    pub html: Option<String>,
    pub source_url: Option<String>,
}

impl ClipCandidate {
    /// Build a text-like candidate.  RTF wins over HTML for the kind.
    pub fn from_text(
        payload: TextPayload,
        source: SourceInfo,
        hasher: &dyn ContentHasher,
        title_max_chars: usize,
    ) -> Self {
        let kind = if payload.rich.is_some() {
            ClipKind::RichText
        } else if payload.html.is_some() {
            ClipKind::Html
        } else {
            ClipKind::Text
        };
        let size_bytes = payload.text.len()
            + payload.rich.as_ref().map_or(0, String::len)
            + payload.html.as_ref().map_or(0, String::len);

        Self {
            kind,
            content_hash: text_hash(hasher, &payload.text),
            title: text_title(&payload.text, title_max_chars),
            size_bytes,
            captured_at: Utc::now(),
            text_content: Some(payload.text),
            rich_markup: payload.rich,
            html_markup: payload.html,
            image_bytes: None,
            image_size: None,
            file_paths: Vec::new(),
            file_list: None,
            source_url: payload.source_url,
            source,
        }
    }

    /// Build an image candidate from already-validated encoded bytes.
    pub fn from_image(
        bytes: Vec<u8>,
        width: u32,
        height: u32,
        source: SourceInfo,
        hasher: &dyn ContentHasher,
    ) -> Self {
        Self {
            kind: ClipKind::Image,
            content_hash: image_hash(hasher, &bytes),
            title: format!("Image {width}x{height}"),
            size_bytes: bytes.len(),
            captured_at: Utc::now(),
            text_content: None,
            rich_markup: None,
            html_markup: None,
            image_bytes: Some(bytes),
            image_size: Some((width, height)),
            file_paths: Vec::new(),
            file_list: None,
            source_url: None,
            source,
        }
    }

    /// Build a file-list candidate.  `text_content` carries the
    /// newline-joined mirror for search.
    pub fn from_files(paths: Vec<PathBuf>, source: SourceInfo, hasher: &dyn ContentHasher) -> Self {
        let mirror = files_text_mirror(&paths);
        let compact = serde_json::to_string(&paths).unwrap_or_else(|_| mirror.clone());
        Self {
            kind: ClipKind::Files,
            content_hash: files_hash(hasher, &paths),
            title: files_title(&paths),
            size_bytes: mirror.len(),
            captured_at: Utc::now(),
            text_content: Some(mirror),
            rich_markup: None,
            html_markup: None,
            image_bytes: None,
            image_size: None,
            file_paths: paths,
            file_list: Some(compact),
            source_url: None,
            source,
        }
    }

    pub fn kind(&self) -> ClipKind {
        self.kind
    }

    pub fn text_content(&self) -> Option<&str> {
        self.text_content.as_deref()
    }

    pub fn rich_markup(&self) -> Option<&str> {
        self.rich_markup.as_deref()
    }

    pub fn html_markup(&self) -> Option<&str> {
        self.html_markup.as_deref()
    }

    pub fn image_bytes(&self) -> Option<&[u8]> {
        self.image_bytes.as_deref()
    }

    pub fn image_size(&self) -> Option<(u32, u32)> {
        self.image_size
    }

    pub fn file_paths(&self) -> &[PathBuf] {
        &self.file_paths
    }

    /// Compact serialized file list (JSON array of paths).
    pub fn file_list(&self) -> Option<&str> {
        self.file_list.as_deref()
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn source(&self) -> &SourceInfo {
        &self.source
    }
}

// ---------------------------------------------------------------------------
// Titles
// ---------------------------------------------------------------------------

/// Newline-joined absolute paths.
pub fn files_text_mirror(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.to_string_lossy())
        .collect::<Vec<_>>()
        .join("\n")
}

/// First non-blank line, trimmed and cut to `max_chars` characters.
pub fn text_title(text: &str, max_chars: usize) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if line.chars().count() > max_chars {
        let cut: String = line.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        line.to_owned()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn files_title(paths: &[PathBuf]) -> String {
    match paths {
        [] => String::new(),
        [only] => file_name(only),
        [first, ..] => format!("{} files: {}", paths.len(), file_name(first)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn text(text: &str, rich: Option<&str>, html: Option<&str>) -> ClipCandidate {
        ClipCandidate::from_text(
            TextPayload {
                text: text.into(),
                rich: rich.map(Into::into),
                html: html.map(Into::into),
                source_url: None,
            },
            SourceInfo::default(),
            &Sha256Hasher,
            100,
        )
    }

    #[test]
    fn test_text_hash_ignores_markup() {
        let plain = text("hello", None, None);
        let rich = text("hello", Some("{\\rtf1 hello}"), None);
        let html = text("hello", None, Some("<b>hello</b>"));
        let both = text("hello", Some("{\\rtf1 x}"), Some("<i>y</i>"));
        assert_eq!(plain.content_hash(), rich.content_hash());
        assert_eq!(plain.content_hash(), html.content_hash());
        assert_eq!(plain.content_hash(), both.content_hash());
        assert_ne!(plain.content_hash(), text("hello!", None, None).content_hash());
    }

    #[test]
    fn test_text_kind_precedence() {
        assert_eq!(text("a", None, None).kind(), ClipKind::Text);
        assert_eq!(text("a", None, Some("<p>a</p>")).kind(), ClipKind::Html);
        assert_eq!(text("a", Some("{\\rtf1 a}"), Some("<p>a</p>")).kind(), ClipKind::RichText);
    }

    #[test]
    fn test_text_size_includes_markup() {
        let c = text("abc", Some("12345"), Some("xy"));
        assert_eq!(c.size_bytes(), 10);
    }

    #[test]
    fn test_signature_png() {
        let bytes = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00];
        assert_eq!(ImageSignature::classify(&bytes), ImageSignature::Png);
    }

    #[test]
    fn test_signature_jpeg() {
        let bytes = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46];
        assert_eq!(ImageSignature::classify(&bytes), ImageSignature::Jpeg);
    }

    #[test]
    fn test_signature_short_or_unknown() {
        assert_eq!(ImageSignature::classify(&[0xFF, 0xD8, 0xFF]), ImageSignature::Unknown);
        assert_eq!(ImageSignature::classify(&[]), ImageSignature::Unknown);
        assert_eq!(ImageSignature::classify(b"BM000000000"), ImageSignature::Unknown);
        assert!(!ImageSignature::Unknown.is_known());
    }

    #[test]
    fn test_text_title_first_non_empty_line() {
        assert_eq!(text_title("\n   \n  first line  \nsecond", 100), "first line");
        assert_eq!(text_title("", 10), "");
    }

    #[test]
    fn test_text_title_truncates_on_char_boundary() {
        let t = text_title("ééééé", 3);
        assert_eq!(t, "ééé...");
    }

    #[test]
    fn test_files_candidate() {
        let paths = vec![PathBuf::from("C:\\a\\one.txt"), PathBuf::from("C:\\b\\two.png")];
        let c = ClipCandidate::from_files(paths, SourceInfo::default(), &Sha256Hasher);
        assert_eq!(c.kind(), ClipKind::Files);
        assert_eq!(c.text_content(), Some("C:\\a\\one.txt\nC:\\b\\two.png"));
        assert!(c.file_list().unwrap().starts_with('['));
        assert_eq!(c.file_paths().len(), 2);
        assert!(c.title().starts_with("2 files: "));
    }

    #[test]
    fn test_image_candidate_title_and_json() {
        let c = ClipCandidate::from_image(vec![1, 2, 3], 640, 480, SourceInfo::default(), &Sha256Hasher);
        assert_eq!(c.title(), "Image 640x480");
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("\"kind\":\"image\""));
        assert!(json.contains("\"image_bytes\":\"AQID\""));
    }

    #[test]
    fn test_hash_is_category_tagged() {
        let h = Sha256Hasher;
        let as_text = text_hash(&h, "C:\\x.txt");
        let as_files = files_hash(&h, &[PathBuf::from("C:\\x.txt")]);
        assert_ne!(as_text, as_files);
        assert_eq!(as_text.len(), 64);
    }
}
