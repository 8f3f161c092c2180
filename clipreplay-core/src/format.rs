//! Clipboard formats and the platform clipboard seam.
//!
//! Standard format identifiers come from a fixed lookup table; registered
//! formats ("HTML Format", "PNG", ...) are known by name only.  The
//! extractor always asks for formats by name.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;

/// Numeric clipboard format identifier as reported by the OS.
pub type FormatId = u32;

pub const CF_TEXT: FormatId = 1;
pub const CF_BITMAP: FormatId = 2;
pub const CF_OEMTEXT: FormatId = 7;
pub const CF_DIB: FormatId = 8;
pub const CF_UNICODETEXT: FormatId = 13;
pub const CF_ENHMETAFILE: FormatId = 14;
pub const CF_HDROP: FormatId = 15;
pub const CF_LOCALE: FormatId = 16;
pub const CF_DIBV5: FormatId = 17;

/// Names used by the extractor.
pub mod names {
    pub const UNICODE_TEXT: &str = "CF_UNICODETEXT";
    pub const RICH_TEXT: &str = "Rich Text Format";
    pub const HTML: &str = "HTML Format";
    pub const PNG: &str = "PNG";
    pub const JFIF: &str = "JFIF";
    pub const DIB: &str = "CF_DIB";
    pub const DIBV5: &str = "CF_DIBV5";
    pub const HDROP: &str = "CF_HDROP";
    pub const EXCLUDE_FROM_MONITOR: &str = "ExcludeClipboardContentFromMonitorProcessing";
    pub const CAN_INCLUDE_IN_HISTORY: &str = "CanIncludeInClipboardHistory";
}

const STANDARD_FORMATS: &[(FormatId, &str)] = &[
    (CF_TEXT, "CF_TEXT"),
    (CF_BITMAP, "CF_BITMAP"),
    (3, "CF_METAFILEPICT"),
    (4, "CF_SYLK"),
    (5, "CF_DIF"),
    (6, "CF_TIFF"),
    (CF_OEMTEXT, "CF_OEMTEXT"),
    (CF_DIB, "CF_DIB"),
    (9, "CF_PALETTE"),
    (10, "CF_PENDATA"),
    (11, "CF_RIFF"),
    (12, "CF_WAVE"),
    (CF_UNICODETEXT, "CF_UNICODETEXT"),
    (CF_ENHMETAFILE, "CF_ENHMETAFILE"),
    (CF_HDROP, "CF_HDROP"),
    (CF_LOCALE, "CF_LOCALE"),
    (CF_DIBV5, "CF_DIBV5"),
];

/// Name of a predefined format, or `None` for registered formats.
pub fn standard_format_name(id: FormatId) -> Option<&'static str> {
    STANDARD_FORMATS
        .iter()
        .find(|(fid, _)| *fid == id)
        .map(|(_, name)| *name)
}

/// Identifier of a predefined format by name.
pub fn standard_format_id(name: &str) -> Option<FormatId> {
    STANDARD_FORMATS
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(id, _)| *id)
}

/// A format currently offered by the clipboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipFormat {
    pub id: FormatId,
    pub name: String,
}

impl ClipFormat {
    /// Describe a format, using the standard table when `name` is unknown.
    pub fn new(id: FormatId, name: Option<String>) -> Self {
        let name = name
            .filter(|n| !n.is_empty())
            .or_else(|| standard_format_name(id).map(str::to_owned))
            .unwrap_or_else(|| format!("#{id}"));
        Self { id, name }
    }

    /// True for formats the extractor can turn into a candidate.
    pub fn is_supported(&self) -> bool {
        [
            names::UNICODE_TEXT,
            names::PNG,
            names::JFIF,
            names::DIB,
            names::DIBV5,
            names::HDROP,
        ]
        .iter()
        .any(|n| n.eq_ignore_ascii_case(&self.name))
            || self.id == CF_TEXT
            || self.id == CF_BITMAP
    }
}

// ---------------------------------------------------------------------------
// Platform seam
// ---------------------------------------------------------------------------

/// An open clipboard.  Dropping the session closes the clipboard.
pub trait ClipboardSession {
    /// Formats in the order the owner registered them.
    fn formats(&self) -> Vec<ClipFormat>;

    /// Plain text (`CF_UNICODETEXT`), if present.
    fn read_text(&self) -> Option<String>;

    /// Raw bytes of a format by name.
    fn read_bytes(&self, format_name: &str) -> Option<Vec<u8>>;

    /// Absolute paths from `CF_HDROP`.
    fn read_files(&self) -> Option<Vec<PathBuf>>;

    fn has_format(&self, format_name: &str) -> bool {
        self.formats()
            .iter()
            .any(|f| f.name.eq_ignore_ascii_case(format_name))
    }
}

/// Access to the OS clipboard.
pub trait ClipboardBackend: Send + Sync {
    /// Try once to open the clipboard.  `None` means another process
    /// holds it; callers retry with backoff.
    fn try_open(&self) -> Option<Box<dyn ClipboardSession + '_>>;
}

// ---------------------------------------------------------------------------
// Per-application filtering
// ---------------------------------------------------------------------------

/// Per-application format policy owned by the host.
pub trait FormatPolicy: Send + Sync {
    fn should_capture_format(&self, process_name: &str, format_name: &str) -> bool;
}

/// Policy that permits every format.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllFormats;

impl FormatPolicy for AllowAllFormats {
    fn should_capture_format(&self, _process_name: &str, _format_name: &str) -> bool {
        true
    }
}

/// Formats the policy allowed for one capture cycle.
///
/// Absent (`None` at the call site) means unfiltered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatAllowSet {
    allowed: HashSet<String>,
}

impl FormatAllowSet {
    /// Ask the policy about every format currently present.
    pub fn compute(policy: &dyn FormatPolicy, process_name: &str, present: &[ClipFormat]) -> Self {
        let allowed = present
            .iter()
            .filter(|f| policy.should_capture_format(process_name, &f.name))
            .map(|f| f.name.to_ascii_lowercase())
            .collect();
        Self { allowed }
    }

    pub fn permits(&self, format_name: &str) -> bool {
        let wanted = format_name.to_ascii_lowercase();
        if self.allowed.contains(&wanted) {
            return true;
        }
        self.allowed
            .iter()
            .any(|a| legacy_name_matches(a, &wanted) || legacy_name_matches(&wanted, a))
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

/// Compatibility shim for older policy entries that stored a shortened
/// format name ("HTML" for "HTML Format", "Rich Text" for "Rich Text
/// Format").  Only whole-word prefixes match, so "CF_DIB" never matches
/// "CF_DIBV5".  Used by [`FormatAllowSet::permits`] and nowhere else.
pub fn legacy_name_matches(short: &str, full: &str) -> bool {
    if short.is_empty() || short.len() >= full.len() {
        return false;
    }
    let (head, rest) = full.split_at(short.len());
    head.eq_ignore_ascii_case(short) && rest.starts_with(' ')
}

/// Apply an optional allow-set: `None` permits everything.
pub fn permitted(allow: Option<&FormatAllowSet>, format_name: &str) -> bool {
    allow.map_or(true, |a| a.permits(format_name))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyHtml;

    impl FormatPolicy for DenyHtml {
        fn should_capture_format(&self, process_name: &str, format_name: &str) -> bool {
            !(process_name.eq_ignore_ascii_case("chrome.exe") && format_name == names::HTML)
        }
    }

    fn fmt(id: FormatId, name: &str) -> ClipFormat {
        ClipFormat::new(id, Some(name.into()))
    }

    #[test]
    fn test_standard_table_lookup() {
        assert_eq!(standard_format_name(CF_UNICODETEXT), Some("CF_UNICODETEXT"));
        assert_eq!(standard_format_name(49_300), None);
        assert_eq!(standard_format_id("cf_hdrop"), Some(CF_HDROP));
    }

    #[test]
    fn test_clip_format_falls_back_to_table() {
        assert_eq!(ClipFormat::new(CF_DIB, None).name, "CF_DIB");
        assert_eq!(ClipFormat::new(50_000, Some(String::new())).name, "#50000");
    }

    #[test]
    fn test_supported_formats() {
        assert!(ClipFormat::new(CF_UNICODETEXT, None).is_supported());
        assert!(fmt(49_400, "PNG").is_supported());
        assert!(fmt(49_401, names::JFIF).is_supported());
        assert!(!fmt(49_500, "Ole Private Data").is_supported());
        assert!(!fmt(49_501, names::HTML).is_supported());
    }

    #[test]
    fn test_allow_set_filters_by_policy() {
        let present = vec![
            ClipFormat::new(CF_UNICODETEXT, None),
            fmt(49_161, names::HTML),
        ];
        let set = FormatAllowSet::compute(&DenyHtml, "chrome.exe", &present);
        assert!(set.permits(names::UNICODE_TEXT));
        assert!(!set.permits(names::HTML));
        assert_eq!(set.len(), 1);

        let other = FormatAllowSet::compute(&DenyHtml, "code.exe", &present);
        assert!(other.permits(names::HTML));
    }

    #[test]
    fn test_allow_set_absent_formats_not_permitted() {
        let set = FormatAllowSet::compute(&AllowAllFormats, "x", &[]);
        assert!(set.is_empty());
        assert!(!set.permits(names::PNG));
        assert!(permitted(None, names::PNG));
    }

    #[test]
    fn test_legacy_prefix_match() {
        assert!(legacy_name_matches("HTML", "HTML Format"));
        assert!(legacy_name_matches("rich text", "Rich Text Format"));
        assert!(!legacy_name_matches("CF_DIB", "CF_DIBV5"));
        assert!(!legacy_name_matches("HTML Format", "HTML"));
        assert!(!legacy_name_matches("", "HTML"));
    }

    #[test]
    fn test_allow_set_uses_legacy_shim() {
        let present = vec![fmt(49_161, "HTML")];
        let set = FormatAllowSet::compute(&AllowAllFormats, "old.exe", &present);
        assert!(set.permits(names::HTML));
    }
}
