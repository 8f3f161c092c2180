//! Priority-ordered extraction of one [`ClipCandidate`] per clipboard change.
//!
//! Categories are probed in a fixed order: text-like (plain text required,
//! RTF and HTML overlaid when present) > image > file list.  The first
//! non-empty category wins.  With per-application filtering enabled,
//! formats outside the [`FormatAllowSet`] are treated as absent.
//!
//! # Images
//!
//! A registered `PNG` (or `JFIF`) payload is taken verbatim when its magic
//! bytes validate; that path keeps transparency.  Otherwise the DIB is
//! decoded and re-encoded as PNG.  Plain 32-bit DIBs carry an undefined
//! fourth byte that many writers leave at zero, so those (and only those)
//! get the zero-alpha correction.  Encoded output that fails signature
//! validation rejects the whole change.

use std::io::Cursor;
use std::sync::Arc;

use image::{ImageDecoder, RgbaImage};

use crate::config::CaptureConfig;
use crate::content::{ClipCandidate, ContentHasher, ImageSignature, SourceInfo, TextPayload};
use crate::errors::{ClipReplayError, Result};
use crate::format::{names, permitted, ClipboardSession, FormatAllowSet, FormatPolicy};

const SOURCE_URL_FIELD: &str = "SourceURL:";

const BITMAPINFOHEADER_SIZE: usize = 40;
const BI_RGB: u32 = 0;
const BI_BITFIELDS: u32 = 3;
/// Offset of `bV5AlphaMask` inside `BITMAPV5HEADER`.
const V5_ALPHA_MASK_OFFSET: usize = 52;

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

pub struct FormatExtractor {
    config: CaptureConfig,
    policy: Arc<dyn FormatPolicy>,
    hasher: Arc<dyn ContentHasher>,
}

impl FormatExtractor {
    pub fn new(
        config: CaptureConfig,
        policy: Arc<dyn FormatPolicy>,
        hasher: Arc<dyn ContentHasher>,
    ) -> Self {
        Self {
            config,
            policy,
            hasher,
        }
    }

    /// Allow-set for this cycle, or `None` when unfiltered.
    pub fn allow_set(
        &self,
        session: &dyn ClipboardSession,
        source: &SourceInfo,
    ) -> Option<FormatAllowSet> {
        if !self.config.per_app_filtering {
            return None;
        }
        let process = source.process_name.as_deref()?;
        Some(FormatAllowSet::compute(
            self.policy.as_ref(),
            process,
            &session.formats(),
        ))
    }

    /// Build a candidate from the open clipboard.
    ///
    /// `Ok(None)` means nothing capturable was present.  An `Err` is a
    /// payload that failed validation and must not be dispatched.
    pub fn extract(
        &self,
        session: &dyn ClipboardSession,
        source: &SourceInfo,
    ) -> Result<Option<ClipCandidate>> {
        let allow = self.allow_set(session, source);
        let allow = allow.as_ref();

        if self.config.capture_text {
            if let Some(payload) = self.read_text_payload(session, allow) {
                return Ok(Some(ClipCandidate::from_text(
                    payload,
                    source.clone(),
                    self.hasher.as_ref(),
                    self.config.title_max_chars,
                )));
            }
        }

        if self.config.capture_images {
            if let Some(candidate) = self.read_image(session, allow, source)? {
                return Ok(Some(candidate));
            }
        }

        if self.config.capture_files && permitted(allow, names::HDROP) {
            if let Some(paths) = session.read_files().filter(|p| !p.is_empty()) {
                return Ok(Some(ClipCandidate::from_files(
                    paths,
                    source.clone(),
                    self.hasher.as_ref(),
                )));
            }
        }

        Ok(None)
    }

    fn read_text_payload(
        &self,
        session: &dyn ClipboardSession,
        allow: Option<&FormatAllowSet>,
    ) -> Option<TextPayload> {
        if !permitted(allow, names::UNICODE_TEXT) {
            return None;
        }
        let text = session.read_text().filter(|t| !t.is_empty())?;

        let markup = |name: &str| -> Option<String> {
            if !permitted(allow, name) {
                return None;
            }
            session
                .read_bytes(name)
                .map(|b| decode_markup(&b))
                .filter(|s| !s.is_empty())
        };

        let rich = markup(names::RICH_TEXT);
        let html = markup(names::HTML);
        let source_url = html
            .as_deref()
            .and_then(|h| parse_source_url(h, self.config.source_url_max_len));

        Some(TextPayload {
            text,
            rich,
            html,
            source_url,
        })
    }

    fn read_image(
        &self,
        session: &dyn ClipboardSession,
        allow: Option<&FormatAllowSet>,
        source: &SourceInfo,
    ) -> Result<Option<ClipCandidate>> {
        for (name, expected) in [
            (names::PNG, ImageSignature::Png),
            (names::JFIF, ImageSignature::Jpeg),
        ] {
            if !permitted(allow, name) {
                continue;
            }
            let Some(bytes) = session.read_bytes(name) else {
                continue;
            };
            if ImageSignature::classify(&bytes) != expected {
                log::debug!("extract: {name} payload failed signature check, trying DIB");
                continue;
            }
            if !self.within_image_cap(bytes.len()) {
                return Ok(None);
            }
            let (width, height) = encoded_dimensions(&bytes, expected);
            return Ok(Some(ClipCandidate::from_image(
                bytes,
                width,
                height,
                source.clone(),
                self.hasher.as_ref(),
            )));
        }

        for (name, origin) in [
            (names::DIBV5, DibOrigin::V5),
            (names::DIB, DibOrigin::Plain),
        ] {
            if !permitted(allow, name) {
                continue;
            }
            let Some(dib) = session.read_bytes(name) else {
                continue;
            };
            if let Some((w, h)) = dib_dimensions(&dib) {
                let raw = (u64::from(w) * u64::from(h)).saturating_mul(4);
                if !self.within_image_cap(usize::try_from(raw).unwrap_or(usize::MAX)) {
                    return Ok(None);
                }
            }
            let rgba = match decode_dib(&dib, origin, self.config.zero_alpha_sample_pixels) {
                Ok(img) => img,
                Err(e) => {
                    log::warn!("extract: cannot decode {name}: {e}");
                    continue;
                }
            };
            let (width, height) = rgba.dimensions();
            let png = encode_png(&rgba)?;
            if ImageSignature::classify(&png) != ImageSignature::Png {
                return Err(ClipReplayError::Extraction(
                    "encoded image failed PNG signature validation".into(),
                ));
            }
            if !self.within_image_cap(png.len()) {
                return Ok(None);
            }
            return Ok(Some(ClipCandidate::from_image(
                png,
                width,
                height,
                source.clone(),
                self.hasher.as_ref(),
            )));
        }

        Ok(None)
    }

    fn within_image_cap(&self, len: usize) -> bool {
        if len > self.config.max_image_bytes {
            log::warn!(
                "extract: image of {len} bytes exceeds cap of {} bytes, skipped",
                self.config.max_image_bytes
            );
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

/// Markup formats are NUL-terminated 8-bit strings.
fn decode_markup(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Value of the `SourceURL:` header field of a CF_HTML payload.
///
/// Scans linearly from the field to the next line break and keeps at most
/// `max_len` characters.
pub fn parse_source_url(html: &str, max_len: usize) -> Option<String> {
    let start = html.find(SOURCE_URL_FIELD)? + SOURCE_URL_FIELD.len();
    let rest = &html[start..];
    let end = rest.find(['\r', '\n']).unwrap_or(rest.len());
    let url = rest[..end].trim();
    if url.is_empty() {
        return None;
    }
    Some(url.chars().take(max_len).collect())
}

// ---------------------------------------------------------------------------
// Image helpers
// ---------------------------------------------------------------------------

/// Where a DIB came from.  Only `Plain` 32-bit DIBs are known to ship a
/// zeroed alpha byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DibOrigin {
    /// `CF_DIBV5`; alpha is meaningful when the header declares an alpha mask.
    V5,
    /// `CF_DIB`, or a V5 header without an alpha mask.
    Plain,
}

fn le_u16(b: &[u8], at: usize) -> Option<u16> {
    b.get(at..at + 2).map(|s| u16::from_le_bytes([s[0], s[1]]))
}

fn le_u32(b: &[u8], at: usize) -> Option<u32> {
    b.get(at..at + 4)
        .map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

fn le_i32(b: &[u8], at: usize) -> Option<i32> {
    le_u32(b, at).map(|v| v as i32)
}

/// Decode a packed DIB (header + optional masks/palette + pixels) to RGBA.
///
/// 24- and 32-bit uncompressed bitmaps are decoded here, 32-bit ones through
/// their `BI_BITFIELDS` channel masks when present.  Anything else is handed
/// to the `image` BMP decoder behind a synthesized file header.
pub fn decode_dib(dib: &[u8], origin: DibOrigin, sample_pixels: usize) -> Result<RgbaImage> {
    let bad = |what: &str| ClipReplayError::Extraction(format!("malformed DIB: {what}"));

    let header_size = le_u32(dib, 0).ok_or_else(|| bad("short header"))? as usize;
    if header_size < BITMAPINFOHEADER_SIZE || dib.len() < header_size {
        return Err(bad("header size"));
    }
    let width = le_i32(dib, 4).ok_or_else(|| bad("width"))?;
    let height = le_i32(dib, 8).ok_or_else(|| bad("height"))?;
    let bit_count = le_u16(dib, 14).ok_or_else(|| bad("bit count"))?;
    let compression = le_u32(dib, 16).ok_or_else(|| bad("compression"))?;
    let colors_used = le_u32(dib, 32).ok_or_else(|| bad("palette"))? as usize;

    if width <= 0 || height == 0 {
        return Err(bad("dimensions"));
    }

    let direct = matches!(bit_count, 24 | 32)
        && (compression == BI_RGB || (compression == BI_BITFIELDS && bit_count == 32));
    if !direct {
        return decode_dib_with_image_crate(dib, header_size, bit_count, compression, colors_used);
    }

    let channels = if compression == BI_BITFIELDS {
        ChannelMasks::read(dib, header_size).ok_or_else(|| bad("channel masks"))?
    } else {
        ChannelMasks::BGRA
    };
    let masks = if compression == BI_BITFIELDS && header_size == BITMAPINFOHEADER_SIZE {
        12
    } else {
        0
    };
    let pixel_offset = header_size + masks + colors_used * 4;

    let w = width as usize;
    let h = height.unsigned_abs() as usize;
    let bytes_pp = bit_count as usize / 8;
    let stride = (w * bit_count as usize + 31) / 32 * 4;
    let needed = stride
        .checked_mul(h)
        .and_then(|n| n.checked_add(pixel_offset))
        .ok_or_else(|| bad("size overflow"))?;
    if dib.len() < needed {
        return Err(bad("truncated pixel data"));
    }

    let bottom_up = height > 0;
    let mut rgba = Vec::with_capacity(w * h * 4);
    for row in 0..h {
        let src_row = if bottom_up { h - 1 - row } else { row };
        let start = pixel_offset + src_row * stride;
        let line = &dib[start..start + w * bytes_pp];
        if bytes_pp == 3 {
            for px in line.chunks_exact(3) {
                rgba.extend_from_slice(&[px[2], px[1], px[0], 0xFF]);
            }
        } else {
            for px in line.chunks_exact(4) {
                let value = u32::from_le_bytes([px[0], px[1], px[2], px[3]]);
                rgba.extend_from_slice(&channels.unpack(value));
            }
        }
    }

    let alpha_undefined = origin == DibOrigin::Plain || !v5_has_alpha_mask(dib);
    if bit_count == 32 && alpha_undefined && fix_zero_alpha(&mut rgba, sample_pixels) {
        log::debug!("extract: forced opaque alpha on zero-alpha DIB");
    }

    RgbaImage::from_raw(w as u32, h as u32, rgba).ok_or_else(|| bad("buffer size"))
}

/// Per-channel bit masks of a 32-bit DIB pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChannelMasks {
    red: u32,
    green: u32,
    blue: u32,
    alpha: u32,
}

impl ChannelMasks {
    const BGRA: Self = Self {
        red: 0x00FF_0000,
        green: 0x0000_FF00,
        blue: 0x0000_00FF,
        alpha: 0xFF00_0000,
    };

    /// Masks of a `BI_BITFIELDS` DIB.  They sit at offset 40 both after a
    /// plain header and inside V4/V5 headers.  Without a declared alpha
    /// mask the bits left over by the colour masks carry alpha.
    fn read(dib: &[u8], header_size: usize) -> Option<Self> {
        let red = le_u32(dib, BITMAPINFOHEADER_SIZE)?;
        let green = le_u32(dib, BITMAPINFOHEADER_SIZE + 4)?;
        let blue = le_u32(dib, BITMAPINFOHEADER_SIZE + 8)?;
        let colour = [red, green, blue];
        if colour.iter().any(|&m| m == 0)
            || red & green != 0
            || red & blue != 0
            || green & blue != 0
        {
            return None;
        }
        let declared = if header_size > V5_ALPHA_MASK_OFFSET {
            le_u32(dib, V5_ALPHA_MASK_OFFSET).unwrap_or(0)
        } else {
            0
        };
        let alpha = if declared != 0 {
            declared & !(red | green | blue)
        } else {
            !(red | green | blue)
        };
        Some(Self {
            red,
            green,
            blue,
            alpha,
        })
    }

    fn unpack(&self, px: u32) -> [u8; 4] {
        let alpha = if self.alpha == 0 {
            0xFF
        } else {
            channel(px, self.alpha)
        };
        [
            channel(px, self.red),
            channel(px, self.green),
            channel(px, self.blue),
            alpha,
        ]
    }
}

/// Value of the bits under `mask`, scaled to 8 bits.
fn channel(px: u32, mask: u32) -> u8 {
    let shift = mask.trailing_zeros();
    let max = u64::from(mask >> shift);
    let raw = u64::from((px & mask) >> shift);
    if max == 0xFF {
        raw as u8
    } else {
        ((raw * 255 + max / 2) / max) as u8
    }
}

/// Width and height declared by a DIB header.
fn dib_dimensions(dib: &[u8]) -> Option<(u32, u32)> {
    let width = le_i32(dib, 4)?;
    let height = le_i32(dib, 8)?;
    (width > 0 && height != 0).then(|| (width as u32, height.unsigned_abs()))
}

fn v5_has_alpha_mask(dib: &[u8]) -> bool {
    let header_size = le_u32(dib, 0).unwrap_or(0) as usize;
    header_size > V5_ALPHA_MASK_OFFSET && le_u32(dib, V5_ALPHA_MASK_OFFSET).unwrap_or(0) != 0
}

fn decode_dib_with_image_crate(
    dib: &[u8],
    header_size: usize,
    bit_count: u16,
    compression: u32,
    colors_used: usize,
) -> Result<RgbaImage> {
    let palette = if colors_used > 0 {
        colors_used
    } else if bit_count <= 8 {
        1usize << bit_count
    } else {
        0
    };
    let masks = if compression == BI_BITFIELDS && header_size == BITMAPINFOHEADER_SIZE {
        12
    } else {
        0
    };
    let pixel_offset = (14 + header_size + masks + palette * 4) as u32;
    let file_size = (14 + dib.len()) as u32;

    let mut bmp = Vec::with_capacity(14 + dib.len());
    bmp.extend_from_slice(b"BM");
    bmp.extend_from_slice(&file_size.to_le_bytes());
    bmp.extend_from_slice(&[0, 0, 0, 0]);
    bmp.extend_from_slice(&pixel_offset.to_le_bytes());
    bmp.extend_from_slice(dib);

    image::load_from_memory_with_format(&bmp, image::ImageFormat::Bmp)
        .map(|img| img.to_rgba8())
        .map_err(|e| ClipReplayError::Extraction(format!("BMP decode failed: {e}")))
}

/// Force alpha to opaque when a sampled prefix has colour but no alpha.
///
/// Returns `true` when the correction was applied.
pub fn fix_zero_alpha(rgba: &mut [u8], sample_pixels: usize) -> bool {
    let sample = rgba.chunks_exact(4).take(sample_pixels);
    let mut has_color = false;
    for px in sample {
        if px[3] != 0 {
            return false;
        }
        has_color |= px[0] != 0 || px[1] != 0 || px[2] != 0;
    }
    if !has_color {
        return false;
    }
    for px in rgba.chunks_exact_mut(4) {
        px[3] = 0xFF;
    }
    true
}

fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| ClipReplayError::Extraction(format!("PNG encode failed: {e}")))?;
    Ok(out.into_inner())
}

/// 32-bit bottom-up `BI_RGB` DIB (BGRA) for `CF_DIB` writers.
pub fn encode_dib(img: &RgbaImage) -> Vec<u8> {
    let (w, h) = img.dimensions();
    let pixels = w as usize * h as usize * 4;
    let mut dib = Vec::with_capacity(BITMAPINFOHEADER_SIZE + pixels);
    dib.extend_from_slice(&(BITMAPINFOHEADER_SIZE as u32).to_le_bytes());
    dib.extend_from_slice(&(w as i32).to_le_bytes());
    dib.extend_from_slice(&(h as i32).to_le_bytes());
    dib.extend_from_slice(&1u16.to_le_bytes());
    dib.extend_from_slice(&32u16.to_le_bytes());
    dib.extend_from_slice(&BI_RGB.to_le_bytes());
    dib.extend_from_slice(&(pixels as u32).to_le_bytes());
    // resolution, palette size, important colours
    dib.extend_from_slice(&[0u8; 16]);
    for row in img.rows().rev() {
        for px in row {
            let [r, g, b, a] = px.0;
            dib.extend_from_slice(&[b, g, r, a]);
        }
    }
    dib
}

/// Decode PNG/JPEG bytes and re-encode them as a DIB.
pub fn dib_from_encoded(bytes: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| ClipReplayError::Extraction(format!("image decode failed: {e}")))?;
    Ok(encode_dib(&img.to_rgba8()))
}

/// Width/height of an encoded image; `(0, 0)` when the header is unreadable.
fn encoded_dimensions(bytes: &[u8], signature: ImageSignature) -> (u32, u32) {
    match signature {
        // IHDR: signature(8) + length(4) + "IHDR"(4) + width(4) + height(4)
        ImageSignature::Png if bytes.len() >= 24 => (
            u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
            u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]),
        ),
        ImageSignature::Jpeg => image::codecs::jpeg::JpegDecoder::new(Cursor::new(bytes))
            .map(|d| d.dimensions())
            .unwrap_or((0, 0)),
        _ => (0, 0),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
