//! Keyboard synthesis.
//!
//! Input is described as small [`KeyInput`] values and handed to a
//! [`KeyboardSink`] one batch per logical action (a tap, a chord, a run of
//! text).  The Win32 sink turns each batch into a single `SendInput` call,
//! so a chord cannot interleave with real keyboard input.
//!
//! Text goes through the Unicode path (`Key::Unicode`), which reproduces
//! any character independent of the active keyboard layout.  Chords with
//! a character use the layout's virtual key, since shortcuts are matched
//! on virtual keys.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// Maximum text length typed in one call.
const MAX_TEXT_LENGTH: usize = 10_000;

/// Most repetitions of one chord sent in a single batch.
pub const MAX_CHORD_REPEAT: u32 = 100;

/// Win32 virtual-key codes used by the replay side.
pub mod vk {
    pub const BACK: u16 = 0x08;
    pub const TAB: u16 = 0x09;
    pub const RETURN: u16 = 0x0D;
    pub const SHIFT: u16 = 0x10;
    pub const CONTROL: u16 = 0x11;
    pub const MENU: u16 = 0x12;
    pub const ESCAPE: u16 = 0x1B;
    pub const SPACE: u16 = 0x20;
    pub const PRIOR: u16 = 0x21;
    pub const NEXT: u16 = 0x22;
    pub const END: u16 = 0x23;
    pub const HOME: u16 = 0x24;
    pub const LEFT: u16 = 0x25;
    pub const UP: u16 = 0x26;
    pub const RIGHT: u16 = 0x27;
    pub const DOWN: u16 = 0x28;
    pub const INSERT: u16 = 0x2D;
    pub const DELETE: u16 = 0x2E;
    pub const V: u16 = 0x56;
    pub const F1: u16 = 0x70;
    pub const F4: u16 = 0x73;
    pub const F12: u16 = 0x7B;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    KeyDown,
    KeyUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Virtual(u16),
    /// One UTF-16 code unit.
    Unicode(u16),
}

/// Set of held modifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ModifierMask(u8);

impl ModifierMask {
    pub const NONE: Self = Self(0);
    pub const SHIFT: Self = Self(1);
    pub const CTRL: Self = Self(2);
    pub const ALT: Self = Self(4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Virtual keys for the held modifiers, in press order.
    pub fn virtual_keys(self) -> Vec<u16> {
        [
            (Self::CTRL, vk::CONTROL),
            (Self::ALT, vk::MENU),
            (Self::SHIFT, vk::SHIFT),
        ]
        .into_iter()
        .filter(|(m, _)| !m.is_empty() && self.contains(*m))
        .map(|(_, k)| k)
        .collect()
    }
}

impl std::ops::BitOr for ModifierMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One synthesized keyboard event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyInput {
    pub kind: KeyKind,
    pub key: Key,
    /// Modifiers held while this event is delivered.  The batch already
    /// carries the modifier presses; sinks need not act on it.
    pub modifiers: ModifierMask,
}

impl KeyInput {
    pub fn down(key: Key) -> Self {
        Self {
            kind: KeyKind::KeyDown,
            key,
            modifiers: ModifierMask::NONE,
        }
    }

    pub fn up(key: Key) -> Self {
        Self {
            kind: KeyKind::KeyUp,
            key,
            modifiers: ModifierMask::NONE,
        }
    }

    fn held(mut self, modifiers: ModifierMask) -> Self {
        self.modifiers = modifiers;
        self
    }
}

/// Platform seam for injecting keyboard input.
pub trait KeyboardSink: Send + Sync {
    /// Inject `batch` atomically.  Returns the number of events accepted.
    fn send(&self, batch: &[KeyInput]) -> u32;

    /// Virtual key producing `ch` on the active layout.
    fn vk_for_char(&self, ch: char) -> Option<u16> {
        ascii_vk(ch)
    }
}

/// Layout-independent mapping for ASCII letters and digits.
pub fn ascii_vk(ch: char) -> Option<u16> {
    match ch {
        'a'..='z' | 'A'..='Z' | '0'..='9' => Some(ch.to_ascii_uppercase() as u16),
        ' ' => Some(vk::SPACE),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Builds event batches and hands them to a [`KeyboardSink`].
///
/// Every method returns the number of events the sink accepted.  Zero is
/// logged; the caller carries on.
#[derive(Clone)]
pub struct KeystrokeSimulator {
    sink: Arc<dyn KeyboardSink>,
}

impl KeystrokeSimulator {
    pub fn new(sink: Arc<dyn KeyboardSink>) -> Self {
        Self { sink }
    }

    pub fn key_down(&self, key: Key) -> u32 {
        self.dispatch("key down", &[KeyInput::down(key)])
    }

    pub fn key_up(&self, key: Key) -> u32 {
        self.dispatch("key up", &[KeyInput::up(key)])
    }

    /// Press and release `key`.
    pub fn tap(&self, key: Key) -> u32 {
        self.dispatch("tap", &[KeyInput::down(key), KeyInput::up(key)])
    }

    /// Modifiers down, key down, key up, modifiers up (reverse order).
    pub fn chord(&self, modifiers: ModifierMask, key: Key) -> u32 {
        self.dispatch("chord", &chord_batch(modifiers, key))
    }

    /// `count` chords (or taps, with no modifiers) in one batch.  Counts
    /// above `MAX_CHORD_REPEAT` are clamped.
    pub fn chord_n(&self, modifiers: ModifierMask, key: Key, count: u32) -> u32 {
        if count > MAX_CHORD_REPEAT {
            log::warn!("input: repeat of {count} clamped to {MAX_CHORD_REPEAT}");
        }
        let count = count.min(MAX_CHORD_REPEAT);
        let batch: Vec<KeyInput> = (0..count).flat_map(|_| chord_batch(modifiers, key)).collect();
        self.dispatch("chord", &batch)
    }

    /// Chord with a character: uses the layout's virtual key when one
    /// exists, otherwise the Unicode unit(s) of the character.
    pub fn chord_char(&self, modifiers: ModifierMask, ch: char) -> u32 {
        if let Some(code) = self.sink.vk_for_char(ch) {
            return self.chord(modifiers, Key::Virtual(code));
        }
        let mut units = [0u16; 2];
        let mut batch = Vec::new();
        for unit in ch.encode_utf16(&mut units).iter() {
            batch.extend(chord_batch(modifiers, Key::Unicode(*unit)));
        }
        self.dispatch("chord", &batch)
    }

    pub fn type_char(&self, ch: char) -> u32 {
        let mut batch = Vec::with_capacity(4);
        push_char(&mut batch, ch);
        self.dispatch("char", &batch)
    }

    /// Type `text` through the Unicode path in a single batch.
    ///
    /// Line feeds become Enter; carriage returns are dropped.  Returns 0
    /// if `text` exceeds `MAX_TEXT_LENGTH` bytes.
    pub fn type_text(&self, text: &str) -> u32 {
        if text.len() > MAX_TEXT_LENGTH {
            log::warn!("input: text of {} bytes not typed (limit {MAX_TEXT_LENGTH})", text.len());
            return 0;
        }
        let mut batch = Vec::with_capacity(text.len() * 2);
        for ch in text.chars() {
            push_char(&mut batch, ch);
        }
        self.dispatch("text", &batch)
    }

    fn dispatch(&self, action: &str, batch: &[KeyInput]) -> u32 {
        if batch.is_empty() {
            return 0;
        }
        let accepted = self.sink.send(batch);
        if accepted == 0 {
            log::warn!("input: {action} of {} events was not accepted", batch.len());
        } else if (accepted as usize) < batch.len() {
            log::debug!("input: {action} accepted {accepted}/{} events", batch.len());
        }
        accepted
    }
}

fn chord_batch(modifiers: ModifierMask, key: Key) -> Vec<KeyInput> {
    let mods = modifiers.virtual_keys();
    let mut batch = Vec::with_capacity(mods.len() * 2 + 2);
    for &m in &mods {
        batch.push(KeyInput::down(Key::Virtual(m)));
    }
    batch.push(KeyInput::down(key).held(modifiers));
    batch.push(KeyInput::up(key).held(modifiers));
    for &m in mods.iter().rev() {
        batch.push(KeyInput::up(Key::Virtual(m)));
    }
    batch
}

fn push_char(batch: &mut Vec<KeyInput>, ch: char) {
    match ch {
        '\r' => {}
        '\n' => {
            batch.push(KeyInput::down(Key::Virtual(vk::RETURN)));
            batch.push(KeyInput::up(Key::Virtual(vk::RETURN)));
        }
        _ => {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units).iter() {
                batch.push(KeyInput::down(Key::Unicode(*unit)));
                batch.push(KeyInput::up(Key::Unicode(*unit)));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Recording sink
// ---------------------------------------------------------------------------

/// Sink that records batches instead of injecting them.
///
/// Backs dry runs in the CLI and the tests.
#[derive(Debug, Default)]
pub struct RecordingKeyboard {
    batches: Mutex<Vec<Vec<KeyInput>>>,
    reject: bool,
}

impl RecordingKeyboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that records but reports zero accepted events.
    pub fn rejecting() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn batches(&self) -> Vec<Vec<KeyInput>> {
        self.batches.lock().clone()
    }

    /// Every recorded event, in order.
    pub fn events(&self) -> Vec<KeyInput> {
        self.batches.lock().iter().flatten().copied().collect()
    }

    pub fn clear(&self) {
        self.batches.lock().clear();
    }
}

impl KeyboardSink for RecordingKeyboard {
    fn send(&self, batch: &[KeyInput]) -> u32 {
        self.batches.lock().push(batch.to_vec());
        if self.reject {
            0
        } else {
            batch.len() as u32
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
