//! Macro tokenizer.
//!
//! Grammar, scanned left to right with line breaks ignored:
//!
//! | Input | Token |
//! |-------|-------|
//! | `x` | `Literal('x')` |
//! | `^x` | `ModifiedChar(Ctrl, 'x')` |
//! | `{TAB}`, `{TAB 3}` | `SpecialKey` |
//! | `@{F4}` | `ModifiedSpecialKey(Alt, F4)` |
//! | `{~}`, `{^}`, `{@}` | literal marker character |
//! | `{anything else}` | the bracket text, literally |
//!
//! Modifier markers: `~` Shift, `^` Ctrl, `@` Alt.  A marker at the end of
//! the text is literal.

use serde::Serialize;

use crate::input::{vk, ModifierMask, MAX_CHORD_REPEAT};

/// Largest accepted `{NAME n}` count.  Larger counts leave the group
/// literal, like any other malformed bracket.
pub const MAX_REPEAT: u32 = MAX_CHORD_REPEAT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    Shift,
    Ctrl,
    Alt,
}

impl Modifier {
    pub fn from_marker(c: char) -> Option<Self> {
        match c {
            '~' => Some(Self::Shift),
            '^' => Some(Self::Ctrl),
            '@' => Some(Self::Alt),
            _ => None,
        }
    }

    pub fn marker(self) -> char {
        match self {
            Self::Shift => '~',
            Self::Ctrl => '^',
            Self::Alt => '@',
        }
    }

    pub fn mask(self) -> ModifierMask {
        match self {
            Self::Shift => ModifierMask::SHIFT,
            Self::Ctrl => ModifierMask::CTRL,
            Self::Alt => ModifierMask::ALT,
        }
    }
}

/// A named key from the `{NAME}` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpecialKey {
    pub name: &'static str,
    pub vk: u16,
    pub repeat: u32,
    /// `{PAUSE}` is a delay, not a key event.
    pub is_pause: bool,
}

impl SpecialKey {
    /// Look up `name` (case-insensitive).
    pub fn named(name: &str, repeat: u32) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        if upper == "PAUSE" {
            return Some(Self {
                name: "PAUSE",
                vk: 0,
                repeat,
                is_pause: true,
            });
        }
        KEY_TABLE
            .iter()
            .find(|(n, _)| *n == upper)
            .map(|&(name, vk)| Self {
                name,
                vk,
                repeat,
                is_pause: false,
            })
    }
}

const KEY_TABLE: &[(&str, u16)] = &[
    ("TAB", vk::TAB),
    ("ENTER", vk::RETURN),
    ("ESC", vk::ESCAPE),
    ("BACKSPACE", vk::BACK),
    ("BS", vk::BACK),
    ("DEL", vk::DELETE),
    ("DELETE", vk::DELETE),
    ("INS", vk::INSERT),
    ("INSERT", vk::INSERT),
    ("HOME", vk::HOME),
    ("END", vk::END),
    ("PGUP", vk::PRIOR),
    ("PGDN", vk::NEXT),
    ("UP", vk::UP),
    ("DOWN", vk::DOWN),
    ("LEFT", vk::LEFT),
    ("RIGHT", vk::RIGHT),
    ("SPACE", vk::SPACE),
    ("F1", vk::F1),
    ("F2", vk::F1 + 1),
    ("F3", vk::F1 + 2),
    ("F4", vk::F4),
    ("F5", vk::F1 + 4),
    ("F6", vk::F1 + 5),
    ("F7", vk::F1 + 6),
    ("F8", vk::F1 + 7),
    ("F9", vk::F1 + 8),
    ("F10", vk::F1 + 9),
    ("F11", vk::F1 + 10),
    ("F12", vk::F12),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroToken {
    Literal(char),
    SpecialKey(SpecialKey),
    ModifiedChar(Modifier, char),
    ModifiedSpecialKey(Modifier, SpecialKey),
}

/// Parsed `{...}` group.
enum Bracket {
    Key(SpecialKey),
    Escaped(char),
    /// Unrecognized content, emitted as written (braces included).
    Unknown(String),
}

/// Parse the group opening at `chars[start]`.  Returns the group and the
/// index just past the closing brace, or `None` when it never closes.
fn parse_bracket(chars: &[char], start: usize) -> Option<(Bracket, usize)> {
    let close = chars[start + 1..].iter().position(|&c| c == '}')? + start + 1;
    let inner: String = chars[start + 1..close].iter().collect();
    let next = close + 1;

    let mut single = inner.chars();
    if let (Some(c), None) = (single.next(), single.next()) {
        if Modifier::from_marker(c).is_some() {
            return Some((Bracket::Escaped(c), next));
        }
    }

    let mut parts = inner.split_whitespace();
    let key = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) => SpecialKey::named(name, 1),
        (Some(name), Some(count), None) => count
            .parse::<u32>()
            .ok()
            .filter(|n| (1..=MAX_REPEAT).contains(n))
            .and_then(|n| SpecialKey::named(name, n)),
        _ => None,
    };
    let bracket = match key {
        Some(k) => Bracket::Key(k),
        None => Bracket::Unknown(format!("{{{inner}}}")),
    };
    Some((bracket, next))
}

/// Tokenize macro text.  Never fails: malformed groups come out literally.
pub fn tokenize(text: &str) -> Vec<MacroToken> {
    let chars: Vec<char> = text.chars().filter(|&c| c != '\r' && c != '\n').collect();
    let mut tokens = Vec::with_capacity(chars.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(modifier) = Modifier::from_marker(c) {
            match chars.get(i + 1) {
                None => {
                    tokens.push(MacroToken::Literal(c));
                    i += 1;
                }
                Some('{') => match parse_bracket(&chars, i + 1) {
                    Some((Bracket::Key(key), next)) => {
                        tokens.push(MacroToken::ModifiedSpecialKey(modifier, key));
                        i = next;
                    }
                    Some((Bracket::Escaped(e), next)) => {
                        tokens.push(MacroToken::ModifiedChar(modifier, e));
                        i = next;
                    }
                    Some((Bracket::Unknown(raw), next)) => {
                        tokens.push(MacroToken::Literal(c));
                        tokens.extend(raw.chars().map(MacroToken::Literal));
                        i = next;
                    }
                    None => {
                        tokens.push(MacroToken::ModifiedChar(modifier, '{'));
                        i += 2;
                    }
                },
                Some(&next) => {
                    tokens.push(MacroToken::ModifiedChar(modifier, next));
                    i += 2;
                }
            }
            continue;
        }

        if c == '{' {
            match parse_bracket(&chars, i) {
                Some((Bracket::Key(key), next)) => {
                    tokens.push(MacroToken::SpecialKey(key));
                    i = next;
                }
                Some((Bracket::Escaped(e), next)) => {
                    tokens.push(MacroToken::Literal(e));
                    i = next;
                }
                Some((Bracket::Unknown(raw), next)) => {
                    tokens.extend(raw.chars().map(MacroToken::Literal));
                    i = next;
                }
                None => {
                    tokens.push(MacroToken::Literal('{'));
                    i += 1;
                }
            }
            continue;
        }

        tokens.push(MacroToken::Literal(c));
        i += 1;
    }
    tokens
}

/// Number of Alt+F4 presses a token sequence would send.
pub fn close_sequence_count(tokens: &[MacroToken]) -> u64 {
    tokens
        .iter()
        .map(|t| match t {
            MacroToken::ModifiedSpecialKey(Modifier::Alt, k) if k.vk == vk::F4 => u64::from(k.repeat),
            _ => 0,
        })
        .sum()
}

/// Advisory check: more than two window-close chords is unsafe.
///
/// Does not block anything; callers decide whether to ask for
/// confirmation.
pub fn is_macro_safe(text: &str) -> bool {
    close_sequence_count(&tokenize(text)) <= 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use MacroToken::{Literal, ModifiedChar, ModifiedSpecialKey};

    fn key(name: &str) -> SpecialKey {
        SpecialKey::named(name, 1).unwrap()
    }

    fn literals(s: &str) -> Vec<MacroToken> {
        s.chars().map(Literal).collect()
    }

    #[test]
    fn test_mixed_macro() {
        let tokens = tokenize("abc^d{TAB}~e{PAUSE}");
        assert_eq!(
            tokens,
            vec![
                Literal('a'),
                Literal('b'),
                Literal('c'),
                ModifiedChar(Modifier::Ctrl, 'd'),
                MacroToken::SpecialKey(key("TAB")),
                ModifiedChar(Modifier::Shift, 'e'),
                MacroToken::SpecialKey(key("PAUSE")),
            ]
        );
        match tokens[6] {
            MacroToken::SpecialKey(k) => assert!(k.is_pause),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_line_breaks_are_noise() {
        assert_eq!(tokenize("a\r\nb\n"), literals("ab"));
        assert_eq!(tokenize("^\nc"), vec![ModifiedChar(Modifier::Ctrl, 'c')]);
    }

    #[test]
    fn test_repeat_count() {
        let tokens = tokenize("{down 3}");
        assert_eq!(tokens.len(), 1);
        match tokens[0] {
            MacroToken::SpecialKey(k) => {
                assert_eq!(k.name, "DOWN");
                assert_eq!(k.repeat, 3);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_modified_special_key() {
        assert_eq!(
            tokenize("@{F4}"),
            vec![ModifiedSpecialKey(Modifier::Alt, key("F4"))]
        );
    }

    #[test]
    fn test_escaped_markers() {
        assert_eq!(tokenize("{~}{^}{@}"), literals("~^@"));
        assert_eq!(tokenize("^{~}"), vec![ModifiedChar(Modifier::Ctrl, '~')]);
    }

    #[test]
    fn test_unknown_bracket_fails_open() {
        assert_eq!(tokenize("{FOO}x"), literals("{FOO}x"));
        assert_eq!(tokenize("{TAB 0}"), literals("{TAB 0}"));
        assert_eq!(tokenize("{TAB x}"), literals("{TAB x}"));
        assert_eq!(tokenize("^{nope}"), literals("^{nope}"));
    }

    #[test]
    fn test_unclosed_bracket_is_literal() {
        assert_eq!(tokenize("{TAB"), literals("{TAB"));
        assert_eq!(
            tokenize("^{TAB"),
            vec![
                ModifiedChar(Modifier::Ctrl, '{'),
                Literal('T'),
                Literal('A'),
                Literal('B'),
            ]
        );
    }

    #[test]
    fn test_trailing_marker_is_literal() {
        assert_eq!(tokenize("a^"), literals("a^"));
    }

    #[test]
    fn test_macro_safety() {
        assert!(!is_macro_safe("@{F4}@{F4}@{F4}"));
        assert!(is_macro_safe("@{F4}@{F4}"));
        assert!(!is_macro_safe("@{F4 3}"));
        assert!(is_macro_safe("{F4}{F4}{F4}"));
        assert!(is_macro_safe(""));
    }

    #[test]
    fn test_repeat_count_above_limit_is_literal() {
        assert_eq!(tokenize("{TAB 4294967295}"), literals("{TAB 4294967295}"));
        assert_eq!(tokenize("{TAB 101}"), literals("{TAB 101}"));
        assert_eq!(tokenize("{PAUSE 99999999}"), literals("{PAUSE 99999999}"));
        let mut tab = key("TAB");
        tab.repeat = MAX_REPEAT;
        assert_eq!(tokenize("{TAB 100}"), vec![MacroToken::SpecialKey(tab)]);
    }

    #[test]
    fn test_huge_close_counts_stay_unsafe() {
        assert!(!is_macro_safe("@{F4 4294967295}@{F4 3}"));
        assert!(!is_macro_safe("@{F4 100}@{F4 100}"));

        let mut f4 = key("F4");
        f4.repeat = u32::MAX;
        let tokens = [
            ModifiedSpecialKey(Modifier::Alt, f4),
            ModifiedSpecialKey(Modifier::Alt, f4),
        ];
        assert_eq!(close_sequence_count(&tokens), 2 * u64::from(u32::MAX));
    }

    #[test]
    fn test_tokens_serialize() {
        let json = serde_json::to_value(tokenize("^d")).unwrap();
        assert_eq!(json[0]["modified_char"][0], "ctrl");
        assert_eq!(json[0]["modified_char"][1], "d");
    }
}
