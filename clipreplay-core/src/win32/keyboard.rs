//! `SendInput` keyboard sink.

use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, VkKeyScanW, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYBD_EVENT_FLAGS,
    KEYEVENTF_EXTENDEDKEY, KEYEVENTF_KEYUP, KEYEVENTF_UNICODE, VIRTUAL_KEY,
};

use crate::input::{vk, Key, KeyInput, KeyKind, KeyboardSink};

/// Pre-computed size of `INPUT` struct for `SendInput` calls.
const INPUT_SIZE: i32 = std::mem::size_of::<INPUT>() as i32;

/// Navigation keys that share scan codes with the numeric keypad.
fn is_extended(code: u16) -> bool {
    matches!(
        code,
        vk::PRIOR
            | vk::NEXT
            | vk::END
            | vk::HOME
            | vk::LEFT
            | vk::UP
            | vk::RIGHT
            | vk::DOWN
            | vk::INSERT
            | vk::DELETE
    )
}

fn to_input(event: &KeyInput) -> INPUT {
    let mut flags = match event.kind {
        KeyKind::KeyDown => KEYBD_EVENT_FLAGS(0),
        KeyKind::KeyUp => KEYEVENTF_KEYUP,
    };
    let (w_vk, w_scan) = match event.key {
        Key::Virtual(code) => {
            if is_extended(code) {
                flags |= KEYEVENTF_EXTENDEDKEY;
            }
            (VIRTUAL_KEY(code), 0)
        }
        Key::Unicode(unit) => {
            flags |= KEYEVENTF_UNICODE;
            (VIRTUAL_KEY(0), unit)
        }
    };

    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: w_vk,
                wScan: w_scan,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

/// Injects batches with one `SendInput` call each.
#[derive(Debug, Default, Clone, Copy)]
pub struct SendInputKeyboard;

impl KeyboardSink for SendInputKeyboard {
    fn send(&self, batch: &[KeyInput]) -> u32 {
        let inputs: Vec<INPUT> = batch.iter().map(to_input).collect();
        unsafe { SendInput(&inputs, INPUT_SIZE) }
    }

    /// Letters map to their key; other characters only when typed without
    /// Shift/Ctrl/Alt on the active layout.  The rest use the Unicode path.
    fn vk_for_char(&self, ch: char) -> Option<u16> {
        let base = if ch.is_ascii_uppercase() {
            ch.to_ascii_lowercase()
        } else {
            ch
        };
        let unit = u16::try_from(base as u32).ok()?;
        let scan = unsafe { VkKeyScanW(unit) };
        if scan == -1 {
            return None;
        }
        let [code, shift_state] = (scan as u16).to_le_bytes();
        (shift_state == 0).then_some(code as u16)
    }
}
