//! Host keyboard emulation
//!
//! Raw evdev key events carry only a code and a value. The converter expects
//! what a desktop host delivers instead: modifier keys arrive as
//! flags-changed events carrying the live modifier flags, and every other key
//! carries the characters it produced.
//!
//! ## Value Mapping
//!
//! ```text
//!   evdev (code, value)          HardwareEvent
//!   ───────────────────          ─────────────
//!   modifier, 1 / 0        ──►   FlagsChanged (flag set / cleared)
//!   CapsLock, 1            ──►   FlagsChanged (flag toggled)
//!   CapsLock, 0            ──►   (nothing)
//!   other,    1            ──►   KeyDown
//!   other,    2            ──►   KeyDown { repeat }
//!   other,    0            ──►   KeyUp
//! ```
//!
//! Characters follow a US layout. Navigation and function keys produce the
//! private-use placeholders (0xF700 and up) desktop hosts use for them.

use std::collections::{BTreeMap, HashSet};

use evdev::Key;
use keysync_config::Keymap;
use keysync_core::HardwareEvent;

/// Turns raw evdev key events into host-style hardware events.
#[derive(Debug)]
pub struct HostKeyboard {
    modifiers: BTreeMap<u32, u64>,
    caps_lock: Option<(u32, u64)>,
    /// Live modifier flags, as the host would report them
    flags: u64,
    /// Shift and control keys currently held, for character generation
    held: HashSet<Key>,
    caps_locked: bool,
}

impl HostKeyboard {
    pub fn new(keymap: &Keymap) -> Self {
        Self {
            modifiers: keymap.modifiers.clone(),
            caps_lock: keymap.caps_lock,
            flags: 0,
            held: HashSet::new(),
            caps_locked: false,
        }
    }

    /// The modifier flags the host currently reports.
    pub fn flags(&self) -> u64 {
        self.flags
    }

    /// Translate one evdev key event. Returns `None` for events a host would
    /// swallow (CapsLock release, modifier auto-repeat, unknown values).
    pub fn process(&mut self, code: u16, value: i32, timestamp_us: u64) -> Option<HardwareEvent> {
        let key = Key::new(code);
        let code32 = u32::from(code);

        match value {
            0 => {
                self.held.remove(&key);
            }
            1 => {
                self.held.insert(key);
            }
            2 => {}
            other => {
                tracing::debug!("Ignoring key value {} for code {}", other, code);
                return None;
            }
        }

        if let Some((caps_code, caps_flag)) = self.caps_lock {
            if caps_code == code32 {
                if value != 1 {
                    return None;
                }
                self.flags ^= caps_flag;
                self.caps_locked = self.flags & caps_flag != 0;
                return Some(HardwareEvent::flags_changed(code32, self.flags).at(timestamp_us));
            }
        }

        if let Some(&flag) = self.modifiers.get(&code32) {
            match value {
                1 => self.flags |= flag,
                0 => self.flags &= !flag,
                _ => return None,
            }
            return Some(HardwareEvent::flags_changed(code32, self.flags).at(timestamp_us));
        }

        let event = match value {
            0 => HardwareEvent::key_up(code32, self.flags),
            _ => {
                let (characters, ignoring) = self.characters(key);
                let event = if value == 2 {
                    HardwareEvent::key_repeat(code32, self.flags, &characters)
                } else {
                    HardwareEvent::key_down(code32, self.flags, &characters)
                };
                event.ignoring_modifiers(&ignoring)
            }
        };

        Some(event.at(timestamp_us))
    }

    fn is_held(&self, left: Key, right: Key) -> bool {
        self.held.contains(&left) || self.held.contains(&right)
    }

    /// Characters produced by `key` with the current modifiers, and without.
    fn characters(&self, key: Key) -> (String, String) {
        if let Some(placeholder) = function_key_placeholder(key) {
            let s = placeholder.to_string();
            return (s.clone(), s);
        }

        let Some((base, shifted)) = us_layout(key) else {
            return (String::new(), String::new());
        };

        let shift = self.is_held(Key::KEY_LEFTSHIFT, Key::KEY_RIGHTSHIFT);
        let control = self.is_held(Key::KEY_LEFTCTRL, Key::KEY_RIGHTCTRL);

        let produced = if control && base.is_ascii_lowercase() {
            // Ctrl+letter yields the matching C0 control character
            char::from(base as u8 - b'a' + 1)
        } else if base.is_ascii_lowercase() {
            if shift ^ self.caps_locked {
                shifted
            } else {
                base
            }
        } else if shift {
            shifted
        } else {
            base
        };

        (produced.to_string(), base.to_string())
    }
}

/// `(unshifted, shifted)` characters on a US layout.
fn us_layout(key: Key) -> Option<(char, char)> {
    let pair = match key {
        Key::KEY_A => ('a', 'A'),
        Key::KEY_B => ('b', 'B'),
        Key::KEY_C => ('c', 'C'),
        Key::KEY_D => ('d', 'D'),
        Key::KEY_E => ('e', 'E'),
        Key::KEY_F => ('f', 'F'),
        Key::KEY_G => ('g', 'G'),
        Key::KEY_H => ('h', 'H'),
        Key::KEY_I => ('i', 'I'),
        Key::KEY_J => ('j', 'J'),
        Key::KEY_K => ('k', 'K'),
        Key::KEY_L => ('l', 'L'),
        Key::KEY_M => ('m', 'M'),
        Key::KEY_N => ('n', 'N'),
        Key::KEY_O => ('o', 'O'),
        Key::KEY_P => ('p', 'P'),
        Key::KEY_Q => ('q', 'Q'),
        Key::KEY_R => ('r', 'R'),
        Key::KEY_S => ('s', 'S'),
        Key::KEY_T => ('t', 'T'),
        Key::KEY_U => ('u', 'U'),
        Key::KEY_V => ('v', 'V'),
        Key::KEY_W => ('w', 'W'),
        Key::KEY_X => ('x', 'X'),
        Key::KEY_Y => ('y', 'Y'),
        Key::KEY_Z => ('z', 'Z'),
        Key::KEY_1 => ('1', '!'),
        Key::KEY_2 => ('2', '@'),
        Key::KEY_3 => ('3', '#'),
        Key::KEY_4 => ('4', '$'),
        Key::KEY_5 => ('5', '%'),
        Key::KEY_6 => ('6', '^'),
        Key::KEY_7 => ('7', '&'),
        Key::KEY_8 => ('8', '*'),
        Key::KEY_9 => ('9', '('),
        Key::KEY_0 => ('0', ')'),
        Key::KEY_MINUS => ('-', '_'),
        Key::KEY_EQUAL => ('=', '+'),
        Key::KEY_LEFTBRACE => ('[', '{'),
        Key::KEY_RIGHTBRACE => (']', '}'),
        Key::KEY_BACKSLASH => ('\\', '|'),
        Key::KEY_SEMICOLON => (';', ':'),
        Key::KEY_APOSTROPHE => ('\'', '"'),
        Key::KEY_GRAVE => ('`', '~'),
        Key::KEY_COMMA => (',', '<'),
        Key::KEY_DOT => ('.', '>'),
        Key::KEY_SLASH => ('/', '?'),
        Key::KEY_SPACE => (' ', ' '),
        Key::KEY_ENTER => ('\r', '\r'),
        Key::KEY_TAB => ('\t', '\t'),
        Key::KEY_ESC => ('\u{1b}', '\u{1b}'),
        Key::KEY_BACKSPACE => ('\u{7f}', '\u{7f}'),
        _ => return None,
    };
    Some(pair)
}

/// Private-use placeholder characters for keys that produce no text.
fn function_key_placeholder(key: Key) -> Option<char> {
    let unit: u32 = match key {
        Key::KEY_UP => 0xF700,
        Key::KEY_DOWN => 0xF701,
        Key::KEY_LEFT => 0xF702,
        Key::KEY_RIGHT => 0xF703,
        Key::KEY_F1 => 0xF704,
        Key::KEY_F2 => 0xF705,
        Key::KEY_F3 => 0xF706,
        Key::KEY_F4 => 0xF707,
        Key::KEY_F5 => 0xF708,
        Key::KEY_F6 => 0xF709,
        Key::KEY_F7 => 0xF70A,
        Key::KEY_F8 => 0xF70B,
        Key::KEY_F9 => 0xF70C,
        Key::KEY_F10 => 0xF70D,
        Key::KEY_F11 => 0xF70E,
        Key::KEY_F12 => 0xF70F,
        Key::KEY_INSERT => 0xF727,
        Key::KEY_DELETE => 0xF728,
        Key::KEY_HOME => 0xF729,
        Key::KEY_END => 0xF72B,
        Key::KEY_PAGEUP => 0xF72C,
        Key::KEY_PAGEDOWN => 0xF72D,
        _ => return None,
    };
    char::from_u32(unit)
}
