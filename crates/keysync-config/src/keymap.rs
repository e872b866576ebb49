//! Keymap tables
//!
//! A [`Keymap`] is the host's view of its keyboard: which physical key and
//! (optionally) which logical key each hardware code maps to, which modifier
//! flag bit each modifier key drives, and which key is CapsLock.
//!
//! The built-in default describes Linux evdev key codes, with physical keys
//! numbered after their USB HID usages (page 0x07) and modifier flags laid out
//! one bit per key so that left and right variants can be told apart.

use std::collections::BTreeMap;
use std::fmt::Write;

use keysync_core::{KeyTables, LogicalKey, PhysicalKey};

use crate::error::ConfigError;

/// Modifier flag bits used by the default keymap.
pub mod flags {
    pub const CONTROL_LEFT: u64 = 0x1;
    pub const SHIFT_LEFT: u64 = 0x2;
    pub const SHIFT_RIGHT: u64 = 0x4;
    pub const META_LEFT: u64 = 0x8;
    pub const META_RIGHT: u64 = 0x10;
    pub const ALT_LEFT: u64 = 0x20;
    pub const ALT_RIGHT: u64 = 0x40;
    pub const CONTROL_RIGHT: u64 = 0x2000;
    pub const CAPS_LOCK: u64 = 0x10000;
}

/// Physical key of a USB HID keyboard-page usage.
const fn hid(usage: u64) -> u64 {
    0x0007_0000 | usage
}

/// Logical key of a named, non-printable key.
const fn named(value: u64) -> u64 {
    0x01_0000_0000 | value
}

// (evdev code, name, physical, logical)
const DEFAULT_KEYS: &[(u32, &str, u64, Option<u64>)] = &[
    (1, "Escape", hid(0x29), Some(named(0x1b))),
    (2, "1", hid(0x1e), None),
    (3, "2", hid(0x1f), None),
    (4, "3", hid(0x20), None),
    (5, "4", hid(0x21), None),
    (6, "5", hid(0x22), None),
    (7, "6", hid(0x23), None),
    (8, "7", hid(0x24), None),
    (9, "8", hid(0x25), None),
    (10, "9", hid(0x26), None),
    (11, "0", hid(0x27), None),
    (12, "Minus", hid(0x2d), None),
    (13, "Equal", hid(0x2e), None),
    (14, "Backspace", hid(0x2a), Some(named(0x08))),
    (15, "Tab", hid(0x2b), Some(named(0x09))),
    (16, "Q", hid(0x14), None),
    (17, "W", hid(0x1a), None),
    (18, "E", hid(0x08), None),
    (19, "R", hid(0x15), None),
    (20, "T", hid(0x17), None),
    (21, "Y", hid(0x1c), None),
    (22, "U", hid(0x18), None),
    (23, "I", hid(0x0c), None),
    (24, "O", hid(0x12), None),
    (25, "P", hid(0x13), None),
    (26, "BracketLeft", hid(0x2f), None),
    (27, "BracketRight", hid(0x30), None),
    (28, "Enter", hid(0x28), Some(named(0x0d))),
    (29, "ControlLeft", hid(0xe0), Some(named(0x200))),
    (30, "A", hid(0x04), None),
    (31, "S", hid(0x16), None),
    (32, "D", hid(0x07), None),
    (33, "F", hid(0x09), None),
    (34, "G", hid(0x0a), None),
    (35, "H", hid(0x0b), None),
    (36, "J", hid(0x0d), None),
    (37, "K", hid(0x0e), None),
    (38, "L", hid(0x0f), None),
    (39, "Semicolon", hid(0x33), None),
    (40, "Quote", hid(0x34), None),
    (41, "Backquote", hid(0x35), None),
    (42, "ShiftLeft", hid(0xe1), Some(named(0x202))),
    (43, "Backslash", hid(0x31), None),
    (44, "Z", hid(0x1d), None),
    (45, "X", hid(0x1b), None),
    (46, "C", hid(0x06), None),
    (47, "V", hid(0x19), None),
    (48, "B", hid(0x05), None),
    (49, "N", hid(0x11), None),
    (50, "M", hid(0x10), None),
    (51, "Comma", hid(0x36), None),
    (52, "Period", hid(0x37), None),
    (53, "Slash", hid(0x38), None),
    (54, "ShiftRight", hid(0xe5), Some(named(0x203))),
    (56, "AltLeft", hid(0xe2), Some(named(0x204))),
    (57, "Space", hid(0x2c), None),
    (58, "CapsLock", hid(0x39), Some(named(0x104))),
    (59, "F1", hid(0x3a), Some(named(0x801))),
    (60, "F2", hid(0x3b), Some(named(0x802))),
    (61, "F3", hid(0x3c), Some(named(0x803))),
    (62, "F4", hid(0x3d), Some(named(0x804))),
    (63, "F5", hid(0x3e), Some(named(0x805))),
    (64, "F6", hid(0x3f), Some(named(0x806))),
    (65, "F7", hid(0x40), Some(named(0x807))),
    (66, "F8", hid(0x41), Some(named(0x808))),
    (67, "F9", hid(0x42), Some(named(0x809))),
    (68, "F10", hid(0x43), Some(named(0x80a))),
    (87, "F11", hid(0x44), Some(named(0x80b))),
    (88, "F12", hid(0x45), Some(named(0x80c))),
    (97, "ControlRight", hid(0xe4), Some(named(0x201))),
    (100, "AltRight", hid(0xe6), Some(named(0x205))),
    (102, "Home", hid(0x4a), Some(named(0x306))),
    (103, "ArrowUp", hid(0x52), Some(named(0x304))),
    (104, "PageUp", hid(0x4b), Some(named(0x308))),
    (105, "ArrowLeft", hid(0x50), Some(named(0x302))),
    (106, "ArrowRight", hid(0x4f), Some(named(0x303))),
    (107, "End", hid(0x4d), Some(named(0x305))),
    (108, "ArrowDown", hid(0x51), Some(named(0x301))),
    (109, "PageDown", hid(0x4e), Some(named(0x307))),
    (110, "Insert", hid(0x49), Some(named(0x407))),
    (111, "Delete", hid(0x4c), Some(named(0x7f))),
    (125, "MetaLeft", hid(0xe3), Some(named(0x206))),
    (126, "MetaRight", hid(0xe7), Some(named(0x207))),
];

const DEFAULT_MODIFIERS: &[(u32, u64)] = &[
    (29, flags::CONTROL_LEFT),
    (42, flags::SHIFT_LEFT),
    (54, flags::SHIFT_RIGHT),
    (125, flags::META_LEFT),
    (126, flags::META_RIGHT),
    (56, flags::ALT_LEFT),
    (100, flags::ALT_RIGHT),
    (97, flags::CONTROL_RIGHT),
];

const DEFAULT_CAPS_LOCK: (u32, u64) = (58, flags::CAPS_LOCK);

/// Identity of one hardware code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyEntry {
    /// Human-readable name, used in generated keymaps
    pub name: Option<String>,
    pub physical: Option<u64>,
    pub logical: Option<u64>,
}

/// The host's key tables, keyed by hardware code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keymap {
    pub keys: BTreeMap<u32, KeyEntry>,
    /// Modifier key code -> the flag bit it drives
    pub modifiers: BTreeMap<u32, u64>,
    /// CapsLock code and flag
    pub caps_lock: Option<(u32, u64)>,
}

impl Default for Keymap {
    fn default() -> Self {
        let keys = DEFAULT_KEYS
            .iter()
            .map(|&(code, name, physical, logical)| {
                let entry = KeyEntry {
                    name: Some(name.to_string()),
                    physical: Some(physical),
                    logical,
                };
                (code, entry)
            })
            .collect();

        Self {
            keys,
            modifiers: DEFAULT_MODIFIERS.iter().copied().collect(),
            caps_lock: Some(DEFAULT_CAPS_LOCK),
        }
    }
}

impl Keymap {
    /// A keymap with no entries at all.
    pub fn empty() -> Self {
        Self {
            keys: BTreeMap::new(),
            modifiers: BTreeMap::new(),
            caps_lock: None,
        }
    }

    /// Overlay `other` on top of this keymap. Fields set in `other` win.
    pub fn merge(&mut self, other: Keymap) {
        for (code, entry) in other.keys {
            let current = self.keys.entry(code).or_default();
            if entry.name.is_some() {
                current.name = entry.name;
            }
            if entry.physical.is_some() {
                current.physical = entry.physical;
            }
            if entry.logical.is_some() {
                current.logical = entry.logical;
            }
        }
        self.modifiers.extend(other.modifiers);
        if other.caps_lock.is_some() {
            self.caps_lock = other.caps_lock;
        }
    }

    pub fn name_of(&self, code: u32) -> Option<&str> {
        self.keys.get(&code).and_then(|entry| entry.name.as_deref())
    }

    /// Find a key code by its name (case-insensitive).
    pub fn code_of(&self, name: &str) -> Option<u32> {
        self.keys.iter().find_map(|(code, entry)| {
            entry
                .name
                .as_deref()
                .filter(|n| n.eq_ignore_ascii_case(name))
                .map(|_| *code)
        })
    }

    /// Check that every modifier flag is a single bit used by exactly one key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut owners: BTreeMap<u64, u32> = BTreeMap::new();
        let caps = self.caps_lock.iter().copied();

        for (code, flag) in self.modifiers.iter().map(|(c, f)| (*c, *f)).chain(caps) {
            if flag.count_ones() != 1 {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "modifier flag 0x{:x} of code {} must be exactly one bit",
                        flag, code
                    ),
                });
            }
            if let Some(first) = owners.insert(flag, code) {
                return Err(ConfigError::DuplicateFlag {
                    flag,
                    first,
                    second: code,
                });
            }
        }

        Ok(())
    }

    /// Build the converter's lookup tables.
    pub fn key_tables(&self) -> KeyTables {
        let mut builder = KeyTables::builder();
        for (code, entry) in &self.keys {
            if let Some(physical) = entry.physical {
                builder = builder.physical(*code, PhysicalKey(physical));
            }
            if let Some(logical) = entry.logical {
                builder = builder.logical(*code, LogicalKey(logical));
            }
        }
        for (code, flag) in &self.modifiers {
            builder = builder.modifier(*code, *flag);
        }
        if let Some((code, flag)) = self.caps_lock {
            builder = builder.caps_lock(code, flag);
        }
        builder.build()
    }

    /// Render the keymap as a KDL `keymap` block that parses back to the
    /// same tables.
    pub fn to_kdl(&self) -> String {
        let mut output = String::new();
        output.push_str("keymap replace=true {\n");

        for (code, entry) in &self.keys {
            let (node, flag) = match (self.modifiers.get(code), self.caps_lock) {
                (_, Some((caps_code, caps_flag))) if caps_code == *code => ("caps-lock", Some(caps_flag)),
                (Some(flag), _) => ("modifier", Some(*flag)),
                _ => ("key", None),
            };

            let _ = write!(output, "    {} {}", node, code);
            if let Some(flag) = flag {
                let _ = write!(output, " flag=0x{:x}", flag);
            }
            if let Some(physical) = entry.physical {
                let _ = write!(output, " physical=0x{:08x}", physical);
            }
            if let Some(logical) = entry.logical {
                let _ = write!(output, " logical=0x{:x}", logical);
            }
            if let Some(name) = &entry.name {
                let _ = write!(output, " name=\"{}\"", name);
            }
            output.push('\n');
        }

        // Modifiers without a key entry
        for (code, flag) in &self.modifiers {
            if !self.keys.contains_key(code) {
                let _ = writeln!(output, "    modifier {} flag=0x{:x}", code, flag);
            }
        }
        if let Some((code, flag)) = self.caps_lock {
            if !self.keys.contains_key(&code) {
                let _ = writeln!(output, "    caps-lock {} flag=0x{:x}", code, flag);
            }
        }

        output.push_str("}\n");
        output
    }
}
