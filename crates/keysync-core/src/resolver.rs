//! Key identity resolution
//!
//! Maps a raw hardware event to a stable `(PhysicalKey, LogicalKey)` pair.
//!
//! Logical keys are resolved in a fixed order, and the order matters:
//!
//! 1. A logical-table entry for the hardware code always wins.
//! 2. A printable character label produces a key in the Unicode plane.
//! 3. A physical key from the table produces a key in the hardware plane.
//! 4. Anything else gets a freshly minted autogenerated key.

use std::ops::RangeInclusive;

use crate::keys::{KeyPlane, LogicalKey, PhysicalKey};
use crate::tables::KeyTables;

/// Private-use range hosts report for non-printable function keys (arrows,
/// F-keys, navigation).
const UNPRINTABLE_RANGE: RangeInclusive<u32> = 0xF700..=0xF8FF;

fn is_control_character(unit: u32) -> bool {
    (0x00..=0x1F).contains(&unit) || (0x7F..=0x9F).contains(&unit)
}

fn is_unprintable(unit: u32) -> bool {
    UNPRINTABLE_RANGE.contains(&unit)
}

/// Resolves key identities against the host's lookup tables.
#[derive(Debug, Clone, Copy)]
pub struct KeyResolver<'a> {
    tables: &'a KeyTables,
}

impl<'a> KeyResolver<'a> {
    pub fn new(tables: &'a KeyTables) -> Self {
        Self { tables }
    }

    /// Look up the physical key for a hardware code.
    ///
    /// Codes without a table entry get [`PhysicalKey::unmapped`], so two
    /// different keys never share a press record.
    pub fn physical_key(&self, code: u32) -> PhysicalKey {
        self.tables
            .physical_key(code)
            .unwrap_or_else(|| PhysicalKey::unmapped(code))
    }

    /// Resolve the logical key of a modifier key.
    ///
    /// Modifier keys always resolve: without a table entry the logical key is
    /// derived from the physical key, or minted from the code when the
    /// physical key is unmapped too.
    pub fn logical_key_for_modifier(&self, code: u32, physical: PhysicalKey) -> LogicalKey {
        if let Some(logical) = self.tables.logical_key(code) {
            return logical;
        }
        if physical.is_unmapped() {
            return LogicalKey::of_plane(code as u64, KeyPlane::Autogenerated);
        }
        LogicalKey::of_plane(physical.0, KeyPlane::Hardware)
    }

    /// Resolve the logical key of a regular key from its character label
    /// (the characters it produces ignoring modifiers).
    pub fn logical_key_for_printable(
        &self,
        code: u32,
        physical: PhysicalKey,
        label: &str,
    ) -> LogicalKey {
        if let Some(logical) = self.tables.logical_key(code) {
            return logical;
        }

        if let Some(code_point) = printable_code_point(label) {
            return LogicalKey::of_plane(fold_ascii(code_point) as u64, KeyPlane::Unicode);
        }

        if !physical.is_unmapped() {
            return LogicalKey::of_plane(physical.0, KeyPlane::Hardware);
        }

        tracing::warn!(
            "Unrecognized key code 0x{:x} with no printable label, minting a logical key",
            code
        );
        LogicalKey::of_plane(code as u64, KeyPlane::Autogenerated)
    }
}

/// The 32-bit value of a printable label, or `None` when the label is empty,
/// a control character, or a function-key placeholder.
///
/// A label is one or two UTF-16 units. A surrogate pair decodes to its code
/// point; two independent units are packed high/low into one value.
fn printable_code_point(label: &str) -> Option<u32> {
    let units: Vec<u16> = label.encode_utf16().collect();
    let first = u32::from(*units.first()?);
    if is_control_character(first) || is_unprintable(first) {
        return None;
    }

    match units.as_slice() {
        [_] => Some(first),
        [high, low] => match char::decode_utf16([*high, *low]).next() {
            Some(Ok(c)) if c.len_utf16() == 2 => Some(c as u32),
            _ => Some((first << 16) | u32::from(*low)),
        },
        _ => {
            tracing::error!(
                "Character label {:?} spans {} UTF-16 units, using the first one",
                label,
                units.len()
            );
            debug_assert!(units.len() <= 2, "label {label:?} is longer than two UTF-16 units");
            Some(first)
        }
    }
}

fn fold_ascii(code_point: u32) -> u32 {
    match char::from_u32(code_point) {
        Some(c) if c.is_ascii_uppercase() => c.to_ascii_lowercase() as u32,
        _ => code_point,
    }
}

/// The text payload for a down or repeat event.
///
/// Empty strings and function-key placeholders carry no text; anything else
/// is attached verbatim.
pub fn event_text(characters: &str) -> Option<String> {
    let first = u32::from(characters.encode_utf16().next()?);
    if is_unprintable(first) {
        return None;
    }
    Some(characters.to_string())
}
