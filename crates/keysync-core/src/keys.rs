//! Physical and logical key identifiers

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bits of a logical key that carry its value within a plane.
pub const VALUE_MASK: u64 = 0x00_FFFF_FFFF;

/// Bits of a logical key that carry its plane.
pub const PLANE_MASK: u64 = 0xFF_0000_0000;

/// Set on logical keys minted from a raw hardware code.
pub const AUTOGENERATED_MASK: u64 = 0x100_0000_0000;

const UNICODE_PLANE: u64 = 0x00_0000_0000;
const NAMED_PLANE: u64 = 0x01_0000_0000;
const HARDWARE_PLANE: u64 = 0x14_0000_0000;

/// Stable identifier of a hardware key position, independent of layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhysicalKey(pub u64);

/// Set on physical keys derived from a hardware code the physical table
/// does not know. The low 32 bits hold the code.
pub const UNMAPPED_MASK: u64 = 0x100_0000_0000;

impl PhysicalKey {
    /// Best-effort identity for a hardware code missing from the physical
    /// table. Distinct codes never share one.
    pub const fn unmapped(code: u32) -> Self {
        PhysicalKey(UNMAPPED_MASK | code as u64)
    }

    pub fn is_unmapped(self) -> bool {
        self.0 & UNMAPPED_MASK != 0
    }
}

impl fmt::Display for PhysicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Origin of a logical key's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPlane {
    /// Derived from the Unicode code point the key produces
    Unicode,
    /// Named, non-printable keys supplied by the logical table
    Named,
    /// Derived from the physical key identity
    Hardware,
    /// Minted from a raw hardware code nobody recognized
    Autogenerated,
}

impl KeyPlane {
    fn bits(self) -> u64 {
        match self {
            KeyPlane::Unicode => UNICODE_PLANE,
            KeyPlane::Named => NAMED_PLANE,
            KeyPlane::Hardware => HARDWARE_PLANE,
            KeyPlane::Autogenerated => HARDWARE_PLANE | AUTOGENERATED_MASK,
        }
    }
}

/// Stable identifier of a key's semantic meaning.
///
/// The low 32 bits hold the value and the bits above hold the [`KeyPlane`]
/// the value was derived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalKey(pub u64);

impl LogicalKey {
    /// Build a logical key from a value and the plane it belongs to.
    pub const fn of_plane_bits(value: u64, plane_bits: u64) -> Self {
        LogicalKey((value & VALUE_MASK) | plane_bits)
    }

    pub fn of_plane(value: u64, plane: KeyPlane) -> Self {
        Self::of_plane_bits(value, plane.bits())
    }

    /// The value within the plane.
    pub fn value(self) -> u64 {
        self.0 & VALUE_MASK
    }

    /// The plane this key was derived in, or `None` for values the logical
    /// table supplied outside the known planes.
    pub fn plane(self) -> Option<KeyPlane> {
        if self.is_autogenerated() {
            return Some(KeyPlane::Autogenerated);
        }
        match self.0 & PLANE_MASK {
            UNICODE_PLANE => Some(KeyPlane::Unicode),
            NAMED_PLANE => Some(KeyPlane::Named),
            HARDWARE_PLANE => Some(KeyPlane::Hardware),
            _ => None,
        }
    }

    /// Whether the key was minted locally and may collide with a future
    /// table entry.
    pub fn is_autogenerated(self) -> bool {
        self.0 & AUTOGENERATED_MASK != 0
    }
}

impl fmt::Display for LogicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:011x}", self.0)
    }
}
