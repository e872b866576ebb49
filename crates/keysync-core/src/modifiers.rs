//! Modifier flag synchronization
//!
//! The host reports its live modifier flags with every key event, but the
//! downstream pipeline only learns about modifiers through key events. When
//! the host changes a modifier while nobody is listening (another window had
//! focus, for example), the pipeline's view goes stale.
//!
//! [`ModifierSync`] remembers the flags the pipeline was last synchronized on
//! and, before every event, diffs them against the host's flags. Each
//! differing bit becomes one [`ModifierTransition`] the converter sends as a
//! synthesized event ahead of the event that revealed the difference.
//!
//! ## CapsLock
//!
//! The host reports CapsLock as an edge: one notification means "engaged" or
//! "disengaged", and the key's release is never reported. A differing
//! CapsLock bit therefore becomes a full tap ([`ModifierTransition::CapsLockTap`],
//! a down immediately followed by an up) rather than a single transition.

use crate::tables::KeyTables;

/// A modifier transition the pipeline missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierTransition {
    /// CapsLock toggled: send a down followed by an up
    CapsLockTap,
    /// The modifier key with this hardware code went down or up
    Key { code: u32, pressed: bool },
}

/// Tracks the modifier flags the pipeline is synchronized on.
#[derive(Debug, Clone)]
pub struct ModifierSync {
    mask_of_interest: u64,
    caps_lock_flag: u64,
    last_flags: u64,
}

impl ModifierSync {
    pub fn new(tables: &KeyTables) -> Self {
        Self {
            mask_of_interest: tables.mask_of_interest(),
            caps_lock_flag: tables.caps_lock_flag(),
            last_flags: 0,
        }
    }

    /// The last synchronized flags, restricted to the mask of interest.
    pub fn last_flags(&self) -> u64 {
        self.last_flags
    }

    pub fn mask_of_interest(&self) -> u64 {
        self.mask_of_interest
    }

    /// Whether `flag` is set in the synchronized state.
    pub fn is_set(&self, flag: u64) -> bool {
        self.last_flags & flag != 0
    }

    /// Whether the synchronized state matches the host's flags over the mask
    /// of interest.
    pub fn is_synchronized(&self, host_flags: u64) -> bool {
        self.last_flags == host_flags & self.mask_of_interest
    }

    /// Diff `host_flags` against the synchronized state and return the
    /// transitions needed to catch up, then adopt the host's flags.
    ///
    /// Bits in `ignoring_mask` are neither compared nor updated. The CapsLock
    /// tap, if any, always comes first. Every other differing bit yields
    /// exactly one [`ModifierTransition::Key`].
    pub fn reconcile(
        &mut self,
        tables: &KeyTables,
        host_flags: u64,
        ignoring_mask: u64,
    ) -> Vec<ModifierTransition> {
        let updating_mask = self.mask_of_interest & !ignoring_mask;
        let current = host_flags & updating_mask;
        let mut diff = current ^ (self.last_flags & updating_mask);
        let mut transitions = Vec::new();

        if diff & self.caps_lock_flag != 0 {
            transitions.push(ModifierTransition::CapsLockTap);
            diff &= !self.caps_lock_flag;
        }

        while diff != 0 {
            let bit = diff & diff.wrapping_neg();
            diff &= !bit;

            match tables.modifier_code(bit) {
                Some(code) => transitions.push(ModifierTransition::Key {
                    code,
                    pressed: current & bit != 0,
                }),
                None => {
                    tracing::error!("No modifier key registered for flag 0x{:x}", bit);
                }
            }
        }

        self.last_flags = (self.last_flags & !updating_mask) | current;
        transitions
    }

    /// Flip a single tracked flag.
    pub fn toggle(&mut self, flag: u64) {
        self.last_flags ^= flag & self.mask_of_interest;
    }

    /// Adopt the host's value for the bits in `mask`, leaving others untouched.
    pub fn adopt(&mut self, host_flags: u64, mask: u64) {
        let mask = mask & self.mask_of_interest;
        self.last_flags = (self.last_flags & !mask) | (host_flags & mask);
    }
}
