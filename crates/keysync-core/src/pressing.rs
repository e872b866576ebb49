//! Press-state tracking

use std::collections::HashMap;

use crate::keys::{LogicalKey, PhysicalKey};

/// The authoritative record of which physical keys are down, and with which
/// logical identity.
///
/// A physical key appears at most once. [`PressState::update_key`] is the only
/// way to change the record.
#[derive(Debug, Clone, Default)]
pub struct PressState {
    pressing: HashMap<PhysicalKey, LogicalKey>,
}

impl PressState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `physical` as pressed with `logical`, or as released when
    /// `logical` is `None`. Any previous entry is overwritten.
    pub fn update_key(&mut self, physical: PhysicalKey, logical: Option<LogicalKey>) {
        match logical {
            Some(logical) => {
                self.pressing.insert(physical, logical);
            }
            None => {
                self.pressing.remove(&physical);
            }
        }
    }

    pub fn pressed_logical(&self, physical: PhysicalKey) -> Option<LogicalKey> {
        self.pressing.get(&physical).copied()
    }

    pub fn is_pressed(&self, physical: PhysicalKey) -> bool {
        self.pressing.contains_key(&physical)
    }

    pub fn len(&self) -> usize {
        self.pressing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pressing.is_empty()
    }

    /// Copy of the current record.
    pub fn snapshot(&self) -> HashMap<PhysicalKey, LogicalKey> {
        self.pressing.clone()
    }
}
