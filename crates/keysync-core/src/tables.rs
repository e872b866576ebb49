//! Static lookup tables supplied by the host platform layer

use std::collections::HashMap;

use crate::keys::{LogicalKey, PhysicalKey};

/// Read-only mappings from hardware codes to key identities and modifier flags.
///
/// Built once at startup with [`KeyTables::builder`]. The converter never
/// mutates them.
#[derive(Debug, Clone, Default)]
pub struct KeyTables {
    physical: HashMap<u32, PhysicalKey>,
    logical: HashMap<u32, LogicalKey>,
    code_to_flag: HashMap<u32, u64>,
    flag_to_code: HashMap<u64, u32>,
    caps_lock: Option<(u32, u64)>,
    mask_of_interest: u64,
}

impl KeyTables {
    pub fn builder() -> KeyTablesBuilder {
        KeyTablesBuilder::default()
    }

    pub fn physical_key(&self, code: u32) -> Option<PhysicalKey> {
        self.physical.get(&code).copied()
    }

    pub fn logical_key(&self, code: u32) -> Option<LogicalKey> {
        self.logical.get(&code).copied()
    }

    /// The modifier flag bit a modifier key's hardware code drives.
    pub fn modifier_flag(&self, code: u32) -> Option<u64> {
        self.code_to_flag.get(&code).copied()
    }

    /// The hardware code associated with a single modifier flag bit.
    pub fn modifier_code(&self, flag: u64) -> Option<u32> {
        self.flag_to_code.get(&flag).copied()
    }

    /// Hardware code of the CapsLock key, if the host has one.
    pub fn caps_lock_code(&self) -> Option<u32> {
        self.caps_lock.map(|(code, _)| code)
    }

    /// Flag the host toggles for CapsLock, or 0 when there is none.
    pub fn caps_lock_flag(&self) -> u64 {
        self.caps_lock.map_or(0, |(_, flag)| flag)
    }

    pub fn is_caps_lock(&self, code: u32) -> bool {
        self.caps_lock_code() == Some(code)
    }

    /// Every modifier bit the converter tracks: each flag in the modifier
    /// table plus the CapsLock flag.
    pub fn mask_of_interest(&self) -> u64 {
        self.mask_of_interest
    }
}

/// Builder for [`KeyTables`].
#[derive(Debug, Default)]
pub struct KeyTablesBuilder {
    tables: KeyTables,
}

impl KeyTablesBuilder {
    /// Map a hardware code to its physical key.
    pub fn physical(mut self, code: u32, physical: PhysicalKey) -> Self {
        self.tables.physical.insert(code, physical);
        self
    }

    /// Map a hardware code directly to a logical key. Table entries always win
    /// over derived logical keys.
    pub fn logical(mut self, code: u32, logical: LogicalKey) -> Self {
        self.tables.logical.insert(code, logical);
        self
    }

    /// Register a modifier key and the single flag bit it drives.
    ///
    /// When two codes share a flag, the last one registered is used when a
    /// transition has to be synthesized for that flag.
    pub fn modifier(mut self, code: u32, flag: u64) -> Self {
        debug_assert!(flag.count_ones() == 1, "modifier flag 0x{flag:x} must be a single bit");
        self.tables.code_to_flag.insert(code, flag);
        self.tables.flag_to_code.insert(flag, code);
        self
    }

    /// Register the CapsLock key and the flag the host toggles for it.
    pub fn caps_lock(mut self, code: u32, flag: u64) -> Self {
        self.tables.caps_lock = Some((code, flag));
        self
    }

    pub fn build(mut self) -> KeyTables {
        let mask = self
            .tables
            .flag_to_code
            .keys()
            .fold(self.tables.caps_lock_flag(), |mask, flag| mask | flag);
        self.tables.mask_of_interest = mask;
        self.tables
    }
}
