//! Inbound hardware events and outbound key events

use serde::{Deserialize, Serialize};

use crate::keys::{LogicalKey, PhysicalKey};

/// What the host reported for a hardware event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HardwareEventKind {
    /// A key went down, or the host auto-repeated it
    KeyDown {
        #[serde(default)]
        repeat: bool,
    },
    /// A key went up
    KeyUp,
    /// A modifier key changed state; the new state is in the event's flags
    FlagsChanged,
}

/// A native keyboard event as delivered by the host platform layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareEvent {
    #[serde(flatten)]
    pub kind: HardwareEventKind,
    /// Raw hardware key code
    pub code: u32,
    /// The host's live modifier flags at the time of the event
    #[serde(default)]
    pub modifier_flags: u64,
    /// Event time in microseconds
    #[serde(default)]
    pub timestamp_us: u64,
    /// Characters the key produced, modifiers applied
    #[serde(default)]
    pub characters: String,
    /// Characters the key would produce without modifiers
    #[serde(default)]
    pub characters_ignoring_modifiers: String,
}

impl HardwareEvent {
    pub fn key_down(code: u32, modifier_flags: u64, characters: &str) -> Self {
        Self {
            kind: HardwareEventKind::KeyDown { repeat: false },
            code,
            modifier_flags,
            timestamp_us: 0,
            characters: characters.to_string(),
            characters_ignoring_modifiers: characters.to_string(),
        }
    }

    pub fn key_repeat(code: u32, modifier_flags: u64, characters: &str) -> Self {
        Self {
            kind: HardwareEventKind::KeyDown { repeat: true },
            ..Self::key_down(code, modifier_flags, characters)
        }
    }

    pub fn key_up(code: u32, modifier_flags: u64) -> Self {
        Self {
            kind: HardwareEventKind::KeyUp,
            ..Self::key_down(code, modifier_flags, "")
        }
    }

    pub fn flags_changed(code: u32, modifier_flags: u64) -> Self {
        Self {
            kind: HardwareEventKind::FlagsChanged,
            ..Self::key_down(code, modifier_flags, "")
        }
    }

    pub fn at(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    pub fn ignoring_modifiers(mut self, characters: &str) -> Self {
        self.characters_ignoring_modifiers = characters.to_string();
        self
    }
}

/// Direction of an outbound key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEventKind {
    Down,
    Up,
    Repeat,
}

/// A normalized key event delivered to the downstream pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundKeyEvent {
    pub timestamp_us: u64,
    pub kind: KeyEventKind,
    pub physical: PhysicalKey,
    pub logical: LogicalKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Set on catch-up and protocol-mandated events, which are never
    /// acknowledged
    pub synthesized: bool,
}

impl OutboundKeyEvent {
    pub(crate) fn synthesized(
        timestamp_us: u64,
        kind: KeyEventKind,
        physical: PhysicalKey,
        logical: LogicalKey,
    ) -> Self {
        Self {
            timestamp_us,
            kind,
            physical,
            logical,
            text: None,
            synthesized: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_event_from_trace_line() {
        let line = r#"{"type":"key_down","repeat":true,"code":30,"modifier_flags":2,"characters":"A"}"#;
        let event: HardwareEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.kind, HardwareEventKind::KeyDown { repeat: true });
        assert_eq!(event.code, 30);
        assert_eq!(event.modifier_flags, 2);
        assert_eq!(event.characters, "A");
        assert_eq!(event.characters_ignoring_modifiers, "");
        assert_eq!(event.timestamp_us, 0);
    }

    #[test]
    fn test_hardware_event_defaults_repeat() {
        let line = r#"{"type":"key_down","code":30}"#;
        let event: HardwareEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.kind, HardwareEventKind::KeyDown { repeat: false });

        let line = r#"{"type":"flags_changed","code":42,"modifier_flags":2}"#;
        let event: HardwareEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.kind, HardwareEventKind::FlagsChanged);
    }

    #[test]
    fn test_outbound_event_serialization() {
        let event = OutboundKeyEvent {
            timestamp_us: 1500,
            kind: KeyEventKind::Down,
            physical: PhysicalKey(0x0007_0004),
            logical: LogicalKey(0x61),
            text: Some("a".to_string()),
            synthesized: false,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"timestamp_us":1500,"kind":"down","physical":458756,"logical":97,"text":"a","synthesized":false}"#
        );
    }

    #[test]
    fn test_synthesized_event_has_no_text() {
        let event = OutboundKeyEvent::synthesized(
            0,
            KeyEventKind::Up,
            PhysicalKey(0x0007_00e1),
            LogicalKey(0x01_0000_0102),
        );
        assert!(event.synthesized);
        assert_eq!(event.text, None);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("text"));
    }
}
