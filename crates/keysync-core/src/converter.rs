//! Hardware event conversion
//!
//! [`Converter`] dispatches each hardware event by kind and is the only place
//! that talks to the outbound [`KeyEventSink`].
//!
//! ## Event Flow
//!
//! ```text
//!  hardware event ──► resolve identity ──► reconcile modifiers ──► update press record
//!                                              │                         │
//!                                              ▼                         ▼
//!                                     synthesized catch-up       primary event ──► correlator
//!                                     events (sent first)                               │
//!                                                                                       ▼
//!  acknowledge(id, handled) ─────────────────────────────────────────────► caller callback
//! ```
//!
//! Every call to [`Converter::handle`] ends with exactly one resolution of the
//! caller's callback: either immediately (stray events, no-op modifier
//! changes) or when the primary event is acknowledged.

use std::collections::HashMap;

use crate::correlator::{ResponseCorrelator, ResponseId};
use crate::error::ConverterError;
use crate::event::{HardwareEvent, HardwareEventKind, KeyEventKind, OutboundKeyEvent};
use crate::guard::CallbackGuard;
use crate::keys::{LogicalKey, PhysicalKey};
use crate::modifiers::{ModifierSync, ModifierTransition};
use crate::pressing::PressState;
use crate::resolver::{event_text, KeyResolver};
use crate::tables::KeyTables;

/// Transport delivering converted events to the downstream pipeline.
///
/// Primary events carry the [`ResponseId`] the transport must later report to
/// [`Converter::acknowledge`] exactly once. Synthesized events carry `None`
/// and are never acknowledged.
pub trait KeyEventSink {
    fn send(&mut self, event: &OutboundKeyEvent, response_id: Option<ResponseId>);
}

/// Records every sent event in order.
impl KeyEventSink for Vec<(OutboundKeyEvent, Option<ResponseId>)> {
    fn send(&mut self, event: &OutboundKeyEvent, response_id: Option<ResponseId>) {
        self.push((event.clone(), response_id));
    }
}

/// Converts hardware events into outbound key events.
///
/// Owns the press records, the synchronized modifier state and the pending
/// responses. Not thread-safe: the embedding must serialize calls.
pub struct Converter<S> {
    tables: KeyTables,
    sink: S,
    pressing: PressState,
    modifiers: ModifierSync,
    correlator: ResponseCorrelator,
}

impl<S: KeyEventSink> Converter<S> {
    pub fn new(tables: KeyTables, sink: S) -> Self {
        let modifiers = ModifierSync::new(&tables);
        Self {
            tables,
            sink,
            pressing: PressState::new(),
            modifiers,
            correlator: ResponseCorrelator::new(),
        }
    }

    /// Handle one hardware event.
    ///
    /// `callback` is invoked exactly once with whether the pipeline handled
    /// the event: before this returns, or later from [`Converter::acknowledge`].
    ///
    /// # Errors
    ///
    /// Returns [`ConverterError::ModifierDesync`] if the synchronized modifier
    /// state does not match the host's flags after handling. The callback has
    /// been dealt with either way.
    pub fn handle(
        &mut self,
        event: &HardwareEvent,
        callback: impl FnOnce(bool) + 'static,
    ) -> Result<(), ConverterError> {
        let guard = CallbackGuard::new(callback);

        match event.kind {
            HardwareEventKind::KeyDown { repeat } => self.handle_down(event, repeat, guard),
            HardwareEventKind::KeyUp => self.handle_up(event, guard),
            HardwareEventKind::FlagsChanged => self.handle_flags_changed(event, guard),
        }

        self.check_modifiers(event.modifier_flags)
    }

    /// Resolve the callback waiting on `response_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ConverterError::UnknownResponse`] if the id was never sent or
    /// was already acknowledged.
    pub fn acknowledge(&mut self, response_id: ResponseId, handled: bool) -> Result<(), ConverterError> {
        tracing::trace!("Acknowledged response {}: handled={}", response_id, handled);
        self.correlator.resolve(response_id, handled)
    }

    /// Catch up on modifier changes without a triggering key event, e.g. when
    /// the receiver regains focus. Only synthesized events are sent.
    pub fn sync_modifiers(&mut self, host_flags: u64, timestamp_us: u64) {
        self.synchronize_modifiers(host_flags, 0, timestamp_us);
    }

    /// Copy of the keys currently recorded as pressed.
    pub fn pressed_state(&self) -> HashMap<PhysicalKey, LogicalKey> {
        self.pressing.snapshot()
    }

    pub fn pressed_logical(&self, physical: PhysicalKey) -> Option<LogicalKey> {
        self.pressing.pressed_logical(physical)
    }

    /// The modifier flags the pipeline is synchronized on.
    pub fn modifier_flags(&self) -> u64 {
        self.modifiers.last_flags()
    }

    pub fn pending_responses(&self) -> usize {
        self.correlator.pending_count()
    }

    pub fn tables(&self) -> &KeyTables {
        &self.tables
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn handle_down(&mut self, event: &HardwareEvent, repeat: bool, guard: CallbackGuard) {
        let resolver = KeyResolver::new(&self.tables);
        let physical = resolver.physical_key(event.code);
        let logical = resolver.logical_key_for_printable(
            event.code,
            physical,
            &event.characters_ignoring_modifiers,
        );
        if physical.is_unmapped() {
            tracing::warn!("No physical key for code 0x{:x}, using {}", event.code, physical);
        }

        self.synchronize_modifiers(event.modifier_flags, 0, event.timestamp_us);

        let pressed = self.pressing.pressed_logical(physical);
        if pressed.is_some() && !repeat {
            // The matching up was delivered elsewhere, typically because
            // focus changed while the key was held.
            tracing::debug!("Ignoring duplicate down for pressed key {}", physical);
            guard.resolve(true);
            return;
        }
        if pressed.is_none() {
            self.pressing.update_key(physical, Some(logical));
        }

        let outbound = OutboundKeyEvent {
            timestamp_us: event.timestamp_us,
            kind: if repeat { KeyEventKind::Repeat } else { KeyEventKind::Down },
            physical,
            logical: pressed.unwrap_or(logical),
            text: event_text(&event.characters),
            synthesized: false,
        };
        self.send_primary(outbound, guard);
    }

    fn handle_up(&mut self, event: &HardwareEvent, guard: CallbackGuard) {
        let physical = KeyResolver::new(&self.tables).physical_key(event.code);

        self.synchronize_modifiers(event.modifier_flags, 0, event.timestamp_us);

        let Some(logical) = self.pressing.pressed_logical(physical) else {
            tracing::debug!("Ignoring up for unpressed key {}", physical);
            guard.resolve(true);
            return;
        };
        self.pressing.update_key(physical, None);

        let outbound = OutboundKeyEvent {
            timestamp_us: event.timestamp_us,
            kind: KeyEventKind::Up,
            physical,
            logical,
            text: None,
            synthesized: false,
        };
        self.send_primary(outbound, guard);
    }

    fn handle_flags_changed(&mut self, event: &HardwareEvent, guard: CallbackGuard) {
        let flags = event.modifier_flags;
        let timestamp = event.timestamp_us;

        if self.tables.is_caps_lock(event.code) {
            let caps_lock_flag = self.tables.caps_lock_flag();
            self.synchronize_modifiers(flags, caps_lock_flag, timestamp);
            self.send_caps_lock_tap(timestamp, Some(guard));
            self.modifiers.adopt(flags, caps_lock_flag);
            return;
        }

        let flag = match self.tables.modifier_flag(event.code) {
            Some(flag) => flag,
            None => {
                tracing::warn!("No modifier flag for code 0x{:x}", event.code);
                0
            }
        };
        let resolver = KeyResolver::new(&self.tables);
        let physical = resolver.physical_key(event.code);
        let logical = resolver.logical_key_for_modifier(event.code, physical);

        self.synchronize_modifiers(flags, flag, timestamp);

        let pressed = self.pressing.pressed_logical(physical);
        if flag != 0 && self.modifiers.is_set(flag) != pressed.is_some() {
            tracing::error!(
                "Modifier flag 0x{:x} disagrees with press record of code 0x{:x} (pressed: {})",
                flag,
                event.code,
                pressed.is_some()
            );
            debug_assert!(
                false,
                "modifier flag 0x{flag:x} disagrees with the press record of code 0x{:x}",
                event.code
            );
        }

        let should_be_pressed = flags & flag != 0;
        let (kind, logical) = match (pressed, should_be_pressed) {
            (Some(_), true) | (None, false) => {
                self.modifiers.adopt(flags, flag);
                guard.resolve(true);
                return;
            }
            (None, true) => {
                self.pressing.update_key(physical, Some(logical));
                (KeyEventKind::Down, logical)
            }
            (Some(pressed_logical), false) => {
                self.pressing.update_key(physical, None);
                (KeyEventKind::Up, pressed_logical)
            }
        };
        self.modifiers.adopt(flags, flag);

        let outbound = OutboundKeyEvent {
            timestamp_us: timestamp,
            kind,
            physical,
            logical,
            text: None,
            synthesized: false,
        };
        self.send_primary(outbound, guard);
    }

    // ========================================================================
    // Modifier synchronization
    // ========================================================================

    fn synchronize_modifiers(&mut self, host_flags: u64, ignoring_mask: u64, timestamp_us: u64) {
        let transitions = self.modifiers.reconcile(&self.tables, host_flags, ignoring_mask);
        for transition in transitions {
            match transition {
                ModifierTransition::CapsLockTap => self.send_caps_lock_tap(timestamp_us, None),
                ModifierTransition::Key { code, pressed } => {
                    self.synthesize_modifier(code, pressed, timestamp_us)
                }
            }
        }
    }

    fn synthesize_modifier(&mut self, code: u32, pressed: bool, timestamp_us: u64) {
        let resolver = KeyResolver::new(&self.tables);
        let physical = resolver.physical_key(code);
        if physical.is_unmapped() {
            tracing::warn!("No physical key for modifier code 0x{:x}, using {}", code, physical);
        }
        let logical = resolver.logical_key_for_modifier(code, physical);
        let kind = if pressed { KeyEventKind::Down } else { KeyEventKind::Up };

        self.send_synthesized(OutboundKeyEvent::synthesized(timestamp_us, kind, physical, logical));
        self.pressing.update_key(physical, pressed.then_some(logical));
    }

    /// Send a CapsLock down immediately followed by an up.
    ///
    /// With a guard the down is primary and the guard waits on its
    /// acknowledgment; without one both events are synthesized. The up is
    /// always synthesized since the host never reports the key's release.
    fn send_caps_lock_tap(&mut self, timestamp_us: u64, guard: Option<CallbackGuard>) {
        let resolver = KeyResolver::new(&self.tables);
        let Some(code) = self.tables.caps_lock_code() else {
            tracing::warn!("CapsLock toggled but the tables have no CapsLock key");
            if let Some(guard) = guard {
                guard.resolve(true);
            }
            return;
        };
        let physical = resolver.physical_key(code);
        let logical = resolver.logical_key_for_modifier(code, physical);

        let down = OutboundKeyEvent::synthesized(timestamp_us, KeyEventKind::Down, physical, logical);
        match guard {
            Some(guard) => self.send_primary(
                OutboundKeyEvent {
                    synthesized: false,
                    ..down
                },
                guard,
            ),
            None => self.send_synthesized(down),
        }

        self.send_synthesized(OutboundKeyEvent::synthesized(
            timestamp_us,
            KeyEventKind::Up,
            physical,
            logical,
        ));
    }

    // ========================================================================
    // Sending
    // ========================================================================

    fn send_primary(&mut self, event: OutboundKeyEvent, guard: CallbackGuard) {
        let id = self.correlator.register(guard);
        tracing::debug!(
            "Sending {:?} physical={} logical={} response={}",
            event.kind,
            event.physical,
            event.logical,
            id
        );
        self.sink.send(&event, Some(id));
    }

    fn send_synthesized(&mut self, event: OutboundKeyEvent) {
        tracing::debug!(
            "Sending synthesized {:?} physical={} logical={}",
            event.kind,
            event.physical,
            event.logical
        );
        self.sink.send(&event, None);
    }

    fn check_modifiers(&self, host_flags: u64) -> Result<(), ConverterError> {
        if self.modifiers.is_synchronized(host_flags) {
            return Ok(());
        }
        let recorded = self.modifiers.last_flags();
        let expected = host_flags & self.modifiers.mask_of_interest();
        tracing::error!(
            "Modifier flags not synchronized: recorded 0x{:x}, host reports 0x{:x}",
            recorded,
            expected
        );
        Err(ConverterError::ModifierDesync { recorded, expected })
    }
}

impl<S> std::fmt::Debug for Converter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("pressing", &self.pressing)
            .field("modifiers", &self.modifiers)
            .field("correlator", &self.correlator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Sent = Vec<(OutboundKeyEvent, Option<ResponseId>)>;

    const KEY_A: u32 = 30;
    const KEY_LEFTSHIFT: u32 = 42;
    const KEY_CAPSLOCK: u32 = 58;
    const SHIFT: u64 = 0x2;
    const CAPS: u64 = 0x10000;

    fn converter() -> Converter<Sent> {
        let tables = KeyTables::builder()
            .physical(KEY_A, PhysicalKey(0x0007_0004))
            .physical(KEY_LEFTSHIFT, PhysicalKey(0x0007_00e1))
            .logical(KEY_LEFTSHIFT, LogicalKey(0x02_0000_0102))
            .modifier(KEY_LEFTSHIFT, SHIFT)
            .physical(KEY_CAPSLOCK, PhysicalKey(0x0007_0039))
            .logical(KEY_CAPSLOCK, LogicalKey(0x01_0000_0104))
            .caps_lock(KEY_CAPSLOCK, CAPS)
            .build();
        Converter::new(tables, Vec::new())
    }

    fn recorder() -> (Rc<RefCell<Vec<bool>>>, impl FnOnce(bool) + 'static) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = calls.clone();
        (calls, move |handled| sink.borrow_mut().push(handled))
    }

    #[test]
    fn test_down_registers_pending_response() {
        let mut converter = converter();
        let (calls, callback) = recorder();

        converter
            .handle(&HardwareEvent::key_down(KEY_A, 0, "a"), callback)
            .unwrap();

        assert_eq!(converter.sink().len(), 1);
        let (event, id) = &converter.sink()[0];
        assert_eq!(event.kind, KeyEventKind::Down);
        assert_eq!(event.text.as_deref(), Some("a"));
        assert_eq!(*id, Some(ResponseId(1)));
        assert!(calls.borrow().is_empty());

        converter.acknowledge(ResponseId(1), true).unwrap();
        assert_eq!(*calls.borrow(), vec![true]);
        assert_eq!(converter.pending_responses(), 0);
    }

    #[test]
    fn test_repeat_keeps_logical_key_of_press() {
        let mut converter = converter();
        converter
            .handle(&HardwareEvent::key_down(KEY_A, 0, "a"), |_| {})
            .unwrap();
        // The layout changed mid-press; the label now reads "q"
        converter
            .handle(&HardwareEvent::key_repeat(KEY_A, 0, "q"), |_| {})
            .unwrap();

        let sent = converter.sink();
        assert_eq!(sent[1].0.kind, KeyEventKind::Repeat);
        assert_eq!(sent[1].0.logical, sent[0].0.logical);
        assert_eq!(sent[1].0.text.as_deref(), Some("q"));
    }

    #[test]
    fn test_flags_changed_press_and_release() {
        let mut converter = converter();
        converter
            .handle(&HardwareEvent::flags_changed(KEY_LEFTSHIFT, SHIFT), |_| {})
            .unwrap();
        converter
            .handle(&HardwareEvent::flags_changed(KEY_LEFTSHIFT, 0), |_| {})
            .unwrap();

        let sent = converter.sink();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0.kind, KeyEventKind::Down);
        assert_eq!(sent[0].0.logical, LogicalKey(0x02_0000_0102));
        assert!(!sent[0].0.synthesized);
        assert_eq!(sent[1].0.kind, KeyEventKind::Up);
        assert_eq!(converter.modifier_flags(), 0);
        assert!(converter.pressed_state().is_empty());
    }

    #[test]
    fn test_flags_changed_without_change_resolves_immediately() {
        let mut converter = converter();
        let (calls, callback) = recorder();
        converter
            .handle(&HardwareEvent::flags_changed(KEY_LEFTSHIFT, 0), callback)
            .unwrap();
        assert!(converter.sink().is_empty());
        assert_eq!(*calls.borrow(), vec![true]);
    }

    #[test]
    fn test_sync_modifiers_sends_only_synthesized() {
        let mut converter = converter();
        converter.sync_modifiers(SHIFT | CAPS, 10);

        let sent = converter.sink();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|(event, id)| event.synthesized && id.is_none()));
        assert_eq!(converter.modifier_flags(), SHIFT | CAPS);
        assert_eq!(
            converter.pressed_logical(PhysicalKey(0x0007_00e1)),
            Some(LogicalKey(0x02_0000_0102))
        );
        assert_eq!(converter.pending_responses(), 0);
    }

    #[test]
    fn test_unmapped_modifier_gets_its_own_identity() {
        let tables = KeyTables::builder().modifier(KEY_LEFTSHIFT, SHIFT).build();
        let mut converter = Converter::new(tables, Vec::new());
        converter.sync_modifiers(SHIFT, 0);

        let sent = converter.sink();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.physical, PhysicalKey::unmapped(KEY_LEFTSHIFT));
        assert!(sent[0].0.logical.is_autogenerated());
        assert!(sent[0].0.synthesized);
        assert_eq!(converter.modifier_flags(), SHIFT);
        assert!(converter
            .pressed_logical(PhysicalKey::unmapped(KEY_LEFTSHIFT))
            .is_some());
    }

    #[test]
    fn test_unmapped_caps_lock_still_taps() {
        let tables = KeyTables::builder().caps_lock(KEY_CAPSLOCK, CAPS).build();
        let mut converter = Converter::new(tables, Vec::new());
        let (calls, callback) = recorder();
        converter
            .handle(&HardwareEvent::flags_changed(KEY_CAPSLOCK, CAPS), callback)
            .unwrap();

        let sent = converter.sink();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0.physical, PhysicalKey::unmapped(KEY_CAPSLOCK));
        assert_eq!(sent[0].1, Some(ResponseId(1)));
        assert_eq!(sent[1].0.kind, KeyEventKind::Up);
        assert_eq!(converter.modifier_flags(), CAPS);

        converter.acknowledge(ResponseId(1), true).unwrap();
        assert_eq!(*calls.borrow(), vec![true]);
    }

    #[test]
    fn test_flags_changed_for_unflagged_code_reconciles_others() {
        let mut converter = converter();
        let (calls, callback) = recorder();
        // Code 0x1f0 has no flag; the shift bit it reports is still caught up
        converter
            .handle(&HardwareEvent::flags_changed(0x1f0, SHIFT), callback)
            .unwrap();

        assert_eq!(converter.sink().len(), 1);
        assert!(converter.sink()[0].0.synthesized);
        assert_eq!(*calls.borrow(), vec![true]);
        assert_eq!(converter.modifier_flags(), SHIFT);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "disagrees with the press record")]
    fn test_flag_and_press_record_disagreement_asserts() {
        let mut converter = converter();
        // A key-down for a modifier code records a press without its flag
        converter
            .handle(&HardwareEvent::key_down(KEY_LEFTSHIFT, 0, ""), |_| {})
            .unwrap();
        let _ = converter.handle(&HardwareEvent::flags_changed(KEY_LEFTSHIFT, SHIFT), |_| {});
    }
}
