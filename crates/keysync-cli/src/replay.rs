//! Offline trace replay
//!
//! A trace is a file of [`HardwareEvent`] JSON lines. One converter handles
//! the whole trace, so pressed keys and modifier state carry over from line
//! to line. Every primary event is acknowledged right away and the outbound
//! events are written in the transport's wire format.

use std::cell::Cell;
use std::io::{BufRead, Write};
use std::rc::Rc;

use keysync_core::{Converter, HardwareEvent, KeyTables, OutboundKeyEvent, ResponseId};
use keysync_daemon::transport::Message;
use miette::{miette, IntoDiagnostic};

/// Counts collected over one replay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: usize,
    pub primary: usize,
    pub synthesized: usize,
    pub handled: usize,
    pub unhandled: usize,
}

/// Replay `input` through a converter built from `tables`, acknowledging each
/// primary event with `handled`.
///
/// Blank lines and lines starting with `#` are skipped.
pub fn replay<R: BufRead, W: Write>(
    tables: KeyTables,
    input: R,
    mut output: W,
    handled: bool,
) -> miette::Result<ReplaySummary> {
    let mut converter = Converter::new(tables, Vec::<(OutboundKeyEvent, Option<ResponseId>)>::new());
    let mut summary = ReplaySummary::default();
    let resolved_handled = Rc::new(Cell::new(0usize));
    let resolved_unhandled = Rc::new(Cell::new(0usize));

    for (index, line) in input.lines().enumerate() {
        let line_no = index + 1;
        let line = line.into_diagnostic()?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event: HardwareEvent = serde_json::from_str(line)
            .map_err(|e| miette!("line {}: invalid hardware event: {}", line_no, e))?;
        summary.events += 1;

        let (yes, no) = (resolved_handled.clone(), resolved_unhandled.clone());
        converter
            .handle(&event, move |handled| {
                let counter = if handled { &yes } else { &no };
                counter.set(counter.get() + 1);
            })
            .map_err(|e| miette!("line {}: {}", line_no, e))?;

        let sent: Vec<_> = converter.sink_mut().drain(..).collect();
        for (event, response_id) in sent {
            let response_id = response_id.unwrap_or(ResponseId::NONE);
            if response_id.is_none() {
                summary.synthesized += 1;
            } else {
                summary.primary += 1;
            }

            let message = Message::KeyEvent { response_id, event };
            let json = serde_json::to_string(&message).into_diagnostic()?;
            writeln!(output, "{}", json).into_diagnostic()?;

            if !response_id.is_none() {
                converter
                    .acknowledge(response_id, handled)
                    .map_err(|e| miette!("line {}: {}", line_no, e))?;
            }
        }
    }

    summary.handled = resolved_handled.get();
    summary.unhandled = resolved_unhandled.get();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keysync_config::Keymap;

    const TRACE: &str = r#"
# Shift+A typed with the default keymap
{"type":"flags_changed","code":42,"modifier_flags":2}
{"type":"key_down","code":30,"modifier_flags":2,"characters":"A","characters_ignoring_modifiers":"a"}
{"type":"key_up","code":30,"modifier_flags":2}
{"type":"flags_changed","code":42,"modifier_flags":0}
"#;

    fn run(trace: &str, handled: bool) -> (ReplaySummary, Vec<Message>) {
        let mut output = Vec::new();
        let summary = replay(
            Keymap::default().key_tables(),
            trace.as_bytes(),
            &mut output,
            handled,
        )
        .unwrap();
        let messages = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        (summary, messages)
    }

    #[test]
    fn test_replay_shift_a() {
        let (summary, messages) = run(TRACE, true);

        assert_eq!(
            summary,
            ReplaySummary {
                events: 4,
                primary: 4,
                synthesized: 0,
                handled: 4,
                unhandled: 0,
            }
        );

        let Message::KeyEvent { response_id, event } = &messages[1] else {
            panic!("expected a key event");
        };
        assert_eq!(*response_id, ResponseId(2));
        assert_eq!(event.logical.0, 0x61);
        assert_eq!(event.text.as_deref(), Some("A"));
    }

    #[test]
    fn test_replay_reports_unhandled() {
        let (summary, _) = run(TRACE, false);
        assert_eq!(summary.unhandled, 4);
        assert_eq!(summary.handled, 0);
    }

    #[test]
    fn test_replay_catch_up_is_synthesized() {
        // Shift was already down when the trace started
        let trace = r#"{"type":"key_down","code":30,"modifier_flags":2,"characters":"A","characters_ignoring_modifiers":"a"}"#;
        let (summary, messages) = run(trace, true);

        assert_eq!(summary.synthesized, 1);
        assert_eq!(summary.primary, 1);
        let Message::KeyEvent { response_id, event } = &messages[0] else {
            panic!("expected a key event");
        };
        assert!(response_id.is_none());
        assert!(event.synthesized);
        assert_eq!(event.physical.0, 0x0007_00e1);
    }

    #[test]
    fn test_replay_rejects_bad_line() {
        let result = replay(
            Keymap::default().key_tables(),
            "{\"type\":\"key_down\"}\n".as_bytes(),
            Vec::new(),
            true,
        );
        let message = result.unwrap_err().to_string();
        assert!(message.starts_with("line 1:"));
    }
}
