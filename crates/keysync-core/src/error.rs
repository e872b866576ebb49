use thiserror::Error;

use crate::correlator::ResponseId;

/// Contract violations detected by the converter.
///
/// These never occur in correct operation. They signal a logic error in the
/// converter or in the transport driving it, and callers should treat them as
/// fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConverterError {
    #[error("Acknowledgment for unknown response id {id}")]
    UnknownResponse { id: ResponseId },

    #[error("Modifier state desynchronized: recorded 0x{recorded:x}, host reports 0x{expected:x}")]
    ModifierDesync { recorded: u64, expected: u64 },
}
