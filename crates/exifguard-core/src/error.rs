// crates/exifguard-core/src/error.rs

use thiserror::Error;

use crate::batch::{ProcessingState, RecordId};

/// Result type alias for exifguard operations.
pub type Result<T> = std::result::Result<T, GuardError>;

/// A universal error type for extraction, redaction and batch bookkeeping.
///
/// Every variant owns plain data so errors can be cloned onto a
/// [`ProcessingRecord`](crate::batch::ProcessingRecord) and sent between
/// worker tasks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// The JPEG marker stream is structurally broken.
    #[error("Malformed JPEG container at byte {offset}: {reason}")]
    MalformedContainer { offset: usize, reason: String },

    /// The Exif signature, byte-order mark or TIFF header is missing or corrupt.
    #[error("Invalid Exif metadata block: {0}")]
    InvalidMetadataBlock(String),

    /// A single IFD entry could not be decoded. Recovered locally.
    #[error("Skipped IFD entry 0x{tag:04X}: {reason}")]
    EntrySkipped { tag: u16, reason: String },

    /// Building the cleaned output buffer failed.
    #[error("Failed to build cleaned image: {0}")]
    RedactionIoFailure(String),

    #[error("No record with id {0}")]
    UnknownRecord(RecordId),

    #[error("Record {id} cannot do that while {state}")]
    InvalidTransition { id: RecordId, state: ProcessingState },
}

impl GuardError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::MalformedContainer {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn skipped(tag: u16, reason: impl Into<String>) -> Self {
        Self::EntrySkipped {
            tag,
            reason: reason.into(),
        }
    }
}
