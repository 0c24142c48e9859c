//! # Binary Wire Format
//!
//! Every binary frame is a 4-byte ASCII identifier followed by a table:
//!
//! ```text
//! ┌────────────┬──────────────┬──────────────────────────────────┐
//! │ identifier │ presence u32 │ present fields in slot order     │
//! │  4 bytes   │ little-endian│ f32/u32/f64 LE, str = u16 + utf8 │
//! └────────────┴──────────────┴──────────────────────────────────┘
//! ```
//!
//! Absent fields cost nothing, so a model can add slots without breaking
//! older readers. Receivers dispatch on the identifier to the matching
//! [`BinaryModel`] decoder before any listener runs.

mod table;

pub use table::{TableReader, TableWriter, MAX_PAYLOAD_SIZE, MAX_SLOTS};
pub(crate) use table::required;

use crate::error::WireResult;
use tandem_shared::BinaryIdentifier;

/// A payload with a fixed identifier and a table layout.
pub trait BinaryModel: Sized {
    /// Identifier prefixing every frame of this model.
    const IDENTIFIER: BinaryIdentifier;

    /// Writes the fields of this model.
    fn encode(&self, writer: &mut TableWriter) -> WireResult<()>;

    /// Reads a model from a table positioned after the header.
    fn decode(reader: &mut TableReader<'_>) -> WireResult<Self>;

    /// Encodes a complete frame, identifier included.
    fn to_frame(&self) -> WireResult<Vec<u8>> {
        let mut writer = TableWriter::new(Self::IDENTIFIER);
        self.encode(&mut writer)?;
        Ok(writer.finish())
    }

    /// Decodes a complete frame, checking the identifier.
    fn from_frame(frame: &[u8]) -> WireResult<Self> {
        let mut reader = TableReader::new(frame, Self::IDENTIFIER)?;
        Self::decode(&mut reader)
    }
}
