//! Table writer and reader.
//!
//! Slots are written in increasing order and read back in the same order.
//! Reading a slot whose presence bit is clear yields `None` without
//! consuming any bytes.

use crate::error::{WireError, WireResult};
use bytemuck::{bytes_of, Pod};
use tandem_shared::{BinaryIdentifier, Quaternion, Vec3, BINARY_IDENTIFIER_LEN};

/// Largest encoded frame.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024;

/// Number of slots addressable by the presence mask.
pub const MAX_SLOTS: u8 = 32;

const HEADER_LEN: usize = BINARY_IDENTIFIER_LEN + 4;

/// Writes one table frame.
pub struct TableWriter {
    buffer: Vec<u8>,
    mask: u32,
    next_slot: u8,
}

impl TableWriter {
    /// Starts a frame with `identifier`.
    #[must_use]
    pub fn new(identifier: BinaryIdentifier) -> Self {
        let mut buffer = Vec::with_capacity(64);
        buffer.extend_from_slice(identifier.as_bytes());
        buffer.extend_from_slice(&0u32.to_le_bytes());
        Self { buffer, mask: 0, next_slot: 0 }
    }

    /// Bytes written so far, header included.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no field has been written.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.mask == 0
    }

    fn begin(&mut self, slot: u8, size: usize) -> WireResult<()> {
        debug_assert!(slot < MAX_SLOTS, "slot {slot} out of range");
        debug_assert!(slot >= self.next_slot, "slot {slot} written out of order");
        if self.buffer.len() + size > MAX_PAYLOAD_SIZE {
            return Err(WireError::Overflow(MAX_PAYLOAD_SIZE));
        }
        self.mask |= 1 << slot;
        self.next_slot = slot + 1;
        Ok(())
    }

    /// Writes a Pod value as raw little-endian bytes.
    pub fn write_pod<T: Pod>(&mut self, slot: u8, value: &T) -> WireResult<()> {
        let bytes = bytes_of(value);
        self.begin(slot, bytes.len())?;
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Writes a `u32`.
    pub fn write_u32(&mut self, slot: u8, value: u32) -> WireResult<()> {
        self.begin(slot, 4)?;
        self.buffer.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Writes an `f32`.
    pub fn write_f32(&mut self, slot: u8, value: f32) -> WireResult<()> {
        self.begin(slot, 4)?;
        self.buffer.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Writes an `f64`.
    pub fn write_f64(&mut self, slot: u8, value: f64) -> WireResult<()> {
        self.begin(slot, 8)?;
        self.buffer.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, slot: u8, value: &str) -> WireResult<()> {
        let len = u16::try_from(value.len()).map_err(|_| WireError::Overflow(usize::from(u16::MAX)))?;
        self.begin(slot, 2 + value.len())?;
        self.buffer.extend_from_slice(&len.to_le_bytes());
        self.buffer.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Writes a vector.
    pub fn write_vec3(&mut self, slot: u8, value: Vec3) -> WireResult<()> {
        self.write_pod(slot, &value)
    }

    /// Writes a rotation.
    pub fn write_quaternion(&mut self, slot: u8, value: Quaternion) -> WireResult<()> {
        self.write_pod(slot, &value)
    }

    /// Patches the presence mask and returns the frame.
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        self.buffer[BINARY_IDENTIFIER_LEN..HEADER_LEN].copy_from_slice(&self.mask.to_le_bytes());
        self.buffer
    }
}

/// Reads one table frame.
pub struct TableReader<'a> {
    buffer: &'a [u8],
    position: usize,
    mask: u32,
    next_slot: u8,
}

impl<'a> TableReader<'a> {
    /// Opens a frame, checking that it starts with `expected`.
    pub fn new(frame: &'a [u8], expected: BinaryIdentifier) -> WireResult<Self> {
        let found = frame.get(..BINARY_IDENTIFIER_LEN).unwrap_or(frame);
        if found != expected.as_bytes() {
            return Err(WireError::BadIdentifier { expected, found: found.to_vec() });
        }
        let mask_bytes = frame
            .get(BINARY_IDENTIFIER_LEN..HEADER_LEN)
            .ok_or(WireError::Truncated(frame.len()))?;
        let mut mask = [0u8; 4];
        mask.copy_from_slice(mask_bytes);
        Ok(Self {
            buffer: frame,
            position: HEADER_LEN,
            mask: u32::from_le_bytes(mask),
            next_slot: 0,
        })
    }

    /// Returns the number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Returns true if `slot` was written.
    #[inline]
    #[must_use]
    pub const fn has(&self, slot: u8) -> bool {
        slot < MAX_SLOTS && self.mask & (1 << slot) != 0
    }

    /// Advances the read cursor to `slot`, returning whether it is present.
    fn enter(&mut self, slot: u8) -> bool {
        debug_assert!(slot >= self.next_slot, "slot {slot} read out of order");
        self.next_slot = slot.saturating_add(1);
        self.has(slot)
    }

    fn take(&mut self, size: usize) -> WireResult<&'a [u8]> {
        let end = self.position + size;
        let bytes = self.buffer.get(self.position..end).ok_or(WireError::Truncated(self.position))?;
        self.position = end;
        Ok(bytes)
    }

    /// Reads a Pod value.
    pub fn read_pod<T: Pod>(&mut self, slot: u8) -> WireResult<Option<T>> {
        if !self.enter(slot) {
            return Ok(None);
        }
        let at = self.position;
        let bytes = self.take(std::mem::size_of::<T>())?;
        bytemuck::try_pod_read_unaligned(bytes)
            .map(Some)
            .map_err(|_| WireError::Truncated(at))
    }

    /// Reads a `u32`.
    pub fn read_u32(&mut self, slot: u8) -> WireResult<Option<u32>> {
        if !self.enter(slot) {
            return Ok(None);
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(Some(u32::from_le_bytes(raw)))
    }

    /// Reads an `f32`.
    pub fn read_f32(&mut self, slot: u8) -> WireResult<Option<f32>> {
        Ok(self.read_u32(slot)?.map(f32::from_bits))
    }

    /// Reads an `f64`.
    pub fn read_f64(&mut self, slot: u8) -> WireResult<Option<f64>> {
        if !self.enter(slot) {
            return Ok(None);
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(Some(f64::from_le_bytes(raw)))
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_str(&mut self, slot: u8) -> WireResult<Option<&'a str>> {
        if !self.enter(slot) {
            return Ok(None);
        }
        let mut len = [0u8; 2];
        len.copy_from_slice(self.take(2)?);
        let bytes = self.take(usize::from(u16::from_le_bytes(len)))?;
        std::str::from_utf8(bytes).map(Some).map_err(|_| WireError::InvalidUtf8(slot))
    }

    /// Reads a vector.
    pub fn read_vec3(&mut self, slot: u8) -> WireResult<Option<Vec3>> {
        self.read_pod(slot)
    }

    /// Reads a rotation.
    pub fn read_quaternion(&mut self, slot: u8) -> WireResult<Option<Quaternion>> {
        self.read_pod(slot)
    }
}

/// Turns an absent required field into an error.
pub(crate) fn required<T>(slot: u8, value: Option<T>) -> WireResult<T> {
    value.ok_or(WireError::MissingField(slot))
}
