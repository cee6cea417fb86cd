// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Binary wire codec.
//!
//! Every integer is little-endian. Lengths and counts use the variable-length
//! encoding: values below `0xFD` take one byte, larger values are prefixed
//! with `0xFD` (u16), `0xFE` (u32) or `0xFF` (u64). All reads are bounds
//! checked and report a [`FormatError`] instead of panicking.

use crate::core::{FormatError, UInt160, UInt256};

/// Append-only byte sink for wire encoding.
#[derive(Clone, Debug, Default)]
pub struct BinaryWriter {
    buffer: Vec<u8>,
}

impl BinaryWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty writer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buffer.push(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write raw bytes with no length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn write_var_int(&mut self, value: u64) {
        if value < 0xFD {
            self.write_u8(value as u8);
        } else if value <= u64::from(u16::MAX) {
            self.write_u8(0xFD);
            self.write_u16(value as u16);
        } else if value <= u64::from(u32::MAX) {
            self.write_u8(0xFE);
            self.write_u32(value as u32);
        } else {
            self.write_u8(0xFF);
            self.write_u64(value);
        }
    }

    /// Write a length-prefixed byte string.
    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_var_int(bytes.len() as u64);
        self.write_bytes(bytes);
    }

    pub fn write_var_string(&mut self, value: &str) {
        self.write_var_bytes(value.as_bytes());
    }

    pub fn write_uint160(&mut self, value: &UInt160) {
        self.write_bytes(value.as_bytes());
    }

    pub fn write_uint256(&mut self, value: &UInt256) {
        self.write_bytes(value.as_bytes());
    }

    /// Write a count-prefixed array, encoding each element with `write`.
    pub fn write_array<T, F>(&mut self, items: &[T], mut write: F)
    where
        F: FnMut(&mut Self, &T),
    {
        self.write_var_int(items.len() as u64);
        for item in items {
            write(self, item);
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consume the writer and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Bounds-checked cursor over untrusted bytes.
#[derive(Clone, Debug)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Current offset from the start of the input.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self) -> Result<u8, FormatError> {
        self.data
            .get(self.position)
            .copied()
            .ok_or(FormatError::UnexpectedEof {
                needed: 1,
                remaining: 0,
            })
    }

    /// Consume exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(FormatError::UnexpectedEof {
                needed: len,
                remaining,
            });
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    /// Consume a fixed-size array.
    pub fn read_array_fixed<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.read_array_fixed::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, FormatError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(FormatError::InvalidBool(other)),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, FormatError> {
        Ok(u16::from_le_bytes(self.read_array_fixed()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, FormatError> {
        Ok(u32::from_le_bytes(self.read_array_fixed()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, FormatError> {
        Ok(u64::from_le_bytes(self.read_array_fixed()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, FormatError> {
        Ok(i64::from_le_bytes(self.read_array_fixed()?))
    }

    /// Read a variable-length integer no greater than `max`.
    pub fn read_var_int(&mut self, max: u64) -> Result<u64, FormatError> {
        let value = match self.read_u8()? {
            0xFD => u64::from(self.read_u16()?),
            0xFE => u64::from(self.read_u32()?),
            0xFF => self.read_u64()?,
            small => u64::from(small),
        };
        if value > max {
            return Err(FormatError::VarIntTooLarge { value, max });
        }
        Ok(value)
    }

    /// Read a length-prefixed byte string of at most `max` bytes.
    pub fn read_var_bytes(&mut self, max: usize) -> Result<Vec<u8>, FormatError> {
        let len = self.read_var_int(max as u64)? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }

    pub fn read_var_string(&mut self, max: usize) -> Result<String, FormatError> {
        let bytes = self.read_var_bytes(max)?;
        String::from_utf8(bytes).map_err(|_| FormatError::InvalidUtf8)
    }

    pub fn read_uint160(&mut self) -> Result<UInt160, FormatError> {
        Ok(UInt160::new(self.read_array_fixed()?))
    }

    pub fn read_uint256(&mut self) -> Result<UInt256, FormatError> {
        Ok(UInt256::new(self.read_array_fixed()?))
    }

    /// Read a count-prefixed array of at most `max` elements.
    pub fn read_array<T, F>(&mut self, max: usize, mut read: F) -> Result<Vec<T>, FormatError>
    where
        F: FnMut(&mut Self) -> Result<T, FormatError>,
    {
        let count = self.read_var_int(max as u64)? as usize;
        // Each element needs at least one byte, so a count larger than the
        // remaining input is a lie and is rejected before allocating.
        if count > self.remaining() {
            return Err(FormatError::UnexpectedEof {
                needed: count,
                remaining: self.remaining(),
            });
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(read(self)?);
        }
        Ok(items)
    }

    /// Fail if any input is left unconsumed.
    pub fn finish(&self) -> Result<(), FormatError> {
        match self.remaining() {
            0 => Ok(()),
            trailing => Err(FormatError::TrailingBytes(trailing)),
        }
    }
}

/// Encoded size of a variable-length integer.
pub fn var_int_size(value: u64) -> usize {
    if value < 0xFD {
        1
    } else if value <= u64::from(u16::MAX) {
        3
    } else if value <= u64::from(u32::MAX) {
        5
    } else {
        9
    }
}

/// Encoded size of a length-prefixed byte string.
pub fn var_bytes_size(len: usize) -> usize {
    var_int_size(len as u64) + len
}

/// The opaque wire capability every entity exposes.
pub trait Serializable: Sized {
    /// Append the wire form of `self` to `writer`.
    fn serialize(&self, writer: &mut BinaryWriter);

    /// Decode one value from `reader`.
    ///
    /// # Errors
    ///
    /// Returns a [`FormatError`] if the bytes are malformed.
    fn deserialize(reader: &mut BinaryReader<'_>) -> Result<Self, FormatError>;

    /// Wire bytes of `self`.
    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        self.serialize(&mut writer);
        writer.into_bytes()
    }

    /// Encoded size in bytes.
    fn size(&self) -> usize {
        self.to_bytes().len()
    }

    /// Decode a value that must span the whole input.
    ///
    /// # Errors
    ///
    /// Returns a [`FormatError`] if the bytes are malformed or have trailing data.
    fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        let mut reader = BinaryReader::new(bytes);
        let value = Self::deserialize(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_int_boundaries() {
        for value in [0u64, 0xFC, 0xFD, 0xFFFF, 0x1_0000, u64::from(u32::MAX), u64::MAX] {
            let mut writer = BinaryWriter::new();
            writer.write_var_int(value);
            let bytes = writer.into_bytes();
            assert_eq!(bytes.len(), var_int_size(value));
            let mut reader = BinaryReader::new(&bytes);
            assert_eq!(reader.read_var_int(u64::MAX).unwrap(), value);
            assert!(reader.finish().is_ok());
        }
    }

    #[test]
    fn test_var_int_respects_max() {
        let mut writer = BinaryWriter::new();
        writer.write_var_int(300);
        let bytes = writer.into_bytes();
        let err = BinaryReader::new(&bytes).read_var_int(255).unwrap_err();
        assert_eq!(err, FormatError::VarIntTooLarge { value: 300, max: 255 });
    }

    #[test]
    fn test_read_past_end() {
        let mut reader = BinaryReader::new(&[1, 2, 3]);
        assert_eq!(
            reader.read_u32().unwrap_err(),
            FormatError::UnexpectedEof {
                needed: 4,
                remaining: 3
            }
        );
    }

    #[test]
    fn test_invalid_bool() {
        let mut reader = BinaryReader::new(&[2]);
        assert_eq!(reader.read_bool().unwrap_err(), FormatError::InvalidBool(2));
    }

    #[test]
    fn test_array_count_larger_than_input_rejected() {
        let mut writer = BinaryWriter::new();
        writer.write_var_int(50);
        writer.write_u8(1);
        let bytes = writer.into_bytes();
        let result = BinaryReader::new(&bytes).read_array(100, |r| r.read_u8());
        assert!(matches!(result, Err(FormatError::UnexpectedEof { .. })));
    }

    #[test]
    fn test_peek_does_not_consume() {
        let reader = BinaryReader::new(&[0x21, 0x00]);
        assert_eq!(reader.peek_u8().unwrap(), 0x21);
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_finish_reports_trailing_bytes() {
        let mut reader = BinaryReader::new(&[1, 2, 3]);
        reader.read_u8().unwrap();
        assert_eq!(reader.finish().unwrap_err(), FormatError::TrailingBytes(2));
    }
}
