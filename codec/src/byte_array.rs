// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, ByteOrder};

use crate::error::DecodeError;
use crate::utils;

/// A read-only cursor over a byte slice, used by every packet decoder.
///
/// Mirrors a `std::io::Cursor<&[u8]>` but returns [`DecodeError`] directly so
/// decoders can use `?` without an intermediate `io::Error` conversion.
pub struct ByteArray<'a> {
    offset: usize,
    data: &'a [u8],
}

impl<'a> ByteArray<'a> {
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { offset: 0, data }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub const fn remaining_bytes(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        if self.offset >= self.data.len() {
            return Err(DecodeError::OutOfRange);
        }
        let b = self.data[self.offset];
        self.offset += 1;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(BigEndian::read_u16(self.read_bytes(2)?))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.offset.checked_add(len).ok_or(DecodeError::OutOfRange)?;
        if end > self.data.len() {
            return Err(DecodeError::OutOfRange);
        }
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    /// Read a length-prefixed MQTT UTF-8 string.
    ///
    /// Rejects embedded `U+0000` per MQTT 3.1.1 section 1.5.3. Overlong
    /// (non-shortest-form) encodings are rejected implicitly because
    /// `str::from_utf8` only accepts the canonical encoding.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        utils::bytes_to_mqtt_string(bytes)
    }

    /// Read a length-prefixed binary field (will message / password payloads).
    pub fn read_binary(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_u16()? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }
}
