//! Resolved payload view with fixed-width field accessors.

use std::ops::Range;
use std::sync::Arc;

use crate::{Result, TransportError};

/// Immutable bytes of a resolved frame.
///
/// Cloning is cheap (shared `Arc<[u8]>`). Every accessor is bounds checked and
/// returns [`TransportError::OutOfRange`] instead of panicking, so decoders can
/// propagate malformed frames with `?`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Payload(Arc<[u8]>);

impl Payload {
    /// Number of bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Copy of the bytes in `range`.
    pub fn slice(&self, range: Range<usize>) -> Result<Vec<u8>> {
        let width = range.end.saturating_sub(range.start);
        self.0.get(range.clone()).map(<[u8]>::to_vec).ok_or(TransportError::OutOfRange {
            offset: range.start,
            width,
            len: self.len(),
        })
    }

    fn window<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        offset
            .checked_add(N)
            .and_then(|end| self.0.get(offset..end))
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(TransportError::OutOfRange { offset, width: N, len: self.len() })
    }

    pub fn u8_at(&self, offset: usize) -> Result<u8> {
        Ok(self.window::<1>(offset)?[0])
    }

    pub fn u16_le(&self, offset: usize) -> Result<u16> {
        Ok(u16::from_le_bytes(self.window(offset)?))
    }

    pub fn u16_be(&self, offset: usize) -> Result<u16> {
        Ok(u16::from_be_bytes(self.window(offset)?))
    }

    /// Three bytes little-endian; J1939 carries PGNs this way.
    pub fn u24_le(&self, offset: usize) -> Result<u32> {
        let [a, b, c] = self.window::<3>(offset)?;
        Ok(u32::from_le_bytes([a, b, c, 0]))
    }

    pub fn u24_be(&self, offset: usize) -> Result<u32> {
        let [a, b, c] = self.window::<3>(offset)?;
        Ok(u32::from_be_bytes([0, a, b, c]))
    }

    pub fn u32_le(&self, offset: usize) -> Result<u32> {
        Ok(u32::from_le_bytes(self.window(offset)?))
    }

    pub fn u32_be(&self, offset: usize) -> Result<u32> {
        Ok(u32::from_be_bytes(self.window(offset)?))
    }

    pub fn u64_le(&self, offset: usize) -> Result<u64> {
        Ok(u64::from_le_bytes(self.window(offset)?))
    }

    pub fn u64_be(&self, offset: usize) -> Result<u64> {
        Ok(u64::from_be_bytes(self.window(offset)?))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.into())
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
