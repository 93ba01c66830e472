//! One complete, checksum-validated frame.

use std::ops::Range;

/// A validated frame cut out of a byte stream.
///
/// The frame owns a copy of its raw bytes; every section accessor is a
/// slice into that copy. Nothing is mutable once constructed.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    raw: Vec<u8>,
    prefix_len: usize,
    header_len: usize,
    length_len: usize,
    payload_len: usize,
    checksum_len: usize,
    declared_length: usize,
    span: Range<u64>,
}

impl Frame {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        raw: Vec<u8>,
        prefix_len: usize,
        header_len: usize,
        length_len: usize,
        payload_len: usize,
        checksum_len: usize,
        declared_length: usize,
        start: u64,
    ) -> Self {
        let end = start + raw.len() as u64;
        Self {
            raw,
            prefix_len,
            header_len,
            length_len,
            payload_len,
            checksum_len,
            declared_length,
            span: start..end,
        }
    }

    /// The whole frame as it arrived.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn prefix(&self) -> &[u8] {
        &self.raw[..self.prefix_len]
    }

    pub fn header(&self) -> &[u8] {
        let start = self.prefix_len;
        &self.raw[start..start + self.header_len]
    }

    /// Raw bytes of the length field (empty when the layout has none).
    pub fn length_bytes(&self) -> &[u8] {
        let start = self.prefix_len + self.header_len;
        &self.raw[start..start + self.length_len]
    }

    pub fn payload(&self) -> &[u8] {
        let start = self.payload_start();
        &self.raw[start..start + self.payload_len]
    }

    pub fn checksum(&self) -> &[u8] {
        let start = self.payload_start() + self.payload_len;
        &self.raw[start..start + self.checksum_len]
    }

    pub fn tailer(&self) -> &[u8] {
        let start = self.payload_start() + self.payload_len + self.checksum_len;
        &self.raw[start..]
    }

    /// Length as claimed on the wire, before any checksum adjustment.
    pub fn declared_length(&self) -> usize {
        self.declared_length
    }

    /// Start/end offsets of this frame in the connection's byte stream.
    pub fn span(&self) -> Range<u64> {
        self.span.clone()
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    #[inline]
    fn payload_start(&self) -> usize {
        self.prefix_len + self.header_len + self.length_len
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("span", &self.span)
            .field("declared_length", &self.declared_length)
            .field("payload", &hex::encode_upper(self.payload()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections() {
        // prefix(2) header(1) length(1) payload(3) checksum(1) tailer(2)
        let raw = vec![0xAA, 0x55, 0x07, 0x03, 1, 2, 3, 0x99, 0x0D, 0x0A];
        let frame = Frame::new(raw, 2, 1, 1, 3, 1, 3, 100);
        assert_eq!(frame.prefix(), &[0xAA, 0x55]);
        assert_eq!(frame.header(), &[0x07]);
        assert_eq!(frame.length_bytes(), &[0x03]);
        assert_eq!(frame.payload(), &[1, 2, 3]);
        assert_eq!(frame.checksum(), &[0x99]);
        assert_eq!(frame.tailer(), &[0x0D, 0x0A]);
        assert_eq!(frame.span(), 100..110);
    }
}
