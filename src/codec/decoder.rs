//! Streaming frame decoder.
//!
//! One decoder per connection. Bytes are appended with [`FrameDecoder::feed`],
//! which returns a lazy iterator over the frames that became complete. Any
//! trailing partial frame stays buffered for the next call.
//!
//! # Resynchronization
//!
//! A candidate that fails validation (impossible length, tailer mismatch,
//! checksum mismatch) is logged once, counted, and the read cursor moves
//! exactly one byte past the candidate's first byte. Scanning then resumes,
//! so a valid frame that starts anywhere after that byte is still found.
//!
//! Bytes skipped while hunting for the prefix are padding, not errors: they
//! are counted in [`DecoderStats::skipped_bytes`] and traced, never warned.

use crate::codec::frame::Frame;
use crate::codec::spec::{FrameLayout, LengthMeaning, PayloadRule};
use crate::decode::read_uint;
use crate::pipeline::id::ConnectionId;
use serde::Serialize;
use std::sync::Arc;

/// Consumed bytes are only dropped from the front of the buffer once this
/// many have accumulated (or the buffer is fully consumed).
const COMPACT_THRESHOLD: usize = 4096;

/// Why a candidate frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectKind {
    /// Length or tailer impossible to satisfy.
    Framing,
    /// Recomputed checksum differs from the transmitted one.
    Checksum,
}

impl std::fmt::Display for RejectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectKind::Framing => f.write_str("FRAMING_ERROR"),
            RejectKind::Checksum => f.write_str("CHECKSUM_ERROR"),
        }
    }
}

/// Counters kept by a decoder. Codec errors are only observable here and in logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecoderStats {
    pub bytes_fed: u64,
    pub frames: u64,
    pub framing_errors: u64,
    pub checksum_errors: u64,
    pub skipped_bytes: u64,
}

enum Candidate {
    Incomplete,
    Complete(Frame),
    Rejected(RejectKind, String),
}

/// Per-connection streaming decoder.
pub struct FrameDecoder {
    layout: Arc<FrameLayout>,
    connection: ConnectionId,
    buf: Vec<u8>,
    /// Read position inside `buf`.
    cursor: usize,
    /// Stream offset of `buf[0]`.
    base_offset: u64,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new(layout: Arc<FrameLayout>) -> Self {
        Self {
            layout,
            connection: ConnectionId::INVALID,
            buf: Vec::with_capacity(256),
            cursor: 0,
            base_offset: 0,
            stats: DecoderStats::default(),
        }
    }

    /// Tag log records with the owning connection.
    pub fn with_connection(mut self, connection: ConnectionId) -> Self {
        self.connection = connection;
        self
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.cursor
    }

    /// Stream offset of the next unconsumed byte.
    pub fn position(&self) -> u64 {
        self.base_offset + self.cursor as u64
    }

    /// Drop any partial data, keeping stream offsets monotonic.
    pub fn reset(&mut self) {
        self.base_offset += self.buf.len() as u64;
        self.buf.clear();
        self.cursor = 0;
    }

    /// Append `bytes` and iterate over the frames that are now complete.
    ///
    /// Never blocks. Frames not pulled from the iterator stay buffered and
    /// are returned by the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Frames<'_> {
        self.compact();
        self.stats.bytes_fed += bytes.len() as u64;
        self.buf.extend_from_slice(bytes);
        Frames { decoder: self }
    }

    /// Decode the next complete frame from the buffer, if any.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if !self.align_to_prefix() {
                return None;
            }
            match self.candidate() {
                Candidate::Incomplete => return None,
                Candidate::Complete(frame) => {
                    self.cursor += frame.len();
                    self.stats.frames += 1;
                    tracing::trace!(
                        connection = %self.connection,
                        offset = frame.span().start,
                        len = frame.len(),
                        "frame decoded"
                    );
                    return Some(frame);
                }
                Candidate::Rejected(kind, reason) => self.reject(kind, &reason),
            }
        }
    }

    /// Move the cursor to the next prefix match. Returns false when no
    /// candidate can start in the buffered bytes yet.
    fn align_to_prefix(&mut self) -> bool {
        let prefix = self.layout.prefix();
        if prefix.is_empty() {
            return true;
        }
        let avail = &self.buf[self.cursor..];
        match find(avail, prefix) {
            Some(0) => true,
            Some(pos) => {
                self.skip(pos);
                true
            }
            None => {
                let keep = partial_prefix_len(avail, prefix);
                let drop = avail.len() - keep;
                self.skip(drop);
                false
            }
        }
    }

    fn candidate(&self) -> Candidate {
        let layout = &*self.layout;
        let avail = &self.buf[self.cursor..];
        let head = layout.head_len();
        if avail.len() < head {
            return Candidate::Incomplete;
        }
        let cs = layout.checksum_width();
        let tail = layout.tailer_length();

        let (payload_len, declared) = match layout.payload_rule {
            PayloadRule::Fixed(size) => (size, size),
            PayloadRule::Encoded {
                width,
                endian,
                meaning,
            } => {
                let offset = layout.prefix().len() + layout.header_size();
                let Some(claimed) = read_uint(avail, offset, width, endian) else {
                    return Candidate::Incomplete;
                };
                let claimed = claimed as usize;
                let payload = match meaning {
                    LengthMeaning::PayloadOnly => claimed,
                    LengthMeaning::PayloadPlusChecksum => match claimed.checked_sub(cs) {
                        Some(payload) => payload,
                        None => {
                            return Candidate::Rejected(
                                RejectKind::Framing,
                                format!("claimed length {claimed} is shorter than the {cs}-byte checksum"),
                            )
                        }
                    },
                };
                if let Some(fixed) = layout.fixed_payload_size() {
                    if payload != fixed {
                        return Candidate::Rejected(
                            RejectKind::Framing,
                            format!("payload length {payload} does not match fixed size {fixed}"),
                        );
                    }
                }
                if payload > layout.max_payload_size() {
                    return Candidate::Rejected(
                        RejectKind::Framing,
                        format!(
                            "payload length {payload} exceeds maximum {}",
                            layout.max_payload_size()
                        ),
                    );
                }
                (payload, claimed)
            }
            PayloadRule::Delimited => {
                let marker = layout.tailer_marker().unwrap_or(&[]);
                if avail.len() < head + cs {
                    return Candidate::Incomplete;
                }
                match find(&avail[head + cs..], marker) {
                    Some(pos) if pos > layout.max_payload_size() => {
                        return Candidate::Rejected(
                            RejectKind::Framing,
                            format!("delimited payload of {pos} bytes exceeds maximum"),
                        )
                    }
                    Some(pos) => (pos, pos),
                    None if avail.len() - head - cs
                        > layout.max_payload_size() + marker.len() =>
                    {
                        return Candidate::Rejected(
                            RejectKind::Framing,
                            "no tailer marker within the maximum payload size".to_string(),
                        )
                    }
                    None => return Candidate::Incomplete,
                }
            }
        };

        let total = head + payload_len + cs + tail;
        if avail.len() < total {
            return Candidate::Incomplete;
        }
        let raw = &avail[..total];

        if let Some(marker) = layout.tailer_marker() {
            if &raw[total - tail..] != marker {
                return Candidate::Rejected(RejectKind::Framing, "tailer marker mismatch".to_string());
            }
        }

        if let (Some(expected), Some(received)) = (
            layout.compute_checksum(raw, payload_len),
            layout.transmitted_checksum(raw, payload_len),
        ) {
            if expected != received {
                return Candidate::Rejected(
                    RejectKind::Checksum,
                    format!("expected {expected:#06x}, received {received:#06x}"),
                );
            }
        }

        Candidate::Complete(Frame::new(
            raw.to_vec(),
            layout.prefix().len(),
            layout.header_size(),
            layout.length_width(),
            payload_len,
            cs,
            declared,
            self.position(),
        ))
    }

    fn reject(&mut self, kind: RejectKind, reason: &str) {
        let offset = self.position();
        match kind {
            RejectKind::Framing => self.stats.framing_errors += 1,
            RejectKind::Checksum => self.stats.checksum_errors += 1,
        }
        tracing::warn!(
            connection = %self.connection,
            offset,
            kind = %kind,
            "frame rejected: {}",
            reason
        );
        self.cursor += 1;
    }

    fn skip(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        tracing::trace!(
            connection = %self.connection,
            offset = self.position(),
            skipped = n,
            "skipping bytes before prefix"
        );
        self.cursor += n;
        self.stats.skipped_bytes += n as u64;
    }

    fn compact(&mut self) {
        if self.cursor == 0 {
            return;
        }
        if self.cursor == self.buf.len() {
            self.base_offset += self.cursor as u64;
            self.buf.clear();
            self.cursor = 0;
        } else if self.cursor >= COMPACT_THRESHOLD {
            self.buf.drain(..self.cursor);
            self.base_offset += self.cursor as u64;
            self.cursor = 0;
        }
    }
}

impl std::fmt::Debug for FrameDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("connection", &self.connection)
            .field("buffered", &self.buffered())
            .field("position", &self.position())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Frames completed by one [`FrameDecoder::feed`] call.
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.decoder.next_frame()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Length of the longest proper prefix of `prefix` that `avail` ends with.
fn partial_prefix_len(avail: &[u8], prefix: &[u8]) -> usize {
    let max = prefix.len().saturating_sub(1).min(avail.len());
    (1..=max)
        .rev()
        .find(|&k| avail.ends_with(&prefix[..k]))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::checksum::ChecksumAlgorithm;
    use crate::codec::spec::{ChecksumRegion, ChecksumSpec, FrameSpec, LengthField};
    use crate::decode::{read_u16, Endian};

    fn pms_layout() -> Arc<FrameLayout> {
        let spec = FrameSpec {
            prefix: vec![0x42, 0x4D],
            length_field: LengthField::Encoded {
                width: 2,
                endian: Endian::Big,
                meaning: LengthMeaning::PayloadPlusChecksum,
            },
            max_payload_size: 64,
            checksum: ChecksumSpec {
                algorithm: ChecksumAlgorithm::Sum16,
                endian: Endian::Big,
                scope: vec![
                    ChecksumRegion::Header,
                    ChecksumRegion::Length,
                    ChecksumRegion::Payload,
                ],
            },
            ..FrameSpec::default()
        };
        Arc::new(spec.compile().unwrap())
    }

    fn line_layout() -> Arc<FrameLayout> {
        let spec = FrameSpec {
            prefix: b"$".to_vec(),
            length_field: LengthField::Absent,
            max_payload_size: 16,
            tailer_length: 2,
            tailer_marker: Some(b"\r\n".to_vec()),
            ..FrameSpec::default()
        };
        Arc::new(spec.compile().unwrap())
    }

    #[test]
    fn test_pms_all_zero_frame() {
        let layout = pms_layout();
        let wire = layout.encode(&[], &[0u8; 26]).unwrap();
        let mut decoder = FrameDecoder::new(layout);

        let frames: Vec<_> = decoder.feed(&wire).collect();
        assert_eq!(frames.len(), 1);
        let payload = frames[0].payload();
        assert_eq!(payload.len(), 26);
        for field in 0..6 {
            assert_eq!(read_u16(payload, field * 2, Endian::Big), Some(0));
        }
        assert_eq!(frames[0].declared_length(), 28);
        assert_eq!(frames[0].span(), 0..32);
    }

    #[test]
    fn test_flipped_checksum_resynchronizes() {
        let layout = pms_layout();
        let mut bad = layout.encode(&[], &[0u8; 26]).unwrap();
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        let good = layout.encode(&[], &[1u8; 26]).unwrap();

        let mut decoder = FrameDecoder::new(layout);
        assert_eq!(decoder.feed(&bad).count(), 0);
        let frames: Vec<_> = decoder.feed(&good).collect();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &[1u8; 26]);
        assert_eq!(frames[0].span().start, 32);
        let stats = decoder.stats();
        assert_eq!(stats.checksum_errors, 1);
        assert_eq!(stats.framing_errors, 0);
    }

    #[test]
    fn test_byte_at_a_time_matches_single_feed() {
        let layout = pms_layout();
        let mut wire = vec![0x00, 0x42];
        wire.extend(layout.encode(&[], &[3u8; 26]).unwrap());
        wire.extend(layout.encode(&[], &[4u8; 26]).unwrap());

        let mut whole = FrameDecoder::new(layout.clone());
        let expected: Vec<_> = whole.feed(&wire).collect();

        let mut chunked = FrameDecoder::new(layout);
        let mut got = Vec::new();
        for byte in &wire {
            got.extend(chunked.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(expected.len(), 2);
        assert_eq!(got, expected);
    }

    #[test]
    fn test_partial_prefix_is_kept() {
        let layout = pms_layout();
        let wire = layout.encode(&[], &[9u8; 26]).unwrap();
        let mut decoder = FrameDecoder::new(layout);

        assert_eq!(decoder.feed(&[0xFF, 0xFF, 0x42]).count(), 0);
        assert_eq!(decoder.buffered(), 1);
        assert_eq!(decoder.feed(&wire[1..]).count(), 1);
        assert_eq!(decoder.stats().skipped_bytes, 2);
    }

    #[test]
    fn test_fixed_payload_mismatch_is_framing_error() {
        let mut spec = pms_layout().spec().clone();
        spec.fixed_payload_size = Some(26);
        let layout = Arc::new(spec.compile().unwrap());

        let mut loose = spec.clone();
        loose.fixed_payload_size = None;
        let short = loose.compile().unwrap().encode(&[], &[0u8; 4]).unwrap();
        let good = layout.encode(&[], &[0u8; 26]).unwrap();

        let mut decoder = FrameDecoder::new(layout);
        let mut wire = short;
        wire.extend_from_slice(&good);
        let frames: Vec<_> = decoder.feed(&wire).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(decoder.stats().framing_errors, 1);
    }

    #[test]
    fn test_delimited_lines() {
        let layout = line_layout();
        let mut decoder = FrameDecoder::new(layout);
        let frames: Vec<_> = decoder.feed(b"noise$T=21.5\r\n$\r\n$H=").collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload(), b"T=21.5");
        assert_eq!(frames[0].tailer(), b"\r\n");
        assert!(frames[1].payload().is_empty());
        assert_eq!(decoder.buffered(), 3);

        let frames: Vec<_> = decoder.feed(b"40\r\n").collect();
        assert_eq!(frames[0].payload(), b"H=40");
    }

    #[test]
    fn test_delimited_overlong_is_rejected() {
        let mut decoder = FrameDecoder::new(line_layout());
        let mut wire = b"$".to_vec();
        wire.extend_from_slice(&[b'x'; 40]);
        wire.extend_from_slice(b"$ok\r\n");
        let frames: Vec<_> = decoder.feed(&wire).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"ok");
        assert_eq!(decoder.stats().framing_errors, 1);
    }

    #[test]
    fn test_empty_prefix_fixed_frames_with_crc() {
        let spec = FrameSpec {
            header_size: 1,
            length_field: LengthField::Fixed { size: 2 },
            checksum: ChecksumSpec {
                algorithm: ChecksumAlgorithm::Crc16,
                endian: Endian::Little,
                scope: vec![ChecksumRegion::Header, ChecksumRegion::Payload],
            },
            ..FrameSpec::default()
        };
        let layout = Arc::new(spec.compile().unwrap());
        let mut wire = layout.encode(&[0x01], &[0x00, 0x0A]).unwrap();
        wire.extend(layout.encode(&[0x02], &[0x00, 0x0B]).unwrap());

        let mut decoder = FrameDecoder::new(layout);
        let frames: Vec<_> = decoder.feed(&wire).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].header(), &[0x02]);
        assert_eq!(frames[1].checksum().len(), 2);
    }

    #[test]
    fn test_zero_length_payload() {
        let layout = pms_layout();
        let mut spec = layout.spec().clone();
        spec.checksum.scope.push(ChecksumRegion::Prefix);
        let layout = Arc::new(spec.compile().unwrap());
        let wire = layout.encode(&[], &[]).unwrap();
        let mut decoder = FrameDecoder::new(layout);
        let frames: Vec<_> = decoder.feed(&wire).collect();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload().is_empty());
    }

    #[test]
    fn test_compaction_keeps_offsets() {
        let layout = pms_layout();
        let wire = layout.encode(&[], &[7u8; 26]).unwrap();
        let mut decoder = FrameDecoder::new(layout);
        let mut last_start = None;
        for _ in 0..400 {
            for frame in decoder.feed(&wire) {
                if let Some(prev) = last_start {
                    assert_eq!(frame.span().start, prev + 32);
                }
                last_start = Some(frame.span().start);
            }
        }
        assert_eq!(decoder.stats().frames, 400);
        assert_eq!(decoder.position(), 400 * 32);
    }
}
