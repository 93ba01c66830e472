//! Declarative frame description and its validated, compiled form.
//!
//! A [`FrameSpec`] is plain data: it is read from the project file once and
//! never changes afterwards. [`FrameSpec::compile`] checks every length ×
//! checksum × scope combination up front and produces a [`FrameLayout`],
//! the only thing a decoder accepts. An illegal description is therefore a
//! configuration error and can never surface while bytes are flowing.
//!
//! Layout on the wire, in order:
//!
//! ```text
//! | prefix | header | length field | payload | checksum | tailer |
//! ```

use crate::codec::checksum::{Checksum, ChecksumAlgorithm};
use crate::decode::{read_uint, write_uint, Endian};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default upper bound on a single payload.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 4096;

/// Errors in a frame description, reported at configuration load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameSpecError {
    #[error("length field width must be 1, 2 or 4 bytes, got {0}")]
    InvalidLengthWidth(u8),

    #[error("checksum scope is empty")]
    EmptyChecksumScope,

    #[error("checksum scope must include the payload")]
    ScopeWithoutPayload,

    #[error("length meaning 'payload_plus_checksum' requires a checksum")]
    LengthCountsMissingChecksum,

    #[error("payload without length field needs a tailer marker to delimit it")]
    UndelimitedPayload,

    #[error("tailer marker is {marker} bytes but tailer_length is {tailer_length}")]
    TailerMarkerLength { marker: usize, tailer_length: usize },

    #[error("fixed payload size {fixed} conflicts with the length field")]
    FixedSizeConflict { fixed: usize },

    #[error("payload size {size} exceeds max_payload_size {max}")]
    PayloadExceedsMax { size: usize, max: usize },

    #[error("max_payload_size must be at least 1")]
    ZeroMaxPayload,

    #[error("frame layout has zero length")]
    EmptyFrame,

    #[error("fixed payload of {size} bytes needs a length of {claimed}, which does not fit in {width} byte(s)")]
    LengthFieldTooNarrow {
        size: usize,
        claimed: usize,
        width: u8,
    },
}

/// Errors building an outbound frame with [`FrameLayout::encode`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("header must be {expected} bytes, got {actual}")]
    HeaderSize { expected: usize, actual: usize },

    #[error("payload must be {expected} bytes, got {actual}")]
    PayloadSize { expected: usize, actual: usize },

    #[error("payload of {size} bytes exceeds the maximum of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("payload contains the tailer marker")]
    PayloadContainsMarker,
}

/// How the payload length is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LengthField {
    /// No length on the wire; the payload runs until the tailer marker.
    #[default]
    Absent,
    /// Every payload has exactly `size` bytes.
    Fixed { size: usize },
    /// The frame carries its own length.
    Encoded {
        width: u8,
        #[serde(default)]
        endian: Endian,
        #[serde(default)]
        meaning: LengthMeaning,
    },
}

impl LengthField {
    /// Bytes the field occupies on the wire.
    pub fn width(&self) -> usize {
        match self {
            LengthField::Encoded { width, .. } => *width as usize,
            _ => 0,
        }
    }
}

/// What an encoded length counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LengthMeaning {
    #[default]
    PayloadOnly,
    PayloadPlusChecksum,
}

/// A region of the frame a checksum can cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumRegion {
    Prefix,
    Header,
    Length,
    Payload,
}

/// Checksum configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChecksumSpec {
    #[serde(default)]
    pub algorithm: ChecksumAlgorithm,
    #[serde(default)]
    pub endian: Endian,
    #[serde(default)]
    pub scope: Vec<ChecksumRegion>,
}

/// Declarative frame description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameSpec {
    /// Synchronization bytes, hex encoded in config files (`"424D"`).
    #[serde(default, with = "hex_bytes")]
    pub prefix: Vec<u8>,

    /// Opaque bytes between prefix and length field.
    #[serde(default)]
    pub header_size: usize,

    /// Exact payload size the device must claim in its length field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_payload_size: Option<usize>,

    /// Claimed lengths above this are framing errors.
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,

    #[serde(default)]
    pub tailer_length: usize,

    /// Expected tailer bytes, hex encoded (`"0D0A"`).
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_bytes_opt")]
    pub tailer_marker: Option<Vec<u8>>,

    #[serde(default)]
    pub length_field: LengthField,

    #[serde(default)]
    pub checksum: ChecksumSpec,
}

fn default_max_payload_size() -> usize {
    DEFAULT_MAX_PAYLOAD_SIZE
}

impl Default for FrameSpec {
    fn default() -> Self {
        Self {
            prefix: Vec::new(),
            header_size: 0,
            length_field: LengthField::Fixed { size: 0 },
            fixed_payload_size: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            tailer_length: 0,
            tailer_marker: None,
            checksum: ChecksumSpec::default(),
        }
    }
}

/// Set of regions covered by the checksum, normalized to wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChecksumScope {
    pub prefix: bool,
    pub header: bool,
    pub length: bool,
    pub payload: bool,
}

impl ChecksumScope {
    fn from_regions(regions: &[ChecksumRegion]) -> Self {
        let mut scope = Self::default();
        for region in regions {
            match region {
                ChecksumRegion::Prefix => scope.prefix = true,
                ChecksumRegion::Header => scope.header = true,
                ChecksumRegion::Length => scope.length = true,
                ChecksumRegion::Payload => scope.payload = true,
            }
        }
        scope
    }
}

/// How a compiled layout determines the payload length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PayloadRule {
    Fixed(usize),
    Encoded {
        width: usize,
        endian: Endian,
        meaning: LengthMeaning,
    },
    Delimited,
}

/// Compiled checksum rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChecksumRule {
    pub algorithm: ChecksumAlgorithm,
    pub endian: Endian,
    pub scope: ChecksumScope,
}

/// A validated frame description, ready for decoding and encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    spec: FrameSpec,
    pub(crate) payload_rule: PayloadRule,
    pub(crate) checksum: Option<ChecksumRule>,
}

impl FrameSpec {
    /// Validate the description and compile it into a [`FrameLayout`].
    pub fn compile(&self) -> Result<FrameLayout, FrameSpecError> {
        if self.max_payload_size == 0 {
            return Err(FrameSpecError::ZeroMaxPayload);
        }

        let checksum = match self.checksum.algorithm {
            ChecksumAlgorithm::None => None,
            algorithm => {
                if self.checksum.scope.is_empty() {
                    return Err(FrameSpecError::EmptyChecksumScope);
                }
                let scope = ChecksumScope::from_regions(&self.checksum.scope);
                if !scope.payload {
                    return Err(FrameSpecError::ScopeWithoutPayload);
                }
                Some(ChecksumRule {
                    algorithm,
                    endian: self.checksum.endian,
                    scope,
                })
            }
        };

        if let Some(marker) = &self.tailer_marker {
            if marker.is_empty() || marker.len() != self.tailer_length {
                return Err(FrameSpecError::TailerMarkerLength {
                    marker: marker.len(),
                    tailer_length: self.tailer_length,
                });
            }
        }

        let payload_rule = match &self.length_field {
            LengthField::Absent => {
                if self.tailer_marker.is_none() {
                    return Err(FrameSpecError::UndelimitedPayload);
                }
                if let Some(fixed) = self.fixed_payload_size {
                    return Err(FrameSpecError::FixedSizeConflict { fixed });
                }
                PayloadRule::Delimited
            }
            LengthField::Fixed { size } => {
                if let Some(fixed) = self.fixed_payload_size {
                    if fixed != *size {
                        return Err(FrameSpecError::FixedSizeConflict { fixed });
                    }
                }
                if *size > self.max_payload_size {
                    return Err(FrameSpecError::PayloadExceedsMax {
                        size: *size,
                        max: self.max_payload_size,
                    });
                }
                let total = *size
                    + self.prefix.len()
                    + self.header_size
                    + self.tailer_length
                    + checksum.map(|c| c.algorithm.width()).unwrap_or(0);
                if total == 0 {
                    return Err(FrameSpecError::EmptyFrame);
                }
                PayloadRule::Fixed(*size)
            }
            LengthField::Encoded {
                width,
                endian,
                meaning,
            } => {
                if !matches!(width, 1 | 2 | 4) {
                    return Err(FrameSpecError::InvalidLengthWidth(*width));
                }
                if *meaning == LengthMeaning::PayloadPlusChecksum && checksum.is_none() {
                    return Err(FrameSpecError::LengthCountsMissingChecksum);
                }
                if let Some(fixed) = self.fixed_payload_size {
                    if fixed > self.max_payload_size {
                        return Err(FrameSpecError::PayloadExceedsMax {
                            size: fixed,
                            max: self.max_payload_size,
                        });
                    }
                    let claimed = match meaning {
                        LengthMeaning::PayloadOnly => fixed,
                        LengthMeaning::PayloadPlusChecksum => {
                            fixed + checksum.map(|c| c.algorithm.width()).unwrap_or(0)
                        }
                    };
                    if claimed > max_length_value(*width as usize) {
                        return Err(FrameSpecError::LengthFieldTooNarrow {
                            size: fixed,
                            claimed,
                            width: *width,
                        });
                    }
                }
                PayloadRule::Encoded {
                    width: *width as usize,
                    endian: *endian,
                    meaning: *meaning,
                }
            }
        };

        Ok(FrameLayout {
            spec: self.clone(),
            payload_rule,
            checksum,
        })
    }
}

impl FrameLayout {
    /// The description this layout was compiled from.
    pub fn spec(&self) -> &FrameSpec {
        &self.spec
    }

    pub fn prefix(&self) -> &[u8] {
        &self.spec.prefix
    }

    pub fn header_size(&self) -> usize {
        self.spec.header_size
    }

    pub fn length_width(&self) -> usize {
        self.spec.length_field.width()
    }

    pub fn checksum_width(&self) -> usize {
        self.checksum.map(|c| c.algorithm.width()).unwrap_or(0)
    }

    pub fn tailer_length(&self) -> usize {
        self.spec.tailer_length
    }

    pub fn tailer_marker(&self) -> Option<&[u8]> {
        self.spec.tailer_marker.as_deref()
    }

    pub fn max_payload_size(&self) -> usize {
        self.spec.max_payload_size
    }

    pub fn fixed_payload_size(&self) -> Option<usize> {
        self.spec.fixed_payload_size
    }

    /// Bytes before the payload: prefix + header + length field.
    pub fn head_len(&self) -> usize {
        self.spec.prefix.len() + self.spec.header_size + self.length_width()
    }

    /// Compute the checksum of a frame laid out as `[head | payload | ...]`.
    ///
    /// Returns `None` when the layout has no checksum.
    pub(crate) fn compute_checksum(&self, frame: &[u8], payload_len: usize) -> Option<u32> {
        let rule = self.checksum?;
        let p = self.spec.prefix.len();
        let h = self.spec.header_size;
        let w = self.length_width();
        let mut sum: Checksum = rule.algorithm.start();
        if rule.scope.prefix {
            sum.update(&frame[..p]);
        }
        if rule.scope.header {
            sum.update(&frame[p..p + h]);
        }
        if rule.scope.length {
            sum.update(&frame[p + h..p + h + w]);
        }
        if rule.scope.payload {
            sum.update(&frame[p + h + w..p + h + w + payload_len]);
        }
        Some(sum.finish())
    }

    /// Read the transmitted checksum that follows a payload of `payload_len`.
    pub(crate) fn transmitted_checksum(&self, frame: &[u8], payload_len: usize) -> Option<u32> {
        let rule = self.checksum?;
        read_uint(
            frame,
            self.head_len() + payload_len,
            rule.algorithm.width(),
            rule.endian,
        )
    }

    /// Largest payload whose claimed length fits the length field, if one is encoded.
    pub fn max_encodable_payload(&self) -> Option<usize> {
        match self.payload_rule {
            PayloadRule::Encoded { width, meaning, .. } => {
                let overhead = match meaning {
                    LengthMeaning::PayloadOnly => 0,
                    LengthMeaning::PayloadPlusChecksum => self.checksum_width(),
                };
                Some(max_length_value(width).saturating_sub(overhead))
            }
            _ => None,
        }
    }

    /// Build a complete frame around `header` and `payload`.
    pub fn encode(&self, header: &[u8], payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
        if header.len() != self.spec.header_size {
            return Err(EncodeError::HeaderSize {
                expected: self.spec.header_size,
                actual: header.len(),
            });
        }
        if payload.len() > self.spec.max_payload_size {
            return Err(EncodeError::PayloadTooLarge {
                size: payload.len(),
                max: self.spec.max_payload_size,
            });
        }
        let expected = match self.payload_rule {
            PayloadRule::Fixed(size) => Some(size),
            _ => self.spec.fixed_payload_size,
        };
        if let Some(max) = self.max_encodable_payload() {
            if payload.len() > max {
                return Err(EncodeError::PayloadTooLarge {
                    size: payload.len(),
                    max,
                });
            }
        }
        if let Some(expected) = expected {
            if payload.len() != expected {
                return Err(EncodeError::PayloadSize {
                    expected,
                    actual: payload.len(),
                });
            }
        }
        if let (PayloadRule::Delimited, Some(marker)) = (&self.payload_rule, self.tailer_marker()) {
            if payload.windows(marker.len()).any(|w| w == marker) {
                return Err(EncodeError::PayloadContainsMarker);
            }
        }

        let mut out = Vec::with_capacity(
            self.head_len() + payload.len() + self.checksum_width() + self.spec.tailer_length,
        );
        out.extend_from_slice(&self.spec.prefix);
        out.extend_from_slice(header);
        if let PayloadRule::Encoded {
            width,
            endian,
            meaning,
        } = self.payload_rule
        {
            let claimed = match meaning {
                LengthMeaning::PayloadOnly => payload.len(),
                LengthMeaning::PayloadPlusChecksum => payload.len() + self.checksum_width(),
            };
            write_uint(&mut out, claimed as u32, width, endian);
        }
        out.extend_from_slice(payload);
        if let (Some(rule), Some(value)) =
            (self.checksum, self.compute_checksum(&out, payload.len()))
        {
            write_uint(&mut out, value, rule.algorithm.width(), rule.endian);
        }
        match self.tailer_marker() {
            Some(marker) => out.extend_from_slice(marker),
            None => out.resize(out.len() + self.spec.tailer_length, 0),
        }
        Ok(out)
    }
}

fn max_length_value(width: usize) -> usize {
    match width {
        1 => u8::MAX as usize,
        2 => u16::MAX as usize,
        _ => u32::MAX as usize,
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        let compact: String = text.split_whitespace().collect();
        hex::decode(compact).map_err(serde::de::Error::custom)
    }
}

mod hex_bytes_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&hex::encode_upper(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        text.map(|t| {
            let compact: String = t.split_whitespace().collect();
            hex::decode(compact).map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}
