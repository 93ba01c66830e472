//! Configurable frame codec.
//!
//! - [`spec`]: the declarative [`FrameSpec`] and its compiled [`FrameLayout`]
//! - [`checksum`]: checksum algorithms
//! - [`decoder`]: the per-connection streaming [`FrameDecoder`]
//! - [`frame`]: the validated [`Frame`] it yields

pub mod checksum;
pub mod decoder;
pub mod frame;
pub mod spec;

pub use checksum::{Checksum, ChecksumAlgorithm};
pub use decoder::{DecoderStats, FrameDecoder, Frames, RejectKind};
pub use frame::Frame;
pub use spec::{
    ChecksumRegion, ChecksumScope, ChecksumSpec, EncodeError, FrameLayout, FrameSpec,
    FrameSpecError, LengthField, LengthMeaning, DEFAULT_MAX_PAYLOAD_SIZE,
};
