//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

use framehook::codec::{
    ChecksumAlgorithm, ChecksumRegion, ChecksumSpec, FrameLayout, FrameSpec, LengthField,
    LengthMeaning,
};
use framehook::decode::Endian;
use framehook::hooks::{Hook, HookContext, HookError, ReceiveSignal};
use framehook::sink::{SinkClient, SinkError, SinkRequest, SinkResponse};
use framehook::Message;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Timeout for waiting on pipeline output
pub fn test_timeout() -> Duration {
    Duration::from_millis(500)
}

/// PMS5003 layout: `42 4D`, u16 BE length counting payload + checksum,
/// sum16 BE over header, length and payload.
pub fn pms_spec() -> FrameSpec {
    FrameSpec {
        prefix: vec![0x42, 0x4D],
        max_payload_size: 64,
        length_field: LengthField::Encoded {
            width: 2,
            endian: Endian::Big,
            meaning: LengthMeaning::PayloadPlusChecksum,
        },
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
    }
}

pub fn pms_layout() -> Arc<FrameLayout> {
    Arc::new(pms_spec().compile().unwrap())
}

/// A 26-byte PMS payload with the six leading u16 readings set.
pub fn pms_payload(readings: [u16; 6]) -> Vec<u8> {
    let mut payload = vec![0u8; 26];
    for (i, value) in readings.iter().enumerate() {
        payload[i * 2..i * 2 + 2].copy_from_slice(&value.to_be_bytes());
    }
    payload
}

/// A complete PMS frame on the wire.
pub fn pms_frame(readings: [u16; 6]) -> Vec<u8> {
    pms_layout().encode(&[], &pms_payload(readings)).unwrap()
}

/// What a [`RecordingHook`] saw, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum HookCall {
    Start,
    Receive(Vec<u8>),
    Timer(u64),
    Stop,
}

/// Hook that records every call into a shared log.
#[derive(Clone, Default)]
pub struct RecordingHook {
    pub calls: Arc<Mutex<Vec<HookCall>>>,
    /// Payloads whose first byte is in this list are discarded.
    pub discard_first_bytes: Vec<u8>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: HookCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Hook for RecordingHook {
    fn on_start(&mut self, _ctx: &mut HookContext) -> Result<(), HookError> {
        self.record(HookCall::Start);
        Ok(())
    }

    fn on_receive(
        &mut self,
        message: &mut Message,
        _ctx: &mut HookContext,
    ) -> Result<ReceiveSignal, HookError> {
        self.record(HookCall::Receive(message.payload().to_vec()));
        let discard = message
            .payload()
            .first()
            .is_some_and(|b| self.discard_first_bytes.contains(b));
        Ok(ReceiveSignal::from(!discard))
    }

    fn on_timer(&mut self, elapsed_ms: u64, _ctx: &mut HookContext) -> Result<(), HookError> {
        self.record(HookCall::Timer(elapsed_ms));
        Ok(())
    }

    fn on_stop(&mut self, _ctx: &mut HookContext) -> Result<(), HookError> {
        self.record(HookCall::Stop);
        Ok(())
    }
}

mockall::mock! {
    pub Client {}

    impl SinkClient for Client {
        fn call(&mut self, request: &SinkRequest) -> Result<SinkResponse, SinkError>;
        fn close(&mut self);
    }
}
