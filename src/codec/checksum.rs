//! Checksum algorithms understood by the frame codec.
//!
//! All algorithms are incremental so the decoder can feed the configured
//! scope region by region without copying the frame.

use serde::{Deserialize, Serialize};

/// Checksum algorithm of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumAlgorithm {
    /// No checksum field.
    #[default]
    None,
    /// Wrapping 8-bit byte sum.
    Sum8,
    /// 8-bit XOR of all bytes.
    Xor8,
    /// Wrapping 16-bit byte sum.
    Sum16,
    /// CRC-16/MODBUS (poly 0x8005 reflected, init 0xFFFF).
    Crc16,
    /// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF).
    Crc16Ccitt,
    /// CRC-32/ISO-HDLC, the zlib/Ethernet CRC.
    Crc32,
}

impl ChecksumAlgorithm {
    /// Width in bytes of the transmitted checksum.
    pub fn width(self) -> usize {
        match self {
            ChecksumAlgorithm::None => 0,
            ChecksumAlgorithm::Sum8 | ChecksumAlgorithm::Xor8 => 1,
            ChecksumAlgorithm::Sum16 | ChecksumAlgorithm::Crc16 | ChecksumAlgorithm::Crc16Ccitt => 2,
            ChecksumAlgorithm::Crc32 => 4,
        }
    }

    /// Start a new incremental computation.
    pub fn start(self) -> Checksum {
        let state = match self {
            ChecksumAlgorithm::Crc16 | ChecksumAlgorithm::Crc16Ccitt => 0xFFFF,
            ChecksumAlgorithm::Crc32 => 0xFFFF_FFFF,
            _ => 0,
        };
        Checksum {
            algorithm: self,
            state,
        }
    }

    /// One-shot checksum of `data`.
    pub fn compute(self, data: &[u8]) -> u32 {
        let mut sum = self.start();
        sum.update(data);
        sum.finish()
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChecksumAlgorithm::None => "none",
            ChecksumAlgorithm::Sum8 => "sum8",
            ChecksumAlgorithm::Xor8 => "xor8",
            ChecksumAlgorithm::Sum16 => "sum16",
            ChecksumAlgorithm::Crc16 => "crc16",
            ChecksumAlgorithm::Crc16Ccitt => "crc16_ccitt",
            ChecksumAlgorithm::Crc32 => "crc32",
        };
        f.write_str(name)
    }
}

/// Running checksum state.
#[derive(Debug, Clone, Copy)]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    state: u32,
}

impl Checksum {
    pub fn update(&mut self, data: &[u8]) {
        match self.algorithm {
            ChecksumAlgorithm::None => {}
            ChecksumAlgorithm::Sum8 => {
                let sum = data.iter().fold(self.state as u8, |acc, b| acc.wrapping_add(*b));
                self.state = sum as u32;
            }
            ChecksumAlgorithm::Xor8 => {
                let x = data.iter().fold(self.state as u8, |acc, b| acc ^ b);
                self.state = x as u32;
            }
            ChecksumAlgorithm::Sum16 => {
                let sum = data
                    .iter()
                    .fold(self.state as u16, |acc, b| acc.wrapping_add(*b as u16));
                self.state = sum as u32;
            }
            ChecksumAlgorithm::Crc16 => {
                let mut crc = self.state as u16;
                for &b in data {
                    crc ^= b as u16;
                    for _ in 0..8 {
                        crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
                    }
                }
                self.state = crc as u32;
            }
            ChecksumAlgorithm::Crc16Ccitt => {
                let mut crc = self.state as u16;
                for &b in data {
                    crc ^= (b as u16) << 8;
                    for _ in 0..8 {
                        crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
                    }
                }
                self.state = crc as u32;
            }
            ChecksumAlgorithm::Crc32 => {
                let mut crc = self.state;
                for &b in data {
                    crc ^= b as u32;
                    for _ in 0..8 {
                        crc = if crc & 1 != 0 { (crc >> 1) ^ 0xEDB8_8320 } else { crc >> 1 };
                    }
                }
                self.state = crc;
            }
        }
    }

    pub fn finish(self) -> u32 {
        match self.algorithm {
            ChecksumAlgorithm::Crc32 => !self.state,
            _ => self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn test_catalogue_check_values() {
        assert_eq!(ChecksumAlgorithm::Sum8.compute(CHECK), 0xDD);
        assert_eq!(ChecksumAlgorithm::Xor8.compute(CHECK), 0x31);
        assert_eq!(ChecksumAlgorithm::Sum16.compute(CHECK), 0x01DD);
        assert_eq!(ChecksumAlgorithm::Crc16.compute(CHECK), 0x4B37);
        assert_eq!(ChecksumAlgorithm::Crc16Ccitt.compute(CHECK), 0x29B1);
        assert_eq!(ChecksumAlgorithm::Crc32.compute(CHECK), 0xCBF4_3926);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        for algorithm in [
            ChecksumAlgorithm::Sum8,
            ChecksumAlgorithm::Sum16,
            ChecksumAlgorithm::Crc16,
            ChecksumAlgorithm::Crc16Ccitt,
            ChecksumAlgorithm::Crc32,
        ] {
            let mut sum = algorithm.start();
            sum.update(&CHECK[..4]);
            sum.update(&CHECK[4..]);
            assert_eq!(sum.finish(), algorithm.compute(CHECK), "{algorithm}");
        }
    }

    #[test]
    fn test_widths() {
        assert_eq!(ChecksumAlgorithm::None.width(), 0);
        assert_eq!(ChecksumAlgorithm::Xor8.width(), 1);
        assert_eq!(ChecksumAlgorithm::Crc16.width(), 2);
        assert_eq!(ChecksumAlgorithm::Crc32.width(), 4);
    }
}
