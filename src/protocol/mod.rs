//! Secondary-bus protocol: frame markers, checksum, fingerprint and the
//! parameterized command spec.
//!
//! The two tunneled buses (RS485 module bus, Slave expansion bus) share one
//! frame layout and differ only in the request suffix; [`BusFlavor`] carries
//! that difference so checksum, fingerprint and parsing logic exist once.

mod command_spec;

pub use command_spec::{CommandSpec, Instruction};

/// Marker prefix of every request frame.
pub const REQUEST_MARKER: &[u8] = b"ST";

/// Marker prefix of every response frame; the frame router resynchronizes
/// the rolling buffer on this.
pub const RESPONSE_MARKER: &[u8] = b"RC";

/// Suffix terminating every response frame.
pub const RESPONSE_SUFFIX: &[u8] = b"\r\n";

/// Raw width of a bus address.
pub const ADDRESS_LENGTH: usize = 4;

/// Width of an instruction opcode (2 printable ASCII characters).
pub const INSTRUCTION_LENGTH: usize = 2;

/// Marker plus address.
pub const HEADER_LENGTH: usize = RESPONSE_MARKER.len() + ADDRESS_LENGTH;

/// Literal `C`, 2 checksum bytes and the response suffix.
pub const RESPONSE_FOOTER_LENGTH: usize = 3 + RESPONSE_SUFFIX.len();

/// The secondary bus a command spec targets.
///
/// The only structural difference between the flavors is the request suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusFlavor {
    /// RS485 module bus.
    Rs485,
    /// Slave expansion bus.
    Slave,
}

impl BusFlavor {
    /// Suffix appended to request frames after the zero padding.
    pub fn request_suffix(&self) -> &'static [u8] {
        match self {
            BusFlavor::Rs485 => b"\r\n\r\n",
            BusFlavor::Slave => b"\r\n",
        }
    }
}

/// Frame checksum ("CRC" in domain terminology): sum of all covered bytes
/// modulo 65536, encoded big endian.
pub fn checksum(data: &[u8]) -> [u8; 2] {
    let sum: u32 = data.iter().map(|&byte| u32::from(byte)).sum();
    let crc = (sum % 65536) as u16;
    crc.to_be_bytes()
}

/// Content-derived matching fingerprint: `Σ bytes[i] * 256 * (i + 1)`.
///
/// Not cryptographic; it only lets the frame router recognize, from a short
/// header prefix, which outstanding consumer a frame belongs to without a
/// sequence counter.
pub fn fingerprint(data: &[u8]) -> u64 {
    data.iter()
        .enumerate()
        .map(|(index, &byte)| u64::from(byte) * 256 * (index as u64 + 1))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_value() {
        // 1 + 2 + 3 = 6
        assert_eq!(checksum(&[1, 2, 3]), [0, 6]);
        // 255 * 256 = 65280 -> high byte 0xFF, low byte 0x00
        assert_eq!(checksum(&[255; 256]), [0xFF, 0x00]);
    }

    #[test]
    fn test_checksum_wraps_modulo_65536() {
        let data = vec![255u8; 257];
        // 255 * 257 = 65535 + 255 + 255 -> 65535 + 510 -> wraps to 509
        let sum: u32 = data.iter().map(|&b| u32::from(b)).sum();
        assert_eq!(checksum(&data), ((sum % 65536) as u16).to_be_bytes());
    }

    #[test]
    fn test_checksum_single_byte_sensitivity() {
        let original = b"RC0123AB\x07";
        let reference = checksum(original);
        for index in 0..original.len() {
            let mut flipped = original.to_vec();
            flipped[index] ^= 0x01;
            assert_ne!(checksum(&flipped), reference, "byte {} did not affect checksum", index);
        }
    }

    #[test]
    fn test_fingerprint_position_weighted() {
        // Same bytes, different order, different fingerprint.
        assert_ne!(fingerprint(&[1, 2]), fingerprint(&[2, 1]));
        assert_eq!(fingerprint(&[1, 2]), 1 * 256 + 2 * 256 * 2);
    }

    #[test]
    fn test_fingerprint_stable_and_divergent() {
        let samples: Vec<Vec<u8>> = vec![
            b"\x00\x00\x00\x01AB".to_vec(),
            b"\x00\x00\x00\x02AB".to_vec(),
            b"\x00\x00\x00\x01BA".to_vec(),
            b"\x01\x02\x03\x04FV".to_vec(),
        ];
        for sample in &samples {
            assert_eq!(fingerprint(sample), fingerprint(sample));
        }
        for (i, a) in samples.iter().enumerate() {
            for b in samples.iter().skip(i + 1) {
                assert_ne!(fingerprint(a), fingerprint(b));
            }
        }
    }

    #[test]
    fn test_flavor_suffixes() {
        assert_eq!(BusFlavor::Rs485.request_suffix(), b"\r\n\r\n");
        assert_eq!(BusFlavor::Slave.request_suffix(), b"\r\n");
    }
}
