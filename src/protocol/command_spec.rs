//! Command spec: the wire shape of one bus instruction.
//!
//! A [`CommandSpec`] renders a request frame from a field mapping and parses
//! a response frame back into one. Specs are consumed per call: the target
//! address is bound immediately before sending, and the bound spec moves into
//! the consumer that matches the reply, so rebinding can never race between
//! concurrently outstanding calls.
//!
//! Frame layout (both flavors):
//!
//! ```text
//! request:  "ST" ++ address(4) ++ instruction(2) ++ fields ++ "C" ++ crc(2)
//!              ++ zeros(padding) ++ suffix
//! response: "RC" ++ address(4) ++ instruction(2) ++ fields ++ "C" ++ crc(2)
//!              ++ "\r\n"
//! ```
//!
//! The checksum covers `address ++ instruction ++ fields`.

use super::{
    checksum, fingerprint, BusFlavor, ADDRESS_LENGTH, HEADER_LENGTH, INSTRUCTION_LENGTH,
    REQUEST_MARKER, RESPONSE_FOOTER_LENGTH, RESPONSE_MARKER,
};
use crate::error::Result;
use crate::fields::{encode_dotted, parse_fields, Field, FieldValues};

/// A 2-byte ASCII instruction opcode with its request zero-padding length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    code: [u8; 2],
    padding: usize,
}

impl Instruction {
    /// Instruction without request padding.
    ///
    /// # Panics
    ///
    /// Panics if `code` is not exactly 2 ASCII bytes. Instruction tables are
    /// static; a malformed opcode is a programming error.
    pub fn new(code: &str) -> Self {
        Self::with_padding(code, 0)
    }

    /// Instruction whose request frame carries `padding` zero bytes between
    /// the checksum and the suffix.
    pub fn with_padding(code: &str, padding: usize) -> Self {
        let bytes = code.as_bytes();
        assert!(
            bytes.len() == INSTRUCTION_LENGTH && code.is_ascii(),
            "instruction opcode must be exactly 2 ASCII bytes, got `{}`",
            code
        );
        Instruction {
            code: [bytes[0], bytes[1]],
            padding,
        }
    }

    /// The raw opcode bytes.
    pub fn code(&self) -> &[u8; 2] {
        &self.code
    }
}

/// Wire shape of one instruction: opcode, request fields, response fields.
///
/// Response fields must have statically known lengths so the frame router
/// knows exactly how many bytes to claim once a fingerprint matches.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    flavor: BusFlavor,
    instruction: Instruction,
    request_fields: Vec<Field>,
    response_fields: Vec<Field>,
    response_length: usize,
    address: Option<[u8; ADDRESS_LENGTH]>,
    expected_response_hash: Option<u64>,
}

impl CommandSpec {
    /// Build a spec from ordered field tables.
    ///
    /// # Panics
    ///
    /// Panics if any response field has a non-fixed length; response lengths
    /// must be statically known for this bus mode.
    pub fn new(
        flavor: BusFlavor,
        instruction: Instruction,
        request_fields: Vec<Field>,
        response_fields: Vec<Field>,
    ) -> Self {
        let fields_length: usize = response_fields
            .iter()
            .map(|field| {
                field.length().fixed().unwrap_or_else(|| {
                    panic!(
                        "response field `{}` must have a fixed length",
                        field.name()
                    )
                })
            })
            .sum();
        let response_length =
            HEADER_LENGTH + INSTRUCTION_LENGTH + fields_length + RESPONSE_FOOTER_LENGTH;
        CommandSpec {
            flavor,
            instruction,
            request_fields,
            response_fields,
            response_length,
            address: None,
            expected_response_hash: None,
        }
    }

    /// Bind the target address (dotted-decimal form) and derive the expected
    /// response fingerprint. Must be called before building a request.
    pub fn set_address(&mut self, address: &str) -> Result<()> {
        let raw = encode_dotted(address, ADDRESS_LENGTH)?;
        let mut bound = [0u8; ADDRESS_LENGTH];
        bound.copy_from_slice(&raw);
        let mut covered = Vec::with_capacity(ADDRESS_LENGTH + INSTRUCTION_LENGTH);
        covered.extend_from_slice(&bound);
        covered.extend_from_slice(&self.instruction.code[..]);
        self.expected_response_hash = Some(fingerprint(&covered));
        self.address = Some(bound);
        Ok(())
    }

    /// The total response frame length, markers and footer included.
    pub fn response_length(&self) -> usize {
        self.response_length
    }

    /// Number of leading bytes needed before a fingerprint can be extracted.
    pub fn fingerprint_window(&self) -> usize {
        HEADER_LENGTH + INSTRUCTION_LENGTH
    }

    /// The fingerprint a matching response frame must carry.
    pub fn expected_response_hash(&self) -> Option<u64> {
        self.expected_response_hash
    }

    /// Whether this spec declares no response fields ("send-only").
    pub fn is_send_only(&self) -> bool {
        self.response_fields.is_empty()
    }

    /// Render the full request frame for the given field mapping.
    ///
    /// Requires [`set_address`](Self::set_address) to have been called.
    pub fn create_request_payload(&self, fields: &FieldValues) -> Result<Vec<u8>> {
        let address = self.address.ok_or_else(|| {
            crate::error::CorebusError::Protocol(
                "cannot create request payload when address is not set".to_string(),
            )
        })?;

        let mut covered = Vec::new();
        covered.extend_from_slice(&address);
        covered.extend_from_slice(&self.instruction.code[..]);
        for field in &self.request_fields {
            covered.extend(field.encode(fields.get(field.name()))?);
        }

        let crc = checksum(&covered);
        let mut frame = Vec::with_capacity(
            REQUEST_MARKER.len() + covered.len() + 3 + self.instruction.padding + 4,
        );
        frame.extend_from_slice(REQUEST_MARKER);
        frame.extend_from_slice(&covered);
        frame.push(b'C');
        frame.extend_from_slice(&crc);
        frame.extend(std::iter::repeat(0u8).take(self.instruction.padding));
        frame.extend_from_slice(self.flavor.request_suffix());
        Ok(frame)
    }

    /// Extract the content fingerprint from a buffered response prefix.
    ///
    /// Returns `None` when fewer than [`fingerprint_window`](Self::fingerprint_window)
    /// bytes are available.
    pub fn extract_hash_from_payload(&self, payload: &[u8]) -> Option<u64> {
        if payload.len() < self.fingerprint_window() {
            return None;
        }
        let address = &payload[RESPONSE_MARKER.len()..RESPONSE_MARKER.len() + ADDRESS_LENGTH];
        let instruction = &payload[HEADER_LENGTH..HEADER_LENGTH + INSTRUCTION_LENGTH];
        let mut covered = Vec::with_capacity(ADDRESS_LENGTH + INSTRUCTION_LENGTH);
        covered.extend_from_slice(address);
        covered.extend_from_slice(instruction);
        Some(fingerprint(&covered))
    }

    /// Verify the checksum of a complete response frame and decode its
    /// fields.
    ///
    /// `payload` must be exactly [`response_length`](Self::response_length)
    /// bytes. A checksum mismatch is logged and returns `None`; the frame is
    /// treated as unmatched bytes, never as an error.
    pub fn consume_response_payload(&self, payload: &[u8]) -> Option<FieldValues> {
        debug_assert_eq!(payload.len(), self.response_length);
        let covered_end = payload.len() - RESPONSE_FOOTER_LENGTH;
        let covered = &payload[RESPONSE_MARKER.len()..covered_end];
        let received = [payload[covered_end + 1], payload[covered_end + 2]];
        let expected = checksum(covered);
        if received != expected {
            tracing::info!(
                received = ?received,
                expected = ?expected,
                "unexpected CRC, dropping frame"
            );
            return None;
        }
        let fields_start = HEADER_LENGTH + INSTRUCTION_LENGTH;
        Some(parse_fields(
            &self.response_fields,
            &payload[fields_start..covered_end],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Value;

    fn spec(flavor: BusFlavor) -> CommandSpec {
        CommandSpec::new(
            flavor,
            Instruction::new("AB"),
            vec![Field::byte("foo")],
            vec![Field::byte("bar")],
        )
    }

    /// Render a valid response frame for a spec bound to `address`.
    fn response_frame(address: [u8; 4], instruction: &[u8; 2], fields: &[u8]) -> Vec<u8> {
        let mut covered = Vec::new();
        covered.extend_from_slice(&address);
        covered.extend_from_slice(instruction);
        covered.extend_from_slice(fields);
        let crc = checksum(&covered);
        let mut frame = b"RC".to_vec();
        frame.extend_from_slice(&covered);
        frame.push(b'C');
        frame.extend_from_slice(&crc);
        frame.extend_from_slice(b"\r\n");
        frame
    }

    #[test]
    fn test_request_frame_layout() {
        let mut spec = spec(BusFlavor::Slave);
        spec.set_address("1.2.3.4").unwrap();
        let mut fields = FieldValues::new();
        fields.insert("foo", Value::Int(0));
        let payload = spec.create_request_payload(&fields).unwrap();

        // "ST" + address + "AB" + foo + "C" + crc + "\r\n"
        assert_eq!(&payload[..2], b"ST");
        assert_eq!(&payload[2..6], &[1, 2, 3, 4]);
        assert_eq!(&payload[6..8], b"AB");
        assert_eq!(payload[8], 0);
        assert_eq!(payload[9], b'C');
        let crc = checksum(&payload[2..9]);
        assert_eq!(&payload[10..12], &crc);
        assert_eq!(&payload[12..], b"\r\n");
    }

    #[test]
    fn test_request_suffix_per_flavor() {
        for (flavor, suffix) in [
            (BusFlavor::Rs485, b"\r\n\r\n".as_slice()),
            (BusFlavor::Slave, b"\r\n".as_slice()),
        ] {
            let mut spec = spec(flavor);
            spec.set_address("0.0.0.1").unwrap();
            let mut fields = FieldValues::new();
            fields.insert("foo", Value::Int(7));
            let payload = spec.create_request_payload(&fields).unwrap();
            assert!(payload.ends_with(suffix));
        }
    }

    #[test]
    fn test_request_padding_before_suffix() {
        let mut spec = CommandSpec::new(
            BusFlavor::Slave,
            Instruction::with_padding("FV", 9),
            vec![],
            vec![Field::byte("return_code")],
        );
        spec.set_address("0.0.0.1").unwrap();
        let payload = spec.create_request_payload(&FieldValues::new()).unwrap();
        // 9 zero bytes between the CRC and the suffix.
        let suffix_start = payload.len() - 2;
        assert_eq!(&payload[suffix_start..], b"\r\n");
        assert!(payload[suffix_start - 9..suffix_start].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_address_required_for_request() {
        let spec = spec(BusFlavor::Slave);
        assert!(spec.create_request_payload(&FieldValues::new()).is_err());
    }

    #[test]
    fn test_response_length_includes_framing() {
        // "RC"(2) + address(4) + instruction(2) + bar(1) + "C"(1) + crc(2) + "\r\n"(2)
        assert_eq!(spec(BusFlavor::Slave).response_length(), 14);
    }

    #[test]
    fn test_response_roundtrip() {
        let mut spec = spec(BusFlavor::Slave);
        spec.set_address("5.6.7.8").unwrap();
        let frame = response_frame([5, 6, 7, 8], b"AB", &[42]);
        assert_eq!(frame.len(), spec.response_length());

        let extracted = spec.extract_hash_from_payload(&frame).unwrap();
        assert_eq!(Some(extracted), spec.expected_response_hash());

        let values = spec.consume_response_payload(&frame).unwrap();
        assert_eq!(values.get("bar"), Some(&Value::Int(42)));
    }

    #[test]
    fn test_response_checksum_mismatch_drops_frame() {
        let mut spec = spec(BusFlavor::Slave);
        spec.set_address("5.6.7.8").unwrap();
        let mut frame = response_frame([5, 6, 7, 8], b"AB", &[42]);
        let crc_index = frame.len() - 3;
        frame[crc_index] ^= 0xFF;
        assert!(spec.consume_response_payload(&frame).is_none());
    }

    #[test]
    fn test_fingerprint_differs_per_address() {
        let mut first = spec(BusFlavor::Slave);
        first.set_address("0.0.0.1").unwrap();
        let mut second = spec(BusFlavor::Slave);
        second.set_address("0.0.0.2").unwrap();
        assert_ne!(
            first.expected_response_hash(),
            second.expected_response_hash()
        );
    }

    #[test]
    fn test_fingerprint_needs_full_window() {
        let mut spec = spec(BusFlavor::Slave);
        spec.set_address("5.6.7.8").unwrap();
        let frame = response_frame([5, 6, 7, 8], b"AB", &[42]);
        assert!(spec.extract_hash_from_payload(&frame[..7]).is_none());
    }

    #[test]
    #[should_panic(expected = "fixed length")]
    fn test_variable_response_field_rejected() {
        CommandSpec::new(
            BusFlavor::Slave,
            Instruction::new("AB"),
            vec![],
            vec![Field::remaining_bytes("rest", 0)],
        );
    }
}
