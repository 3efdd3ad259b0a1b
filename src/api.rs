//! Instruction catalog for slave module firmware operations.
//!
//! Each function builds a fresh [`CommandSpec`] for one instruction of the
//! slave bootloader/application protocol, parameterized by the bus flavor the
//! target module hangs off. Specs are per-call values; bind the target
//! address with [`CommandSpec::set_address`] before sending.

use crate::fields::Field;
use crate::protocol::{BusFlavor, CommandSpec, Instruction};

/// First response byte of every firmware instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    BootloaderActive,
    UnknownCommand,
    OutOfBounce,
    WrongFormat,
    WrongCrc,
    WrongProgramCrc,
    SendAddress,
    ApplicationActive,
}

impl ReturnCode {
    /// Decode the wire byte; unknown values yield `None`.
    pub fn from_byte(code: u8) -> Option<Self> {
        match code {
            0 => Some(ReturnCode::BootloaderActive),
            1 => Some(ReturnCode::UnknownCommand),
            2 => Some(ReturnCode::OutOfBounce),
            3 => Some(ReturnCode::WrongFormat),
            4 => Some(ReturnCode::WrongCrc),
            5 => Some(ReturnCode::WrongProgramCrc),
            6 => Some(ReturnCode::SendAddress),
            255 => Some(ReturnCode::ApplicationActive),
            _ => None,
        }
    }

    /// Whether this code reports a failed operation.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ReturnCode::UnknownCommand
                | ReturnCode::OutOfBounce
                | ReturnCode::WrongFormat
                | ReturnCode::WrongCrc
                | ReturnCode::WrongProgramCrc
                | ReturnCode::SendAddress
        )
    }
}

/// Read a module's firmware version and mode status.
pub fn get_firmware_version(flavor: BusFlavor) -> CommandSpec {
    CommandSpec::new(
        flavor,
        Instruction::with_padding("FV", 9),
        vec![],
        vec![
            Field::byte("return_code"),
            Field::byte("hardware_version"),
            Field::version("version"),
            Field::byte("status"),
        ],
    )
}

/// Instruct a module to jump to its bootloader, staying there for `timeout`
/// seconds.
pub fn goto_bootloader(flavor: BusFlavor) -> CommandSpec {
    CommandSpec::new(
        flavor,
        Instruction::with_padding("FR", 8),
        vec![Field::byte("timeout")],
        vec![Field::byte("return_code")],
    )
}

/// Instruct a module to jump back to its application firmware.
pub fn goto_application(flavor: BusFlavor) -> CommandSpec {
    CommandSpec::new(
        flavor,
        Instruction::with_padding("FG", 9),
        vec![],
        vec![Field::byte("return_code")],
    )
}

/// Announce the version of the firmware about to be flashed.
pub fn set_firmware_version(flavor: BusFlavor) -> CommandSpec {
    CommandSpec::new(
        flavor,
        Instruction::with_padding("FN", 6),
        vec![Field::version("version")],
        vec![Field::byte("return_code")],
    )
}

/// Announce the CRC of the firmware about to be flashed.
pub fn set_firmware_crc(flavor: BusFlavor) -> CommandSpec {
    CommandSpec::new(
        flavor,
        Instruction::with_padding("FC", 5),
        vec![Field::raw_bytes("crc", 4)],
        vec![Field::byte("return_code")],
    )
}

/// Write one 64-byte firmware block at the given block address.
pub fn write_firmware_block(flavor: BusFlavor) -> CommandSpec {
    CommandSpec::new(
        flavor,
        Instruction::new("FD"),
        vec![Field::word("address"), Field::raw_bytes("payload", 64)],
        vec![Field::byte("return_code")],
    )
}

/// Run the on-module integrity check of the flashed firmware.
pub fn integrity_check(flavor: BusFlavor) -> CommandSpec {
    CommandSpec::new(
        flavor,
        Instruction::with_padding("FE", 9),
        vec![],
        vec![Field::byte("return_code")],
    )
}
