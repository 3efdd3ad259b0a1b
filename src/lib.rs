//! # corebus
//!
//! Sub-bus tunneling and memory access for an OpenMotics-style gateway core
//! controller.
//!
//! The core controller fronts two secondary module buses (RS485 and the
//! internal slave bus). While a bus is in transparent mode, raw frames pass
//! through the controller in both directions; this crate frames those
//! requests, routes unsolicited inbound bytes back to the right caller, and
//! exposes the controller's paged EEPROM/FRAM as a cached, batched memory
//! file.
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`], [`fields`]): byte-exact request/response
//!   framing with content fingerprints instead of sequence numbers
//! - **Communicator** ([`communicator`]): transparent-mode lifecycle and a
//!   background router matching inbound frames to waiting callers
//! - **Memory** ([`memory`]): page-cached reads, write batches, and
//!   activation-driven commits over the primary channel
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use corebus::{api, BusCommunicator, BusFlavor, FieldValues};
//! use corebus::communicator::DEFAULT_TIMEOUT;
//!
//! # async fn demo(channel: Arc<impl corebus::MasterChannel>) -> corebus::Result<()> {
//! let communicator = BusCommunicator::new(channel, BusFlavor::Slave);
//! communicator.enter_transparent_mode().await?;
//! let spec = api::get_firmware_version(BusFlavor::Slave);
//! let response = communicator
//!     .do_command("0.0.0.1", spec, &FieldValues::new(), DEFAULT_TIMEOUT)
//!     .await?;
//! communicator.exit_transparent_mode().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod channel;
pub mod communicator;
pub mod error;
pub mod fields;
pub mod memory;
pub mod protocol;

pub use channel::{BusMode, MasterChannel, SystemEvent};
pub use communicator::BusCommunicator;
pub use error::{CorebusError, Result};
pub use fields::{Field, FieldValues, Value};
pub use memory::{MemoryAddress, MemoryFile, MemoryKind, WriteBatch};
pub use protocol::{BusFlavor, CommandSpec, Instruction};
