//! Primary channel collaborator.
//!
//! The primary channel is the already-framed link to the gateway's main
//! controller. It is both a relay for secondary-bus frames (transparent-mode
//! tunneling) and the direct path for memory page commands and basic actions.
//! Its own framing, retry and backoff policy live outside this crate; errors
//! propagate unchanged.
//!
//! Implementations deliver unsolicited inbound bytes (per secondary bus) and
//! system events through the subscription methods; each subscription is a
//! plain channel receiver drained by a background task.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::memory::MemoryKind;
use crate::protocol::BusFlavor;

/// Basic action type for the controller's persistent store.
pub const ACTION_TYPE_SYSTEM: u8 = 200;

/// Basic action committing (activating) pending EEPROM changes. The
/// controller emits [`SystemEvent::EepromActivate`] once done.
pub const ACTION_EEPROM_ACTIVATE: u8 = 1;

/// Operating mode of a secondary bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMode {
    /// Normal operation; the controller owns the bus.
    Live,
    /// Transparent tunnel: raw frames pass through to the bus.
    Transparent,
}

/// Unsolicited system events delivered by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    /// Pending EEPROM changes were activated; cached pages are stale.
    EepromActivate,
    /// The controller finished booting.
    StartupCompleted,
}

/// The already-framed request/response and event-delivery primitive of the
/// main controller link.
///
/// This crate treats the channel as reliable: a returned error is final (no
/// retry is added here) and a timeout on the channel is surfaced to sub-bus
/// callers as an immediate sub-bus timeout.
#[async_trait]
pub trait MasterChannel: Send + Sync + 'static {
    /// Tunnel a raw frame to a secondary bus (requires transparent mode).
    async fn send_transport_frame(
        &self,
        bus: BusFlavor,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<()>;

    /// Switch a secondary bus between live and transparent mode; returns the
    /// mode the controller acknowledged.
    async fn set_bus_mode(&self, bus: BusFlavor, mode: BusMode, timeout: Duration)
        -> Result<BusMode>;

    /// Read `length` bytes from a memory page at `start`.
    async fn memory_read(
        &self,
        kind: MemoryKind,
        page: u16,
        start: u8,
        length: u8,
        timeout: Duration,
    ) -> Result<Vec<u8>>;

    /// Write bytes to a memory page at `start`.
    async fn memory_write(
        &self,
        kind: MemoryKind,
        page: u16,
        start: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<()>;

    /// Execute a basic action on the controller.
    async fn basic_action(&self, action_type: u8, action: u8, timeout: Duration) -> Result<()>;

    /// Subscribe to raw inbound transport chunks for a secondary bus.
    fn subscribe_transport(&self, bus: BusFlavor) -> mpsc::UnboundedReceiver<Bytes>;

    /// Subscribe to unsolicited system events.
    fn subscribe_system_events(&self) -> mpsc::UnboundedReceiver<SystemEvent>;
}
