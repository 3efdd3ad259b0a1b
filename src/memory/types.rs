//! Memory value types: kinds, addresses and the write batch.

use std::collections::BTreeMap;

/// The two memory kinds of the controller's configuration store.
///
/// The variants carry the page geometry and cache policy difference: EEPROM
/// pages are cached and committed changes only take effect after activation;
/// FRAM is volatile working memory and is never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemoryKind {
    /// Persistent paged EEPROM, read-cached, activate-committed.
    Eeprom,
    /// Volatile paged FRAM, always read through hardware.
    Fram,
}

impl MemoryKind {
    /// Number of addressable pages.
    pub fn page_count(&self) -> u16 {
        match self {
            MemoryKind::Eeprom => 512,
            MemoryKind::Fram => 128,
        }
    }

    /// Size of one page in bytes.
    pub fn page_size(&self) -> usize {
        256
    }

    /// The character identifying this kind on the wire.
    pub fn wire_char(&self) -> char {
        match self {
            MemoryKind::Eeprom => 'E',
            MemoryKind::Fram => 'F',
        }
    }

    /// Whether full pages are kept in the shared read cache.
    pub fn is_cached(&self) -> bool {
        matches!(self, MemoryKind::Eeprom)
    }
}

/// A byte range inside one memory page; a plain value used as lookup and
/// merge key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryAddress {
    /// Memory kind the range lives in.
    pub kind: MemoryKind,
    /// Page number.
    pub page: u16,
    /// Byte offset within the page.
    pub offset: usize,
    /// Range length in bytes.
    pub length: usize,
}

impl MemoryAddress {
    pub fn new(kind: MemoryKind, page: u16, offset: usize, length: usize) -> Self {
        MemoryAddress {
            kind,
            page,
            offset,
            length,
        }
    }
}

/// Pending byte edits, staged by `write` and committed by `activate`.
///
/// The batch is the explicit writer handle: callers that must not see each
/// other's uncommitted edits simply hold separate batches. Ownership gives
/// the isolation the original design keyed on thread identity, without
/// ambient global state or locking.
#[derive(Debug, Default)]
pub struct WriteBatch {
    /// Sparse per-page overlay: `(kind, page) -> offset -> byte`.
    pending: BTreeMap<(MemoryKind, u16), BTreeMap<usize, u8>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch::default()
    }

    /// Merge a byte range into the overlay.
    pub(crate) fn stage(&mut self, address: &MemoryAddress, data: &[u8]) {
        let page = self
            .pending
            .entry((address.kind, address.page))
            .or_default();
        for (index, &byte) in data.iter().enumerate() {
            page.insert(address.offset + index, byte);
        }
    }

    /// Whether any edits are staged.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Touched pages in ascending `(kind, page)` order.
    pub(crate) fn pages(&self) -> impl Iterator<Item = (&(MemoryKind, u16), &BTreeMap<usize, u8>)> {
        self.pending.iter()
    }

    /// Drop all staged edits (called after a commit).
    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }
}
