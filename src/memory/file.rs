//! Memory file: cached, batched access to the controller's paged memory.
//!
//! Reads fetch full pages (EEPROM pages through a shared cache, FRAM always
//! through hardware) and slice the requested ranges. Writes stage into a
//! caller-owned [`WriteBatch`] and only reach hardware on
//! [`activate`](MemoryFile::activate), which diffs the overlay against the
//! last known committed content in fixed-size chunks and skips chunks whose
//! bytes did not change.
//!
//! The controller emits an EEPROM-activate system event once an activation
//! took effect; a background task invalidates the cache on that event so
//! changes made by other parties become visible.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::channel::{MasterChannel, SystemEvent, ACTION_EEPROM_ACTIVATE, ACTION_TYPE_SYSTEM};
use crate::error::{CorebusError, Result};
use crate::memory::{MemoryAddress, MemoryKind, WriteBatch};

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const ACTIVATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pages are read from hardware in chunks of this many bytes.
const READ_CHUNK_SIZE: usize = 32;

/// Commits are diffed and written in chunks of this many bytes.
const WRITE_CHUNK_SIZE: usize = 32;

type ChangeCallback = Box<dyn Fn() + Send + Sync>;

/// Byte-addressable view on the controller's EEPROM and FRAM.
pub struct MemoryFile<C: MasterChannel> {
    inner: Arc<Inner<C>>,
    _event_task: JoinHandle<()>,
}

struct Inner<C: MasterChannel> {
    channel: Arc<C>,
    /// Shared EEPROM page cache: `page -> full page bytes`.
    cache: Mutex<HashMap<u16, Vec<u8>>>,
    /// Serializes page fetches and commits; cache transitions inside a
    /// commit must be exclusive with concurrent reads.
    op_lock: Mutex<()>,
    eeprom_change: Mutex<Option<ChangeCallback>>,
}

impl<C: MasterChannel> MemoryFile<C> {
    /// Create a memory file over the given primary channel and start the
    /// event-driven cache invalidation task.
    pub fn new(channel: Arc<C>) -> Self {
        let inner = Arc::new(Inner {
            channel: Arc::clone(&channel),
            cache: Mutex::new(HashMap::new()),
            op_lock: Mutex::new(()),
            eeprom_change: Mutex::new(None),
        });
        let mut events = channel.subscribe_system_events();
        let event_inner = Arc::clone(&inner);
        let event_task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event == SystemEvent::EepromActivate {
                    event_inner.invalidate_cache(None, "EEPROM_ACTIVATE").await;
                }
            }
            tracing::debug!("system event subscription closed");
        });
        MemoryFile {
            inner,
            _event_task: event_task,
        }
    }

    /// Register a callback invoked whenever cached EEPROM content was
    /// invalidated (activation event or explicit invalidation).
    pub async fn subscribe_eeprom_change(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.inner.eeprom_change.lock().await = Some(Box::new(callback));
    }

    /// Read the given byte ranges.
    ///
    /// EEPROM ranges are served from the page cache unless the page is absent
    /// or `read_through` is requested, in which case hardware is consulted
    /// and the cache refreshed as a side effect. FRAM always reads hardware.
    pub async fn read(
        &self,
        addresses: &[MemoryAddress],
        read_through: bool,
    ) -> Result<HashMap<MemoryAddress, Vec<u8>>> {
        for address in addresses {
            validate_address(address)?;
        }
        let _guard = self.inner.op_lock.lock().await;
        let mut pages: HashMap<(MemoryKind, u16), Vec<u8>> = HashMap::new();
        for address in addresses {
            let key = (address.kind, address.page);
            if !pages.contains_key(&key) {
                let data = self
                    .inner
                    .load_page(address.kind, address.page, read_through)
                    .await?;
                pages.insert(key, data);
            }
        }
        let mut result = HashMap::new();
        for address in addresses {
            let page = &pages[&(address.kind, address.page)];
            let range = address.offset..address.offset + address.length;
            result.insert(*address, page[range].to_vec());
        }
        Ok(result)
    }

    /// Merge byte ranges into the batch overlay. Touches neither hardware
    /// nor the shared cache.
    pub fn write(
        &self,
        batch: &mut WriteBatch,
        data: &HashMap<MemoryAddress, Vec<u8>>,
    ) -> Result<()> {
        for (address, bytes) in data {
            validate_address(address)?;
            if bytes.len() != address.length {
                return Err(CorebusError::InvalidValue(format!(
                    "data length {} does not match address length {}",
                    bytes.len(),
                    address.length
                )));
            }
            batch.stage(address, bytes);
        }
        Ok(())
    }

    /// Commit the batch to hardware and clear it.
    ///
    /// Every touched page is diffed against the last known committed content
    /// (EEPROM: cached page or a fresh read; FRAM: always a fresh read) in
    /// fixed-size chunks. Unchanged chunks issue no hardware write; changed
    /// chunks write only the changed span, in ascending offset order. A
    /// logical write straddling a chunk boundary becomes two physical
    /// writes. If anything was written, the controller's activate basic
    /// action is issued afterwards.
    pub async fn activate(&self, batch: &mut WriteBatch) -> Result<()> {
        let _guard = self.inner.op_lock.lock().await;
        let mut data_written = false;
        for (&(kind, page), overlay) in batch.pages() {
            let committed = self.inner.committed_page(kind, page).await?;
            let mut updated = committed.clone();
            for (&offset, &byte) in overlay {
                updated[offset] = byte;
            }
            for chunk_start in (0..kind.page_size()).step_by(WRITE_CHUNK_SIZE) {
                let chunk_end = (chunk_start + WRITE_CHUNK_SIZE).min(kind.page_size());
                let span = match changed_span(
                    &committed[chunk_start..chunk_end],
                    &updated[chunk_start..chunk_end],
                ) {
                    Some(span) => span,
                    None => continue,
                };
                let start = chunk_start + span.0;
                let end = chunk_start + span.1 + 1;
                tracing::info!(
                    kind = %kind.wire_char(),
                    page,
                    start,
                    bytes = end - start,
                    "memory write"
                );
                self.inner
                    .channel
                    .memory_write(kind, page, start as u8, &updated[start..end], WRITE_TIMEOUT)
                    .await?;
                data_written = true;
            }
            if kind.is_cached() {
                self.inner.cache.lock().await.insert(page, updated);
            }
        }
        batch.clear();
        if data_written {
            tracing::info!("memory activate requested");
            self.inner
                .channel
                .basic_action(ACTION_TYPE_SYSTEM, ACTION_EEPROM_ACTIVATE, ACTIVATE_TIMEOUT)
                .await?;
        }
        Ok(())
    }

    /// Drop one cached EEPROM page, or all of them.
    pub async fn invalidate_cache(&self, page: Option<u16>) {
        self.inner.invalidate_cache(page, "explicit").await;
    }
}

impl<C: MasterChannel> Inner<C> {
    /// Fetch one full page, honoring the cache policy.
    async fn load_page(&self, kind: MemoryKind, page: u16, read_through: bool) -> Result<Vec<u8>> {
        if kind.is_cached() && !read_through {
            if let Some(data) = self.cache.lock().await.get(&page) {
                return Ok(data.clone());
            }
        }
        let data = self.read_page_hardware(kind, page).await?;
        if kind.is_cached() {
            self.cache.lock().await.insert(page, data.clone());
        }
        Ok(data)
    }

    /// The last known committed content of a page, used as diff baseline.
    async fn committed_page(&self, kind: MemoryKind, page: u16) -> Result<Vec<u8>> {
        if kind.is_cached() {
            if let Some(data) = self.cache.lock().await.get(&page) {
                return Ok(data.clone());
            }
        }
        self.read_page_hardware(kind, page).await
    }

    async fn read_page_hardware(&self, kind: MemoryKind, page: u16) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(kind.page_size());
        for chunk_start in (0..kind.page_size()).step_by(READ_CHUNK_SIZE) {
            let chunk = self
                .channel
                .memory_read(
                    kind,
                    page,
                    chunk_start as u8,
                    READ_CHUNK_SIZE as u8,
                    READ_TIMEOUT,
                )
                .await?;
            data.extend_from_slice(&chunk);
        }
        if data.len() != kind.page_size() {
            return Err(CorebusError::Protocol(format!(
                "page read returned {} bytes, expected {}",
                data.len(),
                kind.page_size()
            )));
        }
        Ok(data)
    }

    async fn invalidate_cache(&self, page: Option<u16>, reason: &str) {
        {
            let mut cache = self.cache.lock().await;
            match page {
                Some(page) => {
                    cache.remove(&page);
                }
                None => cache.clear(),
            }
        }
        tracing::info!(reason, ?page, "memory cache cleared");
        if let Some(callback) = self.eeprom_change.lock().await.as_ref() {
            callback();
        }
    }
}

/// Bounds of the changed bytes within one chunk: `(first, last)` indices, or
/// `None` when the chunk is unchanged.
fn changed_span(committed: &[u8], updated: &[u8]) -> Option<(usize, usize)> {
    debug_assert_eq!(committed.len(), updated.len());
    let first = committed
        .iter()
        .zip(updated)
        .position(|(old, new)| old != new)?;
    let last = committed.len()
        - 1
        - committed
            .iter()
            .rev()
            .zip(updated.iter().rev())
            .position(|(old, new)| old != new)
            .unwrap_or(0);
    Some((first, last))
}

fn validate_address(address: &MemoryAddress) -> Result<()> {
    if address.page >= address.kind.page_count()
        || address.offset + address.length > address.kind.page_size()
    {
        return Err(CorebusError::Protocol(format!(
            "memory address out of bounds: {:?}",
            address
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changed_span_none_when_equal() {
        assert_eq!(changed_span(&[1, 2, 3], &[1, 2, 3]), None);
    }

    #[test]
    fn test_changed_span_single_byte() {
        assert_eq!(changed_span(&[1, 2, 3], &[1, 9, 3]), Some((1, 1)));
    }

    #[test]
    fn test_changed_span_trims_unchanged_edges() {
        assert_eq!(changed_span(&[0, 1, 2, 3, 0], &[0, 9, 2, 9, 0]), Some((1, 3)));
    }

    #[test]
    fn test_changed_span_full_chunk() {
        assert_eq!(changed_span(&[0, 0], &[1, 1]), Some((0, 1)));
    }

    #[test]
    fn test_validate_address_bounds() {
        assert!(validate_address(&MemoryAddress::new(MemoryKind::Eeprom, 511, 0, 256)).is_ok());
        assert!(validate_address(&MemoryAddress::new(MemoryKind::Eeprom, 512, 0, 1)).is_err());
        assert!(validate_address(&MemoryAddress::new(MemoryKind::Eeprom, 0, 255, 2)).is_err());
        assert!(validate_address(&MemoryAddress::new(MemoryKind::Fram, 128, 0, 1)).is_err());
    }
}
