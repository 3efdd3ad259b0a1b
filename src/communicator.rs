//! Bus communicator: transparent-mode tunneling over the primary channel.
//!
//! One [`BusCommunicator`] owns one secondary bus. Outstanding addressed
//! calls are represented by [`Consumer`]s — per-call state holding the bound
//! command spec and a oneshot rendezvous — matched against the incoming byte
//! stream by content fingerprint instead of sequence numbers.
//!
//! # Architecture
//!
//! ```text
//! do_command ──► register Consumer ──► channel.send_transport_frame
//!      │                                        │
//!      └──◄── oneshot ◄── frame router ◄── transport subscription
//! ```
//!
//! The frame router is a background task draining the channel's transport
//! subscription into a rolling buffer. It resynchronizes on the `"RC"`
//! response marker, offers the buffer to every pending consumer in
//! registration order, and loops until no further frame can be claimed so
//! back-to-back frames delivered in one chunk all resolve.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::channel::{BusMode, MasterChannel};
use crate::error::{CorebusError, Result};
use crate::fields::FieldValues;
use crate::protocol::{BusFlavor, CommandSpec, RESPONSE_MARKER};

/// Default timeout for bus-mode switches and addressed calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of offering the rolling buffer to one consumer.
enum Suggestion {
    /// The buffered frame belongs to someone else (or is garbage).
    NoMatch,
    /// This consumer's frame may still be in flight; hold the buffer.
    NeedMore,
    /// Claimed and resolved; exactly this many bytes were consumed.
    Claim(usize),
}

/// Per-call state: one consumer claims exactly one matching response frame.
struct Consumer {
    id: u64,
    spec: CommandSpec,
    tx: Option<oneshot::Sender<FieldValues>>,
}

impl Consumer {
    /// Offer the rolling buffer (already aligned on the response marker).
    fn suggest_payload(&mut self, buffer: &[u8]) -> Suggestion {
        let calculated = match self.spec.extract_hash_from_payload(buffer) {
            Some(hash) => hash,
            None => return Suggestion::NeedMore,
        };
        if Some(calculated) != self.spec.expected_response_hash() {
            return Suggestion::NoMatch;
        }
        let length = self.spec.response_length();
        if buffer.len() < length {
            return Suggestion::NeedMore;
        }
        match self.spec.consume_response_payload(&buffer[..length]) {
            Some(values) => {
                if let Some(tx) = self.tx.take() {
                    // A dropped receiver means the caller already timed out.
                    let _ = tx.send(values);
                }
                Suggestion::Claim(length)
            }
            // Checksum mismatch: dropped frame, the caller times out.
            None => Suggestion::NoMatch,
        }
    }
}

/// Rolling receive buffer and pending consumers, behind one mutex.
struct RouterState {
    buffer: BytesMut,
    consumers: Vec<Consumer>,
}

impl RouterState {
    fn new() -> Self {
        RouterState {
            buffer: BytesMut::with_capacity(1024),
            consumers: Vec::new(),
        }
    }

    /// Ingest one raw transport chunk and resolve whatever frames it
    /// completes.
    fn process_transport_chunk(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        loop {
            let index = match find_marker(&self.buffer) {
                Some(index) => index,
                None => return,
            };
            if index > 0 {
                // Resynchronize: drop noise and partial-frame remainders.
                self.buffer.advance(index);
            }

            let mut claimed = None;
            let mut need_more = false;
            for (position, consumer) in self.consumers.iter_mut().enumerate() {
                match consumer.suggest_payload(&self.buffer) {
                    Suggestion::Claim(consumed) => {
                        claimed = Some((position, consumed));
                        break;
                    }
                    Suggestion::NeedMore => need_more = true,
                    Suggestion::NoMatch => {}
                }
            }

            match claimed {
                Some((position, consumed)) => {
                    self.consumers.remove(position);
                    let drop = consumed.max(RESPONSE_MARKER.len()).min(self.buffer.len());
                    self.buffer.advance(drop);
                    // Another complete frame may already be buffered.
                }
                None if need_more => return,
                None => {
                    // Nothing matches: drop at least the marker to guarantee
                    // forward progress, then resync on the next marker.
                    let drop = RESPONSE_MARKER.len().min(self.buffer.len());
                    self.buffer.advance(drop);
                }
            }
        }
    }
}

/// Locate the response marker in the buffer.
fn find_marker(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(RESPONSE_MARKER.len())
        .position(|window| window == RESPONSE_MARKER)
}

/// Tunnels addressed command specs to one secondary bus and routes the
/// response stream back to blocked callers.
pub struct BusCommunicator<C: MasterChannel> {
    channel: Arc<C>,
    flavor: BusFlavor,
    state: Arc<Mutex<RouterState>>,
    transparent_mode: AtomicBool,
    next_consumer_id: AtomicU64,
    _router: JoinHandle<()>,
}

impl<C: MasterChannel> BusCommunicator<C> {
    /// Create a communicator for one bus flavor and start its frame router.
    pub fn new(channel: Arc<C>, flavor: BusFlavor) -> Self {
        let state = Arc::new(Mutex::new(RouterState::new()));
        let mut subscription = channel.subscribe_transport(flavor);
        let router_state = Arc::clone(&state);
        let router = tokio::spawn(async move {
            while let Some(chunk) = subscription.recv().await {
                tracing::debug!(bytes = chunk.len(), "transport chunk received");
                router_state.lock().await.process_transport_chunk(&chunk);
            }
            tracing::debug!("transport subscription closed, frame router stopping");
        });
        BusCommunicator {
            channel,
            flavor,
            state,
            transparent_mode: AtomicBool::new(false),
            next_consumer_id: AtomicU64::new(0),
            _router: router,
        }
    }

    /// The bus this communicator tunnels to.
    pub fn flavor(&self) -> BusFlavor {
        self.flavor
    }

    /// Whether transparent mode is currently active.
    pub fn transparent_mode_active(&self) -> bool {
        self.transparent_mode.load(Ordering::Acquire)
    }

    /// Acquire exclusive tunnel access on the primary channel.
    ///
    /// Pair every call with [`exit_transparent_mode`](Self::exit_transparent_mode),
    /// including on failure paths, so the bus returns to live mode.
    pub async fn enter_transparent_mode(&self) -> Result<()> {
        let mode = self
            .channel
            .set_bus_mode(self.flavor, BusMode::Transparent, DEFAULT_TIMEOUT)
            .await?;
        self.transparent_mode
            .store(mode == BusMode::Transparent, Ordering::Release);
        Ok(())
    }

    /// Return the bus to live mode.
    pub async fn exit_transparent_mode(&self) -> Result<()> {
        let mode = self
            .channel
            .set_bus_mode(self.flavor, BusMode::Live, DEFAULT_TIMEOUT)
            .await?;
        self.transparent_mode
            .store(mode == BusMode::Transparent, Ordering::Release);
        Ok(())
    }

    /// Send a command to `address` and block until the reply arrives or
    /// `timeout` expires.
    ///
    /// The spec is consumed: its address is bound here and it moves into the
    /// consumer that matches the reply. Requires transparent mode; fails
    /// immediately with [`CorebusError::TransparentModeInactive`] otherwise.
    ///
    /// Send-only specs (no response fields) return an empty mapping on send
    /// confirmation without waiting.
    pub async fn do_command(
        &self,
        address: &str,
        mut spec: CommandSpec,
        fields: &FieldValues,
        timeout: Duration,
    ) -> Result<FieldValues> {
        if !self.transparent_mode_active() {
            return Err(CorebusError::TransparentModeInactive);
        }

        spec.set_address(address)?;
        let payload = spec.create_request_payload(fields)?;
        let send_only = spec.is_send_only();
        tracing::debug!(address, bytes = payload.len(), "writing to transport");

        let mut registration = None;
        if !send_only {
            let (tx, rx) = oneshot::channel();
            let consumer_id = self.next_consumer_id.fetch_add(1, Ordering::Relaxed);
            self.state.lock().await.consumers.push(Consumer {
                id: consumer_id,
                spec,
                tx: Some(tx),
            });
            registration = Some((consumer_id, rx));
        }

        // A primary-channel timeout collapses the consumer wait to zero so a
        // channel failure surfaces as an immediate sub-bus timeout instead of
        // doubling total latency.
        let mut channel_timed_out = false;
        match self
            .channel
            .send_transport_frame(self.flavor, &payload, timeout)
            .await
        {
            Ok(()) => {}
            Err(CorebusError::Timeout(message)) => {
                tracing::error!(%message, "internal timeout during bus transport");
                channel_timed_out = true;
            }
            Err(error) => {
                if let Some((consumer_id, _)) = registration {
                    self.unregister(consumer_id).await;
                }
                return Err(error);
            }
        }

        let (consumer_id, receiver) = match registration {
            Some(registration) => registration,
            None => return Ok(FieldValues::new()),
        };
        let wait = if channel_timed_out {
            Duration::ZERO
        } else {
            timeout
        };
        match tokio::time::timeout(wait, receiver).await {
            Ok(Ok(values)) => Ok(values),
            _ => {
                self.unregister(consumer_id).await;
                let reason = if channel_timed_out {
                    format!("primary channel timed out sending to {}", address)
                } else {
                    format!("no response from {} within {:?}", address, timeout)
                };
                Err(CorebusError::Timeout(reason))
            }
        }
    }

    async fn unregister(&self, consumer_id: u64) {
        self.state
            .lock()
            .await
            .consumers
            .retain(|consumer| consumer.id != consumer_id);
    }
}
