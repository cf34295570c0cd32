//! # Output Ring and PCM Pool
//!
//! Slot-level bookkeeping for both data directions. A slot is always in
//! exactly one of three states:
//!
//! - `Free` — owned by the session, nothing staged;
//! - `Filled(len)` — owned by the session, `len` bytes pending submission
//!   (output side) or waiting to be drained (PCM side);
//! - `InFlight` — ownership transiently passed to the engine.
//!
//! The output ring is a strict two-slot ping-pong: `head` is the next slot
//! a writer fills, `tail` the next slot handed to the engine, and at most
//! one slot is ever `InFlight`. The PCM pool holds up to five slots the
//! engine fills autonomously and a reader drains in order.
//!
//! These structures are pure bookkeeping; all locking and transport calls
//! happen in the session layer that owns them.

use bridge_dsp::BitstreamFrame;
use bytes::Bytes;

/// Ownership state of one buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Owned by the session, empty.
    Free,
    /// Owned by the session, holding this many staged bytes.
    Filled(usize),
    /// Handed to the engine, awaiting acknowledgement.
    InFlight,
}

impl SlotState {
    /// Returns `true` for an empty, session-owned slot.
    pub fn is_free(self) -> bool {
        matches!(self, SlotState::Free)
    }

    /// Staged byte count, if the slot holds data.
    pub fn filled_len(self) -> Option<usize> {
        match self {
            SlotState::Filled(len) => Some(len),
            _ => None,
        }
    }
}

/// One fixed-capacity buffer slot with its transport address token.
#[derive(Debug)]
pub struct Slot {
    data: Vec<u8>,
    addr: u32,
    state: SlotState,
    meta_len: u16,
}

impl Slot {
    fn new(capacity: usize, addr: u32) -> Self {
        Self {
            data: vec![0; capacity],
            addr,
            state: SlotState::Free,
            meta_len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn addr(&self) -> u32 {
        self.addr
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn meta_len(&self) -> u16 {
        self.meta_len
    }

    /// Full-capacity view of the slot storage.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Full-capacity view for staging bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Staged bytes, empty unless the slot is `Filled`.
    pub fn filled_data(&self) -> &[u8] {
        match self.state {
            SlotState::Filled(len) => &self.data[..len],
            _ => &[],
        }
    }
}

// ============================================================================
// Output Ring
// ============================================================================

/// Double-buffered compressed-output ring.
#[derive(Debug)]
pub struct OutputRing {
    slots: [Slot; 2],
    head: usize,
    tail: usize,
    /// The engine is ready for a new submission.
    pub needed: bool,
}

impl OutputRing {
    pub fn new(frame_capacity: usize, base_addr: u32) -> Self {
        Self {
            slots: [
                Slot::new(frame_capacity, base_addr),
                Slot::new(frame_capacity, base_addr + frame_capacity as u32),
            ],
            head: 0,
            tail: 0,
            needed: false,
        }
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn tail(&self) -> usize {
        self.tail
    }

    pub fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    pub fn head_slot_mut(&mut self) -> &mut Slot {
        &mut self.slots[self.head]
    }

    pub fn head_is_free(&self) -> bool {
        self.slots[self.head].state.is_free()
    }

    /// Stage `len` bytes (already copied into the head slot) and flip to
    /// the other slot.
    pub fn commit_head(&mut self, len: usize, meta_len: u16) {
        let slot = &mut self.slots[self.head];
        slot.state = SlotState::Filled(len);
        slot.meta_len = meta_len;
        self.head ^= 1;
    }

    /// The engine asked for more data, so the in-flight slot (if any) is
    /// done. Returns `true` when a slot was freed and writers should wake.
    pub fn recycle_acked(&mut self) -> bool {
        let slot = &mut self.slots[self.tail];
        if slot.state == SlotState::InFlight {
            slot.state = SlotState::Free;
            slot.meta_len = 0;
            self.tail ^= 1;
            true
        } else {
            false
        }
    }

    /// Take the oldest staged frame for submission, marking its slot
    /// in-flight. Returns `None` when the tail slot holds nothing to send.
    pub fn take_submission(&mut self, stream: u16) -> Option<BitstreamFrame> {
        let index = self.tail;
        let slot = &mut self.slots[index];
        let len = slot.state.filled_len()?;
        let frame = BitstreamFrame {
            addr: slot.addr,
            data: Bytes::copy_from_slice(&slot.data[..len]),
            meta_len: slot.meta_len,
            stream,
        };
        slot.state = SlotState::InFlight;
        Some(frame)
    }

    /// Both slots empty and session-owned.
    pub fn is_drained(&self) -> bool {
        self.slots.iter().all(|s| s.state.is_free())
    }

    /// Number of slots currently owned by the engine; never exceeds one.
    pub fn in_flight_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::InFlight)
            .count()
    }

    /// Drop all staged data and rewind both indices. Used on disable and
    /// explicit flush; the `needed` flag is engine state and survives.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.state = SlotState::Free;
            slot.meta_len = 0;
        }
        self.head = 0;
        self.tail = 0;
    }

    /// Rewind only the submission index, done when (re)enabling so the
    /// first submission goes out of slot 0.
    pub fn rewind_tail(&mut self) {
        self.tail = 0;
    }
}

// ============================================================================
// PCM Pool
// ============================================================================

/// Read-side pool of engine-filled PCM buffers. Unconfigured until
/// `configure` runs; configuration happens once per session.
#[derive(Debug, Default)]
pub struct PcmPool {
    slots: Vec<Slot>,
    read_next: usize,
    fill_next: usize,
    /// An automatic refill was deferred because the reader fell behind.
    pub refresh_pending: bool,
}

impl PcmPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(&mut self, count: usize, size: usize, base_addr: u32) {
        self.slots = (0..count)
            .map(|i| Slot::new(size, base_addr + (i * size) as u32))
            .collect();
        self.read_next = 0;
        self.fill_next = 0;
        self.refresh_pending = false;
    }

    pub fn is_configured(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn buffer_count(&self) -> usize {
        self.slots.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.slots.first().map_or(0, Slot::capacity)
    }

    pub fn read_next(&self) -> usize {
        self.read_next
    }

    pub fn fill_next(&self) -> usize {
        self.fill_next
    }

    pub fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// The slot the engine is expected to fill next.
    pub fn fill_slot(&self) -> Option<&Slot> {
        self.slots.get(self.fill_next)
    }

    /// `true` when the next fill target is empty and an automatic refill
    /// may be issued.
    pub fn fill_slot_is_free(&self) -> bool {
        self.slots
            .get(self.fill_next)
            .is_some_and(|s| s.state().is_free())
    }

    /// Store one engine fill into the expected slot and advance. The
    /// caller validates the address and length first. Returns the filled
    /// slot index.
    pub fn accept_fill(&mut self, data: &[u8]) -> usize {
        let index = self.fill_next;
        let slot = &mut self.slots[index];
        slot.data[..data.len()].copy_from_slice(data);
        slot.state = SlotState::Filled(data.len());
        self.fill_next = (self.fill_next + 1) % self.slots.len();
        index
    }

    /// Byte count waiting in the next read slot, if any.
    pub fn read_len(&self) -> Option<usize> {
        self.slots
            .get(self.read_next)
            .and_then(|s| s.state().filled_len())
    }

    /// Data waiting in the next read slot.
    pub fn read_data(&self) -> &[u8] {
        self.slots
            .get(self.read_next)
            .map_or(&[], Slot::filled_data)
    }

    /// Mark the current read slot drained and advance.
    pub fn release_read(&mut self) {
        if let Some(slot) = self.slots.get_mut(self.read_next) {
            slot.state = SlotState::Free;
            self.read_next = (self.read_next + 1) % self.slots.len();
        }
    }

    /// Drop all buffered PCM and rewind both indices; the configured
    /// geometry survives.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.state = SlotState::Free;
        }
        self.read_next = 0;
        self.fill_next = 0;
        self.refresh_pending = false;
    }
}
