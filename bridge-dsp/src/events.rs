//! # Inbound Engine Events
//!
//! The completion side of the transport. An engine implementation holds an
//! [`EngineHandle`] and pushes events into it from whatever context its
//! callbacks run in; the session core drains the paired receiver on its
//! dispatcher thread. Delivery is non-blocking by construction — a full
//! mailbox drops the event and logs, it never stalls the completion
//! context.

use crate::channel::RoutingMode;
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::warn;

/// Capacity of the engine-event mailbox.
pub const MAILBOX_CAPACITY: usize = 64;

/// Why the decoder went to sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepReason {
    /// Orderly shutdown after decoder deselect.
    None,
    /// The engine could not reserve working memory.
    OutOfMemory,
    /// No decoder of the requested type is available.
    NoDecoder,
    /// Reason code not understood by this driver.
    Other(u16),
}

/// Decoder status reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Decoder halted; the reason distinguishes orderly close from failure.
    Sleep(SleepReason),
    /// Decoder task is up and waiting for configuration.
    Init,
    /// Configuration accepted.
    Config,
    /// Decoding in progress.
    Play,
    /// The post-processor path for this stream came up.
    Enabled,
    /// The post-processor path for this stream went down.
    Disabled,
    /// Routing selection acknowledged.
    RoutingAck(RoutingMode),
}

/// One filled PCM slot returned by the engine.
#[derive(Debug, Clone)]
pub struct PcmBlock {
    /// Address token the fill was requested with.
    pub addr: u32,
    /// Decoded PCM for that slot.
    pub data: Bytes,
}

/// Asynchronous notifications from the decode engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The decoder wants another bitstream frame (and is done with the one
    /// in flight, if any).
    NeedsData,
    /// One or more PCM slots were filled, in request order.
    PcmFilled(Vec<PcmBlock>),
    /// Decoder / post-processor status change.
    Status(EngineStatus),
    /// The engine finished discarding queued data after a flush command.
    FlushAck,
    /// The decoder ran out of bitstream mid-play.
    Underrun,
}

/// Delivery handle given to the engine implementation.
///
/// Clonable and callable from any thread. Every method is a non-blocking
/// push into the session's mailbox.
#[derive(Clone)]
pub struct EngineHandle {
    tx: Sender<EngineEvent>,
}

impl EngineHandle {
    /// The decoder requests more bitstream.
    pub fn needs_data(&self) {
        self.push(EngineEvent::NeedsData);
    }

    /// The engine filled PCM slots.
    pub fn pcm_filled(&self, blocks: Vec<PcmBlock>) {
        self.push(EngineEvent::PcmFilled(blocks));
    }

    /// Status change.
    pub fn status(&self, status: EngineStatus) {
        self.push(EngineEvent::Status(status));
    }

    /// Flush acknowledged.
    pub fn flush_ack(&self) {
        self.push(EngineEvent::FlushAck);
    }

    /// Bitstream starvation.
    pub fn underrun(&self) {
        self.push(EngineEvent::Underrun);
    }

    fn push(&self, event: EngineEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(?event, "engine mailbox full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {
                // Session already torn down; nothing left to notify.
            }
        }
    }
}

/// Create the engine-event mailbox: the handle goes to the engine
/// implementation, the receiver to the session's dispatcher.
pub fn engine_mailbox() -> (EngineHandle, Receiver<EngineEvent>) {
    let (tx, rx) = crossbeam_channel::bounded(MAILBOX_CAPACITY);
    (EngineHandle { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_delivers_in_order() {
        let (handle, rx) = engine_mailbox();
        handle.needs_data();
        handle.flush_ack();
        handle.underrun();

        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::NeedsData));
        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::FlushAck));
        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::Underrun));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_mailbox_drops_instead_of_blocking() {
        let (handle, rx) = engine_mailbox();
        for _ in 0..MAILBOX_CAPACITY + 8 {
            handle.needs_data();
        }
        // The overflow was dropped; the mailbox still holds exactly its
        // capacity and the sender never blocked.
        assert_eq!(rx.try_iter().count(), MAILBOX_CAPACITY);
    }

    #[test]
    fn delivery_after_receiver_drop_is_silent() {
        let (handle, rx) = engine_mailbox();
        drop(rx);
        handle.status(EngineStatus::Play);
    }
}
