//! # Streaming Decode Session Core
//!
//! A blocking read/write/control surface over an asynchronous audio decode
//! engine: compressed WMA bitstream goes in through a double-buffered
//! output ring, decoded PCM optionally comes back through a small buffer
//! pool, and session control (start/stop/flush/fsync, volume, equalizer,
//! codec parameters) runs a precise state machine against the engine's
//! status reports.
//!
//! ## Overview
//!
//! - [`session::DecodeSession`] — the session object: open, start/stop,
//!   blocking `write`/`read`, `flush`, `fsync`, configuration and control.
//! - [`buffer`] — slot-level bookkeeping for the output ring and PCM pool.
//! - [`events`] — the out-of-band notification queue behind `get_event`.
//! - [`error`] — the typed failure taxonomy.
//!
//! The engine itself is consumed through the traits in the `bridge-dsp`
//! crate; tests drive the session against a loopback transport stub.

pub mod buffer;
pub mod config;
mod dispatch;
pub mod error;
pub mod events;
pub mod session;

pub use config::{OpenMode, PcmConfig, PcmConfigReport, StreamConfig, StreamConfigReport};
pub use error::{DecodeError, Result};
pub use events::{EventRecord, SessionEvent};
pub use session::{DecodeSession, DecoderState, SessionSnapshot};
