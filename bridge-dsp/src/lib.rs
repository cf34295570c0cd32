//! # DSP Engine Bridge
//!
//! Contract between the decode session core and the platform's decode
//! engine transport. The engine itself (hardware or firmware) lives behind
//! two narrow seams:
//!
//! - **Outbound**: [`DspChannel`] carries commands and buffers *to* the
//!   engine — frame submission, PCM refill requests, control commands,
//!   activation. [`AudioRoute`] models the upstream audio-manager resource
//!   a tunnel-mode session must hold while enabled.
//! - **Inbound**: the engine delivers unsolicited completions and status
//!   through an [`EngineHandle`], a cheap clonable mailbox sender that may
//!   be driven from any thread and never blocks. The session consumes the
//!   paired receiver on a dedicated dispatcher thread.
//!
//! ## Threading Model
//!
//! All traits require `Send + Sync`; a transport implementation must
//! tolerate commands arriving from both caller threads and the session's
//! dispatcher thread. Inbound delivery is decoupled through a bounded
//! channel, so an implementation may invoke [`EngineHandle`] methods from
//! an interrupt-style completion context without ever waiting on the
//! session's locks.
//!
//! ## Error Handling
//!
//! Transport failures surface as [`BridgeError`]. Implementations should
//! convert engine-specific failures into one of its variants and include
//! enough context to act on (queue name, command, address).

pub mod channel;
pub mod error;
pub mod events;

pub use error::BridgeError;

pub use channel::{
    AudioRoute, BitstreamFrame, ControlCommand, DspChannel, Equalizer, EqBand, HostPcmConfig,
    PcmRefill, PlaybackStats, RouteConfig, RoutingMode, VolumePan, WmaParams,
};
pub use events::{
    engine_mailbox, EngineEvent, EngineHandle, EngineStatus, PcmBlock, SleepReason,
    MAILBOX_CAPACITY,
};
