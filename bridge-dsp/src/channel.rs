//! # Outbound Engine Transport
//!
//! The command-side contract: everything the decode session sends *to* the
//! engine. A platform implementation wraps whatever queue or RPC mechanism
//! moves these commands to the decoder task; the session core only ever
//! talks to the [`DspChannel`] and [`AudioRoute`] traits.

use crate::error::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Maximum number of equalizer bands the post-processor accepts.
pub const MAX_EQ_BANDS: usize = 12;

// ============================================================================
// Buffer Transfer Types
// ============================================================================

/// A compressed bitstream frame handed to the decode engine.
///
/// The payload is always an even number of bytes (the transport moves
/// 16-bit words), except for the meta-field-only terminal frame that closes
/// a stream.
#[derive(Debug, Clone)]
pub struct BitstreamFrame {
    /// Transport address token of the originating slot. The engine is
    /// expected to be done with the slot by the time it next requests data.
    pub addr: u32,
    /// Frame payload. When `meta_len > 0` the first `meta_len` bytes are
    /// the per-frame meta field and the remainder is bitstream data.
    pub data: Bytes,
    /// Length of the meta-field prefix in bytes, 0 when the stream carries
    /// no meta fields.
    pub meta_len: u16,
    /// Decoder stream the frame belongs to.
    pub stream: u16,
}

impl BitstreamFrame {
    /// Number of bitstream bytes after the meta-field prefix.
    pub fn payload_len(&self) -> usize {
        self.data.len().saturating_sub(self.meta_len as usize)
    }
}

/// A request for the engine to fill one PCM slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmRefill {
    /// Transport address token of the slot to fill.
    pub addr: u32,
    /// Capacity of the slot in bytes.
    pub len: usize,
}

// ============================================================================
// Control Command Types
// ============================================================================

/// Decoder routing selected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingMode {
    /// Decoded audio is rendered directly by the engine (tunnel mode).
    Realtime,
    /// Decoded PCM is returned to the host as fast as the engine can
    /// produce it (PCM feedback mode).
    FasterThanRealtime,
}

/// WMA decoder parameters staged by the caller and sent on enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WmaParams {
    /// Byte threshold below which the decoder requests more bitstream.
    pub data_request_threshold: u16,
    /// Channels the decoder should produce (1 = mono, 2 = stereo).
    pub channels_decoded: u16,
    /// Average bitstream rate in bytes per second.
    pub bytes_per_second: u32,
    /// Source sampling frequency in Hz.
    pub sample_rate: u16,
    /// Encoder option flags carried verbatim from the container header.
    pub encoder_options: u16,
}

impl Default for WmaParams {
    fn default() -> Self {
        Self {
            data_request_threshold: 1262,
            channels_decoded: 2,
            bytes_per_second: 6003,
            sample_rate: 44100,
            encoder_options: 31,
        }
    }
}

/// Master volume and stereo pan applied by the post-processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumePan {
    /// Fixed-point gain; unity is 0x2000.
    pub volume: u16,
    /// Signed pan, 0 centered.
    pub pan: i16,
}

impl Default for VolumePan {
    fn default() -> Self {
        Self { volume: 0x2000, pan: 0 }
    }
}

/// One parametric equalizer band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EqBand {
    /// Band index, 0-based.
    pub band: u16,
    /// Filter shape selector understood by the post-processor.
    pub filter_type: u16,
    /// Center (or shelf corner) frequency in Hz.
    pub center_freq_hz: u32,
    /// Gain in whole decibels.
    pub gain_db: i16,
}

/// Equalizer band set staged by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equalizer {
    pub bands: Vec<EqBand>,
}

impl Equalizer {
    /// `true` when the band set fits the post-processor limit.
    pub fn is_valid(&self) -> bool {
        self.bands.len() <= MAX_EQ_BANDS
    }
}

/// Host-PCM buffer arrangement announced to the engine before feedback
/// decoding starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPcmConfig {
    /// Number of PCM slots the host will cycle through.
    pub max_buffers: u8,
    /// Whether the engine should byte-swap samples before writing.
    pub byte_swap: bool,
    /// Buffer-completion notification interval, in buffers.
    pub feedback_interval: u16,
}

/// Control-path commands. Each maps to one engine command packet.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    /// Select or deselect this stream's decoder in the engine.
    SelectDecoder { enable: bool },
    /// Push staged decoder parameters.
    CodecParams(WmaParams),
    /// Select the routing mode for this stream.
    RoutingMode(RoutingMode),
    /// Apply volume and pan.
    VolumePan(VolumePan),
    /// Apply (or disable) the equalizer band set.
    Equalizer { enable: bool, eq: Equalizer },
    /// Announce the host-PCM buffer arrangement.
    HostPcmConfig(HostPcmConfig),
    /// Discard everything queued inside the engine for this stream.
    Flush,
    /// Pause or resume decoding.
    Pause(bool),
    /// Arm A/V sync statistics reporting at the given interval, 0 disarms.
    AvSync { interval: u32 },
}

// ============================================================================
// Statistics
// ============================================================================

/// Playback counters maintained by the engine's A/V sync machinery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    /// Bitstream bytes consumed since enable.
    pub byte_count: u32,
    /// PCM samples produced since enable.
    pub sample_count: u32,
}

// ============================================================================
// Traits
// ============================================================================

/// Command transport to the decode engine.
///
/// Implementations must be callable from both caller threads and the
/// session's dispatcher thread. Commands are fire-and-forget at this layer;
/// outcomes arrive asynchronously as [`EngineEvent`](crate::events::EngineEvent)s.
pub trait DspChannel: Send + Sync {
    /// Bring the decoder task up and register for its events.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine module cannot be brought up; the
    /// session treats this as the device being unavailable.
    fn activate(&self) -> Result<()>;

    /// Tear the decoder task down. Infallible by contract; a transport
    /// that cannot deactivate should log and move on.
    fn deactivate(&self);

    /// Queue one compressed frame for decode.
    fn submit_compressed(&self, frame: BitstreamFrame) -> Result<()>;

    /// Ask the engine to fill one PCM slot.
    fn request_pcm_refill(&self, refill: PcmRefill) -> Result<()>;

    /// Send a control command.
    fn send_control(&self, cmd: ControlCommand) -> Result<()>;

    /// Read the engine's playback counters.
    fn stats(&self) -> PlaybackStats;
}

/// Routing configuration requested when acquiring the audio route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Render-side sample rate in Hz.
    pub rx_sample_rate: u32,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self { rx_sample_rate: 48000 }
    }
}

/// Upstream audio-manager resource held for the lifetime of an enabled
/// tunnel-mode session. PCM feedback sessions never touch it.
pub trait AudioRoute: Send + Sync {
    /// Acquire the render path.
    fn acquire(&self, config: RouteConfig) -> Result<()>;

    /// Release the render path. Must tolerate release-without-acquire.
    fn release(&self);
}
