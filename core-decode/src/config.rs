//! # Session Configuration
//!
//! Configuration types and the hardware constants they clamp against. The
//! numeric limits come from the decode engine's contract: frame capacities
//! are fixed at open, the PCM pool is sized once before the first read, and
//! out-of-range requests are clamped rather than rejected where the engine
//! defines a safe fallback.

use crate::error::{DecodeError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capacity of each compressed-output frame, meta field included.
pub const OUT_FRAME_CAPACITY: usize = 2062;

/// Number of compressed-output frames (fixed double buffering).
pub const OUT_BUFFER_COUNT: usize = 2;

/// Most PCM buffers the engine will cycle through.
pub const PCM_BUF_MAX_COUNT: usize = 5;

/// Fewest PCM buffers that still allow engine/reader overlap.
pub const PCM_BUF_MIN_COUNT: usize = 2;

/// Smallest PCM buffer that holds one decoded stereo frame plus meta.
pub const PCM_BUF_MIN_SIZE: usize = 8216;

/// Upper bound on total PCM pool memory.
pub const PCM_POOL_MAX_BYTES: usize = 8 << 20;

/// Byte offset of the end-of-stream flag inside a meta field.
pub const META_EOS_OFFSET: usize = 0x0A;

/// Bit carrying the end-of-stream flag at [`META_EOS_OFFSET`].
pub const META_EOS_MASK: u8 = 0x01;

/// Bound on waits for a decoder state transition (start/disable).
pub const DECODER_STATE_WAIT: Duration = Duration::from_millis(2000);

/// Post-processor feature mask bit: equalizer.
pub const EQ_ENABLE: u16 = 0x0002;

/// A/V sync reporting interval handed to the engine on enable.
pub const AVSYNC_INTERVAL: u32 = 22050;

// ============================================================================
// Open Mode
// ============================================================================

/// How the session was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    /// Tunnel playback: compressed audio in, rendering done by the engine.
    WriteOnly,
    /// PCM feedback: compressed audio in, decoded PCM back to the caller.
    ReadWrite,
}

impl OpenMode {
    /// Returns `true` when decoded PCM is returned to the caller.
    pub fn pcm_feedback(self) -> bool {
        matches!(self, OpenMode::ReadWrite)
    }
}

// ============================================================================
// Stream Configuration
// ============================================================================

/// Caller-visible stream configuration, staged for the next enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Source sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count; the engine decodes mono or stereo only.
    pub channels: u16,
    /// Whether writes carry a per-buffer meta field prefix.
    pub meta_field: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            meta_field: false,
        }
    }
}

impl StreamConfig {
    /// Validate caller-supplied values.
    pub fn validate(&self) -> Result<()> {
        if self.channels != 1 && self.channels != 2 {
            return Err(DecodeError::InvalidArgument(format!(
                "unsupported channel count {}",
                self.channels
            )));
        }
        if self.sample_rate == 0 {
            return Err(DecodeError::InvalidArgument(
                "sample rate must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Stream configuration as reported back to the caller, including the
/// fixed output buffering geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfigReport {
    /// Capacity of one compressed-output buffer in bytes.
    pub buffer_size: usize,
    /// Number of compressed-output buffers.
    pub buffer_count: usize,
    pub sample_rate: u32,
    pub channels: u16,
    pub meta_field: bool,
}

// ============================================================================
// PCM Pool Configuration
// ============================================================================

/// Requested PCM feedback pool geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmConfig {
    /// Number of PCM buffers the engine cycles through.
    pub buffer_count: usize,
    /// Size of each PCM buffer in bytes.
    pub buffer_size: usize,
}

impl Default for PcmConfig {
    fn default() -> Self {
        Self {
            buffer_count: PCM_BUF_MAX_COUNT,
            buffer_size: PCM_BUF_MIN_SIZE,
        }
    }
}

impl PcmConfig {
    /// Clamp the request into the engine's accepted geometry: a count
    /// outside [2, 5] falls back to the maximum, and the buffer size is
    /// raised to the minimum that holds one decoded frame.
    pub fn clamped(self) -> Self {
        let buffer_count =
            if self.buffer_count > PCM_BUF_MAX_COUNT || self.buffer_count < PCM_BUF_MIN_COUNT {
                PCM_BUF_MAX_COUNT
            } else {
                self.buffer_count
            };
        let buffer_size = self.buffer_size.max(PCM_BUF_MIN_SIZE);
        Self {
            buffer_count,
            buffer_size,
        }
    }
}

/// Effective PCM pool geometry as reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmConfigReport {
    /// Whether this session returns decoded PCM at all.
    pub pcm_feedback: bool,
    pub buffer_count: usize,
    pub buffer_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stream_config_is_valid() {
        let config = StreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.channels, 2);
        assert!(!config.meta_field);
    }

    #[test]
    fn stream_config_rejects_bad_channel_counts() {
        for channels in [0u16, 3, 6] {
            let config = StreamConfig {
                channels,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(DecodeError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn stream_config_rejects_zero_sample_rate() {
        let config = StreamConfig {
            sample_rate: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn pcm_count_outside_range_falls_back_to_max() {
        for count in [0usize, 1, 6, 100] {
            let clamped = PcmConfig {
                buffer_count: count,
                buffer_size: PCM_BUF_MIN_SIZE,
            }
            .clamped();
            assert_eq!(clamped.buffer_count, PCM_BUF_MAX_COUNT);
        }
    }

    #[test]
    fn pcm_count_in_range_is_kept() {
        for count in PCM_BUF_MIN_COUNT..=PCM_BUF_MAX_COUNT {
            let clamped = PcmConfig {
                buffer_count: count,
                buffer_size: PCM_BUF_MIN_SIZE,
            }
            .clamped();
            assert_eq!(clamped.buffer_count, count);
        }
    }

    #[test]
    fn pcm_size_is_raised_to_minimum() {
        let clamped = PcmConfig {
            buffer_count: 2,
            buffer_size: 128,
        }
        .clamped();
        assert_eq!(clamped.buffer_size, PCM_BUF_MIN_SIZE);

        let kept = PcmConfig {
            buffer_count: 2,
            buffer_size: PCM_BUF_MIN_SIZE * 2,
        }
        .clamped();
        assert_eq!(kept.buffer_size, PCM_BUF_MIN_SIZE * 2);
    }
}
