//! # Decode Session
//!
//! The session object behind the device node: a blocking write/read/control
//! surface over the asynchronous decode engine.
//!
//! ## Architecture
//!
//! ```text
//! writer ──▶ OutputRing (2 slots) ──▶ DspChannel ──▶ engine
//!                                                      │
//! reader ◀── PcmPool (≤5 slots) ◀── dispatcher ◀── EngineHandle
//! ```
//!
//! Callers block on condition variables over one session-state mutex; the
//! engine's completion context never blocks — it pushes events into a
//! bounded mailbox drained by a dedicated dispatcher thread. A control
//! mutex serializes session-level operations, and independent write/read
//! gates keep a blocked writer from ever stalling a concurrent reader.
//!
//! ## Modes
//!
//! - **Tunnel** ([`OpenMode::WriteOnly`]): compressed audio in, rendering
//!   done by the engine. Holds the [`AudioRoute`] while enabled.
//! - **PCM feedback** ([`OpenMode::ReadWrite`]): decoded PCM is returned to
//!   the caller through the PCM pool, which must be configured once with
//!   [`DecodeSession::set_pcm_config`] before the first read.

use crate::buffer::{OutputRing, PcmPool, SlotState};
use crate::config::{
    OpenMode, PcmConfig, PcmConfigReport, StreamConfig, StreamConfigReport, DECODER_STATE_WAIT,
    EQ_ENABLE, META_EOS_MASK, META_EOS_OFFSET, OUT_BUFFER_COUNT, OUT_FRAME_CAPACITY,
    PCM_BUF_MAX_COUNT, PCM_BUF_MIN_SIZE, PCM_POOL_MAX_BYTES,
};
use crate::dispatch;
use crate::error::{DecodeError, Result};
use crate::events::{EventQueue, EventRecord, SessionEvent};
use bridge_dsp::{
    engine_mailbox, AudioRoute, ControlCommand, DspChannel, EngineHandle, Equalizer,
    PlaybackStats, RouteConfig, VolumePan, WmaParams,
};
use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

// Transport address tokens for the two buffer regions.
const OUT_RING_BASE: u32 = 0x0800_0000;
const PCM_POOL_BASE: u32 = 0x0810_0000;

/// Engine-reported decoder state, orthogonal to the session's own flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// No transition reported since the last enable/disable request.
    None,
    /// The engine could not bring the decoder up.
    Failure,
    /// Orderly decoder shutdown.
    Close,
    /// Decoder configured and playing.
    Success,
}

/// Mutable session state shared between caller threads and the dispatcher.
pub(crate) struct State {
    pub(crate) out: OutputRing,
    pub(crate) pcm: PcmPool,
    /// Trailing byte of an odd-length write, awaiting the next frame.
    pub(crate) reserved: Option<u8>,
    pub(crate) enabled: bool,
    pub(crate) running: bool,
    pub(crate) stopped: bool,
    pub(crate) wflush: bool,
    pub(crate) rflush: bool,
    /// The engine reported bitstream starvation (tunnel drain marker).
    pub(crate) drained: bool,
    /// Cleared when the dispatcher exits; every blocked wait observes it.
    pub(crate) alive: bool,
    pub(crate) dec_state: DecoderState,
    pub(crate) stream_config: StreamConfig,
    pub(crate) wma: WmaParams,
    pub(crate) vol_pan: VolumePan,
    pub(crate) eq: Equalizer,
    pub(crate) eq_enable: bool,
    pub(crate) eq_needs_commit: bool,
}

impl State {
    fn new() -> Self {
        Self {
            out: OutputRing::new(OUT_FRAME_CAPACITY, OUT_RING_BASE),
            pcm: PcmPool::new(),
            reserved: None,
            enabled: false,
            running: false,
            stopped: false,
            wflush: false,
            rflush: false,
            drained: false,
            alive: true,
            dec_state: DecoderState::None,
            stream_config: StreamConfig::default(),
            wma: WmaParams::default(),
            vol_pan: VolumePan::default(),
            eq: Equalizer::default(),
            eq_enable: false,
            eq_needs_commit: false,
        }
    }
}

/// State and collaborators shared with the dispatcher thread.
pub(crate) struct Shared {
    pub(crate) mode: OpenMode,
    /// Decoder stream id carried on every submission (single-stream session).
    pub(crate) stream: u16,
    pub(crate) channel: Arc<dyn DspChannel>,
    pub(crate) route: Option<Arc<dyn AudioRoute>>,
    pub(crate) state: Mutex<State>,
    pub(crate) write_cv: Condvar,
    pub(crate) read_cv: Condvar,
    pub(crate) state_cv: Condvar,
    pub(crate) events: EventQueue,
}

/// A streaming decode session.
///
/// Methods take `&self`; share the session between threads with an `Arc`.
/// Dropping the session tears it down (see [`DecodeSession::close`]).
pub struct DecodeSession {
    shared: Arc<Shared>,
    // Serializes session-level control operations.
    control: Mutex<()>,
    // Serialize the write and read paths independently.
    write_gate: Mutex<()>,
    read_gate: Mutex<()>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: Sender<()>,
}

impl DecodeSession {
    /// Open a session over the given engine transport.
    ///
    /// Returns the session and the [`EngineHandle`] the engine
    /// implementation must use to deliver completions and status. Tunnel
    /// sessions additionally require an [`AudioRoute`].
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidArgument`] when a tunnel session is
    /// opened without a route.
    pub fn open(
        mode: OpenMode,
        channel: Arc<dyn DspChannel>,
        route: Option<Arc<dyn AudioRoute>>,
    ) -> Result<(DecodeSession, EngineHandle)> {
        if !mode.pcm_feedback() && route.is_none() {
            return Err(DecodeError::InvalidArgument(
                "tunnel playback requires an audio route".to_string(),
            ));
        }
        let (handle, events_rx) = engine_mailbox();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let shared = Arc::new(Shared {
            mode,
            stream: 0,
            channel,
            route,
            state: Mutex::new(State::new()),
            write_cv: Condvar::new(),
            read_cv: Condvar::new(),
            state_cv: Condvar::new(),
            events: EventQueue::new(),
        });
        let dispatcher = dispatch::spawn(Arc::clone(&shared), events_rx, shutdown_rx);
        info!(?mode, "decode session opened");
        Ok((
            DecodeSession {
                shared,
                control: Mutex::new(()),
                write_gate: Mutex::new(()),
                read_gate: Mutex::new(()),
                dispatcher: Mutex::new(Some(dispatcher)),
                shutdown_tx,
            },
            handle,
        ))
    }

    /// How this session was opened.
    pub fn mode(&self) -> OpenMode {
        self.shared.mode
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Enable the session and wait for the decoder to come up.
    ///
    /// Succeeds only when the engine reaches [`DecoderState::Success`]
    /// within the state-transition bound; there is no partial-success
    /// state.
    ///
    /// # Errors
    ///
    /// [`DecodeError::Timeout`] when no transition arrived in time,
    /// [`DecodeError::DeviceUnavailable`] when activation failed or the
    /// decoder reported anything but success.
    pub fn start(&self) -> Result<()> {
        let _control = self.control.lock();
        info!("start");
        self.enable_locked()?;

        let mut st = self.shared.state.lock();
        let deadline = Instant::now() + DECODER_STATE_WAIT;
        while st.dec_state == DecoderState::None && st.alive {
            if self.shared.state_cv.wait_until(&mut st, deadline).timed_out() {
                break;
            }
        }
        debug!(state = ?st.dec_state, "start handshake finished");
        match st.dec_state {
            DecoderState::Success => Ok(()),
            DecoderState::None if !st.alive => Err(DecodeError::Interrupted),
            DecoderState::None => Err(DecodeError::Timeout),
            other => Err(DecodeError::DeviceUnavailable(format!(
                "decoder reported {other:?} during start"
            ))),
        }
    }

    /// Disable the session and reset both I/O ports.
    ///
    /// Idempotent: a second stop is a no-op and never blocks. Any writer or
    /// reader blocked mid-transfer is woken and returns
    /// [`DecodeError::Busy`].
    pub fn stop(&self) -> Result<()> {
        let _control = self.control.lock();
        info!("stop");
        let result = self.disable_locked();
        self.shared.state.lock().stopped = true;
        self.ioport_reset();
        self.shared.state.lock().stopped = false;
        result
    }

    /// Discard all buffered data on both sides.
    ///
    /// When the decoder is running this also flushes the engine and blocks
    /// until it acknowledges.
    ///
    /// # Errors
    ///
    /// [`DecodeError::Interrupted`] when the session is torn down while
    /// waiting for the acknowledgement.
    pub fn flush(&self) -> Result<()> {
        let _control = self.control.lock();
        info!("flush");
        {
            let mut st = self.shared.state.lock();
            st.wflush = true;
            st.rflush = true;
        }
        self.ioport_reset();

        let running = self.shared.state.lock().running;
        if running {
            if let Err(e) = self.shared.channel.send_control(ControlCommand::Flush) {
                error!(error = %e, "engine flush command failed");
            }
            let mut st = self.shared.state.lock();
            while st.wflush {
                if !st.alive {
                    error!("flush interrupted");
                    return Err(DecodeError::Interrupted);
                }
                self.shared.write_cv.wait(&mut st);
            }
            Ok(())
        } else {
            let mut st = self.shared.state.lock();
            st.rflush = false;
            st.wflush = false;
            Ok(())
        }
    }

    /// Tear the session down: disable the decoder, drop all buffers, abort
    /// any event waiter, and join the dispatcher. Called automatically on
    /// drop; safe to call more than once.
    pub fn close(&self) {
        let handle = self.dispatcher.lock().take();
        let Some(handle) = handle else { return };
        info!("decode session closing");
        {
            let _control = self.control.lock();
            if let Err(e) = self.disable_locked() {
                warn!(error = %e, "disable during close failed");
            }
            let mut st = self.shared.state.lock();
            st.out.reset();
            st.reserved = None;
            st.pcm.reset();
        }
        self.shared.events.abort();
        let _ = self.shutdown_tx.try_send(());
        if handle.join().is_err() {
            error!("dispatcher thread panicked");
        }
        self.shared.events.reset();
    }

    /// Must be called with `control` held.
    fn enable_locked(&self) -> Result<()> {
        {
            let mut st = self.shared.state.lock();
            if st.enabled {
                return Ok(());
            }
            if !st.alive {
                return Err(DecodeError::Interrupted);
            }
            st.dec_state = DecoderState::None;
            st.out.rewind_tail();
            st.out.needed = false;
        }

        if let Some(route) = self.tunnel_route() {
            route.acquire(RouteConfig::default()).map_err(|e| {
                error!(error = %e, "audio route acquire failed");
                DecodeError::DeviceUnavailable(e.to_string())
            })?;
        }
        if let Err(e) = self.shared.channel.activate() {
            error!(error = %e, "engine activation failed");
            if let Some(route) = self.tunnel_route() {
                route.release();
            }
            return Err(DecodeError::DeviceUnavailable(e.to_string()));
        }

        self.shared.state.lock().enabled = true;
        debug!("session enabled");
        Ok(())
    }

    /// Must be called with `control` held.
    fn disable_locked(&self) -> Result<()> {
        {
            let mut st = self.shared.state.lock();
            if !st.enabled {
                return Ok(());
            }
            st.enabled = false;
            st.dec_state = DecoderState::None;
        }
        if let Err(e) = self
            .shared
            .channel
            .send_control(ControlCommand::SelectDecoder { enable: false })
        {
            error!(error = %e, "decoder deselect failed");
        }

        let result = {
            let mut st = self.shared.state.lock();
            let deadline = Instant::now() + DECODER_STATE_WAIT;
            while st.dec_state == DecoderState::None && st.alive {
                if self.shared.state_cv.wait_until(&mut st, deadline).timed_out() {
                    break;
                }
            }
            match st.dec_state {
                DecoderState::Close => Ok(()),
                DecoderState::None if !st.alive => Err(DecodeError::Interrupted),
                DecoderState::None => Err(DecodeError::Timeout),
                other => Err(DecodeError::ProtocolFault(format!(
                    "decoder reported {other:?} during disable"
                ))),
            }
        };

        // Teardown is unconditional: a timeout above must not leave waiters
        // blocked or the route held.
        self.shared.write_cv.notify_all();
        self.shared.read_cv.notify_all();
        self.shared.channel.deactivate();
        if let Some(route) = self.tunnel_route() {
            route.release();
        }
        self.shared.state.lock().out.needed = false;

        if let Err(e) = &result {
            warn!(error = %e, "disable completed with error");
        }
        result
    }

    fn tunnel_route(&self) -> Option<&Arc<dyn AudioRoute>> {
        if self.shared.mode.pcm_feedback() {
            None
        } else {
            self.shared.route.as_ref()
        }
    }

    /// Free both I/O paths from their waits and reset the buffers, taking
    /// each gate in turn so the reset cannot deadlock against a blocked
    /// writer or reader.
    fn ioport_reset(&self) {
        self.shared.write_cv.notify_all();
        {
            let _write = self.write_gate.lock();
            let mut st = self.shared.state.lock();
            st.out.reset();
            st.reserved = None;
        }
        self.shared.read_cv.notify_all();
        {
            let _read = self.read_gate.lock();
            let mut st = self.shared.state.lock();
            st.pcm.reset();
        }
    }

    // ========================================================================
    // Data Path
    // ========================================================================

    /// Write compressed audio, blocking for ring space as needed.
    ///
    /// When the meta field is enabled ([`StreamConfig::meta_field`]) the
    /// first two bytes of `buf` give the meta-field length; an embedded
    /// end-of-stream marker is honored and stripped from the data the
    /// engine sees. Odd-length writes hold their trailing byte back and
    /// stitch it onto the next frame, so the transport only ever carries
    /// even-length submissions.
    ///
    /// Returns the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// [`DecodeError::Busy`] when a stop or flush cut the write short,
    /// [`DecodeError::Interrupted`] on teardown,
    /// [`DecodeError::InvalidArgument`] on a malformed meta field.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let _write = self.write_gate.lock();
        debug!(len = buf.len(), "write");

        let mut st = self.shared.state.lock();
        let mut consumed = 0usize;
        let mut eos_meta: Option<Vec<u8>> = None;
        let mut result = Ok(());

        while consumed < buf.len() {
            if let Err(e) = self.wait_head_free(&mut st) {
                result = Err(e);
                break;
            }

            let mut staged = 0usize;
            let mut meta_len = 0u16;

            if st.stream_config.meta_field && consumed == 0 {
                if buf.len() < 2 {
                    result = Err(DecodeError::InvalidArgument(
                        "meta field header truncated".to_string(),
                    ));
                    break;
                }
                let msz = u16::from_le_bytes([buf[0], buf[1]]) as usize;
                if msz > buf.len() {
                    result = Err(DecodeError::InvalidArgument(format!(
                        "meta field of {msz} bytes exceeds write of {}",
                        buf.len()
                    )));
                    break;
                }
                if msz >= OUT_FRAME_CAPACITY {
                    result = Err(DecodeError::InvalidArgument(format!(
                        "meta field of {msz} bytes leaves no frame room"
                    )));
                    break;
                }
                debug!(meta_len = msz, "meta field prefix");
                st.out.head_slot_mut().data_mut()[..msz].copy_from_slice(&buf[..msz]);

                if msz > META_EOS_OFFSET && buf[META_EOS_OFFSET] & META_EOS_MASK != 0 {
                    debug!("end of stream marker set");
                    eos_meta = Some(buf[..msz].to_vec());
                    if msz == buf.len() {
                        // Meta-only write: nothing to stage, straight to
                        // the end-of-stream protocol.
                        consumed += msz;
                        break;
                    }
                    // The engine must not see the marker on a data frame.
                    st.out.head_slot_mut().data_mut()[META_EOS_OFFSET] &= !META_EOS_MASK;
                }
                staged = msz;
                meta_len = msz as u16;
                consumed += msz;
            }

            if let Some(rsv) = st.reserved.take() {
                debug!(byte = rsv, "stitching reserved byte");
                st.out.head_slot_mut().data_mut()[staged] = rsv;
                staged += 1;
            }

            let capacity = st.out.slot(st.out.head()).capacity();
            let xfer = (buf.len() - consumed).min(capacity - staged);
            st.out.head_slot_mut().data_mut()[staged..staged + xfer]
                .copy_from_slice(&buf[consumed..consumed + xfer]);
            staged += xfer;
            consumed += xfer;

            if staged % 2 == 1 {
                let last = st.out.slot(st.out.head()).data()[staged - 1];
                debug!(byte = last, "odd length write, reserving trailing byte");
                st.reserved = Some(last);
                staged -= 1;
            }

            if staged > 0 {
                st.out.commit_head(staged, meta_len);
                dispatch::pump(&self.shared, &mut st, false);
            }
        }

        if result.is_ok() {
            if let Some(meta) = eos_meta {
                result = self.finish_eos(&mut st, &meta);
            }
        }
        drop(st);

        result.map(|()| consumed)
    }

    /// End-of-stream protocol: drain the reserved byte as its own frame,
    /// wait for the ring to empty with the engine ready, then submit the
    /// meta-field-only terminal frame.
    fn finish_eos(&self, st: &mut MutexGuard<'_, State>, meta: &[u8]) -> Result<()> {
        debug!("finalizing end of stream");
        if st.reserved.is_some() {
            self.wait_head_free(st)?;
            if let Some(rsv) = st.reserved.take() {
                debug!("flushing reserved byte as its own frame");
                let slot = st.out.head_slot_mut();
                slot.data_mut()[0] = rsv;
                slot.data_mut()[1] = 0;
                st.out.commit_head(2, 0);
                dispatch::pump(&self.shared, st, false);
            }
        }

        self.wait_output_drained(st)?;

        st.out.head_slot_mut().data_mut()[..meta.len()].copy_from_slice(meta);
        st.out.commit_head(meta.len(), meta.len() as u16);
        dispatch::pump(&self.shared, st, false);
        Ok(())
    }

    /// Read decoded PCM, blocking until a filled slot is available.
    ///
    /// Valid only for PCM feedback sessions with a configured pool; a
    /// tunnel session reads zero bytes. Reads never split a frame: when
    /// `buf` is smaller than the next filled slot the call returns early
    /// with the bytes already copied (possibly zero).
    ///
    /// # Errors
    ///
    /// [`DecodeError::Busy`] when a stop or flush cut the wait short with
    /// nothing copied, [`DecodeError::Interrupted`] on teardown,
    /// [`DecodeError::InvalidArgument`] when the pool was never configured.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if !self.shared.mode.pcm_feedback() {
            return Ok(0);
        }
        let _read = self.read_gate.lock();
        let mut st = self.shared.state.lock();
        if !st.pcm.is_configured() {
            return Err(DecodeError::InvalidArgument(
                "pcm pool not configured".to_string(),
            ));
        }
        debug!(len = buf.len(), "read");

        let mut copied = 0usize;
        let mut result = Ok(());

        while copied < buf.len() {
            let waited = loop {
                if !st.alive {
                    break Err(DecodeError::Interrupted);
                }
                if st.stopped || st.rflush {
                    break Err(DecodeError::Busy);
                }
                if let Some(used) = st.pcm.read_len() {
                    break Ok(used);
                }
                self.shared.read_cv.wait(&mut st);
            };
            let used = match waited {
                Ok(used) => used,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            };

            if buf.len() - copied < used {
                // Reads happen on frame boundaries only.
                debug!(frame = used, room = buf.len() - copied, "no room for a whole frame");
                break;
            }

            let slot = st.pcm.read_next();
            buf[copied..copied + used].copy_from_slice(st.pcm.read_data());
            st.pcm.release_read();
            copied += used;
            debug!(slot, len = used, "drained pcm slot");
            // One frame per call keeps the reader responsive instead of
            // sleeping until the caller's buffer is full.
            break;
        }

        // A refill deferred while the pool was full can go out now that a
        // slot was drained — but never during a flush; the flush ack
        // restarts feedback itself.
        if st.pcm.refresh_pending && !st.rflush {
            st.pcm.refresh_pending = false;
            debug!("re-arming deferred pcm refill");
            dispatch::refresh(&self.shared, &mut st);
        }
        drop(st);

        if copied > 0 {
            Ok(copied)
        } else {
            result.map(|()| 0)
        }
    }

    /// Block until every queued byte has been consumed by the engine.
    ///
    /// Tunnel mode only, and only while running: waits for both ring slots
    /// to drain with the engine asking for more, pushes out a reserved
    /// byte if one is pending, then waits for the engine's starvation
    /// report confirming all submitted data was decoded.
    ///
    /// # Errors
    ///
    /// [`DecodeError::InvalidArgument`] outside running tunnel mode,
    /// [`DecodeError::Busy`] when a flush or stop intervened,
    /// [`DecodeError::Interrupted`] on teardown.
    pub fn fsync(&self) -> Result<()> {
        debug!("fsync");
        {
            let st = self.shared.state.lock();
            if !st.running || self.shared.mode.pcm_feedback() {
                return Err(DecodeError::InvalidArgument(
                    "fsync applies to a running tunnel session".to_string(),
                ));
            }
        }

        let _write = self.write_gate.lock();
        let mut st = self.shared.state.lock();

        self.wait_output_drained(&mut st)?;

        if st.reserved.is_some() {
            if let Some(rsv) = st.reserved.take() {
                debug!("sending reserved byte");
                let slot = st.out.head_slot_mut();
                slot.data_mut()[0] = rsv;
                slot.data_mut()[1] = 0;
                st.out.commit_head(2, 0);
                dispatch::pump(&self.shared, &mut st, false);
            }
            self.wait_output_drained(&mut st)?;
        }

        // The starvation message repeats while the decoder is idle, so
        // rearming the flag after the drain cannot lose the report.
        st.drained = false;
        loop {
            if !st.alive {
                return Err(DecodeError::Interrupted);
            }
            if st.stopped || st.wflush {
                return Err(DecodeError::Busy);
            }
            if st.drained {
                return Ok(());
            }
            self.shared.write_cv.wait(&mut st);
        }
    }

    fn wait_head_free(&self, st: &mut MutexGuard<'_, State>) -> Result<()> {
        loop {
            if !st.alive {
                return Err(DecodeError::Interrupted);
            }
            if st.stopped || st.wflush {
                return Err(DecodeError::Busy);
            }
            if st.out.head_is_free() {
                return Ok(());
            }
            self.shared.write_cv.wait(st);
        }
    }

    fn wait_output_drained(&self, st: &mut MutexGuard<'_, State>) -> Result<()> {
        loop {
            if !st.alive {
                return Err(DecodeError::Interrupted);
            }
            if st.stopped || st.wflush {
                return Err(DecodeError::Busy);
            }
            if st.out.needed && st.out.is_drained() {
                return Ok(());
            }
            self.shared.write_cv.wait(st);
        }
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Stage the stream configuration for the next enable.
    pub fn set_config(&self, config: StreamConfig) -> Result<()> {
        config.validate()?;
        let _control = self.control.lock();
        self.shared.state.lock().stream_config = config;
        Ok(())
    }

    /// Current stream configuration plus the fixed output geometry.
    pub fn get_config(&self) -> StreamConfigReport {
        let st = self.shared.state.lock();
        StreamConfigReport {
            buffer_size: OUT_FRAME_CAPACITY,
            buffer_count: OUT_BUFFER_COUNT,
            sample_rate: st.stream_config.sample_rate,
            channels: st.stream_config.channels,
            meta_field: st.stream_config.meta_field,
        }
    }

    /// Stage decoder parameters for the next enable.
    pub fn set_codec_params(&self, params: WmaParams) -> Result<()> {
        if params.channels_decoded != 1 && params.channels_decoded != 2 {
            return Err(DecodeError::InvalidArgument(format!(
                "unsupported decoded channel count {}",
                params.channels_decoded
            )));
        }
        let _control = self.control.lock();
        self.shared.state.lock().wma = params;
        Ok(())
    }

    /// Currently staged decoder parameters.
    pub fn get_codec_params(&self) -> WmaParams {
        self.shared.state.lock().wma
    }

    /// Size the PCM feedback pool. Feedback sessions only; the pool is
    /// built once and later calls are accepted as no-ops. Out-of-range
    /// geometry is clamped (see [`PcmConfig::clamped`]).
    ///
    /// # Errors
    ///
    /// [`DecodeError::InvalidArgument`] on a tunnel session,
    /// [`DecodeError::ResourceExhausted`] when the clamped pool would
    /// exceed the memory bound.
    pub fn set_pcm_config(&self, config: PcmConfig) -> Result<()> {
        let _control = self.control.lock();
        if !self.shared.mode.pcm_feedback() {
            return Err(DecodeError::InvalidArgument(
                "session was not opened for pcm feedback".to_string(),
            ));
        }
        let config = config.clamped();
        let total = config
            .buffer_count
            .checked_mul(config.buffer_size)
            .unwrap_or(usize::MAX);
        if total > PCM_POOL_MAX_BYTES {
            return Err(DecodeError::ResourceExhausted(format!(
                "pcm pool of {total} bytes exceeds limit"
            )));
        }

        let mut st = self.shared.state.lock();
        if st.pcm.is_configured() {
            debug!("pcm pool already configured");
            return Ok(());
        }
        st.pcm.configure(config.buffer_count, config.buffer_size, PCM_POOL_BASE);
        info!(
            count = config.buffer_count,
            size = config.buffer_size,
            "pcm pool configured"
        );
        Ok(())
    }

    /// Effective PCM pool geometry (engine defaults until configured).
    pub fn get_pcm_config(&self) -> PcmConfigReport {
        let st = self.shared.state.lock();
        let (buffer_count, buffer_size) = if st.pcm.is_configured() {
            (st.pcm.buffer_count(), st.pcm.buffer_size())
        } else {
            (PCM_BUF_MAX_COUNT, PCM_BUF_MIN_SIZE)
        };
        PcmConfigReport {
            pcm_feedback: self.shared.mode.pcm_feedback(),
            buffer_count,
            buffer_size,
        }
    }

    // ========================================================================
    // Control
    // ========================================================================

    /// Set the master volume; applied immediately when running, staged
    /// otherwise.
    pub fn set_volume(&self, volume: u16) -> Result<()> {
        let cmd = {
            let mut st = self.shared.state.lock();
            st.vol_pan.volume = volume;
            st.running.then_some(ControlCommand::VolumePan(st.vol_pan))
        };
        if let Some(cmd) = cmd {
            self.shared.channel.send_control(cmd)?;
        }
        Ok(())
    }

    /// Set the stereo pan; applied immediately when running, staged
    /// otherwise.
    pub fn set_pan(&self, pan: i16) -> Result<()> {
        let cmd = {
            let mut st = self.shared.state.lock();
            st.vol_pan.pan = pan;
            st.running.then_some(ControlCommand::VolumePan(st.vol_pan))
        };
        if let Some(cmd) = cmd {
            self.shared.channel.send_control(cmd)?;
        }
        Ok(())
    }

    /// Stage an equalizer band set; committed on the next enable or an
    /// explicit [`DecodeSession::enable_audpp`] call.
    pub fn set_equalizer(&self, eq: Equalizer) -> Result<()> {
        if !eq.is_valid() {
            return Err(DecodeError::InvalidArgument(format!(
                "too many equalizer bands: {}",
                eq.bands.len()
            )));
        }
        let mut st = self.shared.state.lock();
        st.eq = eq;
        st.eq_needs_commit = true;
        Ok(())
    }

    /// Interpret the post-processor feature mask (equalizer enable bit).
    pub fn enable_audpp(&self, mask: u16) -> Result<()> {
        self.enable_eq(mask & EQ_ENABLE != 0)
    }

    fn enable_eq(&self, enable: bool) -> Result<()> {
        let cmd = {
            let mut st = self.shared.state.lock();
            if st.eq_enable == enable && !st.eq_needs_commit {
                return Ok(());
            }
            st.eq_enable = enable;
            if st.running {
                st.eq_needs_commit = false;
                Some(ControlCommand::Equalizer {
                    enable,
                    eq: st.eq.clone(),
                })
            } else {
                None
            }
        };
        if let Some(cmd) = cmd {
            self.shared.channel.send_control(cmd)?;
        }
        Ok(())
    }

    /// Pause or resume the decoder.
    pub fn pause(&self, paused: bool) -> Result<()> {
        let _control = self.control.lock();
        debug!(paused, "pause");
        self.shared
            .channel
            .send_control(ControlCommand::Pause(paused))?;
        Ok(())
    }

    /// Engine playback counters.
    pub fn get_stats(&self) -> PlaybackStats {
        self.shared.channel.stats()
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// Wait for the next out-of-band notification. See
    /// [`EventQueue::wait`](crate::events::EventQueue::wait) for the
    /// timeout and abort semantics.
    pub fn get_event(&self, timeout: Option<Duration>) -> Result<EventRecord> {
        self.shared.events.wait(timeout)
    }

    /// Abort a pending (or the next) `get_event` wait.
    pub fn abort_get_event(&self) {
        self.shared.events.abort();
    }

    /// Post a notification for the `get_event` consumer.
    pub fn notify(&self, event: SessionEvent) {
        self.shared.events.post(event);
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Point-in-time view of the session for diagnostics.
    pub fn snapshot(&self) -> SessionSnapshot {
        let st = self.shared.state.lock();
        SessionSnapshot {
            mode: self.shared.mode,
            enabled: st.enabled,
            running: st.running,
            stopped: st.stopped,
            wflush: st.wflush,
            rflush: st.rflush,
            dec_state: st.dec_state,
            out_needed: st.out.needed,
            out_head: st.out.head(),
            out_tail: st.out.tail(),
            out_slots: [st.out.slot(0).state(), st.out.slot(1).state()],
            out_frame_size: OUT_FRAME_CAPACITY,
            pcm_buf_count: st.pcm.buffer_count(),
            pcm_buf_size: st.pcm.buffer_size(),
            read_next: st.pcm.read_next(),
            fill_next: st.pcm.fill_next(),
            refresh_pending: st.pcm.refresh_pending,
            pcm_slots: st.pcm.slots().iter().map(|s| s.state()).collect(),
            sample_rate: st.stream_config.sample_rate,
            channels: st.stream_config.channels,
            volume: st.vol_pan.volume,
            reserved: st.reserved.is_some(),
        }
    }
}

impl Drop for DecodeSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Diagnostic view of a session, one value per line via `Display`.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub mode: OpenMode,
    pub enabled: bool,
    pub running: bool,
    pub stopped: bool,
    pub wflush: bool,
    pub rflush: bool,
    pub dec_state: DecoderState,
    pub out_needed: bool,
    pub out_head: usize,
    pub out_tail: usize,
    pub out_slots: [SlotState; 2],
    pub out_frame_size: usize,
    pub pcm_buf_count: usize,
    pub pcm_buf_size: usize,
    pub read_next: usize,
    pub fill_next: usize,
    pub refresh_pending: bool,
    pub pcm_slots: Vec<SlotState>,
    pub sample_rate: u32,
    pub channels: u16,
    pub volume: u16,
    pub reserved: bool,
}

impl fmt::Display for SessionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mode {:?}", self.mode)?;
        writeln!(f, "enabled {}", self.enabled)?;
        writeln!(f, "running {}", self.running)?;
        writeln!(f, "stopped {}", self.stopped)?;
        writeln!(f, "wflush {}", self.wflush)?;
        writeln!(f, "rflush {}", self.rflush)?;
        writeln!(f, "dec_state {:?}", self.dec_state)?;
        writeln!(f, "out_needed {}", self.out_needed)?;
        writeln!(f, "out_head {}", self.out_head)?;
        writeln!(f, "out_tail {}", self.out_tail)?;
        writeln!(f, "out[0] {:?}", self.out_slots[0])?;
        writeln!(f, "out[1] {:?}", self.out_slots[1])?;
        writeln!(f, "out_frame_size {}", self.out_frame_size)?;
        writeln!(f, "pcm_buf_count {}", self.pcm_buf_count)?;
        writeln!(f, "pcm_buf_size {}", self.pcm_buf_size)?;
        writeln!(f, "read_next {}", self.read_next)?;
        writeln!(f, "fill_next {}", self.fill_next)?;
        writeln!(f, "refresh_pending {}", self.refresh_pending)?;
        for (i, slot) in self.pcm_slots.iter().enumerate() {
            writeln!(f, "in[{i}] {slot:?}")?;
        }
        writeln!(f, "sample_rate {}", self.sample_rate)?;
        writeln!(f, "channels {}", self.channels)?;
        writeln!(f, "volume {:#x}", self.volume)?;
        writeln!(f, "reserved {}", self.reserved)
    }
}
