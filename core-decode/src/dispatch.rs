//! # Engine Event Dispatcher
//!
//! A dedicated thread drains the engine mailbox and applies each event to
//! the shared session state. This is the message-passing replacement for
//! an interrupt-context completion handler: the engine side never blocks,
//! and everything here runs under the ordinary session-state mutex.
//!
//! The thread exits on an explicit shutdown message (session close) or
//! when every `EngineHandle` has been dropped; either way it marks the
//! session dead and wakes all blocked waiters so no caller sleeps forever.

use crate::config::AVSYNC_INTERVAL;
use crate::session::{DecoderState, Shared, State};
use bridge_dsp::{
    ControlCommand, EngineEvent, EngineStatus, HostPcmConfig, PcmBlock, PcmRefill, RoutingMode,
    SleepReason,
};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

pub(crate) fn spawn(
    shared: Arc<Shared>,
    events: Receiver<EngineEvent>,
    shutdown: Receiver<()>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("decode-dispatch".to_string())
        .spawn(move || run(&shared, &events, &shutdown))
        .expect("failed to spawn decode-dispatch thread")
}

fn run(shared: &Shared, events: &Receiver<EngineEvent>, shutdown: &Receiver<()>) {
    loop {
        crossbeam_channel::select! {
            recv(shutdown) -> _ => {
                debug!("dispatcher shutting down");
                break;
            }
            recv(events) -> msg => match msg {
                Ok(event) => handle_event(shared, event),
                Err(_) => {
                    warn!("engine event channel disconnected");
                    break;
                }
            },
        }
    }

    // No more events will ever arrive; nothing blocked may keep waiting.
    let mut st = shared.state.lock();
    st.alive = false;
    st.running = false;
    drop(st);
    shared.write_cv.notify_all();
    shared.read_cv.notify_all();
    shared.state_cv.notify_all();
}

fn handle_event(shared: &Shared, event: EngineEvent) {
    match event {
        EngineEvent::NeedsData => {
            let mut st = shared.state.lock();
            pump(shared, &mut st, true);
        }
        EngineEvent::PcmFilled(blocks) => pcm_filled(shared, blocks),
        EngineEvent::Status(status) => handle_status(shared, status),
        EngineEvent::FlushAck => flush_ack(shared),
        EngineEvent::Underrun => {
            debug!("decoder starved");
            shared.state.lock().drained = true;
            shared.write_cv.notify_all();
        }
    }
}

/// The output data pump, shared by the write path and the `NeedsData`
/// handler. With `engine_ready` the in-flight slot (if any) is recycled
/// first; then, if the engine wants data and a staged frame is waiting, it
/// goes out and its slot becomes the one in flight.
pub(crate) fn pump(shared: &Shared, st: &mut State, engine_ready: bool) {
    if !st.running {
        return;
    }
    if st.wflush {
        // Remember the demand; submission resumes once the flush settles.
        st.out.needed = true;
        return;
    }

    if engine_ready {
        st.out.needed = true;
        if st.out.recycle_acked() {
            debug!("output slot acknowledged");
            shared.write_cv.notify_all();
        }
    }

    if st.out.needed {
        if let Some(frame) = st.out.take_submission(shared.stream) {
            debug!(
                addr = frame.addr,
                len = frame.data.len(),
                meta = frame.meta_len,
                "submitting bitstream frame"
            );
            if let Err(e) = shared.channel.submit_compressed(frame) {
                error!(error = %e, "bitstream submission failed");
            }
            st.out.needed = false;
        }
    }
}

/// Ask the engine to fill the next PCM slot.
pub(crate) fn refresh(shared: &Shared, st: &mut State) {
    let Some(slot) = st.pcm.fill_slot() else {
        return;
    };
    let request = PcmRefill {
        addr: slot.addr(),
        len: slot.capacity(),
    };
    debug!(addr = request.addr, len = request.len, "requesting pcm refill");
    if let Err(e) = shared.channel.request_pcm_refill(request) {
        error!(error = %e, "pcm refill request failed");
    }
}

fn pcm_filled(shared: &Shared, blocks: Vec<PcmBlock>) {
    let mut st = shared.state.lock();
    if st.rflush {
        // Completions racing a flush are stale; the flush ack restarts
        // feedback cleanly.
        return;
    }
    if !st.pcm.is_configured() {
        warn!("pcm completion with no configured pool");
        return;
    }

    for block in &blocks {
        let (expected_addr, capacity) = {
            let Some(slot) = st.pcm.fill_slot() else { break };
            (slot.addr(), slot.capacity())
        };
        if expected_addr != block.addr {
            error!(
                expected = expected_addr,
                got = block.addr,
                "pcm completion address mismatch, dropping remainder"
            );
            break;
        }
        if block.data.len() > capacity {
            error!(
                len = block.data.len(),
                capacity, "pcm completion larger than slot, dropping remainder"
            );
            break;
        }
        let slot = st.pcm.accept_fill(&block.data);
        debug!(slot, len = block.data.len(), "pcm slot ready");
    }

    if st.pcm.fill_slot_is_free() {
        refresh(shared, &mut st);
    } else {
        debug!("reader cannot keep up, deferring refill");
        st.pcm.refresh_pending = true;
    }
    drop(st);
    shared.read_cv.notify_all();
}

fn flush_ack(shared: &Shared) {
    debug!("engine flush acknowledged");
    let mut st = shared.state.lock();
    st.wflush = false;
    st.rflush = false;
    if shared.mode.pcm_feedback() && st.pcm.is_configured() {
        refresh(shared, &mut st);
    }
    drop(st);
    shared.write_cv.notify_all();
    shared.read_cv.notify_all();
}

fn handle_status(shared: &Shared, status: EngineStatus) {
    match status {
        EngineStatus::Sleep(reason) => {
            let next = match reason {
                SleepReason::OutOfMemory | SleepReason::NoDecoder => DecoderState::Failure,
                SleepReason::None => DecoderState::Close,
                SleepReason::Other(code) => {
                    debug!(code, "decoder sleep with unhandled reason");
                    return;
                }
            };
            debug!(state = ?next, "decoder went to sleep");
            shared.state.lock().dec_state = next;
            shared.state_cv.notify_all();
        }
        EngineStatus::Init => {
            debug!("decoder status: init");
            if shared.mode.pcm_feedback() {
                send(
                    shared,
                    ControlCommand::RoutingMode(RoutingMode::FasterThanRealtime),
                );
            } else {
                let params = shared.state.lock().wma;
                send(shared, ControlCommand::CodecParams(params));
            }
        }
        EngineStatus::Config => debug!("decoder status: cfg"),
        EngineStatus::Play => {
            debug!("decoder status: play");
            let mut st = shared.state.lock();
            if shared.mode.pcm_feedback() {
                if st.pcm.is_configured() {
                    let cfg = HostPcmConfig {
                        max_buffers: st.pcm.buffer_count() as u8,
                        byte_swap: false,
                        feedback_interval: 1,
                    };
                    if let Err(e) = shared.channel.send_control(ControlCommand::HostPcmConfig(cfg))
                    {
                        error!(error = %e, "host pcm configuration failed");
                    }
                    refresh(shared, &mut st);
                } else {
                    warn!("pcm pool not configured, decoded audio will not reach the reader");
                }
            }
            st.dec_state = DecoderState::Success;
            drop(st);
            shared.state_cv.notify_all();
        }
        EngineStatus::Enabled => {
            debug!("audio postprocessor enabled");
            let (vol, eq_cmd) = {
                let mut st = shared.state.lock();
                st.out.needed = false;
                st.running = true;
                st.eq_needs_commit = false;
                (
                    st.vol_pan,
                    ControlCommand::Equalizer {
                        enable: st.eq_enable,
                        eq: st.eq.clone(),
                    },
                )
            };
            send(shared, ControlCommand::SelectDecoder { enable: true });
            send(shared, ControlCommand::VolumePan(vol));
            send(shared, eq_cmd);
            send(
                shared,
                ControlCommand::AvSync {
                    interval: AVSYNC_INTERVAL,
                },
            );
        }
        EngineStatus::Disabled => {
            debug!("audio postprocessor disabled");
            send(shared, ControlCommand::AvSync { interval: 0 });
            shared.state.lock().running = false;
        }
        EngineStatus::RoutingAck(mode) => {
            debug!(?mode, "routing acknowledged");
            let params = shared.state.lock().wma;
            send(shared, ControlCommand::CodecParams(params));
        }
    }
}

fn send(shared: &Shared, cmd: ControlCommand) {
    if let Err(e) = shared.channel.send_control(cmd) {
        error!(error = %e, "engine control command failed");
    }
}
