//! The CAN interface: binds a SocketCAN channel, decomposes/composes
//! 29-bit extended arbitration IDs, and runs the read/write worker pair.
//!
//! Builds on the `socketcan` crate's blocking socket API, wrapped in a
//! struct that owns both read and write directions instead of one inline
//! loop, and gates non-ISO writes on an address-claimed signal.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket};
use tracing::{debug, error, warn};

use crate::arbitration::ArbitrationId;
use crate::error::CanError;
use crate::fastpacket::FastPacketReassembler;
use crate::isotp::{IsoTpReassembler, TpCmBam};
use crate::message::RawN2kMessage;

const MIN_FRAME_SPACING: Duration = Duration::from_millis(5);
const WRITE_QUEUE_FULL_LIMIT: u32 = 20;
const READ_RETRY_DELAY: Duration = Duration::from_millis(500);

const PGN_TP_DT: u32 = 60160;
const PGN_TP_CM: u32 = 60416;

/// A frame queued for transmission. ISO-protocol PGNs bypass the
/// address-claimed gate: they must go out even before this node has an
/// address of its own.
pub struct OutgoingFrame {
    pub arbitration_id: ArbitrationId,
    pub data: Vec<u8>,
    pub is_iso_protocol: bool,
}

/// Signals the write worker that the local application has completed
/// address claim and may send non-ISO traffic.
#[derive(Clone, Default)]
pub struct AddressClaimedGate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl AddressClaimedGate {
    pub fn new() -> Self {
        AddressClaimedGate::default()
    }

    pub fn set_claimed(&self, claimed: bool) {
        let (lock, cvar) = &*self.inner;
        let mut guard = lock.lock().unwrap();
        *guard = claimed;
        cvar.notify_all();
    }

    pub fn wait_until_claimed(&self) {
        let (lock, cvar) = &*self.inner;
        let mut guard = lock.lock().unwrap();
        while !*guard {
            guard = cvar.wait(guard).unwrap();
        }
    }

    pub fn is_claimed(&self) -> bool {
        *self.inner.0.lock().unwrap()
    }
}

/// Local addresses this node answers to; populated by the CAN application
/// as the local application claims and potentially changes address.
/// Mutated only by that application state machine.
#[derive(Clone, Default)]
pub struct LocalAddressSet {
    inner: Arc<Mutex<HashSet<u8>>>,
}

impl LocalAddressSet {
    pub fn new() -> Self {
        LocalAddressSet::default()
    }

    pub fn insert(&self, address: u8) {
        self.inner.lock().unwrap().insert(address);
    }

    pub fn remove(&self, address: u8) {
        self.inner.lock().unwrap().remove(&address);
    }

    pub fn contains(&self, address: u8) -> bool {
        self.inner.lock().unwrap().contains(&address)
    }
}

/// A decomposed incoming frame, ready for fast-packet, ISO-TP, or
/// single-frame dispatch.
pub struct DecodedFrame {
    pub arbitration_id: ArbitrationId,
    pub data: Vec<u8>,
}

/// Binds one SocketCAN channel and exposes blocking read/write primitives.
/// The coupler layer wraps these in its own worker threads; this type does
/// not spawn anything itself, so it stays testable without a real bus.
pub struct CanInterface {
    channel: String,
    socket: CanSocket,
}

impl CanInterface {
    pub fn open(channel: &str) -> Result<Self, CanError> {
        let socket = CanSocket::open(channel).map_err(|e| CanError::OpenFailed(channel.to_string(), e))?;
        Ok(CanInterface {
            channel: channel.to_string(),
            socket,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Blocks for one frame. A read error here is retried by the caller
    /// after `read_retry_delay()`.
    pub fn read_frame(&self) -> Result<DecodedFrame, CanError> {
        let frame = self.socket.read_frame().map_err(CanError::ReadError)?;
        let raw_id = match frame.can_id() {
            id => id.as_raw(),
        };
        let arbitration_id = ArbitrationId::from_can_id(raw_id);
        Ok(DecodedFrame {
            arbitration_id,
            data: frame.data().to_vec(),
        })
    }

    pub fn write_frame(&self, arbitration_id: ArbitrationId, data: &[u8]) -> Result<(), CanError> {
        let id = ExtendedId::new(arbitration_id.to_can_id()).ok_or_else(|| {
            CanError::WriteError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "arbitration id does not fit in 29 bits",
            ))
        })?;
        let frame = CanFrame::new(id, data).ok_or_else(|| {
            CanError::WriteError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "CAN payload exceeds 8 bytes",
            ))
        })?;
        self.socket.write_frame(&frame).map_err(CanError::WriteError)
    }

    pub fn read_retry_delay() -> Duration {
        READ_RETRY_DELAY
    }
}

/// Dispatches one decoded frame through Fast-Packet / ISO-TP reassembly as
/// needed.
pub struct FrameDispatcher {
    fast_packet: FastPacketReassembler,
    iso_tp: IsoTpReassembler,
}

impl Default for FrameDispatcher {
    fn default() -> Self {
        FrameDispatcher {
            fast_packet: FastPacketReassembler::new(),
            iso_tp: IsoTpReassembler::new(),
        }
    }
}

impl FrameDispatcher {
    pub fn new() -> Self {
        FrameDispatcher::default()
    }

    /// `is_classified_fast_packet` lets the caller consult the schema
    /// registry for PGNs outside the traditional Fast-Packet ranges.
    pub fn dispatch(
        &mut self,
        frame: &DecodedFrame,
        is_classified_fast_packet: impl FnOnce(u32) -> bool,
    ) -> Result<Option<RawN2kMessage>, crate::error::FastPacketError> {
        let id = frame.arbitration_id;

        if id.pgn == PGN_TP_CM {
            if let Ok(cm) = TpCmBam::parse(&frame.data) {
                self.iso_tp.start_transaction(id.source_address, cm);
            }
            return Ok(None);
        }

        if id.pgn == PGN_TP_DT {
            match self.iso_tp.process_data_frame(id.source_address, &frame.data) {
                Ok(Some(reassembled)) => {
                    return Ok(Some(RawN2kMessage::new(
                        reassembled.pgn,
                        id.priority,
                        id.source_address,
                        id.destination_address,
                        reassembled.payload,
                    )))
                }
                Ok(None) => return Ok(None),
                Err(e) => {
                    warn!("ISO-TP reassembly error: {e}");
                    return Ok(None);
                }
            }
        }

        let sequence_id = frame.data.first().map(|b| (b >> 5) & 0x07).unwrap_or(0);
        let needs_fast_packet = self.fast_packet.has_active(id.pgn, id.source_address, sequence_id)
            || is_classified_fast_packet(id.pgn);
        if needs_fast_packet || frame.data.len() > 8 {
            let payload = self
                .fast_packet
                .process_frame(id.pgn, id.source_address, &frame.data)?;
            return Ok(payload.map(|p| {
                RawN2kMessage::new(id.pgn, id.priority, id.source_address, id.destination_address, p)
            }));
        }

        Ok(Some(RawN2kMessage::new(
            id.pgn,
            id.priority,
            id.source_address,
            id.destination_address,
            frame.data.clone(),
        )))
    }

    pub fn sweep_expired(&mut self) {
        self.fast_packet.sweep_expired();
        self.iso_tp.sweep_expired();
    }
}

/// Runs the write worker loop: dequeues frames, paces them at
/// `MIN_FRAME_SPACING`, gates non-ISO traffic on address claim, and
/// escalates after `WRITE_QUEUE_FULL_LIMIT` consecutive full-queue events
/// (tracked by the caller that owns the bounded channel; this loop only
/// sees what arrives).
pub fn spawn_write_worker(
    interface: Arc<CanInterface>,
    rx: Receiver<OutgoingFrame>,
    gate: AddressClaimedGate,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("can-write-{}", interface.channel()))
        .spawn(move || {
            let mut last_sent = Instant::now() - MIN_FRAME_SPACING;
            loop {
                let frame = match rx.recv() {
                    Ok(f) => f,
                    Err(_) => break,
                };
                if !frame.is_iso_protocol {
                    gate.wait_until_claimed();
                }
                let elapsed = last_sent.elapsed();
                if elapsed < MIN_FRAME_SPACING {
                    std::thread::sleep(MIN_FRAME_SPACING - elapsed);
                }
                if let Err(e) = interface.write_frame(frame.arbitration_id, &frame.data) {
                    error!("CAN write error on '{}': {e}", interface.channel());
                }
                last_sent = Instant::now();
            }
            debug!("write worker for '{}' stopped", interface.channel());
        })
        .expect("failed to spawn CAN write worker thread")
}

/// Runs the read worker loop: reads frames, retries after
/// `READ_RETRY_DELAY` on error, and forwards decoded frames to `on_frame`.
pub fn spawn_read_worker(
    interface: Arc<CanInterface>,
    stop: Arc<AtomicBool>,
    tx: Sender<DecodedFrame>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("can-read-{}", interface.channel()))
        .spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                match interface.read_frame() {
                    Ok(frame) => {
                        if tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("CAN read error on '{}': {e}, retrying", interface.channel());
                        std::thread::sleep(CanInterface::read_retry_delay());
                    }
                }
            }
            debug!("read worker for '{}' stopped", interface.channel());
        })
        .expect("failed to spawn CAN read worker thread")
}

/// Drains `rx` with a 1-second poll so the caller can observe a stop flag.
pub fn recv_with_poll<T>(rx: &Receiver<T>, stop: &AtomicBool) -> Option<T> {
    loop {
        if stop.load(Ordering::Relaxed) {
            return None;
        }
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(v) => return Some(v),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}

/// Consecutive write-queue-full counter, escalating to a fatal condition.
#[derive(Default)]
pub struct WriteQueueFullCounter(AtomicU32);

impl WriteQueueFullCounter {
    pub fn record_full(&self, channel: &str) -> Result<(), CanError> {
        let count = self.0.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= WRITE_QUEUE_FULL_LIMIT {
            return Err(CanError::WriteQueueExhausted(channel.to_string()));
        }
        Ok(())
    }

    pub fn record_success(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatcher_passes_through_single_frame_pgn() {
        let mut dispatcher = FrameDispatcher::new();
        let frame = DecodedFrame {
            arbitration_id: ArbitrationId::new(3, 61444, 0, 0xFF),
            data: vec![1, 2, 3, 4, 5, 6, 7, 8],
        };
        let result = dispatcher.dispatch(&frame, |_| false).unwrap();
        assert!(result.is_some());
        assert_eq!(result.unwrap().pgn, 61444);
    }

    #[test]
    fn dispatcher_reassembles_classified_fast_packet() {
        let mut dispatcher = FrameDispatcher::new();
        let payload: Vec<u8> = (0..20u8).collect();
        let frames = crate::fastpacket::split_into_frames(&payload, 2);

        let mut result = None;
        for frame_data in &frames {
            let frame = DecodedFrame {
                arbitration_id: ArbitrationId::new(6, 129540, 3, 0xFF),
                data: frame_data.to_vec(),
            };
            result = dispatcher.dispatch(&frame, |_| true).unwrap();
        }
        assert_eq!(result.unwrap().payload, payload);
    }

    #[test]
    fn unrelated_single_frame_pgn_passes_through_during_another_sequences_reassembly() {
        let mut dispatcher = FrameDispatcher::new();
        // Start (but don't finish) a Fast-Packet sequence for pgn 129540 from source 3.
        let payload: Vec<u8> = (0..20u8).collect();
        let frames = crate::fastpacket::split_into_frames(&payload, 2);
        let first = DecodedFrame {
            arbitration_id: ArbitrationId::new(6, 129540, 3, 0xFF),
            data: frames[0].to_vec(),
        };
        assert!(dispatcher.dispatch(&first, |_| true).unwrap().is_none());

        // An unrelated, non-fast-packet-classified single frame from a different
        // source whose first byte's low bits happen to be nonzero must still pass
        // through untouched rather than being misrouted into reassembly.
        let unrelated = DecodedFrame {
            arbitration_id: ArbitrationId::new(3, 61444, 9, 0xFF),
            data: vec![0x21, 2, 3, 4, 5, 6, 7, 8],
        };
        let result = dispatcher.dispatch(&unrelated, |_| false).unwrap();
        assert_eq!(result.unwrap().pgn, 61444);
    }

    #[test]
    fn write_queue_full_counter_escalates_after_limit() {
        let counter = WriteQueueFullCounter::default();
        for _ in 0..19 {
            counter.record_full("can0").unwrap();
        }
        assert!(counter.record_full("can0").is_err());
    }

    #[test]
    fn write_queue_full_counter_resets_on_success() {
        let counter = WriteQueueFullCounter::default();
        counter.record_full("can0").unwrap();
        counter.record_success();
        for _ in 0..19 {
            counter.record_full("can0").unwrap();
        }
        assert!(counter.record_full("can0").is_err());
    }

    #[test]
    fn address_claimed_gate_blocks_until_set() {
        let gate = AddressClaimedGate::new();
        assert!(!gate.is_claimed());
        gate.set_claimed(true);
        gate.wait_until_claimed();
        assert!(gate.is_claimed());
    }
}
