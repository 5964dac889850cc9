//! J1939-21 Fast-Packet reassembly and fragmentation.
//!
//! Handles are keyed by `(pgn, source_address, sequence_id)` rather than
//! just `(pgn, source)`: the protocol allows two concurrent sequences for
//! the same PGN from the same source, distinguished only by the 3-bit
//! sequence id carried in the first frame of each.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::FastPacketError;

const FRAME_PAYLOAD_LEN: usize = 8;
const FIRST_FRAME_DATA_LEN: usize = 6;
const CONT_FRAME_DATA_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceKey {
    pub pgn: u32,
    pub source_address: u8,
    pub sequence_id: u8,
}

struct Handle {
    total_length: usize,
    expected_frames: usize,
    data: Vec<u8>,
    seen: Vec<bool>,
    started_at: Instant,
}

fn expected_frame_count(total_length: usize) -> usize {
    if total_length <= FIRST_FRAME_DATA_LEN {
        1
    } else {
        1 + (total_length - FIRST_FRAME_DATA_LEN).div_ceil(CONT_FRAME_DATA_LEN)
    }
}

impl Handle {
    fn new(total_length: usize) -> Self {
        let expected_frames = expected_frame_count(total_length);
        Handle {
            total_length,
            expected_frames,
            data: vec![0u8; total_length],
            seen: vec![false; expected_frames],
            started_at: Instant::now(),
        }
    }

    fn is_complete(&self) -> bool {
        self.seen.iter().all(|&s| s)
    }

    fn expiry(&self) -> Duration {
        Duration::from_secs_f64(0.01 * self.expected_frames as f64)
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.started_at) > self.expiry()
    }
}

/// Reassembles Fast-Packet sequences across all (pgn, source, sequence)
/// keys seen on one CAN interface.
#[derive(Default)]
pub struct FastPacketReassembler {
    handles: HashMap<SequenceKey, Handle>,
}

impl FastPacketReassembler {
    pub fn new() -> Self {
        FastPacketReassembler::default()
    }

    /// Feeds one raw 8-byte CAN frame payload. Returns the completed
    /// payload once the final frame of a sequence arrives.
    pub fn process_frame(
        &mut self,
        pgn: u32,
        source_address: u8,
        frame: &[u8],
    ) -> Result<Option<Vec<u8>>, FastPacketError> {
        if frame.is_empty() {
            return Ok(None);
        }
        let control = frame[0];
        let sequence_id = (control >> 5) & 0x07;
        let frame_index = control & 0x1F;
        let key = SequenceKey {
            pgn,
            source_address,
            sequence_id,
        };

        if frame_index == 0 {
            if frame.len() < 2 {
                return Ok(None);
            }
            let total_length = frame[1] as usize;
            let mut handle = Handle::new(total_length);
            let available = frame.len().saturating_sub(2).min(FIRST_FRAME_DATA_LEN).min(total_length);
            handle.data[..available].copy_from_slice(&frame[2..2 + available]);
            handle.seen[0] = true;
            self.handles.insert(key, handle);
            return Ok(self.take_if_complete(&key));
        }

        let handle = match self.handles.get_mut(&key) {
            Some(h) => h,
            None => {
                return Err(FastPacketError::MissingLeadingFrame {
                    pgn,
                    source: source_address,
                    sequence: sequence_id,
                    index: frame_index,
                })
            }
        };

        let slot = frame_index as usize;
        if slot >= handle.seen.len() {
            return Ok(None);
        }
        if handle.seen[slot] {
            return Err(FastPacketError::DuplicateFrameIndex {
                pgn,
                source: source_address,
                sequence: sequence_id,
                index: frame_index,
            });
        }

        let offset = 1 + (slot - 1) * CONT_FRAME_DATA_LEN;
        let remaining = handle.total_length.saturating_sub(offset);
        let available = frame.len().saturating_sub(1).min(CONT_FRAME_DATA_LEN).min(remaining);
        if available > 0 {
            handle.data[offset..offset + available].copy_from_slice(&frame[1..1 + available]);
        }
        handle.seen[slot] = true;

        Ok(self.take_if_complete(&key))
    }

    fn take_if_complete(&mut self, key: &SequenceKey) -> Option<Vec<u8>> {
        let complete = self.handles.get(key).map(Handle::is_complete).unwrap_or(false);
        if complete {
            self.handles.remove(key).map(|h| h.data)
        } else {
            None
        }
    }

    /// Drops handles that have aged past `0.01 * expected_frames` seconds
    /// with completion still pending. Called periodically by the owning
    /// CAN interface thread.
    pub fn sweep_expired(&mut self) {
        let now = Instant::now();
        self.handles.retain(|_, h| !h.is_expired(now));
    }

    pub fn pending_count(&self) -> usize {
        self.handles.len()
    }

    /// Whether a reassembly is already in progress for this exact
    /// `(pgn, source, sequence_id)` key, where `sequence_id` is extracted
    /// from a frame's control byte the same way `process_frame` does.
    pub fn has_active(&self, pgn: u32, source_address: u8, sequence_id: u8) -> bool {
        self.handles.contains_key(&SequenceKey {
            pgn,
            source_address,
            sequence_id,
        })
    }
}

/// Splits a payload into Fast-Packet frames for send, allocating
/// `sequence_id` from the caller.
pub fn split_into_frames(payload: &[u8], sequence_id: u8) -> Vec<[u8; FRAME_PAYLOAD_LEN]> {
    let seq = (sequence_id & 0x07) << 5;
    let mut frames = Vec::new();

    let mut first = [0xFFu8; FRAME_PAYLOAD_LEN];
    first[0] = seq;
    first[1] = payload.len() as u8;
    let first_len = payload.len().min(FIRST_FRAME_DATA_LEN);
    first[2..2 + first_len].copy_from_slice(&payload[..first_len]);
    frames.push(first);

    let mut offset = first_len;
    let mut index: u8 = 1;
    while offset < payload.len() {
        let mut frame = [0xFFu8; FRAME_PAYLOAD_LEN];
        frame[0] = seq | index;
        let chunk_len = (payload.len() - offset).min(CONT_FRAME_DATA_LEN);
        frame[1..1 + chunk_len].copy_from_slice(&payload[offset..offset + chunk_len]);
        frames.push(frame);
        offset += chunk_len;
        index += 1;
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_in_order(payload: &[u8]) -> Vec<u8> {
        let frames = split_into_frames(payload, 3);
        let mut reassembler = FastPacketReassembler::new();
        let mut result = None;
        for frame in &frames {
            result = reassembler.process_frame(129540, 7, frame).unwrap();
        }
        result.unwrap()
    }

    #[test]
    fn roundtrips_forty_byte_payload() {
        let payload: Vec<u8> = (0..40u8).collect();
        let result = feed_in_order(&payload);
        assert_eq!(result, payload);
    }

    #[test]
    fn reassembles_out_of_order_frames() {
        let payload: Vec<u8> = (0..20u8).collect();
        let frames = split_into_frames(&payload, 1);
        let mut reassembler = FastPacketReassembler::new();

        // Feed last frame first, then the rest in reverse.
        let mut result = None;
        for frame in frames.iter().rev() {
            result = reassembler.process_frame(129029, 2, frame).unwrap();
        }
        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn duplicate_frame_index_is_an_error() {
        let payload: Vec<u8> = (0..20u8).collect();
        let frames = split_into_frames(&payload, 0);
        let mut reassembler = FastPacketReassembler::new();
        reassembler.process_frame(1, 1, &frames[0]).unwrap();
        reassembler.process_frame(1, 1, &frames[1]).unwrap();
        let err = reassembler.process_frame(1, 1, &frames[1]).unwrap_err();
        assert!(matches!(err, FastPacketError::DuplicateFrameIndex { .. }));
    }

    #[test]
    fn continuation_without_leading_frame_is_an_error() {
        let mut reassembler = FastPacketReassembler::new();
        let frame = [0x21u8, 1, 2, 3, 4, 5, 6, 7];
        let err = reassembler.process_frame(1, 1, &frame).unwrap_err();
        assert!(matches!(err, FastPacketError::MissingLeadingFrame { .. }));
    }

    #[test]
    fn distinguishes_concurrent_sequences_by_sequence_id() {
        let a: Vec<u8> = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let b: Vec<u8> = vec![11, 12, 13, 14, 15, 16, 17, 18, 19, 20];
        let frames_a = split_into_frames(&a, 0);
        let frames_b = split_into_frames(&b, 1);

        let mut reassembler = FastPacketReassembler::new();
        reassembler.process_frame(129540, 9, &frames_a[0]).unwrap();
        reassembler.process_frame(129540, 9, &frames_b[0]).unwrap();
        let res_a = reassembler.process_frame(129540, 9, &frames_a[1]).unwrap();
        let res_b = reassembler.process_frame(129540, 9, &frames_b[1]).unwrap();
        assert_eq!(res_a.unwrap(), a);
        assert_eq!(res_b.unwrap(), b);
    }
}
