//! ISO-TP (J1939-21 Transport Protocol) BAM-only reassembly and
//! fragmentation.
//!
//! Scoped to BAM (Broadcast Announce Message): point-to-point RTS/CTS
//! control bytes are rejected rather than handled, since the local
//! application only ever broadcasts multi-frame configuration and
//! product-information messages.

use std::time::{Duration, Instant};

use crate::error::IsoTpError;

const BAM_CONTROL: u8 = 32;
const DATA_CHUNK_LEN: usize = 7;

struct Transaction {
    total_size: usize,
    nb_packets: u8,
    embedded_pgn: u32,
    data: Vec<u8>,
    received: Vec<bool>,
    started_at: Instant,
}

impl Transaction {
    fn timeout(&self) -> Duration {
        Duration::from_secs_f64(0.1 * self.nb_packets as f64)
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.started_at) > self.timeout()
    }

    fn received_count(&self) -> usize {
        self.received.iter().filter(|&&b| b).count()
    }
}

/// Decoded TP.CM BAM connection-management frame (PGN 60416).
#[derive(Debug, Clone, Copy)]
pub struct TpCmBam {
    pub total_size: u16,
    pub nb_packets: u8,
    pub embedded_pgn: u32,
}

impl TpCmBam {
    pub fn parse(payload: &[u8]) -> Result<Self, IsoTpError> {
        if payload.is_empty() {
            return Err(IsoTpError::Unsupported(0));
        }
        let control = payload[0];
        if control != BAM_CONTROL {
            return Err(IsoTpError::Unsupported(control));
        }
        let total_size = u16::from_le_bytes([payload[1], payload[2]]);
        let nb_packets = payload[3];
        let embedded_pgn = u32::from_le_bytes([payload[5], payload[6], payload[7], 0]);
        Ok(TpCmBam {
            total_size,
            nb_packets,
            embedded_pgn,
        })
    }
}

/// A completed reassembly: the embedded PGN's payload, ready to be
/// decoded like any other received message.
#[derive(Debug, Clone, PartialEq)]
pub struct ReassembledMessage {
    pub pgn: u32,
    pub payload: Vec<u8>,
}

/// Reassembles BAM sequences across all sources seen on one CAN
/// interface, one transaction per source at a time (a new TP.CM for a
/// source already in progress replaces the stale transaction).
#[derive(Default)]
pub struct IsoTpReassembler {
    transactions: std::collections::HashMap<u8, Transaction>,
}

impl IsoTpReassembler {
    pub fn new() -> Self {
        IsoTpReassembler::default()
    }

    pub fn start_transaction(&mut self, source: u8, cm: TpCmBam) {
        self.transactions.insert(
            source,
            Transaction {
                total_size: cm.total_size as usize,
                nb_packets: cm.nb_packets,
                embedded_pgn: cm.embedded_pgn,
                data: vec![0u8; cm.total_size as usize],
                received: vec![false; cm.nb_packets as usize],
                started_at: Instant::now(),
            },
        );
    }

    /// Feeds one TP.DT frame (`{seq_num, 7 data bytes}`). Returns the
    /// reassembled message once `nb_packets` frames have arrived.
    pub fn process_data_frame(
        &mut self,
        source: u8,
        frame: &[u8],
    ) -> Result<Option<ReassembledMessage>, IsoTpError> {
        if frame.is_empty() {
            return Ok(None);
        }
        let seq_num = frame[0];
        let txn = self
            .transactions
            .get_mut(&source)
            .ok_or(IsoTpError::NoTransaction { source, seq_num })?;

        if seq_num == 0 || seq_num as usize > txn.received.len() {
            return Ok(None);
        }
        let slot = (seq_num - 1) as usize;
        let offset = slot * DATA_CHUNK_LEN;
        if offset >= txn.total_size {
            txn.received[slot] = true;
        } else {
            let chunk_len = frame.len().saturating_sub(1).min(DATA_CHUNK_LEN).min(txn.total_size - offset);
            txn.data[offset..offset + chunk_len].copy_from_slice(&frame[1..1 + chunk_len]);
            txn.received[slot] = true;
        }

        if txn.received_count() == txn.received.len() {
            let txn = self.transactions.remove(&source).unwrap();
            return Ok(Some(ReassembledMessage {
                pgn: txn.embedded_pgn,
                payload: txn.data,
            }));
        }
        Ok(None)
    }

    /// Drops transactions whose timer (`0.1 * nb_packets` seconds) has
    /// expired without completion.
    pub fn sweep_expired(&mut self) {
        let now = Instant::now();
        self.transactions.retain(|_, t| !t.is_expired(now));
    }
}

/// Splits a payload into a TP.CM BAM frame followed by TP.DT fragments.
/// Broadcast-only: this application never negotiates point-to-point RTS/CTS.
pub fn split_into_bam_frames(embedded_pgn: u32, payload: &[u8]) -> (Vec<u8>, Vec<[u8; 8]>) {
    let nb_packets = payload.len().div_ceil(DATA_CHUNK_LEN) as u8;
    let mut cm = vec![BAM_CONTROL];
    cm.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    cm.push(nb_packets);
    cm.push(0xFF);
    cm.extend_from_slice(&embedded_pgn.to_le_bytes()[..3]);

    let mut data_frames = Vec::new();
    for (i, chunk) in payload.chunks(DATA_CHUNK_LEN).enumerate() {
        let mut frame = [0xFFu8; 8];
        frame[0] = (i + 1) as u8;
        frame[1..1 + chunk.len()].copy_from_slice(chunk);
        data_frames.push(frame);
    }
    (cm, data_frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_product_information_payload() {
        let payload: Vec<u8> = (0..134u8).map(|i| i.wrapping_mul(3)).collect();
        let (cm, data_frames) = split_into_bam_frames(126996, &payload);

        let mut reassembler = IsoTpReassembler::new();
        let parsed = TpCmBam::parse(&cm).unwrap();
        reassembler.start_transaction(5, parsed);

        let mut result = None;
        for frame in &data_frames {
            result = reassembler.process_data_frame(5, frame).unwrap();
        }
        let result = result.unwrap();
        assert_eq!(result.pgn, 126996);
        assert_eq!(result.payload, payload);
    }

    #[test]
    fn non_bam_control_byte_is_unsupported() {
        let frame = [16u8, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(TpCmBam::parse(&frame), Err(IsoTpError::Unsupported(16))));
    }

    #[test]
    fn data_frame_without_transaction_is_an_error() {
        let mut reassembler = IsoTpReassembler::new();
        let frame = [1u8, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            reassembler.process_data_frame(9, &frame),
            Err(IsoTpError::NoTransaction { source: 9, seq_num: 1 })
        ));
    }
}
