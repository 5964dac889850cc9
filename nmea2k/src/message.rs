//! Message envelope and the raw NMEA2000 message representation.
//!
//! A PGN, priority, source/destination pair, a timestamp and a payload,
//! with two derived flags (`is_fast_packet`, `is_iso_protocol`) computed
//! on demand from the PGN and payload length.

use std::fmt;
use std::time::SystemTime;

use crate::codec::DecodedPgn;

/// PGNs belonging to the ISO/NMEA base protocol (address claim, requests,
/// group functions, heartbeat, product/configuration info) rather than to
/// navigation data.
pub const ISO_PROTOCOL_PGNS: [u32; 9] = [
    59392, 59904, 60928, 65240, 126208, 126464, 126993, 126996, 126998,
];

/// A single NMEA2000 logical message: either freshly framed for send, or
/// reassembled from one or more CAN frames on receive.
#[derive(Debug, Clone, PartialEq)]
pub struct RawN2kMessage {
    pub pgn: u32,
    pub priority: u8,
    pub source: u8,
    pub destination: u8,
    pub timestamp: SystemTime,
    pub payload: Vec<u8>,
}

impl RawN2kMessage {
    pub fn new(pgn: u32, priority: u8, source: u8, destination: u8, payload: Vec<u8>) -> Self {
        RawN2kMessage {
            pgn,
            priority,
            source,
            destination,
            timestamp: SystemTime::now(),
            payload,
        }
    }

    /// A PGN must be sent/reassembled as Fast-Packet if it falls in either
    /// of the two traditional Fast-Packet PGN ranges, or if its payload
    /// exceeds a single CAN frame regardless of range.
    pub fn is_fast_packet(&self) -> bool {
        (0x10000..0x1F000).contains(&self.pgn)
            || self.pgn >= 0x1FF00
            || self.payload.len() > 8
    }

    pub fn is_iso_protocol(&self) -> bool {
        ISO_PROTOCOL_PGNS.contains(&self.pgn)
    }

    /// Reads the 11-bit manufacturer code from the first two payload bytes
    /// of a proprietary PGN. Caller is responsible for knowing the PGN is
    /// proprietary; this does not check.
    pub fn manufacturer_code(&self) -> Option<u16> {
        if self.payload.len() < 2 {
            return None;
        }
        let raw = u16::from_le_bytes([self.payload[0], self.payload[1]]);
        Some(raw & 0x07FF)
    }
}

impl fmt::Display for RawN2kMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "2K|{}|{:04X}|{}|{}|{}|{}",
            self.pgn,
            self.pgn,
            self.priority,
            self.source,
            self.destination,
            hex_string(&self.payload)
        )
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A raw NMEA-0183 sentence, kept as text alongside the talker/formatter
/// split the parser already extracted.
#[derive(Debug, Clone, PartialEq)]
pub struct RawNmea0183Sentence {
    pub talker: [u8; 2],
    pub formatter: [u8; 3],
    pub fields: Vec<String>,
    pub raw: String,
}

/// The tagged union every coupler/publisher passes around: a raw
/// NMEA-0183 sentence, a raw (not yet decoded) NMEA2000 message, or a
/// message that has been decoded against the schema registry.
#[derive(Debug, Clone)]
pub enum MessageEnvelope {
    Nmea0183(RawNmea0183Sentence),
    Nmea2000Raw(RawN2kMessage),
    Nmea2000Decoded(DecodedPgn),
}

impl MessageEnvelope {
    pub fn source_pgn(&self) -> Option<u32> {
        match self {
            MessageEnvelope::Nmea0183(_) => None,
            MessageEnvelope::Nmea2000Raw(m) => Some(m.pgn),
            MessageEnvelope::Nmea2000Decoded(d) => Some(d.pgn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_fast_packet_by_pgn_range() {
        let gnss = RawN2kMessage::new(129029, 3, 5, 0xFF, vec![0; 43]);
        assert!(gnss.is_fast_packet());

        let eec1 = RawN2kMessage::new(61444, 3, 0, 0xFF, vec![0; 8]);
        assert!(!eec1.is_fast_packet());
    }

    #[test]
    fn oversized_payload_forces_fast_packet_outside_traditional_ranges() {
        let msg = RawN2kMessage::new(65280, 6, 1, 0xFF, vec![0; 9]);
        assert!(msg.is_fast_packet());
    }

    #[test]
    fn iso_protocol_pgns_are_flagged() {
        let claim = RawN2kMessage::new(60928, 6, 1, 0xFF, vec![0; 8]);
        assert!(claim.is_iso_protocol());
        let gnss = RawN2kMessage::new(129029, 3, 5, 0xFF, vec![0; 43]);
        assert!(!gnss.is_iso_protocol());
    }
}
