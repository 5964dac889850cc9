//! CAN arbitration ID construction and decomposition.
//!
//! Decomposes a 29-bit extended CAN identifier into priority, PGN and
//! source/destination address, classifying PDU1 (addressable) against
//! PDU2 (broadcast-only) PGNs by the PDU format byte.

use std::fmt;

/// Parsed 29-bit extended CAN arbitration ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbitrationId {
    pub priority: u8,
    pub pgn: u32,
    pub source_address: u8,
    /// Only meaningful for PDU1 (addressed) PGNs; 0xFF (broadcast) for PDU2.
    pub destination_address: u8,
}

/// PDU1 frames carry a destination address in the PS byte (PF < 240);
/// PDU2 frames are broadcast-only, PS extends the PGN (PF >= 240).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduFormat {
    Pdu1,
    Pdu2,
}

impl ArbitrationId {
    /// `pgn` is the 18-bit logical parameter group number, without PS
    /// folded in for PDU1 addressed PGNs (callers pass the base PGN and
    /// the destination separately).
    pub fn new(priority: u8, pgn: u32, source_address: u8, destination_address: u8) -> Self {
        ArbitrationId {
            priority,
            pgn,
            source_address,
            destination_address,
        }
    }

    fn pdu_format_byte(&self) -> u32 {
        (self.pgn >> 8) & 0xFF
    }

    pub fn pdu_format(&self) -> PduFormat {
        if self.pdu_format_byte() >= 240 {
            PduFormat::Pdu2
        } else {
            PduFormat::Pdu1
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self.pdu_format(), PduFormat::Pdu2) || self.destination_address == 0xFF
    }

    /// Packs into the 29-bit value placed in a CAN extended frame ID.
    pub fn to_can_id(&self) -> u32 {
        let dp = (self.pgn >> 16) & 0x01;
        let pf = self.pdu_format_byte();
        let ps = if pf >= 240 {
            self.pgn & 0xFF
        } else {
            self.destination_address as u32
        };
        ((self.priority as u32) << 26) | (dp << 24) | (pf << 16) | (ps << 8) | (self.source_address as u32)
    }

    /// Splits a 29-bit extended CAN ID back into its components.
    pub fn from_can_id(can_id: u32) -> Self {
        let priority = ((can_id >> 26) & 0x07) as u8;
        let dp = (can_id >> 24) & 0x01;
        let pf = (can_id >> 16) & 0xFF;
        let ps = (can_id >> 8) & 0xFF;
        let source_address = (can_id & 0xFF) as u8;

        let (pgn, destination_address) = if pf >= 240 {
            ((dp << 16) | (pf << 8) | ps, 0xFF)
        } else {
            ((dp << 16) | (pf << 8), ps as u8)
        };

        ArbitrationId {
            priority,
            pgn,
            source_address,
            destination_address,
        }
    }
}

impl fmt::Display for ArbitrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pgn={} pri={} src={} dst={}",
            self.pgn, self.priority, self.source_address, self.destination_address
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_pdu2_roundtrip() {
        // EEC1, priority 3, source 0x00, PDU2 broadcast.
        let id = ArbitrationId::new(3, 61444, 0x00, 0xFF);
        let can_id = id.to_can_id();
        assert_eq!(can_id, 0x0CF00400);
        assert_eq!(ArbitrationId::from_can_id(can_id), id);
    }

    #[test]
    fn addressed_pdu1_roundtrip() {
        // ISO request (59904) is PDU1, destination matters.
        let id = ArbitrationId::new(6, 59904, 0x22, 0xFE);
        let can_id = id.to_can_id();
        let back = ArbitrationId::from_can_id(can_id);
        assert_eq!(back, id);
        assert_eq!(back.pdu_format(), PduFormat::Pdu1);
    }

    #[test]
    fn pdu2_is_always_broadcast() {
        let id = ArbitrationId::new(6, 129029, 0x05, 0xFF);
        assert_eq!(id.pdu_format(), PduFormat::Pdu2);
        assert!(id.is_broadcast());
    }
}
