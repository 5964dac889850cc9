//! Error kinds for the protocol core.
//!
//! Covers schema loading, field decoding, Fast-Packet and ISO-TP
//! reassembly, and unknown PGNs. Coupler/publisher lifecycle errors live in
//! the `nmea_router` binary crate next to the types that raise them.

use thiserror::Error;

/// Fatal at startup: the PGN/enum/manufacturer definition source is
/// internally inconsistent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("duplicate PGN definition for pgn={pgn} manufacturer={manufacturer_id}")]
    DuplicatePgn { pgn: u32, manufacturer_id: u16 },

    #[error("manufacturer code {0} referenced by a proprietary PGN is not registered")]
    UnknownManufacturer(u16),

    #[error("field '{field}' of pgn {pgn} references undefined enum '{enum_name}'")]
    UndefinedEnum {
        pgn: u32,
        field: &'static str,
        enum_name: &'static str,
    },

    #[error("manufacturer code {0} registered twice")]
    DuplicateManufacturer(u16),

    #[error("field '{field}' of pgn {pgn} overruns its declared fixed length")]
    FieldOverrunsPayload { pgn: u32, field: &'static str },
}

/// Logged and dropped, never fatal: malformed payload for an otherwise
/// known PGN.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload of {actual} bytes shorter than the {expected} bytes pgn {pgn} declares")]
    PayloadTooShort {
        pgn: u32,
        expected: usize,
        actual: usize,
    },

    #[error("enum field '{field}' of pgn {pgn} has unknown raw value {raw}")]
    UnknownEnumValue { pgn: u32, field: &'static str, raw: u64 },

    #[error("variable-length string control byte {0} != 1")]
    BadVariableStringControlByte(u8),

    #[error("bitfield group spans {declared_bytes} bytes but sub-fields need {needed_bytes}")]
    BitFieldGroupOverflow {
        declared_bytes: usize,
        needed_bytes: usize,
    },
}

/// Fast-Packet reassembly faults. Logged, partial sequence discarded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FastPacketError {
    #[error("duplicate frame index {index} for pgn={pgn} source={source} sequence={sequence}")]
    DuplicateFrameIndex {
        pgn: u32,
        source: u8,
        sequence: u8,
        index: u8,
    },

    #[error("frame index {index} arrived with no leading frame for pgn={pgn} source={source} sequence={sequence}")]
    MissingLeadingFrame {
        pgn: u32,
        source: u8,
        sequence: u8,
        index: u8,
    },
}

/// ISO-TP reassembly faults. Logged, transaction discarded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IsoTpError {
    #[error("TP.CM control byte {0} is not BAM (32); point-to-point RTS/CTS is unsupported")]
    Unsupported(u8),

    #[error("reassembly for source {0} timed out before all packets arrived")]
    Timeout(u8),

    #[error("data frame sequence number {seq_num} from source {source} has no matching BAM transaction")]
    NoTransaction { source: u8, seq_num: u8 },
}

/// A PGN absent from the registry. Non-fatal: ISO-protocol PGNs are logged
/// as errors, everything else passes through as opaque raw data.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("pgn {0} is not present in the schema registry")]
pub struct UnknownPgn(pub u32);

/// CAN interface read/write faults.
#[derive(Debug, Error)]
pub enum CanError {
    #[error("failed to open CAN interface '{0}': {1}")]
    OpenFailed(String, std::io::Error),

    #[error("CAN read error: {0}")]
    ReadError(std::io::Error),

    #[error("CAN write error: {0}")]
    WriteError(std::io::Error),

    #[error("20 consecutive write-queue-full events on '{0}'")]
    WriteQueueExhausted(String),
}
