//! Static PGN definitions loaded into the registry at startup.
//!
//! Covers the navigation PGNs (GNSS position, system time, heading, rate
//! of turn, speed, wind, COG/SOG) with full field layouts, plus the
//! ISO/base protocol PGNs (address claim, requests, acknowledge, group
//! function, transport protocol), registered here only with their
//! framing metadata. Their payloads are decoded by dedicated types in
//! `crate::application` and `crate::pgns`, not through the generic field
//! codec, since their semantics are control-plane rather than
//! data-plane.

use crate::field::{FieldDef, FieldKind};
use crate::schema::registry::{PayloadLength, PgnDefinition, Registry};
use crate::error::SchemaError;

fn fixed(pgn: u32, name: &'static str, len: usize, fast_packet: bool, fields: Vec<FieldDef>) -> PgnDefinition {
    PgnDefinition {
        pgn,
        name,
        length: PayloadLength::Fixed(len),
        is_fast_packet: fast_packet,
        is_proprietary: false,
        manufacturer_id: None,
        fields,
        repeat_field_set: None,
    }
}

/// Builds and validates the standard registry. Panics only if the static
/// table below is internally inconsistent, which would be a programming
/// error caught immediately in tests, not a runtime condition.
pub fn standard_registry() -> Result<Registry, SchemaError> {
    let mut reg = Registry::new();

    // 126992: System Time
    reg.register(fixed(
        126992,
        "System Time",
        8,
        false,
        vec![
            FieldDef::new("sid", 0, FieldKind::Uint8),
            FieldDef::new("source", 1, FieldKind::Bits { bit_length: 4 }),
            FieldDef::new("date", 2, FieldKind::Uint16),
            FieldDef::new("time", 4, FieldKind::Uint32).with_scale(0.0001),
        ],
    ))?;

    // 126993: Heartbeat
    reg.register(fixed(
        126993,
        "Heartbeat",
        8,
        false,
        vec![
            FieldDef::new("update_rate_ms", 0, FieldKind::Uint16),
            FieldDef::new("sequence_counter", 2, FieldKind::Uint8),
            FieldDef::new("controller_state", 3, FieldKind::Bits { bit_length: 2 }),
        ],
    ))?;

    // 127250: Vessel Heading
    reg.register(fixed(
        127250,
        "Vessel Heading",
        8,
        false,
        vec![
            FieldDef::new("sid", 0, FieldKind::Uint8),
            FieldDef::new("heading", 1, FieldKind::Uint16).with_scale(0.0001),
            FieldDef::new("deviation", 3, FieldKind::Int16).with_scale(0.0001),
            FieldDef::new("variation", 5, FieldKind::Int16).with_scale(0.0001),
            FieldDef::new("reference", 7, FieldKind::Bits { bit_length: 2 }),
        ],
    ))?;

    // 127251: Rate of Turn
    reg.register(fixed(
        127251,
        "Rate of Turn",
        5,
        false,
        vec![
            FieldDef::new("sid", 0, FieldKind::Uint8),
            FieldDef::new("rate", 1, FieldKind::Int32).with_scale(3.125e-5),
        ],
    ))?;

    // 128259: Speed, Water Referenced
    reg.register(fixed(
        128259,
        "Speed",
        8,
        false,
        vec![
            FieldDef::new("sid", 0, FieldKind::Uint8),
            FieldDef::new("speed_water_referenced", 1, FieldKind::Uint16).with_scale(0.01),
            FieldDef::new("speed_ground_referenced", 3, FieldKind::Uint16).with_scale(0.01),
            FieldDef::new("speed_water_type", 5, FieldKind::Bits { bit_length: 4 }),
        ],
    ))?;

    // 129025: Position, Rapid Update
    reg.register(fixed(
        129025,
        "Position Rapid Update",
        8,
        false,
        vec![
            FieldDef::new("latitude", 0, FieldKind::Int32).with_scale(1e-7),
            FieldDef::new("longitude", 4, FieldKind::Int32).with_scale(1e-7),
        ],
    ))?;

    // 129026: COG & SOG, Rapid Update
    reg.register(fixed(
        129026,
        "COG SOG Rapid Update",
        8,
        false,
        vec![
            FieldDef::new("sid", 0, FieldKind::Uint8),
            FieldDef::new("cog_reference", 1, FieldKind::Bits { bit_length: 2 }),
            FieldDef::new("cog", 2, FieldKind::Uint16).with_scale(0.0001),
            FieldDef::new("sog", 4, FieldKind::Uint16).with_scale(0.01),
        ],
    ))?;

    // 129029: GNSS Position Data (fast packet; layout matches the
    // GnssPositionData convenience struct byte-for-byte).
    reg.register(fixed(
        129029,
        "GNSS Position Data",
        43,
        true,
        vec![
            FieldDef::new("sid", 0, FieldKind::Uint8),
            FieldDef::new("date", 1, FieldKind::Uint16),
            FieldDef::new("time", 3, FieldKind::Uint32).with_scale(0.0001),
            FieldDef::new("latitude", 7, FieldKind::Int64).with_scale(1e-16),
            FieldDef::new("longitude", 15, FieldKind::Int64).with_scale(1e-16),
            FieldDef::new("altitude", 23, FieldKind::Int64).with_scale(1e-6),
            FieldDef::new("gnss_type", 31, FieldKind::Bits { bit_length: 4 }),
            FieldDef::new("method", 31, FieldKind::Bits { bit_length: 4 }).with_bit_offset(4),
            FieldDef::new("integrity", 32, FieldKind::Bits { bit_length: 2 }),
            FieldDef::new("num_svs", 33, FieldKind::Uint8),
            FieldDef::new("hdop", 34, FieldKind::Int16).with_scale(0.01),
            FieldDef::new("pdop", 36, FieldKind::Int16).with_scale(0.01),
            FieldDef::new("geoidal_separation", 38, FieldKind::Int32).with_scale(0.01),
        ],
    ))?;

    // 130306: Wind Data
    reg.register(fixed(
        130306,
        "Wind Data",
        8,
        false,
        vec![
            FieldDef::new("sid", 0, FieldKind::Uint8),
            FieldDef::new("wind_speed", 1, FieldKind::Uint16).with_scale(0.01),
            FieldDef::new("wind_angle", 3, FieldKind::Uint16).with_scale(0.0001),
            FieldDef::new("reference", 5, FieldKind::Bits { bit_length: 3 }),
        ],
    ))?;

    // --- ISO / base protocol PGNs: framing metadata only. ---

    reg.register(fixed(59392, "ISO Acknowledgement", 8, false, vec![]))?;
    reg.register(fixed(59904, "ISO Request", 3, false, vec![]))?;
    reg.register(fixed(60160, "ISO Transport Protocol, Data Transfer", 8, false, vec![]))?;
    reg.register(fixed(60416, "ISO Transport Protocol, Connection Management", 8, false, vec![]))?;
    reg.register(fixed(60928, "ISO Address Claim", 8, false, vec![]))?;
    reg.register(fixed(65240, "ISO Commanded Address", 9, true, vec![]))?;
    reg.register(fixed(126208, "Group Function", 8, true, vec![]))?;
    reg.register(fixed(126464, "PGN List", 8, true, vec![]))?;
    reg.register(fixed(126996, "Product Information", 134, true, vec![]))?;
    reg.register(fixed(126998, "Configuration Information", 8, true, vec![]))?;

    Ok(reg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_without_schema_errors() {
        let reg = standard_registry().unwrap();
        assert!(reg.lookup(129029, 0).is_some());
        assert!(reg.lookup(60928, 0).is_some());
    }

    #[test]
    fn gnss_position_is_flagged_fast_packet() {
        let reg = standard_registry().unwrap();
        let def = reg.lookup(129029, 0).unwrap();
        assert!(def.is_fast_packet);
    }
}
