//! Generic schema-driven decoding: turns a raw payload plus a
//! `PgnDefinition` into a `DecodedPgn` map of named values, without a
//! PGN-specific struct. The typed convenience structs under `crate::pgns`
//! wrap this for the well-known navigation PGNs; this path exists so any
//! PGN present in the registry, including ones with no dedicated struct,
//! can still be decoded and logged.

use std::collections::HashMap;
use std::fmt;

use crate::error::DecodeError;
use crate::schema::registry::{PayloadLength, PgnDefinition};

/// One decoded field's value. `Unavailable` distinguishes "present but
/// marked not-available on the wire" from a field that was never decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Numeric(f64),
    Raw(u64),
    Text(String),
    Unavailable,
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Numeric(v) => write!(f, "{v}"),
            FieldValue::Raw(v) => write!(f, "{v}"),
            FieldValue::Text(s) => write!(f, "{s}"),
            FieldValue::Unavailable => write!(f, "n/a"),
        }
    }
}

/// A PGN decoded through the generic registry-driven path.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPgn {
    pub pgn: u32,
    pub name: &'static str,
    pub fields: HashMap<&'static str, FieldValue>,
    /// One map per record of a repeated field set, in payload order.
    pub repeated: Vec<HashMap<&'static str, FieldValue>>,
}

impl fmt::Display for DecodedPgn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}):", self.name, self.pgn)?;
        let mut keys: Vec<_> = self.fields.keys().collect();
        keys.sort();
        for key in keys {
            write!(f, " {key}={}", self.fields[key])?;
        }
        Ok(())
    }
}

/// Bitfield-group fields (enum/bits) decode through `decode_raw`; every
/// other kind goes through `decode`, which applies scale/offset and the
/// not-available convention.
fn is_bits_or_enum(field: &crate::field::FieldDef) -> bool {
    matches!(field.kind, crate::field::FieldKind::Bits { .. })
}

pub fn decode(def: &PgnDefinition, payload: &[u8]) -> Result<DecodedPgn, DecodeError> {
    if let PayloadLength::Fixed(expected) = def.length {
        if payload.len() < expected {
            return Err(DecodeError::PayloadTooShort {
                pgn: def.pgn,
                expected,
                actual: payload.len(),
            });
        }
    }

    let mut fields = HashMap::with_capacity(def.fields.len());
    for field in &def.fields {
        let value = if is_bits_or_enum(field) {
            FieldValue::Raw(field.decode_raw(payload, def.pgn)?)
        } else {
            match field.decode(payload, def.pgn)? {
                Some(v) => FieldValue::Numeric(v),
                None => FieldValue::Unavailable,
            }
        };
        fields.insert(field.name, value);
    }

    let mut repeated = Vec::new();
    if let Some(rfs) = &def.repeat_field_set {
        let prefix_len = match def.length {
            PayloadLength::Fixed(len) => len,
            PayloadLength::Variable => payload.len().min(
                def.fields
                    .iter()
                    .map(|f| f.byte_offset)
                    .max()
                    .unwrap_or(0),
            ),
        };
        let mut offset = prefix_len;
        while offset + rfs.record_length_bytes <= payload.len() {
            let record = &payload[offset..offset + rfs.record_length_bytes];
            let mut record_fields = HashMap::with_capacity(rfs.fields.len());
            for field in &rfs.fields {
                let value = if is_bits_or_enum(field) {
                    FieldValue::Raw(field.decode_raw(record, def.pgn)?)
                } else {
                    match field.decode(record, def.pgn)? {
                        Some(v) => FieldValue::Numeric(v),
                        None => FieldValue::Unavailable,
                    }
                };
                record_fields.insert(field.name, value);
            }
            repeated.push(record_fields);
            offset += rfs.record_length_bytes;
        }
    }

    Ok(DecodedPgn {
        pgn: def.pgn,
        name: def.name,
        fields,
        repeated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::builtin::standard_registry;

    #[test]
    fn decodes_gnss_position_fields() {
        let reg = standard_registry().unwrap();
        let def = reg.lookup(129029, 0).unwrap();

        let mut payload = vec![0u8; 43];
        payload[0] = 7; // sid
        let lat: i64 = 483_856_700_000_000; // ~48.38567 deg
        payload[7..15].copy_from_slice(&lat.to_le_bytes());

        let decoded = decode(def, &payload).unwrap();
        assert_eq!(decoded.pgn, 129029);
        match decoded.fields.get("latitude") {
            Some(FieldValue::Numeric(v)) => assert!((*v - 48.38567).abs() < 1e-4),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(decoded.fields.get("sid"), Some(&FieldValue::Numeric(7.0)));
    }

    #[test]
    fn short_payload_is_rejected() {
        let reg = standard_registry().unwrap();
        let def = reg.lookup(129029, 0).unwrap();
        let payload = vec![0u8; 10];
        assert!(decode(def, &payload).is_err());
    }
}
