//! The PGN definition registry itself: `lookup`, `is_proprietary`, and the
//! validation performed once at load time.

use std::collections::HashMap;

use crate::error::SchemaError;
use crate::field::FieldDef;

/// Whether a PGN's payload length is fixed or grows with a repeated field
/// set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadLength {
    Fixed(usize),
    Variable,
}

/// A repeated group of fields appended after the fixed prefix, as many
/// times as fit in the payload (e.g. PGN 126464's PGN list, PGN 129540's
/// satellite-in-view records).
#[derive(Debug, Clone)]
pub struct RepeatFieldSet {
    pub fields: Vec<FieldDef>,
    pub record_length_bytes: usize,
}

/// A fully resolved static PGN definition.
#[derive(Debug, Clone)]
pub struct PgnDefinition {
    pub pgn: u32,
    pub name: &'static str,
    pub length: PayloadLength,
    pub is_fast_packet: bool,
    pub is_proprietary: bool,
    pub manufacturer_id: Option<u16>,
    pub fields: Vec<FieldDef>,
    pub repeat_field_set: Option<RepeatFieldSet>,
}

impl PgnDefinition {
    fn validate(&self) -> Result<(), SchemaError> {
        if let PayloadLength::Fixed(len) = self.length {
            for field in &self.fields {
                let bit_end = (field.byte_offset * 8) as u64 + field.bit_offset as u64 + self.field_bit_length(field);
                if bit_end > (len as u64) * 8 {
                    return Err(SchemaError::FieldOverrunsPayload {
                        pgn: self.pgn,
                        field: field.name,
                    });
                }
            }
        }
        Ok(())
    }

    fn field_bit_length(&self, field: &FieldDef) -> u64 {
        match field.kind {
            crate::field::FieldKind::Bits { bit_length } => bit_length as u64,
            _ => {
                // byte_width * 8, recomputed since FieldKind doesn't expose it publicly.
                match field.kind {
                    crate::field::FieldKind::Uint8 | crate::field::FieldKind::Int8 => 8,
                    crate::field::FieldKind::Uint16 | crate::field::FieldKind::Int16 => 16,
                    crate::field::FieldKind::Uint24 => 24,
                    crate::field::FieldKind::Uint32 | crate::field::FieldKind::Int32 => 32,
                    crate::field::FieldKind::Uint64 | crate::field::FieldKind::Int64 => 64,
                    crate::field::FieldKind::Bits { .. } => unreachable!(),
                }
            }
        }
    }
}

/// Registry of all known PGN definitions, keyed by `(pgn, manufacturer_id)`
/// with proprietary variants in a manufacturer-keyed sub-table: an
/// unparameterized lookup returns the first registered variant.
#[derive(Debug, Default)]
pub struct Registry {
    standard: HashMap<u32, PgnDefinition>,
    proprietary: HashMap<u32, HashMap<u16, PgnDefinition>>,
    manufacturers: HashMap<u16, &'static str>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register_manufacturer(&mut self, code: u16, name: &'static str) -> Result<(), SchemaError> {
        if self.manufacturers.insert(code, name).is_some() {
            return Err(SchemaError::DuplicateManufacturer(code));
        }
        Ok(())
    }

    pub fn register(&mut self, def: PgnDefinition) -> Result<(), SchemaError> {
        def.validate()?;

        if def.is_proprietary {
            let mfg = def
                .manufacturer_id
                .ok_or(SchemaError::UnknownManufacturer(0))?;
            if !self.manufacturers.contains_key(&mfg) {
                return Err(SchemaError::UnknownManufacturer(mfg));
            }
            let variants = self.proprietary.entry(def.pgn).or_default();
            if variants.insert(mfg, def.clone()).is_some() {
                return Err(SchemaError::DuplicatePgn {
                    pgn: def.pgn,
                    manufacturer_id: mfg,
                });
            }
        } else if self.standard.insert(def.pgn, def.clone()).is_some() {
            return Err(SchemaError::DuplicatePgn {
                pgn: def.pgn,
                manufacturer_id: 0,
            });
        }
        Ok(())
    }

    /// Looks up a PGN definition. `manufacturer_id` of `0` (or not found
    /// among registered variants) returns the first registered proprietary
    /// variant.
    pub fn lookup(&self, pgn: u32, manufacturer_id: u16) -> Option<&PgnDefinition> {
        if let Some(variants) = self.proprietary.get(&pgn) {
            if manufacturer_id != 0 {
                if let Some(def) = variants.get(&manufacturer_id) {
                    return Some(def);
                }
            }
            return variants.values().next();
        }
        self.standard.get(&pgn)
    }

    pub fn is_proprietary(&self, pgn: u32) -> bool {
        self.proprietary.contains_key(&pgn)
            || (0xEF00..=0xEFFF).contains(&pgn)
            || (0xFF00..=0xFFFF).contains(&pgn)
            || (0x1EF00..=0x1EFFF).contains(&pgn)
            || (0x1FF00..=0x1FFFF).contains(&pgn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldKind;

    fn simple_def(pgn: u32) -> PgnDefinition {
        PgnDefinition {
            pgn,
            name: "test",
            length: PayloadLength::Fixed(8),
            is_fast_packet: false,
            is_proprietary: false,
            manufacturer_id: None,
            fields: vec![FieldDef::new("a", 0, FieldKind::Uint8)],
            repeat_field_set: None,
        }
    }

    #[test]
    fn rejects_duplicate_standard_pgn() {
        let mut reg = Registry::new();
        reg.register(simple_def(127488)).unwrap();
        assert!(matches!(
            reg.register(simple_def(127488)),
            Err(SchemaError::DuplicatePgn { pgn: 127488, .. })
        ));
    }

    #[test]
    fn proprietary_lookup_falls_back_to_first_variant() {
        let mut reg = Registry::new();
        reg.register_manufacturer(1857, "Garmin").unwrap();
        let mut def = simple_def(0x1EF00);
        def.is_proprietary = true;
        def.manufacturer_id = Some(1857);
        reg.register(def).unwrap();

        assert!(reg.is_proprietary(0x1EF00));
        assert!(reg.lookup(0x1EF00, 0).is_some());
        assert!(reg.lookup(0x1EF00, 1857).is_some());
        assert!(reg.lookup(0x1EF00, 9999).is_some());
    }

    #[test]
    fn rejects_field_overrunning_fixed_payload() {
        let mut def = simple_def(1);
        def.fields = vec![FieldDef::new("overruns", 7, FieldKind::Uint32)];
        assert!(matches!(
            def.validate(),
            Err(SchemaError::FieldOverrunsPayload { .. })
        ));
    }

    #[test]
    fn proprietary_def_without_registered_manufacturer_is_rejected() {
        let mut reg = Registry::new();
        let mut def = simple_def(0xFF10);
        def.is_proprietary = true;
        def.manufacturer_id = Some(42);
        assert!(matches!(
            reg.register(def),
            Err(SchemaError::UnknownManufacturer(42))
        ));
    }
}
