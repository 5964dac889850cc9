//! Field-level codec primitives: the declarative vocabulary PGN schemas are
//! built from.
//!
//! Covers signed, unsigned, bitfield, enum and variable-length-string
//! field kinds, including multi-byte bitfield groups where several named
//! sub-fields pack into one shared byte run rather than each owning a
//! whole byte or a single sub-byte span.

use crate::error::DecodeError;

/// The primitive shape of one field's raw bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Uint8,
    Uint16,
    Uint24,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    /// A named sub-field inside a shared bitfield group; `bit_length` is
    /// the width in bits, and the field's `byte_offset`/`bit_offset`
    /// locate it within the group's byte run.
    Bits { bit_length: u8 },
}

impl FieldKind {
    fn byte_width(self) -> usize {
        match self {
            FieldKind::Uint8 | FieldKind::Int8 => 1,
            FieldKind::Uint16 | FieldKind::Int16 => 2,
            FieldKind::Uint24 => 3,
            FieldKind::Uint32 | FieldKind::Int32 => 4,
            FieldKind::Uint64 | FieldKind::Int64 => 8,
            FieldKind::Bits { .. } => 0,
        }
    }

    fn is_signed(self) -> bool {
        matches!(
            self,
            FieldKind::Int8 | FieldKind::Int16 | FieldKind::Int32 | FieldKind::Int64
        )
    }
}

/// A scalar field's static definition: where it lives in the payload, how
/// wide it is, and how to turn the raw integer into an engineering value.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub byte_offset: usize,
    pub bit_offset: u8,
    pub kind: FieldKind,
    pub scale: f64,
    pub offset: f64,
}

impl FieldDef {
    pub const fn new(name: &'static str, byte_offset: usize, kind: FieldKind) -> Self {
        FieldDef {
            name,
            byte_offset,
            bit_offset: 0,
            kind,
            scale: 1.0,
            offset: 0.0,
        }
    }

    pub const fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub const fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    pub const fn with_bit_offset(mut self, bit_offset: u8) -> Self {
        self.bit_offset = bit_offset;
        self
    }

    fn bit_length(&self) -> u32 {
        match self.kind {
            FieldKind::Bits { bit_length } => bit_length as u32,
            other => (other.byte_width() * 8) as u32,
        }
    }

    /// All raw bits set to 1 (within the field's width) is the NMEA2000
    /// convention for "field not available"; all bits but the topmost
    /// one set means "out of range", also treated as unavailable here.
    /// Mirrors `SpnDef::extract_and_validate`'s `saturating_sub(1)` check.
    fn is_unavailable(&self, raw: u64) -> bool {
        let bit_length = self.bit_length();
        let max_value: u64 = if bit_length >= 64 {
            u64::MAX
        } else {
            (1u64 << bit_length) - 1
        };
        raw >= max_value.saturating_sub(1)
    }

    /// Extracts the raw unsigned bit pattern for this field from `payload`.
    fn extract_raw(&self, payload: &[u8], pgn: u32) -> Result<u64, DecodeError> {
        match self.kind {
            FieldKind::Bits { bit_length } => {
                let needed = self.byte_offset + ((self.bit_offset as usize + bit_length as usize) + 7) / 8;
                if payload.len() < needed {
                    return Err(DecodeError::PayloadTooShort {
                        pgn,
                        expected: needed,
                        actual: payload.len(),
                    });
                }
                let mut acc: u64 = 0;
                for i in 0..8 {
                    if self.byte_offset + i < payload.len() {
                        acc |= (payload[self.byte_offset + i] as u64) << (8 * i);
                    }
                }
                let mask = if bit_length >= 64 {
                    u64::MAX
                } else {
                    (1u64 << bit_length) - 1
                };
                Ok((acc >> self.bit_offset) & mask)
            }
            other => {
                let width = other.byte_width();
                let end = self.byte_offset + width;
                if payload.len() < end {
                    return Err(DecodeError::PayloadTooShort {
                        pgn,
                        expected: end,
                        actual: payload.len(),
                    });
                }
                let mut acc: u64 = 0;
                for i in 0..width {
                    acc |= (payload[self.byte_offset + i] as u64) << (8 * i);
                }
                Ok(acc)
            }
        }
    }

    fn sign_extend(&self, raw: u64) -> i64 {
        let bits = self.bit_length();
        if bits >= 64 {
            return raw as i64;
        }
        let shift = 64 - bits;
        ((raw << shift) as i64) >> shift
    }

    /// Decodes this field out of `payload`, applying scale/offset and
    /// the not-available convention. Returns `None` when the raw value is
    /// the not-available sentinel.
    pub fn decode(&self, payload: &[u8], pgn: u32) -> Result<Option<f64>, DecodeError> {
        let raw = self.extract_raw(payload, pgn)?;
        if self.is_unavailable(raw) {
            return Ok(None);
        }
        let numeric = if self.kind.is_signed() {
            self.sign_extend(raw) as f64
        } else {
            raw as f64
        };
        Ok(Some(numeric * self.scale + self.offset))
    }

    /// Decodes the raw integer without scale/offset applied, for enum and
    /// bitflag fields where the raw value carries the meaning directly.
    pub fn decode_raw(&self, payload: &[u8], pgn: u32) -> Result<u64, DecodeError> {
        self.extract_raw(payload, pgn)
    }

    fn field_mask(bit_length: u32) -> u64 {
        if bit_length >= 64 {
            u64::MAX
        } else {
            (1u64 << bit_length) - 1
        }
    }

    /// Writes this field's raw bits into `buffer`, growing it (padded with
    /// `0xFF`, the not-available filler) as needed. `None` encodes the
    /// not-available sentinel. Inverse of `decode`/`decode_raw`.
    pub fn encode(&self, value: Option<f64>, buffer: &mut Vec<u8>) {
        let bit_length = self.bit_length();
        let mask = Self::field_mask(bit_length);
        let raw = match value {
            None => mask,
            Some(v) => {
                let scaled = ((v - self.offset) / self.scale).round();
                (if self.kind.is_signed() { scaled as i64 as u64 } else { scaled as u64 }) & mask
            }
        };

        match self.kind {
            FieldKind::Bits { .. } => {
                let needed = self.byte_offset + ((self.bit_offset as usize + bit_length as usize) + 7) / 8;
                if buffer.len() < needed {
                    buffer.resize(needed, 0xFF);
                }
                let mut acc: u64 = 0;
                for i in 0..8 {
                    if self.byte_offset + i < buffer.len() {
                        acc |= (buffer[self.byte_offset + i] as u64) << (8 * i);
                    }
                }
                acc &= !(mask << self.bit_offset);
                acc |= (raw & mask) << self.bit_offset;
                for i in 0..8 {
                    if self.byte_offset + i < buffer.len() {
                        buffer[self.byte_offset + i] = ((acc >> (8 * i)) & 0xFF) as u8;
                    }
                }
            }
            other => {
                let width = other.byte_width();
                let end = self.byte_offset + width;
                if buffer.len() < end {
                    buffer.resize(end, 0xFF);
                }
                for i in 0..width {
                    buffer[self.byte_offset + i] = ((raw >> (8 * i)) & 0xFF) as u8;
                }
            }
        }
    }
}

/// Reads a variable-length string field: a one-byte length (the text
/// length plus 2, matching the control/length header width) followed by a
/// one-byte control field (must equal `0x01`), then that many bytes of
/// ASCII/UTF-8 text.
pub fn decode_variable_string(payload: &[u8], byte_offset: usize) -> Result<Option<String>, DecodeError> {
    if payload.len() <= byte_offset + 1 {
        return Ok(None);
    }
    let len = payload[byte_offset] as usize;
    let control = payload[byte_offset + 1];
    if control != 0x01 {
        return Err(DecodeError::BadVariableStringControlByte(control));
    }
    let start = byte_offset + 2;
    let end = start + len.saturating_sub(2);
    if end > payload.len() || len < 2 {
        return Ok(None);
    }
    let text = String::from_utf8_lossy(&payload[start..end])
        .trim_end_matches(['\0', '@', ' '])
        .to_string();
    Ok(Some(text))
}

/// Writes a variable-length string field in the same length-then-control
/// wire format `decode_variable_string` reads: `[len+2, 0x01, text...]`.
pub fn encode_variable_string(text: &str, buffer: &mut Vec<u8>) {
    let bytes = text.as_bytes();
    buffer.push((bytes.len() + 2) as u8);
    buffer.push(0x01);
    buffer.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn decodes_scaled_signed_field() {
        // latitude: i32 LE at offset 1, scale 1e-7 (as in pgn129025-style fields)
        let field = FieldDef::new("latitude", 1, FieldKind::Int32).with_scale(1e-7);
        let mut payload = vec![0u8; 9];
        let raw: i32 = 123_456_789;
        payload[1..5].copy_from_slice(&raw.to_le_bytes());
        let value = field.decode(&payload, 129025).unwrap().unwrap();
        assert_relative_eq!(value, 12.3456789, epsilon = 1e-6);
    }

    #[test]
    fn unavailable_sentinel_yields_none() {
        let field = FieldDef::new("sog", 0, FieldKind::Uint16).with_scale(0.01);
        let payload = [0xFF, 0xFF];
        assert_eq!(field.decode(&payload, 129026).unwrap(), None);
    }

    #[test]
    fn bitfield_group_extracts_sub_byte_span() {
        // device_instance_lower (3 bits @ 0) and upper (5 bits @ 3) packed in one byte.
        let lower = FieldDef::new("instance_lower", 0, FieldKind::Bits { bit_length: 3 });
        let upper = FieldDef::new("instance_upper", 0, FieldKind::Bits { bit_length: 5 }).with_bit_offset(3);
        let payload = [0b1010_1101u8];
        assert_eq!(lower.decode_raw(&payload, 1).unwrap(), 0b101);
        assert_eq!(upper.decode_raw(&payload, 1).unwrap(), 0b10101);
    }

    #[test]
    fn too_short_payload_is_an_error() {
        let field = FieldDef::new("x", 6, FieldKind::Uint32);
        let payload = [0u8; 4];
        assert!(matches!(
            field.decode(&payload, 1),
            Err(DecodeError::PayloadTooShort { .. })
        ));
    }

    #[test]
    fn variable_string_trims_padding() {
        let mut payload = vec![0x06, 0x01, b'A', b'B', b'@', b'@'];
        payload.extend([0, 0]);
        let s = decode_variable_string(&payload, 0).unwrap().unwrap();
        assert_eq!(s, "AB");
    }

    #[test]
    fn variable_string_rejects_bad_control_byte() {
        let payload = [0x04, 0x02, b'A', b'B'];
        assert!(matches!(
            decode_variable_string(&payload, 0),
            Err(DecodeError::BadVariableStringControlByte(0x02))
        ));
    }

    #[test]
    fn variable_string_roundtrips_through_encode() {
        let mut buffer = Vec::new();
        encode_variable_string("AB", &mut buffer);
        let s = decode_variable_string(&buffer, 0).unwrap().unwrap();
        assert_eq!(s, "AB");
    }

    #[test]
    fn encode_is_the_inverse_of_decode_for_a_scaled_field() {
        let field = FieldDef::new("latitude", 1, FieldKind::Int32).with_scale(1e-7);
        let mut buffer = Vec::new();
        field.encode(Some(12.3456789), &mut buffer);
        let value = field.decode(&buffer, 129025).unwrap().unwrap();
        assert_relative_eq!(value, 12.3456789, epsilon = 1e-6);
    }

    #[test]
    fn encode_none_writes_not_available_sentinel() {
        let field = FieldDef::new("sog", 0, FieldKind::Uint16).with_scale(0.01);
        let mut buffer = Vec::new();
        field.encode(None, &mut buffer);
        assert_eq!(field.decode(&buffer, 129026).unwrap(), None);
    }

    #[test]
    fn encode_bits_preserves_sibling_subfield() {
        let lower = FieldDef::new("instance_lower", 0, FieldKind::Bits { bit_length: 3 });
        let upper = FieldDef::new("instance_upper", 0, FieldKind::Bits { bit_length: 5 }).with_bit_offset(3);
        let mut buffer = vec![0u8];
        lower.encode(Some(0b101 as f64), &mut buffer);
        upper.encode(Some(0b10101 as f64), &mut buffer);
        assert_eq!(lower.decode_raw(&buffer, 1).unwrap(), 0b101);
        assert_eq!(upper.decode_raw(&buffer, 1).unwrap(), 0b10101);
    }
}
