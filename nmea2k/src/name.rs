//! The 64-bit ISO Name: identity of a CAN node, used for address-claim
//! arbitration. Lower integer value wins. Expressed as an exhaustive
//! tagged bitfield struct with const field accessors rather than a
//! runtime-reflected field table.

use std::fmt;

/// One of the predefined J1939 industry groups. NMEA2000 devices use
/// `Marine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IndustryGroup {
    Global = 0,
    OnHighway = 1,
    AgriculturalAndForestry = 2,
    Construction = 3,
    Marine = 4,
    Industrial = 5,
}

impl IndustryGroup {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => IndustryGroup::Global,
            1 => IndustryGroup::OnHighway,
            2 => IndustryGroup::AgriculturalAndForestry,
            3 => IndustryGroup::Construction,
            5 => IndustryGroup::Industrial,
            _ => IndustryGroup::Marine,
        }
    }
}

/// The 64-bit ISO Name, little-endian on the wire. Two names compare by
/// their integer value; the lower one wins address-claim arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IsoName(pub u64);

struct NameField {
    bit_offset: u32,
    bit_length: u32,
}

impl NameField {
    const fn mask(&self) -> u64 {
        if self.bit_length >= 64 {
            u64::MAX
        } else {
            (1u64 << self.bit_length) - 1
        }
    }

    fn extract(&self, value: u64) -> u64 {
        (value >> self.bit_offset) & self.mask()
    }
}

const IDENTITY_NUMBER: NameField = NameField { bit_offset: 0, bit_length: 21 };
const MANUFACTURER_CODE: NameField = NameField { bit_offset: 21, bit_length: 11 };
const DEVICE_INSTANCE_LOWER: NameField = NameField { bit_offset: 32, bit_length: 3 };
const DEVICE_INSTANCE_UPPER: NameField = NameField { bit_offset: 35, bit_length: 5 };
const DEVICE_FUNCTION: NameField = NameField { bit_offset: 40, bit_length: 8 };
const RESERVED: NameField = NameField { bit_offset: 48, bit_length: 1 };
const DEVICE_CLASS: NameField = NameField { bit_offset: 49, bit_length: 7 };
const SYSTEM_INSTANCE: NameField = NameField { bit_offset: 56, bit_length: 4 };
const INDUSTRY_GROUP: NameField = NameField { bit_offset: 60, bit_length: 3 };
const ARBITRARY_ADDRESS_CAPABLE: NameField = NameField { bit_offset: 63, bit_length: 1 };

/// Parameters used to build a new ISO Name through a keyword-style
/// constructor instead of positional bit-packing.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsoNameFields {
    pub identity_number: u32,
    pub manufacturer_code: u16,
    pub device_instance_lower: u8,
    pub device_instance_upper: u8,
    pub device_function: u8,
    pub device_class: u8,
    pub system_instance: u8,
    pub industry_group: u8,
    pub arbitrary_address_capable: bool,
}

impl IsoName {
    pub fn from_fields(f: IsoNameFields) -> Self {
        let mut value: u64 = 0;
        value |= (f.identity_number as u64 & IDENTITY_NUMBER.mask()) << IDENTITY_NUMBER.bit_offset;
        value |= (f.manufacturer_code as u64 & MANUFACTURER_CODE.mask()) << MANUFACTURER_CODE.bit_offset;
        value |= (f.device_instance_lower as u64 & DEVICE_INSTANCE_LOWER.mask()) << DEVICE_INSTANCE_LOWER.bit_offset;
        value |= (f.device_instance_upper as u64 & DEVICE_INSTANCE_UPPER.mask()) << DEVICE_INSTANCE_UPPER.bit_offset;
        value |= (f.device_function as u64 & DEVICE_FUNCTION.mask()) << DEVICE_FUNCTION.bit_offset;
        value |= (f.device_class as u64 & DEVICE_CLASS.mask()) << DEVICE_CLASS.bit_offset;
        value |= (f.system_instance as u64 & SYSTEM_INSTANCE.mask()) << SYSTEM_INSTANCE.bit_offset;
        value |= (f.industry_group as u64 & INDUSTRY_GROUP.mask()) << INDUSTRY_GROUP.bit_offset;
        value |= (f.arbitrary_address_capable as u64) << ARBITRARY_ADDRESS_CAPABLE.bit_offset;
        IsoName(value)
    }

    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        IsoName(u64::from_le_bytes(bytes))
    }

    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub fn identity_number(&self) -> u32 {
        IDENTITY_NUMBER.extract(self.0) as u32
    }

    pub fn manufacturer_code(&self) -> u16 {
        MANUFACTURER_CODE.extract(self.0) as u16
    }

    pub fn device_instance_lower(&self) -> u8 {
        DEVICE_INSTANCE_LOWER.extract(self.0) as u8
    }

    pub fn device_instance_upper(&self) -> u8 {
        DEVICE_INSTANCE_UPPER.extract(self.0) as u8
    }

    pub fn device_function(&self) -> u8 {
        DEVICE_FUNCTION.extract(self.0) as u8
    }

    pub fn reserved(&self) -> u8 {
        RESERVED.extract(self.0) as u8
    }

    pub fn device_class(&self) -> u8 {
        DEVICE_CLASS.extract(self.0) as u8
    }

    pub fn system_instance(&self) -> u8 {
        SYSTEM_INSTANCE.extract(self.0) as u8
    }

    pub fn industry_group(&self) -> IndustryGroup {
        IndustryGroup::from_raw(INDUSTRY_GROUP.extract(self.0) as u8)
    }

    pub fn arbitrary_address_capable(&self) -> bool {
        ARBITRARY_ADDRESS_CAPABLE.extract(self.0) != 0
    }

    /// True if `self` wins arbitration against `other` (lower integer
    /// value wins).
    pub fn wins_against(&self, other: &IsoName) -> bool {
        self.0 < other.0
    }

    fn name_field_for_parameter(parameter_number: u8) -> Option<NameField> {
        Some(match parameter_number {
            1 => IDENTITY_NUMBER,
            2 => MANUFACTURER_CODE,
            3 => DEVICE_INSTANCE_LOWER,
            4 => DEVICE_INSTANCE_UPPER,
            5 => DEVICE_FUNCTION,
            6 => DEVICE_CLASS,
            7 => SYSTEM_INSTANCE,
            8 => INDUSTRY_GROUP,
            9 => ARBITRARY_ADDRESS_CAPABLE,
            _ => return None,
        })
    }

    /// Byte width a Command Group Function parameter value occupies on the
    /// wire for the given NAME subfield (1-9), rounded up from its bit
    /// width. `None` for an unrecognized parameter number.
    pub fn parameter_byte_width(parameter_number: u8) -> Option<usize> {
        Self::name_field_for_parameter(parameter_number).map(|f| ((f.bit_length + 7) / 8) as usize)
    }

    /// Returns a copy of `self` with one NAME subfield overwritten, per the
    /// Command Group Function per-parameter addressing scheme. `raw_value`
    /// is masked to the subfield's width before being written in; sibling
    /// subfields sharing the same word are left untouched. Errs with
    /// result code `3` ("parameter out of range") for an unknown
    /// `parameter_number`.
    pub fn with_field_set(&self, parameter_number: u8, raw_value: u64) -> Result<IsoName, u8> {
        let field = Self::name_field_for_parameter(parameter_number).ok_or(3u8)?;
        let cleared = self.0 & !(field.mask() << field.bit_offset);
        let updated = cleared | ((raw_value & field.mask()) << field.bit_offset);
        Ok(IsoName(updated))
    }
}

impl fmt::Display for IsoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_bytes() {
        let name = IsoName::from_fields(IsoNameFields {
            identity_number: 0x1234,
            manufacturer_code: 999,
            device_instance_lower: 1,
            device_instance_upper: 2,
            device_function: 130,
            device_class: 25,
            system_instance: 0,
            industry_group: 4,
            arbitrary_address_capable: true,
        });
        let back = IsoName::from_le_bytes(name.to_le_bytes());
        assert_eq!(name, back);
        assert_eq!(back.identity_number(), 0x1234);
        assert_eq!(back.manufacturer_code(), 999);
        assert_eq!(back.device_function(), 130);
        assert_eq!(back.industry_group(), IndustryGroup::Marine);
        assert!(back.arbitrary_address_capable());
    }

    #[test]
    fn lower_value_wins_arbitration() {
        let low = IsoName(0x40A0_0000_0000_1234);
        let high = IsoName(0x40A0_0000_0000_5678);
        assert!(low.wins_against(&high));
        assert!(!high.wins_against(&low));
    }

    #[test]
    fn with_field_set_rewrites_one_subfield_without_disturbing_others() {
        let name = IsoName::from_fields(IsoNameFields {
            identity_number: 0x1234,
            manufacturer_code: 999,
            device_function: 130,
            ..Default::default()
        });
        let updated = name.with_field_set(5, 42).unwrap();
        assert_eq!(updated.device_function(), 42);
        assert_eq!(updated.identity_number(), 0x1234);
        assert_eq!(updated.manufacturer_code(), 999);
    }

    #[test]
    fn with_field_set_rejects_unknown_parameter_number() {
        let name = IsoName(0);
        assert_eq!(name.with_field_set(42, 1), Err(3));
    }

    #[test]
    fn parameter_byte_width_matches_subfield_sizes() {
        assert_eq!(IsoName::parameter_byte_width(1), Some(3));
        assert_eq!(IsoName::parameter_byte_width(2), Some(2));
        assert_eq!(IsoName::parameter_byte_width(5), Some(1));
        assert_eq!(IsoName::parameter_byte_width(42), None);
    }

    #[test]
    fn field_layout_matches_documented_offsets() {
        // Sets only identity_number: should not bleed into manufacturer_code.
        let name = IsoName::from_fields(IsoNameFields {
            identity_number: (1 << 21) - 1,
            ..Default::default()
        });
        assert_eq!(name.manufacturer_code(), 0);
        assert_eq!(name.identity_number(), (1 << 21) - 1);
    }
}
