use std::fmt;

use super::date_time::N2kDateTime;

#[derive(Debug, Clone)]
pub struct GnssPositionData {
    pub sid: u8,
    pub date_time: N2kDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub gnss_type: GnssType,
    pub method: GnssMethod,
    pub num_svs: u8,
    pub hdop: f64,
    pub pdop: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GnssType {
    Gps,
    Glonass,
    GpsGlonass,
    GpsSbasWaas,
    GpsSbasWaasDglonass,
    Chayka,
    Integrated,
    Surveyed,
    Galileo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GnssMethod {
    NoGnss,
    GnssFix,
    DGnss,
    PreciseGnss,
    RtkFixed,
    RtkFloat,
}

impl GnssPositionData {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 43 {
            return None;
        }
        Some(GnssPositionData {
            sid: data[0],
            date_time: N2kDateTime::new(
                u16::from_le_bytes([data[1], data[2]]),
                u32::from_le_bytes([data[3], data[4], data[5], data[6]]) as f64,
            ),
            latitude: i64::from_le_bytes(data[7..15].try_into().unwrap()) as f64 * 1e-16,
            longitude: i64::from_le_bytes(data[15..23].try_into().unwrap()) as f64 * 1e-16,
            altitude: i64::from_le_bytes(data[23..31].try_into().unwrap()) as f64 * 1e-6,
            gnss_type: match data[31] & 0x0F {
                0 => GnssType::Gps,
                1 => GnssType::Glonass,
                2 => GnssType::GpsGlonass,
                3 => GnssType::GpsSbasWaas,
                4 => GnssType::GpsSbasWaasDglonass,
                5 => GnssType::Chayka,
                6 => GnssType::Integrated,
                7 => GnssType::Surveyed,
                8 => GnssType::Galileo,
                _ => GnssType::Gps,
            },
            method: match (data[31] >> 4) & 0x0F {
                0 => GnssMethod::NoGnss,
                1 => GnssMethod::GnssFix,
                2 => GnssMethod::DGnss,
                3 => GnssMethod::PreciseGnss,
                4 => GnssMethod::RtkFixed,
                5 => GnssMethod::RtkFloat,
                _ => GnssMethod::NoGnss,
            },
            num_svs: data[33],
            hdop: i16::from_le_bytes([data[34], data[35]]) as f64 * 0.01,
            pdop: i16::from_le_bytes([data[36], data[37]]) as f64 * 0.01,
        })
    }
}

impl fmt::Display for GnssPositionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "      Position: {:.6}°, {:.6}° Satellites: {} Type: {:?} Method: {:?} HDOP: {:.2} PDOP: {:.2}",
            self.latitude, self.longitude, self.num_svs, self.gnss_type, self.method, self.hdop, self.pdop
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn decodes_latitude_and_longitude() {
        let mut data = vec![0u8; 43];
        let lat_raw = (48.38567_f64 * 1e16) as i64;
        let lon_raw = (-4.4950_f64 * 1e16) as i64;
        data[7..15].copy_from_slice(&lat_raw.to_le_bytes());
        data[15..23].copy_from_slice(&lon_raw.to_le_bytes());
        let position = GnssPositionData::from_bytes(&data).unwrap();
        assert_relative_eq!(position.latitude, 48.38567, epsilon = 1e-6);
    }

    #[test]
    fn rejects_short_payload() {
        assert!(GnssPositionData::from_bytes(&[0; 10]).is_none());
    }
}
