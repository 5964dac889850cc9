use std::fmt;

use super::date_time::N2kDateTime;

#[derive(Debug, Clone)]
pub struct NmeaSystemTime {
    pub sid: u8,
    pub source: u8,
    pub date_time: N2kDateTime,
}

impl NmeaSystemTime {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        Some(NmeaSystemTime {
            sid: data[0],
            source: data[1],
            date_time: N2kDateTime::new(
                u16::from_le_bytes([data[2], data[3]]),
                u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as f64,
            ),
        })
    }
}

impl fmt::Display for NmeaSystemTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "      System Time: day {} unix {} (source {})",
            self.date_time.date,
            self.date_time.to_unix_timestamp(),
            self.source
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_date_and_time_fields() {
        let data = [0x01, 0x02, 0x0A, 0x00, 0x80, 0x51, 0x01, 0x00];
        let time = NmeaSystemTime::from_bytes(&data).unwrap();
        assert_eq!(time.sid, 1);
        assert_eq!(time.source, 2);
        assert_eq!(time.date_time.date, 10);
    }

    #[test]
    fn rejects_short_payload() {
        assert!(NmeaSystemTime::from_bytes(&[0x01, 0x02, 0x03]).is_none());
    }
}
