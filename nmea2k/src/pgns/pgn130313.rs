use std::fmt;

#[derive(Debug, Clone)]
pub struct Humidity {
    pub sid: u8,
    pub instance: u8,
    pub source: u8,
    pub actual_humidity: f64,
    pub set_humidity: Option<f64>,
}

impl Humidity {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 5 {
            return None;
        }
        let actual = u16::from_le_bytes([data[3], data[4]]) as f64 * 0.004;
        let set_hum = if data.len() >= 7 {
            let raw = u16::from_le_bytes([data[5], data[6]]);
            (raw != 0xFFFF).then(|| raw as f64 * 0.004)
        } else {
            None
        };
        Some(Humidity {
            sid: data[0],
            instance: data[1],
            source: data[2],
            actual_humidity: actual,
            set_humidity: set_hum,
        })
    }
}

impl fmt::Display for Humidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "      Humidity: {:.1}% (Source: {}, Instance: {})",
            self.actual_humidity, self.source, self.instance
        )?;
        if let Some(set) = self.set_humidity {
            write!(f, " | Set: {:.1}%", set)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_payload() {
        assert!(Humidity::from_bytes(&[0, 0]).is_none());
    }
}
