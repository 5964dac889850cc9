use std::fmt;

#[derive(Debug, Clone)]
pub struct VesselHeading {
    pub sid: u8,
    pub heading: f64,
    pub deviation: Option<f64>,
    pub variation: Option<f64>,
    pub reference: HeadingReference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadingReference {
    True,
    Magnetic,
    Error,
    Null,
}

impl VesselHeading {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        let deviation = i16::from_le_bytes([data[3], data[4]]);
        let variation = i16::from_le_bytes([data[5], data[6]]);
        Some(VesselHeading {
            sid: data[0],
            heading: u16::from_le_bytes([data[1], data[2]]) as f64 * 0.0001,
            deviation: (deviation != i16::MAX).then(|| deviation as f64 * 0.0001),
            variation: (variation != i16::MAX).then(|| variation as f64 * 0.0001),
            reference: match data[7] & 0x03 {
                0 => HeadingReference::True,
                1 => HeadingReference::Magnetic,
                2 => HeadingReference::Error,
                _ => HeadingReference::Null,
            },
        })
    }
}

impl fmt::Display for VesselHeading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "      Heading: {:.2}° ({:?})", self.heading.to_degrees(), self.reference)?;
        if let Some(dev) = self.deviation {
            write!(f, " | Deviation: {:.2}°", dev.to_degrees())?;
        }
        if let Some(var) = self.variation {
            write!(f, " | Variation: {:.2}°", var.to_degrees())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_true_heading() {
        let data = [0, 0x10, 0x27, 0xFF, 0x7F, 0xFF, 0x7F, 0x00];
        let heading = VesselHeading::from_bytes(&data).unwrap();
        assert_eq!(heading.reference, HeadingReference::True);
        assert!(heading.deviation.is_none());
    }
}
