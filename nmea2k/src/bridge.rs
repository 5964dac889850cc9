//! NMEA-0183 to NMEA-2000 bridge.
//!
//! Converts GGA/RMC/VTG/MWV/DPT/HDG/VBW/GSA/GSV sentences into the
//! matching NMEA2000 PGN payload, using the same byte offsets and scale
//! factors as the typed structs in `crate::pgns` and the definitions in
//! `crate::schema::builtin`.

use std::collections::HashMap;

use crate::message::{RawN2kMessage, RawNmea0183Sentence};

const KNOTS_TO_MS: f64 = 1852.0 / 3600.0;
const UNAVAILABLE_U16: u16 = 0xFFFF;
const UNAVAILABLE_I16: i16 = i16::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Stream {
    Gps,
    Wind,
    Depth,
    Speed,
    Heading,
    GpsDop,
    GpsGsv,
}

/// 8-bit wrapping per-stream sequence id counters.
#[derive(Default)]
struct SequenceCounters {
    counters: HashMap<&'static str, u8>,
}

impl SequenceCounters {
    fn next(&mut self, stream: Stream) -> u8 {
        let key = match stream {
            Stream::Gps => "gps",
            Stream::Wind => "wind",
            Stream::Depth => "depth",
            Stream::Speed => "speed",
            Stream::Heading => "heading",
            Stream::GpsDop => "gpsdop",
            Stream::GpsGsv => "gpsgsv",
        };
        let counter = self.counters.entry(key).or_insert(0);
        let value = *counter;
        *counter = counter.wrapping_add(1);
        value
    }
}

/// One satellite-in-view record buffered across a multi-part GSV
/// sequence.
#[derive(Debug, Clone, Default)]
struct SatelliteRecord {
    prn: u8,
    elevation_deg: i16,
    azimuth_deg: u16,
    snr_db: u8,
    in_use: bool,
}

/// Buffers a GSV sequence until all parts arrive, then combines with the
/// most recent GSA (if any) to mark satellites in use before emitting
/// PGN 129540 once.
#[derive(Default)]
struct GsvBuffer {
    total_messages: u8,
    received_messages: u8,
    satellites: Vec<SatelliteRecord>,
    satellites_in_use: Vec<u8>,
}

impl GsvBuffer {
    fn reset(&mut self) {
        *self = GsvBuffer::default();
    }

    fn is_complete(&self) -> bool {
        self.total_messages > 0 && self.received_messages >= self.total_messages
    }
}

/// The stateful NMEA-0183 → NMEA-2000 converter. One instance per input
/// stream, since sequence counters and the GSV buffer are per-stream
/// state.
#[derive(Default)]
pub struct Bridge {
    sequence: SequenceCounters,
    gsv: GsvBuffer,
}

impl Bridge {
    pub fn new() -> Self {
        Bridge::default()
    }

    /// Converts one NMEA-0183 sentence into zero or more NMEA2000
    /// messages. Unconvertible formatters yield an empty vector; callers
    /// in strict mode discard the input, pass-through mode forwards it
    /// unchanged.
    pub fn convert(&mut self, sentence: &RawNmea0183Sentence) -> Vec<RawN2kMessage> {
        match sentence.formatter_str().as_str() {
            "GGA" => self.convert_gga(sentence).into_iter().collect(),
            "RMC" => self.convert_rmc(sentence),
            "VTG" => self.convert_vtg(sentence).into_iter().collect(),
            "MWV" => self.convert_mwv(sentence).into_iter().collect(),
            "DPT" => self.convert_dpt(sentence).into_iter().collect(),
            "HDG" => self.convert_hdg(sentence).into_iter().collect(),
            "VBW" => self.convert_vbw(sentence).into_iter().collect(),
            "GSA" => {
                self.convert_gsa(sentence);
                Vec::new()
            }
            "GSV" => self.convert_gsv(sentence).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    fn convert_gga(&mut self, s: &RawNmea0183Sentence) -> Option<RawN2kMessage> {
        let f = &s.fields;
        if f.len() < 9 {
            return None;
        }
        let lat = parse_lat(&f[1], &f[2])?;
        let lon = parse_lon(&f[3], &f[4])?;
        let altitude: f64 = f.get(8).and_then(|v| v.parse().ok()).unwrap_or(0.0);
        let num_svs: u8 = f.get(6).and_then(|v| v.parse().ok()).unwrap_or(0);
        let hdop: f64 = f.get(7).and_then(|v| v.parse().ok()).unwrap_or(0.0);
        let fix_quality: u8 = f.get(5).and_then(|v| v.parse().ok()).unwrap_or(0);

        let sid = self.sequence.next(Stream::Gps);
        let mut payload = vec![0u8; 43];
        payload[0] = sid;
        payload[1..3].copy_from_slice(&0u16.to_le_bytes());
        payload[3..7].copy_from_slice(&0u32.to_le_bytes());
        payload[7..15].copy_from_slice(&((lat * 1e16) as i64).to_le_bytes());
        payload[15..23].copy_from_slice(&((lon * 1e16) as i64).to_le_bytes());
        payload[23..31].copy_from_slice(&((altitude * 1e6) as i64).to_le_bytes());
        let gnss_method: u8 = if fix_quality >= 2 { 2 } else if fix_quality == 1 { 1 } else { 0 };
        payload[31] = (0u8 & 0x0F) | ((gnss_method & 0x0F) << 4);
        payload[33] = num_svs;
        payload[34..36].copy_from_slice(&((hdop * 100.0) as i16).to_le_bytes());

        Some(RawN2kMessage::new(129029, 3, 0, 255, payload))
    }

    fn convert_rmc(&mut self, s: &RawNmea0183Sentence) -> Vec<RawN2kMessage> {
        let f = &s.fields;
        if f.len() < 9 {
            return Vec::new();
        }
        let mut out = Vec::new();
        if let (Some(lat), Some(lon)) = (parse_lat(&f[3], &f[4]), parse_lon(&f[5], &f[6])) {
            let mut payload = vec![0u8; 8];
            payload[0..4].copy_from_slice(&((lat * 1e7) as i32).to_le_bytes());
            payload[4..8].copy_from_slice(&((lon * 1e7) as i32).to_le_bytes());
            out.push(RawN2kMessage::new(129025, 2, 0, 255, payload));
        }

        let sog_knots: f64 = f.get(7).and_then(|v| v.parse().ok()).unwrap_or(0.0);
        let cog_deg: f64 = f.get(8).and_then(|v| v.parse().ok()).unwrap_or(0.0);
        let sid = self.sequence.next(Stream::Gps);
        let mut payload = vec![0u8; 8];
        payload[0] = sid;
        payload[1] = 0; // cog reference: true
        payload[2..4].copy_from_slice(&((cog_deg.to_radians() * 10_000.0) as u16).to_le_bytes());
        payload[4..6].copy_from_slice(&((sog_knots * KNOTS_TO_MS * 100.0) as u16).to_le_bytes());
        out.push(RawN2kMessage::new(129026, 2, 0, 255, payload));
        out
    }

    fn convert_vtg(&mut self, s: &RawNmea0183Sentence) -> Option<RawN2kMessage> {
        let f = &s.fields;
        if f.len() < 6 {
            return None;
        }
        let cog_deg: f64 = f[0].parse().ok()?;
        let sog_knots: f64 = f.get(4).and_then(|v| v.parse().ok())?;
        let sid = self.sequence.next(Stream::Gps);
        let mut payload = vec![0u8; 8];
        payload[0] = sid;
        payload[1] = 0;
        payload[2..4].copy_from_slice(&((cog_deg.to_radians() * 10_000.0) as u16).to_le_bytes());
        payload[4..6].copy_from_slice(&((sog_knots * KNOTS_TO_MS * 100.0) as u16).to_le_bytes());
        Some(RawN2kMessage::new(129026, 2, 0, 255, payload))
    }

    fn convert_mwv(&mut self, s: &RawNmea0183Sentence) -> Option<RawN2kMessage> {
        let f = &s.fields;
        if f.len() < 5 {
            return None;
        }
        let angle_deg: f64 = f[0].parse().ok()?;
        let reference_raw = &f[1];
        let speed: f64 = f[2].parse().ok()?;
        let unit = f.get(3).map(String::as_str).unwrap_or("N");
        let status = f.get(4).map(String::as_str).unwrap_or("A");
        if status != "A" {
            return None;
        }
        let speed_ms = if unit == "N" { speed * KNOTS_TO_MS } else { speed };
        // NMEA MWV reference (R/T) -> N2K reference code (2/3)
        let reference: u8 = if reference_raw == "R" { 2 } else { 3 };

        let sid = self.sequence.next(Stream::Wind);
        let mut payload = vec![0u8; 8];
        payload[0] = sid;
        payload[1..3].copy_from_slice(&((speed_ms * 100.0) as u16).to_le_bytes());
        payload[3..5].copy_from_slice(&((angle_deg.to_radians() * 10_000.0) as u16).to_le_bytes());
        payload[5] = reference;
        Some(RawN2kMessage::new(130306, 2, 0, 255, payload))
    }

    fn convert_dpt(&mut self, s: &RawNmea0183Sentence) -> Option<RawN2kMessage> {
        let f = &s.fields;
        if f.is_empty() {
            return None;
        }
        let depth_m: f64 = f[0].parse().ok()?;
        let offset_m: f64 = f.get(1).and_then(|v| v.parse().ok()).unwrap_or(0.0);

        let sid = self.sequence.next(Stream::Depth);
        let mut payload = vec![0xFFu8; 8];
        payload[0] = sid;
        payload[1..5].copy_from_slice(&((depth_m * 100.0) as u32).to_le_bytes());
        payload[5..7].copy_from_slice(&((offset_m * 1000.0) as i16).to_le_bytes());
        Some(RawN2kMessage::new(128267, 2, 0, 255, payload))
    }

    fn convert_hdg(&mut self, s: &RawNmea0183Sentence) -> Option<RawN2kMessage> {
        let f = &s.fields;
        if f.is_empty() {
            return None;
        }
        let heading_deg: f64 = f[0].parse().ok()?;
        let deviation_deg: Option<f64> = f.get(1).and_then(|v| v.parse().ok());
        let variation_deg: Option<f64> = f.get(3).and_then(|v| v.parse().ok());

        let sid = self.sequence.next(Stream::Heading);
        let mut payload = vec![0u8; 8];
        payload[0] = sid;
        payload[1..3].copy_from_slice(&((heading_deg.to_radians() * 10_000.0) as u16).to_le_bytes());
        payload[3..5].copy_from_slice(
            &deviation_deg
                .map(|d| (d.to_radians() * 10_000.0) as i16)
                .unwrap_or(UNAVAILABLE_I16)
                .to_le_bytes(),
        );
        payload[5..7].copy_from_slice(
            &variation_deg
                .map(|d| (d.to_radians() * 10_000.0) as i16)
                .unwrap_or(UNAVAILABLE_I16)
                .to_le_bytes(),
        );
        payload[7] = 0; // reference: true heading
        Some(RawN2kMessage::new(127250, 2, 0, 255, payload))
    }

    fn convert_vbw(&mut self, s: &RawNmea0183Sentence) -> Option<RawN2kMessage> {
        let f = &s.fields;
        if f.len() < 5 {
            return None;
        }
        let water_speed_knots: Option<f64> = f[0].parse().ok();
        let ground_speed_knots: Option<f64> = f.get(2).and_then(|v| v.parse().ok());

        let sid = self.sequence.next(Stream::Speed);
        let mut payload = vec![0u8; 8];
        payload[0] = sid;
        payload[1..3].copy_from_slice(
            &water_speed_knots
                .map(|v| (v * KNOTS_TO_MS * 100.0) as u16)
                .unwrap_or(UNAVAILABLE_U16)
                .to_le_bytes(),
        );
        payload[3..5].copy_from_slice(
            &ground_speed_knots
                .map(|v| (v * KNOTS_TO_MS * 100.0) as u16)
                .unwrap_or(UNAVAILABLE_U16)
                .to_le_bytes(),
        );
        Some(RawN2kMessage::new(128259, 2, 0, 255, payload))
    }

    fn convert_gsa(&mut self, s: &RawNmea0183Sentence) {
        let ids: Vec<u8> = s
            .fields
            .iter()
            .skip(2)
            .take(12)
            .filter_map(|v| v.parse().ok())
            .collect();
        self.gsv.satellites_in_use = ids;
    }

    fn convert_gsv(&mut self, s: &RawNmea0183Sentence) -> Option<RawN2kMessage> {
        let f = &s.fields;
        if f.len() < 3 {
            return None;
        }
        let total_messages: u8 = f[0].parse().ok()?;
        let message_number: u8 = f[1].parse().ok()?;

        if message_number == 1 {
            self.gsv.reset();
            self.gsv.total_messages = total_messages;
        }
        self.gsv.received_messages = self.gsv.received_messages.max(message_number);

        for chunk in f[3..].chunks(4) {
            if chunk.len() < 4 {
                continue;
            }
            let prn: u8 = chunk[0].parse().unwrap_or(0);
            if prn == 0 {
                continue;
            }
            self.gsv.satellites.push(SatelliteRecord {
                prn,
                elevation_deg: chunk[1].parse().unwrap_or(0),
                azimuth_deg: chunk[2].parse().unwrap_or(0),
                snr_db: chunk[3].parse().unwrap_or(0),
                in_use: self.gsv.satellites_in_use.contains(&prn),
            });
        }

        if !self.gsv.is_complete() {
            return None;
        }

        let sid = self.sequence.next(Stream::GpsGsv);
        let record_len = 7;
        let mut payload = vec![0u8; 3 + self.gsv.satellites.len() * record_len];
        payload[0] = sid;
        payload[1] = 3; // "range residuals used" mode, fixed
        payload[2] = self.gsv.satellites.len() as u8;
        for (i, sat) in self.gsv.satellites.iter().enumerate() {
            let base = 3 + i * record_len;
            let elevation_raw = ((sat.elevation_deg as f64).to_radians() * 10_000.0) as i16;
            let azimuth_raw = ((sat.azimuth_deg as f64).to_radians() * 10_000.0) as u16;
            payload[base] = sat.prn;
            payload[base + 1..base + 3].copy_from_slice(&elevation_raw.to_le_bytes());
            payload[base + 3..base + 5].copy_from_slice(&azimuth_raw.to_le_bytes());
            payload[base + 5] = sat.snr_db;
            payload[base + 6] = if sat.in_use { 1 } else { 0 };
        }

        self.gsv.reset();
        Some(RawN2kMessage::new(129540, 6, 0, 255, payload))
    }
}

/// Parses `ddmm.mmmm,N/S` into signed decimal degrees.
fn parse_lat(value: &str, hemisphere: &str) -> Option<f64> {
    if value.is_empty() {
        return None;
    }
    let raw: f64 = value.parse().ok()?;
    let degrees = (raw / 100.0).floor();
    let minutes = raw - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;
    Some(if hemisphere == "S" { -decimal } else { decimal })
}

/// Parses `dddmm.mmmm,E/W` into signed decimal degrees.
fn parse_lon(value: &str, hemisphere: &str) -> Option<f64> {
    if value.is_empty() {
        return None;
    }
    let raw: f64 = value.parse().ok()?;
    let degrees = (raw / 100.0).floor();
    let minutes = raw - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;
    Some(if hemisphere == "W" { -decimal } else { decimal })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmea0183::parse_sentence;
    use approx::assert_relative_eq;

    #[test]
    fn gga_converts_to_gnss_position() {
        let line = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
        let sentence = parse_sentence(line, true).unwrap();
        let mut bridge = Bridge::new();
        let messages = bridge.convert(&sentence);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].pgn, 129029);
    }

    #[test]
    fn mwv_converts_knots_to_meters_per_second() {
        let line = "$WIMWV,045.0,R,010.0,N,A*23";
        let sentence = parse_sentence(line, true).unwrap();
        let mut bridge = Bridge::new();
        let messages = bridge.convert(&sentence);
        assert_eq!(messages.len(), 1);
        let speed_raw = u16::from_le_bytes([messages[0].payload[1], messages[0].payload[2]]);
        let speed_ms = speed_raw as f64 * 0.01;
        assert_relative_eq!(speed_ms, 10.0 * KNOTS_TO_MS, epsilon = 0.01);
        assert_eq!(messages[0].payload[5], 2); // R -> reference 2
    }

    #[test]
    fn sequence_counters_wrap_at_256() {
        let mut counters = SequenceCounters::default();
        for _ in 0..255 {
            counters.next(Stream::Gps);
        }
        assert_eq!(counters.next(Stream::Gps), 255);
        assert_eq!(counters.next(Stream::Gps), 0);
    }

    #[test]
    fn gsv_buffers_until_all_parts_arrive() {
        let mut bridge = Bridge::new();
        let part1 = "$GPGSV,2,1,08,01,40,083,46,02,17,308,41,12,07,344,39,14,22,228,42*72";
        let part2 = "$GPGSV,2,2,08,15,30,048,35,18,28,185,38,19,10,290,33,21,05,095,30*73";
        let s1 = parse_sentence(part1, true).unwrap();
        assert!(bridge.convert(&s1).is_empty());
        let s2 = parse_sentence(part2, true).unwrap();
        let messages = bridge.convert(&s2);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].pgn, 129540);
    }
}
