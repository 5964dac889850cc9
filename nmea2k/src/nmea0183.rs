//! NMEA-0183 sentence parsing and the `!PDGY` NMEA2000-over-0183
//! encapsulation.
//!
//! Handles delimiter/address/checksum/field splitting for a standard
//! sentence, plus the `!PDGY,pgn,prio,sa,da,ts,base64` encapsulation used
//! to tunnel a raw NMEA2000 message over an NMEA-0183 transport.

use std::fmt;

use thiserror::Error;

use crate::message::{RawN2kMessage, RawNmea0183Sentence};

pub const MAX_STANDARD_SENTENCE_LEN: usize = 82;
/// The parser accepts sentences up to this length to accommodate
/// NMEA2000-over-0183 encapsulations.
pub const MAX_ACCEPTED_SENTENCE_LEN: usize = 512;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Nmea0183Error {
    #[error("sentence exceeds {MAX_ACCEPTED_SENTENCE_LEN} bytes")]
    TooLong,
    #[error("sentence missing '$' or '!' delimiter")]
    MissingDelimiter,
    #[error("sentence missing comma-delimited address field")]
    MissingAddress,
    #[error("checksum mismatch: frame says {declared:02X}, computed {computed:02X}")]
    ChecksumMismatch { declared: u8, computed: u8 },
    #[error("malformed checksum suffix")]
    BadChecksumSuffix,
    #[error("PDGY sentence did not have the expected 3 or 6 fields")]
    BadPdgyFieldCount,
}

fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Parses one NMEA-0183 line (without the trailing `\r\n`). The PDGY
/// decapsulation path sets `require_checksum` false since the outer
/// transport (TCP, CAN) already guarantees delivery integrity.
pub fn parse_sentence(line: &str, require_checksum: bool) -> Result<RawNmea0183Sentence, Nmea0183Error> {
    if line.len() > MAX_ACCEPTED_SENTENCE_LEN {
        return Err(Nmea0183Error::TooLong);
    }
    let bytes = line.as_bytes();
    if bytes.is_empty() || (bytes[0] != b'$' && bytes[0] != b'!') {
        return Err(Nmea0183Error::MissingDelimiter);
    }

    let body = if require_checksum {
        let star = line.rfind('*').ok_or(Nmea0183Error::BadChecksumSuffix)?;
        if line.len() < star + 3 {
            return Err(Nmea0183Error::BadChecksumSuffix);
        }
        let declared = u8::from_str_radix(&line[star + 1..star + 3], 16)
            .map_err(|_| Nmea0183Error::BadChecksumSuffix)?;
        let computed = xor_checksum(&bytes[1..star]);
        if declared != computed {
            return Err(Nmea0183Error::ChecksumMismatch { declared, computed });
        }
        &line[1..star]
    } else {
        &line[1..]
    };

    let comma = body.find(',').ok_or(Nmea0183Error::MissingAddress)?;
    let address = &body[..comma];
    let fields: Vec<String> = body[comma + 1..].split(',').map(str::to_string).collect();

    let (talker, formatter) = if address.len() >= 5 && !address.starts_with('P') {
        let mut talker = [0u8; 2];
        let mut formatter = [0u8; 3];
        talker.copy_from_slice(&address.as_bytes()[0..2]);
        formatter.copy_from_slice(&address.as_bytes()[2..5]);
        (talker, formatter)
    } else {
        ([0u8; 2], [0u8; 3])
    };

    Ok(RawNmea0183Sentence {
        talker,
        formatter,
        fields,
        raw: line.to_string(),
    })
}

impl RawNmea0183Sentence {
    pub fn talker_str(&self) -> String {
        String::from_utf8_lossy(&self.talker).to_string()
    }

    pub fn formatter_str(&self) -> String {
        String::from_utf8_lossy(&self.formatter).to_string()
    }

    pub fn address(&self) -> String {
        format!("{}{}", self.talker_str(), self.formatter_str())
    }
}

/// Formats a complete sentence with its `*HH` checksum and `\r\n`
/// terminator.
pub fn format_sentence(address: &str, fields: &[String]) -> String {
    let body = format!("{address},{}", fields.join(","));
    let checksum = xor_checksum(body.as_bytes());
    format!("${body}*{checksum:02X}\r\n")
}

/// Decodes a `!PDGY,pgn,prio,sa,da,ts,base64` sentence into a raw
/// NMEA2000 message.
pub fn decode_pdgy(sentence: &RawNmea0183Sentence) -> Result<RawN2kMessage, Nmea0183Error> {
    let fields = &sentence.fields;
    let (pgn_s, prio_s, sa_s, da_s, payload_b64) = match fields.len() {
        6 => (&fields[0], &fields[1], &fields[2], &fields[3], &fields[5]),
        3 => (&fields[0], &"0".to_string(), &"0".to_string(), &fields[1], &fields[2]),
        _ => return Err(Nmea0183Error::BadPdgyFieldCount),
    };

    let pgn: u32 = pgn_s.parse().map_err(|_| Nmea0183Error::BadPdgyFieldCount)?;
    let priority: u8 = prio_s.parse().unwrap_or(0);
    let source: u8 = sa_s.parse().unwrap_or(0);
    let mut destination: u8 = da_s.parse().unwrap_or(255);
    if destination == 0 {
        destination = 255;
    }
    let payload = base64_decode(payload_b64).map_err(|_| Nmea0183Error::BadPdgyFieldCount)?;

    Ok(RawN2kMessage::new(pgn, priority, source, destination, payload))
}

/// Encodes a raw NMEA2000 message as a `!PDGY` sentence.
pub fn encode_pdgy(msg: &RawN2kMessage) -> String {
    let ts = msg
        .timestamp
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let payload_b64 = base64_encode(&msg.payload);
    let fields = vec![
        msg.pgn.to_string(),
        msg.priority.to_string(),
        msg.source.to_string(),
        msg.destination.to_string(),
        ts.to_string(),
        payload_b64,
    ];
    format_sentence("PDGY", &fields)
}

const B64_ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = *chunk.get(1).unwrap_or(&0) as u32;
        let b2 = *chunk.get(2).unwrap_or(&0) as u32;
        let triple = (b0 << 16) | (b1 << 8) | b2;
        out.push(B64_ALPHABET[((triple >> 18) & 0x3F) as usize] as char);
        out.push(B64_ALPHABET[((triple >> 12) & 0x3F) as usize] as char);
        out.push(if chunk.len() > 1 {
            B64_ALPHABET[((triple >> 6) & 0x3F) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            B64_ALPHABET[(triple & 0x3F) as usize] as char
        } else {
            '='
        });
    }
    out
}

fn base64_decode(s: &str) -> Result<Vec<u8>, ()> {
    fn value(c: u8) -> Option<u32> {
        B64_ALPHABET.iter().position(|&x| x == c).map(|p| p as u32)
    }
    let cleaned: Vec<u8> = s.bytes().filter(|&b| b != b'=').collect();
    let mut out = Vec::with_capacity(cleaned.len() * 3 / 4);
    for chunk in cleaned.chunks(4) {
        let mut values = [0u32; 4];
        for (i, &c) in chunk.iter().enumerate() {
            values[i] = value(c).ok_or(())?;
        }
        let n = (values[0] << 18) | (values[1] << 12) | (values[2] << 6) | values[3];
        out.push((n >> 16) as u8);
        if chunk.len() > 2 {
            out.push((n >> 8) as u8);
        }
        if chunk.len() > 3 {
            out.push(n as u8);
        }
    }
    Ok(out)
}

impl fmt::Display for RawNmea0183Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_gga_checksum() {
        let line = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
        let sentence = parse_sentence(line, true).unwrap();
        assert_eq!(sentence.talker_str(), "GP");
        assert_eq!(sentence.formatter_str(), "GGA");
        assert_eq!(sentence.fields[0], "123519");
    }

    #[test]
    fn rejects_bad_checksum() {
        let line = "$GPGGA,123519*00";
        assert!(matches!(
            parse_sentence(line, true),
            Err(Nmea0183Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn pdgy_roundtrips_through_encode_decode() {
        let msg = RawN2kMessage::new(129029, 3, 7, 255, vec![1, 2, 3, 4, 5]);
        let sentence_text = encode_pdgy(&msg);
        let trimmed = sentence_text.trim_end_matches("\r\n");
        let sentence = parse_sentence(trimmed, true).unwrap();
        let decoded = decode_pdgy(&sentence).unwrap();
        assert_eq!(decoded.pgn, 129029);
        assert_eq!(decoded.payload, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn oversized_sentence_is_rejected() {
        let line = format!("${}", "A".repeat(600));
        assert!(matches!(parse_sentence(&line, false), Err(Nmea0183Error::TooLong)));
    }
}
