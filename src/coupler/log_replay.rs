//! Log-replay coupler (read-only): replays a previously captured trace
//! file, pacing emission by the timestamp delta between records unless
//! pacing is disabled.
//!
//! File format: an optional
//! `H|<type>|...` header line declares whether records are NMEA-0183 text
//! or raw SocketCAN frames, followed by one `R#<timestamp>><message>`
//! record per line, timestamp as `%Y-%m-%d %H:%M:%S%.f`. SocketCAN records
//! encode `<arbitration_id_hex8>:<data_hex>`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use nmea2k::arbitration::ArbitrationId;
use nmea2k::message::MessageEnvelope;
use nmea2k::nmea0183::parse_sentence;

use crate::error::CouplerOpenRefused;

use super::ReadOutcome;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

enum RecordKind {
    Nmea0183,
    SocketCan,
}

struct Record {
    timestamp: NaiveDateTime,
    text: String,
}

pub struct LogReplayBackend {
    name: String,
    path: std::path::PathBuf,
    pacing: bool,
    kind: RecordKind,
    records: Vec<Record>,
    index: usize,
    last_timestamp: Option<NaiveDateTime>,
    exhausted_on_open: bool,
}

impl LogReplayBackend {
    pub fn new(name: String, path: impl Into<std::path::PathBuf>, pacing: bool) -> Self {
        LogReplayBackend {
            name,
            path: path.into(),
            pacing,
            kind: RecordKind::Nmea0183,
            records: Vec::new(),
            index: 0,
            last_timestamp: None,
            exhausted_on_open: false,
        }
    }

    pub async fn open(&mut self) -> Result<(), CouplerOpenRefused> {
        if self.exhausted_on_open {
            return Err(CouplerOpenRefused {
                coupler: self.name.clone(),
                reason: "log replay file already exhausted".to_string(),
            });
        }
        if !self.records.is_empty() {
            return Ok(());
        }
        let path = self.path.clone();
        let name = self.name.clone();
        let (kind, records) = tokio::task::spawn_blocking(move || load_log_file(&path))
            .await
            .map_err(|e| CouplerOpenRefused {
                coupler: name.clone(),
                reason: format!("join error loading log file: {e}"),
            })?
            .map_err(|e| CouplerOpenRefused {
                coupler: name.clone(),
                reason: e,
            })?;
        if records.is_empty() {
            self.exhausted_on_open = true;
            return Err(CouplerOpenRefused {
                coupler: self.name.clone(),
                reason: "log replay file has no records".to_string(),
            });
        }
        self.kind = kind;
        self.records = records;
        self.index = 0;
        Ok(())
    }

    pub async fn read_one(&mut self) -> ReadOutcome {
        if self.index >= self.records.len() {
            self.exhausted_on_open = true;
            return ReadOutcome::Closed;
        }
        let record_timestamp = self.records[self.index].timestamp;
        if self.pacing {
            if let Some(prev) = self.last_timestamp {
                let delta = record_timestamp.signed_duration_since(prev);
                if let Ok(std_delta) = delta.to_std() {
                    tokio::time::sleep(std_delta).await;
                }
            }
        }
        self.last_timestamp = Some(record_timestamp);
        let text = self.records[self.index].text.clone();
        self.index += 1;

        let envelope = match self.kind {
            RecordKind::Nmea0183 => match parse_sentence(&text, true) {
                Ok(sentence) => MessageEnvelope::Nmea0183(sentence),
                Err(e) => {
                    debug!(coupler = %self.name, "dropping malformed log record: {e}");
                    return ReadOutcome::Timeout;
                }
            },
            RecordKind::SocketCan => match decode_can_record(&text) {
                Some(msg) => MessageEnvelope::Nmea2000Raw(msg),
                None => {
                    warn!(coupler = %self.name, "erroneous log record: {text}");
                    return ReadOutcome::Timeout;
                }
            },
        };
        ReadOutcome::Message(envelope)
    }

    pub fn close(&mut self) {
        self.index = self.records.len();
    }
}

fn load_log_file(path: &Path) -> Result<(RecordKind, Vec<Record>), String> {
    let file = File::open(path).map_err(|e| format!("cannot open {}: {e}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    let mut kind = RecordKind::Nmea0183;
    let mut next_line = lines.next();
    if let Some(Ok(ref header)) = next_line {
        if let Some(rest) = header.strip_prefix("H|") {
            if rest.split('|').next() == Some("SocketCANInterface") {
                kind = RecordKind::SocketCan;
            }
            next_line = lines.next();
        }
    }

    let mut records = Vec::new();
    let mut pending = next_line;
    while let Some(line) = pending {
        pending = lines.next();
        let Ok(line) = line else { continue };
        if let Some(record) = parse_record(&line) {
            records.push(record);
        }
    }
    Ok((kind, records))
}

fn parse_record(line: &str) -> Option<Record> {
    let rest = line.strip_prefix('R')?;
    let hash = rest.find('#')?;
    let gt = rest.find('>')?;
    if gt < hash {
        return None;
    }
    let timestamp = NaiveDateTime::parse_from_str(&rest[hash + 1..gt], TIMESTAMP_FORMAT).ok()?;
    let text = rest[gt + 1..].to_string();
    Some(Record { timestamp, text })
}

fn decode_can_record(text: &str) -> Option<nmea2k::message::RawN2kMessage> {
    let (id_hex, data_hex) = text.split_once(':')?;
    let raw_id = u32::from_str_radix(id_hex.trim(), 16).ok()?;
    let data_hex = data_hex.trim();
    let bytes = data_hex.as_bytes();
    let mut data = Vec::with_capacity(bytes.len() / 2);
    let mut i = 0;
    while i + 1 < bytes.len() {
        data.push(u8::from_str_radix(&data_hex[i..i + 2], 16).ok()?);
        i += 2;
    }
    let arbitration_id = ArbitrationId::from_can_id(raw_id);
    Some(nmea2k::message::RawN2kMessage::new(
        arbitration_id.pgn,
        arbitration_id.priority,
        arbitration_id.source_address,
        arbitration_id.destination_address,
        data,
    ))
}
