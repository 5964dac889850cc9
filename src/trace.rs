//! Per-coupler human-readable trace files: every inbound and
//! outbound message is appended as one line, prefixed with a wall-clock
//! timestamp and direction marker.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Local;

use nmea2k::message::MessageEnvelope;

pub struct TraceWriter {
    file: BufWriter<File>,
}

impl TraceWriter {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(TraceWriter { file: BufWriter::new(file) })
    }

    pub fn write_inbound(&mut self, envelope: &MessageEnvelope) {
        self.write_line('<', envelope);
    }

    pub fn write_outbound(&mut self, envelope: &MessageEnvelope) {
        self.write_line('>', envelope);
    }

    fn write_line(&mut self, direction: char, envelope: &MessageEnvelope) {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let rendered = match envelope {
            MessageEnvelope::Nmea0183(sentence) => sentence.raw.clone(),
            MessageEnvelope::Nmea2000Raw(msg) => msg.to_string(),
            MessageEnvelope::Nmea2000Decoded(decoded) => format!("{decoded:?}"),
        };
        if writeln!(self.file, "{now} {direction} {rendered}").is_ok() {
            let _ = self.file.flush();
        }
    }
}
