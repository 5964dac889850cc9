//! Trace publisher: appends every published message to a file, in the same
//! line format the per-coupler trace files use.

use std::path::Path;

use nmea2k::MessageEnvelope;

use crate::trace::TraceWriter;

pub struct TracePublisherBackend {
    writer: TraceWriter,
}

impl TracePublisherBackend {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        Ok(TracePublisherBackend {
            writer: TraceWriter::open(path)?,
        })
    }

    pub fn process_msg(&mut self, envelope: &MessageEnvelope) {
        self.writer.write_outbound(envelope);
    }
}
