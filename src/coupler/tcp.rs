//! TCP/UDP/ingest coupler backend: line-delimited NMEA-0183 and
//! `!PDGY`-encapsulated NMEA-2000 traffic over a socket. One struct backs
//! the `tcp`, `udp`, and `grpc-ingest` coupler kinds, since all three speak
//! the same line framing over a different transport.
//!
//! The "accept master" mode binds and
//! waits for one inbound connection rather than dialing out; its lines are
//! read/written exactly like the client-dial mode once accepted.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, warn};

use nmea2k::message::MessageEnvelope;
use nmea2k::nmea0183::{decode_pdgy, encode_pdgy, parse_sentence};

use crate::error::CouplerOpenRefused;

use super::ReadOutcome;

const MAX_LINE_LEN: usize = 1024;

pub enum Mode {
    /// Dial out to a remote feed (host, port).
    TcpClient(String, u16),
    /// Bind and accept one inbound "master" connection.
    TcpAcceptMaster(String),
    Udp(String),
    /// No pack example grounds a `tonic`/`prost` stack; this mirrors the
    /// accept-one-connection framed transport used for the TCP master
    /// channel rather than a literal gRPC server.
    GrpcIngest(String),
}

enum Link {
    Tcp {
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    },
    Udp {
        socket: UdpSocket,
        peer: Option<std::net::SocketAddr>,
    },
}

pub struct TcpBackend {
    name: String,
    mode: Mode,
    link: Option<Link>,
}

impl TcpBackend {
    pub fn new(name: String, mode: Mode) -> Self {
        TcpBackend { name, mode, link: None }
    }

    pub async fn open(&mut self) -> Result<(), CouplerOpenRefused> {
        let link = match &self.mode {
            Mode::TcpClient(host, port) => {
                let stream = TcpStream::connect((host.as_str(), *port)).await.map_err(|e| CouplerOpenRefused {
                    coupler: self.name.clone(),
                    reason: format!("connect to {host}:{port} failed: {e}"),
                })?;
                let (r, w) = stream.into_split();
                Link::Tcp {
                    reader: BufReader::new(r),
                    writer: w,
                }
            }
            Mode::TcpAcceptMaster(bind) => {
                let listener = TcpListener::bind(bind).await.map_err(|e| CouplerOpenRefused {
                    coupler: self.name.clone(),
                    reason: format!("bind {bind} failed: {e}"),
                })?;
                let (stream, peer) = listener.accept().await.map_err(|e| CouplerOpenRefused {
                    coupler: self.name.clone(),
                    reason: format!("accept on {bind} failed: {e}"),
                })?;
                debug!(coupler = %self.name, %peer, "master client connected");
                let (r, w) = stream.into_split();
                Link::Tcp {
                    reader: BufReader::new(r),
                    writer: w,
                }
            }
            Mode::GrpcIngest(bind) => {
                let listener = TcpListener::bind(bind).await.map_err(|e| CouplerOpenRefused {
                    coupler: self.name.clone(),
                    reason: format!("bind {bind} failed: {e}"),
                })?;
                let (stream, peer) = listener.accept().await.map_err(|e| CouplerOpenRefused {
                    coupler: self.name.clone(),
                    reason: format!("accept on {bind} failed: {e}"),
                })?;
                debug!(coupler = %self.name, %peer, "ingest client connected");
                let (r, w) = stream.into_split();
                Link::Tcp {
                    reader: BufReader::new(r),
                    writer: w,
                }
            }
            Mode::Udp(bind) => {
                let socket = UdpSocket::bind(bind).await.map_err(|e| CouplerOpenRefused {
                    coupler: self.name.clone(),
                    reason: format!("bind {bind} failed: {e}"),
                })?;
                Link::Udp { socket, peer: None }
            }
        };
        self.link = Some(link);
        Ok(())
    }

    pub async fn read_one(&mut self) -> ReadOutcome {
        let Some(link) = self.link.as_mut() else {
            return ReadOutcome::Closed;
        };
        let line = match link {
            Link::Tcp { reader, .. } => {
                let mut buf = String::new();
                match reader.read_line(&mut buf).await {
                    Ok(0) => return ReadOutcome::Closed,
                    Ok(_) => buf,
                    Err(e) => {
                        warn!(coupler = %self.name, "tcp read error: {e}");
                        return ReadOutcome::Closed;
                    }
                }
            }
            Link::Udp { socket, peer } => {
                let mut buf = [0u8; MAX_LINE_LEN];
                match socket.recv_from(&mut buf).await {
                    Ok((n, from)) => {
                        *peer = Some(from);
                        String::from_utf8_lossy(&buf[..n]).to_string()
                    }
                    Err(e) => {
                        warn!(coupler = %self.name, "udp read error: {e}");
                        return ReadOutcome::Closed;
                    }
                }
            }
        };

        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return ReadOutcome::Timeout;
        }

        if let Some(rest) = line.strip_prefix("!PDGY") {
            match parse_sentence(&format!("!PDGY{rest}"), false) {
                Ok(sentence) => match decode_pdgy(&sentence) {
                    Ok(msg) => return ReadOutcome::Message(MessageEnvelope::Nmea2000Raw(msg)),
                    Err(e) => {
                        debug!(coupler = %self.name, "malformed PDGY sentence: {e}");
                        return ReadOutcome::Timeout;
                    }
                },
                Err(e) => {
                    debug!(coupler = %self.name, "malformed PDGY sentence: {e}");
                    return ReadOutcome::Timeout;
                }
            }
        }

        match parse_sentence(line, true) {
            Ok(sentence) => ReadOutcome::Message(MessageEnvelope::Nmea0183(sentence)),
            Err(e) => {
                debug!(coupler = %self.name, "dropping malformed sentence: {e}");
                ReadOutcome::Timeout
            }
        }
    }

    pub async fn send(&mut self, envelope: &MessageEnvelope) -> std::io::Result<()> {
        let text = match envelope {
            MessageEnvelope::Nmea0183(sentence) => sentence.raw.clone() + "\r\n",
            MessageEnvelope::Nmea2000Raw(msg) => encode_pdgy(msg),
            MessageEnvelope::Nmea2000Decoded(_) => return Ok(()), // publishers re-encode before reaching a coupler
        };
        let Some(link) = self.link.as_mut() else {
            return Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "coupler not open"));
        };
        match link {
            Link::Tcp { writer, .. } => writer.write_all(text.as_bytes()).await,
            Link::Udp { socket, peer } => match peer {
                Some(addr) => socket.send_to(text.as_bytes(), addr).await.map(|_| ()),
                None => Ok(()), // no peer has spoken to us yet; nothing to reply to
            },
        }
    }

    pub fn close(&mut self) {
        self.link = None;
    }
}
