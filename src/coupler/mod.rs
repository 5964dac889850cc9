//! The coupler lifecycle and generic runner: every physical or
//! logical I/O endpoint shares one state machine and one read/publish
//! loop; what differs per coupler kind is confined to `CouplerBackend`.

mod can;
mod log_replay;
mod tcp;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use nmea2k::bridge::Bridge;
use nmea2k::MessageEnvelope;

use crate::config::{CouplerConfig, Direction, SourceFilterConfig};
use crate::error::CouplerOpenRefused;
use crate::metrics::{CouplerMetrics, ReportTimer};

pub use can::CanBackend;
pub use log_replay::LogReplayBackend;
pub use tcp::{Mode as TcpMode, TcpBackend};

/// A message tagged with the coupler it came from, as it travels toward
/// the router's publisher fan-out.
#[derive(Debug, Clone)]
pub struct RoutedMessage {
    pub coupler: String,
    pub envelope: MessageEnvelope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouplerState {
    NotReady,
    Open,
    Connected,
    Active,
    Stopped,
}

pub enum ReadOutcome {
    Message(MessageEnvelope),
    Timeout,
    Closed,
}

/// What a concrete backend must provide; dispatched through a `match` in
/// `Coupler::open`/`read_one`/`send` rather than a trait object, since the
/// backend set is closed and known at config-parse time.
pub enum CouplerBackend {
    Can(CanBackend),
    Tcp(TcpBackend),
    Udp(TcpBackend), // UDP reuses the line-datagram framing of the TCP backend's buffer handling
    LogReplay(LogReplayBackend),
    GrpcIngest(TcpBackend),
    /// Hardware serial quirks are explicitly out of scope; this variant
    /// exists only so configuration round-trips and fails loudly rather
    /// than silently.
    Serial { device: String },
}

impl CouplerBackend {
    async fn open(&mut self) -> Result<(), CouplerOpenRefused> {
        match self {
            CouplerBackend::Can(b) => b.open().await,
            CouplerBackend::Tcp(b) | CouplerBackend::GrpcIngest(b) => b.open().await,
            CouplerBackend::Udp(b) => b.open().await,
            CouplerBackend::LogReplay(b) => b.open().await,
            CouplerBackend::Serial { device } => Err(CouplerOpenRefused {
                coupler: device.clone(),
                reason: "serial hardware support is out of scope for this build".to_string(),
            }),
        }
    }

    async fn read_one(&mut self) -> ReadOutcome {
        match self {
            CouplerBackend::Can(b) => b.read_one().await,
            CouplerBackend::Tcp(b) | CouplerBackend::GrpcIngest(b) => b.read_one().await,
            CouplerBackend::Udp(b) => b.read_one().await,
            CouplerBackend::LogReplay(b) => b.read_one().await,
            CouplerBackend::Serial { .. } => ReadOutcome::Closed,
        }
    }

    async fn send(&mut self, envelope: &MessageEnvelope) -> std::io::Result<()> {
        match self {
            CouplerBackend::Can(b) => b.send(envelope).await,
            CouplerBackend::Tcp(b) | CouplerBackend::GrpcIngest(b) => b.send(envelope).await,
            CouplerBackend::Udp(b) => b.send(envelope).await,
            CouplerBackend::LogReplay(_) => Ok(()), // read-only by construction
            CouplerBackend::Serial { .. } => Ok(()),
        }
    }

    fn close(&mut self) {
        match self {
            CouplerBackend::Can(b) => b.close(),
            CouplerBackend::Tcp(b) | CouplerBackend::GrpcIngest(b) => b.close(),
            CouplerBackend::Udp(b) => b.close(),
            CouplerBackend::LogReplay(b) => b.close(),
            CouplerBackend::Serial { .. } => {}
        }
    }
}

/// One named I/O endpoint, driven by `run`.
pub struct Coupler {
    pub name: String,
    pub direction: Direction,
    pub convert_nmea0183: bool,
    pub source_filter: SourceFilterConfig,
    pub max_open_attempts: u32,
    pub open_delay: Duration,
    pub trace_path: Option<std::path::PathBuf>,
    backend: CouplerBackend,
    state: CouplerState,
    suspended: Arc<AtomicBool>,
}

impl Coupler {
    pub fn new(config: &CouplerConfig, backend: CouplerBackend, working_dir: &std::path::Path) -> Self {
        let common = config.common();
        let trace_path = common.trace.then(|| working_dir.join(format!("{}.trace", common.name)));
        Coupler {
            name: common.name.clone(),
            direction: common.direction,
            convert_nmea0183: common.convert_nmea0183,
            source_filter: common.source_filter.clone(),
            max_open_attempts: common.max_open_attempts,
            open_delay: Duration::from_secs(common.open_delay_seconds),
            trace_path,
            backend,
            state: CouplerState::NotReady,
            suspended: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn suspension_handle(&self) -> Arc<AtomicBool> {
        self.suspended.clone()
    }

    /// The generic runner loop shared by every coupler kind.
    /// Stops cooperatively when `stop` is set; publishes accepted messages
    /// onto `outbound`; drains `inbound` (injector fan-in) for sends.
    pub async fn run(
        mut self,
        outbound: mpsc::Sender<RoutedMessage>,
        mut inbound: mpsc::Receiver<MessageEnvelope>,
        stop: Arc<AtomicBool>,
        report_interval: Duration,
    ) {
        let mut metrics = CouplerMetrics::new(self.name.clone());
        let mut report_timer = ReportTimer::new(report_interval);
        let mut bridge = self.convert_nmea0183.then(Bridge::new);
        let mut trace = self.trace_path.as_ref().and_then(|p| crate::trace::TraceWriter::open(p).ok());
        let mut attempts = 0u32;

        'outer: loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }

            match self.state {
                CouplerState::NotReady => {
                    attempts += 1;
                    if attempts > self.max_open_attempts {
                        warn!(coupler = %self.name, "exhausted open attempts, giving up");
                        break;
                    }
                    match self.backend.open().await {
                        Ok(()) => {
                            info!(coupler = %self.name, "opened");
                            self.state = CouplerState::Connected;
                            attempts = 0;
                        }
                        Err(refused) => {
                            // An explicit refusal is not retried.
                            if refused.reason.contains("exhausted") || refused.reason.contains("scope") {
                                warn!(coupler = %self.name, reason = %refused.reason, "open refused, not retrying");
                                break;
                            }
                            debug!(coupler = %self.name, reason = %refused.reason, "open failed, retrying");
                            tokio::time::sleep(self.open_delay).await;
                        }
                    }
                    continue;
                }
                CouplerState::Stopped => break,
                _ => {}
            }

            if self.direction == Direction::WriteOnly || self.suspended.load(Ordering::Relaxed) {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    Some(msg) = inbound.recv() => {
                        self.deliver(&msg, &mut metrics, &mut trace).await;
                    }
                }
                continue;
            }

            tokio::select! {
                biased;
                Some(msg) = inbound.recv(), if self.direction != Direction::ReadOnly => {
                    self.deliver(&msg, &mut metrics, &mut trace).await;
                }
                outcome = timeout(Duration::from_secs(1), self.backend.read_one()) => {
                    match outcome {
                        Ok(ReadOutcome::Message(envelope)) => {
                            self.state = CouplerState::Active;
                            metrics.record_input();
                            if let Some(t) = trace.as_mut() {
                                t.write_inbound(&envelope);
                            }
                            for routed in self.expand(envelope, &mut bridge) {
                                if outbound.send(routed).await.is_err() {
                                    break 'outer;
                                }
                            }
                        }
                        Ok(ReadOutcome::Timeout) | Err(_) => {}
                        Ok(ReadOutcome::Closed) => {
                            warn!(coupler = %self.name, "connection lost, reopening");
                            self.backend.close();
                            self.state = CouplerState::NotReady;
                        }
                    }
                }
            }

            if report_timer.due() {
                let report = metrics.report();
                report.log();
                if !report.had_input_this_window && self.direction != Direction::WriteOnly {
                    debug!(coupler = %self.name, "no input this interval, checking connection");
                }
                report_timer.rearm();
            }
        }

        self.backend.close();
        self.state = CouplerState::Stopped;
        info!(coupler = %self.name, "stopped");
    }

    async fn deliver(&mut self, msg: &MessageEnvelope, metrics: &mut CouplerMetrics, trace: &mut Option<crate::trace::TraceWriter>) {
        if self.direction == Direction::ReadOnly {
            return;
        }
        if self.backend.send(msg).await.is_ok() {
            metrics.record_output();
            if let Some(t) = trace {
                t.write_outbound(msg);
            }
        }
    }

    /// Applies the per-PGN source filter and, for NMEA-0183 input on a
    /// bridge-enabled coupler, expands one sentence into 0..N NMEA2000
    /// equivalents.
    fn expand(&self, envelope: MessageEnvelope, bridge: &mut Option<Bridge>) -> Vec<RoutedMessage> {
        if let MessageEnvelope::Nmea2000Raw(ref m) = envelope {
            if !self.source_filter.should_accept(m.pgn, m.source) {
                return Vec::new();
            }
        }
        match (&envelope, bridge) {
            (MessageEnvelope::Nmea0183(sentence), Some(bridge)) => bridge
                .convert(sentence)
                .into_iter()
                .map(|m| RoutedMessage {
                    coupler: self.name.clone(),
                    envelope: MessageEnvelope::Nmea2000Raw(m),
                })
                .collect(),
            _ => vec![RoutedMessage {
                coupler: self.name.clone(),
                envelope,
            }],
        }
    }
}
