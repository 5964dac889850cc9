//! The publisher fan-out: every publisher attaches to a subset of couplers,
//! filters the messages it sees, and queues them for its own consumer loop.
//! Queue management (bounded size, overflow counting, water marks) lives
//! here; the effect each publisher has on the outside world is confined to
//! `PublisherBackend`.

mod injector;
mod tcp_server;
mod trace;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use nmea2k::MessageEnvelope;

use crate::config::{FilterKind, FilterSetConfig, PublisherConfig};
use crate::coupler::RoutedMessage;
use crate::error::PublisherOverflow;

pub use injector::InjectorBackend;
pub use tcp_server::TcpServerBackend;
pub use trace::TracePublisherBackend;

/// Per-PGN minimum inter-emission spacing and the `{pgn, source}` match
/// tables a `FilterSetConfig` compiles down to.
pub struct FilterSet {
    config: FilterSetConfig,
    last_emitted: HashMap<u32, Instant>,
}

impl FilterSet {
    pub fn new(config: FilterSetConfig) -> Self {
        FilterSet {
            config,
            last_emitted: HashMap::new(),
        }
    }

    /// Returns whether `msg` should be enqueued. NMEA-0183 sentences carry
    /// no PGN/source to match against, so every entry with `pgns`/`sources`
    /// populated is NMEA-2000-only and passes 0183 traffic through.
    pub fn accepts(&mut self, msg: &RoutedMessage) -> bool {
        let (pgn, source) = match &msg.envelope {
            MessageEnvelope::Nmea2000Raw(m) => (Some(m.pgn), Some(m.source)),
            MessageEnvelope::Nmea2000Decoded(m) => (Some(m.pgn), None),
            MessageEnvelope::Nmea0183(_) => (None, None),
        };

        let matched = self.config.entries.iter().find(|entry| {
            let pgn_ok = entry.pgns.is_empty() || pgn.is_some_and(|p| entry.pgns.contains(&p));
            let source_ok = entry.sources.is_empty() || source.is_some_and(|s| entry.sources.contains(&s));
            pgn_ok && source_ok
        });

        let selected = match matched {
            None => self.config.filter_select,
            Some(entry) => match entry.kind {
                FilterKind::Select => true,
                FilterKind::Discard => false,
            },
        };
        if !selected {
            return false;
        }

        if let (Some(pgn), Some(entry)) = (pgn, matched) {
            if let Some(min_period_ms) = entry.min_period_ms {
                let now = Instant::now();
                if let Some(last) = self.last_emitted.get(&pgn) {
                    if now.duration_since(*last).as_millis() < min_period_ms as u128 {
                        return false;
                    }
                }
                self.last_emitted.insert(pgn, now);
            }
        }
        true
    }
}

pub enum PublisherBackend {
    TcpServer(TcpServerBackend),
    Trace(TracePublisherBackend),
    Injector(InjectorBackend),
    /// No pack example grounds a `tonic`/`prost` stack; this reuses the TCP
    /// server publisher's multi-client line broadcast.
    Grpc(TcpServerBackend),
}

impl PublisherBackend {
    async fn process_msg(&mut self, msg: &MessageEnvelope) {
        match self {
            PublisherBackend::TcpServer(b) | PublisherBackend::Grpc(b) => b.process_msg(msg).await,
            PublisherBackend::Trace(b) => b.process_msg(msg),
            PublisherBackend::Injector(b) => b.process_msg(msg).await,
        }
    }
}

/// A named consumer attached to a subset of couplers. Owns the sending half
/// of its own bounded queue; `offer` (called from the router's fan-out loop)
/// applies the FilterSet and tracks overflow/water-mark bookkeeping.
pub struct Publisher {
    pub name: String,
    couplers: Vec<String>,
    filters: FilterSet,
    tx: mpsc::Sender<MessageEnvelope>,
    queue_size: usize,
    max_lost: u64,
    lost: u64,
    suspend_on_overflow: bool,
    high_water_tripped: bool,
}

pub enum OfferOutcome {
    /// Filtered out or not subscribed to this coupler; not counted.
    NotApplicable,
    Enqueued,
    /// Queue was full; `lost` is the running total for this publisher.
    Overflowed { lost: u64 },
}

impl Publisher {
    pub fn new(config: &PublisherConfig) -> (Self, mpsc::Receiver<MessageEnvelope>) {
        let common = config.common();
        let queue_size = common.queue_size.max(1);
        let (tx, rx) = mpsc::channel(queue_size);
        let publisher = Publisher {
            name: common.name.clone(),
            couplers: common.couplers.clone(),
            filters: FilterSet::new(common.filters.clone()),
            tx,
            queue_size,
            max_lost: common.max_lost,
            lost: 0,
            suspend_on_overflow: common.suspend_on_overflow,
            high_water_tripped: false,
        };
        (publisher, rx)
    }

    fn subscribes_to(&self, coupler: &str) -> bool {
        self.couplers.is_empty() || self.couplers.iter().any(|c| c == coupler)
    }

    /// Applies the FilterSet, then tries to enqueue. Called once per routed
    /// message, for every publisher, from the router's fan-out loop.
    pub fn offer(&mut self, msg: &RoutedMessage) -> OfferOutcome {
        if !self.subscribes_to(&msg.coupler) || !self.filters.accepts(msg) {
            return OfferOutcome::NotApplicable;
        }

        match self.tx.try_send(msg.envelope.clone()) {
            Ok(()) => {
                let depth = self.queue_size - self.tx.capacity();
                let high_water = (self.queue_size * 4) / 5;
                if depth >= high_water && !self.high_water_tripped {
                    self.high_water_tripped = true;
                    warn!(publisher = %self.name, depth, queue_size = self.queue_size, "queue above high-water mark");
                } else if depth < 4 && self.high_water_tripped {
                    self.high_water_tripped = false;
                    debug!(publisher = %self.name, depth, "queue drained below low-water mark");
                }
                OfferOutcome::Enqueued
            }
            Err(_) => {
                self.lost += 1;
                OfferOutcome::Overflowed { lost: self.lost }
            }
        }
    }

    /// Surfaces `PublisherOverflow` once `lost` reaches `max_lost`, unless
    /// the publisher is configured to suspend its upstream couplers instead.
    pub fn overflow_action(&self, lost: u64) -> Option<PublisherOverflow> {
        if lost < self.max_lost || self.suspend_on_overflow {
            return None;
        }
        Some(PublisherOverflow {
            publisher: self.name.clone(),
            lost,
            max_lost: self.max_lost,
        })
    }

    pub fn should_suspend_upstream(&self, lost: u64) -> bool {
        self.suspend_on_overflow && lost >= self.max_lost
    }

    /// Couplers this publisher subscribes to; empty means all of them.
    pub fn couplers(&self) -> &[String] {
        &self.couplers
    }

    pub fn is_above_high_water(&self) -> bool {
        self.high_water_tripped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterEntry, FilterKind, PublisherCommon};
    use nmea2k::message::RawN2kMessage;

    fn routed(pgn: u32, source: u8) -> RoutedMessage {
        RoutedMessage {
            coupler: "can0".to_string(),
            envelope: MessageEnvelope::Nmea2000Raw(RawN2kMessage::new(pgn, 3, source, 255, vec![0; 8])),
        }
    }

    #[test]
    fn empty_filter_set_accepts_everything_by_default() {
        let mut filters = FilterSet::new(FilterSetConfig::default());
        assert!(filters.accepts(&routed(129029, 1)));
    }

    #[test]
    fn select_entry_passes_only_matching_pgn() {
        let config = FilterSetConfig {
            entries: vec![FilterEntry {
                kind: FilterKind::Select,
                pgns: vec![129029],
                sources: vec![],
                min_period_ms: None,
            }],
            filter_select: false,
        };
        let mut filters = FilterSet::new(config);
        assert!(filters.accepts(&routed(129029, 1)));
        assert!(!filters.accepts(&routed(127250, 1)));
    }

    #[test]
    fn discard_entry_rejects_matching_pgn_and_passes_the_rest() {
        let config = FilterSetConfig {
            entries: vec![FilterEntry {
                kind: FilterKind::Discard,
                pgns: vec![130306],
                sources: vec![],
                min_period_ms: None,
            }],
            filter_select: true,
        };
        let mut filters = FilterSet::new(config);
        assert!(!filters.accepts(&routed(130306, 1)));
        assert!(filters.accepts(&routed(129029, 1)));
    }

    #[test]
    fn min_period_throttles_repeated_pgn() {
        let config = FilterSetConfig {
            entries: vec![FilterEntry {
                kind: FilterKind::Select,
                pgns: vec![129029],
                sources: vec![],
                min_period_ms: Some(10_000),
            }],
            filter_select: false,
        };
        let mut filters = FilterSet::new(config);
        assert!(filters.accepts(&routed(129029, 1)));
        assert!(!filters.accepts(&routed(129029, 1)));
    }

    fn publisher_config(queue_size: usize, max_lost: u64, suspend_on_overflow: bool) -> PublisherConfig {
        PublisherConfig::Trace {
            common: PublisherCommon {
                name: "trace0".to_string(),
                couplers: vec![],
                filters: FilterSetConfig::default(),
                queue_size,
                max_lost,
                suspend_on_overflow,
            },
            path: "trace0.trace".to_string(),
        }
    }

    #[test]
    fn offer_enqueues_until_queue_size_then_overflows() {
        let config = publisher_config(2, 5, false);
        let (mut publisher, mut rx) = Publisher::new(&config);

        assert!(matches!(publisher.offer(&routed(129029, 1)), OfferOutcome::Enqueued));
        assert!(matches!(publisher.offer(&routed(129029, 1)), OfferOutcome::Enqueued));
        assert!(matches!(
            publisher.offer(&routed(129029, 1)),
            OfferOutcome::Overflowed { lost: 1 }
        ));

        rx.try_recv().unwrap();
    }

    #[test]
    fn offer_is_not_applicable_for_unsubscribed_coupler() {
        let mut config = publisher_config(4, 5, false);
        if let PublisherConfig::Trace { common, .. } = &mut config {
            common.couplers = vec!["can1".to_string()];
        }
        let (mut publisher, _rx) = Publisher::new(&config);
        assert!(matches!(publisher.offer(&routed(129029, 1)), OfferOutcome::NotApplicable));
    }

    #[test]
    fn should_suspend_upstream_only_when_configured_and_past_max_lost() {
        let config = publisher_config(1, 2, true);
        let (publisher, _rx) = Publisher::new(&config);
        assert!(!publisher.should_suspend_upstream(1));
        assert!(publisher.should_suspend_upstream(2));
    }
}

/// Drives one publisher's consumer loop: drains its queue and hands each
/// message to `process_msg`. Runs until `stop` is set and the queue drains.
pub async fn run(
    name: String,
    mut rx: mpsc::Receiver<MessageEnvelope>,
    mut backend: PublisherBackend,
    stop: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(envelope) => backend.process_msg(&envelope).await,
                    None => break,
                }
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(500)), if stop.load(Ordering::Relaxed) => {
                break;
            }
        }
    }
    info!(publisher = %name, "stopped");
}
