//! Router top-level: builds couplers and publishers from config, owns their
//! ordered start and single-shot stop, and fans routed messages from every
//! coupler out to every subscribed publisher.
//!
//! There is no separate top-level "servers" collection: the publisher
//! kinds that listen for inbound clients (`tcp-server`, `grpc`) own their
//! listening socket directly inside their backend's `bind()`, so starting
//! publishers already starts whatever servers the configuration asks for.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use nmea2k::MessageEnvelope;

use crate::config::{Config, CouplerConfig, PublisherConfig};
use crate::coupler::{CanBackend, Coupler, CouplerBackend, LogReplayBackend, RoutedMessage, TcpBackend, TcpMode};
use crate::error::RouterError;
use crate::publisher::{self, InjectorBackend, Publisher, PublisherBackend, TcpServerBackend, TracePublisherBackend};

const OUTBOUND_QUEUE_SIZE: usize = 256;
const INJECTOR_QUEUE_SIZE: usize = 32;

struct CouplerHandle {
    config: CouplerConfig,
    suspension: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    stopped: bool,
}

struct PublisherHandle {
    publisher: Publisher,
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
    suspended_upstream: bool,
}

pub struct Router {
    config: Config,
    working_dir: PathBuf,
    report_interval: Duration,
    stop: Arc<AtomicBool>,
    couplers: HashMap<String, CouplerHandle>,
    publishers: Vec<PublisherHandle>,
    outbound_tx: mpsc::Sender<RoutedMessage>,
    fanout_rx: Option<mpsc::Receiver<RoutedMessage>>,
}

impl Router {
    pub fn new(config: Config, working_dir: PathBuf, report_interval_override: Option<u64>) -> Self {
        let report_interval = Duration::from_secs(report_interval_override.unwrap_or(config.report_interval_seconds));
        let (outbound_tx, _) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        Router {
            config,
            working_dir,
            report_interval,
            stop: Arc::new(AtomicBool::new(false)),
            couplers: HashMap::new(),
            publishers: Vec::new(),
            outbound_tx,
            fanout_rx: None,
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Builds every component and starts them in a fixed order: publishers
    /// first (which also start their servers and make injector senders
    /// available), then couplers.
    pub async fn start(&mut self) -> Result<(), RouterError> {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        self.outbound_tx = outbound_tx;

        let mut inbound_senders: HashMap<String, mpsc::Sender<MessageEnvelope>> = HashMap::new();
        let mut inbound_receivers: HashMap<String, mpsc::Receiver<MessageEnvelope>> = HashMap::new();
        for coupler_cfg in &self.config.couplers {
            let (tx, rx) = mpsc::channel(INJECTOR_QUEUE_SIZE);
            inbound_senders.insert(coupler_cfg.name().to_string(), tx);
            inbound_receivers.insert(coupler_cfg.name().to_string(), rx);
        }

        for pub_cfg in self.config.publishers.clone() {
            self.start_publisher(&pub_cfg, &inbound_senders).await?;
        }

        for coupler_cfg in self.config.couplers.clone() {
            let rx = inbound_receivers
                .remove(coupler_cfg.name())
                .expect("a channel was pre-created above for every configured coupler");
            self.start_coupler(&coupler_cfg, rx).await?;
        }

        self.fanout_rx = Some(outbound_rx);
        Ok(())
    }

    async fn start_publisher(
        &mut self,
        pub_cfg: &PublisherConfig,
        inbound_senders: &HashMap<String, mpsc::Sender<MessageEnvelope>>,
    ) -> Result<(), RouterError> {
        let (publisher, rx) = Publisher::new(pub_cfg);
        let backend = self.build_publisher_backend(pub_cfg, inbound_senders).await?;
        let pub_stop = Arc::new(AtomicBool::new(false));
        let name = publisher.name.clone();
        let join = tokio::spawn(publisher::run(name.clone(), rx, backend, pub_stop.clone()));
        info!(publisher = %name, "started");
        self.publishers.push(PublisherHandle {
            publisher,
            stop: pub_stop,
            join,
            suspended_upstream: false,
        });
        Ok(())
    }

    async fn build_publisher_backend(
        &self,
        pub_cfg: &PublisherConfig,
        inbound_senders: &HashMap<String, mpsc::Sender<MessageEnvelope>>,
    ) -> Result<PublisherBackend, RouterError> {
        let name = pub_cfg.name().to_string();
        match pub_cfg {
            PublisherConfig::TcpServer { bind, .. } => {
                let backend = TcpServerBackend::bind(name, bind)
                    .await
                    .map_err(|e| RouterError::Dependency(format!("publisher bind failed: {e}")))?;
                Ok(PublisherBackend::TcpServer(backend))
            }
            PublisherConfig::Grpc { bind, .. } => {
                let backend = TcpServerBackend::bind(name, bind)
                    .await
                    .map_err(|e| RouterError::Dependency(format!("publisher bind failed: {e}")))?;
                Ok(PublisherBackend::Grpc(backend))
            }
            PublisherConfig::Trace { path, .. } => {
                let full_path = self.working_dir.join(path);
                let backend = TracePublisherBackend::open(&full_path)
                    .map_err(|e| RouterError::Dependency(format!("trace publisher open failed: {e}")))?;
                Ok(PublisherBackend::Trace(backend))
            }
            PublisherConfig::Injector { target_coupler, .. } => {
                let sender = inbound_senders.get(target_coupler).cloned().ok_or_else(|| {
                    RouterError::Dependency(format!("injector publisher targets unknown coupler '{target_coupler}'"))
                })?;
                Ok(PublisherBackend::Injector(InjectorBackend::new(target_coupler.clone(), sender)))
            }
        }
    }

    async fn start_coupler(
        &mut self,
        coupler_cfg: &CouplerConfig,
        inbound_rx: mpsc::Receiver<MessageEnvelope>,
    ) -> Result<(), RouterError> {
        let backend = self.build_coupler_backend(coupler_cfg)?;
        let coupler = Coupler::new(coupler_cfg, backend, &self.working_dir);
        let suspension = coupler.suspension_handle();
        let name = coupler.name.clone();
        let coupler_stop = Arc::new(AtomicBool::new(false));
        let outbound_tx = self.outbound_tx.clone();
        let report_interval = self.report_interval;
        let join = tokio::spawn(coupler.run(outbound_tx, inbound_rx, coupler_stop.clone(), report_interval));
        info!(coupler = %name, "started");
        self.couplers.insert(
            name,
            CouplerHandle {
                config: coupler_cfg.clone(),
                suspension,
                stop: coupler_stop,
                join: Some(join),
                stopped: false,
            },
        );
        Ok(())
    }

    fn build_coupler_backend(&self, coupler_cfg: &CouplerConfig) -> Result<CouplerBackend, RouterError> {
        let app = &self.config.application;
        match coupler_cfg {
            CouplerConfig::Can { interface, common, .. } => {
                let backend = CanBackend::new(
                    common.name.clone(),
                    interface.clone(),
                    app.manufacturer_id,
                    app.resolved_identity_root(),
                    app.first_address,
                    app.max_applications,
                )?;
                Ok(CouplerBackend::Can(backend))
            }
            CouplerConfig::Tcp {
                common, host, port, accept_master,
            } => {
                let mode = if *accept_master {
                    TcpMode::TcpAcceptMaster(format!("{host}:{port}"))
                } else {
                    TcpMode::TcpClient(host.clone(), *port)
                };
                Ok(CouplerBackend::Tcp(TcpBackend::new(common.name.clone(), mode)))
            }
            CouplerConfig::Udp { common, host, port } => Ok(CouplerBackend::Udp(TcpBackend::new(
                common.name.clone(),
                TcpMode::Udp(format!("{host}:{port}")),
            ))),
            CouplerConfig::LogReplay { common, path, pacing } => Ok(CouplerBackend::LogReplay(LogReplayBackend::new(
                common.name.clone(),
                self.working_dir.join(path),
                *pacing,
            ))),
            CouplerConfig::GrpcIngest { common, bind } => Ok(CouplerBackend::GrpcIngest(TcpBackend::new(
                common.name.clone(),
                TcpMode::GrpcIngest(bind.clone()),
            ))),
            CouplerConfig::Serial { common, device, .. } => Ok(CouplerBackend::Serial {
                device: format!("{} ({device})", common.name),
            }),
        }
    }

    /// Drives the fan-out loop and blocks until `stop` is set (by
    /// `request_stop` or a SIGINT handler) and every worker has drained.
    pub async fn run(&mut self) -> Result<(), RouterError> {
        let mut outbound_rx = self.fanout_rx.take().expect("start() must run before run()");
        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    match msg {
                        Some(routed) => self.dispatch(routed),
                        None => break,
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(250)), if self.stop.load(Ordering::Relaxed) => {
                    break;
                }
            }
        }
        self.shutdown().await;
        Ok(())
    }

    fn dispatch(&mut self, routed: RoutedMessage) {
        let mut suspend: Vec<Vec<String>> = Vec::new();
        let mut resume: Vec<Vec<String>> = Vec::new();

        for handle in &mut self.publishers {
            match handle.publisher.offer(&routed) {
                publisher::OfferOutcome::NotApplicable | publisher::OfferOutcome::Enqueued => {}
                publisher::OfferOutcome::Overflowed { lost } => {
                    if handle.publisher.should_suspend_upstream(lost) && !handle.suspended_upstream {
                        handle.suspended_upstream = true;
                        warn!(publisher = %handle.publisher.name, lost, "suspending upstream couplers on overflow");
                        suspend.push(handle.publisher.couplers().to_vec());
                    } else if let Some(overflow) = handle.publisher.overflow_action(lost) {
                        warn!("{overflow}");
                    }
                }
            }
            if handle.suspended_upstream && !handle.publisher.is_above_high_water() {
                handle.suspended_upstream = false;
                resume.push(handle.publisher.couplers().to_vec());
            }
        }

        for targets in suspend {
            self.set_suspension(&targets, true);
        }
        for targets in resume {
            self.set_suspension(&targets, false);
        }
    }

    fn set_suspension(&self, targets: &[String], value: bool) {
        if targets.is_empty() {
            for coupler in self.couplers.values() {
                coupler.suspension.store(value, Ordering::Relaxed);
            }
        } else {
            for name in targets {
                if let Some(coupler) = self.couplers.get(name) {
                    coupler.suspension.store(value, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    async fn shutdown(&mut self) {
        for handle in self.couplers.values() {
            handle.stop.store(true, Ordering::Relaxed);
        }
        for handle in self.publishers.iter() {
            handle.stop.store(true, Ordering::Relaxed);
        }
        for handle in self.couplers.values_mut() {
            if let Some(join) = handle.join.take() {
                let _ = join.await;
            }
            handle.stopped = true;
        }
        for handle in self.publishers.drain(..) {
            let _ = handle.join.await;
        }
        info!("router stopped");
    }

    /// Runtime command: if `name` is a coupler that already ran and
    /// stopped, detach it and instantiate a fresh one from the same
    /// declarative config; otherwise this is a no-op (there is nothing to
    /// restart, and a never-started coupler is requested via `start()`).
    ///
    /// Any injector publisher built against the original coupler's inbound
    /// channel keeps its old sender, which now targets a dropped receiver.
    /// Restarting a coupler an injector feeds leaves that injection path
    /// silently inert rather than re-wired to the new instance.
    pub async fn restart_coupler(&mut self, name: &str) -> Result<(), RouterError> {
        let Some(existing) = self.couplers.get(name) else {
            return Ok(());
        };
        if !existing.stopped {
            return Ok(());
        }
        let cfg = existing.config.clone();
        self.couplers.remove(name);
        let (_tx, rx) = mpsc::channel(INJECTOR_QUEUE_SIZE);
        self.start_coupler(&cfg, rx).await
    }
}
