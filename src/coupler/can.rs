//! The CAN coupler backend: wraps `nmea2k`'s CAN interface, local
//! application (address claim), and device registry behind the generic
//! coupler contract.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use nmea2k::application::{
    AddressPool, CanApplication, GroupFunctionKind, OutgoingAction, PGN_ADDRESS_CLAIM,
    PGN_COMMANDED_ADDRESS, PGN_CONFIGURATION_INFORMATION, PGN_GROUP_FUNCTION, PGN_HEARTBEAT,
    PGN_ISO_REQUEST, PGN_PGN_LIST, PGN_PRODUCT_INFORMATION,
};
use nmea2k::arbitration::ArbitrationId;
use nmea2k::canbus::{
    spawn_read_worker, spawn_write_worker, AddressClaimedGate, CanInterface, DecodedFrame,
    FrameDispatcher, LocalAddressSet, OutgoingFrame, WriteQueueFullCounter,
};
use nmea2k::device_registry::DeviceRegistry;
use nmea2k::field::decode_variable_string;
use nmea2k::message::RawN2kMessage;
use nmea2k::name::{IsoName, IsoNameFields};
use nmea2k::error::CanError;
use nmea2k::schema::builtin::standard_registry;
use nmea2k::schema::Registry;
use nmea2k::MessageEnvelope;

use crate::error::CouplerOpenRefused;

use super::ReadOutcome;

const BROADCAST_ADDRESS: u8 = 255;
const TICK_INTERVAL: Duration = Duration::from_millis(250);

pub struct CanBackend {
    name: String,
    channel: String,
    manufacturer_id: u16,
    identity_root: u32,
    first_address: u8,
    max_applications: u8,
    registry: Registry,

    interface: Option<Arc<CanInterface>>,
    dispatcher: FrameDispatcher,
    application: Option<CanApplication>,
    address_pool: Option<AddressPool>,
    local_addresses: LocalAddressSet,
    gate: AddressClaimedGate,
    device_registry: DeviceRegistry,

    read_rx: Option<Receiver<DecodedFrame>>,
    write_tx: Option<SyncSender<OutgoingFrame>>,
    write_counter: Arc<WriteQueueFullCounter>,
    read_stop: Option<Arc<AtomicBool>>,
    halted: bool,
    last_tick: Instant,
}

impl CanBackend {
    pub fn new(
        name: String,
        channel: String,
        manufacturer_id: u16,
        identity_root: u32,
        first_address: u8,
        max_applications: u8,
    ) -> Result<Self, nmea2k::error::SchemaError> {
        Ok(CanBackend {
            name,
            channel,
            manufacturer_id,
            identity_root,
            first_address,
            max_applications,
            registry: standard_registry()?,
            interface: None,
            dispatcher: FrameDispatcher::new(),
            application: None,
            address_pool: None,
            local_addresses: LocalAddressSet::new(),
            gate: AddressClaimedGate::new(),
            device_registry: DeviceRegistry::new(),
            read_rx: None,
            write_tx: None,
            write_counter: Arc::new(WriteQueueFullCounter::default()),
            read_stop: None,
            halted: false,
            last_tick: Instant::now(),
        })
    }

    pub async fn open(&mut self) -> Result<(), CouplerOpenRefused> {
        if self.halted {
            return Err(CouplerOpenRefused {
                coupler: self.name.clone(),
                reason: "address pool exhausted, node halted".to_string(),
            });
        }
        let channel = self.channel.clone();
        let interface = tokio::task::spawn_blocking(move || CanInterface::open(&channel))
            .await
            .map_err(|e| CouplerOpenRefused {
                coupler: self.name.clone(),
                reason: format!("join error opening CAN interface: {e}"),
            })?
            .map_err(|e: CanError| CouplerOpenRefused {
                coupler: self.name.clone(),
                reason: e.to_string(),
            })?;
        let interface = Arc::new(interface);

        let (read_tx, read_rx) = std::sync::mpsc::channel();
        let (write_tx, write_rx) = std::sync::mpsc::sync_channel(64);
        let stop = Arc::new(AtomicBool::new(false));

        spawn_read_worker(interface.clone(), stop.clone(), read_tx);
        spawn_write_worker(interface.clone(), write_rx, self.gate.clone());

        self.interface = Some(interface);
        self.read_rx = Some(read_rx);
        self.write_tx = Some(write_tx);
        self.read_stop = Some(stop);

        let mut pool = AddressPool::new(self.first_address, self.max_applications, self.identity_root);
        let identity_number = pool.next_identity_number();
        let iso_name = IsoName::from_fields(IsoNameFields {
            identity_number,
            manufacturer_code: self.manufacturer_id,
            device_function: 130, // PC Gateway, per NMEA2000's device function table
            device_class: 25,     // Inter/Intranetwork Device
            industry_group: 4,    // Marine
            arbitrary_address_capable: true,
            ..Default::default()
        });
        let address = self.first_address;
        self.local_addresses.insert(address);
        let mut app = CanApplication::new(address, iso_name);
        let actions = app.on_bus_ready();
        self.application = Some(app);
        self.address_pool = Some(pool);
        self.send_actions(actions);
        info!(coupler = %self.name, channel = %self.channel, "CAN application claiming address {address}");
        Ok(())
    }

    pub async fn read_one(&mut self) -> ReadOutcome {
        let rx = match self.read_rx.take() {
            Some(rx) => rx,
            None => return ReadOutcome::Closed,
        };
        let result = tokio::task::spawn_blocking(move || {
            let frame = rx.recv_timeout(TICK_INTERVAL);
            (rx, frame)
        })
        .await;

        let (rx, frame) = match result {
            Ok(pair) => pair,
            Err(_) => return ReadOutcome::Closed,
        };
        self.read_rx = Some(rx);

        if self.last_tick.elapsed() >= TICK_INTERVAL {
            self.tick();
        }

        let frame = match frame {
            Ok(f) => f,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => return ReadOutcome::Timeout,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return ReadOutcome::Closed,
        };

        let registry = &self.registry;
        let dispatch_result = self
            .dispatcher
            .dispatch(&frame, |pgn| registry.lookup(pgn, 0).map(|d| d.is_fast_packet).unwrap_or(false));

        let message = match dispatch_result {
            Ok(Some(m)) => m,
            Ok(None) => return ReadOutcome::Timeout,
            Err(e) => {
                warn!(coupler = %self.name, "fast-packet reassembly error: {e}");
                return ReadOutcome::Timeout;
            }
        };

        if let Some(discovery) = self.observe_device(&message) {
            self.send_actions(discovery);
        }

        if message.is_iso_protocol() {
            self.handle_iso_message(&message);
            return ReadOutcome::Timeout;
        }

        ReadOutcome::Message(MessageEnvelope::Nmea2000Raw(message))
    }

    pub async fn send(&mut self, envelope: &MessageEnvelope) -> std::io::Result<()> {
        let MessageEnvelope::Nmea2000Raw(msg) = envelope else {
            return Ok(());
        };
        self.enqueue(msg.pgn, msg.priority, msg.destination, msg.payload.clone(), msg.is_iso_protocol());
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(stop) = self.read_stop.take() {
            stop.store(true, Ordering::Relaxed);
        }
        self.write_tx = None;
        self.interface = None;
        self.read_rx = None;
    }

    fn tick(&mut self) {
        self.last_tick = Instant::now();
        if let Some(app) = self.application.as_mut() {
            let actions = app.tick(Instant::now());
            self.send_actions(actions);
        }
    }

    fn observe_device(&mut self, message: &RawN2kMessage) -> Option<Vec<OutgoingAction>> {
        let name = if message.pgn == PGN_ADDRESS_CLAIM && message.payload.len() >= 8 {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&message.payload[..8]);
            Some(IsoName::from_le_bytes(bytes))
        } else {
            None
        };
        let requests = self.device_registry.observe(message.source, name, message.pgn);
        if requests.is_empty() {
            return None;
        }
        debug!(coupler = %self.name, source = message.source, "discovered new device, requesting product info");
        Some(
            requests
                .into_iter()
                .map(|r| OutgoingAction::SendIsoRequest {
                    destination: r.destination,
                    requested_pgn: r.requested_pgn,
                })
                .collect(),
        )
    }

    fn handle_iso_message(&mut self, message: &RawN2kMessage) {
        let Some(mut app) = self.application.take() else { return };
        let mut pool = self.address_pool.take();
        let actions = match message.pgn {
            PGN_ADDRESS_CLAIM => {
                if message.payload.len() >= 8 {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(&message.payload[..8]);
                    let name = IsoName::from_le_bytes(bytes);
                    let local = self.local_addresses.clone();
                    app.on_address_claim_conflict(message.source, name, pool.as_mut().unwrap(), |a| local.contains(a))
                } else {
                    Vec::new()
                }
            }
            PGN_ISO_REQUEST if message.payload.len() >= 3 => {
                let requested_pgn = u32::from_le_bytes([message.payload[0], message.payload[1], message.payload[2], 0]);
                app.on_iso_request(message.source, message.destination, requested_pgn)
            }
            PGN_COMMANDED_ADDRESS if message.payload.len() >= 9 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&message.payload[..8]);
                let name = IsoName::from_le_bytes(bytes);
                app.on_commanded_address(name, message.payload[8])
            }
            PGN_GROUP_FUNCTION if message.payload.len() >= 5 => {
                let kind = GroupFunctionKind::from_raw(message.payload[0]);
                let function_pgn = u32::from_le_bytes([message.payload[1], message.payload[2], message.payload[3], 0]);
                app.on_group_function(message.source, kind, function_pgn, &message.payload[5..])
            }
            PGN_PRODUCT_INFORMATION => {
                if let Some(model_id) = decode_product_information_model_id(&message.payload) {
                    self.device_registry.record_product_information(message.source, model_id);
                }
                Vec::new()
            }
            PGN_CONFIGURATION_INFORMATION => {
                let (installation_1, installation_2, manufacturer_info) =
                    decode_configuration_information(&message.payload);
                self.device_registry.record_configuration_information(
                    message.source,
                    installation_1,
                    installation_2,
                    manufacturer_info,
                );
                Vec::new()
            }
            _ => Vec::new(),
        };

        for action in &actions {
            if let OutgoingAction::AddressChanged { old, new } = action {
                self.local_addresses.remove(*old);
                self.local_addresses.insert(*new);
            }
        }
        let halt = actions.iter().any(|a| matches!(a, OutgoingAction::Halt));

        self.application = Some(app);
        self.address_pool = pool;
        self.send_actions(actions);

        if halt {
            self.halted = true;
            self.close();
        }
    }

    fn send_actions(&mut self, actions: Vec<OutgoingAction>) {
        let Some(app) = self.application.as_ref() else { return };
        for action in actions {
            match action {
                OutgoingAction::SendAddressClaim { destination } => {
                    self.enqueue(PGN_ADDRESS_CLAIM, 6, destination, app.iso_name().to_le_bytes().to_vec(), true);
                }
                OutgoingAction::SendCannotClaim => {
                    self.gate.set_claimed(false);
                    // All-ones Name is the NMEA2000 "cannot claim" marker.
                    self.enqueue(PGN_ADDRESS_CLAIM, 6, BROADCAST_ADDRESS, vec![0xFF; 8], true);
                }
                OutgoingAction::SendIsoRequest { destination, requested_pgn } => {
                    let payload = requested_pgn.to_le_bytes()[..3].to_vec();
                    self.enqueue(PGN_ISO_REQUEST, 6, destination, payload, true);
                }
                OutgoingAction::SendProductInformation { destination } => {
                    self.enqueue(PGN_PRODUCT_INFORMATION, 6, destination, encode_product_information(app.product_information()), true);
                }
                OutgoingAction::SendConfigurationInformation { destination } => {
                    self.enqueue(
                        PGN_CONFIGURATION_INFORMATION,
                        6,
                        destination,
                        encode_configuration_information(app.configuration_information()),
                        true,
                    );
                }
                OutgoingAction::SendAcknowledgeGroupFunction {
                    destination,
                    function_pgn,
                    pgn_error_code,
                    parameter_error_codes,
                } => {
                    let mut payload = vec![GroupFunctionKind::Acknowledge as u8];
                    payload.extend_from_slice(&function_pgn.to_le_bytes()[..3]);
                    payload.push(pgn_error_code);
                    payload.push(parameter_error_codes.len() as u8);
                    payload.extend_from_slice(&parameter_error_codes);
                    self.enqueue(PGN_GROUP_FUNCTION, 6, destination, payload, true);
                }
                OutgoingAction::SendPgnList { destination } => {
                    self.enqueue(PGN_PGN_LIST, 6, destination, encode_pgn_list(), true);
                }
                OutgoingAction::SendHeartbeat => {
                    self.enqueue(PGN_HEARTBEAT, 7, BROADCAST_ADDRESS, encode_heartbeat(), true);
                }
                OutgoingAction::AddressChanged { .. } => {}
                OutgoingAction::Halt => {}
            }
        }
        self.gate.set_claimed(matches!(app.state(), nmea2k::application::AppState::Active));
    }

    fn enqueue(&self, pgn: u32, priority: u8, destination: u8, payload: Vec<u8>, is_iso_protocol: bool) {
        let Some(app) = self.application.as_ref() else { return };
        let Some(tx) = self.write_tx.as_ref() else { return };
        let source = app.address();
        let frames: Vec<(ArbitrationId, Vec<u8>)> = if payload.len() > 8 {
            nmea2k::fastpacket::split_into_frames(&payload, 0)
                .into_iter()
                .map(|f| (ArbitrationId::new(priority, pgn, source, destination), f.to_vec()))
                .collect()
        } else {
            vec![(ArbitrationId::new(priority, pgn, source, destination), payload)]
        };
        for (arbitration_id, data) in frames {
            let outgoing = OutgoingFrame { arbitration_id, data, is_iso_protocol };
            match tx.try_send(outgoing) {
                Ok(()) => self.write_counter.record_success(),
                Err(TrySendError::Full(_)) => {
                    let _ = self.write_counter.record_full(&self.channel);
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }
}

/// Mirrors `application::HEARTBEAT_INTERVAL`; the Heartbeat payload
/// reports its own update rate in milliseconds.
const HEARTBEAT_UPDATE_RATE_MS: u16 = 60_000;

/// The PGNs this node transmits, for ISO Requests on PGN List (126464).
/// List type byte `1` means "transmitted PGNs"; NMEA2000 expects a
/// separate response of type `0` for received PGNs, which this
/// pass-through router does not meaningfully restrict.
fn encode_pgn_list() -> Vec<u8> {
    const TRANSMITTED_PGNS: [u32; 7] = [
        PGN_ADDRESS_CLAIM,
        PGN_PRODUCT_INFORMATION,
        PGN_CONFIGURATION_INFORMATION,
        PGN_GROUP_FUNCTION,
        PGN_ISO_REQUEST,
        PGN_PGN_LIST,
        PGN_HEARTBEAT,
    ];
    let mut payload = vec![1u8];
    for pgn in TRANSMITTED_PGNS {
        payload.extend_from_slice(&pgn.to_le_bytes()[..3]);
    }
    payload
}

fn encode_heartbeat() -> Vec<u8> {
    let mut payload = HEARTBEAT_UPDATE_RATE_MS.to_le_bytes().to_vec();
    payload.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    payload
}

fn ascii_field(s: &str, len: usize) -> Vec<u8> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.resize(len, b' ');
    bytes.truncate(len);
    bytes
}

fn encode_product_information(info: &nmea2k::application::ProductInformation) -> Vec<u8> {
    let mut payload = Vec::with_capacity(134);
    payload.extend_from_slice(&info.nmea2000_version.to_le_bytes());
    payload.extend_from_slice(&info.product_code.to_le_bytes());
    payload.extend_from_slice(&ascii_field(&info.model_id, 32));
    payload.extend_from_slice(&ascii_field(&info.software_version, 32));
    payload.extend_from_slice(&ascii_field(&info.model_version, 32));
    payload.push(info.certification_level);
    payload.push(info.load_equivalency);
    payload.extend_from_slice(&ascii_field(&info.serial_code, 32));
    payload
}

fn encode_configuration_information(info: &nmea2k::application::ConfigurationInformation) -> Vec<u8> {
    let mut payload = Vec::new();
    for field in [&info.installation_1, &info.installation_2, &info.manufacturer_info] {
        let bytes = field.as_bytes();
        payload.push((bytes.len() + 2) as u8);
        payload.push(1);
        payload.extend_from_slice(bytes);
    }
    payload
}

/// Pulls `model_id` (the first ASCII field, offset 4, 32 bytes) out of a
/// remote device's incoming Product Information (126996) response.
fn decode_product_information_model_id(payload: &[u8]) -> Option<String> {
    if payload.len() < 36 {
        return None;
    }
    Some(
        String::from_utf8_lossy(&payload[4..36])
            .trim_end_matches(['\0', '@', ' '])
            .to_string(),
    )
}

/// Pulls the three variable-length strings out of a remote device's
/// incoming Configuration Information (126998) response, in the same
/// `[len, control, text...]` wire format `encode_configuration_information`
/// writes.
fn decode_configuration_information(payload: &[u8]) -> (String, String, String) {
    let mut offset = 0;
    let mut fields = [String::new(), String::new(), String::new()];
    for field in fields.iter_mut() {
        match decode_variable_string(payload, offset) {
            Ok(Some(text)) => {
                let len = payload[offset] as usize;
                *field = text;
                offset += len;
            }
            _ => break,
        }
    }
    let [installation_1, installation_2, manufacturer_info] = fields;
    (installation_1, installation_2, manufacturer_info)
}
