//! The local CAN application: owns the ISO Name, runs address-claim
//! arbitration, answers ISO Request/Group Function/Commanded Address
//! traffic.
//!
//! The post-claim settle delay is driven by an explicit `tick(now)` the
//! caller polls, since this library crate has no executor of its own.
//! The router binary's event loop calls `tick` the way it calls every
//! other periodic check.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::field::decode_variable_string;
use crate::name::{IsoName, IsoNameFields};

const ADDRESS_CLAIM_DELAY: Duration = Duration::from_millis(250);
const NO_ADDRESS_AVAILABLE: u8 = 254;
/// Default Heartbeat (126993) transmission interval; NMEA2000 allows this
/// to be reconfigured per-node between 1s and 60s, but this router does
/// not expose that control.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

pub const PGN_ISO_ACK: u32 = 59392;
pub const PGN_ISO_REQUEST: u32 = 59904;
pub const PGN_TP_DT: u32 = 60160;
pub const PGN_TP_CM: u32 = 60416;
pub const PGN_ADDRESS_CLAIM: u32 = 60928;
pub const PGN_COMMANDED_ADDRESS: u32 = 65240;
pub const PGN_GROUP_FUNCTION: u32 = 126208;
pub const PGN_PGN_LIST: u32 = 126464;
pub const PGN_HEARTBEAT: u32 = 126993;
pub const PGN_PRODUCT_INFORMATION: u32 = 126996;
pub const PGN_CONFIGURATION_INFORMATION: u32 = 126998;

pub const BROADCAST_ADDRESS: u8 = 255;

/// Allocates addresses and ISO Name identity numbers for every local
/// application on one controller.
pub struct AddressPool {
    candidates: Vec<u8>,
    next_index: usize,
    unique_id_root: u32,
    application_count: u32,
}

impl AddressPool {
    pub fn new(first_address: u8, max_applications: u8, unique_id_root: u32) -> Self {
        let span = 2 * max_applications as u16 + 1;
        let candidates = (0..span)
            .map(|i| (first_address as u16 + i) as u8)
            .collect();
        let bits = (max_applications.saturating_sub(1)).max(1).ilog2() + 1;
        AddressPool {
            candidates,
            next_index: 0,
            unique_id_root: unique_id_root << bits,
            application_count: 0,
        }
    }

    /// Returns the next candidate address not already claimed locally, or
    /// `NO_ADDRESS_AVAILABLE` (254) when the pool is exhausted.
    pub fn next_available(&mut self, is_in_use: impl Fn(u8) -> bool) -> u8 {
        while self.next_index < self.candidates.len() {
            let candidate = self.candidates[self.next_index];
            self.next_index += 1;
            if !is_in_use(candidate) {
                return candidate;
            }
        }
        NO_ADDRESS_AVAILABLE
    }

    pub fn next_identity_number(&mut self) -> u32 {
        let id = self.unique_id_root | self.application_count;
        self.application_count += 1;
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    WaitForBus,
    AddressClaim,
    Active,
}

#[derive(Debug, Clone)]
pub struct ProductInformation {
    pub nmea2000_version: u16,
    pub product_code: u16,
    pub model_id: String,
    pub software_version: String,
    pub model_version: String,
    pub certification_level: u8,
    pub load_equivalency: u8,
    pub serial_code: String,
}

impl Default for ProductInformation {
    fn default() -> Self {
        ProductInformation {
            nmea2000_version: 2100,
            product_code: 1226,
            model_id: "NMEA MESSAGE ROUTER".to_string(),
            software_version: format!("Version {}", env!("CARGO_PKG_VERSION")),
            model_version: "ROUTER".to_string(),
            certification_level: 1,
            load_equivalency: 1,
            serial_code: "00001".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigurationInformation {
    pub installation_1: String,
    pub installation_2: String,
    pub manufacturer_info: String,
}

/// An effect the application wants performed: send a frame, change this
/// node's own address, or halt the controller. The caller (router binary)
/// turns these into actual CAN sends.
#[derive(Debug, Clone)]
pub enum OutgoingAction {
    SendAddressClaim { destination: u8 },
    SendProductInformation { destination: u8 },
    SendConfigurationInformation { destination: u8 },
    SendPgnList { destination: u8 },
    SendHeartbeat,
    SendIsoRequest { destination: u8, requested_pgn: u32 },
    /// A Group Function Acknowledge. `pgn_error_code` reports whether
    /// `function_pgn` itself is supported; `parameter_error_codes` carries
    /// one result code per parameter the Command function attempted to
    /// change, in the order they were applied.
    SendAcknowledgeGroupFunction {
        destination: u8,
        function_pgn: u32,
        pgn_error_code: u8,
        parameter_error_codes: Vec<u8>,
    },
    SendCannotClaim,
    AddressChanged { old: u8, new: u8 },
    Halt,
}

/// Group Function sub-functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupFunctionKind {
    Request = 0,
    Command = 1,
    Acknowledge = 2,
    ReadFields = 3,
    WriteFields = 5,
}

impl GroupFunctionKind {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(GroupFunctionKind::Request),
            1 => Some(GroupFunctionKind::Command),
            2 => Some(GroupFunctionKind::Acknowledge),
            3 => Some(GroupFunctionKind::ReadFields),
            5 => Some(GroupFunctionKind::WriteFields),
            _ => None,
        }
    }
}

/// The local NMEA2000 node's network-management state machine.
pub struct CanApplication {
    address: u8,
    iso_name: IsoName,
    state: AppState,
    claim_deadline: Option<Instant>,
    last_heartbeat: Option<Instant>,
    product_information: ProductInformation,
    configuration_information: ConfigurationInformation,
}

impl CanApplication {
    pub fn new(address: u8, iso_name: IsoName) -> Self {
        info!("CAN application claiming address {address} with name {iso_name}");
        CanApplication {
            address,
            iso_name,
            state: AppState::WaitForBus,
            claim_deadline: None,
            last_heartbeat: None,
            product_information: ProductInformation::default(),
            configuration_information: ConfigurationInformation::default(),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn iso_name(&self) -> IsoName {
        self.iso_name
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    /// Called once the CAN interface signals bus-ready.
    pub fn on_bus_ready(&mut self) -> Vec<OutgoingAction> {
        self.state = AppState::AddressClaim;
        self.claim_deadline = Some(Instant::now() + ADDRESS_CLAIM_DELAY);
        vec![OutgoingAction::SendAddressClaim {
            destination: BROADCAST_ADDRESS,
        }]
    }

    /// Polled periodically by the caller; expires the address-claim
    /// delay, transitions to `Active`, and broadcasts Heartbeat (126993)
    /// once active at `HEARTBEAT_INTERVAL`.
    pub fn tick(&mut self, now: Instant) -> Vec<OutgoingAction> {
        let mut actions = Vec::new();

        if self.state == AppState::AddressClaim {
            if let Some(deadline) = self.claim_deadline {
                if now >= deadline {
                    debug!("address claim delay for {} exhausted", self.address);
                    self.state = AppState::Active;
                    self.claim_deadline = None;
                    self.last_heartbeat = Some(now);
                    actions.push(OutgoingAction::SendIsoRequest {
                        destination: BROADCAST_ADDRESS,
                        requested_pgn: PGN_ADDRESS_CLAIM,
                    });
                }
            }
        }

        if self.state == AppState::Active {
            let due = match self.last_heartbeat {
                Some(last) => now.duration_since(last) >= HEARTBEAT_INTERVAL,
                None => true,
            };
            if due {
                self.last_heartbeat = Some(now);
                actions.push(OutgoingAction::SendHeartbeat);
            }
        }

        actions
    }

    /// An incoming Address Claim (60928) from another node claiming our
    /// address. Compares ISO Name values; the lower one wins the address.
    pub fn on_address_claim_conflict(
        &mut self,
        from_address: u8,
        from_name: IsoName,
        pool: &mut AddressPool,
        in_use: impl Fn(u8) -> bool,
    ) -> Vec<OutgoingAction> {
        if from_address != self.address {
            return Vec::new();
        }
        warn!(
            "address claim conflict on {} from name {}, ours {}",
            self.address, from_name, self.iso_name
        );
        if self.iso_name.wins_against(&from_name) {
            // We win: re-assert our claim.
            return vec![OutgoingAction::SendAddressClaim {
                destination: BROADCAST_ADDRESS,
            }];
        }

        let new_address = pool.next_available(in_use);
        if new_address == NO_ADDRESS_AVAILABLE {
            warn!("address pool exhausted, going offline");
            return vec![OutgoingAction::SendCannotClaim, OutgoingAction::Halt];
        }
        self.change_address(new_address)
    }

    fn change_address(&mut self, new_address: u8) -> Vec<OutgoingAction> {
        let old = self.address;
        self.address = new_address;
        info!("reassigning address {old} -> {new_address}");
        self.state = AppState::AddressClaim;
        self.claim_deadline = Some(Instant::now() + ADDRESS_CLAIM_DELAY);
        vec![
            OutgoingAction::AddressChanged {
                old,
                new: new_address,
            },
            OutgoingAction::SendAddressClaim {
                destination: BROADCAST_ADDRESS,
            },
        ]
    }

    /// An ISO Request (59904) addressed to us or broadcast.
    pub fn on_iso_request(&self, source: u8, destination: u8, requested_pgn: u32) -> Vec<OutgoingAction> {
        if destination != self.address && destination != BROADCAST_ADDRESS {
            return Vec::new();
        }
        match requested_pgn {
            PGN_ADDRESS_CLAIM => vec![OutgoingAction::SendAddressClaim { destination: source }],
            PGN_PRODUCT_INFORMATION => vec![OutgoingAction::SendProductInformation { destination: source }],
            PGN_CONFIGURATION_INFORMATION => {
                vec![OutgoingAction::SendConfigurationInformation { destination: source }]
            }
            PGN_PGN_LIST => vec![OutgoingAction::SendPgnList { destination: source }],
            other => {
                debug!("ISO request for unsupported pgn {other} from {source}");
                Vec::new()
            }
        }
    }

    /// A Commanded Address (65240): change address only if the embedded
    /// name matches ours.
    pub fn on_commanded_address(&mut self, commanded_name: IsoName, commanded_address: u8) -> Vec<OutgoingAction> {
        if commanded_name != self.iso_name {
            warn!(
                "commanded address rejected: name mismatch (requested {}, ours {})",
                commanded_name, self.iso_name
            );
            return Vec::new();
        }
        self.change_address(commanded_address)
    }

    /// A Group Function (126208). `function_pgn` is the PGN the function
    /// applies to; `parameters` carries raw per-parameter payload bytes
    /// for Command functions, ignored for everything else.
    pub fn on_group_function(
        &mut self,
        source: u8,
        kind: Option<GroupFunctionKind>,
        function_pgn: u32,
        parameters: &[u8],
    ) -> Vec<OutgoingAction> {
        let supported = matches!(kind, Some(GroupFunctionKind::Command))
            && matches!(function_pgn, PGN_ADDRESS_CLAIM | PGN_CONFIGURATION_INFORMATION);

        if !supported {
            return vec![OutgoingAction::SendAcknowledgeGroupFunction {
                destination: source,
                function_pgn,
                pgn_error_code: 1,
                parameter_error_codes: Vec::new(),
            }];
        }

        let parameter_error_codes = match function_pgn {
            PGN_ADDRESS_CLAIM => self.apply_name_command(parameters),
            PGN_CONFIGURATION_INFORMATION => self.apply_configuration_command(parameters),
            _ => unreachable!("checked by `supported` above"),
        };

        vec![OutgoingAction::SendAcknowledgeGroupFunction {
            destination: source,
            function_pgn,
            pgn_error_code: 0,
            parameter_error_codes,
        }]
    }

    /// Rewrites ISO Name subfields per a Command Group Function on PGN
    /// 60928. `parameters` is a sequence of `(parameter_number, raw value)`
    /// entries, each parameter's value width given by
    /// `IsoName::parameter_byte_width`; each is applied independently and
    /// yields its own result code (`0` = ok, `3` = out of range/malformed).
    fn apply_name_command(&mut self, parameters: &[u8]) -> Vec<u8> {
        let mut results = Vec::new();
        let mut offset = 0;
        while offset < parameters.len() {
            let parameter_number = parameters[offset];
            offset += 1;
            let Some(width) = IsoName::parameter_byte_width(parameter_number) else {
                results.push(3);
                break;
            };
            if offset + width > parameters.len() {
                results.push(3);
                break;
            }
            let mut raw: u64 = 0;
            for (i, byte) in parameters[offset..offset + width].iter().enumerate() {
                raw |= (*byte as u64) << (8 * i);
            }
            offset += width;

            match self.iso_name.with_field_set(parameter_number, raw) {
                Ok(updated) => {
                    debug!(
                        "command group function rewriting name field {parameter_number}: {} -> {}",
                        self.iso_name, updated
                    );
                    self.iso_name = updated;
                    results.push(0);
                }
                Err(code) => results.push(code),
            }
        }
        results
    }

    /// Rewrites configuration-information fields per a Command Group
    /// Function on PGN 126998. `parameters` is a sequence of
    /// `(parameter_number, variable-length string)` entries, the string in
    /// the same `[len, control, text...]` wire format as
    /// `decode_variable_string`; parameter `1`/`2`/`3` address
    /// `installation_1`/`installation_2`/`manufacturer_info` respectively.
    fn apply_configuration_command(&mut self, parameters: &[u8]) -> Vec<u8> {
        let mut results = Vec::new();
        let mut offset = 0;
        while offset < parameters.len() {
            let parameter_number = parameters[offset];
            let string_offset = offset + 1;
            match decode_variable_string(parameters, string_offset) {
                Ok(Some(text)) => {
                    let len = parameters[string_offset] as usize;
                    match parameter_number {
                        1 => self.configuration_information.installation_1 = text,
                        2 => self.configuration_information.installation_2 = text,
                        3 => self.configuration_information.manufacturer_info = text,
                        _ => {
                            results.push(3);
                            offset = string_offset + len;
                            continue;
                        }
                    }
                    results.push(0);
                    offset = string_offset + len;
                }
                _ => {
                    results.push(3);
                    break;
                }
            }
        }
        results
    }

    pub fn product_information(&self) -> &ProductInformation {
        &self.product_information
    }

    pub fn configuration_information(&self) -> &ConfigurationInformation {
        &self.configuration_information
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_name(identity: u32) -> IsoName {
        IsoName::from_fields(IsoNameFields {
            identity_number: identity,
            manufacturer_code: 999,
            device_class: 25,
            device_function: 130,
            industry_group: 4,
            arbitrary_address_capable: true,
            ..Default::default()
        })
    }

    #[test]
    fn address_pool_skips_addresses_in_use() {
        let mut pool = AddressPool::new(128, 8, 0x1234);
        let addr = pool.next_available(|a| a == 128);
        assert_eq!(addr, 129);
    }

    #[test]
    fn address_pool_exhausts_to_sentinel() {
        let mut pool = AddressPool::new(0, 0, 0);
        // span = 2*0+1 = 1 candidate: address 0.
        assert_eq!(pool.next_available(|_| true), NO_ADDRESS_AVAILABLE);
    }

    #[test]
    fn bus_ready_transitions_to_address_claim() {
        let mut app = CanApplication::new(128, test_name(1));
        let actions = app.on_bus_ready();
        assert_eq!(app.state(), AppState::AddressClaim);
        assert!(matches!(actions[0], OutgoingAction::SendAddressClaim { destination: BROADCAST_ADDRESS }));
    }

    #[test]
    fn tick_after_deadline_activates() {
        let mut app = CanApplication::new(128, test_name(1));
        app.on_bus_ready();
        let actions = app.tick(Instant::now() + ADDRESS_CLAIM_DELAY + Duration::from_millis(1));
        assert_eq!(app.state(), AppState::Active);
        assert!(matches!(actions[0], OutgoingAction::SendIsoRequest { .. }));
    }

    #[test]
    fn lower_name_wins_and_reasserts_claim() {
        let mut app = CanApplication::new(128, test_name(1));
        let mut pool = AddressPool::new(128, 8, 0x1234);
        let higher = test_name(2);
        let actions = app.on_address_claim_conflict(128, higher, &mut pool, |_| false);
        assert_eq!(app.address(), 128);
        assert!(matches!(actions[0], OutgoingAction::SendAddressClaim { .. }));
    }

    #[test]
    fn higher_name_loses_and_changes_address() {
        let mut app = CanApplication::new(128, test_name(5));
        let mut pool = AddressPool::new(128, 8, 0x1234);
        let lower = test_name(1);
        let actions = app.on_address_claim_conflict(128, lower, &mut pool, |a| a == 128);
        assert_eq!(app.address(), 129);
        assert!(actions.iter().any(|a| matches!(a, OutgoingAction::AddressChanged { .. })));
    }

    #[test]
    fn commanded_address_requires_matching_name() {
        let mut app = CanApplication::new(128, test_name(1));
        let wrong_name = test_name(99);
        let actions = app.on_commanded_address(wrong_name, 140);
        assert_eq!(app.address(), 128);
        assert!(actions.is_empty());

        let actions = app.on_commanded_address(test_name(1), 140);
        assert_eq!(app.address(), 140);
        assert!(!actions.is_empty());
    }

    #[test]
    fn unsupported_group_function_acknowledges_error() {
        let mut app = CanApplication::new(128, test_name(1));
        let actions = app.on_group_function(5, Some(GroupFunctionKind::Request), PGN_ADDRESS_CLAIM, &[]);
        assert!(matches!(
            actions[0],
            OutgoingAction::SendAcknowledgeGroupFunction { pgn_error_code: 1, .. }
        ));
    }

    #[test]
    fn command_group_function_on_name_rewrites_one_field_and_acknowledges() {
        let mut app = CanApplication::new(128, test_name(1));
        // parameter 5 (device_function), one byte, new value 42.
        let parameters = [5u8, 42u8];
        let actions = app.on_group_function(5, Some(GroupFunctionKind::Command), PGN_ADDRESS_CLAIM, &parameters);
        assert_eq!(app.iso_name().device_function(), 42);
        assert_eq!(app.iso_name().identity_number(), 1);
        match &actions[0] {
            OutgoingAction::SendAcknowledgeGroupFunction {
                pgn_error_code,
                parameter_error_codes,
                ..
            } => {
                assert_eq!(*pgn_error_code, 0);
                assert_eq!(parameter_error_codes, &[0]);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn command_group_function_on_name_reports_out_of_range_parameter() {
        let mut app = CanApplication::new(128, test_name(1));
        let parameters = [42u8];
        let actions = app.on_group_function(5, Some(GroupFunctionKind::Command), PGN_ADDRESS_CLAIM, &parameters);
        match &actions[0] {
            OutgoingAction::SendAcknowledgeGroupFunction { parameter_error_codes, .. } => {
                assert_eq!(parameter_error_codes, &[3]);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn command_group_function_on_configuration_rewrites_all_three_fields() {
        let mut app = CanApplication::new(128, test_name(1));
        let mut parameters = Vec::new();
        parameters.push(1u8);
        crate::field::encode_variable_string("dock A", &mut parameters);
        parameters.push(2u8);
        crate::field::encode_variable_string("bilge pump", &mut parameters);
        parameters.push(3u8);
        crate::field::encode_variable_string("Acme Marine", &mut parameters);

        let actions =
            app.on_group_function(5, Some(GroupFunctionKind::Command), PGN_CONFIGURATION_INFORMATION, &parameters);
        assert_eq!(app.configuration_information().installation_1, "dock A");
        assert_eq!(app.configuration_information().installation_2, "bilge pump");
        assert_eq!(app.configuration_information().manufacturer_info, "Acme Marine");
        match &actions[0] {
            OutgoingAction::SendAcknowledgeGroupFunction { parameter_error_codes, .. } => {
                assert_eq!(parameter_error_codes, &[0, 0, 0]);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn iso_request_for_product_information_is_answered() {
        let app = CanApplication::new(128, test_name(1));
        let actions = app.on_iso_request(9, 128, PGN_PRODUCT_INFORMATION);
        assert!(matches!(
            actions[0],
            OutgoingAction::SendProductInformation { destination: 9 }
        ));
    }

    #[test]
    fn iso_request_for_pgn_list_is_answered() {
        let app = CanApplication::new(128, test_name(1));
        let actions = app.on_iso_request(9, 128, PGN_PGN_LIST);
        assert!(matches!(actions[0], OutgoingAction::SendPgnList { destination: 9 }));
    }

    #[test]
    fn heartbeat_is_not_sent_before_the_interval_elapses() {
        let mut app = CanApplication::new(128, test_name(1));
        app.on_bus_ready();
        let activate_at = Instant::now() + ADDRESS_CLAIM_DELAY + Duration::from_millis(1);
        app.tick(activate_at);
        let actions = app.tick(activate_at + Duration::from_secs(1));
        assert!(actions.is_empty());
    }

    #[test]
    fn heartbeat_fires_once_the_interval_elapses() {
        let mut app = CanApplication::new(128, test_name(1));
        app.on_bus_ready();
        let activate_at = Instant::now() + ADDRESS_CLAIM_DELAY + Duration::from_millis(1);
        app.tick(activate_at);
        let actions = app.tick(activate_at + HEARTBEAT_INTERVAL);
        assert!(actions.iter().any(|a| matches!(a, OutgoingAction::SendHeartbeat)));
    }
}
