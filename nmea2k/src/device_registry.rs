//! Passive device registry: tracks every remote node seen on the
//! bus, keyed by source address.
//!
//! Issues discovery ISO Requests for PGN 126996/126998 the first time an
//! address is seen with no product information recorded yet.

use std::collections::HashMap;
use std::time::Instant;

use crate::application::{PGN_CONFIGURATION_INFORMATION, PGN_PRODUCT_INFORMATION};
use crate::name::IsoName;

#[derive(Debug, Clone)]
pub struct DeviceEntry {
    /// `None` until an Address Claim from this source has been seen; a
    /// device that only ever sends data PGNs is still tracked, just
    /// without a known identity.
    pub iso_name: Option<IsoName>,
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub product_model_id: Option<String>,
    pub configuration_installation_1: Option<String>,
    pub configuration_installation_2: Option<String>,
    pub configuration_manufacturer_info: Option<String>,
    pub pgn_counters: HashMap<u32, u64>,
    pub changed: bool,
}

impl DeviceEntry {
    fn new(iso_name: Option<IsoName>) -> Self {
        let now = Instant::now();
        DeviceEntry {
            iso_name,
            first_seen: now,
            last_seen: now,
            product_model_id: None,
            configuration_installation_1: None,
            configuration_installation_2: None,
            configuration_manufacturer_info: None,
            pgn_counters: HashMap::new(),
            changed: false,
        }
    }
}

/// A side-effect the registry wants performed in response to seeing a new
/// node: issue discovery ISO Requests for its product and configuration
/// information.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryRequest {
    pub destination: u8,
    pub requested_pgn: u32,
}

#[derive(Default)]
pub struct DeviceRegistry {
    entries: HashMap<u8, DeviceEntry>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry::default()
    }

    /// Records a sighting of `source`, returning discovery requests the
    /// first time this address is seen. Every received PGN from a source
    /// counts toward its entry, not just Address Claim; `iso_name` is
    /// `None` when the sighting is some other PGN and no name has been
    /// learned for this source yet, and is adopted (or refreshed) when
    /// `Some`.
    pub fn observe(&mut self, source: u8, iso_name: Option<IsoName>, pgn: u32) -> Vec<DiscoveryRequest> {
        let is_new = !self.entries.contains_key(&source);
        let entry = self
            .entries
            .entry(source)
            .or_insert_with(|| DeviceEntry::new(iso_name));
        entry.last_seen = Instant::now();
        if let Some(name) = iso_name {
            entry.iso_name = Some(name);
        }
        *entry.pgn_counters.entry(pgn).or_insert(0) += 1;

        if is_new {
            vec![
                DiscoveryRequest {
                    destination: source,
                    requested_pgn: PGN_PRODUCT_INFORMATION,
                },
                DiscoveryRequest {
                    destination: source,
                    requested_pgn: PGN_CONFIGURATION_INFORMATION,
                },
            ]
        } else {
            Vec::new()
        }
    }

    pub fn record_product_information(&mut self, source: u8, model_id: String) {
        if let Some(entry) = self.entries.get_mut(&source) {
            entry.product_model_id = Some(model_id);
            entry.changed = true;
        }
    }

    pub fn record_configuration_information(
        &mut self,
        source: u8,
        installation_1: String,
        installation_2: String,
        manufacturer_info: String,
    ) {
        if let Some(entry) = self.entries.get_mut(&source) {
            entry.configuration_installation_1 = Some(installation_1);
            entry.configuration_installation_2 = Some(installation_2);
            entry.configuration_manufacturer_info = Some(manufacturer_info);
            entry.changed = true;
        }
    }

    pub fn get(&self, source: u8) -> Option<&DeviceEntry> {
        self.entries.get(&source)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::IsoNameFields;

    #[test]
    fn first_sighting_triggers_discovery() {
        let mut registry = DeviceRegistry::new();
        let name = IsoName::from_fields(IsoNameFields::default());
        let requests = registry.observe(5, Some(name), 129029);
        assert_eq!(requests.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn repeat_sighting_triggers_no_discovery() {
        let mut registry = DeviceRegistry::new();
        let name = IsoName::from_fields(IsoNameFields::default());
        registry.observe(5, Some(name), 129029);
        let requests = registry.observe(5, Some(name), 129029);
        assert!(requests.is_empty());
        assert_eq!(*registry.get(5).unwrap().pgn_counters.get(&129029).unwrap(), 2);
    }

    #[test]
    fn sighting_without_a_name_still_creates_an_entry() {
        let mut registry = DeviceRegistry::new();
        let requests = registry.observe(5, None, 129029);
        assert_eq!(requests.len(), 2);
        assert!(registry.get(5).unwrap().iso_name.is_none());
    }

    #[test]
    fn a_later_name_is_learned_onto_an_existing_entry() {
        let mut registry = DeviceRegistry::new();
        registry.observe(5, None, 129029);
        let name = IsoName::from_fields(IsoNameFields::default());
        registry.observe(5, Some(name), 60928);
        assert_eq!(registry.get(5).unwrap().iso_name, Some(name));
    }
}
