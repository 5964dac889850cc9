//! Named enum tables referenced by schema fields
//! (inline or reference to a global enum set)").

use std::collections::HashMap;

/// A raw-value → label table for an enumerated field. Shared across PGN
/// definitions that reuse the same vocabulary (e.g. GNSS fix type).
#[derive(Debug, Clone)]
pub struct EnumTable {
    pub name: &'static str,
    values: HashMap<u64, &'static str>,
}

impl EnumTable {
    pub fn new(name: &'static str, entries: &[(u64, &'static str)]) -> Self {
        EnumTable {
            name,
            values: entries.iter().copied().collect(),
        }
    }

    pub fn label(&self, raw: u64) -> Option<&'static str> {
        self.values.get(&raw).copied()
    }

    pub fn contains(&self, raw: u64) -> bool {
        self.values.contains_key(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_known_and_unknown_values() {
        let table = EnumTable::new("gnss_fix_type", &[(0, "no-gps"), (1, "gnss-fix"), (2, "dgps-fix")]);
        assert_eq!(table.label(1), Some("gnss-fix"));
        assert_eq!(table.label(9), None);
        assert!(table.contains(0));
    }
}
