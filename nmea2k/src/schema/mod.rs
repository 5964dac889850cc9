//! The PGN schema registry: static definitions loaded once at start,
//! looked up by `(pgn, manufacturer_id)`.
//!
//! A registry keyed by PGN, with a proprietary sub-table keyed by
//! manufacturer code for PGNs whose layout varies by vendor. A typed
//! convenience layer sits on top of it in `crate::pgns` for the handful
//! of PGNs callers want concrete structs for instead of a `DecodedPgn`.

pub mod builtin;
pub mod enums;
pub mod registry;

pub use enums::EnumTable;
pub use registry::{PgnDefinition, Registry};
