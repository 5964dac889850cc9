//! NMEA2000/NMEA-0183 protocol core.
//!
//! This crate covers framing and decoding only: CAN arbitration, ISO
//! Name/address-claim bookkeeping, Fast-Packet and ISO-TP (BAM)
//! reassembly, the PGN schema registry and codec, and the NMEA-0183
//! parser and its bridge to NMEA2000. It has no async runtime of its
//! own; the router binary crate owns the tokio runtime and the
//! coupler/publisher orchestration built on top of these types.
//!
//! # Example
//!
//! ```no_run
//! use nmea2k::canbus::CanInterface;
//! use nmea2k::schema::builtin::standard_registry;
//!
//! let registry = standard_registry().unwrap();
//! let interface = CanInterface::open("can0").unwrap();
//! loop {
//!     match interface.read_frame() {
//!         Ok(frame) => println!("{:?}", frame.arbitration_id),
//!         Err(e) => eprintln!("read error: {e}"),
//!     }
//! }
//! ```

pub mod application;
pub mod arbitration;
pub mod bridge;
pub mod canbus;
pub mod codec;
pub mod device_registry;
pub mod error;
pub mod fastpacket;
pub mod field;
pub mod isotp;
pub mod message;
pub mod name;
pub mod nmea0183;
pub mod pgns;
pub mod schema;

pub use application::{AppState, CanApplication, OutgoingAction};
pub use arbitration::ArbitrationId;
pub use bridge::Bridge;
pub use canbus::{CanInterface, FrameDispatcher};
pub use codec::{decode, DecodedPgn, FieldValue};
pub use device_registry::DeviceRegistry;
pub use message::{MessageEnvelope, RawN2kMessage, RawNmea0183Sentence};
pub use name::IsoName;
pub use schema::Registry;
