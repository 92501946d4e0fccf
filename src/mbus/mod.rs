//! The mbus module contains the core protocol implementation: checksum and
//! frame codec, addressing, the session state machine, and the master driver
//! with its transports.

pub mod address;
pub mod checksum;
pub mod frame;
pub mod protocol;
pub mod serial;
pub mod session;
pub mod transport;

pub use address::{PrimaryAddress, SecondaryAddress, SecondaryMask};
pub use frame::{MBusFrame, MBusFrameType};
pub use protocol::{MBusMaster, SecondaryScanner};
pub use session::{SessionConfig, SessionMachine};
