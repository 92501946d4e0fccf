//! # mbus-master - Master-Side M-Bus (EN 13757-3) Protocol Stack
//!
//! This crate implements the application and data-link layers a master needs
//! to poll remote metering devices (water, heat, gas, electricity) over a
//! shared M-Bus: frame framing and validation, variable-length data-record
//! decoding (DIB/VIB chains, value encodings, units and multipliers), and
//! the request/response session machine with addressing, retries and
//! frame-count-bit toggling.
//!
//! ## Features
//!
//! - Encode and decode the four M-Bus frame formats with precise framing
//!   errors
//! - Decode variable data records: integers, BCD, reals, strings, time
//!   points, with units resolved from the VIF tables
//! - Poll by primary address or by secondary (8-byte id) selection
//! - Discover devices with the wildcard collision-resolution scan
//! - Transport-agnostic core: bring your own link, or use the bundled
//!   tokio-serial adapter
//!
//! ## Usage
//!
//! ```no_run
//! use mbus_master::{connect, MBusError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), MBusError> {
//!     let mut master = connect("/dev/ttyUSB0").await?;
//!     for record in master.poll_primary(5).await? {
//!         println!("{:?} {} ({})", record.value, record.unit, record.quantity);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The session machine itself ([`SessionMachine`]) is pure and performs no
//! I/O: it emits byte vectors and consumes `Frame | Timeout` transport
//! results, so it can be driven by any transport that can move bytes and
//! measure a response window.

pub mod constants;
pub mod error;
pub mod logging;
pub mod mbus;
pub mod payload;

pub use crate::error::{DecodeError, FramingError, MBusError, SessionError};
pub use crate::logging::{init_logger, log_info};

// Core M-Bus types
pub use mbus::frame::{pack_frame, parse_frame, MBusFrame, MBusFrameType};
pub use mbus::protocol::{MBusMaster, SecondaryScanner};
pub use mbus::serial::{SerialConfig, SerialTransport};
pub use mbus::session::{
    ExchangeState, PollResponse, SessionAction, SessionConfig, SessionMachine, SessionState,
    TransportResult,
};
pub use mbus::transport::MBusTransport;
pub use mbus::{PrimaryAddress, SecondaryAddress, SecondaryMask};
pub use payload::record::{
    decode_records, decode_user_data, DataRecord, DecodedPayload, RecordFunction, RecordValue,
};

/// Connects to an M-Bus over a serial port with the default settings.
///
/// # Arguments
/// * `port` - Serial port path (e.g. "/dev/ttyUSB0" on Linux)
///
/// # Returns
/// * `Ok(MBusMaster<SerialTransport>)` - Master driver ready to poll
/// * `Err(MBusError)` - Connection failed
pub async fn connect(port: &str) -> Result<MBusMaster<SerialTransport>, MBusError> {
    let transport = SerialTransport::connect(port).await?;
    Ok(MBusMaster::new(transport))
}

/// Connects with custom serial settings and session configuration.
pub async fn connect_with_config(
    port: &str,
    serial: SerialConfig,
    session: SessionConfig,
) -> Result<MBusMaster<SerialTransport>, MBusError> {
    let transport = SerialTransport::connect_with_config(port, serial).await?;
    Ok(MBusMaster::with_config(transport, session))
}
