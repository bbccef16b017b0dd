//! ELM327 OBD-II Protocol Client
//!
//! This crate drives an ELM327-compatible adapter over a serial (or
//! Bluetooth-serial) port: it runs the AT configuration handshake, negotiates
//! the vehicle bus, discovers which PIDs the ECU supports, decodes replies
//! into typed values and reads or clears diagnostic trouble codes.

mod client;
mod config;
mod descriptor;
mod discovery;
mod dtc;
mod error;
mod framing;
pub mod mock;
mod pid;
mod protocol;
mod tables;
mod transport;

pub use client::{AdapterInfo, ConnectStatus, ConnectionState, ObdClient, ValidPids};
pub use config::{Elm327Config, LineEnding, ENV_PREFIX};
pub use descriptor::{PidDescriptor, NO_DESCRIPTION};
pub use discovery::{resolve_pid_data, BITMAP_OFFSETS};
pub use dtc::{data_to_trouble_codes, TroubleCodeKind};
pub use error::ObdError;
pub use framing::prune_data;
pub use pid::{
    Formula, PidKey, PidReading, PidValue, VehicleInfoFormat, STRING_ERROR, STRING_INVALID,
    STRING_NOT_IMPLEMENTED, STRING_NO_DATA,
};
pub use protocol::ObdProtocol;
pub use tables::{parse_table, LookupTables, Table};
pub use transport::{normalize_response, Connector, Elm327Transport, SerialConnector, SerialIo};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Freeze frame data
    pub const FREEZE_FRAME: u8 = 0x02;
    /// Stored diagnostic trouble codes
    pub const READ_DTC: u8 = 0x03;
    /// Clear trouble codes
    pub const CLEAR_DTC: u8 = 0x04;
    /// Oxygen sensor monitoring test results
    pub const O2_MONITORING: u8 = 0x05;
    /// Pending diagnostic trouble codes
    pub const PENDING_DTC: u8 = 0x07;
    /// Vehicle information
    pub const VEHICLE_INFO: u8 = 0x09;
}
