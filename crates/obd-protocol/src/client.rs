//! OBD-II Client for ELM327 Adapters
//!
//! Owns one adapter session: the reset/configuration handshake, the bus
//! liveness probe, supported-PID discovery for modes 01, 02, 05 and 09, PID
//! evaluation and trouble code access.
//!
//! Evaluation never fails. Transport and decode problems come back as
//! [`PidReading::Error`], unsupported PIDs as [`PidReading::NoData`], so one
//! bad PID cannot abort a batch.

use crate::config::Elm327Config;
use crate::descriptor::PidDescriptor;
use crate::discovery::{resolve_pid_data, BITMAP_OFFSETS};
use crate::dtc::{data_to_trouble_codes, TroubleCodeKind};
use crate::error::ObdError;
use crate::framing::{data_bytes, last_line, prune_data};
use crate::mock::{MockAdapter, MockConnector};
use crate::mode;
use crate::pid::{Formula, PidKey, PidReading, PidValue, VehicleInfoFormat};
use crate::tables::LookupTables;
use crate::transport::{Connector, Elm327Transport, SerialConnector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, error, info, warn};

const ACK: &str = "OK";
const UNABLE_TO_CONNECT: &str = "UNABLE TO CONNECT";
const LIVENESS_PROBE: &str = "0101";

/// Valid PID key to its descriptor
pub type ValidPids = BTreeMap<String, PidDescriptor>;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    /// Serial port open, AT configuration in progress
    ElmHandshake,
    /// Adapter configured, waiting to reach the vehicle bus
    ElmConfigured,
    /// Liveness probe sent to the ECU
    CanNegotiating,
    Connected,
    /// Port could not be opened or the adapter rejected a setup command
    ElmFailed,
    /// Adapter works but the vehicle bus did not answer
    CanFailed,
}

/// Outcome of [`ObdClient::connect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectStatus {
    Success,
    ElmFailure,
    CanFailure,
}

/// Adapter identification gathered by [`ObdClient::diagnostic_info`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterInfo {
    /// Label and reply, in request order
    pub entries: Vec<(String, String)>,
    /// Collection stopped at a failed request
    pub partial: bool,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, value) in &self.entries {
            if value.contains('\n') {
                writeln!(f, "{}:|", label)?;
                writeln!(f, "{}", value)?;
            } else {
                writeln!(f, "{}|{}", label, value)?;
            }
        }
        if self.partial {
            writeln!(f)?;
            writeln!(f, "WARNING: PARTIAL DATA RETURNED")?;
            writeln!(
                f,
                "THIS COULD BE A FAKE ELM327 DEVICE AND SHOULD NOT BE USED IF IT IS FAKE."
            )?;
        }
        Ok(())
    }
}

const INFO_REQUESTS: [(&str, &str); 9] = [
    ("AT I", "ELM Device Version"),
    ("AT @1", "ELM Device Description"),
    ("AT @2", "ELM Device User Data"),
    ("AT DP", "Using CAN BUS Protocol"),
    ("AT RV", "Volt At OBDII Connector"),
    ("AT CS", "CAN Status"),
    ("AT KW", "Key Words"),
    ("AT BD", "ELM327 Buffer Dump"),
    ("AT PPS", "ELM327 Programmable Paramaters"),
];

const STRUCTURAL_PIDS: [(&str, &str); 3] = [
    ("03", "! Show stored Diagnostic Trouble Codes"),
    ("04", "! Clear Diagnostic Trouble Codes and stored values"),
    (
        "07",
        "! Show pending Diagnostic Trouble Codes (detected during current or last driving cycle)",
    ),
];

/// OBD-II client for communicating with ELM327-compatible adapters
pub struct ObdClient {
    config: Elm327Config,
    connector: Box<dyn Connector>,
    transport: Option<Elm327Transport>,
    tables: LookupTables,
    state: ConnectionState,
    mil_on: bool,
    stored_code_count: u8,
    freeze_frame_count: u8,
    /// Table load failures, kept across reconnects
    load_report: String,
    /// Handshake failures of the latest connection attempt
    connect_report: String,
    valid_pids: ValidPids,
    valid_freeze_pids: ValidPids,
}

impl ObdClient {
    /// Create a client for the serial port named in `config`.
    ///
    /// Lookup tables come from `config.data_dir` when set, otherwise the
    /// built-in copies are used. Load failures are kept in the
    /// initialisation report rather than returned.
    pub fn new(config: Elm327Config) -> Self {
        let connector = SerialConnector::from_config(&config);
        Self::with_connector(config, Box::new(connector))
    }

    /// Create a client that opens its stream through `connector`
    pub fn with_connector(config: Elm327Config, connector: Box<dyn Connector>) -> Self {
        info!("Creating OBD client for port: {}", connector.port_name());

        let mut load_report = String::new();
        let mut tables = match &config.data_dir {
            Some(dir) => {
                let (tables, failures) = LookupTables::load(dir);
                for line in failures {
                    load_report.push_str(&line);
                    load_report.push('\n');
                }
                tables
            }
            None => LookupTables::builtin(),
        };
        if let Some(profile) = &config.vehicle_profile {
            if let Err(e) = tables.load_vehicle_profile(profile) {
                warn!("{}", e);
                load_report.push_str(&format!("FAILED TO READ FILE: {}\n", profile.display()));
            }
        }

        Self {
            config,
            connector,
            transport: None,
            tables,
            state: ConnectionState::Disconnected,
            mil_on: false,
            stored_code_count: 0,
            freeze_frame_count: 0,
            load_report,
            connect_report: String::new(),
            valid_pids: ValidPids::new(),
            valid_freeze_pids: ValidPids::new(),
        }
    }

    /// Create a client backed by a scripted adapter, with no handshake delays
    pub fn mock(adapter: MockAdapter) -> Self {
        let config = Elm327Config {
            serial_port: "mock".to_string(),
            timeout_ms: 250,
            reset_period_ms: 0,
            settle_period_ms: 0,
            ..Elm327Config::default()
        };
        Self::with_connector(config, Box::new(MockConnector::new(adapter)))
    }

    /// Reset the adapter, configure it and negotiate the vehicle bus.
    ///
    /// Every handshake step runs even after an earlier one failed, so the
    /// initialisation report lists all rejected commands. Session state and
    /// valid-PID sets are cleared first and rebuilt only on success.
    pub async fn connect(&mut self) -> ConnectStatus {
        self.close().await;
        self.reset_session();
        self.state = ConnectionState::ElmHandshake;
        info!("Connecting to ELM327 on {}", self.connector.port_name());

        let io = match self.connector.open() {
            Ok(io) => io,
            Err(e) => {
                error!("Failed to open serial port: {}", e);
                self.report(&format!("FAILED TO OPEN SERIAL PORT: {}", e));
                self.state = ConnectionState::ElmFailed;
                return ConnectStatus::ElmFailure;
            }
        };
        self.transport = Some(Elm327Transport::new(
            io,
            self.config.line_ending,
            self.config.timeout(),
        ));

        if !self.configure_adapter().await {
            self.report("FAILED TO INITIALIZE ELM327 DEVICE.");
            self.state = ConnectionState::ElmFailed;
            return ConnectStatus::ElmFailure;
        }
        self.state = ConnectionState::ElmConfigured;
        info!("ELM327 configured, waiting for the bus to settle");

        tokio::time::sleep(self.config.settle_period()).await;
        self.state = ConnectionState::CanNegotiating;
        if let Err(reason) = self.probe_bus().await {
            warn!("Vehicle bus did not answer: {}", reason);
            self.report(&reason);
            self.close().await;
            self.state = ConnectionState::CanFailed;
            return ConnectStatus::CanFailure;
        }
        self.state = ConnectionState::Connected;
        info!(
            "Connected: MIL {}, {} stored trouble code(s)",
            if self.mil_on { "on" } else { "off" },
            self.stored_code_count
        );

        for (key, label) in STRUCTURAL_PIDS {
            self.valid_pids
                .insert(key.to_string(), PidDescriptor::parse(label));
        }
        self.discover_live_pids().await;
        ConnectStatus::Success
    }

    /// Run the AT handshake. Returns false if any step was rejected.
    async fn configure_adapter(&mut self) -> bool {
        let mut configured = true;

        tokio::time::sleep(self.config.reset_period()).await;
        if let Err(e) = self.send("AT Z").await {
            warn!("AT Z failed: {}", e);
            self.report("FAILED: AT Z (Reset Device)");
            configured = false;
        }
        tokio::time::sleep(self.config.reset_period()).await;

        let protocol = self.config.protocol;
        let steps = [
            ("AT E0".to_string(), "Set Echo Off".to_string()),
            ("AT L0".to_string(), "Set Linefeed Off".to_string()),
            ("AT R1".to_string(), "Set Responses On".to_string()),
            ("AT H0".to_string(), "Set Headers Off".to_string()),
            ("AT S0".to_string(), "Set Space Characters Off".to_string()),
            (
                protocol.select_command(),
                format!("Set Protocol {} / Auto", protocol.name()),
            ),
            ("AT IB 10".to_string(), "Set High Speed CAN BUS".to_string()),
        ];
        for (command, purpose) in steps {
            let acknowledged = match self.send(&command).await {
                Ok(response) => last_line(&response) == ACK,
                Err(e) => {
                    debug!("{} failed: {}", command, e);
                    false
                }
            };
            if !acknowledged {
                warn!("ELM327 rejected {} ({})", command, purpose);
                self.report(&format!("FAILED: {} ({})", command, purpose));
                configured = false;
            }
        }
        configured
    }

    /// Send the liveness probe and record MIL and trouble code count
    async fn probe_bus(&mut self) -> Result<(), String> {
        let response = self
            .send(LIVENESS_PROBE)
            .await
            .map_err(|e| format!("FAILED: {} (Vehicle Bus Probe): {}", LIVENESS_PROBE, e))?;
        if response.contains(UNABLE_TO_CONNECT) {
            return Err("UNABLE TO CONNECT TO VEHICLE BUS.".to_string());
        }
        let status = data_bytes(&prune_data(&response, 2), 1)
            .map_err(|e| format!("FAILED: {} (Vehicle Bus Probe): {}", LIVENESS_PROBE, e))?;
        self.apply_monitor_status(status[0]);
        Ok(())
    }

    fn apply_monitor_status(&mut self, status: u8) {
        self.mil_on = status & 0x80 != 0;
        self.stored_code_count = status & 0x7F;
        self.freeze_frame_count = self.stored_code_count;
    }

    fn reset_session(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.mil_on = false;
        self.stored_code_count = 0;
        self.freeze_frame_count = 0;
        self.connect_report.clear();
        self.valid_pids.clear();
        self.valid_freeze_pids.clear();
    }

    fn report(&mut self, line: &str) {
        self.connect_report.push_str(line);
        self.connect_report.push('\n');
    }

    async fn send(&mut self, command: &str) -> Result<String, ObdError> {
        match self.transport.as_mut() {
            Some(transport) => transport.send(command).await,
            None => Err(ObdError::NotConnected),
        }
    }

    /// Mode 01 bitmap chain, then the mode 05 and mode 09 bitmaps
    async fn discover_live_pids(&mut self) {
        for offset in BITMAP_OFFSETS {
            if offset != 0 && !self.valid_pids.contains_key(&format!("01{:02X}", offset)) {
                break;
            }
            if let Err(e) = self.refresh_supported(mode::CURRENT_DATA, offset, None).await {
                warn!("Mode 01 discovery stopped at {:02X}: {}", offset, e);
                break;
            }
        }
        for service in [mode::O2_MONITORING, mode::VEHICLE_INFO] {
            if let Err(e) = self.refresh_supported(service, 0x00, None).await {
                warn!("Mode {:02X} discovery failed: {}", service, e);
            }
        }
        info!("Discovered {} valid PIDs", self.valid_pids.len());
    }

    /// Mode 02 bitmap chain for one freeze frame
    async fn discover_freeze_pids(&mut self, frame: u8) {
        for offset in BITMAP_OFFSETS {
            let boundary = format!("02{:02X}{:02}", offset, frame);
            if offset != 0 && !self.valid_freeze_pids.contains_key(&boundary) {
                break;
            }
            let refreshed = self
                .refresh_supported(mode::FREEZE_FRAME, offset, Some(frame))
                .await;
            if let Err(e) = refreshed {
                warn!("Freeze frame {} discovery stopped at {:02X}: {}", frame, offset, e);
                break;
            }
        }
        info!(
            "Freeze frame {} has {} valid PIDs",
            frame,
            self.valid_freeze_pids.len()
        );
    }

    /// Request one supported-PID bitmap and register the PIDs it flags.
    /// Returns how many PIDs the bitmap marked.
    async fn refresh_supported(
        &mut self,
        service: u8,
        offset: u8,
        frame: Option<u8>,
    ) -> Result<usize, ObdError> {
        let (request, header_bytes) = match (service, frame) {
            (mode::CURRENT_DATA, _) => (format!("01{:02X}", offset), 2),
            (mode::FREEZE_FRAME, Some(frame)) => (format!("02{:02X}{:02}", offset, frame), 3),
            (mode::O2_MONITORING, _) => ("050100".to_string(), 3),
            (mode::VEHICLE_INFO, _) => (format!("09{:02X}", offset), 3),
            _ => {
                return Err(ObdError::UnknownPid(format!(
                    "{:02X}{:02X}",
                    service, offset
                )))
            }
        };

        let response = self.send(&request).await?;
        let pids = resolve_pid_data(&prune_data(&response, header_bytes), offset)?;
        debug!("{} flagged {} PIDs", request, pids.len());

        for pid in &pids {
            let index = format!("{:02X}", pid);
            let descriptor = self
                .tables
                .pid_description(service, &index)
                .map(PidDescriptor::parse)
                .unwrap_or_else(PidDescriptor::undescribed);
            match frame {
                Some(frame) if service == mode::FREEZE_FRAME => {
                    self.valid_freeze_pids
                        .insert(format!("02{}{:02}", index, frame), descriptor);
                }
                _ => {
                    self.valid_pids
                        .insert(format!("{:02X}{}", service, index), descriptor);
                }
            }
        }
        Ok(pids.len())
    }

    /// Valid PIDs for live data, or for one freeze frame.
    ///
    /// Passing a frame index clears the freeze set and rebuilds it from that
    /// frame's bitmaps.
    pub async fn valid_pids(&mut self, frame: Option<u8>) -> ValidPids {
        match frame {
            None => self.valid_pids.clone(),
            Some(frame) => {
                self.valid_freeze_pids.clear();
                self.discover_freeze_pids(frame).await;
                self.valid_freeze_pids.clone()
            }
        }
    }

    /// Evaluate one PID key.
    ///
    /// `frame` selects a freeze frame for mode 01/02 keys; a `02PP` key
    /// without any frame index yields `NoData`.
    pub async fn evaluate(&mut self, key: &str, frame: Option<u8>) -> PidReading {
        let parsed = match key.parse::<PidKey>() {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("{}", e);
                return PidReading::NotImplemented;
            }
        };
        match self.evaluate_key(parsed, frame).await {
            Ok(reading) => reading,
            Err(e) => {
                warn!("PID {} failed: {}", key, e);
                PidReading::Error(e.to_string())
            }
        }
    }

    async fn evaluate_key(
        &mut self,
        key: PidKey,
        frame: Option<u8>,
    ) -> Result<PidReading, ObdError> {
        let reading = match key {
            PidKey::Supported {
                mode: service,
                offset,
                frame: own_frame,
            } => {
                let frame = own_frame.or(frame);
                if service == mode::FREEZE_FRAME && frame.is_none() {
                    return Ok(PidReading::NoData);
                }
                let count = self.refresh_supported(service, offset, frame).await?;
                PidReading::Value(PidValue::Supported(count))
            }
            PidKey::Current(pid) => self.read_data(pid, frame).await?,
            PidKey::Freeze {
                pid,
                frame: own_frame,
            } => match own_frame.or(frame) {
                Some(frame) => self.read_data(pid, Some(frame)).await?,
                None => PidReading::NoData,
            },
            PidKey::VehicleInfo(pid) => self.read_vehicle_info(pid).await?,
            PidKey::StoredCodes => PidReading::Value(PidValue::TroubleCodes(
                self.trouble_codes(TroubleCodeKind::Stored).await?,
            )),
            PidKey::PendingCodes => PidReading::Value(PidValue::TroubleCodes(
                self.trouble_codes(TroubleCodeKind::Pending).await?,
            )),
            PidKey::ClearCodes => {
                PidReading::Value(PidValue::Text(self.clear_trouble_codes().await?))
            }
        };
        Ok(reading)
    }

    /// Mode 01 read, or mode 02 read when a frame index is given
    async fn read_data(&mut self, pid: u8, frame: Option<u8>) -> Result<PidReading, ObdError> {
        let Some(formula) = Formula::for_pid(pid) else {
            return Ok(PidReading::NotImplemented);
        };
        let (request, header_bytes, supported) = match frame {
            None => {
                let request = format!("01{:02X}", pid);
                let supported = self.valid_pids.contains_key(&request);
                (request, 2, supported)
            }
            Some(frame) => {
                let request = format!("02{:02X}{:02}", pid, frame);
                let supported = self.valid_freeze_pids.contains_key(&request);
                (request, 3, supported)
            }
        };
        if !supported {
            return Ok(PidReading::NoData);
        }

        let response = self.send(&request).await?;
        let payload = prune_data(&response, header_bytes);
        if formula == Formula::MonitorStatus && frame.is_none() {
            self.apply_monitor_status(data_bytes(&payload, 1)?[0]);
        }
        formula.decode(&payload, &self.tables)
    }

    async fn read_vehicle_info(&mut self, pid: u8) -> Result<PidReading, ObdError> {
        let Some(format) = VehicleInfoFormat::for_pid(pid) else {
            return Ok(PidReading::NotImplemented);
        };
        let request = format!("09{:02X}", pid);
        if !self.valid_pids.contains_key(&request) {
            return Ok(PidReading::NoData);
        }
        let response = self.send(&request).await?;
        format.decode(&prune_data(&response, format.header_bytes()))
    }

    /// Stored (mode 03) or pending (mode 07) trouble codes with descriptions
    pub async fn trouble_codes(
        &mut self,
        kind: TroubleCodeKind,
    ) -> Result<BTreeMap<String, String>, ObdError> {
        let response = self.send(kind.request()).await?;
        let codes = data_to_trouble_codes(&prune_data(&response, 1), &self.tables)?;
        debug!("{:?} trouble codes: {:?}", kind, codes);
        Ok(codes
            .into_iter()
            .map(|code| {
                let description = self.tables.trouble_code_description(&code).to_string();
                (code, description)
            })
            .collect())
    }

    /// Mode 04: clear trouble codes and stored values. Returns the adapter's
    /// reply text.
    pub async fn clear_trouble_codes(&mut self) -> Result<String, ObdError> {
        info!("Clearing diagnostic trouble codes");
        let response = self.send("04").await?;
        Ok(response.trim_end().to_string())
    }

    /// Identification and status of the adapter.
    ///
    /// Stops at the first failed request and marks the result partial.
    pub async fn diagnostic_info(&mut self) -> AdapterInfo {
        let mut info = AdapterInfo::default();
        info.entries.push((
            "Serial Port".to_string(),
            self.connector.port_name().to_string(),
        ));
        for (command, label) in INFO_REQUESTS {
            match self.send(command).await {
                Ok(response) => info
                    .entries
                    .push((label.to_string(), response.trim_end().to_string())),
                Err(e) => {
                    warn!("{} failed, adapter info is partial: {}", command, e);
                    info.partial = true;
                    break;
                }
            }
        }
        info
    }

    /// Whether something answering like an ELM327 is on the port
    pub async fn is_elm327_present(&mut self) -> bool {
        match self.send("AT @1").await {
            Ok(response) => !response.trim().is_empty(),
            Err(_) => false,
        }
    }

    /// Load a vehicle trouble code file over the ISO/SAE descriptions
    pub fn load_vehicle_profile(&mut self, path: &Path) -> Result<usize, ObdError> {
        self.tables.load_vehicle_profile(path)
    }

    /// Close the serial port. Valid-PID sets are kept until the next connect.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            info!("Closing ELM327 session");
            transport.close().await;
            if self.state == ConnectionState::Connected {
                self.state = ConnectionState::Disconnected;
            }
        }
    }

    pub fn mil_on(&self) -> bool {
        self.mil_on
    }

    pub fn stored_code_count(&self) -> u8 {
        self.stored_code_count
    }

    pub fn freeze_frame_count(&self) -> u8 {
        self.freeze_frame_count
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Table load failures followed by the latest connection report
    pub fn init_report(&self) -> String {
        format!("{}{}", self.load_report, self.connect_report)
    }

    /// Descriptor of a live-set key, if the ECU supports it
    pub fn descriptor(&self, key: &str) -> Option<&PidDescriptor> {
        self.valid_pids
            .get(key)
            .or_else(|| self.valid_freeze_pids.get(key))
    }
}
