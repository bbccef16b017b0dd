//! PID keys, decode formulas and typed readings.
//!
//! A PID key is the request text a caller selects: `010C` for live engine
//! speed, `020C03` for engine speed in freeze frame 3, `0902` for the VIN,
//! `03` for stored trouble codes. [`PidKey`] parses that text into a typed
//! request and [`Formula`] turns the pruned hex reply into a [`PidValue`].

use crate::discovery::is_bitmap_pid;
use crate::dtc::data_to_trouble_codes;
use crate::error::ObdError;
use crate::framing::data_bytes;
use crate::mode;
use crate::tables::LookupTables;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const STRING_NO_DATA: &str = "N/A";
pub const STRING_INVALID: &str = "[INVALID]";
pub const STRING_NOT_IMPLEMENTED: &str = "!NOT IMPLEMENTED!";
pub const STRING_ERROR: &str = "!ERROR!";

/// A parsed PID request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PidKey {
    /// Supported-PID bitmap (`0100`..`01C0`, `0200NN`, `050100`, `0900`)
    Supported { mode: u8, offset: u8, frame: Option<u8> },
    /// Mode 01 current data
    Current(u8),
    /// Mode 02 freeze frame data, optionally carrying its frame index
    Freeze { pid: u8, frame: Option<u8> },
    /// Mode 09 vehicle information
    VehicleInfo(u8),
    /// Mode 03
    StoredCodes,
    /// Mode 04
    ClearCodes,
    /// Mode 07
    PendingCodes,
}

impl FromStr for PidKey {
    type Err = ObdError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let key = text.trim().to_ascii_uppercase();
        let unknown = || ObdError::UnknownPid(text.trim().to_string());

        match key.as_str() {
            "03" => return Ok(PidKey::StoredCodes),
            "04" => return Ok(PidKey::ClearCodes),
            "07" => return Ok(PidKey::PendingCodes),
            "0500" | "050100" => {
                return Ok(PidKey::Supported {
                    mode: mode::O2_MONITORING,
                    offset: 0x00,
                    frame: None,
                })
            }
            _ => {}
        }

        if !key.is_ascii() || !(key.len() == 4 || key.len() == 6) {
            return Err(unknown());
        }
        let service = u8::from_str_radix(&key[..2], 16).map_err(|_| unknown())?;
        let pid = u8::from_str_radix(&key[2..4], 16).map_err(|_| unknown())?;
        let frame = match &key[4..] {
            "" => None,
            digits if digits.bytes().all(|b| b.is_ascii_digit()) => {
                Some(digits.parse::<u8>().map_err(|_| unknown())?)
            }
            _ => return Err(unknown()),
        };

        match (service, frame) {
            (mode::CURRENT_DATA, None) if is_bitmap_pid(pid) => Ok(PidKey::Supported {
                mode: service,
                offset: pid,
                frame: None,
            }),
            (mode::CURRENT_DATA, None) => Ok(PidKey::Current(pid)),
            (mode::FREEZE_FRAME, frame) if is_bitmap_pid(pid) => Ok(PidKey::Supported {
                mode: service,
                offset: pid,
                frame,
            }),
            (mode::FREEZE_FRAME, frame) => Ok(PidKey::Freeze { pid, frame }),
            (mode::VEHICLE_INFO, None) if pid == 0x00 => Ok(PidKey::Supported {
                mode: service,
                offset: pid,
                frame: None,
            }),
            (mode::VEHICLE_INFO, None) => Ok(PidKey::VehicleInfo(pid)),
            _ => Err(unknown()),
        }
    }
}

/// Decode routine for a mode 01/02 PID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formula {
    /// Monitor status since trouble codes were cleared
    MonitorStatus,
    /// Trouble code that caused the freeze frame
    FreezeDtc,
    /// Fuel system 1 and 2 status
    FuelSystem,
    /// `100 * A / 255`
    Percent,
    /// `A - 40`
    Temperature,
    /// `100 * A / 128 - 100`
    FuelTrim,
    /// `3 * A`
    FuelPressure,
    /// `A`
    Byte,
    /// `(256 * A + B) / 4`
    Rpm,
    /// `A / 2 - 64`
    TimingAdvance,
    /// `(256 * A + B) / 100`
    AirFlow,
    /// Commanded secondary air status
    SecondaryAir,
    /// Oxygen sensor presence per bank
    OxygenSensorsPresent,
    /// Voltage `A / 200` and trim `100 * B / 128 - 100`
    OxygenSensor,
    /// OBD standard the vehicle conforms to
    ObdStandard,
    /// `256 * A + B`
    Word,
    /// `(256 * A + B) / 1000`
    ModuleVoltage,
}

impl Formula {
    pub fn for_pid(pid: u8) -> Option<Self> {
        let formula = match pid {
            0x01 => Formula::MonitorStatus,
            0x02 => Formula::FreezeDtc,
            0x03 => Formula::FuelSystem,
            0x04 | 0x11 | 0x2F | 0x49 | 0x4C => Formula::Percent,
            0x05 | 0x0F | 0x46 => Formula::Temperature,
            0x06..=0x09 => Formula::FuelTrim,
            0x0A => Formula::FuelPressure,
            0x0B | 0x0D | 0x33 | 0x51 => Formula::Byte,
            0x0C => Formula::Rpm,
            0x0E => Formula::TimingAdvance,
            0x10 => Formula::AirFlow,
            0x12 => Formula::SecondaryAir,
            0x13 => Formula::OxygenSensorsPresent,
            0x14..=0x1B => Formula::OxygenSensor,
            0x1C => Formula::ObdStandard,
            0x1F | 0x21 => Formula::Word,
            0x42 => Formula::ModuleVoltage,
            _ => return None,
        };
        Some(formula)
    }

    /// Apply the formula to a pruned payload
    pub fn decode(&self, payload: &str, tables: &LookupTables) -> Result<PidReading, ObdError> {
        let value = match self {
            Formula::MonitorStatus => {
                let b = data_bytes(payload, 4)?;
                PidValue::Fields(monitor_status_fields(b[0], b[1], b[2], b[3]))
            }
            Formula::FreezeDtc => {
                let codes = data_to_trouble_codes(payload, tables)?;
                match codes.first() {
                    Some(code) => PidValue::Text(format!(
                        "{} {}",
                        code,
                        tables.trouble_code_description(code)
                    )),
                    None => return Ok(PidReading::NoData),
                }
            }
            Formula::FuelSystem => {
                data_bytes(payload, 1)?;
                let status = |range: std::ops::Range<usize>| {
                    payload
                        .get(range)
                        .and_then(|code| tables.fuel_system_status(code))
                        .unwrap_or(STRING_INVALID)
                        .to_string()
                };
                PidValue::Fields(vec![
                    "Fuel System 1".to_string(),
                    status(0..2),
                    "Fuel System 2".to_string(),
                    status(2..4),
                ])
            }
            Formula::Percent => PidValue::Number(100.0 * byte_a(payload)? / 255.0),
            Formula::Temperature => PidValue::Integer(byte_a(payload)? as i64 - 40),
            Formula::FuelTrim => PidValue::Number(100.0 * byte_a(payload)? / 128.0 - 100.0),
            Formula::FuelPressure => PidValue::Integer(3 * byte_a(payload)? as i64),
            Formula::Byte => PidValue::Integer(byte_a(payload)? as i64),
            Formula::Rpm => PidValue::Number(word(payload)? / 4.0),
            Formula::TimingAdvance => PidValue::Number(byte_a(payload)? / 2.0 - 64.0),
            Formula::AirFlow => PidValue::Number(word(payload)? / 100.0),
            Formula::SecondaryAir => {
                return Ok(lookup_text(payload, |code| tables.secondary_air_status(code)))
            }
            Formula::OxygenSensorsPresent => {
                let a = data_bytes(payload, 1)?[0];
                PidValue::SensorBanks {
                    bank1: a & 0x0F,
                    bank2: (a & 0xF0) >> 4,
                }
            }
            Formula::OxygenSensor => {
                let b = data_bytes(payload, 2)?;
                PidValue::OxygenSensor {
                    voltage: f64::from(b[0]) / 200.0,
                    trim: 100.0 * f64::from(b[1]) / 128.0 - 100.0,
                }
            }
            Formula::ObdStandard => {
                return Ok(lookup_text(payload, |code| tables.obd_standard(code)))
            }
            Formula::Word => PidValue::Integer(word(payload)? as i64),
            Formula::ModuleVoltage => PidValue::Number(word(payload)? / 1000.0),
        };
        Ok(PidReading::Value(value))
    }
}

fn byte_a(payload: &str) -> Result<f64, ObdError> {
    Ok(f64::from(data_bytes(payload, 1)?[0]))
}

fn word(payload: &str) -> Result<f64, ObdError> {
    let b = data_bytes(payload, 2)?;
    Ok(256.0 * f64::from(b[0]) + f64::from(b[1]))
}

fn lookup_text<'a>(payload: &str, lookup: impl Fn(&str) -> Option<&'a str>) -> PidReading {
    match payload.get(..2).and_then(lookup) {
        Some(text) => PidReading::Value(PidValue::Text(text.to_string())),
        None => PidReading::Invalid,
    }
}

const CONTINUOUS_TESTS: [(u8, u8, &str); 3] = [
    (0x01, 0x10, "MISFIRE TEST"),
    (0x02, 0x20, "FUEL SYSTEM TEST"),
    (0x04, 0x40, "COMPONENTS TEST"),
];

const SPARK_TESTS: [&str; 8] = [
    "CATALYST TEST",
    "HEATED CATALYST TEST",
    "EVAPORATIVE SYSTEM TEST",
    "SECONDARY AIR SYSTEM TEST",
    "A/C REFRIGERANT TEST",
    "OXYGEN SENSOR TEST",
    "OXYGEN SENSOR HEATER TEST",
    "EGR SYSTEM TEST",
];

const COMPRESSION_TESTS: [&str; 8] = [
    "NMHC CATALYST TEST",
    "NOx/SCR MONITOR TEST",
    "Reserved 1 TEST",
    "BOOST PRESSURE TEST",
    "Reserved 2 TEST",
    "EXHAUST GAS SENSOR TEST",
    "PM FILTER MONITORING TEST",
    "EGR/VVT SYSTEM TEST",
];

fn test_field(name: &str, incomplete: bool) -> String {
    if incomplete {
        format!("{}|[INCOMPLETE]", name)
    } else {
        name.to_string()
    }
}

/// Fields of the mode 01 PID 01 monitor status.
///
/// Always fourteen entries in a fixed order; a test the vehicle does not
/// support leaves an empty field in its slot.
pub fn monitor_status_fields(a: u8, b: u8, c: u8, d: u8) -> Vec<String> {
    let mut fields = vec![
        if a & 0x80 != 0 { "MIL:ON" } else { "MIL:OFF" }.to_string(),
        format!("STORED TROUBLE CODE COUNT|{}", a & 0x7F),
    ];
    for (available, incomplete, name) in CONTINUOUS_TESTS {
        fields.push(if b & available != 0 {
            test_field(name, b & incomplete != 0)
        } else {
            String::new()
        });
    }

    let (ignition, tests) = if b & 0x08 != 0 {
        ("IGNITION|COMPRESSION", &COMPRESSION_TESTS)
    } else {
        ("IGNITION|SPARK", &SPARK_TESTS)
    };
    fields.push(ignition.to_string());
    for (bit, name) in tests.iter().enumerate() {
        let mask = 1u8 << bit;
        fields.push(if c & mask != 0 {
            test_field(name, d & mask != 0)
        } else {
            String::new()
        });
    }
    fields
}

/// Decode routine for a mode 09 PID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleInfoFormat {
    /// Number of messages the following PID will return
    MessageCount,
    /// ASCII text (VIN, calibration ID, ECU name)
    Ascii,
    /// Raw hex text (calibration verification numbers)
    Hex,
}

impl VehicleInfoFormat {
    pub fn for_pid(pid: u8) -> Option<Self> {
        match pid {
            0x01 | 0x03 | 0x05 | 0x07 | 0x09 => Some(VehicleInfoFormat::MessageCount),
            0x02 | 0x04 | 0x0A => Some(VehicleInfoFormat::Ascii),
            0x06 => Some(VehicleInfoFormat::Hex),
            _ => None,
        }
    }

    /// Header bytes to prune from each reply line
    pub fn header_bytes(&self) -> usize {
        match self {
            VehicleInfoFormat::MessageCount => 2,
            VehicleInfoFormat::Ascii | VehicleInfoFormat::Hex => 3,
        }
    }

    pub fn decode(&self, payload: &str) -> Result<PidReading, ObdError> {
        let payload = payload.trim();
        let value = match self {
            VehicleInfoFormat::MessageCount => {
                PidValue::Integer(i64::from(data_bytes(payload, 1)?[0]))
            }
            VehicleInfoFormat::Ascii => {
                let text = hex::decode(payload)?
                    .into_iter()
                    .map(|b| if b == 0 { ' ' } else { char::from(b) })
                    .collect();
                PidValue::Text(text)
            }
            VehicleInfoFormat::Hex if payload.is_empty() => return Ok(PidReading::NoData),
            VehicleInfoFormat::Hex => PidValue::Text(payload.to_string()),
        };
        Ok(PidReading::Value(value))
    }
}

/// Decoded PID value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PidValue {
    Number(f64),
    Integer(i64),
    Text(String),
    OxygenSensor { voltage: f64, trim: f64 },
    /// Bit masks of the oxygen sensors present on each bank
    SensorBanks { bank1: u8, bank2: u8 },
    Fields(Vec<String>),
    /// Trouble code to description
    TroubleCodes(BTreeMap<String, String>),
    /// Number of PIDs a bitmap request marked as supported
    Supported(usize),
}

impl PidValue {
    /// Render using a descriptor's numeric precision
    pub fn render(&self, precision: Option<usize>) -> String {
        match (self, precision) {
            (PidValue::Number(n), Some(decimals)) => format!("{:.*}", decimals, n),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for PidValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PidValue::Number(n) => write!(f, "{}", n),
            PidValue::Integer(i) => write!(f, "{}", i),
            PidValue::Text(text) => f.write_str(text),
            PidValue::OxygenSensor { voltage, trim } => {
                write!(f, "{:.3} V, trim {:.1} %", voltage, trim)
            }
            PidValue::SensorBanks { bank1, bank2 } => {
                write!(f, "BANK1 {:04b}, BANK2 {:04b}", bank1, bank2)
            }
            PidValue::Fields(fields) => {
                let shown: Vec<&str> = fields
                    .iter()
                    .map(String::as_str)
                    .filter(|field| !field.is_empty())
                    .collect();
                f.write_str(&shown.join(", "))
            }
            PidValue::TroubleCodes(codes) if codes.is_empty() => f.write_str("no trouble codes"),
            PidValue::TroubleCodes(codes) => {
                let lines: Vec<String> = codes
                    .iter()
                    .map(|(code, description)| format!("{} {}", code, description))
                    .collect();
                f.write_str(&lines.join("; "))
            }
            PidValue::Supported(count) => write!(f, "{} PIDs supported", count),
        }
    }
}

/// Outcome of evaluating one PID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum PidReading {
    Value(PidValue),
    /// PID not supported by the ECU, or no frame selected
    NoData,
    /// Reply code missing from its lookup table
    Invalid,
    /// No decode routine for this key
    NotImplemented,
    /// Transport or decode failure
    Error(String),
}

impl PidReading {
    pub fn value(&self) -> Option<&PidValue> {
        match self {
            PidReading::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, PidReading::Error(_))
    }
}

impl fmt::Display for PidReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PidReading::Value(value) => write!(f, "{}", value),
            PidReading::NoData => f.write_str(STRING_NO_DATA),
            PidReading::Invalid => f.write_str(STRING_INVALID),
            PidReading::NotImplemented => f.write_str(STRING_NOT_IMPLEMENTED),
            PidReading::Error(_) => f.write_str(STRING_ERROR),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(pid: u8, payload: &str) -> PidReading {
        Formula::for_pid(pid)
            .unwrap()
            .decode(payload, &LookupTables::builtin())
            .unwrap()
    }

    fn number(reading: PidReading) -> f64 {
        match reading {
            PidReading::Value(PidValue::Number(n)) => n,
            other => panic!("expected a number, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_keys() {
        assert_eq!("010C".parse::<PidKey>().unwrap(), PidKey::Current(0x0C));
        assert_eq!(
            "020C03".parse::<PidKey>().unwrap(),
            PidKey::Freeze {
                pid: 0x0C,
                frame: Some(3)
            }
        );
        assert_eq!(
            "0120".parse::<PidKey>().unwrap(),
            PidKey::Supported {
                mode: 1,
                offset: 0x20,
                frame: None
            }
        );
        assert_eq!(
            "050100".parse::<PidKey>().unwrap(),
            PidKey::Supported {
                mode: 5,
                offset: 0,
                frame: None
            }
        );
        assert_eq!("0902".parse::<PidKey>().unwrap(), PidKey::VehicleInfo(0x02));
        assert_eq!("03".parse::<PidKey>().unwrap(), PidKey::StoredCodes);
        assert_eq!("04".parse::<PidKey>().unwrap(), PidKey::ClearCodes);
        assert_eq!("07".parse::<PidKey>().unwrap(), PidKey::PendingCodes);
        assert_eq!("010c".parse::<PidKey>().unwrap(), PidKey::Current(0x0C));
    }

    #[test]
    fn test_parse_rejects_unknown_keys() {
        for key in ["", "06", "0501", "0A00", "010C03", "01ZZ", "020CAB", "0600"] {
            assert!(
                matches!(key.parse::<PidKey>(), Err(ObdError::UnknownPid(_))),
                "{} should be rejected",
                key
            );
        }
    }

    #[test]
    fn test_engine_formulas() {
        assert_eq!(number(decode(0x0C, "1AF8")), 1726.0);
        assert_eq!(decode(0x05, "7B"), PidReading::Value(PidValue::Integer(83)));
        assert_eq!(decode(0x0D, "32"), PidReading::Value(PidValue::Integer(50)));
        assert_eq!(decode(0x0A, "10"), PidReading::Value(PidValue::Integer(48)));
        assert_eq!(number(decode(0x04, "FF")), 100.0);
        assert_eq!(number(decode(0x06, "80")), 0.0);
        assert_eq!(number(decode(0x0E, "80")), 0.0);
        assert_eq!(number(decode(0x10, "0190")), 4.0);
        assert_eq!(number(decode(0x42, "3138")), 12.6);
        assert_eq!(decode(0x1F, "0102"), PidReading::Value(PidValue::Integer(258)));
    }

    #[test]
    fn test_oxygen_sensor_formulas() {
        assert_eq!(
            decode(0x14, "A080"),
            PidReading::Value(PidValue::OxygenSensor {
                voltage: 0.8,
                trim: 0.0
            })
        );
        assert_eq!(
            decode(0x13, "31"),
            PidReading::Value(PidValue::SensorBanks { bank1: 1, bank2: 3 })
        );
    }

    #[test]
    fn test_table_lookups() {
        assert_eq!(
            decode(0x1C, "06"),
            PidReading::Value(PidValue::Text("EOBD (Europe)".to_string()))
        );
        assert_eq!(decode(0x1C, "FE"), PidReading::Invalid);
        assert_eq!(
            decode(0x12, "01"),
            PidReading::Value(PidValue::Text("Upstream".to_string()))
        );
        assert_eq!(
            decode(0x03, "0200"),
            PidReading::Value(PidValue::Fields(vec![
                "Fuel System 1".to_string(),
                "Closed loop, using oxygen sensor feedback to determine fuel mix".to_string(),
                "Fuel System 2".to_string(),
                "The motor is off".to_string(),
            ]))
        );
        match decode(0x03, "03") {
            PidReading::Value(PidValue::Fields(fields)) => {
                assert_eq!(fields[1], STRING_INVALID);
                assert_eq!(fields[3], STRING_INVALID);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_freeze_dtc() {
        match decode(0x02, "0133") {
            PidReading::Value(PidValue::Text(text)) => assert!(text.starts_with("P0133 O2 Sensor")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(decode(0x02, "0000"), PidReading::NoData);
    }

    #[test]
    fn test_monitor_status_spark() {
        let fields = monitor_status_fields(0x81, 0x07, 0x65, 0x04);
        assert_eq!(
            fields,
            vec![
                "MIL:ON",
                "STORED TROUBLE CODE COUNT|1",
                "MISFIRE TEST",
                "FUEL SYSTEM TEST",
                "COMPONENTS TEST",
                "IGNITION|SPARK",
                "CATALYST TEST",
                "",
                "EVAPORATIVE SYSTEM TEST|[INCOMPLETE]",
                "",
                "",
                "OXYGEN SENSOR TEST",
                "OXYGEN SENSOR HEATER TEST",
                "",
            ]
        );
    }

    #[test]
    fn test_monitor_status_compression() {
        let fields = monitor_status_fields(0x00, 0x18, 0x08, 0x08);
        assert_eq!(fields[0], "MIL:OFF");
        assert!(fields.contains(&"IGNITION|COMPRESSION".to_string()));
        assert!(fields.contains(&"BOOST PRESSURE TEST|[INCOMPLETE]".to_string()));
        assert!(!fields.iter().any(|f| f.starts_with("MISFIRE")));
    }

    #[test]
    fn test_monitor_status_layout_is_fixed() {
        let bare = monitor_status_fields(0x00, 0x00, 0x00, 0x00);
        let full = monitor_status_fields(0xFF, 0x7F, 0xFF, 0xFF);
        assert_eq!(bare.len(), 14);
        assert_eq!(full.len(), 14);
        assert_eq!(bare[5], "IGNITION|SPARK");
        assert_eq!(full[5], "IGNITION|COMPRESSION");
        assert!(bare[2..5].iter().all(String::is_empty));
        assert_eq!(full[13], "EGR/VVT SYSTEM TEST|[INCOMPLETE]");

        let text = PidValue::Fields(bare).to_string();
        assert_eq!(text, "MIL:OFF, STORED TROUBLE CODE COUNT|0, IGNITION|SPARK");
    }

    #[test]
    fn test_malformed_payload_is_error() {
        let tables = LookupTables::builtin();
        assert!(Formula::Rpm.decode("1A", &tables).is_err());
        assert!(Formula::Percent.decode("", &tables).is_err());
    }

    #[test]
    fn test_vehicle_info_ascii() {
        let payload = "000000314731";
        let reading = VehicleInfoFormat::Ascii.decode(payload).unwrap();
        assert_eq!(reading, PidReading::Value(PidValue::Text("   1G1".to_string())));
        assert_eq!(
            VehicleInfoFormat::MessageCount.decode("05").unwrap(),
            PidReading::Value(PidValue::Integer(5))
        );
        assert_eq!(VehicleInfoFormat::for_pid(0x08), None);
    }

    #[test]
    fn test_reading_sentinels() {
        assert_eq!(PidReading::NoData.to_string(), "N/A");
        assert_eq!(PidReading::Invalid.to_string(), "[INVALID]");
        assert_eq!(PidReading::NotImplemented.to_string(), "!NOT IMPLEMENTED!");
        assert_eq!(PidReading::Error("timeout".into()).to_string(), "!ERROR!");
        assert_eq!(PidValue::Number(12.3456).render(Some(2)), "12.35");
    }
}
