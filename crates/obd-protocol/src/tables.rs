//! Lookup tables for decoding adapter responses.
//!
//! Every table is a text file of `<key> <value>` lines split at the first
//! space. The same files ship inside the crate, so a client can run without
//! a data directory.

use crate::descriptor::NO_DESCRIPTION;
use crate::error::ObdError;
use crate::mode;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

pub const TROUBLE_CODE_PREFIX_FILE: &str = "TroubleCodePrefix.txt";
pub const OBD_STANDARDS_FILE: &str = "VehicleObdStandards.txt";
pub const FUEL_SYSTEM_STATUS_FILE: &str = "FuelSystemStatus.txt";
pub const SECONDARY_AIR_STATUS_FILE: &str = "CommandedSecondaryAirStatus.txt";
pub const MODE01_DESCRIPTIONS_FILE: &str = "PidDescriptionsMode01.txt";
pub const MODE05_DESCRIPTIONS_FILE: &str = "PidDescriptionsMode05.txt";
pub const MODE09_DESCRIPTIONS_FILE: &str = "PidDescriptionsMode09.txt";
pub const ISO_SAE_CODES_FILE: &str = "TroubleCodes-ISO-SAE.txt";

/// One key/value table
pub type Table = HashMap<String, String>;

/// Parse `<key> <value>` lines. Blank lines are skipped and a key without a
/// value maps to an empty string.
pub fn parse_table(text: &str) -> Table {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(|line| match line.split_once(' ') {
            Some((key, value)) => (key.to_string(), value.trim().to_string()),
            None => (line.to_string(), String::new()),
        })
        .collect()
}

fn read_table(path: &Path) -> Result<Table, ObdError> {
    let text = std::fs::read_to_string(path).map_err(|e| ObdError::TableLoad {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(parse_table(&text))
}

/// All tables a session needs
#[derive(Debug, Clone, Default)]
pub struct LookupTables {
    trouble_code_prefix: Table,
    obd_standards: Table,
    fuel_system_status: Table,
    secondary_air_status: Table,
    mode01_descriptions: Table,
    mode05_descriptions: Table,
    mode09_descriptions: Table,
    iso_sae_codes: Table,
    vehicle_codes: Table,
}

impl LookupTables {
    /// Tables compiled into the crate
    pub fn builtin() -> Self {
        Self {
            trouble_code_prefix: parse_table(include_str!("../data/TroubleCodePrefix.txt")),
            obd_standards: parse_table(include_str!("../data/VehicleObdStandards.txt")),
            fuel_system_status: parse_table(include_str!("../data/FuelSystemStatus.txt")),
            secondary_air_status: parse_table(include_str!(
                "../data/CommandedSecondaryAirStatus.txt"
            )),
            mode01_descriptions: parse_table(include_str!("../data/PidDescriptionsMode01.txt")),
            mode05_descriptions: parse_table(include_str!("../data/PidDescriptionsMode05.txt")),
            mode09_descriptions: parse_table(include_str!("../data/PidDescriptionsMode09.txt")),
            iso_sae_codes: parse_table(include_str!("../data/TroubleCodes-ISO-SAE.txt")),
            vehicle_codes: Table::new(),
        }
    }

    /// Load every table from `dir`.
    ///
    /// A file that cannot be read leaves its table empty and adds a
    /// `FAILED TO READ FILE: <path>` line to the returned report.
    pub fn load(dir: &Path) -> (Self, Vec<String>) {
        let mut failures = Vec::new();
        let mut load = |name: &str| match read_table(&dir.join(name)) {
            Ok(table) => {
                debug!("Loaded {} entries from {}", table.len(), name);
                table
            }
            Err(e) => {
                warn!("{}", e);
                failures.push(format!("FAILED TO READ FILE: {}", dir.join(name).display()));
                Table::new()
            }
        };

        let tables = Self {
            obd_standards: load(OBD_STANDARDS_FILE),
            secondary_air_status: load(SECONDARY_AIR_STATUS_FILE),
            fuel_system_status: load(FUEL_SYSTEM_STATUS_FILE),
            trouble_code_prefix: load(TROUBLE_CODE_PREFIX_FILE),
            mode01_descriptions: load(MODE01_DESCRIPTIONS_FILE),
            mode05_descriptions: load(MODE05_DESCRIPTIONS_FILE),
            mode09_descriptions: load(MODE09_DESCRIPTIONS_FILE),
            iso_sae_codes: load(ISO_SAE_CODES_FILE),
            vehicle_codes: Table::new(),
        };
        info!("Loaded lookup tables from {}", dir.display());
        (tables, failures)
    }

    /// Replace the vehicle-specific trouble code table.
    ///
    /// On failure the previous vehicle table is kept.
    pub fn load_vehicle_profile(&mut self, path: &Path) -> Result<usize, ObdError> {
        let table = read_table(path)?;
        info!(
            "Loaded vehicle profile {} ({} codes)",
            path.display(),
            table.len()
        );
        self.vehicle_codes = table;
        Ok(self.vehicle_codes.len())
    }

    /// Two-character prefix for the leading nibble of a raw trouble code
    pub fn trouble_code_prefix(&self, nibble: char) -> Option<&str> {
        self.trouble_code_prefix
            .get(&nibble.to_ascii_uppercase().to_string())
            .map(String::as_str)
    }

    /// Description of a trouble code. Vehicle entries win over ISO/SAE ones.
    pub fn trouble_code_description(&self, code: &str) -> &str {
        self.vehicle_codes
            .get(code)
            .or_else(|| self.iso_sae_codes.get(code))
            .map(String::as_str)
            .unwrap_or(NO_DESCRIPTION)
    }

    /// Description text for `pid` (two uppercase hex digits) in `service`
    pub fn pid_description(&self, service: u8, pid: &str) -> Option<&str> {
        let table = match service {
            mode::CURRENT_DATA | mode::FREEZE_FRAME => &self.mode01_descriptions,
            mode::O2_MONITORING => &self.mode05_descriptions,
            mode::VEHICLE_INFO => &self.mode09_descriptions,
            _ => return None,
        };
        table.get(pid).map(String::as_str)
    }

    pub fn obd_standard(&self, code: &str) -> Option<&str> {
        self.obd_standards.get(code).map(String::as_str)
    }

    pub fn fuel_system_status(&self, code: &str) -> Option<&str> {
        self.fuel_system_status.get(code).map(String::as_str)
    }

    pub fn secondary_air_status(&self, code: &str) -> Option<&str> {
        self.secondary_air_status.get(code).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_parse_table_splits_at_first_space() {
        let table = parse_table("P0100 Mass or Volume Air Flow\n\nX\n01 Upstream  \n");
        assert_eq!(table["P0100"], "Mass or Volume Air Flow");
        assert_eq!(table["01"], "Upstream");
        assert_eq!(table["X"], "");
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_builtin_tables_are_populated() {
        let tables = LookupTables::builtin();
        assert_eq!(tables.trouble_code_prefix('0'), Some("P0"));
        assert_eq!(tables.trouble_code_prefix('c'), Some("U0"));
        assert_eq!(tables.obd_standard("06"), Some("EOBD (Europe)"));
        assert!(tables.pid_description(0x01, "0C").is_some());
        assert!(tables.pid_description(0x09, "02").is_some());
        assert!(tables.pid_description(0x03, "00").is_none());
    }

    #[test]
    fn test_vehicle_profile_overrides_iso_sae() {
        let mut tables = LookupTables::builtin();
        let generic = tables.trouble_code_description("P0171").to_string();
        let path = temp_file(
            "vehicle.txt",
            "P1234 Vehicle specific fault\nP0171 Lean, check intake boot\n",
        );

        assert_eq!(tables.trouble_code_description("P1234"), NO_DESCRIPTION);
        assert_eq!(tables.load_vehicle_profile(&path).unwrap(), 2);
        std::fs::remove_file(&path).ok();

        assert_eq!(tables.trouble_code_description("P1234"), "Vehicle specific fault");
        assert_eq!(tables.trouble_code_description("P0171"), "Lean, check intake boot");
        assert_ne!(generic, "Lean, check intake boot");
        assert_eq!(tables.trouble_code_description("P3999"), NO_DESCRIPTION);
    }

    #[test]
    fn test_missing_vehicle_profile_keeps_previous_table() {
        let mut tables = LookupTables::builtin();
        let path = temp_file("vehicle-keep.txt", "P1234 Kept\n");
        tables.load_vehicle_profile(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let err = tables
            .load_vehicle_profile(Path::new("/nonexistent/TroubleCodes-X.txt"))
            .unwrap_err();
        assert!(matches!(err, ObdError::TableLoad { .. }));
        assert_eq!(tables.trouble_code_description("P1234"), "Kept");
    }

    #[test]
    fn test_load_reports_missing_files() {
        let dir = std::env::temp_dir().join(format!("obd-tables-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(TROUBLE_CODE_PREFIX_FILE), "0 P0\n").unwrap();

        let (tables, failures) = LookupTables::load(&dir);
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(tables.trouble_code_prefix('0'), Some("P0"));
        assert_eq!(failures.len(), 7);
        assert!(failures
            .iter()
            .all(|line| line.starts_with("FAILED TO READ FILE: ")));
    }
}
