//! Diagnostic trouble code extraction

use crate::error::ObdError;
use crate::tables::LookupTables;
use serde::{Deserialize, Serialize};

const CODE_DIGITS: usize = 4;

/// Which trouble code list to request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TroubleCodeKind {
    /// Mode 03, confirmed codes
    Stored,
    /// Mode 07, detected during the current or last driving cycle
    Pending,
}

impl TroubleCodeKind {
    pub fn request(&self) -> &'static str {
        match self {
            TroubleCodeKind::Stored => "03",
            TroubleCodeKind::Pending => "07",
        }
    }
}

/// Split pruned mode 03/07 data into trouble codes.
///
/// Each 4-digit group becomes one code: the first nibble is replaced by its
/// two-character prefix (`0` -> `P0`, `4` -> `C0`, ...). All-zero groups
/// are padding and are skipped, as is a trailing partial group.
pub fn data_to_trouble_codes(data: &str, tables: &LookupTables) -> Result<Vec<String>, ObdError> {
    let data = data.trim();
    let mut codes = Vec::new();
    for chunk in data.as_bytes().chunks_exact(CODE_DIGITS) {
        let group = std::str::from_utf8(chunk)
            .map_err(|e| ObdError::Decode(e.to_string()))?;
        if !group.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ObdError::Decode(format!("trouble code group {:?}", group)));
        }
        if group.chars().all(|c| c == '0') {
            continue;
        }
        let mut chars = group.chars();
        let nibble = chars.next().unwrap_or('0');
        let prefix = tables
            .trouble_code_prefix(nibble)
            .ok_or(ObdError::UnknownTroubleCodePrefix(nibble))?;
        codes.push(format!("{}{}", prefix, chars.as_str().to_ascii_uppercase()));
    }
    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_skip_padding() {
        let tables = LookupTables::builtin();
        let codes = data_to_trouble_codes("000001234142000000", &tables).unwrap();
        assert_eq!(codes, vec!["P0123", "C0142"]);
    }

    #[test]
    fn test_all_prefix_families() {
        let tables = LookupTables::builtin();
        let codes = data_to_trouble_codes("01338101C100", &tables).unwrap();
        assert_eq!(codes, vec!["P0133", "B0101", "U0100"]);
    }

    #[test]
    fn test_no_codes() {
        let tables = LookupTables::builtin();
        assert!(data_to_trouble_codes("000000000000", &tables)
            .unwrap()
            .is_empty());
        assert!(data_to_trouble_codes("", &tables).unwrap().is_empty());
    }

    #[test]
    fn test_missing_prefix_table_entry() {
        let tables = LookupTables::default();
        let err = data_to_trouble_codes("0133", &tables).unwrap_err();
        assert!(matches!(err, ObdError::UnknownTroubleCodePrefix('0')));
    }

    #[test]
    fn test_non_hex_group_is_decode_error() {
        let tables = LookupTables::builtin();
        assert!(matches!(
            data_to_trouble_codes("UNABLE TO", &tables),
            Err(ObdError::Decode(_))
        ));
    }
}
