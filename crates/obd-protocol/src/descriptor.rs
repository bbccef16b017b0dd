//! PID display descriptors.
//!
//! Description tables store each PID as `label|format|min|max|high`. Only the
//! label is required. A label starting with `!` marks a structural PID that
//! callers should not offer for display.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Label used when a supported PID has no description entry
pub const NO_DESCRIPTION: &str = "[NO DESCRIPTION]";

const STRUCTURAL_MARKER: char = '!';

/// Display metadata for one PID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidDescriptor {
    pub label: String,
    /// Numeric format such as `{:.1f}`
    pub format: Option<String>,
    pub min: f64,
    pub max: f64,
    /// Threshold above which a gauge should warn
    pub high: f64,
}

impl PidDescriptor {
    /// Parse a pipe-delimited descriptor. Missing or unparsable numeric
    /// fields fall back to min 0, max 100, high 0.
    pub fn parse(text: &str) -> Self {
        let mut fields = text.split('|').map(str::trim);
        let label = fields.next().unwrap_or_default().to_string();
        let format = fields
            .next()
            .filter(|f| !f.is_empty())
            .map(str::to_string);
        let mut number = |default: f64| {
            fields
                .next()
                .and_then(|f| f.parse::<f64>().ok())
                .unwrap_or(default)
        };
        let min = number(0.0);
        let max = number(100.0);
        let high = number(0.0);

        Self {
            label,
            format,
            min,
            max,
            high,
        }
    }

    /// Descriptor for a PID the description table does not know
    pub fn undescribed() -> Self {
        Self::parse(NO_DESCRIPTION)
    }

    pub fn is_structural(&self) -> bool {
        self.label.starts_with(STRUCTURAL_MARKER)
    }

    /// Label without the structural marker
    pub fn display_label(&self) -> &str {
        self.label.trim_start_matches(STRUCTURAL_MARKER).trim_start()
    }

    /// Number of decimals requested by the format, if any
    pub fn precision(&self) -> Option<usize> {
        let pattern = self.format.as_deref()?;
        let inner = pattern.trim_start_matches('{').trim_end_matches('}');
        let inner = inner.trim_start_matches(':').trim_end_matches('f');
        inner.strip_prefix('.')?.parse().ok()
    }
}

impl fmt::Display for PidDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_label())
    }
}
