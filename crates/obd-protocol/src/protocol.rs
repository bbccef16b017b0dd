//! OBD-II Protocol Definitions

use serde::{Deserialize, Serialize};

/// Vehicle bus protocol requested during the handshake.
///
/// Each variant maps to the ELM327 protocol number `n` sent as `AT SP A<n>`;
/// the adapter falls back to its own search if that bus stays silent.
/// `Auto` sends `AT SP 0` and leaves the choice to the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObdProtocol {
    #[default]
    Auto,
    /// `AT SP A1`
    J1850Pwm,
    /// `AT SP A2`
    J1850Vpw,
    /// `AT SP A3`, the default of the configuration file
    #[serde(alias = "iso9141")]
    Iso9141_2,
    /// `AT SP A4`, slow init
    Iso14230_4Kwp,
    /// `AT SP A5`, fast init
    Iso14230_4KwpFast,
    /// `AT SP A6`
    Iso15765_4Can11bit500,
    /// `AT SP A7`
    Iso15765_4Can29bit500,
    /// `AT SP A8`
    Iso15765_4Can11bit250,
    /// `AT SP A9`
    Iso15765_4Can29bit250,
}

impl ObdProtocol {
    /// ELM327 protocol number used by `AT SP`
    pub fn number(&self) -> u8 {
        match self {
            ObdProtocol::Auto => 0,
            ObdProtocol::J1850Pwm => 1,
            ObdProtocol::J1850Vpw => 2,
            ObdProtocol::Iso9141_2 => 3,
            ObdProtocol::Iso14230_4Kwp => 4,
            ObdProtocol::Iso14230_4KwpFast => 5,
            ObdProtocol::Iso15765_4Can11bit500 => 6,
            ObdProtocol::Iso15765_4Can29bit500 => 7,
            ObdProtocol::Iso15765_4Can11bit250 => 8,
            ObdProtocol::Iso15765_4Can29bit250 => 9,
        }
    }

    /// Human readable protocol name
    pub fn name(&self) -> &'static str {
        match self {
            ObdProtocol::Auto => "Automatic",
            ObdProtocol::J1850Pwm => "SAE J1850 PWM",
            ObdProtocol::J1850Vpw => "SAE J1850 VPW",
            ObdProtocol::Iso9141_2 => "ISO 9141-2",
            ObdProtocol::Iso14230_4Kwp => "ISO 14230-4 KWP",
            ObdProtocol::Iso14230_4KwpFast => "ISO 14230-4 KWP (fast init)",
            ObdProtocol::Iso15765_4Can11bit500 => "ISO 15765-4 CAN (11 bit, 500 kbaud)",
            ObdProtocol::Iso15765_4Can29bit500 => "ISO 15765-4 CAN (29 bit, 500 kbaud)",
            ObdProtocol::Iso15765_4Can11bit250 => "ISO 15765-4 CAN (11 bit, 250 kbaud)",
            ObdProtocol::Iso15765_4Can29bit250 => "ISO 15765-4 CAN (29 bit, 250 kbaud)",
        }
    }

    /// Protocol selection command sent during the handshake.
    ///
    /// Anything other than `Auto` is selected with automatic fallback
    /// (`AT SP A<n>`), so the adapter searches when the preferred protocol
    /// does not answer.
    pub fn select_command(&self) -> String {
        match self {
            ObdProtocol::Auto => "AT SP 0".to_string(),
            other => format!("AT SP A{}", other.number()),
        }
    }
}
