use serde::{Deserialize, Serialize};
use std::fmt;

/// Purpose of a fetch; drives cache age, SNMP selection and persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    None,
    Checking,
    Discovery,
    Inventory,
    RealTime,
    ForceSections,
}

impl Mode {
    pub const ALL: [Mode; 6] = [
        Mode::None,
        Mode::Checking,
        Mode::Discovery,
        Mode::Inventory,
        Mode::RealTime,
        Mode::ForceSections,
    ];

    /// Name used in cache path templates (`{mode}`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::None => "none",
            Mode::Checking => "checking",
            Mode::Discovery => "discovery",
            Mode::Inventory => "inventory",
            Mode::RealTime => "real_time",
            Mode::ForceSections => "force_sections",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
