use serde::{Deserialize, Serialize};

use ps2ext_devices::mca::MCA_MAX_SLOTS;

use crate::MachineError;

/// Configuration for [`crate::Ps2Machine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MachineConfig {
    /// Number of Micro Channel slots on the planar.
    ///
    /// Clamped to `1..=8` when the machine is built.
    pub mca_slots: u8,
    /// Devices to install at power-on, by descriptor `internal_name`, in slot order.
    pub devices: Vec<String>,
}

impl MachineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, MachineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub(crate) fn slot_count(&self) -> usize {
        usize::from(self.mca_slots).clamp(1, MCA_MAX_SLOTS)
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            mca_slots: MCA_MAX_SLOTS as u8,
            devices: Vec::new(),
        }
    }
}
