//! Device descriptors and the services a host offers while instantiating them.
//!
//! Hosts are handed [`DeviceDescriptor`] records by the caller (there is no process-wide device
//! table) and build devices by invoking the descriptor's `init` against themselves.

use bitflags::bitflags;
use thiserror::Error;

use crate::fdc::SharedFdc;
use crate::irq::SharedIrqSink;
use crate::mca::{McaAdapter, McaSlot};

bitflags! {
    /// Buses a device plugs into.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct DeviceFlags: u32 {
        const ISA = 1 << 0;
        const MCA = 1 << 1;
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("all {slots} MCA slots are occupied")]
    NoFreeMcaSlot { slots: usize },

    #[error("{device} requires a {bus} bus, which this machine does not provide")]
    BusUnavailable {
        device: &'static str,
        bus: &'static str,
    },
}

/// A live device as tracked by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceInstance {
    Mca(McaSlot),
}

/// What a device's `init` may ask of the machine it is being plugged into.
pub trait DeviceHost {
    fn irq_sink(&self) -> SharedIrqSink;

    /// Hand a controller engine to the host's device tree, which owns its lifetime and maps its
    /// register window while the engine reports itself attached.
    fn adopt_floppy_controller(&mut self, fdc: SharedFdc);

    fn add_mca_adapter(&mut self, adapter: Box<dyn McaAdapter>) -> Result<McaSlot, DeviceError>;
}

pub type DeviceInit = fn(&mut dyn DeviceHost) -> Result<DeviceInstance, DeviceError>;

/// Factory metadata for one adapter type.
#[derive(Clone, Copy)]
pub struct DeviceDescriptor {
    /// Human-readable name, as listed in configuration UIs.
    pub name: &'static str,
    /// Stable identifier used by machine configurations.
    pub internal_name: &'static str,
    pub flags: DeviceFlags,
    pub init: DeviceInit,
}

impl DeviceDescriptor {
    pub fn instantiate(&self, host: &mut dyn DeviceHost) -> Result<DeviceInstance, DeviceError> {
        tracing::debug!(device = self.internal_name, "instantiating device");
        (self.init)(host)
    }
}

impl std::fmt::Debug for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceDescriptor")
            .field("name", &self.name)
            .field("internal_name", &self.internal_name)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Look up a descriptor by its `internal_name`.
pub fn find_descriptor<'a>(
    catalog: &[&'a DeviceDescriptor],
    internal_name: &str,
) -> Option<&'a DeviceDescriptor> {
    catalog
        .iter()
        .copied()
        .find(|desc| desc.internal_name == internal_name)
}
