//! A minimal PS/2 Micro Channel host: port I/O, the POS configuration bus, ISA interrupt levels,
//! and the devices plugged into them.
//!
//! The host owns delegated controller engines and keeps their register windows on the I/O bus in
//! step with whether the engine currently reports itself attached. Adapters reprogram engines from
//! inside POS writes, so the window is reconciled after every `OUT` rather than from within the
//! write itself (the bus is mutably borrowed for the duration of the dispatch).

#![forbid(unsafe_code)]

mod config;

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

use ps2ext_devices::device::{
    find_descriptor, DeviceDescriptor, DeviceError, DeviceFlags, DeviceHost, DeviceInstance,
};
use ps2ext_devices::fdc::{register_fdc_ports, unregister_fdc_ports, SharedFdc};
use ps2ext_devices::irq::{IsaIrqLevels, SharedIrqSink};
use ps2ext_devices::mca::{register_mca_pos_ports, McaAdapter, McaBus, McaSlot, SharedMcaBus};
use ps2ext_platform::io::IoPortBus;

pub use config::MachineConfig;

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("unknown device `{0}`")]
    UnknownDevice(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("invalid machine config: {0}")]
    Config(#[from] serde_json::Error),
}

/// A floppy controller engine adopted by the machine, and where its window is currently mapped.
struct FdcWindow {
    fdc: SharedFdc,
    mapped: Option<u16>,
}

pub struct Ps2Machine {
    io: IoPortBus,
    mca: SharedMcaBus,
    irq: IsaIrqLevels,
    fdcs: Vec<FdcWindow>,
    devices: Vec<DeviceInstance>,
    catalog: Vec<&'static DeviceDescriptor>,
}

impl Ps2Machine {
    /// Builds the planar and installs `config.devices`, resolving names against `catalog`.
    pub fn new(
        config: MachineConfig,
        catalog: &[&'static DeviceDescriptor],
    ) -> Result<Self, MachineError> {
        let mca: SharedMcaBus = Rc::new(RefCell::new(McaBus::new(config.slot_count())));
        let mut io = IoPortBus::new();
        register_mca_pos_ports(&mut io, &mca);

        let mut machine = Self {
            io,
            mca,
            irq: IsaIrqLevels::new(),
            fdcs: Vec::new(),
            devices: Vec::new(),
            catalog: catalog.to_vec(),
        };
        for name in &config.devices {
            machine.add_device(name)?;
        }
        Ok(machine)
    }

    /// Instantiates the catalogue device called `internal_name`.
    pub fn add_device(&mut self, internal_name: &str) -> Result<DeviceInstance, MachineError> {
        let Some(desc) = find_descriptor(&self.catalog, internal_name) else {
            tracing::warn!(device = internal_name, "unknown device");
            return Err(MachineError::UnknownDevice(internal_name.to_string()));
        };
        // The planar has Micro Channel slots only.
        if desc.flags.contains(DeviceFlags::ISA) {
            tracing::warn!(device = internal_name, "ISA device on an MCA machine");
            return Err(DeviceError::BusUnavailable {
                device: desc.internal_name,
                bus: "ISA",
            }
            .into());
        }
        let instance = desc.instantiate(self)?;
        self.devices.push(instance);
        self.sync_fdc_windows();
        Ok(instance)
    }

    /// Closes a device. Engines it handed to the machine stay part of the device tree.
    pub fn remove_device(&mut self, instance: DeviceInstance) -> bool {
        let Some(pos) = self.devices.iter().position(|d| *d == instance) else {
            return false;
        };
        self.devices.remove(pos);
        match instance {
            DeviceInstance::Mca(slot) => drop(self.mca.borrow_mut().remove(slot)),
        }
        true
    }

    pub fn devices(&self) -> &[DeviceInstance] {
        &self.devices
    }

    pub fn io_read(&mut self, port: u16, size: u8) -> u32 {
        self.io.read(port, size)
    }

    pub fn io_write(&mut self, port: u16, size: u8, value: u32) {
        self.io.write(port, size, value);
        self.sync_fdc_windows();
    }

    pub fn io_read_u8(&mut self, port: u16) -> u8 {
        self.io_read(port, 1) as u8
    }

    pub fn io_write_u8(&mut self, port: u16, value: u8) {
        self.io_write(port, 1, u32::from(value));
    }

    /// Channel reset: every port device and every installed adapter return to power-on state.
    /// POS contents are adapter configuration and are left alone by adapters that latch them.
    pub fn reset(&mut self) {
        self.io.reset();
        self.mca.borrow_mut().reset();
        self.sync_fdc_windows();
    }

    pub fn irq_level(&self, irq: u8) -> bool {
        self.irq.level(irq)
    }

    pub fn mca(&self) -> &SharedMcaBus {
        &self.mca
    }

    /// Engines adopted so far, in adoption order.
    pub fn floppy_controllers(&self) -> impl Iterator<Item = &SharedFdc> {
        self.fdcs.iter().map(|w| &w.fdc)
    }

    pub fn is_port_mapped(&self, port: u16) -> bool {
        self.io.is_mapped(port)
    }

    /// Engines may share a base, and port handlers are keyed by address, so any change tears down
    /// every window and maps the attached engines again in adoption order.
    fn sync_fdc_windows(&mut self) {
        let changed = self
            .fdcs
            .iter()
            .any(|window| window.fdc.borrow().base() != window.mapped);
        if !changed {
            return;
        }

        for window in &mut self.fdcs {
            if let Some(old) = window.mapped.take() {
                unregister_fdc_ports(&mut self.io, old);
            }
        }
        for window in &mut self.fdcs {
            let base = window.fdc.borrow().base();
            if let Some(base) = base {
                register_fdc_ports(&mut self.io, &window.fdc, base);
            }
            window.mapped = base;
        }
    }
}

impl DeviceHost for Ps2Machine {
    fn irq_sink(&self) -> SharedIrqSink {
        self.irq.sink()
    }

    fn adopt_floppy_controller(&mut self, fdc: SharedFdc) {
        self.fdcs.push(FdcWindow { fdc, mapped: None });
    }

    fn add_mca_adapter(&mut self, adapter: Box<dyn McaAdapter>) -> Result<McaSlot, DeviceError> {
        self.mca.borrow_mut().add(adapter)
    }
}
