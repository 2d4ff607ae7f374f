//! Micro Channel POS (Programmable Option Select) configuration bus.
//!
//! Every MCA adapter exposes eight POS bytes at I/O ports `0x100..=0x107`, but only the adapter in
//! the slot currently selected through the adapter setup register (`0x96`) sees those accesses.
//! [`McaBus`] owns the installed adapters and routes POS traffic to the selected one.

mod bus;
mod ports;

pub use bus::{McaBus, SharedMcaBus};
pub use ports::{
    register_mca_pos_ports, McaPosPort, ADAPTER_SETUP_PORT, POS_PORT_BASE, POS_PORT_COUNT,
};

/// Most planars decode eight adapter setup lines.
pub const MCA_MAX_SLOTS: usize = 8;

/// The per-adapter contract the POS bus dispatches to.
///
/// `port` is always the full I/O port (`0x100..=0x107`); adapters that only accept one specific
/// register compare against it verbatim.
pub trait McaAdapter {
    fn read(&self, port: u16) -> u8;
    fn write(&mut self, port: u16, value: u8);

    /// Card-enable feedback sampled by the planar during setup.
    fn feedback(&self) -> bool;

    /// Channel reset.
    fn reset(&mut self);
}

/// Handle to an installed adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct McaSlot(u8);

impl McaSlot {
    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}
