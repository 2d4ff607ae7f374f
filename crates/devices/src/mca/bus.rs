use std::cell::RefCell;
use std::rc::Rc;

use super::{McaAdapter, McaSlot, MCA_MAX_SLOTS};
use crate::device::DeviceError;

const SETUP_CHANNEL_RESET: u8 = 0b1000_0000;
const SETUP_ENABLE: u8 = 0b0000_1000;
const SETUP_SLOT_MASK: u8 = 0b0000_0111;
/// Reserved bits of the adapter setup register read back as ones.
const SETUP_READ_ONES: u8 = 0b0111_0000;

pub struct McaBus {
    slots: Vec<Option<Box<dyn McaAdapter>>>,
    index: usize,
    setup: u8,
}

pub type SharedMcaBus = Rc<RefCell<McaBus>>;

impl McaBus {
    /// Creates a bus with `slot_count` slots (clamped to `1..=8`).
    pub fn new(slot_count: usize) -> Self {
        let slot_count = slot_count.clamp(1, MCA_MAX_SLOTS);
        Self {
            slots: (0..slot_count).map(|_| None).collect(),
            index: 0,
            setup: 0,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_occupied(&self, slot: McaSlot) -> bool {
        matches!(self.slots.get(slot.index()), Some(Some(_)))
    }

    /// Installs `adapter` in the first free slot.
    pub fn add(&mut self, adapter: Box<dyn McaAdapter>) -> Result<McaSlot, DeviceError> {
        let Some(index) = self.slots.iter().position(Option::is_none) else {
            tracing::warn!(slots = self.slots.len(), "no free MCA slot");
            return Err(DeviceError::NoFreeMcaSlot {
                slots: self.slots.len(),
            });
        };
        self.slots[index] = Some(adapter);
        tracing::debug!(slot = index, "MCA adapter installed");
        Ok(McaSlot::new(index as u8))
    }

    /// Uninstalls the adapter in `slot`, handing its ownership back to the caller.
    pub fn remove(&mut self, slot: McaSlot) -> Option<Box<dyn McaAdapter>> {
        self.slots.get_mut(slot.index())?.take()
    }

    pub fn select(&mut self, slot: McaSlot) {
        self.index = slot.index();
    }

    pub fn selected(&self) -> McaSlot {
        McaSlot::new(self.index as u8)
    }

    fn selected_adapter(&self) -> Option<&dyn McaAdapter> {
        self.slots.get(self.index)?.as_deref()
    }

    fn selected_adapter_mut(&mut self) -> Option<&mut (dyn McaAdapter + 'static)> {
        self.slots.get_mut(self.index)?.as_deref_mut()
    }

    /// POS read from the selected slot; empty or out-of-range slots float high.
    pub fn read(&self, port: u16) -> u8 {
        self.selected_adapter().map_or(0xFF, |adapter| adapter.read(port))
    }

    pub fn write(&mut self, port: u16, value: u8) {
        if let Some(adapter) = self.selected_adapter_mut() {
            adapter.write(port, value);
        }
    }

    pub fn feedback(&self) -> bool {
        self.selected_adapter().is_some_and(|adapter| adapter.feedback())
    }

    /// Channel reset: every installed adapter sees it, selected or not.
    pub fn reset(&mut self) {
        for adapter in self.slots.iter_mut().flatten() {
            adapter.reset();
        }
    }

    pub fn setup_enabled(&self) -> bool {
        (self.setup & SETUP_ENABLE) != 0
    }

    pub fn read_adapter_setup(&self) -> u8 {
        self.setup | SETUP_READ_ONES
    }

    /// Adapter setup register (`0x96`): bits 0-2 select the slot, bit 3 enables POS access and a
    /// rising edge on bit 7 pulses channel reset.
    pub fn write_adapter_setup(&mut self, value: u8) {
        let reset_edge = (value & !self.setup & SETUP_CHANNEL_RESET) != 0;
        self.setup = value;
        self.index = usize::from(value & SETUP_SLOT_MASK);
        tracing::trace!(
            slot = self.index,
            setup = self.setup_enabled(),
            "MCA adapter setup"
        );
        if reset_edge {
            self.reset();
        }
    }
}

impl Default for McaBus {
    fn default() -> Self {
        Self::new(MCA_MAX_SLOTS)
    }
}
