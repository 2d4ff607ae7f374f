//! ISA interrupt request plumbing.
//!
//! Device models drive numbered ISA IRQ inputs through [`IsaIrqSink`] rather than holding a fixed
//! line, because adapters like the PS/2 diskette card pick their interrupt at configuration time.

use std::cell::RefCell;
use std::rc::Rc;

/// Number of ISA IRQ inputs on a pair of cascaded 8259 PICs.
pub const ISA_IRQ_COUNT: usize = 16;

pub trait IsaIrqSink {
    fn set_irq_level(&self, irq: u8, level: bool);
}

pub type SharedIrqSink = Rc<dyn IsaIrqSink>;

/// Level latch for every ISA IRQ input.
///
/// Cheap to clone; all clones observe the same levels. Hosts hand one clone to devices (as a
/// [`SharedIrqSink`]) and keep another to sample lines.
#[derive(Debug, Clone, Default)]
pub struct IsaIrqLevels(Rc<RefCell<[bool; ISA_IRQ_COUNT]>>);

impl IsaIrqLevels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self, irq: u8) -> bool {
        self.0
            .borrow()
            .get(usize::from(irq))
            .copied()
            .unwrap_or(false)
    }

    pub fn sink(&self) -> SharedIrqSink {
        Rc::new(self.clone())
    }
}

impl IsaIrqSink for IsaIrqLevels {
    fn set_irq_level(&self, irq: u8, level: bool) {
        if let Some(slot) = self.0.borrow_mut().get_mut(usize::from(irq)) {
            *slot = level;
        }
    }
}
