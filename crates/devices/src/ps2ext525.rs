//! IBM 5.25-inch Diskette Adapter for PS/2 and PS/55 Micro Channel machines.
//!
//! The card carries its own floppy controller for external 5.25" drives. Everything software can
//! see of the card itself is its POS block:
//!
//! | POS | Meaning                                                                 |
//! |-----|-------------------------------------------------------------------------|
//! | 0,1 | Adapter ID `0xDFFA`                                                     |
//! | 2   | bit 0 card enable, bits 4-6 DMA arbitration level, bit 7 drive routing |
//! | 3,4 | Drive capability bytes checked by the reference diskette's setup rules  |
//! | 5-7 | Unused                                                                  |
//!
//! Only OUTs to POS port `0x102` are latched. Writing POS 2 reprograms the controller: it is
//! always unmapped first, given the new DMA channel, and mapped back at `0x280` only when the
//! enable bit is set. The controller never sits mapped with a channel that disagrees with POS 2.
//!
//! Bit 7 of POS 2 (internal drives 0/1 vs external drives 2/3) and POS 3/4 are latched but not
//! interpreted here. The setup program rejects some combinations (POS 4 bits 0 and 2 both set;
//! POS 4 bit 0 with POS 3 bit 6 clear, otherwise POS 3 bit 2 clear; any of POS 3 bits 0, 1, 4, 5
//! set); the card does no such checking, so neither do we.

use std::cell::RefCell;
use std::rc::Rc;

use crate::device::{DeviceDescriptor, DeviceError, DeviceFlags, DeviceHost, DeviceInstance};
use crate::fdc::{Fdc, FloppyController, SharedFdc};
use crate::mca::McaAdapter;

pub const PS2EXT525_IO_BASE: u16 = 0x280;
pub const PS2EXT525_IRQ: u8 = 6;
pub const PS2EXT525_DMA: u8 = 3;

/// The only POS port the card latches writes from.
pub const PS2EXT525_CONFIG_PORT: u16 = 0x102;

const POS_MODE: usize = 2;
const MODE_ENABLE: u8 = 0x01;
const MODE_DMA_SHIFT: u8 = 4;
const MODE_DMA_MASK: u8 = 0x07;
const MODE_EXTERNAL_DRIVES: u8 = 0x80;

/// Power-on POS contents: adapter ID, card disabled on arbitration level 3.
pub const PS2EXT525_DEFAULT_POS: [u8; 8] = [0xFA, 0xDF, 0x3E, 0x04, 0x04, 0x00, 0x00, 0x00];

pub const PS2_EXT525_DEVICE: DeviceDescriptor = DeviceDescriptor {
    name: "IBM 5.25-inch Diskette Adapter",
    internal_name: "ps2ext525",
    flags: DeviceFlags::MCA,
    init: ps2ext525_init,
};

fn ps2ext525_init(host: &mut dyn DeviceHost) -> Result<DeviceInstance, DeviceError> {
    let fdc: SharedFdc = Rc::new(RefCell::new(Fdc::new(host.irq_sink())));
    let slot = host.add_mca_adapter(Box::new(Ps2Ext525Adapter::new(fdc.clone())))?;
    host.adopt_floppy_controller(fdc);
    Ok(DeviceInstance::Mca(slot))
}

pub struct Ps2Ext525Adapter<F: FloppyController = SharedFdc> {
    fdc: F,
    pos: [u8; 8],
}

impl<F: FloppyController> Ps2Ext525Adapter<F> {
    /// Wraps `fdc`, programming its fixed resources and leaving it unmapped until POS 2 enables
    /// the card.
    pub fn new(mut fdc: F) -> Self {
        fdc.set_irq(PS2EXT525_IRQ);
        fdc.set_dma_channel(PS2EXT525_DMA);
        fdc.set_base(PS2EXT525_IO_BASE);
        fdc.remove();

        Self {
            fdc,
            pos: PS2EXT525_DEFAULT_POS,
        }
    }

    pub fn pos_regs(&self) -> &[u8; 8] {
        &self.pos
    }

    pub fn controller(&self) -> &F {
        &self.fdc
    }

    pub fn enabled(&self) -> bool {
        (self.pos[POS_MODE] & MODE_ENABLE) != 0
    }

    /// DMA arbitration level selected in POS 2.
    pub fn dma_channel(&self) -> u8 {
        (self.pos[POS_MODE] >> MODE_DMA_SHIFT) & MODE_DMA_MASK
    }

    /// Drive routing bit of POS 2 (external drives 2/3 when set).
    pub fn external_drives(&self) -> bool {
        (self.pos[POS_MODE] & MODE_EXTERNAL_DRIVES) != 0
    }

    fn apply_mode(&mut self) {
        self.fdc.remove();
        self.fdc.set_dma_channel(self.dma_channel());
        if self.enabled() {
            self.fdc.set_base(PS2EXT525_IO_BASE);
        }
    }
}

impl<F: FloppyController> McaAdapter for Ps2Ext525Adapter<F> {
    fn read(&self, port: u16) -> u8 {
        let value = self.pos[usize::from(port & 7)];
        tracing::trace!("ps2ext525 POS read {port:#x} -> {value:#04x}");
        value
    }

    fn write(&mut self, port: u16, value: u8) {
        tracing::trace!("ps2ext525 POS write {port:#x} <- {value:#04x}");
        if port != PS2EXT525_CONFIG_PORT {
            return;
        }

        let index = usize::from(port & 7);
        self.pos[index] = value;
        if index == POS_MODE {
            self.apply_mode();
        }
    }

    fn feedback(&self) -> bool {
        self.enabled()
    }

    fn reset(&mut self) {
        self.fdc.reset();
    }
}

impl<F: FloppyController> Drop for Ps2Ext525Adapter<F> {
    fn drop(&mut self) {
        tracing::debug!("ps2ext525 adapter closed");
    }
}
