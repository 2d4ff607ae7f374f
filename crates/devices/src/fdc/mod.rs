//! Floppy disk controller engine delegated to by diskette adapter cards.
//!
//! The engine models the register interface and command/result protocol of an 82077AA-class
//! controller closely enough for BIOS and driver probing: reset handshakes, SPECIFY/CONFIGURE,
//! seeks and SENSE INTERRUPT STATUS. No media is ever present, so data-transfer commands terminate
//! with "drive not ready". DMA is not performed; the channel is only recorded.
//!
//! Cards own the engine and steer it through [`FloppyController`]. The engine never maps itself
//! into the I/O space: hosts observe [`Fdc::base`] and (un)register the port window with
//! [`register_fdc_ports`] / [`unregister_fdc_ports`].

mod protocol;

pub use protocol::{FloppyCommand, FDC_PORT_COUNT};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use ps2ext_platform::io::{IoPortBus, PortIoDevice};

use crate::irq::SharedIrqSink;
use protocol::*;

/// Power-on interrupt line (the planar controller's IRQ 6).
pub const FDC_DEFAULT_IRQ: u8 = 6;
/// Power-on DMA channel (the planar controller's DMA 2).
pub const FDC_DEFAULT_DMA: u8 = 2;

/// Control surface a diskette adapter uses to configure its controller engine.
///
/// `set_base` maps the engine's register window at `base`; `remove` unmaps it. Neither touches the
/// command/status protocol state, which only [`FloppyController::reset`] re-initializes.
pub trait FloppyController {
    fn set_irq(&mut self, irq: u8);
    fn set_dma_channel(&mut self, channel: u8);
    fn set_base(&mut self, base: u16);
    fn remove(&mut self);
    fn reset(&mut self);
}

impl<T: FloppyController + ?Sized> FloppyController for Rc<RefCell<T>> {
    fn set_irq(&mut self, irq: u8) {
        self.borrow_mut().set_irq(irq);
    }

    fn set_dma_channel(&mut self, channel: u8) {
        self.borrow_mut().set_dma_channel(channel);
    }

    fn set_base(&mut self, base: u16) {
        self.borrow_mut().set_base(base);
    }

    fn remove(&mut self) {
        self.borrow_mut().remove();
    }

    fn reset(&mut self) {
        self.borrow_mut().reset();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Command {
        command: FloppyCommand,
        opcode: u8,
        params: Vec<u8>,
    },
    Result(VecDeque<u8>),
}

pub struct Fdc {
    irq: u8,
    dma_channel: u8,
    base: Option<u16>,
    irq_sink: SharedIrqSink,
    irq_pending: bool,
    irq_asserted: bool,

    dor: u8,
    tdr: u8,
    data_rate: u8,
    specify: [u8; 2],
    configure: [u8; 3],
    cylinders: [u8; 4],
    phase: Phase,
    reset_polls: u8,
    seek_status: Option<u8>,
}

pub type SharedFdc = Rc<RefCell<Fdc>>;

impl Fdc {
    /// Creates an unmapped controller held in reset (DOR = 0), as after power-on.
    pub fn new(irq_sink: SharedIrqSink) -> Self {
        Self {
            irq: FDC_DEFAULT_IRQ,
            dma_channel: FDC_DEFAULT_DMA,
            base: None,
            irq_sink,
            irq_pending: false,
            irq_asserted: false,
            dor: 0,
            tdr: 0,
            data_rate: 0,
            specify: [0; 2],
            configure: [0; 3],
            cylinders: [0; 4],
            phase: Phase::Idle,
            reset_polls: 0,
            seek_status: None,
        }
    }

    pub fn irq(&self) -> u8 {
        self.irq
    }

    pub fn dma_channel(&self) -> u8 {
        self.dma_channel
    }

    /// I/O base while mapped, `None` while detached.
    pub fn base(&self) -> Option<u16> {
        self.base
    }

    /// Level currently driven onto the configured IRQ input.
    pub fn irq_level(&self) -> bool {
        self.irq_asserted
    }

    pub fn dor(&self) -> u8 {
        self.dor
    }

    /// Whether SPECIFY selected non-DMA (PIO) transfers.
    pub fn non_dma_mode(&self) -> bool {
        (self.specify[1] & 0x01) != 0
    }

    fn offset(&self, port: u16) -> Option<u16> {
        let base = self.base?;
        port.checked_sub(base)
            .filter(|off| *off < FDC_PORT_COUNT && *off != reg::UNDECODED)
    }

    pub fn read_u8(&mut self, port: u16) -> u8 {
        let Some(off) = self.offset(port) else {
            return 0xFF;
        };

        match off {
            reg::SRA => {
                let int = if self.irq_pending { SRA_INT_PENDING } else { 0 };
                int | SRA_NDRV2
            }
            reg::SRB => {
                let mut srb = SRB_FIXED;
                if (self.dor & DOR_MOTOR_A) != 0 {
                    srb |= SRB_MOTOR_EN0;
                }
                if (self.dor & DOR_MOTOR_B) != 0 {
                    srb |= SRB_MOTOR_EN1;
                }
                if (self.dor & DOR_DRIVE_SELECT_MASK) & 0x01 != 0 {
                    srb |= SRB_DRIVE_SEL0;
                }
                srb
            }
            reg::DOR => self.dor,
            reg::TDR => self.tdr,
            reg::MSR_DSR => self.main_status(),
            reg::FIFO => self.read_fifo(),
            // No media is ever inserted, so the change line stays asserted.
            reg::DIR_CCR => DIR_DISK_CHANGE,
            _ => 0xFF,
        }
    }

    pub fn write_u8(&mut self, port: u16, value: u8) {
        let Some(off) = self.offset(port) else {
            return;
        };

        match off {
            reg::DOR => self.write_dor(value),
            reg::TDR => self.tdr = value & 0x03,
            reg::MSR_DSR => {
                self.data_rate = value & DATA_RATE_MASK;
                if (value & DSR_SW_RESET) != 0 {
                    // Self-clearing; a controller still held in reset by the DOR stays there.
                    self.enter_reset();
                    if !self.in_reset() {
                        self.leave_reset();
                    }
                }
            }
            reg::FIFO => self.write_fifo(value),
            reg::DIR_CCR => self.data_rate = value & DATA_RATE_MASK,
            _ => {}
        }
    }

    fn in_reset(&self) -> bool {
        (self.dor & DOR_NRESET) == 0
    }

    fn main_status(&self) -> u8 {
        if self.in_reset() {
            return 0;
        }
        match &self.phase {
            Phase::Idle => MSR_RQM,
            Phase::Command { .. } => MSR_RQM | MSR_CMD_BUSY,
            Phase::Result(_) => MSR_RQM | MSR_DIO | MSR_CMD_BUSY,
        }
    }

    fn write_dor(&mut self, value: u8) {
        let was_in_reset = self.in_reset();
        self.dor = value;
        match (was_in_reset, self.in_reset()) {
            (false, true) => self.enter_reset(),
            (true, false) => self.leave_reset(),
            _ => {}
        }
        self.update_irq();
    }

    fn enter_reset(&mut self) {
        self.phase = Phase::Idle;
        self.reset_polls = 0;
        self.seek_status = None;
        self.irq_pending = false;
        self.update_irq();
    }

    fn leave_reset(&mut self) {
        tracing::trace!("fdc leaving reset, arming {RESET_POLL_DRIVES} polling interrupts");
        self.reset_polls = RESET_POLL_DRIVES;
        self.raise_interrupt();
    }

    fn raise_interrupt(&mut self) {
        self.irq_pending = true;
        self.update_irq();
    }

    fn update_irq(&mut self) {
        let level = self.irq_pending && (self.dor & DOR_DMA_GATE) != 0;
        if level != self.irq_asserted {
            self.irq_asserted = level;
            self.irq_sink.set_irq_level(self.irq, level);
        }
    }

    fn read_fifo(&mut self) -> u8 {
        let Phase::Result(bytes) = &mut self.phase else {
            return 0xFF;
        };
        let value = bytes.pop_front().unwrap_or(0xFF);
        if bytes.is_empty() {
            self.phase = Phase::Idle;
        }
        value
    }

    fn write_fifo(&mut self, value: u8) {
        if self.in_reset() {
            return;
        }

        match &mut self.phase {
            Phase::Command { params, .. } => params.push(value),
            // Writes while results are pending are dropped, as on real parts.
            Phase::Result(_) => return,
            Phase::Idle => {}
        }

        if self.phase == Phase::Idle {
            let command = FloppyCommand::from_opcode(value);
            self.phase = Phase::Command {
                command,
                opcode: value,
                params: Vec::with_capacity(command.param_count()),
            };
        }

        if let Phase::Command {
            command,
            opcode,
            params,
        } = &self.phase
        {
            if params.len() == command.param_count() {
                let (command, opcode, params) = (*command, *opcode, params.clone());
                self.execute(command, opcode, &params);
            }
        }
    }

    fn execute(&mut self, command: FloppyCommand, opcode: u8, params: &[u8]) {
        tracing::trace!(?command, opcode, ?params, "fdc command");

        let result: Vec<u8> = match command {
            FloppyCommand::Specify => {
                self.specify.copy_from_slice(params);
                Vec::new()
            }
            FloppyCommand::Configure => {
                self.configure.copy_from_slice(params);
                Vec::new()
            }
            FloppyCommand::SenseDriveStatus => {
                let drive = params[0] & 0x03;
                let mut st3 = params[0] & (0x03 | ST3_HEAD);
                if self.cylinders[usize::from(drive)] == 0 {
                    st3 |= ST3_TRACK0;
                }
                vec![st3]
            }
            FloppyCommand::Recalibrate => {
                let drive = params[0] & 0x03;
                self.cylinders[usize::from(drive)] = 0;
                self.finish_seek(ST0_SEEK_END | drive);
                Vec::new()
            }
            FloppyCommand::Seek => {
                let drive = params[0] & 0x03;
                self.cylinders[usize::from(drive)] = params[1];
                self.finish_seek(ST0_SEEK_END | (params[0] & (0x03 | ST0_HEAD)));
                Vec::new()
            }
            FloppyCommand::SenseInterruptStatus => self.sense_interrupt(),
            FloppyCommand::Version => vec![ENHANCED_CONTROLLER_VERSION],
            FloppyCommand::ReadData | FloppyCommand::WriteData | FloppyCommand::FormatTrack => {
                let chrn = [params.get(1), params.get(2), params.get(3), params.get(4)];
                self.not_ready(params[0], chrn)
            }
            FloppyCommand::ReadId => {
                let cylinder = self.cylinders[usize::from(params[0] & 0x03)];
                let head = (params[0] >> 2) & 0x01;
                self.not_ready(params[0], [Some(&cylinder), Some(&head), None, None])
            }
            FloppyCommand::Invalid => vec![INVALID_COMMAND_STATUS],
        };

        self.phase = if result.is_empty() {
            Phase::Idle
        } else {
            Phase::Result(result.into())
        };
    }

    fn finish_seek(&mut self, st0: u8) {
        self.seek_status = Some(st0);
        self.raise_interrupt();
    }

    /// Abnormal termination for an empty drive: ST0, ST1, ST2 followed by the C/H/R/N echo.
    fn not_ready(&mut self, unit: u8, chrn: [Option<&u8>; 4]) -> Vec<u8> {
        let st0 = ST0_ABNORMAL_TERMINATION | ST0_NOT_READY | (unit & (0x03 | ST0_HEAD));
        let mut result = vec![st0, 0, 0];
        result.extend(chrn.iter().map(|b| b.copied().unwrap_or(0)));
        self.raise_interrupt();
        result
    }

    fn sense_interrupt(&mut self) -> Vec<u8> {
        let result = if self.reset_polls > 0 {
            let drive = RESET_POLL_DRIVES - self.reset_polls;
            self.reset_polls -= 1;
            vec![ST0_RESET_POLL | drive, self.cylinders[usize::from(drive)]]
        } else if let Some(st0) = self.seek_status.take() {
            vec![st0, self.cylinders[usize::from(st0 & 0x03)]]
        } else {
            vec![INVALID_COMMAND_STATUS]
        };

        self.irq_pending = false;
        self.update_irq();
        result
    }
}

impl FloppyController for Fdc {
    fn set_irq(&mut self, irq: u8) {
        if irq == self.irq {
            return;
        }
        if self.irq_asserted {
            self.irq_sink.set_irq_level(self.irq, false);
            self.irq_sink.set_irq_level(irq, true);
        }
        self.irq = irq;
    }

    fn set_dma_channel(&mut self, channel: u8) {
        tracing::debug!(channel, "fdc dma channel set");
        self.dma_channel = channel;
    }

    fn set_base(&mut self, base: u16) {
        tracing::debug!("fdc attached at {base:#x}");
        self.base = Some(base);
    }

    fn remove(&mut self) {
        if let Some(base) = self.base.take() {
            tracing::debug!("fdc detached from {base:#x}");
        }
    }

    /// Returns the command/status protocol to its power-on state. The IRQ number, DMA channel and
    /// attachment are configuration owned by the card and survive.
    fn reset(&mut self) {
        self.dor = 0;
        self.tdr = 0;
        self.data_rate = 0;
        self.specify = [0; 2];
        self.configure = [0; 3];
        self.cylinders = [0; 4];
        self.enter_reset();
    }
}

/// Per-port [`PortIoDevice`] view of a shared [`Fdc`].
pub struct FdcPort {
    fdc: SharedFdc,
    port: u16,
}

impl FdcPort {
    pub fn new(fdc: SharedFdc, port: u16) -> Self {
        Self { fdc, port }
    }
}

impl PortIoDevice for FdcPort {
    fn read(&mut self, port: u16, size: u8) -> u32 {
        if size == 0 {
            return 0;
        }
        debug_assert_eq!(port, self.port);
        let value = self.fdc.borrow_mut().read_u8(port);
        // The controller is an 8-bit device; wider reads see the byte replicated by the bus.
        match size {
            1 => u32::from(value),
            2 => u32::from(u16::from_le_bytes([value, value])),
            _ => u32::from_le_bytes([value; 4]),
        }
    }

    fn write(&mut self, port: u16, size: u8, value: u32) {
        if size == 0 {
            return;
        }
        debug_assert_eq!(port, self.port);
        self.fdc.borrow_mut().write_u8(port, value as u8);
    }
}

/// Map the register window of `fdc` at `base` (offset 6 left unmapped).
pub fn register_fdc_ports(bus: &mut IoPortBus, fdc: &SharedFdc, base: u16) {
    bus.register_shared_range(base, FDC_PORT_COUNT, |port| {
        (port.wrapping_sub(base) != reg::UNDECODED)
            .then(|| Box::new(FdcPort::new(fdc.clone(), port)) as Box<dyn PortIoDevice>)
    });
}

pub fn unregister_fdc_ports(bus: &mut IoPortBus, base: u16) {
    bus.unregister_range(base, FDC_PORT_COUNT);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irq::IsaIrqLevels;

    const BASE: u16 = 0x280;

    fn attached_fdc() -> (Fdc, IsaIrqLevels) {
        let levels = IsaIrqLevels::new();
        let mut fdc = Fdc::new(levels.sink());
        fdc.set_base(BASE);
        (fdc, levels)
    }

    fn bring_out_of_reset(fdc: &mut Fdc) {
        fdc.write_u8(BASE + reg::DOR, DOR_NRESET | DOR_DMA_GATE);
    }

    fn command(fdc: &mut Fdc, bytes: &[u8]) -> Vec<u8> {
        for b in bytes {
            assert_ne!(fdc.read_u8(BASE + reg::MSR_DSR) & MSR_RQM, 0);
            fdc.write_u8(BASE + reg::FIFO, *b);
        }
        let mut result = Vec::new();
        while fdc.read_u8(BASE + reg::MSR_DSR) & MSR_DIO != 0 {
            result.push(fdc.read_u8(BASE + reg::FIFO));
        }
        result
    }

    #[test]
    fn detached_controller_floats_reads_and_ignores_writes() {
        let levels = IsaIrqLevels::new();
        let mut fdc = Fdc::new(levels.sink());
        assert_eq!(fdc.base(), None);

        fdc.write_u8(BASE + reg::DOR, DOR_NRESET | DOR_DMA_GATE);
        assert_eq!(fdc.read_u8(BASE + reg::DOR), 0xFF);
        assert_eq!(fdc.dor(), 0);
        assert!(!levels.level(FDC_DEFAULT_IRQ));
    }

    #[test]
    fn undecoded_offset_and_out_of_window_ports_float_high() {
        let (mut fdc, _) = attached_fdc();
        bring_out_of_reset(&mut fdc);
        assert_eq!(fdc.read_u8(BASE + reg::UNDECODED), 0xFF);
        assert_eq!(fdc.read_u8(BASE + FDC_PORT_COUNT), 0xFF);
        assert_eq!(fdc.read_u8(BASE - 1), 0xFF);
    }

    #[test]
    fn leaving_reset_raises_irq_and_reports_four_polls() {
        let (mut fdc, levels) = attached_fdc();
        assert_eq!(fdc.read_u8(BASE + reg::MSR_DSR), 0);

        bring_out_of_reset(&mut fdc);
        assert!(levels.level(FDC_DEFAULT_IRQ));
        assert_ne!(fdc.read_u8(BASE + reg::SRA) & SRA_INT_PENDING, 0);

        for drive in 0..4u8 {
            assert_eq!(command(&mut fdc, &[0x08]), vec![0xC0 | drive, 0]);
            assert!(!levels.level(FDC_DEFAULT_IRQ));
        }
        assert_eq!(command(&mut fdc, &[0x08]), vec![INVALID_COMMAND_STATUS]);
    }

    #[test]
    fn irq_output_is_gated_by_dor_dma_bit() {
        let (mut fdc, levels) = attached_fdc();
        fdc.write_u8(BASE + reg::DOR, DOR_NRESET);
        assert!(!levels.level(FDC_DEFAULT_IRQ));
        assert_ne!(fdc.read_u8(BASE + reg::SRA) & SRA_INT_PENDING, 0);

        fdc.write_u8(BASE + reg::DOR, DOR_NRESET | DOR_DMA_GATE);
        assert!(levels.level(FDC_DEFAULT_IRQ));
    }

    #[test]
    fn dsr_software_reset_rearms_polling() {
        let (mut fdc, levels) = attached_fdc();
        bring_out_of_reset(&mut fdc);
        for _ in 0..4 {
            command(&mut fdc, &[0x08]);
        }

        fdc.write_u8(BASE + reg::MSR_DSR, DSR_SW_RESET | 0x02);
        assert!(levels.level(FDC_DEFAULT_IRQ));
        assert_eq!(command(&mut fdc, &[0x08]), vec![0xC0, 0]);
    }

    #[test]
    fn dsr_software_reset_is_silent_while_dor_holds_reset() {
        let (mut fdc, levels) = attached_fdc();
        fdc.write_u8(BASE + reg::DOR, DOR_DMA_GATE);

        fdc.write_u8(BASE + reg::MSR_DSR, DSR_SW_RESET);
        assert!(!levels.level(FDC_DEFAULT_IRQ));
        assert_eq!(fdc.read_u8(BASE + reg::SRA) & SRA_INT_PENDING, 0);
        assert_eq!(fdc.read_u8(BASE + reg::MSR_DSR), 0);

        // Releasing the DOR reset still runs the normal handshake.
        bring_out_of_reset(&mut fdc);
        assert!(levels.level(FDC_DEFAULT_IRQ));
        assert_eq!(command(&mut fdc, &[0x08]), vec![0xC0, 0]);
    }

    #[test]
    fn seek_then_sense_interrupt_reports_cylinder() {
        let (mut fdc, levels) = attached_fdc();
        bring_out_of_reset(&mut fdc);
        for _ in 0..4 {
            command(&mut fdc, &[0x08]);
        }

        assert!(command(&mut fdc, &[0x0F, 0x05, 40]).is_empty());
        assert!(levels.level(FDC_DEFAULT_IRQ));
        assert_eq!(command(&mut fdc, &[0x08]), vec![ST0_SEEK_END | ST0_HEAD | 1, 40]);

        assert!(command(&mut fdc, &[0x07, 0x01]).is_empty());
        assert_eq!(command(&mut fdc, &[0x08]), vec![ST0_SEEK_END | 1, 0]);
        assert_eq!(command(&mut fdc, &[0x04, 0x01]), vec![ST3_TRACK0 | 1]);
    }

    #[test]
    fn version_specify_and_invalid_opcodes() {
        let (mut fdc, _) = attached_fdc();
        bring_out_of_reset(&mut fdc);

        assert_eq!(command(&mut fdc, &[0x10]), vec![ENHANCED_CONTROLLER_VERSION]);
        assert!(command(&mut fdc, &[0x03, 0xDF, 0x03]).is_empty());
        assert!(fdc.non_dma_mode());
        assert!(command(&mut fdc, &[0x13, 0x00, 0x57, 0x00]).is_empty());
        assert_eq!(command(&mut fdc, &[0x1F]), vec![INVALID_COMMAND_STATUS]);
    }

    #[test]
    fn read_data_without_media_terminates_not_ready() {
        let (mut fdc, levels) = attached_fdc();
        bring_out_of_reset(&mut fdc);
        for _ in 0..4 {
            command(&mut fdc, &[0x08]);
        }

        let result = command(&mut fdc, &[0xE6, 0x00, 0x02, 0x00, 0x01, 0x02, 0x12, 0x1B, 0xFF]);
        assert_eq!(
            result,
            vec![ST0_ABNORMAL_TERMINATION | ST0_NOT_READY, 0, 0, 0x02, 0x00, 0x01, 0x02]
        );
        assert!(levels.level(FDC_DEFAULT_IRQ));
    }

    #[test]
    fn changing_irq_moves_an_asserted_line() {
        let (mut fdc, levels) = attached_fdc();
        bring_out_of_reset(&mut fdc);
        assert!(levels.level(FDC_DEFAULT_IRQ));

        fdc.set_irq(5);
        assert!(!levels.level(FDC_DEFAULT_IRQ));
        assert!(levels.level(5));
        assert_eq!(fdc.irq(), 5);
    }

    #[test]
    fn hardware_reset_keeps_configuration_and_attachment() {
        let (mut fdc, levels) = attached_fdc();
        fdc.set_irq(6);
        fdc.set_dma_channel(3);
        bring_out_of_reset(&mut fdc);
        command(&mut fdc, &[0x03, 0xDF, 0x03]);

        fdc.reset();
        assert_eq!(fdc.base(), Some(BASE));
        assert_eq!(fdc.dma_channel(), 3);
        assert_eq!(fdc.irq(), 6);
        assert_eq!(fdc.dor(), 0);
        assert!(!fdc.non_dma_mode());
        assert!(!levels.level(6));
        assert_eq!(fdc.read_u8(BASE + reg::MSR_DSR), 0);
    }

    #[test]
    fn port_window_registration_skips_offset_six() {
        let levels = IsaIrqLevels::new();
        let fdc: SharedFdc = Rc::new(RefCell::new(Fdc::new(levels.sink())));
        fdc.borrow_mut().set_base(BASE);

        let mut bus = IoPortBus::new();
        register_fdc_ports(&mut bus, &fdc, BASE);
        assert!(bus.is_mapped(BASE + reg::FIFO));
        assert!(!bus.is_mapped(BASE + reg::UNDECODED));

        bus.write_u8(BASE + reg::DOR, DOR_NRESET | DOR_DMA_GATE);
        assert_eq!(bus.read_u8(BASE + reg::MSR_DSR), MSR_RQM);
        assert_eq!(bus.read(BASE + reg::DOR, 2), 0x0C0C);

        unregister_fdc_ports(&mut bus, BASE);
        assert_eq!(bus.read_u8(BASE + reg::DOR), 0xFF);
    }
}
