//! Register layout and command encodings of the 82077AA-style controller core.

/// Number of I/O ports spanned by the register window (offset 6 is not decoded).
pub const FDC_PORT_COUNT: u16 = 8;

/// Register offsets relative to the controller's I/O base.
pub mod reg {
    pub const SRA: u16 = 0;
    pub const SRB: u16 = 1;
    pub const DOR: u16 = 2;
    pub const TDR: u16 = 3;
    /// Main status register on reads, data-rate select register on writes.
    pub const MSR_DSR: u16 = 4;
    pub const FIFO: u16 = 5;
    /// Shared with the fixed-disk controller on PC/AT style decoders.
    pub const UNDECODED: u16 = 6;
    /// Digital input register on reads, configuration control register on writes.
    pub const DIR_CCR: u16 = 7;
}

pub const DOR_DRIVE_SELECT_MASK: u8 = 0b0000_0011;
pub const DOR_NRESET: u8 = 0b0000_0100;
pub const DOR_DMA_GATE: u8 = 0b0000_1000;
pub const DOR_MOTOR_A: u8 = 0b0001_0000;
pub const DOR_MOTOR_B: u8 = 0b0010_0000;

pub const DSR_SW_RESET: u8 = 0b1000_0000;
pub const DATA_RATE_MASK: u8 = 0b0000_0011;

pub const MSR_CMD_BUSY: u8 = 0b0001_0000;
pub const MSR_DIO: u8 = 0b0100_0000;
pub const MSR_RQM: u8 = 0b1000_0000;

pub const SRA_INT_PENDING: u8 = 0b1000_0000;
pub const SRA_NDRV2: u8 = 0b0100_0000;
pub const SRB_FIXED: u8 = 0b1100_0000;
pub const SRB_DRIVE_SEL0: u8 = 0b0010_0000;
pub const SRB_MOTOR_EN1: u8 = 0b0000_0010;
pub const SRB_MOTOR_EN0: u8 = 0b0000_0001;

pub const DIR_DISK_CHANGE: u8 = 0b1000_0000;

pub const ST0_HEAD: u8 = 0b0000_0100;
pub const ST0_NOT_READY: u8 = 0b0000_1000;
pub const ST0_SEEK_END: u8 = 0b0010_0000;
pub const ST0_ABNORMAL_TERMINATION: u8 = 0b0100_0000;
pub const ST0_RESET_POLL: u8 = 0b1100_0000;

pub const ST3_TRACK0: u8 = 0b0001_0000;
pub const ST3_HEAD: u8 = 0b0000_0100;

/// Single-byte result of an unrecognised opcode (or SENSE INTERRUPT with nothing pending).
pub const INVALID_COMMAND_STATUS: u8 = 0x80;
/// VERSION result identifying an enhanced (82077AA-class) controller.
pub const ENHANCED_CONTROLLER_VERSION: u8 = 0x90;

/// Drive-level polling interrupts reported after a controller reset.
pub const RESET_POLL_DRIVES: u8 = 4;

/// Data-transfer opcodes carry MT/MFM/SK in their top three bits.
const TRANSFER_OPCODE_MASK: u8 = 0b0001_1111;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloppyCommand {
    Specify,
    SenseDriveStatus,
    Recalibrate,
    SenseInterruptStatus,
    Seek,
    Version,
    Configure,
    ReadData,
    WriteData,
    ReadId,
    FormatTrack,
    Invalid,
}

impl FloppyCommand {
    pub fn from_opcode(opcode: u8) -> Self {
        match opcode & TRANSFER_OPCODE_MASK {
            0x02 | 0x06 | 0x0C => return Self::ReadData,
            0x05 | 0x09 => return Self::WriteData,
            0x0A => return Self::ReadId,
            0x0D => return Self::FormatTrack,
            _ => {}
        }

        match opcode {
            0x03 => Self::Specify,
            0x04 => Self::SenseDriveStatus,
            0x07 => Self::Recalibrate,
            0x08 => Self::SenseInterruptStatus,
            0x0F => Self::Seek,
            0x10 => Self::Version,
            0x13 => Self::Configure,
            _ => Self::Invalid,
        }
    }

    /// Parameter bytes expected after the opcode byte.
    pub fn param_count(self) -> usize {
        match self {
            Self::Specify => 2,
            Self::SenseDriveStatus => 1,
            Self::Recalibrate => 1,
            Self::SenseInterruptStatus => 0,
            Self::Seek => 2,
            Self::Version => 0,
            Self::Configure => 3,
            Self::ReadData | Self::WriteData => 8,
            Self::ReadId => 1,
            Self::FormatTrack => 5,
            Self::Invalid => 0,
        }
    }
}
