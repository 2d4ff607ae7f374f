#![forbid(unsafe_code)]

pub mod device;
pub mod fdc;
pub mod irq;
pub mod mca;
pub mod ps2ext525;

pub use device::{DeviceDescriptor, DeviceError, DeviceFlags, DeviceHost, DeviceInstance};
pub use fdc::{Fdc, FloppyController, SharedFdc};
pub use mca::{McaAdapter, McaBus, McaSlot, SharedMcaBus};
pub use ps2ext525::{Ps2Ext525Adapter, PS2_EXT525_DEVICE};
