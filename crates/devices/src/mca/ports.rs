use ps2ext_platform::io::{IoPortBus, PortIoDevice};

use super::SharedMcaBus;

/// Adapter enable/setup register on PS/2 planars.
pub const ADAPTER_SETUP_PORT: u16 = 0x96;
/// First POS register; POS bytes 0..=7 follow contiguously.
pub const POS_PORT_BASE: u16 = 0x100;
pub const POS_PORT_COUNT: u16 = 8;

/// Port I/O front end for the POS bus.
///
/// POS registers only decode while the setup register has adapter setup enabled; outside setup
/// mode the window floats high, matching a planar with no card driving the bus.
pub struct McaPosPort {
    bus: SharedMcaBus,
    port: u16,
}

impl McaPosPort {
    pub fn new(bus: SharedMcaBus, port: u16) -> Self {
        Self { bus, port }
    }

    fn read_u8(&self, port: u16) -> u8 {
        let bus = self.bus.borrow();
        if port == ADAPTER_SETUP_PORT {
            return bus.read_adapter_setup();
        }
        if !is_pos_port(port) || !bus.setup_enabled() {
            return 0xFF;
        }
        let value = bus.read(port);
        tracing::trace!("POS read {port:#x} -> {value:#04x}");
        value
    }

    fn write_u8(&self, port: u16, value: u8) {
        let mut bus = self.bus.borrow_mut();
        if port == ADAPTER_SETUP_PORT {
            bus.write_adapter_setup(value);
            return;
        }
        if !is_pos_port(port) || !bus.setup_enabled() {
            return;
        }
        tracing::trace!("POS write {port:#x} <- {value:#04x}");
        bus.write(port, value);
    }
}

fn is_pos_port(port: u16) -> bool {
    port.wrapping_sub(POS_PORT_BASE) < POS_PORT_COUNT
}

impl PortIoDevice for McaPosPort {
    fn read(&mut self, port: u16, size: u8) -> u32 {
        if size == 0 {
            return 0;
        }
        debug_assert_eq!(port, self.port);
        match size {
            1 => u32::from(self.read_u8(port)),
            2 => u32::from(u16::from_le_bytes([
                self.read_u8(port),
                self.read_u8(port.wrapping_add(1)),
            ])),
            _ => u32::from_le_bytes([
                self.read_u8(port),
                self.read_u8(port.wrapping_add(1)),
                self.read_u8(port.wrapping_add(2)),
                self.read_u8(port.wrapping_add(3)),
            ]),
        }
    }

    fn write(&mut self, port: u16, size: u8, value: u32) {
        if size == 0 {
            return;
        }
        debug_assert_eq!(port, self.port);
        // Wider OUTs reach consecutive POS registers byte by byte.
        let bytes = value.to_le_bytes();
        let len = match size {
            1 => 1,
            2 => 2,
            _ => 4,
        };
        for (offset, byte) in bytes.iter().take(len).enumerate() {
            self.write_u8(port.wrapping_add(offset as u16), *byte);
        }
    }
}

/// Register the adapter setup port and the POS window on `io`.
pub fn register_mca_pos_ports(io: &mut IoPortBus, bus: &SharedMcaBus) {
    io.register(
        ADAPTER_SETUP_PORT,
        Box::new(McaPosPort::new(bus.clone(), ADAPTER_SETUP_PORT)),
    );
    io.register_shared_range(POS_PORT_BASE, POS_PORT_COUNT, |port| {
        Some(Box::new(McaPosPort::new(bus.clone(), port)) as Box<dyn PortIoDevice>)
    });
}
