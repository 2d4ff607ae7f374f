use std::collections::BTreeMap;

/// A device reachable through x86 `IN`/`OUT` instructions.
pub trait PortIoDevice {
    fn read(&mut self, port: u16, size: u8) -> u32;
    fn write(&mut self, port: u16, size: u8, value: u32);

    /// Reset the device back to its power-on state.
    fn reset(&mut self) {}
}

/// Exact-port dispatch table for the machine's 64 KiB I/O space.
///
/// Unmapped ports float high on reads and swallow writes, which is what software probing for
/// absent adapters expects to see.
pub struct IoPortBus {
    devices: BTreeMap<u16, Box<dyn PortIoDevice>>,
}

impl IoPortBus {
    pub fn new() -> Self {
        Self {
            devices: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, port: u16, device: Box<dyn PortIoDevice>) {
        self.devices.insert(port, device);
    }

    /// Unregister an I/O port handler, returning the removed device (if any).
    pub fn unregister(&mut self, port: u16) -> Option<Box<dyn PortIoDevice>> {
        self.devices.remove(&port)
    }

    /// Register a device for a contiguous range of I/O ports.
    ///
    /// The provided factory is invoked once per port and may return `None` to leave a hole in the
    /// window (e.g. a port owned by another device sharing the same decode block). Ports are
    /// computed using wrapping arithmetic (`start + offset`).
    pub fn register_shared_range<F>(&mut self, start: u16, len: u16, mut make: F)
    where
        F: FnMut(u16) -> Option<Box<dyn PortIoDevice>>,
    {
        for offset in 0..len {
            let port = start.wrapping_add(offset);
            if let Some(dev) = make(port) {
                self.register(port, dev);
            }
        }
    }

    /// Unregister a contiguous range of I/O ports.
    ///
    /// Used when a device's decode window moves or is switched off: platform code unregisters the
    /// previously mapped window and re-registers at the new base without rebuilding the bus.
    pub fn unregister_range(&mut self, start: u16, len: u16) {
        for offset in 0..len {
            self.unregister(start.wrapping_add(offset));
        }
    }

    pub fn is_mapped(&self, port: u16) -> bool {
        self.devices.contains_key(&port)
    }

    pub fn read(&mut self, port: u16, size: u8) -> u32 {
        // Zero-sized accesses are not representable by the ISA; treat them as no-ops.
        if size == 0 {
            return 0;
        }

        // Only {1,2,4} are valid port I/O widths. Anything else floats the bus high without
        // reaching the device model.
        if !matches!(size, 1 | 2 | 4) {
            return 0xFFFF_FFFF;
        }

        match self.devices.get_mut(&port) {
            Some(dev) => dev.read(port, size),
            None => open_bus(size),
        }
    }

    pub fn write(&mut self, port: u16, size: u8, value: u32) {
        if !matches!(size, 1 | 2 | 4) {
            return;
        }
        if let Some(dev) = self.devices.get_mut(&port) {
            dev.write(port, size, value);
        }
    }

    pub fn read_u8(&mut self, port: u16) -> u8 {
        self.read(port, 1) as u8
    }

    pub fn write_u8(&mut self, port: u16, value: u8) {
        self.write(port, 1, u32::from(value));
    }

    pub fn reset(&mut self) {
        for dev in self.devices.values_mut() {
            dev.reset();
        }
    }
}

impl Default for IoPortBus {
    fn default() -> Self {
        Self::new()
    }
}

fn open_bus(size: u8) -> u32 {
    match size {
        1 => 0xFF,
        2 => 0xFFFF,
        _ => 0xFFFF_FFFF,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[derive(Debug)]
    struct LatchPort {
        state: Rc<RefCell<u8>>,
        base: u16,
        port: u16,
    }

    impl PortIoDevice for LatchPort {
        fn read(&mut self, port: u16, _size: u8) -> u32 {
            debug_assert_eq!(port, self.port);
            // Include the offset so stale mappings are easy to spot.
            let offset = port.wrapping_sub(self.base) as u8;
            u32::from(self.state.borrow().wrapping_add(offset))
        }

        fn write(&mut self, port: u16, _size: u8, value: u32) {
            debug_assert_eq!(port, self.port);
            *self.state.borrow_mut() = value as u8;
        }
    }

    fn map_latch(bus: &mut IoPortBus, state: &Rc<RefCell<u8>>, base: u16, len: u16) {
        bus.register_shared_range(base, len, |port| {
            Some(Box::new(LatchPort {
                state: state.clone(),
                base,
                port,
            }))
        });
    }

    #[test]
    fn unregister_range_allows_clean_remap_without_stale_handlers() {
        let mut bus = IoPortBus::new();
        let state = Rc::new(RefCell::new(0u8));

        map_latch(&mut bus, &state, 0x280, 8);
        bus.write_u8(0x282, 0x10);
        for off in 0..8u16 {
            assert_eq!(bus.read_u8(0x280 + off), 0x10 + off as u8);
        }

        bus.unregister_range(0x280, 8);
        for off in 0..8u16 {
            assert!(!bus.is_mapped(0x280 + off));
            assert_eq!(bus.read(0x280 + off, 1), 0xFF);
            assert_eq!(bus.read(0x280 + off, 2), 0xFFFF);
            assert_eq!(bus.read(0x280 + off, 4), 0xFFFF_FFFF);
            bus.write_u8(0x280 + off, 0x55);
        }
        assert_eq!(*state.borrow(), 0x10);

        map_latch(&mut bus, &state, 0x3F0, 8);
        assert_eq!(bus.read_u8(0x3F2), 0x12);
        assert_eq!(bus.read_u8(0x282), 0xFF);
    }

    #[test]
    fn shared_range_factory_can_leave_holes() {
        let mut bus = IoPortBus::new();
        let state = Rc::new(RefCell::new(0u8));

        bus.register_shared_range(0x3F0, 8, |port| {
            (port != 0x3F6).then(|| {
                Box::new(LatchPort {
                    state: state.clone(),
                    base: 0x3F0,
                    port,
                }) as Box<dyn PortIoDevice>
            })
        });

        assert!(bus.is_mapped(0x3F5));
        assert!(!bus.is_mapped(0x3F6));
        assert!(bus.is_mapped(0x3F7));
    }

    #[test]
    fn invalid_sizes_float_high_and_are_not_dispatched() {
        #[derive(Debug)]
        struct SpyPort {
            reads: Rc<Cell<u32>>,
            writes: Rc<Cell<u32>>,
        }

        impl PortIoDevice for SpyPort {
            fn read(&mut self, _port: u16, _size: u8) -> u32 {
                self.reads.set(self.reads.get() + 1);
                0x12
            }

            fn write(&mut self, _port: u16, _size: u8, _value: u32) {
                self.writes.set(self.writes.get() + 1);
            }
        }

        let reads = Rc::new(Cell::new(0));
        let writes = Rc::new(Cell::new(0));
        let mut bus = IoPortBus::new();
        bus.register(
            0x96,
            Box::new(SpyPort {
                reads: reads.clone(),
                writes: writes.clone(),
            }),
        );

        assert_eq!(bus.read(0x96, 0), 0);
        assert_eq!(bus.read(0x96, 3), 0xFFFF_FFFF);
        bus.write(0x96, 0, 0xAA);
        bus.write(0x96, 3, 0xAA);
        assert_eq!(reads.get(), 0);
        assert_eq!(writes.get(), 0);

        assert_eq!(bus.read_u8(0x96), 0x12);
        bus.write_u8(0x96, 0x08);
        assert_eq!(reads.get(), 1);
        assert_eq!(writes.get(), 1);
    }

    #[test]
    fn reset_reaches_every_registered_device() {
        #[derive(Debug)]
        struct ResetCounter(Rc<Cell<u32>>);

        impl PortIoDevice for ResetCounter {
            fn read(&mut self, _port: u16, _size: u8) -> u32 {
                0
            }

            fn write(&mut self, _port: u16, _size: u8, _value: u32) {}

            fn reset(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let resets = Rc::new(Cell::new(0));
        let mut bus = IoPortBus::new();
        bus.register(0x100, Box::new(ResetCounter(resets.clone())));
        bus.register(0x101, Box::new(ResetCounter(resets.clone())));
        bus.reset();
        assert_eq!(resets.get(), 2);
    }
}
