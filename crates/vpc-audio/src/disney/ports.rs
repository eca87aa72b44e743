use std::cell::RefCell;
use std::rc::Rc;

use super::{DisneySoundSource, DISNEY_PORT_COUNT};
use crate::sink::MixerChannel;
use vpc_platform::io::{IoBusError, IoPortBus, PortIoDevice};
use vpc_time::Clock;

pub type SharedDisney<C, M> = Rc<RefCell<DisneySoundSource<C, M>>>;

/// Port-mapped handle to a shared [`DisneySoundSource`].
///
/// The machine keeps its own handle to the device for the mixer pull and timer dispatch; the bus
/// gets this one.
pub struct DisneyPorts<C: Clock, M: MixerChannel> {
    inner: SharedDisney<C, M>,
}

impl<C: Clock, M: MixerChannel> DisneyPorts<C, M> {
    pub fn new(inner: SharedDisney<C, M>) -> Self {
        Self { inner }
    }
}

impl<C: Clock, M: MixerChannel> PortIoDevice for DisneyPorts<C, M> {
    fn read(&mut self, port: u16, size: u8) -> u32 {
        let byte = self.inner.borrow_mut().read_port(port);
        // The printer port is byte-wide; wider reads see the same register on every lane.
        match size {
            2 => u32::from(u16::from_le_bytes([byte, byte])),
            4 => u32::from_le_bytes([byte; 4]),
            _ => u32::from(byte),
        }
    }

    fn write(&mut self, port: u16, _size: u8, value: u32) {
        self.inner.borrow_mut().write_port(port, value as u8);
    }

    fn reset(&mut self) {
        self.inner.borrow_mut().reset();
    }
}

/// Map data/status/control at the device's base port.
pub fn register_disney<C, M>(bus: &mut IoPortBus, dev: SharedDisney<C, M>) -> Result<(), IoBusError>
where
    C: Clock + 'static,
    M: MixerChannel + 'static,
{
    let base = dev.borrow().base_port();
    bus.register_range(base, DISNEY_PORT_COUNT, Box::new(DisneyPorts::new(dev)))
}
