/// Byte-addressable guest physical memory below 1 MiB.
pub trait GuestMemory {
    fn read_u8(&self, paddr: u32) -> u8;
    fn write_u8(&mut self, paddr: u32, value: u8);

    fn read_u16(&self, paddr: u32) -> u16 {
        u16::from_le_bytes([self.read_u8(paddr), self.read_u8(paddr.wrapping_add(1))])
    }

    fn write_u16(&mut self, paddr: u32, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write_u8(paddr, lo);
        self.write_u8(paddr.wrapping_add(1), hi);
    }

    fn read_physical(&self, paddr: u32, buf: &mut [u8]) {
        for (i, out) in buf.iter_mut().enumerate() {
            *out = self.read_u8(paddr.wrapping_add(i as u32));
        }
    }

    fn write_physical(&mut self, paddr: u32, buf: &[u8]) {
        for (i, &b) in buf.iter().enumerate() {
            self.write_u8(paddr.wrapping_add(i as u32), b);
        }
    }
}

/// Flat RAM that wraps addresses at its size, like the 8086's 20-bit bus.
#[derive(Debug, Clone)]
pub struct FlatMemory {
    data: Vec<u8>,
}

impl FlatMemory {
    pub const REAL_MODE_SIZE: usize = 1 << 20;

    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "guest memory must not be empty");
        Self {
            data: vec![0; size],
        }
    }

    pub fn real_mode() -> Self {
        Self::new(Self::REAL_MODE_SIZE)
    }

    fn index(&self, paddr: u32) -> usize {
        paddr as usize % self.data.len()
    }
}

impl GuestMemory for FlatMemory {
    fn read_u8(&self, paddr: u32) -> u8 {
        self.data[self.index(paddr)]
    }

    fn write_u8(&mut self, paddr: u32, value: u8) {
        let idx = self.index(paddr);
        self.data[idx] = value;
    }
}
