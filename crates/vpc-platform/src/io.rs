use thiserror::Error;
use tracing::trace;

/// A device reachable through x86 `IN`/`OUT`.
pub trait PortIoDevice {
    fn read(&mut self, port: u16, size: u8) -> u32;
    fn write(&mut self, port: u16, size: u8, value: u32);

    /// Reset the device back to its power-on state.
    fn reset(&mut self) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoBusError {
    #[error("I/O port range length must be non-zero")]
    EmptyRange,
    #[error("I/O port range wraps past 0xFFFF: start={start:#x} len={len:#x}")]
    RangeWraps { start: u16, len: u16 },
    #[error("I/O port range [{start:#x}..{end:#x}) overlaps existing [{other_start:#x}..{other_end:#x})")]
    Overlap {
        start: u32,
        end: u32,
        other_start: u32,
        other_end: u32,
    },
}

struct RangeDevice {
    start: u16,
    len: u16,
    dev: Box<dyn PortIoDevice>,
}

impl RangeDevice {
    fn end_exclusive(&self) -> u32 {
        u32::from(self.start) + u32::from(self.len)
    }

    fn contains(&self, port: u16) -> bool {
        let p = u32::from(port);
        p >= u32::from(self.start) && p < self.end_exclusive()
    }
}

/// Routes port accesses to the device registered over the containing range.
///
/// Ranges are kept sorted and non-overlapping so dispatch is a binary search and deterministic.
/// Unmapped ports float high (all ones) on reads and swallow writes.
#[derive(Default)]
pub struct IoPortBus {
    ranges: Vec<RangeDevice>,
}

impl IoPortBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one device over `start..start+len`.
    pub fn register_range(
        &mut self,
        start: u16,
        len: u16,
        dev: Box<dyn PortIoDevice>,
    ) -> Result<(), IoBusError> {
        if len == 0 {
            return Err(IoBusError::EmptyRange);
        }
        let end_exclusive = u32::from(start) + u32::from(len);
        if end_exclusive > 0x1_0000 {
            return Err(IoBusError::RangeWraps { start, len });
        }

        let idx = self.ranges.partition_point(|r| r.start < start);
        let neighbours = [idx.checked_sub(1), Some(idx)];
        for other in neighbours.into_iter().flatten() {
            let Some(other) = self.ranges.get(other) else {
                continue;
            };
            let other_start = u32::from(other.start);
            let other_end = other.end_exclusive();
            if u32::from(start) < other_end && other_start < end_exclusive {
                return Err(IoBusError::Overlap {
                    start: u32::from(start),
                    end: end_exclusive,
                    other_start,
                    other_end,
                });
            }
        }

        self.ranges.insert(idx, RangeDevice { start, len, dev });
        Ok(())
    }

    /// Register a single-port device.
    pub fn register(&mut self, port: u16, dev: Box<dyn PortIoDevice>) -> Result<(), IoBusError> {
        self.register_range(port, 1, dev)
    }

    /// Remove the device registered exactly over `(start, len)`.
    pub fn unregister_range(&mut self, start: u16, len: u16) -> Option<Box<dyn PortIoDevice>> {
        let idx = self.ranges.partition_point(|r| r.start < start);
        let cand = self.ranges.get(idx)?;
        if cand.start != start || cand.len != len {
            return None;
        }
        Some(self.ranges.remove(idx).dev)
    }

    fn find_range_index(&self, port: u16) -> Option<usize> {
        let idx = self.ranges.partition_point(|r| r.start <= port);
        let cand = idx.checked_sub(1)?;
        self.ranges
            .get(cand)
            .is_some_and(|r| r.contains(port))
            .then_some(cand)
    }

    pub fn read(&mut self, port: u16, size: u8) -> u32 {
        if size == 0 {
            return 0;
        }
        // x86 port I/O only supports access sizes {1,2,4}; anything else floats the bus high.
        if !matches!(size, 1 | 2 | 4) {
            return 0xFFFF_FFFF;
        }
        match self.find_range_index(port) {
            Some(idx) => self.ranges[idx].dev.read(port, size),
            None => {
                trace!(port, size, "read from unmapped I/O port");
                match size {
                    1 => 0xFF,
                    2 => 0xFFFF,
                    _ => 0xFFFF_FFFF,
                }
            }
        }
    }

    pub fn write(&mut self, port: u16, size: u8, value: u32) {
        if !matches!(size, 1 | 2 | 4) {
            return;
        }
        match self.find_range_index(port) {
            Some(idx) => self.ranges[idx].dev.write(port, size, value),
            None => trace!(port, size, value, "write to unmapped I/O port"),
        }
    }

    pub fn read_u8(&mut self, port: u16) -> u8 {
        self.read(port, 1) as u8
    }

    pub fn write_u8(&mut self, port: u16, value: u8) {
        self.write(port, 1, u32::from(value));
    }

    pub fn reset(&mut self) {
        for range in self.ranges.iter_mut() {
            range.dev.reset();
        }
    }
}
