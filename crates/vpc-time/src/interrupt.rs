use std::collections::BTreeSet;

/// Interrupt controller primitives consumed by device models.
pub trait InterruptSink {
    /// Request service on `irq` (edge semantics: one request per call).
    fn raise_irq(&mut self, irq: u8);

    /// Mask or unmask `irq` at the controller.
    fn set_irq_masked(&mut self, irq: u8, masked: bool);
}

/// Minimal latched interrupt controller model: remembers requested and masked lines.
///
/// Used by the machine wiring and by tests that only need to observe what a device asked for.
#[derive(Debug, Default, Clone)]
pub struct IrqLatch {
    pending: BTreeSet<u8>,
    masked: BTreeSet<u8>,
    raised_total: u64,
}

impl IrqLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self, irq: u8) -> bool {
        self.pending.contains(&irq)
    }

    pub fn is_masked(&self, irq: u8) -> bool {
        self.masked.contains(&irq)
    }

    /// Number of `raise_irq` calls observed, masked or not.
    pub fn raised_total(&self) -> u64 {
        self.raised_total
    }

    /// Acknowledge the lowest pending unmasked line, returning it.
    pub fn acknowledge(&mut self) -> Option<u8> {
        let irq = self
            .pending
            .iter()
            .copied()
            .find(|irq| !self.masked.contains(irq))?;
        self.pending.remove(&irq);
        Some(irq)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl InterruptSink for IrqLatch {
    fn raise_irq(&mut self, irq: u8) {
        self.raised_total += 1;
        self.pending.insert(irq);
    }

    fn set_irq_masked(&mut self, irq: u8, masked: bool) {
        if masked {
            self.masked.insert(irq);
        } else {
            self.masked.remove(&irq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_lines_stay_pending_until_unmasked() {
        let mut latch = IrqLatch::new();
        latch.set_irq_masked(12, true);
        latch.raise_irq(12);
        assert_eq!(latch.acknowledge(), None);
        assert!(latch.is_pending(12));

        latch.set_irq_masked(12, false);
        assert_eq!(latch.acknowledge(), Some(12));
        assert!(!latch.is_pending(12));
    }
}
