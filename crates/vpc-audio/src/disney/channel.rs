/// Capacity of each DAC channel buffer in samples.
pub const DAC_CAPACITY: usize = 128;

/// Neutral (mid-scale) unsigned 8-bit sample.
pub const SAMPLE_MIDPOINT: u8 = 0x80;

/// Which of the two DAC channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelId {
    Ch0,
    Ch1,
}

impl ChannelId {
    pub const fn index(self) -> usize {
        match self {
            ChannelId::Ch0 => 0,
            ChannelId::Ch1 => 1,
        }
    }

    pub const fn from_index(idx: u8) -> Option<Self> {
        match idx {
            0 => Some(ChannelId::Ch0),
            1 => Some(ChannelId::Ch1),
            _ => None,
        }
    }
}

/// Bounded sample FIFO of one DAC plus the latch-interval statistics used for rate detection.
#[derive(Debug, Clone, PartialEq)]
pub struct DacChannel {
    buffer: [u8; DAC_CAPACITY],
    used: usize,
    pub(crate) speedcheck_sum: f64,
    pub(crate) speedcheck_last: f64,
    pub(crate) speedcheck_failed: bool,
    pub(crate) speedcheck_init: bool,
}

impl Default for DacChannel {
    fn default() -> Self {
        Self {
            buffer: [0; DAC_CAPACITY],
            used: 0,
            speedcheck_sum: 0.0,
            speedcheck_last: 0.0,
            speedcheck_failed: false,
            speedcheck_init: false,
        }
    }
}

impl DacChannel {
    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn samples(&self) -> &[u8] {
        &self.buffer[..self.used]
    }

    /// Appends a sample; a full buffer drops it.
    pub fn push(&mut self, sample: u8) -> bool {
        if self.used >= DAC_CAPACITY {
            return false;
        }
        self.buffer[self.used] = sample;
        self.used += 1;
        true
    }

    /// Drops the oldest `n` samples and moves the rest to the front.
    pub fn discard_front(&mut self, n: usize) {
        let n = n.min(self.used);
        self.buffer.copy_within(n..self.used, 0);
        self.used -= n;
    }

    pub fn clear(&mut self) {
        self.used = 0;
    }

    /// Forget buffered samples and interval statistics before a new detection round.
    pub(crate) fn restart_detection(&mut self) {
        self.used = 0;
        self.speedcheck_sum = 0.0;
        self.speedcheck_failed = false;
        self.speedcheck_init = false;
    }

    /// Rate implied by the mean latch interval (milliseconds), or 0 with fewer than two samples.
    pub(crate) fn detected_rate_hz(&self) -> u32 {
        if self.used <= 1 {
            return 0;
        }
        let mean_s = (self.speedcheck_sum / 1000.0) / (self.used as f64 - 1.0);
        // Float-to-int `as` saturates, so a zero interval sum lands far outside any accepted rate.
        (1.0 / mean_s) as u32
    }

    pub(crate) fn raw_buffer(&self) -> &[u8; DAC_CAPACITY] {
        &self.buffer
    }

    pub(crate) fn restore_raw(&mut self, buffer: [u8; DAC_CAPACITY], used: usize) {
        self.buffer = buffer;
        self.used = used.min(DAC_CAPACITY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_drops_past_capacity() {
        let mut ch = DacChannel::default();
        for i in 0..DAC_CAPACITY + 10 {
            ch.push(i as u8);
        }
        assert_eq!(ch.len(), DAC_CAPACITY);
        assert_eq!(ch.samples()[DAC_CAPACITY - 1], (DAC_CAPACITY - 1) as u8);
        assert!(!ch.push(0xAA));
    }

    #[test]
    fn discard_front_keeps_tail_in_order() {
        let mut ch = DacChannel::default();
        for b in [1, 2, 3, 4, 5] {
            ch.push(b);
        }
        ch.discard_front(2);
        assert_eq!(ch.samples(), &[3, 4, 5]);
        ch.discard_front(10);
        assert!(ch.is_empty());
    }

    #[test]
    fn rate_needs_two_samples() {
        let mut ch = DacChannel::default();
        ch.push(0);
        ch.speedcheck_sum = 0.5;
        assert_eq!(ch.detected_rate_hz(), 0);

        ch.push(0);
        ch.speedcheck_sum = 0.976_562_5;
        // One interval of exactly 1/1024 s.
        assert_eq!(ch.detected_rate_hz(), 1024);
    }
}
