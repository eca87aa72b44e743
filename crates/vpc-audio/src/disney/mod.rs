//! Disney Sound Source and compatible parallel-port DACs.
//!
//! The device has no configuration registers, so the wiring convention a program uses has to be
//! inferred from how it drives the three printer-port registers:
//! - plain "Covox" style: bytes written to the data port at the sample rate
//! - stereo-on-1: data port plus a falling edge on control bit 0 or 1 latching a channel
//! - the FIFO variant: falling edges on control bit 3, status ACK once 16 bytes are queued
//!
//! Detection times the latch intervals, picks mono/stereo and a rate, and only then enables the
//! mixer channel. Time is read from a [`Clock`] in milliseconds.

mod channel;
mod ports;
mod snapshot;

pub use channel::{ChannelId, DacChannel, DAC_CAPACITY, SAMPLE_MIDPOINT};
pub use ports::{register_disney, DisneyPorts, SharedDisney};

use crate::sink::MixerChannel;
use tracing::{debug, error, info};
use vpc_time::{Clock, TimerId, TimerQueue};

pub const DISNEY_BASE: u16 = 0x378;
pub const DISNEY_PORT_COUNT: u16 = 3;

/// Inactivity (whole milliseconds) after which the feed callback turns the output off.
pub const IDLE_TIMEOUT_MS: u64 = 100;

const MIN_RATE_HZ: u32 = 500;
const MAX_RATE_HZ: u32 = 100_000;
const FIFO_RATE_HZ: u32 = 7000;
const INITIAL_RATE_HZ: u32 = 10_000;

const DETECT_STREAK: u32 = 5;
const FINISH_AFTER_SAMPLES: usize = 30;
const STEREO_MAX_SKEW: isize = 5;
const MIN_LATCH_INTERVAL_MS: f64 = 0.01;
const MAX_LATCH_INTERVAL_MS: f64 = 2.0;
const FIFO_ACK_LEVEL: usize = 16;

// The disable must not run inside the mixer pull that scheduled it.
const DISABLE_DELAY_NS: u64 = 100;

const STATUS_IDLE: u8 = 0x07;
const STATUS_IRQ: u8 = 0x04;
const STATUS_ACK: u8 = 0x40;
const STATUS_BUSY: u8 = 0x80;
const STATUS_POWER_ON: u8 = 0x84;

const CTRL_LATCH_CH0: u8 = 0x01;
const CTRL_LATCH_CH1: u8 = 0x02;
const CTRL_FIFO_STROBE: u8 = 0x08;
const CTRL_IRQ_ENABLE: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisneyConfig {
    /// First of the three consecutive ports (data, status, control).
    pub base_port: u16,
}

impl Default for DisneyConfig {
    fn default() -> Self {
        Self {
            base_port: DISNEY_BASE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisneyState {
    Idle,
    Running,
    Finishing,
    Analyzing,
}

impl DisneyState {
    pub(crate) const fn to_u8(self) -> u8 {
        match self {
            DisneyState::Idle => 0,
            DisneyState::Running => 1,
            DisneyState::Finishing => 2,
            DisneyState::Analyzing => 3,
        }
    }

    pub(crate) const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(DisneyState::Idle),
            1 => Some(DisneyState::Running),
            2 => Some(DisneyState::Finishing),
            3 => Some(DisneyState::Analyzing),
            _ => None,
        }
    }
}

/// Deferred work the device schedules on the machine timer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisneyTimer {
    Disable,
}

pub struct DisneySoundSource<C: Clock, M: MixerChannel> {
    clock: C,
    base: u16,
    /// `None` once the device has been shut down.
    channel: Option<M>,

    data: u8,
    status: u8,
    control: u8,

    dac: [DacChannel; 2],
    last_used_ms: u64,
    stereo: bool,
    leader: Option<ChannelId>,
    state: DisneyState,
    interface_det: u32,
    interface_det_ext: u32,
    rate_hz: u32,

    pending_disable: Option<TimerId>,
    rearm_disable: bool,
}

impl<C: Clock, M: MixerChannel> DisneySoundSource<C, M> {
    pub fn new(config: DisneyConfig, clock: C, mut channel: M) -> Self {
        channel.set_freq(INITIAL_RATE_HZ);
        let mut dev = Self {
            clock,
            base: config.base_port,
            channel: Some(channel),
            data: 0,
            status: STATUS_POWER_ON,
            control: 0,
            dac: Default::default(),
            last_used_ms: 0,
            stereo: false,
            leader: None,
            state: DisneyState::Idle,
            interface_det: 0,
            interface_det_ext: 0,
            rate_hz: 0,
            pending_disable: None,
            rearm_disable: false,
        };
        dev.disable_output();
        dev
    }

    pub fn base_port(&self) -> u16 {
        self.base
    }

    pub fn state(&self) -> DisneyState {
        self.state
    }

    pub fn is_stereo(&self) -> bool {
        self.stereo
    }

    pub fn leader(&self) -> Option<ChannelId> {
        self.leader
    }

    /// Playback rate chosen by the last successful detection.
    pub fn rate_hz(&self) -> u32 {
        self.rate_hz
    }

    pub fn dac(&self, id: ChannelId) -> &DacChannel {
        &self.dac[id.index()]
    }

    pub fn channel(&self) -> Option<&M> {
        self.channel.as_ref()
    }

    pub fn channel_mut(&mut self) -> Option<&mut M> {
        self.channel.as_mut()
    }

    pub fn is_shut_down(&self) -> bool {
        self.channel.is_none()
    }

    pub fn disable_pending(&self) -> bool {
        self.pending_disable.is_some()
    }

    /// Power-on register state. Keeps the mixer channel.
    pub fn reset(&mut self) {
        self.data = 0;
        self.status = STATUS_POWER_ON;
        self.control = 0;
        self.dac = Default::default();
        self.disable_output();
    }

    pub fn write_port(&mut self, port: u16, value: u8) {
        self.last_used_ms = self.clock.ticks_ms();
        match port.wrapping_sub(self.base) {
            0 => self.write_data(value),
            1 => debug!(value, "disney status write ignored"),
            2 => self.write_control(value),
            _ => {}
        }
    }

    pub fn read_port(&mut self, port: u16) -> u8 {
        match port.wrapping_sub(self.base) {
            0 => self.data,
            1 => self.read_status(),
            2 => {
                debug!(control = self.control, "disney control read");
                self.control
            }
            _ => 0xFF,
        }
    }

    fn read_status(&self) -> u8 {
        let mut status = STATUS_IDLE;
        if self.interface_det_ext > DETECT_STREAK {
            let queued = self.leader.map_or(0, |id| self.dac[id.index()].len());
            if queued >= FIFO_ACK_LEVEL {
                status |= STATUS_ACK;
                status &= !STATUS_IRQ;
            }
        }
        // Pin 9 (data bit 7) is looped back to pin 11 (BUSY, inverted).
        if self.data & 0x80 == 0 {
            status |= STATUS_BUSY;
        }
        status
    }

    fn write_data(&mut self, value: u8) {
        self.data = value;
        // A data-only streak without any latch edges means a plain mono DAC.
        if self.state != DisneyState::Running {
            self.interface_det = self.interface_det.saturating_add(1);
            if self.interface_det > DETECT_STREAK {
                self.analyze(ChannelId::Ch0);
            }
        }
        if self.interface_det > DETECT_STREAK {
            self.dac[0].push(self.data);
        }
    }

    fn write_control(&mut self, value: u8) {
        let falling = self.control & !value;

        if falling & CTRL_LATCH_CH1 != 0 {
            self.latch(ChannelId::Ch1);
        }
        if falling & CTRL_LATCH_CH0 != 0 {
            self.latch(ChannelId::Ch0);
        }

        if falling & CTRL_FIFO_STROBE != 0 {
            if self.state != DisneyState::Running {
                self.interface_det_ext = self.interface_det_ext.saturating_add(1);
                self.interface_det = 0;
                if self.interface_det_ext > DETECT_STREAK {
                    self.leader = Some(ChannelId::Ch0);
                    self.enable(FIFO_RATE_HZ);
                }
            }
            if self.interface_det_ext > DETECT_STREAK {
                self.dac[0].push(self.data);
            }
        }

        if value & CTRL_IRQ_ENABLE != 0 {
            error!(value, "disney: parallel port IRQ enabled but not modelled");
        }
        self.control = value;
    }

    fn latch(&mut self, id: ChannelId) {
        if self.state != DisneyState::Running {
            self.interface_det = 0;
            self.interface_det_ext = 0;
            self.analyze(id);
        }
        self.dac[id.index()].push(self.data);
    }

    fn analyze(&mut self, id: ChannelId) {
        match self.state {
            DisneyState::Running => {}
            DisneyState::Idle => {
                for ch in &mut self.dac {
                    ch.restart_detection();
                }
                let ch = &mut self.dac[id.index()];
                ch.speedcheck_last = self.clock.now_ms_f64();
                ch.speedcheck_init = true;
                self.state = DisneyState::Analyzing;
            }
            DisneyState::Finishing => self.finish_detection(),
            DisneyState::Analyzing => {
                let now = self.clock.now_ms_f64();
                let ch = &mut self.dac[id.index()];
                if !ch.speedcheck_init {
                    ch.speedcheck_init = true;
                    ch.speedcheck_last = now;
                    return;
                }

                let interval = now - ch.speedcheck_last;
                ch.speedcheck_sum += interval;
                // Anything outside this window is printer traffic or noise, not a sample clock.
                if !(MIN_LATCH_INTERVAL_MS..=MAX_LATCH_INTERVAL_MS).contains(&interval) {
                    ch.speedcheck_failed = true;
                }

                if self.dac[0].speedcheck_failed && self.dac[1].speedcheck_failed {
                    debug!("disney detection restarted: both channels failed the interval check");
                    self.state = DisneyState::Idle;
                    return;
                }

                self.dac[id.index()].speedcheck_last = now;

                if self.dac[0].len() > FINISH_AFTER_SAMPLES
                    || self.dac[1].len() > FINISH_AFTER_SAMPLES
                {
                    self.state = DisneyState::Finishing;
                }
            }
        }
    }

    fn finish_detection(&mut self) {
        let used0 = self.dac[0].len();
        let used1 = self.dac[1].len();

        self.leader = Some(if used0 > used1 {
            ChannelId::Ch0
        } else {
            ChannelId::Ch1
        });
        let skew = used0 as isize - used1 as isize;
        self.stereo = skew.abs() < STEREO_MAX_SKEW;

        // Only one channel may have streamed, so take the faster of the two.
        let rate = self.dac[0]
            .detected_rate_hz()
            .max(self.dac[1].detected_rate_hz());
        self.enable(rate);
    }

    fn enable(&mut self, rate_hz: u32) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        if !(MIN_RATE_HZ..=MAX_RATE_HZ).contains(&rate_hz) {
            debug!(rate_hz, "disney detection rejected: rate out of range");
            self.state = DisneyState::Idle;
            return;
        }
        channel.set_freq(rate_hz);
        channel.enable(true);
        self.rate_hz = rate_hz;
        self.state = DisneyState::Running;
        info!(
            rate_hz,
            mode = if self.stereo { "stereo" } else { "mono" },
            "disney playback enabled"
        );
    }

    /// Silence the output and drop every detection result. Safe to call repeatedly.
    fn disable_output(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            if channel.is_enabled() {
                channel.add_silence();
                channel.enable(false);
                info!("disney output disabled");
            }
        }
        self.leader = None;
        self.last_used_ms = 0;
        self.state = DisneyState::Idle;
        self.interface_det = 0;
        self.interface_det_ext = 0;
        self.stereo = false;
    }

    /// Turn the output off and cancel the device's own pending timers.
    pub fn disable<T>(&mut self, timers: &mut TimerQueue<T>) {
        if let Some(id) = self.pending_disable.take() {
            timers.cancel(id);
        }
        self.rearm_disable = false;
        self.disable_output();
    }

    /// Device teardown: disable and hand back the mixer channel.
    ///
    /// Afterwards enable/disable do nothing and [`Self::mix`] still returns the requested count.
    pub fn shutdown<T>(&mut self, timers: &mut TimerQueue<T>) -> Option<M> {
        self.disable(timers);
        self.channel.take()
    }

    pub fn handle_timer_event(&mut self, timer: DisneyTimer) {
        match timer {
            DisneyTimer::Disable => {
                self.pending_disable = None;
                self.disable_output();
            }
        }
    }

    /// Mixer pull: produce exactly `len` sample frames and hand them to the mixer channel.
    ///
    /// Returns what was produced (interleaved L/R when stereo). Underflow repeats the last real
    /// sample rather than inserting silence, and drains both buffers. If the guest has been quiet
    /// for longer than [`IDLE_TIMEOUT_MS`] a disable is queued on `timers`.
    ///
    /// While the output is off (never started, auto-disabled or shut down) the buffers and the
    /// channel are left alone and `len` midpoint samples come back.
    pub fn mix<T: From<DisneyTimer>>(&mut self, len: usize, timers: &mut TimerQueue<T>) -> Vec<u8> {
        if len == 0 {
            return Vec::new();
        }
        if !self.channel.as_ref().is_some_and(|c| c.is_enabled()) {
            let width = if self.stereo { 2 } else { 1 };
            return vec![SAMPLE_MIDPOINT; len * width];
        }

        let out = if self.stereo {
            self.mix_stereo(len)
        } else {
            self.mix_mono(len)
        };

        let idle = self.last_used_ms.saturating_add(IDLE_TIMEOUT_MS) < self.clock.ticks_ms();
        if idle && self.pending_disable.is_none() {
            let deadline = self.clock.now_ns().saturating_add(DISABLE_DELAY_NS);
            self.pending_disable = Some(timers.schedule(deadline, DisneyTimer::Disable.into()));
        }
        out
    }

    fn mix_stereo(&mut self, len: usize) -> Vec<u8> {
        let available = self.dac[0].len().min(self.dac[1].len());
        let (left, right) = (self.dac[0].samples(), self.dac[1].samples());

        let mut out = Vec::with_capacity(len * 2);
        if available >= len {
            for (&l, &r) in left.iter().zip(right).take(len) {
                out.push(l);
                out.push(r);
            }
            for ch in &mut self.dac {
                ch.discard_front(len);
            }
        } else {
            let (gap_l, gap_r) = match available {
                0 => (SAMPLE_MIDPOINT, SAMPLE_MIDPOINT),
                n => (left[n - 1], right[n - 1]),
            };
            for i in 0..len {
                if i < available {
                    out.push(left[i]);
                    out.push(right[i]);
                } else {
                    out.push(gap_l);
                    out.push(gap_r);
                }
            }
            for ch in &mut self.dac {
                ch.clear();
            }
        }

        if let Some(channel) = self.channel.as_mut() {
            channel.add_samples_stereo_u8(&out);
        }
        out
    }

    fn mix_mono(&mut self, len: usize) -> Vec<u8> {
        let samples = self
            .leader
            .map_or(&[][..], |id| self.dac[id.index()].samples());

        let out = if samples.len() >= len {
            let out = samples[..len].to_vec();
            for ch in &mut self.dac {
                ch.discard_front(len);
            }
            out
        } else {
            let mut real = samples.len();
            // Some programs end a stream on a 0 byte, which would click if repeated.
            if real > 0 && samples[real - 1] == 0 {
                real -= 1;
            }
            let gap = match real {
                0 => SAMPLE_MIDPOINT,
                n => samples[n - 1],
            };
            let mut out = samples[..real].to_vec();
            out.resize(len, gap);
            for ch in &mut self.dac {
                ch.clear();
            }
            out
        };

        if let Some(channel) = self.channel.as_mut() {
            channel.add_samples_mono_u8(&out);
        }
        out
    }
}
