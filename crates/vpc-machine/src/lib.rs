//! Reference wiring for the DOS peripherals: one port bus, one virtual clock, one timer queue and
//! a latched interrupt controller shared by the Disney Sound Source and the INT 33h mouse driver.
//!
//! The machine does not execute guest code. A CPU front end forwards `IN`/`OUT` through
//! [`Machine::io_read`]/[`Machine::io_write`], traps INT 33h and IRQ 12 into the mouse methods,
//! and calls [`Machine::advance_to`] as guest time passes. The host side feeds pointer input and
//! pulls audio with [`Machine::mix_audio`].

#![forbid(unsafe_code)]

mod snapshot;

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;
use tracing::debug;
use vpc_audio::disney::{SharedDisney, DISNEY_PORT_COUNT};
use vpc_audio::{
    register_disney, CaptureChannel, DisneyConfig, DisneySoundSource, DisneyTimer, MixerChannel,
};
use vpc_devices_input::{
    FlatMemory, Int33Mouse, IrqDispatch, MouseConfig, MouseEnv, MouseTimer, Registers, SimpleVideo,
};
use vpc_io_snapshot::io::state::SnapshotError;
use vpc_platform::io::{IoBusError, IoPortBus};
use vpc_time::{Clock, IrqLatch, ManualClock, TimerQueue};

pub use snapshot::MACHINE_SNAPSHOT_ID;

/// BIOS video mode the machine starts in.
pub const DEFAULT_VIDEO_MODE: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// `None` leaves the device out entirely.
    pub disney: Option<DisneyConfig>,
    pub mouse: Option<MouseConfig>,
    pub video_mode: u8,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            disney: Some(DisneyConfig::default()),
            mouse: Some(MouseConfig::default()),
            video_mode: DEFAULT_VIDEO_MODE,
        }
    }
}

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("I/O port wiring failed: {0}")]
    Io(#[from] IoBusError),
    #[error("snapshot rejected: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Timer payloads for every device sharing the machine queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineTimer {
    Mouse(MouseTimer),
    Disney(DisneyTimer),
}

impl From<MouseTimer> for MachineTimer {
    fn from(t: MouseTimer) -> Self {
        MachineTimer::Mouse(t)
    }
}

impl From<DisneyTimer> for MachineTimer {
    fn from(t: DisneyTimer) -> Self {
        MachineTimer::Disney(t)
    }
}

macro_rules! mouse_env {
    ($m:expr) => {
        MouseEnv::new(&mut $m.video, &mut $m.memory, &mut $m.pic, &mut $m.timers)
    };
}

pub struct Machine<M: MixerChannel = CaptureChannel> {
    clock: ManualClock,
    bus: IoPortBus,
    timers: TimerQueue<MachineTimer>,
    pic: IrqLatch,
    video: SimpleVideo,
    memory: FlatMemory,
    disney: Option<SharedDisney<ManualClock, M>>,
    mouse: Option<Int33Mouse<ManualClock>>,
}

impl Machine<CaptureChannel> {
    /// A machine whose Disney output is recorded in memory.
    pub fn new(config: MachineConfig) -> Result<Self, MachineError> {
        Self::with_channel(config, CaptureChannel::new())
    }
}

impl<M: MixerChannel + 'static> Machine<M> {
    pub fn with_channel(config: MachineConfig, channel: M) -> Result<Self, MachineError> {
        let clock = ManualClock::new();
        let mut machine = Self {
            clock: clock.clone(),
            bus: IoPortBus::new(),
            timers: TimerQueue::new(),
            pic: IrqLatch::new(),
            video: SimpleVideo::new(config.video_mode),
            memory: FlatMemory::real_mode(),
            disney: None,
            mouse: None,
        };

        if let Some(disney) = config.disney {
            let dev = Rc::new(RefCell::new(DisneySoundSource::new(
                disney,
                clock.clone(),
                channel,
            )));
            register_disney(&mut machine.bus, dev.clone())?;
            machine.disney = Some(dev);
        }

        if let Some(mouse) = config.mouse {
            let mut dev = Int33Mouse::new(mouse, clock);
            dev.install(&mut mouse_env!(machine));
            machine.mouse = Some(dev);
        }

        debug!(
            disney = machine.disney.is_some(),
            mouse = machine.mouse.is_some(),
            "machine wired"
        );
        Ok(machine)
    }

    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn io_read(&mut self, port: u16, size: u8) -> u32 {
        self.bus.read(port, size)
    }

    pub fn io_write(&mut self, port: u16, size: u8, value: u32) {
        self.bus.write(port, size, value);
    }

    /// Move guest time forward to `ns`, firing due timers in deadline order.
    ///
    /// Each timer sees the clock at its own deadline. Timers a handler schedules go back into the
    /// queue and fire on a later pop if they are also due.
    pub fn advance_to(&mut self, ns: u64) {
        while let Some(event) = self.timers.pop_due(ns) {
            self.clock.advance_to_ns(event.deadline_ns);
            self.dispatch_timer(event.payload);
        }
        self.clock.advance_to_ns(ns);
    }

    pub fn advance_ns(&mut self, delta: u64) {
        let target = self.clock.now_ns().saturating_add(delta);
        self.advance_to(target);
    }

    fn dispatch_timer(&mut self, timer: MachineTimer) {
        match timer {
            MachineTimer::Mouse(t) => {
                if let Some(mouse) = self.mouse.as_mut() {
                    mouse.handle_timer_event(t, &mut self.timers, &mut self.pic);
                }
            }
            MachineTimer::Disney(t) => {
                if let Some(disney) = &self.disney {
                    disney.borrow_mut().handle_timer_event(t);
                }
            }
        }
    }

    /// Host mixer pull: exactly `len` frames from the Disney device, or nothing when it is not
    /// installed.
    pub fn mix_audio(&mut self, len: usize) -> Vec<u8> {
        match &self.disney {
            Some(disney) => disney.borrow_mut().mix(len, &mut self.timers),
            None => Vec::new(),
        }
    }

    pub fn disney(&self) -> Option<&SharedDisney<ManualClock, M>> {
        self.disney.as_ref()
    }

    pub fn mouse(&self) -> Option<&Int33Mouse<ManualClock>> {
        self.mouse.as_ref()
    }

    pub fn video(&self) -> &SimpleVideo {
        &self.video
    }

    pub fn memory(&self) -> &FlatMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut FlatMemory {
        &mut self.memory
    }

    pub fn pic(&self) -> &IrqLatch {
        &self.pic
    }

    pub fn pic_mut(&mut self) -> &mut IrqLatch {
        &mut self.pic
    }

    pub fn timers(&self) -> &TimerQueue<MachineTimer> {
        &self.timers
    }

    /// Video BIOS mode set, with the mouse driver's hooks around it.
    pub fn set_video_mode(&mut self, mode: u8) {
        if let Some(mouse) = self.mouse.as_mut() {
            mouse.before_mode_change(&mut self.video);
        }
        self.video.set_mode(mode);
        if let Some(mouse) = self.mouse.as_mut() {
            mouse.after_mode_change(&mut self.video, &mut self.timers, true);
        }
    }

    /// Trapped `INT 33h`. Without a driver the registers are left alone, as with an empty vector.
    pub fn int33(&mut self, regs: &mut Registers) {
        if let Some(mouse) = self.mouse.as_mut() {
            mouse.int33(regs, &mut mouse_env!(self));
        }
    }

    pub fn mouse_backdoor(&mut self, regs: &mut Registers) {
        if let Some(mouse) = self.mouse.as_mut() {
            mouse.backdoor(regs, &mut mouse_env!(self));
        }
    }

    /// 32-bit read of the VMware backdoor port; registers carry the command and results.
    pub fn vmware_port_read(&mut self, regs: &mut Registers) -> u32 {
        self.mouse
            .as_mut()
            .map_or(0, |mouse| mouse.vmware_port_read(regs))
    }

    pub fn mouse_int74(&mut self, regs: &mut Registers) -> IrqDispatch {
        self.mouse
            .as_mut()
            .map_or(IrqDispatch::Passthrough, |mouse| mouse.int74(regs))
    }

    pub fn mouse_uir_return(&mut self) {
        if let Some(mouse) = self.mouse.as_mut() {
            mouse.uir_return();
        }
    }

    pub fn mouse_irq_return(&mut self) {
        if let Some(mouse) = self.mouse.as_mut() {
            mouse.irq_return(&mut self.timers);
        }
    }

    /// Host pointer motion; see [`Int33Mouse::cursor_moved`].
    pub fn mouse_moved(&mut self, xrel: f32, yrel: f32, x: f32, y: f32, emulate: bool) {
        if let Some(mouse) = self.mouse.as_mut() {
            mouse.cursor_moved(xrel, yrel, x, y, emulate, &mut mouse_env!(self));
        }
    }

    pub fn mouse_button(&mut self, button: u8, pressed: bool) {
        if let Some(mouse) = self.mouse.as_mut() {
            let mut env = mouse_env!(self);
            if pressed {
                mouse.button_pressed(button, &mut env);
            } else {
                mouse.button_released(button, &mut env);
            }
        }
    }

    pub fn set_ps2_state(&mut self, use_ps2: bool) -> bool {
        match self.mouse.as_mut() {
            Some(mouse) => mouse.set_ps2_state(use_ps2, &mut self.pic),
            None => false,
        }
    }

    pub fn change_ps2_callback(&mut self, segment: u16, offset: u16) {
        if let Some(mouse) = self.mouse.as_mut() {
            mouse.change_ps2_callback(segment, offset);
        }
    }

    /// Device teardown: the Disney ports leave the bus and the device releases its mixer
    /// channel.
    pub fn shutdown(&mut self) -> Option<M> {
        let disney = self.disney.as_ref()?;
        let base = disney.borrow().base_port();
        self.bus.unregister_range(base, DISNEY_PORT_COUNT);
        disney.borrow_mut().shutdown(&mut self.timers)
    }
}
