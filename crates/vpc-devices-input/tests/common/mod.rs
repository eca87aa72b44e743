#![allow(dead_code)]

use vpc_devices_input::{
    FlatMemory, GuestMemory, Int33Mouse, IrqDispatch, MouseConfig, MouseEnv, MouseTimer,
    Registers, SimpleVideo,
};
use vpc_time::{Clock, IrqLatch, ManualClock, TimerQueue};

/// A driver wired to a minimal machine: text/graphics video, 1 MiB of RAM, a latched PIC and a
/// timer queue that only the driver schedules on.
pub struct Rig {
    pub clock: ManualClock,
    pub video: SimpleVideo,
    pub memory: FlatMemory,
    pub pic: IrqLatch,
    pub timers: TimerQueue<MouseTimer>,
    pub mouse: Int33Mouse<ManualClock>,
}

macro_rules! env {
    ($rig:expr) => {
        MouseEnv::new(
            &mut $rig.video,
            &mut $rig.memory,
            &mut $rig.pic,
            &mut $rig.timers,
        )
    };
}

impl Rig {
    pub fn new(mode: u8) -> Self {
        Self::with_config(mode, MouseConfig::default())
    }

    pub fn with_config(mode: u8, config: MouseConfig) -> Self {
        let clock = ManualClock::new();
        let mut rig = Self {
            clock: clock.clone(),
            video: SimpleVideo::new(mode),
            memory: FlatMemory::real_mode(),
            pic: IrqLatch::new(),
            timers: TimerQueue::new(),
            mouse: Int33Mouse::new(config, clock),
        };
        rig.mouse.install(&mut env!(rig));
        rig
    }

    pub fn call(&mut self, regs: &mut Registers) {
        self.mouse.int33(regs, &mut env!(self));
    }

    /// INT 33h with the usual AX/BX/CX/DX inputs, returning the registers afterwards.
    pub fn int33(&mut self, ax: u16, bx: u16, cx: u16, dx: u16) -> Registers {
        let mut regs = Registers::default();
        regs.set_ax(ax);
        regs.set_bx(bx);
        regs.set_cx(cx);
        regs.set_dx(dx);
        self.call(&mut regs);
        regs
    }

    pub fn backdoor(&mut self, regs: &mut Registers) {
        self.mouse.backdoor(regs, &mut env!(self));
    }

    pub fn press(&mut self, button: u8) {
        self.mouse.button_pressed(button, &mut env!(self));
    }

    pub fn release(&mut self, button: u8) {
        self.mouse.button_released(button, &mut env!(self));
    }

    pub fn nudge(&mut self, xrel: f32, yrel: f32) {
        self.mouse.cursor_moved(xrel, yrel, 0.0, 0.0, true, &mut env!(self));
    }

    pub fn move_abs(&mut self, xrel: f32, yrel: f32, x: f32, y: f32) {
        self.mouse.cursor_moved(xrel, yrel, x, y, false, &mut env!(self));
    }

    pub fn set_mode(&mut self, mode: u8) {
        self.mouse.before_mode_change(&mut self.video);
        self.video.set_mode(mode);
        self.mouse.after_mode_change(&mut self.video, &mut self.timers, true);
    }

    /// Advance guest time and fire whatever driver timers came due.
    pub fn advance_ms(&mut self, ms: u64) {
        self.clock.advance_ns(ms * vpc_time::NS_PER_MS);
        let now = self.clock.now_ns();
        while let Some(event) = self.timers.pop_due(now) {
            self.mouse
                .handle_timer_event(event.payload, &mut self.timers, &mut self.pic);
        }
    }

    /// One full IRQ 12 service as the BIOS stub would run it, with the guest's handler (if any)
    /// returning immediately.
    pub fn service_irq(&mut self) -> (IrqDispatch, Registers) {
        let mut regs = Registers::default();
        let dispatch = self.mouse.int74(&mut regs);
        if let IrqDispatch::UserRoutine { .. } = dispatch {
            self.mouse.uir_return();
        }
        self.mouse.irq_return(&mut self.timers);
        (dispatch, regs)
    }

    pub fn write_words(&mut self, seg: u16, off: u16, words: &[u16]) {
        for (i, &w) in words.iter().enumerate() {
            self.memory
                .write_u16(Registers::seg_off(seg, off) + 2 * i as u32, w);
        }
    }

    pub fn read_word(&self, seg: u16, off: u16) -> u16 {
        self.memory.read_u16(Registers::seg_off(seg, off))
    }
}
