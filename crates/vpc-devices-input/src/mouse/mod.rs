//! DOS mouse driver (INT 33h) running on the host side of the machine.
//!
//! The driver keeps a sub-pixel virtual position fed by host motion, draws a software cursor
//! through [`VideoServices`], and delivers queued events on IRQ 12 in one of three ways: the
//! guest's INT 33h 0Ch event handler, the PS/2 BIOS (INT 15h C2) callback, or a plain
//! acknowledge. Guest-facing calls are [`Int33Mouse::int33`], the backdoor entry point and the
//! VMware absolute-pointer port; host-facing calls are the `cursor_*`/`button_*` methods.
//!
//! Deferred work (the 5ms event rate limiter) is scheduled on the machine [`TimerQueue`] and
//! routed back through [`Int33Mouse::handle_timer_event`].

mod cursor;
mod events;
mod int33;
mod motion;
mod snapshot;
mod vmware;

pub use cursor::{
    Cursor, CursorType, MaskTable, CURSOR_SIZE, DEFAULT_CURSOR_MASK, DEFAULT_SCREEN_MASK,
    DEFAULT_TEXT_AND_MASK, DEFAULT_TEXT_XOR_MASK,
};
pub use events::{
    Buttons, DispatchState, EventQueue, IrqDispatch, MouseEvents, Ps2Packet, QueuedEvent,
    QUEUE_CAPACITY,
};
pub use motion::{sensitivity_coefficient, MickeyRate, Sensitivity};
pub use vmware::{VMWARE_MAGIC, VMWARE_PORT};

use crate::memory::GuestMemory;
use crate::regs::Registers;
use crate::video::VideoServices;
use events::PushOutcome;
use motion::wrap_signed_16;
use tracing::{debug, warn};
use vmware::VmwareState;
use vpc_time::{Clock, InterruptSink, TimerId, TimerQueue, NS_PER_MS};

pub const MOUSE_IRQ: u8 = 12;
pub const BUTTON_COUNT: usize = 3;

/// Minimum spacing between IRQ 12 assertions while events are pending.
pub const EVENT_INTERVAL_NS: u64 = 5 * NS_PER_MS;

const NO_VIDEO_MODE: u8 = 0xFF;
const INITIAL_HANDLER_SEGMENT: u16 = 0x6362;
const DEFAULT_DOUBLE_SPEED_THRESHOLD: u16 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseConfig {
    /// Horizontal sensitivity, 0-100.
    pub sensitivity_x: u16,
    /// Vertical sensitivity, 0-100.
    pub sensitivity_y: u16,
    pub double_speed: u16,
    /// Answer the VMware absolute-pointer backdoor on port 0x5658.
    pub vmware_backdoor: bool,
}

impl Default for MouseConfig {
    fn default() -> Self {
        Self {
            sensitivity_x: 50,
            sensitivity_y: 50,
            double_speed: 50,
            vmware_backdoor: true,
        }
    }
}

/// Deferred work the driver schedules on the machine timer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseTimer {
    LimitEvents,
}

/// Machine services a driver call may touch.
pub struct MouseEnv<'a, T> {
    pub video: &'a mut dyn VideoServices,
    pub memory: &'a mut dyn GuestMemory,
    pub pic: &'a mut dyn InterruptSink,
    pub timers: &'a mut TimerQueue<T>,
}

impl<'a, T> MouseEnv<'a, T> {
    pub fn new(
        video: &'a mut dyn VideoServices,
        memory: &'a mut dyn GuestMemory,
        pic: &'a mut dyn InterruptSink,
        timers: &'a mut TimerQueue<T>,
    ) -> Self {
        Self {
            video,
            memory,
            pic,
            timers,
        }
    }
}

/// Press/release counters and where the last transition happened, per button.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonHistory {
    pub times_pressed: u16,
    pub times_released: u16,
    pub last_pressed_x: u16,
    pub last_pressed_y: u16,
    pub last_released_x: u16,
    pub last_released_y: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Ps2State {
    enabled: bool,
    callback_installed: bool,
    callback_segment: u16,
    callback_offset: u16,
    old_x: i16,
    old_y: i16,
}

pub struct Int33Mouse<C: Clock> {
    clock: C,
    config: MouseConfig,

    buttons: Buttons,
    history: [ButtonHistory; BUTTON_COUNT],

    x: f32,
    y: f32,
    min_x: i16,
    max_x: i16,
    min_y: i16,
    max_y: i16,
    gran_x: i16,
    gran_y: i16,
    mickey_x: f32,
    mickey_y: f32,
    rate: MickeyRate,
    sensitivity: Sensitivity,
    double_speed_threshold: u16,

    /// BIOS mode number the driver was last configured for.
    mode: u8,
    cursor: Cursor,
    language: u16,
    enabled: bool,

    events: EventQueue,
    sub_mask: u16,
    sub_seg: u16,
    sub_ofs: u16,
    dispatch: DispatchState,
    timer_in_progress: bool,
    limit_timer: Option<TimerId>,

    ps2: Ps2State,
    vmware: VmwareState,

    autolock: bool,
    used_reported: bool,
}

impl<C: Clock> Int33Mouse<C> {
    /// A driver that is not yet bound to a display; call [`Self::install`] before use.
    pub fn new(config: MouseConfig, clock: C) -> Self {
        Self {
            clock,
            config,
            buttons: Buttons::empty(),
            history: [ButtonHistory::default(); BUTTON_COUNT],
            x: 0.0,
            y: 0.0,
            min_x: 0,
            max_x: 0,
            min_y: 0,
            max_y: 0,
            gran_x: -1,
            gran_y: -1,
            mickey_x: 0.0,
            mickey_y: 0.0,
            rate: MickeyRate::default(),
            sensitivity: Sensitivity::new(
                config.sensitivity_x,
                config.sensitivity_y,
                config.double_speed,
            ),
            double_speed_threshold: DEFAULT_DOUBLE_SPEED_THRESHOLD,
            mode: NO_VIDEO_MODE,
            cursor: Cursor::default(),
            language: 0,
            enabled: false,
            events: EventQueue::default(),
            sub_mask: 0,
            sub_seg: INITIAL_HANDLER_SEGMENT,
            sub_ofs: 0,
            dispatch: DispatchState::Idle,
            timer_in_progress: false,
            limit_timer: None,
            ps2: Ps2State::default(),
            vmware: VmwareState::default(),
            autolock: false,
            used_reported: false,
        }
    }

    /// Power-on: unmask IRQ 12 and reset against the current video mode.
    pub fn install<T: From<MouseTimer>>(&mut self, env: &mut MouseEnv<'_, T>) {
        env.pic.set_irq_masked(MOUSE_IRQ, false);
        self.reset(env);
    }

    pub fn config(&self) -> &MouseConfig {
        &self.config
    }

    /// Sub-pixel virtual position.
    pub fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    /// X as reported to the guest: truncated to 16 bits and rounded to the mode's granularity.
    pub fn pos_x(&self) -> i16 {
        (self.x as i16) & self.gran_x
    }

    pub fn pos_y(&self) -> i16 {
        (self.y as i16) & self.gran_y
    }

    /// `(min_x, max_x, min_y, max_y)`.
    pub fn range(&self) -> (i16, i16, i16, i16) {
        (self.min_x, self.max_x, self.min_y, self.max_y)
    }

    pub fn mickeys(&self) -> (f32, f32) {
        (self.mickey_x, self.mickey_y)
    }

    pub fn buttons(&self) -> Buttons {
        self.buttons
    }

    pub fn button_history(&self, button: usize) -> Option<&ButtonHistory> {
        self.history.get(button)
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn dispatch_state(&self) -> DispatchState {
        self.dispatch
    }

    pub fn sensitivity(&self) -> &Sensitivity {
        &self.sensitivity
    }

    pub fn mickey_rate(&self) -> &MickeyRate {
        &self.rate
    }

    /// `(event mask, segment, offset)` of the INT 33h event handler.
    pub fn event_handler(&self) -> (u16, u16, u16) {
        (self.sub_mask, self.sub_seg, self.sub_ofs)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn video_mode(&self) -> u8 {
        self.mode
    }

    pub fn ps2_enabled(&self) -> bool {
        self.ps2.enabled
    }

    pub fn timer_in_progress(&self) -> bool {
        self.timer_in_progress
    }

    /// Whether the host should capture its pointer for this guest.
    pub fn autolock(&self) -> bool {
        self.autolock
    }

    /// Host relative motion. `x`/`y` are the absolute position normalized to `0..=1`; with
    /// `emulate` set only the relative part is used.
    pub fn cursor_moved<T: From<MouseTimer>>(
        &mut self,
        xrel: f32,
        yrel: f32,
        x: f32,
        y: f32,
        emulate: bool,
        env: &mut MouseEnv<'_, T>,
    ) {
        let mut dx = xrel * self.rate.pixels_per_mickey_x;
        let mut dy = yrel * self.rate.pixels_per_mickey_y;
        if xrel.abs() > 1.0 || self.sensitivity.x < 1.0 {
            dx *= self.sensitivity.x;
        }
        if yrel.abs() > 1.0 || self.sensitivity.y < 1.0 {
            dy *= self.sensitivity.y;
        }
        if self.ps2.enabled {
            dy *= 2.0;
        }

        self.mickey_x = wrap_signed_16(self.mickey_x + dx * self.rate.mickeys_per_pixel_x);
        self.mickey_y = wrap_signed_16(self.mickey_y + dy * self.rate.mickeys_per_pixel_y);

        if emulate {
            self.x += dx;
            self.y += dy;
        } else if env.video.current_mode().is_text() {
            let rows = if env.video.is_ega_vga() {
                u16::from(env.video.rows_minus_one()) + 1
            } else {
                25
            };
            self.x = x * f32::from(env.video.columns()) * 8.0;
            self.y = y * f32::from(rows) * 8.0;
        } else if (self.max_x < 2048 || self.max_y < 2048 || self.max_x != self.max_y)
            && self.max_x > 0
            && self.max_y > 0
        {
            self.x = x * f32::from(self.max_x);
            self.y = y * f32::from(self.max_y);
        } else {
            // Programs that fake relative motion through a huge square range.
            self.x += dx;
            self.y += dy;
        }
        self.vmware.x = x;
        self.vmware.y = y;

        if self.ps2.enabled {
            self.x = wrap_signed_16(self.x);
            self.y = wrap_signed_16(self.y);
        } else {
            self.clamp_position();
        }

        self.add_event(MouseEvents::MOVED, env.timers, env.pic);
        self.draw_cursor(env.video);
    }

    /// Host button down. `button` is 0 (left), 1 (right) or 2 (middle); others are ignored.
    pub fn button_pressed<T: From<MouseTimer>>(&mut self, button: u8, env: &mut MouseEnv<'_, T>) {
        let Some(bit) = Buttons::from_index(button) else {
            return;
        };
        if self.buttons.contains(bit) {
            return;
        }
        self.buttons.insert(bit);
        self.add_event(bit.press_event(), env.timers, env.pic);

        let (px, py) = (self.pos_x() as u16, self.pos_y() as u16);
        let h = &mut self.history[usize::from(button)];
        h.times_pressed = h.times_pressed.wrapping_add(1);
        h.last_pressed_x = px;
        h.last_pressed_y = py;
    }

    pub fn button_released<T: From<MouseTimer>>(&mut self, button: u8, env: &mut MouseEnv<'_, T>) {
        let Some(bit) = Buttons::from_index(button) else {
            return;
        };
        if !self.buttons.contains(bit) {
            return;
        }
        self.buttons.remove(bit);
        self.add_event(bit.release_event(), env.timers, env.pic);

        let (px, py) = (self.pos_x() as u16, self.pos_y() as u16);
        let h = &mut self.history[usize::from(button)];
        h.times_released = h.times_released.wrapping_add(1);
        h.last_released_x = px;
        h.last_released_y = py;
    }

    fn clamp_position(&mut self) {
        if self.x > f32::from(self.max_x) {
            self.x = f32::from(self.max_x);
        }
        if self.x < f32::from(self.min_x) {
            self.x = f32::from(self.min_x);
        }
        if self.y > f32::from(self.max_y) {
            self.y = f32::from(self.max_y);
        }
        if self.y < f32::from(self.min_y) {
            self.y = f32::from(self.min_y);
        }
    }

    fn draw_cursor(&mut self, video: &mut dyn VideoServices) {
        let (x, y) = (self.pos_x(), self.pos_y());
        self.cursor.draw(video, x, y, self.mode);
    }

    fn add_event<T: From<MouseTimer>>(
        &mut self,
        kind: MouseEvents,
        timers: &mut TimerQueue<T>,
        pic: &mut dyn InterruptSink,
    ) {
        if self.events.push(kind, self.buttons) == PushOutcome::Coalesced {
            return;
        }
        if !self.timer_in_progress {
            self.timer_in_progress = true;
            self.schedule_limit(timers);
            pic.raise_irq(MOUSE_IRQ);
        }
        self.vmware.updated = true;
    }

    fn schedule_limit<T: From<MouseTimer>>(&mut self, timers: &mut TimerQueue<T>) {
        if let Some(id) = self.limit_timer.take() {
            timers.cancel(id);
        }
        let deadline = self.clock.now_ns() + EVENT_INTERVAL_NS;
        self.limit_timer = Some(timers.schedule(deadline, MouseTimer::LimitEvents.into()));
    }

    fn cancel_limit<T>(&mut self, timers: &mut TimerQueue<T>) {
        if let Some(id) = self.limit_timer.take() {
            timers.cancel(id);
        }
        self.timer_in_progress = false;
    }

    pub fn handle_timer_event<T: From<MouseTimer>>(
        &mut self,
        timer: MouseTimer,
        timers: &mut TimerQueue<T>,
        pic: &mut dyn InterruptSink,
    ) {
        match timer {
            MouseTimer::LimitEvents => {
                self.limit_timer = None;
                self.timer_in_progress = false;
                if !self.events.is_empty() {
                    self.timer_in_progress = true;
                    self.schedule_limit(timers);
                    pic.raise_irq(MOUSE_IRQ);
                }
            }
        }
    }

    /// IRQ 12 service entry. Pops the oldest pending event and picks a delivery path.
    ///
    /// For [`IrqDispatch::UserRoutine`] the handler's registers are loaded into `regs`: AX event
    /// bits, BX buttons, CX/DX position, SI/DI mickey counts.
    pub fn int74(&mut self, regs: &mut Registers) -> IrqDispatch {
        // The guest's handler is still running; nothing is popped until it returns.
        if self.dispatch == DispatchState::HandlerDispatched {
            return IrqDispatch::Passthrough;
        }

        if let Some(event) = self.events.pop_oldest() {
            if self.sub_mask & u16::from(event.kind.bits()) != 0 {
                regs.set_ax(u16::from(event.kind.bits()));
                regs.set_bx(u16::from(event.buttons.bits()));
                regs.set_cx(self.pos_x() as u16);
                regs.set_dx(self.pos_y() as u16);
                regs.set_si(self.mickey_x as i16 as u16);
                regs.set_di(self.mickey_y as i16 as u16);
                self.dispatch = DispatchState::HandlerDispatched;
                return IrqDispatch::UserRoutine {
                    segment: self.sub_seg,
                    offset: self.sub_ofs,
                };
            }
            if self.ps2.enabled {
                let (x, y) = (self.x as i16, self.y as i16);
                let (old_x, old_y) = (self.ps2.old_x, self.ps2.old_y);
                let packet = Ps2Packet::from_motion(event.buttons, x, y, old_x, old_y);
                self.ps2.old_x = x;
                self.ps2.old_y = y;
                self.dispatch = DispatchState::AwaitingReturn;
                return IrqDispatch::Ps2Callback {
                    segment: self.ps2.callback_segment,
                    offset: self.ps2.callback_offset,
                    packet,
                };
            }
        }
        self.dispatch = DispatchState::AwaitingReturn;
        IrqDispatch::Passthrough
    }

    /// The guest's event handler returned.
    pub fn uir_return(&mut self) {
        if self.dispatch == DispatchState::HandlerDispatched {
            self.dispatch = DispatchState::AwaitingReturn;
        }
    }

    /// IRQ 12 service epilogue: keep the rate limiter running while events remain.
    pub fn irq_return<T: From<MouseTimer>>(&mut self, timers: &mut TimerQueue<T>) {
        if self.dispatch == DispatchState::AwaitingReturn {
            self.dispatch = DispatchState::Idle;
        }
        if !self.events.is_empty() && !self.timer_in_progress {
            self.timer_in_progress = true;
            self.schedule_limit(timers);
        }
    }

    /// INT 15h C207 enable/disable. Enabling fails (and masks IRQ 12) without a callback.
    pub fn set_ps2_state(&mut self, use_ps2: bool, pic: &mut dyn InterruptSink) -> bool {
        if use_ps2 && !self.ps2.callback_installed {
            self.ps2.enabled = false;
            pic.set_irq_masked(MOUSE_IRQ, true);
            return false;
        }
        self.ps2.enabled = use_ps2;
        self.autolock = use_ps2;
        pic.set_irq_masked(MOUSE_IRQ, !use_ps2);
        true
    }

    /// INT 15h C207 install handler; `0:0` uninstalls.
    pub fn change_ps2_callback(&mut self, segment: u16, offset: u16) {
        if segment == 0 && offset == 0 {
            self.ps2.callback_installed = false;
        } else {
            self.ps2.callback_installed = true;
            self.ps2.callback_segment = segment;
            self.ps2.callback_offset = offset;
        }
        self.autolock = self.ps2.callback_installed;
    }

    /// Called before the video BIOS switches modes: take the cursor off the old screen.
    pub fn before_mode_change(&mut self, video: &mut dyn VideoServices) {
        self.cursor.restore(video);
        self.cursor.hidden = 1;
        self.cursor.old_hidden = 1;
        self.cursor.background = false;
    }

    /// Called after a mode switch: derive granularity and range from the new BIOS mode.
    pub fn after_mode_change<T>(
        &mut self,
        video: &mut dyn VideoServices,
        timers: &mut TimerQueue<T>,
        set_mode: bool,
    ) {
        self.cursor.inhibit_draw = false;
        let mode = video.current_mode().number;
        if set_mode && mode == self.mode {
            debug!(mode, "mouse: new video mode is the same as the old");
        }
        self.gran_x = -1;
        self.gran_y = -1;
        match mode {
            0x00..=0x03 | 0x07 => {
                self.gran_x = if mode < 2 { 0xFFF0u16 as i16 } else { 0xFFF8u16 as i16 };
                self.gran_y = 0xFFF8u16 as i16;
                let mut rows = if video.is_ega_vga() {
                    u16::from(video.rows_minus_one())
                } else {
                    24
                };
                if rows == 0 || rows > 250 {
                    rows = 24;
                }
                self.max_y = (8 * (rows + 1) - 1) as i16;
            }
            0x04 | 0x05 | 0x06 | 0x08 | 0x09 | 0x0A | 0x0D | 0x0E | 0x13 => {
                if mode == 0x0D || mode == 0x13 {
                    self.gran_x = 0xFFFEu16 as i16;
                }
                self.max_y = 199;
            }
            0x0F | 0x10 => self.max_y = 349,
            0x11 | 0x12 => self.max_y = 479,
            _ => {
                warn!(mode, "mouse: unhandled video mode, cursor drawing inhibited");
                self.cursor.inhibit_draw = true;
                return;
            }
        }
        self.mode = mode;
        self.max_x = 639;
        self.min_x = 0;
        self.min_y = 0;

        self.events.clear();
        self.cancel_limit(timers);

        self.cursor.reset_shape();
        self.language = 0;
        self.double_speed_threshold = DEFAULT_DOUBLE_SPEED_THRESHOLD;
        self.enabled = true;

        self.ps2.old_x = self.x as i16;
        self.ps2.old_y = self.y as i16;
    }

    /// Driver reset (INT 33h 00h/21h): re-derive everything from the current mode, release all
    /// buttons, center the pointer and drop the event handler.
    pub fn reset<T: From<MouseTimer>>(&mut self, env: &mut MouseEnv<'_, T>) {
        self.before_mode_change(env.video);
        self.after_mode_change(env.video, env.timers, false);
        self.rate.set(8, 16);

        self.mickey_x = 0.0;
        self.mickey_y = 0.0;
        self.buttons = Buttons::empty();
        self.history = [ButtonHistory::default(); BUTTON_COUNT];

        self.x = ((i32::from(self.max_x) + 1) / 2) as f32;
        self.y = ((i32::from(self.max_y) + 1) / 2) as f32;
        self.ps2.old_x = self.x as i16;
        self.ps2.old_y = self.y as i16;
        self.sub_mask = 0;
        self.dispatch = DispatchState::Idle;
    }

    fn mark_used(&mut self) {
        if !self.used_reported {
            self.autolock = true;
            self.used_reported = true;
        }
    }
}
