//! INT 33h function dispatch and the register-marshalling backdoor entry point.

use super::cursor::{CursorType, CURSOR_SIZE};
use super::{
    Int33Mouse, MouseEnv, MouseTimer, BUTTON_COUNT, DEFAULT_DOUBLE_SPEED_THRESHOLD, MOUSE_IRQ,
};
use crate::memory::GuestMemory;
use crate::regs::Registers;
use tracing::{debug, info, warn};
use vpc_io_snapshot::io::state::{IoSnapshot, LoadOptions};
use vpc_time::Clock;

/// Version 8.05.
const DRIVER_VERSION: u16 = 0x0805;
const MOUSE_TYPE_PS2: u8 = 0x04;

fn read_mask(mem: &dyn GuestMemory, paddr: u32) -> [u16; CURSOR_SIZE] {
    let mut mask = [0u16; CURSOR_SIZE];
    for (i, word) in mask.iter_mut().enumerate() {
        *word = mem.read_u16(paddr.wrapping_add(2 * i as u32));
    }
    mask
}

impl<C: Clock> Int33Mouse<C> {
    /// Size in bytes of the INT 33h 16h/17h state blob.
    pub fn state_size(&self) -> usize {
        self.save_state().len()
    }

    /// INT 33h entry, function number in AX.
    ///
    /// Unknown functions are logged and leave the registers untouched.
    pub fn int33<T: From<MouseTimer>>(&mut self, regs: &mut Registers, env: &mut MouseEnv<'_, T>) {
        match regs.ax() {
            0x00 | 0x21 => {
                if regs.ax() == 0x00 {
                    env.pic.set_irq_masked(MOUSE_IRQ, false);
                }
                regs.set_ax(0xFFFF);
                regs.set_bx(BUTTON_COUNT as u16);
                self.reset(env);
                self.mark_used();
            }
            0x01 => {
                self.cursor.hidden = self.cursor.hidden.saturating_sub(1);
                self.cursor.update_region_y[1] = -1;
                self.draw_cursor(env.video);
                if self.cursor.hidden == 0 {
                    self.mark_used();
                }
            }
            0x02 => {
                self.cursor.restore(env.video);
                self.cursor.hidden = self.cursor.hidden.wrapping_add(1);
            }
            0x03 => {
                regs.set_bx(u16::from(self.buttons.bits()));
                regs.set_cx(self.pos_x() as u16);
                regs.set_dx(self.pos_y() as u16);
                self.mark_used();
            }
            0x04 => {
                // Re-setting the current (rounded) position must not lose the sub-granule part.
                let cx = regs.cx() as i16;
                if cx >= self.max_x {
                    self.x = f32::from(self.max_x);
                } else if self.min_x >= cx {
                    self.x = f32::from(self.min_x);
                } else if cx != self.pos_x() {
                    self.x = f32::from(cx);
                }
                let dx = regs.dx() as i16;
                if dx >= self.max_y {
                    self.y = f32::from(self.max_y);
                } else if self.min_y >= dx {
                    self.y = f32::from(self.min_y);
                } else if dx != self.pos_y() {
                    self.y = f32::from(dx);
                }
                self.draw_cursor(env.video);
            }
            0x05 => {
                let button = usize::from(regs.bx()).min(BUTTON_COUNT - 1);
                let h = &mut self.history[button];
                regs.set_ax(u16::from(self.buttons.bits()));
                regs.set_cx(h.last_pressed_x);
                regs.set_dx(h.last_pressed_y);
                regs.set_bx(h.times_pressed);
                h.times_pressed = 0;
                self.mark_used();
            }
            0x06 => {
                let button = usize::from(regs.bx()).min(BUTTON_COUNT - 1);
                let h = &mut self.history[button];
                regs.set_ax(u16::from(self.buttons.bits()));
                regs.set_cx(h.last_released_x);
                regs.set_dx(h.last_released_y);
                regs.set_bx(h.times_released);
                h.times_released = 0;
                self.mark_used();
            }
            0x07 => {
                let (min, max) = ordered(regs.cx() as i16, regs.dx() as i16);
                self.min_x = min;
                self.max_x = max;
                if self.x > f32::from(max) {
                    self.x = f32::from(max);
                }
                if self.x < f32::from(min) {
                    self.x = f32::from(min);
                }
                debug!(min, max, "mouse: horizontal range");
            }
            0x08 => {
                let (min, max) = ordered(regs.cx() as i16, regs.dx() as i16);
                self.min_y = min;
                self.max_y = max;
                if self.y > f32::from(max) {
                    self.y = f32::from(max);
                }
                if self.y < f32::from(min) {
                    self.y = f32::from(min);
                }
                debug!(min, max, "mouse: vertical range");
            }
            0x09 => {
                let src = Registers::seg_off(regs.es, regs.dx());
                let screen = read_mask(env.memory, src);
                let cursor = read_mask(env.memory, src.wrapping_add(2 * CURSOR_SIZE as u32));
                self.cursor
                    .set_user_bitmap(screen, cursor, regs.bx() as i16, regs.cx() as i16);
                self.draw_cursor(env.video);
            }
            0x0A => {
                self.cursor.cursor_type = if regs.bx() != 0 {
                    CursorType::Hardware
                } else {
                    CursorType::Software
                };
                self.cursor.text_and_mask = regs.cx();
                self.cursor.text_xor_mask = regs.dx();
                if regs.bx() != 0 {
                    env.video.set_cursor_shape(regs.cl(), regs.dl());
                    debug!("mouse: hardware text cursor selected");
                }
                self.draw_cursor(env.video);
            }
            0x0B | 0x27 => {
                if regs.ax() == 0x27 {
                    regs.set_ax(self.cursor.text_and_mask);
                    regs.set_bx(self.cursor.text_xor_mask);
                }
                regs.set_cx(self.mickey_x as i16 as u16);
                regs.set_dx(self.mickey_y as i16 as u16);
                self.mickey_x = 0.0;
                self.mickey_y = 0.0;
                self.mark_used();
            }
            0x0C => {
                self.sub_mask = regs.cx();
                self.sub_seg = regs.es;
                self.sub_ofs = regs.dx();
                if self.sub_mask != 0 {
                    self.mark_used();
                }
            }
            0x0F => self.rate.set(regs.cx() as i16, regs.dx() as i16),
            0x10 => {
                self.cursor.update_region_x = [regs.cx() as i16, regs.si() as i16];
                self.cursor.update_region_y = [regs.dx() as i16, regs.di() as i16];
                self.draw_cursor(env.video);
            }
            0x11 => {
                regs.set_ax(0xFFFF);
                regs.set_bx(BUTTON_COUNT as u16);
            }
            0x13 => {
                self.double_speed_threshold = match regs.bx() {
                    0 => DEFAULT_DOUBLE_SPEED_THRESHOLD,
                    v => v,
                };
            }
            0x14 => {
                let (old_mask, old_seg, old_ofs) = (self.sub_mask, self.sub_seg, self.sub_ofs);
                self.sub_mask = regs.cx();
                self.sub_seg = regs.es;
                self.sub_ofs = regs.dx();
                regs.set_cx(old_mask);
                regs.set_dx(old_ofs);
                regs.es = old_seg;
            }
            0x15 => regs.set_bx(self.state_size() as u16),
            0x16 => {
                info!("mouse: saving driver state");
                let blob = self.save_state();
                env.memory
                    .write_physical(Registers::seg_off(regs.es, regs.dx()), &blob);
            }
            0x17 => {
                info!("mouse: loading driver state");
                let mut blob = vec![0u8; self.state_size()];
                env.memory
                    .read_physical(Registers::seg_off(regs.es, regs.dx()), &mut blob);
                let stale = self.limit_timer;
                match self.load_state_with(&blob, LoadOptions::preserve_input()) {
                    Ok(()) => {
                        if let Some(id) = stale {
                            env.timers.cancel(id);
                        }
                        self.resume_timers(env.timers);
                    }
                    Err(err) => warn!(%err, "mouse: guest driver state rejected"),
                }
            }
            0x1A => {
                self.sensitivity.set(regs.bx(), regs.cx(), regs.dx());
                debug!(
                    x = regs.bx(),
                    y = regs.cx(),
                    double_speed = regs.dx(),
                    "mouse: set sensitivity"
                );
            }
            0x1B => {
                regs.set_bx(self.sensitivity.x_value);
                regs.set_cx(self.sensitivity.y_value);
                regs.set_dx(self.sensitivity.double_speed_value);
            }
            // The interrupt rate is host determined.
            0x1C => {}
            0x1D => self.cursor.page = regs.bl(),
            0x1E => regs.set_bx(u16::from(self.cursor.page)),
            0x1F => {
                // No previous driver to hand back.
                regs.set_bx(0);
                regs.es = 0;
                self.enabled = false;
                self.cursor.old_hidden = self.cursor.hidden;
                self.cursor.hidden = 1;
            }
            0x20 => {
                self.enabled = true;
                self.cursor.hidden = self.cursor.old_hidden;
            }
            0x22 => self.language = regs.bx(),
            0x23 => regs.set_bx(self.language),
            0x24 => {
                regs.set_bx(DRIVER_VERSION);
                regs.set_ch(MOUSE_TYPE_PS2);
                regs.set_cl(0);
            }
            0x26 => {
                regs.set_bx(if self.enabled { 0x0000 } else { 0xFFFF });
                regs.set_cx(self.max_x as u16);
                regs.set_dx(self.max_y as u16);
            }
            0x2A => {
                // Visibility as a negative byte counter.
                regs.set_al((self.cursor.hidden as u8).wrapping_neg());
                regs.set_bx(self.cursor.hot_x as u16);
                regs.set_cx(self.cursor.hot_y as u16);
                regs.set_dx(u16::from(MOUSE_TYPE_PS2));
            }
            0x31 => {
                regs.set_ax(self.min_x as u16);
                regs.set_bx(self.min_y as u16);
                regs.set_cx(self.max_x as u16);
                regs.set_dx(self.max_y as u16);
            }
            ax => warn!("mouse function {ax:#06x} not implemented"),
        }
    }

    /// Backdoor entry point used by drivers that call through a far pointer: SS:SP+0Ah/08h/06h/04h
    /// hold near pointers (in DS) to the AX/BX/CX/DX values, which are read, dispatched and
    /// written back. AX itself is preserved.
    pub fn backdoor<T: From<MouseTimer>>(
        &mut self,
        regs: &mut Registers,
        env: &mut MouseEnv<'_, T>,
    ) {
        let (ss, sp, ds) = (regs.ss, regs.sp(), regs.ds);
        let ax_ptr = read_word(env.memory, ss, sp.wrapping_add(0x0A));
        let bx_ptr = read_word(env.memory, ss, sp.wrapping_add(0x08));
        let cx_ptr = read_word(env.memory, ss, sp.wrapping_add(0x06));
        let dx_ptr = read_word(env.memory, ss, sp.wrapping_add(0x04));

        let function = read_word(env.memory, ds, ax_ptr);
        regs.set_ax(function);
        regs.set_bx(read_word(env.memory, ds, bx_ptr));
        regs.set_cx(read_word(env.memory, ds, cx_ptr));
        regs.set_dx(read_word(env.memory, ds, dx_ptr));

        match function {
            0x09 | 0x16 | 0x17 => regs.es = ds,
            0x0C | 0x14 => regs.es = if regs.bx() != 0 { regs.bx() } else { ds },
            0x10 => {
                // DX points at the four region words.
                regs.set_cx(read_word(env.memory, ds, dx_ptr));
                regs.set_dx(read_word(env.memory, ds, dx_ptr.wrapping_add(2)));
                regs.set_si(read_word(env.memory, ds, dx_ptr.wrapping_add(4)));
                regs.set_di(read_word(env.memory, ds, dx_ptr.wrapping_add(6)));
            }
            _ => {}
        }

        self.int33(regs, env);

        write_word(env.memory, ds, ax_ptr, regs.ax());
        write_word(env.memory, ds, bx_ptr, regs.bx());
        write_word(env.memory, ds, cx_ptr, regs.cx());
        write_word(env.memory, ds, dx_ptr, regs.dx());
        match function {
            0x1F => write_word(env.memory, ds, bx_ptr, regs.es),
            0x14 => write_word(env.memory, ds, cx_ptr, regs.es),
            _ => {}
        }

        regs.set_ax(function);
    }
}

fn read_word(mem: &dyn GuestMemory, seg: u16, off: u16) -> u16 {
    mem.read_u16(Registers::seg_off(seg, off))
}

fn write_word(mem: &mut dyn GuestMemory, seg: u16, off: u16, value: u16) {
    mem.write_u16(Registers::seg_off(seg, off), value);
}

fn ordered(a: i16, b: i16) -> (i16, i16) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}
