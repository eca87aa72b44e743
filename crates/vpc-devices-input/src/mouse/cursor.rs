//! Software cursor compositing.
//!
//! Text modes XOR a single character cell (or move the hardware cursor); graphics modes save a
//! 16x16 block, then draw through the AND (screen) and XOR (cursor) masks. Every draw restores
//! the previously saved background first, and every graphics access is bracketed by the video
//! adapter's register save/restore.

use crate::video::VideoServices;

pub const CURSOR_SIZE: usize = 16;
const HIGHEST_BIT: u16 = 1 << (CURSOR_SIZE - 1);
const CURSOR_XOR_COLOR: u8 = 0x0F;

pub const DEFAULT_TEXT_AND_MASK: u16 = 0x77FF;
pub const DEFAULT_TEXT_XOR_MASK: u16 = 0x7700;

pub const DEFAULT_SCREEN_MASK: [u16; CURSOR_SIZE] = [
    0x3FFF, 0x1FFF, 0x0FFF, 0x07FF, 0x03FF, 0x01FF, 0x00FF, 0x007F, 0x003F, 0x001F, 0x01FF,
    0x00FF, 0x30FF, 0xF87F, 0xF87F, 0xFCFF,
];

pub const DEFAULT_CURSOR_MASK: [u16; CURSOR_SIZE] = [
    0x0000, 0x4000, 0x6000, 0x7000, 0x7800, 0x7C00, 0x7E00, 0x7F00, 0x7F80, 0x7C00, 0x6C00,
    0x4600, 0x0600, 0x0300, 0x0300, 0x0000,
];

/// Which bitmap a mask slot currently refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskTable {
    Default,
    User,
}

/// Text cursor flavour selected by INT 33h 0Ah (and 09h for graphics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorType {
    Software,
    Hardware,
    Graphics,
}

impl CursorType {
    pub(crate) const fn to_u16(self) -> u16 {
        match self {
            CursorType::Software => 0,
            CursorType::Hardware => 1,
            CursorType::Graphics => 2,
        }
    }

    pub(crate) const fn from_u16(v: u16) -> Self {
        match v {
            0 => CursorType::Software,
            1 => CursorType::Hardware,
            _ => CursorType::Graphics,
        }
    }
}

/// Cursor appearance, visibility and the saved background.
#[derive(Debug, Clone)]
pub struct Cursor {
    /// Nesting depth of hide requests; drawn only at zero.
    pub(super) hidden: u16,
    pub(super) old_hidden: u16,
    pub(super) inhibit_draw: bool,

    pub(super) background: bool,
    pub(super) back_x: i16,
    pub(super) back_y: i16,
    pub(super) back_data: [u8; CURSOR_SIZE * CURSOR_SIZE],

    /// `None` draws with the default bitmap.
    pub(super) screen_mask: Option<MaskTable>,
    pub(super) cursor_mask: Option<MaskTable>,
    pub(super) user_screen_mask: [u16; CURSOR_SIZE],
    pub(super) user_cursor_mask: [u16; CURSOR_SIZE],

    pub(super) clip_x: i16,
    pub(super) clip_y: i16,
    pub(super) hot_x: i16,
    pub(super) hot_y: i16,
    pub(super) text_and_mask: u16,
    pub(super) text_xor_mask: u16,
    pub(super) update_region_x: [i16; 2],
    pub(super) update_region_y: [i16; 2],
    pub(super) cursor_type: CursorType,
    pub(super) page: u8,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            hidden: 1,
            old_hidden: 0,
            inhibit_draw: false,
            background: false,
            back_x: 0,
            back_y: 0,
            back_data: [0; CURSOR_SIZE * CURSOR_SIZE],
            screen_mask: Some(MaskTable::Default),
            cursor_mask: Some(MaskTable::Default),
            user_screen_mask: [0; CURSOR_SIZE],
            user_cursor_mask: [0; CURSOR_SIZE],
            clip_x: 0,
            clip_y: 0,
            hot_x: 0,
            hot_y: 0,
            text_and_mask: DEFAULT_TEXT_AND_MASK,
            text_xor_mask: DEFAULT_TEXT_XOR_MASK,
            update_region_x: [0; 2],
            update_region_y: [0, -1],
            cursor_type: CursorType::Software,
            page: 0,
        }
    }
}

/// Clipped extent of the 16x16 block plus how many rows/columns fell off the top/left.
struct Clipped {
    x1: i16,
    x2: i16,
    y1: i16,
    y2: i16,
    skip_left: u16,
    skip_top: u16,
}

impl Cursor {
    pub fn is_visible(&self) -> bool {
        self.hidden == 0 && !self.inhibit_draw
    }

    pub fn hidden(&self) -> u16 {
        self.hidden
    }

    pub fn hot_spot(&self) -> (i16, i16) {
        (self.hot_x, self.hot_y)
    }

    pub fn text_masks(&self) -> (u16, u16) {
        (self.text_and_mask, self.text_xor_mask)
    }

    pub fn has_background(&self) -> bool {
        self.background
    }

    fn screen_bitmap(&self) -> &[u16; CURSOR_SIZE] {
        match self.screen_mask {
            Some(MaskTable::User) => &self.user_screen_mask,
            _ => &DEFAULT_SCREEN_MASK,
        }
    }

    fn cursor_bitmap(&self) -> &[u16; CURSOR_SIZE] {
        match self.cursor_mask {
            Some(MaskTable::User) => &self.user_cursor_mask,
            _ => &DEFAULT_CURSOR_MASK,
        }
    }

    /// Back to the default arrow and text masks, hot spot at the tip.
    pub(super) fn reset_shape(&mut self) {
        self.hot_x = 0;
        self.hot_y = 0;
        self.screen_mask = Some(MaskTable::Default);
        self.cursor_mask = Some(MaskTable::Default);
        self.text_and_mask = DEFAULT_TEXT_AND_MASK;
        self.text_xor_mask = DEFAULT_TEXT_XOR_MASK;
        self.page = 0;
        self.update_region_y[1] = -1;
        self.cursor_type = CursorType::Software;
    }

    pub(super) fn set_user_bitmap(
        &mut self,
        screen: [u16; CURSOR_SIZE],
        cursor: [u16; CURSOR_SIZE],
        hot_x: i16,
        hot_y: i16,
    ) {
        self.user_screen_mask = screen;
        self.user_cursor_mask = cursor;
        self.screen_mask = Some(MaskTable::User);
        self.cursor_mask = Some(MaskTable::User);
        self.hot_x = hot_x;
        self.hot_y = hot_y;
        self.cursor_type = CursorType::Graphics;
    }

    /// Put back whatever the last draw covered, using the renderer for the current mode.
    pub fn restore(&mut self, video: &mut dyn VideoServices) {
        if video.current_mode().is_text() {
            self.restore_text(video);
        } else {
            self.restore_graphics(video);
        }
    }

    pub fn draw(&mut self, video: &mut dyn VideoServices, pos_x: i16, pos_y: i16, mode: u8) {
        if !self.is_visible() {
            return;
        }
        if video.current_mode().is_text() {
            self.draw_text(video, pos_x, pos_y, mode);
        } else {
            self.draw_graphics(video, pos_x, pos_y);
        }
    }

    fn restore_text(&mut self, video: &mut dyn VideoServices) {
        if !self.is_visible() || !self.background {
            return;
        }
        let page = video.active_page();
        video.write_char_attr(
            self.back_x as u16,
            self.back_y as u16,
            page,
            self.back_data[0],
            self.back_data[1],
        );
        self.background = false;
    }

    fn draw_text(&mut self, video: &mut dyn VideoServices, pos_x: i16, pos_y: i16, mode: u8) {
        self.restore_text(video);

        // The application is redrawing this area itself.
        if (self.update_region_y[0]..=self.update_region_y[1]).contains(&pos_y)
            && (self.update_region_x[0]..=self.update_region_x[1]).contains(&pos_x)
        {
            return;
        }

        self.back_x = pos_x >> 3;
        self.back_y = pos_y >> 3;
        if mode < 2 {
            self.back_x >>= 1;
        }

        let page = video.active_page();
        if self.cursor_type == CursorType::Software {
            let cell = video.read_char_attr(self.back_x as u16, self.back_y as u16, page);
            let [ch, attr] = cell.to_le_bytes();
            self.back_data[0] = ch;
            self.back_data[1] = attr;
            self.background = true;

            let [ch, attr] = ((cell & self.text_and_mask) ^ self.text_xor_mask).to_le_bytes();
            video.write_char_attr(self.back_x as u16, self.back_y as u16, page, ch, attr);
        } else {
            let cell = (self.back_y as u16)
                .wrapping_mul(video.columns())
                .wrapping_add(self.back_x as u16);
            let address = u16::from(page)
                .wrapping_mul(video.page_size())
                .wrapping_add(cell.wrapping_mul(2))
                / 2;
            video.set_cursor_address(address);
        }
    }

    fn clip(&self, x1: i16, y1: i16) -> Clipped {
        let mut c = Clipped {
            x1,
            x2: x1.wrapping_add(CURSOR_SIZE as i16 - 1),
            y1,
            y2: y1.wrapping_add(CURSOR_SIZE as i16 - 1),
            skip_left: 0,
            skip_top: 0,
        };
        if c.y1 < 0 {
            c.skip_top = c.y1.unsigned_abs();
            c.y1 = 0;
        }
        if c.y2 > self.clip_y {
            c.y2 = self.clip_y;
        }
        if c.x1 < 0 {
            c.skip_left = c.x1.unsigned_abs();
            c.x1 = 0;
        }
        if c.x2 > self.clip_x {
            c.x2 = self.clip_x;
        }
        c
    }

    fn restore_graphics(&mut self, video: &mut dyn VideoServices) {
        if !self.is_visible() {
            return;
        }
        video.save_graphics_registers();
        if self.background {
            let c = self.clip(self.back_x, self.back_y);
            for y in c.y1..=c.y2 {
                let row = usize::from(c.skip_top) + (y - c.y1) as usize;
                for x in c.x1..=c.x2 {
                    let col = usize::from(c.skip_left) + (x - c.x1) as usize;
                    if let Some(&pixel) = self.back_data.get(row * CURSOR_SIZE + col) {
                        video.put_pixel(x as u16, y as u16, self.page, pixel);
                    }
                }
            }
            self.background = false;
        }
        video.restore_graphics_registers();
    }

    fn draw_graphics(&mut self, video: &mut dyn VideoServices, pos_x: i16, pos_y: i16) {
        let mode = video.current_mode();
        self.clip_x = (mode.width as i16).wrapping_sub(1);
        self.clip_y = (mode.height as i16).wrapping_sub(1);

        // Virtual X is in 640-wide units regardless of the mode's real width.
        let x_ratio = match 640 / mode.width.max(1) {
            0 => 1,
            r => r as i16,
        };

        self.restore_graphics(video);
        video.save_graphics_registers();

        let x1 = (pos_x / x_ratio).wrapping_sub(self.hot_x);
        let y1 = pos_y.wrapping_sub(self.hot_y);
        let c = self.clip(x1, y1);

        for y in c.y1..=c.y2 {
            let row = usize::from(c.skip_top) + (y - c.y1) as usize;
            for x in c.x1..=c.x2 {
                let col = usize::from(c.skip_left) + (x - c.x1) as usize;
                if let Some(slot) = self.back_data.get_mut(row * CURSOR_SIZE + col) {
                    *slot = video.get_pixel(x as u16, y as u16, self.page);
                }
            }
        }
        self.background = true;
        self.back_x = x1;
        self.back_y = y1;

        let screen = *self.screen_bitmap();
        let cursor = *self.cursor_bitmap();
        for y in c.y1..=c.y2 {
            let row = usize::from(c.skip_top) + (y - c.y1) as usize;
            let shift = u32::from(c.skip_left);
            let mut sc = screen.get(row).copied().unwrap_or(0).checked_shl(shift).unwrap_or(0);
            let mut cu = cursor.get(row).copied().unwrap_or(0).checked_shl(shift).unwrap_or(0);
            for x in c.x1..=c.x2 {
                let col = usize::from(c.skip_left) + (x - c.x1) as usize;
                let mut pixel = 0;
                if sc & HIGHEST_BIT != 0 {
                    pixel = self.back_data.get(row * CURSOR_SIZE + col).copied().unwrap_or(0);
                }
                if cu & HIGHEST_BIT != 0 {
                    pixel ^= CURSOR_XOR_COLOR;
                }
                sc <<= 1;
                cu <<= 1;
                video.put_pixel(x as u16, y as u16, self.page, pixel);
            }
        }
        video.restore_graphics_registers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::SimpleVideo;

    fn shown() -> Cursor {
        Cursor {
            hidden: 0,
            ..Cursor::default()
        }
    }

    #[test]
    fn graphics_draw_then_restore_leaves_the_screen_untouched() {
        let mut video = SimpleVideo::new(0x12);
        for i in 0..4096u16 {
            video.put_pixel(i % 640, i / 640, 0, (i % 251) as u8);
        }
        let before = video.framebuffer().to_vec();

        let mut cursor = shown();
        cursor.draw(&mut video, 100, 2, 0x12);
        assert_ne!(video.framebuffer(), &before[..]);
        cursor.draw(&mut video, 630, 470, 0x12);
        cursor.restore(&mut video);

        assert_eq!(video.framebuffer(), &before[..]);
        assert_eq!(video.register_depth(), 0);
        assert!(!cursor.has_background());
    }

    #[test]
    fn masks_and_then_xor_the_background() {
        let mut video = SimpleVideo::new(0x13);
        video.fill(0x05);
        let mut cursor = shown();
        let mut screen = [0u16; CURSOR_SIZE];
        let mut mask = [0u16; CURSOR_SIZE];
        screen[0] = 0x8000; // keep background at (0,0)
        mask[0] = 0xC000; // XOR (0,0) and (1,0)
        cursor.set_user_bitmap(screen, mask, 0, 0);

        // Mode 13h halves the virtual X coordinate.
        cursor.draw(&mut video, 20, 10, 0x13);
        assert_eq!(video.pixel(10, 10), Some(0x05 ^ 0x0F));
        assert_eq!(video.pixel(11, 10), Some(0x0F));
        assert_eq!(video.pixel(12, 10), Some(0x00));
        assert_eq!(video.pixel(10, 11), Some(0x00));
    }

    #[test]
    fn cursor_clipped_at_top_left_uses_the_right_mask_rows() {
        let mut video = SimpleVideo::new(0x12);
        let mut cursor = shown();
        let screen = [0xFFFFu16; CURSOR_SIZE];
        let mut mask = [0u16; CURSOR_SIZE];
        mask[3] = 0x1000; // row 3, column 3
        cursor.set_user_bitmap(screen, mask, 3, 3);

        cursor.draw(&mut video, 0, 0, 0x12);
        assert_eq!(video.pixel(0, 0), Some(0x0F));
        assert_eq!(video.framebuffer().iter().filter(|&&p| p != 0).count(), 1);
    }

    #[test]
    fn text_cursor_xors_cell_and_respects_update_region() {
        let mut video = SimpleVideo::new(0x03);
        video.write_char_attr(5, 2, 0, b'A', 0x07);
        let mut cursor = shown();

        cursor.draw(&mut video, 40, 16, 0x03);
        let expected = (0x0741 & DEFAULT_TEXT_AND_MASK) ^ DEFAULT_TEXT_XOR_MASK;
        assert_eq!(video.cell(5, 2, 0), Some(expected));

        cursor.update_region_x = [0, 639];
        cursor.update_region_y = [0, 199];
        cursor.draw(&mut video, 40, 16, 0x03);
        assert_eq!(video.cell(5, 2, 0), Some(0x0741));
        assert!(!cursor.has_background());
    }

    #[test]
    fn hardware_text_cursor_programs_crtc_address() {
        let mut video = SimpleVideo::new(0x03);
        let mut cursor = Cursor {
            cursor_type: CursorType::Hardware,
            ..shown()
        };
        cursor.draw(&mut video, 80, 24, 0x03);
        assert_eq!(video.cursor_address(), 3 * 80 + 10);
    }

    #[test]
    fn hidden_cursor_draws_nothing() {
        let mut video = SimpleVideo::new(0x12);
        let mut cursor = Cursor::default();
        cursor.draw(&mut video, 10, 10, 0x12);
        assert_eq!(video.register_saves(), 0);
        assert!(video.framebuffer().iter().all(|&p| p == 0));
    }
}
