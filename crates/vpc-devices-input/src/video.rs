//! BIOS video services consumed by the cursor compositor.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayKind {
    Text,
    Graphics,
}

/// The active display mode as the video BIOS describes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMode {
    /// BIOS mode number (BDA 0x449).
    pub number: u8,
    pub kind: DisplayKind,
    /// Visible width in pixels.
    pub width: u16,
    /// Visible height in pixels.
    pub height: u16,
}

impl VideoMode {
    /// Standard geometry for the IBM-compatible BIOS modes.
    pub fn for_bios_mode(number: u8) -> Self {
        let (kind, width, height) = match number {
            0x00 | 0x01 => (DisplayKind::Text, 320, 400),
            0x02 | 0x03 | 0x07 => (DisplayKind::Text, 640, 400),
            0x04 | 0x05 | 0x09 | 0x0D | 0x13 => (DisplayKind::Graphics, 320, 200),
            0x08 => (DisplayKind::Graphics, 160, 200),
            0x06 | 0x0A | 0x0E => (DisplayKind::Graphics, 640, 200),
            0x0F | 0x10 => (DisplayKind::Graphics, 640, 350),
            _ => (DisplayKind::Graphics, 640, 480),
        };
        Self {
            number,
            kind,
            width,
            height,
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == DisplayKind::Text
    }
}

/// Pixel, character-cell and BIOS data area access.
///
/// Coordinates are in the units of the active mode: character cells for text, pixels for
/// graphics. Implementations clip out-of-range accesses themselves.
pub trait VideoServices {
    fn current_mode(&self) -> VideoMode;

    /// Text columns (BDA 0x44A).
    fn columns(&self) -> u16;

    /// Text rows minus one (BDA 0x484). Only meaningful on EGA/VGA.
    fn rows_minus_one(&self) -> u8;

    /// Active display page (BDA 0x462).
    fn active_page(&self) -> u8;

    /// Bytes per text page (BDA 0x44C).
    fn page_size(&self) -> u16;

    /// Whether the adapter is EGA or VGA class (has the extended BDA fields).
    fn is_ega_vga(&self) -> bool;

    /// Character in the low byte, attribute in the high byte.
    fn read_char_attr(&mut self, col: u16, row: u16, page: u8) -> u16;
    fn write_char_attr(&mut self, col: u16, row: u16, page: u8, ch: u8, attr: u8);

    fn get_pixel(&mut self, x: u16, y: u16, page: u8) -> u8;
    fn put_pixel(&mut self, x: u16, y: u16, page: u8, color: u8);

    /// Hardware text cursor scan lines.
    fn set_cursor_shape(&mut self, first: u8, last: u8);

    /// Program the CRTC cursor location register (in character cells from the start of video RAM).
    fn set_cursor_address(&mut self, address: u16);

    /// Put the graphics controller into a state where plain pixel reads/writes work.
    ///
    /// Always paired with [`Self::restore_graphics_registers`].
    fn save_graphics_registers(&mut self) {}

    fn restore_graphics_registers(&mut self) {}
}

const MAX_PAGES: usize = 8;

/// In-memory adapter: a character grid per page plus a single-page framebuffer.
#[derive(Debug, Clone)]
pub struct SimpleVideo {
    mode: VideoMode,
    columns: u16,
    rows: u16,
    page: u8,
    ega_vga: bool,
    cells: Vec<u16>,
    pixels: Vec<u8>,
    cursor_shape: (u8, u8),
    cursor_address: u16,
    register_saves: u32,
    register_depth: i32,
}

impl SimpleVideo {
    pub fn new(mode_number: u8) -> Self {
        let mut video = Self {
            mode: VideoMode::for_bios_mode(mode_number),
            columns: 80,
            rows: 25,
            page: 0,
            ega_vga: true,
            cells: Vec::new(),
            pixels: Vec::new(),
            cursor_shape: (6, 7),
            cursor_address: 0,
            register_saves: 0,
            register_depth: 0,
        };
        video.set_mode(mode_number);
        video
    }

    /// Switch modes and clear the screen.
    pub fn set_mode(&mut self, number: u8) {
        self.mode = VideoMode::for_bios_mode(number);
        self.columns = if number < 2 { 40 } else { 80 };
        self.page = 0;
        self.cells = vec![0x0720; usize::from(self.columns) * usize::from(self.rows) * MAX_PAGES];
        self.pixels = vec![0; usize::from(self.mode.width) * usize::from(self.mode.height)];
    }

    pub fn set_rows(&mut self, rows: u16) {
        self.rows = rows.max(1);
        self.set_mode(self.mode.number);
    }

    pub fn set_active_page(&mut self, page: u8) {
        self.page = page;
    }

    pub fn set_ega_vga(&mut self, ega_vga: bool) {
        self.ega_vga = ega_vga;
    }

    pub fn cell(&self, col: u16, row: u16, page: u8) -> Option<u16> {
        self.cell_index(col, row, page).map(|i| self.cells[i])
    }

    pub fn pixel(&self, x: u16, y: u16) -> Option<u8> {
        self.pixel_index(x, y).map(|i| self.pixels[i])
    }

    pub fn framebuffer(&self) -> &[u8] {
        &self.pixels
    }

    pub fn fill(&mut self, color: u8) {
        self.pixels.fill(color);
    }

    pub fn cursor_shape(&self) -> (u8, u8) {
        self.cursor_shape
    }

    pub fn cursor_address(&self) -> u16 {
        self.cursor_address
    }

    /// Number of save/restore pairs opened so far.
    pub fn register_saves(&self) -> u32 {
        self.register_saves
    }

    /// Saves minus restores; zero when every save was matched.
    pub fn register_depth(&self) -> i32 {
        self.register_depth
    }

    fn cell_index(&self, col: u16, row: u16, page: u8) -> Option<usize> {
        if col >= self.columns || row >= self.rows || usize::from(page) >= MAX_PAGES {
            return None;
        }
        let per_page = usize::from(self.columns) * usize::from(self.rows);
        let cell = usize::from(row) * usize::from(self.columns) + usize::from(col);
        Some(usize::from(page) * per_page + cell)
    }

    fn pixel_index(&self, x: u16, y: u16) -> Option<usize> {
        if x >= self.mode.width || y >= self.mode.height {
            return None;
        }
        Some(usize::from(y) * usize::from(self.mode.width) + usize::from(x))
    }
}

impl VideoServices for SimpleVideo {
    fn current_mode(&self) -> VideoMode {
        self.mode
    }

    fn columns(&self) -> u16 {
        self.columns
    }

    fn rows_minus_one(&self) -> u8 {
        (self.rows - 1) as u8
    }

    fn active_page(&self) -> u8 {
        self.page
    }

    fn page_size(&self) -> u16 {
        // Rounded up to a 256-byte boundary the way the BIOS reports it.
        let bytes = u32::from(self.columns) * u32::from(self.rows) * 2;
        ((bytes + 0xFF) & !0xFF) as u16
    }

    fn is_ega_vga(&self) -> bool {
        self.ega_vga
    }

    fn read_char_attr(&mut self, col: u16, row: u16, page: u8) -> u16 {
        self.cell(col, row, page).unwrap_or(0)
    }

    fn write_char_attr(&mut self, col: u16, row: u16, page: u8, ch: u8, attr: u8) {
        if let Some(i) = self.cell_index(col, row, page) {
            self.cells[i] = u16::from_le_bytes([ch, attr]);
        }
    }

    fn get_pixel(&mut self, x: u16, y: u16, _page: u8) -> u8 {
        self.pixel(x, y).unwrap_or(0)
    }

    fn put_pixel(&mut self, x: u16, y: u16, _page: u8, color: u8) {
        if let Some(i) = self.pixel_index(x, y) {
            self.pixels[i] = color;
        }
    }

    fn set_cursor_shape(&mut self, first: u8, last: u8) {
        self.cursor_shape = (first, last);
    }

    fn set_cursor_address(&mut self, address: u16) {
        self.cursor_address = address;
    }

    fn save_graphics_registers(&mut self) {
        self.register_saves += 1;
        self.register_depth += 1;
    }

    fn restore_graphics_registers(&mut self) {
        self.register_depth -= 1;
    }
}
