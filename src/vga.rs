//! VGA text-mode screen.

use core::fmt;

use volatile::Volatile;

#[cfg(target_os = "none")]
use crate::terminal::Screen;
use crate::terminal::{Cursor, Snapshot, SCREEN_CELLS, SCREEN_COLS, SCREEN_ROWS};

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    Pink = 13,
    Yellow = 14,
    White = 15,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct ColorCode(u8);

impl ColorCode {
    pub const fn new(foreground: Color, background: Color) -> ColorCode {
        ColorCode((background as u8) << 4 | (foreground as u8))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ScreenChar {
    ascii: u8,
    color: ColorCode,
}

impl ScreenChar {
    fn to_cell(self) -> u16 {
        (self.color.0 as u16) << 8 | self.ascii as u16
    }

    fn from_cell(cell: u16) -> Self {
        ScreenChar { ascii: cell as u8, color: ColorCode((cell >> 8) as u8) }
    }
}

#[repr(transparent)]
pub struct Buffer {
    chars: [[Volatile<ScreenChar>; SCREEN_COLS]; SCREEN_ROWS],
}

/// Cursor-tracking writer over a text buffer.
pub struct Writer {
    col: usize,
    row: usize,
    color: ColorCode,
    buffer: &'static mut Buffer,
}

impl Writer {
    pub fn new(buffer: &'static mut Buffer) -> Self {
        Writer { col: 0, row: 0, color: ColorCode::new(Color::LightGray, Color::Black), buffer }
    }

    fn blank(&self) -> ScreenChar {
        ScreenChar { ascii: b' ', color: self.color }
    }

    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.new_line(),
            b'\r' => self.col = 0,
            byte => {
                if self.col >= SCREEN_COLS {
                    self.new_line();
                }
                let (row, col, color) = (self.row, self.col, self.color);
                self.buffer.chars[row][col].write(ScreenChar { ascii: byte, color });
                self.col += 1;
            }
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.write_byte(byte);
        }
        self.sync_cursor();
    }

    fn new_line(&mut self) {
        self.col = 0;
        if self.row + 1 < SCREEN_ROWS {
            self.row += 1;
            return;
        }
        for row in 1..SCREEN_ROWS {
            for col in 0..SCREEN_COLS {
                let character = self.buffer.chars[row][col].read();
                self.buffer.chars[row - 1][col].write(character);
            }
        }
        self.clear_row(SCREEN_ROWS - 1);
    }

    fn clear_row(&mut self, row: usize) {
        let blank = self.blank();
        for col in 0..SCREEN_COLS {
            self.buffer.chars[row][col].write(blank);
        }
    }

    /// Erase the character before the cursor, wrapping to the previous row.
    pub fn backspace(&mut self) {
        if self.col == 0 {
            if self.row == 0 {
                return;
            }
            self.row -= 1;
            self.col = SCREEN_COLS;
        }
        self.col -= 1;
        let blank = self.blank();
        self.buffer.chars[self.row][self.col].write(blank);
        self.sync_cursor();
    }

    pub fn clear_screen(&mut self) {
        for row in 0..SCREEN_ROWS {
            self.clear_row(row);
        }
        self.col = 0;
        self.row = 0;
        self.sync_cursor();
    }

    pub fn cursor(&self) -> Cursor {
        Cursor { col: self.col, row: self.row }
    }

    pub fn save(&self, into: &mut Snapshot) {
        for (index, cell) in into.cells.iter_mut().enumerate() {
            *cell = self.buffer.chars[index / SCREEN_COLS][index % SCREEN_COLS].read().to_cell();
        }
        into.cursor = self.cursor();
    }

    pub fn restore(&mut self, from: &Snapshot) {
        for index in 0..SCREEN_CELLS {
            let character = ScreenChar::from_cell(from.cells[index]);
            self.buffer.chars[index / SCREEN_COLS][index % SCREEN_COLS].write(character);
        }
        self.col = from.cursor.col.min(SCREEN_COLS);
        self.row = from.cursor.row.min(SCREEN_ROWS - 1);
        self.sync_cursor();
    }

    /// Move the blinking hardware cursor to the writer's position.
    fn sync_cursor(&self) {
        #[cfg(target_os = "none")]
        {
            use x86_64::instructions::port::Port;
            let position = (self.row * SCREEN_COLS + self.col.min(SCREEN_COLS - 1)) as u16;
            let mut index: Port<u8> = Port::new(0x3D4);
            let mut data: Port<u8> = Port::new(0x3D5);
            unsafe {
                index.write(0x0F);
                data.write(position as u8);
                index.write(0x0E);
                data.write((position >> 8) as u8);
            }
        }
    }
}

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            match byte {
                0x20..=0x7e | b'\n' | b'\r' => self.write_byte(byte),
                _ => self.write_byte(0xfe),
            }
        }
        self.sync_cursor();
        Ok(())
    }
}

#[cfg(target_os = "none")]
lazy_static::lazy_static! {
    pub static ref WRITER: spin::Mutex<Writer> =
        spin::Mutex::new(Writer::new(unsafe { &mut *(crate::memory::layout::VGA_BUFFER as *mut Buffer) }));
}

/// The text screen as the terminal switch sees it.
#[cfg(target_os = "none")]
pub struct VgaScreen;

#[cfg(target_os = "none")]
pub static SCREEN: VgaScreen = VgaScreen;

#[cfg(target_os = "none")]
impl Screen for VgaScreen {
    fn save(&self, into: &mut Snapshot) {
        WRITER.lock().save(into);
    }

    fn restore(&self, from: &Snapshot) {
        WRITER.lock().restore(from);
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::vga::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    #[cfg(target_os = "none")]
    {
        use core::fmt::Write;
        x86_64::instructions::interrupts::without_interrupts(|| {
            let _ = WRITER.lock().write_fmt(args);
        });
    }
    #[cfg(not(target_os = "none"))]
    let _ = args;
}

pub fn init() {
    #[cfg(target_os = "none")]
    WRITER.lock().clear_screen();
}

#[cfg(test)]
pub(crate) fn test_buffer() -> &'static mut Buffer {
    let blank = ScreenChar { ascii: b' ', color: ColorCode::new(Color::LightGray, Color::Black) };
    Box::leak(Box::new(Buffer {
        chars: core::array::from_fn(|_| core::array::from_fn(|_| Volatile::new(blank))),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::BLANK_CELL;

    fn writer() -> Writer {
        Writer::new(test_buffer())
    }

    fn row_text(writer: &Writer, row: usize) -> Vec<u8> {
        (0..SCREEN_COLS).map(|col| writer.buffer.chars[row][col].read().ascii).collect()
    }

    #[test]
    fn writes_advance_the_cursor() {
        let mut w = writer();
        w.write_bytes(b"ab\ncd");
        assert_eq!(w.cursor(), Cursor { col: 2, row: 1 });
        assert_eq!(&row_text(&w, 0)[..2], b"ab");
        assert_eq!(&row_text(&w, 1)[..2], b"cd");
    }

    #[test]
    fn long_lines_wrap() {
        let mut w = writer();
        w.write_bytes(&[b'x'; SCREEN_COLS + 3]);
        assert_eq!(w.cursor(), Cursor { col: 3, row: 1 });
    }

    #[test]
    fn scrolls_at_the_bottom() {
        let mut w = writer();
        for row in 0..SCREEN_ROWS {
            w.write_bytes(&[b'a' + row as u8]);
            w.write_bytes(b"\n");
        }
        assert_eq!(row_text(&w, 0)[0], b'b');
        assert_eq!(row_text(&w, SCREEN_ROWS - 1)[0], b' ');
        assert_eq!(w.cursor(), Cursor { col: 0, row: SCREEN_ROWS - 1 });
    }

    #[test]
    fn backspace_erases_and_wraps() {
        let mut w = writer();
        w.write_bytes(b"ab\n");
        w.backspace();
        assert_eq!(w.cursor(), Cursor { col: SCREEN_COLS - 1, row: 0 });
        let mut w = writer();
        w.write_bytes(b"ab");
        w.backspace();
        assert_eq!(row_text(&w, 0)[1], b' ');
        assert_eq!(w.cursor(), Cursor { col: 1, row: 0 });
    }

    #[test]
    fn snapshot_round_trip_is_exact() {
        let mut w = writer();
        w.write_bytes(b"391OS> ls\nframe0.txt");
        let mut saved = Snapshot::blank();
        w.save(&mut saved);
        assert_eq!(saved.cursor, Cursor { col: 10, row: 1 });
        assert_eq!(saved.cells[0], 0x0700 | b'3' as u16);

        w.clear_screen();
        let mut cleared = Snapshot::blank();
        w.save(&mut cleared);
        assert!(cleared.cells.iter().all(|&cell| cell == BLANK_CELL));

        w.restore(&saved);
        let mut again = Snapshot::blank();
        w.save(&mut again);
        assert_eq!(again, saved);
    }
}
