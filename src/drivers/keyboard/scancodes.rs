//! Scancode set 1 decoding.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const CTRL = 1 << 1;
        const ALT = 1 << 2;
        const CAPS_LOCK = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(u8),
    Enter,
    Backspace,
    Function(u8),
}

/// A key press together with the modifiers held when it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub modifiers: Modifiers,
}

const EXTENDED_PREFIX: u8 = 0xE0;
const RELEASE: u8 = 0x80;

/// Unshifted and shifted characters of a printable key.
fn printable(scancode: u8) -> Option<(u8, u8)> {
    let pair = match scancode {
        0x02 => (b'1', b'!'),
        0x03 => (b'2', b'@'),
        0x04 => (b'3', b'#'),
        0x05 => (b'4', b'$'),
        0x06 => (b'5', b'%'),
        0x07 => (b'6', b'^'),
        0x08 => (b'7', b'&'),
        0x09 => (b'8', b'*'),
        0x0A => (b'9', b'('),
        0x0B => (b'0', b')'),
        0x0C => (b'-', b'_'),
        0x0D => (b'=', b'+'),
        0x10 => (b'q', b'Q'),
        0x11 => (b'w', b'W'),
        0x12 => (b'e', b'E'),
        0x13 => (b'r', b'R'),
        0x14 => (b't', b'T'),
        0x15 => (b'y', b'Y'),
        0x16 => (b'u', b'U'),
        0x17 => (b'i', b'I'),
        0x18 => (b'o', b'O'),
        0x19 => (b'p', b'P'),
        0x1A => (b'[', b'{'),
        0x1B => (b']', b'}'),
        0x1E => (b'a', b'A'),
        0x1F => (b's', b'S'),
        0x20 => (b'd', b'D'),
        0x21 => (b'f', b'F'),
        0x22 => (b'g', b'G'),
        0x23 => (b'h', b'H'),
        0x24 => (b'j', b'J'),
        0x25 => (b'k', b'K'),
        0x26 => (b'l', b'L'),
        0x27 => (b';', b':'),
        0x28 => (b'\'', b'"'),
        0x29 => (b'`', b'~'),
        0x2B => (b'\\', b'|'),
        0x2C => (b'z', b'Z'),
        0x2D => (b'x', b'X'),
        0x2E => (b'c', b'C'),
        0x2F => (b'v', b'V'),
        0x30 => (b'b', b'B'),
        0x31 => (b'n', b'N'),
        0x32 => (b'm', b'M'),
        0x33 => (b',', b'<'),
        0x34 => (b'.', b'>'),
        0x35 => (b'/', b'?'),
        0x39 => (b' ', b' '),
        _ => return None,
    };
    Some(pair)
}

/// Tracks modifier state across scancodes.
pub struct Decoder {
    modifiers: Modifiers,
    extended: bool,
}

impl Decoder {
    pub const fn new() -> Self {
        Decoder { modifiers: Modifiers::empty(), extended: false }
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    /// Feed one byte from the controller. Modifier changes, releases and
    /// unmapped keys produce no event.
    pub fn decode(&mut self, scancode: u8) -> Option<KeyEvent> {
        if scancode == EXTENDED_PREFIX {
            self.extended = true;
            return None;
        }
        let extended = core::mem::replace(&mut self.extended, false);
        let pressed = scancode & RELEASE == 0;

        // Right ctrl and right alt share the left keys' codes behind the prefix.
        match scancode & !RELEASE {
            0x2A | 0x36 if !extended => {
                self.modifiers.set(Modifiers::SHIFT, pressed);
                return None;
            }
            0x1D => {
                self.modifiers.set(Modifiers::CTRL, pressed);
                return None;
            }
            0x38 => {
                self.modifiers.set(Modifiers::ALT, pressed);
                return None;
            }
            0x3A if !extended => {
                if pressed {
                    self.modifiers.toggle(Modifiers::CAPS_LOCK);
                }
                return None;
            }
            _ => {}
        }
        if !pressed || extended {
            return None;
        }

        let key = match scancode {
            0x1C => Key::Enter,
            0x0E => Key::Backspace,
            0x3B..=0x44 => Key::Function(scancode - 0x3B + 1),
            0x57 => Key::Function(11),
            0x58 => Key::Function(12),
            code => Key::Char(self.character(printable(code)?)),
        };
        Some(KeyEvent { key, modifiers: self.modifiers })
    }

    /// Caps lock inverts shift for letters only.
    fn character(&self, (lower, upper): (u8, u8)) -> u8 {
        let mut shifted = self.modifiers.contains(Modifiers::SHIFT);
        if lower.is_ascii_lowercase() && self.modifiers.contains(Modifiers::CAPS_LOCK) {
            shifted = !shifted;
        }
        if shifted {
            upper
        } else {
            lower
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
