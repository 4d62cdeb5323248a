pub mod scancodes;

use scancodes::{Key, KeyEvent, Modifiers};

use super::tty::Input;

/// What a key press asks the kernel to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Edit the foreground terminal's line.
    Input(Input),
    /// Alt+F1..F3: bring terminal N to the front.
    SwitchTerminal(usize),
}

/// Map a decoded key press to an action. Chords with ctrl or alt that
/// mean nothing are swallowed.
pub fn action_for(event: KeyEvent) -> Option<Action> {
    let ctrl = event.modifiers.contains(Modifiers::CTRL);
    let alt = event.modifiers.contains(Modifiers::ALT);
    match event.key {
        Key::Function(n @ 1..=3) if alt && !ctrl => Some(Action::SwitchTerminal(n as usize - 1)),
        Key::Char(b'l' | b'L') if ctrl && !alt => Some(Action::Input(Input::ClearScreen)),
        _ if ctrl || alt => None,
        Key::Char(byte) => Some(Action::Input(Input::Char(byte))),
        Key::Enter => Some(Action::Input(Input::Enter)),
        Key::Backspace => Some(Action::Input(Input::Backspace)),
        Key::Function(_) => None,
    }
}

#[cfg(target_os = "none")]
mod ps2 {
    use lazy_static::lazy_static;
    use spin::Mutex;
    use x86_64::instructions::port::Port;

    use super::scancodes::Decoder;
    use super::{action_for, Action};

    lazy_static! {
        static ref DECODER: Mutex<Decoder> = Mutex::new(Decoder::new());
    }

    /// IRQ 1 body: read the controller and act on the key.
    pub fn handle_interrupt() {
        let mut port: Port<u8> = Port::new(0x60);
        let scancode = unsafe { port.read() };
        let action = DECODER.lock().decode(scancode).and_then(action_for);
        match action {
            Some(Action::Input(input)) => crate::drivers::tty::TTY.key(input),
            Some(Action::SwitchTerminal(target)) => crate::terminal::request_switch(target),
            None => {}
        }
    }

    pub fn init() {
        // Drain whatever the 8042 latched before we were listening.
        let mut port: Port<u8> = Port::new(0x60);
        let _ = unsafe { port.read() };
    }
}

#[cfg(target_os = "none")]
pub use ps2::handle_interrupt;

pub fn init() {
    #[cfg(target_os = "none")]
    ps2::init();
    crate::log_info!("PS/2 Keyboard driver initialized.");
}
