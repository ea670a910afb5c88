//! PS/2 keyboard driver
//!
//! Translates scancode set 1 into characters and editing actions, keeping
//! sticky modifier state for Ctrl/Shift/Alt/CapsLock.  The IRQ handler
//! routes every keystroke to the foreground terminal; a few chords act on
//! the system itself:
//!
//! * `Alt+F1/F2/F3` and `Ctrl+1/2/3` switch terminals,
//! * `Ctrl+L` clears the screen and reprints the prompt,
//! * `Esc` kills the processing terminal's current program.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::interrupts::pic;
use crate::terminal;
use crate::{arch, syscall};

pub const KEYBOARD_IRQ: u8 = 1;

const KBD_STATUS_PORT: u16 = 0x64;
const KBD_DATA_PORT: u16 = 0x60;

// Scancodes with meaning beyond a printable character.
const SC_ESC: u8 = 0x01;
const SC_ONE: u8 = 0x02;
const SC_THREE: u8 = 0x04;
const SC_BACKSPACE: u8 = 0x0E;
const SC_ENTER: u8 = 0x1C;
const SC_L_CTRL: u8 = 0x1D;
const SC_L: u8 = 0x26;
const SC_L_SHIFT: u8 = 0x2A;
const SC_R_SHIFT: u8 = 0x36;
const SC_L_ALT: u8 = 0x38;
const SC_CAPSLOCK: u8 = 0x3A;
const SC_F1: u8 = 0x3B;
const SC_F3: u8 = 0x3D;

const RELEASE_BIT: u8 = 0x80;

const TABLE_LEN: usize = 0x3B;

/// Scancode set 1 → ASCII, no modifiers.
#[rustfmt::skip]
const SCANCODE_PLAIN: [u8; TABLE_LEN] = [
    0, 0, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 0, b'\t',
    b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', 0, 0,
    b'a', b's', b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`', 0, b'\\',
    b'z', b'x', b'c', b'v', b'b', b'n', b'm', b',', b'.', b'/', 0, b'*', 0, b' ', 0,
];

/// Scancode set 1 → ASCII with Shift held.
#[rustfmt::skip]
const SCANCODE_SHIFT: [u8; TABLE_LEN] = [
    0, 0, b'!', b'@', b'#', b'$', b'%', b'^', b'&', b'*', b'(', b')', b'_', b'+', 0, b'\t',
    b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I', b'O', b'P', b'{', b'}', 0, 0,
    b'A', b'S', b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', b'"', b'~', 0, b'|',
    b'Z', b'X', b'C', b'V', b'B', b'N', b'M', b'<', b'>', b'?', 0, b'*', 0, b' ', 0,
];

/// Sticky modifier state carried across scancodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub caps: bool,
}

/// What one scancode asks the kernel to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyEvent {
    None,
    Char(u8),
    Enter,
    Backspace,
    /// Ctrl+L: clear the screen, reprint the prompt
    Clear,
    Switch(usize),
    /// Esc: kill the processing terminal's current program
    Terminate,
}

static CTRL_PRESSED: AtomicBool = AtomicBool::new(false);
static SHIFT_PRESSED: AtomicBool = AtomicBool::new(false);
static ALT_PRESSED: AtomicBool = AtomicBool::new(false);
static CAPS_LOCK: AtomicBool = AtomicBool::new(false);

/// Unmasks the keyboard line.
pub fn init() {
    CTRL_PRESSED.store(false, Ordering::Release);
    SHIFT_PRESSED.store(false, Ordering::Release);
    ALT_PRESSED.store(false, Ordering::Release);
    CAPS_LOCK.store(false, Ordering::Release);
    pic::enable_irq(KEYBOARD_IRQ);
    crate::log!("keyboard on IRQ {}", KEYBOARD_IRQ);
}

/// Translates one scancode, updating modifier state.
pub fn translate(scancode: u8, mods: &mut Modifiers) -> KeyEvent {
    match scancode {
        SC_ESC => return KeyEvent::Terminate,
        SC_L_CTRL => {
            mods.ctrl = true;
            return KeyEvent::None;
        }
        _ if scancode == SC_L_CTRL | RELEASE_BIT => {
            mods.ctrl = false;
            return KeyEvent::None;
        }
        SC_L_SHIFT | SC_R_SHIFT => {
            mods.shift = true;
            return KeyEvent::None;
        }
        _ if scancode == SC_L_SHIFT | RELEASE_BIT || scancode == SC_R_SHIFT | RELEASE_BIT => {
            mods.shift = false;
            return KeyEvent::None;
        }
        SC_L_ALT => {
            mods.alt = true;
            return KeyEvent::None;
        }
        _ if scancode == SC_L_ALT | RELEASE_BIT => {
            mods.alt = false;
            return KeyEvent::None;
        }
        SC_CAPSLOCK => {
            mods.caps = !mods.caps;
            return KeyEvent::None;
        }
        SC_ENTER => return KeyEvent::Enter,
        SC_BACKSPACE => return KeyEvent::Backspace,
        _ => {}
    }

    if mods.alt && (SC_F1..=SC_F3).contains(&scancode) {
        return KeyEvent::Switch((scancode - SC_F1) as usize);
    }
    if mods.ctrl && (SC_ONE..=SC_THREE).contains(&scancode) {
        return KeyEvent::Switch((scancode - SC_ONE) as usize);
    }
    if mods.ctrl && scancode == SC_L {
        return KeyEvent::Clear;
    }

    if scancode as usize >= TABLE_LEN {
        return KeyEvent::None;
    }

    let mut c = if mods.shift {
        SCANCODE_SHIFT[scancode as usize]
    } else {
        SCANCODE_PLAIN[scancode as usize]
    };
    if c == 0 {
        return KeyEvent::None;
    }
    if mods.caps {
        // CapsLock inverts case over letters only.
        if c.is_ascii_lowercase() {
            c -= 0x20;
        } else if c.is_ascii_uppercase() {
            c += 0x20;
        }
    }
    KeyEvent::Char(c)
}

fn load_modifiers() -> Modifiers {
    Modifiers {
        ctrl: CTRL_PRESSED.load(Ordering::Acquire),
        shift: SHIFT_PRESSED.load(Ordering::Acquire),
        alt: ALT_PRESSED.load(Ordering::Acquire),
        caps: CAPS_LOCK.load(Ordering::Acquire),
    }
}

fn store_modifiers(mods: Modifiers) {
    CTRL_PRESSED.store(mods.ctrl, Ordering::Release);
    SHIFT_PRESSED.store(mods.shift, Ordering::Release);
    ALT_PRESSED.store(mods.alt, Ordering::Release);
    CAPS_LOCK.store(mods.caps, Ordering::Release);
}

/// IRQ 1 service routine: translate and dispatch one scancode.
pub fn handle_interrupt() {
    // Nothing pending means a spurious interrupt; still acknowledge it.
    if arch::port_in(KBD_STATUS_PORT) & 0x01 == 0 {
        pic::send_eoi(KEYBOARD_IRQ);
        return;
    }
    let scancode = arch::port_in(KBD_DATA_PORT);

    let mut mods = load_modifiers();
    let event = translate(scancode, &mut mods);
    store_modifiers(mods);

    match event {
        KeyEvent::None => {}
        KeyEvent::Char(c) => terminal::input_char(c),
        KeyEvent::Enter => terminal::enter(),
        KeyEvent::Backspace => terminal::backspace(),
        KeyEvent::Clear => {
            terminal::clear_active();
            terminal::print_str(crate::syscall::SHELL_PROMPT);
        }
        KeyEvent::Switch(id) => terminal::switch(id),
        KeyEvent::Terminate => {
            // The interrupt frame is abandoned by the halt path, so the
            // controller has to hear the EOI first.
            pic::send_eoi(KEYBOARD_IRQ);
            terminal::print_banner(b"program terminated by keyboard interrupt");
            syscall::terminate(0);
            return;
        }
    }

    pic::send_eoi(KEYBOARD_IRQ);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(mods: &mut Modifiers, codes: &[u8]) -> KeyEvent {
        let mut last = KeyEvent::None;
        for &sc in codes {
            last = translate(sc, mods);
        }
        last
    }

    #[test]
    fn plain_and_shifted_characters() {
        let mut mods = Modifiers::default();
        assert_eq!(translate(0x1E, &mut mods), KeyEvent::Char(b'a'));
        assert_eq!(feed(&mut mods, &[SC_L_SHIFT, 0x1E]), KeyEvent::Char(b'A'));
        assert_eq!(feed(&mut mods, &[SC_L_SHIFT | RELEASE_BIT, 0x02]), KeyEvent::Char(b'1'));
        assert_eq!(feed(&mut mods, &[SC_L_SHIFT, 0x02]), KeyEvent::Char(b'!'));
    }

    #[test]
    fn capslock_inverts_letters_only() {
        let mut mods = Modifiers::default();
        assert_eq!(feed(&mut mods, &[SC_CAPSLOCK, 0x1E]), KeyEvent::Char(b'A'));
        // Digits are unaffected by CapsLock.
        assert_eq!(translate(0x02, &mut mods), KeyEvent::Char(b'1'));
        // Shift+letter under CapsLock flips back to lowercase.
        assert_eq!(feed(&mut mods, &[SC_L_SHIFT, 0x1E]), KeyEvent::Char(b'a'));
    }

    #[test]
    fn terminal_switch_chords() {
        let mut mods = Modifiers::default();
        assert_eq!(feed(&mut mods, &[SC_L_ALT, SC_F1]), KeyEvent::Switch(0));
        assert_eq!(translate(SC_F3, &mut mods), KeyEvent::Switch(2));
        assert_eq!(feed(&mut mods, &[SC_L_ALT | RELEASE_BIT, SC_F1]), KeyEvent::None);

        assert_eq!(feed(&mut mods, &[SC_L_CTRL, SC_ONE]), KeyEvent::Switch(0));
        assert_eq!(translate(SC_THREE, &mut mods), KeyEvent::Switch(2));
        assert_eq!(translate(SC_L, &mut mods), KeyEvent::Clear);
    }

    #[test]
    fn editing_and_control_events() {
        let mut mods = Modifiers::default();
        assert_eq!(translate(SC_ENTER, &mut mods), KeyEvent::Enter);
        assert_eq!(translate(SC_BACKSPACE, &mut mods), KeyEvent::Backspace);
        assert_eq!(translate(SC_ESC, &mut mods), KeyEvent::Terminate);
        // Key releases of plain characters do nothing.
        assert_eq!(translate(0x1E | RELEASE_BIT, &mut mods), KeyEvent::None);
    }
}
