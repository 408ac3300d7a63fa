//! Byte encodings for keyboard and mouse input.
//!
//! The full key binding table lives with the window system; this is the
//! dispatching surface the terminal core depends on: cursor/keypad keys
//! under their application-mode variants and the mouse reporting formats.

use bitflags::bitflags;

use crate::term::{CharPos, WinMode};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const ALT   = 1 << 1;
        const CTRL  = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    WheelUp,
    WheelDown,
}

impl MouseButton {
    fn code(self) -> u32 {
        match self {
            Self::Left => 0,
            Self::Middle => 1,
            Self::Right => 2,
            Self::WheelUp => 64,
            Self::WheelDown => 65,
        }
    }

    fn is_wheel(self) -> bool {
        matches!(self, Self::WheelUp | Self::WheelDown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEvent {
    Press,
    Release,
    Motion,
}

/// Encode a mouse event for the pty under the active reporting mode, or
/// None when the event is not reported.
pub fn mouse_report(
    button: MouseButton,
    event: MouseEvent,
    pos: CharPos,
    mods: Modifiers,
    mode: WinMode,
) -> Option<Vec<u8>> {
    if !mode.intersects(WinMode::MOUSE) {
        return None;
    }

    let x10 = mode.contains(WinMode::MOUSEX10);
    let sgr = mode.contains(WinMode::MOUSE_SGR);

    let mut code = button.code();

    match event {
        MouseEvent::Press => {}
        MouseEvent::Release => {
            if x10 {
                return None;
            }
            // wheel buttons release immediately, nothing to report
            if button.is_wheel() {
                return None;
            }
            if !sgr {
                code = 3;
            }
        }
        MouseEvent::Motion => {
            if !mode.intersects(WinMode::MOUSEMOTION | WinMode::MOUSEMANY) {
                return None;
            }
            code += 32;
        }
    }

    // X10 compatibility reports no modifiers
    if !x10 {
        if mods.contains(Modifiers::SHIFT) {
            code += 4;
        }
        if mods.contains(Modifiers::ALT) {
            code += 8;
        }
        if mods.contains(Modifiers::CTRL) {
            code += 16;
        }
    }

    if sgr {
        let terminator = if event == MouseEvent::Release { 'm' } else { 'M' };
        return Some(
            format!("\x1b[<{};{};{}{}", code, pos.x + 1, pos.y + 1, terminator).into_bytes(),
        );
    }

    // the legacy encoding cannot express large coordinates
    if pos.x >= 223 || pos.y >= 223 {
        return None;
    }

    Some(vec![
         0x1b,
        b'[',
        b'M',
        (32 + code) as u8,
        (32 + pos.x as u32 + 1) as u8,
        (32 + pos.y as u32 + 1) as u8,
    ])
}

/// Keys whose byte sequences depend on terminal modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Up,
    Down,
    Right,
    Left,
    Home,
    End,
    Insert,
    Delete,
    PageUp,
    PageDown,
}

/// The byte sequence a key produces under the current mode.
pub fn encode_key(key: Key, mode: WinMode) -> &'static [u8] {
    let appcursor = mode.contains(WinMode::APPCURSOR);

    match key {
        Key::Up if appcursor => b"\x1bOA",
        Key::Up => b"\x1b[A",
        Key::Down if appcursor => b"\x1bOB",
        Key::Down => b"\x1b[B",
        Key::Right if appcursor => b"\x1bOC",
        Key::Right => b"\x1b[C",
        Key::Left if appcursor => b"\x1bOD",
        Key::Left => b"\x1b[D",
        Key::Home => b"\x1b[H",
        Key::End => b"\x1b[4~",
        Key::Insert => b"\x1b[2~",
        Key::Delete => b"\x1b[3~",
        Key::PageUp => b"\x1b[5~",
        Key::PageDown => b"\x1b[6~",
    }
}

/// Meta (ALT) encoding: mode 1034 sets the eighth bit of single-byte
/// input, otherwise an ESC prefix is used.
pub fn encode_meta(byte: u8, mode: WinMode) -> Vec<u8> {
    if mode.contains(WinMode::EIGHT_BIT) && byte < 0x80 {
        vec![byte | 0x80]
    } else {
        vec![0x1b, byte]
    }
}
