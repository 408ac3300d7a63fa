//! The escape sequence state machine.
//!
//! A single-threaded, rune-at-a-time machine sitting between the pty byte
//! decoder and the terminal operations. Control codes act immediately, even
//! in the middle of CSI or string sequences; a malformed sequence never
//! leaves the terminal in a broken state, it is logged and dropped.

pub mod csi;
pub mod str_esc;

pub use csi::CsiEscape;
pub use str_esc::{StrEscape, StrType};

use crate::codec::RuneInfo;
use crate::term::{Charset, Term, TermMode, WinMode};

/// Parser states.
///
/// A completed string sequence awaiting its `ESC \` terminator is not a
/// state of its own: it is the `str_pending` flag carried through the
/// `Escape` state, since the terminating ESC must still be processed as a
/// control code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Ground,
    /// ESC received, selector byte pending.
    Escape,
    /// Collecting a CSI sequence body.
    Csi,
    /// Collecting a string sequence (OSC/DCS/APC/PM/title).
    Str,
    /// `ESC (`-family: the next byte selects a charset mapping.
    AltCharset,
    /// `ESC #`: DEC screen test.
    Test,
    /// `ESC %`: UTF-8 charset switch.
    CharsetSwitch,
}

/// Complete parsing state owned by the terminal.
#[derive(Debug, Default)]
pub struct Escape {
    pub state: State,
    /// A finished string sequence waits for ST.
    pub str_pending: bool,
    /// Destination slot G0..G3 for AltCharset.
    pub charset_slot: usize,
    pub csi: CsiEscape,
    pub str_seq: StrEscape,
}

impl Escape {
    pub fn reset(&mut self) {
        self.state = State::Ground;
        self.str_pending = false;
        self.csi.reset();
        self.str_seq = StrEscape::default();
    }
}

/// Feed one rune into the machine.
///
/// Returns true when the rune was consumed as part of a control code or
/// escape sequence and must not be printed.
pub(crate) fn process(term: &mut Term, rinfo: &RuneInfo) -> bool {
    let rune = rinfo.rune();

    if term.esc.state == State::Str {
        if is_str_terminator(rune) {
            // sequence body complete; the terminator itself is handled
            // below as a control code
            term.esc.state = State::Ground;
            term.esc.str_pending = true;
        } else if rinfo.is_control() {
            // C0 codes act immediately without interrupting the sequence
            handle_control_code(term, rune);
            return true;
        } else {
            term.esc.str_seq.put(rune);
            return true;
        }
    }

    if rinfo.is_control() {
        handle_control_code(term, rune);
        if term.esc.state == State::Ground && !term.esc.str_pending {
            // control codes are never repeatable via REP
            term.reset_last_char();
        }
        return true;
    }

    if term.esc.state != State::Ground {
        let finished = check_sequence(term, rune);
        if finished {
            term.esc.state = State::Ground;
        }
        return true;
    }

    false
}

/// Terminators that end collection of a string sequence: ESC (first byte of
/// ST), BEL, the aborts, and every C1 control.
fn is_str_terminator(rune: char) -> bool {
    matches!(rune, '\x1b' | '\x07' | '\x18' | '\x1a') || crate::codec::is_control_c1(rune)
}

/// Dispatch the buffered string sequence.
fn finish_str(term: &mut Term) {
    term.esc.str_pending = false;
    let seq = std::mem::take(&mut term.esc.str_seq);
    str_esc::dispatch_str(term, seq);
}

/// Drop a buffered string sequence without executing it.
fn abandon_str(term: &mut Term) {
    if term.esc.str_pending {
        term.esc.str_pending = false;
        term.esc.str_seq = StrEscape::default();
    }
}

fn handle_control_code(term: &mut Term, code: char) {
    match code {
        // HT
        '\t' => {
            term.move_to_next_tab(1);
            return;
        }
        // BS
        '\x08' => {
            let pos = term.cursor_pos();
            term.move_cursor_to(pos.prev_col(1));
            return;
        }
        // CR
        '\r' => {
            let pos = term.cursor_pos();
            term.move_cursor_to(pos.start_of_line());
            return;
        }
        // LF / VT / FF: newline, with carriage return in CRLF mode
        '\n' | '\x0b' | '\x0c' => {
            let crlf = term.mode().contains(TermMode::CRLF);
            term.move_to_newline(crlf);
            return;
        }
        // BEL doubles as the xterm OSC terminator
        '\x07' => {
            if term.esc.str_pending {
                finish_str(term);
            } else {
                term.ring_bell();
            }
        }
        // ESC starts a fresh sequence; CSI/charset/test state is discarded
        // but a pending string terminator survives to meet its `\`
        '\x1b' => {
            term.esc.csi.reset();
            term.esc.state = State::Escape;
            return;
        }
        // SO / SI: locking shifts LS1/LS0
        '\x0e' => {
            term.set_active_charset(1);
            return;
        }
        '\x0f' => {
            term.set_active_charset(0);
            return;
        }
        // SUB aborts and leaves a marker, CAN just aborts
        '\x1a' | '\x18' => {
            if code == '\x1a' {
                term.show_sub_marker();
            }
            term.esc.csi.reset();
            term.esc.state = State::Ground;
            abandon_str(term);
        }
        // NUL, ENQ, XON, XOFF, DEL are ignored
        '\0' | '\x05' | '\x11' | '\x13' | '\x7f' => return,
        // NEL
        '\u{85}' => {
            term.move_to_newline(true);
            abandon_str(term);
        }
        // HTS
        '\u{88}' => {
            term.set_tab_at_cursor(true);
            abandon_str(term);
        }
        // DECID
        '\u{9a}' => {
            term.identify();
            abandon_str(term);
        }
        // C1 string starters begin a new sequence
        '\u{90}' | '\u{9d}' | '\u{9e}' | '\u{9f}' => {
            abandon_str(term);
            let typ = StrType::from_c1(code).unwrap_or(StrType::Osc);
            term.esc.str_seq.start(typ);
            term.esc.state = State::Str;
            return;
        }
        // remaining C1 codes end string collection but do nothing else
        _ => abandon_str(term),
    }
}

/// Continue a sequence begun with ESC. Returns true when it is finished.
fn check_sequence(term: &mut Term, rune: char) -> bool {
    match term.esc.state {
        State::Csi => {
            if !rune.is_ascii() {
                tracing::warn!("non-ascii byte {:#x} aborts csi sequence", rune as u32);
                return true;
            }
            let finished = term.esc.csi.add(rune as u8);
            if finished {
                // leave the machine in ground state before dispatching:
                // REP re-enters the write path
                term.esc.state = State::Ground;
                term.esc.csi.parse();
                let seq = std::mem::take(&mut term.esc.csi);
                csi::dispatch_csi(term, &seq);
            }
            finished
        }
        State::CharsetSwitch => {
            match rune {
                'G' => term.set_mode_flag(TermMode::UTF8, true),
                '@' => term.set_mode_flag(TermMode::UTF8, false),
                _ => tracing::warn!("unhandled charset switch: ESC % {rune}"),
            }
            true
        }
        State::AltCharset => {
            let slot = term.esc.charset_slot;
            match rune {
                '0' => term.set_charset_mapping(slot, Charset::Graphic0),
                'B' => term.set_charset_mapping(slot, Charset::Usa),
                _ => tracing::warn!("esc unhandled charset: ESC ( {rune}"),
            }
            true
        }
        State::Test => {
            if rune == '8' {
                // DECALN
                term.run_dec_test();
            }
            true
        }
        State::Escape => handle_initial_escape(term, rune),
        State::Ground | State::Str => true,
    }
}

/// The byte following a bare ESC. Returns true when the sequence is done.
fn handle_initial_escape(term: &mut Term, ch: char) -> bool {
    // anything but the ST completion invalidates a pending string sequence
    if ch != '\\' {
        abandon_str(term);
    }

    let next_state = match ch {
        '[' => Some(State::Csi),
        '#' => Some(State::Test),
        '%' => Some(State::CharsetSwitch),
        ']' | 'P' | '_' | '^' | 'k' => {
            let typ = StrType::from_intro(ch).unwrap_or(StrType::Osc);
            term.esc.str_seq.start(typ);
            Some(State::Str)
        }
        // LS2 / LS3
        'n' | 'o' => {
            term.set_active_charset(2 + (ch as usize - 'n' as usize));
            None
        }
        '(' | ')' | '*' | '+' => {
            term.esc.charset_slot = ch as usize - '(' as usize;
            Some(State::AltCharset)
        }
        // IND
        'D' => {
            term.do_line_feed();
            None
        }
        // NEL
        'E' => {
            term.move_to_newline(true);
            None
        }
        // HTS
        'H' => {
            term.set_tab_at_cursor(true);
            None
        }
        // RI
        'M' => {
            term.do_reverse_line_feed();
            None
        }
        // DECID
        'Z' => {
            term.identify();
            None
        }
        // RIS
        'c' => {
            term.full_reset();
            None
        }
        // DECPAM / DECPNM
        '=' => {
            term.set_win_mode(WinMode::APPKEYPAD, true);
            None
        }
        '>' => {
            term.set_win_mode(WinMode::APPKEYPAD, false);
            None
        }
        // DECSC / DECRC
        '7' => {
            term.save_cursor();
            None
        }
        '8' => {
            term.restore_cursor();
            None
        }
        // second byte of ST
        '\\' => {
            if term.esc.str_pending {
                finish_str(term);
            }
            None
        }
        _ => {
            tracing::warn!(
                "unknown sequence ESC {:#04x} '{}'",
                ch as u32,
                if ch.is_ascii_graphic() { ch } else { '.' }
            );
            None
        }
    };

    match next_state {
        Some(state) => {
            term.esc.state = state;
            false
        }
        None => true,
    }
}

// the machine is exercised end-to-end through Term in term/mod.rs tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::CharPos;

    #[test]
    fn str_terminators() {
        assert!(is_str_terminator('\x1b'));
        assert!(is_str_terminator('\x07'));
        assert!(is_str_terminator('\x18'));
        assert!(is_str_terminator('\u{9c}'));
        assert!(!is_str_terminator('\n'));
        assert!(!is_str_terminator('x'));
    }

    #[test]
    fn default_state_is_ground() {
        let esc = Escape::default();
        assert_eq!(esc.state, State::Ground);
        assert!(!esc.str_pending);
    }

    #[test]
    fn reset_clears_everything() {
        let mut esc = Escape::default();
        esc.state = State::Csi;
        esc.str_pending = true;
        esc.csi.add(b'1');
        esc.reset();
        assert_eq!(esc.state, State::Ground);
        assert!(!esc.str_pending);
    }

    #[test]
    fn cursor_pos_helper() {
        let p = CharPos { x: 3, y: 5 };
        assert_eq!(p.prev_col(1), CharPos { x: 2, y: 5 });
        assert_eq!(p.start_of_line(), CharPos { x: 0, y: 5 });
    }
}
