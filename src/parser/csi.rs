//! CSI sequence accumulation, parameter parsing and dispatch.

use crate::codec;
use crate::term::cursor::CursorStyle;
use crate::term::{CharPos, LineSpan, Term, TermMode, WinMode};

/// Maximum number of numeric parameters in one sequence.
pub const MAX_ARGS: usize = 16;

/// Byte cap for a single CSI sequence.
pub const MAX_SEQ_LEN: usize = 128 * codec::UTF_SIZE;

/// Accumulates the body of a `CSI ... <final>` sequence and parses it into
/// numeric parameters plus up to two mode bytes.
#[derive(Debug, Default)]
pub struct CsiEscape {
    buf: Vec<u8>,
    args: Vec<i64>,
    private: bool,
    mode: [u8; 2],
}

impl CsiEscape {
    pub fn reset(&mut self) {
        self.buf.clear();
        self.args.clear();
        self.private = false;
        self.mode = [0; 2];
    }

    /// Add a sequence byte. Returns true once the sequence is complete,
    /// either by a final byte or by hitting the length cap.
    pub fn add(&mut self, byte: u8) -> bool {
        self.buf.push(byte);
        (0x40..=0x7e).contains(&byte) || self.buf.len() >= MAX_SEQ_LEN
    }

    /// Parse `[?] num (';' num)* mode` out of the collected bytes.
    pub fn parse(&mut self) {
        self.args.clear();
        self.private = false;
        self.mode = [0; 2];

        let mut p = &self.buf[..];
        if p.first() == Some(&b'?') {
            self.private = true;
            p = &p[1..];
        }

        loop {
            let mut value: i64 = 0;
            let mut overflow = false;
            while let Some((&b, rest)) = p.split_first() {
                if !b.is_ascii_digit() {
                    break;
                }
                value = match value.checked_mul(10).and_then(|v| v.checked_add((b - b'0') as i64)) {
                    Some(v) => v,
                    None => {
                        overflow = true;
                        0
                    }
                };
                p = rest;
            }
            if overflow {
                value = -1;
            }
            // a missing parameter parses as zero, like an explicit 0
            self.args.push(value);
            if self.args.len() == MAX_ARGS {
                break;
            }
            match p.split_first() {
                Some((&b';', rest)) => p = rest,
                _ => break,
            }
        }

        if let Some((&b, rest)) = p.split_first() {
            self.mode[0] = b;
            if let Some(&b2) = rest.first() {
                self.mode[1] = b2;
            }
        }
    }

    /// Raw parameter value; missing parameters read as 0.
    pub fn arg(&self, idx: usize) -> i64 {
        self.args.get(idx).copied().unwrap_or(0)
    }

    /// Parameter with a default applied to missing or zero values.
    pub fn arg_or(&self, idx: usize, default: i64) -> i64 {
        match self.arg(idx) {
            0 => default,
            v => v,
        }
    }

    pub fn args(&self) -> &[i64] {
        &self.args
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub fn mode(&self) -> (u8, u8) {
        (self.mode[0], self.mode[1])
    }

    /// Printable rendition of the sequence for diagnostics.
    pub fn dump(&self) -> String {
        let mut out = String::from("ESC[");
        for &b in &self.buf {
            match b {
                b'\n' => out.push_str("(\\n)"),
                b'\r' => out.push_str("(\\r)"),
                0x1b => out.push_str("(\\e)"),
                b if b.is_ascii_graphic() || b == b' ' => out.push(b as char),
                b => out.push_str(&format!("({b:02x})")),
            }
        }
        out
    }
}

/// Execute a parsed CSI sequence against the terminal.
pub(crate) fn dispatch_csi(term: &mut Term, csi: &CsiEscape) {
    let cursor = term.cursor_pos();
    let (mode0, mode1) = csi.mode();

    match mode0 {
        // ICH -- insert blanks at the cursor
        b'@' => term.insert_blanks(csi.arg_or(0, 1) as i32),
        // CUU
        b'A' => term.move_cursor_to(cursor.prev_line(csi.arg_or(0, 1) as i32)),
        // CUD / VPR
        b'B' | b'e' => term.move_cursor_to(cursor.next_line(csi.arg_or(0, 1) as i32)),
        // MC -- media copy
        b'i' => match csi.arg(0) {
            0 => term.dump_screen(),
            1 => term.dump_cursor_line(),
            2 => term.dump_selection(),
            4 => term.set_print_mode(false),
            5 => term.set_print_mode(true),
            _ => {}
        },
        // DA
        b'c' => {
            if csi.arg(0) == 0 {
                term.identify();
            }
        }
        // REP -- repeat the last printable character
        b'b' => term.repeat_char(csi.arg_or(0, 1) as i32),
        // CUF / HPR
        b'C' | b'a' => term.move_cursor_to(cursor.next_col(csi.arg_or(0, 1) as i32)),
        // CUB
        b'D' => term.move_cursor_to(cursor.prev_col(csi.arg_or(0, 1) as i32)),
        // CNL
        b'E' => term.move_cursor_to(CharPos {
            x: 0,
            y: cursor.y + csi.arg_or(0, 1) as i32,
        }),
        // CPL
        b'F' => term.move_cursor_to(CharPos {
            x: 0,
            y: cursor.y - csi.arg_or(0, 1) as i32,
        }),
        // TBC
        b'g' => match csi.arg(0) {
            0 => term.set_tab_at_cursor(false),
            3 => term.clear_all_tabs(),
            _ => {}
        },
        // CHA / HPA
        b'G' | b'`' => term.move_cursor_to(CharPos {
            x: csi.arg_or(0, 1) as i32 - 1,
            y: cursor.y,
        }),
        // CUP / HVP
        b'H' | b'f' => term.move_cursor_abs_to(CharPos {
            x: csi.arg_or(1, 1) as i32 - 1,
            y: csi.arg_or(0, 1) as i32 - 1,
        }),
        // CHT
        b'I' => term.move_to_next_tab(csi.arg_or(0, 1) as usize),
        // ED
        b'J' => match csi.arg(0) {
            0 => {
                term.clear_cols_after_cursor();
                term.clear_lines_below_cursor();
            }
            1 => {
                term.clear_lines_above_cursor();
                term.clear_cols_before_cursor();
            }
            2 => term.clear_screen(),
            _ => {}
        },
        // EL
        b'K' => match csi.arg(0) {
            0 => term.clear_cols_after_cursor(),
            1 => term.clear_cols_before_cursor(),
            2 => term.clear_cursor_line(),
            _ => {}
        },
        // SU
        b'S' => term.scroll_up(csi.arg_or(0, 1) as i32, None),
        // SD
        b'T' => term.scroll_down(csi.arg_or(0, 1) as i32, None),
        // IL
        b'L' => term.insert_blank_lines(csi.arg_or(0, 1) as i32),
        // DL
        b'M' => term.delete_lines(csi.arg_or(0, 1) as i32),
        // SM / RM
        b'h' => set_mode(term, csi, true),
        b'l' => set_mode(term, csi, false),
        // ECH -- erase in place
        b'X' => term.erase_chars(csi.arg_or(0, 1) as i32),
        // DCH
        b'P' => term.delete_chars(csi.arg_or(0, 1) as i32),
        // CBT
        b'Z' => term.move_to_prev_tab(csi.arg_or(0, 1) as usize),
        // VPA
        b'd' => term.move_cursor_abs_to(CharPos {
            x: cursor.x,
            y: csi.arg_or(0, 1) as i32 - 1,
        }),
        // SGR
        b'm' => dispatch_sgr(term, csi),
        // DSR
        b'n' => match csi.arg(0) {
            5 => term.queue_response(b"\x1b[0n".to_vec()),
            6 => {
                let reply = format!("\x1b[{};{}R", cursor.y + 1, cursor.x + 1);
                term.queue_response(reply.into_bytes());
            }
            _ => {}
        },
        // DECSTBM
        b'r' => {
            if csi.is_private() {
                tracing::debug!("ignoring private CSI r: {}", csi.dump());
            } else {
                let rows = term.size().rows as i64;
                term.set_scroll_area(LineSpan {
                    top: csi.arg_or(0, 1) as i32 - 1,
                    bottom: csi.arg_or(1, rows) as i32 - 1,
                });
                term.move_cursor_abs_to(CharPos { x: 0, y: 0 });
            }
        }
        // DECSC / DECRC (ANSI.SYS flavor)
        b's' => term.save_cursor(),
        b'u' => term.restore_cursor(),
        // DECSCUSR: CSI Ps SP q
        b' ' if mode1 == b'q' => match CursorStyle::from_decscusr(csi.arg(0)) {
            Some(style) => term.set_cursor_style(style),
            None => tracing::warn!("unknown cursor style: {}", csi.dump()),
        },
        _ => tracing::warn!("unknown csi: {}", csi.dump()),
    }
}

/// SGR: colors and renditions.
fn dispatch_sgr(term: &mut Term, csi: &CsiEscape) {
    use crate::term::glyph::{Attr, Color, DEFAULT_BG, DEFAULT_FG};

    let args = csi.args();
    let attrs = term.cursor_attrs_mut();

    let mut i = 0;
    while i < args.len() {
        match args[i] {
            0 => {
                attrs.attrs.remove(Attr::RENDITION);
                attrs.fg = DEFAULT_FG;
                attrs.bg = DEFAULT_BG;
            }
            1 => attrs.attrs.insert(Attr::BOLD),
            2 => attrs.attrs.insert(Attr::FAINT),
            3 => attrs.attrs.insert(Attr::ITALIC),
            4 => attrs.attrs.insert(Attr::UNDERLINE),
            // slow and rapid blink alike
            5 | 6 => attrs.attrs.insert(Attr::BLINK),
            7 => attrs.attrs.insert(Attr::REVERSE),
            8 => attrs.attrs.insert(Attr::INVISIBLE),
            9 => attrs.attrs.insert(Attr::STRUCK),
            22 => attrs.attrs.remove(Attr::BOLD | Attr::FAINT),
            23 => attrs.attrs.remove(Attr::ITALIC),
            24 => attrs.attrs.remove(Attr::UNDERLINE),
            25 => attrs.attrs.remove(Attr::BLINK),
            27 => attrs.attrs.remove(Attr::REVERSE),
            28 => attrs.attrs.remove(Attr::INVISIBLE),
            29 => attrs.attrs.remove(Attr::STRUCK),
            38 => {
                if let Some(color) = parse_extended_color(args, &mut i) {
                    attrs.fg = color;
                }
            }
            39 => attrs.fg = DEFAULT_FG,
            48 => {
                if let Some(color) = parse_extended_color(args, &mut i) {
                    attrs.bg = color;
                }
            }
            49 => attrs.bg = DEFAULT_BG,
            n @ 30..=37 => attrs.fg = Color::Indexed((n - 30) as u16),
            n @ 40..=47 => attrs.bg = Color::Indexed((n - 40) as u16),
            n @ 90..=97 => attrs.fg = Color::Indexed((n - 90 + 8) as u16),
            n @ 100..=107 => attrs.bg = Color::Indexed((n - 100 + 8) as u16),
            n => tracing::warn!("unknown sgr attribute {n}: {}", csi.dump()),
        }
        i += 1;
    }

    if args.is_empty() {
        // CSI m is equivalent to CSI 0 m
        attrs.attrs.remove(Attr::RENDITION);
        attrs.fg = DEFAULT_FG;
        attrs.bg = DEFAULT_BG;
    }
}

/// The `38;5;N` / `38;2;R;G;B` extended color selectors.
fn parse_extended_color(args: &[i64], i: &mut usize) -> Option<crate::term::glyph::Color> {
    use crate::term::glyph::Color;

    match args.get(*i + 1).copied() {
        Some(2) => {
            if *i + 4 >= args.len() {
                tracing::warn!("sgr 38/48: incorrect number of rgb parameters");
                return None;
            }
            let (r, g, b) = (args[*i + 2], args[*i + 3], args[*i + 4]);
            *i += 4;
            if !(0..=255).contains(&r) || !(0..=255).contains(&g) || !(0..=255).contains(&b) {
                tracing::warn!("sgr 38/48: bad rgb color ({r},{g},{b})");
                return None;
            }
            Some(Color::Rgb(r as u8, g as u8, b as u8))
        }
        Some(5) => {
            if *i + 2 >= args.len() {
                tracing::warn!("sgr 38/48: incorrect number of indexed parameters");
                return None;
            }
            let idx = args[*i + 2];
            *i += 2;
            if !(0..=255).contains(&idx) {
                tracing::warn!("sgr 38/48: bad color index {idx}");
                return None;
            }
            Some(Color::Indexed(idx as u16))
        }
        Some(kind) => {
            tracing::warn!("sgr 38/48: unsupported color space {kind}");
            None
        }
        None => None,
    }
}

/// SM/RM and the DEC private mode set.
fn set_mode(term: &mut Term, csi: &CsiEscape, set: bool) {
    for &arg in csi.args() {
        if csi.is_private() {
            match arg {
                // DECCKM
                1 => term.set_win_mode(WinMode::APPCURSOR, set),
                // DECSCNM -- reverse video
                5 => {
                    term.set_win_mode(WinMode::REVERSE, set);
                    term.set_all_dirty();
                }
                // DECOM
                6 => {
                    term.set_cursor_origin(set);
                    term.move_cursor_abs_to(CharPos { x: 0, y: 0 });
                }
                // DECAWM
                7 => term.set_mode_flag(TermMode::WRAP, set),
                // ignored: VT52, column, scroll, auto-repeat, printer modes
                0 | 2 | 3 | 4 | 8 | 18 | 19 | 42 => {}
                // att610 -- blinking cursor
                12 => term.set_cursor_blink(set),
                // DECTCEM
                25 => term.set_win_mode(WinMode::HIDE_CURSOR, !set),
                // X10 mouse compatibility
                9 => {
                    term.clear_win_mode(WinMode::MOUSE);
                    term.set_win_mode(WinMode::MOUSEX10, set);
                }
                1000 => {
                    term.clear_win_mode(WinMode::MOUSE);
                    term.set_win_mode(WinMode::MOUSEBTN, set);
                }
                1002 => {
                    term.clear_win_mode(WinMode::MOUSE);
                    term.set_win_mode(WinMode::MOUSEMOTION, set);
                }
                1003 => {
                    term.clear_win_mode(WinMode::MOUSE);
                    term.set_win_mode(WinMode::MOUSEMANY, set);
                }
                1004 => term.set_win_mode(WinMode::FOCUS, set),
                1006 => term.set_win_mode(WinMode::MOUSE_SGR, set),
                1034 => term.set_win_mode(WinMode::EIGHT_BIT, set),
                // alt screen variants
                47 => term.set_alt_screen(set, false, false),
                1047 => term.set_alt_screen(set, false, true),
                1048 => term.cursor_control_save_load(set),
                1049 => term.set_alt_screen(set, true, true),
                2004 => term.set_win_mode(WinMode::BRKT_PASTE, set),
                // mouse modes that are hazardous or mangled by design
                1001 | 1005 | 1015 => {}
                n => tracing::warn!("unknown private set/reset mode {n}"),
            }
        } else {
            match arg {
                0 => {}
                2 => term.set_win_mode(WinMode::KBDLOCK, set),
                // IRM
                4 => term.set_mode_flag(TermMode::INSERT, set),
                // SRM -- send/receive: off means local echo
                12 => term.set_mode_flag(TermMode::ECHO, !set),
                // LNM
                20 => term.set_mode_flag(TermMode::CRLF, set),
                n => tracing::warn!("unknown set/reset mode {n}"),
            }
        }
    }
}
