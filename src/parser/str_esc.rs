//! String escape sequences: OSC, DCS, APC, PM and the old title-set form.
//!
//! The sequence model is `ESC <type> <args> ST` where ST is `ESC \`; OSC
//! additionally accepts BEL as terminator for xterm compatibility.

use crate::codec;
use crate::term::glyph::{self, Color};
use crate::term::{Term, TermEvent};

/// Total byte cap for one string sequence; input past it is discarded so an
/// unterminated OSC cannot grow without bound.
pub const STR_BUF_LIMIT: usize = 512 * 1024;

/// Maximum number of `;`-separated arguments considered.
pub const MAX_STR_ARGS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrType {
    Osc,
    Dcs,
    Apc,
    Pm,
    /// `ESC k`, old title-set compatibility.
    SetTitle,
}

impl StrType {
    pub fn from_intro(byte: char) -> Option<Self> {
        Some(match byte {
            ']' => Self::Osc,
            'P' => Self::Dcs,
            '_' => Self::Apc,
            '^' => Self::Pm,
            'k' => Self::SetTitle,
            _ => return None,
        })
    }

    pub fn from_c1(rune: char) -> Option<Self> {
        Some(match rune as u32 {
            0x90 => Self::Dcs,
            0x9d => Self::Osc,
            0x9e => Self::Pm,
            0x9f => Self::Apc,
            _ => return None,
        })
    }
}

/// Accumulator for the body of a string escape sequence.
#[derive(Debug)]
pub struct StrEscape {
    typ: Option<StrType>,
    buf: String,
    overflowed: bool,
}

impl Default for StrEscape {
    fn default() -> Self {
        Self {
            typ: None,
            buf: String::new(),
            overflowed: false,
        }
    }
}

impl StrEscape {
    pub fn start(&mut self, typ: StrType) {
        self.typ = Some(typ);
        self.buf.clear();
        self.buf.reserve(128 * codec::UTF_SIZE);
        self.overflowed = false;
    }

    pub fn typ(&self) -> Option<StrType> {
        self.typ
    }

    pub fn put(&mut self, rune: char) {
        if self.buf.len() + rune.len_utf8() > STR_BUF_LIMIT {
            if !self.overflowed {
                tracing::warn!("string sequence exceeds {STR_BUF_LIMIT} bytes, discarding input");
                self.overflowed = true;
            }
            return;
        }
        self.buf.push(rune);
    }

    pub fn buf_len(&self) -> usize {
        self.buf.len()
    }

    pub fn args(&self) -> Vec<&str> {
        if self.buf.is_empty() {
            return Vec::new();
        }
        self.buf.splitn(MAX_STR_ARGS, ';').collect()
    }

    fn dump(&self) -> String {
        let mut out = String::from("ESC");
        if let Some(typ) = self.typ {
            out.push(match typ {
                StrType::Osc => ']',
                StrType::Dcs => 'P',
                StrType::Apc => '_',
                StrType::Pm => '^',
                StrType::SetTitle => 'k',
            });
        }
        for c in self.buf.chars().take(64) {
            match c {
                '\n' => out.push_str("(\\n)"),
                '\r' => out.push_str("(\\r)"),
                '\x1b' => out.push_str("(\\e)"),
                c if !c.is_control() => out.push(c),
                c => out.push_str(&format!("({:02x})", c as u32)),
            }
        }
        out
    }
}

/// Process a completed string sequence.
pub(crate) fn dispatch_str(term: &mut Term, seq: StrEscape) {
    let Some(typ) = seq.typ() else {
        return;
    };

    match typ {
        StrType::Osc => dispatch_osc(term, &seq),
        StrType::SetTitle => {
            let args = seq.args();
            let title = args.first().copied().unwrap_or("");
            term.push_event(TermEvent::SetTitle(Some(title.to_string())));
        }
        // device control strings and application/privacy messages are
        // collected for protocol robustness but not acted upon
        StrType::Dcs | StrType::Apc | StrType::Pm => {
            tracing::debug!("ignoring string sequence: {}", seq.dump());
        }
    }
}

fn dispatch_osc(term: &mut Term, seq: &StrEscape) {
    let args = seq.args();
    let code: i64 = args
        .first()
        .and_then(|a| a.parse().ok())
        .unwrap_or(0);

    match code {
        0 => {
            if let Some(&title) = args.get(1) {
                term.push_event(TermEvent::SetTitle(Some(title.to_string())));
                term.push_event(TermEvent::SetIconTitle(Some(title.to_string())));
            }
        }
        1 => {
            if let Some(&title) = args.get(1) {
                term.push_event(TermEvent::SetIconTitle(Some(title.to_string())));
            }
        }
        2 => {
            if let Some(&title) = args.get(1) {
                term.push_event(TermEvent::SetTitle(Some(title.to_string())));
            }
        }
        4 => {
            // OSC 4 ; index ; spec
            let (Some(&idx_str), Some(&spec)) = (args.get(1), args.get(2)) else {
                tracing::warn!("osc 4: missing arguments: {}", seq.dump());
                return;
            };
            let Ok(index) = idx_str.parse::<u16>() else {
                tracing::warn!("osc 4: bad color index: {}", seq.dump());
                return;
            };
            if spec == "?" {
                osc4_color_response(term, index);
            } else {
                set_palette_color(term, index, spec);
            }
        }
        10 | 11 | 12 => {
            let Some(&spec) = args.get(1) else {
                tracing::warn!("osc {code}: missing color argument");
                return;
            };
            let index = match code {
                10 => 258, // default foreground
                11 => 259, // default background
                _ => 256,  // default cursor
            };
            if spec == "?" {
                osc_default_color_response(term, index, code as i32);
            } else {
                set_palette_color(term, index, spec);
            }
        }
        52 => {
            if args.len() > 2 && term.allow_window_ops() {
                let payload = args[2];
                if payload == "?" {
                    tracing::debug!("osc 52: clipboard query not supported");
                    return;
                }
                match codec::base64_decode(payload) {
                    Some(decoded) => {
                        let text = String::from_utf8_lossy(&decoded).into_owned();
                        term.push_event(TermEvent::ClipboardSet(text));
                    }
                    None => tracing::warn!("osc 52: invalid base64"),
                }
            }
        }
        104 => {
            // palette reset, optionally for a single index
            match args.get(1).and_then(|a| a.parse::<u16>().ok()) {
                Some(index) => term.palette_mut().reset(index),
                None => term.palette_mut().reset_all(),
            }
            term.push_event(TermEvent::ColorsChanged);
            term.set_all_dirty();
        }
        _ => tracing::warn!("unknown osc: {}", seq.dump()),
    }
}

fn set_palette_color(term: &mut Term, index: u16, spec: &str) {
    match glyph::parse_color_spec(spec) {
        Some(rgb) => {
            term.palette_mut().set(index, rgb);
            term.push_event(TermEvent::ColorsChanged);
            term.set_all_dirty();
        }
        None => tracing::warn!("invalid color spec for index {index}: {spec:?}"),
    }
}

/// Answer an `OSC 4 ; N ; ?` palette query.
fn osc4_color_response(term: &mut Term, index: u16) {
    let Some((r, g, b)) = term.palette().resolve(Color::Indexed(index)) else {
        tracing::warn!("failed to fetch osc4 color {index}");
        return;
    };

    let reply =
        format!("\x1b]4;{index};rgb:{r:02x}{r:02x}/{g:02x}{g:02x}/{b:02x}{b:02x}\x07");
    term.queue_response(reply.into_bytes());
}

/// Answer an `OSC 10/11/12 ; ?` default color query.
fn osc_default_color_response(term: &mut Term, index: u16, code: i32) {
    let Some((r, g, b)) = term.palette().resolve(Color::Indexed(index)) else {
        tracing::warn!("failed to fetch osc color {index}");
        return;
    };

    let reply =
        format!("\x1b]{code};rgb:{r:02x}{r:02x}/{g:02x}{g:02x}/{b:02x}{b:02x}\x07");
    term.queue_response(reply.into_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intro_bytes_map_to_types() {
        assert_eq!(StrType::from_intro(']'), Some(StrType::Osc));
        assert_eq!(StrType::from_intro('P'), Some(StrType::Dcs));
        assert_eq!(StrType::from_intro('k'), Some(StrType::SetTitle));
        assert_eq!(StrType::from_intro('x'), None);
        assert_eq!(StrType::from_c1('\u{9d}'), Some(StrType::Osc));
    }

    #[test]
    fn argument_splitting() {
        let mut seq = StrEscape::default();
        seq.start(StrType::Osc);
        for c in "52;c;aGVsbG8=".chars() {
            seq.put(c);
        }
        assert_eq!(seq.args(), vec!["52", "c", "aGVsbG8="]);
    }

    #[test]
    fn buffer_is_bounded() {
        let mut seq = StrEscape::default();
        seq.start(StrType::Osc);
        for _ in 0..STR_BUF_LIMIT + 4096 {
            seq.put('x');
        }
        assert!(seq.buf_len() <= STR_BUF_LIMIT);
    }
}
