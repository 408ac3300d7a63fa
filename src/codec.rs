//! UTF-8 and base64 codecs plus control-character classification.
//!
//! The decoder works incrementally on the raw pty read buffer: it never
//! consumes an incomplete trailing sequence (the caller keeps those bytes for
//! the next read) and it degrades malformed input to U+FFFD one byte at a
//! time so the stream always advances.

use base64::engine::general_purpose::STANDARD_NO_PAD as BASE64;
use base64::Engine as _;
use unicode_width::UnicodeWidthChar;

/// Maximum number of bytes in one UTF-8 encoded scalar.
pub const UTF_SIZE: usize = 4;

pub const REPLACEMENT: char = '\u{FFFD}';

/// Decode one scalar from the front of `bytes`.
///
/// Returns `(rune, consumed)`. `consumed == 0` means the buffer ends in the
/// middle of a sequence and the caller should retain the remainder. Illegal
/// leads, illegal continuations, overlong encodings and surrogates yield
/// `(U+FFFD, 1)`.
pub fn decode(bytes: &[u8]) -> (char, usize) {
    let Some(&lead) = bytes.first() else {
        return (REPLACEMENT, 0);
    };

    let (len, mut acc) = match lead {
        0x00..=0x7f => return (lead as char, 1),
        0xc0..=0xdf => (2, (lead & 0x1f) as u32),
        0xe0..=0xef => (3, (lead & 0x0f) as u32),
        0xf0..=0xf7 => (4, (lead & 0x07) as u32),
        // stray continuation byte or invalid lead
        _ => return (REPLACEMENT, 1),
    };

    if bytes.len() < len {
        return (REPLACEMENT, 0);
    }

    for &b in &bytes[1..len] {
        if b & 0xc0 != 0x80 {
            return (REPLACEMENT, 1);
        }
        acc = (acc << 6) | (b & 0x3f) as u32;
    }

    // reject overlong forms and anything outside the scalar value range
    const MIN: [u32; 5] = [0, 0, 0x80, 0x800, 0x10000];
    if acc < MIN[len] || acc > 0x10ffff || (0xd800..=0xdfff).contains(&acc) {
        return (REPLACEMENT, 1);
    }

    match char::from_u32(acc) {
        Some(c) => (c, len),
        None => (REPLACEMENT, 1),
    }
}

/// Encode `rune` into `out`, returning the number of bytes written.
pub fn encode(rune: char, out: &mut [u8; UTF_SIZE]) -> usize {
    rune.encode_utf8(out).len()
}

/// Append the UTF-8 encoding of `rune` to `s`.
pub fn encode_to(rune: char, s: &mut String) {
    s.push(rune);
}

/// Display width of a rune in terminal cells: 0, 1 or 2.
///
/// Control characters report width 1 by contract; they are never printed
/// directly but the write path needs a non-zero width for them.
pub fn display_width(rune: char) -> usize {
    UnicodeWidthChar::width(rune).unwrap_or(1)
}

pub fn is_control_c0(rune: char) -> bool {
    (rune as u32) < 0x20 || rune as u32 == 0x7f
}

pub fn is_control_c1(rune: char) -> bool {
    (0x80..=0x9f).contains(&(rune as u32))
}

pub fn is_control(rune: char) -> bool {
    is_control_c0(rune) || is_control_c1(rune)
}

/// Decode the base64 payload of an OSC 52 sequence.
///
/// Tolerant per xterm practice: non-printable bytes are skipped and the
/// first `=` padding character terminates the input.
pub fn base64_decode(input: &str) -> Option<Vec<u8>> {
    let mut filtered = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch == '=' {
            break;
        }
        if ch.is_ascii_graphic() {
            filtered.push(ch);
        }
    }

    BASE64.decode(filtered.as_bytes()).ok()
}

/// A rune bundled with the information the terminal write path needs:
/// its encoded byte form, display width and control classification.
#[derive(Debug, Clone, Copy)]
pub struct RuneInfo {
    rune: char,
    width: usize,
    encoded: [u8; UTF_SIZE],
    enc_len: usize,
    control: bool,
}

impl RuneInfo {
    pub fn new(rune: char, use_utf8: bool) -> Self {
        let mut encoded = [0u8; UTF_SIZE];
        let enc_len = if use_utf8 || (rune as u32) < 0x80 {
            encode(rune, &mut encoded)
        } else {
            // in legacy 8-bit mode the rune is the raw input byte
            encoded[0] = rune as u32 as u8;
            1
        };

        Self {
            rune,
            width: display_width(rune),
            encoded,
            enc_len,
            control: is_control(rune),
        }
    }

    pub fn rune(&self) -> char {
        self.rune
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_wide(&self) -> bool {
        self.width == 2
    }

    pub fn is_control(&self) -> bool {
        self.control
    }

    pub fn encoded(&self) -> &[u8] {
        &self.encoded[..self.enc_len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_ascii_and_multibyte() {
        assert_eq!(decode(b"A"), ('A', 1));
        assert_eq!(decode("é".as_bytes()), ('é', 2));
        assert_eq!(decode("─".as_bytes()), ('─', 3));
        assert_eq!(decode("😀".as_bytes()), ('😀', 4));
    }

    #[test]
    fn decode_incomplete_returns_zero_consumed() {
        assert_eq!(decode(b""), (REPLACEMENT, 0));
        // first byte of a 4-byte emoji
        assert_eq!(decode(&[0xf0]), (REPLACEMENT, 0));
        assert_eq!(decode(&[0xf0, 0x9f, 0x98]), (REPLACEMENT, 0));
    }

    #[test]
    fn decode_malformed_consumes_one_byte() {
        // stray continuation byte
        assert_eq!(decode(&[0x9d, b'x']), (REPLACEMENT, 1));
        // invalid lead
        assert_eq!(decode(&[0xff, b'x']), (REPLACEMENT, 1));
        // bad continuation
        assert_eq!(decode(&[0xc3, b'x']), (REPLACEMENT, 1));
        // overlong NUL
        assert_eq!(decode(&[0xc0, 0x80]), (REPLACEMENT, 1));
        // surrogate D800
        assert_eq!(decode(&[0xed, 0xa0, 0x80]), (REPLACEMENT, 1));
    }

    #[test]
    fn round_trip_holds_for_valid_scalars() {
        let mut buf = [0u8; UTF_SIZE];
        for rune in ['\0', 'A', '~', '\u{7f}', 'ß', 'ࠀ', '─', '日', '\u{fffd}', '😀', '\u{10ffff}'] {
            let n = encode(rune, &mut buf);
            assert_eq!(decode(&buf[..n]), (rune, n), "rune {:?}", rune);
        }
    }

    #[test]
    fn width_classification() {
        assert_eq!(display_width('a'), 1);
        assert_eq!(display_width('日'), 2);
        // combining acute accent
        assert_eq!(display_width('\u{0301}'), 0);
        // control chars have width 1 by contract
        assert_eq!(display_width('\x07'), 1);
    }

    #[test]
    fn control_classes() {
        assert!(is_control_c0('\x00'));
        assert!(is_control_c0('\x1f'));
        assert!(is_control_c0('\x7f'));
        assert!(!is_control_c0(' '));
        assert!(is_control_c1('\u{80}'));
        assert!(is_control_c1('\u{9f}'));
        assert!(!is_control_c1('\u{a0}'));
    }

    #[test]
    fn base64_accepts_padding_and_junk() {
        assert_eq!(base64_decode("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(base64_decode("aGVs\nbG8=").unwrap(), b"hello");
        // stops at the first padding char
        assert_eq!(base64_decode("aGVsbG8=garbage").unwrap(), b"hello");
        assert!(base64_decode("a").is_none());
    }

    #[test]
    fn rune_info_legacy_mode_keeps_raw_byte() {
        let info = RuneInfo::new('\u{e4}', false);
        assert_eq!(info.encoded(), &[0xe4]);
        let info = RuneInfo::new('\u{e4}', true);
        assert_eq!(info.encoded(), "ä".as_bytes());
    }
}
