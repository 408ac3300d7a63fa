use bitflags::bitflags;

bitflags! {
    /// Per-cell attributes, including the structural WRAP/WIDE/DUMMY markers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Attr: u16 {
        const BOLD      = 1 << 0;
        const FAINT     = 1 << 1;
        const ITALIC    = 1 << 2;
        const UNDERLINE = 1 << 3;
        const BLINK     = 1 << 4;
        const REVERSE   = 1 << 5;
        const INVISIBLE = 1 << 6;
        const STRUCK    = 1 << 7;
        /// Line wrapped at this cell (only meaningful on the last column).
        const WRAP      = 1 << 8;
        /// This cell holds a two-column character.
        const WIDE      = 1 << 9;
        /// Trailing placeholder of a WIDE cell.
        const DUMMY     = 1 << 10;
    }
}

impl Attr {
    /// The attributes SGR 0 resets; the structural flags stay untouched.
    pub const RENDITION: Attr = Attr::BOLD
        .union(Attr::FAINT)
        .union(Attr::ITALIC)
        .union(Attr::UNDERLINE)
        .union(Attr::BLINK)
        .union(Attr::REVERSE)
        .union(Attr::INVISIBLE)
        .union(Attr::STRUCK);
}

/// A palette index or a 24-bit true color.
///
/// Palette layout: 0-15 basic colors, 16-231 the 6×6×6 cube, 232-255
/// greyscale, 256-259 the default cursor / reverse-cursor / foreground /
/// background slots, 260 and up theme extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Indexed(u16),
    Rgb(u8, u8, u8),
}

pub const DEFAULT_CURSOR: Color = Color::Indexed(256);
pub const DEFAULT_REVERSE_CURSOR: Color = Color::Indexed(257);
pub const DEFAULT_FG: Color = Color::Indexed(258);
pub const DEFAULT_BG: Color = Color::Indexed(259);

/// One screen cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    pub rune: char,
    pub attrs: Attr,
    pub fg: Color,
    pub bg: Color,
}

impl Default for Glyph {
    fn default() -> Self {
        Self {
            rune: '\0',
            attrs: Attr::empty(),
            fg: DEFAULT_FG,
            bg: DEFAULT_BG,
        }
    }
}

impl Glyph {
    /// Reset the cell to empty, taking colors from the cursor template so
    /// erased regions keep the active background.
    pub fn clear(&mut self, template: &Glyph) {
        self.rune = '\0';
        self.attrs = Attr::empty();
        self.fg = template.fg;
        self.bg = template.bg;
    }

    /// An occupied cell for the purpose of trailing-space trimming.
    pub fn has_value(&self) -> bool {
        self.rune != '\0'
    }

    pub fn is_wide(&self) -> bool {
        self.attrs.contains(Attr::WIDE)
    }

    pub fn is_dummy(&self) -> bool {
        self.attrs.contains(Attr::DUMMY)
    }

    pub fn is_blinking(&self) -> bool {
        self.attrs.contains(Attr::BLINK)
    }

    /// Displayable rune; empty cells render as blanks.
    pub fn display_rune(&self) -> char {
        if self.rune == '\0' {
            ' '
        } else {
            self.rune
        }
    }
}

/// Runtime color palette: computed defaults plus OSC 4 overrides.
#[derive(Debug, Default)]
pub struct Palette {
    overrides: std::collections::HashMap<u16, (u8, u8, u8)>,
}

impl Palette {
    pub fn rgb(&self, index: u16) -> Option<(u8, u8, u8)> {
        if let Some(&rgb) = self.overrides.get(&index) {
            return Some(rgb);
        }
        default_rgb(index)
    }

    pub fn resolve(&self, color: Color) -> Option<(u8, u8, u8)> {
        match color {
            Color::Rgb(r, g, b) => Some((r, g, b)),
            Color::Indexed(i) => self.rgb(i),
        }
    }

    pub fn set(&mut self, index: u16, rgb: (u8, u8, u8)) {
        self.overrides.insert(index, rgb);
    }

    pub fn reset(&mut self, index: u16) {
        self.overrides.remove(&index);
    }

    pub fn reset_all(&mut self) {
        self.overrides.clear();
    }
}

/// Built-in palette values.
///
/// The basic 16 follow the classic X11 names st configures; 256-259 are the
/// default cursor/reverse-cursor/foreground/background slots.
pub fn default_rgb(index: u16) -> Option<(u8, u8, u8)> {
    const BASIC: [(u8, u8, u8); 16] = [
        (0x00, 0x00, 0x00), // black
        (0xcd, 0x00, 0x00), // red3
        (0x00, 0xcd, 0x00), // green3
        (0xcd, 0xcd, 0x00), // yellow3
        (0x00, 0x00, 0xee), // blue2
        (0xcd, 0x00, 0xcd), // magenta3
        (0x00, 0xcd, 0xcd), // cyan3
        (0xe5, 0xe5, 0xe5), // gray90
        (0x7f, 0x7f, 0x7f), // gray50
        (0xff, 0x00, 0x00), // red
        (0x00, 0xff, 0x00), // green
        (0xff, 0xff, 0x00), // yellow
        (0x5c, 0x5c, 0xff),
        (0xff, 0x00, 0xff), // magenta
        (0x00, 0xff, 0xff), // cyan
        (0xff, 0xff, 0xff), // white
    ];

    match index {
        0..=15 => Some(BASIC[index as usize]),
        16..=231 => {
            let idx = index - 16;
            let level = |v: u16| if v == 0 { 0 } else { (55 + 40 * v) as u8 };
            Some((level(idx / 36), level((idx % 36) / 6), level(idx % 6)))
        }
        232..=255 => {
            let v = (8 + 10 * (index - 232)) as u8;
            Some((v, v, v))
        }
        256 => Some((0xcc, 0xcc, 0xcc)), // default cursor
        257 => Some((0x55, 0x55, 0x55)), // default reverse cursor
        258 => Some((0xe5, 0xe5, 0xe5)), // default foreground
        259 => Some((0x00, 0x00, 0x00)), // default background
        _ => None,
    }
}

/// Parse an OSC color specification: `#rrggbb`, `rgb:rr/gg/bb` or
/// `rgb:rrrr/gggg/bbbb`.
pub fn parse_color_spec(spec: &str) -> Option<(u8, u8, u8)> {
    if let Some(hex) = spec.strip_prefix('#') {
        if hex.len() != 6 {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        return Some((r, g, b));
    }

    if let Some(body) = spec.strip_prefix("rgb:") {
        let mut out = [0u8; 3];
        let mut parts = body.split('/');
        for slot in &mut out {
            let part = parts.next()?;
            let raw = u16::from_str_radix(part, 16).ok()?;
            *slot = match part.len() {
                1 => (raw * 0x11) as u8,
                2 => raw as u8,
                4 => (raw >> 8) as u8,
                _ => return None,
            };
        }
        if parts.next().is_some() {
            return None;
        }
        return Some((out[0], out[1], out[2]));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_and_greyscale_values() {
        assert_eq!(default_rgb(16), Some((0, 0, 0)));
        assert_eq!(default_rgb(231), Some((255, 255, 255)));
        assert_eq!(default_rgb(232), Some((8, 8, 8)));
        assert_eq!(default_rgb(255), Some((238, 238, 238)));
        assert_eq!(default_rgb(196), Some((255, 0, 0)));
    }

    #[test]
    fn palette_overrides_and_reset() {
        let mut palette = Palette::default();
        assert_eq!(palette.rgb(1), Some((0xcd, 0, 0)));
        palette.set(1, (1, 2, 3));
        assert_eq!(palette.rgb(1), Some((1, 2, 3)));
        palette.reset_all();
        assert_eq!(palette.rgb(1), Some((0xcd, 0, 0)));
    }

    #[test]
    fn color_spec_forms() {
        assert_eq!(parse_color_spec("#ff8000"), Some((0xff, 0x80, 0x00)));
        assert_eq!(parse_color_spec("rgb:ff/80/00"), Some((0xff, 0x80, 0x00)));
        assert_eq!(parse_color_spec("rgb:ffff/8000/0000"), Some((0xff, 0x80, 0x00)));
        assert_eq!(parse_color_spec("red"), None);
        assert_eq!(parse_color_spec("#ff80"), None);
    }

    #[test]
    fn cleared_glyph_keeps_template_background() {
        let template = Glyph {
            bg: Color::Indexed(4),
            ..Default::default()
        };
        let mut g = Glyph {
            rune: 'x',
            attrs: Attr::BOLD | Attr::WIDE,
            fg: Color::Rgb(1, 2, 3),
            bg: Color::Indexed(2),
        };
        g.clear(&template);
        assert!(!g.has_value());
        assert_eq!(g.bg, Color::Indexed(4));
        assert_eq!(g.attrs, Attr::empty());
    }
}
