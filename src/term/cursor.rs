use bitflags::bitflags;

use super::glyph::{Attr, Glyph, DEFAULT_BG, DEFAULT_FG};
use super::CharPos;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CursorFlags: u8 {
        /// The next printable input wraps to the following line first.
        const WRAPNEXT = 1 << 0;
        /// Cursor addressing is relative to the scroll area (DECOM).
        const ORIGIN   = 1 << 1;
    }
}

/// Configurable cursor shapes, addressable through DECSCUSR 0..8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorStyle {
    BlinkingBlock = 0,
    BlinkingBlockDefault = 1,
    #[default]
    SteadyBlock = 2,
    ReverseBlock = 3,
    BlinkingUnderline = 4,
    SteadyUnderline = 5,
    BlinkingBar = 6,
    SteadyBar = 7,
    Snowman = 8,
}

impl CursorStyle {
    pub fn from_decscusr(param: i64) -> Option<Self> {
        Some(match param {
            0 => Self::BlinkingBlock,
            1 => Self::BlinkingBlockDefault,
            2 => Self::SteadyBlock,
            3 => Self::ReverseBlock,
            4 => Self::BlinkingUnderline,
            5 => Self::SteadyUnderline,
            6 => Self::BlinkingBar,
            7 => Self::SteadyBar,
            8 => Self::Snowman,
            _ => return None,
        })
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "blinking-block" => Self::BlinkingBlock,
            "block" | "steady-block" => Self::SteadyBlock,
            "reverse-block" => Self::ReverseBlock,
            "blinking-underline" => Self::BlinkingUnderline,
            "underline" | "steady-underline" => Self::SteadyUnderline,
            "blinking-bar" => Self::BlinkingBar,
            "bar" | "steady-bar" => Self::SteadyBar,
            "snowman" => Self::Snowman,
            _ => return None,
        })
    }

    pub fn is_blinking(self) -> bool {
        matches!(
            self,
            Self::BlinkingBlock
                | Self::BlinkingBlockDefault
                | Self::BlinkingUnderline
                | Self::BlinkingBar
        )
    }
}

/// The cursor: position, the glyph template applied to newly written cells,
/// and the WRAPNEXT/ORIGIN state flags.
#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    pub pos: CharPos,
    template: Glyph,
    flags: CursorFlags,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            pos: CharPos::default(),
            template: Glyph {
                rune: ' ',
                attrs: Attr::empty(),
                fg: DEFAULT_FG,
                bg: DEFAULT_BG,
            },
            flags: CursorFlags::empty(),
        }
    }
}

impl Cursor {
    pub fn attrs(&self) -> &Glyph {
        &self.template
    }

    pub fn attrs_mut(&mut self) -> &mut Glyph {
        &mut self.template
    }

    /// Reset rendition attributes and colors (SGR 0).
    pub fn reset_attrs(&mut self) {
        self.template.attrs.remove(Attr::RENDITION);
        self.template.fg = DEFAULT_FG;
        self.template.bg = DEFAULT_BG;
    }

    /// The glyph used to initialize new or cleared cells: no rune, current
    /// colors.
    pub fn fill_glyph(&self) -> Glyph {
        Glyph {
            rune: '\0',
            attrs: Attr::empty(),
            fg: self.template.fg,
            bg: self.template.bg,
        }
    }

    pub fn wrap_next(&self) -> bool {
        self.flags.contains(CursorFlags::WRAPNEXT)
    }

    pub fn set_wrap_next(&mut self, on: bool) {
        self.flags.set(CursorFlags::WRAPNEXT, on);
    }

    pub fn use_origin(&self) -> bool {
        self.flags.contains(CursorFlags::ORIGIN)
    }

    pub fn set_use_origin(&mut self, on: bool) {
        self.flags.set(CursorFlags::ORIGIN, on);
    }
}
