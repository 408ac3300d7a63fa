//! The terminal: applies decoded input to the screen model.
//!
//! `Term` owns the active and saved screens, the cursor, scroll area, tab
//! stops, charset mappings and the escape parser state. Side effects that
//! leave the terminal (device replies, window operations) are queued and
//! drained by the event loop; nothing here calls back into its owner.

pub mod cursor;
pub mod glyph;
pub mod line;
pub mod screen;

use std::fs::File;
use std::io::Write as _;

use bitflags::bitflags;

use crate::codec::{self, RuneInfo};
use crate::config::Config;
use crate::error::Result;
use crate::parser::{self, Escape};
use crate::selection::{Context as SelContext, Selection, Snap};

pub use cursor::{Cursor, CursorStyle};
pub use glyph::{Attr, Color, Glyph, Palette};
pub use line::Line;
pub use screen::Screen;

/// A character cell position, `x` being the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharPos {
    pub x: i32,
    pub y: i32,
}

impl CharPos {
    pub fn next_col(self, n: i32) -> Self {
        Self { x: self.x + n, ..self }
    }

    pub fn prev_col(self, n: i32) -> Self {
        Self { x: self.x - n, ..self }
    }

    pub fn next_line(self, n: i32) -> Self {
        Self { y: self.y + n, ..self }
    }

    pub fn prev_line(self, n: i32) -> Self {
        Self { y: self.y - n, ..self }
    }

    pub fn start_of_line(self) -> Self {
        Self { x: 0, ..self }
    }
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TermSize {
    pub cols: i32,
    pub rows: i32,
}

impl TermSize {
    pub fn is_valid(self) -> bool {
        self.cols >= 1 && self.rows >= 1
    }
}

/// An inclusive span of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineSpan {
    pub top: i32,
    pub bottom: i32,
}

impl LineSpan {
    pub fn contains(self, y: i32) -> bool {
        self.top <= y && y <= self.bottom
    }

    pub fn sanitize(&mut self) {
        if self.top > self.bottom {
            std::mem::swap(&mut self.top, &mut self.bottom);
        }
    }
}

/// A range of cell positions with inclusive ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub begin: CharPos,
    pub end: CharPos,
}

impl Range {
    pub const INVALID: Range = Range {
        begin: CharPos { x: -1, y: 0 },
        end: CharPos { x: -1, y: 0 },
    };

    pub fn is_valid(&self) -> bool {
        self.begin.x != -1
    }

    pub fn sanitize(&mut self) {
        if self.begin.x > self.end.x {
            std::mem::swap(&mut self.begin.x, &mut self.end.x);
        }
        if self.begin.y > self.end.y {
            std::mem::swap(&mut self.begin.y, &mut self.end.y);
        }
    }

    pub fn clamp(&mut self, max: CharPos) {
        self.begin.x = self.begin.x.clamp(0, max.x);
        self.begin.y = self.begin.y.clamp(0, max.y);
        self.end.x = self.end.x.clamp(0, max.x);
        self.end.y = self.end.y.clamp(0, max.y);
    }
}

bitflags! {
    /// Terminal-level mode flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TermMode: u8 {
        const WRAP      = 1 << 0;
        const INSERT    = 1 << 1;
        const ALTSCREEN = 1 << 2;
        const CRLF      = 1 << 3;
        const ECHO      = 1 << 4;
        const PRINT     = 1 << 5;
        const UTF8      = 1 << 6;
    }
}

bitflags! {
    /// Window-level modes; the terminal tracks them and reports changes to
    /// the event loop, which forwards them to renderer and input handling.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WinMode: u32 {
        const VISIBLE     = 1 << 0;
        const FOCUSED     = 1 << 1;
        const APPKEYPAD   = 1 << 2;
        const MOUSEBTN    = 1 << 3;
        const MOUSEMOTION = 1 << 4;
        const REVERSE     = 1 << 5;
        const KBDLOCK     = 1 << 6;
        const HIDE_CURSOR = 1 << 7;
        const APPCURSOR   = 1 << 8;
        const MOUSE_SGR   = 1 << 9;
        const EIGHT_BIT   = 1 << 10;
        const BLINK       = 1 << 11;
        const FOCUS       = 1 << 12;
        const MOUSEX10    = 1 << 13;
        const MOUSEMANY   = 1 << 14;
        const BRKT_PASTE  = 1 << 15;
        const NUMLOCK     = 1 << 16;
        const MOUSE = Self::MOUSEBTN.bits()
            | Self::MOUSEMOTION.bits()
            | Self::MOUSEX10.bits()
            | Self::MOUSEMANY.bits();
    }
}

/// Character set mappings selectable into the G0..G3 slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Usa,
    /// DEC special graphics (VT100 line drawing).
    Graphic0,
}

/// Window-facing side effects, drained by the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TermEvent {
    /// None restores the default title.
    SetTitle(Option<String>),
    SetIconTitle(Option<String>),
    Bell,
    /// OSC 52 wrote the clipboard.
    ClipboardSet(String),
    /// Palette or default colors changed.
    ColorsChanged,
    WinModeChanged(WinMode),
    CursorStyleChanged(CursorStyle),
}

/// Cursor save/load selector (DECSC/DECRC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorControl {
    Save,
    Load,
}

/// The pull interface a renderer implements; spans are contiguous runs of
/// cells within one row.
pub trait Renderer {
    fn can_draw(&self) -> bool;
    fn draw_glyphs(&mut self, glyphs: &[Glyph], origin: CharPos);
    fn draw_cursor(&mut self, pos: CharPos, glyph: &Glyph);
    fn clear_cursor(&mut self, pos: CharPos, glyph: &Glyph);
    fn finish_draw(&mut self);
    fn set_input_spot(&mut self, pos: CharPos);
    fn set_clipboard(&mut self, _text: &str) {}
}

pub struct Term {
    screen: Screen,
    saved_screen: Screen,
    pub(crate) cursor: Cursor,
    size: TermSize,
    scroll_area: LineSpan,
    tabs: Vec<bool>,
    mode: TermMode,
    win_mode: WinMode,
    charsets: [Charset; 4],
    active_charset: usize,
    /// Last printable rune, for REP. NUL means none.
    last_char: char,
    last_cursor_pos: CharPos,
    cursor_style: CursorStyle,
    pub(crate) esc: Escape,
    pub(crate) selection: Selection,
    palette: Palette,
    allow_altscreen: bool,
    keep_scroll_position: bool,
    allow_window_ops: bool,
    vt_ident: Vec<u8>,
    print_file: Option<File>,
    pending_responses: Vec<Vec<u8>>,
    pending_events: Vec<TermEvent>,
}

const TABSPACES: i32 = 8;

impl Term {
    pub fn new(config: &Config) -> Result<Self> {
        let mut term = Self {
            screen: Screen::new(config.history_len, false),
            saved_screen: Screen::new(0, true),
            cursor: Cursor::default(),
            size: TermSize::default(),
            scroll_area: LineSpan::default(),
            tabs: Vec::new(),
            mode: TermMode::empty(),
            win_mode: WinMode::VISIBLE,
            charsets: [Charset::Usa; 4],
            active_charset: 0,
            last_char: '\0',
            last_cursor_pos: CharPos::default(),
            cursor_style: config.cursor_shape,
            esc: Escape::default(),
            selection: Selection::new(&config.word_delimiters),
            palette: Palette::default(),
            allow_altscreen: config.allow_altscreen,
            keep_scroll_position: config.keep_scroll_position,
            allow_window_ops: config.allow_window_ops,
            vt_ident: config.vt_ident.clone().into_bytes(),
            print_file: None,
            pending_responses: Vec::new(),
            pending_events: Vec::new(),
        };

        term.resize(TermSize {
            cols: config.cols as i32,
            rows: config.rows as i32,
        })?;
        term.reset();
        Ok(term)
    }

    // ---- accessors ----------------------------------------------------

    pub fn size(&self) -> TermSize {
        self.size
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn screen_mut(&mut self) -> &mut Screen {
        &mut self.screen
    }

    pub fn mode(&self) -> TermMode {
        self.mode
    }

    pub fn win_mode(&self) -> WinMode {
        self.win_mode
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn cursor_pos(&self) -> CharPos {
        self.cursor.pos
    }

    pub fn cursor_style(&self) -> CursorStyle {
        self.cursor_style
    }

    pub fn cursor_attrs_mut(&mut self) -> &mut Glyph {
        self.cursor.attrs_mut()
    }

    pub fn on_alt_screen(&self) -> bool {
        self.mode.contains(TermMode::ALTSCREEN)
    }

    pub fn allow_window_ops(&self) -> bool {
        self.allow_window_ops
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn palette_mut(&mut self) -> &mut Palette {
        &mut self.palette
    }

    pub fn set_print_file(&mut self, file: File) {
        self.print_file = Some(file);
        self.mode.insert(TermMode::PRINT);
    }

    fn top_left(&self) -> CharPos {
        CharPos::default()
    }

    fn bottom_right(&self) -> CharPos {
        CharPos {
            x: self.size.cols - 1,
            y: self.size.rows - 1,
        }
    }

    fn at_end_of_line(&self, pos: CharPos) -> CharPos {
        CharPos {
            x: self.size.cols - 1,
            y: pos.y,
        }
    }

    fn line_space_left(&self) -> i32 {
        self.size.cols - self.cursor.pos.x
    }

    pub fn scroll_area(&self) -> LineSpan {
        self.scroll_area
    }

    // ---- event and response queues ------------------------------------

    pub(crate) fn queue_response(&mut self, bytes: Vec<u8>) {
        self.pending_responses.push(bytes);
    }

    pub(crate) fn push_event(&mut self, event: TermEvent) {
        self.pending_events.push(event);
    }

    /// Bytes the event loop must write back to the pty.
    pub fn take_pending_responses(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.pending_responses)
    }

    /// Window operations the event loop must apply.
    pub fn take_pending_events(&mut self) -> Vec<TermEvent> {
        std::mem::take(&mut self.pending_events)
    }

    // ---- mode handling ------------------------------------------------

    pub(crate) fn set_mode_flag(&mut self, flag: TermMode, on: bool) {
        self.mode.set(flag, on);
    }

    pub fn set_win_mode(&mut self, flag: WinMode, on: bool) {
        let old = self.win_mode;
        self.win_mode.set(flag, on);
        if self.win_mode != old {
            let mode = self.win_mode;
            self.push_event(TermEvent::WinModeChanged(mode));
        }
    }

    pub(crate) fn clear_win_mode(&mut self, mask: WinMode) {
        let old = self.win_mode;
        self.win_mode.remove(mask);
        if self.win_mode != old {
            let mode = self.win_mode;
            self.push_event(TermEvent::WinModeChanged(mode));
        }
    }

    pub(crate) fn set_cursor_origin(&mut self, on: bool) {
        self.cursor.set_use_origin(on);
    }

    pub(crate) fn set_cursor_style(&mut self, style: CursorStyle) {
        self.cursor_style = style;
        self.push_event(TermEvent::CursorStyleChanged(style));
    }

    /// Mode `?12`: switch between the blinking and steady variant of the
    /// current cursor shape.
    pub(crate) fn set_cursor_blink(&mut self, blink: bool) {
        use CursorStyle::*;
        let style = match (self.cursor_style, blink) {
            (SteadyBlock, true) => BlinkingBlock,
            (BlinkingBlock | BlinkingBlockDefault, false) => SteadyBlock,
            (SteadyUnderline, true) => BlinkingUnderline,
            (BlinkingUnderline, false) => SteadyUnderline,
            (SteadyBar, true) => BlinkingBar,
            (BlinkingBar, false) => SteadyBar,
            (style, _) => style,
        };
        if style != self.cursor_style {
            self.set_cursor_style(style);
        }
    }

    pub(crate) fn ring_bell(&mut self) {
        self.push_event(TermEvent::Bell);
    }

    pub(crate) fn identify(&mut self) {
        let ident = self.vt_ident.clone();
        self.queue_response(ident);
    }

    /// Focus reporting (mode 1004).
    pub fn report_focus(&mut self, in_focus: bool) {
        if self.win_mode.contains(WinMode::FOCUS) {
            self.queue_response(if in_focus {
                b"\x1b[I".to_vec()
            } else {
                b"\x1b[O".to_vec()
            });
        }
    }

    /// Bracketed paste markers (mode 2004).
    pub fn report_paste(&mut self, started: bool) {
        if self.win_mode.contains(WinMode::BRKT_PASTE) {
            self.queue_response(if started {
                b"\x1b[200~".to_vec()
            } else {
                b"\x1b[201~".to_vec()
            });
        }
    }

    pub(crate) fn reset_last_char(&mut self) {
        self.last_char = '\0';
    }

    // ---- charsets -----------------------------------------------------

    pub(crate) fn set_active_charset(&mut self, slot: usize) {
        if slot < self.charsets.len() {
            self.active_charset = slot;
        }
    }

    pub(crate) fn set_charset_mapping(&mut self, slot: usize, charset: Charset) {
        if slot < self.charsets.len() {
            self.charsets[slot] = charset;
        }
    }

    fn translate_char(&self, rune: char) -> char {
        match self.charsets[self.active_charset] {
            Charset::Usa => rune,
            Charset::Graphic0 => graphic0(rune),
        }
    }

    // ---- dirty tracking -----------------------------------------------

    pub fn set_dirty(&mut self, mut span: LineSpan) {
        if self.screen.rows() == 0 {
            return;
        }
        span.top = span.top.clamp(0, self.size.rows - 1);
        span.bottom = span.bottom.clamp(0, self.size.rows - 1);
        span.sanitize();
        for y in span.top..=span.bottom {
            self.screen.line_mut(y as isize).set_dirty(true);
        }
    }

    pub fn set_all_dirty(&mut self) {
        if self.size.rows > 0 {
            self.set_dirty(LineSpan {
                top: 0,
                bottom: self.size.rows - 1,
            });
        }
    }

    fn apply_sel_damage(&mut self, damage: Option<LineSpan>) {
        if let Some(span) = damage {
            self.set_dirty(span);
        }
    }

    /// Mark every line containing a glyph with `attr` dirty.
    pub fn set_dirty_by_attr(&mut self, attr: Attr) {
        for y in 0..self.size.rows {
            let line = self.screen.line_mut(y as isize);
            if line.cells().iter().any(|g| g.attrs.contains(attr)) {
                line.set_dirty(true);
            }
        }
    }

    pub fn exists_blinking_glyph(&self) -> bool {
        self.screen
            .visible_lines()
            .any(|line| line.cells().iter().any(Glyph::is_blinking))
    }

    // ---- tabs ---------------------------------------------------------

    fn setup_tabs(&mut self) {
        self.tabs = vec![false; self.size.cols as usize];
        let mut i = TABSPACES;
        while i < self.size.cols {
            self.tabs[i as usize] = true;
            i += TABSPACES;
        }
    }

    pub(crate) fn clear_all_tabs(&mut self) {
        self.tabs.iter_mut().for_each(|t| *t = false);
    }

    pub(crate) fn set_tab_at_cursor(&mut self, on: bool) {
        let x = self.cursor.pos.x as usize;
        if x < self.tabs.len() {
            self.tabs[x] = on;
        }
    }

    pub(crate) fn move_to_next_tab(&mut self, mut count: usize) {
        let mut x = self.cursor.pos.x;
        while count > 0 && x < self.size.cols {
            x += 1;
            while x < self.size.cols && !self.tabs[x as usize] {
                x += 1;
            }
            count -= 1;
        }
        self.cursor.pos.x = x.clamp(0, self.size.cols - 1);
    }

    pub(crate) fn move_to_prev_tab(&mut self, mut count: usize) {
        let mut x = self.cursor.pos.x;
        while count > 0 && x > 0 {
            x -= 1;
            while x > 0 && !self.tabs[x as usize] {
                x -= 1;
            }
            count -= 1;
        }
        self.cursor.pos.x = x.clamp(0, self.size.cols - 1);
    }

    // ---- cursor movement ----------------------------------------------

    pub fn move_cursor_to(&mut self, mut pos: CharPos) {
        let limit = if self.cursor.use_origin() {
            self.scroll_area
        } else {
            LineSpan {
                top: 0,
                bottom: self.size.rows - 1,
            }
        };

        self.cursor.set_wrap_next(false);
        pos.x = pos.x.clamp(0, self.size.cols - 1);
        pos.y = pos.y.clamp(limit.top, limit.bottom);
        self.cursor.pos = pos;
    }

    /// Like `move_cursor_to` but interprets the row relative to the scroll
    /// area in origin mode.
    pub fn move_cursor_abs_to(&mut self, mut pos: CharPos) {
        if self.cursor.use_origin() {
            pos.y += self.scroll_area.top;
        }
        self.move_cursor_to(pos);
    }

    pub(crate) fn cursor_control(&mut self, ctrl: CursorControl) {
        match ctrl {
            CursorControl::Save => self.screen.set_cached_cursor(self.cursor),
            CursorControl::Load => {
                self.cursor = self.screen.cached_cursor();
                self.move_cursor_to(self.cursor.pos);
            }
        }
    }

    pub(crate) fn save_cursor(&mut self) {
        self.cursor_control(CursorControl::Save);
    }

    pub(crate) fn restore_cursor(&mut self) {
        self.cursor_control(CursorControl::Load);
    }

    pub(crate) fn cursor_control_save_load(&mut self, save: bool) {
        self.cursor_control(if save {
            CursorControl::Save
        } else {
            CursorControl::Load
        });
    }

    pub(crate) fn do_line_feed(&mut self) {
        let pos = self.cursor.pos;
        if pos.y == self.scroll_area.bottom {
            self.scroll_up(1, None);
        } else {
            self.move_cursor_to(pos.next_line(1));
        }
    }

    pub(crate) fn do_reverse_line_feed(&mut self) {
        let pos = self.cursor.pos;
        if pos.y == self.scroll_area.top {
            self.scroll_down(1, None);
        } else {
            self.move_cursor_to(pos.prev_line(1));
        }
    }

    /// Advance a row, scrolling at the scroll-area bottom; optionally
    /// return to column 0.
    pub(crate) fn move_to_newline(&mut self, carriage_return: bool) {
        let mut pos = self.cursor.pos;
        if carriage_return {
            pos.x = 0;
        }

        if pos.y == self.scroll_area.bottom {
            self.scroll_up(1, None);
        } else {
            pos.y += 1;
        }
        self.move_cursor_to(pos);
    }

    // ---- scroll area and scrolling ------------------------------------

    pub(crate) fn set_scroll_area(&mut self, span: LineSpan) {
        let mut area = span;
        area.top = area.top.clamp(0, self.size.rows - 1);
        area.bottom = area.bottom.clamp(0, self.size.rows - 1);
        area.sanitize();
        self.scroll_area = area;
    }

    fn reset_scroll_area(&mut self) {
        self.scroll_area = LineSpan {
            top: 0,
            bottom: self.size.rows - 1,
        };
    }

    /// Scroll `[origin, scroll_area.bottom]` up: the top lines of the span
    /// enter history, cleared lines appear at the bottom. Rows outside the
    /// scroll area are swapped outward so they stay in place visually.
    pub(crate) fn scroll_up(&mut self, num_lines: i32, origin: Option<i32>) {
        let area = self.scroll_area;
        let origin = origin.unwrap_or(area.top);
        let num_lines = num_lines.clamp(0, area.bottom - origin + 1);
        if num_lines == 0 {
            return;
        }

        let mut i = origin - 1;
        while i >= 0 {
            self.screen.swap_lines(i as isize, (i + num_lines) as isize);
            i -= 1;
        }

        let mut i = self.size.rows - 1;
        while i > area.bottom {
            self.screen.swap_lines(i as isize, (i + num_lines) as isize);
            i -= 1;
        }

        self.screen.shift_view_down(num_lines as usize);

        self.clear_lines(LineSpan {
            top: area.bottom - num_lines + 1,
            bottom: area.bottom,
        });
        self.set_dirty(LineSpan {
            top: origin,
            bottom: area.bottom,
        });
        let damage = self.selection.scroll(origin, -num_lines, area);
        self.apply_sel_damage(damage);
    }

    /// Scroll `[origin, scroll_area.bottom]` down, clearing the lines that
    /// appear at the origin.
    pub(crate) fn scroll_down(&mut self, num_lines: i32, origin: Option<i32>) {
        let area = self.scroll_area;
        let origin = origin.unwrap_or(area.top);
        let num_lines = num_lines.clamp(0, area.bottom - origin + 1);
        if num_lines == 0 {
            return;
        }

        let mut i = area.bottom + 1;
        while i < self.size.rows {
            self.screen.swap_lines(i as isize, (i - num_lines) as isize);
            i += 1;
        }

        let mut i = 0;
        while i < origin {
            self.screen.swap_lines(i as isize, (i - num_lines) as isize);
            i += 1;
        }

        self.screen.shift_view_up(num_lines as usize);

        self.clear_lines(LineSpan {
            top: origin,
            bottom: origin + num_lines - 1,
        });
        self.set_dirty(LineSpan {
            top: origin,
            bottom: area.bottom,
        });
        let damage = self.selection.scroll(origin, num_lines, area);
        self.apply_sel_damage(damage);
    }

    // ---- history scrolling (user driven) ------------------------------

    pub fn scroll_history_up_lines(&mut self, num_lines: usize) {
        if self.on_alt_screen() {
            return;
        }
        let moved = self.screen.scroll_history_up(num_lines);
        if moved != 0 {
            let area = self.scroll_area;
            let damage = self.selection.scroll(0, moved as i32, area);
            self.apply_sel_damage(damage);
            self.set_all_dirty();
        }
    }

    pub fn scroll_history_down_lines(&mut self, num_lines: usize) {
        if self.on_alt_screen() {
            return;
        }
        let moved = self.screen.scroll_history_down(num_lines);
        if moved != 0 {
            let area = self.scroll_area;
            let damage = self.selection.scroll(0, -(moved as i32), area);
            self.apply_sel_damage(damage);
            self.set_all_dirty();
        }
    }

    pub fn scroll_history_up_pages(&mut self, pages: f32) {
        self.scroll_history_up_lines((pages * self.size.rows as f32) as usize);
    }

    pub fn scroll_history_down_pages(&mut self, pages: f32) {
        self.scroll_history_down_lines((pages * self.size.rows as f32) as usize);
    }

    pub fn stop_scrolling(&mut self) {
        if self.screen.is_scrolled() {
            let shift = self.screen.stop_scrolling();
            let area = self.scroll_area;
            let damage = self.selection.scroll(0, -(shift as i32), area);
            self.apply_sel_damage(damage);
            self.set_all_dirty();
        }
    }

    // ---- clearing -----------------------------------------------------

    pub(crate) fn clear_region(&mut self, mut range: Range) {
        range.sanitize();
        range.clamp(self.bottom_right());

        let fill = self.cursor.fill_glyph();
        let template = *self.cursor.attrs();
        let cols = self.size.cols as usize;
        let alt = self.on_alt_screen();

        for y in range.begin.y..=range.end.y {
            {
                let line = self.screen.line_mut(y as isize);
                line.set_dirty(true);
                // drop any preserved tail so out-of-view stale content does
                // not come back on a later growth
                line.shrink_to_physical();
                if line.is_empty() {
                    // a fresh line scrolled into view
                    line.resize(cols, fill);
                }
            }

            for x in range.begin.x..=range.end.x {
                let pos = CharPos { x, y };
                if self.selection.is_selected(pos, alt) {
                    let damage = self.selection.clear();
                    self.apply_sel_damage(damage);
                }
                self.screen.glyph_mut(pos).clear(&template);
            }
        }
    }

    pub(crate) fn clear_lines(&mut self, span: LineSpan) {
        self.clear_region(Range {
            begin: CharPos {
                x: 0,
                y: span.top,
            },
            end: CharPos {
                x: self.size.cols - 1,
                y: span.bottom,
            },
        });
    }

    pub(crate) fn clear_screen(&mut self) {
        self.clear_region(Range {
            begin: self.top_left(),
            end: self.bottom_right(),
        });
    }

    pub(crate) fn clear_lines_below_cursor(&mut self) {
        let pos = self.cursor.pos;
        if pos.y == self.size.rows - 1 {
            return;
        }
        self.clear_region(Range {
            begin: pos.next_line(1).start_of_line(),
            end: self.bottom_right(),
        });
    }

    pub(crate) fn clear_lines_above_cursor(&mut self) {
        let pos = self.cursor.pos;
        if pos.y == 0 {
            return;
        }
        self.clear_region(Range {
            begin: self.top_left(),
            end: self.at_end_of_line(pos.prev_line(1)),
        });
    }

    pub(crate) fn clear_cursor_line(&mut self) {
        let y = self.cursor.pos.y;
        self.clear_lines(LineSpan { top: y, bottom: y });
    }

    pub(crate) fn clear_cols_before_cursor(&mut self) {
        let pos = self.cursor.pos;
        self.clear_region(Range {
            begin: pos.start_of_line(),
            end: pos,
        });
    }

    pub(crate) fn clear_cols_after_cursor(&mut self) {
        let pos = self.cursor.pos;
        self.clear_region(Range {
            begin: pos,
            end: self.at_end_of_line(pos),
        });
    }

    // ---- character and line editing -----------------------------------

    /// ECH: erase in place without shifting.
    pub(crate) fn erase_chars(&mut self, count: i32) {
        let pos = self.cursor.pos;
        self.clear_region(Range {
            begin: pos,
            end: CharPos {
                x: pos.x + count - 1,
                y: pos.y,
            },
        });
    }

    /// DCH: delete characters, sliding the rest of the line left.
    pub(crate) fn delete_chars(&mut self, count: i32) {
        let count = count.clamp(0, self.line_space_left());
        if count == 0 {
            return;
        }

        let pos = self.cursor.pos;
        let dst = pos.x as usize;
        let src = (pos.x + count) as usize;
        let cols = self.size.cols as usize;

        if src < cols {
            let line = self.screen.line_mut(pos.y as isize);
            line.cells_mut().copy_within(src..cols, dst);
        }

        self.clear_region(Range {
            begin: CharPos {
                x: self.size.cols - count,
                y: pos.y,
            },
            end: self.at_end_of_line(pos),
        });

        // deleting one half of a wide pair: shift one more column
        if self.screen.glyph(pos).is_dummy() {
            self.delete_chars(1);
        }
    }

    /// ICH: insert blanks, sliding the rest of the line right.
    pub(crate) fn insert_blanks(&mut self, count: i32) {
        let count = count.clamp(0, self.line_space_left());
        if count == 0 {
            return;
        }

        let pos = self.cursor.pos;
        let dst = (pos.x + count) as usize;
        let src = pos.x as usize;
        let cols = self.size.cols as usize;

        if dst < cols {
            let line = self.screen.line_mut(pos.y as isize);
            line.cells_mut().copy_within(src..cols - count as usize, dst);
        }

        self.clear_region(Range {
            begin: pos,
            end: CharPos {
                x: pos.x + count - 1,
                y: pos.y,
            },
        });
    }

    /// IL: insert blank lines below the cursor, within the scroll area.
    pub(crate) fn insert_blank_lines(&mut self, count: i32) {
        if self.scroll_area.contains(self.cursor.pos.y) {
            let y = self.cursor.pos.y;
            self.scroll_down(count, Some(y));
        }
    }

    /// DL: delete lines at the cursor, within the scroll area.
    pub(crate) fn delete_lines(&mut self, count: i32) {
        if self.scroll_area.contains(self.cursor.pos.y) {
            let y = self.cursor.pos.y;
            self.scroll_up(count, Some(y));
        }
    }

    // ---- alt screen ---------------------------------------------------

    pub(crate) fn swap_screen(&mut self) {
        std::mem::swap(&mut self.screen, &mut self.saved_screen);
        self.mode.toggle(TermMode::ALTSCREEN);
        self.set_all_dirty();
    }

    pub(crate) fn set_alt_screen(&mut self, enable: bool, with_cursor: bool, clear_alt: bool) {
        if !self.allow_altscreen {
            return;
        }

        let need_switch = enable != self.on_alt_screen();

        // xterm saves/restores the cursor even when the screen already is
        // the requested one
        if with_cursor && enable {
            self.cursor_control(CursorControl::Save);
        }

        if need_switch {
            // one control clears only upon leaving the alt screen, another
            // only upon entering it
            if clear_alt && self.on_alt_screen() {
                self.clear_screen();
            }
            self.swap_screen();
            if clear_alt && self.on_alt_screen() {
                self.clear_screen();
            }
        }

        if with_cursor && !enable {
            self.cursor_control(CursorControl::Load);
        }
    }

    // ---- resize and reset ---------------------------------------------

    pub fn resize(&mut self, new_size: TermSize) -> Result<()> {
        let old_size = self.size;

        if !new_size.is_valid() {
            tracing::warn!(
                "ignoring resize to invalid dimensions {}x{}",
                new_size.cols,
                new_size.rows
            );
            return Ok(());
        }

        // shift the view down so the cursor stays within the new bounds
        let shift = self.cursor.pos.y - new_size.rows + 1;
        if shift > 0 {
            self.screen.shift_view_down(shift as usize);
            self.saved_screen.shift_view_down(shift as usize);
            let area = self.scroll_area;
            let damage = self.selection.scroll(0, -shift, area);
            self.apply_sel_damage(damage);
        }

        self.screen.save_scroll_state();

        let fill = self.cursor.fill_glyph();
        self.screen.set_dimension(new_size, fill)?;
        let saved_fill = self.saved_screen.cached_cursor().fill_glyph();
        self.saved_screen.set_dimension(new_size, saved_fill)?;

        self.size = new_size;

        if new_size.cols > old_size.cols || self.tabs.is_empty() {
            self.setup_tabs();
        }

        self.reset_scroll_area();
        self.move_cursor_to(self.cursor.pos);

        // initialize the regions that appeared, on both screens
        let saved_cursor = self.cursor;
        for _ in 0..2 {
            if old_size.cols < new_size.cols && old_size.rows > 0 {
                self.set_dirty(LineSpan {
                    top: 0,
                    bottom: old_size.rows - 1,
                });
            }
            if old_size.rows < new_size.rows && old_size.cols > 0 {
                self.clear_region(Range {
                    begin: CharPos {
                        x: 0,
                        y: old_size.rows,
                    },
                    end: self.bottom_right(),
                });
            }
            self.swap_screen();
            self.cursor_control(CursorControl::Load);
        }
        self.cursor = saved_cursor;

        if !self.screen.restore_scroll_state() {
            // the scrolled-to position is gone, snap to the live view
            let damage = self.selection.clear();
            self.apply_sel_damage(damage);
        }

        if self.screen.is_scrolled() {
            self.set_all_dirty();
        }

        Ok(())
    }

    /// Soft reset to power-on state, keeping the configuration.
    pub fn reset(&mut self) {
        self.cursor = Cursor::default();
        self.setup_tabs();
        self.reset_scroll_area();
        self.mode = TermMode::WRAP | TermMode::UTF8;
        self.charsets = [Charset::Usa; 4];
        self.active_charset = 0;
        self.last_char = '\0';
        self.last_cursor_pos = CharPos::default();
        self.esc.reset();

        // reset main and alt screen alike
        for _ in 0..2 {
            self.screen.reset_scroll_buffer();
            self.move_cursor_to(self.top_left());
            self.cursor_control(CursorControl::Save);
            self.clear_screen();
            self.swap_screen();
        }
    }

    /// RIS: full reset including window state.
    pub(crate) fn full_reset(&mut self) {
        // RIS always lands on the primary screen
        if self.on_alt_screen() {
            self.swap_screen();
        }
        self.reset();
        self.palette.reset_all();
        self.win_mode = WinMode::VISIBLE;
        self.push_event(TermEvent::SetTitle(None));
        self.push_event(TermEvent::SetIconTitle(None));
        self.push_event(TermEvent::ColorsChanged);
    }

    // ---- selection plumbing -------------------------------------------

    pub fn selection_start(&mut self, pos: CharPos, snap: Snap, ctx: SelContext) {
        let alt = self.on_alt_screen();
        let damage = self.selection.start(pos, snap, ctx, &self.screen, alt);
        self.apply_sel_damage(damage);
    }

    pub fn selection_update(&mut self, pos: CharPos, ctx: SelContext) {
        let damage = self.selection.update(pos, ctx, &self.screen);
        self.apply_sel_damage(damage);
    }

    pub fn selection_clear(&mut self) {
        let damage = self.selection.clear();
        self.apply_sel_damage(damage);
    }

    pub fn selection_text(&self) -> String {
        self.selection.text(&self.screen)
    }

    pub fn is_selected(&self, pos: CharPos) -> bool {
        self.selection.is_selected(pos, self.on_alt_screen())
    }

    // ---- printing / media copy ----------------------------------------

    fn print_to_io(&mut self, bytes: &[u8]) {
        let Some(file) = self.print_file.as_mut() else {
            return;
        };
        if let Err(err) = file.write_all(bytes) {
            tracing::error!("write to print file failed: {err}; disabling print mode");
            self.print_file = None;
            self.mode.remove(TermMode::PRINT);
        }
    }

    pub(crate) fn set_print_mode(&mut self, on: bool) {
        self.mode.set(TermMode::PRINT, on);
    }

    fn line_text(&self, y: i32) -> String {
        let line = self.screen.line(y as isize);
        let mut out: String = line.cells()[..line.used_length()]
            .iter()
            .filter(|g| !g.is_dummy())
            .map(Glyph::display_rune)
            .collect();
        out.push('\n');
        out
    }

    pub(crate) fn dump_cursor_line(&mut self) {
        let text = self.line_text(self.cursor.pos.y);
        self.print_to_io(text.as_bytes());
    }

    pub(crate) fn dump_screen(&mut self) {
        let text: String = (0..self.size.rows).map(|y| self.line_text(y)).collect();
        self.print_to_io(text.as_bytes());
    }

    pub(crate) fn dump_selection(&mut self) {
        let text = self.selection.text(&self.screen);
        if !text.is_empty() {
            self.print_to_io(text.as_bytes());
        }
    }

    // ---- writing ------------------------------------------------------

    /// DECALN: fill the whole screen with 'E'.
    pub(crate) fn run_dec_test(&mut self) {
        for y in 0..self.size.rows {
            for x in 0..self.size.cols {
                self.set_char('E', CharPos { x, y });
            }
        }
    }

    /// SUB leaves a question mark at the cursor.
    pub(crate) fn show_sub_marker(&mut self) {
        self.set_char('?', self.cursor.pos);
    }

    /// REP: repeat the last printable rune.
    pub(crate) fn repeat_char(&mut self, count: i32) {
        if self.last_char == '\0' {
            return;
        }
        let rune = self.last_char;
        let mut count = count.min(self.size.cols * self.size.rows);
        while count > 0 {
            self.put_char(rune);
            count -= 1;
        }
    }

    /// Write one glyph, repairing wide/dummy siblings so no half of a wide
    /// pair ever remains.
    fn set_char(&mut self, rune: char, pos: CharPos) {
        let current = *self.screen.glyph(pos);

        if current.is_wide() {
            if pos.x + 1 < self.size.cols {
                let next = self.screen.glyph_mut(pos.next_col(1));
                next.rune = ' ';
                next.attrs.remove(Attr::DUMMY);
            }
        } else if current.is_dummy() {
            let prev = self.screen.glyph_mut(pos.prev_col(1));
            prev.rune = ' ';
            prev.attrs.remove(Attr::WIDE);
        }

        let translated = self.translate_char(rune);
        self.screen.line_mut(pos.y as isize).set_dirty(true);
        let template = *self.cursor.attrs();
        let cell = self.screen.glyph_mut(pos);
        *cell = template;
        cell.rune = translated;
    }

    /// The terminal write path for a single rune.
    pub fn put_char(&mut self, rune: char) {
        let rinfo = RuneInfo::new(rune, self.mode.contains(TermMode::UTF8));

        if self.mode.contains(TermMode::PRINT) {
            let bytes = rinfo.encoded().to_vec();
            self.print_to_io(&bytes);
        }

        if parser::process(self, &rinfo) {
            // part of a control code or escape sequence
            return;
        }

        if self
            .selection
            .is_selected(self.cursor.pos, self.on_alt_screen())
        {
            let damage = self.selection.clear();
            self.apply_sel_damage(damage);
        }

        // pending automatic wrap from the previous write
        if self.mode.contains(TermMode::WRAP) && self.cursor.wrap_next() {
            let pos = self.cursor.pos;
            self.screen.glyph_mut(pos).attrs.insert(Attr::WRAP);
            self.move_to_newline(true);
        }

        let width = rinfo.width() as i32;

        // a wide rune that no longer fits moves to the next line
        if self.line_space_left() < width {
            self.clear_cols_after_cursor();
            self.move_to_newline(true);
        }

        if self.mode.contains(TermMode::INSERT) {
            let to_move = self.line_space_left() - width;
            if to_move > 0 {
                let pos = self.cursor.pos;
                let x = pos.x as usize;
                let line = self.screen.line_mut(pos.y as isize);
                let cells = line.cells_mut();
                cells.copy_within(x..x + to_move as usize, x + width as usize);
            }
        }

        self.set_char(rune, self.cursor.pos);
        self.last_char = rune;
        let left = self.line_space_left();

        if rinfo.is_wide() {
            let pos = self.cursor.pos;
            self.screen.glyph_mut(pos).attrs.insert(Attr::WIDE);

            // in a one-column terminal there is no room for the dummy
            if left > 1 {
                let next_pos = pos.next_col(1);

                // overwriting the first half of another wide pair orphans
                // its dummy; blank it
                if self.screen.glyph(next_pos).is_wide() && left > 2 {
                    let after = self.screen.glyph_mut(next_pos.next_col(1));
                    after.rune = ' ';
                    after.attrs.remove(Attr::DUMMY);
                }

                let next = self.screen.glyph_mut(next_pos);
                next.rune = '\0';
                next.attrs = Attr::DUMMY;
            }
        }

        if left > width {
            self.move_cursor_to(self.cursor.pos.next_col(width));
        } else {
            self.cursor.set_wrap_next(true);
        }
    }

    /// Pty ingress: decode `data` and process it.
    ///
    /// Returns the number of bytes consumed; an incomplete UTF-8 sequence
    /// at the end is left for the caller to retain. While processing, the
    /// viewport returns to the live screen; with keep-scroll-position set
    /// the previous scroll state (and selection) is restored afterwards.
    pub fn write(&mut self, data: &[u8], show_ctrl: bool) -> usize {
        let use_utf8 = self.mode.contains(TermMode::UTF8);

        let saved_scroll = self.screen.save_scroll_state();
        if self.keep_scroll_position && saved_scroll {
            self.selection.save_range();
        }
        self.screen.stop_scrolling();

        let mut pos = 0;
        while pos < data.len() {
            let (mut rune, charsize) = if use_utf8 {
                let (rune, n) = codec::decode(&data[pos..]);
                if n == 0 {
                    // incomplete sequence at the buffer end
                    break;
                }
                (rune, n)
            } else {
                (data[pos] as char, 1)
            };

            if show_ctrl && codec::is_control(rune) {
                if (rune as u32) & 0x80 != 0 {
                    rune = char::from_u32((rune as u32) & 0x7f).unwrap_or(codec::REPLACEMENT);
                    self.put_char('^');
                    self.put_char('[');
                } else if !matches!(rune, '\n' | '\r' | '\t') {
                    rune = char::from_u32((rune as u32) ^ 0x40).unwrap_or(codec::REPLACEMENT);
                    self.put_char('^');
                }
            }

            self.put_char(rune);
            pos += charsize;
        }

        if self.keep_scroll_position {
            if !self.screen.restore_scroll_state() {
                let damage = self.selection.clear();
                self.apply_sel_damage(damage);
                self.set_all_dirty();
            } else if saved_scroll {
                self.selection.restore_range();
                if self.screen.is_scrolled() {
                    self.set_all_dirty();
                }
            }
        }

        pos
    }

    // ---- drawing ------------------------------------------------------

    pub fn draw(&mut self, renderer: &mut dyn Renderer) {
        if !renderer.can_draw() {
            return;
        }
        self.draw_screen(renderer);
        self.draw_cursor(renderer);
        renderer.finish_draw();
    }

    fn draw_screen(&mut self, renderer: &mut dyn Renderer) {
        for y in 0..self.size.rows {
            let line = self.screen.line_mut(y as isize);
            if !line.is_dirty() {
                continue;
            }
            line.set_dirty(false);
            let line = self.screen.line(y as isize);
            renderer.draw_glyphs(line.cells(), CharPos { x: 0, y });
        }
    }

    /// Draw the cursor at its view-shifted position and undraw the old one.
    fn draw_cursor(&mut self, renderer: &mut dyn Renderer) {
        let glyph_at = |screen: &Screen, pos: CharPos| -> Glyph {
            let line = screen.line(pos.y as isize);
            line.cells()
                .get(pos.x as usize)
                .copied()
                .unwrap_or_default()
        };

        let orig_last_pos = self.screen.shifted_pos(self.last_cursor_pos);
        let mut shifted_last_pos = orig_last_pos;

        let Some(mut new_pos) = self.screen.shifted_pos(self.cursor.pos) else {
            // cursor is scrolled out of view
            return;
        };

        if let Some(last) = shifted_last_pos.as_mut() {
            last.x = last.x.clamp(0, self.size.cols - 1);
            last.y = last.y.clamp(0, self.size.rows - 1);
            if glyph_at(&self.screen, *last).is_dummy() {
                last.x -= 1;
            }
        }
        if glyph_at(&self.screen, new_pos).is_dummy() {
            new_pos.x -= 1;
        }

        if let Some(last) = shifted_last_pos {
            let glyph = glyph_at(&self.screen, last);
            renderer.clear_cursor(last, &glyph);
        }
        let glyph = glyph_at(&self.screen, new_pos);
        renderer.draw_cursor(new_pos, &glyph);

        if let Some(unshifted) = self.screen.unshifted_pos(new_pos) {
            self.last_cursor_pos = unshifted;
        }

        if orig_last_pos != Some(new_pos) {
            renderer.set_input_spot(new_pos);
        }
    }

    /// Full buffer text for the IPC endpoint.
    pub fn history_text(&self) -> String {
        let mut text = self.screen.as_text(&self.cursor);

        if !self.on_alt_screen() {
            // drop the line holding the currently entered command so a
            // client processing the dump does not match its own invocation
            if let Some(pos) = text[..text.len().saturating_sub(1)].rfind('\n') {
                text.truncate(pos + 1);
            }
        }

        text
    }
}

/// VT100 special graphics translation, 0x41..0x7e.
fn graphic0(rune: char) -> char {
    const VT100_GRAPHIC0: [char; 62] = [
        '↑', '↓', '→', '←', '█', '▚', '☃', // A - G
        '\0', '\0', '\0', '\0', '\0', '\0', '\0', '\0', // H - O
        '\0', '\0', '\0', '\0', '\0', '\0', '\0', '\0', // P - W
        '\0', '\0', '\0', '\0', '\0', '\0', '\0', ' ', // X - _
        '◆', '▒', '␉', '␌', '␍', '␊', '°', '±', // ` - g
        '␤', '␋', '┘', '┐', '┌', '└', '┼', '⎺', // h - o
        '⎻', '─', '⎼', '⎽', '├', '┤', '┴', '┬', // p - w
        '│', '≤', '≥', 'π', '≠', '£', '·', // x - ~
    ];

    let code = rune as u32;
    if (0x41..=0x7e).contains(&code) {
        let mapped = VT100_GRAPHIC0[(code - 0x41) as usize];
        if mapped != '\0' {
            return mapped;
        }
    }
    rune
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term_sized(rows: usize, cols: usize) -> Term {
        let config = Config {
            rows,
            cols,
            ..Default::default()
        };
        Term::new(&config).unwrap()
    }

    fn term() -> Term {
        term_sized(24, 80)
    }

    fn feed(term: &mut Term, bytes: &[u8]) {
        let consumed = term.write(bytes, false);
        assert_eq!(consumed, bytes.len());
    }

    fn glyph(term: &Term, x: i32, y: i32) -> Glyph {
        *term.screen().glyph(CharPos { x, y })
    }

    fn row_text(term: &Term, y: i32) -> String {
        let line = term.screen().line(y as isize);
        line.cells()[..line.used_length()]
            .iter()
            .filter(|g| !g.is_dummy())
            .map(Glyph::display_rune)
            .collect()
    }

    #[test]
    fn plain_text_advances_cursor() {
        let mut t = term();
        feed(&mut t, b"hi");
        assert_eq!(glyph(&t, 0, 0).rune, 'h');
        assert_eq!(glyph(&t, 1, 0).rune, 'i');
        assert_eq!(t.cursor_pos(), CharPos { x: 2, y: 0 });

        feed(&mut t, b"\r\n");
        assert_eq!(t.cursor_pos(), CharPos { x: 0, y: 1 });
    }

    #[test]
    fn linefeed_without_crlf_keeps_column() {
        let mut t = term();
        feed(&mut t, b"hi\n");
        assert_eq!(t.cursor_pos(), CharPos { x: 2, y: 1 });

        // LNM makes LF imply CR
        feed(&mut t, b"\x1b[20h");
        feed(&mut t, b"x\n");
        assert_eq!(t.cursor_pos().x, 0);
    }

    #[test]
    fn cursor_back_clamps_at_left_margin() {
        let mut t = term();
        feed(&mut t, b"A\x1b[2DB");
        // CUB 2 from x=1 clamps to column 0; B overwrites A and advances
        assert_eq!(glyph(&t, 0, 0).rune, 'B');
        assert!(!glyph(&t, 1, 0).has_value());
        assert_eq!(t.cursor_pos(), CharPos { x: 1, y: 0 });
    }

    #[test]
    fn clear_and_home_then_write() {
        let mut t = term();
        feed(&mut t, b"garbage\x1b[5;5Hmore");
        feed(&mut t, b"\x1b[1;1H\x1b[2JHELLO");
        assert_eq!(row_text(&t, 0), "HELLO");
        assert_eq!(row_text(&t, 4), "");
        assert_eq!(t.cursor_pos(), CharPos { x: 5, y: 0 });
    }

    #[test]
    fn alt_screen_round_trip_preserves_main() {
        let mut t = term();
        feed(&mut t, b"MainText");
        let cursor_before = t.cursor_pos();

        feed(&mut t, b"\x1b[?1049h");
        assert!(t.on_alt_screen());
        feed(&mut t, b"X");
        assert_eq!(glyph(&t, 0, 0).rune, 'X');

        feed(&mut t, b"\x1b[?1049l");
        assert!(!t.on_alt_screen());
        assert_eq!(row_text(&t, 0), "MainText");
        assert_eq!(t.cursor_pos(), cursor_before);
    }

    #[test]
    fn alt_screen_has_no_history() {
        let mut t = term_sized(4, 20);
        feed(&mut t, b"\x1b[?1049h");
        for _ in 0..10 {
            feed(&mut t, b"x\r\n");
        }
        t.scroll_history_up_lines(5);
        assert!(!t.screen().is_scrolled());
    }

    #[test]
    fn osc52_sets_clipboard_via_event() {
        let config = Config {
            allow_window_ops: true,
            ..Default::default()
        };
        let mut t = Term::new(&config).unwrap();
        feed(&mut t, b"\x1b]52;c;aGVsbG8=\x07");
        let events = t.take_pending_events();
        assert!(events.contains(&TermEvent::ClipboardSet("hello".into())));
    }

    #[test]
    fn osc52_requires_window_ops_permission() {
        let mut t = term();
        feed(&mut t, b"\x1b]52;c;aGVsbG8=\x07");
        let events = t.take_pending_events();
        assert!(!events
            .iter()
            .any(|e| matches!(e, TermEvent::ClipboardSet(_))));
    }

    #[test]
    fn full_screen_of_newlines_moves_to_history() {
        let mut t = term_sized(4, 20);
        feed(&mut t, b"one\r\ntwo\r\nthree\r\nfour");
        // four more newlines push everything into history
        feed(&mut t, b"\r\n\r\n\r\n\r\n");

        for y in 0..4 {
            assert_eq!(row_text(&t, y), "", "screen should be empty");
        }

        t.scroll_history_up_lines(4);
        assert_eq!(t.screen().scroll_offset(), 4);
        assert_eq!(row_text(&t, 0), "one");
        assert_eq!(row_text(&t, 1), "two");
        assert_eq!(row_text(&t, 2), "three");
        assert_eq!(row_text(&t, 3), "four");
    }

    #[test]
    fn wide_char_gets_dummy_sibling() {
        let mut t = term();
        feed(&mut t, "日x".as_bytes());
        let wide = glyph(&t, 0, 0);
        let dummy = glyph(&t, 1, 0);
        assert_eq!(wide.rune, '日');
        assert!(wide.is_wide());
        assert!(dummy.is_dummy());
        assert!(!dummy.has_value());
        assert_eq!(glyph(&t, 2, 0).rune, 'x');
    }

    #[test]
    fn overwriting_wide_clears_dummy() {
        let mut t = term();
        feed(&mut t, "日".as_bytes());
        feed(&mut t, b"\x1b[1;1HA");
        assert_eq!(glyph(&t, 0, 0).rune, 'A');
        let old_dummy = glyph(&t, 1, 0);
        assert!(!old_dummy.is_dummy());
        assert_eq!(old_dummy.rune, ' ');
    }

    #[test]
    fn overwriting_dummy_clears_wide() {
        let mut t = term();
        feed(&mut t, "日".as_bytes());
        feed(&mut t, b"\x1b[1;2HA");
        let old_wide = glyph(&t, 0, 0);
        assert!(!old_wide.is_wide());
        assert_eq!(old_wide.rune, ' ');
        assert_eq!(glyph(&t, 1, 0).rune, 'A');
    }

    #[test]
    fn wide_char_in_last_column_wraps_first() {
        let mut t = term_sized(4, 10);
        feed(&mut t, b"\x1b[1;10H");
        feed(&mut t, "日".as_bytes());
        // no room in column 9: the rune goes to the next line
        assert_eq!(glyph(&t, 0, 1).rune, '日');
        assert!(glyph(&t, 1, 1).is_dummy());
    }

    #[test]
    fn autowrap_marks_line_and_continues() {
        let mut t = term_sized(4, 5);
        feed(&mut t, b"abcdefg");
        assert_eq!(row_text(&t, 0), "abcde");
        assert_eq!(row_text(&t, 1), "fg");
        assert!(t.screen().line(0).is_wrapped());
    }

    #[test]
    fn autowrap_disabled_overwrites_last_column() {
        let mut t = term_sized(4, 5);
        feed(&mut t, b"\x1b[?7l");
        feed(&mut t, b"abcdefg");
        assert_eq!(row_text(&t, 0), "abcdg");
        assert_eq!(row_text(&t, 1), "");
    }

    #[test]
    fn origin_mode_is_scroll_area_relative() {
        let mut t = term();
        feed(&mut t, b"\x1b[6;21r");
        assert_eq!(t.scroll_area(), LineSpan { top: 5, bottom: 20 });

        feed(&mut t, b"\x1b[?6h");
        assert_eq!(t.cursor_pos(), CharPos { x: 0, y: 5 });

        feed(&mut t, b"\x1b[3;1H");
        assert_eq!(t.cursor_pos().y, 7);

        // clamped to the scroll area bottom
        feed(&mut t, b"\x1b[99;1H");
        assert_eq!(t.cursor_pos().y, 20);

        feed(&mut t, b"\x1b[?6l");
        feed(&mut t, b"\x1b[3;1H");
        assert_eq!(t.cursor_pos().y, 2);
    }

    #[test]
    fn scroll_region_zero_param_spans_whole_screen() {
        let mut t = term();
        feed(&mut t, b"\x1b[5;10r");
        assert_eq!(t.scroll_area(), LineSpan { top: 4, bottom: 9 });
        feed(&mut t, b"\x1b[0;0r");
        assert_eq!(t.scroll_area(), LineSpan { top: 0, bottom: 23 });
    }

    #[test]
    fn scroll_region_constrains_linefeed() {
        let mut t = term_sized(10, 20);
        for i in 0..10u8 {
            feed(&mut t, format!("\x1b[{};1H{}", i + 1, (b'A' + i) as char).as_bytes());
        }

        feed(&mut t, b"\x1b[3;6r\x1b[6;1H\n");

        assert_eq!(row_text(&t, 0), "A", "above region untouched");
        assert_eq!(row_text(&t, 2), "D", "region scrolled up");
        assert_eq!(row_text(&t, 5), "", "cleared line at region bottom");
        assert_eq!(row_text(&t, 6), "G", "below region untouched");
    }

    #[test]
    fn reverse_index_scrolls_down_at_top() {
        let mut t = term_sized(4, 20);
        feed(&mut t, b"top\x1b[1;1H\x1bM");
        assert_eq!(row_text(&t, 0), "");
        assert_eq!(row_text(&t, 1), "top");
    }

    #[test]
    fn insert_and_delete_lines_respect_region() {
        let mut t = term_sized(6, 20);
        for i in 0..6u8 {
            feed(&mut t, format!("\x1b[{};1H{}", i + 1, (b'a' + i) as char).as_bytes());
        }

        feed(&mut t, b"\x1b[2;5r\x1b[2;1H\x1b[1L");
        assert_eq!(row_text(&t, 1), "");
        assert_eq!(row_text(&t, 2), "b");
        assert_eq!(row_text(&t, 5), "f", "outside region untouched");

        feed(&mut t, b"\x1b[1M");
        assert_eq!(row_text(&t, 1), "b");
    }

    #[test]
    fn insert_delete_erase_chars() {
        let mut t = term();
        feed(&mut t, b"abcdef\x1b[1;3H");

        feed(&mut t, b"\x1b[2@");
        assert_eq!(row_text(&t, 0), "ab  cdef");

        feed(&mut t, b"\x1b[2P");
        assert_eq!(row_text(&t, 0), "abcdef");

        feed(&mut t, b"\x1b[2X");
        assert_eq!(row_text(&t, 0), "ab  ef");
    }

    #[test]
    fn insert_mode_shifts_existing_text() {
        let mut t = term();
        feed(&mut t, b"world\x1b[1;1H\x1b[4h");
        feed(&mut t, b"hello ");
        feed(&mut t, b"\x1b[4l");
        assert_eq!(row_text(&t, 0), "hello world");
    }

    #[test]
    fn erase_display_below_and_above() {
        let mut t = term_sized(5, 20);
        for i in 0..5u8 {
            feed(&mut t, format!("\x1b[{};1Hrow{}", i + 1, i).as_bytes());
        }

        feed(&mut t, b"\x1b[3;2H\x1b[0J");
        assert_eq!(row_text(&t, 1), "row1");
        assert_eq!(row_text(&t, 2), "r");
        assert_eq!(row_text(&t, 3), "");

        feed(&mut t, b"\x1b[2;2H\x1b[1J");
        assert_eq!(row_text(&t, 0), "");
        assert_eq!(row_text(&t, 1), "  w1", "columns up to the cursor cleared");
    }

    #[test]
    fn erase_with_invalid_parameter_is_ignored() {
        let mut t = term();
        feed(&mut t, b"keep");
        feed(&mut t, b"\x1b[5J\x1b[7K");
        assert_eq!(row_text(&t, 0), "keep");
    }

    #[test]
    fn sgr_colors_and_attributes() {
        let mut t = term();
        feed(&mut t, b"\x1b[1;31mr\x1b[0m\x1b[38;5;196ms\x1b[38;2;1;2;3mt");

        let r = glyph(&t, 0, 0);
        assert!(r.attrs.contains(Attr::BOLD));
        assert_eq!(r.fg, Color::Indexed(1));

        let s = glyph(&t, 1, 0);
        assert!(!s.attrs.contains(Attr::BOLD));
        assert_eq!(s.fg, Color::Indexed(196));

        assert_eq!(glyph(&t, 2, 0).fg, Color::Rgb(1, 2, 3));
    }

    #[test]
    fn sgr_bright_colors_and_resets() {
        let mut t = term();
        feed(&mut t, b"\x1b[97;104ma\x1b[39;49mb");
        let a = glyph(&t, 0, 0);
        assert_eq!(a.fg, Color::Indexed(15));
        assert_eq!(a.bg, Color::Indexed(12));
        let b = glyph(&t, 1, 0);
        assert_eq!(b.fg, glyph::DEFAULT_FG);
        assert_eq!(b.bg, glyph::DEFAULT_BG);
    }

    #[test]
    fn cursor_save_restore() {
        let mut t = term();
        feed(&mut t, b"\x1b[5;10H\x1b7\x1b[1;1H\x1b8");
        assert_eq!(t.cursor_pos(), CharPos { x: 9, y: 4 });
    }

    #[test]
    fn device_status_and_attributes_replies() {
        let mut t = term();
        feed(&mut t, b"\x1b[5;10H\x1b[6n\x1b[c\x1b[5n");
        let responses = t.take_pending_responses();
        assert_eq!(responses[0], b"\x1b[5;10R".to_vec());
        assert_eq!(responses[1], b"\x1b[?6c".to_vec());
        assert_eq!(responses[2], b"\x1b[0n".to_vec());
    }

    #[test]
    fn tabs_and_tab_clearing() {
        let mut t = term();
        feed(&mut t, b"\t");
        assert_eq!(t.cursor_pos().x, 8);
        feed(&mut t, b"\x1b[2I");
        assert_eq!(t.cursor_pos().x, 24);
        feed(&mut t, b"\x1b[1Z");
        assert_eq!(t.cursor_pos().x, 16);

        // custom stop via HTS
        feed(&mut t, b"\x1b[1;4H\x1bH\x1b[1;1H\t");
        assert_eq!(t.cursor_pos().x, 3);

        // clear all stops: tab runs to the last column
        feed(&mut t, b"\x1b[3g\x1b[1;1H\t");
        assert_eq!(t.cursor_pos().x, 79);
    }

    #[test]
    fn rep_repeats_last_printable() {
        let mut t = term();
        feed(&mut t, b"A\x1b[3b");
        assert_eq!(row_text(&t, 0), "AAAA");

        // control codes clear the repeat candidate
        feed(&mut t, b"\r\n\x1b[3b");
        assert_eq!(row_text(&t, 1), "");
    }

    #[test]
    fn dec_alignment_test_fills_screen() {
        let mut t = term_sized(3, 4);
        feed(&mut t, b"\x1b#8");
        for y in 0..3 {
            assert_eq!(row_text(&t, y), "EEEE");
        }
    }

    #[test]
    fn sub_shows_question_mark() {
        let mut t = term();
        feed(&mut t, b"\x1b[\x1a");
        // the marker sits at the cursor without advancing it
        assert_eq!(glyph(&t, 0, 0).rune, '?');
        assert_eq!(t.cursor_pos(), CharPos { x: 0, y: 0 });
        // the aborted sequence leaves the machine usable
        feed(&mut t, b"after");
        assert_eq!(row_text(&t, 0), "after");
    }

    #[test]
    fn line_drawing_charset() {
        let mut t = term();
        feed(&mut t, b"\x1b(0qx\x1b(Bq");
        assert_eq!(glyph(&t, 0, 0).rune, '─');
        assert_eq!(glyph(&t, 1, 0).rune, '│');
        assert_eq!(glyph(&t, 2, 0).rune, 'q');
    }

    #[test]
    fn locking_shifts_switch_charsets() {
        let mut t = term();
        // map G1 to graphics, shift into it with SO, back with SI
        feed(&mut t, b"\x1b)0\x0eq\x0fq");
        assert_eq!(glyph(&t, 0, 0).rune, '─');
        assert_eq!(glyph(&t, 1, 0).rune, 'q');
    }

    #[test]
    fn utf8_mode_switch() {
        let mut t = term();
        feed(&mut t, b"\x1b%@");
        assert!(!t.mode().contains(TermMode::UTF8));
        // bytes are now latin-1-ish
        feed(&mut t, &[0xe4]);
        assert_eq!(glyph(&t, 0, 0).rune, '\u{e4}');
        feed(&mut t, b"\x1b%G");
        assert!(t.mode().contains(TermMode::UTF8));
    }

    #[test]
    fn malformed_utf8_prints_replacement() {
        let mut t = term();
        feed(&mut t, &[0xff, b'x']);
        assert_eq!(glyph(&t, 0, 0).rune, codec::REPLACEMENT);
        assert_eq!(glyph(&t, 1, 0).rune, 'x');
    }

    #[test]
    fn incomplete_utf8_tail_is_retained() {
        let mut t = term();
        let bytes = "é".as_bytes();
        let consumed = t.write(&bytes[..1], false);
        assert_eq!(consumed, 0);
        feed(&mut t, bytes);
        assert_eq!(glyph(&t, 0, 0).rune, 'é');
    }

    #[test]
    fn show_ctrl_renders_caret_notation() {
        let mut t = term();
        t.write(&[0x01], true);
        assert_eq!(row_text(&t, 0), "^A");
    }

    #[test]
    fn unknown_csi_does_not_corrupt_state() {
        let mut t = term();
        feed(&mut t, b"\x1b[9999y");
        feed(&mut t, b"ok");
        assert_eq!(row_text(&t, 0), "ok");
    }

    #[test]
    fn control_codes_act_inside_csi() {
        let mut t = term();
        // the backspaces fire while the CSI body is being collected
        feed(&mut t, b"ab\x1b[\x08\x08mC");
        assert_eq!(row_text(&t, 0), "Cb");
        assert_eq!(t.cursor_pos().x, 1);
    }

    #[test]
    fn bracketed_paste_markers() {
        let mut t = term();
        t.report_paste(true);
        assert!(t.take_pending_responses().is_empty(), "mode off: no markers");

        feed(&mut t, b"\x1b[?2004h");
        t.report_paste(true);
        t.report_paste(false);
        let responses = t.take_pending_responses();
        assert_eq!(responses[0], b"\x1b[200~".to_vec());
        assert_eq!(responses[1], b"\x1b[201~".to_vec());
    }

    #[test]
    fn focus_reports_when_enabled() {
        let mut t = term();
        feed(&mut t, b"\x1b[?1004h");
        t.report_focus(true);
        t.report_focus(false);
        let responses = t.take_pending_responses();
        assert_eq!(responses[0], b"\x1b[I".to_vec());
        assert_eq!(responses[1], b"\x1b[O".to_vec());
    }

    #[test]
    fn mode_reports_reach_event_queue() {
        let mut t = term();
        feed(&mut t, b"\x1b[?1000h");
        assert!(t.win_mode().contains(WinMode::MOUSEBTN));
        let events = t.take_pending_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, TermEvent::WinModeChanged(_))));
    }

    #[test]
    fn osc_title_event() {
        let mut t = term();
        feed(&mut t, b"\x1b]2;hello title\x1b\\");
        let events = t.take_pending_events();
        assert!(events.contains(&TermEvent::SetTitle(Some("hello title".into()))));
    }

    #[test]
    fn osc4_palette_set_and_query() {
        let mut t = term();
        feed(&mut t, b"\x1b]4;1;#102030\x07");
        assert_eq!(t.palette().rgb(1), Some((0x10, 0x20, 0x30)));

        feed(&mut t, b"\x1b]4;1;?\x07");
        let responses = t.take_pending_responses();
        assert_eq!(
            responses[0],
            b"\x1b]4;1;rgb:1010/2020/3030\x07".to_vec()
        );

        feed(&mut t, b"\x1b]104\x07");
        assert_eq!(t.palette().rgb(1), Some((0xcd, 0, 0)));
    }

    #[test]
    fn cursor_position_clamps() {
        let mut t = term();
        feed(&mut t, b"\x1b[999;999H");
        assert_eq!(t.cursor_pos(), CharPos { x: 79, y: 23 });
        feed(&mut t, b"\x1b[99D\x1b[99A");
        assert_eq!(t.cursor_pos(), CharPos { x: 0, y: 0 });
    }

    #[test]
    fn decscusr_sets_cursor_style() {
        let mut t = term();
        feed(&mut t, b"\x1b[6 q");
        assert_eq!(t.cursor_style(), CursorStyle::BlinkingBar);
        feed(&mut t, b"\x1b[0 q");
        assert_eq!(t.cursor_style(), CursorStyle::BlinkingBlock);
    }

    #[test]
    fn resize_preserves_content_and_cursor() {
        let mut t = term_sized(10, 40);
        feed(&mut t, b"Hello");
        t.resize(TermSize { cols: 20, rows: 10 }).unwrap();
        assert_eq!(row_text(&t, 0), "Hello");
        assert_eq!(t.size(), TermSize { cols: 20, rows: 10 });

        t.resize(TermSize { cols: 40, rows: 5 }).unwrap();
        assert_eq!(row_text(&t, 0), "Hello");
        assert!(t.cursor_pos().y < 5);
    }

    #[test]
    fn resize_shifts_view_when_cursor_below_new_height() {
        let mut t = term_sized(10, 40);
        feed(&mut t, b"\x1b[8;1Hdeep");
        assert_eq!(t.cursor_pos().y, 7);

        t.resize(TermSize { cols: 40, rows: 4 }).unwrap();
        // view shifted so the cursor line is still visible
        assert!(t.cursor_pos().y < 4);
        assert_eq!(row_text(&t, t.cursor_pos().y), "deep");
    }

    #[test]
    fn selection_cleared_by_overwrite() {
        let mut t = term();
        feed(&mut t, b"hello");
        t.selection_start(CharPos { x: 0, y: 0 }, Snap::None, SelContext::empty());
        t.selection_update(CharPos { x: 4, y: 0 }, SelContext::FINISHED);
        assert!(t.is_selected(CharPos { x: 1, y: 0 }));

        feed(&mut t, b"\x1b[1;2HX");
        assert!(!t.is_selected(CharPos { x: 1, y: 0 }));
    }

    #[test]
    fn selection_invalidated_by_alt_switch() {
        let mut t = term();
        feed(&mut t, b"hello");
        t.selection_start(CharPos { x: 0, y: 0 }, Snap::None, SelContext::empty());
        t.selection_update(CharPos { x: 4, y: 0 }, SelContext::FINISHED);

        feed(&mut t, b"\x1b[?1049h");
        assert!(!t.is_selected(CharPos { x: 0, y: 0 }));
    }

    #[test]
    fn selection_follows_scrollback() {
        let mut t = term_sized(4, 20);
        feed(&mut t, b"target\r\n");
        t.selection_start(CharPos { x: 0, y: 0 }, Snap::None, SelContext::empty());
        t.selection_update(CharPos { x: 5, y: 0 }, SelContext::FINISHED);
        assert_eq!(t.selection_text(), "target");

        // two more lines scroll the target away; selection scrolls with it
        feed(&mut t, b"\r\n\r\n\r\n");
        assert!(!t.is_selected(CharPos { x: 0, y: 0 }));
    }

    #[test]
    fn keep_scroll_position_survives_output() {
        let config = Config {
            rows: 4,
            cols: 20,
            keep_scroll_position: true,
            ..Default::default()
        };
        let mut t = Term::new(&config).unwrap();
        for i in 0..8 {
            feed(&mut t, format!("line{i}\r\n").as_bytes());
        }

        t.scroll_history_up_lines(3);
        let before = row_text(&t, 0);
        feed(&mut t, b"new output\r\n");
        assert!(t.screen().is_scrolled(), "view stays in history");
        assert_eq!(row_text(&t, 0), before);
    }

    #[test]
    fn new_output_snaps_to_live_view_by_default() {
        let mut t = term_sized(4, 20);
        for i in 0..8 {
            feed(&mut t, format!("line{i}\r\n").as_bytes());
        }
        t.scroll_history_up_lines(3);
        assert!(t.screen().is_scrolled());

        feed(&mut t, b"x");
        assert!(!t.screen().is_scrolled());
    }

    #[test]
    fn reset_restores_pristine_state() {
        let mut t = term();
        feed(&mut t, b"\x1b[5;10r\x1b[1;31mtext\x1b[?6h");
        feed(&mut t, b"\x1bc");
        assert_eq!(t.scroll_area(), LineSpan { top: 0, bottom: 23 });
        assert_eq!(row_text(&t, 0), "");
        assert_eq!(t.cursor_pos(), CharPos { x: 0, y: 0 });
        assert!(t.mode().contains(TermMode::WRAP));
    }

    #[test]
    fn osc_terminated_by_st_and_bel() {
        let mut t = term();
        feed(&mut t, b"\x1b]2;one\x07");
        feed(&mut t, b"\x1b]2;two\x1b\\");
        let events = t.take_pending_events();
        assert!(events.contains(&TermEvent::SetTitle(Some("one".into()))));
        assert!(events.contains(&TermEvent::SetTitle(Some("two".into()))));
    }

    #[test]
    fn can_aborts_osc_collection() {
        let mut t = term();
        feed(&mut t, b"\x1b]2;aborted\x18");
        feed(&mut t, b"visible");
        let events = t.take_pending_events();
        assert!(!events
            .iter()
            .any(|e| matches!(e, TermEvent::SetTitle(_))));
        assert_eq!(row_text(&t, 0), "visible");
    }

    #[test]
    fn history_text_trims_prompt_line() {
        let mut t = term_sized(4, 20);
        feed(&mut t, b"output\r\n$ nst-msg -d");
        let text = t.history_text();
        assert_eq!(text, "output\n");
    }

    #[test]
    fn ring_positions_stay_valid_under_load() {
        let mut t = term_sized(5, 10);
        for i in 0..200 {
            feed(&mut t, format!("row number {i}\r\n").as_bytes());
        }
        let ring = t.screen().ring_len();
        for y in 0..5 {
            assert!(t.screen().buf_pos(y) < ring);
        }
    }
}
