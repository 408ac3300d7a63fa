//! The logical text selection, independent of any rendering concerns.
//!
//! Coordinates are viewport-relative cell positions. The selection keeps
//! two ranges: `orig` in click order and `range` normalized top-left to
//! bottom-right. Mutating operations return the damaged line span so the
//! terminal can mark those rows dirty.

use bitflags::bitflags;

use crate::term::glyph::Attr;
use crate::term::screen::Screen;
use crate::term::{CharPos, LineSpan, Range};

bitflags! {
    /// Flags describing how a selection operation behaves.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Context: u8 {
        /// Snap algorithms look backward from the click position.
        const BACKWARD    = 1 << 0;
        /// The operation finishes the selection (button release).
        const FINISHED    = 1 << 1;
        /// Select the rectangle spanned by the two coordinates.
        const RECTANGULAR = 1 << 2;
        /// Snap both ends to whole lines.
        const FULL_LINES  = 1 << 3;
    }
}

/// Automatic growth applied to the selection ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Snap {
    #[default]
    None,
    /// Select the word around the position.
    Word,
    /// The clicked character is itself a delimiter: select up to its next
    /// occurrence (quotes, brackets and the like).
    WordSep,
    /// Select whole lines, following wraps.
    Line,
    /// Word selection that extends to a full URI when one starts there.
    Uri,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    /// No selection drag in progress; a finalized range may still exist.
    #[default]
    Idle,
    /// Started but nothing selected yet.
    Empty,
    /// Selection data available and still extending.
    Ready,
}

#[derive(Debug)]
pub struct Selection {
    state: State,
    snap: Snap,
    ctx: Context,
    /// Normalized coordinates.
    range: Range,
    /// Coordinates in click order.
    orig: Range,
    saved_range: Range,
    saved_orig: Range,
    /// Alt-screen flag observed at `start`; a screen switch invalidates us.
    alt_screen: bool,
    word_delimiters: Vec<char>,
    uri_schemes: Vec<&'static str>,
}

impl Default for Selection {
    fn default() -> Self {
        Self::new(" ")
    }
}

impl Selection {
    pub fn new(word_delimiters: &str) -> Self {
        Self {
            state: State::Idle,
            snap: Snap::None,
            ctx: Context::empty(),
            range: Range::INVALID,
            orig: Range::INVALID,
            saved_range: Range::INVALID,
            saved_orig: Range::INVALID,
            alt_screen: false,
            word_delimiters: word_delimiters.chars().collect(),
            uri_schemes: vec!["http", "https", "ftp", "file", "mailto"],
        }
    }

    pub fn set_word_delimiters(&mut self, delimiters: &str) {
        self.word_delimiters = delimiters.chars().collect();
    }

    /// Drop the selection. Returns the previously covered span.
    pub fn clear(&mut self) -> Option<LineSpan> {
        if !self.orig.is_valid() {
            return None;
        }
        self.state = State::Idle;
        let damage = LineSpan {
            top: self.range.begin.y,
            bottom: self.range.end.y,
        };
        self.orig = Range::INVALID;
        self.range = Range::INVALID;
        Some(damage)
    }

    /// Begin a selection at `pos`.
    pub fn start(
        &mut self,
        pos: CharPos,
        snap: Snap,
        ctx: Context,
        screen: &Screen,
        alt_screen: bool,
    ) -> Option<LineSpan> {
        let cleared = self.clear();

        self.state = State::Empty;
        self.snap = snap;
        self.ctx = ctx;
        self.alt_screen = alt_screen;
        self.orig = Range { begin: pos, end: pos };
        self.normalize(screen);

        if self.snap != Snap::None {
            self.state = State::Ready;
        }

        let damage = LineSpan {
            top: self.range.begin.y,
            bottom: self.range.end.y,
        };
        Some(merge_damage(cleared, damage))
    }

    /// Extend the selection towards `pos`.
    pub fn update(&mut self, pos: CharPos, ctx: Context, screen: &Screen) -> Option<LineSpan> {
        if self.state == State::Idle {
            return None;
        }
        let finished = ctx.contains(Context::FINISHED);
        if finished && self.state == State::Empty {
            return self.clear();
        }

        let old_span = LineSpan {
            top: self.range.begin.y,
            bottom: self.range.end.y,
        };

        self.ctx = ctx;
        self.orig.end = pos;
        self.normalize(screen);

        self.state = if finished { State::Idle } else { State::Ready };

        let new_span = LineSpan {
            top: self.range.begin.y,
            bottom: self.range.end.y,
        };
        Some(merge_damage(Some(old_span), new_span))
    }

    /// Whether a usable selection range exists.
    pub fn is_active(&self) -> bool {
        self.orig.is_valid() && self.state != State::Empty
    }

    /// Whether `pos` lies inside the selection, given the currently active
    /// screen.
    pub fn is_selected(&self, pos: CharPos, alt_screen: bool) -> bool {
        if self.state == State::Empty || !self.orig.is_valid() || alt_screen != self.alt_screen {
            return false;
        }

        let (nb, ne) = (self.range.begin, self.range.end);

        if self.ctx.contains(Context::RECTANGULAR) {
            return between(pos.y, nb.y, ne.y) && between(pos.x, nb.x, ne.x);
        }

        between(pos.y, nb.y, ne.y)
            && (pos.y != nb.y || pos.x >= nb.x)
            && (pos.y != ne.y || pos.x <= ne.x)
    }

    /// Adjust the selection to a scroll of `num_lines` starting at row
    /// `origin` within the scroll area, clearing it when it is torn apart.
    pub fn scroll(&mut self, origin: i32, num_lines: i32, area: LineSpan) -> Option<LineSpan> {
        if !self.orig.is_valid() {
            return None;
        }

        let in_scrolled = |y: i32| between(y, origin, area.bottom);

        if in_scrolled(self.range.begin.y) != in_scrolled(self.range.end.y) {
            return self.clear();
        }

        if in_scrolled(self.range.begin.y) {
            self.orig.begin.y += num_lines;
            self.orig.end.y += num_lines;
            if self.orig.begin.y < area.top
                || self.orig.begin.y > area.bottom
                || self.orig.end.y < area.top
                || self.orig.end.y > area.bottom
            {
                return self.clear();
            }
            self.range.begin.y += num_lines;
            self.range.end.y += num_lines;
        }

        None
    }

    pub fn save_range(&mut self) {
        self.saved_orig = self.orig;
        self.saved_range = self.range;
    }

    pub fn restore_range(&mut self) {
        self.orig = self.saved_orig;
        self.range = self.saved_range;
    }

    /// Extract the selected text.
    pub fn text(&self, screen: &Screen) -> String {
        if !self.is_active() {
            return String::new();
        }

        let mut out = String::new();
        let (nb, ne) = (self.range.begin, self.range.end);
        let cols = screen.cols() as i32;
        let rectangular = self.ctx.contains(Context::RECTANGULAR);

        for y in nb.y..=ne.y {
            if y < 0 || y as usize >= screen.rows() {
                continue;
            }
            let line = screen.line(y as isize);
            let linelen = line.used_length() as i32;
            if linelen == 0 {
                out.push('\n');
                continue;
            }

            let (start, lastx) = if rectangular {
                (nb.x, ne.x)
            } else {
                (
                    if y == nb.y { nb.x } else { 0 },
                    if y == ne.y { ne.x } else { cols - 1 },
                )
            };

            let first = start.max(0);
            let mut last = lastx.min(linelen - 1);
            // trim trailing blanks
            while last >= first && !line[last as usize].has_value() {
                last -= 1;
            }

            let mut x = first;
            while x <= last {
                let glyph = &line[x as usize];
                if !glyph.is_dummy() {
                    out.push(glyph.display_rune());
                }
                x += 1;
            }

            // a wrapped line flows into the next one without a break
            if (y < ne.y || lastx >= linelen) && (!line.is_wrapped() || rectangular) {
                out.push('\n');
            }
        }

        out
    }

    fn is_delimiter(&self, rune: char) -> bool {
        rune != '\0' && self.word_delimiters.contains(&rune)
    }

    /// Order the coordinates, apply snapping and clamp the ends to line
    /// content.
    fn normalize(&mut self, screen: &Screen) {
        let regular = !self.ctx.contains(Context::RECTANGULAR);
        let (ob, oe) = (self.orig.begin, self.orig.end);

        let (mut nb, mut ne) = (CharPos::default(), CharPos::default());
        if regular && ob.y != oe.y {
            nb.x = if ob.y < oe.y { ob.x } else { oe.x };
            ne.x = if ob.y < oe.y { oe.x } else { ob.x };
        } else {
            nb.x = ob.x.min(oe.x);
            ne.x = ob.x.max(oe.x);
        }
        nb.y = ob.y.min(oe.y);
        ne.y = ob.y.max(oe.y);

        self.check_snap(screen, &mut nb, -1);
        self.check_snap(screen, &mut ne, 1);

        if self.ctx.contains(Context::FULL_LINES) {
            self.extend_over_line(screen, &mut nb, -1);
            self.extend_over_line(screen, &mut ne, 1);
        }

        self.range = Range { begin: nb, end: ne };

        if self.snap == Snap::Uri {
            self.try_uri_snap(screen);
        }

        // expand over line breaks: clamp the ends to actual line content
        if regular && !self.ctx.contains(Context::FULL_LINES) {
            let cols = screen.cols() as i32;
            let begin_len = line_len(screen, self.range.begin.y);
            if begin_len < self.range.begin.x {
                self.range.begin.x = begin_len;
            }
            if line_len(screen, self.range.end.y) <= self.range.end.x {
                self.range.end.x = cols - 1;
            }
        }
    }

    fn check_snap(&self, screen: &Screen, pos: &mut CharPos, direction: i32) {
        match self.snap {
            Snap::None => {}
            Snap::Word | Snap::Uri => self.snap_word(screen, pos, direction),
            Snap::WordSep => self.snap_word_sep(screen, pos, direction),
            Snap::Line => self.extend_over_line(screen, pos, direction),
        }
    }

    /// Grow `pos` outward while the adjacent characters stay in the same
    /// word class, following wraps at the line ends.
    fn snap_word(&self, screen: &Screen, pos: &mut CharPos, direction: i32) {
        let cols = screen.cols() as i32;
        let rows = screen.rows() as i32;

        let mut prev = *screen.glyph(*pos);
        let mut prev_delim = self.is_delimiter(prev.rune);

        loop {
            let mut newx = pos.x + direction;
            let mut newy = pos.y;

            if !between(newx, 0, cols - 1) {
                // crossing a line boundary only continues over a wrap
                newy += direction;
                newx = (newx + cols) % cols;
                if !between(newy, 0, rows - 1) {
                    break;
                }
                let (yt, xt) = if direction > 0 {
                    (pos.y, pos.x)
                } else {
                    (newy, newx)
                };
                if !screen
                    .glyph(CharPos { x: xt, y: yt })
                    .attrs
                    .contains(Attr::WRAP)
                {
                    break;
                }
            }

            if newx >= line_len(screen, newy) {
                break;
            }

            let glyph = *screen.glyph(CharPos { x: newx, y: newy });
            let delim = self.is_delimiter(glyph.rune);
            if !glyph.is_dummy() && (delim != prev_delim || (delim && glyph.rune != prev.rune)) {
                break;
            }

            pos.x = newx;
            pos.y = newy;
            prev = glyph;
            prev_delim = delim;
        }
    }

    /// Clicked on a delimiter: extend towards the next occurrence of the
    /// same delimiter so quoted or bracketed spans select symmetrically.
    fn snap_word_sep(&self, screen: &Screen, pos: &mut CharPos, direction: i32) {
        let anchor = *screen.glyph(self.orig.begin);
        if !self.is_delimiter(anchor.rune) {
            return self.snap_word(screen, pos, direction);
        }

        let search_dir = if self.ctx.contains(Context::BACKWARD) { -1 } else { 1 };
        if direction != search_dir {
            return;
        }

        let rows = screen.rows() as i32;
        let mut probe = *pos;
        loop {
            let next = CharPos {
                x: probe.x + direction,
                y: probe.y,
            };
            if next.x < 0 || next.x >= line_len(screen, next.y) {
                // follow a wrapped line, otherwise give up
                let cont_y = probe.y + direction;
                if !between(cont_y, 0, rows - 1) || !screen.line(probe.y as isize).is_wrapped() {
                    return;
                }
                probe = CharPos {
                    x: if direction > 0 { 0 } else { line_len(screen, cont_y) - 1 },
                    y: cont_y,
                };
            } else {
                probe = next;
            }

            if screen.glyph(probe).rune == anchor.rune {
                *pos = probe;
                return;
            }
        }
    }

    /// Snap to the start/end of the (possibly wrapped) line.
    fn extend_over_line(&self, screen: &Screen, pos: &mut CharPos, direction: i32) {
        let cols = screen.cols() as i32;
        let rows = screen.rows() as i32;

        pos.x = if direction < 0 { 0 } else { cols - 1 };
        if direction < 0 {
            while pos.y > 0 && screen.line((pos.y - 1) as isize).is_wrapped() {
                pos.y -= 1;
            }
        } else {
            while pos.y < rows - 1 && screen.line(pos.y as isize).is_wrapped() {
                pos.y += 1;
            }
        }
    }

    /// After a word snap, extend the end over a full URI when the selection
    /// starts exactly at `scheme://`.
    fn try_uri_snap(&mut self, screen: &Screen) {
        const MAX_URI_LEN: usize = 2048;

        let rows = screen.rows() as i32;
        let mut text = String::new();
        let mut pos = self.range.begin;
        let mut last_good = self.range.end;

        while text.len() < MAX_URI_LEN {
            let glyph = screen.glyph(pos);
            if glyph.is_dummy() || !is_uri_rune(glyph.rune) {
                break;
            }
            text.push(glyph.rune);
            last_good = pos;

            if pos.x + 1 < line_len(screen, pos.y) {
                pos.x += 1;
            } else if screen.line(pos.y as isize).is_wrapped() && pos.y + 1 < rows {
                pos = CharPos { x: 0, y: pos.y + 1 };
            } else {
                break;
            }
        }

        let has_scheme = self
            .uri_schemes
            .iter()
            .any(|s| text.strip_prefix(s).is_some_and(|rest| rest.starts_with("://")));
        if has_scheme {
            self.range.end = last_good;
        }
    }
}

fn between(v: i32, lo: i32, hi: i32) -> bool {
    lo <= v && v <= hi
}

fn line_len(screen: &Screen, y: i32) -> i32 {
    if y < 0 || y as usize >= screen.rows() {
        return 0;
    }
    screen.line(y as isize).used_length() as i32
}

fn merge_damage(a: Option<LineSpan>, b: LineSpan) -> LineSpan {
    match a {
        Some(a) => LineSpan {
            top: a.top.min(b.top),
            bottom: a.bottom.max(b.bottom),
        },
        None => b,
    }
}

fn is_uri_rune(rune: char) -> bool {
    rune.is_ascii_alphanumeric()
        || matches!(
            rune,
            '-' | '.' | '_' | '~' | ':' | '/' | '?' | '#' | '[' | ']' | '@' | '!' | '$' | '&'
                | '\'' | '(' | ')' | '*' | '+' | ',' | ';' | '=' | '%'
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::glyph::Glyph;
    use crate::term::TermSize;

    fn screen_with(rows: i32, cols: i32, content: &[&str]) -> Screen {
        let mut screen = Screen::new(50, false);
        screen
            .set_dimension(TermSize { cols, rows }, Glyph::default())
            .unwrap();
        for (y, text) in content.iter().enumerate() {
            let line = screen.line_mut(y as isize);
            for (x, c) in text.chars().enumerate() {
                line[x].rune = c;
            }
        }
        screen
    }

    fn pos(x: i32, y: i32) -> CharPos {
        CharPos { x, y }
    }

    #[test]
    fn plain_drag_selects_range() {
        let screen = screen_with(4, 20, &["hello world", "second line"]);
        let mut sel = Selection::default();
        sel.start(pos(0, 0), Snap::None, Context::empty(), &screen, false);
        sel.update(pos(4, 0), Context::FINISHED, &screen);

        assert!(sel.is_selected(pos(0, 0), false));
        assert!(sel.is_selected(pos(4, 0), false));
        assert!(!sel.is_selected(pos(5, 0), false));
        assert_eq!(sel.text(&screen), "hello");
    }

    #[test]
    fn multi_line_regular_selection() {
        let screen = screen_with(4, 20, &["hello world", "second line"]);
        let mut sel = Selection::default();
        sel.start(pos(6, 0), Snap::None, Context::empty(), &screen, false);
        sel.update(pos(5, 1), Context::FINISHED, &screen);

        assert_eq!(sel.text(&screen), "world\nsecond");
        // regular selection covers the line middle between ends
        assert!(sel.is_selected(pos(19, 0), false));
        assert!(sel.is_selected(pos(0, 1), false));
    }

    #[test]
    fn rectangular_selection_is_a_box() {
        let screen = screen_with(4, 20, &["abcdef", "ghijkl", "mnopqr"]);
        let mut sel = Selection::default();
        sel.start(pos(1, 0), Snap::None, Context::RECTANGULAR, &screen, false);
        sel.update(pos(3, 2), Context::RECTANGULAR | Context::FINISHED, &screen);

        assert_eq!(sel.text(&screen), "bcd\nhij\nnop");
        assert!(!sel.is_selected(pos(0, 1), false));
        assert!(sel.is_selected(pos(2, 1), false));
    }

    #[test]
    fn word_snap_expands_to_delimiters() {
        let screen = screen_with(4, 20, &["foo bar baz"]);
        let mut sel = Selection::default();
        sel.start(pos(5, 0), Snap::Word, Context::empty(), &screen, false);
        sel.update(pos(5, 0), Context::FINISHED, &screen);

        assert_eq!(sel.text(&screen), "bar");
    }

    #[test]
    fn word_snap_follows_wrapped_lines() {
        let mut screen = screen_with(4, 6, &["abcdef", "ghi"]);
        screen.line_mut(0)[5].attrs.insert(Attr::WRAP);

        let mut sel = Selection::default();
        sel.start(pos(1, 0), Snap::Word, Context::empty(), &screen, false);
        sel.update(pos(1, 0), Context::FINISHED, &screen);

        assert_eq!(sel.text(&screen), "abcdefghi");
    }

    #[test]
    fn line_snap_takes_full_lines() {
        let screen = screen_with(4, 20, &["first line", "other"]);
        let mut sel = Selection::default();
        sel.start(pos(3, 0), Snap::Line, Context::empty(), &screen, false);
        sel.update(pos(3, 0), Context::FINISHED, &screen);

        assert_eq!(sel.text(&screen), "first line\n");
    }

    #[test]
    fn word_sep_snap_finds_matching_quote() {
        let screen = screen_with(4, 20, &["a \"quoted\" b"]);
        let mut sel = Selection::new(" \"");
        sel.start(pos(2, 0), Snap::WordSep, Context::empty(), &screen, false);
        sel.update(pos(2, 0), Context::FINISHED, &screen);

        assert_eq!(sel.text(&screen), "\"quoted\"");
    }

    #[test]
    fn uri_snap_extends_past_word_delimiters() {
        let screen = screen_with(4, 40, &["see https://example.com/x?q=1 end"]);
        let mut sel = Selection::new(" /:?");
        sel.start(pos(4, 0), Snap::Uri, Context::empty(), &screen, false);
        sel.update(pos(4, 0), Context::FINISHED, &screen);

        assert_eq!(sel.text(&screen), "https://example.com/x?q=1");
    }

    #[test]
    fn alt_screen_switch_invalidates() {
        let screen = screen_with(4, 20, &["hello"]);
        let mut sel = Selection::default();
        sel.start(pos(0, 0), Snap::None, Context::empty(), &screen, false);
        sel.update(pos(4, 0), Context::FINISHED, &screen);

        assert!(sel.is_selected(pos(1, 0), false));
        assert!(!sel.is_selected(pos(1, 0), true), "selection is screen-bound");
    }

    #[test]
    fn scroll_moves_or_clears() {
        let screen = screen_with(6, 20, &["aaa", "bbb", "ccc"]);
        let area = LineSpan { top: 0, bottom: 5 };
        let mut sel = Selection::default();
        sel.start(pos(0, 1), Snap::None, Context::empty(), &screen, false);
        sel.update(pos(2, 1), Context::FINISHED, &screen);

        sel.scroll(0, -1, area);
        assert!(sel.is_selected(pos(0, 0), false));
        assert!(!sel.is_selected(pos(0, 1), false));

        // scrolled past the area top: cleared
        sel.scroll(0, -3, area);
        assert!(!sel.is_selected(pos(0, 0), false));
        assert!(!sel.is_active());
    }

    #[test]
    fn click_without_drag_selects_nothing() {
        let screen = screen_with(4, 20, &["hello"]);
        let mut sel = Selection::default();
        sel.start(pos(0, 0), Snap::None, Context::empty(), &screen, false);
        sel.update(pos(0, 0), Context::FINISHED, &screen);

        // a press finished while still empty clears the selection
        assert!(!sel.is_selected(pos(0, 0), false));
        assert!(!sel.is_active());
    }

    #[test]
    fn wrapped_line_selection_has_no_break() {
        let mut screen = screen_with(4, 6, &["abcdef", "gh"]);
        screen.line_mut(0)[5].attrs.insert(Attr::WRAP);

        let mut sel = Selection::default();
        sel.start(pos(0, 0), Snap::None, Context::empty(), &screen, false);
        sel.update(pos(1, 1), Context::FINISHED, &screen);

        assert_eq!(sel.text(&screen), "abcdefgh");
    }
}
