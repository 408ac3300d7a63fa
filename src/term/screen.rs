use super::cursor::Cursor;
use super::glyph::Glyph;
use super::line::Line;
use super::{CharPos, TermSize};
use crate::error::{Error, Result};

/// A terminal screen: a ring buffer of lines covering both the visible
/// viewport and the scrollback history.
///
/// The ring holds `history_len + rows + 1` lines; the extra slot guarantees
/// that a half-open iteration over the visible rows has an end position that
/// is never itself part of the screen. `head` marks where the current screen
/// content starts, `scroll_offset` how far the viewport is scrolled back
/// into history.
#[derive(Debug, Clone)]
pub struct Screen {
    lines: Vec<Line>,
    rows: usize,
    cols: usize,
    /// Ring index of the current screen start.
    head: usize,
    /// How many lines the viewport is scrolled back.
    scroll_offset: usize,
    /// Ring index previously viewed at row 0, for restore.
    saved_scroll_index: Option<usize>,
    history_len: usize,
    is_alt: bool,
    cached_cursor: Cursor,
}

impl Screen {
    /// `history_len == 0` disables the scrollback buffer (alt screen).
    pub fn new(history_len: usize, is_alt: bool) -> Self {
        Self {
            lines: Vec::new(),
            rows: 0,
            cols: 0,
            head: 0,
            scroll_offset: 0,
            saved_scroll_index: None,
            history_len,
            is_alt,
            cached_cursor: Cursor::default(),
        }
    }

    /// Only valid before the first `set_dimension` call.
    pub fn set_history_len(&mut self, len: usize) {
        if self.lines.is_empty() {
            self.history_len = len;
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_alt(&self) -> bool {
        self.is_alt
    }

    pub fn ring_len(&self) -> usize {
        self.lines.len()
    }

    pub fn has_scroll_buffer(&self) -> bool {
        self.history_len != 0
    }

    pub fn valid_pos(&self, pos: CharPos) -> bool {
        pos.y >= 0
            && (pos.y as usize) < self.rows
            && pos.x >= 0
            && (pos.x as usize) < self.cols
    }

    /// Translate a screen row (negative values reach into history, values
    /// past `rows` into the oldest ring slots) into a ring index.
    pub fn buf_pos(&self, y: isize) -> usize {
        let len = self.lines.len() as isize;
        let mut pos = y + self.head as isize - self.scroll_offset as isize;
        pos = pos.rem_euclid(len);
        pos as usize
    }

    pub fn line(&self, y: isize) -> &Line {
        &self.lines[self.buf_pos(y)]
    }

    pub fn line_mut(&mut self, y: isize) -> &mut Line {
        let idx = self.buf_pos(y);
        &mut self.lines[idx]
    }

    pub fn glyph(&self, pos: CharPos) -> &Glyph {
        &self.line(pos.y as isize)[pos.x as usize]
    }

    pub fn glyph_mut(&mut self, pos: CharPos) -> &mut Glyph {
        &mut self.line_mut(pos.y as isize)[pos.x as usize]
    }

    /// Swap two rows given in screen coordinates; either may lie outside
    /// the visible area (scroll operations move lines through the ring).
    pub fn swap_lines(&mut self, a: isize, b: isize) {
        let pa = self.buf_pos(a);
        let pb = self.buf_pos(b);
        self.lines.swap(pa, pb);
    }

    /// Iterate over the visible rows.
    pub fn visible_lines(&self) -> impl Iterator<Item = &Line> + '_ {
        (0..self.rows as isize).map(move |y| self.line(y))
    }

    pub fn set_cached_cursor(&mut self, cursor: Cursor) {
        self.cached_cursor = cursor;
    }

    pub fn cached_cursor(&self) -> Cursor {
        self.cached_cursor
    }

    /// Reshape the ring for new terminal dimensions.
    ///
    /// With a history buffer the ring never changes size after the initial
    /// allocation; a request for more rows than the ring can represent is an
    /// error. Without history (alt screen) the ring tracks the row count.
    pub fn set_dimension(&mut self, size: TermSize, fill: Glyph) -> Result<()> {
        // operations below are destined for the live screen
        self.stop_scrolling();

        let is_alt = self.is_alt;
        let init_line = move || Line::new(!is_alt);
        let rows = size.rows as usize;
        let cols = size.cols as usize;

        if self.lines.is_empty() {
            self.lines.resize(self.history_len + rows + 1, init_line());
        } else if self.history_len == 0 {
            if self.head != 0 {
                // compact the visible rows to the ring start before resizing
                let visible: Vec<Line> =
                    (0..self.rows as isize).map(|y| self.line(y).clone()).collect();
                for (i, line) in visible.into_iter().enumerate() {
                    self.lines[i] = line;
                }
                self.head = 0;
            }
            self.lines.resize(rows + 1, init_line());
        } else if rows >= self.lines.len() {
            if self.head == 0 {
                self.lines.resize(self.history_len + rows + 1, init_line());
            } else {
                return Err(Error::RingTooSmall);
            }
        }

        let old_rows = self.rows;
        self.rows = rows;

        // rows at the bottom that fell out of the viewport would otherwise
        // come back as stale content once the screen grows again
        if rows < old_rows && self.has_scroll_buffer() {
            for y in rows..old_rows {
                self.line_mut(y as isize).clear();
            }
        }

        // the visible screen is sized unconditionally, in case not yet
        // allocated lines have come into view
        for y in 0..rows {
            if self.line(y as isize).len() != cols {
                self.line_mut(y as isize).resize(cols, fill);
            }
        }

        // history lines only if they were ever written
        if cols != self.cols {
            for line in &mut self.lines {
                if !line.is_empty() {
                    line.resize(cols, fill);
                }
            }
        }
        self.cols = cols;

        Ok(())
    }

    /// How many ring slots are left to scroll back into.
    pub fn history_lines_left(&self) -> usize {
        self.lines.len() - self.rows - self.scroll_offset
    }

    /// Scroll the viewport towards older history, returning the number of
    /// lines actually moved (empty never-written slots are not entered).
    pub fn scroll_history_up(&mut self, lines: usize) -> usize {
        if !self.has_scroll_buffer() {
            return 0;
        }

        let mut lines = lines.min(self.history_lines_left());
        while lines > 0 && self.line(-(lines as isize)).is_empty() {
            lines -= 1;
        }

        self.scroll_offset += lines;
        lines
    }

    pub fn scroll_history_down(&mut self, lines: usize) -> usize {
        if !self.has_scroll_buffer() {
            return 0;
        }
        let lines = lines.min(self.scroll_offset);
        self.scroll_offset -= lines;
        lines
    }

    pub fn scroll_history_max(&mut self) -> usize {
        self.scroll_history_up(self.history_lines_left())
    }

    pub fn is_scrolled(&self) -> bool {
        self.scroll_offset != 0
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    /// Return to the live view; returns the offset that was active.
    pub fn stop_scrolling(&mut self) -> usize {
        std::mem::take(&mut self.scroll_offset)
    }

    /// Remember the ring position currently viewed at row 0.
    ///
    /// Returns whether the screen was scrolled back at all.
    pub fn save_scroll_state(&mut self) -> bool {
        if self.is_scrolled() {
            self.saved_scroll_index = Some(self.buf_pos(0));
            true
        } else {
            self.saved_scroll_index = None;
            false
        }
    }

    /// Re-apply a scroll position saved with `save_scroll_state`.
    ///
    /// Returns true iff the saved ring index could be reconstructed. When
    /// the index has meanwhile been consumed by the live screen the view
    /// stays at the latest content and false is returned.
    pub fn restore_scroll_state(&mut self) -> bool {
        self.stop_scrolling();

        let Some(saved) = self.saved_scroll_index else {
            return true;
        };

        if self.screen_pos(saved).is_some() {
            // the saved position was overwritten by live screen content
            return false;
        }

        self.scroll_offset = if saved < self.head {
            self.head - saved
        } else {
            self.head + self.lines.len() - saved
        };

        true
    }

    /// Rotate the screen view up in the ring (towards history).
    pub fn shift_view_up(&mut self, lines: usize) {
        if lines <= self.head {
            self.head -= lines;
        } else {
            self.head = self.lines.len() - (lines - self.head);
        }
    }

    /// Rotate the screen view down; rows leaving at the top become history.
    pub fn shift_view_down(&mut self, lines: usize) {
        self.head = (self.head + lines) % self.lines.len();
    }

    /// Drop all scrollback along with the ring position.
    pub fn reset_scroll_buffer(&mut self) {
        self.head = 0;
        self.scroll_offset = 0;
        for line in self.lines.iter_mut().skip(self.rows) {
            line.clear();
        }
    }

    /// Map a ring index back to a visible screen row, if it is on screen.
    fn screen_pos(&self, ring_index: usize) -> Option<usize> {
        if self.rows == 0 {
            return None;
        }
        let screen_end = (self.head + self.rows - 1) % self.lines.len();
        let wraps = screen_end < self.head;

        if wraps {
            if ring_index >= self.head {
                Some(ring_index - self.head)
            } else if ring_index <= screen_end {
                Some(self.lines.len() - self.head + ring_index)
            } else {
                None
            }
        } else if ring_index >= self.head && ring_index < self.head + self.rows {
            Some(ring_index - self.head)
        } else {
            None
        }
    }

    /// Adjust a live-screen position for the current scroll state; None if
    /// it is scrolled out of view.
    pub fn shifted_pos(&self, pos: CharPos) -> Option<CharPos> {
        if !self.is_scrolled() {
            return Some(pos);
        }
        let y = pos.y + self.scroll_offset as i32;
        if y < 0 || y as usize >= self.rows {
            None
        } else {
            Some(CharPos { x: pos.x, y })
        }
    }

    /// Inverse of `shifted_pos`.
    pub fn unshifted_pos(&self, pos: CharPos) -> Option<CharPos> {
        if !self.is_scrolled() {
            return Some(pos);
        }
        let y = pos.y - self.scroll_offset as i32;
        if y < 0 || y as usize >= self.rows {
            None
        } else {
            Some(CharPos { x: pos.x, y })
        }
    }

    /// The full ring contents as UTF-8 text, oldest history first.
    ///
    /// On the main screen, empty rows at and below the cursor are
    /// suppressed so that the command line a client is currently typing
    /// does not end up duplicated in IPC output.
    pub fn as_text(&self, cursor: &Cursor) -> String {
        let mut out = String::new();

        let reached_end_of_screen = |ring_index: usize| {
            if self.is_alt {
                return false;
            }
            match self.screen_pos(ring_index) {
                Some(screen_row) => screen_row as i32 > cursor.pos.y,
                None => false,
            }
        };

        let add_line = |out: &mut String, line: &Line| {
            if line.is_empty() {
                return;
            }
            for glyph in &line.cells()[..line.used_length()] {
                if glyph.is_dummy() {
                    continue;
                }
                out.push(glyph.display_rune());
            }
            out.push('\n');
        };

        // ring slots from head + rows onward hold the oldest history
        let ordered = (self.head + self.rows..self.lines.len()).chain(0..self.head + self.rows);
        for idx in ordered {
            let idx = idx % self.lines.len();
            if reached_end_of_screen(idx) {
                break;
            }
            add_line(&mut out, &self.lines[idx]);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::glyph::Attr;

    fn screen(history: usize, rows: i32, cols: i32) -> Screen {
        let mut s = Screen::new(history, false);
        s.set_dimension(TermSize { cols, rows }, Glyph::default())
            .unwrap();
        s
    }

    fn write_row(s: &mut Screen, y: isize, text: &str) {
        let cols = s.cols();
        let line = s.line_mut(y);
        if line.is_empty() {
            // a fresh ring slot scrolled into view
            line.resize(cols, Glyph::default());
        }
        for (x, c) in text.chars().enumerate() {
            line[x].rune = c;
        }
    }

    fn row_text(s: &Screen, y: isize) -> String {
        let line = s.line(y);
        line.cells()[..line.used_length()]
            .iter()
            .map(|g| g.display_rune())
            .collect()
    }

    #[test]
    fn ring_size_includes_spare_slot() {
        let s = screen(100, 24, 80);
        assert_eq!(s.ring_len(), 100 + 24 + 1);
        let s = screen(0, 24, 80);
        assert_eq!(s.ring_len(), 25);
    }

    #[test]
    fn buf_pos_stays_in_ring() {
        let mut s = screen(10, 4, 20);
        for _ in 0..50 {
            s.shift_view_down(3);
            for y in 0..4 {
                assert!(s.buf_pos(y) < s.ring_len());
            }
        }
    }

    #[test]
    fn shift_view_moves_rows_to_history() {
        let mut s = screen(10, 4, 20);
        write_row(&mut s, 0, "oldest");
        s.shift_view_down(1);
        // the shifted-out row is now at history position -1
        assert_eq!(row_text(&s, -1), "oldest");

        s.shift_view_up(1);
        assert_eq!(row_text(&s, 0), "oldest");
    }

    #[test]
    fn history_scrolling_clamps_to_content() {
        let mut s = screen(10, 4, 20);
        write_row(&mut s, 0, "a");
        write_row(&mut s, 1, "b");
        s.shift_view_down(2); // two rows into history

        // only two rows of real content exist
        assert_eq!(s.scroll_history_up(100), 2);
        assert_eq!(row_text(&s, 0), "a");
        assert_eq!(s.scroll_history_down(5), 2);
        assert!(!s.is_scrolled());
    }

    #[test]
    fn scrollback_is_monotone() {
        let mut s = screen(10, 4, 20);
        for i in 0..6 {
            write_row(&mut s, 0, &format!("line{i}"));
            s.shift_view_down(1);
        }

        let up = s.scroll_history_up(4);
        let down = s.scroll_history_down(up);
        assert!(down <= 4);
        assert_eq!(up, down, "no new output arrived in between");
    }

    #[test]
    fn alt_screen_has_no_history() {
        let mut s = Screen::new(0, true);
        s.set_dimension(TermSize { cols: 10, rows: 4 }, Glyph::default())
            .unwrap();
        assert_eq!(s.scroll_history_up(3), 0);
    }

    #[test]
    fn save_restore_scroll_state() {
        let mut s = screen(10, 4, 20);
        for i in 0..6 {
            write_row(&mut s, 0, &format!("line{i}"));
            s.shift_view_down(1);
        }

        s.scroll_history_up(3);
        assert!(s.save_scroll_state());
        s.stop_scrolling();
        assert!(s.restore_scroll_state());
        assert_eq!(s.scroll_offset(), 3);

        // without being scrolled, restore is a no-op success
        s.stop_scrolling();
        assert!(!s.save_scroll_state());
        assert!(s.restore_scroll_state());
        assert!(!s.is_scrolled());
    }

    #[test]
    fn restore_fails_once_position_overwritten() {
        let mut s = screen(4, 4, 20);
        for _ in 0..4 {
            s.shift_view_down(1);
        }
        s.scroll_history_up(4);
        assert!(s.save_scroll_state());
        s.stop_scrolling();

        // rotate far enough that the saved slot is back on the screen
        for _ in 0..5 {
            s.shift_view_down(1);
        }
        assert!(!s.restore_scroll_state());
        assert!(!s.is_scrolled(), "failed restore resets to live view");
    }

    #[test]
    fn growing_rows_beyond_ring_is_rejected() {
        let mut s = screen(2, 4, 20);
        s.shift_view_down(1);
        let err = s
            .set_dimension(TermSize { cols: 20, rows: 40 }, Glyph::default())
            .unwrap_err();
        assert!(matches!(err, Error::RingTooSmall));
    }

    #[test]
    fn shrinking_rows_clears_dropped_bottom_lines() {
        let mut s = screen(10, 4, 20);
        write_row(&mut s, 3, "bottom");
        s.set_dimension(TermSize { cols: 20, rows: 2 }, Glyph::default())
            .unwrap();
        s.set_dimension(TermSize { cols: 20, rows: 4 }, Glyph::default())
            .unwrap();
        assert_eq!(row_text(&s, 3), "");
    }

    #[test]
    fn as_text_stops_after_cursor_row() {
        let mut s = screen(10, 4, 20);
        write_row(&mut s, 0, "hello");
        write_row(&mut s, 1, "$ grep hello");
        write_row(&mut s, 2, "stale");
        let mut cursor = Cursor::default();
        cursor.pos = CharPos { x: 0, y: 1 };

        // rows past the cursor line are suppressed
        assert_eq!(s.as_text(&cursor), "hello\n$ grep hello\n");
    }

    #[test]
    fn as_text_includes_history_before_screen() {
        let mut s = screen(10, 2, 20);
        write_row(&mut s, 0, "first");
        s.shift_view_down(1);
        write_row(&mut s, 0, "second");
        write_row(&mut s, 1, "x");

        let mut cursor = Cursor::default();
        cursor.pos = CharPos { x: 0, y: 1 };
        assert_eq!(s.as_text(&cursor), "first\nsecond\nx\n");
    }

    #[test]
    fn as_text_skips_wide_dummies() {
        let mut s = screen(10, 2, 20);
        {
            let line = s.line_mut(0);
            line[0].rune = '日';
            line[0].attrs.insert(Attr::WIDE);
            line[1].rune = ' ';
            line[1].attrs.insert(Attr::DUMMY);
            line[2].rune = '!';
        }
        let cursor = Cursor::default();
        assert_eq!(s.as_text(&cursor), "日!\n");
    }
}
