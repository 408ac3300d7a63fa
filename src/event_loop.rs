//! The single-threaded cooperative event loop.
//!
//! Three input sources are multiplexed: the pty, the IPC endpoint (listener
//! or active connection, never both) and a self-pipe carrying SIGCHLD. All
//! work runs to completion between poll waits; drawing is coalesced so a
//! burst of output produces one frame.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

use crate::config::{BLINK_TIMEOUT, MAX_LATENCY, MIN_LATENCY};
use crate::error::{Error, Result};
use crate::ipc::{IpcHandler, IpcRequest};
use crate::term::{Attr, CharPos, Glyph, Renderer, Term, TermEvent, TermSize, WinMode};
use crate::tty::Tty;

/// Write end of the SIGCHLD self-pipe, for the signal handler.
static SIGCHLD_PIPE: AtomicI32 = AtomicI32::new(-1);

extern "C" fn sigchld_handler(_signo: libc::c_int) {
    let fd = SIGCHLD_PIPE.load(Ordering::Relaxed);
    if fd >= 0 {
        unsafe {
            libc::write(fd, b"c".as_ptr().cast(), 1);
        }
    }
}

pub struct EventLoop<R: Renderer> {
    term: Term,
    tty: Tty,
    ipc: IpcHandler,
    renderer: R,
    sigchld_rx: RawFd,
    sigchld_tx: RawFd,
}

impl<R: Renderer> EventLoop<R> {
    pub fn new(term: Term, tty: Tty, ipc: IpcHandler, renderer: R) -> Result<Self> {
        let mut fds = [0i32; 2];
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) } < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        SIGCHLD_PIPE.store(fds[1], Ordering::Relaxed);

        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = sigchld_handler as extern "C" fn(libc::c_int) as usize;
            action.sa_flags = libc::SA_RESTART | libc::SA_NOCLDSTOP;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(libc::SIGCHLD, &action, std::ptr::null_mut()) < 0 {
                return Err(Error::Io(std::io::Error::last_os_error()));
            }
        }

        Ok(Self {
            term,
            tty,
            ipc,
            renderer,
            sigchld_rx: fds[0],
            sigchld_tx: fds[1],
        })
    }

    pub fn term(&self) -> &Term {
        &self.term
    }

    pub fn term_mut(&mut self) -> &mut Term {
        &mut self.term
    }

    /// Forward user input to the child; typing snaps back to the live view.
    pub fn send_input(&mut self, bytes: &[u8]) -> Result<()> {
        self.term.stop_scrolling();
        self.tty.write(bytes, true, &mut self.term)?;
        self.flush_terminal_io()
    }

    /// Apply a window size change to terminal, pty and child.
    pub fn resize(&mut self, size: TermSize, pixels: (u16, u16)) -> Result<()> {
        self.term.resize(size)?;
        self.tty.resize(size, pixels)?;
        Ok(())
    }

    /// Run until the child exits; returns its exit status.
    pub fn run(&mut self) -> Result<i32> {
        let mut drawing = false;
        let mut draw_start = Instant::now();
        let mut blink_mark = Instant::now();
        let mut timeout: Option<Duration> = None;

        loop {
            let (ipc_fd, ipc_writable) = self.ipc.poll_target();
            let mut fds = [
                libc::pollfd {
                    fd: self.tty.fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.sigchld_rx,
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: ipc_fd,
                    events: if ipc_writable {
                        libc::POLLOUT
                    } else {
                        libc::POLLIN
                    },
                    revents: 0,
                },
            ];

            let timeout_ms = timeout
                .map(|d| i32::try_from(d.as_millis()).unwrap_or(i32::MAX))
                .unwrap_or(-1);
            let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::Io(err));
            }

            let mut draw_event = false;

            if fds[0].revents & (libc::POLLIN | libc::POLLHUP) != 0 {
                match self.tty.read_into(&mut self.term) {
                    Ok(_) => draw_event = true,
                    Err(Error::ChildExited(code)) => {
                        self.drain_events();
                        return Ok(code);
                    }
                    Err(err) => return Err(err),
                }
            }

            if fds[1].revents & libc::POLLIN != 0 {
                let mut sink = [0u8; 16];
                unsafe {
                    libc::read(self.sigchld_rx, sink.as_mut_ptr().cast(), sink.len());
                }
                if let Some(code) = self.tty.child_exited() {
                    self.drain_events();
                    return Ok(code);
                }
            }

            if fds[2].revents != 0 {
                let cwd = self.tty.foreground_cwd();
                if let Some(request) = self.ipc.handle_event(&self.term, cwd) {
                    self.apply_ipc_request(request);
                }
            }

            self.flush_terminal_io()?;

            /*
             * To reduce flicker and tearing, when new content triggers
             * drawing we first wait a bit to see whether more arrives, and
             * draw once the stream goes idle. The wait shrinks as the
             * latency window is used up, so a steady flood still produces
             * a frame every MAX_LATENCY.
             */
            if draw_event {
                if !drawing {
                    draw_start = Instant::now();
                    drawing = true;
                }

                let elapsed = draw_start.elapsed();
                if elapsed < MAX_LATENCY {
                    let left = (MAX_LATENCY - elapsed).as_secs_f64() / MAX_LATENCY.as_secs_f64();
                    let wait = MIN_LATENCY.mul_f64(left);
                    if !wait.is_zero() {
                        timeout = Some(wait);
                        continue;
                    }
                }
            }

            timeout = None;

            if !BLINK_TIMEOUT.is_zero() && self.term.exists_blinking_glyph() {
                let since = blink_mark.elapsed();
                if since >= BLINK_TIMEOUT {
                    let shown = self.term.win_mode().contains(WinMode::BLINK);
                    self.term.set_win_mode(WinMode::BLINK, !shown);
                    self.term.set_dirty_by_attr(Attr::BLINK);
                    blink_mark = Instant::now();
                }
                timeout = Some(BLINK_TIMEOUT.saturating_sub(blink_mark.elapsed()));
            }

            self.term.draw(&mut self.renderer);
            drawing = false;
        }
    }

    /// Drain queued device replies and window operations.
    fn flush_terminal_io(&mut self) -> Result<()> {
        for response in self.term.take_pending_responses() {
            self.tty.write(&response, false, &mut self.term)?;
        }
        self.drain_events();
        Ok(())
    }

    /// Forward window operations to the renderer; safe to call after the
    /// child is gone.
    fn drain_events(&mut self) {
        for event in self.term.take_pending_events() {
            match event {
                TermEvent::ClipboardSet(text) => self.renderer.set_clipboard(&text),
                TermEvent::Bell => tracing::debug!("bell"),
                TermEvent::SetTitle(title) => {
                    tracing::debug!("title changed: {title:?}");
                }
                TermEvent::SetIconTitle(title) => {
                    tracing::debug!("icon title changed: {title:?}");
                }
                TermEvent::ColorsChanged
                | TermEvent::WinModeChanged(_)
                | TermEvent::CursorStyleChanged(_) => {
                    // picked up by the renderer on the next frame
                }
            }
        }
    }

    fn apply_ipc_request(&mut self, request: IpcRequest) {
        match request {
            IpcRequest::SetTheme(name) => {
                // color tables live with the window system; reflect the
                // change so an attached renderer reloads them
                tracing::info!("theme switch requested: {name}");
                self.term.palette_mut().reset_all();
                self.term.set_all_dirty();
            }
        }
    }
}

impl<R: Renderer> Drop for EventLoop<R> {
    fn drop(&mut self) {
        self.tty.hangup();
        SIGCHLD_PIPE.store(-1, Ordering::Relaxed);
        unsafe {
            libc::close(self.sigchld_rx);
            libc::close(self.sigchld_tx);
        }
    }
}

/// Renderer used when no window system is attached: tracks nothing and
/// accepts every draw call.
#[derive(Debug, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn can_draw(&self) -> bool {
        true
    }

    fn draw_glyphs(&mut self, _glyphs: &[Glyph], _origin: CharPos) {}

    fn draw_cursor(&mut self, _pos: CharPos, _glyph: &Glyph) {}

    fn clear_cursor(&mut self, _pos: CharPos, _glyph: &Glyph) {}

    fn finish_draw(&mut self) {}

    fn set_input_spot(&mut self, _pos: CharPos) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[derive(Default)]
    struct RecordingRenderer {
        clipboard: Option<String>,
    }

    impl Renderer for RecordingRenderer {
        fn can_draw(&self) -> bool {
            true
        }

        fn draw_glyphs(&mut self, _glyphs: &[Glyph], _origin: CharPos) {}

        fn draw_cursor(&mut self, _pos: CharPos, _glyph: &Glyph) {}

        fn clear_cursor(&mut self, _pos: CharPos, _glyph: &Glyph) {}

        fn finish_draw(&mut self) {}

        fn set_input_spot(&mut self, _pos: CharPos) {}

        fn set_clipboard(&mut self, text: &str) {
            self.clipboard = Some(text.to_string());
        }
    }

    fn session(command: &[&str]) -> EventLoop<RecordingRenderer> {
        use std::sync::atomic::AtomicUsize;
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        let config = Config {
            rows: 6,
            cols: 40,
            allow_window_ops: true,
            command: command.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let term = Term::new(&config).unwrap();
        let tty = Tty::spawn(&config).unwrap();
        let ipc = IpcHandler::with_address(&format!(
            "nst-loop-test-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ))
        .unwrap();
        EventLoop::new(term, tty, ipc, RecordingRenderer::default()).unwrap()
    }

    #[test]
    fn loop_exits_with_child_status() {
        let mut event_loop = session(&["/bin/sh", "-c", "printf output; exit 3"]);
        let status = event_loop.run().unwrap();
        assert_eq!(status, 3);
    }

    #[test]
    fn child_output_reaches_screen_through_loop() {
        let mut event_loop = session(&["/bin/sh", "-c", "printf 'loop says hi'"]);
        event_loop.run().unwrap();
        let text = event_loop.term().history_text();
        assert!(text.contains("loop says hi"), "got: {text:?}");
    }

    #[test]
    fn osc52_reaches_renderer_clipboard() {
        let mut event_loop = session(&[
            "/bin/sh",
            "-c",
            "printf '\\033]52;c;aGVsbG8=\\007'",
        ]);
        event_loop.run().unwrap();
        assert_eq!(event_loop.renderer.clipboard.as_deref(), Some("hello"));
    }
}
