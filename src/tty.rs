//! Child process and pty plumbing.
//!
//! Owns the pty master, the shell child and the unprocessed byte tail.
//! Reads feed `Term::write`; writes are throttled and interleaved with
//! reads so a flooded line cannot deadlock the terminal.

use std::io::{ErrorKind, Read, Write};
use std::os::fd::RawFd;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::term::{Term, TermMode, TermSize};

const READ_BUF_SIZE: usize = 8192;

/// Per-write cap; larger writes can clog a slow line.
const WRITE_CHUNK: usize = 256;

pub struct Tty {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    fd: RawFd,
    /// Unprocessed bytes, usually an incomplete UTF-8 tail.
    pending: Vec<u8>,
}

impl Tty {
    /// Allocate a pty and spawn the configured command, or `$SHELL`.
    pub fn spawn(config: &Config) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows as u16,
                cols: config.cols as u16,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| Error::Pty(err.to_string()))?;

        let mut cmd = if config.command.is_empty() {
            let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".into());
            CommandBuilder::new(shell)
        } else {
            let mut cmd = CommandBuilder::new(&config.command[0]);
            cmd.args(&config.command[1..]);
            cmd
        };
        cmd.env("TERM", "nst-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|err| Error::Pty(err.to_string()))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| Error::Pty(err.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|err| Error::Pty(err.to_string()))?;
        let fd = pair
            .master
            .as_raw_fd()
            .ok_or_else(|| Error::Pty("pty master exposes no file descriptor".into()))?;

        Ok(Self {
            master: pair.master,
            child,
            reader,
            writer,
            fd,
            pending: Vec::new(),
        })
    }

    /// The master fd, for the event loop poller.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Read available pty output into the terminal.
    ///
    /// Incomplete trailing UTF-8 sequences are retained for the next call.
    pub fn read_into(&mut self, term: &mut Term) -> Result<usize> {
        let mut buf = [0u8; READ_BUF_SIZE];
        let n = match self.reader.read(&mut buf) {
            Ok(0) => return Err(Error::ChildExited(self.exit_status())),
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => return Ok(0),
            // pty read errors after child exit surface as EIO
            Err(err) if err.raw_os_error() == Some(libc::EIO) => {
                return Err(Error::ChildExited(self.exit_status()))
            }
            Err(err) => return Err(Error::Io(err)),
        };

        self.pending.extend_from_slice(&buf[..n]);
        let written = term.write(&self.pending, false);
        self.pending.drain(..written);
        Ok(n)
    }

    /// Write bytes towards the child, echoing locally when requested and
    /// the terminal is in echo mode.
    pub fn write(&mut self, data: &[u8], may_echo: bool, term: &mut Term) -> Result<()> {
        if may_echo && term.mode().contains(TermMode::ECHO) {
            term.write(data, true);
        }

        if !term.mode().contains(TermMode::CRLF) {
            return self.write_raw(data, term);
        }

        // LNM set: expand \r the way the kernel handles ONLCR
        let mut rest = data;
        while !rest.is_empty() {
            if rest[0] == b'\r' {
                self.write_raw(b"\r\n", term)?;
                rest = &rest[1..];
            } else {
                let chunk = match rest.iter().position(|&b| b == b'\r') {
                    Some(idx) => &rest[..idx],
                    None => rest,
                };
                self.write_raw(chunk, term)?;
                rest = &rest[chunk.len()..];
            }
        }
        Ok(())
    }

    /// Partial-write-aware pty write.
    ///
    /// Waits for writability, writes at most `WRITE_CHUNK` bytes at a time
    /// and drains pending child output whenever the line would block.
    fn write_raw(&mut self, data: &[u8], term: &mut Term) -> Result<()> {
        let mut remaining = data;
        let mut lim = WRITE_CHUNK;

        while !remaining.is_empty() {
            let mut pollfd = libc::pollfd {
                fd: self.fd,
                events: libc::POLLIN | libc::POLLOUT,
                revents: 0,
            };
            let ret = unsafe { libc::poll(&mut pollfd, 1, -1) };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::Io(err));
            }

            if pollfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
                return Err(Error::Pty("pty closed while writing".into()));
            }

            if pollfd.revents & libc::POLLOUT != 0 {
                let chunk = remaining.len().min(lim);
                let written = self.writer.write(&remaining[..chunk]).map_err(Error::Io)?;
                self.writer.flush().map_err(Error::Io)?;

                if written < remaining.len() {
                    // the buffer is filling up again; empty it
                    if remaining.len() < lim {
                        lim = self.read_into(term)?;
                    }
                    remaining = &remaining[written..];
                } else {
                    break;
                }
            }

            if pollfd.revents & libc::POLLIN != 0 {
                lim = self.read_into(term)?;
            }

            // hangup with nothing readable or writable left: give up
            if pollfd.revents & libc::POLLHUP != 0
                && pollfd.revents & (libc::POLLIN | libc::POLLOUT) == 0
            {
                return Err(Error::Pty("pty closed while writing".into()));
            }
        }
        Ok(())
    }

    /// Propagate a window size change to the child.
    pub fn resize(&self, size: TermSize, pixels: (u16, u16)) -> Result<()> {
        self.master
            .resize(PtySize {
                rows: size.rows as u16,
                cols: size.cols as u16,
                pixel_width: pixels.0,
                pixel_height: pixels.1,
            })
            .map_err(|err| Error::Pty(err.to_string()))
    }

    /// Working directory of the foreground process group, for IPC clients.
    pub fn foreground_cwd(&self) -> Option<String> {
        let pid = self.master.process_group_leader()?;
        std::fs::read_link(format!("/proc/{pid}/cwd"))
            .ok()
            .map(|path| path.to_string_lossy().into_owned())
    }

    /// Non-blocking check whether the child is gone.
    pub fn child_exited(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code() as i32),
            _ => None,
        }
    }

    fn exit_status(&mut self) -> i32 {
        // the pty EOF can arrive a moment before the child is reapable
        for _ in 0..100 {
            if let Some(code) = self.child_exited() {
                return code;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        0
    }

    /// Ask the child to leave; used during shutdown.
    pub fn hangup(&mut self) {
        let _ = self.child.kill();
    }
}
