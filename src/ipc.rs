//! The IPC endpoint: an abstract-namespace SOCK_SEQPACKET socket serving
//! screen and history snapshots.
//!
//! One client at a time; while a session is active the listener is not
//! monitored. A session walks WAITING -> RECEIVING -> SENDING -> WAITING,
//! the poll loop drives it with exactly one fd registered per state.

use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;

use crate::error::{Error, Result};
use crate::term::Term;

/// Largest packet sent in one piece.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

const STATUS_OK: u32 = 0;
const STATUS_ERROR: u32 = 1;

/// Client request opcodes, sent as a 2-byte little-endian value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Message {
    /// Store a snapshot of the current buffer for later retrieval.
    SnapshotHistory = 1,
    /// Current buffer content including scrollback.
    GetHistory = 2,
    /// The buffer stored by the last SnapshotHistory.
    GetSnapshot = 3,
    /// Echo test.
    Ping = 4,
    /// Working directory of the foreground child process.
    GetCwd = 5,
    /// Switch the color theme; payload is a NUL-terminated name.
    SetTheme = 6,
}

impl Message {
    fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1 => Self::SnapshotHistory,
            2 => Self::GetHistory,
            3 => Self::GetSnapshot,
            4 => Self::Ping,
            5 => Self::GetCwd,
            6 => Self::SetTheme,
            _ => return None,
        })
    }
}

/// Requests the endpoint cannot answer by itself and hands to the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcRequest {
    SetTheme(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Waiting,
    Receiving,
    Sending,
}

pub struct IpcHandler {
    listener: RawFd,
    connection: Option<RawFd>,
    state: SessionState,
    snapshot: String,
    /// Outgoing packets: the status word first, then data chunks.
    send_queue: VecDeque<Vec<u8>>,
}

impl IpcHandler {
    /// The abstract socket name; clients honor the same variable.
    pub fn address() -> String {
        std::env::var("NST_IPC_ADDR")
            .unwrap_or_else(|_| format!("nst-ipc-{}", std::process::id()))
    }

    pub fn new() -> Result<Self> {
        Self::with_address(&Self::address())
    }

    pub fn with_address(address: &str) -> Result<Self> {
        let listener = unsafe {
            libc::socket(
                libc::AF_UNIX,
                libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC,
                0,
            )
        };
        if listener < 0 {
            return Err(Error::Ipc(io::Error::last_os_error()));
        }

        let (sockaddr, len) = abstract_sockaddr(address)?;
        let ret = unsafe {
            libc::bind(
                listener,
                &sockaddr as *const libc::sockaddr_un as *const libc::sockaddr,
                len,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(listener) };
            return Err(Error::Ipc(err));
        }

        if unsafe { libc::listen(listener, 5) } < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(listener) };
            return Err(Error::Ipc(err));
        }

        Ok(Self {
            listener,
            connection: None,
            state: SessionState::Waiting,
            snapshot: String::new(),
            send_queue: VecDeque::new(),
        })
    }

    /// Which fd the loop should monitor, and whether for writability.
    pub fn poll_target(&self) -> (RawFd, bool) {
        match (self.state, self.connection) {
            (SessionState::Waiting, _) | (_, None) => (self.listener, false),
            (SessionState::Receiving, Some(fd)) => (fd, false),
            (SessionState::Sending, Some(fd)) => (fd, true),
        }
    }

    /// Advance the session after the polled fd became ready.
    pub fn handle_event(&mut self, term: &Term, cwd: Option<String>) -> Option<IpcRequest> {
        match self.state {
            SessionState::Waiting => {
                self.accept_connection();
                None
            }
            SessionState::Receiving => self.receive_command(term, cwd),
            SessionState::Sending => {
                self.send_pending();
                None
            }
        }
    }

    fn accept_connection(&mut self) {
        let fd = unsafe { libc::accept(self.listener, std::ptr::null_mut(), std::ptr::null_mut()) };
        if fd < 0 {
            tracing::warn!("ipc: accept failed: {}", io::Error::last_os_error());
            return;
        }

        // only the owning user may attach
        match peer_uid(fd) {
            Some(uid) if uid == unsafe { libc::getuid() } => {}
            Some(uid) => {
                tracing::warn!("ipc: rejecting connection from uid {uid}");
                unsafe { libc::close(fd) };
                return;
            }
            None => {
                tracing::warn!("ipc: could not determine peer credentials");
                unsafe { libc::close(fd) };
                return;
            }
        }

        self.connection = Some(fd);
        self.state = SessionState::Receiving;
    }

    fn receive_command(&mut self, term: &Term, cwd: Option<String>) -> Option<IpcRequest> {
        let fd = self.connection?;

        let mut buf = [0u8; 2 + 256];
        let n = unsafe { libc::recv(fd, buf.as_mut_ptr().cast(), buf.len(), 0) };
        if n < 0 {
            tracing::warn!("ipc: receive error: {}", io::Error::last_os_error());
            self.close_session();
            return None;
        }
        let n = n as usize;
        if n < 2 {
            tracing::warn!("ipc: short message, closing session");
            self.fail_session();
            return None;
        }

        let opcode = u16::from_le_bytes([buf[0], buf[1]]);
        let payload = &buf[2..n];

        let Some(message) = Message::from_u16(opcode) else {
            tracing::warn!("ipc: bad request {opcode}, closing session");
            self.fail_session();
            return None;
        };

        let mut request = None;
        match message {
            Message::SnapshotHistory => {
                self.snapshot = term.history_text();
                self.queue_reply(STATUS_OK, &[]);
            }
            Message::GetHistory => {
                let history = term.history_text();
                self.queue_reply(STATUS_OK, history.as_bytes());
            }
            Message::GetSnapshot => {
                let snapshot = self.snapshot.clone();
                self.queue_reply(STATUS_OK, snapshot.as_bytes());
            }
            Message::Ping => {
                self.queue_reply(STATUS_OK, &(Message::Ping as u16).to_le_bytes());
            }
            Message::GetCwd => match cwd {
                Some(cwd) => self.queue_reply(STATUS_OK, cwd.as_bytes()),
                None => self.queue_reply(STATUS_ERROR, &[]),
            },
            Message::SetTheme => {
                let name = payload.split(|&b| b == 0).next().unwrap_or(&[]);
                match std::str::from_utf8(name) {
                    Ok(name) if !name.is_empty() => {
                        request = Some(IpcRequest::SetTheme(name.to_string()));
                        self.queue_reply(STATUS_OK, &[]);
                    }
                    _ => {
                        tracing::warn!("ipc: malformed theme name");
                        self.fail_session();
                        return None;
                    }
                }
            }
        }

        self.state = SessionState::Sending;
        request
    }

    /// Queue the status packet plus data split into bounded chunks.
    fn queue_reply(&mut self, status: u32, data: &[u8]) {
        self.send_queue.clear();
        self.send_queue.push_back(status.to_le_bytes().to_vec());
        for chunk in data.chunks(MAX_CHUNK_SIZE) {
            self.send_queue.push_back(chunk.to_vec());
        }
    }

    fn send_pending(&mut self) {
        let Some(fd) = self.connection else {
            self.close_session();
            return;
        };

        let Some(packet) = self.send_queue.pop_front() else {
            self.close_session();
            return;
        };

        let n = unsafe {
            libc::send(
                fd,
                packet.as_ptr().cast(),
                packet.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if n < 0 {
            tracing::warn!(
                "ipc: failed to send reply: {}; closing session",
                io::Error::last_os_error()
            );
            self.close_session();
            return;
        }

        if self.send_queue.is_empty() {
            self.close_session();
        }
    }

    /// Best effort error status, then tear the session down.
    fn fail_session(&mut self) {
        if let Some(fd) = self.connection {
            let status = STATUS_ERROR.to_le_bytes();
            unsafe {
                libc::send(fd, status.as_ptr().cast(), status.len(), libc::MSG_NOSIGNAL);
            }
        }
        self.close_session();
    }

    /// Release session state and listen for the next client.
    fn close_session(&mut self) {
        if let Some(fd) = self.connection.take() {
            unsafe { libc::close(fd) };
        }
        self.send_queue.clear();
        self.state = SessionState::Waiting;
    }
}

impl Drop for IpcHandler {
    fn drop(&mut self) {
        self.close_session();
        unsafe { libc::close(self.listener) };
    }
}

/// Build an abstract-namespace socket address (leading NUL byte).
fn abstract_sockaddr(name: &str) -> Result<(libc::sockaddr_un, libc::socklen_t)> {
    let mut sockaddr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    sockaddr.sun_family = libc::AF_UNIX as libc::sa_family_t;

    let bytes = name.as_bytes();
    if bytes.len() + 1 > sockaddr.sun_path.len() {
        return Err(Error::Ipc(io::Error::new(
            io::ErrorKind::InvalidInput,
            "socket name too long",
        )));
    }
    for (i, &b) in bytes.iter().enumerate() {
        sockaddr.sun_path[i + 1] = b as libc::c_char;
    }

    let len = (std::mem::size_of::<libc::sa_family_t>() + 1 + bytes.len()) as libc::socklen_t;
    Ok((sockaddr, len))
}

fn peer_uid(fd: RawFd) -> Option<libc::uid_t> {
    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            (&mut cred as *mut libc::ucred).cast(),
            &mut len,
        )
    };
    if ret < 0 {
        None
    } else {
        Some(cred.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    struct Client {
        fd: RawFd,
    }

    impl Client {
        fn connect(address: &str) -> Client {
            let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_SEQPACKET, 0) };
            assert!(fd >= 0);
            let (sockaddr, len) = abstract_sockaddr(address).unwrap();
            let ret = unsafe {
                libc::connect(
                    fd,
                    &sockaddr as *const libc::sockaddr_un as *const libc::sockaddr,
                    len,
                )
            };
            assert_eq!(ret, 0, "connect failed: {}", io::Error::last_os_error());
            Client { fd }
        }

        fn send(&self, data: &[u8]) {
            let n = unsafe { libc::send(self.fd, data.as_ptr().cast(), data.len(), 0) };
            assert_eq!(n as usize, data.len());
        }

        fn recv(&self) -> Vec<u8> {
            let mut buf = vec![0u8; MAX_CHUNK_SIZE];
            let n = unsafe { libc::recv(self.fd, buf.as_mut_ptr().cast(), buf.len(), 0) };
            assert!(n >= 0, "recv failed: {}", io::Error::last_os_error());
            buf.truncate(n as usize);
            buf
        }
    }

    impl Drop for Client {
        fn drop(&mut self) {
            unsafe { libc::close(self.fd) };
        }
    }

    fn unique_address(tag: &str) -> String {
        format!("nst-test-{}-{}", std::process::id(), tag)
    }

    fn run_session(handler: &mut IpcHandler, term: &Term) -> Option<IpcRequest> {
        // accept, receive, then flush all queued packets
        handler.handle_event(term, None);
        let request = handler.handle_event(term, None);
        while handler.connection.is_some() {
            handler.handle_event(term, None);
        }
        request
    }

    fn term_with_text(text: &[u8]) -> Term {
        let config = Config {
            rows: 5,
            cols: 40,
            ..Default::default()
        };
        let mut term = Term::new(&config).unwrap();
        term.write(text, false);
        term
    }

    #[test]
    fn ping_echoes_opcode() {
        let address = unique_address("ping");
        let mut handler = IpcHandler::with_address(&address).unwrap();
        let term = term_with_text(b"");

        let client = Client::connect(&address);
        client.send(&4u16.to_le_bytes());
        run_session(&mut handler, &term);

        assert_eq!(client.recv(), STATUS_OK.to_le_bytes().to_vec());
        assert_eq!(client.recv(), 4u16.to_le_bytes().to_vec());
    }

    #[test]
    fn get_history_returns_screen_text() {
        let address = unique_address("hist");
        let mut handler = IpcHandler::with_address(&address).unwrap();
        let term = term_with_text(b"hello ipc\r\n");

        let client = Client::connect(&address);
        client.send(&2u16.to_le_bytes());
        run_session(&mut handler, &term);

        assert_eq!(client.recv(), STATUS_OK.to_le_bytes().to_vec());
        let data = client.recv();
        assert_eq!(String::from_utf8_lossy(&data), "hello ipc\n");
    }

    #[test]
    fn snapshot_then_get_snapshot() {
        let address = unique_address("snap");
        let mut handler = IpcHandler::with_address(&address).unwrap();
        let term = term_with_text(b"frozen\r\n");

        let client = Client::connect(&address);
        client.send(&1u16.to_le_bytes());
        run_session(&mut handler, &term);
        assert_eq!(client.recv(), STATUS_OK.to_le_bytes().to_vec());

        // a second session reads the stored snapshot
        let term2 = term_with_text(b"changed\r\n");
        let client = Client::connect(&address);
        client.send(&3u16.to_le_bytes());
        run_session(&mut handler, &term2);
        assert_eq!(client.recv(), STATUS_OK.to_le_bytes().to_vec());
        assert_eq!(String::from_utf8_lossy(&client.recv()), "frozen\n");
    }

    #[test]
    fn set_theme_is_forwarded() {
        let address = unique_address("theme");
        let mut handler = IpcHandler::with_address(&address).unwrap();
        let term = term_with_text(b"");

        let client = Client::connect(&address);
        let mut msg = 6u16.to_le_bytes().to_vec();
        msg.extend_from_slice(b"solarized\0");
        client.send(&msg);

        let request = run_session(&mut handler, &term);
        assert_eq!(request, Some(IpcRequest::SetTheme("solarized".into())));
        assert_eq!(client.recv(), STATUS_OK.to_le_bytes().to_vec());
    }

    #[test]
    fn unknown_opcode_fails_session() {
        let address = unique_address("bad");
        let mut handler = IpcHandler::with_address(&address).unwrap();
        let term = term_with_text(b"");

        let client = Client::connect(&address);
        client.send(&99u16.to_le_bytes());
        run_session(&mut handler, &term);

        assert_eq!(client.recv(), STATUS_ERROR.to_le_bytes().to_vec());
        // the endpoint accepts new sessions afterwards
        let client = Client::connect(&address);
        client.send(&4u16.to_le_bytes());
        run_session(&mut handler, &term);
        assert_eq!(client.recv(), STATUS_OK.to_le_bytes().to_vec());
    }
}
