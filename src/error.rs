use std::io;

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("pty error: {0}")]
    Pty(String),

    #[error("ipc error: {0}")]
    Ipc(#[source] io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// The ring buffer never changes size once history is in use, so the
    /// screen cannot grow beyond it.
    #[error("requested terminal size larger than scroll ring buffer")]
    RingTooSmall,

    #[error("child process exited")]
    ChildExited(i32),
}

pub type Result<T> = std::result::Result<T, Error>;
