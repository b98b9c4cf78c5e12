use std::error::Error;
use std::fmt;

pub type ErrorT = Box<dyn Error + Sync + Send>;
pub type ResultT<A> = Result<A, ErrorT>;

/// The taxonomy of per-command failures (spec §7). Each variant carries
/// enough context to render the exact wire text. A `CommandError` never
/// closes the connection on its own — the dispatcher always turns it into
/// a reply frame and keeps reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    WrongType,
    WrongArity(String),
    UnknownCommand(String),
    InvalidArgument(String),
    StreamId(String),
    Internal(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::WrongType => {
                write!(f, "Operation against a key holding the wrong kind of value")
            }
            CommandError::WrongArity(cmd) => {
                write!(f, "wrong number of arguments for '{}' command", cmd)
            }
            CommandError::UnknownCommand(name) => write!(f, "unknown command '{}'", name),
            CommandError::InvalidArgument(msg) => write!(f, "{}", msg),
            CommandError::StreamId(msg) => write!(f, "{}", msg),
            CommandError::Internal(_) => write!(f, "internal"),
        }
    }
}

impl Error for CommandError {}

impl CommandError {
    /// Convenience wrapper around `RespFrame::from` so call sites at the
    /// dispatch boundary don't need to name the target type.
    pub fn into_resp(self) -> super::protocol::RespFrame {
        self.into()
    }
}
