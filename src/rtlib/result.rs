use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
};
use tracing::warn;

/// Error taxonomy of the thumbnailing pipeline. Everything except
/// [`ThumbError::Cancelled`] eventually degrades to a placeholder image at
/// the engine boundary instead of reaching the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThumbError {
    /// Authentication failure, unreachable host, or a dropped session.
    Connectivity(String),
    /// A command was issued before `connect()` succeeded.
    NotConnected,
    /// A remote command or transfer exceeded its bounded wait.
    Timeout(String),
    RemoteFileNotFound(String),
    /// Tool detection and installation both failed.
    ToolUnavailable(String),
    UnsupportedPlatform(String),
    /// All generation attempts produced empty or undecodable frames.
    Generation(String),
    /// The path became invisible; an early silent exit, not a failure.
    Cancelled,
    /// Disk cache read/write failure, treated as a cache miss.
    CacheIo(String),
    Io(String),
}

impl Display for ThumbError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ThumbError::Connectivity(msg) => write!(f, "connectivity error: {msg}"),
            ThumbError::NotConnected => write!(f, "not connected"),
            ThumbError::Timeout(msg) => write!(f, "timed out: {msg}"),
            ThumbError::RemoteFileNotFound(p) => write!(f, "remote file not found: {p}"),
            ThumbError::ToolUnavailable(msg) => write!(f, "tool unavailable: {msg}"),
            ThumbError::UnsupportedPlatform(msg) => write!(f, "unsupported platform: {msg}"),
            ThumbError::Generation(msg) => write!(f, "generation failed: {msg}"),
            ThumbError::Cancelled => write!(f, "cancelled"),
            ThumbError::CacheIo(msg) => write!(f, "cache io error: {msg}"),
            ThumbError::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}
impl Error for ThumbError {}

pub type ThumbResult<U> = Result<U, ThumbError>;

/// Creates a [`ThumbError::Generation`] with a formatted message.
#[macro_export]
macro_rules! generr {
    ($($arg:tt)*) => {
        $crate::result::ThumbError::Generation(format!($($arg)*))
    }
}

/// Creates a [`ThumbError::Connectivity`] with a formatted message.
#[macro_export]
macro_rules! connerr {
    ($($arg:tt)*) => {
        $crate::result::ThumbError::Connectivity(format!($($arg)*))
    }
}

pub fn to_terr<E: Debug>(e: E) -> ThumbError {
    ThumbError::Io(format!("{e:?}"))
}

pub fn trace_ok_warn<T, E>(x: Result<T, E>) -> Option<T>
where
    E: Debug,
{
    match x {
        Ok(x) => Some(x),
        Err(e) => {
            warn!("{e:?}");
            None
        }
    }
}

#[test]
fn test_macros() {
    assert_eq!(
        generr!("no frame for {}", "/a/b.mp4"),
        ThumbError::Generation("no frame for /a/b.mp4".to_string())
    );
    assert_eq!(
        connerr!("refused"),
        ThumbError::Connectivity("refused".to_string())
    );
}
