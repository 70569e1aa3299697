use std::fmt;

// === ChannelError ===

/// Errors raised by a message channel endpoint.
#[derive(Debug)]
pub enum ChannelError {
    /// The peer process exited; treated like an explicit `closed`.
    BrokenChannel,
    /// A line could not be decoded into the expected message type.
    Decode(String),
    /// A message could not be encoded.
    Encode(String),
    /// Any other I/O failure on the pipe.
    Io(String),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::BrokenChannel => write!(f, "Broken channel: peer has exited"),
            ChannelError::Decode(msg) => write!(f, "Channel decode error: {}", msg),
            ChannelError::Encode(msg) => write!(f, "Channel encode error: {}", msg),
            ChannelError::Io(msg) => write!(f, "Channel I/O error: {}", msg),
        }
    }
}

impl std::error::Error for ChannelError {}

impl ChannelError {
    /// Returns true when the error means the peer is gone.
    pub fn is_broken(&self) -> bool {
        matches!(self, ChannelError::BrokenChannel)
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::UnexpectedEof => ChannelError::BrokenChannel,
            _ => ChannelError::Io(err.to_string()),
        }
    }
}

// === SupervisorError ===

/// Errors related to renderer process supervision.
#[derive(Debug)]
pub enum SupervisorError {
    /// The renderer process could not be started.
    SpawnFailed(String),
    /// No process with the given pid is managed.
    UnknownProcess(u32),
    /// The process could not be killed.
    KillFailed(String),
    /// The supervisor loop is no longer running.
    Stopped,
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorError::SpawnFailed(msg) => write!(f, "Failed to start renderer: {}", msg),
            SupervisorError::UnknownProcess(pid) => write!(f, "Unknown process: {}", pid),
            SupervisorError::KillFailed(msg) => write!(f, "Failed to kill process: {}", msg),
            SupervisorError::Stopped => write!(f, "Supervisor is not running"),
        }
    }
}

impl std::error::Error for SupervisorError {}

// === SessionError ===

/// Errors related to session save/restore operations.
#[derive(Debug)]
pub enum SessionError {
    /// Failed to serialize or deserialize session data.
    SerializationError(String),
    /// Reading or writing a session file failed.
    IoError(String),
    /// The session payload was not valid base64.
    InvalidEncoding(String),
    /// No closed session exists at the given position.
    NotFound(usize),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::SerializationError(msg) => {
                write!(f, "Session serialization error: {}", msg)
            }
            SessionError::IoError(msg) => write!(f, "Session I/O error: {}", msg),
            SessionError::InvalidEncoding(msg) => write!(f, "Invalid session encoding: {}", msg),
            SessionError::NotFound(index) => write!(f, "Closed session not found: {}", index),
        }
    }
}

impl std::error::Error for SessionError {}

// === ConfigError ===

/// Errors related to the profile configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The profile directory exists but is not a directory, or cannot be created.
    PathUnwritable(String),
    /// A file system error occurred.
    IoError(String),
    /// The config file could not be parsed or written.
    SerializationError(String),
    /// The provided setting key is invalid.
    InvalidKey(String),
    /// The provided value has the wrong shape for the key.
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::PathUnwritable(path) => write!(f, "Can't save config in: {}", path),
            ConfigError::IoError(msg) => write!(f, "Config I/O error: {}", msg),
            ConfigError::SerializationError(msg) => {
                write!(f, "Config serialization error: {}", msg)
            }
            ConfigError::InvalidKey(key) => write!(f, "Invalid config key: {}", key),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// === FilterError ===

/// Errors related to adblock, media and content filters.
#[derive(Debug)]
pub enum FilterError {
    /// The filter pattern is not a valid regular expression.
    InvalidPattern(String),
    /// Fetching a remote filter list failed.
    FetchFailed(String),
    /// Reading or writing a stored filter list failed.
    IoError(String),
    /// The named filter list is not stored.
    NotFound(String),
    /// The operation was cancelled before completing.
    Cancelled,
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::InvalidPattern(msg) => write!(f, "Invalid filter pattern: {}", msg),
            FilterError::FetchFailed(msg) => write!(f, "Filter fetch failed: {}", msg),
            FilterError::IoError(msg) => write!(f, "Filter I/O error: {}", msg),
            FilterError::NotFound(name) => write!(f, "Filter list not found: {}", name),
            FilterError::Cancelled => write!(f, "Filter operation cancelled"),
        }
    }
}

impl std::error::Error for FilterError {}

// === EngineError ===

/// Errors reported by the render capability.
#[derive(Debug)]
pub enum EngineError {
    /// The serialized session state could not be restored.
    InvalidSession(String),
    /// The setting name or value was rejected.
    InvalidSetting(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidSession(msg) => write!(f, "Invalid session state: {}", msg),
            EngineError::InvalidSetting(msg) => write!(f, "Invalid engine setting: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

// === DownloadError ===

/// Errors related to download management operations.
#[derive(Debug)]
pub enum DownloadError {
    /// Download with the given ID was not found.
    NotFound(String),
    /// The download has already finished or been cancelled.
    AlreadyCompleted(String),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::NotFound(id) => write!(f, "Download not found: {}", id),
            DownloadError::AlreadyCompleted(id) => {
                write!(f, "Download already completed: {}", id)
            }
        }
    }
}

impl std::error::Error for DownloadError {}
