use plugbrowser::types::errors::*;

// === ChannelError Tests ===

#[test]
fn channel_error_display_variants() {
    assert_eq!(
        ChannelError::BrokenChannel.to_string(),
        "Broken channel: peer has exited"
    );
    assert_eq!(
        ChannelError::Decode("expected value".to_string()).to_string(),
        "Channel decode error: expected value"
    );
    assert_eq!(
        ChannelError::Encode("key must be a string".to_string()).to_string(),
        "Channel encode error: key must be a string"
    );
    assert_eq!(
        ChannelError::Io("permission denied".to_string()).to_string(),
        "Channel I/O error: permission denied"
    );
}

#[test]
fn channel_error_from_broken_pipe_is_broken() {
    let err: ChannelError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
    assert!(err.is_broken());

    let err: ChannelError = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
    assert!(err.is_broken());

    let err: ChannelError = std::io::Error::from(std::io::ErrorKind::ConnectionReset).into();
    assert!(err.is_broken());
}

#[test]
fn channel_error_from_other_io_is_not_broken() {
    let err: ChannelError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
    assert!(!err.is_broken());
    assert!(matches!(err, ChannelError::Io(_)));
}

#[test]
fn channel_error_implements_error_trait() {
    let err: Box<dyn std::error::Error> = Box::new(ChannelError::BrokenChannel);
    assert!(err.source().is_none());
}

// === SupervisorError Tests ===

#[test]
fn supervisor_error_display_variants() {
    assert_eq!(
        SupervisorError::SpawnFailed("no such file".to_string()).to_string(),
        "Failed to start renderer: no such file"
    );
    assert_eq!(
        SupervisorError::UnknownProcess(4242).to_string(),
        "Unknown process: 4242"
    );
    assert_eq!(
        SupervisorError::KillFailed("17: EPERM".to_string()).to_string(),
        "Failed to kill process: 17: EPERM"
    );
    assert_eq!(SupervisorError::Stopped.to_string(), "Supervisor is not running");
}

// === SessionError Tests ===

#[test]
fn session_error_display_variants() {
    assert_eq!(
        SessionError::SerializationError("trailing comma".to_string()).to_string(),
        "Session serialization error: trailing comma"
    );
    assert_eq!(
        SessionError::IoError("disk full".to_string()).to_string(),
        "Session I/O error: disk full"
    );
    assert_eq!(
        SessionError::InvalidEncoding("bad padding".to_string()).to_string(),
        "Invalid session encoding: bad padding"
    );
    assert_eq!(
        SessionError::NotFound(3).to_string(),
        "Closed session not found: 3"
    );
}

// === ConfigError Tests ===

#[test]
fn config_error_display_variants() {
    assert_eq!(
        ConfigError::PathUnwritable("/etc/passwd".to_string()).to_string(),
        "Can't save config in: /etc/passwd"
    );
    assert_eq!(
        ConfigError::IoError("read-only".to_string()).to_string(),
        "Config I/O error: read-only"
    );
    assert_eq!(
        ConfigError::SerializationError("eof".to_string()).to_string(),
        "Config serialization error: eof"
    );
    assert_eq!(
        ConfigError::InvalidKey("nope".to_string()).to_string(),
        "Invalid config key: nope"
    );
    assert_eq!(
        ConfigError::InvalidValue("expected bool".to_string()).to_string(),
        "Invalid config value: expected bool"
    );
}

// === FilterError Tests ===

#[test]
fn filter_error_display_variants() {
    assert_eq!(
        FilterError::InvalidPattern("unclosed group".to_string()).to_string(),
        "Invalid filter pattern: unclosed group"
    );
    assert_eq!(
        FilterError::FetchFailed("404".to_string()).to_string(),
        "Filter fetch failed: 404"
    );
    assert_eq!(
        FilterError::IoError("denied".to_string()).to_string(),
        "Filter I/O error: denied"
    );
    assert_eq!(
        FilterError::NotFound("easylist".to_string()).to_string(),
        "Filter list not found: easylist"
    );
    assert_eq!(FilterError::Cancelled.to_string(), "Filter operation cancelled");
}

// === EngineError Tests ===

#[test]
fn engine_error_display_variants() {
    assert_eq!(
        EngineError::InvalidSession("not json".to_string()).to_string(),
        "Invalid session state: not json"
    );
    assert_eq!(
        EngineError::InvalidSetting("zoom".to_string()).to_string(),
        "Invalid engine setting: zoom"
    );
}

// === DownloadError Tests ===

#[test]
fn download_error_display_variants() {
    assert_eq!(
        DownloadError::NotFound("dl-1".to_string()).to_string(),
        "Download not found: dl-1"
    );
    assert_eq!(
        DownloadError::AlreadyCompleted("dl-2".to_string()).to_string(),
        "Download already completed: dl-2"
    );
}
