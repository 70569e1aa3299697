use serde::{Deserialize, Serialize};

use super::protocol::DownloadRequest;

/// Status of a download handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
    /// Recorded but not started (`start = false`, e.g. intercepted media).
    Queued,
    InProgress,
    Completed,
    Cancelled,
}

/// A download request as tracked by the UI process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub id: String,
    pub request: DownloadRequest,
    /// Renderer process that asked for it.
    pub pid: u32,
    pub status: DownloadStatus,
}
