//! Download Manager for plugbrowser.
//!
//! The sink for `download` events coming from renderers. Requests are
//! recorded with an id; requests with `start = false` (intercepted media)
//! stay queued until started explicitly. Everything still open is cancelled
//! when the browser quits.

use log::info;
use uuid::Uuid;

use crate::types::download::{DownloadItem, DownloadStatus};
use crate::types::errors::DownloadError;
use crate::types::protocol::DownloadRequest;

/// Trait defining download sink operations.
pub trait DownloadManagerTrait {
    fn add_request(&mut self, pid: u32, request: DownloadRequest) -> String;
    fn start_download(&mut self, id: &str) -> Result<(), DownloadError>;
    fn complete_download(&mut self, id: &str) -> Result<(), DownloadError>;
    fn cancel_download(&mut self, id: &str) -> Result<(), DownloadError>;
    fn cancel_all(&mut self) -> usize;
    fn list_downloads(&self) -> Vec<&DownloadItem>;
    fn get_download(&self, id: &str) -> Option<&DownloadItem>;
}

/// In-memory download sink.
#[derive(Default)]
pub struct DownloadManager {
    downloads: Vec<DownloadItem>,
}

impl DownloadManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_index(&self, id: &str) -> Result<usize, DownloadError> {
        self.downloads
            .iter()
            .position(|d| d.id == id)
            .ok_or_else(|| DownloadError::NotFound(id.to_string()))
    }

    fn is_finished(status: &DownloadStatus) -> bool {
        matches!(status, DownloadStatus::Completed | DownloadStatus::Cancelled)
    }
}

impl DownloadManagerTrait for DownloadManager {
    fn add_request(&mut self, pid: u32, request: DownloadRequest) -> String {
        let id = Uuid::new_v4().to_string();
        let status = if request.start {
            DownloadStatus::InProgress
        } else {
            DownloadStatus::Queued
        };
        info!(
            "Download {} from process {}: {} ({}, {} bytes)",
            id, pid, request.filename, request.mime_type, request.length
        );
        self.downloads.insert(
            0,
            DownloadItem {
                id: id.clone(),
                request,
                pid,
                status,
            },
        );
        id
    }

    fn start_download(&mut self, id: &str) -> Result<(), DownloadError> {
        let idx = self.find_index(id)?;
        match self.downloads[idx].status {
            DownloadStatus::Queued => {
                self.downloads[idx].status = DownloadStatus::InProgress;
                Ok(())
            }
            DownloadStatus::InProgress => Ok(()),
            _ => Err(DownloadError::AlreadyCompleted(id.to_string())),
        }
    }

    fn complete_download(&mut self, id: &str) -> Result<(), DownloadError> {
        let idx = self.find_index(id)?;
        if Self::is_finished(&self.downloads[idx].status) {
            return Err(DownloadError::AlreadyCompleted(id.to_string()));
        }
        self.downloads[idx].status = DownloadStatus::Completed;
        Ok(())
    }

    fn cancel_download(&mut self, id: &str) -> Result<(), DownloadError> {
        let idx = self.find_index(id)?;
        if Self::is_finished(&self.downloads[idx].status) {
            return Err(DownloadError::AlreadyCompleted(id.to_string()));
        }
        self.downloads[idx].status = DownloadStatus::Cancelled;
        Ok(())
    }

    /// Cancel every unfinished download; returns how many were cancelled.
    fn cancel_all(&mut self) -> usize {
        let mut cancelled = 0;
        for item in self.downloads.iter_mut() {
            if !Self::is_finished(&item.status) {
                item.status = DownloadStatus::Cancelled;
                cancelled += 1;
            }
        }
        cancelled
    }

    fn list_downloads(&self) -> Vec<&DownloadItem> {
        self.downloads.iter().collect()
    }

    fn get_download(&self, id: &str) -> Option<&DownloadItem> {
        self.downloads.iter().find(|d| d.id == id)
    }
}
