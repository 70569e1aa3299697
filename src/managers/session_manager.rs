//! Session Manager for plugbrowser.
//!
//! Keeps the list of closed tabs that can be reopened and persists session
//! snapshots to two files in the profile directory: the sessions file,
//! written when the browser quits normally, and the crash file, rewritten
//! whenever any tab's history changes. On startup the sessions file wins;
//! whichever file is read is deleted.

use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{debug, info};

use crate::types::errors::SessionError;
use crate::types::session::SessionSnapshot;

/// Trait defining session persistence and closed-tab bookkeeping.
pub trait SessionManagerTrait {
    fn load_sessions(&self) -> Result<Vec<SessionSnapshot>, SessionError>;
    fn save_sessions(&self, sessions: &[SessionSnapshot], to_crash: bool) -> Result<(), SessionError>;
    fn add_session(&mut self, session: SessionSnapshot) -> Result<bool, SessionError>;
    fn closed_sessions(&self) -> &[SessionSnapshot];
    fn restore_all(&mut self) -> Vec<SessionSnapshot>;
    fn restore_selected(&mut self, indices: &[usize]) -> Result<Vec<SessionSnapshot>, SessionError>;
    fn remove(&mut self, index: usize) -> Result<SessionSnapshot, SessionError>;
    fn clear(&mut self);
    fn discard_crash_file(&self) -> Result<(), SessionError>;
}

/// File-backed session manager.
pub struct SessionManager {
    sessions_file: PathBuf,
    crash_file: PathBuf,
    closed: Vec<SessionSnapshot>,
}

impl SessionManager {
    pub fn new(sessions_file: PathBuf, crash_file: PathBuf) -> Self {
        Self {
            sessions_file,
            crash_file,
            closed: Vec::new(),
        }
    }

    /// `sessions.json` and `crash.json` inside `profile_dir`.
    pub fn in_profile(profile_dir: &Path) -> Self {
        Self::new(
            profile_dir.join("sessions.json"),
            profile_dir.join("crash.json"),
        )
    }

    pub fn sessions_file(&self) -> &Path {
        &self.sessions_file
    }

    pub fn crash_file(&self) -> &Path {
        &self.crash_file
    }

    fn read_file(path: &Path) -> Result<Vec<SessionSnapshot>, SessionError> {
        let text = fs::read_to_string(path).map_err(|e| SessionError::IoError(e.to_string()))?;
        let sessions: Vec<SessionSnapshot> = serde_json::from_str(&text)
            .map_err(|e| SessionError::SerializationError(e.to_string()))?;
        fs::remove_file(path).map_err(|e| SessionError::IoError(e.to_string()))?;
        Ok(sessions)
    }
}

/// Decode the opaque engine state carried by a snapshot.
pub fn decode_session_data(session: &SessionSnapshot) -> Result<Vec<u8>, SessionError> {
    BASE64
        .decode(session.session_data.as_bytes())
        .map_err(|e| SessionError::InvalidEncoding(e.to_string()))
}

impl SessionManagerTrait for SessionManager {
    /// Read the sessions file, or the crash file if there is none.
    fn load_sessions(&self) -> Result<Vec<SessionSnapshot>, SessionError> {
        let path = if self.sessions_file.is_file() {
            &self.sessions_file
        } else if self.crash_file.is_file() {
            info!("Recovering sessions from {}", self.crash_file.display());
            &self.crash_file
        } else {
            return Ok(Vec::new());
        };
        let mut sessions = Self::read_file(path)?;
        sessions.sort_by_key(|session| session.index);
        Ok(sessions)
    }

    /// Write `sessions` to the sessions file or the crash file.
    ///
    /// An empty list deletes the crash file and leaves the sessions file
    /// untouched.
    fn save_sessions(&self, sessions: &[SessionSnapshot], to_crash: bool) -> Result<(), SessionError> {
        if sessions.is_empty() {
            return if to_crash {
                self.discard_crash_file()
            } else {
                Ok(())
            };
        }
        let path = if to_crash {
            &self.crash_file
        } else {
            &self.sessions_file
        };
        let json = serde_json::to_string_pretty(sessions)
            .map_err(|e| SessionError::SerializationError(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| SessionError::IoError(e.to_string()))?;
        fs::rename(&tmp, path).map_err(|e| SessionError::IoError(e.to_string()))?;
        debug!("Saved {} sessions to {}", sessions.len(), path.display());
        Ok(())
    }

    /// Remember a closed tab. Returns false for a tab without history.
    fn add_session(&mut self, session: SessionSnapshot) -> Result<bool, SessionError> {
        if session.is_empty() {
            return Ok(false);
        }
        decode_session_data(&session)?;
        self.closed.push(session);
        Ok(true)
    }

    fn closed_sessions(&self) -> &[SessionSnapshot] {
        &self.closed
    }

    /// Take every closed session, ordered by tab position.
    fn restore_all(&mut self) -> Vec<SessionSnapshot> {
        let mut sessions = std::mem::take(&mut self.closed);
        sessions.sort_by_key(|session| session.index);
        sessions
    }

    /// Take the closed sessions at `indices`.
    fn restore_selected(&mut self, indices: &[usize]) -> Result<Vec<SessionSnapshot>, SessionError> {
        if let Some(&missing) = indices.iter().find(|&&i| i >= self.closed.len()) {
            return Err(SessionError::NotFound(missing));
        }
        let mut picked: Vec<usize> = indices.to_vec();
        picked.sort_unstable();
        picked.dedup();

        let mut sessions = Vec::with_capacity(picked.len());
        for index in picked.into_iter().rev() {
            sessions.push(self.closed.remove(index));
        }
        sessions.reverse();
        Ok(sessions)
    }

    fn remove(&mut self, index: usize) -> Result<SessionSnapshot, SessionError> {
        if index >= self.closed.len() {
            return Err(SessionError::NotFound(index));
        }
        Ok(self.closed.remove(index))
    }

    fn clear(&mut self) {
        self.closed.clear();
    }

    fn discard_crash_file(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.crash_file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::IoError(e.to_string())),
        }
    }
}
