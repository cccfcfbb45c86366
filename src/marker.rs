//! Resumable active-player marker.
//!
//! A small JSON file naming the session, the local player and the last
//! confirmed turn. It is the only state kept across restarts.

use std::path::{Path, PathBuf};

use derive_getters::Getters;
use derive_more::{Display, Error};
use oche_rules::PlayerId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::session::SessionId;

/// What `resume` needs to reopen a session.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct ActivePlayerMarker {
    /// Session being played.
    session_id: SessionId,
    /// Local player, if one was signed in.
    player_id: Option<PlayerId>,
    /// Last confirmed turn.
    turn_number: u32,
}

impl ActivePlayerMarker {
    /// Creates a marker.
    pub fn new(session_id: impl Into<SessionId>, player_id: Option<PlayerId>, turn_number: u32) -> Self {
        Self {
            session_id: session_id.into(),
            player_id,
            turn_number,
        }
    }
}

/// Marker file error.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("Marker error: {} at {}:{}", message, file, line)]
pub struct MarkerError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl MarkerError {
    /// Creates a new marker error.
    #[track_caller]
    pub fn new(message: String) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message,
            line: loc.line(),
            file: loc.file(),
        }
    }
}

/// Reads and writes the marker file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerStore {
    path: PathBuf,
}

impl MarkerStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the marker, replacing any previous one.
    #[instrument(skip(self, marker), fields(path = %self.path.display(), session_id = %marker.session_id))]
    pub fn save(&self, marker: &ActivePlayerMarker) -> Result<(), MarkerError> {
        let json = serde_json::to_string_pretty(marker)
            .map_err(|e| MarkerError::new(format!("Failed to encode marker: {}", e)))?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| MarkerError::new(format!("Failed to create marker dir: {}", e)))?;
        }
        std::fs::write(&self.path, json)
            .map_err(|e| MarkerError::new(format!("Failed to write marker: {}", e)))?;
        debug!(turn_number = marker.turn_number, "Marker saved");
        Ok(())
    }

    /// Reads the marker; `None` if there is no file.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<Option<ActivePlayerMarker>, MarkerError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MarkerError::new(format!("Failed to read marker: {}", e))),
        };
        let marker: ActivePlayerMarker = serde_json::from_str(&content)
            .map_err(|e| MarkerError::new(format!("Failed to parse marker: {}", e)))?;
        debug!(session_id = %marker.session_id, "Marker loaded");
        Ok(Some(marker))
    }

    /// Removes the marker. Missing files are fine.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn clear(&self) -> Result<(), MarkerError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Marker cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MarkerError::new(format!("Failed to remove marker: {}", e))),
        }
    }
}
