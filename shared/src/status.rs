//! Readiness artifact a supervisor can poll without opening a connection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub is_ready: bool,
    pub message: String,
    pub loaded_maps: BTreeSet<u32>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub process_id: u32,
}

impl ServiceStatus {
    pub fn loading() -> Self {
        Self::with_state(false, "loading map data", BTreeSet::new())
    }

    pub fn ready(loaded_maps: BTreeSet<u32>) -> Self {
        let message = format!("ready ({} maps loaded)", loaded_maps.len());
        Self::with_state(true, message, loaded_maps)
    }

    pub fn failed(reason: &str) -> Self {
        Self::with_state(false, format!("initialization failed: {}", reason), BTreeSet::new())
    }

    fn with_state(is_ready: bool, message: impl Into<String>, loaded_maps: BTreeSet<u32>) -> Self {
        Self {
            is_ready,
            message: message.into(),
            loaded_maps,
            timestamp: get_timestamp(),
            process_id: std::process::id(),
        }
    }

    /// Writes the artifact through a temporary file so readers never see a
    /// half-written document.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)
    }

    pub fn read_from(path: &Path) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Removes the artifact. A missing file is not an error.
    pub fn delete(path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
