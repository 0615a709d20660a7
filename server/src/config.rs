//! Server configuration and data directory discovery.

use crate::pathfinding::GridSearchConfig;
use log::{debug, info};
use shared::{DEFAULT_PORT, STATUS_FILE_NAME};
use std::path::{Path, PathBuf};

/// Name of the conventional data directory.
pub const DATA_DIR_NAME: &str = "Data";

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub status_file: PathBuf,
    pub grid: GridSearchConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from(".").join(DATA_DIR_NAME),
            status_file: PathBuf::from(STATUS_FILE_NAME),
            grid: GridSearchConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Directory holding the running executable.
pub fn executable_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

/// Data directory probe order: next to the executable, then the working
/// directory.
pub fn data_dir_candidates(exe_dir: Option<&Path>, cwd: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(exe) = exe_dir {
        candidates.push(exe.to_path_buf());
        candidates.push(exe.join(DATA_DIR_NAME));
        candidates.push(exe.join("..").join(DATA_DIR_NAME));
    }
    if let Some(cwd) = cwd {
        candidates.push(cwd.to_path_buf());
        candidates.push(cwd.join(DATA_DIR_NAME));
    }
    candidates
}

/// An explicit directory always wins. Otherwise the first candidate with a
/// `maps` subdirectory, else `./Data`.
pub fn resolve_data_dir(
    explicit: Option<PathBuf>,
    exe_dir: Option<&Path>,
    cwd: Option<&Path>,
) -> PathBuf {
    if let Some(dir) = explicit {
        info!("Using data directory {}", dir.display());
        return dir;
    }

    for candidate in data_dir_candidates(exe_dir, cwd) {
        if candidate.join("maps").is_dir() {
            info!("Found data directory {}", candidate.display());
            return candidate;
        }
        debug!("No maps under {}", candidate.display());
    }

    let fallback = PathBuf::from(".").join(DATA_DIR_NAME);
    info!(
        "No data directory found, defaulting to {}",
        fallback.display()
    );
    fallback
}

/// Status artifact path: explicit, else next to the executable.
pub fn resolve_status_file(explicit: Option<PathBuf>, exe_dir: Option<&Path>) -> PathBuf {
    match (explicit, exe_dir) {
        (Some(path), _) => path,
        (None, Some(exe)) => exe.join(STATUS_FILE_NAME),
        (None, None) => PathBuf::from(STATUS_FILE_NAME),
    }
}
