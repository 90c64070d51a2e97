//! Data directory resolution.

use std::fs;
use std::path::PathBuf;

const DATA_DIR: &str = ".geosync";

/// Get data directory path.
///
/// Priority:
/// 1. `GEOSYNC_DATA_DIR` environment variable (for container deployments)
/// 2. `~/.geosync` (default for desktop usage)
pub fn get_data_dir() -> Result<PathBuf, String> {
    let data_dir = if let Ok(custom_dir) = std::env::var("GEOSYNC_DATA_DIR") {
        PathBuf::from(custom_dir)
    } else {
        let home = dirs::home_dir().ok_or("could not resolve home directory")?;
        home.join(DATA_DIR)
    };

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)
            .map_err(|e| format!("failed to create data directory: {}", e))?;
    }

    Ok(data_dir)
}

/// Default path of the record database file.
pub fn default_db_path() -> Result<PathBuf, String> {
    Ok(get_data_dir()?.join("records.db"))
}
