use std::path::PathBuf;

/// Directory name under the platform data dir.
const APP_DIR: &str = "my-hub";

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Directory holding `local_storage.json`
    pub data_dir: PathBuf,
}

impl CliConfig {
    /// Resolve the data directory.
    ///
    /// Order: the `--data-dir` flag, then `HUB_DATA_DIR` (supports ~ for home
    /// directory), then the platform data directory.
    pub fn resolve(flag: Option<PathBuf>) -> Result<Self, ConfigError> {
        let data_dir = match flag {
            Some(dir) => dir,
            None => match std::env::var("HUB_DATA_DIR") {
                Ok(dir) if !dir.is_empty() => expand_tilde(&dir),
                _ => dirs::data_dir()
                    .map(|dir| dir.join(APP_DIR))
                    .ok_or(ConfigError::NoDataDir)?,
            },
        };
        Ok(Self { data_dir })
    }
}

/// Expand ~ or ~/ prefix to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No data directory: pass --data-dir or set HUB_DATA_DIR")]
    NoDataDir,
}
