//! `heatscope.toml` config loading.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Base directory that request file names are resolved against.
    #[serde(default = "default_profile_dir")]
    pub profile_dir: PathBuf,
}

fn default_profile_dir() -> PathBuf {
    PathBuf::from("profiles")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile_dir: default_profile_dir(),
        }
    }
}

impl Config {
    /// Load config from `path`, falling back to defaults when the file is
    /// absent, unreadable, or unparseable.
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => config,
                Err(err) => {
                    log::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                log::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    /// Resolve a request file name against the profile directory.
    pub fn resolve(&self, file_name: &str) -> PathBuf {
        self.profile_dir.join(file_name)
    }
}
