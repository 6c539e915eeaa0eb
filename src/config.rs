use anyhow::{anyhow, Context, Result};
use dirs::{data_dir, document_dir, home_dir};
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const DEFAULT_SOURCE: &str = "YouTube";

// ---------- Configuration ----------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Playlist URL to mirror into the music folder; empty until set up.
    pub youtube_playlist: String,
    /// Label of the playlist provider. Always "YouTube" for now.
    pub source: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            youtube_playlist: String::new(),
            source: DEFAULT_SOURCE.into(),
        }
    }
}

impl Config {
    pub fn has_playlist(&self) -> bool {
        !self.youtube_playlist.trim().is_empty()
    }
}

pub fn config_dir() -> Result<PathBuf> {
    let d = data_dir()
        .or_else(|| home_dir().map(|h| h.join("AppData/Roaming")))
        .ok_or_else(|| anyhow!("Cannot determine writable config directory"))?;
    Ok(d.join("OtoRadio"))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

pub fn default_log_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("error.log"))
}

/// `~/Documents/Euro Truck Simulator 2/music`, where the game's in-game
/// player picks up user tracks.
pub fn default_music_dir() -> Result<PathBuf> {
    let docs = document_dir()
        .or_else(|| home_dir().map(|h| h.join("Documents")))
        .ok_or_else(|| anyhow!("Cannot determine the Documents folder"))?;
    Ok(docs.join("Euro Truck Simulator 2").join("music"))
}

pub fn default_game_process() -> &'static str {
    if cfg!(target_os = "windows") {
        "eurotrucks2.exe"
    } else {
        "eurotrucks2"
    }
}

/// Resolves a user supplied path against the current directory.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    let abs = path
        .absolutize()
        .with_context(|| format!("resolving {}", path.display()))?;
    Ok(abs.into_owned())
}

/// Reads the config file. A missing or corrupt file yields the defaults;
/// the problem is logged and never returned.
pub fn load_config(path: &Path) -> Config {
    let content = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::warn!("Config file not found. Using default configuration.");
            return Config::default();
        }
        Err(e) => {
            log::error!("Config file could not be read: {e}");
            return Config::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("Config file is corrupted: {e}");
            Config::default()
        }
    }
}

/// Replaces the whole config document.
pub fn save_config(path: &Path, youtube_playlist: &str, source: &str) -> Result<()> {
    let cfg = Config {
        youtube_playlist: youtube_playlist.to_string(),
        source: source.to_string(),
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, serde_json::to_string_pretty(&cfg)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
