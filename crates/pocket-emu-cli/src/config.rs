use std::io;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

/// Settings kept between runs. Command-line flags override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub boot_rom_path: Option<PathBuf>,
    pub builtin_boot_rom: bool,
    pub speed: f64,
    /// Battery saves go here instead of next to the ROM.
    pub save_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            boot_rom_path: None,
            builtin_boot_rom: false,
            speed: 1.0,
            save_dir: None,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("pocketemu").join("config.toml");
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("pocketemu").join("config.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("pocketemu")
            .join("config.toml");
    }

    PathBuf::from("config.toml")
}

pub fn load_from_file(path: &Path) -> Config {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return Config::default(),
    };

    match toml::from_str::<Config>(&text) {
        Ok(cfg) if cfg.speed.is_finite() && cfg.speed > 0.0 => cfg,
        Ok(cfg) => {
            warn!(
                "Invalid speed {} in {}; using 1.0",
                cfg.speed,
                path.display()
            );
            Config { speed: 1.0, ..cfg }
        }
        Err(e) => {
            warn!("Failed to parse config {}: {e}; using defaults", path.display());
            Config::default()
        }
    }
}

pub fn save_to_file(path: &Path, cfg: &Config) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let text = toml::to_string_pretty(cfg).map_err(io::Error::other)?;
    std::fs::write(path, text)
}
