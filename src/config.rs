//! Loader for the optional `config.ini` shared by every tool.
//!
//! ```ini
//! [filesystem]
//! volume_name = ext2img
//! lost_and_found = true
//!
//! [logging]
//! level = warn
//! ```
//!
//! Every key is optional and falls back to its default. A value that is
//! present but cannot be parsed is an error.

use std::path::Path;

use configparser::ini::Ini;
use log::LevelFilter;

use crate::error::{FsError, Result};
use crate::mkfs::FormatOptions;

#[derive(Clone, Debug)]
pub struct Config {
    /// Volume label written by `mkfs_ext2`.
    pub volume_name: String,
    /// Whether `mkfs_ext2` creates `/lost+found`.
    pub lost_and_found: bool,
    pub log_level: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        let fmt = FormatOptions::default();
        Config {
            volume_name: fmt.volume_name,
            lost_and_found: fmt.lost_and_found,
            log_level: LevelFilter::Warn,
        }
    }
}

impl Config {
    /// Loads `path`. A missing file is an error; use [`Config::default`] when
    /// no file was given.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let mut ini = Ini::new();
        ini.load(path)
            .map_err(|e| FsError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_ini(&ini)
    }

    /// Parses INI text directly.
    pub fn parse(text: &str) -> Result<Config> {
        let mut ini = Ini::new();
        ini.read(text.to_string()).map_err(FsError::Config)?;
        Self::from_ini(&ini)
    }

    /// `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Config::default()),
        }
    }

    fn from_ini(ini: &Ini) -> Result<Config> {
        let mut cfg = Config::default();

        // [filesystem]
        if let Some(name) = ini.get("filesystem", "volume_name") {
            cfg.volume_name = name;
        }
        if let Some(flag) = ini
            .getbool("filesystem", "lost_and_found")
            .map_err(|e| FsError::Config(format!("filesystem.lost_and_found: {}", e)))?
        {
            cfg.lost_and_found = flag;
        }

        // [logging]
        if let Some(level) = ini.get("logging", "level") {
            cfg.log_level = level
                .parse()
                .map_err(|_| FsError::Config(format!("logging.level: unknown level {:?}", level)))?;
        }

        Ok(cfg)
    }

    pub fn format_options(&self) -> FormatOptions {
        FormatOptions {
            volume_name: self.volume_name.clone(),
            lost_and_found: self.lost_and_found,
        }
    }
}
