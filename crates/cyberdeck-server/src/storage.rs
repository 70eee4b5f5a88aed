//! TOML file configuration storage.

use std::fs;
use std::path::{Path, PathBuf};

use cyberdeck_core::{ConfigDocument, ConfigError, ConfigStorage};
use tracing::debug;

/// Stores the configuration document in one TOML file.
#[derive(Debug, Clone)]
pub struct FileConfigStorage {
    path: PathBuf,
}

impl FileConfigStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStorage for FileConfigStorage {
    fn load(&self) -> Result<ConfigDocument, ConfigError> {
        let text = fs::read_to_string(&self.path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {e}", self.path.display())))?;
        debug!("Loaded configuration from {}", self.path.display());
        ConfigDocument::from_toml_str(&text)
    }

    /// Writes a sibling temporary file, then renames it over the original.
    fn save(&self, document: &ConfigDocument) -> Result<(), ConfigError> {
        let text = document.to_toml_string()?;
        let staging = self.path.with_extension("toml.tmp");
        fs::write(&staging, text)
            .and_then(|_| fs::rename(&staging, &self.path))
            .map_err(|e| ConfigError::WriteError(format!("{}: {e}", self.path.display())))?;
        debug!("Saved configuration to {}", self.path.display());
        Ok(())
    }
}
