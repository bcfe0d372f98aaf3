use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::{SHEETS_DIR, SPRITES_DIR};

/// Runtime switches for the override layer, loaded from a JSON file next to
/// the override folders. Every field has a default so a missing or partial
/// file never blocks startup.
#[derive(Debug, Clone, Deserialize)]
pub struct PatchConfig {
    #[serde(default = "PatchConfig::default_load_sprites")]
    pub load_sprites: bool,
    #[serde(default)]
    pub dump_sprites: bool,
    /// Re-dump collections that used a full-sheet override back into
    /// per-sprite files under the converted root.
    #[serde(default)]
    pub convert_spritesheets: bool,
    /// Arm the pending-reload flag whenever a watched file changes.
    #[serde(default = "PatchConfig::default_reload_on_change")]
    pub reload_on_change: bool,
    #[serde(default = "PatchConfig::default_base_dir")]
    pub base_dir: PathBuf,
    /// External pack directories, scanned after the primary root so their
    /// entries win on key collision.
    #[serde(default)]
    pub pack_dirs: Vec<PathBuf>,
}

impl PatchConfig {
    const fn default_load_sprites() -> bool {
        true
    }

    const fn default_reload_on_change() -> bool {
        true
    }

    fn default_base_dir() -> PathBuf {
        PathBuf::from("Patchwork")
    }

    pub fn sprites_dir(&self) -> PathBuf {
        self.base_dir.join(SPRITES_DIR)
    }

    pub fn sheets_dir(&self) -> PathBuf {
        self.base_dir.join(SHEETS_DIR)
    }

    pub fn dumps_dir(&self) -> PathBuf {
        self.base_dir.join("Dumps")
    }

    pub fn converted_dir(&self) -> PathBuf {
        self.base_dir.join("Converted")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                eprintln!("[sprites] config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            load_sprites: Self::default_load_sprites(),
            dump_sprites: false,
            convert_spritesheets: false,
            reload_on_change: Self::default_reload_on_change(),
            base_dir: Self::default_base_dir(),
            pack_dirs: Vec::new(),
        }
    }
}
