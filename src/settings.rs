use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Persisted settings for the grafting pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraftSettings {
    /// Selects the lit hair shader variant; the unlit variant otherwise.
    pub use_lit_shader_for_hair: bool,
    /// Rest-pose bone never overwritten by a bone snapshot.
    pub excluded_bone: String,
    /// Eyes texture width that marks a photo-derived, two-eye-packed texture.
    pub photo_eyes_texture_width: u32,
    /// Root holding one directory per avatar id.
    pub storage_root: Option<String>,
    /// Directory holding the correspondence table assets.
    pub correspondence_dir: Option<String>,
}

impl Default for GraftSettings {
    fn default() -> Self {
        Self {
            use_lit_shader_for_hair: true,
            excluded_bone: "SpineAdjust".to_string(),
            photo_eyes_texture_width: 1024,
            storage_root: None,
            correspondence_dir: None,
        }
    }
}

impl GraftSettings {
    /// Storage root as a path, defaulting to the working directory.
    pub fn storage_root_path(&self) -> PathBuf {
        self.storage_root
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Save settings to a JSON file.
pub fn save_settings(path: &Path, settings: &GraftSettings) -> Result<()> {
    let content =
        serde_json::to_string_pretty(settings).context("failed to serialize settings as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save settings: {}", path.display()))?;
    Ok(())
}

/// Load settings from a JSON file.
pub fn load_settings(path: &Path) -> Result<GraftSettings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load settings: {}", path.display()))?;
    let settings: GraftSettings =
        serde_json::from_str(&content).context("failed to parse settings JSON")?;
    Ok(settings)
}
