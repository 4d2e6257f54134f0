//! Settings persistence for the OSD burn-in demo CLI.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Background color of the synthetic ASS caption glyphs (spec §4.B's
    /// `color` field), `#rrggbb`.
    pub caption_color: String,
    /// Tint applied to the synthetic RGBA overlay bitmap the demo stages.
    pub rgba_tint: String,
    /// How many captions/bitmaps to burn into a single run before stopping.
    pub part_limit: i32,
    /// `0` means "use all available cores" (matches the teacher's rayon
    /// pool sizing convention).
    pub threads: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            caption_color: "#ffffff".to_string(),
            rgba_tint: "#00ff00".to_string(),
            part_limit: 0,
            threads: 0,
        }
    }
}

fn settings_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "osdcomp", "osdcomp-demo")
        .map(|dirs| dirs.config_dir().join("settings.json"))
}

pub fn load_settings() -> Result<Settings, Box<dyn std::error::Error>> {
    let path = settings_path().ok_or("Could not determine config directory")?;
    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)?;
    Ok(settings)
}

pub fn save_settings(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let path = settings_path().ok_or("Could not determine config directory")?;
    
    // Create parent directory if it doesn't exist
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content)?;
    Ok(())
}
