/// Persisted settings for the repacker
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::game::Game;
use crate::plugin::writer::{PluginWriter, DEFAULT_EDITOR_ID_PREFIX, DEFAULT_FORM_ID_BASE};

/// Settings that persist between runs; CLI flags override them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    // Audio BA2s must be stored for the engine to stream them
    #[serde(default)]
    pub compress: bool,
    #[serde(default = "default_author")]
    pub plugin_author: String,
    #[serde(default = "default_description")]
    pub plugin_description: String,
    #[serde(default = "default_editor_id_prefix")]
    pub editor_id_prefix: String,
    #[serde(default = "default_masters")]
    pub masters: Vec<String>,
    #[serde(default = "default_light_plugin")]
    pub light_plugin: bool,
    #[serde(default = "default_form_id_base")]
    pub form_id_base: u32,
    #[serde(default)]
    pub target_game: Game,
}

fn default_author() -> String {
    "FO3 Audio Repository Builder".to_string()
}

fn default_description() -> String {
    "Fallout 3 audio files for Fallout 4".to_string()
}

fn default_editor_id_prefix() -> String {
    DEFAULT_EDITOR_ID_PREFIX.to_string()
}

fn default_masters() -> Vec<String> {
    vec![Game::Fallout4.master_file().to_string()]
}

fn default_light_plugin() -> bool { true }
fn default_form_id_base() -> u32 { DEFAULT_FORM_ID_BASE }

impl Default for Settings {
    fn default() -> Self {
        Self {
            compress: false,
            plugin_author: default_author(),
            plugin_description: default_description(),
            editor_id_prefix: default_editor_id_prefix(),
            masters: default_masters(),
            light_plugin: default_light_plugin(),
            form_id_base: default_form_id_base(),
            target_game: Game::default(),
        }
    }
}

impl Settings {
    /// Load settings from the user config file
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Missing or unparseable files yield the defaults
    pub fn load_from(path: &Path) -> Self {
        if let Ok(content) = std::fs::read_to_string(path) {
            match serde_json::from_str::<Self>(&content) {
                Ok(settings) => return settings,
                Err(e) => log::warn!("Ignoring unreadable settings {:?}: {}", path, e),
            }
        }
        Self::default()
    }

    /// Save settings to the user config file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings: {:?}", path))?;
        Ok(())
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("fo-audio-repack");
        path.push("settings.json");
        path
    }

    /// Light flag only applies when the target game knows light plugins
    pub fn effective_light_plugin(&self) -> bool {
        self.light_plugin && self.target_game.supports_light_plugins()
    }

    /// A plugin writer carrying these settings
    pub fn plugin_writer(&self, name: &str) -> PluginWriter {
        PluginWriter::new(name, self.effective_light_plugin())
            .with_author(self.plugin_author.clone())
            .with_description(self.plugin_description.clone())
            .with_editor_id_prefix(self.editor_id_prefix.clone())
            .with_masters(self.masters.clone())
            .with_form_id_base(self.form_id_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("settings.json"));
        assert_eq!(settings, Settings::default());
        assert!(!settings.compress);
        assert!(settings.light_plugin);
        assert_eq!(settings.masters, vec!["Fallout4.esm"]);
        assert_eq!(settings.form_id_base, 0x800);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "compress": true, "plugin_author": "me" }"#).unwrap();

        let settings = Settings::load_from(&path);
        assert!(settings.compress);
        assert_eq!(settings.plugin_author, "me");
        assert_eq!(settings.plugin_description, default_description());
        assert_eq!(settings.target_game, Game::Fallout4);
    }

    #[test]
    fn test_garbage_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            masters: vec!["Fallout4.esm".to_string(), "DLCCoast.esm".to_string()],
            form_id_base: 0x900,
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path), settings);
    }

    #[test]
    fn test_light_flag_depends_on_target_game() {
        let settings = Settings {
            target_game: Game::Fallout3,
            ..Settings::default()
        };
        assert!(!settings.effective_light_plugin());
        assert!(Settings::default().effective_light_plugin());
    }
}
