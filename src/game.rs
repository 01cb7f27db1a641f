/// Game profiles: the Fallout 3 era games archives are read from and
/// Fallout 4, which the repacked archive and plugin target

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Game {
    Fallout3,
    FalloutNV,
    Fallout4,
}

impl Game {
    /// Get the display name for the game
    pub fn display_name(&self) -> &'static str {
        match self {
            Game::Fallout3 => "Fallout 3",
            Game::FalloutNV => "Fallout: New Vegas",
            Game::Fallout4 => "Fallout 4",
        }
    }

    /// Base master file every plugin for this game depends on
    pub fn master_file(&self) -> &'static str {
        match self {
            Game::Fallout3 => "Fallout3.esm",
            Game::FalloutNV => "FalloutNV.esm",
            Game::Fallout4 => "Fallout4.esm",
        }
    }

    /// Light (ESL flagged) plugins exist only from Fallout 4 on
    pub fn supports_light_plugins(&self) -> bool {
        matches!(self, Game::Fallout4)
    }
}

impl Default for Game {
    fn default() -> Self {
        Game::Fallout4
    }
}

impl std::fmt::Display for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
