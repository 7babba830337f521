use super::Media;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable playlist identity. Three ids are fixed, everything else is a saved list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaylistId(String);

impl PlaylistId {
    pub const PLAYER: &'static str = "player";
    pub const SYSTEM: &'static str = "system";
    pub const HISTORY: &'static str = "history";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn player() -> Self {
        Self::new(Self::PLAYER)
    }

    pub fn system() -> Self {
        Self::new(Self::SYSTEM)
    }

    pub fn history() -> Self {
        Self::new(Self::HISTORY)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.0.as_str(), Self::PLAYER | Self::SYSTEM | Self::HISTORY)
    }
}

impl fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlaylistId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistMode {
    #[default]
    Normal,
    Loop,   // sequential, wraps around
    Single, // repeat the same entry
    Random,
}

/// Ordered sequence of media. Indices are always 0..len, duplicates allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: PlaylistId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub medias: Vec<Media>,
    #[serde(default)]
    pub mode: PlaylistMode,
}

impl Playlist {
    pub fn new(id: PlaylistId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            medias: Vec::new(),
            mode: PlaylistMode::Normal,
        }
    }

    pub fn len(&self) -> usize {
        self.medias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.medias.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Media> {
        self.medias.get(index)
    }

    pub fn titles(&self) -> Vec<&str> {
        self.medias.iter().map(|m| m.title.as_str()).collect()
    }
}
