// Plain data shared by every component - media entries and playlist snapshots

pub mod media;
pub mod playlist;

pub use media::{ChatUser, Media, MediaUser, Picture, SystemUser};
pub use playlist::{Playlist, PlaylistId, PlaylistMode};
