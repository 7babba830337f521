// jukebox - coordination core for a live-room media player
// Chat requests and UI commands go in on the bus, playlist and transport state come out.

pub mod config;   // settings and preferences
pub mod context;  // owns everything, replaces process-wide singletons
pub mod error;
pub mod event;    // typed pub/sub bus + topic catalogue
pub mod library;  // local audio files for the system playlist
pub mod model;    // media, users, playlists
pub mod persist;  // saved playlists on disk
pub mod player;   // transport bridge, engines, auto-advance
pub mod playlist; // the only place sequences are mutated
pub mod plugin;   // optional consumers (textinfo, requests, vote skip)

// Export the stuff other modules actually use
pub use config::Config;
pub use context::{Context, Shutdown};
pub use error::{CoreError, Result};
pub use event::{EventBus, Topic};
pub use model::{Media, MediaUser, Playlist, PlaylistId, PlaylistMode};
pub use player::{PlaybackEngine, PlaybackState, PlayerBridge, Property};
pub use plugin::{Plugin, PluginContext, PluginManager, PluginState};
