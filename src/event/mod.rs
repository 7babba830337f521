// Event plumbing - the bus itself plus every topic the core speaks
// Convention: `cmd.*` asks for a change, `update.*` reports one that already happened.
// Each topic is typed with its payload so a mistyped handler fails at registration.

pub mod bus;

pub use bus::{EventBus, Registrations, Topic};

use crate::model::{ChatUser, Media, Playlist, PlaylistId, PlaylistMode};
use crate::player::lyric::LyricLine;
use crate::player::{PlaybackState, Property};
use chrono::{DateTime, Utc};
use std::sync::Arc;

// ---- commands -------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PlaylistInsertCmd {
    pub playlist: PlaylistId,
    pub media: Media,
    pub position: i64, // -1 appends
}

#[derive(Debug, Clone)]
pub struct PlaylistDeleteCmd {
    pub playlist: PlaylistId,
    pub position: usize,
}

#[derive(Debug, Clone)]
pub struct PlaylistMoveCmd {
    pub playlist: PlaylistId,
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone)]
pub struct PlaylistModeCmd {
    pub playlist: PlaylistId,
    pub mode: PlaylistMode,
}

#[derive(Debug, Clone)]
pub struct PlaylistClearCmd {
    pub playlist: PlaylistId,
}

#[derive(Debug, Clone)]
pub struct PlayCmd {
    pub media: Media,
}

/// `None` toggles
#[derive(Debug, Clone, Default)]
pub struct PauseCmd {
    pub paused: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct StopCmd;

#[derive(Debug, Clone, Default)]
pub struct NextCmd;

/// Handled by provider collaborators, never by the core
#[derive(Debug, Clone)]
pub struct SearchCmd {
    pub keyword: String,
    pub provider: Option<String>,
}

pub const PLAYLIST_INSERT_CMD: Topic<PlaylistInsertCmd> = Topic::fixed("cmd.playlist.insert");
pub const PLAYLIST_DELETE_CMD: Topic<PlaylistDeleteCmd> = Topic::fixed("cmd.playlist.delete");
pub const PLAYLIST_MOVE_CMD: Topic<PlaylistMoveCmd> = Topic::fixed("cmd.playlist.move");
pub const PLAYLIST_MODE_CMD: Topic<PlaylistModeCmd> = Topic::fixed("cmd.playlist.mode");
pub const PLAYLIST_CLEAR_CMD: Topic<PlaylistClearCmd> = Topic::fixed("cmd.playlist.clear");
pub const PLAY_CMD: Topic<PlayCmd> = Topic::fixed("cmd.play");
pub const PAUSE_CMD: Topic<PauseCmd> = Topic::fixed("cmd.player.pause");
pub const STOP_CMD: Topic<StopCmd> = Topic::fixed("cmd.player.stop");
pub const NEXT_CMD: Topic<NextCmd> = Topic::fixed("cmd.player.next");
pub const SEARCH_CMD: Topic<SearchCmd> = Topic::fixed("cmd.search");

// ---- updates --------------------------------------------------------------

/// Fresh snapshot after a successful mutation
#[derive(Debug, Clone)]
pub struct PlaylistUpdate {
    pub playlist: Arc<Playlist>,
}

/// Saved-playlist collection changed (created, removed, imported)
#[derive(Debug, Clone)]
pub struct PlaylistsUpdate {
    pub ids: Vec<PlaylistId>,
}

#[derive(Debug, Clone)]
pub struct PlayStarted {
    pub media: Media,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Finished, // engine reached the end
    Skipped,
    Replaced, // another media was played over it
    Stopped,  // explicit stop, the media is dropped
}

/// A media left the player. `removed` means it was taken away rather than played,
/// and such media must not be recorded as history.
#[derive(Debug, Clone)]
pub struct PlayingUpdate {
    pub media: Media,
    pub removed: bool,
    pub reason: EndReason,
}

impl PlayingUpdate {
    pub fn new(media: Media, reason: EndReason) -> Self {
        Self {
            media,
            removed: reason == EndReason::Stopped,
            reason,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackFailed {
    pub media: Media,
    pub reason: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PlayerStateUpdate {
    pub previous: PlaybackState,
    pub state: PlaybackState,
}

#[derive(Debug, Clone, Copy)]
pub struct PropertyUpdate {
    pub property: Property,
    pub value: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct LyricUpdate {
    pub index: Option<usize>,
    pub line: Option<LyricLine>,
    pub next: Option<LyricLine>,
    pub total: usize,
}

/// Produced by live-chat clients
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub user: ChatUser,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(user: ChatUser, text: impl Into<String>) -> Self {
        Self {
            user,
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// Answer to `cmd.search`, published by whoever handled it
#[derive(Debug, Clone)]
pub struct SearchResultUpdate {
    pub keyword: String,
    pub provider: String,
    pub medias: Vec<Media>,
}

/// Environmental failures that have no caller to return to
#[derive(Debug, Clone)]
pub struct ErrorUpdate {
    pub source: String,
    pub message: String,
}

pub const PLAYLISTS_UPDATE: Topic<PlaylistsUpdate> = Topic::fixed("update.playlists");
pub const PLAY_STARTED: Topic<PlayStarted> = Topic::fixed("update.player.play");
pub const PLAYING_UPDATE: Topic<PlayingUpdate> = Topic::fixed("update.player.playing");
pub const PLAYBACK_FAILED: Topic<PlaybackFailed> = Topic::fixed("update.player.failed");
pub const PLAYER_STATE_UPDATE: Topic<PlayerStateUpdate> = Topic::fixed("update.player.state");
pub const LYRIC_UPDATE: Topic<LyricUpdate> = Topic::fixed("update.lyric");
pub const CHAT_MESSAGE: Topic<ChatMessage> = Topic::fixed("update.liveroom.message");
pub const SEARCH_RESULT_UPDATE: Topic<SearchResultUpdate> = Topic::fixed("update.search_result");
pub const ERROR_UPDATE: Topic<ErrorUpdate> = Topic::fixed("update.error");

pub fn playlist_update(id: &PlaylistId) -> Topic<PlaylistUpdate> {
    Topic::new(format!("update.playlist.{}", id))
}

pub fn property_update(property: Property) -> Topic<PropertyUpdate> {
    Topic::new(format!("update.player.property.{}", property.name()))
}
