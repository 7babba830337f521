// Playlist engine - the fixed player/system/history playlists plus the saved collection
// Only this module mutates a sequence; everyone else gets `Arc<Playlist>` snapshots.

pub mod engine;

pub use engine::{next_index, PlaylistHandle};

use crate::config::PlaylistConfig;
use crate::error::{CoreError, Result};
use crate::event::{
    EventBus, PlayingUpdate, PlaylistClearCmd, PlaylistDeleteCmd, PlaylistInsertCmd, PlaylistModeCmd,
    PlaylistMoveCmd, PlaylistsUpdate, PLAYING_UPDATE, PLAYLISTS_UPDATE, PLAYLIST_CLEAR_CMD,
    PLAYLIST_DELETE_CMD, PLAYLIST_INSERT_CMD, PLAYLIST_MODE_CMD, PLAYLIST_MOVE_CMD,
};
use crate::model::{Playlist, PlaylistId};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::{info, warn};
use uuid::Uuid;

const HANDLER_INSERT: &str = "playlist.cmd.insert";
const HANDLER_DELETE: &str = "playlist.cmd.delete";
const HANDLER_MOVE: &str = "playlist.cmd.move";
const HANDLER_MODE: &str = "playlist.cmd.mode";
const HANDLER_CLEAR: &str = "playlist.cmd.clear";
const HANDLER_HISTORY: &str = "playlist.history.record";

pub struct Playlists {
    bus: Arc<EventBus>,
    player: Arc<PlaylistHandle>,
    system: Arc<PlaylistHandle>,
    history: Arc<PlaylistHandle>,
    saved: RwLock<Vec<Arc<PlaylistHandle>>>,
}

impl Playlists {
    pub fn new(bus: Arc<EventBus>, config: &PlaylistConfig) -> Arc<Self> {
        let mut system = Playlist::new(PlaylistId::system(), "System");
        system.mode = config.system_mode;

        Arc::new(Self {
            player: Arc::new(PlaylistHandle::new(
                Playlist::new(PlaylistId::player(), "Player"),
                bus.clone(),
            )),
            system: Arc::new(PlaylistHandle::new(system, bus.clone())),
            history: Arc::new(
                PlaylistHandle::new(Playlist::new(PlaylistId::history(), "History"), bus.clone())
                    .with_limit(config.history_limit),
            ),
            saved: RwLock::new(Vec::new()),
            bus,
        })
    }

    /// Hook command intake and history recording onto the bus
    pub fn attach(self: &Arc<Self>) -> Result<()> {
        let bus = self.bus.clone();

        let this = Arc::downgrade(self);
        bus.register(&PLAYLIST_INSERT_CMD, HANDLER_INSERT, move |cmd: &PlaylistInsertCmd| {
            upgrade(&this)?.get(&cmd.playlist)?.insert(cmd.media.clone(), cmd.position)?;
            Ok(())
        })?;

        let this = Arc::downgrade(self);
        bus.register(&PLAYLIST_DELETE_CMD, HANDLER_DELETE, move |cmd: &PlaylistDeleteCmd| {
            upgrade(&this)?.get(&cmd.playlist)?.delete(cmd.position)?;
            Ok(())
        })?;

        let this = Arc::downgrade(self);
        bus.register(&PLAYLIST_MOVE_CMD, HANDLER_MOVE, move |cmd: &PlaylistMoveCmd| {
            upgrade(&this)?.get(&cmd.playlist)?.move_media(cmd.from, cmd.to)?;
            Ok(())
        })?;

        let this = Arc::downgrade(self);
        bus.register(&PLAYLIST_MODE_CMD, HANDLER_MODE, move |cmd: &PlaylistModeCmd| {
            upgrade(&this)?.get(&cmd.playlist)?.set_mode(cmd.mode)?;
            Ok(())
        })?;

        let this = Arc::downgrade(self);
        bus.register(&PLAYLIST_CLEAR_CMD, HANDLER_CLEAR, move |cmd: &PlaylistClearCmd| {
            upgrade(&this)?.get(&cmd.playlist)?.clear()?;
            Ok(())
        })?;

        // finished media goes to history, removed media doesn't
        let this = Arc::downgrade(self);
        bus.register(&PLAYING_UPDATE, HANDLER_HISTORY, move |update: &PlayingUpdate| {
            if update.removed {
                return Ok(());
            }
            upgrade(&this)?.history.insert(update.media.clone(), -1)?;
            Ok(())
        })?;

        Ok(())
    }

    pub fn detach(&self) {
        self.bus.unregister(&PLAYLIST_INSERT_CMD, HANDLER_INSERT);
        self.bus.unregister(&PLAYLIST_DELETE_CMD, HANDLER_DELETE);
        self.bus.unregister(&PLAYLIST_MOVE_CMD, HANDLER_MOVE);
        self.bus.unregister(&PLAYLIST_MODE_CMD, HANDLER_MODE);
        self.bus.unregister(&PLAYLIST_CLEAR_CMD, HANDLER_CLEAR);
        self.bus.unregister(&PLAYING_UPDATE, HANDLER_HISTORY);
    }

    pub fn player(&self) -> &Arc<PlaylistHandle> {
        &self.player
    }

    pub fn system(&self) -> &Arc<PlaylistHandle> {
        &self.system
    }

    pub fn history(&self) -> &Arc<PlaylistHandle> {
        &self.history
    }

    pub fn get(&self, id: &PlaylistId) -> Result<Arc<PlaylistHandle>> {
        match id.as_str() {
            PlaylistId::PLAYER => Ok(self.player.clone()),
            PlaylistId::SYSTEM => Ok(self.system.clone()),
            PlaylistId::HISTORY => Ok(self.history.clone()),
            _ => self
                .saved
                .read()
                .iter()
                .find(|h| h.id() == id)
                .cloned()
                .ok_or_else(|| CoreError::UnknownPlaylist(id.clone())),
        }
    }

    pub fn saved_ids(&self) -> Vec<PlaylistId> {
        self.saved.read().iter().map(|h| h.id().clone()).collect()
    }

    pub fn create_saved(&self, title: impl Into<String>) -> PlaylistId {
        let id = PlaylistId::new(Uuid::new_v4().to_string());
        let playlist = Playlist::new(id.clone(), title);
        info!("Created saved playlist '{}' ({})", playlist.title, id);
        self.saved
            .write()
            .push(Arc::new(PlaylistHandle::new(playlist, self.bus.clone())));
        self.publish_collection();
        id
    }

    pub fn remove_saved(&self, id: &PlaylistId) -> Result<Arc<Playlist>> {
        let removed = {
            let mut saved = self.saved.write();
            let index = saved
                .iter()
                .position(|h| h.id() == id)
                .ok_or_else(|| CoreError::UnknownPlaylist(id.clone()))?;
            saved.remove(index)
        };
        info!("Removed saved playlist {}", id);
        self.publish_collection();
        Ok(removed.snapshot())
    }

    /// Replace the saved collection. Records claiming a builtin id or repeating
    /// an id already imported are skipped.
    pub fn import_saved(&self, playlists: Vec<Playlist>) {
        let mut handles: Vec<Arc<PlaylistHandle>> = Vec::with_capacity(playlists.len());
        for playlist in playlists {
            if playlist.id.is_builtin() || handles.iter().any(|h| h.id() == &playlist.id) {
                warn!("Skipping saved playlist with reserved or duplicate id '{}'", playlist.id);
                continue;
            }
            handles.push(Arc::new(PlaylistHandle::new(playlist, self.bus.clone())));
        }
        info!("Imported {} saved playlists", handles.len());
        *self.saved.write() = handles;
        self.publish_collection();
    }

    /// Pure data, in collection order - the caller decides where it goes
    pub fn export_saved(&self) -> Vec<Playlist> {
        self.saved
            .read()
            .iter()
            .map(|h| Playlist::clone(&h.snapshot()))
            .collect()
    }

    fn publish_collection(&self) {
        self.bus.dispatch(&PLAYLISTS_UPDATE, PlaylistsUpdate { ids: self.saved_ids() });
    }
}

fn upgrade(this: &Weak<Playlists>) -> anyhow::Result<Arc<Playlists>> {
    this.upgrade()
        .ok_or_else(|| anyhow::anyhow!("playlist engine already shut down"))
}
