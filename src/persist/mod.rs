// Saved playlist storage - a single JSON array of playlist records
// The playlist engine never touches disk; it only imports and exports plain data.

use crate::error::{CoreError, Result};
use crate::event::{ErrorUpdate, EventBus, ERROR_UPDATE};
use crate::model::Playlist;
use crate::playlist::Playlists;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

const SOURCE: &str = "persist";

pub struct PlaylistStore {
    path: PathBuf,
}

impl PlaylistStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or empty file is a fresh start, not an error
    pub fn load(&self) -> Result<Vec<Playlist>> {
        if !self.path.exists() {
            info!("No saved playlists at {}, starting empty", self.path.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| {
            CoreError::PersistenceFailure(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        if content.trim().is_empty() {
            info!("Saved playlist file {} is empty", self.path.display());
            return Ok(Vec::new());
        }

        let playlists: Vec<Playlist> = serde_json::from_str(&content).map_err(|e| {
            CoreError::PersistenceFailure(format!("failed to parse {}: {}", self.path.display(), e))
        })?;
        info!("Loaded {} saved playlists from {}", playlists.len(), self.path.display());
        Ok(playlists)
    }

    pub fn save(&self, playlists: &[Playlist]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CoreError::PersistenceFailure(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let json = serde_json::to_string_pretty(playlists)
            .map_err(|e| CoreError::PersistenceFailure(format!("failed to serialize playlists: {}", e)))?;

        // write beside the target, then rename over it
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| CoreError::PersistenceFailure(format!("failed to write {}: {}", self.path.display(), e)))?;

        info!("Saved {} playlists to {}", playlists.len(), self.path.display());
        Ok(())
    }

    /// Load into the engine. Failures are logged and broadcast, the engine starts empty.
    pub fn restore(&self, playlists: &Playlists, bus: &EventBus) {
        match self.load() {
            Ok(saved) => playlists.import_saved(saved),
            Err(e) => {
                report(bus, &e);
                playlists.import_saved(Vec::new());
            }
        }
    }

    /// Export from the engine and write. Failures are logged and broadcast.
    pub fn persist(&self, playlists: &Playlists, bus: &EventBus) -> bool {
        match self.save(&playlists.export_saved()) {
            Ok(()) => true,
            Err(e) => {
                report(bus, &e);
                false
            }
        }
    }
}

fn report(bus: &EventBus, err: &CoreError) {
    error!("{}", err);
    bus.dispatch(
        &ERROR_UPDATE,
        ErrorUpdate {
            source: SOURCE.to_string(),
            message: err.to_string(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaylistConfig;
    use crate::model::{Media, PlaylistId, PlaylistMode};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn sample() -> Vec<Playlist> {
        let mut fav = Playlist::new(PlaylistId::new("fav"), "Favourites");
        fav.mode = PlaylistMode::Random;
        fav.medias.push(Media::new("Song A", "Artist", "/music/a.mp3"));
        fav.medias.push(Media::new("Song A", "Artist", "/music/a.mp3"));
        vec![fav, Playlist::new(PlaylistId::new("empty"), "Empty")]
    }

    #[test]
    fn test_missing_and_empty_files_start_empty() {
        let dir = TempDir::new().unwrap();
        let store = PlaylistStore::new(dir.path().join("playlists.json"));
        assert!(store.load().unwrap().is_empty());

        fs::write(store.path(), "  \n").unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = PlaylistStore::new(dir.path().join("nested").join("playlists.json"));
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), sample());
        assert!(!dir.path().join("nested").join("playlists.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_persistence_failure() {
        let dir = TempDir::new().unwrap();
        let store = PlaylistStore::new(dir.path().join("playlists.json"));
        fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(store.load(), Err(CoreError::PersistenceFailure(_))));
    }

    #[test]
    fn test_restore_corrupt_file_broadcasts_and_continues() {
        let dir = TempDir::new().unwrap();
        let store = PlaylistStore::new(dir.path().join("playlists.json"));
        fs::write(store.path(), "[{\"oops\": ").unwrap();

        let bus = Arc::new(EventBus::new());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        bus.register(&ERROR_UPDATE, "test.errors", move |u: &ErrorUpdate| {
            e.lock().push(u.source.clone());
            Ok(())
        })
        .unwrap();

        let playlists = Playlists::new(bus.clone(), &PlaylistConfig::default());
        store.restore(&playlists, &bus);

        assert_eq!(*errors.lock(), vec!["persist"]);
        assert!(playlists.saved_ids().is_empty());
    }

    #[test]
    fn test_persist_and_restore_through_engine() {
        let dir = TempDir::new().unwrap();
        let store = PlaylistStore::new(dir.path().join("playlists.json"));
        let bus = Arc::new(EventBus::new());

        let playlists = Playlists::new(bus.clone(), &PlaylistConfig::default());
        playlists.import_saved(sample());
        assert!(store.persist(&playlists, &bus));

        let restored = Playlists::new(bus.clone(), &PlaylistConfig::default());
        store.restore(&restored, &bus);
        assert_eq!(restored.export_saved(), sample());
    }
}
