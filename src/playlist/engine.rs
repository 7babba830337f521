use crate::error::{CoreError, Result};
use crate::event::{playlist_update, EventBus, PlaylistUpdate, Topic};
use crate::model::{Media, Playlist, PlaylistId, PlaylistMode};
use parking_lot::{ReentrantMutex, RwLock};
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Owner of one playlist's sequence.
///
/// Mutations run one at a time, build a new sequence off to the side and swap it in
/// (copy-on-publish), then broadcast `update.playlist.<id>` before letting the next
/// mutation through. `snapshot()` only clones an `Arc`, so readers never wait on a
/// mutation's work and never see a half-applied change.
pub struct PlaylistHandle {
    id: PlaylistId,
    bus: Arc<EventBus>,
    topic: Topic<PlaylistUpdate>,
    current: RwLock<Arc<Playlist>>,
    mutation: ReentrantMutex<()>,
    limit: Option<usize>,
}

impl fmt::Debug for PlaylistHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaylistHandle")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}

impl PlaylistHandle {
    pub fn new(playlist: Playlist, bus: Arc<EventBus>) -> Self {
        Self {
            id: playlist.id.clone(),
            topic: playlist_update(&playlist.id),
            bus,
            current: RwLock::new(Arc::new(playlist)),
            mutation: ReentrantMutex::new(()),
            limit: None,
        }
    }

    /// Keep at most `limit` entries, dropping the oldest first
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn id(&self) -> &PlaylistId {
        &self.id
    }

    pub fn update_topic(&self) -> &Topic<PlaylistUpdate> {
        &self.topic
    }

    /// Immutable view of the latest committed state
    pub fn snapshot(&self) -> Arc<Playlist> {
        self.current.read().clone()
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mode(&self) -> PlaylistMode {
        self.current.read().mode
    }

    /// Insert before `position`; `-1` appends.
    pub fn insert(&self, media: Media, position: i64) -> Result<()> {
        self.mutate(|playlist| {
            let len = playlist.len();
            let index = match position {
                -1 => len,
                p if p >= 0 && p as usize <= len => p as usize,
                _ => return Err(CoreError::IndexOutOfRange { index: position, len }),
            };
            debug!("Inserting '{}' at {} in '{}'", media.title, index, playlist.id);
            playlist.medias.insert(index, media);
            Ok(())
        })
    }

    pub fn delete(&self, position: usize) -> Result<Media> {
        self.mutate(|playlist| {
            let len = playlist.len();
            if position >= len {
                return Err(CoreError::IndexOutOfRange {
                    index: position as i64,
                    len,
                });
            }
            Ok(playlist.medias.remove(position))
        })
    }

    /// Move the entry at `from` so it ends up at `to`. Both must be valid indices of
    /// the (unchanged-size) sequence; anything past the end is rejected, not clamped.
    pub fn move_media(&self, from: usize, to: usize) -> Result<()> {
        self.mutate(|playlist| {
            let len = playlist.len();
            for index in [from, to] {
                if index >= len {
                    return Err(CoreError::IndexOutOfRange {
                        index: index as i64,
                        len,
                    });
                }
            }
            let media = playlist.medias.remove(from);
            playlist.medias.insert(to, media);
            Ok(())
        })
    }

    pub fn set_mode(&self, mode: PlaylistMode) -> Result<()> {
        self.mutate(|playlist| {
            info!("Playlist '{}' mode {:?} -> {:?}", playlist.id, playlist.mode, mode);
            playlist.mode = mode;
            Ok(())
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.mutate(|playlist| {
            playlist.medias.clear();
            Ok(())
        })
    }

    /// Swap in a whole new sequence (used on import)
    pub fn replace(&self, medias: Vec<Media>) -> Result<()> {
        self.mutate(|playlist| {
            playlist.medias = medias;
            Ok(())
        })
    }

    /// Atomically take the first entry. An empty playlist is not a mutation,
    /// so nothing is broadcast.
    pub fn pop_front(&self) -> Option<Media> {
        let _serial = self.mutation.lock();
        if self.is_empty() {
            return None;
        }
        self.delete(0).ok()
    }

    /// Pick the index to play after `cursor` according to the playlist mode
    pub fn next_index(&self, cursor: Option<usize>) -> Option<usize> {
        let snapshot = self.snapshot();
        next_index(snapshot.mode, cursor, snapshot.len())
    }

    fn mutate<R>(&self, apply: impl FnOnce(&mut Playlist) -> Result<R>) -> Result<R> {
        let _serial = self.mutation.lock();

        let mut next = Playlist::clone(&self.current.read());
        let out = apply(&mut next)?;
        if let Some(limit) = self.limit {
            if next.medias.len() > limit {
                let excess = next.medias.len() - limit;
                next.medias.drain(..excess);
            }
        }

        let snapshot = Arc::new(next);
        *self.current.write() = snapshot.clone();
        // still serialised here, so updates go out in mutation order
        self.bus.dispatch(&self.topic, PlaylistUpdate { playlist: snapshot });
        Ok(out)
    }
}

pub fn next_index(mode: PlaylistMode, cursor: Option<usize>, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    match (mode, cursor) {
        (PlaylistMode::Random, _) => Some(rand::thread_rng().gen_range(0..len)),
        (_, None) => Some(0),
        (PlaylistMode::Single, Some(c)) => Some(c.min(len - 1)),
        (PlaylistMode::Loop, Some(c)) => Some((c + 1) % len),
        (PlaylistMode::Normal, Some(c)) => (c + 1 < len).then_some(c + 1),
    }
}
