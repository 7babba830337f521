// Decides what plays next: the player queue first, then the system playlist by its mode

use super::{PlaybackState, PlayerBridge};
use crate::error::Result;
use crate::event::{EndReason, EventBus, NextCmd, PlayingUpdate, PlaylistUpdate, NEXT_CMD, PLAYING_UPDATE};
use crate::playlist::Playlists;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

const HANDLER_ADVANCE: &str = "controller.advance";
const HANDLER_NEXT: &str = "controller.next";
const HANDLER_AUTOPLAY: &str = "controller.autoplay";

pub struct PlayController {
    bus: Arc<EventBus>,
    playlists: Arc<Playlists>,
    bridge: Arc<PlayerBridge>,
    auto_play: bool,
    system_cursor: Mutex<Option<usize>>,
    advancing: AtomicBool,
}

impl PlayController {
    pub fn new(
        bus: Arc<EventBus>,
        playlists: Arc<Playlists>,
        bridge: Arc<PlayerBridge>,
        auto_play: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            playlists,
            bridge,
            auto_play,
            system_cursor: Mutex::new(None),
            advancing: AtomicBool::new(false),
        })
    }

    pub fn attach(self: &Arc<Self>) -> Result<()> {
        let this = Arc::downgrade(self);
        self.bus.register(&PLAYING_UPDATE, HANDLER_ADVANCE, move |update: &PlayingUpdate| {
            if update.reason == EndReason::Finished {
                upgrade(&this)?.play_next();
            }
            Ok(())
        })?;

        let this = Arc::downgrade(self);
        self.bus.register(&NEXT_CMD, HANDLER_NEXT, move |_: &NextCmd| {
            upgrade(&this)?.skip();
            Ok(())
        })?;

        if self.auto_play {
            // a request landing in an idle player starts it
            let this = Arc::downgrade(self);
            let topic = self.playlists.player().update_topic().clone();
            self.bus.register(&topic, HANDLER_AUTOPLAY, move |update: &PlaylistUpdate| {
                let controller = upgrade(&this)?;
                let state = controller.bridge.state();
                if !update.playlist.is_empty() && !state.is_active() {
                    controller.play_next();
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    pub fn detach(&self) {
        self.bus.unregister(&PLAYING_UPDATE, HANDLER_ADVANCE);
        self.bus.unregister(&NEXT_CMD, HANDLER_NEXT);
        self.bus.unregister(self.playlists.player().update_topic(), HANDLER_AUTOPLAY);
    }

    /// Start the next media. Returns false when both the queue and the system
    /// playlist have nothing to offer.
    pub fn play_next(&self) -> bool {
        // popping the queue publishes an update, which would re-enter through autoplay
        if self
            .advancing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Already advancing, ignoring nested request");
            return false;
        }

        let next = self.playlists.player().pop_front().or_else(|| {
            let system = self.playlists.system();
            let mut cursor = self.system_cursor.lock();
            let index = system.next_index(*cursor)?;
            *cursor = Some(index);
            system.snapshot().get(index).cloned()
        });

        let started = match next {
            Some(media) => {
                self.bridge.play(media);
                true
            }
            None => {
                info!("Nothing left to play");
                false
            }
        };
        self.advancing.store(false, Ordering::Release);
        started
    }

    /// Move on without waiting for the current media to finish
    pub fn skip(&self) -> bool {
        let state = self.bridge.state();
        if state != PlaybackState::Idle {
            self.bridge.skip();
        }
        self.play_next()
    }
}

fn upgrade(this: &Weak<PlayController>) -> anyhow::Result<Arc<PlayController>> {
    this.upgrade()
        .ok_or_else(|| anyhow::anyhow!("play controller already shut down"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaylistConfig;
    use crate::event::{PlaylistInsertCmd, PLAYLIST_INSERT_CMD};
    use crate::model::{Media, PlaylistId, PlaylistMode};
    use crate::player::engine::SilentEngine;
    use crate::player::EngineSignal;

    fn setup(auto_play: bool) -> (Arc<EventBus>, Arc<Playlists>, Arc<PlayerBridge>, Arc<PlayController>) {
        let bus = Arc::new(EventBus::new());
        let playlists = Playlists::new(bus.clone(), &PlaylistConfig::default());
        playlists.attach().unwrap();
        let bridge = PlayerBridge::new(bus.clone(), Box::new(SilentEngine));
        bridge.attach().unwrap();
        let controller = PlayController::new(bus.clone(), playlists.clone(), bridge.clone(), auto_play);
        controller.attach().unwrap();
        (bus, playlists, bridge, controller)
    }

    fn current_title(bridge: &PlayerBridge) -> Option<String> {
        bridge.current().map(|m| m.title)
    }

    #[test]
    fn test_queue_before_system() {
        let (_bus, playlists, bridge, controller) = setup(false);
        playlists.system().insert(Media::new("S1", "", ""), -1).unwrap();
        playlists.player().insert(Media::new("Q1", "", ""), -1).unwrap();

        assert!(controller.play_next());
        assert_eq!(current_title(&bridge), Some("Q1".to_string()));
        assert!(playlists.player().is_empty());

        bridge.apply_signal(EngineSignal::Loaded);
        bridge.apply_signal(EngineSignal::EndOfFile);
        assert_eq!(current_title(&bridge), Some("S1".to_string()));
        // system entries stay put
        assert_eq!(playlists.system().len(), 1);
        assert_eq!(playlists.history().snapshot().titles(), vec!["Q1"]);
    }

    #[test]
    fn test_system_rotation_follows_mode() {
        let (_bus, playlists, bridge, controller) = setup(false);
        for t in ["A", "B"] {
            playlists.system().insert(Media::new(t, "", ""), -1).unwrap();
        }
        playlists.system().set_mode(PlaylistMode::Loop).unwrap();

        let mut played = Vec::new();
        for _ in 0..3 {
            controller.play_next();
            played.push(current_title(&bridge).unwrap());
        }
        assert_eq!(played, vec!["A", "B", "A"]);
    }

    #[test]
    fn test_autoplay_on_insert_into_idle_player() {
        let (bus, playlists, bridge, _controller) = setup(true);
        for t in ["R1", "R2"] {
            bus.dispatch(
                &PLAYLIST_INSERT_CMD,
                PlaylistInsertCmd {
                    playlist: PlaylistId::player(),
                    media: Media::new(t, "", ""),
                    position: -1,
                },
            );
        }
        assert_eq!(current_title(&bridge), Some("R1".to_string()));
        assert_eq!(playlists.player().snapshot().titles(), vec!["R2"]);
    }

    #[test]
    fn test_next_command_skips_into_history() {
        let (bus, playlists, bridge, _controller) = setup(false);
        bridge.play(Media::new("Now", "", ""));
        bridge.apply_signal(EngineSignal::Loaded);
        playlists.player().insert(Media::new("Later", "", ""), -1).unwrap();

        bus.dispatch(&NEXT_CMD, NextCmd);

        assert_eq!(current_title(&bridge), Some("Later".to_string()));
        assert_eq!(playlists.history().snapshot().titles(), vec!["Now"]);
    }

    #[test]
    fn test_nothing_to_play() {
        let (_bus, _playlists, bridge, controller) = setup(false);
        assert!(!controller.play_next());
        assert_eq!(bridge.state(), PlaybackState::Idle);
    }
}
