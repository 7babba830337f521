// Application context - owns the bus and everything wired onto it
// Built once at startup and torn down with `stop`; nothing here is global.

use crate::config::Config;
use crate::error::Result;
use crate::event::EventBus;
use crate::model::{Playlist, PlaylistMode};
use crate::player::{PlayController, PlaybackEngine, PlayerBridge};
use crate::playlist::Playlists;
use crate::plugin::{LibraryProvider, PluginManager, RequestPlugin, SkipPlugin, TextInfoPlugin};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Context {
    pub bus: Arc<EventBus>,
    pub playlists: Arc<Playlists>,
    pub bridge: Arc<PlayerBridge>,
    pub controller: Arc<PlayController>,
    pub plugins: PluginManager,
}

/// What's left to persist once everything is shut down
#[derive(Debug)]
pub struct Shutdown {
    pub saved: Vec<Playlist>,
    pub system_mode: PlaylistMode,
}

impl Context {
    /// Bus first, then playlists, the bridge around `engine`, the controller and
    /// the (still empty) plugin manager
    pub fn initialize(config: &Config, engine: Box<dyn PlaybackEngine>) -> Result<Self> {
        let bus = Arc::new(EventBus::new());

        let playlists = Playlists::new(bus.clone(), &config.playlist);
        playlists.attach()?;

        let bridge = PlayerBridge::new(bus.clone(), engine);
        bridge.attach()?;
        bridge.set_volume(config.player.volume);

        let controller = PlayController::new(
            bus.clone(),
            playlists.clone(),
            bridge.clone(),
            config.player.auto_play,
        );
        controller.attach()?;

        let plugins = PluginManager::new(bus.clone(), playlists.clone(), bridge.clone());
        info!("Context initialized ({} topics)", bus.topics().len());

        Ok(Self {
            bus,
            playlists,
            bridge,
            controller,
            plugins,
        })
    }

    /// Load and enable the bundled plugins switched on in `config`. A plugin that
    /// fails to come up is logged and left disabled.
    pub fn start_plugins(&self, config: &Config) {
        let mut names = Vec::new();
        if config.textinfo.enabled {
            names.push(self.load(Box::new(TextInfoPlugin::new(config.textinfo.clone()))));
        }
        if config.request.enabled {
            let provider = Arc::new(LibraryProvider::new(self.playlists.clone()));
            names.push(self.load(Box::new(RequestPlugin::new(config.request.clone(), provider))));
        }
        if config.skip.enabled {
            names.push(self.load(Box::new(SkipPlugin::new(config.skip.clone()))));
        }
        #[cfg(feature = "notify")]
        names.push(self.load(Box::new(crate::plugin::NotifyPlugin::new())));

        for name in names.into_iter().flatten() {
            if let Err(e) = self.plugins.enable(&name) {
                warn!("{:#}", e);
            }
        }
    }

    fn load(&self, plugin: Box<dyn crate::plugin::Plugin>) -> Option<String> {
        let name = plugin.name().to_string();
        match self.plugins.load(plugin) {
            Ok(()) => Some(name),
            Err(e) => {
                warn!("{:#}", e);
                None
            }
        }
    }

    /// Tear down in reverse order. The current media is stopped, not finished.
    pub fn stop(self) -> Shutdown {
        self.plugins.close_all();
        self.controller.detach();
        self.bridge.stop();
        self.bridge.detach();
        self.playlists.detach();

        let shutdown = Shutdown {
            saved: self.playlists.export_saved(),
            system_mode: self.playlists.system().mode(),
        };
        info!("Context stopped");
        shutdown
    }
}
