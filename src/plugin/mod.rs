// Plugin shell - optional consumers that can be switched on and off at runtime
// Everything a plugin subscribes to goes through its context, so disabling it
// takes every one of those subscriptions down with it.

pub mod request;
pub mod skip;
pub mod textinfo;
#[cfg(feature = "notify")]
pub mod notify;

pub use request::{LibraryProvider, MediaProvider, RequestPlugin};
pub use skip::SkipPlugin;
pub use textinfo::TextInfoPlugin;
#[cfg(feature = "notify")]
pub use notify::NotifyPlugin;

use crate::error::Result;
use crate::event::{EventBus, PropertyUpdate, Registrations, Topic};
use crate::player::{PlayerBridge, Property};
use crate::playlist::Playlists;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

pub trait Plugin: Send {
    /// Unique within a manager. Handler names a plugin registers are bound
    /// under `plugin.<name>.` on the bus.
    fn name(&self) -> &str;

    fn enable(&mut self, ctx: &PluginContext) -> anyhow::Result<()>;

    /// Subscriptions are released by the manager afterwards, whatever this returns
    fn disable(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Registered,
    Enabled,
    Disabled,
}

/// What a plugin gets to work with while enabled
pub struct PluginContext {
    playlists: Arc<Playlists>,
    bridge: Arc<PlayerBridge>,
    runtime: Option<Handle>,
    registrations: Registrations,
}

impl PluginContext {
    pub fn bus(&self) -> &Arc<EventBus> {
        self.registrations.bus()
    }

    pub fn playlists(&self) -> &Arc<Playlists> {
        &self.playlists
    }

    pub fn bridge(&self) -> &Arc<PlayerBridge> {
        &self.bridge
    }

    /// Runtime for work that must stay off the dispatch path
    pub fn runtime(&self) -> anyhow::Result<&Handle> {
        self.runtime
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no async runtime available for plugin work"))
    }

    pub fn register<T, F>(&self, topic: &Topic<T>, handler_name: &str, handler: F) -> Result<()>
    where
        T: 'static,
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registrations.register(topic, handler_name, handler)
    }

    pub fn observe_property<F>(&self, property: Property, observer_name: &str, callback: F) -> Result<()>
    where
        F: Fn(&PropertyUpdate) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bridge
            .observe_property_with(&self.registrations, property, observer_name, callback)
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }
}

struct Entry {
    plugin: Box<dyn Plugin>,
    state: PluginState,
    context: Option<PluginContext>,
}

pub struct PluginManager {
    bus: Arc<EventBus>,
    playlists: Arc<Playlists>,
    bridge: Arc<PlayerBridge>,
    runtime: Option<Handle>,
    entries: Mutex<Vec<Entry>>,
}

impl PluginManager {
    /// Picks up the current tokio runtime, if there is one
    pub fn new(bus: Arc<EventBus>, playlists: Arc<Playlists>, bridge: Arc<PlayerBridge>) -> Self {
        Self {
            bus,
            playlists,
            bridge,
            runtime: Handle::try_current().ok(),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn load(&self, plugin: Box<dyn Plugin>) -> anyhow::Result<()> {
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.plugin.name() == plugin.name()) {
            return Err(anyhow::anyhow!("plugin '{}' is already loaded", plugin.name()));
        }
        info!("Loaded plugin '{}'", plugin.name());
        entries.push(Entry {
            plugin,
            state: PluginState::Registered,
            context: None,
        });
        Ok(())
    }

    pub fn enable(&self, name: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.lock();
        let entry = find(&mut entries, name)?;
        if entry.state == PluginState::Enabled {
            return Ok(());
        }

        let context = PluginContext {
            playlists: self.playlists.clone(),
            bridge: self.bridge.clone(),
            runtime: self.runtime.clone(),
            registrations: Registrations::new(self.bus.clone(), format!("plugin.{}", name)),
        };
        // a failed enable leaves nothing behind; dropping the context releases it
        entry
            .plugin
            .enable(&context)
            .map_err(|e| anyhow::anyhow!("failed to enable plugin '{}': {:#}", name, e))?;

        info!("Enabled plugin '{}' ({} handlers)", name, context.registration_count());
        entry.context = Some(context);
        entry.state = PluginState::Enabled;
        Ok(())
    }

    pub fn disable(&self, name: &str) -> anyhow::Result<()> {
        let mut entries = self.entries.lock();
        let entry = find(&mut entries, name)?;
        disable_entry(entry);
        Ok(())
    }

    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.plugin.name() == name)
            .map(|e| e.state)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|e| e.plugin.name().to_string())
            .collect()
    }

    /// Disable everything, last loaded first
    pub fn close_all(&self) {
        let mut entries = self.entries.lock();
        for entry in entries.iter_mut().rev() {
            disable_entry(entry);
        }
    }
}

fn find<'a>(entries: &'a mut [Entry], name: &str) -> anyhow::Result<&'a mut Entry> {
    entries
        .iter_mut()
        .find(|e| e.plugin.name() == name)
        .ok_or_else(|| anyhow::anyhow!("no plugin named '{}'", name))
}

fn disable_entry(entry: &mut Entry) {
    if entry.state != PluginState::Enabled {
        return;
    }
    let name = entry.plugin.name().to_string();
    if let Err(e) = entry.plugin.disable() {
        warn!("Plugin '{}' failed to disable cleanly: {:#}", name, e);
    }
    match entry.context.take() {
        Some(context) => context.registrations.release(),
        None => error!("Plugin '{}' was enabled without a context", name),
    }
    entry.state = PluginState::Disabled;
    info!("Disabled plugin '{}'", name);
}
