use super::engine::{EngineSignal, PlaybackEngine};
use super::lyric::Lyric;
use super::{PlaybackState, Property};
use crate::error::{CoreError, Result};
use crate::event::{
    property_update, EndReason, EventBus, LyricUpdate, PauseCmd, PlayCmd, PlayStarted, PlaybackFailed,
    PlayerStateUpdate, PlayingUpdate, PropertyUpdate, Registrations, StopCmd, LYRIC_UPDATE, PAUSE_CMD,
    PLAYBACK_FAILED, PLAYER_STATE_UPDATE, PLAYING_UPDATE, PLAY_CMD, PLAY_STARTED, STOP_CMD,
};
use crate::model::Media;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const HANDLER_PLAY: &str = "player.cmd.play";
const HANDLER_PAUSE: &str = "player.cmd.pause";
const HANDLER_STOP: &str = "player.cmd.stop";

#[derive(Default)]
struct Transport {
    state: PlaybackState,
    current: Option<Media>,
    lyric: Lyric,
    lyric_index: Option<usize>,
    properties: HashMap<Property, Option<f64>>,
    volume: f64,
    // bumped by `play` and by ending the current media; a load only settles
    // the transport it started
    generation: u64,
}

impl Transport {
    fn state(&self) -> PlaybackState {
        self.state
    }

    fn transition(&mut self, to: PlaybackState, out: &mut Vec<Outgoing>) -> bool {
        let from = self.state();
        if from == to {
            return true;
        }
        if !from.can_transition(to) {
            debug!("Ignoring player transition {:?} -> {:?}", from, to);
            return false;
        }
        self.state = to;
        out.push(Outgoing::State(PlayerStateUpdate {
            previous: from,
            state: to,
        }));
        true
    }

    fn set_property(&mut self, property: Property, value: Option<f64>, out: &mut Vec<Outgoing>) {
        let previous = self.properties.insert(property, value).flatten();
        if previous == value {
            return;
        }
        out.push(Outgoing::Property(PropertyUpdate { property, value }));

        if property == Property::TimePosition {
            let index = value.and_then(|t| self.lyric.index_at(t));
            if index != self.lyric_index {
                self.lyric_index = index;
                out.push(Outgoing::Lyric(self.lyric_update()));
            }
        }
    }

    fn lyric_update(&self) -> LyricUpdate {
        let next = self.lyric_index.map_or(0, |i| i + 1);
        LyricUpdate {
            index: self.lyric_index,
            line: self.lyric_index.and_then(|i| self.lyric.line(i)).cloned(),
            next: self.lyric.line(next).cloned(),
            total: self.lyric.len(),
        }
    }

    /// Drop the current media and reset everything derived from it
    fn clear_current(&mut self, out: &mut Vec<Outgoing>) -> Option<Media> {
        let media = self.current.take();
        self.lyric = Lyric::default();
        self.lyric_index = None;
        if media.is_some() {
            out.push(Outgoing::Lyric(self.lyric_update()));
        }
        self.set_property(Property::TimePosition, None, out);
        self.set_property(Property::Duration, None, out);
        media
    }
}

/// Events collected under the transport lock and published after it's released,
/// so handlers are free to call back into the bridge.
enum Outgoing {
    State(PlayerStateUpdate),
    Started(PlayStarted),
    Playing(PlayingUpdate),
    Failed(PlaybackFailed),
    Property(PropertyUpdate),
    Lyric(LyricUpdate),
}

/// Sole owner of the playback engine.
///
/// Commands come in from above (`play`, `pause`, `stop`, bus commands), engine
/// signals from below (`apply_signal` / `run_signals`); every state change is
/// pushed out as an event.
pub struct PlayerBridge {
    bus: Arc<EventBus>,
    engine: Box<dyn PlaybackEngine>,
    transport: Mutex<Transport>,
}

impl PlayerBridge {
    pub fn new(bus: Arc<EventBus>, engine: Box<dyn PlaybackEngine>) -> Arc<Self> {
        Arc::new(Self {
            bus,
            engine,
            transport: Mutex::new(Transport {
                volume: 1.0,
                ..Default::default()
            }),
        })
    }

    pub fn attach(self: &Arc<Self>) -> Result<()> {
        let this = Arc::downgrade(self);
        self.bus.register(&PLAY_CMD, HANDLER_PLAY, move |cmd: &PlayCmd| {
            upgrade(&this)?.play(cmd.media.clone());
            Ok(())
        })?;

        let this = Arc::downgrade(self);
        self.bus.register(&PAUSE_CMD, HANDLER_PAUSE, move |cmd: &PauseCmd| {
            let bridge = upgrade(&this)?;
            match cmd.paused {
                Some(true) => bridge.pause(),
                Some(false) => bridge.resume(),
                None => bridge.toggle_pause(),
            }
            Ok(())
        })?;

        let this = Arc::downgrade(self);
        self.bus.register(&STOP_CMD, HANDLER_STOP, move |_: &StopCmd| {
            upgrade(&this)?.stop();
            Ok(())
        })?;
        Ok(())
    }

    pub fn detach(&self) {
        self.bus.unregister(&PLAY_CMD, HANDLER_PLAY);
        self.bus.unregister(&PAUSE_CMD, HANDLER_PAUSE);
        self.bus.unregister(&STOP_CMD, HANDLER_STOP);
    }

    pub fn state(&self) -> PlaybackState {
        self.transport.lock().state()
    }

    pub fn current(&self) -> Option<Media> {
        self.transport.lock().current.clone()
    }

    pub fn property(&self, property: Property) -> Option<f64> {
        self.transport.lock().properties.get(&property).copied().flatten()
    }

    /// Make `media` current and hand it to the engine. Load problems are published
    /// as `update.player.failed`, never returned - playback is asynchronous anyway.
    pub fn play(&self, media: Media) {
        let mut out = Vec::new();
        let generation;
        {
            let mut t = self.transport.lock();
            if let Some(previous) = t.current.take() {
                out.push(Outgoing::Playing(PlayingUpdate::new(previous, EndReason::Replaced)));
            }
            t.clear_current(&mut out);
            t.transition(PlaybackState::Loading, &mut out);
            t.generation += 1;
            generation = t.generation;
            t.current = Some(media.clone());
            t.lyric = if media.has_lyric() {
                Lyric::parse(&media.lyric)
            } else {
                Lyric::default()
            };
            out.push(Outgoing::Lyric(t.lyric_update()));
        }
        self.publish(out);

        info!("Playing '{}' by {} for {}", media.title, media.display_artist(), media.user_name());
        let loaded = self.engine.load(&media.url, &media.headers);
        self.settle_load(generation, media, loaded);
    }

    /// Finish a `play` once the engine answered. A newer `play` may have taken over
    /// meanwhile; then only the failure of this one is reported.
    fn settle_load(&self, generation: u64, media: Media, loaded: Result<()>) {
        let mut out = Vec::new();
        {
            let mut t = self.transport.lock();
            let superseded = t.generation != generation;
            match loaded {
                Ok(()) if superseded => debug!("'{}' was replaced while loading", media.title),
                Ok(()) => out.push(Outgoing::Started(PlayStarted { media })),
                Err(e) => {
                    let reason = e.to_string();
                    warn!("Playback of '{}' failed: {}", media.title, reason);
                    if !superseded {
                        t.clear_current(&mut out);
                        t.transition(PlaybackState::Idle, &mut out);
                    }
                    out.push(Outgoing::Failed(PlaybackFailed { media, reason }));
                }
            }
        }
        self.publish(out);
    }

    pub fn pause(&self) {
        self.set_paused(true);
    }

    pub fn resume(&self) {
        self.set_paused(false);
    }

    pub fn toggle_pause(&self) {
        let paused = self.state() == PlaybackState::Paused;
        self.set_paused(!paused);
    }

    fn set_paused(&self, paused: bool) {
        let mut out = Vec::new();
        {
            let mut t = self.transport.lock();
            let target = if paused {
                PlaybackState::Paused
            } else {
                PlaybackState::Playing
            };
            let allowed = match t.state() {
                PlaybackState::Playing => paused,
                PlaybackState::Paused => !paused,
                _ => false,
            };
            if !allowed {
                return;
            }
            self.engine.set_paused(paused);
            t.transition(target, &mut out);
            t.set_property(Property::Pause, Some(if paused { 1.0 } else { 0.0 }), &mut out);
        }
        self.publish(out);
    }

    /// Explicit stop: the current media is dropped (published with `removed`), back to Idle
    pub fn stop(&self) {
        self.end_current(EndReason::Stopped, PlaybackState::Idle);
    }

    /// Leave the current media as played and stop the engine; the caller picks what's next
    pub fn skip(&self) {
        self.end_current(EndReason::Skipped, PlaybackState::Stopped);
    }

    fn end_current(&self, reason: EndReason, target: PlaybackState) {
        self.engine.stop();
        let mut out = Vec::new();
        {
            let mut t = self.transport.lock();
            t.generation += 1;
            let media = t.clear_current(&mut out);
            if !t.transition(target, &mut out) {
                t.transition(PlaybackState::Idle, &mut out);
            }
            if let Some(media) = media {
                out.push(Outgoing::Playing(PlayingUpdate::new(media, reason)));
            }
        }
        self.publish(out);
    }

    pub fn set_volume(&self, volume: f64) {
        let volume = volume.clamp(0.0, 1.0);
        self.engine.set_volume(volume);
        let mut out = Vec::new();
        {
            let mut t = self.transport.lock();
            t.volume = volume;
            t.set_property(Property::Volume, Some(volume), &mut out);
        }
        self.publish(out);
    }

    pub fn volume(&self) -> f64 {
        self.transport.lock().volume
    }

    /// Fails with `PropertyUnsupported` when the engine can't report `property`
    pub fn check_property(&self, property: Property) -> Result<()> {
        if self.engine.supports(property) {
            Ok(())
        } else {
            Err(CoreError::PropertyUnsupported(property.name().to_string()))
        }
    }

    /// Push-observe a transport property under `(property, observer_name)`
    pub fn observe_property<F>(&self, property: Property, observer_name: &str, callback: F) -> Result<()>
    where
        F: Fn(&PropertyUpdate) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.check_property(property)?;
        self.bus.register(&property_update(property), observer_name, callback)
    }

    /// Same as `observe_property`, but owned by a plugin's registrations
    pub fn observe_property_with<F>(
        &self,
        registrations: &Registrations,
        property: Property,
        observer_name: &str,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(&PropertyUpdate) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.check_property(property)?;
        registrations.register(&property_update(property), observer_name, callback)
    }

    pub fn apply_signal(&self, signal: EngineSignal) {
        let mut out = Vec::new();
        {
            let mut t = self.transport.lock();
            match signal {
                EngineSignal::Loaded => {
                    if t.state() == PlaybackState::Loading {
                        t.transition(PlaybackState::Playing, &mut out);
                        t.set_property(Property::Pause, Some(0.0), &mut out);
                    }
                }
                EngineSignal::Property { property, value } => {
                    if t.current.is_none() && value.is_some() {
                        debug!("Dropping {} update with nothing loaded", property);
                    } else {
                        t.set_property(property, value, &mut out);
                    }
                }
                // engines signal Loaded before anything else about a media, so an
                // end of file seen while loading belongs to the one before it
                EngineSignal::EndOfFile if t.state() == PlaybackState::Loading => {
                    debug!("Ignoring end of file from the previous media");
                }
                EngineSignal::EndOfFile => {
                    if let Some(media) = t.clear_current(&mut out) {
                        debug!("Finished '{}'", media.title);
                        if !t.transition(PlaybackState::Stopped, &mut out) {
                            t.transition(PlaybackState::Idle, &mut out);
                        }
                        out.push(Outgoing::Playing(PlayingUpdate::new(media, EndReason::Finished)));
                    }
                }
                EngineSignal::Failed(reason) => {
                    drop(t);
                    self.fail(reason);
                    return;
                }
            }
        }
        self.publish(out);
    }

    /// Pump engine signals until every sender is gone. Each signal is applied on
    /// the blocking pool, one at a time: handlers it triggers may load the next
    /// media, and engines are allowed to block in `load`.
    pub async fn run_signals(self: Arc<Self>, mut signals: mpsc::UnboundedReceiver<EngineSignal>) {
        while let Some(signal) = signals.recv().await {
            let bridge = self.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || bridge.apply_signal(signal)).await {
                error!("Applying engine signal failed: {}", e);
            }
        }
        debug!("Engine signal channel closed");
    }

    fn fail(&self, reason: String) {
        let mut out = Vec::new();
        {
            let mut t = self.transport.lock();
            let Some(media) = t.clear_current(&mut out) else {
                warn!("Engine failure with nothing loaded: {}", reason);
                return;
            };
            warn!("Playback of '{}' failed: {}", media.title, reason);
            t.transition(PlaybackState::Idle, &mut out);
            out.push(Outgoing::Failed(PlaybackFailed { media, reason }));
        }
        self.publish(out);
    }

    fn publish(&self, events: Vec<Outgoing>) {
        for event in events {
            match event {
                Outgoing::State(update) => self.bus.dispatch(&PLAYER_STATE_UPDATE, update),
                Outgoing::Started(started) => self.bus.dispatch(&PLAY_STARTED, started),
                Outgoing::Playing(playing) => self.bus.dispatch(&PLAYING_UPDATE, playing),
                Outgoing::Failed(failed) => self.bus.dispatch(&PLAYBACK_FAILED, failed),
                Outgoing::Property(update) => self.bus.dispatch(&property_update(update.property), update),
                Outgoing::Lyric(update) => self.bus.dispatch(&LYRIC_UPDATE, update),
            }
        }
    }
}

fn upgrade(this: &Weak<PlayerBridge>) -> anyhow::Result<Arc<PlayerBridge>> {
    this.upgrade()
        .ok_or_else(|| anyhow::anyhow!("player bridge already shut down"))
}
