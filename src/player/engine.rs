use super::Property;
use crate::error::{CoreError, Result};
use std::collections::HashMap;

/// What the underlying engine reports back. Delivered over the bridge's signal
/// channel, so engines can send from their own threads.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineSignal {
    Loaded,
    Property { property: Property, value: Option<f64> },
    EndOfFile,
    Failed(String),
}

/// The playback backend the bridge drives. Only the bridge ever holds one.
///
/// `load` returns an error only when the media is rejected outright; anything that
/// goes wrong later arrives as `EngineSignal::Failed`.
pub trait PlaybackEngine: Send + Sync {
    fn load(&self, url: &str, headers: &HashMap<String, String>) -> Result<()>;
    fn set_paused(&self, paused: bool);
    fn stop(&self);
    fn set_volume(&self, volume: f64);
    fn supports(&self, property: Property) -> bool;
}

/// Headless stand-in - accepts observers but refuses to play anything.
#[derive(Debug, Default)]
pub struct NullEngine;

impl PlaybackEngine for NullEngine {
    fn load(&self, url: &str, _headers: &HashMap<String, String>) -> Result<()> {
        Err(CoreError::PlaybackLoadFailure(format!(
            "no audio backend available for {}",
            url
        )))
    }

    fn set_paused(&self, _paused: bool) {}

    fn stop(&self) {}

    fn set_volume(&self, _volume: f64) {}

    fn supports(&self, property: Property) -> bool {
        matches!(property, Property::TimePosition | Property::Duration)
    }
}

/// Accepts every load and reports nothing on its own; tests drive it with signals
#[cfg(test)]
pub(crate) struct SilentEngine;

#[cfg(test)]
impl PlaybackEngine for SilentEngine {
    fn load(&self, _url: &str, _headers: &HashMap<String, String>) -> Result<()> {
        Ok(())
    }
    fn set_paused(&self, _paused: bool) {}
    fn stop(&self) {}
    fn set_volume(&self, _volume: f64) {}
    fn supports(&self, _property: Property) -> bool {
        true
    }
}
