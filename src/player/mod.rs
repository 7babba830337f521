// Player control - wraps the playback engine and pushes transport state onto the bus
// Nobody polls the bridge; everything it knows is published as it changes.

pub mod bridge;
pub mod controller;
pub mod engine;
pub mod lyric;
#[cfg(feature = "audio")]
pub mod rodio_engine;

pub use bridge::PlayerBridge;
pub use controller::PlayController;
pub use engine::{EngineSignal, NullEngine, PlaybackEngine};
pub use lyric::{Lyric, LyricLine};
#[cfg(feature = "audio")]
pub use rodio_engine::RodioEngine;

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Stopped, // finished on its own, nothing current
}

impl PlaybackState {
    /// Allowed edges of the transport state machine. Going to Idle is always allowed.
    pub fn can_transition(self, to: PlaybackState) -> bool {
        use PlaybackState::*;
        matches!(
            (self, to),
            (_, Idle | Loading)
                | (Loading | Paused, Playing)
                | (Playing, Paused)
                | (Playing | Paused, Stopped)
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, PlaybackState::Loading | PlaybackState::Playing | PlaybackState::Paused)
    }
}

/// Transport properties that can be observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Property {
    TimePosition,
    Duration,
    Pause,
    Volume,
}

impl Property {
    pub const ALL: [Property; 4] = [
        Property::TimePosition,
        Property::Duration,
        Property::Pause,
        Property::Volume,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Property::TimePosition => "time-position",
            Property::Duration => "duration",
            Property::Pause => "pause",
            Property::Volume => "volume",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_edges() {
        use PlaybackState::*;
        assert!(Idle.can_transition(Loading));
        assert!(Loading.can_transition(Playing));
        assert!(Loading.can_transition(Idle));
        assert!(Playing.can_transition(Paused));
        assert!(Paused.can_transition(Playing));
        assert!(Playing.can_transition(Stopped));
        assert!(Stopped.can_transition(Loading));

        assert!(!Idle.can_transition(Playing));
        assert!(!Idle.can_transition(Paused));
        assert!(!Loading.can_transition(Paused));
        assert!(!Stopped.can_transition(Playing));
        for s in [Idle, Loading, Playing, Paused, Stopped] {
            assert!(s.can_transition(Idle));
        }
    }

    #[test]
    fn test_property_names_round_trip() {
        for p in Property::ALL {
            assert_eq!(Property::from_name(p.name()), Some(p));
        }
        assert_eq!(Property::from_name("volume-max"), None);
    }
}
