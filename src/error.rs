// Error taxonomy for the coordination core
// Structural errors come back to whoever issued the command; environmental
// ones (playback, persistence) are logged and broadcast instead

use crate::model::PlaylistId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("topic name must not be empty")]
    InvalidTopic,

    #[error("topic '{topic}' is already bound to a different payload type")]
    PayloadMismatch { topic: String },

    #[error("index {index} out of range for playlist of size {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("unknown playlist '{0}'")]
    UnknownPlaylist(PlaylistId),

    #[error("failed to load media: {0}")]
    PlaybackLoadFailure(String),

    #[error("engine cannot observe property '{0}'")]
    PropertyUnsupported(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
