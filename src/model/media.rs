use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cover art - inline bytes, a remote URL, or both (data wins when present)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Picture {
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
}

impl Picture {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self { url: Some(url.into()), data: None }
    }

    pub fn exists(&self) -> bool {
        self.data.is_some() || self.url.as_deref().map_or(false, |u| !u.is_empty())
    }
}

/// Someone on the operator side (the streamer, a moderator, the idle playlist)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemUser {
    pub name: String,
}

/// Viewer who requested the song from the live chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatUser {
    pub uid: String,
    pub username: String,
    #[serde(default)]
    pub privilege: u32, // room-specific level, 0 = regular viewer
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaUser {
    System(SystemUser),
    Chat(ChatUser),
}

impl Default for MediaUser {
    fn default() -> Self {
        MediaUser::System(SystemUser { name: "system".to_string() })
    }
}

impl MediaUser {
    /// Display name, falling back to something derived when the variant has none
    pub fn display_name(&self) -> String {
        match self {
            MediaUser::System(user) if !user.name.is_empty() => user.name.clone(),
            MediaUser::System(_) => "system".to_string(),
            MediaUser::Chat(user) if !user.username.is_empty() => user.username.clone(),
            MediaUser::Chat(user) => format!("user-{}", user.uid),
        }
    }

    pub fn as_system(&self) -> Option<&SystemUser> {
        match self {
            MediaUser::System(user) => Some(user),
            MediaUser::Chat(_) => None,
        }
    }

    pub fn as_chat(&self) -> Option<&ChatUser> {
        match self {
            MediaUser::Chat(user) => Some(user),
            MediaUser::System(_) => None,
        }
    }
}

/// A catalog entry. Once inside a playlist snapshot it's never mutated in place -
/// replace the entry instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub title: String,
    pub artist: String,
    pub album: String,
    #[serde(default)]
    pub cover: Picture,
    #[serde(default)]
    pub lyric: String, // raw LRC text, may be empty
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub user: MediaUser,
    #[serde(default)]
    pub meta: serde_json::Value, // provider-specific ids, never interpreted here
}

impl Media {
    pub fn new(title: impl Into<String>, artist: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user: MediaUser) -> Self {
        self.user = user;
        self
    }

    pub fn with_lyric(mut self, lyric: impl Into<String>) -> Self {
        self.lyric = lyric.into();
        self
    }

    pub fn user_name(&self) -> String {
        self.user.display_name()
    }

    pub fn display_title(&self) -> String {
        if self.title.is_empty() {
            "Unknown".to_string()
        } else {
            self.title.clone()
        }
    }

    pub fn display_artist(&self) -> String {
        if self.artist.is_empty() {
            "Unknown Artist".to_string()
        } else {
            self.artist.clone()
        }
    }

    pub fn has_lyric(&self) -> bool {
        !self.lyric.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_display_name_fallbacks() {
        let chat = MediaUser::Chat(ChatUser {
            uid: "42".to_string(),
            username: String::new(),
            privilege: 0,
            admin: false,
        });
        assert_eq!(chat.display_name(), "user-42");
        assert!(chat.as_system().is_none());

        let system = MediaUser::System(SystemUser { name: String::new() });
        assert_eq!(system.display_name(), "system");

        let media = Media::new("Song", "Artist", "file:///a.mp3").with_user(MediaUser::Chat(ChatUser {
            uid: "7".to_string(),
            username: "viewer".to_string(),
            privilege: 1,
            admin: false,
        }));
        assert_eq!(media.user_name(), "viewer");
        assert_eq!(media.user.as_chat().map(|u| u.uid.as_str()), Some("7"));
    }

    #[test]
    fn test_media_serde_keeps_user_variant() {
        let media = Media::new("Song", "Artist", "http://x/y.mp3").with_user(MediaUser::Chat(ChatUser {
            uid: "1".to_string(),
            username: "a".to_string(),
            privilege: 0,
            admin: true,
        }));
        let json = serde_json::to_string(&media).unwrap();
        assert!(json.contains("\"kind\":\"chat\""));
        let back: Media = serde_json::from_str(&json).unwrap();
        assert_eq!(back, media);
    }

    #[test]
    fn test_picture_exists() {
        assert!(!Picture::default().exists());
        assert!(Picture::from_url("http://cover").exists());
        assert!(!Picture::from_url("").exists());
    }
}
