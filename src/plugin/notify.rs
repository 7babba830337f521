// Desktop notification when a media fails to play

use super::{Plugin, PluginContext};
use crate::event::{PlaybackFailed, PLAYBACK_FAILED};
use notify_rust::Notification;
use tracing::warn;

pub const NAME: &str = "notify";

#[derive(Default)]
pub struct NotifyPlugin;

impl NotifyPlugin {
    pub fn new() -> Self {
        Self
    }
}

fn message(failed: &PlaybackFailed) -> (String, String) {
    (
        format!("Couldn't play {}", failed.media.display_title()),
        format!("Requested by {}: {}", failed.media.user_name(), failed.reason),
    )
}

impl Plugin for NotifyPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn enable(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        let runtime = ctx.runtime()?.clone();
        ctx.register(&PLAYBACK_FAILED, "failed", move |failed: &PlaybackFailed| {
            let (summary, body) = message(failed);
            // talking to the notification daemon can block
            runtime.spawn_blocking(move || {
                if let Err(e) = Notification::new().appname("jukebox").summary(&summary).body(&body).show() {
                    warn!("Failed to show notification: {}", e);
                }
            });
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Media;

    #[test]
    fn test_message_names_media_and_reason() {
        let failed = PlaybackFailed {
            media: Media::new("Shelter", "Porter Robinson", "x"),
            reason: "file not found".to_string(),
        };
        let (summary, body) = message(&failed);
        assert!(summary.contains("Shelter"));
        assert!(body.contains("file not found"));
        assert!(body.contains("system"));
    }
}
