// Vote skip - enough distinct viewers sending the keyword skips the current media

use super::{Plugin, PluginContext};
use crate::config::SkipConfig;
use crate::event::{ChatMessage, EventBus, NextCmd, PlayStarted, CHAT_MESSAGE, NEXT_CMD, PLAY_STARTED};
use crate::player::PlayerBridge;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

pub const NAME: &str = "skip";

struct Votes {
    keyword: String,
    threshold: usize,
    voters: Mutex<HashSet<String>>,
    bus: Arc<EventBus>,
    bridge: Arc<PlayerBridge>,
}

impl Votes {
    fn on_message(&self, message: &ChatMessage) {
        if message.text.trim() != self.keyword || self.bridge.current().is_none() {
            return;
        }
        let reached = {
            let mut voters = self.voters.lock();
            if !voters.insert(message.user.uid.clone()) {
                return;
            }
            info!("Skip vote {}/{} from {}", voters.len(), self.threshold, message.user.username);
            let reached = voters.len() >= self.threshold;
            if reached {
                voters.clear();
            }
            reached
        };
        if reached {
            info!("Skip threshold reached");
            self.bus.dispatch(&NEXT_CMD, NextCmd);
        }
    }

    fn reset(&self) {
        self.voters.lock().clear();
    }
}

pub struct SkipPlugin {
    config: SkipConfig,
}

impl SkipPlugin {
    pub fn new(config: SkipConfig) -> Self {
        Self { config }
    }
}

impl Plugin for SkipPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn enable(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        if self.config.keyword.trim().is_empty() {
            anyhow::bail!("skip keyword is empty");
        }
        let votes = Arc::new(Votes {
            keyword: self.config.keyword.trim().to_string(),
            threshold: self.config.threshold.max(1),
            voters: Mutex::new(HashSet::new()),
            bus: ctx.bus().clone(),
            bridge: ctx.bridge().clone(),
        });

        let v = votes.clone();
        ctx.register(&CHAT_MESSAGE, "chat", move |message: &ChatMessage| {
            v.on_message(message);
            Ok(())
        })?;

        // votes only count for the media they were cast against
        ctx.register(&PLAY_STARTED, "reset", move |_: &PlayStarted| {
            votes.reset();
            Ok(())
        })?;
        Ok(())
    }
}
