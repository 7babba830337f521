// Chat requests - "<prefix> <keyword>" in the live chat queues the best match
// into the player, attributed to whoever asked.

use super::{Plugin, PluginContext};
use crate::config::RequestConfig;
use crate::event::{
    ChatMessage, EventBus, PlaylistInsertCmd, SearchCmd, SearchResultUpdate, CHAT_MESSAGE, PLAYLIST_INSERT_CMD,
    SEARCH_CMD, SEARCH_RESULT_UPDATE,
};
use crate::model::{ChatUser, Media, MediaUser, PlaylistId};
use crate::playlist::{PlaylistHandle, Playlists};
use futures::future::{BoxFuture, FutureExt};
use fuzzy_matcher::{clangd::ClangdMatcher, FuzzyMatcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

pub const NAME: &str = "request";

/// Somewhere songs can be looked up. Concrete web providers live outside the core.
pub trait MediaProvider: Send + Sync {
    fn name(&self) -> &str;

    fn search<'a>(&'a self, keyword: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<Media>>>;
}

/// Searches what is already known locally: the system playlist and the saved ones
pub struct LibraryProvider {
    playlists: Arc<Playlists>,
}

impl LibraryProvider {
    pub fn new(playlists: Arc<Playlists>) -> Self {
        Self { playlists }
    }
}

impl MediaProvider for LibraryProvider {
    fn name(&self) -> &str {
        "library"
    }

    fn search<'a>(&'a self, keyword: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<Media>>> {
        async move {
            let mut medias: Vec<Media> = self.playlists.system().snapshot().medias.clone();
            for id in self.playlists.saved_ids() {
                if let Ok(handle) = self.playlists.get(&id) {
                    medias.extend(handle.snapshot().medias.iter().cloned());
                }
            }
            Ok(rank(keyword, medias))
        }
        .boxed()
    }
}

/// Matching medias, best first. Non-matching ones are dropped.
pub fn rank(keyword: &str, medias: Vec<Media>) -> Vec<Media> {
    let matcher = ClangdMatcher::default();
    let mut scored: Vec<(i64, Media)> = medias
        .into_iter()
        .filter_map(|media| {
            let full = format!("{} {}", media.title, media.artist);
            // fuzzy_match takes (choice, pattern)
            let score = [matcher.fuzzy_match(&media.title, keyword), matcher.fuzzy_match(&full, keyword)]
                .into_iter()
                .flatten()
                .max()?;
            Some((score, media))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, media)| media).collect()
}

/// `None` unless the message is a request with something to look for
fn request_keyword<'a>(prefix: &str, text: &'a str) -> Option<&'a str> {
    let keyword = text.trim().strip_prefix(prefix)?.trim();
    (!keyword.is_empty()).then_some(keyword)
}

/// Per-user bookkeeping: requests still being searched, and when each user last
/// got something queued
#[derive(Default)]
struct Ledger {
    pending: HashMap<String, usize>,
    last_queued: HashMap<String, Instant>,
}

struct Requests {
    config: RequestConfig,
    provider: Arc<dyn MediaProvider>,
    bus: Arc<EventBus>,
    queue: Arc<PlaylistHandle>,
    runtime: Handle,
    ledger: Mutex<Ledger>,
}

impl Requests {
    fn on_message(self: &Arc<Self>, message: &ChatMessage) {
        let Some(keyword) = request_keyword(&self.config.prefix, &message.text) else {
            return;
        };
        let user = &message.user;
        if !user.admin && !self.admit(user) {
            return;
        }

        info!("{} requested '{}'", user.username, keyword);
        let this = self.clone();
        let user = user.clone();
        let keyword = keyword.to_string();
        self.runtime.spawn(async move { this.fulfil(user, keyword).await });
    }

    /// Queue limit and cooldown. Requests still in flight count against both;
    /// an admitted request is pending until `settle`.
    fn admit(&self, user: &ChatUser) -> bool {
        let queued = self
            .queue
            .snapshot()
            .medias
            .iter()
            .filter(|m| m.user.as_chat().map_or(false, |u| u.uid == user.uid))
            .count();

        let mut ledger = self.ledger.lock();
        let pending = ledger.pending.get(&user.uid).copied().unwrap_or(0);
        if queued + pending >= self.config.max_per_user {
            info!(
                "Ignoring request from {}: {} queued, {} pending",
                user.username, queued, pending
            );
            return false;
        }

        let cooldown = Duration::from_secs(self.config.cooldown_secs);
        if !cooldown.is_zero() {
            let recent = ledger
                .last_queued
                .get(&user.uid)
                .map_or(false, |at| at.elapsed() < cooldown);
            if pending > 0 || recent {
                info!("Ignoring request from {}: cooling down", user.username);
                return false;
            }
        }
        *ledger.pending.entry(user.uid.clone()).or_insert(0) += 1;
        true
    }

    /// Close out a pending request; only a queued one starts the cooldown
    fn settle(&self, uid: &str, queued: bool) {
        let mut ledger = self.ledger.lock();
        if let Some(pending) = ledger.pending.get_mut(uid) {
            *pending = pending.saturating_sub(1);
            if *pending == 0 {
                ledger.pending.remove(uid);
            }
        }
        if queued {
            ledger.last_queued.insert(uid.to_string(), Instant::now());
        }
    }

    async fn fulfil(&self, user: ChatUser, keyword: String) {
        let uid = user.uid.clone();
        let queued = self.queue_best(user, &keyword).await;
        self.settle(&uid, queued);
    }

    async fn queue_best(&self, user: ChatUser, keyword: &str) -> bool {
        let results = match self.provider.search(keyword).await {
            Ok(results) => results,
            Err(e) => {
                warn!("Search for '{}' on {} failed: {:#}", keyword, self.provider.name(), e);
                return false;
            }
        };
        let Some(media) = pick(keyword, results) else {
            info!("Nothing found for '{}'", keyword);
            return false;
        };

        debug!("Queueing '{}' for {}", media.title, user.username);
        let title = media.title.clone();
        let cmd = PlaylistInsertCmd {
            playlist: PlaylistId::player(),
            media: media.with_user(MediaUser::Chat(user)),
            position: -1,
        };
        // the insert can start playback, which waits on the engine
        let bus = self.bus.clone();
        match self
            .runtime
            .spawn_blocking(move || bus.dispatch(&PLAYLIST_INSERT_CMD, cmd))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("Queueing '{}' failed: {}", title, e);
                false
            }
        }
    }

    async fn answer_search(&self, cmd: SearchCmd) {
        if cmd.provider.as_deref().map_or(false, |p| p != self.provider.name()) {
            return;
        }
        match self.provider.search(&cmd.keyword).await {
            Ok(medias) => self.bus.dispatch(
                &SEARCH_RESULT_UPDATE,
                SearchResultUpdate {
                    keyword: cmd.keyword,
                    provider: self.provider.name().to_string(),
                    medias,
                },
            ),
            Err(e) => warn!("Search for '{}' failed: {:#}", cmd.keyword, e),
        }
    }
}

/// Best fuzzy match, else whatever the provider ranked first
fn pick(keyword: &str, results: Vec<Media>) -> Option<Media> {
    let fallback = results.first().cloned();
    rank(keyword, results).into_iter().next().or(fallback)
}

pub struct RequestPlugin {
    config: RequestConfig,
    provider: Arc<dyn MediaProvider>,
    state: Option<Arc<Requests>>,
}

impl RequestPlugin {
    pub fn new(config: RequestConfig, provider: Arc<dyn MediaProvider>) -> Self {
        Self {
            config,
            provider,
            state: None,
        }
    }
}

impl Plugin for RequestPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn enable(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        let state = Arc::new(Requests {
            config: self.config.clone(),
            provider: self.provider.clone(),
            bus: ctx.bus().clone(),
            queue: ctx.playlists().player().clone(),
            runtime: ctx.runtime()?.clone(),
            ledger: Mutex::new(Ledger::default()),
        });

        let s = state.clone();
        ctx.register(&CHAT_MESSAGE, "chat", move |message: &ChatMessage| {
            s.on_message(message);
            Ok(())
        })?;

        let s = state.clone();
        ctx.register(&SEARCH_CMD, "search", move |cmd: &SearchCmd| {
            let this = s.clone();
            let cmd = cmd.clone();
            s.runtime.spawn(async move { this.answer_search(cmd).await });
            Ok(())
        })?;

        self.state = Some(state);
        Ok(())
    }

    fn disable(&mut self) -> anyhow::Result<()> {
        self.state = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaylistConfig;
    use crate::player::{NullEngine, PlayerBridge};
    use crate::plugin::PluginManager;

    struct StaticProvider(Vec<Media>);

    impl MediaProvider for StaticProvider {
        fn name(&self) -> &str {
            "static"
        }

        fn search<'a>(&'a self, keyword: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<Media>>> {
            async move { Ok(rank(keyword, self.0.clone())) }.boxed()
        }
    }

    fn catalogue() -> Vec<Media> {
        vec![
            Media::new("Sad Machine", "Porter Robinson", "sad.mp3"),
            Media::new("Shelter", "Porter Robinson", "shelter.mp3"),
        ]
    }

    fn chat(uid: &str, text: &str) -> ChatMessage {
        ChatMessage::new(
            ChatUser {
                uid: uid.to_string(),
                username: format!("viewer{}", uid),
                privilege: 0,
                admin: false,
            },
            text,
        )
    }

    fn setup(config: RequestConfig) -> (Arc<EventBus>, Arc<Playlists>, PluginManager) {
        let bus = Arc::new(EventBus::new());
        let playlists = Playlists::new(bus.clone(), &PlaylistConfig::default());
        playlists.attach().unwrap();
        let bridge = PlayerBridge::new(bus.clone(), Box::new(NullEngine));
        let manager = PluginManager::new(bus.clone(), playlists.clone(), bridge);
        let provider = Arc::new(StaticProvider(catalogue()));
        manager.load(Box::new(RequestPlugin::new(config, provider))).unwrap();
        manager.enable(NAME).unwrap();
        (bus, playlists, manager)
    }

    fn config(max_per_user: usize, cooldown_secs: u64) -> RequestConfig {
        RequestConfig {
            enabled: true,
            prefix: "!sr".to_string(),
            max_per_user,
            cooldown_secs,
        }
    }

    async fn wait_for_queue(playlists: &Playlists, len: usize) -> bool {
        for _ in 0..100 {
            if playlists.player().len() == len {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_request_keyword() {
        assert_eq!(request_keyword("!sr", "  !sr  shelter "), Some("shelter"));
        assert_eq!(request_keyword("!sr", "!sr   "), None);
        assert_eq!(request_keyword("!sr", "hello !sr shelter"), None);
    }

    #[test]
    fn test_rank_and_pick() {
        let ranked = rank("shelter", catalogue());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].title, "Shelter");
        // nothing matches, provider order wins
        assert_eq!(pick("zzz", catalogue()).map(|m| m.title), Some("Sad Machine".to_string()));
        assert!(pick("zzz", Vec::new()).is_none());
    }

    #[tokio::test]
    async fn test_chat_request_is_queued_for_the_user() {
        let (bus, playlists, _manager) = setup(config(2, 0));
        bus.dispatch(&CHAT_MESSAGE, chat("42", "!sr shelter"));
        bus.dispatch(&CHAT_MESSAGE, chat("42", "just chatting"));

        assert!(wait_for_queue(&playlists, 1).await);
        let queued = playlists.player().snapshot();
        assert_eq!(queued.medias[0].title, "Shelter");
        assert_eq!(queued.medias[0].user.as_chat().map(|u| u.uid.as_str()), Some("42"));
    }

    #[tokio::test]
    async fn test_cooldown_applies_per_user() {
        let (bus, playlists, _manager) = setup(config(5, 3600));
        bus.dispatch(&CHAT_MESSAGE, chat("1", "!sr shelter"));
        bus.dispatch(&CHAT_MESSAGE, chat("1", "!sr sad machine"));
        bus.dispatch(&CHAT_MESSAGE, chat("2", "!sr sad machine"));

        assert!(wait_for_queue(&playlists, 2).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(playlists.player().len(), 2);
    }

    #[tokio::test]
    async fn test_queue_limit() {
        let (bus, playlists, _manager) = setup(config(1, 0));
        bus.dispatch(&CHAT_MESSAGE, chat("1", "!sr shelter"));
        assert!(wait_for_queue(&playlists, 1).await);

        bus.dispatch(&CHAT_MESSAGE, chat("1", "!sr sad machine"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(playlists.player().len(), 1);
    }

    #[tokio::test]
    async fn test_requests_in_flight_count_against_the_limit() {
        let (bus, playlists, _manager) = setup(config(1, 0));
        // neither search has run yet when the second message arrives
        bus.dispatch(&CHAT_MESSAGE, chat("1", "!sr shelter"));
        bus.dispatch(&CHAT_MESSAGE, chat("1", "!sr sad machine"));

        assert!(wait_for_queue(&playlists, 1).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(playlists.player().len(), 1);
        assert_eq!(playlists.player().snapshot().medias[0].title, "Shelter");
    }

    #[tokio::test]
    async fn test_empty_search_does_not_start_cooldown() {
        let (bus, playlists, _manager) = setup(config(5, 3600));
        bus.dispatch(&CHAT_MESSAGE, chat("1", "!sr zzz"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(playlists.player().is_empty());

        bus.dispatch(&CHAT_MESSAGE, chat("1", "!sr shelter"));
        assert!(wait_for_queue(&playlists, 1).await);
    }

    #[tokio::test]
    async fn test_search_command_answers() {
        let (bus, _playlists, _manager) = setup(config(1, 0));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        bus.register(&SEARCH_RESULT_UPDATE, "test.results", move |u: &SearchResultUpdate| {
            let _ = tx.send(u.medias.len());
            Ok(())
        })
        .unwrap();

        bus.dispatch(
            &SEARCH_CMD,
            SearchCmd {
                keyword: "porter".to_string(),
                provider: None,
            },
        );
        let count = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(count, Some(2));
    }

    #[tokio::test]
    async fn test_library_provider_searches_system_and_saved() {
        let bus = Arc::new(EventBus::new());
        let playlists = Playlists::new(bus.clone(), &PlaylistConfig::default());
        playlists.system().insert(Media::new("Shelter", "Porter Robinson", ""), -1).unwrap();
        let id = playlists.create_saved("Mix");
        playlists
            .get(&id)
            .unwrap()
            .insert(Media::new("Language", "Porter Robinson", ""), -1)
            .unwrap();

        let provider = LibraryProvider::new(playlists);
        let found = provider.search("language").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(provider.search("porter").await.unwrap().len(), 2);
    }
}
