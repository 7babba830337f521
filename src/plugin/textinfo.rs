// Text info - renders now-playing templates to plain files for stream overlays
//
// Templates are any files under the template directory; `{{placeholder}}` tags
// are replaced and the result is written under the same relative path in the
// output directory. The cover goes to `cover.jpg` next to them.

use super::{Plugin, PluginContext};
use crate::config::TextInfoConfig;
use crate::event::{LyricUpdate, PlayStarted, PlaylistUpdate, PropertyUpdate, LYRIC_UPDATE, PLAY_STARTED};
use crate::model::{Media, Picture};
use crate::player::Property;
use parking_lot::Mutex;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const NAME: &str = "textinfo";
const COVER_FILE: &str = "cover.jpg";

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").expect("static regex"))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub index: usize,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub username: String,
}

impl MediaInfo {
    fn from_media(index: usize, media: &Media) -> Self {
        Self {
            index,
            title: media.title.clone(),
            artist: media.artist.clone(),
            album: media.album.clone(),
            username: media.user_name(),
        }
    }
}

/// Everything the templates can show
#[derive(Debug, Clone, Default)]
pub struct OutInfo {
    pub current: MediaInfo,
    pub current_time: u64,
    pub total_time: u64,
    pub lyric: String,
    pub playlist: Vec<MediaInfo>,
}

fn clock(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Replace every known placeholder; unknown ones are left as written
pub fn render(template: &str, info: &OutInfo) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures| {
            match &caps[1] {
                "title" => info.current.title.clone(),
                "artist" => info.current.artist.clone(),
                "album" => info.current.album.clone(),
                "user" | "username" => info.current.username.clone(),
                "current_time" => clock(info.current_time),
                "current_seconds" => info.current_time.to_string(),
                "total_time" => clock(info.total_time),
                "total_seconds" => info.total_time.to_string(),
                "lyric" => info.lyric.clone(),
                "playlist_count" => info.playlist.len().to_string(),
                "playlist" => info
                    .playlist
                    .iter()
                    .map(|m| format!("{}. {} - {} ({})", m.index + 1, m.title, m.artist, m.username))
                    .collect::<Vec<_>>()
                    .join("\n"),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[derive(Debug, Clone)]
struct Template {
    name: PathBuf, // relative to the template directory
    text: String,
}

fn load_templates(dir: &Path) -> Vec<Template> {
    let mut templates = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).into_iter() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Failed to read template entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = match entry.path().strip_prefix(dir) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        match std::fs::read_to_string(entry.path()) {
            Ok(text) => {
                info!("Loaded template {}", name.display());
                templates.push(Template { name, text });
            }
            Err(e) => warn!("Skipping template {}: {}", entry.path().display(), e),
        }
    }
    templates.sort_by(|a, b| a.name.cmp(&b.name));
    templates
}

enum Job {
    Render(OutInfo),
    Cover(Picture),
}

async fn run_writer(output_dir: PathBuf, templates: Vec<Template>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Render(info) => {
                for template in &templates {
                    let path = output_dir.join(&template.name);
                    if let Some(parent) = path.parent() {
                        if let Err(e) = tokio::fs::create_dir_all(parent).await {
                            warn!("Failed to create {}: {}", parent.display(), e);
                            continue;
                        }
                    }
                    if let Err(e) = tokio::fs::write(&path, render(&template.text, &info)).await {
                        warn!("Failed to write {}: {}", path.display(), e);
                    }
                }
            }
            Job::Cover(cover) => write_cover(&output_dir.join(COVER_FILE), cover).await,
        }
    }
    debug!("Text info writer stopped");
}

async fn write_cover(path: &Path, cover: Picture) {
    let bytes = match (cover.data, cover.url) {
        (Some(data), _) => Some(data),
        (None, Some(url)) if !url.is_empty() => fetch_cover(&url).await,
        _ => None,
    };

    let result = match bytes {
        Some(bytes) => tokio::fs::write(path, bytes).await,
        // no cover, drop the previous one
        None => match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        },
    };
    if let Err(e) = result {
        warn!("Failed to update cover {}: {}", path.display(), e);
    }
}

#[cfg(feature = "cover")]
async fn fetch_cover(url: &str) -> Option<Vec<u8>> {
    let response = match reqwest::get(url).await.and_then(|r| r.error_for_status()) {
        Ok(r) => r,
        Err(e) => {
            warn!("Failed to fetch cover {}: {}", url, e);
            return None;
        }
    };
    match response.bytes().await {
        Ok(bytes) => Some(bytes.to_vec()),
        Err(e) => {
            warn!("Failed to read cover {}: {}", url, e);
            None
        }
    }
}

#[cfg(not(feature = "cover"))]
async fn fetch_cover(url: &str) -> Option<Vec<u8>> {
    debug!("Remote cover {} ignored, built without `cover`", url);
    None
}

/// Shared between the bus handlers; the writer only ever sees copies
struct Renderer {
    info: Mutex<OutInfo>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl Renderer {
    fn update(&self, change: impl FnOnce(&mut OutInfo) -> bool) {
        let snapshot = {
            let mut info = self.info.lock();
            if !change(&mut info) {
                return;
            }
            info.clone()
        };
        self.send(Job::Render(snapshot));
    }

    fn send(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            debug!("Text info writer is gone");
        }
    }
}

pub struct TextInfoPlugin {
    config: TextInfoConfig,
    renderer: Option<Arc<Renderer>>,
}

impl TextInfoPlugin {
    pub fn new(config: TextInfoConfig) -> Self {
        Self {
            config,
            renderer: None,
        }
    }
}

impl Plugin for TextInfoPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn enable(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.config.template_dir)?;
        std::fs::create_dir_all(&self.config.output_dir)?;
        let templates = load_templates(&self.config.template_dir);
        info!(
            "Text info rendering {} templates into {}",
            templates.len(),
            self.config.output_dir.display()
        );

        let (jobs, inbox) = mpsc::unbounded_channel();
        ctx.runtime()?
            .spawn(run_writer(self.config.output_dir.clone(), templates, inbox));
        let renderer = Arc::new(Renderer {
            info: Mutex::new(OutInfo::default()),
            jobs,
        });

        let r = renderer.clone();
        ctx.register(&PLAY_STARTED, "current", move |e: &PlayStarted| {
            r.update(|info| {
                info.current = MediaInfo::from_media(0, &e.media);
                true
            });
            r.send(Job::Cover(e.media.cover.clone()));
            Ok(())
        })?;

        let r = renderer.clone();
        ctx.observe_property(Property::TimePosition, "timepos", move |e: &PropertyUpdate| {
            let seconds = e.value.map_or(0, |v| v.max(0.0) as u64);
            r.update(|info| {
                let changed = info.current_time != seconds;
                info.current_time = seconds;
                changed
            });
            Ok(())
        })?;

        let r = renderer.clone();
        ctx.observe_property(Property::Duration, "duration", move |e: &PropertyUpdate| {
            let seconds = e.value.map_or(0, |v| v.max(0.0) as u64);
            r.update(|info| {
                let changed = info.total_time != seconds;
                info.total_time = seconds;
                changed
            });
            Ok(())
        })?;

        let r = renderer.clone();
        let queue_topic = ctx.playlists().player().update_topic().clone();
        ctx.register(&queue_topic, "playlist", move |e: &PlaylistUpdate| {
            let queue = e
                .playlist
                .medias
                .iter()
                .enumerate()
                .map(|(i, m)| MediaInfo::from_media(i, m))
                .collect();
            r.update(|info| {
                info.playlist = queue;
                true
            });
            Ok(())
        })?;

        let r = renderer.clone();
        ctx.register(&LYRIC_UPDATE, "lyric", move |e: &LyricUpdate| {
            let line = e.line.as_ref().map(|l| l.text.clone()).unwrap_or_default();
            r.update(|info| {
                let changed = info.lyric != line;
                info.lyric = line;
                changed
            });
            Ok(())
        })?;

        self.renderer = Some(renderer);
        Ok(())
    }

    fn disable(&mut self) -> anyhow::Result<()> {
        // last sender goes with the handlers, which ends the writer task
        self.renderer = None;
        Ok(())
    }
}
