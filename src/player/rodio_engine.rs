// rodio-backed engine. The output stream isn't Send, so a dedicated thread owns it
// and the bridge talks to that thread over a channel.

use super::engine::{EngineSignal, PlaybackEngine};
use super::Property;
use crate::error::{CoreError, Result};
use parking_lot::Mutex;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

enum Command {
    Load {
        path: PathBuf,
        reply: std_mpsc::Sender<Result<()>>,
    },
    SetPaused(bool),
    Stop,
    SetVolume(f32),
    Shutdown,
}

pub struct RodioEngine {
    commands: Mutex<std_mpsc::Sender<Command>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RodioEngine {
    /// Open the default output device and start the engine thread. Signals
    /// (load, position, end of file) are sent on `signals`.
    pub fn spawn(
        volume: f64,
        poll_interval: Duration,
        signals: mpsc::UnboundedSender<EngineSignal>,
    ) -> anyhow::Result<Self> {
        let (commands, inbox) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel::<std::result::Result<(), String>>();

        let worker = std::thread::Builder::new()
            .name("jukebox-audio".to_string())
            .spawn(move || {
                let (_stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                let mut deck = Deck::new(handle, volume as f32, signals);
                deck.run(inbox, poll_interval);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Audio output ready");
                Ok(Self {
                    commands: Mutex::new(commands),
                    worker: Mutex::new(Some(worker)),
                })
            }
            Ok(Err(e)) => Err(anyhow::anyhow!("Failed to open audio output: {}", e)),
            Err(_) => Err(anyhow::anyhow!("Audio thread exited during startup")),
        }
    }

    fn send(&self, command: Command) {
        if self.commands.lock().send(command).is_err() {
            warn!("Audio thread is gone, dropping command");
        }
    }
}

impl PlaybackEngine for RodioEngine {
    fn load(&self, url: &str, _headers: &HashMap<String, String>) -> Result<()> {
        let path = local_path(url)
            .ok_or_else(|| CoreError::PlaybackLoadFailure(format!("remote streams are not supported: {}", url)))?;

        let (reply, answer) = std_mpsc::channel();
        self.send(Command::Load { path, reply });
        answer
            .recv()
            .map_err(|_| CoreError::PlaybackLoadFailure("audio thread is gone".to_string()))?
    }

    fn set_paused(&self, paused: bool) {
        self.send(Command::SetPaused(paused));
    }

    fn stop(&self) {
        self.send(Command::Stop);
    }

    fn set_volume(&self, volume: f64) {
        self.send(Command::SetVolume(volume as f32));
    }

    fn supports(&self, _property: Property) -> bool {
        true
    }
}

impl Drop for RodioEngine {
    fn drop(&mut self) {
        let _ = self.commands.lock().send(Command::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("Audio thread panicked");
            }
        }
    }
}

/// Accepts plain paths and `file://` urls
fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if url.is_empty() || url.contains("://") {
        return None;
    }
    Some(PathBuf::from(url))
}

/// Elapsed playback time that survives pauses
#[derive(Default)]
struct Clock {
    played: Duration,
    resumed_at: Option<Instant>,
}

impl Clock {
    fn start(&mut self) {
        self.played = Duration::ZERO;
        self.resumed_at = Some(Instant::now());
    }

    fn pause(&mut self) {
        if let Some(at) = self.resumed_at.take() {
            self.played += at.elapsed();
        }
    }

    fn resume(&mut self) {
        if self.resumed_at.is_none() {
            self.resumed_at = Some(Instant::now());
        }
    }

    fn elapsed(&self) -> Duration {
        self.played + self.resumed_at.map_or(Duration::ZERO, |at| at.elapsed())
    }
}

/// Everything that lives on the audio thread
struct Deck {
    handle: OutputStreamHandle,
    sink: Option<Sink>,
    volume: f32,
    clock: Clock,
    paused: bool,
    signals: mpsc::UnboundedSender<EngineSignal>,
}

impl Deck {
    fn new(handle: OutputStreamHandle, volume: f32, signals: mpsc::UnboundedSender<EngineSignal>) -> Self {
        Self {
            handle,
            sink: None,
            volume,
            clock: Clock::default(),
            paused: false,
            signals,
        }
    }

    fn run(&mut self, inbox: std_mpsc::Receiver<Command>, poll_interval: Duration) {
        loop {
            match inbox.recv_timeout(poll_interval) {
                Ok(Command::Load { path, reply }) => {
                    let _ = reply.send(self.load(path));
                }
                Ok(Command::SetPaused(paused)) => self.set_paused(paused),
                Ok(Command::Stop) => self.stop(),
                Ok(Command::SetVolume(volume)) => {
                    self.volume = volume;
                    if let Some(sink) = &self.sink {
                        sink.set_volume(volume);
                    }
                }
                Ok(Command::Shutdown) | Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
                Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            }
            self.poll();
        }
        self.stop();
        debug!("Audio thread stopped");
    }

    fn load(&mut self, path: PathBuf) -> Result<()> {
        self.stop();

        let file = File::open(&path)
            .map_err(|e| CoreError::PlaybackLoadFailure(format!("failed to open {}: {}", path.display(), e)))?;
        let source = Decoder::new(BufReader::new(file)).map_err(|e| {
            CoreError::PlaybackLoadFailure(format!("unsupported or corrupted audio {}: {}", path.display(), e))
        })?;
        let duration = source.total_duration();

        let sink = Sink::try_new(&self.handle)
            .map_err(|e| CoreError::PlaybackLoadFailure(format!("no audio sink: {}", e)))?;
        sink.set_volume(self.volume);
        sink.append(source);

        self.sink = Some(sink);
        self.paused = false;
        self.clock.start();
        debug!("Loaded {}", path.display());

        self.signal(EngineSignal::Loaded);
        self.signal(EngineSignal::Property {
            property: Property::Duration,
            value: duration.map(|d| d.as_secs_f64()),
        });
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) {
        let Some(sink) = &self.sink else {
            return;
        };
        if paused {
            sink.pause();
            self.clock.pause();
        } else {
            sink.play();
            self.clock.resume();
        }
        self.paused = paused;
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.clock = Clock::default();
        self.paused = false;
    }

    fn poll(&mut self) {
        let Some(sink) = &self.sink else {
            return;
        };
        if sink.empty() {
            self.sink = None;
            self.clock = Clock::default();
            self.signal(EngineSignal::EndOfFile);
            return;
        }
        if !self.paused {
            self.signal(EngineSignal::Property {
                property: Property::TimePosition,
                value: Some(self.clock.elapsed().as_secs_f64()),
            });
        }
    }

    fn signal(&self, signal: EngineSignal) {
        // receiver gone means the app is shutting down
        let _ = self.signals.send(signal);
    }
}
