//! Audio alarm playback
//!
//! Alarm keys resolve to files in the audio directory. Playback goes
//! through an [`AudioSink`]; the rodio sink is used when an output device
//! exists, otherwise alarms are logged and dropped.

use crate::AlertError;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const FALLBACK_AUDIO: &str = "alarma.mp3";
pub const RECOMMENDATION_AUDIO: &str = "recomendacion_pausas_activas.mp3";

/// Keys whose alarm is followed by the active-pause recommendation
const WITH_RECOMMENDATION: [&str; 2] = ["fatigue", "yawn"];

/// Something to do with the alarm output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCue {
    /// Stop what is playing and play this key
    Play(String),
    /// Play this key after whatever is queued
    Queue(String),
    Stop,
}

impl AudioCue {
    pub fn play(key: &str) -> Self {
        Self::Play(key.to_string())
    }

    pub fn queue(key: &str) -> Self {
        Self::Queue(key.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    pub audio_dir: PathBuf,
    pub volume: f32,
    pub enabled: bool,
    /// Alarm key to file name
    pub categories: HashMap<String, String>,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        let categories = [
            ("greeting", "alarma.mp3"),
            ("fatigue", "alarma.mp3"),
            ("cell phone", "alarma.mp3"),
            ("cigarette", "alarma.mp3"),
            ("break", "alarma.mp3"),
            ("unauthorized", "alarma.mp3"),
            ("yawn", "alarma.mp3"),
            ("nodding", "alarma.mp3"),
            ("recomendacion", RECOMMENDATION_AUDIO),
            ("telefono", "telefono.mp3"),
            ("cigarro", "cigarro.mp3"),
            ("comportamiento10s", "comportamiento10s.mp3"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            audio_dir: PathBuf::from("assets/audio"),
            volume: 1.0,
            enabled: true,
            categories,
        }
    }
}

/// Audio output backend
pub trait AudioSink {
    /// Play a file, either replacing current playback or queued behind it
    fn play_file(&mut self, path: &Path, queue: bool) -> Result<(), AlertError>;
    fn stop(&mut self);
    fn set_volume(&mut self, volume: f32);
    fn is_playing(&self) -> bool;
}

/// rodio output on the default device
pub struct RodioSink {
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sink: Sink,
    volume: f32,
}

impl RodioSink {
    pub fn open() -> Result<Self, AlertError> {
        let (stream, handle) =
            OutputStream::try_default().map_err(|e| AlertError::OutputUnavailable(e.to_string()))?;
        let sink = Sink::try_new(&handle).map_err(|e| AlertError::OutputUnavailable(e.to_string()))?;
        Ok(Self {
            _stream: stream,
            handle,
            sink,
            volume: 1.0,
        })
    }
}

impl AudioSink for RodioSink {
    fn play_file(&mut self, path: &Path, queue: bool) -> Result<(), AlertError> {
        if !queue {
            self.stop();
        }
        let file = File::open(path).map_err(|e| AlertError::Io(e.to_string()))?;
        let source = Decoder::new(BufReader::new(file)).map_err(|e| AlertError::Decode(e.to_string()))?;
        self.sink.append(source);
        self.sink.play();
        Ok(())
    }

    fn stop(&mut self) {
        self.sink.stop();
        // a stopped sink is replaced so later appends play
        match Sink::try_new(&self.handle) {
            Ok(sink) => {
                sink.set_volume(self.volume);
                self.sink = sink;
            }
            Err(e) => error!("Failed to recreate audio sink: {}", e),
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        self.sink.set_volume(volume);
    }

    fn is_playing(&self) -> bool {
        !self.sink.empty() && !self.sink.is_paused()
    }
}

/// Sink for hosts without an audio device
#[derive(Debug, Default)]
pub struct SilentSink;

impl AudioSink for SilentSink {
    fn play_file(&mut self, path: &Path, _queue: bool) -> Result<(), AlertError> {
        debug!("Silent audio: {}", path.display());
        Ok(())
    }

    fn stop(&mut self) {}

    fn set_volume(&mut self, _volume: f32) {}

    fn is_playing(&self) -> bool {
        false
    }
}

pub struct AlarmPlayer {
    config: AlarmConfig,
    sink: Box<dyn AudioSink>,
}

impl AlarmPlayer {
    /// Player on the default output device, silent when there is none
    pub fn new(config: AlarmConfig) -> Self {
        let sink: Box<dyn AudioSink> = match RodioSink::open() {
            Ok(s) => {
                info!("Audio output initialised");
                Box::new(s)
            }
            Err(e) => {
                warn!("{}; alarms will be silent", e);
                Box::new(SilentSink)
            }
        };
        Self::with_sink(config, sink)
    }

    pub fn with_sink(config: AlarmConfig, mut sink: Box<dyn AudioSink>) -> Self {
        sink.set_volume(config.volume.clamp(0.0, 1.0));
        Self { config, sink }
    }

    /// File for an alarm key, or `None` when neither it nor the fallback exists
    pub fn resolve(&self, key: &str) -> Option<PathBuf> {
        let dir = &self.config.audio_dir;
        let candidate = if Path::new(key).is_absolute() && Path::new(key).exists() {
            PathBuf::from(key)
        } else if key.ends_with(".mp3") {
            dir.join(key)
        } else if let Some(file) = self.config.categories.get(key) {
            dir.join(file)
        } else {
            dir.join(format!("{}.mp3", key))
        };

        if candidate.is_file() {
            return Some(candidate);
        }
        warn!("Audio file not found: {}", candidate.display());
        let fallback = dir.join(FALLBACK_AUDIO);
        fallback.is_file().then_some(fallback)
    }

    /// Stop current audio and play `key`
    pub fn play(&mut self, key: &str) -> Result<(), AlertError> {
        self.start(key, false)
    }

    /// Play `key` once the current audio finishes
    pub fn enqueue(&mut self, key: &str) -> Result<(), AlertError> {
        self.start(key, true)
    }

    fn start(&mut self, key: &str, queue: bool) -> Result<(), AlertError> {
        if !self.config.enabled {
            debug!("Audio disabled, skipping {}", key);
            return Ok(());
        }
        let path = self
            .resolve(key)
            .ok_or_else(|| AlertError::NotFound(key.to_string()))?;
        info!("Playing alarm {} ({})", key, path.display());
        self.sink.play_file(&path, queue)?;

        if WITH_RECOMMENDATION.contains(&key) {
            let recommendation = self.config.audio_dir.join(RECOMMENDATION_AUDIO);
            if recommendation.is_file() {
                self.sink.play_file(&recommendation, true)?;
            }
        }
        Ok(())
    }

    /// Apply a cue, logging instead of failing
    pub fn dispatch(&mut self, cue: &AudioCue) {
        let result = match cue {
            AudioCue::Play(key) => self.play(key),
            AudioCue::Queue(key) => self.enqueue(key),
            AudioCue::Stop => {
                self.stop();
                Ok(())
            }
        };
        if let Err(e) = result {
            error!("Alarm playback failed: {}", e);
        }
    }

    pub fn stop(&mut self) {
        self.sink.stop();
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.config.volume = volume.clamp(0.0, 1.0);
        self.sink.set_volume(self.config.volume);
    }

    pub fn volume(&self) -> f32 {
        self.config.volume
    }

    pub fn is_playing(&self) -> bool {
        self.sink.is_playing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct RecordingSink {
        played: Arc<Mutex<Vec<(String, bool)>>>,
        volume: Arc<Mutex<f32>>,
    }

    impl AudioSink for RecordingSink {
        fn play_file(&mut self, path: &Path, queue: bool) -> Result<(), AlertError> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            self.played.lock().unwrap().push((name, queue));
            Ok(())
        }

        fn stop(&mut self) {
            self.played.lock().unwrap().push(("<stop>".to_string(), false));
        }

        fn set_volume(&mut self, volume: f32) {
            *self.volume.lock().unwrap() = volume;
        }

        fn is_playing(&self) -> bool {
            !self.played.lock().unwrap().is_empty()
        }
    }

    fn audio_dir(files: &[&str]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("alerting-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        for f in files {
            fs::write(dir.join(f), b"mp3").unwrap();
        }
        dir
    }

    fn player(files: &[&str]) -> (AlarmPlayer, RecordingSink) {
        let sink = RecordingSink::default();
        let config = AlarmConfig {
            audio_dir: audio_dir(files),
            ..Default::default()
        };
        (AlarmPlayer::with_sink(config, Box::new(sink.clone())), sink)
    }

    fn played(sink: &RecordingSink) -> Vec<(String, bool)> {
        sink.played.lock().unwrap().clone()
    }

    #[test]
    fn test_resolution_order() {
        let (p, _) = player(&["alarma.mp3", "telefono.mp3", "bostezo1.mp3"]);
        let dir = p.config.audio_dir.clone();

        assert_eq!(p.resolve("telefono"), Some(dir.join("telefono.mp3")));
        assert_eq!(p.resolve("bostezo1"), Some(dir.join("bostezo1.mp3")));
        assert_eq!(p.resolve("bostezo1.mp3"), Some(dir.join("bostezo1.mp3")));
        assert_eq!(p.resolve("missing"), Some(dir.join("alarma.mp3")));

        let abs = dir.join("telefono.mp3");
        assert_eq!(p.resolve(abs.to_str().unwrap()), Some(abs.clone()));
    }

    #[test]
    fn test_missing_without_fallback() {
        let (mut p, sink) = player(&[]);
        assert!(p.resolve("bostezo2").is_none());
        assert!(matches!(p.play("bostezo2"), Err(AlertError::NotFound(_))));
        assert!(played(&sink).is_empty());
    }

    #[test]
    fn test_fatigue_appends_recommendation() {
        let (mut p, sink) = player(&["alarma.mp3", RECOMMENDATION_AUDIO]);
        p.play("fatigue").unwrap();
        assert_eq!(
            played(&sink),
            vec![
                ("alarma.mp3".to_string(), false),
                (RECOMMENDATION_AUDIO.to_string(), true)
            ]
        );
    }

    #[test]
    fn test_dispatch_cues() {
        let (mut p, sink) = player(&["alarma.mp3", "fatigue_1.mp3"]);
        p.dispatch(&AudioCue::play("alarma"));
        p.dispatch(&AudioCue::queue("fatigue_1"));
        p.dispatch(&AudioCue::Stop);
        assert_eq!(
            played(&sink),
            vec![
                ("alarma.mp3".to_string(), false),
                ("fatigue_1.mp3".to_string(), true),
                ("<stop>".to_string(), false)
            ]
        );
    }

    #[test]
    fn test_volume_is_clamped() {
        let (mut p, sink) = player(&[]);
        p.set_volume(1.7);
        assert_eq!(p.volume(), 1.0);
        p.set_volume(-0.3);
        assert_eq!(p.volume(), 0.0);
        assert_eq!(*sink.volume.lock().unwrap(), 0.0);
    }

    #[test]
    fn test_disabled_player_is_silent() {
        let sink = RecordingSink::default();
        let config = AlarmConfig {
            audio_dir: audio_dir(&["alarma.mp3"]),
            enabled: false,
            ..Default::default()
        };
        let mut p = AlarmPlayer::with_sink(config, Box::new(sink.clone()));
        p.play("alarma").unwrap();
        assert!(played(&sink).is_empty());
        assert!(!p.is_playing());
    }
}
