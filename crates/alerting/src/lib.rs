//! Alerting System
//!
//! Provides alert cooldowns/deduplication and audio alarm playback.

mod audio;
mod cooldown;

pub use audio::{AlarmConfig, AlarmPlayer, AudioCue, AudioSink, RodioSink, SilentSink};
pub use cooldown::{AlertState, CooldownConfig, CooldownManager};

use thiserror::Error;

/// Alerting error types
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Audio output unavailable: {0}")]
    OutputUnavailable(String),

    #[error("Audio file not found: {0}")]
    NotFound(String),

    #[error("Audio decoding failed: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(String),
}
