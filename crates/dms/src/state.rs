//! Small pieces of per-detector state

use std::collections::VecDeque;
use tracing::info;

/// Day/night mode from mean frame luma
#[derive(Debug, Clone)]
pub struct Lighting {
    threshold: f64,
    enabled: bool,
    /// Mean luma of the last frame (0-255)
    pub level: f64,
    pub night: bool,
}

impl Lighting {
    pub fn new(threshold: f64, enabled: bool) -> Self {
        Self {
            threshold,
            enabled,
            level: 0.0,
            night: false,
        }
    }

    pub fn set_threshold(&mut self, threshold: f64, enabled: bool) {
        self.threshold = threshold;
        self.enabled = enabled;
    }

    pub fn update(&mut self, level: f64) {
        self.level = level;
        if !self.enabled {
            self.night = false;
            return;
        }
        let night = level < self.threshold;
        if night != self.night {
            info!(
                "Switching to {} mode (light level {:.1})",
                if night { "night" } else { "day" },
                level
            );
        }
        self.night = night;
    }
}

/// Moving average over the last `size` samples
#[derive(Debug, Clone)]
pub struct Smoother {
    values: VecDeque<f64>,
    size: usize,
}

impl Smoother {
    pub fn new(size: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(size),
            size: size.max(1),
        }
    }

    /// Add a sample and return the current mean
    pub fn push(&mut self, value: f64) -> f64 {
        if self.values.len() == self.size {
            self.values.pop_front();
        }
        self.values.push_back(value);
        self.mean()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Event timestamps inside a sliding time window
#[derive(Debug, Clone)]
pub struct EventWindow {
    times: VecDeque<f64>,
    window: f64,
}

impl EventWindow {
    pub fn new(window: f64) -> Self {
        Self {
            times: VecDeque::new(),
            window,
        }
    }

    pub fn set_window(&mut self, window: f64) {
        self.window = window;
    }

    pub fn window(&self) -> f64 {
        self.window
    }

    pub fn push(&mut self, t: f64) {
        self.times.push_back(t);
        self.prune(t);
    }

    /// Drop events older than the window
    pub fn prune(&mut self, now: f64) {
        while self.times.front().is_some_and(|&t| now - t > self.window) {
            self.times.pop_front();
        }
    }

    /// Keep only the most recent event
    pub fn keep_latest(&mut self) {
        while self.times.len() > 1 {
            self.times.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> Vec<f64> {
        self.times.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.times.clear();
    }
}
