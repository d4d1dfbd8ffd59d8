//! Frame scheduler
//!
//! Samples CPU, memory and temperature and decides, frame by frame, which
//! detectors run. Each resource over its limit raises the optimisation
//! level by one (capped at 2); at level 1 and 2 detectors only run on
//! frames matching their modulo rule.

use crate::config::{Profile, SchedulerConfig};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use sysinfo::System;
use tracing::{debug, info, warn};

pub const TEMPERATURE_LIMIT_C: f32 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Detector {
    FaceRecognition,
    Fatigue,
    Behavior,
    Yawn,
    Distraction,
    Analysis,
}

impl Detector {
    pub const ALL: [Detector; 6] = [
        Detector::FaceRecognition,
        Detector::Fatigue,
        Detector::Behavior,
        Detector::Yawn,
        Detector::Distraction,
        Detector::Analysis,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FaceRecognition => "face_recognition",
            Self::Fatigue => "fatigue",
            Self::Behavior => "behavior",
            Self::Yawn => "yawn",
            Self::Distraction => "distraction",
            Self::Analysis => "analysis",
        }
    }

    /// `(modulus, remainder)` a frame number must match at `level`
    fn rule(self, level: u8) -> (u64, u64) {
        match (level, self) {
            (0, _) => (1, 0),
            (1, Self::FaceRecognition) => (1, 0),
            (1, Self::Fatigue) => (2, 0),
            (1, Self::Behavior) => (3, 0),
            (1, Self::Yawn) => (2, 1),
            (1, Self::Distraction) => (4, 0),
            (1, Self::Analysis) => (5, 0),
            (_, Self::FaceRecognition) => (2, 0),
            (_, Self::Fatigue) => (4, 0),
            (_, Self::Behavior) => (6, 0),
            (_, Self::Yawn) => (5, 0),
            (_, Self::Distraction) => (8, 0),
            (_, Self::Analysis) => (10, 0),
        }
    }
}

/// One reading of the machine's load
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub temperature_c: f32,
}

pub trait ResourceSampler {
    fn sample(&mut self) -> ResourceSample;
}

/// Load read from the operating system
pub struct SystemSampler {
    system: System,
    thermal_zone: Option<PathBuf>,
}

impl SystemSampler {
    /// Temperature is only read on production boards
    pub fn new(profile: Profile, thermal_zone: PathBuf) -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self {
            system,
            thermal_zone: (profile == Profile::Production).then_some(thermal_zone),
        }
    }

    fn temperature(&self) -> f32 {
        let Some(zone) = &self.thermal_zone else {
            return 0.0;
        };
        match fs::read_to_string(zone) {
            Ok(text) => text.trim().parse::<f32>().map(|milli| milli / 1000.0).unwrap_or(0.0),
            Err(e) => {
                debug!("Thermal zone {} unreadable: {}", zone.display(), e);
                0.0
            }
        }
    }
}

impl ResourceSampler for SystemSampler {
    fn sample(&mut self) -> ResourceSample {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        let total = self.system.total_memory();
        let memory_percent = if total > 0 {
            self.system.used_memory() as f32 / total as f32 * 100.0
        } else {
            0.0
        };
        ResourceSample {
            cpu_percent: self.system.global_cpu_info().cpu_usage(),
            memory_percent,
            temperature_c: self.temperature(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub detections_skipped: u64,
    /// Times the level went up
    pub optimizations_applied: u64,
    pub last_sample: Option<ResourceSample>,
}

pub struct FrameScheduler {
    enabled: bool,
    cpu_limit: f32,
    memory_limit: f32,
    sample_interval: f64,
    sampler: Box<dyn ResourceSampler>,
    last_sample_at: Option<f64>,
    level: u8,
    stats: SchedulerStats,
}

impl FrameScheduler {
    pub fn new(config: &SchedulerConfig, profile: Profile, sampler: Box<dyn ResourceSampler>) -> Self {
        let (cpu_limit, memory_limit) = match profile {
            Profile::Production => (80.0, 75.0),
            Profile::Development => (90.0, 85.0),
        };
        Self {
            enabled: config.enabled,
            cpu_limit,
            memory_limit,
            sample_interval: config.sample_interval_secs.max(0.0),
            sampler,
            last_sample_at: None,
            level: 0,
            stats: SchedulerStats::default(),
        }
    }

    /// Scheduler reading the host through sysinfo
    pub fn from_system(config: &SchedulerConfig, profile: Profile) -> Self {
        let sampler = SystemSampler::new(profile, config.thermal_zone.clone());
        Self::new(config, profile, Box::new(sampler))
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn level_for(&self, sample: &ResourceSample) -> u8 {
        let over = [
            sample.cpu_percent > self.cpu_limit,
            sample.memory_percent > self.memory_limit,
            sample.temperature_c > TEMPERATURE_LIMIT_C,
        ];
        over.iter().filter(|o| **o).count().min(2) as u8
    }

    /// Re-sample the machine when the interval has passed; returns the level
    pub fn refresh(&mut self, now: f64) -> u8 {
        if !self.enabled {
            return 0;
        }
        let due = self
            .last_sample_at
            .map_or(true, |t| now - t >= self.sample_interval || now < t);
        if !due {
            return self.level;
        }
        self.last_sample_at = Some(now);

        let sample = self.sampler.sample();
        let level = self.level_for(&sample);
        if level != self.level {
            if level > self.level {
                self.stats.optimizations_applied += 1;
                warn!(
                    "Optimisation level {} (cpu {:.0}%, memory {:.0}%, {:.0} °C)",
                    level, sample.cpu_percent, sample.memory_percent, sample.temperature_c
                );
            } else {
                info!("Optimisation level back to {}", level);
            }
        }
        self.level = level;
        self.stats.last_sample = Some(sample);
        level
    }

    /// Whether `detector` runs on frame `frame`; skips are counted
    pub fn should_run(&mut self, detector: Detector, frame: u64) -> bool {
        let (modulus, remainder) = detector.rule(self.level);
        let run = frame % modulus == remainder;
        if !run {
            self.stats.detections_skipped += 1;
        }
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted(VecDeque<ResourceSample>);

    impl ResourceSampler for Scripted {
        fn sample(&mut self) -> ResourceSample {
            self.0.pop_front().unwrap_or_default()
        }
    }

    fn sample(cpu: f32, memory: f32, temperature: f32) -> ResourceSample {
        ResourceSample {
            cpu_percent: cpu,
            memory_percent: memory,
            temperature_c: temperature,
        }
    }

    fn scheduler(profile: Profile, samples: Vec<ResourceSample>) -> FrameScheduler {
        FrameScheduler::new(&SchedulerConfig::default(), profile, Box::new(Scripted(samples.into())))
    }

    #[test]
    fn test_levels_follow_profile_limits() {
        let dev = scheduler(Profile::Development, vec![]);
        let prod = scheduler(Profile::Production, vec![]);
        let load = sample(85.0, 80.0, 40.0);
        assert_eq!(dev.level_for(&load), 0);
        assert_eq!(prod.level_for(&load), 2);
        assert_eq!(prod.level_for(&sample(85.0, 10.0, 0.0)), 1);
        assert_eq!(dev.level_for(&sample(95.0, 90.0, 75.0)), 2);
    }

    #[test]
    fn test_level_zero_runs_everything() {
        let mut s = scheduler(Profile::Production, vec![sample(10.0, 10.0, 30.0)]);
        assert_eq!(s.refresh(0.0), 0);
        for frame in 1..=20 {
            for detector in Detector::ALL {
                assert!(s.should_run(detector, frame));
            }
        }
        assert_eq!(s.stats().detections_skipped, 0);
    }

    #[test]
    fn test_level_one_modulo_table() {
        let mut s = scheduler(Profile::Production, vec![sample(95.0, 10.0, 30.0)]);
        assert_eq!(s.refresh(0.0), 1);
        let runs = |s: &mut FrameScheduler, d: Detector| (1..=60).filter(|f| s.should_run(d, *f)).count();
        assert_eq!(runs(&mut s, Detector::FaceRecognition), 60);
        assert_eq!(runs(&mut s, Detector::Fatigue), 30);
        assert_eq!(runs(&mut s, Detector::Behavior), 20);
        assert_eq!(runs(&mut s, Detector::Distraction), 15);
        assert_eq!(runs(&mut s, Detector::Analysis), 12);
        // yawn alternates with fatigue
        assert!(s.should_run(Detector::Yawn, 3));
        assert!(!s.should_run(Detector::Yawn, 4));
        assert_eq!(s.stats().optimizations_applied, 1);
    }

    #[test]
    fn test_level_two_and_skip_count() {
        let mut s = scheduler(Profile::Production, vec![sample(95.0, 90.0, 80.0)]);
        assert_eq!(s.refresh(0.0), 2);
        let ran = (1..=20).filter(|f| s.should_run(Detector::Analysis, *f)).count();
        assert_eq!(ran, 2);
        assert_eq!(s.stats().detections_skipped, 18);
        assert!(!s.should_run(Detector::FaceRecognition, 3));
    }

    #[test]
    fn test_sampling_interval() {
        let mut s = scheduler(Profile::Production, vec![sample(95.0, 10.0, 0.0), sample(10.0, 10.0, 0.0)]);
        assert_eq!(s.refresh(10.0), 1);
        // within the interval the old level holds
        assert_eq!(s.refresh(10.5), 1);
        assert_eq!(s.refresh(11.0), 0);
    }

    #[test]
    fn test_disabled_scheduler_never_skips() {
        let config = SchedulerConfig {
            enabled: false,
            ..Default::default()
        };
        let sampler = Scripted(vec![sample(100.0, 100.0, 100.0)].into());
        let mut s = FrameScheduler::new(&config, Profile::Production, Box::new(sampler));
        assert_eq!(s.refresh(0.0), 0);
        assert!(s.should_run(Detector::Analysis, 7));
    }
}
