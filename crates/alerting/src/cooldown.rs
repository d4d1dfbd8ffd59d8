//! Keyed alert cooldowns
//!
//! Times are plain seconds supplied by the caller (frame timestamps), so
//! behaviour is the same live and under test.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Cooldown configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    /// Cooldown for keys without an override (seconds)
    pub default_cooldown_secs: f64,
    /// Per-key cooldown overrides (seconds)
    pub overrides: HashMap<String, f64>,
    /// Maximum fires per rolling hour across all keys (0 = unlimited)
    pub max_fires_per_hour: usize,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            default_cooldown_secs: 30.0,
            overrides: HashMap::new(),
            max_fires_per_hour: 0,
        }
    }
}

impl CooldownConfig {
    pub fn with_default(secs: f64) -> Self {
        Self {
            default_cooldown_secs: secs,
            ..Default::default()
        }
    }

    pub fn with_override(mut self, key: &str, secs: f64) -> Self {
        self.overrides.insert(key.to_string(), secs);
        self
    }
}

/// State of an alert key
#[derive(Debug, Clone)]
pub struct AlertState {
    /// Last time this alert fired (seconds)
    pub last_fired: f64,
    /// Number of times fired
    pub fire_count: usize,
    /// Whether alert is acknowledged
    pub acknowledged: bool,
}

/// Cooldown manager for deduplication and throttling
#[derive(Debug, Clone, Default)]
pub struct CooldownManager {
    config: CooldownConfig,
    states: HashMap<String, AlertState>,
    hourly_count: usize,
    hour_start: Option<f64>,
}

impl CooldownManager {
    pub fn new(config: CooldownConfig) -> Self {
        debug!("Creating cooldown manager with config: {:?}", config);
        Self {
            config,
            states: HashMap::new(),
            hourly_count: 0,
            hour_start: None,
        }
    }

    pub fn cooldown_for(&self, key: &str) -> f64 {
        self.config
            .overrides
            .get(key)
            .copied()
            .unwrap_or(self.config.default_cooldown_secs)
    }

    /// Whether `key` may fire at `now`
    pub fn is_ready(&mut self, key: &str, now: f64) -> bool {
        if self.config.max_fires_per_hour > 0 {
            match self.hour_start {
                Some(start) if now - start <= 3600.0 => {}
                _ => {
                    self.hour_start = Some(now);
                    self.hourly_count = 0;
                }
            }
            if self.hourly_count >= self.config.max_fires_per_hour {
                warn!("Alert {} throttled: max fires per hour reached", key);
                return false;
            }
        }

        if let Some(state) = self.states.get(key) {
            if now - state.last_fired < self.cooldown_for(key) {
                debug!("Alert {} suppressed: in cooldown period", key);
                return false;
            }
        }
        true
    }

    /// Record that `key` fired at `now`
    pub fn record_fire(&mut self, key: &str, now: f64) {
        self.hourly_count += 1;
        let state = self.states.entry(key.to_string()).or_insert(AlertState {
            last_fired: now,
            fire_count: 0,
            acknowledged: false,
        });
        state.last_fired = now;
        state.fire_count += 1;
        state.acknowledged = false;

        info!("Alert recorded: {} (count: {})", key, state.fire_count);
    }

    /// `is_ready` followed by `record_fire` when it is
    pub fn try_fire(&mut self, key: &str, now: f64) -> bool {
        if self.is_ready(key, now) {
            self.record_fire(key, now);
            true
        } else {
            false
        }
    }

    pub fn acknowledge(&mut self, key: &str) -> bool {
        match self.states.get_mut(key) {
            Some(state) => {
                state.acknowledged = true;
                info!("Alert acknowledged: {}", key);
                true
            }
            None => false,
        }
    }

    pub fn fire_count(&self, key: &str) -> usize {
        self.states.get(key).map(|s| s.fire_count).unwrap_or(0)
    }

    /// Unacknowledged keys, sorted by name
    pub fn pending(&self) -> Vec<(&str, &AlertState)> {
        let mut pending: Vec<(&str, &AlertState)> = self
            .states
            .iter()
            .filter(|(_, state)| !state.acknowledged)
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        pending.sort_by(|a, b| a.0.cmp(b.0));
        pending
    }

    pub fn hourly_count(&self) -> usize {
        self.hourly_count
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.hourly_count = 0;
        self.hour_start = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deduplication() {
        let mut manager = CooldownManager::new(CooldownConfig::with_default(30.0));

        assert!(manager.try_fire("microsleep", 100.0));
        assert!(!manager.try_fire("microsleep", 110.0));
        assert!(manager.try_fire("yawn", 110.0));
        assert!(manager.try_fire("microsleep", 130.0));
        assert_eq!(manager.fire_count("microsleep"), 2);
    }

    #[test]
    fn test_override() {
        let config = CooldownConfig::with_default(30.0).with_override("critical_fatigue", 60.0);
        let mut manager = CooldownManager::new(config);

        assert!(manager.try_fire("critical_fatigue", 0.0));
        assert!(!manager.try_fire("critical_fatigue", 45.0));
        assert!(manager.try_fire("critical_fatigue", 60.0));
    }

    #[test]
    fn test_hourly_throttle() {
        let config = CooldownConfig {
            default_cooldown_secs: 0.0,
            max_fires_per_hour: 2,
            ..Default::default()
        };
        let mut manager = CooldownManager::new(config);

        assert!(manager.try_fire("a", 0.0));
        assert!(manager.try_fire("b", 1.0));
        assert!(!manager.try_fire("c", 2.0));
        // next hour
        assert!(manager.try_fire("c", 3700.0));
    }

    #[test]
    fn test_acknowledgement() {
        let mut manager = CooldownManager::default();
        manager.record_fire("phone_7s", 1.0);
        manager.record_fire("smoking_7s", 1.0);
        assert_eq!(manager.pending().len(), 2);

        assert!(manager.acknowledge("phone_7s"));
        assert!(!manager.acknowledge("unknown"));
        assert_eq!(manager.pending()[0].0, "smoking_7s");

        manager.clear();
        assert!(manager.pending().is_empty());
        assert_eq!(manager.hourly_count(), 0);
    }

    proptest::proptest! {
        #[test]
        fn test_accepted_fires_respect_cooldown(
            gaps in proptest::collection::vec(0.0f64..40.0, 1..60),
            cooldown in 1.0f64..30.0,
        ) {
            let mut manager = CooldownManager::new(CooldownConfig::with_default(cooldown));
            let mut now = 0.0;
            let mut last: Option<f64> = None;
            for gap in gaps {
                now += gap;
                if manager.try_fire("alert", now) {
                    if let Some(prev) = last {
                        proptest::prop_assert!(now - prev >= cooldown);
                    }
                    last = Some(now);
                } else {
                    proptest::prop_assert!(last.map_or(false, |prev| now - prev < cooldown));
                }
            }
        }
    }
}
