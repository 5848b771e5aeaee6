//! Session configuration, loadable from TOML.
//!
//! ```toml
//! tick_interval_secs = 0.5
//! data_dir = "weather"
//!
//! [mapping]
//! delay_seconds = 0.75
//!
//! [engine]
//! sample_rate = 44100
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::engine::EngineConfig;
use crate::error::{Error, Result};
use crate::mapping::MapperConfig;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time per simulated hour
    pub tick_interval_secs: f64,
    pub min_tick_secs: f64,
    pub max_tick_secs: f64,
    /// Upper bound on waiting for a stopped loop to exit
    pub stop_wait_ms: u64,
    /// Delay between ticks while no source is attached
    pub source_retry_ms: u64,
    /// Capacity of each tick snapshot subscription
    pub display_queue: usize,
    /// Directory searched by region loads
    pub data_dir: PathBuf,
    pub mapping: MapperConfig,
    pub engine: EngineConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 1.0,
            min_tick_secs: 0.1,
            max_tick_secs: 5.0,
            stop_wait_ms: 200,
            source_retry_ms: 500,
            display_queue: 64,
            data_dir: PathBuf::from("data"),
            mapping: MapperConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| Error::ConfigNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), "loaded session config");
        Ok(config)
    }

    pub fn with_tick_interval(mut self, secs: f64) -> Self {
        self.tick_interval_secs = secs;
        self
    }

    /// Adjust the tick bounds; tests use a zero minimum to tick as fast as possible
    pub fn with_tick_bounds(mut self, min_secs: f64, max_secs: f64) -> Self {
        self.min_tick_secs = min_secs;
        self.max_tick_secs = max_secs;
        self
    }

    pub fn with_stop_wait(mut self, wait: Duration) -> Self {
        self.stop_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_source_retry(mut self, retry: Duration) -> Self {
        self.source_retry_ms = retry.as_millis() as u64;
        self
    }

    pub fn with_display_queue(mut self, capacity: usize) -> Self {
        self.display_queue = capacity;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_mapping(mut self, mapping: MapperConfig) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Hold `secs` within the configured tick bounds
    pub fn clamp_tick(&self, secs: f64) -> f64 {
        let lo = self.min_tick_secs.max(0.0);
        let hi = self.max_tick_secs.max(lo);
        if secs.is_nan() {
            return lo;
        }
        secs.clamp(lo, hi)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.clamp_tick(self.tick_interval_secs))
    }

    pub fn stop_wait(&self) -> Duration {
        Duration::from_millis(self.stop_wait_ms)
    }

    pub fn source_retry(&self) -> Duration {
        Duration::from_millis(self.source_retry_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(SessionConfig::from_toml_str("").unwrap(), SessionConfig::default());
    }

    #[test]
    fn nested_tables_override_fields() {
        let config = SessionConfig::from_toml_str(
            r#"
            tick_interval_secs = 0.5
            data_dir = "weather"

            [mapping]
            delay_seconds = 0.75

            [engine]
            sample_rate = 44100
            "#,
        )
        .unwrap();
        assert_eq!(config.tick_interval(), Duration::from_millis(500));
        assert_eq!(config.data_dir, PathBuf::from("weather"));
        assert_eq!(config.mapping.delay_seconds, 0.75);
        assert_eq!(config.engine.sample_rate, 44100);
        assert_eq!(config.engine.command_queue, 64);
        assert_eq!(config.stop_wait(), Duration::from_millis(200));
    }

    #[test]
    fn tick_is_clamped_to_bounds() {
        let config = SessionConfig::default();
        assert_eq!(config.clamp_tick(0.01), 0.1);
        assert_eq!(config.clamp_tick(9.0), 5.0);
        assert_eq!(config.clamp_tick(2.0), 2.0);
        assert_eq!(SessionConfig::default().with_tick_bounds(0.0, 5.0).clamp_tick(0.0), 0.0);
    }

    #[test]
    fn bad_type_is_config_error() {
        assert!(matches!(
            SessionConfig::from_toml_str("display_queue = \"lots\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        match SessionConfig::load(&path) {
            Err(Error::ConfigNotFound { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected ConfigNotFound, got {other:?}"),
        }
    }
}
