//! Hourly weather samples and the cyclic timeline they form.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// One hour of weather observations.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WeatherSample {
    pub hour: u32,
    /// Air temperature in °C
    pub temperature: f64,
    /// Relative humidity in percent (nominally 0..100)
    pub humidity: f64,
    pub rain_mm: f64,
    pub snow_mm: f64,
    /// Wind speed in m/s
    pub wind_speed: f64,
    /// Direction the wind comes from, degrees
    pub wind_direction_deg: f64,
    pub uv_index: f64,
    pub description: String,
}

impl WeatherSample {
    /// Mild, calm conditions used to seed a chain before any data is loaded.
    pub fn neutral() -> Self {
        Self {
            hour: 0,
            temperature: 10.0,
            humidity: 50.0,
            rain_mm: 0.0,
            snow_mm: 0.0,
            wind_speed: 1.0,
            wind_direction_deg: 0.0,
            uv_index: 0.0,
            description: String::from("No data"),
        }
    }

    /// Human-readable summary for display collaborators
    pub fn summary(&self, hour_index: usize) -> String {
        format!(
            "{hour_index} Hour: {}\n\
             Temp: {} °C    Humidity: {} %\n\
             Wind Speed: {} m/s    Wind Direction: {}°\n\
             Rain: {} mm    Snow: {} mm\n\
             UV Index: {}",
            capitalize(&self.description),
            self.temperature,
            self.humidity,
            self.wind_speed,
            self.wind_direction_deg,
            self.rain_mm,
            self.snow_mm,
            self.uv_index,
        )
    }

    pub fn field(&self, field: WeatherField) -> f64 {
        match field {
            WeatherField::Temperature => self.temperature,
            WeatherField::Humidity => self.humidity,
            WeatherField::Rain => self.rain_mm,
            WeatherField::Snow => self.snow_mm,
            WeatherField::WindSpeed => self.wind_speed,
            WeatherField::WindDirection => self.wind_direction_deg,
            WeatherField::UvIndex => self.uv_index,
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Numeric weather fields, for plotting a series across the timeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WeatherField {
    Temperature,
    Humidity,
    Rain,
    Snow,
    WindSpeed,
    WindDirection,
    UvIndex,
}

// JSON layout of a dataset file
#[derive(Deserialize)]
struct RawDataset {
    #[serde(default)]
    city: Option<String>,
    hourly: Vec<RawHour>,
}

#[derive(Deserialize)]
struct RawHour {
    hour: Option<u32>,
    temp: f64,
    humidity: f64,
    #[serde(default)]
    rain: f64,
    #[serde(default)]
    snow: f64,
    wind_speed: f64,
    wind_deg: f64,
    #[serde(default)]
    uvi: f64,
    #[serde(default)]
    weather: Vec<RawCondition>,
}

#[derive(Deserialize)]
struct RawCondition {
    #[serde(default)]
    description: Option<String>,
}

impl RawHour {
    fn into_sample(self, position: usize) -> WeatherSample {
        let description = self
            .weather
            .into_iter()
            .next()
            .and_then(|c| c.description)
            .unwrap_or_else(|| String::from("No data"));

        WeatherSample {
            hour: self.hour.unwrap_or(position as u32),
            temperature: self.temp,
            humidity: self.humidity,
            rain_mm: self.rain,
            snow_mm: self.snow,
            wind_speed: self.wind_speed,
            wind_direction_deg: self.wind_deg,
            uv_index: self.uvi,
            description,
        }
    }
}

/// A non-empty, cyclic sequence of hourly samples.
///
/// Timelines are never edited after loading; a new load produces a new
/// timeline that replaces the old one wholesale.
#[derive(Clone, Debug, PartialEq)]
pub struct WeatherTimeline {
    city: String,
    samples: Vec<WeatherSample>,
}

impl WeatherTimeline {
    /// Build a timeline from samples. Fails if `samples` is empty.
    pub fn new(city: impl Into<String>, samples: Vec<WeatherSample>) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::EmptyTimeline);
        }
        Ok(Self {
            city: city.into(),
            samples,
        })
    }

    /// Parse a dataset document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: RawDataset = serde_json::from_str(json).map_err(Error::MalformedTimeline)?;
        let samples = raw
            .hourly
            .into_iter()
            .enumerate()
            .map(|(i, h)| h.into_sample(i))
            .collect();
        Self::new(raw.city.unwrap_or_default(), samples)
    }

    /// Load a dataset file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| Error::DataNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        let mut timeline = Self::from_json_str(&json)?;
        if timeline.city.is_empty() {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                timeline.city = stem.to_string();
            }
        }
        info!(
            city = %timeline.city,
            hours = timeline.len(),
            path = %path.display(),
            "loaded weather timeline"
        );
        Ok(timeline)
    }

    /// Load `<data_dir>/<region lowercased>.json`
    pub fn load_region(data_dir: impl AsRef<Path>, region: &str) -> Result<Self> {
        let path = region_path(data_dir.as_ref(), region);
        debug!(region, path = %path.display(), "resolving region dataset");
        Self::load(path)
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    /// Number of hours, always at least one
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always false; present for API symmetry with `len`
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Sample at `index`, wrapping modulo the timeline length
    #[inline]
    pub fn sample(&self, index: usize) -> &WeatherSample {
        &self.samples[index % self.samples.len()]
    }

    /// Index that follows `index` on the cyclic timeline
    #[inline]
    pub fn next_index(&self, index: usize) -> usize {
        (index + 1) % self.samples.len()
    }

    pub fn samples(&self) -> &[WeatherSample] {
        &self.samples
    }

    /// One field across every hour, in order
    pub fn series(&self, field: WeatherField) -> Vec<f64> {
        self.samples.iter().map(|s| s.field(field)).collect()
    }
}

/// Path of a region's dataset inside `data_dir`
pub fn region_path(data_dir: &Path, region: &str) -> PathBuf {
    data_dir.join(format!("{}.json", region.to_lowercase()))
}
