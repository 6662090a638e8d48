//! Audio level collector: flags speech-level energy in the microphone spectrum.

use crate::collector::types::{Detection, ViolationType};
use crate::collector::{Collector, Emit};
use crate::config::Config;
use crate::error::{CollectorError, SensorKind};
use crate::scheduler::Cadence;
use crate::sensor::{AudioAnalyser, TrackGuard};
use chrono::{DateTime, Utc};
use serde_json::json;
use statrs::statistics::Statistics;

pub struct AudioLevelCollector {
    analyser: Box<dyn AudioAnalyser>,
    threshold: f64,
    track: Option<TrackGuard>,
    last_level: Option<f64>,
}

impl AudioLevelCollector {
    pub fn new(analyser: Box<dyn AudioAnalyser>, config: &Config) -> Self {
        Self {
            analyser,
            threshold: config.audio_threshold,
            track: None,
            last_level: None,
        }
    }

    /// Mean amplitude of the most recent sample.
    pub fn last_level(&self) -> Option<f64> {
        self.last_level
    }

    /// Whether the most recent sample was above the threshold.
    pub fn is_talking(&self) -> bool {
        self.last_level.map(|l| l > self.threshold).unwrap_or(false)
    }
}

/// Mean amplitude across the sampled spectrum, `None` for an empty sample.
pub fn mean_amplitude(spectrum: &[u8]) -> Option<f64> {
    if spectrum.is_empty() {
        return None;
    }
    Some(spectrum.iter().map(|&bin| f64::from(bin)).mean())
}

impl Collector for AudioLevelCollector {
    fn name(&self) -> &'static str {
        "audio"
    }

    fn sensor(&self) -> SensorKind {
        SensorKind::Microphone
    }

    fn cadence(&self) -> Cadence {
        Cadence::EveryFrame
    }

    fn start(&mut self, _now: DateTime<Utc>) -> Result<(), CollectorError> {
        if self.track.is_some() {
            return Err(CollectorError::AlreadyRunning);
        }
        let track = self
            .analyser
            .open()
            .map_err(|source| CollectorError::SensorUnavailable {
                kind: SensorKind::Microphone,
                source,
            })?;
        self.track = Some(track);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut track) = self.track.take() {
            track.release();
        }
        self.last_level = None;
    }

    fn is_running(&self) -> bool {
        self.track.is_some()
    }

    fn poll(&mut self, now: DateTime<Utc>, emit: Emit<'_>) -> Result<(), CollectorError> {
        if self.track.is_none() {
            return Ok(());
        }
        let spectrum = self.analyser.frequency_data()?;
        let Some(level) = mean_amplitude(&spectrum) else {
            return Ok(());
        };
        self.last_level = Some(level);

        if level > self.threshold {
            emit(Detection::new(ViolationType::AudioDetected, now).with_metadata(json!({
                "level": level,
            })));
        }
        Ok(())
    }
}
