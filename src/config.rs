//! Configuration for the exam integrity agent.
//!
//! Every heuristic threshold, cooldown window and scoring weight is tunable.
//! The defaults are empirically chosen starting points; validate them against
//! recorded sessions (`exam-integrity replay`) before relying on them.

use crate::collector::types::{Severity, ViolationType};
use crate::error::ConfigError;
use crate::scoring::MAX_SCORE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path for violation logs, session records and screen snapshots
    pub data_path: PathBuf,

    /// Port the HTTP server binds to
    pub server_port: u16,

    /// Starting credibility score
    pub base_score: u32,

    /// Points deducted per severity
    pub severity_weights: SeverityWeights,

    /// Severity assigned to each violation type
    pub severity_map: SeverityMap,

    /// Per-type cooldown windows
    pub cooldowns: CooldownConfig,

    /// Frame classifier thresholds
    pub gaze: GazeThresholds,

    /// Mean spectrum amplitude (0-255) above which audio is flagged
    pub audio_threshold: f64,

    /// Identity verification cadence and match threshold
    pub identity: IdentityConfig,

    /// Time without a blink before liveness fails
    #[serde(with = "duration_serde")]
    pub liveness_timeout: Duration,

    /// Interval between screen snapshots while sharing
    #[serde(with = "duration_serde")]
    pub snapshot_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("exam-integrity-agent");

        Self {
            data_path: data_dir,
            server_port: 3000,
            base_score: 100,
            severity_weights: SeverityWeights::default(),
            severity_map: SeverityMap::default(),
            cooldowns: CooldownConfig::default(),
            gaze: GazeThresholds::default(),
            audio_threshold: 15.0,
            identity: IdentityConfig::default(),
            liveness_timeout: Duration::from_secs(60),
            snapshot_interval: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a file, falling back to defaults if it is missing.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("exam-integrity-agent")
            .join("config.json")
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    /// Path of the append-only violation log.
    pub fn violation_log_path(&self) -> PathBuf {
        self.data_path.join("violations.jsonl")
    }

    /// Path of the persisted session registry.
    pub fn sessions_path(&self) -> PathBuf {
        self.data_path.join("sessions.json")
    }

    /// Reject settings that would make the heuristics meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_score == 0 || self.base_score > MAX_SCORE {
            return Err(ConfigError::Invalid(format!(
                "base_score must be within 1-{MAX_SCORE}"
            )));
        }
        for severity in Severity::ALL {
            if self.severity_weights.delta(severity) > 0 {
                return Err(ConfigError::Invalid(format!(
                    "severity weight for {severity} must not add points"
                )));
            }
        }
        if !(0.0..=255.0).contains(&self.audio_threshold) {
            return Err(ConfigError::Invalid(
                "audio_threshold must be within 0-255".into(),
            ));
        }
        if self.identity.match_threshold <= 0.0 || self.identity.match_threshold > 1.0 {
            return Err(ConfigError::Invalid(
                "identity.match_threshold must be within (0, 1]".into(),
            ));
        }
        if self.liveness_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "liveness_timeout must be positive".into(),
            ));
        }
        self.gaze.validate()
    }
}

/// Points lost per violation severity. Values are zero or negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityWeights {
    pub critical: i32,
    pub high: i32,
    pub medium: i32,
    pub low: i32,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            critical: -10,
            high: -7,
            medium: -3,
            low: -1,
        }
    }
}

impl SeverityWeights {
    pub fn delta(&self, severity: Severity) -> i32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

/// Severity assigned to each violation type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeverityMap(BTreeMap<ViolationType, Severity>);

impl Default for SeverityMap {
    fn default() -> Self {
        let map = ViolationType::ALL
            .iter()
            .map(|&kind| {
                let severity = match kind {
                    ViolationType::FocusLost => Severity::High,
                    ViolationType::LookingAway => Severity::Medium,
                    _ => Severity::Critical,
                };
                (kind, severity)
            })
            .collect();
        Self(map)
    }
}

impl SeverityMap {
    /// Severity for a type; types missing from a hand-edited map are medium.
    pub fn severity_for(&self, kind: ViolationType) -> Severity {
        self.0.get(&kind).copied().unwrap_or(Severity::Medium)
    }

    pub fn set(&mut self, kind: ViolationType, severity: Severity) {
        self.0.insert(kind, severity);
    }
}

/// Cooldown windows. A zero window means the type is never throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    #[serde(with = "duration_ms_serde")]
    pub tab_switch: Duration,
    #[serde(with = "duration_ms_serde")]
    pub fullscreen_exit: Duration,
    #[serde(with = "duration_ms_serde")]
    pub focus_lost: Duration,
    #[serde(with = "duration_ms_serde")]
    pub audio_detected: Duration,
    /// Shared by NO_FACE, MULTIPLE_FACES and LOOKING_AWAY
    #[serde(with = "duration_ms_serde")]
    pub face_presence: Duration,
    #[serde(with = "duration_ms_serde")]
    pub user_mismatch: Duration,
    #[serde(with = "duration_ms_serde")]
    pub liveness_failure: Duration,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            tab_switch: Duration::ZERO,
            fullscreen_exit: Duration::ZERO,
            focus_lost: Duration::ZERO,
            audio_detected: Duration::from_secs(2),
            face_presence: Duration::from_secs(2),
            user_mismatch: Duration::ZERO,
            liveness_failure: Duration::from_secs(5),
        }
    }
}

impl CooldownConfig {
    pub fn for_type(&self, kind: ViolationType) -> Duration {
        match kind {
            ViolationType::TabSwitch => self.tab_switch,
            ViolationType::FullscreenExit => self.fullscreen_exit,
            ViolationType::FocusLost => self.focus_lost,
            ViolationType::AudioDetected => self.audio_detected,
            ViolationType::NoFace | ViolationType::MultipleFaces | ViolationType::LookingAway => {
                self.face_presence
            }
            ViolationType::UserMismatch => self.user_mismatch,
            ViolationType::LivenessFailure => self.liveness_failure,
        }
    }
}

/// Thresholds for the frame classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeThresholds {
    /// Scales nose offset / face width so that 1.0 is roughly a 70 degree turn
    pub yaw_scale: f64,
    /// Head turns beyond this are always a violation
    pub yaw_extreme: f64,
    /// Head turns beyond this are checked for eye compensation
    pub yaw_moderate: f64,
    /// Pure side-glance threshold with the head centered
    pub eye_gaze: f64,
    /// Eye movement this far in the direction of the head turn counts as agreement
    pub eye_agreement: f64,
    pub look_up: f64,
    /// Very lenient so reading on-screen text is tolerated
    pub look_down: f64,
    /// Both eyeBlink blendshapes above this count as a blink
    pub blink: f64,
}

impl Default for GazeThresholds {
    fn default() -> Self {
        Self {
            yaw_scale: 2.5,
            yaw_extreme: 1.0,
            yaw_moderate: 0.6,
            eye_gaze: 0.7,
            eye_agreement: 0.1,
            look_up: 0.8,
            look_down: 0.9,
            blink: 0.5,
        }
    }
}

impl GazeThresholds {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.yaw_scale <= 0.0 {
            return Err(ConfigError::Invalid("gaze.yaw_scale must be positive".into()));
        }
        if self.yaw_moderate >= self.yaw_extreme {
            return Err(ConfigError::Invalid(
                "gaze.yaw_moderate must be below gaze.yaw_extreme".into(),
            ));
        }
        Ok(())
    }
}

/// Identity verification settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Cosine similarity below which a positive reading is a mismatch
    pub match_threshold: f64,
    /// How often the verifier wakes up
    #[serde(with = "duration_serde")]
    pub check_interval: Duration,
    /// Minimum spacing between actual embedding comparisons
    #[serde(with = "duration_serde")]
    pub compare_interval: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.75,
            check_interval: Duration::from_secs(1),
            compare_interval: Duration::from_secs(5),
        }
    }
}

/// Serde support for Duration as whole seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde support for Duration as milliseconds.
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
