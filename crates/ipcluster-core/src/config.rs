//! ipcluster.toml settings parser.
//!
//! Every section is optional; missing keys fall back to the values the
//! notebook tooling has always used (3s settle delay, 60s readiness
//! budgets, five 1s shutdown polls).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// File name looked up in the working directory when no path is given.
pub const DEFAULT_SETTINGS_FILE: &str = "ipcluster.toml";

/// Upper bound accepted for any configured delay, timeout or interval.
pub const MAX_SETTING_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub coordinator: CoordinatorSettings,
    pub engine: EngineSettings,
    pub launch: LaunchSettings,
    pub readiness: ReadinessSettings,
    pub shutdown: ShutdownSettings,
    pub overlay: OverlaySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    pub program: String,
    /// Port the coordinator serves its worker registry on.
    pub registry_port: u16,
    pub log_to_file: bool,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            program: "ipcontroller".to_string(),
            registry_port: 10101,
            log_to_file: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub program: String,
    pub log_to_file: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            program: "ipengine".to_string(),
            log_to_file: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSettings {
    /// Pause between spawning the coordinator and the engines.
    #[serde(with = "duration_str")]
    pub settle_delay: Duration,
    /// File a batch wrapper writes the scheduler job id into.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id_file: Option<PathBuf>,
    #[serde(with = "duration_str")]
    pub job_id_timeout: Duration,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(3),
            job_id_file: None,
            job_id_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessSettings {
    #[serde(with = "duration_str")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_str")]
    pub registration_timeout: Duration,
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(60),
            registration_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(400),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_polls: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// Where descriptor files are written. Defaults to the system temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor_dir: Option<PathBuf>,
    #[serde(with = "duration_str")]
    pub stop_delay: Duration,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            descriptor_dir: None,
            stop_delay: Duration::from_secs(2),
        }
    }
}

impl OverlaySettings {
    pub fn descriptor_dir(&self) -> PathBuf {
        self.descriptor_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl ClusterSettings {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let settings: ClusterSettings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path`, or from `./ipcluster.toml` if it exists, or defaults.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let fallback = Path::new(DEFAULT_SETTINGS_FILE);
                if fallback.is_file() {
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.coordinator.program.trim().is_empty() {
            return Err(ConfigError::Invalid("coordinator.program is empty".into()));
        }
        if self.engine.program.trim().is_empty() {
            return Err(ConfigError::Invalid("engine.program is empty".into()));
        }
        if self.readiness.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("readiness.poll_interval must be non-zero".into()));
        }
        if self.shutdown.max_polls == 0 {
            return Err(ConfigError::Invalid("shutdown.max_polls must be at least 1".into()));
        }
        let durations = [
            ("launch.settle_delay", self.launch.settle_delay),
            ("launch.job_id_timeout", self.launch.job_id_timeout),
            ("readiness.connect_timeout", self.readiness.connect_timeout),
            ("readiness.registration_timeout", self.readiness.registration_timeout),
            ("readiness.poll_interval", self.readiness.poll_interval),
            ("shutdown.poll_interval", self.shutdown.poll_interval),
            ("overlay.stop_delay", self.overlay.stop_delay),
        ];
        for (key, value) in durations {
            if value > MAX_SETTING_DURATION {
                return Err(ConfigError::Invalid(format!(
                    "{key} exceeds {}h",
                    MAX_SETTING_DURATION.as_secs() / 3600
                )));
            }
        }
        let budget = self.shutdown.poll_interval.saturating_mul(self.shutdown.max_polls);
        if budget > MAX_SETTING_DURATION {
            return Err(ConfigError::Invalid(
                "shutdown.poll_interval * shutdown.max_polls exceeds the shutdown ceiling".into(),
            ));
        }
        Ok(())
    }
}

/// Parse a duration string: `"5s"`, `"500ms"`, `"2m"`, or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn format_duration(d: &Duration) -> String {
    if d.subsec_millis() != 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid duration {raw:?}")))
    }
}
