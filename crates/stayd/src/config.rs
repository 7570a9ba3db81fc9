use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH: &str = "/etc/stayd/config.toml";
pub const TOKEN_ENV: &str = "STAYD_NOTIFY_TOKEN";

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub store: StoreConfig,
    pub sampler: SamplerConfig,
    pub schedule: ScheduleConfig,
    pub detector: DetectorConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    store: RawStoreConfig,
    #[serde(default)]
    sampler: RawSamplerConfig,
    #[serde(default)]
    schedule: RawScheduleConfig,
    #[serde(default)]
    detector: RawDetectorConfig,
    #[serde(default)]
    notify: RawNotifyConfig,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_path: PathBuf,
    pub retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("/var/lib/stayd/samples.json"),
            retention_days: 7,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawStoreConfig {
    #[serde(default)]
    data_path: Option<PathBuf>,
    #[serde(default)]
    retention_days: Option<u32>,
}

impl From<RawStoreConfig> for StoreConfig {
    fn from(raw: RawStoreConfig) -> Self {
        let defaults = StoreConfig::default();
        Self {
            data_path: raw.data_path.unwrap_or(defaults.data_path),
            retention_days: raw
                .retention_days
                .unwrap_or(defaults.retention_days)
                .max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub interval_secs: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawSamplerConfig {
    #[serde(default)]
    interval_secs: Option<u64>,
}

impl From<RawSamplerConfig> for SamplerConfig {
    fn from(raw: RawSamplerConfig) -> Self {
        let defaults = SamplerConfig::default();
        Self {
            interval_secs: raw.interval_secs.unwrap_or(defaults.interval_secs).max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub daily_at: NaiveTime,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_at: NaiveTime::from_hms_opt(7, 30, 0).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawScheduleConfig {
    #[serde(default)]
    daily_at: Option<String>,
}

impl TryFrom<RawScheduleConfig> for ScheduleConfig {
    type Error = anyhow::Error;

    fn try_from(raw: RawScheduleConfig) -> Result<Self> {
        let Some(daily_at) = raw.daily_at else {
            return Ok(ScheduleConfig::default());
        };
        Ok(Self {
            daily_at: parse_daily_at(&daily_at)?,
        })
    }
}

/// Parse `"HH:MM"` into a time of day.
pub fn parse_daily_at(value: &str) -> Result<NaiveTime> {
    let trimmed = value.trim();
    match NaiveTime::parse_from_str(trimmed, "%H:%M") {
        Ok(t) => Ok(t),
        Err(e) => bail!("schedule.daily_at must be HH:MM, got {:?}: {}", value, e),
    }
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub snapshot_path: PathBuf,
    pub max_frame_age_secs: u64,
    pub command: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub min_score: f32,
    pub person_class: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("/run/stayd/frame.jpg"),
            max_frame_age_secs: 120,
            command: "stayd-detect".into(),
            args: Vec::new(),
            timeout_secs: 30,
            min_score: crate::detect::DEFAULT_MIN_SCORE,
            person_class: crate::detect::PERSON_CLASS,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawDetectorConfig {
    #[serde(default)]
    snapshot_path: Option<PathBuf>,
    #[serde(default)]
    max_frame_age_secs: Option<u64>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Option<Vec<String>>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    min_score: Option<f32>,
    #[serde(default)]
    person_class: Option<u32>,
}

impl TryFrom<RawDetectorConfig> for DetectorConfig {
    type Error = anyhow::Error;

    fn try_from(raw: RawDetectorConfig) -> Result<Self> {
        let defaults = DetectorConfig::default();
        if let Some(score) = raw.min_score {
            if !score.is_finite() {
                bail!("detector.min_score must be a finite number, got {}", score);
            }
        }
        Ok(Self {
            snapshot_path: raw.snapshot_path.unwrap_or(defaults.snapshot_path),
            max_frame_age_secs: raw
                .max_frame_age_secs
                .unwrap_or(defaults.max_frame_age_secs),
            command: raw.command.unwrap_or(defaults.command),
            args: raw.args.unwrap_or(defaults.args),
            timeout_secs: raw.timeout_secs.unwrap_or(defaults.timeout_secs).max(1),
            min_score: raw.min_score.unwrap_or(defaults.min_score).clamp(0.0, 1.0),
            person_class: raw.person_class.unwrap_or(defaults.person_class),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub endpoint: Option<String>,
    pub recipient: String,
    pub access_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            recipient: "USER_ID".into(),
            access_token: None,
            timeout_secs: 10,
        }
    }
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawNotifyConfig {
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    recipient: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

impl From<RawNotifyConfig> for NotifyConfig {
    fn from(raw: RawNotifyConfig) -> Self {
        let defaults = NotifyConfig::default();
        Self {
            endpoint: raw.endpoint.filter(|e| !e.trim().is_empty()),
            recipient: raw.recipient.unwrap_or(defaults.recipient),
            access_token: raw.access_token.filter(|t| !t.is_empty()),
            timeout_secs: raw.timeout_secs.unwrap_or(defaults.timeout_secs).max(1),
        }
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = anyhow::Error;

    fn try_from(raw: RawConfig) -> Result<Self> {
        Ok(Config {
            store: raw.store.into(),
            sampler: raw.sampler.into(),
            schedule: raw.schedule.try_into()?,
            detector: raw.detector.try_into()?,
            notify: raw.notify.into(),
        })
    }
}

pub fn parse(raw: &str) -> Result<Config> {
    let file_cfg: RawConfig = toml::from_str(raw)?;
    file_cfg.try_into()
}

/// Load the config file at `path`. A missing file yields defaults.
/// `STAYD_NOTIFY_TOKEN` overrides `notify.access_token` either way.
pub fn load(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        parse(&raw).with_context(|| format!("parse {}", path.display()))?
    } else {
        Config::default()
    };

    if let Ok(token) = env::var(TOKEN_ENV) {
        if !token.is_empty() {
            config.notify.access_token = Some(token);
        }
    }
    Ok(config)
}
