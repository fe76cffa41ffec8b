//! DetectorConfig - 検出器の設定値

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default ttl: one week (`168h`).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(168 * 60 * 60);
pub const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 8;

/// DetectorConfig は検出器全体で共有する設定
///
/// durations は humantime 形式（`168h`, `15m`）でシリアライズする。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DetectorConfig {
    /// register/complete の書き込みごとに `now + retention` が ttl になる
    #[serde(with = "humantime_serde_shim")]
    pub retention: Duration,

    /// これより長く報告のない Pending タスクは stuck 扱い
    #[serde(with = "humantime_serde_shim")]
    pub staleness_threshold: Duration,

    /// ReaperLoop が期限切れレコードを物理削除する間隔
    #[serde(with = "humantime_serde_shim")]
    pub reaper_interval: Duration,

    /// register/complete の楽観的書き込みの最大試行回数
    pub max_write_attempts: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            staleness_threshold: DEFAULT_STALENESS_THRESHOLD,
            reaper_interval: DEFAULT_REAPER_INTERVAL,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
        }
    }
}

/// Config validation failure, reported by `DetectorBuilder::build`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("max_write_attempts must be at least 1")]
    NoWriteAttempts,

    #[error(
        "staleness_threshold ({threshold}) must be shorter than retention ({retention}); \
         tasks would expire before they could be flagged stuck"
    )]
    ThresholdNotBelowRetention { threshold: String, retention: String },
}

impl DetectorConfig {
    /// 全ての違反ではなく、最初に見つかった違反を返す
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("retention", self.retention),
            ("staleness_threshold", self.staleness_threshold),
            ("reaper_interval", self.reaper_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }
        if self.max_write_attempts == 0 {
            return Err(ConfigError::NoWriteAttempts);
        }
        if self.staleness_threshold >= self.retention {
            return Err(ConfigError::ThresholdNotBelowRetention {
                threshold: humantime::format_duration(self.staleness_threshold).to_string(),
                retention: humantime::format_duration(self.retention).to_string(),
            });
        }
        Ok(())
    }
}

/// `Duration` <-> humantime string.
mod humantime_serde_shim {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let config = DetectorConfig::default();
        assert_eq!(config.retention, Duration::from_secs(604_800));
        assert_eq!(config.max_write_attempts, 8);
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case::zero_retention(
        DetectorConfig { retention: Duration::ZERO, ..Default::default() },
        ConfigError::ZeroDuration { field: "retention" }
    )]
    #[case::zero_threshold(
        DetectorConfig { staleness_threshold: Duration::ZERO, ..Default::default() },
        ConfigError::ZeroDuration { field: "staleness_threshold" }
    )]
    #[case::zero_reaper(
        DetectorConfig { reaper_interval: Duration::ZERO, ..Default::default() },
        ConfigError::ZeroDuration { field: "reaper_interval" }
    )]
    #[case::no_attempts(
        DetectorConfig { max_write_attempts: 0, ..Default::default() },
        ConfigError::NoWriteAttempts
    )]
    fn invalid_configs(#[case] config: DetectorConfig, #[case] expected: ConfigError) {
        assert_eq!(config.validate(), Err(expected));
    }

    #[test]
    fn threshold_must_stay_below_retention() {
        let config = DetectorConfig {
            retention: Duration::from_secs(3600),
            staleness_threshold: Duration::from_secs(3600),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ThresholdNotBelowRetention { .. }));
        assert!(err.to_string().contains("1h"));
    }

    #[test]
    fn durations_use_humantime_in_json() {
        let json = serde_json::to_value(DetectorConfig::default()).unwrap();
        assert_eq!(json["retention"], "7days");
        assert_eq!(json["stalenessThreshold"], "1h");

        let parsed: DetectorConfig =
            serde_json::from_str(r#"{"retention":"48h","reaperInterval":"30s"}"#).unwrap();
        assert_eq!(parsed.retention, Duration::from_secs(48 * 3600));
        assert_eq!(parsed.reaper_interval, Duration::from_secs(30));
        assert_eq!(parsed.staleness_threshold, DEFAULT_STALENESS_THRESHOLD);
    }
}
