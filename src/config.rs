use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::reminder::TimeoutPolicy;

pub const DEFAULT_DATA_DIR: &str = "medminder";
pub const CONFIG_FILE: &str = "config.json";
pub const LOG_FILE: &str = "medminder.log";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub check_interval_secs: u64,
    pub first_alert_secs: u64,
    pub final_grace_secs: u64,
    pub sound_enabled: bool,
    pub speech_enabled: bool,
    pub desktop_notifications: bool,
    pub theme: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            first_alert_secs: 300,
            final_grace_secs: 60,
            sound_enabled: true,
            speech_enabled: true,
            desktop_notifications: true,
            theme: "default".into(),
        }
    }
}

impl Config {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            first_alert: Duration::from_secs(self.first_alert_secs),
            final_grace: Duration::from_secs(self.final_grace_secs),
        }
    }

    /// Reads `config.json` from `dir`. A missing, unreadable or malformed
    /// file yields the defaults; only the last two are worth a warning.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE);
        match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("Ignoring malformed {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!("Could not read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(CONFIG_FILE), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

pub fn data_dir(override_dir: Option<PathBuf>) -> PathBuf {
    override_dir.unwrap_or_else(|| PathBuf::from(".").join(DEFAULT_DATA_DIR))
}

/// Parses `90s`, `5m`, `1h30m` or a bare number of seconds. Fractions are
/// rounded up to whole seconds; anything under a second is rejected.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim().to_lowercase();
    if let Ok(secs) = s.parse::<u64>() {
        return if secs > 0 { Ok(Duration::from_secs(secs)) } else { Err("Duration must be > 0".into()) };
    }

    let mut total = 0.0;
    let mut num = String::new();

    for c in s.chars() {
        match c {
            '0'..='9' | '.' => num.push(c),
            'h' => { total += num.parse::<f64>().map_err(|_| "Invalid hours")? * 3600.0; num.clear(); }
            'm' => { total += num.parse::<f64>().map_err(|_| "Invalid minutes")? * 60.0; num.clear(); }
            's' => { total += num.parse::<f64>().map_err(|_| "Invalid seconds")?; num.clear(); }
            _ => return Err("Invalid format".into()),
        }
    }

    if !num.is_empty() {
        return Err("Missing unit after number".into());
    }
    if total < 1.0 {
        return Err("Duration must be at least 1s".into());
    }
    Ok(Duration::from_secs(total.ceil() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_durations() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("120").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("0").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("1h5").is_err());
    }

    #[test]
    fn sub_second_durations_are_rejected_and_fractions_round_up() {
        assert!(parse_duration("0.5s").is_err());
        assert!(parse_duration("0.01m").is_err());
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("0.5m").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn missing_or_broken_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Config::load(dir.path()), Config::default());

        fs::write(dir.path().join(CONFIG_FILE), "{ not json").unwrap();
        assert_eq!(Config::load(dir.path()), Config::default());
    }

    #[test]
    fn unreadable_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be fails with something other
        // than NotFound.
        fs::create_dir(dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(Config::load(dir.path()), Config::default());
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{"first_alert_secs": 120}"#).unwrap();

        let config = Config::load(dir.path());
        assert_eq!(config.timeout_policy().first_alert, Duration::from_secs(120));
        assert_eq!(config.timeout_policy().final_grace, Duration::from_secs(60));
        assert_eq!(config.check_interval(), Duration::from_secs(60));
    }

    #[test]
    fn save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config { speech_enabled: false, theme: "nord".into(), ..Config::default() };
        config.save(dir.path()).unwrap();
        assert_eq!(Config::load(dir.path()), config);
    }
}
