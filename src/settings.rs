//! Run settings: what the camera should do, edited remotely from the dashboard.
//!
//! Stored as `settings.yaml` in the data directory and mirrored to the remote
//! store. Missing keys take their defaults and unknown keys are ignored, so a
//! file written by an older or newer dashboard still loads.

use std::{fs, io, path::Path};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::model::{MINUTES_PER_DAY, ScheduleEvent, SchedulePlan};
use crate::store::{RemoteStore, StoreError};

/// File name used both locally and on the remote store.
pub const SETTINGS_FILE: &str = "settings.yaml";

/// Errors that can occur while loading, validating, or syncing settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = core::result::Result<T, SettingsError>;

/// Per-run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Display name shown on the dashboard.
    pub camera_name: String,

    pub location_name: String,

    /// Manual lens position; `-1` means autofocus.
    pub lens_position: f64,

    pub interval_minutes: u32,

    #[serde(rename = "repetitionsPerday")]
    pub repetitions_per_day: u32,

    pub start_time_hour: u8,

    pub start_time_minute: u8,

    /// How long the board keeps the camera powered after each wake.
    pub max_duration_minute: u32,

    pub enable_sunrise_sunset: bool,

    #[serde(rename = "enableGPS")]
    pub enable_gps: bool,

    pub time_sync: bool,

    pub shutdown: bool,

    /// Volts. The board cuts power below this.
    pub low_voltage_threshold: f64,

    /// Volts. The board restores power above this. Never below the low threshold.
    pub recovery_voltage_threshold: f64,

    /// Volts. Battery voltage at half charge; the power policy starts saving below it.
    pub battery_voltage_half: f64,

    /// Decimal degrees; `0` means unset.
    pub latitude: f64,

    /// Decimal degrees; `0` means unset.
    pub longitude: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            camera_name: "fieldcam".to_string(),
            location_name: String::new(),
            lens_position: -1.0,
            interval_minutes: 30,
            repetitions_per_day: 8,
            start_time_hour: 8,
            start_time_minute: 0,
            max_duration_minute: 3,
            enable_sunrise_sunset: false,
            enable_gps: false,
            time_sync: false,
            shutdown: true,
            low_voltage_threshold: 3.0,
            recovery_voltage_threshold: 3.2,
            battery_voltage_half: 3.7,
            latitude: 0.0,
            longitude: 0.0,
        }
    }
}

impl Settings {
    /// Parse and validate settings from YAML text.
    pub fn parse(yaml: &str) -> Result<Self> {
        let settings: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path)?;
        Self::parse(&yaml)
    }

    /// Load settings, degrading to defaults when the file is missing or bad.
    ///
    /// Returns the failure alongside the defaults so the caller can record it.
    pub fn load_or_default(path: &Path) -> (Self, Option<SettingsError>) {
        match Self::load(path) {
            Ok(settings) => (settings, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    /// Write settings to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check the invariants the scheduler relies on.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(SettingsError::Invalid(msg));

        if self.interval_minutes == 0 {
            return invalid("intervalMinutes must be at least 1".to_string());
        }
        if self.repetitions_per_day == 0 {
            return invalid("repetitionsPerday must be at least 1".to_string());
        }
        if u64::from(self.interval_minutes) * u64::from(self.repetitions_per_day)
            > u64::from(MINUTES_PER_DAY)
        {
            return invalid(format!(
                "{} repetitions every {} minutes exceed one day",
                self.repetitions_per_day, self.interval_minutes
            ));
        }
        if self.start_time_hour > 23 || self.start_time_minute > 59 {
            return invalid(format!(
                "start time {}:{} is not a time of day",
                self.start_time_hour, self.start_time_minute
            ));
        }
        if self.recovery_voltage_threshold < self.low_voltage_threshold {
            return invalid(format!(
                "recoveryVoltageThreshold {} is below lowVoltageThreshold {}",
                self.recovery_voltage_threshold, self.low_voltage_threshold
            ));
        }
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude)
        {
            return invalid(format!(
                "position {}, {} is out of range",
                self.latitude, self.longitude
            ));
        }
        Ok(())
    }

    /// Whether both coordinates are set.
    pub fn has_location(&self) -> bool {
        self.latitude != 0.0 && self.longitude != 0.0
    }

    /// The schedule as configured, before any solar or power adjustment.
    pub fn static_plan(&self) -> SchedulePlan {
        SchedulePlan {
            start: ScheduleEvent::new(self.start_time_hour, self.start_time_minute),
            interval_minutes: self.interval_minutes,
            repetitions: self.repetitions_per_day,
        }
    }
}

/// What [`sync`] did to bring the local and remote copies together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// The remote copy was newer and replaced the local one.
    Downloaded,

    /// The remote store had no copy; the local one was uploaded.
    Uploaded,

    UpToDate,
}

/// Synchronise the local settings file with the remote store.
///
/// A remote copy newer than the local one wins, but only if it parses and
/// validates; a bad remote copy never replaces a good local one. When the
/// remote has no copy, the local one (or the defaults) is uploaded.
pub fn sync(local: &Path, store: &mut dyn RemoteStore) -> Result<SyncAction> {
    if !store.exists(SETTINGS_FILE)? {
        let yaml = match fs::read_to_string(local) {
            Ok(yaml) => yaml,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Settings::default().to_yaml()?,
            Err(e) => return Err(e.into()),
        };
        store.upload_file(SETTINGS_FILE, yaml.as_bytes())?;
        return Ok(SyncAction::Uploaded);
    }

    let remote_modified = store.last_modified(SETTINGS_FILE)?;
    if local_modified(local).is_some_and(|l| l >= remote_modified) {
        return Ok(SyncAction::UpToDate);
    }

    let bytes = store.download_file(SETTINGS_FILE)?;
    let yaml = String::from_utf8_lossy(&bytes);
    Settings::parse(&yaml)?;
    if let Some(parent) = local.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(local, yaml.as_bytes())?;
    Ok(SyncAction::Downloaded)
}

fn local_modified(path: &Path) -> Option<Timestamp> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Timestamp::try_from(modified).ok()
}

/// Save settings locally and, when reachable, to the remote store.
pub fn publish(
    settings: &Settings,
    local: &Path,
    store: Option<&mut dyn RemoteStore>,
) -> Result<()> {
    let yaml = settings.to_yaml()?;
    fs::write(local, &yaml)?;
    if let Some(store) = store {
        store.upload_file(SETTINGS_FILE, yaml.as_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs::File;
    use std::time::{Duration, SystemTime};

    use tempfile::TempDir;

    use crate::store::DirectoryStore;

    /// A local data dir and a store root, side by side.
    fn test_dirs() -> (TempDir, std::path::PathBuf, DirectoryStore) {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("data")).unwrap();
        fs::create_dir(dir.path().join("remote")).unwrap();
        let local = dir.path().join("data").join(SETTINGS_FILE);
        let store = DirectoryStore::open(dir.path().join("remote")).unwrap();
        (dir, local, store)
    }

    fn age(path: &Path, seconds: u64) {
        let then = SystemTime::now() - Duration::from_secs(seconds);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(then)
            .unwrap();
    }

    #[test]
    fn missing_keys_take_defaults() {
        let settings = Settings::parse("intervalMinutes: 10\nrepetitionsPerday: 12\n").unwrap();

        assert_eq!(settings.interval_minutes, 10);
        assert_eq!(settings.repetitions_per_day, 12);
        assert_eq!(settings.start_time_hour, 8);
        assert!((settings.lens_position - -1.0).abs() < f64::EPSILON);
        assert!(settings.shutdown);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let settings = Settings::parse("uploadWittyPiDiagnostics: true\nenableGPS: true\n").unwrap();
        assert!(settings.enable_gps);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(Settings::parse("").unwrap(), Settings::default());
    }

    #[test]
    fn rejects_schedule_longer_than_a_day() {
        let err = Settings::parse("intervalMinutes: 60\nrepetitionsPerday: 25\n").unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_interval() {
        let err = Settings::parse("intervalMinutes: 0\n").unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn rejects_recovery_below_low_threshold() {
        let err =
            Settings::parse("lowVoltageThreshold: 3.4\nrecoveryVoltageThreshold: 3.1\n").unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn rejects_negative_interval_as_yaml_error() {
        let err = Settings::parse("intervalMinutes: -5\n").unwrap_err();
        assert!(matches!(err, SettingsError::Yaml(_)));
    }

    #[test]
    fn load_or_default_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        let (settings, err) = Settings::load_or_default(&dir.path().join(SETTINGS_FILE));

        assert_eq!(settings, Settings::default());
        assert!(matches!(err, Some(SettingsError::Io(_))));
    }

    #[test]
    fn save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        let settings = Settings {
            latitude: 46.5,
            longitude: 7.9,
            enable_sunrise_sunset: true,
            ..Settings::default()
        };

        settings.save(&path).unwrap();
        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);

        let yaml = fs::read_to_string(&path).unwrap();
        assert!(yaml.contains("repetitionsPerday:"));
        assert!(yaml.contains("enableGPS:"));
    }

    #[test]
    fn location_requires_both_coordinates() {
        let mut settings = Settings {
            latitude: 46.5,
            ..Settings::default()
        };
        assert!(!settings.has_location());

        settings.longitude = 7.9;
        assert!(settings.has_location());
    }

    #[test]
    fn static_plan_reflects_settings() {
        let settings = Settings {
            start_time_hour: 6,
            start_time_minute: 15,
            interval_minutes: 45,
            repetitions_per_day: 4,
            ..Settings::default()
        };
        let plan = settings.static_plan();

        assert_eq!(plan.start, ScheduleEvent::new(6, 15));
        assert_eq!(plan.interval_minutes, 45);
        assert_eq!(plan.repetitions, 4);
    }

    #[test]
    fn sync_uploads_when_remote_has_none() {
        let (dir, local, mut store) = test_dirs();
        fs::write(&local, "intervalMinutes: 15\n").unwrap();

        assert_eq!(sync(&local, &mut store).unwrap(), SyncAction::Uploaded);
        let remote = fs::read_to_string(dir.path().join("remote").join(SETTINGS_FILE)).unwrap();
        assert_eq!(remote, "intervalMinutes: 15\n");
    }

    #[test]
    fn sync_uploads_defaults_without_any_copy() {
        let (_dir, local, mut store) = test_dirs();

        assert_eq!(sync(&local, &mut store).unwrap(), SyncAction::Uploaded);
        let yaml = store.download_file(SETTINGS_FILE).unwrap();
        let uploaded = Settings::parse(&String::from_utf8(yaml).unwrap()).unwrap();
        assert_eq!(uploaded, Settings::default());
    }

    #[test]
    fn sync_downloads_newer_remote() {
        let (_dir, local, mut store) = test_dirs();
        fs::write(&local, "intervalMinutes: 15\n").unwrap();
        age(&local, 3600);
        store.upload_file(SETTINGS_FILE, b"intervalMinutes: 45\n").unwrap();

        assert_eq!(sync(&local, &mut store).unwrap(), SyncAction::Downloaded);
        assert_eq!(Settings::load(&local).unwrap().interval_minutes, 45);
    }

    #[test]
    fn sync_keeps_newer_local() {
        let (dir, local, mut store) = test_dirs();
        store.upload_file(SETTINGS_FILE, b"intervalMinutes: 45\n").unwrap();
        age(&dir.path().join("remote").join(SETTINGS_FILE), 3600);
        fs::write(&local, "intervalMinutes: 15\n").unwrap();

        assert_eq!(sync(&local, &mut store).unwrap(), SyncAction::UpToDate);
        assert_eq!(Settings::load(&local).unwrap().interval_minutes, 15);
    }

    #[test]
    fn sync_rejects_invalid_remote() {
        let (_dir, local, mut store) = test_dirs();
        fs::write(&local, "intervalMinutes: 15\n").unwrap();
        age(&local, 3600);
        store.upload_file(SETTINGS_FILE, b"intervalMinutes: 0\n").unwrap();

        let err = sync(&local, &mut store).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
        assert_eq!(Settings::load(&local).unwrap().interval_minutes, 15);
    }

    #[test]
    fn publish_writes_both_copies() {
        let (_dir, local, mut store) = test_dirs();
        let settings = Settings {
            latitude: 46.5,
            longitude: 7.9,
            ..Settings::default()
        };

        publish(&settings, &local, Some(&mut store)).unwrap();

        assert_eq!(Settings::load(&local).unwrap(), settings);
        let remote = store.download_file(SETTINGS_FILE).unwrap();
        assert_eq!(
            Settings::parse(&String::from_utf8(remote).unwrap()).unwrap(),
            settings
        );
    }
}
