use crate::{apply::ApplyOptions, appointment::AppointmentFilter};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

// Settings for a reconciliation run. Anything left out of the file takes its default, and
// command line flags override the file.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// RON snapshot holding schedules and appointments.
    pub store: PathBuf,
    /// Where `check` writes the incorrect-appointment report and `apply` reads it.
    pub report: PathBuf,
    pub max_write_attempts: usize,
    pub retry_delay_ms: u64,
    /// Only look at this patient (ID number or messaging user id).
    pub patient: Option<String>,
    /// Only look at this vaccine.
    pub vaccine: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: PathBuf::from("appointments.ron"),
            report: PathBuf::from("incorrect_appointments.json"),
            max_write_attempts: 3,
            retry_delay_ms: 200,
            patient: None,
            vaccine: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        ron::from_str(&data).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Load `path` if given, else the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn filter(&self) -> AppointmentFilter {
        AppointmentFilter {
            patient: self.patient.clone(),
            vaccine_type: self.vaccine.clone(),
        }
    }

    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            max_attempts: self.max_write_attempts.max(1),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() -> Result<()> {
        let config: Config = ron::from_str(r#"(store: "/srv/clinic.ron", vaccine: Some("rabies"))"#)?;
        assert_eq!(PathBuf::from("/srv/clinic.ron"), config.store);
        assert_eq!(PathBuf::from("incorrect_appointments.json"), config.report);
        assert_eq!(3, config.max_write_attempts);
        assert_eq!(Some("rabies".to_owned()), config.filter().vaccine_type);
        assert_eq!(None, config.filter().patient);
        Ok(())
    }

    #[test]
    fn test_apply_options_always_try_once() {
        let config = Config {
            max_write_attempts: 0,
            retry_delay_ms: 50,
            ..Config::default()
        };
        let options = config.apply_options();
        assert_eq!(1, options.max_attempts);
        assert_eq!(Duration::from_millis(50), options.retry_delay);
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("reconcile.ron");
        fs::write(&path, "(max_write_attempts: 5)")?;
        assert_eq!(5, Config::load_or_default(Some(&path))?.max_write_attempts);
        assert_eq!(Config::default(), Config::load_or_default(None)?);
        assert!(Config::load(&dir.path().join("missing.ron")).is_err());
        Ok(())
    }
}
