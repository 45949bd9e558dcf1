//! Settings loaded from `lockplane.toml` and the environment.
//!
//! Values live in the `[lockplane]` section. Environment variables override
//! the file and use the `LOCKPLANE` prefix with `__` separators, for example
//! `LOCKPLANE__LOCKPLANE__STEP_TIMEOUT_SECONDS=10`.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::apply::ApplyOptions;
use crate::plan::PlanOptions;

pub const DEFAULT_CONFIG_FILE: &str = "lockplane.toml";

const SECTION: &str = "lockplane";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LockplaneSettings {
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub shadow_database_url: Option<String>,
    #[serde(default = "default_step_timeout_seconds")]
    pub step_timeout_seconds: u64,
    #[serde(default = "default_lock_timeout_seconds")]
    pub lock_timeout_seconds: u64,
    #[serde(default)]
    pub allow_unsafe: bool,
    #[serde(default)]
    pub unchecked: bool,
}

fn default_step_timeout_seconds() -> u64 {
    30
}

fn default_lock_timeout_seconds() -> u64 {
    60
}

impl Default for LockplaneSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            shadow_database_url: None,
            step_timeout_seconds: default_step_timeout_seconds(),
            lock_timeout_seconds: default_lock_timeout_seconds(),
            allow_unsafe: false,
            unchecked: false,
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix("LOCKPLANE").separator("__").try_parsing(true)
}

impl LockplaneSettings {
    /// Load settings from `lockplane.toml`, falling back to env vars.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_with(path.as_ref(), environment())
    }

    fn load_with(path: &Path, env: Environment) -> Result<Self, ConfigError> {
        let file = File::from(path).required(false);
        let settings = match Config::builder()
            .add_source(file)
            .add_source(env.clone())
            .build()
        {
            Ok(cfg) => cfg,
            Err(err) => {
                if path.exists() {
                    log::warn!(
                        "failed to load {}, falling back to environment: {}",
                        path.display(),
                        err
                    );
                }
                Config::builder().add_source(env).build().map_err(|env_err| {
                    ConfigError::Message(format!(
                        "failed to load configuration from file and env: {err}, then env-only error: {env_err}"
                    ))
                })?
            }
        };

        match settings.get::<LockplaneSettings>(SECTION) {
            Ok(loaded) => Ok(loaded),
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(ConfigError::Message(format!(
                "[{SECTION}] configuration is invalid: {e}"
            ))),
        }
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_seconds)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }

    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            step_timeout: self.step_timeout(),
            lock_timeout: self.lock_timeout(),
            unchecked: self.unchecked,
            ..ApplyOptions::default()
        }
    }

    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            allow_unsafe: self.allow_unsafe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env() -> Environment {
        environment().source(Some(HashMap::new()))
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LockplaneSettings::load_with(&dir.path().join("absent.toml"), no_env()).unwrap();
        assert_eq!(settings, LockplaneSettings::default());
        assert_eq!(settings.apply_options().step_timeout, Duration::from_secs(30));
        assert_eq!(settings.apply_options().lock_timeout, Duration::from_secs(60));
    }

    #[test]
    fn reads_the_lockplane_section() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[lockplane]\n\
             database_url = \"postgres://app:secret@db:5432/app\"\n\
             step_timeout_seconds = 5\n\
             allow_unsafe = true"
        )
        .unwrap();

        let settings = LockplaneSettings::load_with(file.path(), no_env()).unwrap();
        assert_eq!(settings.database_url.as_deref(), Some("postgres://app:secret@db:5432/app"));
        assert_eq!(settings.step_timeout_seconds, 5);
        assert_eq!(settings.lock_timeout_seconds, 60);
        assert!(settings.plan_options().allow_unsafe);
        assert!(!settings.apply_options().unchecked);
    }

    #[test]
    fn environment_overrides_the_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[lockplane]\nlock_timeout_seconds = 10").unwrap();

        let vars = HashMap::from([
            ("LOCKPLANE__LOCKPLANE__LOCK_TIMEOUT_SECONDS".to_string(), "3".to_string()),
            ("LOCKPLANE__LOCKPLANE__UNCHECKED".to_string(), "true".to_string()),
        ]);
        let env = environment().source(Some(vars));
        let settings = LockplaneSettings::load_with(file.path(), env).unwrap();
        assert_eq!(settings.lock_timeout(), Duration::from_secs(3));
        assert!(settings.unchecked);
    }

    #[test]
    fn malformed_values_are_reported() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[lockplane]\nstep_timeout_seconds = \"soon\"").unwrap();
        assert!(LockplaneSettings::load_with(file.path(), no_env()).is_err());
    }
}
