use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::coalesce::DEFAULT_WINDOW;
use crate::error::TallyError;
use crate::registry::{StateType, TypeRegistry};

/// Config file location relative to a project root.
pub const CONFIG_PATH: &str = ".tally/config.toml";

/// Environment variable overriding `coalesce.window_ms`.
pub const COALESCE_ENV: &str = "TALLY_COALESCE_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TallyConfig {
    #[serde(default)]
    pub coalesce: CoalesceConfig,
    /// State names registered up front, `name = "scalar" | "set"`.
    #[serde(default)]
    pub states: BTreeMap<String, StateType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoalesceConfig {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
        }
    }
}

fn default_window_ms() -> u64 {
    u64::try_from(DEFAULT_WINDOW.as_millis()).unwrap_or(100)
}

impl TallyConfig {
    #[must_use]
    pub const fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce.window_ms)
    }

    /// Register every configured state in `registry`.
    ///
    /// # Errors
    ///
    /// [`TallyError::ConflictingType`] if `registry` already holds one of
    /// the names with another type.
    pub fn register_states(&self, registry: &mut TypeRegistry) -> Result<(), TallyError> {
        for (name, state_type) in &self.states {
            registry.register_state(name, *state_type)?;
        }
        Ok(())
    }

    /// Apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if `TALLY_COALESCE_MS` is set but not an integer.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(raw) = env::var(COALESCE_ENV) {
            self.coalesce.window_ms = parse_window_ms(&raw)?;
        }
        Ok(())
    }
}

fn parse_window_ms(raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .with_context(|| format!("{COALESCE_ENV} must be a whole number of milliseconds, got {raw:?}"))
}

/// Load `.tally/config.toml` under `project_root`.
///
/// A missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(project_root: &Path) -> Result<TallyConfig> {
    let path = project_root.join(CONFIG_PATH);
    if !path.exists() {
        return Ok(TallyConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<TallyConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// [`load_config`] followed by [`TallyConfig::apply_env`].
///
/// # Errors
///
/// As for [`load_config`] and [`TallyConfig::apply_env`].
pub fn load_effective_config(project_root: &Path) -> Result<TallyConfig> {
    let mut config = load_config(project_root)?;
    config.apply_env()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) {
        let tally = dir.path().join(".tally");
        std::fs::create_dir_all(&tally).expect("mkdir");
        std::fs::write(tally.join("config.toml"), body).expect("write");
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let config = load_config(dir.path()).expect("load");
        assert_eq!(config, TallyConfig::default());
        assert_eq!(config.coalesce_window(), Duration::from_millis(100));
    }

    #[test]
    fn parses_window_and_states() {
        let dir = TempDir::new().expect("tempdir");
        write_config(
            &dir,
            r#"
[coalesce]
window_ms = 250

[states]
click-count = "scalar"
selection = "set"
"#,
        );
        let config = load_config(dir.path()).expect("load");
        assert_eq!(config.coalesce.window_ms, 250);
        assert_eq!(config.states["selection"], StateType::Set);

        let mut registry = TypeRegistry::new();
        config.register_states(&mut registry).expect("register");
        assert_eq!(
            registry.type_of("click-count").expect("registered"),
            StateType::Scalar
        );
    }

    #[test]
    fn unknown_state_type_fails_with_path_context() {
        let dir = TempDir::new().expect("tempdir");
        write_config(&dir, "[states]\nvotes = \"counter\"\n");
        let err = load_config(dir.path()).expect_err("bad type");
        assert!(format!("{err:#}").contains("config.toml"));
    }

    #[test]
    fn window_override_parsing() {
        assert_eq!(parse_window_ms(" 40 ").expect("ok"), 40);
        assert!(parse_window_ms("soon").is_err());
    }
}
