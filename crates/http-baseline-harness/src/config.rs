use std::path::PathBuf;

pub const REBASELINE_ENV: &str = "REBASELINE";
pub const REGENERATE_SEED_ENV: &str = "REGENERATE_SEED";
pub const DEFAULT_BASELINE_DIR: &str = "testdata";

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum BaselineMode {
    /// Compare against recorded golden files.
    #[default]
    Compare,
    /// Overwrite golden files with the current output.
    Rebaseline,
}

/// How a [`crate::Suite`] treats golden files. Built once at the entry point
/// and passed down; nothing below reads the environment.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SuiteConfig {
    pub baseline_dir: PathBuf,
    pub mode: BaselineMode,
    pub regenerate_seed: bool,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            baseline_dir: PathBuf::from(DEFAULT_BASELINE_DIR),
            mode: BaselineMode::Compare,
            regenerate_seed: false,
        }
    }
}

impl SuiteConfig {
    /// Defaults plus `REBASELINE` / `REGENERATE_SEED`; any non-empty value enables them.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = |key: &str| lookup(key).is_some_and(|value| !value.is_empty());
        let mode = if enabled(REBASELINE_ENV) { BaselineMode::Rebaseline } else { BaselineMode::Compare };
        Self { mode, regenerate_seed: enabled(REGENERATE_SEED_ENV), ..Self::default() }
    }

    #[must_use]
    pub fn with_baseline_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.baseline_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: BaselineMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_regenerate_seed(mut self, regenerate_seed: bool) -> Self {
        self.regenerate_seed = regenerate_seed;
        self
    }

    #[must_use]
    pub fn rebaseline(&self) -> bool {
        self.mode == BaselineMode::Rebaseline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_environment_compares_against_testdata() {
        let config = SuiteConfig::from_lookup(|_| None);
        assert_eq!(config, SuiteConfig::default());
        assert!(!config.rebaseline());
    }

    #[test]
    fn non_empty_values_enable_modes() {
        let config = SuiteConfig::from_lookup(|key| match key {
            REBASELINE_ENV => Some("1".to_string()),
            REGENERATE_SEED_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.mode, BaselineMode::Rebaseline);
        assert!(!config.regenerate_seed);
    }

    #[test]
    fn builders_override_fields() {
        let config = SuiteConfig::default()
            .with_baseline_dir("golden")
            .with_mode(BaselineMode::Rebaseline)
            .with_regenerate_seed(true);
        assert_eq!(config.baseline_dir, PathBuf::from("golden"));
        assert!(config.rebaseline());
        assert!(config.regenerate_seed);
    }
}
