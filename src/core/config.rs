//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{KslError, Result};

/// Largest timeout `poll(2)` accepts.
const MAX_POLL_TIMEOUT_MS: u64 = 2_147_483_647;

/// Full kslim configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub watch: WatchConfig,
    pub inventory: InventoryConfig,
    pub reduce: ReduceConfig,
    pub paths: PathsConfig,
}

/// Kernel watch handle and polling cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchConfig {
    /// Longest single readiness wait while the build runs.
    pub poll_timeout_ms: u64,
    /// Pause between readiness and drain; 0 disables.
    pub grace_delay_ms: u64,
    pub inheritable: bool,
    pub nonblocking: bool,
}

/// What the inventory scan leaves alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InventoryConfig {
    /// Entry names skipped at any depth.
    pub excluded_names: Vec<String>,
    /// Root-relative paths skipped with everything below them.
    pub excluded_paths: Vec<String>,
    /// The build driver script, kept whether or not the build opens it.
    pub build_driver: Option<String>,
    /// Regexes over the `/`-separated relative path.
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReduceConfig {
    pub dry_run: bool,
    pub prune_empty_dirs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// JSONL journal of reduction runs; disabled when unset.
    pub journal_file: Option<PathBuf>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1_000,
            grace_delay_ms: 100,
            inheritable: false,
            nonblocking: true,
        }
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            excluded_names: vec![".git".to_string()],
            excluded_paths: vec![
                ".github".to_string(),
                ".gitlab-ci.yml".to_string(),
                "toolchains".to_string(),
                "out".to_string(),
            ],
            build_driver: None,
            exclude_patterns: Vec::new(),
        }
    }
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            prune_empty_dirs: true,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!("[KSL-CONFIG] WARNING: HOME not set, falling back to /tmp");
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        Self {
            config_file: home_dir.join(".config").join("kslim").join("config.toml"),
            journal_file: None,
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, env_var)
    }

    fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|e| KslError::io(&path_buf, e))?;
            toml::from_str::<Self>(&raw)?
        } else if path.is_some() {
            return Err(KslError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(lookup)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the journal.
    ///
    /// FNV-1a over canonical JSON, so the value is stable across processes
    /// and toolchain releases.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // watch
        if let Some(raw) = lookup("KSL_WATCH_POLL_TIMEOUT_MS") {
            self.watch.poll_timeout_ms = parse_env_u64("KSL_WATCH_POLL_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("KSL_WATCH_GRACE_DELAY_MS") {
            self.watch.grace_delay_ms = parse_env_u64("KSL_WATCH_GRACE_DELAY_MS", &raw)?;
        }
        if let Some(raw) = lookup("KSL_WATCH_INHERITABLE") {
            self.watch.inheritable = parse_env_bool("KSL_WATCH_INHERITABLE", &raw)?;
        }
        if let Some(raw) = lookup("KSL_WATCH_NONBLOCKING") {
            self.watch.nonblocking = parse_env_bool("KSL_WATCH_NONBLOCKING", &raw)?;
        }

        // inventory
        if let Some(raw) = lookup("KSL_INVENTORY_BUILD_DRIVER") {
            self.inventory.build_driver = Some(raw);
        }
        if let Some(raw) = lookup("KSL_INVENTORY_EXCLUDED_PATHS") {
            self.inventory.excluded_paths = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }

        // reduce
        if let Some(raw) = lookup("KSL_REDUCE_DRY_RUN") {
            self.reduce.dry_run = parse_env_bool("KSL_REDUCE_DRY_RUN", &raw)?;
        }
        if let Some(raw) = lookup("KSL_REDUCE_PRUNE_EMPTY_DIRS") {
            self.reduce.prune_empty_dirs = parse_env_bool("KSL_REDUCE_PRUNE_EMPTY_DIRS", &raw)?;
        }

        // paths
        if let Some(raw) = lookup("KSL_JOURNAL_FILE") {
            self.paths.journal_file = Some(PathBuf::from(raw));
        }

        Ok(())
    }

    /// `./drivers/` and `drivers` name the same exclusion. Call again after
    /// merging exclusions from outside the file.
    pub fn normalize_paths(&mut self) {
        for path in &mut self.inventory.excluded_paths {
            let trimmed = path.trim_start_matches("./").trim_end_matches('/');
            *path = trimmed.to_string();
        }
        if let Some(driver) = &mut self.inventory.build_driver {
            *driver = driver.trim_start_matches("./").to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.watch.poll_timeout_ms == 0 {
            return Err(KslError::InvalidConfig {
                details: "watch.poll_timeout_ms must be > 0; a zero timeout busy-spins".to_string(),
            });
        }
        if self.watch.poll_timeout_ms > MAX_POLL_TIMEOUT_MS {
            return Err(KslError::InvalidConfig {
                details: format!(
                    "watch.poll_timeout_ms must be <= {MAX_POLL_TIMEOUT_MS}, got {}",
                    self.watch.poll_timeout_ms
                ),
            });
        }
        if self.watch.grace_delay_ms >= self.watch.poll_timeout_ms {
            return Err(KslError::InvalidConfig {
                details: format!(
                    "watch.grace_delay_ms ({}) must be below watch.poll_timeout_ms ({})",
                    self.watch.grace_delay_ms, self.watch.poll_timeout_ms
                ),
            });
        }

        for name in &self.inventory.excluded_names {
            if name.is_empty() || name.contains('/') {
                return Err(KslError::InvalidConfig {
                    details: format!("inventory.excluded_names entry {name:?} must be a single path component"),
                });
            }
        }
        let relative = self
            .inventory
            .excluded_paths
            .iter()
            .chain(self.inventory.build_driver.as_ref());
        for path in relative {
            validate_relative("inventory path", path)?;
        }
        for pattern in &self.inventory.exclude_patterns {
            regex::Regex::new(pattern).map_err(|e| KslError::InvalidConfig {
                details: format!("inventory.exclude_patterns entry {pattern:?}: {e}"),
            })?;
        }

        if let Some(journal) = &self.paths.journal_file
            && journal.as_os_str().is_empty()
        {
            return Err(KslError::InvalidConfig {
                details: "paths.journal_file must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Exclusions are relative to the tree root and may not escape it.
fn validate_relative(what: &str, raw: &str) -> Result<()> {
    let path = Path::new(raw);
    if raw.is_empty() || path.is_absolute() {
        return Err(KslError::InvalidConfig {
            details: format!("{what} {raw:?} must be a non-empty relative path"),
        });
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(KslError::InvalidConfig {
            details: format!("{what} {raw:?} must not contain '..'"),
        });
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|error| KslError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.trim().parse::<bool>().map_err(|error| KslError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{Config, KslError};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.watch.poll_timeout_ms, 1_000);
        assert_eq!(cfg.inventory.excluded_names, vec![".git".to_string()]);
    }

    #[test]
    fn zero_poll_timeout_rejected() {
        let mut cfg = Config::default();
        cfg.watch.poll_timeout_ms = 0;
        cfg.watch.grace_delay_ms = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("poll_timeout_ms"));
    }

    #[test]
    fn grace_must_stay_below_poll_timeout() {
        let mut cfg = Config::default();
        cfg.watch.grace_delay_ms = cfg.watch.poll_timeout_ms;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("grace_delay_ms"));
    }

    #[test]
    fn absolute_or_escaping_exclusions_rejected() {
        let mut cfg = Config::default();
        cfg.inventory.excluded_paths = vec!["/usr/src".to_string()];
        assert!(cfg.validate().is_err());

        cfg.inventory.excluded_paths = vec!["../sibling".to_string()];
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains(".."));
    }

    #[test]
    fn invalid_pattern_rejected() {
        let mut cfg = Config::default();
        cfg.inventory.exclude_patterns = vec!["[unclosed".to_string()];
        assert_eq!(cfg.validate().unwrap_err().code(), "KSL-1001");
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let env = vars(&[
            ("KSL_WATCH_POLL_TIMEOUT_MS", "250"),
            ("KSL_WATCH_GRACE_DELAY_MS", "0"),
            ("KSL_INVENTORY_EXCLUDED_PATHS", "out, prebuilts ,"),
            ("KSL_INVENTORY_BUILD_DRIVER", "build.sh"),
            ("KSL_REDUCE_DRY_RUN", "true"),
            ("KSL_JOURNAL_FILE", "/tmp/kslim.jsonl"),
        ]);
        let mut cfg = Config::default();
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
            .unwrap();

        assert_eq!(cfg.watch.poll_timeout_ms, 250);
        assert_eq!(cfg.watch.grace_delay_ms, 0);
        assert_eq!(
            cfg.inventory.excluded_paths,
            vec!["out".to_string(), "prebuilts".to_string()]
        );
        assert_eq!(cfg.inventory.build_driver.as_deref(), Some("build.sh"));
        assert!(cfg.reduce.dry_run);
        assert_eq!(
            cfg.paths.journal_file,
            Some(PathBuf::from("/tmp/kslim.jsonl"))
        );
    }

    #[test]
    fn env_invalid_boolean_rejected() {
        let env = vars(&[("KSL_REDUCE_DRY_RUN", "maybe")]);
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_overrides_from(|name| env.get(name).cloned())
            .unwrap_err();
        assert!(matches!(err, KslError::ConfigParse { context: "env", .. }));
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/kslim/config.toml")));
        assert!(matches!(result, Err(KslError::MissingConfig { .. })));
    }

    #[test]
    fn load_reads_toml_and_normalizes_exclusions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[watch]
grace_delay_ms = 50

[inventory]
excluded_paths = ["./out/", "toolchains"]
build_driver = "./build.sh"
"#,
        )
        .unwrap();

        let cfg = Config::load_with(Some(&path), |_| None).unwrap();
        assert_eq!(cfg.watch.grace_delay_ms, 50);
        assert_eq!(cfg.watch.poll_timeout_ms, 1_000, "unset keys keep defaults");
        assert_eq!(
            cfg.inventory.excluded_paths,
            vec!["out".to_string(), "toolchains".to_string()]
        );
        assert_eq!(cfg.inventory.build_driver.as_deref(), Some("build.sh"));
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn exclusions_merged_after_load_are_normalized_again() {
        let mut cfg = Config::default();
        cfg.inventory.excluded_paths.push("./scripts/".to_string());
        cfg.normalize_paths();
        assert!(cfg.inventory.excluded_paths.contains(&"scripts".to_string()));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[watch\npoll_timeout_ms = 1").unwrap();
        let err = Config::load_with(Some(&path), |_| None).unwrap_err();
        assert_eq!(err.code(), "KSL-1003");
    }

    #[test]
    fn stable_hash_tracks_changes() {
        let cfg = Config::default();
        let h1 = cfg.stable_hash().expect("hash");
        assert_eq!(h1, cfg.stable_hash().expect("hash"));

        let mut changed = cfg;
        changed.reduce.dry_run = true;
        assert_ne!(h1, changed.stable_hash().expect("hash"));
    }
}
