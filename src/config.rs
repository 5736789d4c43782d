use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app_dirs::AppDirs;
use crate::game::GameRules;
use crate::gaze::DEFAULT_WARMUP_MS;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub session_secs: u32,
    pub dwell_required_ms: u64,
    pub bonus_chance: f64,
    pub warmup_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let rules = GameRules::default();
        Self {
            session_secs: rules.session_secs,
            dwell_required_ms: rules.dwell_required_ms as u64,
            bonus_chance: rules.bonus_chance,
            warmup_ms: DEFAULT_WARMUP_MS,
        }
    }
}

impl From<&Config> for GameRules {
    fn from(cfg: &Config) -> Self {
        Self {
            session_secs: cfg.session_secs.max(1),
            dwell_required_ms: cfg.dwell_required_ms as f64,
            bonus_chance: cfg.bonus_chance.clamp(0.0, 1.0),
            ..GameRules::default()
        }
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new() -> Self {
        let path = AppDirs::config_path().unwrap_or_else(|| PathBuf::from("eyecatch_config.json"));
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        if let Ok(bytes) = fs::read(&self.path) {
            if let Ok(cfg) = serde_json::from_slice::<Config>(&bytes) {
                return cfg;
            }
            tracing::warn!(path = %self.path.display(), "unreadable config, using defaults");
        }
        Config::default()
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg).map_err(std::io::Error::from)?;
        fs::write(&self.path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_store_uses_the_standard_location() {
        assert_eq!(FileConfigStore::default().path(), FileConfigStore::new().path());
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config::default();
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn save_and_load_custom_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config {
            session_secs: 30,
            dwell_required_ms: 1500,
            bonus_chance: 0.25,
            warmup_ms: 0,
        };
        store.save(&cfg).unwrap();
        assert_eq!(store.load(), cfg);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, br#"{ "session_secs": 90 }"#).unwrap();
        let cfg = FileConfigStore::with_path(&path).load();
        assert_eq!(cfg.session_secs, 90);
        assert_eq!(cfg.dwell_required_ms, 2000);
    }

    #[test]
    fn garbage_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, b"not json").unwrap();
        assert_eq!(FileConfigStore::with_path(&path).load(), Config::default());
    }

    #[test]
    fn rules_follow_config() {
        let cfg = Config {
            session_secs: 0,
            dwell_required_ms: 1200,
            bonus_chance: 3.0,
            warmup_ms: 0,
        };
        let rules = GameRules::from(&cfg);
        assert_eq!(rules.session_secs, 1);
        assert_eq!(rules.dwell_required_ms, 1200.0);
        assert_eq!(rules.bonus_chance, 1.0);
        assert_eq!(rules.evaluate_interval_ms, 100);
    }
}
