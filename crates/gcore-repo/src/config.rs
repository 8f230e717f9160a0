//! Repository configuration stored as TOML in `$GIT_DIR/gcore.toml`.
//!
//! ```toml
//! [core]
//! bare = false
//! log_all_ref_updates = true
//!
//! [cache]
//! buckets = 4096
//!
//! [user]
//! name = "Ada"
//! email = "ada@example.com"
//! ```
//!
//! Every key is optional; missing keys take their defaults.

use std::path::{Path, PathBuf};

use gcore_pack::DEFAULT_MAX_DELTA_DEPTH;
use gcore_refs::{DEFAULT_MAX_NESTING, MAX_NESTING};
use gcore_store::{DEFAULT_CACHE_BUCKETS, MIN_CACHE_BUCKETS};
use gcore_types::IoResultExt;
use serde::{Deserialize, Serialize};

use crate::error::{RepoError, RepoResult};

pub const CONFIG_FILE: &str = "gcore.toml";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    pub core: CoreConfig,
    pub cache: CacheConfig,
    pub odb: OdbConfig,
    pub refs: RefsConfig,
    pub attr: AttrConfig,
    pub user: UserConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub bare: bool,
    pub attributes_file: Option<PathBuf>,
    pub excludes_file: Option<PathBuf>,
    pub log_all_ref_updates: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            bare: false,
            attributes_file: None,
            excludes_file: None,
            log_all_ref_updates: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub buckets: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buckets: DEFAULT_CACHE_BUCKETS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdbConfig {
    pub max_delta_depth: usize,
}

impl Default for OdbConfig {
    fn default() -> Self {
        Self {
            max_delta_depth: DEFAULT_MAX_DELTA_DEPTH,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefsConfig {
    pub max_nesting: usize,
}

impl Default for RefsConfig {
    fn default() -> Self {
        Self {
            max_nesting: DEFAULT_MAX_NESTING,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttrConfig {
    pub system_file: Option<PathBuf>,
}

/// Identity recorded in reflog entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub name: String,
    pub email: String,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            name: "unknown".into(),
            email: "unknown".into(),
        }
    }
}

impl RepoConfig {
    /// Read `gcore.toml` from `git_dir`, or the defaults if there is none.
    pub fn load(git_dir: &Path) -> RepoResult<Self> {
        let path = git_dir.join(CONFIG_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(gcore_types::IoError::new(path, e).into()),
        };
        let config = Self::parse(&text).map_err(|e| match e {
            RepoError::ConfigParse { source, .. } => RepoError::ConfigParse {
                path: path.clone(),
                source,
            },
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "loaded repository config");
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn parse(text: &str) -> RepoResult<Self> {
        let config: Self = toml::from_str(text).map_err(|source| RepoError::ConfigParse {
            path: PathBuf::from(CONFIG_FILE),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> RepoResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write this config to `git_dir/gcore.toml`.
    pub fn save(&self, git_dir: &Path) -> RepoResult<()> {
        self.validate()?;
        let path = git_dir.join(CONFIG_FILE);
        std::fs::write(&path, self.to_toml()?).with_path(&path)?;
        Ok(())
    }

    pub fn validate(&self) -> RepoResult<()> {
        let buckets = self.cache.buckets;
        if buckets < MIN_CACHE_BUCKETS || !buckets.is_power_of_two() {
            return Err(RepoError::Config(format!(
                "cache.buckets must be a power of two >= {MIN_CACHE_BUCKETS}, got {buckets}"
            )));
        }
        if self.refs.max_nesting > MAX_NESTING {
            return Err(RepoError::Config(format!(
                "refs.max_nesting must be at most {MAX_NESTING}, got {}",
                self.refs.max_nesting
            )));
        }
        if self.odb.max_delta_depth == 0 {
            return Err(RepoError::Config("odb.max_delta_depth must be positive".into()));
        }
        if self.user.name.trim().is_empty() || self.user.email.trim().is_empty() {
            return Err(RepoError::Config("user.name and user.email must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcore_types::ErrorCode;

    #[test]
    fn default_config() {
        let c = RepoConfig::default();
        assert!(!c.core.bare);
        assert!(c.core.log_all_ref_updates);
        assert!(c.cache.enabled);
        assert_eq!(c.cache.buckets, 4096);
        assert_eq!(c.odb.max_delta_depth, 50);
        assert_eq!(c.refs.max_nesting, 5);
        assert_eq!(c.user.name, "unknown");
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let c = RepoConfig::parse("[refs]\nmax_nesting = 8\n[user]\nname = \"Ada\"\n").unwrap();
        assert_eq!(c.refs.max_nesting, 8);
        assert_eq!(c.user.name, "Ada");
        assert_eq!(c.user.email, "unknown");
        assert_eq!(c.cache.buckets, 4096);
    }

    #[test]
    fn rejects_bad_values() {
        for text in [
            "[cache]\nbuckets = 100\n",
            "[cache]\nbuckets = 4\n",
            "[refs]\nmax_nesting = 11\n",
            "[odb]\nmax_delta_depth = 0\n",
        ] {
            let err = RepoConfig::parse(text).unwrap_err();
            assert_eq!(err.code(), ErrorCode::Invalid, "{text}");
        }
    }

    #[test]
    fn malformed_toml_is_corrupted() {
        let err = RepoConfig::parse("[core\nbare = ").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Corrupted);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = RepoConfig::default();
        c.core.bare = true;
        c.core.excludes_file = Some(PathBuf::from("/etc/gcore/ignore"));
        c.cache.buckets = 64;
        c.save(dir.path()).unwrap();
        assert_eq!(RepoConfig::load(dir.path()).unwrap(), c);
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(RepoConfig::load(dir.path()).unwrap(), RepoConfig::default());
    }
}
