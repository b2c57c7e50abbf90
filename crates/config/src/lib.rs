//! Layered configuration for tarn.
//!
//! Values are merged, later sources winning, from:
//!
//! 1. built-in defaults,
//! 2. a configuration file (TOML, YAML or JSON, chosen by extension),
//! 3. environment variables prefixed with `TARN_`, using `__` to reach nested
//!    keys (`TARN_CACHE__BLOCK_COUNT=16`).
//!
//! Without an explicit path, the file is looked up as `config.toml` in the
//! platform configuration directory and silently skipped when absent.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MEGABYTE: u64 = 1 << 20;

pub const ENV_PREFIX: &str = "TARN_";
pub const DEFAULT_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub limits: LimitsConfig,
    pub fetch: FetchConfig,
    /// Explicit S3 client settings. Absent means the caller supplies its own
    /// store client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Config>,
}

/// Block cache sizing; memory use is `block_size * block_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub block_size: u64,
    pub block_count: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_size: 8 * MEGABYTE,
            block_count: 8,
        }
    }
}

/// Upper bounds on how much of an archive component is read into memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub manifest_bytes: u64,
    pub config_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            manifest_bytes: MEGABYTE,
            config_bytes: 4 * MEGABYTE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Deadline for each block fetch, in seconds. `None` waits indefinitely.
    pub timeout_secs: Option<u64>,
    pub max_concurrent_requests: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Some(60),
            max_concurrent_requests: 100,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub region: String,
    /// Custom endpoint for S3-compatible services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub key_id: String,
    pub key_secret: String,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("key_id", &self.key_id)
            .field("key_secret", &"<redacted>")
            .finish()
    }
}

impl Config {
    /// Path of the configuration file used when none is given explicitly.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "tarn").map(|dirs| dirs.config_dir().join(DEFAULT_FILE_NAME))
    }

    /// Load and validate configuration.
    ///
    /// An explicit `path` must exist; the default path may be missing.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.is_file() => {
                exn::bail!(ErrorKind::Invalid(format!("configuration file not found: {}", path.display())));
            },
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|path| path.is_file()),
        };
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = &file {
            tracing::debug!(path = %file.display(), "Loading configuration file");
            figment = match file.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file_exact(file)),
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(file)),
                Some("json") => figment.merge(Json::file_exact(file)),
                _ => exn::bail!(ErrorKind::Invalid(format!(
                    "unsupported configuration format: {}",
                    file.display()
                ))),
            };
        }
        let config: Self = figment.merge(Env::prefixed(ENV_PREFIX).split("__")).extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the rest of the system can't work with.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("cache.block_size", self.cache.block_size),
            ("cache.block_count", self.cache.block_count),
            ("limits.manifest_bytes", self.limits.manifest_bytes),
            ("limits.config_bytes", self.limits.config_bytes),
            ("fetch.max_concurrent_requests", self.fetch.max_concurrent_requests as u64),
        ];
        for (name, value) in checks {
            if value == 0 {
                exn::bail!(ErrorKind::Invalid(format!("{name} must be greater than zero")));
            }
        }
        if self.fetch.timeout_secs == Some(0) {
            exn::bail!(ErrorKind::Invalid("fetch.timeout_secs must be greater than zero".to_string()));
        }
        if usize::try_from(self.cache.block_size).is_err() {
            exn::bail!(ErrorKind::Invalid(format!("cache.block_size too large: {}", self.cache.block_size)));
        }
        if let Some(s3) = &self.s3
            && s3.region.is_empty()
        {
            exn::bail!(ErrorKind::Invalid("s3.region must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.cache.block_size, 8 * MEGABYTE);
        assert_eq!(config.cache.block_count, 8);
        assert_eq!(config.limits.manifest_bytes, MEGABYTE);
        assert_eq!(config.limits.config_bytes, 4 * MEGABYTE);
        assert_eq!(config.fetch.timeout(), Some(Duration::from_secs(60)));
        assert!(config.s3.is_none());
    }

    #[rstest]
    #[case::block_size(|c: &mut Config| c.cache.block_size = 0, "cache.block_size")]
    #[case::block_count(|c: &mut Config| c.cache.block_count = 0, "cache.block_count")]
    #[case::manifest(|c: &mut Config| c.limits.manifest_bytes = 0, "limits.manifest_bytes")]
    #[case::config_blob(|c: &mut Config| c.limits.config_bytes = 0, "limits.config_bytes")]
    #[case::requests(|c: &mut Config| c.fetch.max_concurrent_requests = 0, "fetch.max_concurrent_requests")]
    #[case::timeout(|c: &mut Config| c.fetch.timeout_secs = Some(0), "fetch.timeout_secs")]
    fn test_validate_rejects_zero(#[case] tweak: fn(&mut Config), #[case] field: &str) {
        let mut config = Config::default();
        tweak(&mut config);
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(msg) if msg.starts_with(field)));
    }

    #[test]
    fn test_load_toml_with_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "tarn.toml",
                r#"
                [cache]
                block_count = 4

                [s3]
                region = "us-west-004"
                endpoint = "https://s3.us-west-004.backblazeb2.com"
                key_id = "id"
                key_secret = "secret"
                "#,
            )?;
            jail.set_env("TARN_CACHE__BLOCK_COUNT", 16);
            jail.set_env("TARN_LIMITS__MANIFEST_BYTES", 2048);
            let config = Config::load(Some(Path::new("tarn.toml"))).unwrap();
            assert_eq!(config.cache.block_count, 16);
            assert_eq!(config.cache.block_size, 8 * MEGABYTE);
            assert_eq!(config.limits.manifest_bytes, 2048);
            let s3 = config.s3.unwrap();
            assert_eq!(s3.region, "us-west-004");
            assert!(!format!("{s3:?}").contains("secret\""));
            Ok(())
        });
    }

    #[test]
    fn test_load_yaml_outside_working_directory() {
        Jail::expect_with(|_jail| {
            let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
            writeln!(file, "fetch:\n  timeout_secs: 5\n  max_concurrent_requests: 8").unwrap();
            let config = Config::load(Some(file.path())).unwrap();
            assert_eq!(config.fetch.timeout(), Some(Duration::from_secs(5)));
            assert_eq!(config.fetch.max_concurrent_requests, 8);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        Jail::expect_with(|jail| {
            jail.create_file("tarn.json", r#"{"cache": {"block_size": 0}}"#)?;
            let err = Config::load(Some(Path::new("tarn.json"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid(_)));
            Ok(())
        });
    }

    #[test]
    fn test_load_malformed_file() {
        Jail::expect_with(|jail| {
            jail.create_file("tarn.toml", "[cache]\nblock_count = \"many\"")?;
            let err = Config::load(Some(Path::new("tarn.toml"))).unwrap_err();
            assert_eq!(*err, ErrorKind::Load);
            Ok(())
        });
    }

    #[rstest]
    #[case("missing.toml")]
    #[case("tarn.ini")]
    fn test_load_bad_path(#[case] name: &str) {
        Jail::expect_with(|jail| {
            jail.create_file("tarn.ini", "")?;
            let err = Config::load(Some(Path::new(name))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid(_)));
            Ok(())
        });
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_load_default_path() {
        Jail::expect_with(|jail| {
            let dir = jail.directory().display().to_string();
            jail.set_env("XDG_CONFIG_HOME", dir);
            jail.create_dir("tarn")?;
            jail.create_file("tarn/config.toml", "[cache]\nblock_size = 1048576")?;
            let config = Config::load(None).unwrap();
            assert_eq!(config.cache.block_size, MEGABYTE);
            Ok(())
        });
    }
}
