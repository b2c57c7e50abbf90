use crate::manifest::{CONFIG_LIMIT, MANIFEST_LIMIT};
use std::num::NonZeroUsize;
use std::time::Duration;
use tarn_config::Config;
use tarn_remote::RemoteOptions;
use tokio_util::sync::CancellationToken;

/// Settings for opening an archive.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub block_size: NonZeroUsize,
    pub block_count: NonZeroUsize,
    /// Largest `manifest.json` accepted.
    pub manifest_limit: u64,
    /// Largest image config blob accepted.
    pub config_limit: u64,
    pub fetch_timeout: Option<Duration>,
    /// Cancels every fetch made on behalf of archives opened with these
    /// options.
    pub cancel: CancellationToken,
}

impl ArchiveOptions {
    pub fn remote_options(&self) -> RemoteOptions {
        RemoteOptions {
            block_size: self.block_size,
            block_count: self.block_count,
            fetch_timeout: self.fetch_timeout,
            cancel: self.cancel.clone(),
        }
    }
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        let remote = RemoteOptions::default();
        Self {
            block_size: remote.block_size,
            block_count: remote.block_count,
            manifest_limit: MANIFEST_LIMIT,
            config_limit: CONFIG_LIMIT,
            fetch_timeout: remote.fetch_timeout,
            cancel: remote.cancel,
        }
    }
}

impl From<&Config> for ArchiveOptions {
    /// Zero or oversized values, which [`Config::validate`] rejects, fall
    /// back to the defaults.
    fn from(config: &Config) -> Self {
        let defaults = Self::default();
        let non_zero = |value: u64, fallback: NonZeroUsize| {
            usize::try_from(value).ok().and_then(NonZeroUsize::new).unwrap_or(fallback)
        };
        Self {
            block_size: non_zero(config.cache.block_size, defaults.block_size),
            block_count: non_zero(config.cache.block_count, defaults.block_count),
            manifest_limit: config.limits.manifest_bytes,
            config_limit: config.limits.config_bytes,
            fetch_timeout: config.fetch.timeout(),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.cache.block_count = 3;
        config.limits.manifest_bytes = 512;
        config.fetch.timeout_secs = None;
        let options = ArchiveOptions::from(&config);
        assert_eq!(options.block_count.get(), 3);
        assert_eq!(options.block_size.get(), 8 << 20);
        assert_eq!(options.manifest_limit, 512);
        assert_eq!(options.config_limit, CONFIG_LIMIT);
        assert_eq!(options.fetch_timeout, None);
    }

    #[test]
    fn test_from_config_zero_falls_back() {
        let mut config = Config::default();
        config.cache.block_size = 0;
        let options = ArchiveOptions::from(&config);
        assert_eq!(options.block_size, ArchiveOptions::default().block_size);
    }
}
