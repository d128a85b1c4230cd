// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use backon::ExponentialBuilder;
use bon::Builder;
use jiff::SignedDuration;
use sharemirror_base::readable_size::ReadableSize;
use smart_default::SmartDefault;
use snafu::ensure;

use crate::error::{DownloadError, InvalidConfigSnafu};

/// Onezone instance used when the caller names none.
pub const DEFAULT_BASE_URL: &str = "https://datahub.egi.eu";

/// Configuration for the downloader
#[derive(Debug, Clone, SmartDefault, Builder)]
pub struct DownloaderConfig {
    /// Base URL of the share service (default: `https://datahub.egi.eu`)
    #[default(DEFAULT_BASE_URL.to_string())]
    #[builder(default = DEFAULT_BASE_URL.to_string(), into)]
    pub base_url: String,

    /// Size of each byte-range request; the last chunk of a file may be
    /// shorter (default: 8MB)
    #[default(ReadableSize::mb(8))]
    #[builder(default = ReadableSize::mb(8))]
    pub chunk_size: ReadableSize,

    /// Concurrent chunk fetches per active file (default: 1)
    #[default = 1]
    #[builder(default = 1)]
    pub workers: usize,

    /// Files transferred at the same time (default: 1)
    #[default = 1]
    #[builder(default = 1)]
    pub file_concurrency: usize,

    /// Entries requested per listing page (default: 1000)
    #[default = 1000]
    #[builder(default = 1000)]
    pub page_size: usize,

    /// Retries per chunk after a transient failure (default: 3)
    #[default = 3]
    #[builder(default = 3)]
    pub max_retries: usize,

    /// First delay between chunk retries
    #[default(SignedDuration::from_secs(1))]
    #[builder(default = SignedDuration::from_secs(1))]
    pub retry_min_delay: SignedDuration,

    /// Upper bound for the delay between chunk retries
    #[default(SignedDuration::from_secs(8))]
    #[builder(default = SignedDuration::from_secs(8))]
    pub retry_max_delay: SignedDuration,

    /// Timeout for each HTTP request
    #[default(SignedDuration::from_secs(30))]
    #[builder(default = SignedDuration::from_secs(30))]
    pub timeout: SignedDuration,

    /// Abort the whole run on the first failed file
    #[default = false]
    #[builder(default)]
    pub fail_fast: bool,

    /// Keep local files that already have the remote size instead of
    /// downloading them again
    #[default = false]
    #[builder(default)]
    pub skip_existing: bool,

    /// Custom User-Agent header
    #[builder(into)]
    pub user_agent: Option<String>,
}

impl DownloaderConfig {
    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), DownloadError> {
        ensure!(
            self.chunk_size.as_bytes() > 0,
            InvalidConfigSnafu {
                message: "chunk size must be positive",
            }
        );
        ensure!(
            self.workers > 0,
            InvalidConfigSnafu {
                message: "worker count must be positive",
            }
        );
        ensure!(
            self.file_concurrency > 0,
            InvalidConfigSnafu {
                message: "file concurrency must be positive",
            }
        );
        ensure!(
            self.page_size > 0,
            InvalidConfigSnafu {
                message: "page size must be positive",
            }
        );
        ensure!(
            self.retry_min_delay <= self.retry_max_delay,
            InvalidConfigSnafu {
                message: format!(
                    "retry delay range is inverted: {} > {}",
                    self.retry_min_delay, self.retry_max_delay
                ),
            }
        );
        Ok(())
    }

    /// Backoff policy applied to transient chunk failures.
    #[must_use]
    pub fn retry_policy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_max_times(self.max_retries)
            .with_min_delay(self.retry_min_delay.unsigned_abs())
            .with_max_delay(self.retry_max_delay.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DownloaderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers, 1);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(!config.fail_fast);
    }

    #[test]
    fn builder_defaults_match_smart_default() {
        let built = DownloaderConfig::builder().build();
        let default = DownloaderConfig::default();
        assert_eq!(built.base_url, default.base_url);
        assert_eq!(built.chunk_size, default.chunk_size);
        assert_eq!(built.page_size, default.page_size);
        assert_eq!(built.timeout, default.timeout);
    }

    #[test]
    fn rejects_zero_values() {
        let zero_chunk = DownloaderConfig {
            chunk_size: ReadableSize(0),
            ..DownloaderConfig::default()
        };
        assert!(matches!(
            zero_chunk.validate(),
            Err(DownloadError::InvalidConfig { .. })
        ));

        let zero_workers = DownloaderConfig {
            workers: 0,
            ..DownloaderConfig::default()
        };
        assert!(zero_workers.validate().is_err());

        let zero_files = DownloaderConfig {
            file_concurrency: 0,
            ..DownloaderConfig::default()
        };
        assert!(zero_files.validate().is_err());
    }

    #[test]
    fn rejects_inverted_retry_delays() {
        let config = DownloaderConfig {
            retry_min_delay: SignedDuration::from_secs(10),
            retry_max_delay: SignedDuration::from_secs(1),
            ..DownloaderConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
