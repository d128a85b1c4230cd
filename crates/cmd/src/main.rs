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


use std::{path::PathBuf, process::ExitCode};

use clap::{ArgAction, Parser};
use sharemirror_base::readable_size::ReadableSize;
use sharemirror_common_telemetry::{LoggingOptions, init_global_logging, set_panic_hook};
use sharemirror_downloader::{DEFAULT_BASE_URL, Downloader, DownloaderConfig, Outcome, Summary};
use snafu::{ResultExt, Whatever};
use tracing::warn;

#[derive(Debug, Parser)]
#[clap(
    name = "sharemirror",
    about = "Mirror a shared file or directory tree to local storage",
    version
)]
#[command(long_about = r"

Mirror a shared file or directory tree to local storage.
Examples:

sharemirror <FILE_ID>
sharemirror -o ./data -j 4 --files 2 <FILE_ID>

")]
struct Cli {
    /// Identifier of the shared file or directory
    #[arg(env = "SHAREMIRROR_FILE_ID")]
    file_id: String,

    /// Base URL of the Onezone service
    #[arg(long, env = "SHAREMIRROR_ONEZONE", default_value = DEFAULT_BASE_URL)]
    onezone: String,

    /// Directory the shared root is mirrored into
    #[arg(short, long, env = "SHAREMIRROR_OUTPUT", default_value = ".")]
    output: PathBuf,

    /// Bytes per ranged request, e.g. 8MiB or 512k
    #[arg(long, env = "SHAREMIRROR_CHUNK_SIZE", default_value = "8MiB")]
    chunk_size: ReadableSize,

    /// Parallel range requests per file
    #[arg(short = 'j', long, env = "SHAREMIRROR_WORKERS", default_value_t = 1)]
    workers: usize,

    /// Files transferred at the same time
    #[arg(long = "files", env = "SHAREMIRROR_FILES", default_value_t = 1)]
    file_concurrency: usize,

    /// Extra attempts for a chunk after a transient failure
    #[arg(long, env = "SHAREMIRROR_RETRIES", default_value_t = 3)]
    retries: usize,

    /// Stop at the first failed file
    #[arg(long, env = "SHAREMIRROR_FAIL_FAST")]
    fail_fast: bool,

    /// Keep local files whose size already matches the remote one
    #[arg(long, env = "SHAREMIRROR_SKIP_EXISTING")]
    skip_existing: bool,

    /// Also write rotated log files into this directory
    #[arg(long, env = "SHAREMIRROR_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn downloader_config(&self) -> DownloaderConfig {
        DownloaderConfig {
            base_url: self.onezone.clone(),
            chunk_size: self.chunk_size,
            workers: self.workers,
            file_concurrency: self.file_concurrency,
            max_retries: self.retries,
            fail_fast: self.fail_fast,
            skip_existing: self.skip_existing,
            ..DownloaderConfig::default()
        }
    }

    fn logging_options(&self) -> LoggingOptions {
        let level = match self.verbose {
            0 => None,
            1 => Some("debug,hyper=info,hyper_util=info,reqwest=info".to_string()),
            _ => Some("trace".to_string()),
        };
        LoggingOptions {
            dir: self
                .log_dir
                .as_ref()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
            level,
            ..LoggingOptions::default()
        }
    }
}

fn print_summary(summary: &Summary) {
    println!("Mirrored into {}", summary.root.display());
    println!(
        "  files: {} downloaded, {} skipped, {} failed",
        summary.files_succeeded, summary.files_skipped, summary.files_failed
    );
    println!("  directories: {}", summary.directories_created);
    println!("  bytes: {}", ReadableSize(summary.bytes_written));
    println!("  took: {:#}", summary.duration);
    for failure in &summary.failures {
        println!(
            "  FAILED {} [{}]: {}",
            failure.path.display(),
            failure.kind,
            failure.error
        );
    }
    println!("Result: {}", summary.outcome());
}

const fn exit_code(outcome: Outcome) -> u8 {
    match outcome {
        Outcome::Complete => 0,
        Outcome::Partial => 2,
        Outcome::NothingDownloaded => 3,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Whatever> {
    // A missing .env file is fine.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _guards = init_global_logging("sharemirror", &cli.logging_options());
    set_panic_hook();

    let downloader =
        Downloader::new(cli.downloader_config()).whatever_context("Invalid configuration")?;

    let token = downloader.cancellation_token();
    ctrlc::set_handler(move || {
        warn!("interrupted, stopping transfers");
        token.cancel();
    })
    .whatever_context("Failed to install Ctrl-C handler")?;

    let summary = downloader
        .run(&cli.file_id, &cli.output)
        .await
        .with_whatever_context(|_| format!("Failed to mirror {}", cli.file_id))?;

    print_summary(&summary);
    Ok(ExitCode::from(exit_code(summary.outcome())))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() { Cli::command().debug_assert(); }

    #[test]
    fn defaults_match_downloader_defaults() {
        let cli = Cli::try_parse_from(["sharemirror", "abc"]).unwrap();
        let config = cli.downloader_config();
        let defaults = DownloaderConfig::default();

        assert_eq!(cli.file_id, "abc");
        assert_eq!(config.base_url, defaults.base_url);
        assert_eq!(config.chunk_size, defaults.chunk_size);
        assert_eq!(config.workers, defaults.workers);
        assert_eq!(config.max_retries, defaults.max_retries);
        assert!(!config.fail_fast);
    }

    #[test]
    fn flags_reach_the_config() {
        let cli = Cli::try_parse_from([
            "sharemirror",
            "--onezone",
            "http://localhost:9000",
            "-o",
            "/tmp/out",
            "--chunk-size",
            "512k",
            "-j",
            "4",
            "--files",
            "2",
            "--retries",
            "5",
            "--fail-fast",
            "--skip-existing",
            "-vv",
            "abc",
        ])
        .unwrap();
        let config = cli.downloader_config();

        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.chunk_size, ReadableSize::kb(512));
        assert_eq!(config.workers, 4);
        assert_eq!(config.file_concurrency, 2);
        assert_eq!(config.max_retries, 5);
        assert!(config.fail_fast && config.skip_existing);
        assert_eq!(cli.output, PathBuf::from("/tmp/out"));
        assert_eq!(cli.logging_options().level.as_deref(), Some("trace"));
    }

    #[test]
    fn exit_codes_distinguish_outcomes() {
        assert_eq!(exit_code(Outcome::Complete), 0);
        assert_eq!(exit_code(Outcome::Partial), 2);
        assert_eq!(exit_code(Outcome::NothingDownloaded), 3);
    }
}
