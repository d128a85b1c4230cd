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


use std::path::{Path, PathBuf};

use futures::{StreamExt, stream};
use jiff::Timestamp;
use snafu::{ResultExt, ensure};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    assembler::FileAssembler,
    client::ShareClient,
    config::DownloaderConfig,
    error::{CancelledSnafu, CreateDirSnafu, DownloadError},
    resolver::TreeResolver,
    scheduler::{ChunkScheduler, chunk_count},
    tree::{NodeKind, Tree},
    types::{Summary, TransferState},
};

/// A file waiting to be transferred.
#[derive(Debug, Clone)]
struct FileJob {
    identifier:  String,
    size:        u64,
    destination: PathBuf,
}

#[derive(Debug)]
enum FileOutcome {
    Downloaded(TransferState),
    Skipped,
}

/// Mirrors a shared node onto local storage.
///
/// Components:
/// - `TreeResolver`: expands the identifier into a tree
/// - `ChunkScheduler`: fetches byte ranges with a bounded worker pool
/// - `FileAssembler`: writes fetched ranges at their offsets
pub struct Downloader {
    config:    DownloaderConfig,
    resolver:  TreeResolver,
    scheduler: ChunkScheduler,
    cancel:    CancellationToken,
}

impl Downloader {
    /// Create a downloader with the given configuration
    pub fn new(config: DownloaderConfig) -> Result<Self, DownloadError> {
        let client = ShareClient::from_config(&config)?;
        Self::with_client(config, client)
    }

    /// Create a downloader around an existing client. Only the transfer
    /// settings of `config` are used; `base_url`, `timeout` and
    /// `user_agent` are whatever `client` was built with.
    pub fn with_client(
        config: DownloaderConfig,
        client: ShareClient,
    ) -> Result<Self, DownloadError> {
        config.validate()?;
        let resolver = TreeResolver::new(client.clone(), config.page_size);
        let scheduler = ChunkScheduler::new(client, config.retry_policy());

        Ok(Self {
            config,
            resolver,
            scheduler,
            cancel: CancellationToken::new(),
        })
    }

    pub const fn config(&self) -> &DownloaderConfig { &self.config }

    /// Token that aborts a running [`Self::run`] when cancelled, e.g. on
    /// Ctrl-C. Partially written files are left as they are.
    pub fn cancellation_token(&self) -> CancellationToken { self.cancel.clone() }

    /// Resolve the tree below `identifier`.
    pub async fn resolve(&self, identifier: &str) -> Result<Tree, DownloadError> {
        self.resolver.resolve(identifier, &self.cancel).await
    }

    /// Mirror `identifier` into `output_dir`.
    ///
    /// This method will:
    /// 1. Resolve the full remote tree
    /// 2. Create every directory in tree order
    /// 3. Transfer files, `file_concurrency` at a time
    /// 4. Collect per-file failures into the summary
    ///
    /// Individual file failures never make this return an error unless
    /// `fail_fast` is set; only an unresolvable tree, an unusable output
    /// directory or cancellation do.
    pub async fn run(&self, identifier: &str, output_dir: &Path) -> Result<Summary, DownloadError> {
        let start_time = Timestamp::now();

        let tree = self.resolver.resolve(identifier, &self.cancel).await?;

        ensure!(!self.cancel.is_cancelled(), CancelledSnafu);
        fs::create_dir_all(output_dir)
            .await
            .context(CreateDirSnafu { path: output_dir })?;

        let mut summary = Summary {
            root: output_dir.join(tree.relative_path(tree.root())),
            ..Summary::default()
        };

        let jobs = self
            .prepare_directories(&tree, output_dir, &mut summary)
            .await?;
        self.transfer_all(jobs, &mut summary).await?;

        summary.duration = start_time.until(Timestamp::now()).unwrap_or_default();
        info!(
            root = %summary.root.display(),
            succeeded = summary.files_succeeded,
            failed = summary.files_failed,
            skipped = summary.files_skipped,
            bytes = summary.bytes_written,
            outcome = %summary.outcome(),
            "mirror finished"
        );
        Ok(summary)
    }

    /// Transfer one file of `size` bytes to `destination`.
    pub async fn download_file(
        &self,
        identifier: &str,
        size: u64,
        destination: &Path,
    ) -> Result<TransferState, DownloadError> {
        let cancel = self.cancel.child_token();
        self.transfer(identifier, size, destination, &cancel).await
    }

    /// Create local directories in pre-order and collect the files to
    /// transfer. A directory that cannot be created is recorded as a failure;
    /// its files still get their own attempt. Stops with `Cancelled` as soon
    /// as the run is cancelled.
    async fn prepare_directories(
        &self,
        tree: &Tree,
        output_dir: &Path,
        summary: &mut Summary,
    ) -> Result<Vec<FileJob>, DownloadError> {
        let mut jobs = Vec::with_capacity(tree.file_count());

        for id in tree.preorder() {
            ensure!(!self.cancel.is_cancelled(), CancelledSnafu);

            let node = tree.get(id);
            let path = output_dir.join(tree.relative_path(id));
            match node.kind {
                NodeKind::Directory => match fs::create_dir_all(&path).await {
                    Ok(()) => {
                        info!(path = %path.display(), "directory ready");
                        summary.directories_created += 1;
                    }
                    Err(source) => {
                        error!(path = %path.display(), "failed to create directory: {source}");
                        let err = DownloadError::CreateDir {
                            path: path.clone(),
                            source,
                        };
                        summary.record_failure(path, err);
                    }
                },
                NodeKind::File => jobs.push(FileJob {
                    identifier:  node.identifier.clone(),
                    size:        node.file_size(),
                    destination: path,
                }),
            }
        }

        Ok(jobs)
    }

    async fn transfer_all(
        &self,
        jobs: Vec<FileJob>,
        summary: &mut Summary,
    ) -> Result<(), DownloadError> {
        let cancel = self.cancel.child_token();

        let mut transfers = stream::iter(jobs)
            .map(|job| {
                let cancel = cancel.clone();
                async move {
                    let result = self.transfer_job(&job, &cancel).await;
                    (job, result)
                }
            })
            .buffer_unordered(self.config.file_concurrency);

        while let Some((job, result)) = transfers.next().await {
            match result {
                Ok(FileOutcome::Downloaded(state)) => {
                    summary.files_succeeded += 1;
                    summary.bytes_written += state.bytes_written;
                }
                Ok(FileOutcome::Skipped) => summary.files_skipped += 1,
                Err(err) => {
                    error!(path = %job.destination.display(), kind = %err.kind(), "file failed: {err}");
                    if self.config.fail_fast {
                        cancel.cancel();
                        return Err(DownloadError::Aborted {
                            path:   job.destination,
                            source: Box::new(err),
                        });
                    }
                    summary.files_failed += 1;
                    summary.record_failure(job.destination, err);
                }
            }
        }

        if self.cancel.is_cancelled() {
            return CancelledSnafu.fail();
        }
        Ok(())
    }

    async fn transfer_job(
        &self,
        job: &FileJob,
        cancel: &CancellationToken,
    ) -> Result<FileOutcome, DownloadError> {
        if self.config.skip_existing && Self::is_present(&job.destination, job.size).await {
            info!(path = %job.destination.display(), "already present, skipped");
            return Ok(FileOutcome::Skipped);
        }

        self.transfer(&job.identifier, job.size, &job.destination, cancel)
            .await
            .map(FileOutcome::Downloaded)
    }

    async fn transfer(
        &self,
        identifier: &str,
        size: u64,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<TransferState, DownloadError> {
        if cancel.is_cancelled() {
            return CancelledSnafu.fail();
        }

        let chunk_size = self.config.chunk_size.as_bytes();
        info!(path = %destination.display(), size, "downloading file");

        let assembler =
            FileAssembler::create(destination, size, chunk_count(size, chunk_size)).await?;
        let chunks = self.scheduler.schedule_file(
            identifier,
            size,
            chunk_size,
            self.config.workers,
            cancel,
        );

        let state = assembler.assemble(chunks).await?;
        info!(path = %destination.display(), bytes = state.bytes_written, "file complete");
        Ok(state)
    }

    async fn is_present(path: &Path, size: u64) -> bool {
        match fs::metadata(path).await {
            Ok(meta) => meta.is_file() && meta.len() == size,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), "cannot inspect existing file: {err}");
                }
                false
            }
        }
    }
}
