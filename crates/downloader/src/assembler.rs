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


use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
};

use futures::{Stream, StreamExt};
use snafu::{ResultExt, ensure};
use tokio::{
    fs::{self, File},
    io::{AsyncSeekExt, AsyncWriteExt},
};
use tracing::{debug, warn};

use crate::{
    error::{CreateDirSnafu, DownloadError, FileWriteSnafu, IncompleteSnafu, RangeSnafu},
    types::{ChunkResult, TransferState},
};

/// Single writer for one destination file.
///
/// Chunks arrive in any order and are written at their own offset. A failed
/// chunk marks the transfer failed, but results already on their way are
/// still written so the partial file on disk is as complete as possible.
/// Nothing is deleted on failure.
#[derive(Debug)]
pub struct FileAssembler {
    file:    File,
    state:   TransferState,
    failure: Option<DownloadError>,
}

impl FileAssembler {
    /// Create (or truncate) `destination` and size it to `size` bytes.
    pub async fn create(
        destination: &Path,
        size: u64,
        total_chunks: usize,
    ) -> Result<Self, DownloadError> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .context(CreateDirSnafu { path: parent })?;
        }

        let file = File::create(destination)
            .await
            .context(FileWriteSnafu { path: destination })?;
        file.set_len(size)
            .await
            .context(FileWriteSnafu { path: destination })?;

        Ok(Self {
            file,
            state: TransferState {
                destination: destination.to_path_buf(),
                total_size: size,
                total_chunks,
                received: 0,
                written_chunks: 0,
                bytes_written: 0,
            },
            failure: None,
        })
    }

    pub const fn state(&self) -> &TransferState { &self.state }

    pub fn destination(&self) -> &Path { &self.state.destination }

    /// Place one result. Only local I/O problems are returned here; chunk
    /// failures are remembered and surface from [`Self::finish`].
    pub async fn write(&mut self, result: ChunkResult) -> Result<(), DownloadError> {
        self.state.received += 1;

        let bytes = match result.outcome {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    path = %self.state.destination.display(),
                    offset = result.offset,
                    "chunk failed: {err}"
                );
                self.failure.get_or_insert(err);
                return Ok(());
            }
        };

        let end = result.offset + bytes.len() as u64;
        ensure!(
            bytes.len() as u64 == result.length && end <= self.state.total_size,
            RangeSnafu {
                identifier: self.state.destination.display().to_string(),
                offset: result.offset,
                expected: result.length,
                actual: bytes.len() as u64,
            }
        );

        let path = self.state.destination.clone();
        self.file
            .seek(SeekFrom::Start(result.offset))
            .await
            .context(FileWriteSnafu { path: &path })?;
        self.file
            .write_all(&bytes)
            .await
            .context(FileWriteSnafu { path: &path })?;

        self.state.written_chunks += 1;
        self.state.bytes_written += bytes.len() as u64;
        debug!(
            path = %path.display(),
            offset = result.offset,
            written = self.state.written_chunks,
            total = self.state.total_chunks,
            "chunk written"
        );
        Ok(())
    }

    /// Drain `results` into the file, then [`Self::finish`].
    pub async fn assemble<S>(mut self, mut results: S) -> Result<TransferState, DownloadError>
    where
        S: Stream<Item = ChunkResult> + Unpin,
    {
        while let Some(result) = results.next().await {
            self.write(result).await?;
        }
        self.finish().await
    }

    /// Complete the transfer: succeeds only if every chunk was delivered and
    /// written.
    pub async fn finish(mut self) -> Result<TransferState, DownloadError> {
        if let Some(failure) = self.failure.take() {
            self.flush().await?;
            return Err(failure);
        }

        ensure!(
            self.state.is_complete(),
            IncompleteSnafu {
                received: self.state.written_chunks,
                expected: self.state.total_chunks,
            }
        );

        self.flush().await?;
        Ok(self.state)
    }

    async fn flush(&mut self) -> Result<(), DownloadError> {
        let path: PathBuf = self.state.destination.clone();
        self.file
            .flush()
            .await
            .context(FileWriteSnafu { path: &path })?;
        self.file
            .sync_all()
            .await
            .context(FileWriteSnafu { path: &path })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::stream;

    use super::*;
    use crate::error::ErrorKind;

    fn ok(index: usize, offset: u64, data: &'static [u8]) -> ChunkResult {
        ChunkResult {
            index,
            offset,
            length: data.len() as u64,
            attempts: 1,
            outcome: Ok(Bytes::from_static(data)),
        }
    }

    fn failed(index: usize, offset: u64, length: u64) -> ChunkResult {
        ChunkResult {
            index,
            offset,
            length,
            attempts: 1,
            outcome: Err(DownloadError::Service {
                identifier: "f".to_string(),
                message:    "HTTP 400".to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn places_out_of_order_chunks_by_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.bin");

        let assembler = FileAssembler::create(&path, 10, 3).await.unwrap();
        let results = stream::iter(vec![
            ok(2, 8, b"ij"),
            ok(0, 0, b"abcd"),
            ok(1, 4, b"efgh"),
        ]);
        let state = assembler.assemble(results).await.unwrap();

        assert_eq!(state.written_chunks, 3);
        assert_eq!(state.bytes_written, 10);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"abcdefghij");
    }

    #[tokio::test]
    async fn failed_chunk_fails_transfer_but_keeps_other_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let assembler = FileAssembler::create(&path, 8, 2).await.unwrap();
        let results = stream::iter(vec![failed(0, 0, 4), ok(1, 4, b"efgh")]);
        let err = assembler.assemble(results).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Service);
        let partial = tokio::fs::read(&path).await.unwrap();
        assert_eq!(partial.len(), 8);
        assert_eq!(&partial[4..], b"efgh");
    }

    #[tokio::test]
    async fn missing_chunks_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let assembler = FileAssembler::create(&path, 8, 2).await.unwrap();
        let err = assembler
            .assemble(stream::iter(vec![ok(0, 0, b"abcd")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DownloadError::Incomplete {
                received: 1,
                expected: 2
            }
        ));
    }

    #[tokio::test]
    async fn rejects_chunks_past_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut assembler = FileAssembler::create(&path, 4, 1).await.unwrap();
        let err = assembler.write(ok(0, 2, b"abcd")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
    }

    #[tokio::test]
    async fn zero_byte_file_is_complete_without_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");

        let assembler = FileAssembler::create(&path, 0, 0).await.unwrap();
        let state = assembler.finish().await.unwrap();
        assert!(state.is_complete());
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn truncates_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        tokio::fs::write(&path, b"old content that is longer")
            .await
            .unwrap();

        let assembler = FileAssembler::create(&path, 3, 1).await.unwrap();
        assembler
            .assemble(stream::iter(vec![ok(0, 0, b"new")]))
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"new");
    }
}
