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


use std::{path::PathBuf, sync::Arc};

use bytes::Bytes;
use jiff::Span;
use strum_macros::Display;

use crate::error::{DownloadError, ErrorKind};

/// One byte range of a file, consumed exactly once by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTask {
    /// Identifier of the file the range belongs to
    pub identifier: Arc<str>,
    /// Position of this chunk in offset order (0-based)
    pub index:      usize,
    /// First byte of the range
    pub offset:     u64,
    /// Number of bytes in the range
    pub length:     u64,
}

/// Outcome of attempting one [`ChunkTask`].
#[derive(Debug)]
pub struct ChunkResult {
    pub index:    usize,
    pub offset:   u64,
    pub length:   u64,
    /// Requests issued for this chunk, retries included
    pub attempts: usize,
    pub outcome:  Result<Bytes, DownloadError>,
}

/// Progress of one file transfer, owned by its assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferState {
    pub destination:    PathBuf,
    pub total_size:     u64,
    pub total_chunks:   usize,
    /// Results received so far, successful or not
    pub received:       usize,
    /// Chunks written to their offset
    pub written_chunks: usize,
    pub bytes_written:  u64,
}

impl TransferState {
    pub const fn is_complete(&self) -> bool { self.written_chunks == self.total_chunks }
}

/// A file or directory that could not be mirrored.
#[derive(Debug)]
pub struct Failure {
    pub path:  PathBuf,
    pub kind:  ErrorKind,
    pub error: DownloadError,
}

/// Overall result class of a run, used for the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    /// Every file was mirrored.
    Complete,
    /// Some files failed, at least one was mirrored.
    Partial,
    /// Failures occurred and nothing was mirrored.
    NothingDownloaded,
}

/// Report of a finished run.
#[derive(Debug, Default)]
pub struct Summary {
    /// Local path of the mirrored root
    pub root:                PathBuf,
    pub files_succeeded:     usize,
    pub files_failed:        usize,
    /// Files left alone because an identical-size copy already existed
    pub files_skipped:       usize,
    pub directories_created: usize,
    pub bytes_written:       u64,
    pub failures:            Vec<Failure>,
    pub duration:            Span,
}

impl Summary {
    pub(crate) fn record_failure(&mut self, path: PathBuf, error: DownloadError) {
        self.failures.push(Failure {
            path,
            kind: error.kind(),
            error,
        });
    }

    #[must_use]
    pub fn outcome(&self) -> Outcome {
        if self.failures.is_empty() {
            Outcome::Complete
        } else if self.files_succeeded + self.files_skipped > 0 {
            Outcome::Partial
        } else {
            Outcome::NothingDownloaded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure() -> DownloadError {
        DownloadError::Service {
            identifier: "x".to_string(),
            message:    "HTTP 400".to_string(),
        }
    }

    #[test]
    fn empty_run_is_complete() {
        assert_eq!(Summary::default().outcome(), Outcome::Complete);
    }

    #[test]
    fn failures_with_successes_are_partial() {
        let mut summary = Summary {
            files_succeeded: 2,
            files_failed: 1,
            ..Summary::default()
        };
        summary.record_failure(PathBuf::from("a"), failure());
        assert_eq!(summary.outcome(), Outcome::Partial);
        assert_eq!(summary.failures[0].kind, ErrorKind::Service);
    }

    #[test]
    fn failures_alone_mean_nothing_downloaded() {
        let mut summary = Summary {
            files_failed: 1,
            ..Summary::default()
        };
        summary.record_failure(PathBuf::from("a"), failure());
        assert_eq!(summary.outcome(), Outcome::NothingDownloaded);
        assert_eq!(summary.outcome().to_string(), "nothing_downloaded");
    }
}
