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


use std::path::PathBuf;

use snafu::Snafu;
use strum_macros::Display;

/// Coarse classification of a [`DownloadError`], used for retry decisions
/// and for the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// The identifier is unknown to the service.
    NotFound,
    /// Non-retryable remote failure or malformed response.
    Service,
    /// Network-level failure or retryable status, eligible for retry.
    Transient,
    /// The service returned the wrong number of bytes for a range.
    Range,
    /// Local filesystem failure.
    Io,
    /// Invalid caller-supplied configuration.
    Config,
    /// The run was cancelled before the work finished.
    Cancelled,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DownloadError {
    #[snafu(display("Invalid configuration: {message}"))]
    InvalidConfig { message: String },

    #[snafu(display("Invalid service URL: {url}"))]
    InvalidBaseUrl { url: String },

    #[snafu(display("Failed to build HTTP client: {source}"))]
    BuildClient { source: reqwest::Error },

    #[snafu(display("Node {identifier} not found"))]
    NotFound { identifier: String },

    #[snafu(display("Service error for {identifier}: {message}"))]
    Service { identifier: String, message: String },

    #[snafu(display("Malformed response for {identifier}: {source}"))]
    Decode {
        identifier: String,
        source:     serde_json::Error,
    },

    #[snafu(display("Network error for {identifier}: {source}"))]
    Network {
        identifier: String,
        source:     reqwest::Error,
    },

    #[snafu(display("HTTP {status} for {identifier}, retryable"))]
    Transient { identifier: String, status: u16 },

    #[snafu(display(
        "Range {offset}+{expected} of {identifier} returned {actual} bytes"
    ))]
    Range {
        identifier: String,
        offset:     u64,
        expected:   u64,
        actual:     u64,
    },

    #[snafu(display(
        "Range {offset} of {identifier} came back starting at {returned}"
    ))]
    RangeMisplaced {
        identifier: String,
        offset:     u64,
        returned:   u64,
    },

    #[snafu(display("Unsupported node type {kind:?} for {identifier}"))]
    UnsupportedKind { identifier: String, kind: String },

    #[snafu(display("Node {identifier} appears more than once in the tree"))]
    Cycle { identifier: String },

    #[snafu(display("Listing of {identifier} repeated page token {token:?}"))]
    PaginationStalled { identifier: String, token: String },

    #[snafu(display("File size of {identifier} is unknown"))]
    SizeUnknown { identifier: String },

    #[snafu(display("Failed to resolve {path}: {source}"))]
    Resolve {
        path:   String,
        #[snafu(source(from(DownloadError, Box::new)))]
        source: Box<DownloadError>,
    },

    #[snafu(display("Chunk at offset {offset} failed after {attempts} attempts: {source}"))]
    ChunkFailed {
        offset:   u64,
        attempts: usize,
        #[snafu(source(from(DownloadError, Box::new)))]
        source:   Box<DownloadError>,
    },

    #[snafu(display("Only {received} of {expected} chunks were delivered"))]
    Incomplete { received: usize, expected: usize },

    #[snafu(display("Failed to create directory {}: {source}", path.display()))]
    CreateDir {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("File write error at {}: {source}", path.display()))]
    FileWrite {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Download cancelled"))]
    Cancelled,

    #[snafu(display("Run aborted after {} failed: {source}", path.display()))]
    Aborted {
        path:   PathBuf,
        #[snafu(source(from(DownloadError, Box::new)))]
        source: Box<DownloadError>,
    },
}

impl DownloadError {
    /// Classify this error, looking through wrapper variants.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig { .. } | Self::InvalidBaseUrl { .. } | Self::BuildClient { .. } => {
                ErrorKind::Config
            }
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Service { .. }
            | Self::Decode { .. }
            | Self::UnsupportedKind { .. }
            | Self::Cycle { .. }
            | Self::PaginationStalled { .. }
            | Self::SizeUnknown { .. } => ErrorKind::Service,
            Self::Network { .. } | Self::Transient { .. } => ErrorKind::Transient,
            Self::Range { .. } | Self::RangeMisplaced { .. } | Self::Incomplete { .. } => {
                ErrorKind::Range
            }
            Self::CreateDir { .. } | Self::FileWrite { .. } => ErrorKind::Io,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Resolve { source, .. }
            | Self::ChunkFailed { source, .. }
            | Self::Aborted { source, .. } => source.kind(),
        }
    }

    /// Whether the same request may succeed if issued again.
    #[must_use]
    pub fn is_retryable(&self) -> bool { self.kind() == ErrorKind::Transient }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrappers_report_their_source_kind() {
        let err = DownloadError::Resolve {
            path:   "space/a".to_string(),
            source: Box::new(DownloadError::NotFound {
                identifier: "a".to_string(),
            }),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = DownloadError::ChunkFailed {
            offset:   0,
            attempts: 4,
            source:   Box::new(DownloadError::Transient {
                identifier: "f".to_string(),
                status:     503,
            }),
        };
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn only_transient_errors_retry() {
        let transient = DownloadError::Transient {
            identifier: "f".to_string(),
            status:     503,
        };
        let range = DownloadError::Range {
            identifier: "f".to_string(),
            offset:     0,
            expected:   10,
            actual:     3,
        };
        let service = DownloadError::Service {
            identifier: "f".to_string(),
            message:    "HTTP 400".to_string(),
        };
        assert!(transient.is_retryable());
        assert!(!range.is_retryable());
        assert!(!service.is_retryable());
    }

    #[test]
    fn kinds_print_in_snake_case() {
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
        assert_eq!(ErrorKind::Transient.to_string(), "transient");
    }
}
