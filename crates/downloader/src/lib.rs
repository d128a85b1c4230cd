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


//! Mirrors a node of a remotely shared filesystem (a file, a directory or a
//! whole space) onto local storage.
//!
//! The pipeline is:
//! - [`ShareClient`] talks to the share service's REST endpoints
//! - [`TreeResolver`] expands one identifier into a full [`Tree`]
//! - [`ChunkScheduler`] splits a file into byte ranges and fetches them with
//!   a bounded worker pool
//! - [`FileAssembler`] places fetched chunks at their offsets on disk
//! - [`Downloader`] drives all of the above and reports a [`Summary`]

mod assembler;
mod client;
mod config;
mod downloader;
mod error;
mod resolver;
mod scheduler;
mod tree;
mod types;

pub use assembler::FileAssembler;
pub use client::{ChildrenPage, ListedEntry, NodeInfo, ShareClient};
pub use config::{DEFAULT_BASE_URL, DownloaderConfig};
pub use downloader::Downloader;
pub use error::{DownloadError, ErrorKind};
pub use resolver::TreeResolver;
pub use scheduler::{ChunkScheduler, ChunkStream, chunk_count, partition};
pub use tree::{Node, NodeId, NodeKind, Tree, sanitize_name};
pub use types::{ChunkResult, ChunkTask, Failure, Outcome, Summary, TransferState};
