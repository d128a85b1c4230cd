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


use std::collections::{HashSet, VecDeque};

use snafu::{OptionExt, ResultExt, ensure};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    client::{ListedEntry, NodeInfo, ShareClient},
    error::{
        CancelledSnafu, CycleSnafu, DownloadError, PaginationStalledSnafu, ResolveSnafu,
        SizeUnknownSnafu,
    },
    tree::{NodeKind, Tree},
};

/// Expands a share identifier into a complete [`Tree`].
///
/// Directories are listed breadth-first, one page at a time. Resolution is
/// all-or-nothing: the first failure aborts it and is reported with the
/// remote path of the node that could not be resolved. Cancelling the token
/// passed to [`Self::resolve`] abandons the request in flight and fails with
/// `Cancelled`.
#[derive(Debug, Clone)]
pub struct TreeResolver {
    client:    ShareClient,
    page_size: usize,
}

impl TreeResolver {
    pub const fn new(client: ShareClient, page_size: usize) -> Self { Self { client, page_size } }

    pub async fn resolve(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> Result<Tree, DownloadError> {
        let root = unless_cancelled(cancel, self.client.get_metadata(identifier))
            .await
            .context(ResolveSnafu { path: identifier })?;
        if root.kind == NodeKind::File && root.size.is_none() {
            return SizeUnknownSnafu { identifier }
                .fail()
                .context(ResolveSnafu { path: identifier });
        }

        let mut tree = Tree::new(root);
        let mut visited = HashSet::from([identifier.to_string()]);
        let mut pending = VecDeque::new();
        if tree.get(tree.root()).is_dir() {
            pending.push_back(tree.root());
        }

        while let Some(dir) = pending.pop_front() {
            let dir_path = tree.display_path(dir);
            let entries = self
                .list_all(&tree.get(dir).identifier, cancel)
                .await
                .context(ResolveSnafu { path: &dir_path })?;
            debug!(path = %dir_path, entries = entries.len(), "listed directory");

            for entry in entries {
                let entry_path = format!("{dir_path}/{}", entry.name);
                if !visited.insert(entry.identifier.clone()) {
                    return CycleSnafu {
                        identifier: entry.identifier,
                    }
                    .fail()
                    .context(ResolveSnafu { path: entry_path });
                }

                let Some(info) = self
                    .complete_entry(entry, cancel)
                    .await
                    .context(ResolveSnafu { path: &entry_path })?
                else {
                    continue;
                };

                let is_dir = matches!(info.kind, NodeKind::Directory);
                let child = tree.add_child(dir, info);
                if is_dir {
                    pending.push_back(child);
                }
            }
        }

        info!(
            identifier,
            nodes = tree.len(),
            files = tree.file_count(),
            bytes = tree.total_file_bytes(),
            "resolved share tree"
        );
        Ok(tree)
    }

    /// Collect every page of the listing of `identifier`.
    async fn list_all(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ListedEntry>, DownloadError> {
        let mut entries = Vec::new();
        let mut seen_tokens = HashSet::new();
        let mut token: Option<String> = None;

        loop {
            let page = unless_cancelled(
                cancel,
                self.client
                    .list_children(identifier, token.as_deref(), self.page_size),
            )
            .await?;
            entries.extend(page.entries);

            match page.next_page_token {
                Some(next) => {
                    ensure!(
                        seen_tokens.insert(next.clone()),
                        PaginationStalledSnafu {
                            identifier,
                            token: next,
                        }
                    );
                    token = Some(next);
                }
                None => break,
            }
        }

        Ok(entries)
    }

    /// Turn a listing entry into node metadata, fetching what the listing
    /// left out. Returns `None` for entries of an unsupported type.
    async fn complete_entry(
        &self,
        entry: ListedEntry,
        cancel: &CancellationToken,
    ) -> Result<Option<NodeInfo>, DownloadError> {
        let kind = match entry.kind.as_deref() {
            Some(raw) => match raw.parse::<NodeKind>() {
                Ok(kind) => Some(kind),
                Err(_) => {
                    warn!(
                        identifier = %entry.identifier,
                        name = %entry.name,
                        kind = raw,
                        "skipping entry of unsupported type"
                    );
                    return Ok(None);
                }
            },
            None => None,
        };

        let info = match kind {
            Some(kind) => NodeInfo {
                identifier: entry.identifier,
                name: entry.name,
                kind,
                size: entry.size,
            },
            None => match unless_cancelled(cancel, self.client.get_metadata(&entry.identifier))
                .await
            {
                Ok(info) => info,
                Err(DownloadError::UnsupportedKind { kind, .. }) => {
                    warn!(
                        identifier = %entry.identifier,
                        name = %entry.name,
                        kind = %kind,
                        "skipping entry of unsupported type"
                    );
                    return Ok(None);
                }
                Err(e) => return Err(e),
            },
        };

        self.ensure_size(info, cancel).await.map(Some)
    }

    /// Files must know their size before transfer; ask the service when the
    /// listing did not say.
    async fn ensure_size(
        &self,
        info: NodeInfo,
        cancel: &CancellationToken,
    ) -> Result<NodeInfo, DownloadError> {
        if info.kind == NodeKind::Directory || info.size.is_some() {
            return Ok(info);
        }

        let fetched = unless_cancelled(cancel, self.client.get_metadata(&info.identifier)).await?;
        let size = fetched.size.context(SizeUnknownSnafu {
            identifier: info.identifier.as_str(),
        })?;
        Ok(NodeInfo {
            size: Some(size),
            ..info
        })
    }

    pub const fn client(&self) -> &ShareClient { &self.client }
}

/// Await `request` unless `cancel` fires first.
async fn unless_cancelled<T>(
    cancel: &CancellationToken,
    request: impl Future<Output = Result<T, DownloadError>>,
) -> Result<T, DownloadError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => CancelledSnafu.fail(),
        result = request => result,
    }
}
