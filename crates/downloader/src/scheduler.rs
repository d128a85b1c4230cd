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
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
};

use backon::{ExponentialBuilder, Retryable};
use bytes::Bytes;
use futures::Stream;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    client::ShareClient,
    error::{DownloadError, ErrorKind},
    types::{ChunkResult, ChunkTask},
};

/// Number of chunks needed to cover `size` bytes: `ceil(size / chunk_size)`.
///
/// # Panics
///
/// Panics if `chunk_size` is zero.
#[must_use]
pub fn chunk_count(size: u64, chunk_size: u64) -> usize {
    assert!(chunk_size > 0, "chunk size must be positive");
    #[allow(clippy::cast_possible_truncation)]
    let count = size.div_ceil(chunk_size) as usize;
    count
}

/// Split `[0, size)` into consecutive, non-overlapping windows of
/// `chunk_size` bytes. The last window holds the remainder.
#[must_use]
pub fn partition(identifier: &str, size: u64, chunk_size: u64) -> Vec<ChunkTask> {
    let identifier: Arc<str> = Arc::from(identifier);
    (0..chunk_count(size, chunk_size))
        .map(|index| {
            let offset = index as u64 * chunk_size;
            ChunkTask {
                identifier: Arc::clone(&identifier),
                index,
                offset,
                length: chunk_size.min(size - offset),
            }
        })
        .collect()
}

/// Results of one scheduled file, in completion order.
///
/// The stream ends once every worker has exited, which happens after all
/// tasks are reported or the run is cancelled.
#[derive(Debug)]
pub struct ChunkStream {
    total_chunks: usize,
    receiver:     mpsc::Receiver<ChunkResult>,
}

impl ChunkStream {
    pub const fn total_chunks(&self) -> usize { self.total_chunks }

    pub async fn recv(&mut self) -> Option<ChunkResult> { self.receiver.recv().await }
}

impl Stream for ChunkStream {
    type Item = ChunkResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Fetches one chunk, retrying transient failures with backoff.
#[derive(Debug, Clone)]
struct RangeFetcher {
    client:  ShareClient,
    backoff: ExponentialBuilder,
}

impl RangeFetcher {
    async fn fetch(&self, task: ChunkTask) -> ChunkResult {
        let attempts = AtomicUsize::new(0);

        let outcome = (|| self.try_fetch(&task, &attempts))
            .retry(self.backoff)
            .when(DownloadError::is_retryable)
            .notify(|err, delay| {
                warn!(
                    identifier = %task.identifier,
                    offset = task.offset,
                    ?delay,
                    "retrying chunk: {err}"
                );
            })
            .await;

        let attempts = attempts.into_inner();
        ChunkResult {
            index: task.index,
            offset: task.offset,
            length: task.length,
            attempts,
            outcome: outcome.map_err(|source| DownloadError::ChunkFailed {
                offset: task.offset,
                attempts,
                source: Box::new(source),
            }),
        }
    }

    async fn try_fetch(
        &self,
        task: &ChunkTask,
        attempts: &AtomicUsize,
    ) -> Result<Bytes, DownloadError> {
        attempts.fetch_add(1, Ordering::Relaxed);
        self.client
            .fetch_range(&task.identifier, task.offset, task.length)
            .await
    }
}

/// Splits files into byte ranges and fetches them with a bounded pool of
/// tokio tasks.
///
/// Tasks flow through a bounded queue to `workers` worker tasks; results go
/// out through a channel of the same capacity, so workers block instead of
/// piling up fetched bytes when the consumer falls behind.
#[derive(Debug, Clone)]
pub struct ChunkScheduler {
    fetcher: RangeFetcher,
}

impl ChunkScheduler {
    pub const fn new(client: ShareClient, backoff: ExponentialBuilder) -> Self {
        Self {
            fetcher: RangeFetcher { client, backoff },
        }
    }

    /// Start fetching `size` bytes of `identifier` in `chunk_size` windows
    /// with at most `workers` requests in flight.
    ///
    /// A zero-byte file yields an already-finished stream with no chunks.
    /// After the first chunk that fails for good, no further chunks of the
    /// file are dispatched; the stream then ends once in-flight chunks are
    /// reported.
    /// Must be called from within a tokio runtime.
    pub fn schedule_file(
        &self,
        identifier: &str,
        size: u64,
        chunk_size: u64,
        workers: usize,
        cancel: &CancellationToken,
    ) -> ChunkStream {
        let tasks = partition(identifier, size, chunk_size);
        let total_chunks = tasks.len();
        let workers = workers.clamp(1, total_chunks.max(1));
        let (result_tx, result_rx) = mpsc::channel(workers);

        if total_chunks > 0 {
            // Stops dispatch once any chunk of this file has failed for good.
            let file_failed = cancel.child_token();
            let (task_tx, task_rx) = mpsc::channel(workers);
            tokio::spawn(Self::feed(tasks, task_tx, file_failed.clone()));

            let task_rx = Arc::new(Mutex::new(task_rx));
            for worker in 0..workers {
                tokio::spawn(Self::run_worker(
                    worker,
                    self.fetcher.clone(),
                    Arc::clone(&task_rx),
                    result_tx.clone(),
                    cancel.clone(),
                    file_failed.clone(),
                ));
            }
        }

        ChunkStream {
            total_chunks,
            receiver: result_rx,
        }
    }

    async fn feed(
        tasks: Vec<ChunkTask>,
        queue: mpsc::Sender<ChunkTask>,
        file_failed: CancellationToken,
    ) {
        for task in tasks {
            let sent = tokio::select! {
                biased;
                () = file_failed.cancelled() => None,
                sent = queue.send(task) => Some(sent),
            };
            // Stopped, or every worker is gone.
            let Some(Ok(())) = sent else {
                break;
            };
        }
    }

    async fn run_worker(
        worker: usize,
        fetcher: RangeFetcher,
        tasks: Arc<Mutex<mpsc::Receiver<ChunkTask>>>,
        results: mpsc::Sender<ChunkResult>,
        cancel: CancellationToken,
        file_failed: CancellationToken,
    ) {
        loop {
            let next = {
                let mut queue = tasks.lock().await;
                tokio::select! {
                    biased;
                    () = file_failed.cancelled() => None,
                    task = queue.recv() => task,
                }
            };
            let Some(task) = next else {
                break;
            };

            let (index, offset, length) = (task.index, task.offset, task.length);
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => ChunkResult {
                    index,
                    offset,
                    length,
                    attempts: 0,
                    outcome: Err(DownloadError::Cancelled),
                },
                result = fetcher.fetch(task) => result,
            };
            debug!(
                worker,
                index,
                offset,
                length,
                attempts = result.attempts,
                ok = result.outcome.is_ok(),
                "chunk finished"
            );

            // In-flight chunks of other workers still finish and get written;
            // only new tasks stop.
            if matches!(&result.outcome, Err(err) if err.kind() != ErrorKind::Cancelled) {
                file_failed.cancel();
            }

            if results.send(result).await.is_err() {
                // The assembler stopped listening.
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_count_is_ceiling_division() {
        assert_eq!(chunk_count(0, 4), 0);
        assert_eq!(chunk_count(1, 4), 1);
        assert_eq!(chunk_count(4, 4), 1);
        assert_eq!(chunk_count(5, 4), 2);
        assert_eq!(chunk_count(8, 4), 2);
        assert_eq!(chunk_count(9, 4), 3);
    }

    #[test]
    fn partition_covers_every_byte_once() {
        for (size, chunk_size) in [(0, 3), (1, 1), (10, 3), (12, 3), (1000, 7), (7, 1000)] {
            let tasks = partition("file", size, chunk_size);
            assert_eq!(tasks.len(), chunk_count(size, chunk_size));
            assert_eq!(tasks.iter().map(|t| t.length).sum::<u64>(), size);

            let mut expected_offset = 0;
            for (i, task) in tasks.iter().enumerate() {
                assert_eq!(task.index, i);
                assert_eq!(task.offset, expected_offset);
                assert!(task.length > 0 && task.length <= chunk_size);
                expected_offset += task.length;
            }
        }
    }

    #[test]
    fn last_chunk_holds_remainder() {
        let tasks = partition("file", 10, 4);
        let lengths: Vec<_> = tasks.iter().map(|t| t.length).collect();
        assert_eq!(lengths, [4, 4, 2]);

        let even = partition("file", 8, 4);
        assert_eq!(even.last().map(|t| t.length), Some(4));
    }

    #[tokio::test]
    async fn zero_byte_file_finishes_immediately() {
        let client = ShareClient::new(reqwest::Client::new(), "http://127.0.0.1:9").unwrap();
        let scheduler = ChunkScheduler::new(client, ExponentialBuilder::default());
        let mut stream = scheduler.schedule_file("empty", 0, 1024, 4, &CancellationToken::new());
        assert_eq!(stream.total_chunks(), 0);
        assert!(stream.recv().await.is_none());
    }
}
