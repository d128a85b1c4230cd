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


use bytes::Bytes;
use reqwest::{
    RequestBuilder, Response, StatusCode, Url,
    header::{self, HeaderMap},
};
use serde::Deserialize;
use snafu::{ResultExt, ensure};

use crate::{
    config::DownloaderConfig,
    error::{
        BuildClientSnafu, DecodeSnafu, DownloadError, InvalidBaseUrlSnafu, NetworkSnafu,
        RangeMisplacedSnafu, RangeSnafu, UnsupportedKindSnafu,
    },
    tree::NodeKind,
};

/// Path of the share data API below the service base URL.
const SHARE_DATA_PATH: [&str; 5] = ["api", "v3", "onezone", "shares", "data"];

/// Metadata of one remote node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub identifier: String,
    pub name:       String,
    pub kind:       NodeKind,
    pub size:       Option<u64>,
}

/// A child as it appears in a directory listing.
///
/// Listings may omit the type and size; `kind` is kept raw so the resolver
/// can decide what to do with types it does not support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub identifier: String,
    pub name:       String,
    pub kind:       Option<String>,
    pub size:       Option<u64>,
}

/// One page of a directory listing.
#[derive(Debug, Clone, Default)]
pub struct ChildrenPage {
    pub entries:         Vec<ListedEntry>,
    /// Token for the next page, `None` on the last page.
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChildrenResponse {
    children:        Vec<ChildEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    is_last:         Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ChildEntry {
    #[serde(alias = "fileId", alias = "file_id")]
    id:   String,
    name: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    id:          Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Request/response wrapper around the share service's REST endpoints.
///
/// Cloning is cheap and clones share one connection pool, so a single client
/// can serve every resolver call and chunk worker concurrently.
#[derive(Debug, Clone)]
pub struct ShareClient {
    client:   reqwest::Client,
    base_url: Url,
}

impl ShareClient {
    /// Wrap an existing HTTP client.
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, DownloadError> {
        let base_url = Url::parse(base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                InvalidBaseUrlSnafu {
                    url: base_url.to_string(),
                }
                .build()
            })?;
        Ok(Self { client, base_url })
    }

    /// Build an HTTP client from the timeout and user agent in `config`.
    pub fn from_config(config: &DownloaderConfig) -> Result<Self, DownloadError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout.unsigned_abs());

        if let Some(ref ua) = config.user_agent {
            builder = builder.user_agent(ua);
        }

        let client = builder.build().context(BuildClientSnafu)?;
        Self::new(client, &config.base_url)
    }

    pub const fn base_url(&self) -> &Url { &self.base_url }

    /// Resolve kind, name and size of `identifier`.
    pub async fn get_metadata(&self, identifier: &str) -> Result<NodeInfo, DownloadError> {
        let url = self.endpoint(identifier, None);
        let response = self.send(identifier, self.client.get(url)).await?;
        let metadata: MetadataResponse = Self::decode(identifier, response).await?;

        let kind = metadata.kind.parse::<NodeKind>().ok().ok_or_else(|| {
            UnsupportedKindSnafu {
                identifier,
                kind: metadata.kind.clone(),
            }
            .build()
        })?;

        Ok(NodeInfo {
            identifier: identifier.to_string(),
            name: metadata.name,
            kind,
            size: metadata.size,
        })
    }

    /// Fetch one page of the immediate children of `identifier`.
    pub async fn list_children(
        &self,
        identifier: &str,
        page_token: Option<&str>,
        limit: usize,
    ) -> Result<ChildrenPage, DownloadError> {
        let mut url = self.endpoint(identifier, Some("children"));
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some(token) = page_token {
                query.append_pair("token", token);
            }
        }

        let response = self.send(identifier, self.client.get(url)).await?;
        let page: ChildrenResponse = Self::decode(identifier, response).await?;

        let next_page_token = if page.is_last == Some(true) {
            None
        } else {
            page.next_page_token.filter(|token| !token.is_empty())
        };

        Ok(ChildrenPage {
            entries: page
                .children
                .into_iter()
                .map(|child| ListedEntry {
                    identifier: child.id,
                    name:       child.name,
                    kind:       child.kind,
                    size:       child.size,
                })
                .collect(),
            next_page_token,
        })
    }

    /// Fetch exactly `length` bytes of the content of `identifier` starting
    /// at `offset`.
    pub async fn fetch_range(
        &self,
        identifier: &str,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, DownloadError> {
        if length == 0 {
            return Ok(Bytes::new());
        }

        let range_header = format!("bytes={}-{}", offset, offset + length - 1);
        let url = self.endpoint(identifier, Some("content"));
        let request = self.client.get(url).header(header::RANGE, range_header);
        let response = self.send(identifier, request).await?;

        // A plain 200 means the range was ignored; only acceptable when the
        // whole body is exactly what was asked for.
        let ignored_range = response.status() == StatusCode::OK && offset != 0;
        if response.status() == StatusCode::PARTIAL_CONTENT
            && let Some(start) = content_range_start(response.headers())
        {
            ensure!(
                start == offset,
                RangeMisplacedSnafu {
                    identifier,
                    offset,
                    returned: start,
                }
            );
        }
        let body = response.bytes().await.context(NetworkSnafu { identifier })?;

        ensure!(
            !ignored_range && body.len() as u64 == length,
            RangeSnafu {
                identifier,
                offset,
                expected: length,
                actual: body.len() as u64,
            }
        );

        Ok(body)
    }

    fn endpoint(&self, identifier: &str, suffix: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        // Base URLs are checked in `new`, so segments are always available.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(SHARE_DATA_PATH).push(identifier);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        url
    }

    async fn send(
        &self,
        identifier: &str,
        request: RequestBuilder,
    ) -> Result<Response, DownloadError> {
        let response = request.send().await.context(NetworkSnafu { identifier })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(identifier, status, &body))
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        identifier: &str,
        response: Response,
    ) -> Result<T, DownloadError> {
        let body = response.bytes().await.context(NetworkSnafu { identifier })?;
        serde_json::from_slice(&body).context(DecodeSnafu { identifier })
    }
}

/// Start offset of a `Content-Range: bytes {start}-{end}/{total}` header.
fn content_range_start(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(header::CONTENT_RANGE)?.to_str().ok()?;
    let (start, _) = value.trim().strip_prefix("bytes ")?.split_once('-')?;
    start.trim().parse().ok()
}

/// Map a non-success HTTP status onto the error taxonomy.
fn status_error(identifier: &str, status: StatusCode, body: &str) -> DownloadError {
    let api_error = serde_json::from_str::<ErrorResponse>(body).ok();
    let error_id = api_error.as_ref().and_then(|e| e.error.id.as_deref());

    if status == StatusCode::NOT_FOUND || error_id == Some("notFound") {
        return DownloadError::NotFound {
            identifier: identifier.to_string(),
        };
    }

    match status {
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => DownloadError::Transient {
            identifier: identifier.to_string(),
            status:     status.as_u16(),
        },
        _ => {
            let detail = api_error
                .and_then(|e| e.error.description.or(e.error.id))
                .unwrap_or_else(|| body.chars().take(200).collect());
            DownloadError::Service {
                identifier: identifier.to_string(),
                message:    format!("HTTP {}: {detail}", status.as_u16()),
            }
        }
    }
}
