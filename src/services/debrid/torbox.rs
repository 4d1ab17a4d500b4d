//! TorBox client
//!
//! Base URL: https://api.torbox.app/v1/api
//!
//! Bearer-authenticated. TorBox can answer "already cached, here are the
//! files" without a submission, enforces a hard active-torrent quota
//! (`ACTIVE_LIMIT`), and counts finished torrents against the account, so
//! torrents created by a resolution are removed once it succeeds.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::DebridAdapter;
use super::error::{DebridError, DebridResult};
use super::http::{CallWeight, DebridHttp};
use super::types::{
    DebridServiceKind, FileSelection, ProtocolState, RemoteFile, ResolvedStream, ResourceStatus,
    ResourceSummary,
};
use crate::services::cache::TtlMemo;
use crate::services::rate_limiter::{RateLimitedClient, RetryPolicy};

const BASE_URL: &str = "https://api.torbox.app/v1/api";
const SERVICE: DebridServiceKind = DebridServiceKind::TorBox;

#[derive(Debug, Deserialize)]
pub struct TbEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    pub error: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct TbCreated {
    pub torrent_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct TbFile {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
pub struct TbTorrent {
    pub id: u64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub download_state: String,
    #[serde(default)]
    pub download_finished: bool,
    /// Fraction complete, 0.0..=1.0
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub files: Option<Vec<TbFile>>,
}

#[derive(Debug, Deserialize)]
pub struct TbCachedFile {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
pub struct TbCachedItem {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub files: Vec<TbCachedFile>,
}

pub struct TorBoxClient {
    http: DebridHttp,
    api_key: String,
    resources: TtlMemo<Vec<ResourceSummary>>,
}

impl TorBoxClient {
    pub fn new(api_key: impl Into<String>, retry: RetryPolicy, memo_ttl: Duration) -> Self {
        Self {
            http: DebridHttp::new(SERVICE, RateLimitedClient::for_torbox(), retry, body_error),
            api_key: api_key.into(),
            resources: TtlMemo::new(memo_ttl),
        }
    }

    fn url(path: &str) -> String {
        format!("{}/{}", BASE_URL, path)
    }

    fn data<T>(envelope: TbEnvelope<T>, operation: &str) -> DebridResult<T> {
        envelope
            .data
            .ok_or_else(|| DebridError::protocol(SERVICE, format!("{} returned no data", operation)))
    }
}

/// Map a TorBox `download_state` onto the generic machine
pub fn map_download_state(state: &str, download_finished: bool) -> ProtocolState {
    let state = state.to_lowercase();
    match state.as_str() {
        "completed" | "cached" | "uploading" | "seeding" => ProtocolState::Ready,
        "metadl" | "checkingresumedata" | "queued" => ProtocolState::Converting,
        s if s.starts_with("error") || s == "failed" || s == "missingfiles" => ProtocolState::Error,
        _ if download_finished => ProtocolState::Ready,
        // downloading, paused, stalled (no seeds), checking
        _ => ProtocolState::Fetching,
    }
}

pub fn map_torrent(torrent: TbTorrent) -> ResourceStatus {
    let state = map_download_state(&torrent.download_state, torrent.download_finished);
    let files = torrent
        .files
        .unwrap_or_default()
        .into_iter()
        .map(|f| RemoteFile {
            id: f.id,
            path: f.name,
            size_bytes: f.size,
            selected: true,
            link: None,
        })
        .collect();
    ResourceStatus {
        state,
        progress: (torrent.progress * 100.0).clamp(0.0, 100.0),
        files,
        name: torrent.name,
        detail: Some(torrent.download_state),
    }
}

fn error_code(code: &str, detail: Option<&str>) -> DebridError {
    match code {
        "BAD_TOKEN" | "AUTH_ERROR" | "NO_AUTH" | "PLAN_RESTRICTED_FEATURE" => {
            DebridError::Auth { service: SERVICE }
        }
        "ACTIVE_LIMIT" => DebridError::QuotaExceeded { service: SERVICE },
        "ITEM_NOT_FOUND" => DebridError::not_found(SERVICE, detail.unwrap_or("item")),
        "COOLDOWN_LIMIT" => DebridError::RateLimited { service: SERVICE },
        "DATABASE_ERROR" | "UNKNOWN_ERROR" | "SERVER_ERROR" => DebridError::Transient {
            service: SERVICE,
            message: format!("{}: {}", code, detail.unwrap_or_default()),
        },
        _ => DebridError::protocol(SERVICE, format!("{}: {}", code, detail.unwrap_or_default())),
    }
}

fn body_error(body: &str) -> Option<DebridError> {
    let envelope: TbEnvelope<serde::de::IgnoredAny> = serde_json::from_str(body).ok()?;
    if envelope.success {
        return None;
    }
    envelope
        .error
        .as_deref()
        .map(|code| error_code(code, envelope.detail.as_deref()))
}

#[async_trait]
impl DebridAdapter for TorBoxClient {
    fn kind(&self) -> DebridServiceKind {
        SERVICE
    }

    async fn submit(&self, magnet: &str) -> DebridResult<String> {
        let url = Self::url("torrents/createtorrent");
        self.resources.invalidate();
        let envelope: TbEnvelope<TbCreated> = self
            .http
            .send_json("createtorrent", CallWeight::Submit, |client| {
                client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .form(&[("magnet", magnet), ("seed", "3"), ("allow_zip", "false")])
            })
            .await?;
        let created = Self::data(envelope, "createtorrent")?;
        info!(service = %SERVICE, resource_id = created.torrent_id, "Torrent created");
        Ok(created.torrent_id.to_string())
    }

    async fn status(&self, resource_id: &str) -> DebridResult<ResourceStatus> {
        let url = Self::url("torrents/mylist");
        let envelope: TbEnvelope<TbTorrent> = self
            .http
            .send_json("mylist", CallWeight::Light, |client| {
                client
                    .get(&url)
                    .bearer_auth(&self.api_key)
                    .query(&[("id", resource_id), ("bypass_cache", "true")])
            })
            .await?;
        let torrent = Self::data(envelope, "mylist")?;
        debug!(
            service = %SERVICE,
            resource_id = torrent.id,
            state = %torrent.download_state,
            progress = torrent.progress,
            "Torrent status"
        );
        Ok(map_torrent(torrent))
    }

    async fn select_files(&self, _resource_id: &str, _selection: &FileSelection) -> DebridResult<()> {
        Ok(())
    }

    async fn unlock(&self, resource_id: &str, file: &RemoteFile) -> DebridResult<ResolvedStream> {
        let url = Self::url("torrents/requestdl");
        let file_id = file.id.to_string();
        let envelope: TbEnvelope<String> = self
            .http
            .send_json("requestdl", CallWeight::Unlock, |client| {
                client.get(&url).query(&[
                    ("token", self.api_key.as_str()),
                    ("torrent_id", resource_id),
                    ("file_id", file_id.as_str()),
                    ("zip_link", "false"),
                ])
            })
            .await?;
        let link = Self::data(envelope, "requestdl")?;
        Ok(ResolvedStream {
            url: link,
            filename: file.file_name().to_string(),
            size_bytes: file.size_bytes,
        })
    }

    async fn delete(&self, resource_id: &str) -> DebridResult<()> {
        let url = Self::url("torrents/controltorrent");
        self.resources.invalidate();
        let torrent_id: u64 = resource_id
            .parse()
            .map_err(|_| DebridError::Internal(format!("invalid torrent id {}", resource_id)))?;
        self.http
            .send_text("controltorrent", CallWeight::Light, |client| {
                client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&json!({ "torrent_id": torrent_id, "operation": "delete" }))
            })
            .await?;
        Ok(())
    }

    async fn list_resources(&self) -> DebridResult<Vec<ResourceSummary>> {
        if let Some(cached) = self.resources.get() {
            return Ok(cached);
        }
        let url = Self::url("torrents/mylist");
        let envelope: TbEnvelope<Vec<TbTorrent>> = self
            .http
            .send_json("mylist", CallWeight::Light, |client| {
                client
                    .get(&url)
                    .bearer_auth(&self.api_key)
                    .query(&[("bypass_cache", "true")])
            })
            .await?;
        let resources: Vec<ResourceSummary> = envelope
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|t| ResourceSummary {
                id: t.id.to_string(),
                info_hash: t.hash.to_lowercase(),
                state: map_download_state(&t.download_state, t.download_finished),
                created_at: t.created_at,
            })
            .collect();
        self.resources.set(resources.clone());
        Ok(resources)
    }

    async fn cached_files(&self, info_hash: &str) -> DebridResult<Option<Vec<RemoteFile>>> {
        let url = Self::url("torrents/checkcached");
        let envelope: TbEnvelope<Vec<TbCachedItem>> = self
            .http
            .send_json("checkcached", CallWeight::Light, |client| {
                client.get(&url).bearer_auth(&self.api_key).query(&[
                    ("hash", info_hash),
                    ("format", "list"),
                    ("list_files", "true"),
                ])
            })
            .await?;
        Ok(cached_item_files(envelope.data.unwrap_or_default(), info_hash))
    }

    fn cleanup_on_success(&self) -> bool {
        true
    }
}

/// Files of the cached entry for `info_hash`, numbered in listing order
pub fn cached_item_files(items: Vec<TbCachedItem>, info_hash: &str) -> Option<Vec<RemoteFile>> {
    let item = items
        .into_iter()
        .find(|item| item.hash.eq_ignore_ascii_case(info_hash))?;
    if item.files.is_empty() {
        return None;
    }
    Some(
        item.files
            .into_iter()
            .enumerate()
            .map(|(index, f)| RemoteFile {
                id: index as u64,
                path: f.name,
                size_bytes: f.size,
                selected: true,
                link: None,
            })
            .collect(),
    )
}
