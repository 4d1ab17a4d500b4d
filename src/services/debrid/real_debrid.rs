//! Real-Debrid client
//!
//! Base URL: https://api.real-debrid.com/rest/1.0
//!
//! Protocol: form-encoded `addMagnet`, polling `torrents/info/{id}`, an
//! explicit `selectFiles` step once the magnet is converted, then
//! `unrestrict/link` on the per-file hoster link. Links in the info payload
//! line up with the selected files in id order.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use super::error::{DebridError, DebridResult};
use super::http::{CallWeight, DebridHttp};
use super::types::{
    DebridServiceKind, FileSelection, ProtocolState, RemoteFile, ResolvedStream, ResourceStatus,
    ResourceSummary,
};
use super::{DebridAdapter, http};
use crate::services::cache::TtlMemo;
use crate::services::rate_limiter::{RateLimitedClient, RetryPolicy};

const BASE_URL: &str = "https://api.real-debrid.com/rest/1.0";
const SERVICE: DebridServiceKind = DebridServiceKind::RealDebrid;

#[derive(Debug, Deserialize)]
pub struct RdAddMagnet {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct RdFile {
    pub id: u64,
    pub path: String,
    pub bytes: u64,
    #[serde(default)]
    pub selected: u8,
}

#[derive(Debug, Deserialize)]
pub struct RdTorrentInfo {
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub hash: String,
    pub status: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub files: Vec<RdFile>,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RdTorrentListItem {
    pub id: String,
    pub hash: String,
    pub status: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub added: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RdUnrestrict {
    pub filename: String,
    #[serde(default)]
    pub filesize: u64,
    pub download: String,
}

#[derive(Debug, Deserialize)]
struct RdErrorBody {
    #[serde(default)]
    error: String,
    error_code: Option<i64>,
}

pub struct RealDebridClient {
    http: DebridHttp,
    api_key: String,
    resources: TtlMemo<Vec<ResourceSummary>>,
}

impl RealDebridClient {
    pub fn new(api_key: impl Into<String>, retry: RetryPolicy, memo_ttl: Duration) -> Self {
        Self {
            http: DebridHttp::new(SERVICE, RateLimitedClient::for_real_debrid(), retry, body_error),
            api_key: api_key.into(),
            resources: TtlMemo::new(memo_ttl),
        }
    }

    fn url(path: &str) -> String {
        format!("{}/{}", BASE_URL, path)
    }
}

/// Map a Real-Debrid torrent status onto the generic machine
pub fn map_status(status: &str, progress: f64) -> ProtocolState {
    match status {
        "magnet_conversion" => ProtocolState::Converting,
        "waiting_files_selection" => ProtocolState::AwaitingFileSelection,
        "downloading" if progress >= 100.0 => ProtocolState::Ready,
        "queued" | "downloading" | "compressing" | "uploading" => ProtocolState::Fetching,
        "downloaded" => ProtocolState::Ready,
        "magnet_error" | "error" | "virus" | "dead" => ProtocolState::Error,
        _ => ProtocolState::Converting,
    }
}

/// Build the generic status, attaching hoster links to the selected files
pub fn map_info(info: RdTorrentInfo) -> ResourceStatus {
    let state = map_status(&info.status, info.progress);
    let mut links = info.links.into_iter();

    let mut files: Vec<RemoteFile> = info
        .files
        .into_iter()
        .map(|f| RemoteFile {
            id: f.id,
            path: f.path.trim_start_matches('/').to_string(),
            size_bytes: f.bytes,
            selected: f.selected == 1,
            link: None,
        })
        .collect();
    files.sort_by_key(|f| f.id);
    for file in files.iter_mut().filter(|f| f.selected) {
        file.link = links.next();
    }

    ResourceStatus {
        state,
        progress: info.progress,
        files,
        name: info.filename,
        detail: Some(info.status),
    }
}

fn body_error(body: &str) -> Option<DebridError> {
    let parsed: RdErrorBody = serde_json::from_str(body).ok()?;
    match parsed.error_code? {
        8 | 9 | 12 | 14 | 22 => Some(DebridError::Auth { service: SERVICE }),
        5 | 34 => Some(DebridError::RateLimited { service: SERVICE }),
        7 => Some(DebridError::not_found(SERVICE, parsed.error)),
        21 => Some(DebridError::QuotaExceeded { service: SERVICE }),
        _ => None,
    }
}

#[async_trait]
impl DebridAdapter for RealDebridClient {
    fn kind(&self) -> DebridServiceKind {
        SERVICE
    }

    async fn submit(&self, magnet: &str) -> DebridResult<String> {
        let url = Self::url("torrents/addMagnet");
        self.resources.invalidate();
        let added: RdAddMagnet = self
            .http
            .send_json("addMagnet", CallWeight::Submit, |client| {
                client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .form(&[("magnet", magnet)])
            })
            .await?;
        info!(service = %SERVICE, resource_id = %added.id, "Magnet added");
        Ok(added.id)
    }

    async fn status(&self, resource_id: &str) -> DebridResult<ResourceStatus> {
        let url = Self::url(&format!("torrents/info/{}", resource_id));
        let info: RdTorrentInfo = self
            .http
            .send_json("torrents/info", CallWeight::Light, |client| {
                client.get(&url).bearer_auth(&self.api_key)
            })
            .await?;
        debug!(
            service = %SERVICE,
            resource_id = %info.id,
            status = %info.status,
            progress = info.progress,
            "Torrent info"
        );
        Ok(map_info(info))
    }

    async fn select_files(&self, resource_id: &str, selection: &FileSelection) -> DebridResult<()> {
        let url = Self::url(&format!("torrents/selectFiles/{}", resource_id));
        let files = match selection {
            FileSelection::One(id) => id.to_string(),
            FileSelection::All => "all".to_string(),
        };
        self.http
            .send_text("selectFiles", CallWeight::Light, |client| {
                client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .form(&[("files", files.as_str())])
            })
            .await?;
        Ok(())
    }

    async fn unlock(&self, _resource_id: &str, file: &RemoteFile) -> DebridResult<ResolvedStream> {
        let link = file
            .link
            .as_deref()
            .ok_or_else(|| DebridError::not_found(SERVICE, format!("link for file {}", file.id)))?;
        let url = Self::url("unrestrict/link");
        let unrestricted: RdUnrestrict = self
            .http
            .send_json("unrestrict/link", CallWeight::Unlock, |client| {
                client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .form(&[("link", link)])
            })
            .await?;
        Ok(ResolvedStream {
            url: unrestricted.download,
            filename: unrestricted.filename,
            size_bytes: unrestricted.filesize,
        })
    }

    async fn delete(&self, resource_id: &str) -> DebridResult<()> {
        let url = Self::url(&format!("torrents/delete/{}", resource_id));
        self.resources.invalidate();
        self.http
            .send_text("torrents/delete", CallWeight::Light, |client| {
                client.delete(&url).bearer_auth(&self.api_key)
            })
            .await?;
        Ok(())
    }

    async fn list_resources(&self) -> DebridResult<Vec<ResourceSummary>> {
        if let Some(cached) = self.resources.get() {
            return Ok(cached);
        }
        let url = Self::url("torrents");
        let body = self
            .http
            .send_text("torrents", CallWeight::Light, |client| {
                client
                    .get(&url)
                    .bearer_auth(&self.api_key)
                    .query(&[("limit", "100")])
            })
            .await?;
        // An empty account answers 204 with no body
        let items: Vec<RdTorrentListItem> = if body.trim().is_empty() {
            Vec::new()
        } else {
            http::decode(SERVICE, "torrents", &body)?
        };
        let resources: Vec<ResourceSummary> = items
            .into_iter()
            .map(|item| ResourceSummary {
                state: map_status(&item.status, item.progress),
                id: item.id,
                info_hash: item.hash.to_lowercase(),
                created_at: item.added,
            })
            .collect();
        self.resources.set(resources.clone());
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("magnet_conversion", 0.0), ProtocolState::Converting);
        assert_eq!(
            map_status("waiting_files_selection", 0.0),
            ProtocolState::AwaitingFileSelection
        );
        assert_eq!(map_status("queued", 0.0), ProtocolState::Fetching);
        assert_eq!(map_status("downloading", 42.0), ProtocolState::Fetching);
        assert_eq!(map_status("downloading", 100.0), ProtocolState::Ready);
        assert_eq!(map_status("downloaded", 100.0), ProtocolState::Ready);
        assert_eq!(map_status("magnet_error", 0.0), ProtocolState::Error);
        assert_eq!(map_status("virus", 0.0), ProtocolState::Error);
    }

    #[test]
    fn test_info_links_follow_selected_files() {
        let info: RdTorrentInfo = serde_json::from_str(
            r#"{
                "id": "ABC",
                "filename": "Show.S01",
                "hash": "c12fe1c06bba254a9dc9f519b335aa7c1367a88a",
                "status": "downloaded",
                "progress": 100,
                "files": [
                    {"id": 2, "path": "/Show.S01E02.mkv", "bytes": 900, "selected": 1},
                    {"id": 1, "path": "/Show.S01E01.mkv", "bytes": 800, "selected": 1},
                    {"id": 3, "path": "/info.nfo", "bytes": 1, "selected": 0}
                ],
                "links": ["https://real-debrid.com/d/one", "https://real-debrid.com/d/two"]
            }"#,
        )
        .unwrap();

        let status = map_info(info);
        assert_eq!(status.state, ProtocolState::Ready);
        assert_eq!(status.files[0].path, "Show.S01E01.mkv");
        assert_eq!(status.files[0].link.as_deref(), Some("https://real-debrid.com/d/one"));
        assert_eq!(status.files[1].link.as_deref(), Some("https://real-debrid.com/d/two"));
        assert_eq!(status.files[2].link, None);
        assert!(!status.files[2].selected);
    }

    #[test]
    fn test_error_codes() {
        assert_matches!(
            body_error(r#"{"error":"bad_token","error_code":8}"#),
            Some(DebridError::Auth { .. })
        );
        assert_matches!(
            body_error(r#"{"error":"too_many_active_downloads","error_code":21}"#),
            Some(DebridError::QuotaExceeded { .. })
        );
        assert_matches!(
            body_error(r#"{"error":"too_many_requests","error_code":34}"#),
            Some(DebridError::RateLimited { .. })
        );
        assert_eq!(body_error(r#"{"error":"unknown","error_code":-1}"#), None);
        assert_eq!(body_error("not json"), None);
    }

    #[test]
    fn test_list_item_decodes_timestamp() {
        let items: Vec<RdTorrentListItem> = serde_json::from_str(
            r#"[{"id":"X","hash":"ABCDEF","status":"downloaded","progress":100,"added":"2024-05-01T10:00:00.000Z"}]"#,
        )
        .unwrap();
        assert!(items[0].added.is_some());
    }
}
