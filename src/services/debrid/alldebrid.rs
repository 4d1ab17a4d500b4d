//! AllDebrid client
//!
//! Base URL: https://api.alldebrid.com/v4
//!
//! Every call carries `agent` and `apikey` query parameters and answers with a
//! `{status, data, error}` envelope, usually with HTTP 200 even on failure.
//! There is no file selection step: the whole magnet is fetched, and popular
//! content comes back `ready` straight from the upload call.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
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

const BASE_URL: &str = "https://api.alldebrid.com/v4";
const AGENT: &str = "debrid-resolver";
const SERVICE: DebridServiceKind = DebridServiceKind::AllDebrid;

#[derive(Debug, Deserialize)]
pub struct AdEnvelope<T> {
    pub status: String,
    pub data: Option<T>,
    pub error: Option<AdError>,
}

#[derive(Debug, Deserialize)]
pub struct AdError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct AdUploadData {
    pub magnets: Vec<AdUploadedMagnet>,
}

#[derive(Debug, Deserialize)]
pub struct AdUploadedMagnet {
    pub id: Option<u64>,
    #[serde(default)]
    pub ready: bool,
    pub error: Option<AdError>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AdStatusData {
    pub magnets: OneOrMany<AdMagnet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdMagnet {
    pub id: u64,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub status: String,
    pub status_code: i64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub downloaded: u64,
    #[serde(default)]
    pub upload_date: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AdFilesData {
    pub magnets: Vec<AdMagnetFiles>,
}

#[derive(Debug, Deserialize)]
pub struct AdMagnetFiles {
    #[serde(default)]
    pub files: Vec<AdFileNode>,
}

/// Node of the nested file tree: a file carries `s`/`l`, a folder carries `e`
#[derive(Debug, Deserialize)]
pub struct AdFileNode {
    pub n: String,
    #[serde(default)]
    pub s: u64,
    #[serde(default)]
    pub l: Option<String>,
    #[serde(default)]
    pub e: Vec<AdFileNode>,
}

#[derive(Debug, Deserialize)]
pub struct AdUnlockData {
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub filesize: u64,
}

pub struct AllDebridClient {
    http: DebridHttp,
    api_key: String,
    resources: TtlMemo<Vec<ResourceSummary>>,
}

impl AllDebridClient {
    pub fn new(api_key: impl Into<String>, retry: RetryPolicy, memo_ttl: Duration) -> Self {
        Self {
            http: DebridHttp::new(SERVICE, RateLimitedClient::for_alldebrid(), retry, body_error),
            api_key: api_key.into(),
            resources: TtlMemo::new(memo_ttl),
        }
    }

    fn url(path: &str) -> String {
        format!("{}/{}", BASE_URL, path)
    }

    fn auth(&self) -> [(&'static str, &str); 2] {
        [("agent", AGENT), ("apikey", self.api_key.as_str())]
    }

    async fn get_data<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        weight: CallWeight,
        params: &[(&str, &str)],
    ) -> DebridResult<T> {
        let url = Self::url(path);
        let envelope: AdEnvelope<T> = self
            .http
            .send_json(operation, weight, |client| {
                client.get(&url).query(&self.auth()).query(params)
            })
            .await?;
        envelope
            .data
            .ok_or_else(|| DebridError::protocol(SERVICE, format!("{} returned no data", operation)))
    }

    async fn fetch_files(&self, resource_id: &str) -> DebridResult<Vec<RemoteFile>> {
        let data: AdFilesData = self
            .get_data("magnet/files", "magnet/files", CallWeight::Light, &[("id[]", resource_id)])
            .await?;
        let nodes = data
            .magnets
            .into_iter()
            .next()
            .map(|m| m.files)
            .unwrap_or_default();
        Ok(flatten_files(&nodes))
    }
}

/// Map an AllDebrid `statusCode` onto the generic machine
pub fn map_status_code(code: i64) -> ProtocolState {
    match code {
        0..=3 => ProtocolState::Fetching,
        4 => ProtocolState::Ready,
        _ => ProtocolState::Error,
    }
}

/// Flatten the nested file tree depth-first. Files are numbered in visit
/// order starting at 0.
pub fn flatten_files(nodes: &[AdFileNode]) -> Vec<RemoteFile> {
    fn walk(nodes: &[AdFileNode], prefix: &str, out: &mut Vec<RemoteFile>) {
        for node in nodes {
            let path = if prefix.is_empty() {
                node.n.clone()
            } else {
                format!("{}/{}", prefix, node.n)
            };
            if node.e.is_empty() {
                out.push(RemoteFile {
                    id: out.len() as u64,
                    path,
                    size_bytes: node.s,
                    selected: true,
                    link: node.l.clone(),
                });
            } else {
                walk(&node.e, &path, out);
            }
        }
    }

    let mut out = Vec::new();
    walk(nodes, "", &mut out);
    out
}

fn envelope_error(error: &AdError) -> DebridError {
    match error.code.as_str() {
        code if code.starts_with("AUTH_") => DebridError::Auth { service: SERVICE },
        "MAGNET_TOO_MANY_ACTIVE" | "MAGNET_TOO_MANY" => DebridError::QuotaExceeded { service: SERVICE },
        "MAGNET_INVALID_ID" | "LINK_DOWN" | "LINK_NOT_FOUND" => {
            DebridError::not_found(SERVICE, error.message.clone())
        }
        "TOO_MANY_REQUESTS" => DebridError::RateLimited { service: SERVICE },
        "MAINTENANCE" | "GENERIC" => DebridError::Transient {
            service: SERVICE,
            message: format!("{}: {}", error.code, error.message),
        },
        _ => DebridError::protocol(SERVICE, format!("{}: {}", error.code, error.message)),
    }
}

fn body_error(body: &str) -> Option<DebridError> {
    let envelope: AdEnvelope<serde::de::IgnoredAny> = serde_json::from_str(body).ok()?;
    if envelope.status == "success" {
        return None;
    }
    envelope.error.as_ref().map(envelope_error)
}

#[async_trait]
impl DebridAdapter for AllDebridClient {
    fn kind(&self) -> DebridServiceKind {
        SERVICE
    }

    async fn submit(&self, magnet: &str) -> DebridResult<String> {
        let url = Self::url("magnet/upload");
        self.resources.invalidate();
        let envelope: AdEnvelope<AdUploadData> = self
            .http
            .send_json("magnet/upload", CallWeight::Submit, |client| {
                client
                    .post(&url)
                    .query(&self.auth())
                    .form(&[("magnets[]", magnet)])
            })
            .await?;
        let uploaded = envelope
            .data
            .and_then(|d| d.magnets.into_iter().next())
            .ok_or_else(|| DebridError::protocol(SERVICE, "magnet/upload returned no magnet"))?;

        if let Some(error) = &uploaded.error {
            return Err(envelope_error(error));
        }
        let id = uploaded
            .id
            .ok_or_else(|| DebridError::protocol(SERVICE, "magnet/upload returned no id"))?;
        info!(service = %SERVICE, resource_id = id, ready = uploaded.ready, "Magnet uploaded");
        Ok(id.to_string())
    }

    async fn status(&self, resource_id: &str) -> DebridResult<ResourceStatus> {
        let data: AdStatusData = self
            .get_data("magnet/status", "magnet/status", CallWeight::Light, &[("id", resource_id)])
            .await?;
        let magnet = data
            .magnets
            .into_vec()
            .into_iter()
            .next()
            .ok_or_else(|| DebridError::not_found(SERVICE, format!("magnet {}", resource_id)))?;

        let state = map_status_code(magnet.status_code);
        debug!(
            service = %SERVICE,
            resource_id = magnet.id,
            status = %magnet.status,
            status_code = magnet.status_code,
            "Magnet status"
        );

        let progress = if state == ProtocolState::Ready {
            100.0
        } else if magnet.size > 0 {
            magnet.downloaded as f64 * 100.0 / magnet.size as f64
        } else {
            0.0
        };
        let files = if state == ProtocolState::Ready {
            self.fetch_files(resource_id).await?
        } else {
            Vec::new()
        };

        Ok(ResourceStatus {
            state,
            progress,
            files,
            name: magnet.filename,
            detail: Some(magnet.status),
        })
    }

    async fn select_files(&self, _resource_id: &str, _selection: &FileSelection) -> DebridResult<()> {
        Ok(())
    }

    async fn unlock(&self, _resource_id: &str, file: &RemoteFile) -> DebridResult<ResolvedStream> {
        let link = file
            .link
            .as_deref()
            .ok_or_else(|| DebridError::not_found(SERVICE, format!("link for file {}", file.path)))?;
        let data: AdUnlockData = self
            .get_data("link/unlock", "link/unlock", CallWeight::Unlock, &[("link", link)])
            .await?;
        if data.link.is_empty() {
            return Err(DebridError::protocol(SERVICE, "link/unlock returned an empty link"));
        }
        Ok(ResolvedStream {
            url: data.link,
            filename: if data.filename.is_empty() {
                file.file_name().to_string()
            } else {
                data.filename
            },
            size_bytes: data.filesize,
        })
    }

    async fn delete(&self, resource_id: &str) -> DebridResult<()> {
        self.resources.invalidate();
        let _: serde::de::IgnoredAny = self
            .get_data("magnet/delete", "magnet/delete", CallWeight::Light, &[("id", resource_id)])
            .await?;
        Ok(())
    }

    async fn list_resources(&self) -> DebridResult<Vec<ResourceSummary>> {
        if let Some(cached) = self.resources.get() {
            return Ok(cached);
        }
        let data: AdStatusData = self
            .get_data("magnet/status", "magnet/status", CallWeight::Light, &[])
            .await?;
        let resources: Vec<ResourceSummary> = data
            .magnets
            .into_vec()
            .into_iter()
            .map(|m| ResourceSummary {
                id: m.id.to_string(),
                info_hash: m.hash.to_lowercase(),
                state: map_status_code(m.status_code),
                created_at: m.upload_date.and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
            })
            .collect();
        self.resources.set(resources.clone());
        Ok(resources)
    }
}
