//! Generic protocol driver
//!
//! Walks any [`DebridAdapter`] through
//! `SUBMITTED → CONVERTING → AWAITING_FILE_SELECTION → FETCHING → READY → UNLOCKED`
//! with bounded polling at each wait. Resources the call created are cleaned
//! up best-effort.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::error::{DebridError, DebridResult};
use super::types::{
    DebridServiceKind, FileSelection, ProtocolState, RemoteFile, ResolvedStream, ResourceStatus,
    ResourceSummary,
};
use super::DebridAdapter;
use crate::services::file_matcher;
use crate::services::file_utils::format_bytes;
use crate::services::rate_limiter::{RetryPolicy, poll_until};

/// Polling bounds and acceptance rules for one resolution
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Waiting for the magnet to be converted into a file list
    pub conversion_poll: RetryPolicy,
    /// Waiting for the provider to finish fetching
    pub fetch_poll: RetryPolicy,
    /// Unlocked streams smaller than this are treated as a non-match
    pub min_stream_size_bytes: u64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            conversion_poll: RetryPolicy::polling(5, Duration::from_secs(1)),
            fetch_poll: RetryPolicy::polling(30, Duration::from_secs(1)),
            min_stream_size_bytes: 50 * 1024 * 1024,
        }
    }
}

/// A provider resource used by this call
#[derive(Debug, Clone)]
struct Resource {
    id: String,
    /// Created by this call, as opposed to found on the account
    owned: bool,
}

/// Tracks the generic state of one resource, rejecting illegal moves
struct StateTracker {
    state: ProtocolState,
    service: DebridServiceKind,
    resource_id: String,
}

impl StateTracker {
    fn new(service: DebridServiceKind, resource_id: &str) -> Self {
        Self {
            state: ProtocolState::Submitted,
            service,
            resource_id: resource_id.to_string(),
        }
    }

    fn observe(&mut self, next: ProtocolState) -> DebridResult<()> {
        if next == self.state {
            return Ok(());
        }
        match self.state.advance(next) {
            Ok(state) => {
                debug!(
                    service = %self.service,
                    resource_id = %self.resource_id,
                    from = %self.state,
                    to = %state,
                    "Protocol transition"
                );
                self.state = state;
                Ok(())
            }
            Err(e) if self.state.is_terminal() || next == ProtocolState::Unlocked => Err(e),
            Err(_) => {
                // Provider listings lag behind; keep the furthest state seen
                debug!(
                    service = %self.service,
                    resource_id = %self.resource_id,
                    current = %self.state,
                    reported = %next,
                    "Ignoring stale provider state"
                );
                Ok(())
            }
        }
    }
}

/// Drives one adapter through the protocol
#[derive(Clone)]
pub struct ProtocolDriver {
    adapter: Arc<dyn DebridAdapter>,
    settings: DriverSettings,
}

impl ProtocolDriver {
    pub fn new(adapter: Arc<dyn DebridAdapter>, settings: DriverSettings) -> Self {
        Self { adapter, settings }
    }

    pub fn service(&self) -> DebridServiceKind {
        self.adapter.kind()
    }

    /// Resolve `magnet` to a playable stream for the target episode (or the
    /// main feature when `target` is `None`). `Ok(None)` means no acceptable
    /// file: nothing matched, or the match was below the minimum size.
    pub async fn resolve_stream(
        &self,
        magnet: &str,
        info_hash: &str,
        target: Option<(u32, u32)>,
    ) -> DebridResult<Option<ResolvedStream>> {
        let resource = self.acquire(magnet, info_hash).await?;
        let outcome = self.drive_to_stream(&resource.id, target).await;

        let succeeded = matches!(outcome, Ok(Some(_)));
        self.release(&resource, succeeded).await;

        match &outcome {
            Ok(Some(stream)) => info!(
                service = %self.service(),
                info_hash = %info_hash,
                filename = %stream.filename,
                size = %format_bytes(stream.size_bytes),
                "Stream resolved"
            ),
            Ok(None) => info!(service = %self.service(), info_hash = %info_hash, "No acceptable stream"),
            Err(e) => warn!(service = %self.service(), info_hash = %info_hash, error = %e, "Resolution failed"),
        }
        outcome
    }

    /// List every file in the torrent behind `magnet`
    pub async fn scan_files(&self, magnet: &str, info_hash: &str) -> DebridResult<Vec<RemoteFile>> {
        match self.adapter.cached_files(info_hash).await {
            Ok(Some(files)) => {
                info!(
                    service = %self.service(),
                    info_hash = %info_hash,
                    count = files.len(),
                    "Provider already holds content, skipping submission"
                );
                return Ok(files);
            }
            Ok(None) => {}
            Err(e @ DebridError::Auth { .. }) => return Err(e),
            Err(e) => warn!(service = %self.service(), error = %e, "Cached check failed"),
        }

        let resource = self.acquire(magnet, info_hash).await?;
        let outcome = self.drive_to_listing(&resource.id).await;
        self.release(&resource, outcome.is_ok()).await;

        if let Ok(files) = &outcome {
            info!(
                service = %self.service(),
                info_hash = %info_hash,
                count = files.len(),
                "Pack scanned"
            );
        }
        outcome
    }

    /// Reuse a resource the account already holds, otherwise submit
    async fn acquire(&self, magnet: &str, info_hash: &str) -> DebridResult<Resource> {
        match self.adapter.find_existing(info_hash).await {
            Ok(Some(existing)) => {
                info!(
                    service = %self.service(),
                    info_hash = %info_hash,
                    resource_id = %existing.id,
                    state = %existing.state,
                    "Reusing resource already on the account"
                );
                return Ok(Resource {
                    id: existing.id,
                    owned: false,
                });
            }
            Ok(None) => {}
            Err(e @ DebridError::Auth { .. }) => return Err(e),
            Err(e) => warn!(service = %self.service(), error = %e, "Resource lookup failed, submitting"),
        }

        let id = self.submit_with_eviction(magnet, info_hash).await?;
        Ok(Resource { id, owned: true })
    }

    /// Submit; on a quota refusal evict exactly one resource and retry once
    async fn submit_with_eviction(&self, magnet: &str, info_hash: &str) -> DebridResult<String> {
        match self.submit_once(magnet, info_hash).await {
            Err(DebridError::QuotaExceeded { service }) => {
                warn!(service = %service, "Active resource quota reached");
                self.evict_oldest_completed().await?;
                self.submit_once(magnet, info_hash).await
            }
            other => other,
        }
    }

    /// A submission that failed in flight may still have been accepted; look
    /// it up instead of submitting again
    async fn submit_once(&self, magnet: &str, info_hash: &str) -> DebridResult<String> {
        let err = match self.adapter.submit(magnet).await {
            Ok(id) => return Ok(id),
            Err(e) if e.may_have_landed() => e,
            Err(e) => return Err(e),
        };
        match self.adapter.find_existing(info_hash).await {
            Ok(Some(landed)) => {
                info!(
                    service = %self.service(),
                    info_hash = %info_hash,
                    resource_id = %landed.id,
                    error = %err,
                    "Submission failed in flight but reached the account"
                );
                Ok(landed.id)
            }
            Ok(None) => Err(err),
            Err(lookup) => {
                warn!(service = %self.service(), error = %lookup, "Lookup after failed submission failed");
                Err(err)
            }
        }
    }

    async fn evict_oldest_completed(&self) -> DebridResult<()> {
        let service = self.service();
        let resources = self.adapter.list_resources().await?;
        let victim = oldest_completed(&resources).ok_or(DebridError::QuotaExceeded { service })?;
        info!(
            service = %service,
            resource_id = %victim.id,
            info_hash = %victim.info_hash,
            "Evicting oldest completed resource"
        );
        self.adapter.delete(&victim.id).await
    }

    async fn release(&self, resource: &Resource, succeeded: bool) {
        if !resource.owned || (succeeded && !self.adapter.cleanup_on_success()) {
            return;
        }
        match self.adapter.delete(&resource.id).await {
            Ok(()) => debug!(service = %self.service(), resource_id = %resource.id, "Resource cleaned up"),
            Err(e) => warn!(
                service = %self.service(),
                resource_id = %resource.id,
                error = %e,
                "Cleanup failed"
            ),
        }
    }

    /// Poll until `done` holds or the provider reports an error
    async fn poll(
        &self,
        tracker: &mut StateTracker,
        resource_id: &str,
        policy: &RetryPolicy,
        operation: &str,
        done: fn(&ResourceStatus) -> bool,
    ) -> DebridResult<ResourceStatus> {
        let polled = poll_until(
            || self.adapter.status(resource_id),
            |s: &ResourceStatus| s.state == ProtocolState::Error || done(s),
            policy,
            operation,
        )
        .await;

        let status = match polled {
            Ok(status) => status,
            Err(e) => {
                tracker.observe(ProtocolState::Error)?;
                return Err(e);
            }
        };

        tracker.observe(status.state)?;
        if status.state == ProtocolState::Error {
            return Err(DebridError::protocol(
                self.service(),
                format!(
                    "resource {} failed: {}",
                    resource_id,
                    status.detail.as_deref().unwrap_or("error")
                ),
            ));
        }
        Ok(status)
    }

    async fn drive_to_stream(
        &self,
        resource_id: &str,
        target: Option<(u32, u32)>,
    ) -> DebridResult<Option<ResolvedStream>> {
        let (season, episode) = target.unzip();
        let mut tracker = StateTracker::new(self.service(), resource_id);

        let mut status = self
            .poll(
                &mut tracker,
                resource_id,
                &self.settings.conversion_poll,
                "conversion",
                |s| !s.state.is_pre_selection(),
            )
            .await?;

        if status.state == ProtocolState::AwaitingFileSelection {
            let selection = match file_matcher::match_file(&status.files, season, episode) {
                Some(file) => FileSelection::One(file.id),
                None => FileSelection::All,
            };
            debug!(service = %self.service(), resource_id = %resource_id, selection = ?selection, "Selecting files");
            self.adapter.select_files(resource_id, &selection).await?;
            tracker.observe(ProtocolState::Fetching)?;
        }

        if status.state != ProtocolState::Ready {
            status = self
                .poll(
                    &mut tracker,
                    resource_id,
                    &self.settings.fetch_poll,
                    "fetch",
                    |s| s.state == ProtocolState::Ready,
                )
                .await?;
        }

        let selected: Vec<RemoteFile> = if status.files.iter().any(|f| f.selected) {
            status.files.into_iter().filter(|f| f.selected).collect()
        } else {
            status.files
        };
        let Some(chosen) = file_matcher::match_file(&selected, season, episode).cloned() else {
            return Ok(None);
        };

        let stream = self.adapter.unlock(resource_id, &chosen).await?;
        tracker.observe(ProtocolState::Unlocked)?;

        let size = if stream.size_bytes > 0 {
            stream.size_bytes
        } else {
            chosen.size_bytes
        };
        if size < self.settings.min_stream_size_bytes {
            info!(
                service = %self.service(),
                file = %chosen.path,
                size = %format_bytes(size),
                minimum = %format_bytes(self.settings.min_stream_size_bytes),
                "Unlocked file below minimum size, rejecting"
            );
            return Ok(None);
        }
        Ok(Some(stream))
    }

    async fn drive_to_listing(&self, resource_id: &str) -> DebridResult<Vec<RemoteFile>> {
        let mut tracker = StateTracker::new(self.service(), resource_id);

        let status = self
            .poll(
                &mut tracker,
                resource_id,
                &self.settings.conversion_poll,
                "conversion",
                |s| !s.state.is_pre_selection(),
            )
            .await?;
        if !status.files.is_empty() {
            return Ok(status.files);
        }

        let status = self
            .poll(
                &mut tracker,
                resource_id,
                &self.settings.fetch_poll,
                "listing",
                |s| !s.files.is_empty() || s.state == ProtocolState::Ready,
            )
            .await?;
        if status.files.is_empty() {
            return Err(DebridError::protocol(
                self.service(),
                format!("resource {} has no files", resource_id),
            ));
        }
        Ok(status.files)
    }
}

/// The completed resource with the oldest creation time; undated resources
/// sort last
pub fn oldest_completed(resources: &[ResourceSummary]) -> Option<&ResourceSummary> {
    resources
        .iter()
        .filter(|r| r.is_completed())
        .min_by_key(|r| (r.created_at.is_none(), r.created_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn summary(id: &str, state: ProtocolState, day: Option<u32>) -> ResourceSummary {
        ResourceSummary {
            id: id.to_string(),
            info_hash: format!("{:0>40}", id),
            state,
            created_at: day.map(|d| Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()),
        }
    }

    #[test]
    fn test_oldest_completed_skips_active() {
        let resources = vec![
            summary("new", ProtocolState::Ready, Some(20)),
            summary("downloading", ProtocolState::Fetching, Some(1)),
            summary("old", ProtocolState::Ready, Some(5)),
            summary("undated", ProtocolState::Ready, None),
        ];
        assert_eq!(oldest_completed(&resources).map(|r| r.id.as_str()), Some("old"));
    }

    #[test]
    fn test_oldest_completed_none_when_all_active() {
        let resources = vec![summary("a", ProtocolState::Fetching, Some(1))];
        assert!(oldest_completed(&resources).is_none());
    }

    #[test]
    fn test_tracker_ignores_stale_states() {
        let mut tracker = StateTracker::new(DebridServiceKind::RealDebrid, "1");
        tracker.observe(ProtocolState::Fetching).unwrap();
        tracker.observe(ProtocolState::Converting).unwrap();
        assert_eq!(tracker.state, ProtocolState::Fetching);
    }

    #[test]
    fn test_tracker_rejects_unlock_before_ready() {
        let mut tracker = StateTracker::new(DebridServiceKind::TorBox, "1");
        tracker.observe(ProtocolState::Fetching).unwrap();
        assert!(tracker.observe(ProtocolState::Unlocked).is_err());
    }

    #[test]
    fn test_tracker_terminal_is_final() {
        let mut tracker = StateTracker::new(DebridServiceKind::AllDebrid, "1");
        tracker.observe(ProtocolState::Error).unwrap();
        assert!(tracker.observe(ProtocolState::Ready).is_err());
    }

    #[test]
    fn test_default_settings() {
        let settings = DriverSettings::default();
        assert_eq!(settings.conversion_poll.max_attempts, 5);
        assert_eq!(settings.fetch_poll.max_attempts, 30);
        assert_eq!(settings.min_stream_size_bytes, 50 * 1024 * 1024);
    }
}
