//! Resolution facade
//!
//! The public surface of the crate: turn a torrent into a playable stream, or
//! find the right file inside a pack. Pack lookups go through the persisted
//! pack cache first; misses trigger one coordinated scan per info-hash whose
//! results are classified and persisted for every later caller.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::coordinator::{Flight, RequestCoordinator};
use super::debrid::{
    AdapterFactory, DebridCredentials, DebridError, DebridResult, DriverSettings, MatchResult,
    ProtocolDriver, RemoteFile, ResolutionRequest, ResolvedStream,
};
use super::file_matcher;
use super::file_utils::is_playable_video;
use super::filename_parser::parse_season_episode;
use super::magnet;
use crate::db::{CachedPackEntry, PackStore, PackTorrent};

/// Tunables for the facade
#[derive(Debug, Clone)]
pub struct ResolutionSettings {
    pub driver: DriverSettings,
    /// Movie pack scans older than this are rescanned
    pub movie_pack_ttl_days: u32,
}

impl Default for ResolutionSettings {
    fn default() -> Self {
        Self {
            driver: DriverSettings::default(),
            movie_pack_ttl_days: 30,
        }
    }
}

/// Outcome of a pack lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackResolution {
    Found(MatchResult),
    /// The pack is scanned and does not contain the requested content
    NotInPack,
}

impl PackResolution {
    pub fn found(&self) -> Option<&MatchResult> {
        match self {
            PackResolution::Found(m) => Some(m),
            PackResolution::NotInPack => None,
        }
    }
}

pub struct ResolutionService {
    coordinator: Arc<RequestCoordinator>,
    store: Arc<dyn PackStore>,
    adapters: Arc<dyn AdapterFactory>,
    settings: ResolutionSettings,
}

impl ResolutionService {
    pub fn new(
        coordinator: Arc<RequestCoordinator>,
        store: Arc<dyn PackStore>,
        adapters: Arc<dyn AdapterFactory>,
        settings: ResolutionSettings,
    ) -> Self {
        Self {
            coordinator,
            store,
            adapters,
            settings,
        }
    }

    fn driver(&self, credentials: &DebridCredentials) -> ProtocolDriver {
        ProtocolDriver::new(self.adapters.adapter(credentials), self.settings.driver.clone())
    }

    /// Resolve a torrent (optionally a specific episode in it) to a directly
    /// playable URL. `Ok(None)` means no acceptable stream.
    pub async fn resolve_single_stream(
        &self,
        request: &ResolutionRequest,
    ) -> DebridResult<Option<ResolvedStream>> {
        let target = request.target_episode();
        let key = stream_key(request);
        let driver = self.driver(&request.credentials);
        let magnet = request.magnet_uri.clone();
        let info_hash = request.info_hash.clone();

        info!(
            service = %request.credentials.service,
            info_hash = %request.info_hash,
            season = ?request.season,
            episode = ?request.episode,
            "Resolving stream"
        );

        let flight = self
            .coordinator
            .stream(&key, move || async move {
                driver.resolve_stream(&magnet, &info_hash, target).await
            })
            .await;
        if !flight.leader {
            debug!(info_hash = %request.info_hash, "Joined in-flight stream resolution");
        }
        flight.result
    }

    /// Find the file for (season, episode) inside a series pack
    pub async fn resolve_series_pack_file(
        &self,
        info_hash: &str,
        credentials: &DebridCredentials,
        series_id: &str,
        season: u32,
        episode: u32,
    ) -> DebridResult<PackResolution> {
        let hash = normalize(info_hash)?;

        match self.store.get_episode_file(&hash, season, episode).await {
            Ok(Some(entry)) => {
                debug!(info_hash = %hash, season, episode, "Episode file cache hit");
                return Ok(PackResolution::Found(entry.to_match()));
            }
            Ok(None) => {}
            Err(e) => warn!(info_hash = %hash, error = %e, "Episode file lookup failed"),
        }

        match self.store.get_pack_files(&hash, None).await {
            Ok(lookup) if lookup.is_fresh() => {
                debug!(info_hash = %hash, season, episode, "Pack already scanned");
                let files: Vec<RemoteFile> = lookup.files.iter().map(|f| f.to_remote_file()).collect();
                return Ok(find_episode(&files, season, episode));
            }
            Ok(_) => {}
            Err(e) => warn!(info_hash = %hash, error = %e, "Pack lookup failed"),
        }

        let flight = self
            .coordinated_scan(&hash, credentials, Some(series_id.to_string()), false)
            .await;
        let files = self.files_after_scan(&hash, flight).await?;
        let resolution = find_episode(&files, season, episode);
        info!(
            info_hash = %hash,
            series_id = %series_id,
            season,
            episode,
            found = resolution.found().is_some(),
            "Series pack resolved"
        );
        Ok(resolution)
    }

    /// Find the main feature inside a movie pack by title and year
    pub async fn resolve_movie_pack_file(
        &self,
        info_hash: &str,
        credentials: &DebridCredentials,
        title_candidates: &[String],
        year: Option<u32>,
        force_refresh: bool,
    ) -> DebridResult<PackResolution> {
        let hash = normalize(info_hash)?;
        let min_size = self.settings.driver.min_stream_size_bytes;
        let mut stale = force_refresh;

        if !force_refresh {
            match self
                .store
                .get_pack_files(&hash, Some(self.settings.movie_pack_ttl_days))
                .await
            {
                Ok(lookup) if lookup.is_fresh() => {
                    debug!(info_hash = %hash, "Movie pack cache hit");
                    let files: Vec<RemoteFile> =
                        lookup.files.iter().map(|f| f.to_remote_file()).collect();
                    return Ok(select_movie(&files, title_candidates, year, min_size));
                }
                Ok(lookup) => {
                    if lookup.expired {
                        info!(info_hash = %hash, "Movie pack scan expired, rescanning");
                        stale = true;
                    }
                }
                Err(e) => warn!(info_hash = %hash, error = %e, "Pack lookup failed"),
            }
        }

        let flight = self.coordinated_scan(&hash, credentials, None, stale).await;
        let files = self.files_after_scan(&hash, flight).await?;
        let resolution = select_movie(&files, title_candidates, year, min_size);
        info!(
            info_hash = %hash,
            found = resolution.found().is_some(),
            "Movie pack resolved"
        );
        Ok(resolution)
    }

    /// One scan per hash process-wide; the leader persists what it finds
    async fn coordinated_scan(
        &self,
        hash: &str,
        credentials: &DebridCredentials,
        series_id: Option<String>,
        replace: bool,
    ) -> Flight<Vec<RemoteFile>> {
        let driver = self.driver(credentials);
        let store = Arc::clone(&self.store);
        let hash_owned = hash.to_string();

        self.coordinator
            .scan(hash, move || async move {
                let magnet = magnet::build_magnet(&hash_owned, None);
                let files = driver.scan_files(&magnet, &hash_owned).await?;
                if replace {
                    if let Err(e) = store.delete_pack(&hash_owned).await {
                        warn!(info_hash = %hash_owned, error = %e, "Failed to drop stale pack");
                    }
                }
                persist_scan(store.as_ref(), &hash_owned, &files, series_id, &driver.service().to_string())
                    .await;
                Ok(files)
            })
            .await
    }

    /// Files to match against once a scan finished. Callers that joined
    /// someone else's scan read what it persisted.
    async fn files_after_scan(
        &self,
        hash: &str,
        flight: Flight<Vec<RemoteFile>>,
    ) -> DebridResult<Vec<RemoteFile>> {
        let scanned = flight.result?;
        if flight.leader {
            return Ok(scanned);
        }
        match self.store.get_pack_files(hash, None).await {
            Ok(lookup) if !lookup.files.is_empty() => {
                Ok(lookup.files.iter().map(|f| f.to_remote_file()).collect())
            }
            Ok(_) => Ok(scanned),
            Err(e) => {
                warn!(info_hash = %hash, error = %e, "Re-reading scanned pack failed");
                Ok(scanned)
            }
        }
    }
}

fn normalize(info_hash: &str) -> DebridResult<String> {
    magnet::normalize_info_hash(info_hash)
        .ok_or_else(|| DebridError::Internal(format!("invalid info-hash: {}", info_hash)))
}

/// Singleflight key for a stream resolution: same account, torrent and target
fn stream_key(request: &ResolutionRequest) -> String {
    let target = match request.target_episode() {
        Some((season, episode)) => format!("{}:{}", season, episode),
        None => "main".to_string(),
    };
    format!(
        "{}:{}:{}:{}",
        request.credentials.service,
        request.credentials.fingerprint(),
        request.info_hash,
        target
    )
}

/// Rows to persist for a scanned pack: every playable video, plus the ones
/// whose name carries a season/episode
pub fn classify_pack(info_hash: &str, files: &[RemoteFile]) -> (Vec<CachedPackEntry>, Vec<CachedPackEntry>) {
    let videos: Vec<&RemoteFile> = files.iter().filter(|f| is_playable_video(&f.path)).collect();

    let pack_rows = videos
        .iter()
        .map(|f| CachedPackEntry::pack_file(info_hash, f))
        .collect();
    let episode_rows = videos
        .iter()
        .filter_map(|f| {
            parse_season_episode(&f.path)
                .map(|p| CachedPackEntry::episode_file(info_hash, p.season, p.episode, f))
        })
        .collect();

    (pack_rows, episode_rows)
}

async fn persist_scan(
    store: &dyn PackStore,
    info_hash: &str,
    files: &[RemoteFile],
    series_id: Option<String>,
    service: &str,
) {
    let (pack_rows, episode_rows) = classify_pack(info_hash, files);

    let meta = PackTorrent {
        info_hash: info_hash.to_string(),
        title: pack_title(files),
        series_id,
        file_count: files.len() as u64,
        total_size_bytes: files.iter().map(|f| f.size_bytes).sum(),
        service: service.to_string(),
    };
    if let Err(e) = store.insert_torrent(&meta).await {
        warn!(info_hash = %info_hash, error = %e, "Failed to store pack torrent");
    }
    match store.insert_pack_files(&pack_rows).await {
        Ok(n) => debug!(info_hash = %info_hash, inserted = n, "Stored pack files"),
        Err(e) => warn!(info_hash = %info_hash, error = %e, "Failed to store pack files"),
    }
    match store.insert_episode_files(&episode_rows).await {
        Ok(n) => debug!(info_hash = %info_hash, inserted = n, "Stored episode files"),
        Err(e) => warn!(info_hash = %info_hash, error = %e, "Failed to store episode files"),
    }
}

/// Top-level folder shared by every file, if any
fn pack_title(files: &[RemoteFile]) -> Option<String> {
    let mut roots = files
        .iter()
        .filter_map(|f| f.path.split_once('/').map(|(root, _)| root));
    let first = roots.next()?;
    roots.all(|r| r == first).then(|| first.to_string())
}

/// The file for (season, episode) in a scanned pack. Never answers with a
/// file from another season.
fn find_episode(files: &[RemoteFile], season: u32, episode: u32) -> PackResolution {
    let classified = files
        .iter()
        .filter(|f| is_playable_video(&f.path))
        .find(|f| {
            parse_season_episode(&f.path).is_some_and(|p| p.season == season && p.episode == episode)
        });
    let matched = classified
        .or_else(|| file_matcher::match_episode_in_season(files, season, episode).map(|(f, _)| f));

    match matched {
        Some(file) => PackResolution::Found(MatchResult::from(file)),
        None => PackResolution::NotInPack,
    }
}

fn select_movie(files: &[RemoteFile], titles: &[String], year: Option<u32>, min_size: u64) -> PackResolution {
    match file_matcher::select_movie_file(files, titles, year, min_size) {
        Some(file) => PackResolution::Found(MatchResult::from(file)),
        None => PackResolution::NotInPack,
    }
}
