//! Provider-neutral types shared by all debrid adapters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::DebridError;
use crate::services::magnet;

/// Which cloud debrid provider a credential belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebridServiceKind {
    RealDebrid,
    AllDebrid,
    TorBox,
}

impl std::fmt::Display for DebridServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DebridServiceKind::RealDebrid => write!(f, "realdebrid"),
            DebridServiceKind::AllDebrid => write!(f, "alldebrid"),
            DebridServiceKind::TorBox => write!(f, "torbox"),
        }
    }
}

impl std::str::FromStr for DebridServiceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_', ' '], "").as_str() {
            "realdebrid" | "rd" => Ok(DebridServiceKind::RealDebrid),
            "alldebrid" | "ad" => Ok(DebridServiceKind::AllDebrid),
            "torbox" | "tb" => Ok(DebridServiceKind::TorBox),
            _ => Err(anyhow::anyhow!("Unknown debrid service: {}", s)),
        }
    }
}

/// Service selector and API key for one user session
#[derive(Clone, PartialEq, Eq)]
pub struct DebridCredentials {
    pub service: DebridServiceKind,
    pub api_key: String,
}

impl DebridCredentials {
    pub fn new(service: DebridServiceKind, api_key: impl Into<String>) -> Self {
        Self {
            service,
            api_key: api_key.into(),
        }
    }

    /// Short, non-reversible identifier for the account behind this key
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.api_key.as_bytes());
        digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
    }
}

impl std::fmt::Debug for DebridCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebridCredentials")
            .field("service", &self.service)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// One resolution attempt for a play action
#[derive(Debug, Clone)]
pub struct ResolutionRequest {
    /// Lowercase info-hash
    pub info_hash: String,
    pub magnet_uri: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub credentials: DebridCredentials,
}

impl ResolutionRequest {
    /// Build a request from an info-hash, deriving the magnet link
    pub fn new(info_hash: &str, credentials: DebridCredentials) -> Result<Self, DebridError> {
        let info_hash = magnet::normalize_info_hash(info_hash).ok_or_else(|| {
            DebridError::Internal(format!("invalid info-hash: {}", info_hash))
        })?;
        Ok(Self {
            magnet_uri: magnet::build_magnet(&info_hash, None),
            info_hash,
            season: None,
            episode: None,
            credentials,
        })
    }

    /// Build a request from a magnet link, extracting the info-hash
    pub fn from_magnet(magnet_uri: &str, credentials: DebridCredentials) -> Result<Self, DebridError> {
        let info_hash = magnet::parse_info_hash(magnet_uri).ok_or_else(|| {
            DebridError::Internal("magnet link has no btih info-hash".to_string())
        })?;
        Ok(Self {
            info_hash,
            magnet_uri: magnet_uri.to_string(),
            season: None,
            episode: None,
            credentials,
        })
    }

    pub fn with_episode(mut self, season: u32, episode: u32) -> Self {
        self.season = Some(season);
        self.episode = Some(episode);
        self
    }

    /// Season and episode, only when both are present
    pub fn target_episode(&self) -> Option<(u32, u32)> {
        self.season.zip(self.episode)
    }
}

/// A file inside a provider-side torrent
///
/// `id` is provider-defined and may legitimately be `0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: u64,
    pub path: String,
    pub size_bytes: u64,
    pub selected: bool,
    /// Restricted cloud link, when the provider exposes one per file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl RemoteFile {
    pub fn new(id: u64, path: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            id,
            path: path.into(),
            size_bytes,
            selected: false,
            link: None,
        }
    }

    /// Last path component
    pub fn file_name(&self) -> &str {
        self.path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.path.as_str())
    }
}

/// The single file chosen as the answer for a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub file_id: u64,
    pub file_name: String,
    pub file_size_bytes: u64,
}

impl From<&RemoteFile> for MatchResult {
    fn from(file: &RemoteFile) -> Self {
        Self {
            file_id: file.id,
            file_name: file.path.clone(),
            file_size_bytes: file.size_bytes,
        }
    }
}

/// Terminal output: a directly playable URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedStream {
    pub url: String,
    pub filename: String,
    pub size_bytes: u64,
}

/// Generic protocol state every provider maps onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
    Submitted,
    Converting,
    AwaitingFileSelection,
    Fetching,
    Ready,
    Unlocked,
    Error,
}

impl ProtocolState {
    fn rank(self) -> u8 {
        match self {
            ProtocolState::Submitted => 0,
            ProtocolState::Converting => 1,
            ProtocolState::AwaitingFileSelection => 2,
            ProtocolState::Fetching => 3,
            ProtocolState::Ready => 4,
            ProtocolState::Unlocked => 5,
            ProtocolState::Error => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProtocolState::Unlocked | ProtocolState::Error)
    }

    /// Whether the provider has not yet produced a file list
    pub fn is_pre_selection(self) -> bool {
        matches!(self, ProtocolState::Submitted | ProtocolState::Converting)
    }

    /// Validate a transition. States only move forward (providers may skip
    /// states), `Error` is reachable from any non-terminal state and
    /// `Unlocked` only from `Ready`.
    pub fn advance(self, next: ProtocolState) -> Result<ProtocolState, DebridError> {
        let legal = !self.is_terminal()
            && match next {
                ProtocolState::Error => true,
                ProtocolState::Unlocked => self == ProtocolState::Ready,
                _ => next.rank() >= self.rank(),
            };
        if legal {
            Ok(next)
        } else {
            Err(DebridError::Internal(format!(
                "illegal protocol transition {} -> {}",
                self, next
            )))
        }
    }
}

impl std::fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolState::Submitted => write!(f, "submitted"),
            ProtocolState::Converting => write!(f, "converting"),
            ProtocolState::AwaitingFileSelection => write!(f, "awaiting_file_selection"),
            ProtocolState::Fetching => write!(f, "fetching"),
            ProtocolState::Ready => write!(f, "ready"),
            ProtocolState::Unlocked => write!(f, "unlocked"),
            ProtocolState::Error => write!(f, "error"),
        }
    }
}

/// Snapshot returned by a status poll
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceStatus {
    pub state: ProtocolState,
    /// Percent complete, 0.0..=100.0
    pub progress: f64,
    pub files: Vec<RemoteFile>,
    pub name: Option<String>,
    /// Provider status text, kept for logs and error messages
    pub detail: Option<String>,
}

impl ResourceStatus {
    pub fn new(state: ProtocolState) -> Self {
        Self {
            state,
            progress: 0.0,
            files: Vec::new(),
            name: None,
            detail: None,
        }
    }

    pub fn with_files(mut self, files: Vec<RemoteFile>) -> Self {
        self.files = files;
        self
    }
}

/// An entry in the account's list of active resources
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSummary {
    pub id: String,
    /// Lowercase info-hash
    pub info_hash: String,
    pub state: ProtocolState,
    pub created_at: Option<DateTime<Utc>>,
}

impl ResourceSummary {
    /// Finished resources are the eviction candidates under a quota
    pub fn is_completed(&self) -> bool {
        self.state == ProtocolState::Ready
    }
}

/// Which files to fetch when the provider asks for a selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSelection {
    One(u64),
    All,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_kind_roundtrip() {
        for kind in [
            DebridServiceKind::RealDebrid,
            DebridServiceKind::AllDebrid,
            DebridServiceKind::TorBox,
        ] {
            let parsed: DebridServiceKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert_eq!(
            "Real-Debrid".parse::<DebridServiceKind>().unwrap(),
            DebridServiceKind::RealDebrid
        );
        assert!("premiumize".parse::<DebridServiceKind>().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_key() {
        let creds = DebridCredentials::new(DebridServiceKind::TorBox, "super-secret");
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("super-secret"));
        assert_eq!(creds.fingerprint().len(), 16);
        assert_ne!(
            creds.fingerprint(),
            DebridCredentials::new(DebridServiceKind::TorBox, "other").fingerprint()
        );
    }

    #[test]
    fn test_forward_transitions() {
        let state = ProtocolState::Submitted;
        let state = state.advance(ProtocolState::Converting).unwrap();
        let state = state.advance(ProtocolState::AwaitingFileSelection).unwrap();
        let state = state.advance(ProtocolState::Fetching).unwrap();
        let state = state.advance(ProtocolState::Fetching).unwrap();
        let state = state.advance(ProtocolState::Ready).unwrap();
        assert_eq!(
            state.advance(ProtocolState::Unlocked).unwrap(),
            ProtocolState::Unlocked
        );
    }

    #[test]
    fn test_cached_content_skips_states() {
        assert_eq!(
            ProtocolState::Submitted
                .advance(ProtocolState::Ready)
                .unwrap(),
            ProtocolState::Ready
        );
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(ProtocolState::Fetching
            .advance(ProtocolState::Converting)
            .is_err());
        assert!(ProtocolState::Fetching
            .advance(ProtocolState::Unlocked)
            .is_err());
        assert!(ProtocolState::Unlocked
            .advance(ProtocolState::Error)
            .is_err());
        assert!(ProtocolState::Error.advance(ProtocolState::Ready).is_err());
    }

    #[test]
    fn test_error_reachable_from_non_terminal() {
        for state in [
            ProtocolState::Submitted,
            ProtocolState::Converting,
            ProtocolState::AwaitingFileSelection,
            ProtocolState::Fetching,
            ProtocolState::Ready,
        ] {
            assert_eq!(
                state.advance(ProtocolState::Error).unwrap(),
                ProtocolState::Error
            );
        }
    }

    #[test]
    fn test_file_name_strips_directories() {
        let file = RemoteFile::new(0, "Show.S01/Show.S01E02.mkv", 10);
        assert_eq!(file.file_name(), "Show.S01E02.mkv");
        let bare = RemoteFile::new(1, "movie.mp4", 10);
        assert_eq!(bare.file_name(), "movie.mp4");
    }
}
