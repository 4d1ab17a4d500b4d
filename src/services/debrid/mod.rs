//! Cloud debrid providers
//!
//! Every provider implements [`DebridAdapter`], a uniform capability set
//! (submit, status, select, unlock, delete) over its own REST protocol. The
//! [`session::ProtocolDriver`] walks any adapter through the generic
//! [`ProtocolState`] machine; nothing above this module depends on a concrete
//! provider.

pub mod alldebrid;
pub mod error;
pub mod factory;
pub mod http;
pub mod real_debrid;
pub mod session;
pub mod torbox;
pub mod types;

use async_trait::async_trait;

pub use error::{DebridError, DebridResult, truncate_payload};
pub use factory::{AdapterFactory, HttpAdapterFactory};
pub use session::{DriverSettings, ProtocolDriver};
pub use types::{
    DebridCredentials, DebridServiceKind, FileSelection, MatchResult, ProtocolState, RemoteFile,
    ResolutionRequest, ResolvedStream, ResourceStatus, ResourceSummary,
};

/// Uniform capability set implemented by each provider
#[async_trait]
pub trait DebridAdapter: Send + Sync {
    fn kind(&self) -> DebridServiceKind;

    /// Add a magnet to the account and return the provider's resource id.
    ///
    /// Fails with [`DebridError::QuotaExceeded`] when the account must give
    /// up an active resource first.
    async fn submit(&self, magnet: &str) -> DebridResult<String>;

    /// Poll the resource once
    async fn status(&self, resource_id: &str) -> DebridResult<ResourceStatus>;

    /// Choose which files the provider should fetch
    async fn select_files(&self, resource_id: &str, selection: &FileSelection) -> DebridResult<()>;

    /// Turn a file of a ready resource into a directly fetchable URL
    async fn unlock(&self, resource_id: &str, file: &RemoteFile) -> DebridResult<ResolvedStream>;

    async fn delete(&self, resource_id: &str) -> DebridResult<()>;

    /// Active resources on the account, possibly memoized for a few seconds
    async fn list_resources(&self) -> DebridResult<Vec<ResourceSummary>>;

    /// Look for a resource this account already holds for `info_hash`
    async fn find_existing(&self, info_hash: &str) -> DebridResult<Option<ResourceSummary>> {
        let resources = self.list_resources().await?;
        Ok(resources
            .into_iter()
            .find(|r| r.info_hash.eq_ignore_ascii_case(info_hash) && r.state != ProtocolState::Error))
    }

    /// File list for content the provider already holds, without submitting.
    /// `None` when the provider has no such check or the content is not cached.
    async fn cached_files(&self, _info_hash: &str) -> DebridResult<Option<Vec<RemoteFile>>> {
        Ok(None)
    }

    /// Whether resources created by a call are removed even when it succeeds
    fn cleanup_on_success(&self) -> bool {
        false
    }
}
