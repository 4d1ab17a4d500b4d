//! Adapter construction
//!
//! One adapter is built per (service, account) and reused, so its rate
//! limiter and resource-list memo are shared by every request for that
//! account.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::DebridAdapter;
use super::alldebrid::AllDebridClient;
use super::real_debrid::RealDebridClient;
use super::torbox::TorBoxClient;
use super::types::{DebridCredentials, DebridServiceKind};
use crate::services::rate_limiter::RetryPolicy;

/// Provider-list memo lifetime
pub const RESOURCE_MEMO_TTL: Duration = Duration::from_secs(10);

/// Hands out the adapter for a set of credentials
pub trait AdapterFactory: Send + Sync {
    fn adapter(&self, credentials: &DebridCredentials) -> Arc<dyn DebridAdapter>;
}

/// Builds real HTTP adapters, memoized per account
pub struct HttpAdapterFactory {
    retry: RetryPolicy,
    memo_ttl: Duration,
    adapters: Mutex<HashMap<(DebridServiceKind, String), Arc<dyn DebridAdapter>>>,
}

impl HttpAdapterFactory {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            memo_ttl: RESOURCE_MEMO_TTL,
            adapters: Mutex::new(HashMap::new()),
        }
    }

    fn build(&self, credentials: &DebridCredentials) -> Arc<dyn DebridAdapter> {
        let key = credentials.api_key.clone();
        let retry = self.retry.clone();
        match credentials.service {
            DebridServiceKind::RealDebrid => Arc::new(RealDebridClient::new(key, retry, self.memo_ttl)),
            DebridServiceKind::AllDebrid => Arc::new(AllDebridClient::new(key, retry, self.memo_ttl)),
            DebridServiceKind::TorBox => Arc::new(TorBoxClient::new(key, retry, self.memo_ttl)),
        }
    }
}

impl AdapterFactory for HttpAdapterFactory {
    fn adapter(&self, credentials: &DebridCredentials) -> Arc<dyn DebridAdapter> {
        let mut adapters = self.adapters.lock();
        adapters
            .entry((credentials.service, credentials.fingerprint()))
            .or_insert_with(|| {
                debug!(service = %credentials.service, "Creating debrid adapter");
                self.build(credentials)
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_adapters_are_memoized_per_account() {
        let factory = HttpAdapterFactory::new(RetryPolicy::default());
        let alice = DebridCredentials::new(DebridServiceKind::RealDebrid, "alice-key");
        let bob = DebridCredentials::new(DebridServiceKind::RealDebrid, "bob-key");

        let a1 = factory.adapter(&alice);
        let a2 = factory.adapter(&alice);
        let b = factory.adapter(&bob);

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(a1.kind(), DebridServiceKind::RealDebrid);
    }

    #[tokio::test]
    async fn test_service_decides_adapter() {
        let factory = HttpAdapterFactory::new(RetryPolicy::default());
        let creds = DebridCredentials::new(DebridServiceKind::TorBox, "key");
        let adapter = factory.adapter(&creds);
        assert_eq!(adapter.kind(), DebridServiceKind::TorBox);
        assert!(adapter.cleanup_on_success());
    }
}
