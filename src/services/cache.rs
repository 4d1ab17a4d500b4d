//! Single-value memo with a time-to-live
//!
//! Adapters keep the account's resource list here for a few seconds, so a
//! burst of lookups for the same account costs one listing call.

use parking_lot::RwLock;
use std::time::{Duration, Instant};

pub struct TtlMemo<T: Clone + Send + Sync> {
    slot: RwLock<Option<(Instant, T)>>,
    ttl: Duration,
}

impl<T: Clone + Send + Sync> TtlMemo<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: RwLock::new(None),
            ttl,
        }
    }

    /// The remembered value, unless it has outlived the TTL
    pub fn get(&self) -> Option<T> {
        match &*self.slot.read() {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub fn set(&self, value: T) {
        *self.slot.write() = Some((Instant::now(), value));
    }

    /// Forget the value; called after any call that changes the listing
    pub fn invalidate(&self) {
        self.slot.write().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_memo_returns_fresh_value() {
        let memo = TtlMemo::new(Duration::from_secs(60));
        assert_eq!(memo.get(), None::<u32>);
        memo.set(3u32);
        assert_eq!(memo.get(), Some(3));
    }

    #[test]
    fn test_memo_expires() {
        let memo = TtlMemo::new(Duration::from_millis(30));
        memo.set(vec!["a".to_string()]);
        sleep(Duration::from_millis(40));
        assert_eq!(memo.get(), None);
    }

    #[test]
    fn test_memo_invalidate() {
        let memo = TtlMemo::new(Duration::from_secs(60));
        memo.set(1u8);
        memo.invalidate();
        assert_eq!(memo.get(), None);
    }
}
