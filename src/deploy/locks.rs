use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as SiteMutex, OwnedMutexGuard};

/// Exclusive per-site locks. Every orchestrator entry point that touches an
/// existing site holds its lock for the whole operation.
#[derive(Default)]
pub struct SiteLocks {
    inner: Mutex<HashMap<i64, Arc<SiteMutex<()>>>>,
}

impl SiteLocks {
    /// Blocks until the site's lock is free. Must not be called from an
    /// async context.
    pub fn acquire(&self, site_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(site_id).or_default().clone()
        };
        lock.blocking_lock_owned()
    }

    /// Drops the entry of a deleted site.
    pub fn release(&self, site_id: i64) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(&site_id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_same_site_is_serialized() {
        let locks = Arc::new(SiteLocks::default());
        let busy = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                let busy = busy.clone();
                let overlaps = overlaps.clone();
                thread::spawn(move || {
                    let _guard = locks.acquire(7);
                    if busy.swap(true, Ordering::SeqCst) {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(10));
                    busy.store(false, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_different_sites_do_not_block() {
        let locks = SiteLocks::default();
        let _a = locks.acquire(1);
        let _b = locks.acquire(2);
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_release_forgets_site() {
        let locks = SiteLocks::default();
        drop(locks.acquire(3));
        locks.release(3);
        assert_eq!(locks.len(), 0);
    }
}
