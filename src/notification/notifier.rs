use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::notification::{InvalidationListener, RemovalCause};

pub(crate) struct RemovalNotifier<K, V> {
    listener: InvalidationListener<K, V>,
    is_enabled: AtomicBool,
    #[cfg(feature = "logging")]
    cache_name: Option<String>,
}

impl<K, V> RemovalNotifier<K, V> {
    pub(crate) fn new(listener: InvalidationListener<K, V>, _cache_name: Option<String>) -> Self {
        Self {
            listener,
            is_enabled: AtomicBool::new(true),
            #[cfg(feature = "logging")]
            cache_name: _cache_name,
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.is_enabled.load(Ordering::Acquire)
    }

    pub(crate) fn notify(&self, key: Arc<K>, value: V, cause: RemovalCause) {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        if !self.is_enabled() {
            return;
        }

        let listener_clo = || (self.listener)(key, value, cause);

        // Safety: It is safe to assert unwind safety here because we will not
        // call the listener again if it has been panicked.
        let result = catch_unwind(AssertUnwindSafe(listener_clo));
        if let Err(_payload) = result {
            self.is_enabled.store(false, Ordering::Release);
            #[cfg(feature = "logging")]
            crate::common::log_panic(
                &*_payload,
                "Disabled the invalidation listener because it",
                self.cache_name.as_deref(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RemovalNotifier;
    use crate::notification::RemovalCause;

    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn delivers_until_the_listener_panics() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen1 = Arc::clone(&seen);
        let notifier = RemovalNotifier::new(
            Arc::new(move |k: Arc<u32>, v: &'static str, cause| {
                if *k == 2 {
                    panic!("boom");
                }
                seen1.lock().push((*k, v, cause));
            }),
            Some("test".into()),
        );

        notifier.notify(Arc::new(1), "a", RemovalCause::Explicit);
        notifier.notify(Arc::new(2), "b", RemovalCause::Explicit);
        assert!(!notifier.is_enabled());
        notifier.notify(Arc::new(3), "c", RemovalCause::Signaled);

        assert_eq!(*seen.lock(), vec![(1, "a", RemovalCause::Explicit)]);
    }
}
