pub(crate) mod base_cache;
pub(crate) mod entry;
pub(crate) mod overrides;
pub(crate) mod store;

/// The default number of segments of the internal store. Must be a power of two.
pub(crate) const DEFAULT_NUM_SEGMENTS: usize = 64;

/// How many times a waiter starts over after the computation it was waiting for
/// panicked or was dropped, before giving up.
#[cfg(any(feature = "sync", feature = "future"))]
pub(crate) const MAX_INIT_RETRIES: usize = 200;

pub(crate) fn ensure_num_segments_or_panic(num_segments: usize) {
    assert!(num_segments > 0, "num_segments must be greater than zero");
    assert!(
        num_segments.is_power_of_two(),
        "num_segments must be a power of two, got {num_segments}"
    );
}

#[cfg(feature = "logging")]
pub(crate) fn name_prefix(cache_name: Option<&str>) -> String {
    cache_name
        .map(|name| format!("[{name}] "))
        .unwrap_or_default()
}

#[cfg(feature = "logging")]
pub(crate) fn log_panic(
    payload: &(dyn std::any::Any + Send + 'static),
    what: &str,
    cache_name: Option<&str>,
) {
    // Try to downcast the payload into &str or String.
    let message: Option<std::borrow::Cow<'_, str>> =
        (payload.downcast_ref::<&str>().map(|s| (*s).into()))
            .or_else(|| payload.downcast_ref::<String>().map(Into::into));

    let cn = name_prefix(cache_name);

    if let Some(m) = message {
        log::error!("{cn}{what} panicked at '{m}'");
    } else {
        log::error!("{cn}{what} panicked");
    }
}
